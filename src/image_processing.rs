use std::io::{Cursor, Write};
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use anyhow::{Context, Result, anyhow};
use image::{DynamicImage, ImageFormat};
use tempfile::NamedTempFile;
use tokio::sync::OwnedSemaphorePermit;
use tokio::time::Instant;

use crate::error::{IngestError, IngestResult};
use crate::upload::StagedFile;

pub fn detect_mime_type(bytes: &[u8]) -> Option<&'static str> {
    if bytes.starts_with(&[0x89, 0x50, 0x4E, 0x47, 0x0D, 0x0A, 0x1A, 0x0A]) {
        return Some("image/png");
    }
    if bytes.starts_with(&[0xFF, 0xD8, 0xFF]) {
        return Some("image/jpeg");
    }
    if bytes.len() >= 12 && &bytes[0..4] == b"RIFF" && &bytes[8..12] == b"WEBP" {
        return Some("image/webp");
    }
    None
}

pub fn mime_to_format(mime_type: &str) -> Result<ImageFormat> {
    match mime_type {
        "image/png" => Ok(ImageFormat::Png),
        "image/jpeg" | "image/jpg" => Ok(ImageFormat::Jpeg),
        "image/webp" => Ok(ImageFormat::WebP),
        _ => Err(anyhow!("unsupported mime type: {mime_type}")),
    }
}

/// Decode with the format the bytes actually carry, falling back to the declared mime type.
pub fn decode_image(bytes: &[u8], declared_mime: &str) -> Result<DynamicImage> {
    let mime_type = detect_mime_type(bytes).unwrap_or(declared_mime);
    let format = mime_to_format(mime_type)?;
    image::load_from_memory_with_format(bytes, format)
        .with_context(|| format!("decode {mime_type} failed"))
}

/// The webp encoder only takes 8-bit RGB(A); everything else is narrowed first.
pub fn encode_webp(image: &DynamicImage) -> Result<Vec<u8>> {
    let normalized = if image.color().has_alpha() {
        DynamicImage::ImageRgba8(image.to_rgba8())
    } else {
        DynamicImage::ImageRgb8(image.to_rgb8())
    };
    let mut output = Vec::new();
    normalized
        .write_to(&mut Cursor::new(&mut output), ImageFormat::WebP)
        .context("encode webp failed")?;
    Ok(output)
}

#[derive(Debug, Default)]
enum GateState {
    #[default]
    Open,
    Cancelled,
    Committed,
}

/// Decides once whether a conversion may rename its output into place.
///
/// The request side cancels when it stops waiting; the conversion side commits
/// under the same lock, so a cancelled conversion never touches the destination
/// and a committed one can no longer be cancelled.
#[derive(Debug, Default)]
pub struct CommitGate {
    state: Mutex<GateState>,
}

impl CommitGate {
    fn state(&self) -> MutexGuard<'_, GateState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(*self.state(), GateState::Cancelled)
    }

    /// Returns `false` when the output has already been committed.
    pub fn cancel(&self) -> bool {
        let mut state = self.state();
        if matches!(*state, GateState::Committed) {
            return false;
        }
        *state = GateState::Cancelled;
        true
    }

    fn commit_with(&self, commit: impl FnOnce() -> Result<()>) -> Result<bool> {
        let mut state = self.state();
        if matches!(*state, GateState::Cancelled) {
            return Ok(false);
        }
        commit()?;
        *state = GateState::Committed;
        Ok(true)
    }
}

fn write_part(bytes: &[u8], destination: &Path) -> Result<NamedTempFile> {
    let parent = destination
        .parent()
        .ok_or_else(|| anyhow!("destination {} has no parent", destination.display()))?;
    let mut part = tempfile::Builder::new()
        .prefix(".")
        .suffix(".part")
        .tempfile_in(parent)
        .with_context(|| format!("create temp file in {}", parent.display()))?;
    part.write_all(bytes).context("write converted image")?;
    part.as_file().sync_all().context("sync converted image")?;
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        part.as_file()
            .set_permissions(std::fs::Permissions::from_mode(0o644))
            .context("set converted image permissions")?;
    }
    Ok(part)
}

/// Write `bytes` next to `destination` and rename into place, so the
/// destination is either the previous file or the complete new one.
///
/// Returns `false`, leaving nothing behind, when `gate` was cancelled first.
pub fn persist_atomically(bytes: &[u8], destination: &Path, gate: &CommitGate) -> Result<bool> {
    if gate.is_cancelled() {
        return Ok(false);
    }
    let part = write_part(bytes, destination)?;
    gate.commit_with(|| {
        part.persist(destination)
            .map_err(|err| err.error)
            .with_context(|| format!("rename into {}", destination.display()))?;
        Ok(())
    })
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Conversion {
    Written { size_bytes: u64 },
    Abandoned,
}

pub fn convert_file(
    source: &Path,
    declared_mime: &str,
    destination: &Path,
    gate: &CommitGate,
) -> Result<Conversion> {
    if gate.is_cancelled() {
        return Ok(Conversion::Abandoned);
    }
    let bytes = std::fs::read(source).with_context(|| format!("read {}", source.display()))?;
    let image = decode_image(&bytes, declared_mime)?;
    let encoded = encode_webp(&image)?;
    if persist_atomically(&encoded, destination, gate)? {
        Ok(Conversion::Written {
            size_bytes: encoded.len() as u64,
        })
    } else {
        Ok(Conversion::Abandoned)
    }
}

/// Re-encode a validated staged upload as webp at `destination`.
///
/// Decoding and encoding run on the blocking pool, holding `permit` until the
/// work is really over. If `deadline` passes first the conversion is abandoned
/// and never lands at `destination`.
pub async fn convert(
    staged: &StagedFile,
    destination: &Path,
    permit: OwnedSemaphorePermit,
    deadline: Instant,
) -> IngestResult<Conversion> {
    let source = staged.path().to_path_buf();
    let declared_mime = staged.mime_type.clone();
    let target = destination.to_path_buf();
    let gate = Arc::new(CommitGate::default());
    let start = Instant::now();

    let task_gate = Arc::clone(&gate);
    let mut task = tokio::task::spawn_blocking(move || {
        let _permit = permit;
        convert_file(&source, &declared_mime, &target, &task_gate)
    });

    let joined = match tokio::time::timeout_at(deadline, &mut task).await {
        Ok(joined) => joined,
        Err(_) if gate.cancel() => {
            tracing::warn!(path = %destination.display(), "conversion abandoned at deadline");
            return Ok(Conversion::Abandoned);
        }
        // Already renamed into place.
        Err(_) => task.await,
    };
    let conversion = joined
        .map_err(|err| IngestError::Conversion(anyhow!("conversion task failed: {err}")))?
        .map_err(IngestError::Conversion)?;

    if let Conversion::Written { size_bytes } = conversion {
        tracing::info!(
            path = %destination.display(),
            source_bytes = staged.size,
            size_bytes,
            duration_ms = start.elapsed().as_secs_f64() * 1000.0,
            "image converted"
        );
    }
    Ok(conversion)
}
