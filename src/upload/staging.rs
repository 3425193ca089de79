use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use tokio::fs;

/// A raw upload written to the staging directory.
///
/// The file is removed by [`StagedFile::discard`] on the normal paths; if the
/// value is dropped without being discarded (cancelled request, timeout, panic)
/// the drop guard removes it synchronously.
#[derive(Debug)]
pub struct StagedFile {
    path: PathBuf,
    pub size: u64,
    pub mime_type: String,
    pub original_name: String,
    removed: bool,
}

impl StagedFile {
    pub(crate) fn new(path: PathBuf, size: u64, mime_type: String, original_name: String) -> Self {
        Self {
            path,
            size,
            mime_type,
            original_name,
            removed: false,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Best-effort removal of the staging file. Failures are logged, never returned.
    pub async fn discard(mut self) {
        self.removed = true;
        match fs::remove_file(&self.path).await {
            Ok(()) => {
                tracing::debug!(path = %self.path.display(), "staging file removed");
            }
            Err(err) if err.kind() == ErrorKind::NotFound => {}
            Err(err) => {
                tracing::warn!(
                    path = %self.path.display(),
                    error = %err,
                    "failed to remove staging file"
                );
            }
        }
    }
}

impl Drop for StagedFile {
    fn drop(&mut self) {
        if self.removed {
            return;
        }
        if let Err(err) = std::fs::remove_file(&self.path) {
            if err.kind() != ErrorKind::NotFound {
                tracing::warn!(
                    path = %self.path.display(),
                    error = %err,
                    "failed to remove abandoned staging file"
                );
            }
        }
    }
}
