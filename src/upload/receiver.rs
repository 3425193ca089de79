use std::io::ErrorKind;
use std::path::PathBuf;

use axum::extract::multipart::{Field, Multipart, MultipartError};
use axum::http::StatusCode;
use chrono::Utc;
use tokio::fs::{self, File, OpenOptions};
use tokio::io::AsyncWriteExt;

use crate::error::{IngestError, IngestResult};
use crate::slug::staging_file_name;
use crate::upload::staging::StagedFile;

pub const IMAGE_FIELD: &str = "image";
const UNKNOWN_MIME_TYPE: &str = "application/octet-stream";
const MAX_STAGING_ATTEMPTS: u32 = 16;

/// Streams the `image` multipart field into the staging directory.
#[derive(Clone, Debug)]
pub struct UploadReceiver {
    staging_dir: PathBuf,
    size_limit: u64,
}

impl UploadReceiver {
    pub fn new(staging_dir: PathBuf, size_limit: u64) -> Self {
        Self {
            staging_dir,
            size_limit,
        }
    }

    /// Returns `None` when the request carried no `image` file field.
    ///
    /// Fields with other names, and `image` fields without a filename, are
    /// skipped. A second `image` file is rejected and the first one discarded.
    pub async fn receive(&self, multipart: &mut Multipart) -> IngestResult<Option<StagedFile>> {
        let mut staged: Option<StagedFile> = None;
        loop {
            let field = match multipart.next_field().await {
                Ok(Some(field)) => field,
                Ok(None) => break,
                Err(err) => return Err(self.multipart_error(err, staged.as_ref())),
            };
            if field.name() != Some(IMAGE_FIELD) || field.file_name().is_none() {
                continue;
            }
            if staged.is_some() {
                return Err(IngestError::TooManyFiles);
            }
            staged = Some(self.stage_field(field).await?);
        }
        Ok(staged)
    }

    async fn stage_field(&self, mut field: Field<'_>) -> IngestResult<StagedFile> {
        let original_name = field.file_name().unwrap_or_default().to_string();
        let mime_type = field
            .content_type()
            .map(|value| value.split(';').next().unwrap_or(value).trim().to_ascii_lowercase())
            .filter(|value| !value.is_empty())
            .unwrap_or_else(|| UNKNOWN_MIME_TYPE.to_string());

        let (path, mut file) = self.create_staging_file(&original_name, &mime_type).await?;
        let mut staged = StagedFile::new(path, 0, mime_type, original_name);

        loop {
            let chunk = match field.chunk().await {
                Ok(Some(chunk)) => chunk,
                Ok(None) => break,
                Err(err) => return Err(self.multipart_error(err, Some(&staged))),
            };
            file.write_all(&chunk).await.map_err(|source| IngestError::Staging {
                path: staged.path().to_path_buf(),
                source,
            })?;
            staged.size += chunk.len() as u64;
        }
        file.flush().await.map_err(|source| IngestError::Staging {
            path: staged.path().to_path_buf(),
            source,
        })?;

        tracing::debug!(
            path = %staged.path().display(),
            size_bytes = staged.size,
            mime_type = %staged.mime_type,
            original_name = %staged.original_name,
            "upload staged"
        );
        Ok(staged)
    }

    async fn create_staging_file(
        &self,
        original_name: &str,
        mime_type: &str,
    ) -> IngestResult<(PathBuf, File)> {
        fs::create_dir_all(&self.staging_dir)
            .await
            .map_err(|source| IngestError::Staging {
                path: self.staging_dir.clone(),
                source,
            })?;

        let mut token = Utc::now().timestamp_nanos_opt().unwrap_or_default().max(0) as u128;
        for _ in 0..MAX_STAGING_ATTEMPTS {
            let path = self
                .staging_dir
                .join(staging_file_name(original_name, mime_type, token));
            match OpenOptions::new().write(true).create_new(true).open(&path).await {
                Ok(file) => return Ok((path, file)),
                Err(err) if err.kind() == ErrorKind::AlreadyExists => token += 1,
                Err(source) => return Err(IngestError::Staging { path, source }),
            }
        }
        Err(IngestError::Staging {
            path: self.staging_dir.clone(),
            source: std::io::Error::new(
                ErrorKind::AlreadyExists,
                "could not allocate a unique staging file name",
            ),
        })
    }

    fn multipart_error(&self, err: MultipartError, staged: Option<&StagedFile>) -> IngestError {
        if err.status() == StatusCode::PAYLOAD_TOO_LARGE {
            IngestError::SizeExceeded {
                size: staged.map(|file| file.size).unwrap_or_default(),
                limit: self.size_limit,
            }
        } else {
            IngestError::MalformedUpload(err.body_text())
        }
    }
}
