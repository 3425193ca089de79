use crate::error::{IngestError, IngestResult};
use crate::upload::staging::StagedFile;

/// Presence, size ceiling and mime whitelist for staged uploads.
#[derive(Clone, Debug)]
pub struct UploadPolicy {
    pub max_bytes: u64,
    pub allowed_mime_types: Vec<String>,
}

impl UploadPolicy {
    pub fn new(max_bytes: u64, allowed_mime_types: Vec<String>) -> Self {
        Self {
            max_bytes,
            allowed_mime_types,
        }
    }

    pub fn allows_mime(&self, mime_type: &str) -> bool {
        self.allowed_mime_types
            .iter()
            .any(|allowed| allowed.eq_ignore_ascii_case(mime_type))
    }

    /// Checks run in order: presence, size, mime. A rejected upload has its
    /// staging file removed before the error is returned.
    pub async fn validate(&self, staged: Option<StagedFile>) -> IngestResult<StagedFile> {
        let Some(staged) = staged else {
            return Err(IngestError::MissingFile);
        };
        if staged.size > self.max_bytes {
            let size = staged.size;
            staged.discard().await;
            return Err(IngestError::SizeExceeded {
                size,
                limit: self.max_bytes,
            });
        }
        if !self.allows_mime(&staged.mime_type) {
            let mime_type = staged.mime_type.clone();
            staged.discard().await;
            return Err(IngestError::UnsupportedFormat(mime_type));
        }
        Ok(staged)
    }
}

#[cfg(test)]
mod tests {
    use std::path::PathBuf;

    use tempfile::{TempDir, tempdir};

    use super::*;

    const MIB: u64 = 1024 * 1024;

    fn policy() -> UploadPolicy {
        UploadPolicy::new(
            2 * MIB,
            vec!["image/jpeg".to_string(), "image/png".to_string()],
        )
    }

    fn staged_on_disk(dir: &TempDir, size: u64, mime: &str) -> (StagedFile, PathBuf) {
        let path = dir.path().join("upload-1.bin");
        std::fs::write(&path, b"payload").unwrap();
        let staged =
            StagedFile::new(path.clone(), size, mime.to_string(), "upload.png".to_string());
        (staged, path)
    }

    #[tokio::test]
    async fn missing_file_is_rejected() {
        let err = policy().validate(None).await.unwrap_err();
        assert!(matches!(err, IngestError::MissingFile));
    }

    #[tokio::test]
    async fn oversized_upload_is_rejected_and_removed() {
        let dir = tempdir().unwrap();
        let (staged, path) = staged_on_disk(&dir, 2 * MIB + 1, "image/png");

        let err = policy().validate(Some(staged)).await.unwrap_err();

        assert!(matches!(err, IngestError::SizeExceeded { limit, .. } if limit == 2 * MIB));
        assert!(!path.exists());
    }

    #[tokio::test]
    async fn size_is_checked_before_mime() {
        let dir = tempdir().unwrap();
        let (staged, _path) = staged_on_disk(&dir, 3 * MIB, "image/gif");

        let err = policy().validate(Some(staged)).await.unwrap_err();

        assert!(matches!(err, IngestError::SizeExceeded { .. }));
    }

    #[tokio::test]
    async fn unsupported_mime_is_rejected_and_removed() {
        let dir = tempdir().unwrap();
        let (staged, path) = staged_on_disk(&dir, 1024, "image/gif");

        let err = policy().validate(Some(staged)).await.unwrap_err();

        assert!(matches!(err, IngestError::UnsupportedFormat(ref mime) if mime == "image/gif"));
        assert!(!path.exists());
    }

    #[tokio::test]
    async fn upload_at_the_limit_passes() {
        let dir = tempdir().unwrap();
        let (staged, path) = staged_on_disk(&dir, 2 * MIB, "image/jpeg");

        let staged = policy().validate(Some(staged)).await.unwrap();

        assert_eq!(staged.path(), path.as_path());
        assert!(path.exists());
        staged.discard().await;
    }
}
