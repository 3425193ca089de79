use std::io::ErrorKind;
use std::path::Path;

use tokio::fs;

use crate::error::{IngestError, IngestResult};
use crate::storage::layout::TenantDirectory;

/// Outcome of probing a tenant directory before use.
#[derive(Debug)]
pub enum DirectoryStatus {
    Exists,
    NotFound,
    OtherError(std::io::Error),
}

pub async fn probe(path: &Path) -> DirectoryStatus {
    match fs::metadata(path).await {
        Ok(meta) if meta.is_dir() => DirectoryStatus::Exists,
        Ok(_) => DirectoryStatus::OtherError(std::io::Error::new(
            ErrorKind::AlreadyExists,
            "path exists but is not a directory",
        )),
        Err(err) if err.kind() == ErrorKind::NotFound => DirectoryStatus::NotFound,
        Err(err) => DirectoryStatus::OtherError(err),
    }
}

/// Make sure `directory` exists, creating missing parents.
///
/// Safe to call concurrently for the same directory: losing a creation race
/// counts as success.
pub async fn ensure(directory: &TenantDirectory) -> IngestResult<()> {
    let path = directory.path.as_path();
    match probe(path).await {
        DirectoryStatus::Exists => Ok(()),
        DirectoryStatus::NotFound => match fs::create_dir_all(path).await {
            Ok(()) => {
                tracing::info!(
                    tenant = %directory.tenant,
                    category = %directory.category,
                    path = %path.display(),
                    "created tenant directory"
                );
                Ok(())
            }
            Err(err) if err.kind() == ErrorKind::AlreadyExists && path.is_dir() => Ok(()),
            Err(source) => Err(IngestError::DirectoryAccess {
                path: path.to_path_buf(),
                source,
            }),
        },
        DirectoryStatus::OtherError(source) => Err(IngestError::DirectoryAccess {
            path: path.to_path_buf(),
            source,
        }),
    }
}
