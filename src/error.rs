use std::path::PathBuf;

use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde::Serialize;
use thiserror::Error;

const INTERNAL_MESSAGE: &str = "Internal server error.";
const BUSY_MESSAGE: &str = "Server is busy, please retry later.";

#[derive(Debug, Error)]
pub enum IngestError {
    #[error("Domain header is required")]
    MissingDomain,

    #[error("Invalid domain: {0}")]
    InvalidDomain(String),

    #[error("No image was uploaded.")]
    MissingFile,

    #[error("Only one image may be uploaded per request.")]
    TooManyFiles,

    #[error("Image exceeds the maximum allowed size ({}).", format_limit(.limit))]
    SizeExceeded { size: u64, limit: u64 },

    #[error("Image format not allowed: {0}")]
    UnsupportedFormat(String),

    #[error("Malformed upload: {0}")]
    MalformedUpload(String),

    #[error("Upload was not received in time.")]
    ReceiveTimedOut,

    #[error("directory access failed for {}: {source}", .path.display())]
    DirectoryAccess {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("staging failed for {}: {source}", .path.display())]
    Staging {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("image conversion failed: {0:#}")]
    Conversion(anyhow::Error),

    #[error("upload timed out after {0}s")]
    TimedOut(u64),

    #[error("admission not granted within {0}s")]
    Busy(u64),
}

pub type IngestResult<T> = Result<T, IngestError>;

#[derive(Serialize)]
struct ErrorResponse {
    error: String,
}

fn format_limit(limit: &u64) -> String {
    const MIB: u64 = 1024 * 1024;
    let limit = *limit;
    if limit >= MIB && limit % MIB == 0 {
        format!("{}MB", limit / MIB)
    } else {
        format!("{limit} bytes")
    }
}

impl IngestError {
    /// True for failures caused by the request itself.
    pub fn is_client_error(&self) -> bool {
        matches!(
            self,
            IngestError::MissingDomain
                | IngestError::InvalidDomain(_)
                | IngestError::MissingFile
                | IngestError::TooManyFiles
                | IngestError::SizeExceeded { .. }
                | IngestError::UnsupportedFormat(_)
                | IngestError::MalformedUpload(_)
                | IngestError::ReceiveTimedOut
        )
    }

    pub fn status_code(&self) -> StatusCode {
        match self {
            IngestError::Busy(_) => StatusCode::SERVICE_UNAVAILABLE,
            IngestError::ReceiveTimedOut => StatusCode::REQUEST_TIMEOUT,
            err if err.is_client_error() => StatusCode::BAD_REQUEST,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Message safe to hand back to the caller.
    pub fn client_message(&self) -> String {
        match self {
            IngestError::Busy(_) => BUSY_MESSAGE.to_string(),
            err if err.is_client_error() => err.to_string(),
            _ => INTERNAL_MESSAGE.to_string(),
        }
    }
}

impl IntoResponse for IngestError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        if status.is_server_error() {
            tracing::error!(error = ?self, "{self}");
        } else {
            tracing::warn!(error = %self, status = status.as_u16(), "upload rejected");
        }
        (
            status,
            Json(ErrorResponse {
                error: self.client_message(),
            }),
        )
            .into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn client_errors_map_to_bad_request() {
        let errors = [
            IngestError::MissingDomain,
            IngestError::InvalidDomain("../etc".to_string()),
            IngestError::MissingFile,
            IngestError::TooManyFiles,
            IngestError::SizeExceeded {
                size: 3 * 1024 * 1024,
                limit: 2 * 1024 * 1024,
            },
            IngestError::UnsupportedFormat("image/gif".to_string()),
            IngestError::MalformedUpload("bad boundary".to_string()),
        ];
        for err in errors {
            assert_eq!(err.status_code(), StatusCode::BAD_REQUEST, "{err}");
        }
    }

    #[test]
    fn internal_errors_hide_details() {
        let err = IngestError::DirectoryAccess {
            path: PathBuf::from("/srv/media/example.com"),
            source: std::io::Error::new(std::io::ErrorKind::PermissionDenied, "denied"),
        };
        assert_eq!(err.status_code(), StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(err.client_message(), INTERNAL_MESSAGE);

        let err = IngestError::Conversion(anyhow::anyhow!("corrupt png"));
        assert_eq!(err.client_message(), INTERNAL_MESSAGE);
        assert!(err.to_string().contains("corrupt png"));
    }

    #[test]
    fn size_message_uses_megabytes() {
        let err = IngestError::SizeExceeded {
            size: 3_000_000,
            limit: 2 * 1024 * 1024,
        };
        assert_eq!(
            err.client_message(),
            "Image exceeds the maximum allowed size (2MB)."
        );
    }

    #[test]
    fn busy_is_service_unavailable() {
        let err = IngestError::Busy(30);
        assert_eq!(err.status_code(), StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(err.client_message(), BUSY_MESSAGE);
    }

    #[test]
    fn slow_body_is_the_client_timing_out() {
        let err = IngestError::ReceiveTimedOut;
        assert_eq!(err.status_code(), StatusCode::REQUEST_TIMEOUT);
        assert_eq!(err.client_message(), "Upload was not received in time.");

        let err = IngestError::TimedOut(30);
        assert_eq!(err.status_code(), StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(err.client_message(), INTERNAL_MESSAGE);
    }
}
