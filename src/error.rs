use std::path::PathBuf;

use actix_web::{http::StatusCode, HttpResponse, ResponseError};
use serde_json::json;
use thiserror::Error;

pub type ClipResult<T> = Result<T, ClipError>;

/// Everything that can go wrong while recording and uploading one clip.
#[derive(Debug, Error)]
pub enum ClipError {
    /// No usable credential; the user has to complete the login flow.
    #[error("authorization required: {0}")]
    AuthRequired(String),

    #[error("invalid request: {0}")]
    InvalidRequest(String),

    /// The extractor/transcoder pipeline failed or timed out.
    #[error("capture failed: {0}")]
    CaptureFailed(String),

    /// The storage service refused the upload, or the transfer broke.
    /// `status` is the remote status code when a response was received.
    #[error("upload rejected: {cause}")]
    UploadRejected { status: Option<u16>, cause: String },

    /// Deleting the local artifact failed. Logged only; never surfaced
    /// as a response and never overrides the request's outcome.
    #[error("cleanup failed for {}: {source}", path.display())]
    Cleanup {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl ClipError {
    /// Pipeline stage the error belongs to, for logs and error bodies.
    pub fn stage(&self) -> &'static str {
        match self {
            ClipError::AuthRequired(_) => "auth",
            ClipError::InvalidRequest(_) => "request",
            ClipError::CaptureFailed(_) => "capture",
            ClipError::UploadRejected { .. } => "upload",
            ClipError::Cleanup { .. } => "cleanup",
        }
    }
}

impl ResponseError for ClipError {
    fn status_code(&self) -> StatusCode {
        match self {
            ClipError::AuthRequired(_) => StatusCode::UNAUTHORIZED,
            ClipError::InvalidRequest(_) => StatusCode::BAD_REQUEST,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn error_response(&self) -> HttpResponse {
        HttpResponse::build(self.status_code()).json(json!({
            "error": self.to_string(),
            "stage": self.stage(),
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn auth_errors_map_to_401() {
        let err = ClipError::AuthRequired("no credential".to_string());
        assert_eq!(err.status_code(), StatusCode::UNAUTHORIZED);
        assert_eq!(err.stage(), "auth");
    }

    #[test]
    fn capture_and_upload_errors_map_to_500() {
        let capture = ClipError::CaptureFailed("pipe broke".to_string());
        assert_eq!(capture.status_code(), StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(capture.stage(), "capture");

        let upload = ClipError::UploadRejected {
            status: Some(403),
            cause: "forbidden".to_string(),
        };
        assert_eq!(upload.status_code(), StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(upload.stage(), "upload");
    }

    #[test]
    fn invalid_request_maps_to_400() {
        let err = ClipError::InvalidRequest("duration must be at least 1 second".to_string());
        assert_eq!(err.status_code(), StatusCode::BAD_REQUEST);
    }
}
