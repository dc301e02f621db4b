use crate::services::upload_service::UploadError;
use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde_json::json;
use std::fmt;

/// A lightweight wrapper for general errors that keeps the message local.
#[derive(Debug)]
pub struct AppError {
    pub status: StatusCode,
    pub message: String,
}

impl AppError {
    /// Create a new AppError with a specific status and message.
    pub fn new(status: StatusCode, msg: impl Into<String>) -> Self {
        Self {
            status,
            message: msg.into(),
        }
    }

    /// Shortcut for 400 Bad Request
    pub fn bad_request(msg: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, msg)
    }

    /// Shortcut for 404 Not Found
    pub fn not_found(msg: impl Into<String>) -> Self {
        Self::new(StatusCode::NOT_FOUND, msg)
    }
}

impl fmt::Display for AppError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl std::error::Error for AppError {}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let body = Json(json!({
            "error": self.message,
            "status": self.status.as_u16()
        }));

        (self.status, body).into_response()
    }
}

/// Missing sessions are 404; every other engine error surfaces as 400 with
/// its message.
impl From<UploadError> for AppError {
    fn from(err: UploadError) -> Self {
        match err {
            UploadError::SessionNotFound(_) => AppError::not_found(err.to_string()),
            other => AppError::bad_request(other.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn maps_engine_errors_to_status_codes() {
        let missing: AppError = UploadError::SessionNotFound("abc".into()).into();
        assert_eq!(missing.status, StatusCode::NOT_FOUND);
        assert!(missing.message.contains("abc"));

        for err in [
            UploadError::Duplicate(0),
            UploadError::TooLarge { size: 2, max: 1 },
            UploadError::Incomplete {
                received: 1,
                total: 3,
            },
            UploadError::Assembly("boom".into()),
        ] {
            assert_eq!(AppError::from(err).status, StatusCode::BAD_REQUEST);
        }
    }
}
