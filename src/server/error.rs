use axum::extract::multipart::MultipartError;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde_json::json;

/// Errors returned by HTTP handlers as JSON `{error, code}` bodies
#[derive(Debug, thiserror::Error)]
pub enum AppError {
    /// Upload with an extension outside the allow-list
    #[error("Unsupported file type: {0}")]
    UnsupportedMedia(String),

    /// Confidence threshold outside the accepted range
    #[error("Confidence must be between {min} and {max}, got {value}")]
    InvalidConfidence { value: f32, min: f32, max: f32 },

    #[error("Confidence must be a number, got {0:?}")]
    UnparsableConfidence(String),

    /// Malformed or oversized multipart body
    #[error(transparent)]
    Multipart(#[from] MultipartError),

    #[error("Bad request: {0}")]
    BadRequest(String),

    #[error("{0} not found")]
    NotFound(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

pub type AppResult<T> = Result<T, AppError>;

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, code, message) = match &self {
            AppError::UnsupportedMedia(_) => {
                (StatusCode::BAD_REQUEST, "UNSUPPORTED_MEDIA", self.to_string())
            }
            AppError::InvalidConfidence { .. } | AppError::UnparsableConfidence(_) => {
                (StatusCode::BAD_REQUEST, "INVALID_CONFIDENCE", self.to_string())
            }
            AppError::Multipart(err) => (err.status(), "BAD_MULTIPART", err.body_text()),
            AppError::BadRequest(msg) => (StatusCode::BAD_REQUEST, "BAD_REQUEST", msg.clone()),
            AppError::NotFound(_) => (StatusCode::NOT_FOUND, "NOT_FOUND", self.to_string()),
            AppError::Internal(msg) => {
                tracing::error!(error = %msg, "Internal error");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "INTERNAL_ERROR",
                    "An internal error occurred".to_string(),
                )
            }
        };

        let body = json!({
            "error": message,
            "code": code,
        });

        (status, axum::Json(body)).into_response()
    }
}
