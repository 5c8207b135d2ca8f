use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde_json::json;

use crate::db::queries::StoreError;
use crate::services::queue::QueueError;

/// Error returned by HTTP handlers.
///
/// Rendered as `{"error": ..., "detail": ...}`; `error` carries a stable
/// machine-readable code where one exists.
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    /// Malformed, missing or unexpected request input.
    #[error("{code}")]
    Validation {
        code: &'static str,
        detail: Option<String>,
    },

    /// Unknown id or lab.
    #[error("{0}")]
    NotFound(String),

    #[error("Job store error: {0}")]
    Store(#[from] StoreError),

    #[error("Dispatch queue error: {0}")]
    Queue(#[from] QueueError),
}

/// Convenience type alias for handler return values.
pub type ApiResult<T> = Result<T, ApiError>;

impl ApiError {
    pub fn validation(code: &'static str) -> Self {
        ApiError::Validation { code, detail: None }
    }

    pub fn validation_detail(code: &'static str, detail: impl Into<String>) -> Self {
        ApiError::Validation {
            code,
            detail: Some(detail.into()),
        }
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        ApiError::NotFound(message.into())
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, error, detail) = match self {
            ApiError::Validation { code, detail } => (StatusCode::BAD_REQUEST, code.to_string(), detail),
            ApiError::NotFound(message) => (StatusCode::NOT_FOUND, message, None),
            ApiError::Store(StoreError::NotFound(id)) => (
                StatusCode::NOT_FOUND,
                "Analysis job not found".to_string(),
                Some(id.to_string()),
            ),
            ApiError::Store(StoreError::InvalidLab(lab)) => {
                (StatusCode::BAD_REQUEST, "invalid_lab_id".to_string(), Some(lab))
            }
            ApiError::Store(StoreError::Validation(msg)) => {
                (StatusCode::BAD_REQUEST, "invalid_request".to_string(), Some(msg))
            }
            ApiError::Store(err) => {
                tracing::error!(error = %err, "Job store failure");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "An internal error occurred".to_string(),
                    None,
                )
            }
            ApiError::Queue(err) => {
                tracing::error!(error = %err, "Dispatch queue failure");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "An internal error occurred".to_string(),
                    None,
                )
            }
        };

        let body = match detail {
            Some(detail) => json!({ "error": error, "detail": detail }),
            None => json!({ "error": error }),
        };

        (status, axum::Json(body)).into_response()
    }
}
