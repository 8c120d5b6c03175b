//! HTTP error mapping

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ApiError {
    /// Invalid request (400)
    #[error("Invalid request: {0}")]
    BadRequest(String),

    /// Conflict (409), e.g. a backfill is already running
    #[error("Conflict: {0}")]
    Conflict(String),

    #[error(transparent)]
    Common(#[from] cdp_common::Error),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        use cdp_common::Error;

        let (status, code) = match &self {
            ApiError::BadRequest(_) => (StatusCode::BAD_REQUEST, "BAD_REQUEST"),
            ApiError::Conflict(_) => (StatusCode::CONFLICT, "CONFLICT"),
            ApiError::Common(Error::Validation(_)) => (StatusCode::BAD_REQUEST, "VALIDATION_ERROR"),
            ApiError::Common(Error::InvalidInput(_)) => (StatusCode::BAD_REQUEST, "BAD_REQUEST"),
            ApiError::Common(Error::NotFound(_)) => (StatusCode::NOT_FOUND, "NOT_FOUND"),
            ApiError::Common(Error::Database(_)) => (StatusCode::SERVICE_UNAVAILABLE, "STORAGE_ERROR"),
            ApiError::Common(Error::Config(_)) => (StatusCode::INTERNAL_SERVER_ERROR, "CONFIGURATION_ERROR"),
            ApiError::Common(Error::Io(_) | Error::Internal(_)) => {
                (StatusCode::INTERNAL_SERVER_ERROR, "INTERNAL_ERROR")
            }
        };

        let body = Json(json!({
            "error": {
                "code": code,
                "message": self.to_string(),
            }
        }));

        (status, body).into_response()
    }
}

/// Result type for API handlers
pub type ApiResult<T> = Result<T, ApiError>;
