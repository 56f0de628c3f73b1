//! API error types.

use axum::Json;
use axum::http::StatusCode;
use axum::http::header::CONTENT_RANGE;
use axum::response::{IntoResponse, Response};
use serde::Serialize;

/// API error response.
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    /// Error code for programmatic handling.
    pub code: String,
    /// Human-readable error message.
    pub message: String,
}

/// API error type.
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("not found: {0}")]
    NotFound(String),

    #[error("bad request: {0}")]
    BadRequest(String),

    #[error("unauthorized: {0}")]
    Unauthorized(String),

    #[error("forbidden: {0}")]
    Forbidden(String),

    #[error("conflict: {0}")]
    Conflict(String),

    #[error("requested range not satisfiable for object of {size} bytes")]
    RangeNotSatisfiable { size: u64 },

    #[error("incomplete upload: missing {missing} parts")]
    IncompleteUpload { missing: usize },

    #[error("internal error: {0}")]
    Internal(String),

    #[error("storage error: {0}")]
    Storage(#[from] lectern_storage::StorageError),

    #[error("core error: {0}")]
    Core(#[from] lectern_core::Error),
}

impl ApiError {
    /// Get the error code for this error.
    pub fn code(&self) -> &'static str {
        match self {
            Self::NotFound(_) => "not_found",
            Self::BadRequest(_) => "bad_request",
            Self::Unauthorized(_) => "unauthorized",
            Self::Forbidden(_) => "forbidden",
            Self::Conflict(_) => "conflict",
            Self::RangeNotSatisfiable { .. } => "range_not_satisfiable",
            Self::IncompleteUpload { .. } => "incomplete_upload",
            Self::Internal(_) => "internal_error",
            Self::Storage(_) => "storage_error",
            Self::Core(_) => "core_error",
        }
    }

    /// Get the HTTP status code for this error.
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::NotFound(_) => StatusCode::NOT_FOUND,
            Self::BadRequest(_) => StatusCode::BAD_REQUEST,
            Self::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            Self::Forbidden(_) => StatusCode::FORBIDDEN,
            Self::Conflict(_) => StatusCode::CONFLICT,
            Self::RangeNotSatisfiable { .. } => StatusCode::RANGE_NOT_SATISFIABLE,
            Self::IncompleteUpload { .. } => StatusCode::BAD_REQUEST,
            Self::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
            Self::Storage(e) => match e {
                lectern_storage::StorageError::NotFound(_) => StatusCode::NOT_FOUND,
                lectern_storage::StorageError::InvalidKey(_) => StatusCode::BAD_REQUEST,
                _ => StatusCode::INTERNAL_SERVER_ERROR,
            },
            Self::Core(e) => match e {
                lectern_core::Error::InvalidRange(_) => StatusCode::RANGE_NOT_SATISFIABLE,
                lectern_core::Error::RangeNotSatisfiable { .. } => {
                    StatusCode::RANGE_NOT_SATISFIABLE
                }
                _ => StatusCode::BAD_REQUEST,
            },
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status_code();

        if status == StatusCode::INTERNAL_SERVER_ERROR {
            tracing::error!(error = %self, "Request failed with internal error");
        }

        let body = ErrorResponse {
            code: self.code().to_string(),
            message: self.to_string(),
        };

        // 416 responses carry a Content-Range telling the client the
        // satisfiable bounds (RFC 7233 section 4.4).
        let size = match &self {
            Self::RangeNotSatisfiable { size } => Some(*size),
            Self::Core(lectern_core::Error::RangeNotSatisfiable { size, .. }) => Some(*size),
            _ => None,
        };
        if let Some(size) = size {
            return (
                status,
                [(CONTENT_RANGE, format!("bytes */{size}"))],
                Json(body),
            )
                .into_response();
        }

        (status, Json(body)).into_response()
    }
}

/// Result type for API handlers.
pub type ApiResult<T> = std::result::Result<T, ApiError>;
