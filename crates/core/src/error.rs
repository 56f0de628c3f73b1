//! Error types for the core domain.

use thiserror::Error;

/// Core domain error type.
#[derive(Debug, Error)]
pub enum Error {
    #[error("invalid range: {0}")]
    InvalidRange(String),

    #[error("unsatisfiable range: start {start} is beyond object size {size}")]
    RangeNotSatisfiable { start: u64, size: u64 },

    #[error("upload session error: {0}")]
    UploadSession(String),
}

/// Result type alias for core operations.
pub type Result<T> = std::result::Result<T, Error>;
