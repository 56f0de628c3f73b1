//! Lectern HTTP server: range-aware video delivery over pluggable storage.

pub mod assembler;
pub mod auth;
pub mod delivery;
pub mod error;
pub mod handlers;
pub mod metrics;
pub mod routes;
pub mod state;

pub use error::{ApiError, ApiResult};
pub use routes::create_router;
pub use state::AppState;
