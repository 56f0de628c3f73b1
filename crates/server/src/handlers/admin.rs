//! Operational endpoints.

use crate::state::AppState;
use axum::Json;
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use serde::Serialize;

/// Health check response.
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub version: &'static str,
}

/// GET /v1/health - liveness and storage connectivity probe.
///
/// Intentionally unauthenticated for load balancers and k8s probes. Reports
/// 503 when the storage backend is unreachable so orchestrators stop routing
/// traffic to an instance that cannot serve video bytes.
pub async fn health_check(State(state): State<AppState>) -> impl IntoResponse {
    match state.storage.health_check().await {
        Ok(()) => (
            StatusCode::OK,
            Json(HealthResponse {
                status: "ok",
                version: env!("CARGO_PKG_VERSION"),
            }),
        ),
        Err(e) => {
            tracing::error!(error = %e, "Storage health check failed");
            (
                StatusCode::SERVICE_UNAVAILABLE,
                Json(HealthResponse {
                    status: "unavailable",
                    version: env!("CARGO_PKG_VERSION"),
                }),
            )
        }
    }
}
