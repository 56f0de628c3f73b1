//! Route configuration.

use crate::auth::auth_middleware;
use crate::handlers;
use crate::metrics::metrics_handler;
use crate::state::AppState;
use axum::Router;
use axum::middleware;
use axum::routing::{get, post, put};
use tower_http::trace::TraceLayer;

/// Create the application router.
pub fn create_router(state: AppState) -> Router {
    let api_routes = Router::new()
        // Health check (intentionally unauthenticated for load balancers/k8s probes)
        .route("/v1/health", get(handlers::health_check))
        // Video delivery
        .route(
            "/v1/videos/{content_id}",
            get(handlers::get_video).delete(handlers::delete_video),
        )
        // Upload control plane (admin only, enforced in handlers)
        .route("/v1/uploads", post(handlers::create_upload))
        .route(
            "/v1/uploads/{upload_id}",
            get(handlers::get_upload).delete(handlers::abort_upload),
        )
        .route(
            "/v1/uploads/{upload_id}/parts/{index}",
            put(handlers::upload_part),
        )
        .route(
            "/v1/uploads/{upload_id}/complete",
            post(handlers::complete_upload),
        );

    let mut router = Router::new().merge(api_routes);

    // Conditionally add metrics endpoint based on config.
    // SECURITY: When enabled, this endpoint MUST be network-restricted
    // to authorized Prometheus scraper IPs only.
    // See crate::metrics module documentation for details.
    if state.config.server.metrics_enabled {
        let metrics_routes = Router::new().route("/metrics", get(metrics_handler));
        router = router.merge(metrics_routes);
    }

    // Middleware layers are applied in reverse order (outermost first).
    // Order of execution: TraceLayer -> Auth -> Handler
    router
        .layer(middleware::from_fn_with_state(
            state.clone(),
            auth_middleware,
        ))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
