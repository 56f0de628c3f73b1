//! Prometheus metrics for the Lectern server.
//!
//! # Security Note
//!
//! The `/metrics` endpoint is unauthenticated to allow Prometheus scraping.
//! Metrics carry no per-content or per-member data, but they do expose
//! aggregate usage.
//!
//! **Deployment Requirement**: The `/metrics` endpoint MUST be
//! network-restricted to authorized Prometheus scraper IPs only, enforced at
//! the infrastructure level (firewall, load balancer, or reverse proxy).

use axum::http::StatusCode;
use axum::response::IntoResponse;
use prometheus::{
    self, Encoder, Histogram, HistogramOpts, IntCounter, IntCounterVec, Opts, Registry,
    TextEncoder,
};
use std::sync::{LazyLock, Once};

/// Global Prometheus registry for all metrics.
pub static REGISTRY: LazyLock<Registry> = LazyLock::new(Registry::new);

// Video delivery metrics
pub static VIDEO_REQUESTS: LazyLock<IntCounterVec> = LazyLock::new(|| {
    IntCounterVec::new(
        Opts::new(
            "lectern_video_requests_total",
            "Total video delivery requests by outcome",
        ),
        &["outcome"],
    )
    .expect("metric creation failed")
});

pub static RANGE_REQUESTS: LazyLock<IntCounter> = LazyLock::new(|| {
    IntCounter::new(
        "lectern_range_requests_total",
        "Total video requests carrying a Range header",
    )
    .expect("metric creation failed")
});

pub static PRESIGNED_REDIRECTS: LazyLock<IntCounter> = LazyLock::new(|| {
    IntCounter::new(
        "lectern_presigned_redirects_total",
        "Total deliveries answered with a presigned URL redirect",
    )
    .expect("metric creation failed")
});

pub static VIDEO_BYTES_SERVED: LazyLock<IntCounter> = LazyLock::new(|| {
    IntCounter::new(
        "lectern_video_bytes_served_total",
        "Total video bytes scheduled for streaming responses",
    )
    .expect("metric creation failed")
});

pub static DELIVERY_DURATION: LazyLock<Histogram> = LazyLock::new(|| {
    Histogram::with_opts(
        HistogramOpts::new(
            "lectern_delivery_setup_duration_seconds",
            "Time from request to response headers for video deliveries",
        )
        .buckets(vec![0.001, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0]),
    )
    .expect("metric creation failed")
});

// Upload metrics
pub static UPLOAD_SESSIONS_CREATED: LazyLock<IntCounter> = LazyLock::new(|| {
    IntCounter::new(
        "lectern_upload_sessions_created_total",
        "Total number of upload sessions created",
    )
    .expect("metric creation failed")
});

pub static UPLOAD_SESSIONS_COMPLETED: LazyLock<IntCounter> = LazyLock::new(|| {
    IntCounter::new(
        "lectern_upload_sessions_completed_total",
        "Total number of upload sessions successfully combined",
    )
    .expect("metric creation failed")
});

pub static UPLOAD_SESSIONS_FAILED: LazyLock<IntCounter> = LazyLock::new(|| {
    IntCounter::new(
        "lectern_upload_sessions_failed_total",
        "Total number of upload sessions aborted or failed during combine",
    )
    .expect("metric creation failed")
});

pub static UPLOAD_PARTS_RECEIVED: LazyLock<IntCounter> = LazyLock::new(|| {
    IntCounter::new(
        "lectern_upload_parts_received_total",
        "Total number of upload parts received",
    )
    .expect("metric creation failed")
});

/// Guard to ensure metrics are only registered once.
static REGISTER_ONCE: Once = Once::new();

/// Register all metrics with the global registry.
///
/// This function is idempotent - subsequent calls after the first are no-ops.
/// This allows safe use in integration tests or when embedding multiple routers.
pub fn register_metrics() {
    REGISTER_ONCE.call_once(|| {
        REGISTRY
            .register(Box::new(VIDEO_REQUESTS.clone()))
            .expect("metric registration failed");
        REGISTRY
            .register(Box::new(RANGE_REQUESTS.clone()))
            .expect("metric registration failed");
        REGISTRY
            .register(Box::new(PRESIGNED_REDIRECTS.clone()))
            .expect("metric registration failed");
        REGISTRY
            .register(Box::new(VIDEO_BYTES_SERVED.clone()))
            .expect("metric registration failed");
        REGISTRY
            .register(Box::new(DELIVERY_DURATION.clone()))
            .expect("metric registration failed");
        REGISTRY
            .register(Box::new(UPLOAD_SESSIONS_CREATED.clone()))
            .expect("metric registration failed");
        REGISTRY
            .register(Box::new(UPLOAD_SESSIONS_COMPLETED.clone()))
            .expect("metric registration failed");
        REGISTRY
            .register(Box::new(UPLOAD_SESSIONS_FAILED.clone()))
            .expect("metric registration failed");
        REGISTRY
            .register(Box::new(UPLOAD_PARTS_RECEIVED.clone()))
            .expect("metric registration failed");
    });
}

/// GET /metrics - Prometheus metrics endpoint.
pub async fn metrics_handler() -> impl IntoResponse {
    let encoder = TextEncoder::new();
    let metric_families = REGISTRY.gather();

    let mut buffer = Vec::new();
    match encoder.encode(&metric_families, &mut buffer) {
        Ok(()) => (
            StatusCode::OK,
            [("content-type", "text/plain; version=0.0.4; charset=utf-8")],
            buffer,
        ),
        Err(e) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            [("content-type", "text/plain; charset=utf-8")],
            format!("Failed to encode metrics: {e}").into_bytes(),
        ),
    }
}
