//! Video delivery: access checks, range handling and response assembly.
//!
//! A delivery either proxies bytes from the storage backend through a
//! [`StreamBridge`] (works with any backend) or redirects the client to a
//! time-limited presigned URL (object storage only, chosen by config).

use crate::error::{ApiError, ApiResult};
use crate::state::AppState;
use axum::body::Body;
use axum::http::{StatusCode, header};
use axum::response::Response;
use lectern_core::config::{ContentRecord, DeliveryMode};
use lectern_core::{AccessDecision, DenyReason, Requester, parse_range};
use lectern_storage::StreamBridge;
use sha2::{Digest, Sha256};
use tracing::instrument;

/// Cache policy for publicly cacheable full responses. Video objects are
/// immutable once published; replacing one means a new key.
const IMMUTABLE_CACHE_CONTROL: &str = "public, max-age=31536000, immutable";

/// Serve one video request: catalog lookup, entitlement check, range
/// resolution, then stream or redirect.
#[instrument(skip(state), fields(content_id = %content_id))]
pub async fn serve(
    state: &AppState,
    requester: Requester,
    content_id: &str,
    range_header: Option<&str>,
) -> ApiResult<Response> {
    let timer = crate::metrics::DELIVERY_DURATION.start_timer();

    let record = state
        .content(content_id)
        .ok_or_else(|| ApiError::NotFound(format!("content {content_id}")))?;

    match AccessDecision::evaluate(requester, record.premium) {
        AccessDecision::Allowed => {}
        AccessDecision::Denied(DenyReason::Unauthenticated) => {
            return Err(ApiError::Unauthorized(
                "premium content requires authentication".to_string(),
            ));
        }
        AccessDecision::Denied(DenyReason::NotEntitled) => {
            return Err(ApiError::Forbidden(
                "premium content requires a premium membership".to_string(),
            ));
        }
    }

    if state.config.delivery.mode == DeliveryMode::Redirect {
        let url = state
            .storage
            .presigned_get_url(&record.key, state.config.delivery.presign_ttl())
            .await?;
        crate::metrics::PRESIGNED_REDIRECTS.inc();
        crate::metrics::VIDEO_REQUESTS
            .with_label_values(&["redirect"])
            .inc();
        timer.observe_duration();

        // The client re-issues its Range request against the presigned URL;
        // object storage handles ranges natively.
        return Response::builder()
            .status(StatusCode::FOUND)
            .header(header::LOCATION, url)
            .header(header::CACHE_CONTROL, "private, no-store")
            .body(Body::empty())
            .map_err(|e| ApiError::Internal(format!("failed to build response: {e}")));
    }

    let meta = state.storage.head(&record.key).await?;
    let size = meta.size;
    let etag = compute_etag(&record.key, size);

    let response = match range_header {
        Some(raw) => {
            crate::metrics::RANGE_REQUESTS.inc();
            serve_range(state, record, raw, size, &etag).await?
        }
        None => serve_full(state, record, size, &etag).await?,
    };

    crate::metrics::VIDEO_REQUESTS
        .with_label_values(&["stream"])
        .inc();
    timer.observe_duration();
    Ok(response)
}

/// Full-object delivery: 200 with the whole stream.
async fn serve_full(
    state: &AppState,
    record: &ContentRecord,
    size: u64,
    etag: &str,
) -> ApiResult<Response> {
    let stream = state.storage.get_stream(&record.key).await?;
    let bridge = StreamBridge::new(stream);
    crate::metrics::VIDEO_BYTES_SERVED.inc_by(size);

    let mut builder = Response::builder()
        .status(StatusCode::OK)
        .header(header::CONTENT_TYPE, &record.content_type)
        .header(header::ACCEPT_RANGES, "bytes")
        .header(header::CONTENT_LENGTH, size)
        .header(header::ETAG, etag);

    // Full responses for public content are immutable and cacheable by
    // CDNs. Premium bytes must never land in shared caches, and partial
    // responses are not cached at all.
    if record.premium {
        builder = builder.header(header::CACHE_CONTROL, "private, no-store");
    } else {
        builder = builder.header(header::CACHE_CONTROL, IMMUTABLE_CACHE_CONTROL);
    }

    builder
        .body(Body::from_stream(bridge))
        .map_err(|e| ApiError::Internal(format!("failed to build response: {e}")))
}

/// Range delivery: 206 with Content-Range over the requested slice.
async fn serve_range(
    state: &AppState,
    record: &ContentRecord,
    raw_range: &str,
    size: u64,
    etag: &str,
) -> ApiResult<Response> {
    let range = parse_range(raw_range).map_err(|e| range_error(e, size))?;
    let mut resolved = range.resolve(size).map_err(|e| range_error(e, size))?;

    // Open-ended seeks against disk are clamped to a bounded window so one
    // request never pins an arbitrarily large read. Players follow up with
    // the next range. Explicit ranges and object storage are served exactly
    // as asked.
    if range.is_open_ended() && state.storage.backend_name() == "filesystem" {
        resolved = resolved.clamp_to_window(state.config.delivery.disk_range_window_bytes);
    }

    let stream = state
        .storage
        .get_range_stream(&record.key, resolved.start, resolved.end_exclusive())
        .await?;
    let bridge = StreamBridge::new(stream);
    crate::metrics::VIDEO_BYTES_SERVED.inc_by(resolved.len());

    let mut builder = Response::builder()
        .status(StatusCode::PARTIAL_CONTENT)
        .header(header::CONTENT_TYPE, &record.content_type)
        .header(header::ACCEPT_RANGES, "bytes")
        .header(header::CONTENT_LENGTH, resolved.len())
        .header(header::CONTENT_RANGE, resolved.content_range(size))
        .header(header::ETAG, etag);

    if record.premium {
        builder = builder.header(header::CACHE_CONTROL, "private, no-store");
    }

    builder
        .body(Body::from_stream(bridge))
        .map_err(|e| ApiError::Internal(format!("failed to build response: {e}")))
}

/// Map core range errors to 416 with the object size attached, so the
/// response can tell the client the satisfiable bounds.
fn range_error(err: lectern_core::Error, size: u64) -> ApiError {
    match err {
        lectern_core::Error::InvalidRange(_)
        | lectern_core::Error::RangeNotSatisfiable { .. } => {
            ApiError::RangeNotSatisfiable { size }
        }
        other => ApiError::Core(other),
    }
}

/// Weak validator derived from the storage key and object size. Stable
/// across replicas without reading object bytes.
fn compute_etag(key: &str, size: u64) -> String {
    let mut hasher = Sha256::new();
    hasher.update(key.as_bytes());
    hasher.update(b":");
    hasher.update(size.to_be_bytes());
    let digest = hasher.finalize();
    let hex: String = digest.iter().take(16).map(|b| format!("{b:02x}")).collect();
    format!("\"{hex}\"")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn etag_is_quoted_and_stable() {
        let a = compute_etag("videos/a.mp4", 1000);
        let b = compute_etag("videos/a.mp4", 1000);
        assert_eq!(a, b);
        assert!(a.starts_with('"') && a.ends_with('"'));

        // Key or size change produces a different validator
        assert_ne!(a, compute_etag("videos/a.mp4", 1001));
        assert_ne!(a, compute_etag("videos/b.mp4", 1000));
    }
}
