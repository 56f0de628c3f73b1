//! Video delivery and management endpoints.

use crate::auth::require_admin;
use crate::delivery;
use crate::error::{ApiError, ApiResult};
use crate::state::AppState;
use axum::Extension;
use axum::extract::{Path, State};
use axum::http::{HeaderMap, StatusCode, header};
use axum::response::Response;
use lectern_core::Requester;

/// GET /v1/videos/{content_id} - stream a video, honoring Range requests.
pub async fn get_video(
    State(state): State<AppState>,
    Extension(requester): Extension<Requester>,
    Path(content_id): Path<String>,
    headers: HeaderMap,
) -> ApiResult<Response> {
    let range_header = headers
        .get(header::RANGE)
        .and_then(|v| v.to_str().ok());

    delivery::serve(&state, requester, &content_id, range_header).await
}

/// DELETE /v1/videos/{content_id} - remove a video's stored object.
///
/// Deleting already-deleted content succeeds, so retried cleanup jobs don't
/// fail halfway through.
pub async fn delete_video(
    State(state): State<AppState>,
    Extension(requester): Extension<Requester>,
    Path(content_id): Path<String>,
) -> ApiResult<StatusCode> {
    require_admin(requester)?;

    let record = state
        .content(&content_id)
        .ok_or_else(|| ApiError::NotFound(format!("content {content_id}")))?;

    state.storage.delete(&record.key).await?;

    tracing::info!(content_id = %content_id, key = %record.key, "Video object deleted");
    Ok(StatusCode::NO_CONTENT)
}
