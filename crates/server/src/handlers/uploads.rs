//! Chunked upload endpoints.

use crate::auth::require_admin;
use crate::error::{ApiError, ApiResult};
use crate::state::AppState;
use axum::Extension;
use axum::Json;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use bytes::Bytes;
use lectern_core::{Requester, UploadId, UploadSession, UploadState};
use serde::{Deserialize, Serialize};

/// Request body for creating an upload session.
#[derive(Debug, Deserialize)]
pub struct CreateUploadRequest {
    /// Storage key the combined object will be written under.
    pub key: String,
    /// Number of parts the client will send.
    pub total_parts: u32,
}

/// Upload session snapshot returned by the upload endpoints.
#[derive(Debug, Serialize)]
pub struct UploadSessionResponse {
    pub upload_id: String,
    pub key: String,
    pub total_parts: u32,
    pub received_parts: u32,
    pub missing_parts: Vec<u32>,
    pub state: UploadState,
}

impl From<&UploadSession> for UploadSessionResponse {
    fn from(session: &UploadSession) -> Self {
        Self {
            upload_id: session.id.to_string(),
            key: session.final_key.clone(),
            total_parts: session.total_parts,
            received_parts: session.parts.len() as u32,
            missing_parts: session.missing_parts(),
            state: session.state,
        }
    }
}

/// Response for a completed upload.
#[derive(Debug, Serialize)]
pub struct CompleteUploadResponse {
    pub upload_id: String,
    pub key: String,
    pub size: u64,
    pub state: UploadState,
}

/// POST /v1/uploads - create an upload session.
pub async fn create_upload(
    State(state): State<AppState>,
    Extension(requester): Extension<Requester>,
    Json(request): Json<CreateUploadRequest>,
) -> ApiResult<(StatusCode, Json<UploadSessionResponse>)> {
    require_admin(requester)?;

    if request.key.is_empty() {
        return Err(ApiError::BadRequest("key must not be empty".to_string()));
    }

    let session = state.uploads.create(request.key, request.total_parts).await?;
    Ok((StatusCode::CREATED, Json((&session).into())))
}

/// GET /v1/uploads/{upload_id} - inspect an upload session.
pub async fn get_upload(
    State(state): State<AppState>,
    Extension(requester): Extension<Requester>,
    Path(upload_id): Path<String>,
) -> ApiResult<Json<UploadSessionResponse>> {
    require_admin(requester)?;

    let id = UploadId::parse(&upload_id)?;
    let session = state.uploads.get(id).await?;
    Ok(Json((&session).into()))
}

/// PUT /v1/uploads/{upload_id}/parts/{index} - store one part.
pub async fn upload_part(
    State(state): State<AppState>,
    Extension(requester): Extension<Requester>,
    Path((upload_id, index)): Path<(String, u32)>,
    body: Bytes,
) -> ApiResult<Json<UploadSessionResponse>> {
    require_admin(requester)?;

    if body.is_empty() {
        return Err(ApiError::BadRequest("part body must not be empty".to_string()));
    }

    let id = UploadId::parse(&upload_id)?;
    let session = state.uploads.put_part(id, index, body).await?;
    Ok(Json((&session).into()))
}

/// POST /v1/uploads/{upload_id}/complete - combine parts into the final object.
pub async fn complete_upload(
    State(state): State<AppState>,
    Extension(requester): Extension<Requester>,
    Path(upload_id): Path<String>,
) -> ApiResult<Json<CompleteUploadResponse>> {
    require_admin(requester)?;

    let id = UploadId::parse(&upload_id)?;
    let (session, size) = state.uploads.complete(id).await?;

    Ok(Json(CompleteUploadResponse {
        upload_id: session.id.to_string(),
        key: session.final_key,
        size,
        state: session.state,
    }))
}

/// DELETE /v1/uploads/{upload_id} - abort an upload session.
pub async fn abort_upload(
    State(state): State<AppState>,
    Extension(requester): Extension<Requester>,
    Path(upload_id): Path<String>,
) -> ApiResult<StatusCode> {
    require_admin(requester)?;

    let id = UploadId::parse(&upload_id)?;
    state.uploads.abort(id).await?;
    Ok(StatusCode::NO_CONTENT)
}
