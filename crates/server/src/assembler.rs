//! Chunked upload session management.
//!
//! Large videos arrive as independently uploaded parts, possibly out of
//! order. The assembler stages each part under `uploads/{id}/part-{index}`,
//! tracks the session in memory, and on completion asks the storage backend
//! to concatenate the parts in index order into the final key. The final key
//! never becomes visible unless the combine succeeds.

use crate::error::{ApiError, ApiResult};
use bytes::Bytes;
use lectern_core::{UploadId, UploadSession, UploadState};
use lectern_storage::ObjectStore;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::instrument;

/// Manages in-flight chunked upload sessions.
pub struct UploadAssembler {
    storage: Arc<dyn ObjectStore>,
    sessions: Mutex<HashMap<UploadId, UploadSession>>,
}

impl UploadAssembler {
    /// Create a new assembler on top of a storage backend.
    pub fn new(storage: Arc<dyn ObjectStore>) -> Self {
        Self {
            storage,
            sessions: Mutex::new(HashMap::new()),
        }
    }

    /// Storage key a part is staged under.
    fn part_key(id: UploadId, index: u32) -> String {
        format!("uploads/{id}/part-{index:05}")
    }

    /// Start a new session for `total_parts` parts targeting `final_key`.
    #[instrument(skip(self))]
    pub async fn create(&self, final_key: String, total_parts: u32) -> ApiResult<UploadSession> {
        let session = UploadSession::new(final_key, total_parts).map_err(ApiError::Core)?;
        let snapshot = session.clone();

        self.sessions.lock().await.insert(session.id, session);
        crate::metrics::UPLOAD_SESSIONS_CREATED.inc();

        tracing::info!(
            upload_id = %snapshot.id,
            final_key = %snapshot.final_key,
            total_parts = snapshot.total_parts,
            "Upload session created"
        );

        Ok(snapshot)
    }

    /// Get a snapshot of a session.
    pub async fn get(&self, id: UploadId) -> ApiResult<UploadSession> {
        self.sessions
            .lock()
            .await
            .get(&id)
            .cloned()
            .ok_or_else(|| ApiError::NotFound(format!("upload session {id}")))
    }

    /// Store one part. Parts may arrive in any order; resending an index
    /// overwrites the staged bytes for that index.
    #[instrument(skip(self, data), fields(size = data.len()))]
    pub async fn put_part(&self, id: UploadId, index: u32, data: Bytes) -> ApiResult<UploadSession> {
        // Validate before touching storage so a bad index or a finished
        // session never stages an orphan object.
        {
            let sessions = self.sessions.lock().await;
            let session = sessions
                .get(&id)
                .ok_or_else(|| ApiError::NotFound(format!("upload session {id}")))?;
            if !session.state.is_active() {
                return Err(ApiError::Conflict(format!(
                    "upload session {id} is not accepting parts (state: {:?})",
                    session.state
                )));
            }
            if index >= session.total_parts {
                return Err(ApiError::BadRequest(format!(
                    "part index {index} out of bounds for {} parts",
                    session.total_parts
                )));
            }
        }

        // Write outside the lock; part uploads of one session may run
        // concurrently.
        let part_key = Self::part_key(id, index);
        self.storage.put(&part_key, data).await?;

        let mut sessions = self.sessions.lock().await;
        let session = sessions
            .get_mut(&id)
            .ok_or_else(|| ApiError::NotFound(format!("upload session {id}")))?;
        session.record_part(index, part_key).map_err(ApiError::Core)?;
        crate::metrics::UPLOAD_PARTS_RECEIVED.inc();

        Ok(session.clone())
    }

    /// Combine all parts into the final object and clean up the staging
    /// keys. Fails with 400 while parts are missing. A failed combine moves
    /// the session to `Failed` and leaves no partial final object behind;
    /// the client may re-upload parts and resubmit the completion.
    #[instrument(skip(self))]
    pub async fn complete(&self, id: UploadId) -> ApiResult<(UploadSession, u64)> {
        let (final_key, part_keys) = {
            let mut sessions = self.sessions.lock().await;
            let session = sessions
                .get_mut(&id)
                .ok_or_else(|| ApiError::NotFound(format!("upload session {id}")))?;

            // A failed combine may be retried; the parts are still staged.
            match session.state {
                UploadState::Collecting | UploadState::Failed => {}
                UploadState::Combining => {
                    return Err(ApiError::Conflict(format!(
                        "upload session {id} is already combining"
                    )));
                }
                UploadState::Done => {
                    return Err(ApiError::Conflict(format!(
                        "upload session {id} already finished"
                    )));
                }
            }

            let missing = session.missing_parts();
            if !missing.is_empty() {
                return Err(ApiError::IncompleteUpload {
                    missing: missing.len(),
                });
            }

            session.state = UploadState::Combining;
            (session.final_key.clone(), session.ordered_part_keys())
        };

        let result = self.storage.combine(&final_key, &part_keys).await;

        let mut sessions = self.sessions.lock().await;
        let session = sessions
            .get_mut(&id)
            .ok_or_else(|| ApiError::NotFound(format!("upload session {id}")))?;

        match result {
            Ok(size) => {
                session.state = UploadState::Done;
                crate::metrics::UPLOAD_SESSIONS_COMPLETED.inc();
                tracing::info!(
                    upload_id = %id,
                    final_key = %final_key,
                    size,
                    "Upload session combined"
                );
                Ok((session.clone(), size))
            }
            Err(e) => {
                session.state = UploadState::Failed;
                crate::metrics::UPLOAD_SESSIONS_FAILED.inc();
                tracing::error!(
                    upload_id = %id,
                    final_key = %final_key,
                    error = %e,
                    "Upload session combine failed"
                );
                Err(e.into())
            }
        }
    }

    /// Abort a session and delete its staged parts. Aborting an unknown
    /// session is a no-op so abort-on-cleanup paths stay idempotent.
    #[instrument(skip(self))]
    pub async fn abort(&self, id: UploadId) -> ApiResult<()> {
        let session = {
            let mut sessions = self.sessions.lock().await;
            match sessions.get(&id).map(|s| s.state) {
                None => return Ok(()),
                Some(UploadState::Combining) => {
                    return Err(ApiError::Conflict(format!(
                        "upload session {id} is combining and cannot be aborted"
                    )));
                }
                Some(_) => sessions.remove(&id),
            }
        };

        if let Some(session) = session {
            for part_key in session.parts.values() {
                if let Err(e) = self.storage.delete(part_key).await {
                    tracing::warn!(
                        upload_id = %id,
                        part_key = %part_key,
                        error = %e,
                        "Failed to delete staged part during abort"
                    );
                }
            }
            crate::metrics::UPLOAD_SESSIONS_FAILED.inc();
            tracing::info!(upload_id = %id, "Upload session aborted");
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use lectern_storage::FilesystemBackend;

    async fn make_assembler() -> (tempfile::TempDir, Arc<dyn ObjectStore>, UploadAssembler) {
        let dir = tempfile::tempdir().unwrap();
        let storage: Arc<dyn ObjectStore> =
            Arc::new(FilesystemBackend::new(dir.path()).await.unwrap());
        let assembler = UploadAssembler::new(storage.clone());
        (dir, storage, assembler)
    }

    #[tokio::test]
    async fn out_of_order_parts_combine_in_index_order() {
        let (_dir, storage, assembler) = make_assembler().await;

        let session = assembler
            .create("videos/course.mp4".to_string(), 3)
            .await
            .unwrap();
        let id = session.id;

        // Arrival order 2, 0, 1
        assembler
            .put_part(id, 2, Bytes::from("gamma"))
            .await
            .unwrap();
        assembler
            .put_part(id, 0, Bytes::from("alpha-"))
            .await
            .unwrap();
        assembler
            .put_part(id, 1, Bytes::from("beta-"))
            .await
            .unwrap();

        let (session, size) = assembler.complete(id).await.unwrap();
        assert_eq!(session.state, UploadState::Done);
        assert_eq!(size, 16);

        let combined = storage.get("videos/course.mp4").await.unwrap();
        assert_eq!(&combined[..], b"alpha-beta-gamma");

        // Staged parts are gone
        for index in 0..3 {
            let key = UploadAssembler::part_key(id, index);
            assert!(!storage.exists(&key).await.unwrap());
        }
    }

    #[tokio::test]
    async fn part_resend_overwrites_staged_bytes() {
        let (_dir, storage, assembler) = make_assembler().await;

        let session = assembler
            .create("videos/a.mp4".to_string(), 1)
            .await
            .unwrap();
        let id = session.id;

        assembler
            .put_part(id, 0, Bytes::from("first attempt"))
            .await
            .unwrap();
        assembler
            .put_part(id, 0, Bytes::from("second attempt"))
            .await
            .unwrap();

        let (_, size) = assembler.complete(id).await.unwrap();
        assert_eq!(size, 14);
        let data = storage.get("videos/a.mp4").await.unwrap();
        assert_eq!(&data[..], b"second attempt");
    }

    #[tokio::test]
    async fn complete_rejects_missing_parts() {
        let (_dir, _storage, assembler) = make_assembler().await;

        let session = assembler
            .create("videos/a.mp4".to_string(), 2)
            .await
            .unwrap();
        assembler
            .put_part(session.id, 0, Bytes::from("only part"))
            .await
            .unwrap();

        let err = assembler.complete(session.id).await.unwrap_err();
        assert!(matches!(err, ApiError::IncompleteUpload { missing: 1 }));

        // Session is still collecting and can be finished later
        let snapshot = assembler.get(session.id).await.unwrap();
        assert_eq!(snapshot.state, UploadState::Collecting);
    }

    #[tokio::test]
    async fn part_index_out_of_bounds_rejected() {
        let (_dir, _storage, assembler) = make_assembler().await;

        let session = assembler
            .create("videos/a.mp4".to_string(), 2)
            .await
            .unwrap();
        let err = assembler
            .put_part(session.id, 2, Bytes::from("x"))
            .await
            .unwrap_err();
        assert!(matches!(err, ApiError::BadRequest(_)));
    }

    #[tokio::test]
    async fn abort_deletes_staged_parts() {
        let (_dir, storage, assembler) = make_assembler().await;

        let session = assembler
            .create("videos/a.mp4".to_string(), 2)
            .await
            .unwrap();
        let id = session.id;
        assembler.put_part(id, 0, Bytes::from("x")).await.unwrap();

        assembler.abort(id).await.unwrap();

        let key = UploadAssembler::part_key(id, 0);
        assert!(!storage.exists(&key).await.unwrap());
        assert!(matches!(
            assembler.get(id).await.unwrap_err(),
            ApiError::NotFound(_)
        ));

        // Aborting again is a no-op
        assembler.abort(id).await.unwrap();
    }

    #[tokio::test]
    async fn failed_combine_can_be_retried() {
        let (_dir, storage, assembler) = make_assembler().await;

        let session = assembler
            .create("videos/retry.mp4".to_string(), 2)
            .await
            .unwrap();
        let id = session.id;
        assembler.put_part(id, 0, Bytes::from("first-")).await.unwrap();
        assembler.put_part(id, 1, Bytes::from("second")).await.unwrap();

        // Sabotage one staged part so the combine fails
        storage
            .delete(&UploadAssembler::part_key(id, 1))
            .await
            .unwrap();

        let err = assembler.complete(id).await.unwrap_err();
        assert!(matches!(err, ApiError::Storage(_)));
        let snapshot = assembler.get(id).await.unwrap();
        assert_eq!(snapshot.state, UploadState::Failed);
        assert!(!storage.exists("videos/retry.mp4").await.unwrap());

        // Re-uploading the lost part and resubmitting completion recovers
        assembler.put_part(id, 1, Bytes::from("second")).await.unwrap();
        let (session, size) = assembler.complete(id).await.unwrap();
        assert_eq!(session.state, UploadState::Done);
        assert_eq!(size, 12);

        let combined = storage.get("videos/retry.mp4").await.unwrap();
        assert_eq!(&combined[..], b"first-second");
    }

    #[tokio::test]
    async fn finished_session_rejects_more_parts() {
        let (_dir, _storage, assembler) = make_assembler().await;

        let session = assembler
            .create("videos/a.mp4".to_string(), 1)
            .await
            .unwrap();
        let id = session.id;
        assembler.put_part(id, 0, Bytes::from("x")).await.unwrap();
        assembler.complete(id).await.unwrap();

        let err = assembler.put_part(id, 0, Bytes::from("y")).await.unwrap_err();
        assert!(matches!(err, ApiError::Conflict(_)));

        let err = assembler.complete(id).await.unwrap_err();
        assert!(matches!(err, ApiError::Conflict(_)));
    }
}
