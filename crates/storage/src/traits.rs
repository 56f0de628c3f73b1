//! Storage trait definitions.

use crate::error::{StorageError, StorageResult};
use async_trait::async_trait;
use bytes::Bytes;
use futures::{Stream, StreamExt};
use std::pin::Pin;
use std::time::Duration;

/// A boxed stream of bytes for streaming reads.
pub type ByteStream = Pin<Box<dyn Stream<Item = StorageResult<Bytes>> + Send>>;

/// Object store abstraction shared by the delivery service and the upload
/// assembler. Both backends implement identical semantics so the backend
/// choice stays a deployment-time decision.
#[async_trait]
pub trait ObjectStore: Send + Sync + 'static {
    /// Check if an object exists.
    async fn exists(&self, key: &str) -> StorageResult<bool>;

    /// Get an object's size and metadata without fetching content.
    async fn head(&self, key: &str) -> StorageResult<ObjectMeta>;

    /// Get an object's content.
    async fn get(&self, key: &str) -> StorageResult<Bytes>;

    /// Get an object as a byte stream.
    async fn get_stream(&self, key: &str) -> StorageResult<ByteStream>;

    /// Get a byte stream over `[start, end)` of an object. Chunks are
    /// delivered in byte-offset order.
    async fn get_range_stream(&self, key: &str, start: u64, end: u64) -> StorageResult<ByteStream>;

    /// Put an object atomically, overwriting any existing object.
    async fn put(&self, key: &str, data: Bytes) -> StorageResult<()>;

    /// Start a streaming upload.
    async fn put_stream(&self, key: &str) -> StorageResult<Box<dyn StreamingUpload>>;

    /// Delete an object. Deleting a missing object is a no-op, which keeps
    /// cascading deletes idempotent.
    async fn delete(&self, key: &str) -> StorageResult<()>;

    /// Issue a time-limited direct-access URL for an object.
    ///
    /// Only object storage backends can presign; the default implementation
    /// fails with [`StorageError::Unsupported`]. Configuration validation
    /// rejects delivery modes that would hit this at request time.
    async fn presigned_get_url(&self, key: &str, expires_in: Duration) -> StorageResult<String> {
        let _ = (key, expires_in);
        Err(StorageError::Unsupported(format!(
            "{} backend cannot presign URLs",
            self.backend_name()
        )))
    }

    /// Concatenate `part_keys` in order into `final_key`, then delete the
    /// parts. Returns the combined size in bytes.
    ///
    /// The final key is never partially visible: the combined object is
    /// staged through a streaming upload that only lands on `finish`, and is
    /// aborted on any read or write error. Part deletion happens after a
    /// successful finish; a crash in between leaves orphaned parts rather
    /// than a corrupt final object.
    async fn combine(&self, final_key: &str, part_keys: &[String]) -> StorageResult<u64> {
        let mut upload = self.put_stream(final_key).await?;

        let copy_result = async {
            for part in part_keys {
                let mut source = self.get_stream(part).await?;
                while let Some(chunk) = source.next().await {
                    upload.write(chunk?).await?;
                }
            }
            Ok::<(), StorageError>(())
        }
        .await;

        match copy_result {
            Ok(()) => {
                let written = upload.finish().await?;
                for part in part_keys {
                    self.delete(part).await?;
                }
                Ok(written)
            }
            Err(e) => {
                if let Err(abort_err) = upload.abort().await {
                    tracing::warn!(
                        final_key = %final_key,
                        error = %abort_err,
                        "Failed to abort combine upload after error"
                    );
                }
                Err(e)
            }
        }
    }

    /// Get the name of this storage backend.
    ///
    /// Returns a static string identifier for the backend type
    /// (e.g., "s3", "filesystem"). Used for metrics and logging.
    fn backend_name(&self) -> &'static str;

    /// Verify storage backend connectivity.
    ///
    /// Called during server startup to ensure storage is available before
    /// accepting requests. The default implementation returns Ok(()).
    async fn health_check(&self) -> StorageResult<()> {
        Ok(())
    }
}

/// Metadata about a stored object.
#[derive(Clone, Debug)]
pub struct ObjectMeta {
    /// Object size in bytes.
    pub size: u64,
    /// Last modification time (if available).
    pub last_modified: Option<time::OffsetDateTime>,
    /// Content type (if available).
    pub content_type: Option<String>,
}

/// Trait for streaming uploads.
#[async_trait]
pub trait StreamingUpload: Send {
    /// Write a chunk of data.
    async fn write(&mut self, data: Bytes) -> StorageResult<()>;

    /// Finish the upload and return the total bytes written.
    async fn finish(self: Box<Self>) -> StorageResult<u64>;

    /// Abort the upload, discarding anything written so far.
    async fn abort(self: Box<Self>) -> StorageResult<()>;
}
