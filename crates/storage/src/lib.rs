//! Storage backend abstraction for Lectern.
//!
//! Provides a unified [`ObjectStore`] interface over local filesystem and
//! S3-compatible object storage, plus the [`StreamBridge`] lifecycle wrapper
//! the HTTP layer uses to serve backend streams with cancellation.

pub mod backends;
pub mod bridge;
pub mod error;
pub mod traits;

pub use backends::{FilesystemBackend, S3Backend};
pub use bridge::{BridgeHandle, BridgeState, StreamBridge};
pub use error::{StorageError, StorageResult};
pub use traits::{ByteStream, ObjectMeta, ObjectStore, StreamingUpload};

use lectern_core::config::StorageConfig;
use std::sync::Arc;

/// Build a storage backend from configuration.
pub async fn from_config(config: &StorageConfig) -> StorageResult<Arc<dyn ObjectStore>> {
    match config {
        StorageConfig::Filesystem { path } => {
            let backend = FilesystemBackend::new(path).await?;
            Ok(Arc::new(backend))
        }
        StorageConfig::S3 {
            bucket,
            endpoint,
            region,
            prefix,
            access_key_id,
            secret_access_key,
            force_path_style,
        } => {
            let backend = S3Backend::new(
                bucket,
                endpoint.clone(),
                region.clone(),
                prefix.clone(),
                access_key_id.clone(),
                secret_access_key.clone(),
                *force_path_style,
            )
            .await?;
            Ok(Arc::new(backend))
        }
    }
}
