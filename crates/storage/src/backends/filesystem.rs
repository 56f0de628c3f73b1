//! Local filesystem storage backend.

use crate::error::{StorageError, StorageResult};
use crate::traits::{ByteStream, ObjectMeta, ObjectStore, StreamingUpload};
use async_trait::async_trait;
use bytes::Bytes;
use std::path::{Path, PathBuf};
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tracing::instrument;
use uuid::Uuid;

/// Default chunk size for streaming reads (64 KiB).
const STREAM_CHUNK_SIZE: usize = 64 * 1024;

/// Local filesystem object store.
pub struct FilesystemBackend {
    root: PathBuf,
}

impl FilesystemBackend {
    /// Create a new filesystem backend rooted at `root`, creating the
    /// directory if needed.
    pub async fn new(root: impl AsRef<Path>) -> StorageResult<Self> {
        let root = root.as_ref().to_path_buf();
        fs::create_dir_all(&root).await?;
        Ok(Self { root })
    }

    /// Get the full path for a key, with path traversal protection.
    ///
    /// Wraps `key_path_sync` in `spawn_blocking` because the validation
    /// performs synchronous filesystem calls (`canonicalize`,
    /// `symlink_metadata`).
    async fn key_path(&self, key: &str) -> StorageResult<PathBuf> {
        let root = self.root.clone();
        let key = key.to_string();
        tokio::task::spawn_blocking(move || Self::key_path_sync(&root, &key))
            .await
            .map_err(|e| {
                StorageError::Io(std::io::Error::other(format!("spawn_blocking failed: {e}")))
            })?
    }

    /// Synchronous key path validation.
    ///
    /// Returns an error if the key would escape the storage root, including
    /// via symlinks placed inside the root.
    fn key_path_sync(root: &Path, key: &str) -> StorageResult<PathBuf> {
        // Fast-path rejection of obvious traversal attempts
        if key.contains("..") || key.starts_with('/') || key.starts_with('\\') {
            return Err(StorageError::InvalidKey(format!(
                "path traversal not allowed: {key}"
            )));
        }

        for component in std::path::Path::new(key).components() {
            match component {
                std::path::Component::Normal(_) => {}
                _ => {
                    return Err(StorageError::InvalidKey(format!(
                        "contains unsafe path component: {key}"
                    )));
                }
            }
        }

        let path = root.join(key);

        let root_canonical = root.canonicalize().map_err(|e| {
            StorageError::Io(std::io::Error::new(
                e.kind(),
                format!("failed to canonicalize root: {e}"),
            ))
        })?;

        // Existing paths (including broken symlinks) are canonicalized and
        // checked against the root. This catches a symlink inside the root
        // that points outside of it.
        match std::fs::symlink_metadata(&path) {
            Ok(meta) => {
                let canonical = path.canonicalize().map_err(|e| {
                    if meta.file_type().is_symlink() {
                        StorageError::InvalidKey(format!(
                            "symlink target missing or invalid: {key}"
                        ))
                    } else {
                        StorageError::Io(std::io::Error::new(
                            e.kind(),
                            format!("failed to canonicalize path: {e}"),
                        ))
                    }
                })?;

                if !canonical.starts_with(&root_canonical) {
                    return Err(StorageError::InvalidKey(format!(
                        "resolved path escapes storage root: {key}"
                    )));
                }

                // Return the original (non-canonical) path so keys map to
                // stable locations under the configured root.
                return Ok(path);
            }
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {}
            Err(err) => {
                return Err(StorageError::Io(std::io::Error::new(
                    err.kind(),
                    format!("failed to stat path: {err}"),
                )));
            }
        }

        // For paths that don't exist yet, verify the nearest existing
        // ancestor resolves inside the root. Otherwise a write to
        // "link/a/b" where root/link is a symlink would create directories
        // outside the root.
        let mut ancestor = path.as_path();
        while let Some(parent) = ancestor.parent() {
            match std::fs::symlink_metadata(parent) {
                Ok(meta) => {
                    let parent_canonical = parent.canonicalize().map_err(|e| {
                        if meta.file_type().is_symlink() {
                            StorageError::InvalidKey(format!(
                                "ancestor symlink target missing or invalid: {key}"
                            ))
                        } else {
                            StorageError::Io(std::io::Error::new(
                                e.kind(),
                                format!("failed to canonicalize ancestor: {e}"),
                            ))
                        }
                    })?;

                    if !parent_canonical.starts_with(&root_canonical) {
                        return Err(StorageError::InvalidKey(format!(
                            "ancestor path escapes storage root: {key}"
                        )));
                    }
                    break;
                }
                Err(err) if err.kind() == std::io::ErrorKind::NotFound => {}
                Err(err) => {
                    return Err(StorageError::Io(std::io::Error::new(
                        err.kind(),
                        format!("failed to stat ancestor: {err}"),
                    )));
                }
            }
            ancestor = parent;
        }

        Ok(path)
    }

    /// Ensure parent directory exists.
    async fn ensure_parent(&self, path: &Path) -> StorageResult<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).await?;
        }
        Ok(())
    }

    /// Temp path next to the final path, unique per writer so concurrent
    /// writes to the same key never clobber each other's staging file.
    fn temp_path(path: &Path) -> PathBuf {
        let temp_name = format!(".tmp.{}", Uuid::new_v4());
        path.with_file_name(
            path.file_name()
                .map(|n| format!("{}{}", n.to_string_lossy(), temp_name))
                .unwrap_or_else(|| temp_name.clone()),
        )
    }

    async fn open_for_read(&self, key: &str) -> StorageResult<fs::File> {
        let path = self.key_path(key).await?;
        fs::File::open(&path).await.map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                StorageError::NotFound(key.to_string())
            } else {
                StorageError::Io(e)
            }
        })
    }
}

#[async_trait]
impl ObjectStore for FilesystemBackend {
    #[instrument(skip(self), fields(backend = "filesystem"))]
    async fn exists(&self, key: &str) -> StorageResult<bool> {
        let path = self.key_path(key).await?;
        fs::try_exists(&path).await.map_err(StorageError::Io)
    }

    #[instrument(skip(self), fields(backend = "filesystem"))]
    async fn head(&self, key: &str) -> StorageResult<ObjectMeta> {
        let path = self.key_path(key).await?;
        let metadata = fs::metadata(&path).await.map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                StorageError::NotFound(key.to_string())
            } else {
                StorageError::Io(e)
            }
        })?;

        Ok(ObjectMeta {
            size: metadata.len(),
            last_modified: metadata.modified().ok().map(|t| t.into()),
            content_type: None,
        })
    }

    #[instrument(skip(self), fields(backend = "filesystem"))]
    async fn get(&self, key: &str) -> StorageResult<Bytes> {
        let path = self.key_path(key).await?;
        let data = fs::read(&path).await.map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                StorageError::NotFound(key.to_string())
            } else {
                StorageError::Io(e)
            }
        })?;
        Ok(Bytes::from(data))
    }

    #[instrument(skip(self), fields(backend = "filesystem"))]
    async fn get_stream(&self, key: &str) -> StorageResult<ByteStream> {
        use tokio::io::AsyncReadExt;

        let file = self.open_for_read(key).await?;

        // Stream the file in chunks instead of loading entirely into memory
        let stream = async_stream::try_stream! {
            let mut file = file;
            let mut buf = vec![0u8; STREAM_CHUNK_SIZE];
            loop {
                let n = file.read(&mut buf).await?;
                if n == 0 {
                    break;
                }
                yield Bytes::copy_from_slice(&buf[..n]);
            }
        };

        Ok(Box::pin(stream))
    }

    #[instrument(skip(self), fields(backend = "filesystem"))]
    async fn get_range_stream(&self, key: &str, start: u64, end: u64) -> StorageResult<ByteStream> {
        use tokio::io::{AsyncReadExt, AsyncSeekExt};

        if end < start {
            return Err(StorageError::InvalidRange(format!(
                "end ({end}) < start ({start})"
            )));
        }

        let mut file = self.open_for_read(key).await?;
        file.seek(std::io::SeekFrom::Start(start)).await?;

        // Read exactly end - start bytes, one chunk at a time. The caller
        // has already validated the range against the object size, so a
        // short read here means the file changed underneath us.
        let stream = async_stream::try_stream! {
            let mut remaining = end - start;
            let mut buf = vec![0u8; STREAM_CHUNK_SIZE];
            while remaining > 0 {
                let want = (remaining as usize).min(STREAM_CHUNK_SIZE);
                let n = file.read(&mut buf[..want]).await?;
                if n == 0 {
                    Err(std::io::Error::new(
                        std::io::ErrorKind::UnexpectedEof,
                        format!("object truncated with {remaining} bytes unread"),
                    ))?;
                }
                remaining -= n as u64;
                yield Bytes::copy_from_slice(&buf[..n]);
            }
        };

        Ok(Box::pin(stream))
    }

    #[instrument(skip(self, data), fields(backend = "filesystem", size = data.len()))]
    async fn put(&self, key: &str, data: Bytes) -> StorageResult<()> {
        let path = self.key_path(key).await?;
        self.ensure_parent(&path).await?;

        // Write to a unique temp file, fsync, then rename so readers only
        // ever observe complete objects.
        let temp_path = Self::temp_path(&path);
        {
            let mut file = fs::File::create(&temp_path).await?;
            file.write_all(&data).await?;
            file.sync_all().await?;
        }
        fs::rename(&temp_path, &path).await?;

        Ok(())
    }

    #[instrument(skip(self), fields(backend = "filesystem"))]
    async fn put_stream(&self, key: &str) -> StorageResult<Box<dyn StreamingUpload>> {
        let path = self.key_path(key).await?;
        self.ensure_parent(&path).await?;

        let temp_path = Self::temp_path(&path);
        let file = fs::File::create(&temp_path).await?;

        Ok(Box::new(FilesystemUpload {
            file,
            temp_path,
            final_path: path,
            bytes_written: 0,
        }))
    }

    #[instrument(skip(self), fields(backend = "filesystem"))]
    async fn delete(&self, key: &str) -> StorageResult<()> {
        let path = self.key_path(key).await?;
        match fs::remove_file(&path).await {
            Ok(()) => Ok(()),
            // Already gone; deletes are idempotent
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(StorageError::Io(e)),
        }
    }

    fn backend_name(&self) -> &'static str {
        "filesystem"
    }

    #[instrument(skip(self), fields(backend = "filesystem"))]
    async fn health_check(&self) -> StorageResult<()> {
        // Verify the root directory exists and is accessible
        let metadata = fs::metadata(&self.root).await.map_err(|e| {
            StorageError::Io(std::io::Error::new(
                e.kind(),
                format!("storage root not accessible: {e}"),
            ))
        })?;

        if !metadata.is_dir() {
            return Err(StorageError::Io(std::io::Error::new(
                std::io::ErrorKind::NotADirectory,
                format!("storage root is not a directory: {:?}", self.root),
            )));
        }

        Ok(())
    }
}

/// Streaming upload for filesystem backend.
struct FilesystemUpload {
    file: fs::File,
    temp_path: PathBuf,
    final_path: PathBuf,
    bytes_written: u64,
}

#[async_trait]
impl StreamingUpload for FilesystemUpload {
    async fn write(&mut self, data: Bytes) -> StorageResult<()> {
        self.file.write_all(&data).await?;
        self.bytes_written += data.len() as u64;
        Ok(())
    }

    async fn finish(mut self: Box<Self>) -> StorageResult<u64> {
        // Flush to disk before the rename makes the object visible
        self.file.sync_all().await?;
        drop(self.file);
        fs::rename(&self.temp_path, &self.final_path).await?;
        Ok(self.bytes_written)
    }

    async fn abort(self: Box<Self>) -> StorageResult<()> {
        drop(self.file);
        let _ = fs::remove_file(&self.temp_path).await;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::StreamExt;

    async fn collect(mut stream: ByteStream) -> StorageResult<Vec<u8>> {
        let mut out = Vec::new();
        while let Some(chunk) = stream.next().await {
            out.extend_from_slice(&chunk?);
        }
        Ok(out)
    }

    #[tokio::test]
    async fn test_put_get_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let backend = FilesystemBackend::new(dir.path()).await.unwrap();

        let key = "videos/lesson-01.mp4";
        let data = Bytes::from("hello world");

        backend.put(key, data.clone()).await.unwrap();
        assert!(backend.exists(key).await.unwrap());

        let retrieved = backend.get(key).await.unwrap();
        assert_eq!(retrieved, data);

        let meta = backend.head(key).await.unwrap();
        assert_eq!(meta.size, data.len() as u64);
    }

    #[tokio::test]
    async fn test_get_stream_matches_object() {
        let dir = tempfile::tempdir().unwrap();
        let backend = FilesystemBackend::new(dir.path()).await.unwrap();

        // Larger than one stream chunk so multiple reads happen
        let data: Vec<u8> = (0..200_000u32).map(|i| (i % 251) as u8).collect();
        backend
            .put("videos/big.mp4", Bytes::from(data.clone()))
            .await
            .unwrap();

        let stream = backend.get_stream("videos/big.mp4").await.unwrap();
        assert_eq!(collect(stream).await.unwrap(), data);
    }

    #[tokio::test]
    async fn test_get_range_stream_returns_exact_window() {
        let dir = tempfile::tempdir().unwrap();
        let backend = FilesystemBackend::new(dir.path()).await.unwrap();

        let data: Vec<u8> = (0..100_000u32).map(|i| (i % 251) as u8).collect();
        backend
            .put("videos/big.mp4", Bytes::from(data.clone()))
            .await
            .unwrap();

        let stream = backend
            .get_range_stream("videos/big.mp4", 10_000, 75_000)
            .await
            .unwrap();
        assert_eq!(collect(stream).await.unwrap(), &data[10_000..75_000]);
    }

    #[tokio::test]
    async fn test_get_range_stream_tiles_to_full_object() {
        let dir = tempfile::tempdir().unwrap();
        let backend = FilesystemBackend::new(dir.path()).await.unwrap();

        let data: Vec<u8> = (0..150_000u32).map(|i| (i / 7 % 256) as u8).collect();
        backend
            .put("videos/big.mp4", Bytes::from(data.clone()))
            .await
            .unwrap();

        let mut reassembled = Vec::new();
        let mut start = 0u64;
        while start < data.len() as u64 {
            let end = (start + 64 * 1024).min(data.len() as u64);
            let stream = backend
                .get_range_stream("videos/big.mp4", start, end)
                .await
                .unwrap();
            reassembled.extend(collect(stream).await.unwrap());
            start = end;
        }

        assert_eq!(reassembled, data);
    }

    #[tokio::test]
    async fn test_get_range_stream_rejects_inverted_range() {
        let dir = tempfile::tempdir().unwrap();
        let backend = FilesystemBackend::new(dir.path()).await.unwrap();
        backend.put("k", Bytes::from("data")).await.unwrap();

        let result = backend.get_range_stream("k", 3, 1).await;
        assert!(matches!(result, Err(StorageError::InvalidRange(_))));
    }

    #[tokio::test]
    async fn test_delete_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let backend = FilesystemBackend::new(dir.path()).await.unwrap();

        let key = "videos/gone.mp4";
        backend.put(key, Bytes::from("x")).await.unwrap();

        backend.delete(key).await.unwrap();
        assert!(!backend.exists(key).await.unwrap());

        // Second delete of a missing key succeeds
        backend.delete(key).await.unwrap();
        backend.delete("never/existed").await.unwrap();
    }

    #[tokio::test]
    async fn test_combine_concatenates_in_order_and_removes_parts() {
        let dir = tempfile::tempdir().unwrap();
        let backend = FilesystemBackend::new(dir.path()).await.unwrap();

        let parts = vec![
            "uploads/u1/part-00000".to_string(),
            "uploads/u1/part-00001".to_string(),
            "uploads/u1/part-00002".to_string(),
        ];
        backend.put(&parts[0], Bytes::from("alpha-")).await.unwrap();
        backend.put(&parts[1], Bytes::from("beta-")).await.unwrap();
        backend.put(&parts[2], Bytes::from("gamma")).await.unwrap();

        let written = backend.combine("videos/final.mp4", &parts).await.unwrap();
        assert_eq!(written, 16);

        let combined = backend.get("videos/final.mp4").await.unwrap();
        assert_eq!(&combined[..], b"alpha-beta-gamma");

        for part in &parts {
            assert!(!backend.exists(part).await.unwrap());
        }
    }

    #[tokio::test]
    async fn test_combine_missing_part_leaves_no_final_object() {
        let dir = tempfile::tempdir().unwrap();
        let backend = FilesystemBackend::new(dir.path()).await.unwrap();

        let parts = vec![
            "uploads/u2/part-00000".to_string(),
            "uploads/u2/part-00001".to_string(),
        ];
        backend.put(&parts[0], Bytes::from("only")).await.unwrap();

        let result = backend.combine("videos/broken.mp4", &parts).await;
        assert!(matches!(result, Err(StorageError::NotFound(_))));

        assert!(!backend.exists("videos/broken.mp4").await.unwrap());
        // The surviving part is untouched
        assert!(backend.exists(&parts[0]).await.unwrap());
    }

    #[tokio::test]
    async fn test_presign_unsupported() {
        let dir = tempfile::tempdir().unwrap();
        let backend = FilesystemBackend::new(dir.path()).await.unwrap();

        let result = backend
            .presigned_get_url("k", std::time::Duration::from_secs(60))
            .await;
        assert!(matches!(result, Err(StorageError::Unsupported(_))));
    }

    #[tokio::test]
    async fn test_path_traversal_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let backend = FilesystemBackend::new(dir.path()).await.unwrap();

        assert!(backend.exists("../escape").await.is_err());
        assert!(backend.exists("/absolute/path").await.is_err());
        assert!(backend.exists("foo/../bar").await.is_err());
        assert!(backend.exists("foo/../../etc/passwd").await.is_err());

        assert!(backend.exists("valid/nested/key").await.is_ok());
    }

    #[tokio::test]
    #[cfg(unix)]
    async fn test_symlink_traversal_rejected() {
        use std::os::unix::fs::symlink;

        let dir = tempfile::tempdir().unwrap();
        let outside_dir = tempfile::tempdir().unwrap();

        let outside_file = outside_dir.path().join("secret.txt");
        std::fs::write(&outside_file, "secret data").unwrap();

        let backend = FilesystemBackend::new(dir.path()).await.unwrap();

        let symlink_path = dir.path().join("malicious_link");
        symlink(&outside_file, &symlink_path).unwrap();

        let result = backend.get("malicious_link").await;
        assert!(result.is_err(), "symlink traversal should be rejected");

        if let Err(StorageError::InvalidKey(msg)) = result {
            assert!(
                msg.contains("escapes storage root"),
                "error should mention escaping root: {msg}"
            );
        } else {
            panic!("expected InvalidKey error, got: {result:?}");
        }

        // Symlinked directory traversal is rejected too
        let symlink_dir = dir.path().join("link_to_outside");
        symlink(outside_dir.path(), &symlink_dir).unwrap();

        let result = backend.get("link_to_outside/secret.txt").await;
        assert!(
            result.is_err(),
            "directory symlink traversal should be rejected"
        );
    }

    #[tokio::test]
    #[cfg(unix)]
    async fn test_ancestor_symlink_traversal_rejected() {
        use std::os::unix::fs::symlink;

        let dir = tempfile::tempdir().unwrap();
        let outside_dir = tempfile::tempdir().unwrap();

        let backend = FilesystemBackend::new(dir.path()).await.unwrap();

        let symlink_path = dir.path().join("escape");
        symlink(outside_dir.path(), &symlink_path).unwrap();

        // Intermediate dirs under the symlink don't exist yet; the write
        // must still be rejected before create_dir_all follows the link.
        let result = backend
            .put("escape/nested/deep/file.txt", Bytes::from("data"))
            .await;

        assert!(
            result.is_err(),
            "ancestor symlink traversal should be rejected on write"
        );

        assert!(
            !outside_dir.path().join("nested").exists(),
            "should not have created directories outside storage root"
        );
    }
}
