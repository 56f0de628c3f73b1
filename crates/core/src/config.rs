//! Configuration types shared across crates.

use crate::access::Role;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Server configuration.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Bind address (e.g., "0.0.0.0:8080").
    #[serde(default = "default_bind")]
    pub bind: String,
    /// Enable the /metrics endpoint for Prometheus scraping (default: true).
    /// When enabled, the endpoint must be network-restricted to authorized
    /// scraper IPs at the infrastructure level.
    #[serde(default = "default_metrics_enabled")]
    pub metrics_enabled: bool,
}

fn default_bind() -> String {
    "127.0.0.1:8080".to_string()
}

fn default_metrics_enabled() -> bool {
    true
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: default_bind(),
            metrics_enabled: default_metrics_enabled(),
        }
    }
}

/// Storage backend configuration.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum StorageConfig {
    /// Local filesystem storage.
    Filesystem {
        /// Root directory for storage.
        path: PathBuf,
    },
    /// S3-compatible storage (AWS S3, R2, MinIO).
    S3 {
        /// Bucket name.
        bucket: String,
        /// Optional endpoint URL (for R2, MinIO, etc.).
        endpoint: Option<String>,
        /// Region.
        region: Option<String>,
        /// Optional key prefix.
        prefix: Option<String>,
        /// Access key ID. Falls back to the ambient credential chain if not set.
        /// WARNING: Prefer env vars or IAM roles over storing secrets in config files.
        access_key_id: Option<String>,
        /// Secret access key. Falls back to the ambient credential chain if not set.
        /// WARNING: Prefer env vars or IAM roles over storing secrets in config files.
        secret_access_key: Option<String>,
        /// Force path-style URLs (`endpoint/bucket/key`). Required for MinIO
        /// and some S3-compatible services; AWS S3 wants virtual-hosted style.
        #[serde(default)]
        force_path_style: bool,
    },
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self::Filesystem {
            path: PathBuf::from("./data/storage"),
        }
    }
}

impl StorageConfig {
    /// Whether this backend can issue presigned URLs.
    pub fn supports_presigning(&self) -> bool {
        matches!(self, Self::S3 { .. })
    }

    /// Validate storage configuration invariants.
    pub fn validate(&self) -> Result<(), String> {
        match self {
            StorageConfig::S3 {
                access_key_id,
                secret_access_key,
                ..
            } => match (access_key_id.as_ref(), secret_access_key.as_ref()) {
                (Some(_), Some(_)) | (None, None) => Ok(()),
                _ => Err(
                    "s3 config requires both access_key_id and secret_access_key when either is set"
                        .to_string(),
                ),
            },
            StorageConfig::Filesystem { .. } => Ok(()),
        }
    }
}

/// How video bytes reach the client.
#[derive(Clone, Copy, Debug, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum DeliveryMode {
    /// Proxy bytes through the server (works with any backend).
    #[default]
    Stream,
    /// Redirect to a presigned URL (object storage only).
    Redirect,
}

/// Video delivery configuration.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct DeliveryConfig {
    /// Delivery mode.
    #[serde(default)]
    pub mode: DeliveryMode,
    /// Window applied to open-ended range requests served from disk, in
    /// bytes. Bounds per-response memory for seeks without an explicit end;
    /// clients re-request for the rest. 0 disables the window.
    #[serde(default = "default_disk_range_window")]
    pub disk_range_window_bytes: u64,
    /// Lifetime of presigned URLs in seconds.
    #[serde(default = "default_presign_ttl_secs")]
    pub presign_ttl_secs: u64,
}

fn default_disk_range_window() -> u64 {
    crate::DISK_RANGE_WINDOW
}

fn default_presign_ttl_secs() -> u64 {
    900 // 15 minutes
}

impl Default for DeliveryConfig {
    fn default() -> Self {
        Self {
            mode: DeliveryMode::default(),
            disk_range_window_bytes: default_disk_range_window(),
            presign_ttl_secs: default_presign_ttl_secs(),
        }
    }
}

impl DeliveryConfig {
    /// Get the presign TTL as a Duration.
    pub fn presign_ttl(&self) -> Duration {
        Duration::from_secs(self.presign_ttl_secs)
    }

    /// Validate delivery configuration against the chosen storage backend.
    pub fn validate(&self, storage: &StorageConfig) -> Result<(), String> {
        if self.mode == DeliveryMode::Redirect && !storage.supports_presigning() {
            return Err(
                "delivery.mode = \"redirect\" requires an object storage backend \
                 (the filesystem backend cannot presign URLs)"
                    .to_string(),
            );
        }
        if self.presign_ttl_secs == 0 {
            return Err("delivery.presign_ttl_secs must be at least 1".to_string());
        }
        Ok(())
    }
}

/// A configured access token.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct TokenEntry {
    /// Pre-computed hash of the token (SHA256 hex, 64 characters).
    /// Generate with: `echo -n "your-secret-token" | sha256sum`
    pub token_hash: String,
    /// Role granted by this token.
    pub role: Role,
    /// Optional description for operator bookkeeping.
    pub description: Option<String>,
}

/// Authentication configuration.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct AuthConfig {
    /// Configured access tokens.
    #[serde(default)]
    pub tokens: Vec<TokenEntry>,
}

impl AuthConfig {
    /// Validate that token hashes look like SHA256 hex digests.
    pub fn validate(&self) -> Result<(), String> {
        for entry in &self.tokens {
            if entry.token_hash.len() != 64
                || !entry.token_hash.chars().all(|c| c.is_ascii_hexdigit())
            {
                return Err(format!(
                    "auth token hash is not a 64-character hex digest: {}...",
                    &entry.token_hash.chars().take(8).collect::<String>()
                ));
            }
        }
        Ok(())
    }
}

/// A content record: the external collaborator mapping a content id to its
/// stored object and premium flag.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ContentRecord {
    /// Public content identifier.
    pub id: String,
    /// Storage key of the video object.
    pub key: String,
    /// Whether the content is premium-gated.
    #[serde(default)]
    pub premium: bool,
    /// Content type served to clients.
    #[serde(default = "default_content_type")]
    pub content_type: String,
}

fn default_content_type() -> String {
    "video/mp4".to_string()
}

/// Content catalog configuration.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct CatalogConfig {
    /// Known content records.
    #[serde(default)]
    pub contents: Vec<ContentRecord>,
}

impl CatalogConfig {
    /// Validate catalog invariants: unique ids, non-empty keys.
    pub fn validate(&self) -> Result<(), String> {
        let mut seen = std::collections::HashSet::new();
        for record in &self.contents {
            if record.id.is_empty() {
                return Err("catalog content id must not be empty".to_string());
            }
            if record.key.is_empty() {
                return Err(format!("catalog content {} has an empty key", record.id));
            }
            if !seen.insert(record.id.as_str()) {
                return Err(format!("duplicate catalog content id: {}", record.id));
            }
        }
        Ok(())
    }
}

/// Complete application configuration.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct AppConfig {
    /// Server configuration.
    #[serde(default)]
    pub server: ServerConfig,
    /// Storage backend configuration.
    #[serde(default)]
    pub storage: StorageConfig,
    /// Delivery configuration.
    #[serde(default)]
    pub delivery: DeliveryConfig,
    /// Authentication configuration.
    #[serde(default)]
    pub auth: AuthConfig,
    /// Content catalog.
    #[serde(default)]
    pub catalog: CatalogConfig,
}

impl AppConfig {
    /// Validate the whole configuration. Fails fast on combinations that
    /// would only surface as runtime errors otherwise.
    pub fn validate(&self) -> Result<(), String> {
        self.storage.validate()?;
        self.delivery.validate(&self.storage)?;
        self.auth.validate()?;
        self.catalog.validate()?;
        Ok(())
    }

    /// Create a test configuration with sensible defaults.
    ///
    /// **For testing only.** Uses filesystem storage and stream delivery.
    pub fn for_testing() -> Self {
        Self::default()
    }
}
