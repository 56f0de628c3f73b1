//! Common test utilities and fixtures.

use axum::body::Body;
use axum::http::{Request, StatusCode};
use bytes::Bytes;
use lectern_core::Role;
use lectern_core::config::{
    AppConfig, AuthConfig, CatalogConfig, ContentRecord, ServerConfig, StorageConfig, TokenEntry,
};
use lectern_server::auth::hash_token;
use lectern_server::{AppState, create_router};
use lectern_storage::{FilesystemBackend, ObjectStore};
use serde_json::Value;
use std::sync::Arc;
use tempfile::TempDir;
use tower::ServiceExt;

/// Raw bearer tokens used by tests. The config carries only their hashes.
pub const MEMBER_TOKEN: &str = "test-member-token";
pub const PREMIUM_TOKEN: &str = "test-premium-token";
pub const ADMIN_TOKEN: &str = "test-admin-token";

/// Content ids seeded into the test catalog.
pub const FREE_CONTENT: &str = "intro-lesson";
pub const PREMIUM_CONTENT: &str = "masterclass";

pub const FREE_KEY: &str = "videos/intro-lesson.mp4";
pub const PREMIUM_KEY: &str = "videos/masterclass.mp4";

/// A test server with filesystem storage in a temp directory.
///
/// Note: fields are dead_code-allowed because each integration test file
/// compiles its own copy of this module and uses a different subset.
#[allow(dead_code)]
pub struct TestServer {
    pub router: axum::Router,
    pub state: AppState,
    _temp_dir: TempDir,
}

#[allow(dead_code)]
impl TestServer {
    /// Create a test server with the default two-entry catalog
    /// (one free video, one premium).
    pub async fn new() -> Self {
        Self::with_config(|_| {}).await
    }

    /// Create a test server with custom config modifications.
    pub async fn with_config<F>(modifier: F) -> Self
    where
        F: FnOnce(&mut AppConfig),
    {
        let temp_dir = tempfile::tempdir().expect("Failed to create temp directory");
        let storage_path = temp_dir.path().join("storage");

        let storage: Arc<dyn ObjectStore> = Arc::new(
            FilesystemBackend::new(&storage_path)
                .await
                .expect("Failed to create storage backend"),
        );

        let mut config = AppConfig {
            server: ServerConfig::default(),
            storage: StorageConfig::Filesystem { path: storage_path },
            delivery: Default::default(),
            auth: AuthConfig {
                tokens: vec![
                    token_entry(MEMBER_TOKEN, Role::Member),
                    token_entry(PREMIUM_TOKEN, Role::Premium),
                    token_entry(ADMIN_TOKEN, Role::Admin),
                ],
            },
            catalog: CatalogConfig {
                contents: vec![
                    content_record(FREE_CONTENT, FREE_KEY, false),
                    content_record(PREMIUM_CONTENT, PREMIUM_KEY, true),
                ],
            },
        };
        modifier(&mut config);
        config.validate().expect("test config should validate");

        let state = AppState::new(config, storage);
        let router = create_router(state.clone());

        Self {
            router,
            state,
            _temp_dir: temp_dir,
        }
    }

    /// Write an object directly into the backing store.
    pub async fn seed_object(&self, key: &str, data: impl Into<Bytes>) {
        self.state
            .storage
            .put(key, data.into())
            .await
            .expect("Failed to seed object");
    }

    /// Issue a request and return the raw response.
    pub async fn request(
        &self,
        method: &str,
        uri: &str,
        token: Option<&str>,
        range: Option<&str>,
        body: Body,
    ) -> axum::response::Response {
        let mut builder = Request::builder().method(method).uri(uri);
        if let Some(token) = token {
            builder = builder.header("Authorization", format!("Bearer {token}"));
        }
        if let Some(range) = range {
            builder = builder.header("Range", range);
        }
        let request = builder.body(body).expect("Failed to build request");
        self.router
            .clone()
            .oneshot(request)
            .await
            .expect("Request failed")
    }

    /// GET a video, optionally authenticated and with a Range header.
    pub async fn get_video(
        &self,
        content_id: &str,
        token: Option<&str>,
        range: Option<&str>,
    ) -> axum::response::Response {
        self.request(
            "GET",
            &format!("/v1/videos/{content_id}"),
            token,
            range,
            Body::empty(),
        )
        .await
    }

    /// Issue a JSON request and return status plus parsed body.
    pub async fn json_request(
        &self,
        method: &str,
        uri: &str,
        token: Option<&str>,
        body: Option<Value>,
    ) -> (StatusCode, Value) {
        let mut builder = Request::builder().method(method).uri(uri);
        if let Some(token) = token {
            builder = builder.header("Authorization", format!("Bearer {token}"));
        }
        let body = match body {
            Some(value) => {
                builder = builder.header("Content-Type", "application/json");
                Body::from(serde_json::to_vec(&value).expect("Failed to serialize body"))
            }
            None => Body::empty(),
        };
        let request = builder.body(body).expect("Failed to build request");
        let response = self
            .router
            .clone()
            .oneshot(request)
            .await
            .expect("Request failed");
        let status = response.status();
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .expect("Failed to read body");
        let json = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes).unwrap_or(Value::Null)
        };
        (status, json)
    }
}

/// Collect a response body into bytes.
#[allow(dead_code)]
pub async fn body_bytes(response: axum::response::Response) -> Bytes {
    axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .expect("Failed to read body")
}

/// Read a response header as a string, panicking if absent.
#[allow(dead_code)]
pub fn header_str<'a>(response: &'a axum::response::Response, name: &str) -> &'a str {
    response
        .headers()
        .get(name)
        .unwrap_or_else(|| panic!("missing header: {name}"))
        .to_str()
        .expect("header is not valid UTF-8")
}

fn token_entry(raw_token: &str, role: Role) -> TokenEntry {
    TokenEntry {
        token_hash: hash_token(raw_token),
        role,
        description: Some(format!("test {role:?} token")),
    }
}

fn content_record(id: &str, key: &str, premium: bool) -> ContentRecord {
    ContentRecord {
        id: id.to_string(),
        key: key.to_string(),
        premium,
        content_type: "video/mp4".to_string(),
    }
}
