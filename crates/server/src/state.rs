//! Application state shared across handlers.

use crate::assembler::UploadAssembler;
use lectern_core::Role;
use lectern_core::config::{AppConfig, ContentRecord};
use lectern_storage::ObjectStore;
use std::collections::HashMap;
use std::sync::Arc;

/// Shared application state.
#[derive(Clone)]
pub struct AppState {
    /// Application configuration.
    pub config: Arc<AppConfig>,
    /// Storage backend.
    pub storage: Arc<dyn ObjectStore>,
    /// Content catalog, indexed by content id.
    pub catalog: Arc<HashMap<String, ContentRecord>>,
    /// Configured token hashes and their roles.
    pub tokens: Arc<HashMap<String, Role>>,
    /// Chunked upload sessions.
    pub uploads: Arc<UploadAssembler>,
}

impl AppState {
    /// Create application state from validated configuration.
    pub fn new(config: AppConfig, storage: Arc<dyn ObjectStore>) -> Self {
        let catalog: HashMap<String, ContentRecord> = config
            .catalog
            .contents
            .iter()
            .map(|record| (record.id.clone(), record.clone()))
            .collect();

        // Hashes are compared lowercase so operators can paste either case.
        let tokens: HashMap<String, Role> = config
            .auth
            .tokens
            .iter()
            .map(|entry| (entry.token_hash.to_lowercase(), entry.role))
            .collect();

        let uploads = Arc::new(UploadAssembler::new(storage.clone()));

        Self {
            config: Arc::new(config),
            storage,
            catalog: Arc::new(catalog),
            tokens: Arc::new(tokens),
            uploads,
        }
    }

    /// Look up a content record by id.
    pub fn content(&self, content_id: &str) -> Option<&ContentRecord> {
        self.catalog.get(content_id)
    }
}
