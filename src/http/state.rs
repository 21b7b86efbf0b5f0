use crate::catalog::StreamCatalog;
use crate::session::SessionManager;
use std::sync::Arc;

/// Shared application state for HTTP handlers
#[derive(Clone)]
pub struct AppState {
    /// Stream metadata
    pub catalog: Arc<dyn StreamCatalog>,

    /// Live transcoding sessions
    pub sessions: SessionManager,
}

impl AppState {
    pub fn new(catalog: Arc<dyn StreamCatalog>, sessions: SessionManager) -> Self {
        Self { catalog, sessions }
    }
}
