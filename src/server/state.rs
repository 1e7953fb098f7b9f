use std::sync::Arc;

use crate::backend::ModelRegistry;
use crate::config::RelayConfig;
use crate::driver::CompletionDriver;

/// Shared application state accessible to all HTTP handlers.
///
/// Only read-only collaborators live here; everything a request builds
/// (history, fragment stream) stays with that request.
#[derive(Clone)]
pub struct AppState {
    pub registry: Arc<ModelRegistry>,
    pub driver: CompletionDriver,
    pub config: Arc<RelayConfig>,
    /// Unix timestamp of server start, reported as model creation time.
    pub started_at: i64,
}

impl AppState {
    pub fn new(registry: Arc<ModelRegistry>, config: Arc<RelayConfig>) -> Self {
        Self {
            registry,
            driver: CompletionDriver::new(config.channel_capacity),
            config,
            started_at: chrono::Utc::now().timestamp(),
        }
    }
}
