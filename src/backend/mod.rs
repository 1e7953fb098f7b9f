pub mod echo;
pub mod openai;
pub mod types;

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use crate::config::{ModelConfig, ProviderKind, RelayConfig};
use crate::error::{RelayError, Result};

use types::{Completion, ConversationRequest};

/// A model served by some backend provider.
#[async_trait]
pub trait Model: Send + Sync {
    /// Identifier clients use to select this model.
    fn id(&self) -> &str;

    /// Name of the provider implementation, e.g. "echo" or "openai".
    fn provider(&self) -> &str;

    /// Run one new turn against the given history.
    ///
    /// Called at most once per HTTP request. Implementations should stop
    /// producing output once `cancel` fires.
    async fn run_conversation(
        &self,
        request: ConversationRequest,
        cancel: CancellationToken,
    ) -> Result<Completion>;
}

/// Registry of available models, keyed by model id.
pub struct ModelRegistry {
    models: HashMap<String, Arc<dyn Model>>,
}

impl ModelRegistry {
    pub fn new() -> Self {
        Self {
            models: HashMap::new(),
        }
    }

    /// Build a registry with one model per configured entry.
    pub fn from_config(config: &RelayConfig) -> Result<Self> {
        let mut registry = Self::new();
        for model in &config.models {
            registry.register(build_model(model)?);
        }
        Ok(registry)
    }

    /// Register a model, replacing any earlier model with the same id.
    pub fn register(&mut self, model: Arc<dyn Model>) {
        self.models.insert(model.id().to_string(), model);
    }

    pub fn get(&self, id: &str) -> Result<Arc<dyn Model>> {
        self.models
            .get(id)
            .cloned()
            .ok_or_else(|| RelayError::UnknownModel(id.to_string()))
    }

    /// All registered model ids, sorted.
    pub fn list_ids(&self) -> Vec<&str> {
        let mut ids: Vec<&str> = self.models.keys().map(String::as_str).collect();
        ids.sort_unstable();
        ids
    }

    /// All registered models, sorted by id.
    pub fn list(&self) -> Vec<Arc<dyn Model>> {
        let mut models: Vec<_> = self.models.values().cloned().collect();
        models.sort_by(|a, b| a.id().cmp(b.id()));
        models
    }

    pub fn len(&self) -> usize {
        self.models.len()
    }

    pub fn is_empty(&self) -> bool {
        self.models.is_empty()
    }
}

impl Default for ModelRegistry {
    fn default() -> Self {
        Self::new()
    }
}

fn build_model(config: &ModelConfig) -> Result<Arc<dyn Model>> {
    match config.provider {
        ProviderKind::Echo => Ok(Arc::new(echo::EchoModel::new(config.id.as_str()))),
        ProviderKind::OpenAi => {
            let base_url = config.base_url.as_deref().ok_or_else(|| {
                RelayError::Config(format!("model '{}' has no base_url", config.id))
            })?;
            let api_key = match config.api_key_env.as_deref() {
                Some(var) => match std::env::var(var) {
                    Ok(key) => Some(key),
                    Err(_) => {
                        tracing::warn!(model = %config.id, env = var, "API key variable is not set");
                        None
                    }
                },
                None => None,
            };
            let upstream_model = config.upstream_model.as_deref().unwrap_or(&config.id);
            Ok(Arc::new(openai::OpenAiModel::new(
                config.id.as_str(),
                upstream_model,
                base_url,
                api_key,
            )))
        }
    }
}
