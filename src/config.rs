use std::collections::HashSet;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::dirs;
use crate::error::{RelayError, Result};

/// User-configurable settings for the Relay server and CLI.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RelayConfig {
    /// Host address for the HTTP server (default: 127.0.0.1)
    #[serde(default = "default_host")]
    pub host: String,

    /// Port for the HTTP server (default: 11435)
    #[serde(default = "default_port")]
    pub port: u16,

    /// Reject `stream: false` requests instead of answering them in one piece
    #[serde(default = "default_streaming_only")]
    pub streaming_only: bool,

    /// Capacity of the channel between the backend producer and the HTTP writer
    #[serde(default = "default_channel_capacity")]
    pub channel_capacity: usize,

    /// Directory receiving a JSON export of every reconstructed conversation
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub capture_dir: Option<PathBuf>,

    /// Models exposed by the relay, keyed by `id`
    #[serde(default = "default_models")]
    pub models: Vec<ModelConfig>,
}

/// Which backend implementation serves a model.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProviderKind {
    Echo,
    OpenAi,
}

impl std::fmt::Display for ProviderKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ProviderKind::Echo => write!(f, "echo"),
            ProviderKind::OpenAi => write!(f, "openai"),
        }
    }
}

/// A single model entry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelConfig {
    /// Identifier clients send in the `model` field
    pub id: String,

    pub provider: ProviderKind,

    /// Upstream base URL, e.g. `https://api.openai.com/v1` (openai only)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub base_url: Option<String>,

    /// Name of the environment variable holding the upstream API key
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key_env: Option<String>,

    /// Model name sent upstream; defaults to `id`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub upstream_model: Option<String>,
}

impl ModelConfig {
    pub fn echo(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            provider: ProviderKind::Echo,
            base_url: None,
            api_key_env: None,
            upstream_model: None,
        }
    }
}

fn default_host() -> String {
    "127.0.0.1".to_string()
}

fn default_port() -> u16 {
    11435
}

fn default_streaming_only() -> bool {
    true
}

fn default_channel_capacity() -> usize {
    16
}

fn default_models() -> Vec<ModelConfig> {
    vec![ModelConfig::echo("echo")]
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            streaming_only: default_streaming_only(),
            channel_capacity: default_channel_capacity(),
            capture_dir: None,
            models: default_models(),
        }
    }
}

impl RelayConfig {
    /// Load configuration from the default config file path.
    /// Returns default config if the file does not exist.
    pub fn load() -> Result<Self> {
        let path = dirs::config_path();
        if path.exists() {
            Self::load_from(&path)
        } else {
            Ok(Self::default())
        }
    }

    /// Load configuration from an explicit path. The file must exist.
    pub fn load_from(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            RelayError::Config(format!(
                "Failed to read config file {}: {}",
                path.display(),
                e
            ))
        })?;
        let config: RelayConfig = toml::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn save_to(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let content = toml::to_string_pretty(self)?;
        std::fs::write(path, content)?;
        Ok(())
    }

    /// Returns the server bind address string (e.g., "127.0.0.1:11435").
    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// Reject settings the server cannot run with.
    pub fn validate(&self) -> Result<()> {
        if self.channel_capacity == 0 {
            return Err(RelayError::Config(
                "channel_capacity must be greater than zero".to_string(),
            ));
        }

        let mut seen = HashSet::new();
        for model in &self.models {
            if model.id.trim().is_empty() {
                return Err(RelayError::Config("model id must not be empty".to_string()));
            }
            if !seen.insert(model.id.as_str()) {
                return Err(RelayError::Config(format!(
                    "duplicate model id '{}'",
                    model.id
                )));
            }
            if model.provider == ProviderKind::OpenAi && model.base_url.is_none() {
                return Err(RelayError::Config(format!(
                    "model '{}' uses the openai provider but has no base_url",
                    model.id
                )));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = RelayConfig::default();
        assert_eq!(config.host, "127.0.0.1");
        assert_eq!(config.port, 11435);
        assert!(config.streaming_only);
        assert_eq!(config.channel_capacity, 16);
        assert_eq!(config.models.len(), 1);
        assert_eq!(config.models[0].provider, ProviderKind::Echo);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_bind_address() {
        let config = RelayConfig::default();
        assert_eq!(config.bind_address(), "127.0.0.1:11435");
    }

    #[test]
    fn test_config_deserialize() {
        let toml_str = r#"
            host = "0.0.0.0"
            port = 8080
            streaming_only = false

            [[models]]
            id = "gpt-4o-mini"
            provider = "openai"
            base_url = "https://api.openai.com/v1"
            api_key_env = "OPENAI_API_KEY"
        "#;
        let config: RelayConfig = toml::from_str(toml_str).unwrap();
        assert_eq!(config.host, "0.0.0.0");
        assert_eq!(config.port, 8080);
        assert!(!config.streaming_only);
        assert_eq!(config.channel_capacity, 16);
        assert_eq!(config.models.len(), 1);
        assert_eq!(config.models[0].provider, ProviderKind::OpenAi);
        assert_eq!(
            config.models[0].api_key_env.as_deref(),
            Some("OPENAI_API_KEY")
        );
    }

    #[test]
    fn test_unknown_provider_rejected() {
        let toml_str = r#"
            [[models]]
            id = "x"
            provider = "carrier-pigeon"
        "#;
        assert!(toml::from_str::<RelayConfig>(toml_str).is_err());
    }

    #[test]
    fn test_validate_rejects_duplicates() {
        let mut config = RelayConfig::default();
        config.models.push(ModelConfig::echo("echo"));
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("duplicate model id"));
    }

    #[test]
    fn test_validate_rejects_zero_capacity() {
        let config = RelayConfig {
            channel_capacity: 0,
            ..RelayConfig::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_requires_base_url_for_openai() {
        let mut config = RelayConfig::default();
        config.models.push(ModelConfig {
            id: "remote".to_string(),
            provider: ProviderKind::OpenAi,
            base_url: None,
            api_key_env: None,
            upstream_model: None,
        });
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("base_url"));
    }

    #[test]
    fn test_config_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");

        let config = RelayConfig {
            host: "0.0.0.0".to_string(),
            port: 9999,
            streaming_only: false,
            channel_capacity: 4,
            capture_dir: Some(dir.path().join("captures")),
            models: vec![ModelConfig::echo("a"), ModelConfig::echo("b")],
        };
        config.save_to(&path).unwrap();

        let loaded = RelayConfig::load_from(&path).unwrap();
        assert_eq!(loaded.host, "0.0.0.0");
        assert_eq!(loaded.port, 9999);
        assert!(!loaded.streaming_only);
        assert_eq!(loaded.channel_capacity, 4);
        assert_eq!(loaded.capture_dir, Some(dir.path().join("captures")));
        assert_eq!(loaded.models.len(), 2);
    }

    #[test]
    fn test_load_from_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let err = RelayConfig::load_from(&dir.path().join("nope.toml")).unwrap_err();
        assert!(matches!(err, RelayError::Config(_)));
    }
}
