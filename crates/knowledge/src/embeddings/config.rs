//! Embedding configuration resolved from the application config.

use ragchat_core::config::RagSettings;
use ragchat_core::AppConfig;
use serde::{Deserialize, Serialize};

/// Settings needed to build an embedding provider.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct EmbeddingConfig {
    /// Provider name: "trigram", "ollama", "openai"
    pub provider: String,

    /// Model identifier (provider-specific)
    pub model: String,

    /// Embedding vector dimensions
    pub dimensions: usize,

    /// Custom endpoint for remote providers
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub endpoint: Option<String>,

    /// API key for hosted providers
    #[serde(default, skip_serializing)]
    pub api_key: Option<String>,

    /// Maximum texts per embedding request
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
}

fn default_batch_size() -> usize {
    32
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            provider: "trigram".to_string(),
            model: "trigram-v1".to_string(),
            dimensions: 384,
            endpoint: None,
            api_key: None,
            batch_size: default_batch_size(),
        }
    }
}

impl EmbeddingConfig {
    /// Resolve the active embedding provider from validated settings.
    pub fn from_app_config(config: &AppConfig, settings: &RagSettings) -> Self {
        let provider = config.llm.active_embedding_provider.clone();
        Self {
            endpoint: config.provider_endpoint(&provider).map(str::to_string),
            api_key: config.resolve_api_key(&provider),
            model: settings.embedding_model.clone(),
            dimensions: settings.embedding_dimensions,
            batch_size: default_batch_size(),
            provider,
        }
    }
}
