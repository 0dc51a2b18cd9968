//! Ollama embedding provider.
//!
//! Semantic embeddings from a local Ollama server (e.g. `nomic-embed-text`)
//! via the batch `/api/embed` endpoint.

use crate::embeddings::EmbeddingProvider;
use ragchat_core::{AppError, AppResult};
use ragchat_llm::providers::{check_status, send_error};
use serde::{Deserialize, Serialize};
use tracing::{debug, instrument};

const PROVIDER: &str = "ollama";
const DEFAULT_OLLAMA_URL: &str = "http://localhost:11434";
const EMBED_ENDPOINT: &str = "/api/embed";

/// Ollama embedding provider using the local API.
#[derive(Debug, Clone)]
pub struct OllamaProvider {
    client: reqwest::Client,
    base_url: String,
    model: String,
    dimensions: usize,
}

/// Request payload for the Ollama embed API
#[derive(Debug, Serialize)]
struct EmbedRequest<'a> {
    model: &'a str,
    input: &'a [String],
}

/// Response from the Ollama embed API
#[derive(Debug, Deserialize)]
struct EmbedResponse {
    embeddings: Vec<Vec<f32>>,
}

impl OllamaProvider {
    /// Provider for the default local server.
    pub fn new(model: impl Into<String>, dimensions: usize) -> Self {
        Self::with_base_url(DEFAULT_OLLAMA_URL, model, dimensions)
    }

    pub fn with_base_url(base_url: impl Into<String>, model: impl Into<String>, dimensions: usize) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
            model: model.into(),
            dimensions,
        }
    }

    fn parse_response(&self, body: EmbedResponse, expected: usize) -> AppResult<Vec<Vec<f32>>> {
        if body.embeddings.len() != expected {
            return Err(AppError::Llm(format!(
                "Ollama returned {} embeddings for {} inputs",
                body.embeddings.len(),
                expected
            )));
        }

        if let Some(bad) = body.embeddings.iter().find(|e| e.len() != self.dimensions) {
            return Err(AppError::DimensionMismatch {
                expected: self.dimensions,
                actual: bad.len(),
            });
        }

        Ok(body.embeddings)
    }
}

#[async_trait::async_trait]
impl EmbeddingProvider for OllamaProvider {
    fn provider_name(&self) -> &str {
        PROVIDER
    }

    fn model_name(&self) -> &str {
        &self.model
    }

    fn dimensions(&self) -> usize {
        self.dimensions
    }

    #[instrument(skip(self, texts), fields(batch_size = texts.len(), provider = "ollama", model = %self.model))]
    async fn embed_batch(&self, texts: &[String]) -> AppResult<Vec<Vec<f32>>> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }

        let url = format!("{}{}", self.base_url, EMBED_ENDPOINT);
        debug!("Sending embedding request to {}", url);

        let response = self
            .client
            .post(&url)
            .json(&EmbedRequest {
                model: &self.model,
                input: texts,
            })
            .send()
            .await
            .map_err(|e| send_error(PROVIDER, e))?;

        let response = check_status(PROVIDER, response).await?;

        let body: EmbedResponse = response
            .json()
            .await
            .map_err(|e| AppError::Llm(format!("Failed to parse Ollama response: {}", e)))?;

        self.parse_response(body, texts.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_provider_settings() {
        let provider = OllamaProvider::with_base_url("http://gpu-box:11434/", "nomic-embed-text", 768);
        assert_eq!(provider.base_url, "http://gpu-box:11434");
        assert_eq!(provider.provider_name(), "ollama");
        assert_eq!(provider.model_name(), "nomic-embed-text");
        assert_eq!(provider.dimensions(), 768);
    }

    #[test]
    fn test_request_shape() {
        let input = vec!["first".to_string(), "second".to_string()];
        let json = serde_json::to_value(EmbedRequest {
            model: "nomic-embed-text",
            input: &input,
        })
        .unwrap();
        assert_eq!(json["model"], "nomic-embed-text");
        assert_eq!(json["input"][1], "second");
    }

    #[test]
    fn test_parse_response_checks_dimensions() {
        let provider = OllamaProvider::new("nomic-embed-text", 3);

        let ok: EmbedResponse =
            serde_json::from_str(r#"{"model":"m","embeddings":[[0.1,0.2,0.3]]}"#).unwrap();
        assert_eq!(provider.parse_response(ok, 1).unwrap().len(), 1);

        let short: EmbedResponse = serde_json::from_str(r#"{"embeddings":[[0.1,0.2]]}"#).unwrap();
        assert!(matches!(
            provider.parse_response(short, 1),
            Err(AppError::DimensionMismatch { expected: 3, actual: 2 })
        ));

        let missing: EmbedResponse = serde_json::from_str(r#"{"embeddings":[]}"#).unwrap();
        assert!(provider.parse_response(missing, 2).is_err());
    }

    #[tokio::test]
    async fn test_unreachable_server_is_transient() {
        let provider = OllamaProvider::with_base_url("http://127.0.0.1:9", "nomic-embed-text", 768);
        let err = provider.embed("hello").await.unwrap_err();
        assert!(err.is_transient());
    }
}
