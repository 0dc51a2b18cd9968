//! OpenAI chat completions provider.
//!
//! Works against api.openai.com or any compatible endpoint. Streaming uses
//! server-sent events (`data: {...}` lines, terminated by `data: [DONE]`).

use crate::client::{LlmClient, LlmRequest, LlmResponse, LlmStream, LlmStreamChunk, LlmUsage};
use crate::providers::{check_status, send_error, split_lines};
use futures::StreamExt;
use ragchat_core::{AppError, AppResult};
use serde::{Deserialize, Serialize};

const PROVIDER: &str = "openai";
const DEFAULT_ENDPOINT: &str = "https://api.openai.com/v1";

#[derive(Debug, Serialize)]
struct ChatMessage {
    role: &'static str,
    content: String,
}

#[derive(Debug, Serialize)]
struct ChatRequest {
    model: String,
    messages: Vec<ChatMessage>,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_tokens: Option<u32>,
    stream: bool,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    model: String,
    choices: Vec<Choice>,
    #[serde(default)]
    usage: Option<Usage>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    #[serde(default)]
    message: Option<ResponseMessage>,
    #[serde(default)]
    delta: Option<ResponseMessage>,
    #[serde(default)]
    finish_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ResponseMessage {
    #[serde(default)]
    content: Option<String>,
}

#[derive(Debug, Deserialize)]
struct Usage {
    #[serde(default)]
    prompt_tokens: u32,
    #[serde(default)]
    completion_tokens: u32,
}

/// OpenAI-compatible chat client.
pub struct OpenAiClient {
    endpoint: String,
    api_key: String,
    organization: Option<String>,
    client: reqwest::Client,
}

impl OpenAiClient {
    /// Create a client for the public OpenAI API.
    pub fn new(api_key: impl Into<String>) -> Self {
        Self::with_endpoint(DEFAULT_ENDPOINT, api_key)
    }

    /// Create a client for a custom OpenAI-compatible endpoint.
    pub fn with_endpoint(endpoint: impl Into<String>, api_key: impl Into<String>) -> Self {
        Self {
            endpoint: endpoint.into().trim_end_matches('/').to_string(),
            api_key: api_key.into(),
            organization: None,
            client: reqwest::Client::new(),
        }
    }

    /// Send requests on behalf of an organization.
    pub fn with_organization(mut self, organization: impl Into<String>) -> Self {
        self.organization = Some(organization.into());
        self
    }

    fn to_chat_request(&self, request: &LlmRequest, stream: bool) -> ChatRequest {
        ChatRequest {
            model: request.model.clone(),
            messages: request
                .messages()
                .into_iter()
                .map(|m| ChatMessage {
                    role: m.role.as_str(),
                    content: m.content,
                })
                .collect(),
            temperature: request.temperature,
            max_tokens: request.max_tokens,
            stream,
        }
    }

    async fn send(&self, request: &LlmRequest, stream: bool) -> AppResult<reqwest::Response> {
        let body = self.to_chat_request(request, stream);
        let mut builder = self
            .client
            .post(format!("{}/chat/completions", self.endpoint))
            .bearer_auth(&self.api_key)
            .json(&body);

        if let Some(org) = &self.organization {
            builder = builder.header("OpenAI-Organization", org);
        }

        let response = builder.send().await.map_err(|e| send_error(PROVIDER, e))?;
        check_status(PROVIDER, response).await
    }
}

/// Parse one server-sent event line. `None` means the line carries no text
/// (comments, keep-alives, role-only deltas).
fn parse_event(line: &str, model: &str) -> Option<AppResult<LlmStreamChunk>> {
    let data = line.strip_prefix("data:")?.trim();

    if data == "[DONE]" {
        return Some(Ok(LlmStreamChunk {
            content: String::new(),
            model: model.to_string(),
            done: true,
            usage: None,
        }));
    }

    let event: ChatResponse = match serde_json::from_str(data) {
        Ok(event) => event,
        Err(e) => {
            return Some(Err(AppError::Llm(format!(
                "Failed to parse stream event: {}",
                e
            ))))
        }
    };

    let choice = event.choices.first()?;
    let content = choice
        .delta
        .as_ref()
        .and_then(|d| d.content.clone())
        .unwrap_or_default();

    if content.is_empty() && choice.finish_reason.is_none() {
        return None;
    }

    Some(Ok(LlmStreamChunk {
        content,
        model: event.model,
        done: false,
        usage: event
            .usage
            .map(|u| LlmUsage::new(u.prompt_tokens, u.completion_tokens)),
    }))
}

#[async_trait::async_trait]
impl LlmClient for OpenAiClient {
    fn provider_name(&self) -> &str {
        PROVIDER
    }

    async fn complete(&self, request: &LlmRequest) -> AppResult<LlmResponse> {
        tracing::debug!(model = %request.model, "Sending completion request to OpenAI");

        let response = self.send(request, false).await?;
        let body: ChatResponse = response
            .json()
            .await
            .map_err(|e| AppError::Llm(format!("Failed to parse OpenAI response: {}", e)))?;

        let content = body
            .choices
            .first()
            .and_then(|c| c.message.as_ref())
            .and_then(|m| m.content.clone())
            .ok_or_else(|| AppError::Llm("OpenAI response contained no choices".to_string()))?;

        let usage = body
            .usage
            .map(|u| LlmUsage::new(u.prompt_tokens, u.completion_tokens))
            .unwrap_or_default();

        Ok(LlmResponse {
            content,
            model: body.model,
            usage,
            done: true,
        })
    }

    async fn stream(&self, request: &LlmRequest) -> AppResult<LlmStream> {
        tracing::debug!(model = %request.model, "Starting streaming request to OpenAI");

        let response = self.send(request, true).await?;
        let model = request.model.clone();

        let stream = split_lines(response.bytes_stream()).filter_map(move |line| {
            let item = match line {
                Ok(line) => parse_event(&line, &model),
                Err(e) => Some(Err(e)),
            };
            futures::future::ready(item)
        });

        Ok(Box::pin(stream))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_client_creation() {
        let client = OpenAiClient::new("sk-test").with_organization("org-1");
        assert_eq!(client.provider_name(), "openai");
        assert_eq!(client.endpoint, "https://api.openai.com/v1");
        assert_eq!(client.organization.as_deref(), Some("org-1"));
    }

    #[test]
    fn test_chat_request_conversion() {
        let client = OpenAiClient::with_endpoint("http://localhost:8080/v1/", "k");
        assert_eq!(client.endpoint, "http://localhost:8080/v1");

        let request = LlmRequest::new("Question", "gpt-4o-mini")
            .with_system("Rules")
            .with_temperature(0.0);
        let chat = client.to_chat_request(&request, true);

        assert_eq!(chat.messages.len(), 2);
        assert_eq!(chat.messages[0].role, "system");
        assert_eq!(chat.messages[1].role, "user");
        assert_eq!(chat.temperature, Some(0.0));
        assert!(chat.stream);
    }

    #[test]
    fn test_parse_delta_event() {
        let line = r#"data: {"model":"gpt-4o-mini","choices":[{"delta":{"content":"Hel"}}]}"#;
        let chunk = parse_event(line, "gpt-4o-mini").unwrap().unwrap();
        assert_eq!(chunk.content, "Hel");
        assert!(!chunk.done);
    }

    #[test]
    fn test_parse_done_and_noise() {
        let done = parse_event("data: [DONE]", "m").unwrap().unwrap();
        assert!(done.done);

        assert!(parse_event(": keep-alive", "m").is_none());
        let role_only = r#"data: {"model":"m","choices":[{"delta":{"role":"assistant"}}]}"#;
        assert!(parse_event(role_only, "m").is_none());
    }

    #[test]
    fn test_parse_bad_event() {
        let result = parse_event("data: {not json", "m").unwrap();
        assert!(matches!(result, Err(AppError::Llm(_))));
    }
}
