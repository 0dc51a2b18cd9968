//! Generation provider implementations and shared HTTP plumbing.

pub mod ollama;
pub mod openai;

pub use ollama::OllamaClient;
pub use openai::OpenAiClient;

use futures::{stream, Stream, StreamExt};
use ragchat_core::{AppError, AppResult};
use std::collections::VecDeque;
use std::fmt::Display;

/// Map a failed `send()` to an error. Transport failures are transient.
pub fn send_error(provider: &str, err: reqwest::Error) -> AppError {
    AppError::ServiceUnavailable(format!("Failed to send request to {}: {}", provider, err))
}

/// Turn a non-success HTTP response into an error.
///
/// Rate limiting, request timeouts and 5xx are transient; other statuses are
/// permanent provider errors.
pub async fn check_status(provider: &str, response: reqwest::Response) -> AppResult<reqwest::Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    let body = response
        .text()
        .await
        .unwrap_or_else(|_| "Unknown error".to_string());

    tracing::debug!(provider, %status, body = %body, "provider returned an error status");

    let message = format!("{} API error ({}): {}", provider, status, body);
    if status.is_server_error()
        || status == reqwest::StatusCode::TOO_MANY_REQUESTS
        || status == reqwest::StatusCode::REQUEST_TIMEOUT
    {
        Err(AppError::ServiceUnavailable(message))
    } else {
        Err(AppError::Llm(message))
    }
}

/// Re-frame a byte stream into trimmed, non-empty lines.
///
/// Providers stream newline-delimited JSON (Ollama) or server-sent events
/// (OpenAI); network chunks may split a line anywhere, so bytes are buffered
/// until a newline arrives. A transport error ends the stream after being
/// yielded once.
pub fn split_lines<S, B, E>(bytes: S) -> impl Stream<Item = AppResult<String>> + Send
where
    S: Stream<Item = Result<B, E>> + Send + 'static,
    B: AsRef<[u8]> + Send,
    E: Display + Send,
{
    let bytes = Box::pin(bytes);
    stream::unfold(
        (bytes, Vec::<u8>::new(), VecDeque::<String>::new(), false),
        |(mut bytes, mut buffer, mut ready, mut finished)| async move {
            loop {
                if let Some(line) = ready.pop_front() {
                    return Some((Ok(line), (bytes, buffer, ready, finished)));
                }
                if finished {
                    return None;
                }

                match bytes.next().await {
                    Some(Ok(chunk)) => {
                        buffer.extend_from_slice(chunk.as_ref());
                        while let Some(pos) = buffer.iter().position(|b| *b == b'\n') {
                            let line: Vec<u8> = buffer.drain(..=pos).collect();
                            let text = String::from_utf8_lossy(&line).trim().to_string();
                            if !text.is_empty() {
                                ready.push_back(text);
                            }
                        }
                    }
                    Some(Err(e)) => {
                        finished = true;
                        let err = AppError::ServiceUnavailable(format!("Stream error: {}", e));
                        return Some((Err(err), (bytes, buffer, ready, finished)));
                    }
                    None => {
                        finished = true;
                        let rest = String::from_utf8_lossy(&buffer).trim().to_string();
                        buffer.clear();
                        if !rest.is_empty() {
                            ready.push_back(rest);
                        }
                    }
                }
            }
        },
    )
}
