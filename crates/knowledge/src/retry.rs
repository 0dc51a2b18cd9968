//! Bounded retry for remote calls.

use ragchat_core::config::RetrySettings;
use ragchat_core::{AppError, AppResult};
use std::future::Future;
use std::time::Duration;

/// Run `call` under a per-attempt timeout, retrying transient failures.
///
/// A timed-out attempt counts as `ServiceUnavailable`. Non-transient errors
/// are returned immediately. At most `1 + retry.max_retries` attempts are
/// made; the last error is returned when they are exhausted.
pub async fn with_retry<T, F, Fut>(
    operation: &str,
    retry: &RetrySettings,
    timeout: Duration,
    mut call: F,
) -> AppResult<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = AppResult<T>>,
{
    let mut attempt = 0u32;

    loop {
        let result = match tokio::time::timeout(timeout, call()).await {
            Ok(result) => result,
            Err(_) => Err(AppError::ServiceUnavailable(format!(
                "{} timed out after {:?}",
                operation, timeout
            ))),
        };

        match result {
            Ok(value) => return Ok(value),
            Err(err) if err.is_transient() && attempt < retry.max_retries => {
                attempt += 1;
                let backoff = retry.backoff(attempt);
                tracing::warn!(
                    operation,
                    attempt,
                    backoff_ms = backoff.as_millis() as u64,
                    error = %err,
                    "Transient failure, retrying"
                );
                tokio::time::sleep(backoff).await;
            }
            Err(err) => return Err(err),
        }
    }
}
