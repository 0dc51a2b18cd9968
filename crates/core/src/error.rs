//! Error types for ragchat.
//!
//! This module defines a unified error enum covering configuration, input
//! validation, remote service failures, index contract violations and the
//! per-turn pipeline failures surfaced to callers.

use thiserror::Error;

/// Unified error type for ragchat.
///
/// All fallible functions return `Result<T, AppError>`. Remote failures that
/// may succeed on retry are reported as [`AppError::ServiceUnavailable`];
/// callers decide whether to retry via [`AppError::is_transient`].
#[derive(Error, Debug)]
pub enum AppError {
    /// Missing or invalid configuration (fatal at startup)
    #[error("Configuration error: {0}")]
    Config(String),

    /// Bad caller input, rejected before any remote call
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Transient failure of a remote service (embedding, index, generation, rerank)
    #[error("Service unavailable: {0}")]
    ServiceUnavailable(String),

    /// Embedding dimensionality does not match the index
    #[error("Dimension mismatch: expected {expected}, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },

    /// Retrieval could not produce a context for this turn
    #[error("Retrieval failed: {0}")]
    RetrievalFailed(String),

    /// Answer generation failed for this turn
    #[error("Generation failed: {0}")]
    GenerationFailed(String),

    /// The turn was abandoned by its caller
    #[error("Turn cancelled")]
    Cancelled,

    /// I/O and filesystem errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Non-transient LLM provider errors
    #[error("LLM error: {0}")]
    Llm(String),

    /// Knowledge base and index errors
    #[error("Knowledge error: {0}")]
    Knowledge(String),

    /// Prompt system errors
    #[error("Prompt error: {0}")]
    Prompt(String),

    /// Serialization/deserialization errors
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Generic errors
    #[error("{0}")]
    Other(String),
}

impl AppError {
    /// Whether a retry of the same call may succeed.
    pub fn is_transient(&self) -> bool {
        matches!(self, AppError::ServiceUnavailable(_))
    }

    /// A message safe to show to end users.
    ///
    /// Never includes provider response bodies or internal details; those are
    /// logged where the error is raised.
    pub fn user_message(&self) -> &'static str {
        match self {
            AppError::InvalidInput(_) => "The request was invalid. Please check your input.",
            AppError::RetrievalFailed(_) => {
                "Sorry, I couldn't search the knowledge base right now. Please try again."
            }
            AppError::GenerationFailed(_) | AppError::ServiceUnavailable(_) => {
                "Sorry, I couldn't generate an answer right now. Please try again."
            }
            AppError::Cancelled => "The question was cancelled.",
            AppError::Config(_) => "The service is not configured correctly.",
            _ => "Something went wrong while answering. Please try again.",
        }
    }
}

impl From<serde_json::Error> for AppError {
    fn from(err: serde_json::Error) -> Self {
        AppError::Serialization(err.to_string())
    }
}

impl From<serde_yaml::Error> for AppError {
    fn from(err: serde_yaml::Error) -> Self {
        AppError::Serialization(err.to_string())
    }
}

/// Convenience type alias for Results with AppError.
pub type AppResult<T> = Result<T, AppError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_only_service_unavailable_is_transient() {
        assert!(AppError::ServiceUnavailable("timeout".to_string()).is_transient());
        assert!(!AppError::RetrievalFailed("x".to_string()).is_transient());
        assert!(!AppError::Llm("bad request".to_string()).is_transient());
        assert!(!AppError::Cancelled.is_transient());
    }

    #[test]
    fn test_user_message_hides_details() {
        let err = AppError::GenerationFailed("upstream 502: <html>secret</html>".to_string());
        let msg = err.user_message();
        assert!(!msg.contains("secret"));
        assert!(!msg.contains("502"));
    }

    #[test]
    fn test_dimension_mismatch_display() {
        let err = AppError::DimensionMismatch {
            expected: 384,
            actual: 768,
        };
        assert_eq!(err.to_string(), "Dimension mismatch: expected 384, got 768");
    }
}
