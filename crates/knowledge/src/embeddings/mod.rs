//! Embedding providers.
//!
//! Turns chunk and query text into vectors through a provider-agnostic
//! trait. Providers are chosen by `llm.activeEmbeddingProvider`.

pub mod config;
pub mod provider;
pub mod providers;

pub use config::EmbeddingConfig;
pub use provider::{create_provider, EmbeddingProvider};
