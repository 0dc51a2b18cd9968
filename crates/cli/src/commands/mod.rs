//! Command handlers for the ragchat CLI.
//!
//! This module organizes all CLI commands into separate submodules.

pub mod ask;
pub mod chat;
pub mod delete;
pub mod ingest;
pub mod init;
pub mod stats;
mod turn;

pub use ask::AskCommand;
pub use chat::ChatCommand;
pub use delete::DeleteCommand;
pub use ingest::IngestCommand;
pub use init::InitCommand;
pub use stats::StatsCommand;

use anyhow::Context;
use ragchat_core::config::AppConfig;
use ragchat_knowledge::ChatService;

/// Validate the configuration and build the service; refuses to start on
/// any configuration problem.
pub(crate) async fn open_service(config: &AppConfig) -> anyhow::Result<ChatService> {
    ChatService::from_config(config)
        .await
        .context("Cannot start ragchat; run 'ragchat init' to create a starter config")
}
