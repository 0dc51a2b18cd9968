//! Delete command handler.

use clap::Args;
use ragchat_core::config::AppConfig;

/// Remove a document from the index
#[derive(Args, Debug)]
pub struct DeleteCommand {
    /// Document id, as printed by `ragchat ingest`
    pub document_id: String,
}

impl DeleteCommand {
    pub async fn execute(&self, config: &AppConfig) -> anyhow::Result<()> {
        tracing::info!(document_id = %self.document_id, "Executing delete command");

        let service = super::open_service(config).await?;
        service.delete_document(&self.document_id).await?;

        println!("Deleted {}", self.document_id);
        Ok(())
    }
}
