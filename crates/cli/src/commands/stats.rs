//! Stats command handler.

use clap::Args;
use ragchat_core::config::AppConfig;

/// Show index statistics
#[derive(Args, Debug)]
pub struct StatsCommand {
    /// Output as JSON
    #[arg(long)]
    pub json: bool,
}

impl StatsCommand {
    pub async fn execute(&self, config: &AppConfig) -> anyhow::Result<()> {
        tracing::info!("Executing stats command");

        let service = super::open_service(config).await?;
        let stats = service.stats().await?;
        let settings = service.settings();

        if self.json {
            let output = serde_json::json!({
                "index": settings.vector_index_name,
                "backend": config.index.backend,
                "documents": stats.documents,
                "chunks": stats.chunks,
                "dimensions": stats.dimensions,
                "embeddingModel": settings.embedding_model,
                "generationModel": settings.generation_model,
            });
            println!("{}", serde_json::to_string_pretty(&output)?);
        } else {
            println!("Index:       {} ({})", settings.vector_index_name, config.index.backend);
            match stats.documents {
                Some(documents) => println!("Documents:   {}", documents),
                None => println!("Documents:   unknown"),
            }
            println!("Chunks:      {}", stats.chunks);
            println!("Dimensions:  {}", stats.dimensions);
            println!("Embeddings:  {}", settings.embedding_model);
            println!("Generation:  {}", settings.generation_model);
        }

        Ok(())
    }
}
