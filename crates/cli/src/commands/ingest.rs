//! Ingest command handler.

use clap::Args;
use ragchat_core::config::AppConfig;
use ragchat_knowledge::{IngestOptions, ProgressReporter};
use std::path::PathBuf;
use std::sync::Arc;

/// Add files or directories to the index
#[derive(Args, Debug)]
pub struct IngestCommand {
    /// Files or directories to ingest
    #[arg(required = true)]
    pub paths: Vec<PathBuf>,

    /// Only ingest files whose path contains one of these substrings
    #[arg(long)]
    pub include: Vec<String>,

    /// Skip files whose path contains one of these substrings
    #[arg(long)]
    pub exclude: Vec<String>,

    /// Show per-file progress on stderr
    #[arg(long)]
    pub progress: bool,

    /// Output as JSON
    #[arg(long)]
    pub json: bool,
}

impl IngestCommand {
    pub async fn execute(&self, config: &AppConfig) -> anyhow::Result<()> {
        tracing::info!("Executing ingest command for {} path(s)", self.paths.len());

        let mut service = super::open_service(config).await?;
        if self.progress {
            service = service.with_progress(ProgressReporter::new(Arc::new(|event| {
                eprintln!("{}", event.format_simple());
            })));
        }

        let options = IngestOptions {
            include: self.include.clone(),
            exclude: self.exclude.clone(),
        };
        let summary = service.ingest_paths(&self.paths, &options).await;

        if self.json {
            println!("{}", serde_json::to_string_pretty(&summary)?);
        } else {
            for doc in &summary.documents {
                println!("{}  {} ({} chunks)", doc.document_id, doc.source_ref, doc.chunk_count);
            }
            for skipped in &summary.skipped {
                eprintln!("skipped {:?}: {}", skipped.path, skipped.reason);
            }
            println!(
                "Ingested {} documents ({} chunks, {} bytes) in {:.2}s",
                summary.documents.len(),
                summary.chunk_count(),
                summary.bytes(),
                summary.duration_secs
            );
        }

        if summary.documents.is_empty() && !summary.skipped.is_empty() {
            anyhow::bail!("No documents were ingested");
        }
        Ok(())
    }
}
