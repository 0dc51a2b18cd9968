//! Ask command handler.
//!
//! Answers one question in a fresh session, streaming the answer to stdout.

use super::turn::{print_sources, stream_turn};
use anyhow::Context;
use clap::Args;
use ragchat_core::config::AppConfig;
use ragchat_knowledge::ChatService;
use std::path::PathBuf;

/// Ask a single question
#[derive(Args, Debug)]
pub struct AskCommand {
    /// The question to ask
    pub question: Option<String>,

    /// Read the question from a file
    #[arg(short, long, conflicts_with = "question")]
    pub file: Option<PathBuf>,

    /// Output the full result (answer, sources, context) as JSON
    #[arg(long)]
    pub json: bool,
}

impl AskCommand {
    pub async fn execute(&self, config: &AppConfig) -> anyhow::Result<()> {
        tracing::info!("Executing ask command");

        let question = self.question()?;
        let service = super::open_service(config).await?;

        let session_id = ChatService::new_session_id();
        let handle = service.submit_question(&session_id, &question).await?;
        let answer = stream_turn(handle, !self.json).await?;

        if self.json {
            println!("{}", serde_json::to_string_pretty(&answer)?);
        } else {
            print_sources(&answer);
        }

        Ok(())
    }

    fn question(&self) -> anyhow::Result<String> {
        let question = match (&self.question, &self.file) {
            (Some(q), _) => q.clone(),
            (None, Some(path)) => std::fs::read_to_string(path)
                .with_context(|| format!("Failed to read question file {:?}", path))?,
            (None, None) => anyhow::bail!("No question provided"),
        };

        let question = question.trim().to_string();
        if question.is_empty() {
            anyhow::bail!("Question is empty");
        }
        Ok(question)
    }
}
