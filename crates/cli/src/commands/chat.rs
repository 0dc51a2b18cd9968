//! Interactive chat command.
//!
//! Reads questions from stdin and keeps one session for the whole run, so
//! follow-ups are understood in context. Ctrl-C cancels the answer being
//! generated; at the prompt it exits.

use super::turn::{print_sources, stream_turn};
use clap::Args;
use ragchat_core::config::AppConfig;
use ragchat_core::AppError;
use ragchat_knowledge::{ChatService, ConversationRole};
use std::io::Write;
use tokio::io::{AsyncBufReadExt, BufReader};

/// Interactive multi-turn chat
#[derive(Args, Debug)]
pub struct ChatCommand {
    /// Hide the sources printed after each answer
    #[arg(long)]
    pub no_sources: bool,
}

impl ChatCommand {
    pub async fn execute(&self, config: &AppConfig) -> anyhow::Result<()> {
        tracing::info!("Executing chat command");

        let service = super::open_service(config).await?;
        let mut session_id = ChatService::new_session_id();
        tracing::debug!(session_id = %session_id, "Chat session started");

        eprintln!("Ask a question. Commands: /history, /new, /exit");
        let mut lines = BufReader::new(tokio::io::stdin()).lines();

        loop {
            eprint!("> ");
            std::io::stderr().flush().ok();

            let line = tokio::select! {
                line = lines.next_line() => line?,
                _ = tokio::signal::ctrl_c() => None,
            };
            let Some(line) = line else {
                break;
            };

            match line.trim() {
                "" => continue,
                "/exit" | "/quit" => break,
                "/new" => {
                    service.close_session(&session_id).await;
                    session_id = ChatService::new_session_id();
                    eprintln!("Started a new conversation.");
                    continue;
                }
                "/history" => {
                    for turn in service.history(&session_id).await? {
                        let who = match turn.role {
                            ConversationRole::User => "you",
                            ConversationRole::Assistant => "ragchat",
                        };
                        println!("{}: {}", who, turn.content);
                    }
                    continue;
                }
                question => {
                    let handle = service.submit_question(&session_id, question).await?;
                    match stream_turn(handle, true).await {
                        Ok(answer) if !self.no_sources => print_sources(&answer),
                        Ok(_) => {}
                        // Turn errors were already reported; keep chatting
                        Err(AppError::Cancelled) => {}
                        Err(e) => tracing::debug!(error = %e, "Turn failed"),
                    }
                }
            }
        }

        service.close_session(&session_id).await;
        Ok(())
    }
}
