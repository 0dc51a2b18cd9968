//! Streaming a turn to the terminal.

use ragchat_core::{AppError, AppResult};
use ragchat_knowledge::{AnswerResult, TurnEvent, TurnHandle};
use std::io::Write;

/// Print answer tokens as they arrive until the turn ends or Ctrl-C is
/// pressed, which cancels it.
pub(crate) async fn stream_turn(mut handle: TurnHandle, echo: bool) -> AppResult<AnswerResult> {
    let mut printed = false;

    let interrupted = loop {
        tokio::select! {
            event = handle.next_event() => match event {
                Some(TurnEvent::Token(token)) => {
                    if echo {
                        print!("{}", token);
                        std::io::stdout().flush().ok();
                        printed = true;
                    }
                }
                Some(TurnEvent::Phase(phase)) => tracing::debug!(%phase, "Turn phase"),
                None => break false,
            },
            _ = tokio::signal::ctrl_c() => break true,
        }
    };

    if interrupted {
        handle.cancel();
    }

    let result = handle.wait().await;
    if printed {
        println!();
    }

    match &result {
        Err(AppError::Cancelled) => eprintln!("[cancelled]"),
        Err(e) => {
            if printed {
                eprintln!("[partial answer discarded]");
            }
            eprintln!("{}", e.user_message());
        }
        Ok(_) => {}
    }

    result
}

/// Print the sources of an answer, numbered as in the prompt context.
pub(crate) fn print_sources(answer: &AnswerResult) {
    if answer.sources.is_empty() {
        return;
    }

    println!("\nSources:");
    for source in &answer.sources {
        let number = answer
            .used_context
            .chunks
            .iter()
            .position(|c| c.chunk.id == source.id)
            .map(|i| i + 1)
            .unwrap_or_default();
        println!("  [{}] {} (chunk {})", number, source.source_ref, source.ordinal);
    }
}
