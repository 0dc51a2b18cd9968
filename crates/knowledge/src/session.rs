//! Per-session turn runners.
//!
//! Each session is a tokio task that owns its [`ConversationState`] and
//! runs one turn at a time. Callers talk to it through a command channel;
//! the registry only holds the senders.
//!
//! A turn is cancelled by [`TurnHandle::cancel`], by dropping the handle,
//! or by a newer question on the same session. Cancelling drops the turn
//! future, which aborts its outstanding remote calls, and leaves the
//! history untouched.

use crate::conversation::ConversationState;
use crate::rag::{RagPipeline, TurnEvent};
use crate::types::{AnswerResult, ConversationTurn};
use ragchat_core::{AppError, AppResult};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot, Mutex};
use tracing::Instrument;

const COMMAND_BUFFER: usize = 16;

/// A question waiting to be answered.
pub struct AskCommand {
    pub question: String,
    pub events: mpsc::UnboundedSender<TurnEvent>,
    pub reply: oneshot::Sender<AppResult<AnswerResult>>,
    /// Resolves when the caller cancels or drops its handle
    pub cancel: oneshot::Receiver<()>,
}

/// Messages accepted by a session task.
pub enum SessionCommand {
    Ask(AskCommand),
    History {
        reply: oneshot::Sender<Vec<ConversationTurn>>,
    },
}

/// Caller's side of one in-flight turn.
pub struct TurnHandle {
    session_id: String,
    events: mpsc::UnboundedReceiver<TurnEvent>,
    result: oneshot::Receiver<AppResult<AnswerResult>>,
    cancel: Option<oneshot::Sender<()>>,
}

impl TurnHandle {
    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    /// Abandon the turn. Its result will be `Cancelled`.
    pub fn cancel(&mut self) {
        if let Some(cancel) = self.cancel.take() {
            let _ = cancel.send(());
        }
    }

    /// Next phase change or answer token; `None` once the turn has ended.
    pub async fn next_event(&mut self) -> Option<TurnEvent> {
        self.events.recv().await
    }

    /// Wait for the final result, ignoring any events not yet read.
    pub async fn wait(self) -> AppResult<AnswerResult> {
        let TurnHandle { result, cancel, .. } = self;
        // Dropping the sender would cancel the turn
        let _cancel = cancel;
        result.await.unwrap_or(Err(AppError::Cancelled))
    }
}

/// Spawn a session task and return its command sender.
pub fn spawn_session(session_id: &str, pipeline: Arc<RagPipeline>) -> mpsc::Sender<SessionCommand> {
    let (tx, rx) = mpsc::channel(COMMAND_BUFFER);
    let state = ConversationState::new(session_id);
    let span = tracing::info_span!("session", session_id = %session_id);
    tokio::spawn(run_session(state, pipeline, rx).instrument(span));
    tx
}

async fn run_session(
    mut state: ConversationState,
    pipeline: Arc<RagPipeline>,
    mut commands: mpsc::Receiver<SessionCommand>,
) {
    tracing::debug!("Session started");
    let mut pending: Option<AskCommand> = None;
    let mut closed = false;

    loop {
        let ask = match pending.take() {
            Some(ask) => ask,
            None if closed => break,
            None => match commands.recv().await {
                Some(SessionCommand::Ask(ask)) => ask,
                Some(SessionCommand::History { reply }) => {
                    let _ = reply.send(state.history(None).to_vec());
                    continue;
                }
                None => break,
            },
        };

        let AskCommand {
            question,
            events,
            reply,
            mut cancel,
        } = ask;

        let history = state.history(None).to_vec();
        let outcome = {
            let turn = pipeline
                .run_turn(&question, &history, Some(events))
                .instrument(tracing::info_span!("turn", turn = history.len() / 2 + 1));
            tokio::pin!(turn);

            loop {
                tokio::select! {
                    result = &mut turn => break Some(result),
                    _ = &mut cancel => break None,
                    command = commands.recv(), if !closed => match command {
                        Some(SessionCommand::Ask(next)) => {
                            tracing::info!("Newer question supersedes the running turn");
                            pending = Some(next);
                            break None;
                        }
                        Some(SessionCommand::History { reply }) => {
                            let _ = reply.send(history.clone());
                        }
                        None => closed = true,
                    },
                }
            }
        };

        match outcome {
            Some(Ok(answer)) => {
                state.append(ConversationTurn::user(question));
                state.append(ConversationTurn::assistant(answer.answer.clone()));
                let _ = reply.send(Ok(answer));
            }
            Some(Err(e)) => {
                let _ = reply.send(Err(e));
            }
            None => {
                tracing::info!("Turn cancelled");
                let _ = reply.send(Err(AppError::Cancelled));
            }
        }
    }

    tracing::debug!(turns = state.len(), "Session ended");
}

/// Maps session ids to their running tasks.
pub struct SessionRegistry {
    pipeline: Arc<RagPipeline>,
    sessions: Mutex<HashMap<String, mpsc::Sender<SessionCommand>>>,
}

impl SessionRegistry {
    pub fn new(pipeline: Arc<RagPipeline>) -> Self {
        Self {
            pipeline,
            sessions: Mutex::new(HashMap::new()),
        }
    }

    async fn sender_for(&self, session_id: &str) -> mpsc::Sender<SessionCommand> {
        let mut sessions = self.sessions.lock().await;
        match sessions.get(session_id) {
            Some(sender) if !sender.is_closed() => sender.clone(),
            _ => {
                let sender = spawn_session(session_id, self.pipeline.clone());
                sessions.insert(session_id.to_string(), sender.clone());
                sender
            }
        }
    }

    /// Queue a question on a session, starting the session if needed.
    ///
    /// A turn already running on the session is cancelled.
    pub async fn submit_question(&self, session_id: &str, question: &str) -> AppResult<TurnHandle> {
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let (reply_tx, reply_rx) = oneshot::channel();
        let (cancel_tx, cancel_rx) = oneshot::channel();

        let command = SessionCommand::Ask(AskCommand {
            question: question.to_string(),
            events: events_tx,
            reply: reply_tx,
            cancel: cancel_rx,
        });

        self.sender_for(session_id)
            .await
            .send(command)
            .await
            .map_err(|_| AppError::Other(format!("Session {} is closed", session_id)))?;

        Ok(TurnHandle {
            session_id: session_id.to_string(),
            events: events_rx,
            result: reply_rx,
            cancel: Some(cancel_tx),
        })
    }

    /// Completed turns of a session, oldest first. Unknown sessions are empty.
    pub async fn history(&self, session_id: &str) -> AppResult<Vec<ConversationTurn>> {
        let sender = {
            let sessions = self.sessions.lock().await;
            match sessions.get(session_id) {
                Some(sender) => sender.clone(),
                None => return Ok(Vec::new()),
            }
        };

        let (reply_tx, reply_rx) = oneshot::channel();
        sender
            .send(SessionCommand::History { reply: reply_tx })
            .await
            .map_err(|_| AppError::Other(format!("Session {} is closed", session_id)))?;
        reply_rx
            .await
            .map_err(|_| AppError::Other(format!("Session {} is closed", session_id)))
    }

    /// Stop a session once its current turn finishes.
    pub async fn close_session(&self, session_id: &str) -> bool {
        self.sessions.lock().await.remove(session_id).is_some()
    }

    pub async fn session_count(&self) -> usize {
        self.sessions.lock().await.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embeddings::EmbeddingProvider;
    use crate::local_index::LocalVectorIndex;
    use crate::rag::TurnPhase;
    use crate::retriever::Retriever;
    use crate::testing::{quick_retry, KeywordEmbedder, ScriptedLlm};
    use crate::types::{Chunk, ConversationRole, EmbeddingVector};
    use crate::vector_index::VectorIndexClient;
    use ragchat_core::config::AppConfig;
    use ragchat_prompt::PromptSet;
    use std::time::Duration;

    const VOCAB: &[&str] = &["eds", "joint", "skin"];

    async fn registry(llm: ScriptedLlm) -> SessionRegistry {
        let embedder = Arc::new(KeywordEmbedder::new(VOCAB));
        let index = LocalVectorIndex::in_memory("s", VOCAB.len());
        let text = "EDS affects joint and skin";
        let chunk = Chunk {
            id: Chunk::chunk_id("eds", 0),
            document_id: "eds".to_string(),
            source_ref: "eds.md".to_string(),
            text: text.to_string(),
            ordinal: 0,
            start: 0,
            end: 0,
        };
        let vector = embedder.embed(text).await.unwrap();
        index
            .upsert(&[chunk.clone()], &[EmbeddingVector::new(chunk.id.clone(), vector)])
            .await
            .unwrap();

        let config = AppConfig::from_yaml_str(ragchat_core::config::DEFAULT_CONFIG_YAML).unwrap();
        let mut settings = config.rag_settings().unwrap();
        settings.retry = quick_retry();

        let retriever = Retriever::new(embedder, Arc::new(index)).with_retry(quick_retry());
        let pipeline = RagPipeline::new(Arc::new(llm), retriever, PromptSet::builtin().unwrap(), settings);
        SessionRegistry::new(Arc::new(pipeline))
    }

    fn slow_llm() -> ScriptedLlm {
        let tokens: Vec<String> = (0..40).map(|i| format!("t{} ", i)).collect();
        let refs: Vec<&str> = tokens.iter().map(String::as_str).collect();
        ScriptedLlm::answering(&refs).with_token_delay(Duration::from_millis(25))
    }

    async fn wait_for_phase(handle: &mut TurnHandle, phase: TurnPhase) {
        while let Some(event) = handle.next_event().await {
            if event == TurnEvent::Phase(phase) {
                return;
            }
        }
        panic!("turn ended before reaching {:?}", phase);
    }

    #[tokio::test]
    async fn test_turns_append_to_history() {
        let registry = registry(ScriptedLlm::answering(&["EDS affects joints [1]."])).await;

        let first = registry.submit_question("s1", "What is EDS?").await.unwrap();
        first.wait().await.unwrap();
        let second = registry.submit_question("s1", "And the skin?").await.unwrap();
        second.wait().await.unwrap();

        let history = registry.history("s1").await.unwrap();
        assert_eq!(history.len(), 4);
        assert_eq!(history[0].role, ConversationRole::User);
        assert_eq!(history[0].content, "What is EDS?");
        assert_eq!(history[1].role, ConversationRole::Assistant);
        assert_eq!(history[2].content, "And the skin?");

        // Sessions are isolated
        assert!(registry.history("s2").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_cancel_mid_generation_leaves_history_unchanged() {
        let registry = registry(slow_llm()).await;

        let mut handle = registry.submit_question("s1", "What is EDS?").await.unwrap();
        wait_for_phase(&mut handle, TurnPhase::Generating).await;
        // Let a few tokens through first
        assert!(matches!(handle.next_event().await, Some(TurnEvent::Token(_))));
        handle.cancel();

        assert!(matches!(handle.wait().await, Err(AppError::Cancelled)));
        assert!(registry.history("s1").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_newer_question_supersedes_running_turn() {
        let registry = registry(slow_llm()).await;

        let mut first = registry.submit_question("s1", "What is EDS?").await.unwrap();
        wait_for_phase(&mut first, TurnPhase::Generating).await;
        let second = registry.submit_question("s1", "Joint problems?").await.unwrap();

        assert!(matches!(first.wait().await, Err(AppError::Cancelled)));
        second.wait().await.unwrap();

        let history = registry.history("s1").await.unwrap();
        assert_eq!(history.len(), 2);
        assert_eq!(history[0].content, "Joint problems?");
    }

    #[tokio::test]
    async fn test_dropped_handle_cancels_turn() {
        let registry = registry(slow_llm()).await;

        let mut handle = registry.submit_question("s1", "What is EDS?").await.unwrap();
        wait_for_phase(&mut handle, TurnPhase::Generating).await;
        drop(handle);

        // The session is still usable and only sees the abandoned turn's absence
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(registry.history("s1").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_close_session() {
        let registry = registry(ScriptedLlm::answering(&["ok [1]"])).await;
        registry.submit_question("s1", "EDS?").await.unwrap().wait().await.unwrap();
        assert_eq!(registry.session_count().await, 1);

        assert!(registry.close_session("s1").await);
        assert!(!registry.close_session("s1").await);
        assert!(registry.history("s1").await.unwrap().is_empty());
    }
}
