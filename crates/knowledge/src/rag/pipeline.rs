//! The per-turn RAG state machine.
//!
//! `Idle → Rewriting → Retrieving → Generating → Done`, with `Failed`
//! reachable from every non-terminal phase. Rewriting is skipped when the
//! session has no history and degrades to the original question on any
//! failure. Retrieval and generation failures end the turn.

use crate::rag::citations::select_sources;
use crate::retriever::Retriever;
use crate::retry::with_retry;
use crate::types::{AnswerResult, ConversationRole, ConversationTurn, RetrievedContext};
use futures::StreamExt;
use ragchat_core::config::RagSettings;
use ragchat_core::{AppError, AppResult};
use ragchat_llm::{LlmClient, LlmMessage, LlmRequest, MessageRole};
use ragchat_prompt::{build_answer_prompt, build_rewrite_prompt, ContextPassage, HistoryLine, PromptSet};
use std::fmt;
use std::sync::Arc;
use tokio::sync::mpsc;

/// Observable phase of a turn.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TurnPhase {
    Idle,
    Rewriting,
    Retrieving,
    Generating,
    Done,
    Failed,
}

impl TurnPhase {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Rewriting => "rewriting",
            Self::Retrieving => "retrieving",
            Self::Generating => "generating",
            Self::Done => "done",
            Self::Failed => "failed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Done | Self::Failed)
    }
}

impl fmt::Display for TurnPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Progress of a turn as seen by its caller.
#[derive(Debug, Clone, PartialEq)]
pub enum TurnEvent {
    Phase(TurnPhase),
    /// A fragment of the answer as it is generated
    Token(String),
}

/// Forwards phase changes and tokens to an optional sink. A closed sink is
/// ignored; the turn keeps running.
struct TurnObserver {
    events: Option<mpsc::UnboundedSender<TurnEvent>>,
    phase: TurnPhase,
}

impl TurnObserver {
    fn new(events: Option<mpsc::UnboundedSender<TurnEvent>>) -> Self {
        Self {
            events,
            phase: TurnPhase::Idle,
        }
    }

    fn enter(&mut self, phase: TurnPhase) {
        debug_assert!(!self.phase.is_terminal(), "turn already finished");
        tracing::info!(from = %self.phase, to = %phase, "Turn phase");
        self.phase = phase;
        self.send(TurnEvent::Phase(phase));
    }

    fn token(&self, token: &str) {
        self.send(TurnEvent::Token(token.to_string()));
    }

    fn send(&self, event: TurnEvent) {
        if let Some(events) = &self.events {
            let _ = events.send(event);
        }
    }
}

/// Runs single conversational turns. Holds no per-session state.
pub struct RagPipeline {
    llm: Arc<dyn LlmClient>,
    retriever: Retriever,
    prompts: PromptSet,
    settings: RagSettings,
}

impl RagPipeline {
    pub fn new(
        llm: Arc<dyn LlmClient>,
        retriever: Retriever,
        prompts: PromptSet,
        settings: RagSettings,
    ) -> Self {
        Self {
            llm,
            retriever,
            prompts,
            settings,
        }
    }

    pub fn settings(&self) -> &RagSettings {
        &self.settings
    }

    /// Answer `question` given the session's prior turns (oldest first).
    ///
    /// Only the most recent `historyTurns` turns are used. Phase changes and
    /// answer tokens go to `events` when provided.
    ///
    /// # Errors
    /// `InvalidInput` for an empty question, `RetrievalFailed` or
    /// `GenerationFailed` when the turn cannot complete.
    pub async fn run_turn(
        &self,
        question: &str,
        history: &[ConversationTurn],
        events: Option<mpsc::UnboundedSender<TurnEvent>>,
    ) -> AppResult<AnswerResult> {
        let mut observer = TurnObserver::new(events);

        let result = self.drive(question, history, &mut observer).await;
        match &result {
            Ok(answer) => {
                tracing::info!(sources = answer.sources.len(), "Turn complete");
                observer.enter(TurnPhase::Done);
            }
            Err(e) => {
                tracing::warn!(error = %e, "Turn failed");
                observer.enter(TurnPhase::Failed);
            }
        }
        result
    }

    async fn drive(
        &self,
        question: &str,
        history: &[ConversationTurn],
        observer: &mut TurnObserver,
    ) -> AppResult<AnswerResult> {
        let question = question.trim();
        if question.is_empty() {
            return Err(AppError::InvalidInput("Question is empty".to_string()));
        }

        let history = match self.settings.history_turns {
            Some(n) => &history[history.len().saturating_sub(n)..],
            None => history,
        };

        let search_query = if history.is_empty() {
            question.to_string()
        } else {
            observer.enter(TurnPhase::Rewriting);
            self.rewrite(question, history).await
        };

        observer.enter(TurnPhase::Retrieving);
        let context = self
            .retriever
            .retrieve(&search_query, self.settings.retrieval_k, self.settings.rerank_enabled)
            .await?;
        tracing::debug!(
            chunks = context.chunks.len(),
            top_score = ?context.top_score(),
            "Retrieved context"
        );

        observer.enter(TurnPhase::Generating);
        let answer = self.generate(question, history, &context, observer).await?;
        let sources = select_sources(&answer, &context);

        Ok(AnswerResult {
            answer,
            sources,
            used_context: context,
        })
    }

    /// Condense a follow-up into a standalone question. Never fails: any
    /// problem falls back to the original question.
    async fn rewrite(&self, question: &str, history: &[ConversationTurn]) -> String {
        let lines = history_lines(history);
        let prompt = match build_rewrite_prompt(&self.prompts.rewrite, &lines, question) {
            Ok(prompt) => prompt,
            Err(e) => {
                tracing::warn!(error = %e, "Failed to build rewrite prompt, using original question");
                return question.to_string();
            }
        };

        let mut request = LlmRequest::new(prompt.user, &self.settings.generation_model).with_temperature(0.0);
        if let Some(system) = prompt.system {
            request = request.with_system(system);
        }

        let response = tokio::time::timeout(self.settings.timeouts.generation(), self.llm.complete(&request)).await;
        match response {
            Ok(Ok(response)) => {
                let rewritten = response.content.trim();
                if rewritten.is_empty() {
                    tracing::warn!("Rewrite returned nothing, using original question");
                    question.to_string()
                } else {
                    tracing::debug!(original = question, rewritten, "Rewrote question");
                    rewritten.to_string()
                }
            }
            Ok(Err(e)) => {
                tracing::warn!(error = %e, "Rewrite failed, using original question");
                question.to_string()
            }
            Err(_) => {
                tracing::warn!("Rewrite timed out, using original question");
                question.to_string()
            }
        }
    }

    async fn generate(
        &self,
        question: &str,
        history: &[ConversationTurn],
        context: &RetrievedContext,
        observer: &TurnObserver,
    ) -> AppResult<String> {
        let passages: Vec<ContextPassage> = context
            .iter()
            .enumerate()
            .map(|(i, scored)| ContextPassage {
                number: i + 1,
                source: scored.chunk.source_ref.clone(),
                text: scored.chunk.text.clone(),
            })
            .collect();

        let prompt = build_answer_prompt(&self.prompts.answer, &passages, &history_lines(history), question)?;

        let mut request = LlmRequest::new(prompt.user, &self.settings.generation_model)
            .with_history(history_messages(history))
            .with_streaming();
        if let Some(system) = prompt.system {
            request = request.with_system(system);
        }

        let timeout = self.settings.timeouts.generation();
        let mut stream = with_retry("generation", &self.settings.retry, timeout, || self.llm.stream(&request))
            .await
            .map_err(|e| AppError::GenerationFailed(format!("Could not start generation: {}", e)))?;

        let consume = async {
            let mut answer = String::new();
            while let Some(item) = stream.next().await {
                let chunk = item.map_err(|e| {
                    AppError::GenerationFailed(format!("Generation stream failed: {}", e))
                })?;
                if !chunk.content.is_empty() {
                    observer.token(&chunk.content);
                    answer.push_str(&chunk.content);
                }
                if chunk.done {
                    break;
                }
            }
            Ok::<_, AppError>(answer)
        };

        let answer = tokio::time::timeout(timeout, consume)
            .await
            .map_err(|_| AppError::GenerationFailed(format!("Generation timed out after {:?}", timeout)))??;

        let answer = answer.trim().to_string();
        if answer.is_empty() {
            return Err(AppError::GenerationFailed("Model returned an empty answer".to_string()));
        }
        Ok(answer)
    }
}

fn history_lines(history: &[ConversationTurn]) -> Vec<HistoryLine> {
    history
        .iter()
        .map(|turn| HistoryLine {
            role: match turn.role {
                ConversationRole::User => "Human".to_string(),
                ConversationRole::Assistant => "Assistant".to_string(),
            },
            content: turn.content.clone(),
        })
        .collect()
}

fn history_messages(history: &[ConversationTurn]) -> Vec<LlmMessage> {
    history
        .iter()
        .map(|turn| {
            let role = match turn.role {
                ConversationRole::User => MessageRole::User,
                ConversationRole::Assistant => MessageRole::Assistant,
            };
            LlmMessage::new(role, turn.content.clone())
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::local_index::LocalVectorIndex;
    use crate::testing::{quick_retry, FailingIndex, KeywordEmbedder, ScriptedLlm};
    use crate::types::{Chunk, EmbeddingVector};
    use crate::vector_index::VectorIndexClient;
    use crate::embeddings::EmbeddingProvider;
    use ragchat_core::config::AppConfig;
    use ragchat_prompt::INSUFFICIENT_ANSWER;

    const VOCAB: &[&str] = &["eds", "ehlers", "danlos", "joint", "skin", "symptoms"];

    fn settings() -> RagSettings {
        let config = AppConfig::from_yaml_str(ragchat_core::config::DEFAULT_CONFIG_YAML).unwrap();
        let mut settings = config.rag_settings().unwrap();
        settings.retrieval_k = 2;
        settings.rerank_enabled = false;
        settings.retry = quick_retry();
        settings
    }

    async fn seeded_index(embedder: &KeywordEmbedder) -> Arc<LocalVectorIndex> {
        let texts = [
            "EDS stands for Ehlers Danlos syndromes",
            "EDS symptoms include joint hypermobility and stretchy skin",
        ];
        let chunks: Vec<Chunk> = texts
            .iter()
            .enumerate()
            .map(|(i, t)| Chunk {
                id: Chunk::chunk_id("eds", i as u32),
                document_id: "eds".to_string(),
                source_ref: "eds.md".to_string(),
                text: t.to_string(),
                ordinal: i as u32,
                start: 0,
                end: 0,
            })
            .collect();
        let vectors = embedder
            .embed_batch(&texts.iter().map(|t| t.to_string()).collect::<Vec<_>>())
            .await
            .unwrap();
        let embeddings: Vec<EmbeddingVector> = chunks
            .iter()
            .zip(vectors)
            .map(|(c, v)| EmbeddingVector::new(c.id.clone(), v))
            .collect();

        let index = LocalVectorIndex::in_memory("eds", VOCAB.len());
        index.upsert(&chunks, &embeddings).await.unwrap();
        Arc::new(index)
    }

    fn pipeline(
        llm: Arc<ScriptedLlm>,
        embedder: Arc<KeywordEmbedder>,
        index: Arc<dyn VectorIndexClient>,
    ) -> RagPipeline {
        let retriever = Retriever::new(embedder, index).with_retry(quick_retry());
        RagPipeline::new(llm, retriever, PromptSet::builtin().unwrap(), settings())
    }

    fn drain(mut rx: mpsc::UnboundedReceiver<TurnEvent>) -> Vec<TurnEvent> {
        let mut events = Vec::new();
        while let Ok(event) = rx.try_recv() {
            events.push(event);
        }
        events
    }

    fn phases(events: &[TurnEvent]) -> Vec<TurnPhase> {
        events
            .iter()
            .filter_map(|e| match e {
                TurnEvent::Phase(p) => Some(*p),
                TurnEvent::Token(_) => None,
            })
            .collect()
    }

    #[tokio::test]
    async fn test_standalone_question_skips_rewrite() {
        let embedder = Arc::new(KeywordEmbedder::new(VOCAB));
        let index = seeded_index(&embedder).await;
        let llm = Arc::new(ScriptedLlm::answering(&["EDS is ", "a group of disorders [1]."]));
        let pipeline = pipeline(llm.clone(), embedder.clone(), index);

        let (tx, rx) = mpsc::unbounded_channel();
        let result = pipeline.run_turn("What is EDS?", &[], Some(tx)).await.unwrap();

        assert_eq!(result.answer, "EDS is a group of disorders [1].");
        assert_eq!(result.sources.len(), 1);
        assert_eq!(result.sources[0].id, result.used_context.chunks[0].chunk.id);

        // No rewrite call; the query reached the embedder unchanged
        assert!(llm.requests().iter().all(|r| r.stream));
        assert_eq!(embedder.seen().last().unwrap(), "What is EDS?");

        let events = drain(rx);
        assert_eq!(
            phases(&events),
            vec![TurnPhase::Retrieving, TurnPhase::Generating, TurnPhase::Done]
        );
        let tokens: Vec<&TurnEvent> = events.iter().filter(|e| matches!(e, TurnEvent::Token(_))).collect();
        assert_eq!(tokens.len(), 2);
    }

    #[tokio::test]
    async fn test_follow_up_is_rewritten_but_prompt_keeps_original() {
        let embedder = Arc::new(KeywordEmbedder::new(VOCAB));
        let index = seeded_index(&embedder).await;
        let llm = Arc::new(
            ScriptedLlm::answering(&["Joint hypermobility [1]."])
                .with_rewrite(Ok("What are the symptoms of EDS?".to_string())),
        );
        let pipeline = pipeline(llm.clone(), embedder.clone(), index);

        let history = vec![
            ConversationTurn::user("What is EDS?"),
            ConversationTurn::assistant("EDS stands for Ehlers-Danlos syndromes [1]."),
        ];
        let result = pipeline
            .run_turn("What are its symptoms?", &history, None)
            .await
            .unwrap();

        // The rewrite prompt carried the history mentioning EDS
        let rewrite_request = &llm.requests()[0];
        assert!(!rewrite_request.stream);
        assert!(rewrite_request.prompt.contains("EDS"));
        assert!(rewrite_request.prompt.contains("What are its symptoms?"));

        // Retrieval used the standalone question
        assert!(embedder.seen().last().unwrap().contains("EDS"));

        // Generation used the original wording plus the history
        let answer_request = &llm.answer_requests()[0];
        assert!(answer_request.prompt.contains("Question: What are its symptoms?"));
        assert_eq!(answer_request.history.len(), 2);

        assert_eq!(result.sources.len(), 1);
        assert!(result.sources[0].text.contains("symptoms"));
    }

    #[tokio::test]
    async fn test_rewrite_failure_falls_back_to_question() {
        let embedder = Arc::new(KeywordEmbedder::new(VOCAB));
        let index = seeded_index(&embedder).await;
        let llm = Arc::new(
            ScriptedLlm::answering(&["Stretchy skin [2]."])
                .with_rewrite(Err(AppError::ServiceUnavailable("down".to_string()))),
        );
        let pipeline = pipeline(llm, embedder.clone(), index);

        let history = vec![ConversationTurn::user("What is EDS?"), ConversationTurn::assistant("A disorder.")];
        let result = pipeline.run_turn("EDS skin symptoms?", &history, None).await;

        assert!(result.is_ok());
        assert_eq!(embedder.seen().last().unwrap(), "EDS skin symptoms?");
    }

    #[tokio::test]
    async fn test_empty_rewrite_falls_back_to_question() {
        let embedder = Arc::new(KeywordEmbedder::new(VOCAB));
        let index = seeded_index(&embedder).await;
        let llm = Arc::new(ScriptedLlm::answering(&["ok"]).with_rewrite(Ok("   ".to_string())));
        let pipeline = pipeline(llm, embedder.clone(), index);

        let history = vec![ConversationTurn::user("hi")];
        pipeline.run_turn("EDS joint?", &history, None).await.unwrap();
        assert_eq!(embedder.seen().last().unwrap(), "EDS joint?");
    }

    #[tokio::test]
    async fn test_empty_index_prompts_for_insufficiency_answer() {
        let embedder = Arc::new(KeywordEmbedder::new(VOCAB));
        let index = Arc::new(LocalVectorIndex::in_memory("empty", VOCAB.len()));
        let llm = Arc::new(ScriptedLlm::answering(&[INSUFFICIENT_ANSWER]));
        let pipeline = pipeline(llm.clone(), embedder, index);

        let result = pipeline
            .run_turn("What is the treatment protocol?", &[], None)
            .await
            .unwrap();

        let requests = llm.answer_requests();
        assert_eq!(requests.len(), 1);
        let prompt = &requests[0].prompt;
        assert!(prompt.contains("No context passages were found"));
        assert!(prompt.contains(INSUFFICIENT_ANSWER));
        assert!(prompt.contains("What is the treatment protocol?"));

        // The model's reply is passed through untouched
        assert_eq!(result.answer, INSUFFICIENT_ANSWER);
        assert!(result.used_context.is_empty());
        assert!(result.sources.is_empty());
    }

    #[tokio::test]
    async fn test_retrieval_failure_is_fatal() {
        let embedder = Arc::new(KeywordEmbedder::new(VOCAB));
        let index = Arc::new(FailingIndex::new(VOCAB.len()));
        let llm = Arc::new(ScriptedLlm::answering(&["never"]));
        let pipeline = pipeline(llm.clone(), embedder, index);

        let (tx, rx) = mpsc::unbounded_channel();
        let result = pipeline.run_turn("What is EDS?", &[], Some(tx)).await;

        assert!(matches!(result, Err(AppError::RetrievalFailed(_))));
        assert!(llm.answer_requests().is_empty());
        assert_eq!(phases(&drain(rx)), vec![TurnPhase::Retrieving, TurnPhase::Failed]);
    }

    #[tokio::test]
    async fn test_generation_start_is_retried() {
        let embedder = Arc::new(KeywordEmbedder::new(VOCAB));
        let index = seeded_index(&embedder).await;
        let llm = Arc::new(ScriptedLlm::answering(&["EDS [1]"]).with_start_failures(2));
        let pipeline = pipeline(llm.clone(), embedder, index);

        let result = pipeline.run_turn("What is EDS?", &[], None).await.unwrap();
        assert_eq!(result.answer, "EDS [1]");
        assert_eq!(llm.answer_requests().len(), 3);
    }

    #[tokio::test]
    async fn test_generation_exhaustion_is_generation_failed() {
        let embedder = Arc::new(KeywordEmbedder::new(VOCAB));
        let index = seeded_index(&embedder).await;
        let llm = Arc::new(ScriptedLlm::answering(&["EDS [1]"]).with_start_failures(3));
        let pipeline = pipeline(llm, embedder, index);

        let result = pipeline.run_turn("What is EDS?", &[], None).await;
        assert!(matches!(result, Err(AppError::GenerationFailed(_))));
    }

    #[tokio::test]
    async fn test_mid_stream_failure_discards_partial_answer() {
        let embedder = Arc::new(KeywordEmbedder::new(VOCAB));
        let index = seeded_index(&embedder).await;
        let llm = Arc::new(ScriptedLlm::answering(&["EDS ", "is"]).failing_mid_stream());
        let pipeline = pipeline(llm.clone(), embedder, index);

        let result = pipeline.run_turn("What is EDS?", &[], None).await;
        assert!(matches!(result, Err(AppError::GenerationFailed(_))));
        // Not retried once the stream started
        assert_eq!(llm.answer_requests().len(), 1);
    }

    #[tokio::test]
    async fn test_history_window_limits_prompt_history() {
        let embedder = Arc::new(KeywordEmbedder::new(VOCAB));
        let index = seeded_index(&embedder).await;
        let llm = Arc::new(ScriptedLlm::answering(&["ok [1]"]));
        let retriever = Retriever::new(embedder, index).with_retry(quick_retry());
        let mut settings = settings();
        settings.history_turns = Some(2);
        let pipeline = RagPipeline::new(llm.clone(), retriever, PromptSet::builtin().unwrap(), settings);

        let history: Vec<ConversationTurn> = (0..6)
            .map(|i| ConversationTurn::user(format!("turn {}", i)))
            .collect();
        pipeline.run_turn("EDS?", &history, None).await.unwrap();

        let answer_request = &llm.answer_requests()[0];
        assert_eq!(answer_request.history.len(), 2);
        assert_eq!(answer_request.history[0].content, "turn 4");
    }

    #[tokio::test]
    async fn test_dropped_event_receiver_does_not_block() {
        let embedder = Arc::new(KeywordEmbedder::new(VOCAB));
        let index = seeded_index(&embedder).await;
        let llm = Arc::new(ScriptedLlm::answering(&["a", "b", "c [1]"]));
        let pipeline = pipeline(llm, embedder, index);

        let (tx, rx) = mpsc::unbounded_channel();
        drop(rx);
        let result = pipeline.run_turn("What is EDS?", &[], Some(tx)).await.unwrap();
        assert_eq!(result.answer, "abc [1]");
    }

    #[tokio::test]
    async fn test_empty_question_is_rejected() {
        let embedder = Arc::new(KeywordEmbedder::new(VOCAB));
        let index = seeded_index(&embedder).await;
        let llm = Arc::new(ScriptedLlm::answering(&["x"]));
        let pipeline = pipeline(llm, embedder, index);

        assert!(matches!(
            pipeline.run_turn("  ", &[], None).await,
            Err(AppError::InvalidInput(_))
        ));
    }
}
