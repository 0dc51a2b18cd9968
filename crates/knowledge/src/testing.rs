//! Test doubles for embedding, index and generation backends.

use crate::embeddings::providers::trigram::content_words;
use crate::embeddings::EmbeddingProvider;
use crate::local_index::LocalVectorIndex;
use crate::types::{Chunk, EmbeddingVector, IndexStats, ScoredChunk};
use crate::vector_index::VectorIndexClient;
use futures::{stream, StreamExt};
use ragchat_core::config::RetrySettings;
use ragchat_core::{AppError, AppResult};
use ragchat_llm::{LlmClient, LlmRequest, LlmResponse, LlmStream, LlmStreamChunk, LlmUsage};
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Mutex;
use std::time::Duration;

/// Retry settings that keep tests fast.
pub fn quick_retry() -> RetrySettings {
    RetrySettings {
        max_retries: 2,
        base_backoff_ms: 1,
    }
}

/// Embeds text as counts over a fixed vocabulary, so similarity follows
/// shared keywords. Records every input it sees.
#[derive(Debug)]
pub struct KeywordEmbedder {
    vocabulary: Vec<String>,
    seen: Mutex<Vec<String>>,
}

impl KeywordEmbedder {
    pub fn new(vocabulary: &[&str]) -> Self {
        Self {
            vocabulary: vocabulary.iter().map(|w| w.to_string()).collect(),
            seen: Mutex::new(Vec::new()),
        }
    }

    pub fn seen(&self) -> Vec<String> {
        self.seen.lock().unwrap().clone()
    }

    fn vector(&self, text: &str) -> Vec<f32> {
        let words = content_words(text);
        self.vocabulary
            .iter()
            .map(|v| words.iter().filter(|w| *w == v).count() as f32)
            .collect()
    }
}

#[async_trait::async_trait]
impl EmbeddingProvider for KeywordEmbedder {
    fn provider_name(&self) -> &str {
        "keyword"
    }

    fn model_name(&self) -> &str {
        "keyword-test"
    }

    fn dimensions(&self) -> usize {
        self.vocabulary.len()
    }

    async fn embed_batch(&self, texts: &[String]) -> AppResult<Vec<Vec<f32>>> {
        self.seen.lock().unwrap().extend(texts.iter().cloned());
        Ok(texts.iter().map(|t| self.vector(t)).collect())
    }
}

/// Fails with `ServiceUnavailable` a set number of times before delegating.
#[derive(Debug)]
pub struct FlakyEmbedder {
    inner: KeywordEmbedder,
    failures: AtomicU32,
    calls: AtomicU32,
}

impl FlakyEmbedder {
    pub fn new(inner: KeywordEmbedder, failures: u32) -> Self {
        Self {
            inner,
            failures: AtomicU32::new(failures),
            calls: AtomicU32::new(0),
        }
    }

    pub fn calls(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait::async_trait]
impl EmbeddingProvider for FlakyEmbedder {
    fn provider_name(&self) -> &str {
        "flaky"
    }

    fn model_name(&self) -> &str {
        self.inner.model_name()
    }

    fn dimensions(&self) -> usize {
        self.inner.dimensions()
    }

    async fn embed_batch(&self, texts: &[String]) -> AppResult<Vec<Vec<f32>>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let remaining = self.failures.load(Ordering::SeqCst);
        if remaining > 0 {
            self.failures.store(remaining - 1, Ordering::SeqCst);
            return Err(AppError::ServiceUnavailable("embedding backend busy".to_string()));
        }
        self.inner.embed_batch(texts).await
    }
}

/// An index whose every call fails with the given transient error.
pub struct FailingIndex {
    pub dimensions: usize,
    pub calls: AtomicU32,
}

impl FailingIndex {
    pub fn new(dimensions: usize) -> Self {
        Self {
            dimensions,
            calls: AtomicU32::new(0),
        }
    }

    fn fail<T>(&self) -> AppResult<T> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Err(AppError::ServiceUnavailable("index offline".to_string()))
    }
}

#[async_trait::async_trait]
impl VectorIndexClient for FailingIndex {
    fn name(&self) -> &str {
        "failing"
    }

    fn dimensions(&self) -> usize {
        self.dimensions
    }

    async fn upsert(&self, _chunks: &[Chunk], _embeddings: &[EmbeddingVector]) -> AppResult<()> {
        self.fail()
    }

    async fn query(&self, _vector: &[f32], _k: usize) -> AppResult<Vec<ScoredChunk>> {
        self.fail()
    }

    async fn chunk_ids(&self, _document_id: &str) -> AppResult<Vec<String>> {
        self.fail()
    }

    async fn delete_chunks(&self, _ids: &[String]) -> AppResult<()> {
        self.fail()
    }

    async fn stats(&self) -> AppResult<IndexStats> {
        self.fail()
    }
}

/// A local index whose upserts can be switched off.
pub struct GatedIndex {
    pub inner: LocalVectorIndex,
    closed: AtomicBool,
}

impl GatedIndex {
    pub fn new(dimensions: usize) -> Self {
        Self {
            inner: LocalVectorIndex::in_memory("gated", dimensions),
            closed: AtomicBool::new(false),
        }
    }

    /// Make every later upsert fail as unavailable.
    pub fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
    }
}

#[async_trait::async_trait]
impl VectorIndexClient for GatedIndex {
    fn name(&self) -> &str {
        self.inner.name()
    }

    fn dimensions(&self) -> usize {
        self.inner.dimensions()
    }

    async fn upsert(&self, chunks: &[Chunk], embeddings: &[EmbeddingVector]) -> AppResult<()> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(AppError::ServiceUnavailable("upserts disabled".to_string()));
        }
        self.inner.upsert(chunks, embeddings).await
    }

    async fn query(&self, vector: &[f32], k: usize) -> AppResult<Vec<ScoredChunk>> {
        self.inner.query(vector, k).await
    }

    async fn chunk_ids(&self, document_id: &str) -> AppResult<Vec<String>> {
        self.inner.chunk_ids(document_id).await
    }

    async fn delete_chunks(&self, ids: &[String]) -> AppResult<()> {
        self.inner.delete_chunks(ids).await
    }

    async fn delete_document(&self, document_id: &str) -> AppResult<()> {
        self.inner.delete_document(document_id).await
    }

    async fn stats(&self) -> AppResult<IndexStats> {
        self.inner.stats().await
    }
}

/// Scripted generation backend.
///
/// `complete` answers rewrite requests; `stream` emits the scripted answer
/// token by token, whatever the prompt says.
pub struct ScriptedLlm {
    pub rewrite: AppResult<String>,
    pub tokens: Vec<String>,
    pub token_delay: Duration,
    pub start_failures: AtomicU32,
    pub fail_mid_stream: bool,
    pub requests: Mutex<Vec<LlmRequest>>,
}

impl ScriptedLlm {
    pub fn answering(tokens: &[&str]) -> Self {
        Self {
            rewrite: Ok("standalone question".to_string()),
            tokens: tokens.iter().map(|t| t.to_string()).collect(),
            token_delay: Duration::ZERO,
            start_failures: AtomicU32::new(0),
            fail_mid_stream: false,
            requests: Mutex::new(Vec::new()),
        }
    }

    pub fn with_rewrite(mut self, rewrite: AppResult<String>) -> Self {
        self.rewrite = rewrite;
        self
    }

    pub fn with_token_delay(mut self, delay: Duration) -> Self {
        self.token_delay = delay;
        self
    }

    pub fn with_start_failures(self, failures: u32) -> Self {
        self.start_failures.store(failures, Ordering::SeqCst);
        self
    }

    pub fn failing_mid_stream(mut self) -> Self {
        self.fail_mid_stream = true;
        self
    }

    pub fn requests(&self) -> Vec<LlmRequest> {
        self.requests.lock().unwrap().clone()
    }

    /// Requests sent through `stream`, i.e. answer generations.
    pub fn answer_requests(&self) -> Vec<LlmRequest> {
        self.requests().into_iter().filter(|r| r.stream).collect()
    }
}

#[async_trait::async_trait]
impl LlmClient for ScriptedLlm {
    fn provider_name(&self) -> &str {
        "scripted"
    }

    async fn complete(&self, request: &LlmRequest) -> AppResult<LlmResponse> {
        self.requests.lock().unwrap().push(request.clone());
        match &self.rewrite {
            Ok(text) => Ok(LlmResponse {
                content: text.clone(),
                model: request.model.clone(),
                usage: LlmUsage::default(),
                done: true,
            }),
            Err(_) => Err(AppError::ServiceUnavailable("rewrite backend down".to_string())),
        }
    }

    async fn stream(&self, request: &LlmRequest) -> AppResult<LlmStream> {
        let mut recorded = request.clone();
        recorded.stream = true;
        self.requests.lock().unwrap().push(recorded);

        let remaining = self.start_failures.load(Ordering::SeqCst);
        if remaining > 0 {
            self.start_failures.store(remaining - 1, Ordering::SeqCst);
            return Err(AppError::ServiceUnavailable("generation backend busy".to_string()));
        }

        let tokens = self.tokens.clone();

        let model = request.model.clone();
        let delay = self.token_delay;
        let mut items: Vec<AppResult<LlmStreamChunk>> = tokens
            .into_iter()
            .map(|content| {
                Ok(LlmStreamChunk {
                    content,
                    model: model.clone(),
                    done: false,
                    usage: None,
                })
            })
            .collect();

        if self.fail_mid_stream {
            items.insert(
                items.len().min(1),
                Err(AppError::ServiceUnavailable("connection reset".to_string())),
            );
        }

        Ok(Box::pin(stream::iter(items).then(move |item| async move {
            if !delay.is_zero() {
                tokio::time::sleep(delay).await;
            }
            item
        })))
    }
}
