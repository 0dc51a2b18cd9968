//! Query-time retrieval: embed, search, optionally rerank.

use crate::embeddings::EmbeddingProvider;
use crate::reranker::{Reranker, TermOverlapReranker};
use crate::retry::with_retry;
use crate::types::{RetrievedContext, ScoredChunk};
use crate::vector_index::VectorIndexClient;
use ragchat_core::config::{RetrySettings, TimeoutSettings};
use ragchat_core::{AppError, AppResult};
use std::cmp::Ordering;
use std::sync::Arc;
use tracing::instrument;

/// Candidate pool multiplier when reranking.
const RERANK_POOL_FACTOR: usize = 3;

/// Finds the chunks most relevant to a query.
pub struct Retriever {
    embedder: Arc<dyn EmbeddingProvider>,
    index: Arc<dyn VectorIndexClient>,
    reranker: Arc<dyn Reranker>,
    timeouts: TimeoutSettings,
    retry: RetrySettings,
    min_score: f32,
}

impl Retriever {
    pub fn new(embedder: Arc<dyn EmbeddingProvider>, index: Arc<dyn VectorIndexClient>) -> Self {
        Self {
            embedder,
            index,
            reranker: Arc::new(TermOverlapReranker),
            timeouts: TimeoutSettings::default(),
            retry: RetrySettings::default(),
            min_score: 0.0,
        }
    }

    pub fn with_reranker(mut self, reranker: Arc<dyn Reranker>) -> Self {
        self.reranker = reranker;
        self
    }

    pub fn with_timeouts(mut self, timeouts: TimeoutSettings) -> Self {
        self.timeouts = timeouts;
        self
    }

    pub fn with_retry(mut self, retry: RetrySettings) -> Self {
        self.retry = retry;
        self
    }

    /// Drop chunks scoring below `min_score`. 0.0 disables the floor.
    pub fn with_min_score(mut self, min_score: f32) -> Self {
        self.min_score = min_score;
        self
    }

    /// Retrieve up to `k` chunks for `query`, most relevant first.
    ///
    /// # Errors
    /// `InvalidInput` for an empty query or `k == 0`; `RetrievalFailed` when
    /// the embedding or index call fails for good.
    #[instrument(skip(self, query), fields(index = %self.index.name()))]
    pub async fn retrieve(&self, query: &str, k: usize, rerank: bool) -> AppResult<RetrievedContext> {
        if k == 0 {
            return Err(AppError::InvalidInput("k must be greater than 0".to_string()));
        }
        if query.trim().is_empty() {
            return Err(AppError::InvalidInput("Query is empty".to_string()));
        }

        let vector = with_retry("embed", &self.retry, self.timeouts.embed(), || {
            self.embedder.embed(query)
        })
        .await
        .map_err(|e| retrieval_failed("embedding", e))?;

        let pool_size = if rerank { k.max(k * RERANK_POOL_FACTOR) } else { k };
        let candidates = with_retry("index query", &self.retry, self.timeouts.index(), || {
            self.index.query(&vector, pool_size)
        })
        .await
        .map_err(|e| retrieval_failed("index query", e))?;

        let mut chunks = if rerank && !candidates.is_empty() {
            self.rerank(query, candidates, k).await
        } else {
            let mut candidates = candidates;
            candidates.truncate(k);
            candidates
        };

        if self.min_score > 0.0 {
            let before = chunks.len();
            chunks.retain(|c| c.score >= self.min_score);
            if chunks.len() < before {
                tracing::debug!(
                    dropped = before - chunks.len(),
                    min_score = self.min_score,
                    "Dropped chunks below relevance floor"
                );
            }
        }

        tracing::debug!(retrieved = chunks.len(), pool_size, rerank, "Retrieved context");
        Ok(RetrievedContext::new(chunks))
    }

    /// Reorder by reranker score, keeping vector order for ties. Each kept
    /// chunk's `score` becomes its reranker score, so the relevance floor
    /// applies to it. Falls back to the vector order when the reranker fails.
    async fn rerank(&self, query: &str, mut candidates: Vec<ScoredChunk>, k: usize) -> Vec<ScoredChunk> {
        let scores = match tokio::time::timeout(
            self.timeouts.rerank(),
            self.reranker.rerank(query, &candidates),
        )
        .await
        {
            Ok(Ok(scores)) if scores.len() == candidates.len() => Some(scores),
            Ok(Ok(scores)) => {
                tracing::warn!(
                    reranker = self.reranker.name(),
                    expected = candidates.len(),
                    got = scores.len(),
                    "Reranker returned the wrong number of scores, keeping vector order"
                );
                None
            }
            Ok(Err(e)) => {
                tracing::warn!(reranker = self.reranker.name(), error = %e, "Reranking failed, keeping vector order");
                None
            }
            Err(_) => {
                tracing::warn!(reranker = self.reranker.name(), "Reranking timed out, keeping vector order");
                None
            }
        };

        if let Some(scores) = scores {
            candidates = scores
                .into_iter()
                .zip(candidates)
                .map(|(score, c)| ScoredChunk { chunk: c.chunk, score })
                .collect();
            candidates.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(Ordering::Equal));
        }

        candidates.truncate(k);
        candidates
    }
}

fn retrieval_failed(stage: &str, err: AppError) -> AppError {
    tracing::error!(stage, error = %err, "Retrieval failed");
    AppError::RetrievalFailed(format!("{} failed: {}", stage, err))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::local_index::LocalVectorIndex;
    use crate::testing::{quick_retry, FailingIndex, FlakyEmbedder, KeywordEmbedder};
    use crate::types::{Chunk, EmbeddingVector};
    use std::sync::atomic::Ordering as AtomicOrdering;

    const VOCAB: &[&str] = &["eds", "joint", "skin", "treatment", "banana"];

    fn chunk(ordinal: u32, text: &str) -> Chunk {
        Chunk {
            id: Chunk::chunk_id("doc", ordinal),
            document_id: "doc".to_string(),
            source_ref: "eds.md".to_string(),
            text: text.to_string(),
            ordinal,
            start: 0,
            end: 0,
        }
    }

    async fn index_with(texts: &[&str]) -> Arc<LocalVectorIndex> {
        let embedder = KeywordEmbedder::new(VOCAB);
        let index = LocalVectorIndex::in_memory("test", VOCAB.len());
        let chunks: Vec<Chunk> = texts
            .iter()
            .enumerate()
            .map(|(i, t)| chunk(i as u32, t))
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
        index.upsert(&chunks, &embeddings).await.unwrap();
        Arc::new(index)
    }

    struct BrokenReranker;

    #[async_trait::async_trait]
    impl Reranker for BrokenReranker {
        fn name(&self) -> &str {
            "broken"
        }

        async fn rerank(&self, _query: &str, _candidates: &[ScoredChunk]) -> AppResult<Vec<f32>> {
            Err(AppError::ServiceUnavailable("reranker offline".to_string()))
        }
    }

    /// Prefers candidates later in the pool.
    struct ReverseReranker;

    #[async_trait::async_trait]
    impl Reranker for ReverseReranker {
        fn name(&self) -> &str {
            "reverse"
        }

        async fn rerank(&self, _query: &str, candidates: &[ScoredChunk]) -> AppResult<Vec<f32>> {
            Ok((0..candidates.len()).map(|i| i as f32).collect())
        }
    }

    #[tokio::test]
    async fn test_empty_index_gives_empty_context() {
        let retriever = Retriever::new(
            Arc::new(KeywordEmbedder::new(VOCAB)),
            Arc::new(LocalVectorIndex::in_memory("empty", VOCAB.len())),
        );

        let context = retriever.retrieve("What is EDS?", 4, true).await.unwrap();
        assert!(context.is_empty());
    }

    #[tokio::test]
    async fn test_retrieves_most_similar_first() {
        let index = index_with(&["banana bread", "EDS joint pain", "EDS skin"]).await;
        let retriever = Retriever::new(Arc::new(KeywordEmbedder::new(VOCAB)), index);

        let context = retriever.retrieve("EDS joint", 2, false).await.unwrap();
        assert_eq!(context.len(), 2);
        assert_eq!(context.chunks[0].chunk.text, "EDS joint pain");
        assert_eq!(context.chunks[1].chunk.text, "EDS skin");
    }

    #[tokio::test]
    async fn test_rerank_reorders_and_truncates() {
        let index = index_with(&["EDS joint", "EDS skin", "EDS treatment", "banana"]).await;
        let retriever = Retriever::new(Arc::new(KeywordEmbedder::new(VOCAB)), index)
            .with_reranker(Arc::new(ReverseReranker));

        let plain = retriever.retrieve("EDS", 2, false).await.unwrap();
        let reranked = retriever.retrieve("EDS", 2, true).await.unwrap();

        assert_eq!(reranked.len(), 2);
        // Pool is 6 wide, so the tail of the vector order wins
        assert_eq!(reranked.chunks[0].chunk.text, "banana");
        assert_ne!(plain.chunks[0].chunk.id, reranked.chunks[0].chunk.id);
    }

    #[tokio::test]
    async fn test_reranked_context_carries_reranker_scores() {
        let index = index_with(&["EDS joint", "EDS skin", "EDS treatment", "banana"]).await;
        let retriever = Retriever::new(Arc::new(KeywordEmbedder::new(VOCAB)), index)
            .with_reranker(Arc::new(ReverseReranker));

        let context = retriever.retrieve("EDS", 3, true).await.unwrap();
        let scores: Vec<f32> = context.chunks.iter().map(|c| c.score).collect();

        // Four candidates, reverse reranker scores them 0..=3
        assert_eq!(scores, vec![3.0, 2.0, 1.0]);
        assert_eq!(context.top_score(), Some(3.0));
    }

    #[tokio::test]
    async fn test_min_score_applies_to_reranker_scores() {
        let index = index_with(&["EDS joint", "EDS skin", "EDS treatment", "banana"]).await;
        let retriever = Retriever::new(Arc::new(KeywordEmbedder::new(VOCAB)), index)
            .with_reranker(Arc::new(ReverseReranker))
            .with_min_score(2.0);

        let context = retriever.retrieve("EDS", 4, true).await.unwrap();
        let texts: Vec<&str> = context.chunks.iter().map(|c| c.chunk.text.as_str()).collect();
        assert_eq!(texts, vec!["banana", "EDS treatment"]);
    }

    #[tokio::test]
    async fn test_reranker_failure_degrades_to_vector_order() {
        let index = index_with(&["EDS joint", "EDS skin", "banana"]).await;
        let retriever = Retriever::new(Arc::new(KeywordEmbedder::new(VOCAB)), index)
            .with_reranker(Arc::new(BrokenReranker));

        let context = retriever.retrieve("EDS joint", 2, true).await.unwrap();
        assert_eq!(context.len(), 2);
        assert_eq!(context.chunks[0].chunk.text, "EDS joint");
    }

    #[tokio::test]
    async fn test_embedding_recovers_after_two_failures() {
        let index = index_with(&["EDS joint"]).await;
        let embedder = Arc::new(FlakyEmbedder::new(KeywordEmbedder::new(VOCAB), 2));
        let retriever = Retriever::new(embedder.clone(), index).with_retry(quick_retry());

        let context = retriever.retrieve("EDS", 1, false).await.unwrap();
        assert_eq!(context.len(), 1);
        assert_eq!(embedder.calls(), 3);
    }

    #[tokio::test]
    async fn test_third_consecutive_failure_is_retrieval_failed() {
        let index = index_with(&["EDS joint"]).await;
        let embedder = Arc::new(FlakyEmbedder::new(KeywordEmbedder::new(VOCAB), 3));
        let retriever = Retriever::new(embedder.clone(), index).with_retry(quick_retry());

        let result = retriever.retrieve("EDS", 1, false).await;
        assert!(matches!(result, Err(AppError::RetrievalFailed(_))));
        assert_eq!(embedder.calls(), 3);
    }

    #[tokio::test]
    async fn test_index_outage_is_retrieval_failed() {
        let index = Arc::new(FailingIndex::new(VOCAB.len()));
        let retriever = Retriever::new(Arc::new(KeywordEmbedder::new(VOCAB)), index.clone())
            .with_retry(quick_retry());

        let result = retriever.retrieve("EDS", 3, false).await;
        assert!(matches!(result, Err(AppError::RetrievalFailed(_))));
        assert_eq!(index.calls.load(AtomicOrdering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_min_score_floor() {
        let index = index_with(&["EDS joint", "banana"]).await;
        let retriever = Retriever::new(Arc::new(KeywordEmbedder::new(VOCAB)), index).with_min_score(0.5);

        let context = retriever.retrieve("EDS joint", 5, false).await.unwrap();
        assert_eq!(context.len(), 1);
        assert_eq!(context.chunks[0].chunk.text, "EDS joint");
    }

    #[tokio::test]
    async fn test_invalid_arguments() {
        let retriever = Retriever::new(
            Arc::new(KeywordEmbedder::new(VOCAB)),
            Arc::new(LocalVectorIndex::in_memory("empty", VOCAB.len())),
        );
        assert!(matches!(
            retriever.retrieve("EDS", 0, false).await,
            Err(AppError::InvalidInput(_))
        ));
        assert!(matches!(
            retriever.retrieve("   ", 3, false).await,
            Err(AppError::InvalidInput(_))
        ));
    }
}
