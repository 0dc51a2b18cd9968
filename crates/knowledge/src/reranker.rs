//! Second-stage relevance scoring of retrieved candidates.

use crate::embeddings::providers::trigram::content_words;
use crate::types::ScoredChunk;
use ragchat_core::AppResult;
use std::collections::HashSet;

/// Scores candidates against a query. Higher is more relevant.
#[async_trait::async_trait]
pub trait Reranker: Send + Sync {
    fn name(&self) -> &str;

    /// One score per candidate, in candidate order.
    async fn rerank(&self, query: &str, candidates: &[ScoredChunk]) -> AppResult<Vec<f32>>;
}

/// Fraction of the query's content words that appear in the candidate.
#[derive(Debug, Default, Clone, Copy)]
pub struct TermOverlapReranker;

#[async_trait::async_trait]
impl Reranker for TermOverlapReranker {
    fn name(&self) -> &str {
        "term-overlap"
    }

    async fn rerank(&self, query: &str, candidates: &[ScoredChunk]) -> AppResult<Vec<f32>> {
        let query_terms: HashSet<String> = content_words(query).into_iter().collect();
        if query_terms.is_empty() {
            return Ok(vec![0.0; candidates.len()]);
        }

        Ok(candidates
            .iter()
            .map(|candidate| {
                let terms: HashSet<String> = content_words(&candidate.chunk.text).into_iter().collect();
                let shared = query_terms.intersection(&terms).count();
                shared as f32 / query_terms.len() as f32
            })
            .collect())
    }
}
