//! Vector index abstraction for knowledge chunks.
//!
//! Defines a trait for provider-agnostic vector storage and retrieval plus
//! the contract checks every backend shares.

use crate::types::{Chunk, EmbeddingVector, IndexStats, ScoredChunk};
use ragchat_core::{AppError, AppResult};
use std::cmp::Ordering;

/// Trait for vector index backends.
///
/// Implementations must:
/// - Validate a whole upsert before writing any of it
/// - Treat chunk ids as keys (last write wins)
/// - Return query results by descending cosine similarity, ties in
///   insertion order, at most `k` of them
/// - Report remote failures as `ServiceUnavailable`, never as empty results
#[async_trait::async_trait]
pub trait VectorIndexClient: Send + Sync {
    /// Index name, for logs and stats.
    fn name(&self) -> &str;

    /// Dimensionality every stored embedding must have.
    fn dimensions(&self) -> usize;

    /// Insert or replace chunks with their embeddings, paired by position.
    async fn upsert(&self, chunks: &[Chunk], embeddings: &[EmbeddingVector]) -> AppResult<()>;

    /// Search for the `k` most similar chunks.
    async fn query(&self, vector: &[f32], k: usize) -> AppResult<Vec<ScoredChunk>>;

    /// Ids of every chunk stored for a document.
    async fn chunk_ids(&self, document_id: &str) -> AppResult<Vec<String>>;

    /// Remove chunks by id. Unknown ids are ignored.
    async fn delete_chunks(&self, ids: &[String]) -> AppResult<()>;

    /// Remove every chunk of a document.
    async fn delete_document(&self, document_id: &str) -> AppResult<()> {
        let ids = self.chunk_ids(document_id).await?;
        if ids.is_empty() {
            return Ok(());
        }
        self.delete_chunks(&ids).await
    }

    /// Get statistics about the index.
    async fn stats(&self) -> AppResult<IndexStats>;
}

/// Check an upsert batch against the index contract.
pub fn validate_upsert(
    chunks: &[Chunk],
    embeddings: &[EmbeddingVector],
    dimensions: usize,
) -> AppResult<()> {
    if chunks.len() != embeddings.len() {
        return Err(AppError::InvalidInput(format!(
            "Got {} chunks but {} embeddings",
            chunks.len(),
            embeddings.len()
        )));
    }

    for (chunk, embedding) in chunks.iter().zip(embeddings) {
        if embedding.dims() != dimensions {
            return Err(AppError::DimensionMismatch {
                expected: dimensions,
                actual: embedding.dims(),
            });
        }
        if embedding.chunk_id != chunk.id {
            return Err(AppError::InvalidInput(format!(
                "Embedding for '{}' paired with chunk '{}'",
                embedding.chunk_id, chunk.id
            )));
        }
    }

    Ok(())
}

/// Check query arguments against the index contract.
pub fn validate_query(vector: &[f32], k: usize, dimensions: usize) -> AppResult<()> {
    if k == 0 {
        return Err(AppError::InvalidInput("k must be greater than 0".to_string()));
    }
    if vector.len() != dimensions {
        return Err(AppError::DimensionMismatch {
            expected: dimensions,
            actual: vector.len(),
        });
    }
    Ok(())
}

/// Cosine similarity; 0.0 when either vector has zero length.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    let mut dot = 0.0f32;
    let mut norm_a = 0.0f32;
    let mut norm_b = 0.0f32;
    for (x, y) in a.iter().zip(b) {
        dot += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }

    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }
    dot / (norm_a.sqrt() * norm_b.sqrt())
}

/// Sort by descending score, keeping the existing order for ties, and keep `k`.
pub fn rank(mut results: Vec<ScoredChunk>, k: usize) -> Vec<ScoredChunk> {
    results.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(Ordering::Equal));
    results.truncate(k);
    results
}
