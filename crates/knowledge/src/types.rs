//! Knowledge system type definitions.

use chrono::{DateTime, Utc};
use ragchat_core::{AppError, AppResult};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::path::Path;

/// A source document. Immutable once ingested.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Document {
    /// Stable identifier; all chunk ids derive from it
    pub id: String,

    /// Where the text came from (file path or caller-supplied label)
    pub source_ref: String,

    pub text: String,
}

impl Document {
    pub fn new(id: impl Into<String>, source_ref: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            source_ref: source_ref.into(),
            text: text.into(),
        }
    }

    /// Document whose id is derived from `source_ref`, so the same source
    /// always maps to the same id.
    pub fn from_source(source_ref: impl Into<String>, text: impl Into<String>) -> Self {
        let source_ref = source_ref.into();
        Self {
            id: document_id_for(&source_ref),
            source_ref,
            text: text.into(),
        }
    }

    /// Document for a file, keyed by its canonical path.
    pub fn from_path(path: &Path, text: impl Into<String>) -> AppResult<Self> {
        let canonical = path.canonicalize().map_err(|e| {
            AppError::InvalidInput(format!("Cannot resolve path {:?}: {}", path, e))
        })?;
        Ok(Self::from_source(canonical.to_string_lossy(), text))
    }
}

/// SHA-256 hex digest of a source reference.
pub fn document_id_for(source_ref: &str) -> String {
    let digest = Sha256::digest(source_ref.as_bytes());
    digest.iter().map(|b| format!("{:02x}", b)).collect()
}

/// A contiguous span of a document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Chunk {
    /// `"{document_id}:{ordinal}"`
    pub id: String,

    pub document_id: String,

    /// Source reference of the parent document
    #[serde(default)]
    pub source_ref: String,

    pub text: String,

    /// Position of the chunk within its document, from 0
    pub ordinal: u32,

    /// Character offset of the first character
    #[serde(default)]
    pub start: usize,

    /// Character offset one past the last character
    #[serde(default)]
    pub end: usize,
}

impl Chunk {
    pub fn chunk_id(document_id: &str, ordinal: u32) -> String {
        format!("{}:{}", document_id, ordinal)
    }
}

/// An embedding for one chunk (or a query when `chunk_id` is empty).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EmbeddingVector {
    pub chunk_id: String,
    pub values: Vec<f32>,
}

impl EmbeddingVector {
    pub fn new(chunk_id: impl Into<String>, values: Vec<f32>) -> Self {
        Self {
            chunk_id: chunk_id.into(),
            values,
        }
    }

    pub fn dims(&self) -> usize {
        self.values.len()
    }
}

/// A chunk and its embedding as persisted by an index.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IndexEntry {
    pub chunk: Chunk,
    pub embedding: EmbeddingVector,
}

/// Who said a conversation turn.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConversationRole {
    User,
    Assistant,
}

/// One message in a session's history.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConversationTurn {
    pub role: ConversationRole,
    pub content: String,
    pub timestamp: DateTime<Utc>,
}

impl ConversationTurn {
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: ConversationRole::User,
            content: content.into(),
            timestamp: Utc::now(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: ConversationRole::Assistant,
            content: content.into(),
            timestamp: Utc::now(),
        }
    }
}

/// A chunk with its similarity to a query.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScoredChunk {
    pub chunk: Chunk,
    pub score: f32,
}

/// Chunks retrieved for one query, most relevant first.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RetrievedContext {
    pub chunks: Vec<ScoredChunk>,
}

impl RetrievedContext {
    pub fn new(chunks: Vec<ScoredChunk>) -> Self {
        Self { chunks }
    }

    pub fn is_empty(&self) -> bool {
        self.chunks.is_empty()
    }

    pub fn len(&self) -> usize {
        self.chunks.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = &ScoredChunk> {
        self.chunks.iter()
    }

    /// Highest score in the context, if any.
    pub fn top_score(&self) -> Option<f32> {
        self.chunks.first().map(|c| c.score)
    }
}

/// The outcome of a completed turn.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnswerResult {
    pub answer: String,

    /// Chunks the answer is grounded on; always drawn from `used_context`
    pub sources: Vec<Chunk>,

    pub used_context: RetrievedContext,
}

/// Result of ingesting one document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IngestReceipt {
    pub document_id: String,
    pub source_ref: String,
    pub chunk_count: usize,
    pub bytes: u64,
}

/// Counts reported by an index.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct IndexStats {
    /// Distinct documents, when the backend can count them
    pub documents: Option<usize>,
    pub chunks: usize,
    pub dimensions: usize,
}
