//! In-process vector index with an optional JSON snapshot on disk.
//!
//! Brute-force cosine search over every entry. Suitable for the document
//! collections a single workspace holds; the snapshot lets separate CLI
//! runs share one index.

use crate::types::{Chunk, EmbeddingVector, IndexEntry, IndexStats, ScoredChunk};
use crate::vector_index::{cosine_similarity, rank, validate_query, validate_upsert, VectorIndexClient};
use ragchat_core::{AppError, AppResult};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use tokio::sync::RwLock;

/// On-disk snapshot format.
#[derive(Debug, Serialize, Deserialize)]
struct Snapshot {
    name: String,
    dimensions: usize,
    entries: Vec<IndexEntry>,
}

#[derive(Debug, Default)]
struct IndexState {
    /// Entries in insertion order
    entries: Vec<IndexEntry>,
    /// Chunk id -> position in `entries`
    positions: HashMap<String, usize>,
}

impl IndexState {
    fn from_entries(entries: Vec<IndexEntry>) -> Self {
        let mut state = Self {
            entries,
            positions: HashMap::new(),
        };
        state.reindex();
        state
    }

    fn reindex(&mut self) {
        self.positions = self
            .entries
            .iter()
            .enumerate()
            .map(|(i, e)| (e.chunk.id.clone(), i))
            .collect();
    }

    fn put(&mut self, entry: IndexEntry) {
        match self.positions.get(&entry.chunk.id) {
            Some(&pos) => self.entries[pos] = entry,
            None => {
                self.positions.insert(entry.chunk.id.clone(), self.entries.len());
                self.entries.push(entry);
            }
        }
    }

    /// Drop matching entries, returning how many went.
    fn remove_where(&mut self, doomed: impl Fn(&IndexEntry) -> bool) -> usize {
        let before = self.entries.len();
        self.entries.retain(|e| !doomed(e));
        let removed = before - self.entries.len();
        if removed > 0 {
            self.reindex();
        }
        removed
    }
}

/// Local vector index.
pub struct LocalVectorIndex {
    name: String,
    dimensions: usize,
    snapshot_path: Option<PathBuf>,
    state: RwLock<IndexState>,
}

impl LocalVectorIndex {
    /// Create an empty, memory-only index.
    pub fn in_memory(name: impl Into<String>, dimensions: usize) -> Self {
        Self {
            name: name.into(),
            dimensions,
            snapshot_path: None,
            state: RwLock::new(IndexState::default()),
        }
    }

    /// Open (or create) an index persisted at `path`.
    ///
    /// # Errors
    /// `DimensionMismatch` if the snapshot was built with another
    /// dimensionality, `Knowledge` if it cannot be read.
    pub async fn open(path: &Path, name: impl Into<String>, dimensions: usize) -> AppResult<Self> {
        let name = name.into();

        let state = if tokio::fs::try_exists(path).await? {
            let contents = tokio::fs::read(path).await?;
            let snapshot: Snapshot = serde_json::from_slice(&contents).map_err(|e| {
                AppError::Knowledge(format!("Failed to read index snapshot {:?}: {}", path, e))
            })?;

            if snapshot.dimensions != dimensions {
                return Err(AppError::DimensionMismatch {
                    expected: dimensions,
                    actual: snapshot.dimensions,
                });
            }

            tracing::debug!(
                index = %name,
                entries = snapshot.entries.len(),
                "Loaded index snapshot from {:?}",
                path
            );
            IndexState::from_entries(snapshot.entries)
        } else {
            tracing::debug!(index = %name, "Creating new index at {:?}", path);
            IndexState::default()
        };

        Ok(Self {
            name,
            dimensions,
            snapshot_path: Some(path.to_path_buf()),
            state: RwLock::new(state),
        })
    }

    /// Default snapshot location for a named index inside a workspace.
    pub fn snapshot_path_for(ragchat_dir: &Path, name: &str) -> PathBuf {
        ragchat_dir.join("index").join(format!("{}.json", name))
    }

    /// Write the current state to disk. Caller holds the write lock.
    async fn persist(&self, state: &IndexState) -> AppResult<()> {
        let Some(path) = &self.snapshot_path else {
            return Ok(());
        };

        let snapshot = Snapshot {
            name: self.name.clone(),
            dimensions: self.dimensions,
            entries: state.entries.clone(),
        };
        let bytes = serde_json::to_vec(&snapshot)?;

        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }

        // Write-then-rename so readers never see a partial file
        let tmp = path.with_extension("json.tmp");
        tokio::fs::write(&tmp, bytes).await?;
        tokio::fs::rename(&tmp, path).await?;
        Ok(())
    }
}

#[async_trait::async_trait]
impl VectorIndexClient for LocalVectorIndex {
    fn name(&self) -> &str {
        &self.name
    }

    fn dimensions(&self) -> usize {
        self.dimensions
    }

    async fn upsert(&self, chunks: &[Chunk], embeddings: &[EmbeddingVector]) -> AppResult<()> {
        validate_upsert(chunks, embeddings, self.dimensions)?;

        let mut state = self.state.write().await;
        for (chunk, embedding) in chunks.iter().zip(embeddings) {
            state.put(IndexEntry {
                chunk: chunk.clone(),
                embedding: embedding.clone(),
            });
        }
        self.persist(&state).await?;

        tracing::debug!(index = %self.name, upserted = chunks.len(), "Upserted chunks");
        Ok(())
    }

    async fn query(&self, vector: &[f32], k: usize) -> AppResult<Vec<ScoredChunk>> {
        validate_query(vector, k, self.dimensions)?;

        let state = self.state.read().await;
        let scored = state
            .entries
            .iter()
            .map(|entry| ScoredChunk {
                chunk: entry.chunk.clone(),
                score: cosine_similarity(vector, &entry.embedding.values),
            })
            .collect();

        Ok(rank(scored, k))
    }

    async fn chunk_ids(&self, document_id: &str) -> AppResult<Vec<String>> {
        let state = self.state.read().await;
        Ok(state
            .entries
            .iter()
            .filter(|e| e.chunk.document_id == document_id)
            .map(|e| e.chunk.id.clone())
            .collect())
    }

    async fn delete_chunks(&self, ids: &[String]) -> AppResult<()> {
        let doomed: HashSet<&str> = ids.iter().map(String::as_str).collect();
        let mut state = self.state.write().await;
        let removed = state.remove_where(|e| doomed.contains(e.chunk.id.as_str()));

        if removed > 0 {
            self.persist(&state).await?;
        }

        tracing::debug!(index = %self.name, removed, "Deleted chunks");
        Ok(())
    }

    async fn delete_document(&self, document_id: &str) -> AppResult<()> {
        let mut state = self.state.write().await;
        let removed = state.remove_where(|e| e.chunk.document_id == document_id);

        if removed > 0 {
            self.persist(&state).await?;
        }

        tracing::debug!(index = %self.name, document_id, removed, "Deleted document");
        Ok(())
    }

    async fn stats(&self) -> AppResult<IndexStats> {
        let state = self.state.read().await;
        let documents: HashSet<&str> = state
            .entries
            .iter()
            .map(|e| e.chunk.document_id.as_str())
            .collect();

        Ok(IndexStats {
            documents: Some(documents.len()),
            chunks: state.entries.len(),
            dimensions: self.dimensions,
        })
    }
}
