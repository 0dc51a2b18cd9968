//! Document ingestion: parse, chunk, embed, index.

use crate::chunker::chunk_document;
use crate::embeddings::EmbeddingProvider;
use crate::parser;
use crate::progress::ProgressReporter;
use crate::retry::with_retry;
use crate::types::{Document, EmbeddingVector, IngestReceipt};
use crate::vector_index::{validate_upsert, VectorIndexClient};
use ragchat_core::config::{RagSettings, RetrySettings, TimeoutSettings};
use ragchat_core::{AppError, AppResult};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;
use walkdir::WalkDir;

const DEFAULT_EMBED_BATCH: usize = 32;

/// Path filters for directory ingestion. Patterns are plain substrings of
/// the file path.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct IngestOptions {
    #[serde(default)]
    pub include: Vec<String>,
    #[serde(default)]
    pub exclude: Vec<String>,
}

/// A file that was not ingested.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SkippedFile {
    pub path: PathBuf,
    pub reason: String,
}

/// Outcome of ingesting a set of paths.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct IngestSummary {
    pub documents: Vec<IngestReceipt>,
    pub skipped: Vec<SkippedFile>,
    pub duration_secs: f64,
}

impl IngestSummary {
    pub fn chunk_count(&self) -> usize {
        self.documents.iter().map(|d| d.chunk_count).sum()
    }

    pub fn bytes(&self) -> u64 {
        self.documents.iter().map(|d| d.bytes).sum()
    }
}

/// Turns files and text into indexed chunks.
pub struct Ingester {
    embedder: Arc<dyn EmbeddingProvider>,
    index: Arc<dyn VectorIndexClient>,
    chunk_size: usize,
    overlap: usize,
    batch_size: usize,
    timeouts: TimeoutSettings,
    retry: RetrySettings,
    progress: ProgressReporter,
}

impl Ingester {
    pub fn new(
        embedder: Arc<dyn EmbeddingProvider>,
        index: Arc<dyn VectorIndexClient>,
        chunk_size: usize,
        overlap: usize,
    ) -> Self {
        Self {
            embedder,
            index,
            chunk_size,
            overlap,
            batch_size: DEFAULT_EMBED_BATCH,
            timeouts: TimeoutSettings::default(),
            retry: RetrySettings::default(),
            progress: ProgressReporter::noop(),
        }
    }

    /// Ingester configured from validated settings.
    pub fn from_settings(
        embedder: Arc<dyn EmbeddingProvider>,
        index: Arc<dyn VectorIndexClient>,
        settings: &RagSettings,
    ) -> Self {
        Self::new(embedder, index, settings.chunk_size, settings.chunk_overlap)
            .with_timeouts(settings.timeouts)
            .with_retry(settings.retry)
    }

    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size.max(1);
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

    pub fn with_progress(mut self, progress: ProgressReporter) -> Self {
        self.progress = progress;
        self
    }

    /// Ingest one file. Re-uploading the same path replaces its chunks.
    ///
    /// # Errors
    /// `InvalidInput` for a missing, binary or empty file; embedding and
    /// index failures after retries.
    pub async fn upload_document(&self, path: &Path) -> AppResult<IngestReceipt> {
        if !path.is_file() {
            return Err(AppError::InvalidInput(format!("Not a file: {:?}", path)));
        }

        let bytes = tokio::fs::read(path).await?;
        let text = parser::parse_bytes(path, &bytes)?;
        let document = Document::from_path(path, text)?;

        self.ingest_document(&document, bytes.len() as u64).await
    }

    /// Ingest text under a caller-chosen source reference.
    pub async fn ingest_text(&self, source_ref: &str, text: &str) -> AppResult<IngestReceipt> {
        let document = Document::from_source(source_ref, text);
        self.ingest_document(&document, text.len() as u64).await
    }

    /// Chunk, embed and index a document, replacing any earlier version.
    pub async fn ingest_document(&self, document: &Document, bytes: u64) -> AppResult<IngestReceipt> {
        let chunks = chunk_document(document, self.chunk_size, self.overlap)?;
        self.progress.chunk(chunks.len() as u64, &document.source_ref);

        // Embed everything before touching the index
        let total = chunks.len() as u64;
        let mut embeddings = Vec::with_capacity(chunks.len());
        for batch in chunks.chunks(self.batch_size) {
            let texts: Vec<String> = batch.iter().map(|c| c.text.clone()).collect();
            let vectors = with_retry("embed", &self.retry, self.timeouts.embed(), || {
                self.embedder.embed_batch(&texts)
            })
            .await?;

            if vectors.len() != batch.len() {
                return Err(AppError::Knowledge(format!(
                    "Embedding provider returned {} vectors for {} chunks",
                    vectors.len(),
                    batch.len()
                )));
            }

            embeddings.extend(
                batch
                    .iter()
                    .zip(vectors)
                    .map(|(chunk, values)| EmbeddingVector::new(chunk.id.clone(), values)),
            );
            self.progress
                .embed(embeddings.len() as u64, total, self.embedder.model_name());
        }

        // Nothing touches the index until the whole batch is known good
        validate_upsert(&chunks, &embeddings, self.index.dimensions())?;

        let previous = with_retry("index list", &self.retry, self.timeouts.index(), || {
            self.index.chunk_ids(&document.id)
        })
        .await?;
        with_retry("index upsert", &self.retry, self.timeouts.index(), || {
            self.index.upsert(&chunks, &embeddings)
        })
        .await?;
        self.progress.index(total, self.index.name());

        // Chunk ids are positional, so only ordinals past the new end are stale
        let current: HashSet<&str> = chunks.iter().map(|c| c.id.as_str()).collect();
        let stale: Vec<String> = previous
            .into_iter()
            .filter(|id| !current.contains(id.as_str()))
            .collect();
        if !stale.is_empty() {
            with_retry("index delete", &self.retry, self.timeouts.index(), || {
                self.index.delete_chunks(&stale)
            })
            .await?;
            tracing::debug!(document_id = %document.id, removed = stale.len(), "Removed stale chunks");
        }

        tracing::info!(
            document_id = %document.id,
            source = %document.source_ref,
            chunks = chunks.len(),
            "Ingested document"
        );

        Ok(IngestReceipt {
            document_id: document.id.clone(),
            source_ref: document.source_ref.clone(),
            chunk_count: chunks.len(),
            bytes,
        })
    }

    /// Ingest files and directory trees. Files that fail are skipped and
    /// reported; the run continues.
    pub async fn ingest_paths(&self, paths: &[PathBuf], options: &IngestOptions) -> IngestSummary {
        let start = Instant::now();
        let mut summary = IngestSummary::default();

        let mut files = Vec::new();
        for path in paths {
            if path.is_file() {
                files.push(path.clone());
            } else if path.is_dir() {
                let before = files.len();
                files.extend(
                    WalkDir::new(path)
                        .follow_links(false)
                        .into_iter()
                        .filter_map(|e| e.ok())
                        .filter(|e| e.file_type().is_file() && should_include(e.path(), options))
                        .map(|e| e.into_path()),
                );
                self.progress
                    .discover((files.len() - before) as u64, &path.to_string_lossy());
            } else {
                tracing::warn!("Path does not exist: {:?}", path);
                summary.skipped.push(SkippedFile {
                    path: path.clone(),
                    reason: "path does not exist".to_string(),
                });
            }
        }

        let total = files.len() as u64;
        for (i, file) in files.iter().enumerate() {
            let display = file.to_string_lossy();
            self.progress.parse(i as u64 + 1, total, &display);

            match self.upload_document(file).await {
                Ok(receipt) => summary.documents.push(receipt),
                Err(e) => {
                    tracing::warn!(error = %e, "Skipping {:?}", file);
                    self.progress.skip(&display, &e.to_string());
                    summary.skipped.push(SkippedFile {
                        path: file.clone(),
                        reason: e.to_string(),
                    });
                }
            }
        }

        summary.duration_secs = start.elapsed().as_secs_f64();
        tracing::info!(
            documents = summary.documents.len(),
            chunks = summary.chunk_count(),
            skipped = summary.skipped.len(),
            "Ingestion completed in {:.2}s",
            summary.duration_secs
        );
        summary
    }
}

/// Exclude patterns win; with include patterns, at least one must match.
fn should_include(path: &Path, options: &IngestOptions) -> bool {
    let path_str = path.to_string_lossy();

    if options.exclude.iter().any(|p| path_str.contains(p.as_str())) {
        return false;
    }

    options.include.is_empty() || options.include.iter().any(|p| path_str.contains(p.as_str()))
}
