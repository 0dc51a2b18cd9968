//! Application-facing entry point wiring the knowledge components together.

use crate::embeddings::{create_provider, EmbeddingConfig, EmbeddingProvider};
use crate::ingest::{IngestOptions, IngestSummary, Ingester};
use crate::local_index::LocalVectorIndex;
use crate::pinecone_index::PineconeIndex;
use crate::progress::ProgressReporter;
use crate::rag::RagPipeline;
use crate::retriever::Retriever;
use crate::session::{SessionRegistry, TurnHandle};
use crate::types::{ConversationTurn, IndexStats, IngestReceipt};
use crate::vector_index::VectorIndexClient;
use ragchat_core::config::RagSettings;
use ragchat_core::{AppConfig, AppError, AppResult};
use ragchat_llm::{create_client, LlmClient};
use ragchat_prompt::PromptSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Question answering and document management over one index.
pub struct ChatService {
    index: Arc<dyn VectorIndexClient>,
    ingester: Ingester,
    sessions: SessionRegistry,
    settings: RagSettings,
}

impl ChatService {
    /// Assemble a service from already-built components.
    pub fn new(
        embedder: Arc<dyn EmbeddingProvider>,
        index: Arc<dyn VectorIndexClient>,
        llm: Arc<dyn LlmClient>,
        prompts: PromptSet,
        settings: RagSettings,
    ) -> AppResult<Self> {
        if embedder.dimensions() != index.dimensions() {
            return Err(AppError::DimensionMismatch {
                expected: index.dimensions(),
                actual: embedder.dimensions(),
            });
        }

        let retriever = Retriever::new(embedder.clone(), index.clone())
            .with_timeouts(settings.timeouts)
            .with_retry(settings.retry)
            .with_min_score(settings.min_score);
        let pipeline = RagPipeline::new(llm, retriever, prompts, settings.clone());
        let ingester = Ingester::from_settings(embedder, index.clone(), &settings);

        Ok(Self {
            index,
            ingester,
            sessions: SessionRegistry::new(Arc::new(pipeline)),
            settings,
        })
    }

    /// Build every component from configuration.
    ///
    /// # Errors
    /// `Config` for invalid settings or missing credentials; index and prompt
    /// errors while opening the workspace.
    pub async fn from_config(config: &AppConfig) -> AppResult<Self> {
        let settings = config.validate()?;

        let embedder = create_provider(&EmbeddingConfig::from_app_config(config, &settings))?;
        let index = open_index(config, &settings).await?;

        let provider = config.llm.active_provider.as_str();
        let api_key = config.resolve_api_key(provider);
        let organization = config.resolve_organization(provider);
        let llm = create_client(
            provider,
            config.provider_endpoint(provider),
            api_key.as_deref(),
            organization.as_deref(),
        )?;

        let prompts = PromptSet::load(&config.workspace)?;

        tracing::info!(
            generation = provider,
            embedding = embedder.provider_name(),
            index = index.name(),
            "Chat service ready"
        );

        Self::new(embedder, index, llm, prompts, settings)
    }

    /// Report ingestion progress through `progress`.
    pub fn with_progress(mut self, progress: ProgressReporter) -> Self {
        self.ingester = self.ingester.with_progress(progress);
        self
    }

    pub fn settings(&self) -> &RagSettings {
        &self.settings
    }

    /// A fresh random session id.
    pub fn new_session_id() -> String {
        uuid::Uuid::new_v4().to_string()
    }

    /// Start a turn on `session_id`. A turn already running there is
    /// cancelled.
    pub async fn submit_question(&self, session_id: &str, question: &str) -> AppResult<TurnHandle> {
        if question.trim().is_empty() {
            return Err(AppError::InvalidInput("Question is empty".to_string()));
        }
        self.sessions.submit_question(session_id, question).await
    }

    pub async fn history(&self, session_id: &str) -> AppResult<Vec<ConversationTurn>> {
        self.sessions.history(session_id).await
    }

    pub async fn close_session(&self, session_id: &str) -> bool {
        self.sessions.close_session(session_id).await
    }

    pub async fn upload_document(&self, path: &Path) -> AppResult<IngestReceipt> {
        self.ingester.upload_document(path).await
    }

    pub async fn ingest_paths(&self, paths: &[PathBuf], options: &IngestOptions) -> IngestSummary {
        self.ingester.ingest_paths(paths, options).await
    }

    pub async fn ingest_text(&self, source_ref: &str, text: &str) -> AppResult<IngestReceipt> {
        self.ingester.ingest_text(source_ref, text).await
    }

    pub async fn delete_document(&self, document_id: &str) -> AppResult<()> {
        if document_id.trim().is_empty() {
            return Err(AppError::InvalidInput("Document id is empty".to_string()));
        }
        self.index.delete_document(document_id).await
    }

    pub async fn stats(&self) -> AppResult<IndexStats> {
        self.index.stats().await
    }
}

async fn open_index(config: &AppConfig, settings: &RagSettings) -> AppResult<Arc<dyn VectorIndexClient>> {
    let name = settings.vector_index_name.as_str();
    let dimensions = settings.embedding_dimensions;

    match config.index.backend.as_str() {
        "local" => {
            let path = LocalVectorIndex::snapshot_path_for(&config.ragchat_dir(), name);
            Ok(Arc::new(LocalVectorIndex::open(&path, name, dimensions).await?))
        }
        "pinecone" => {
            let (host, api_key) = config.resolve_index_credentials()?;
            Ok(Arc::new(
                PineconeIndex::new(name, &host, api_key, dimensions)
                    .with_namespace(config.index.namespace.clone()),
            ))
        }
        other => Err(AppError::Config(format!("Unknown index backend: {}", other))),
    }
}
