//! Configuration management for ragchat.
//!
//! Configuration is merged from several sources, later ones winning:
//! - Built-in defaults
//! - The workspace config file (`.ragchat/config.yaml`)
//! - Environment variables (`RAGCHAT_*`)
//! - Command-line flags
//!
//! Required RAG settings have no defaults. [`AppConfig::validate`] enumerates
//! everything missing so the process can refuse to start before serving a
//! single question.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::{AppError, AppResult};

/// Generation providers the pipeline knows how to build.
pub const GENERATION_PROVIDERS: [&str; 2] = ["ollama", "openai"];

/// Embedding providers the pipeline knows how to build.
pub const EMBEDDING_PROVIDERS: [&str; 3] = ["trigram", "ollama", "openai"];

/// Vector index backends.
pub const INDEX_BACKENDS: [&str; 2] = ["local", "pinecone"];

/// Main application configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    /// Path to the workspace root (contains .ragchat/)
    pub workspace: PathBuf,

    /// Optional config file path
    pub config_file: Option<PathBuf>,

    /// Log level override
    pub log_level: Option<String>,

    /// Verbose mode (enables debug logging)
    pub verbose: bool,

    /// Disable colored output
    pub no_color: bool,

    /// Provider selection and per-provider settings
    pub llm: LlmSection,

    /// Retrieval and generation settings (unvalidated)
    pub rag: RagSection,

    /// Vector index backend settings
    pub index: IndexSection,
}

/// Provider selection from config.yaml.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LlmSection {
    /// Provider used for rewriting and answering
    pub active_provider: String,

    /// Provider used for embeddings
    pub active_embedding_provider: String,

    /// Provider-specific settings keyed by provider name
    #[serde(default)]
    pub providers: HashMap<String, ProviderConfig>,
}

impl Default for LlmSection {
    fn default() -> Self {
        let mut providers = HashMap::new();
        providers.insert(
            "ollama".to_string(),
            ProviderConfig::Ollama {
                endpoint: "http://localhost:11434".to_string(),
            },
        );

        Self {
            active_provider: "ollama".to_string(),
            active_embedding_provider: "ollama".to_string(),
            providers,
        }
    }
}

/// Provider-specific configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(untagged)]
pub enum ProviderConfig {
    OpenAI {
        #[serde(rename = "apiKeyEnv")]
        api_key_env: String,
        endpoint: Option<String>,
        #[serde(rename = "organizationEnv")]
        organization_env: Option<String>,
    },
    Ollama {
        endpoint: String,
    },
}

/// RAG settings as they appear in config.yaml. Every field is optional here;
/// [`AppConfig::rag_settings`] turns this into a validated [`RagSettings`].
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RagSection {
    pub embedding_model: Option<String>,
    pub embedding_dimensions: Option<usize>,
    pub generation_model: Option<String>,
    pub vector_index_name: Option<String>,
    pub chunk_size: Option<usize>,
    pub chunk_overlap: Option<usize>,
    pub retrieval_k: Option<usize>,
    pub rerank_enabled: Option<bool>,
    pub history_turns: Option<usize>,
    pub min_score: Option<f32>,
    #[serde(default)]
    pub timeouts: TimeoutSettings,
    #[serde(default)]
    pub retry: RetrySettings,
}

/// Per-call timeouts for remote operations, in seconds.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase", default)]
pub struct TimeoutSettings {
    pub embed_secs: u64,
    pub index_secs: u64,
    pub rerank_secs: u64,
    pub generation_secs: u64,
}

impl Default for TimeoutSettings {
    fn default() -> Self {
        Self {
            embed_secs: 10,
            index_secs: 10,
            rerank_secs: 10,
            generation_secs: 30,
        }
    }
}

impl TimeoutSettings {
    pub fn embed(&self) -> Duration {
        Duration::from_secs(self.embed_secs)
    }

    pub fn index(&self) -> Duration {
        Duration::from_secs(self.index_secs)
    }

    pub fn rerank(&self) -> Duration {
        Duration::from_secs(self.rerank_secs)
    }

    pub fn generation(&self) -> Duration {
        Duration::from_secs(self.generation_secs)
    }
}

/// Bounded retry with exponential backoff for transient remote failures.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase", default)]
pub struct RetrySettings {
    /// Retries after the first attempt
    pub max_retries: u32,

    /// Backoff before the first retry; doubles on every further retry
    pub base_backoff_ms: u64,
}

impl Default for RetrySettings {
    fn default() -> Self {
        Self {
            max_retries: 2,
            base_backoff_ms: 500,
        }
    }
}

impl RetrySettings {
    /// Backoff before retry number `retry` (1-based).
    pub fn backoff(&self, retry: u32) -> Duration {
        let factor = 2_u64.saturating_pow(retry.saturating_sub(1));
        Duration::from_millis(self.base_backoff_ms.saturating_mul(factor))
    }
}

/// Validated RAG settings. Only constructed through [`AppConfig::rag_settings`].
#[derive(Debug, Clone, PartialEq)]
pub struct RagSettings {
    pub embedding_model: String,
    pub embedding_dimensions: usize,
    pub generation_model: String,
    pub vector_index_name: String,
    pub chunk_size: usize,
    pub chunk_overlap: usize,
    pub retrieval_k: usize,
    pub rerank_enabled: bool,
    /// Turns of history fed to prompts; `None` means unbounded
    pub history_turns: Option<usize>,
    pub min_score: f32,
    pub timeouts: TimeoutSettings,
    pub retry: RetrySettings,
}

/// Vector index backend settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IndexSection {
    /// "local" (file snapshot in the workspace) or "pinecone"
    #[serde(default = "default_backend")]
    pub backend: String,

    /// Environment variable holding the Pinecone index host URL
    #[serde(default = "default_host_env")]
    pub host_env: String,

    /// Environment variable holding the Pinecone API key
    #[serde(default = "default_index_api_key_env")]
    pub api_key_env: String,

    /// Optional Pinecone namespace
    pub namespace: Option<String>,
}

fn default_backend() -> String {
    "local".to_string()
}

fn default_host_env() -> String {
    "PINECONE_HOST".to_string()
}

fn default_index_api_key_env() -> String {
    "PINECONE_API_KEY".to_string()
}

impl Default for IndexSection {
    fn default() -> Self {
        Self {
            backend: default_backend(),
            host_env: default_host_env(),
            api_key_env: default_index_api_key_env(),
            namespace: None,
        }
    }
}

/// Full configuration file structure.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct ConfigFile {
    llm: Option<LlmSection>,
    rag: Option<RagSection>,
    index: Option<IndexSection>,
    workspace: Option<WorkspaceConfig>,
    logging: Option<LoggingConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct WorkspaceConfig {
    path: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct LoggingConfig {
    level: Option<String>,
    color: Option<bool>,
}

/// Starter config written by `ragchat init`.
pub const DEFAULT_CONFIG_YAML: &str = r#"llm:
  activeProvider: ollama
  activeEmbeddingProvider: ollama
  providers:
    ollama:
      endpoint: http://localhost:11434
    openai:
      apiKeyEnv: OPENAI_API_KEY

rag:
  embeddingModel: nomic-embed-text
  embeddingDimensions: 768
  generationModel: llama3.2
  vectorIndexName: default
  chunkSize: 1000
  chunkOverlap: 200
  retrievalK: 4
  rerankEnabled: false
  historyTurns: 10
  timeouts:
    embedSecs: 10
    indexSecs: 10
    rerankSecs: 10
    generationSecs: 30
  retry:
    maxRetries: 2
    baseBackoffMs: 500

index:
  backend: local

logging:
  level: info
  color: true
"#;

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            workspace: std::env::current_dir().unwrap_or_else(|_| PathBuf::from(".")),
            config_file: None,
            log_level: None,
            verbose: false,
            no_color: false,
            llm: LlmSection::default(),
            rag: RagSection::default(),
            index: IndexSection::default(),
        }
    }
}

impl AppConfig {
    /// Load configuration from environment variables, the config file and defaults.
    ///
    /// Environment variables:
    /// - `RAGCHAT_WORKSPACE`: Override workspace path
    /// - `RAGCHAT_CONFIG`: Path to config file
    /// - `RAGCHAT_PROVIDER`: Generation provider
    /// - `RAGCHAT_EMBEDDING_PROVIDER`: Embedding provider
    /// - `RAGCHAT_GENERATION_MODEL`: Generation model
    /// - `RAGCHAT_EMBEDDING_MODEL`: Embedding model
    /// - `RAGCHAT_INDEX_NAME`: Vector index name
    /// - `RUST_LOG`: Log level
    /// - `NO_COLOR`: Disable colored output
    pub fn load() -> AppResult<Self> {
        Self::load_from(None, None)
    }

    /// Like [`AppConfig::load`], with the workspace and config file chosen
    /// on the command line taking precedence over the environment.
    pub fn load_from(workspace: Option<PathBuf>, config_file: Option<PathBuf>) -> AppResult<Self> {
        let mut config = Self::default();

        if let Some(workspace) = workspace.or_else(|| std::env::var("RAGCHAT_WORKSPACE").ok().map(PathBuf::from)) {
            config.workspace = workspace;
        }

        if let Some(config_file) = config_file.or_else(|| std::env::var("RAGCHAT_CONFIG").ok().map(PathBuf::from)) {
            config.config_file = Some(config_file);
        }

        if !config.workspace.exists() {
            return Err(AppError::Config(format!(
                "Workspace directory does not exist: {:?}",
                config.workspace
            )));
        }

        let config_path = config
            .config_file
            .clone()
            .unwrap_or_else(|| config.config_path());

        if config_path.exists() {
            config = config.merge_yaml(&config_path)?;
        }

        config.apply_env();

        Ok(config)
    }

    /// Environment variables override YAML config.
    fn apply_env(&mut self) {
        if let Ok(provider) = std::env::var("RAGCHAT_PROVIDER") {
            self.llm.active_provider = provider;
        }

        if let Ok(provider) = std::env::var("RAGCHAT_EMBEDDING_PROVIDER") {
            self.llm.active_embedding_provider = provider;
        }

        if let Ok(model) = std::env::var("RAGCHAT_GENERATION_MODEL") {
            self.rag.generation_model = Some(model);
        }

        if let Ok(model) = std::env::var("RAGCHAT_EMBEDDING_MODEL") {
            self.rag.embedding_model = Some(model);
        }

        if let Ok(name) = std::env::var("RAGCHAT_INDEX_NAME") {
            self.rag.vector_index_name = Some(name);
        }

        if let Ok(level) = std::env::var("RUST_LOG") {
            self.log_level = Some(level);
        }

        if std::env::var("NO_COLOR").is_ok() {
            self.no_color = true;
        }
    }

    /// Build a configuration from YAML text layered over the defaults.
    ///
    /// No environment variables are read.
    pub fn from_yaml_str(contents: &str) -> AppResult<Self> {
        Self::default()
            .merge_yaml_str(contents)
            .map_err(|e| AppError::Config(format!("Failed to parse config: {}", e)))
    }

    /// Merge a YAML configuration file into this config.
    fn merge_yaml(&self, path: &Path) -> AppResult<Self> {
        let contents = std::fs::read_to_string(path).map_err(|e| {
            AppError::Config(format!("Failed to read config file {:?}: {}", path, e))
        })?;

        self.merge_yaml_str(&contents)
            .map_err(|e| AppError::Config(format!("Failed to parse config file {:?}: {}", path, e)))
    }

    fn merge_yaml_str(&self, contents: &str) -> Result<Self, serde_yaml::Error> {
        let config_file: ConfigFile = serde_yaml::from_str(contents)?;

        let mut result = self.clone();

        if let Some(ws) = config_file.workspace {
            if let Some(path) = ws.path {
                result.workspace = PathBuf::from(path);
            }
        }

        if let Some(logging) = config_file.logging {
            if let Some(level) = logging.level {
                result.log_level = Some(level);
            }
            if let Some(color) = logging.color {
                result.no_color = !color;
            }
        }

        if let Some(llm) = config_file.llm {
            result.llm = llm;
        }

        if let Some(rag) = config_file.rag {
            result.rag = rag;
        }

        if let Some(index) = config_file.index {
            result.index = index;
        }

        Ok(result)
    }

    /// Apply CLI overrides to the configuration.
    ///
    /// CLI flags take precedence over environment variables and the config file.
    #[allow(clippy::too_many_arguments)]
    pub fn with_overrides(
        mut self,
        workspace: Option<PathBuf>,
        config_file: Option<PathBuf>,
        provider: Option<String>,
        model: Option<String>,
        log_level: Option<String>,
        verbose: bool,
        no_color: bool,
    ) -> Self {
        if let Some(workspace) = workspace {
            self.workspace = workspace;
        }

        if let Some(config_file) = config_file {
            self.config_file = Some(config_file);
        }

        if let Some(provider) = provider {
            self.llm.active_provider = provider;
        }

        if let Some(model) = model {
            self.rag.generation_model = Some(model);
        }

        if let Some(log_level) = log_level {
            self.log_level = Some(log_level);
        }

        if verbose {
            self.verbose = true;
            if self.log_level.is_none() {
                self.log_level = Some("debug".to_string());
            }
        }

        if no_color {
            self.no_color = true;
        }

        self
    }

    /// Get the path to the .ragchat directory.
    pub fn ragchat_dir(&self) -> PathBuf {
        self.workspace.join(".ragchat")
    }

    /// Default config file location inside the workspace.
    pub fn config_path(&self) -> PathBuf {
        self.ragchat_dir().join("config.yaml")
    }

    /// Ensure the .ragchat directory exists.
    pub fn ensure_ragchat_dir(&self) -> AppResult<()> {
        let dir = self.ragchat_dir();
        if !dir.exists() {
            std::fs::create_dir_all(&dir).map_err(|e| {
                AppError::Config(format!("Failed to create .ragchat directory: {}", e))
            })?;
        }
        Ok(())
    }

    /// Write the starter config file. Refuses to overwrite unless `force`.
    pub fn write_default_config(&self, force: bool) -> AppResult<PathBuf> {
        self.ensure_ragchat_dir()?;
        let path = self.config_path();
        if path.exists() && !force {
            return Err(AppError::Config(format!(
                "Config file already exists: {:?} (use --force to overwrite)",
                path
            )));
        }
        std::fs::write(&path, DEFAULT_CONFIG_YAML)?;
        Ok(path)
    }

    /// Get a provider's configuration.
    pub fn get_provider_config(&self, provider: &str) -> Option<&ProviderConfig> {
        self.llm.providers.get(provider)
    }

    /// Endpoint override for a provider, if configured.
    pub fn provider_endpoint(&self, provider: &str) -> Option<&str> {
        match self.get_provider_config(provider)? {
            ProviderConfig::OpenAI { endpoint, .. } => endpoint.as_deref(),
            ProviderConfig::Ollama { endpoint } => Some(endpoint.as_str()),
        }
    }

    /// Resolve a provider's API key from its configured environment variable.
    pub fn resolve_api_key(&self, provider: &str) -> Option<String> {
        match self.get_provider_config(provider)? {
            ProviderConfig::OpenAI { api_key_env, .. } => std::env::var(api_key_env).ok(),
            ProviderConfig::Ollama { .. } => None,
        }
    }

    /// Resolve a provider's organization id, if one is configured.
    pub fn resolve_organization(&self, provider: &str) -> Option<String> {
        match self.get_provider_config(provider)? {
            ProviderConfig::OpenAI {
                organization_env: Some(var),
                ..
            } => std::env::var(var).ok().filter(|v| !v.is_empty()),
            _ => None,
        }
    }

    /// Resolve the Pinecone host and API key.
    pub fn resolve_index_credentials(&self) -> AppResult<(String, String)> {
        let host = std::env::var(&self.index.host_env).map_err(|_| {
            AppError::Config(format!(
                "Index host not found in environment variable: {}",
                self.index.host_env
            ))
        })?;
        let key = std::env::var(&self.index.api_key_env).map_err(|_| {
            AppError::Config(format!(
                "Index API key not found in environment variable: {}",
                self.index.api_key_env
            ))
        })?;
        Ok((host, key))
    }

    /// Resolve and validate the RAG settings.
    ///
    /// Every missing required key is reported at once.
    pub fn rag_settings(&self) -> AppResult<RagSettings> {
        let rag = &self.rag;
        let mut missing = Vec::new();

        if rag.embedding_model.as_deref().map_or(true, str::is_empty) {
            missing.push("rag.embeddingModel");
        }
        if rag.embedding_dimensions.is_none() {
            missing.push("rag.embeddingDimensions");
        }
        if rag.generation_model.as_deref().map_or(true, str::is_empty) {
            missing.push("rag.generationModel");
        }
        if rag.vector_index_name.as_deref().map_or(true, str::is_empty) {
            missing.push("rag.vectorIndexName");
        }
        if rag.chunk_size.is_none() {
            missing.push("rag.chunkSize");
        }
        if rag.chunk_overlap.is_none() {
            missing.push("rag.chunkOverlap");
        }
        if rag.retrieval_k.is_none() {
            missing.push("rag.retrievalK");
        }
        if rag.rerank_enabled.is_none() {
            missing.push("rag.rerankEnabled");
        }

        if !missing.is_empty() {
            return Err(AppError::Config(format!(
                "Missing required configuration: {}. Run 'ragchat init' to create a starter config.",
                missing.join(", ")
            )));
        }

        let settings = RagSettings {
            embedding_model: rag.embedding_model.clone().unwrap_or_default(),
            embedding_dimensions: rag.embedding_dimensions.unwrap_or_default(),
            generation_model: rag.generation_model.clone().unwrap_or_default(),
            vector_index_name: rag.vector_index_name.clone().unwrap_or_default(),
            chunk_size: rag.chunk_size.unwrap_or_default(),
            chunk_overlap: rag.chunk_overlap.unwrap_or_default(),
            retrieval_k: rag.retrieval_k.unwrap_or_default(),
            rerank_enabled: rag.rerank_enabled.unwrap_or_default(),
            history_turns: rag.history_turns,
            min_score: rag.min_score.unwrap_or(0.0),
            timeouts: rag.timeouts,
            retry: rag.retry,
        };

        if settings.embedding_dimensions == 0 {
            return Err(AppError::Config(
                "rag.embeddingDimensions must be greater than 0".to_string(),
            ));
        }
        if settings.chunk_size == 0 {
            return Err(AppError::Config(
                "rag.chunkSize must be greater than 0".to_string(),
            ));
        }
        if settings.chunk_overlap >= settings.chunk_size {
            return Err(AppError::Config(format!(
                "rag.chunkOverlap ({}) must be smaller than rag.chunkSize ({})",
                settings.chunk_overlap, settings.chunk_size
            )));
        }
        if settings.retrieval_k == 0 {
            return Err(AppError::Config(
                "rag.retrievalK must be greater than 0".to_string(),
            ));
        }

        Ok(settings)
    }

    /// Validate the whole configuration, including provider credentials.
    ///
    /// Returns the resolved RAG settings on success.
    pub fn validate(&self) -> AppResult<RagSettings> {
        let generation = self.llm.active_provider.as_str();
        if !GENERATION_PROVIDERS.contains(&generation) {
            return Err(AppError::Config(format!(
                "Unknown provider: {}. Supported: {}",
                generation,
                GENERATION_PROVIDERS.join(", ")
            )));
        }

        let embedding = self.llm.active_embedding_provider.as_str();
        if !EMBEDDING_PROVIDERS.contains(&embedding) {
            return Err(AppError::Config(format!(
                "Unknown embedding provider: {}. Supported: {}",
                embedding,
                EMBEDDING_PROVIDERS.join(", ")
            )));
        }

        for provider in [generation, embedding] {
            self.validate_credentials(provider)?;
        }

        match self.index.backend.as_str() {
            "local" => {}
            "pinecone" => {
                self.resolve_index_credentials()?;
            }
            other => {
                return Err(AppError::Config(format!(
                    "Unknown index backend: {}. Supported: {}",
                    other,
                    INDEX_BACKENDS.join(", ")
                )));
            }
        }

        self.rag_settings()
    }

    fn validate_credentials(&self, provider: &str) -> AppResult<()> {
        if provider != "openai" {
            return Ok(());
        }

        match self.get_provider_config(provider) {
            Some(ProviderConfig::OpenAI { api_key_env, .. }) => {
                if std::env::var(api_key_env).is_err() {
                    return Err(AppError::Config(format!(
                        "API key not found in environment variable: {}",
                        api_key_env
                    )));
                }
                Ok(())
            }
            _ => Err(AppError::Config(
                "Provider 'openai' requires an 'apiKeyEnv' entry under llm.providers.openai"
                    .to_string(),
            )),
        }
    }
}
