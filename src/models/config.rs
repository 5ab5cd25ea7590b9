use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use super::search::OutputFormat;
use crate::error::{ConfigError, EngineError};

pub const DEFAULT_EMBEDDING_URL: &str = "https://api.openai.com/v1";
pub const DEFAULT_EMBEDDING_MODEL: &str = "text-embedding-3-small";
pub const DEFAULT_EMBEDDING_DIMENSION: u32 = 1536;
pub const DEFAULT_QDRANT_URL: &str = "http://localhost:6334";
pub const DEFAULT_COLLECTION: &str = "repo_search";

const APP_DIR: &str = "repo-search";
const PROJECT_DIR: &str = ".repo-search";
const CONFIG_FILE: &str = "config.toml";

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    #[serde(default)]
    pub embedding: EmbeddingConfig,

    #[serde(default)]
    pub vector_store: VectorStoreConfig,

    #[serde(default)]
    pub indexing: IndexingConfig,

    #[serde(default)]
    pub search: SearchConfig,
}

/// A loaded configuration together with the files it was read from.
#[derive(Debug, Clone, Default)]
pub struct ResolvedConfig {
    pub config: Config,
    pub global_path: Option<PathBuf>,
    pub project_path: Option<PathBuf>,
}

impl Config {
    pub fn global_path() -> Option<PathBuf> {
        dirs::config_dir().map(|p| p.join(APP_DIR).join(CONFIG_FILE))
    }

    pub fn project_config_dir() -> Option<PathBuf> {
        std::env::current_dir().ok().map(|p| p.join(PROJECT_DIR))
    }

    /// Walk up from the current directory looking for a project config.
    pub fn find_project_config() -> Option<PathBuf> {
        let cwd = std::env::current_dir().ok()?;
        cwd.ancestors()
            .map(|dir| dir.join(PROJECT_DIR).join(CONFIG_FILE))
            .find(|path| path.is_file())
    }

    pub fn data_dir() -> Option<PathBuf> {
        dirs::data_dir().map(|p| p.join(APP_DIR))
    }

    /// Load defaults, then the global file, then the project file, then the environment.
    pub fn load() -> Result<ResolvedConfig, ConfigError> {
        dotenvy::dotenv().ok();

        let global_path = Self::global_path().filter(|p| p.is_file());
        let project_path = Self::find_project_config();

        let mut merged = toml::Table::new();
        for path in global_path.iter().chain(project_path.iter()) {
            let content = std::fs::read_to_string(path)?;
            let table: toml::Table = toml::from_str(&content)?;
            merge_tables(&mut merged, table);
        }

        let mut config: Config = toml::Value::Table(merged).try_into()?;
        config.apply_env(|key| std::env::var(key).ok())?;

        Ok(ResolvedConfig {
            config,
            global_path,
            project_path,
        })
    }

    /// Parse a single TOML document on top of the defaults.
    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(content)?)
    }

    /// Apply environment overrides. `lookup` abstracts `std::env::var` for tests.
    pub fn apply_env<F>(&mut self, lookup: F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(key) = lookup("OPENAI_API_KEY").filter(|k| !k.trim().is_empty()) {
            self.embedding.api_key = Some(key);
        }
        if let Some(url) = lookup("REPO_SEARCH_EMBEDDING_URL") {
            self.embedding.url = url;
        }
        if let Some(model) = lookup("REPO_SEARCH_EMBEDDING_MODEL") {
            self.embedding.model = model;
        }
        if let Some(url) = lookup("REPO_SEARCH_QDRANT_URL") {
            self.vector_store.url = url;
        }
        if let Some(collection) = lookup("REPO_SEARCH_COLLECTION") {
            self.vector_store.collection = collection;
        }
        if let Some(size) = lookup("REPO_SEARCH_CHUNK_SIZE") {
            self.indexing.chunk_size = parse_env("REPO_SEARCH_CHUNK_SIZE", &size)?;
        }
        if let Some(overlap) = lookup("REPO_SEARCH_CHUNK_OVERLAP") {
            self.indexing.chunk_overlap = parse_env("REPO_SEARCH_CHUNK_OVERLAP", &overlap)?;
        }
        Ok(())
    }

    pub fn init_global() -> Result<PathBuf, ConfigError> {
        let path = Self::global_path().ok_or_else(|| {
            ConfigError::PathError("could not determine config directory".to_string())
        })?;
        Self::default().save_to(&path)?;
        Ok(path)
    }

    pub fn init_project() -> Result<PathBuf, ConfigError> {
        let dir = Self::project_config_dir().ok_or_else(|| {
            ConfigError::PathError("could not determine project directory".to_string())
        })?;
        let path = dir.join(CONFIG_FILE);
        Self::default().save_to(&path)?;
        Ok(path)
    }

    pub fn save_to(&self, path: &Path) -> Result<(), ConfigError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let content = toml::to_string_pretty(self)?;
        std::fs::write(path, content)?;
        Ok(())
    }

    /// Validate the engine-relevant settings into an [`EngineConfig`].
    pub fn engine_config(&self) -> Result<EngineConfig, EngineError> {
        EngineConfig::new(EngineSettings {
            chunk_size: self.indexing.chunk_size,
            chunk_overlap: self.indexing.chunk_overlap,
            max_tokens_per_chunk: self.indexing.max_tokens_per_chunk,
            max_tokens_per_batch: self.indexing.max_tokens_per_batch,
            max_chunks_per_batch: self.indexing.max_chunks_per_batch,
            score_threshold: self.search.score_threshold,
            limit: self.search.default_limit,
        })
    }

    /// Copy of the configuration with secrets masked, for display.
    pub fn redacted(&self) -> Self {
        let mut copy = self.clone();
        if copy.embedding.api_key.is_some() {
            copy.embedding.api_key = Some("********".to_string());
        }
        if copy.vector_store.api_key.is_some() {
            copy.vector_store.api_key = Some("********".to_string());
        }
        copy
    }
}

fn parse_env(key: &str, value: &str) -> Result<i64, ConfigError> {
    value
        .trim()
        .parse()
        .map_err(|_| ConfigError::ValidationError(format!("{key} must be an integer: {value}")))
}

fn merge_tables(base: &mut toml::Table, overlay: toml::Table) {
    for (key, value) in overlay {
        match (base.get_mut(&key), value) {
            (Some(toml::Value::Table(existing)), toml::Value::Table(incoming)) => {
                merge_tables(existing, incoming);
            }
            (_, value) => {
                base.insert(key, value);
            }
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmbeddingConfig {
    #[serde(default = "default_embedding_url")]
    pub url: String,

    #[serde(default = "default_embedding_model")]
    pub model: String,

    #[serde(default = "default_dimension")]
    pub dimension: u32,

    /// Sent as `dimensions` in each request, for models that can shorten
    /// their output. Omitted when unset.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub request_dimensions: Option<u32>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,

    #[serde(default = "default_timeout")]
    pub timeout_secs: u64,

    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    /// Maximum number of embedding requests in flight.
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,
}

fn default_embedding_url() -> String {
    DEFAULT_EMBEDDING_URL.to_string()
}

fn default_embedding_model() -> String {
    DEFAULT_EMBEDDING_MODEL.to_string()
}

fn default_dimension() -> u32 {
    DEFAULT_EMBEDDING_DIMENSION
}

fn default_timeout() -> u64 {
    120
}

fn default_max_retries() -> u32 {
    3
}

fn default_concurrency() -> usize {
    4
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            url: default_embedding_url(),
            model: default_embedding_model(),
            dimension: default_dimension(),
            request_dimensions: None,
            api_key: None,
            timeout_secs: default_timeout(),
            max_retries: default_max_retries(),
            concurrency: default_concurrency(),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VectorDriver {
    #[default]
    Qdrant,
    /// JSON file on local disk
    Local,
}

impl std::fmt::Display for VectorDriver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            VectorDriver::Qdrant => write!(f, "qdrant"),
            VectorDriver::Local => write!(f, "local"),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VectorStoreConfig {
    #[serde(default)]
    pub driver: VectorDriver,

    #[serde(default = "default_qdrant_url")]
    pub url: String,

    #[serde(default = "default_collection")]
    pub collection: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,

    /// Storage file for the local driver. Defaults to the data directory.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<PathBuf>,
}

fn default_qdrant_url() -> String {
    DEFAULT_QDRANT_URL.to_string()
}

fn default_collection() -> String {
    DEFAULT_COLLECTION.to_string()
}

impl VectorStoreConfig {
    /// File backing the local driver.
    pub fn local_path(&self) -> Option<PathBuf> {
        self.path.clone().or_else(|| {
            Config::data_dir().map(|dir| dir.join(format!("{}.json", self.collection)))
        })
    }
}

impl Default for VectorStoreConfig {
    fn default() -> Self {
        Self {
            driver: VectorDriver::default(),
            url: default_qdrant_url(),
            collection: default_collection(),
            api_key: None,
            path: None,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TokenizerKind {
    /// Character-count heuristic (4 characters per token)
    #[default]
    Estimate,
    /// HuggingFace `tokenizer.json`
    HuggingFace,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IndexingConfig {
    /// Chunk window size in characters.
    #[serde(default = "default_chunk_size")]
    pub chunk_size: i64,

    /// Characters shared by consecutive chunks.
    #[serde(default = "default_chunk_overlap")]
    pub chunk_overlap: i64,

    #[serde(default = "default_max_tokens_per_chunk")]
    pub max_tokens_per_chunk: i64,

    #[serde(default = "default_max_tokens_per_batch")]
    pub max_tokens_per_batch: i64,

    #[serde(default = "default_max_chunks_per_batch")]
    pub max_chunks_per_batch: i64,

    #[serde(default)]
    pub tokenizer: TokenizerKind,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tokenizer_path: Option<PathBuf>,

    #[serde(default = "default_max_file_size")]
    pub max_file_size: u64,

    #[serde(default = "default_exclude_patterns")]
    pub exclude_patterns: Vec<String>,
}

fn default_chunk_size() -> i64 {
    1000
}

fn default_chunk_overlap() -> i64 {
    100
}

fn default_max_tokens_per_chunk() -> i64 {
    5000
}

fn default_max_tokens_per_batch() -> i64 {
    8000
}

fn default_max_chunks_per_batch() -> i64 {
    256
}

fn default_max_file_size() -> u64 {
    2 * 1024 * 1024
}

fn default_exclude_patterns() -> Vec<String> {
    vec![
        "**/node_modules/**".to_string(),
        "**/target/**".to_string(),
        "**/.git/**".to_string(),
        "**/dist/**".to_string(),
        "**/build/**".to_string(),
        "**/__pycache__/**".to_string(),
        "**/.venv/**".to_string(),
        "**/vendor/**".to_string(),
        "**/*.min.js".to_string(),
        "**/*.min.css".to_string(),
        "**/package-lock.json".to_string(),
        "**/yarn.lock".to_string(),
        "**/pnpm-lock.yaml".to_string(),
        "**/Cargo.lock".to_string(),
    ]
}

impl Default for IndexingConfig {
    fn default() -> Self {
        Self {
            chunk_size: default_chunk_size(),
            chunk_overlap: default_chunk_overlap(),
            max_tokens_per_chunk: default_max_tokens_per_chunk(),
            max_tokens_per_batch: default_max_tokens_per_batch(),
            max_chunks_per_batch: default_max_chunks_per_batch(),
            tokenizer: TokenizerKind::default(),
            tokenizer_path: None,
            max_file_size: default_max_file_size(),
            exclude_patterns: default_exclude_patterns(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchConfig {
    #[serde(default = "default_limit")]
    pub default_limit: i64,

    /// Inclusive lower bound on similarity.
    #[serde(default)]
    pub score_threshold: f32,

    #[serde(default)]
    pub default_format: OutputFormat,
}

fn default_limit() -> i64 {
    10
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            default_limit: default_limit(),
            score_threshold: 0.0,
            default_format: OutputFormat::Text,
        }
    }
}

/// Unvalidated engine settings, as they come from files or flags.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct EngineSettings {
    pub chunk_size: i64,
    pub chunk_overlap: i64,
    pub max_tokens_per_chunk: i64,
    pub max_tokens_per_batch: i64,
    pub max_chunks_per_batch: i64,
    pub score_threshold: f32,
    pub limit: i64,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            chunk_size: default_chunk_size(),
            chunk_overlap: default_chunk_overlap(),
            max_tokens_per_chunk: default_max_tokens_per_chunk(),
            max_tokens_per_batch: default_max_tokens_per_batch(),
            max_chunks_per_batch: default_max_chunks_per_batch(),
            score_threshold: 0.0,
            limit: default_limit(),
        }
    }
}

/// Validated settings handed to the chunker, batcher and search at construction.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct EngineConfig {
    chunk_size: usize,
    chunk_overlap: usize,
    max_tokens_per_chunk: usize,
    max_tokens_per_batch: usize,
    max_chunks_per_batch: usize,
    score_threshold: f32,
    limit: usize,
}

impl EngineConfig {
    pub fn new(settings: EngineSettings) -> Result<Self, EngineError> {
        let chunk_size = positive("chunk_size", settings.chunk_size)?;
        if settings.chunk_overlap < 0 {
            return Err(EngineError::invalid(format!(
                "chunk_overlap must not be negative, got {}",
                settings.chunk_overlap
            )));
        }
        let chunk_overlap = settings.chunk_overlap as usize;
        if chunk_overlap >= chunk_size {
            return Err(EngineError::invalid(format!(
                "chunk_overlap ({chunk_overlap}) must be smaller than chunk_size ({chunk_size})"
            )));
        }
        if !settings.score_threshold.is_finite() {
            return Err(EngineError::invalid("score_threshold must be finite"));
        }

        Ok(Self {
            chunk_size,
            chunk_overlap,
            max_tokens_per_chunk: positive("max_tokens_per_chunk", settings.max_tokens_per_chunk)?,
            max_tokens_per_batch: positive("max_tokens_per_batch", settings.max_tokens_per_batch)?,
            max_chunks_per_batch: positive("max_chunks_per_batch", settings.max_chunks_per_batch)?,
            score_threshold: settings.score_threshold,
            limit: positive("limit", settings.limit)?,
        })
    }

    pub fn chunk_size(&self) -> usize {
        self.chunk_size
    }

    pub fn chunk_overlap(&self) -> usize {
        self.chunk_overlap
    }

    pub fn max_tokens_per_chunk(&self) -> usize {
        self.max_tokens_per_chunk
    }

    pub fn max_tokens_per_batch(&self) -> usize {
        self.max_tokens_per_batch
    }

    pub fn max_chunks_per_batch(&self) -> usize {
        self.max_chunks_per_batch
    }

    pub fn score_threshold(&self) -> f32 {
        self.score_threshold
    }

    pub fn limit(&self) -> usize {
        self.limit
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            chunk_size: default_chunk_size() as usize,
            chunk_overlap: default_chunk_overlap() as usize,
            max_tokens_per_chunk: default_max_tokens_per_chunk() as usize,
            max_tokens_per_batch: default_max_tokens_per_batch() as usize,
            max_chunks_per_batch: default_max_chunks_per_batch() as usize,
            score_threshold: 0.0,
            limit: default_limit() as usize,
        }
    }
}

fn positive(name: &str, value: i64) -> Result<usize, EngineError> {
    if value <= 0 {
        return Err(EngineError::invalid(format!(
            "{name} must be greater than zero, got {value}"
        )));
    }
    usize::try_from(value).map_err(|_| EngineError::invalid(format!("{name} is too large")))
}
