mod config;
mod document;
mod repository;
mod search;

pub use config::{
    Config, DEFAULT_COLLECTION, DEFAULT_EMBEDDING_DIMENSION, DEFAULT_EMBEDDING_MODEL,
    DEFAULT_EMBEDDING_URL, DEFAULT_QDRANT_URL, EmbeddingConfig, EngineConfig, EngineSettings,
    IndexingConfig, ResolvedConfig, SearchConfig, TokenizerKind, VectorDriver, VectorStoreConfig,
};
pub use document::{Chunk, ChunkRef, EmbeddingRecord, SourceDocument};
pub use repository::{RepositoryId, RepositoryInfo};
pub use search::{OutputFormat, RawMatch, SearchResult, SearchResults};
