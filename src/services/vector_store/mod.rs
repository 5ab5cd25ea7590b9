//! Vector store abstraction layer.
//!
//! Backends are picked from configuration: Qdrant for real deployments, a JSON
//! file with brute-force cosine similarity for offline use.

mod local;
mod qdrant;

pub use local::LocalBackend;
pub use qdrant::QdrantBackend;

use async_trait::async_trait;
use std::collections::HashSet;
use std::sync::Arc;

use crate::error::VectorStoreError;
use crate::models::{EmbeddingRecord, RawMatch, RepositoryInfo, VectorDriver, VectorStoreConfig};

/// Abstract trait for vector store operations.
#[async_trait]
pub trait VectorStore: Send + Sync {
    /// Check if the vector store is healthy and accessible.
    async fn health_check(&self) -> Result<bool, VectorStoreError>;

    /// Create the collection if it doesn't exist.
    async fn ensure_collection(&self) -> Result<(), VectorStoreError>;

    /// Insert or replace records, keyed by chunk id.
    async fn upsert(&self, records: Vec<EmbeddingRecord>) -> Result<(), VectorStoreError>;

    /// Up to `limit` nearest records by cosine similarity, best first.
    async fn query(
        &self,
        vector: Vec<f32>,
        repository_filter: Option<&str>,
        limit: u64,
    ) -> Result<Vec<RawMatch>, VectorStoreError>;

    /// Remove a repository's chunks and its record.
    ///
    /// Returns false when the store knew nothing about the repository.
    async fn delete_repository(&self, repository: &str) -> Result<bool, VectorStoreError>;

    /// Remove the repository's chunks whose ids are not in `keep`; returns how many went.
    async fn prune_repository(
        &self,
        repository: &str,
        keep: &HashSet<String>,
    ) -> Result<u64, VectorStoreError>;

    /// Insert or replace the record for `info.repository`.
    async fn save_repository(&self, info: RepositoryInfo) -> Result<(), VectorStoreError>;

    /// Recorded repositories, largest first.
    async fn list_repositories(&self) -> Result<Vec<RepositoryInfo>, VectorStoreError>;

    /// Remove every record, keeping the collection usable.
    async fn clear(&self) -> Result<(), VectorStoreError>;

    /// Number of stored records; zero when the collection does not exist.
    async fn count(&self) -> Result<u64, VectorStoreError>;

    /// Collection name, for display.
    fn name(&self) -> &str;
}

/// Create a vector store backend based on configuration.
pub async fn create_backend(
    config: &VectorStoreConfig,
    dimension: usize,
) -> Result<Arc<dyn VectorStore>, VectorStoreError> {
    match config.driver {
        VectorDriver::Qdrant => {
            let backend = QdrantBackend::new(config, dimension as u64)?;
            Ok(Arc::new(backend))
        }
        VectorDriver::Local => {
            let path = config.local_path().ok_or_else(|| {
                VectorStoreError::CollectionError(
                    "cannot determine data directory for the local store".to_string(),
                )
            })?;
            let backend = LocalBackend::open(path, config.collection.clone(), dimension).await?;
            Ok(Arc::new(backend))
        }
    }
}

/// Sort repository counts by chunk count, then name.
pub(crate) fn sort_repositories(mut repos: Vec<RepositoryInfo>) -> Vec<RepositoryInfo> {
    repos.sort_by(|a, b| {
        b.chunk_count
            .cmp(&a.chunk_count)
            .then_with(|| a.repository.cmp(&b.repository))
    });
    repos
}
