//! File-backed vector store with brute-force cosine search.
//!
//! All records live in memory and are written back to a single JSON file after
//! every mutation. Suitable for small repositories, offline use and tests.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::path::PathBuf;
use tokio::sync::RwLock;

use super::{VectorStore, sort_repositories};
use crate::error::VectorStoreError;
use crate::models::{EmbeddingRecord, RawMatch, RepositoryInfo};

const FORMAT_VERSION: u32 = 1;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct StoreState {
    records: Vec<EmbeddingRecord>,
    #[serde(default)]
    repositories: Vec<RepositoryInfo>,
}

#[derive(Debug, Deserialize)]
struct StoreFile {
    dimension: usize,
    #[serde(flatten)]
    state: StoreState,
}

#[derive(Serialize)]
struct StoreFileRef<'a> {
    version: u32,
    dimension: usize,
    #[serde(flatten)]
    state: &'a StoreState,
}

/// Local JSON vector store backend.
pub struct LocalBackend {
    path: PathBuf,
    collection: String,
    dimension: usize,
    state: RwLock<StoreState>,
}

impl LocalBackend {
    /// Open the store at `path`, starting empty if the file does not exist yet.
    pub async fn open(
        path: impl Into<PathBuf>,
        collection: String,
        dimension: usize,
    ) -> Result<Self, VectorStoreError> {
        let path = path.into();
        let state = match tokio::fs::read(&path).await {
            Ok(bytes) => {
                let file: StoreFile = serde_json::from_slice(&bytes)?;
                if file.dimension != dimension {
                    return Err(VectorStoreError::DimensionMismatch {
                        expected: dimension,
                        actual: file.dimension,
                    });
                }
                file.state
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => StoreState::default(),
            Err(e) => return Err(e.into()),
        };

        tracing::debug!(
            path = %path.display(),
            records = state.records.len(),
            repositories = state.repositories.len(),
            "opened local store"
        );

        Ok(Self {
            path,
            collection,
            dimension,
            state: RwLock::new(state),
        })
    }

    fn check_dimension(&self, len: usize) -> Result<(), VectorStoreError> {
        if len != self.dimension {
            return Err(VectorStoreError::DimensionMismatch {
                expected: self.dimension,
                actual: len,
            });
        }
        Ok(())
    }

    /// Writes to a sibling temp file, then renames over the store.
    async fn persist(&self, state: &StoreState) -> Result<(), VectorStoreError> {
        if let Some(parent) = self.path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }

        let file = StoreFileRef {
            version: FORMAT_VERSION,
            dimension: self.dimension,
            state,
        };
        let bytes = serde_json::to_vec(&file)?;

        let tmp = self.path.with_extension("json.tmp");
        tokio::fs::write(&tmp, bytes).await?;
        tokio::fs::rename(&tmp, &self.path).await?;
        Ok(())
    }

    /// Applies `change` to a copy of the state and swaps it in once the copy is on disk.
    ///
    /// A failed write leaves memory as it was. Nothing is written when `change`
    /// reports no modification.
    async fn update<R>(
        &self,
        change: impl FnOnce(&mut StoreState) -> (R, bool) + Send,
    ) -> Result<R, VectorStoreError>
    where
        R: Send,
    {
        let mut state = self.state.write().await;
        let mut next = state.clone();
        let (result, modified) = change(&mut next);
        if modified {
            self.persist(&next).await?;
            *state = next;
        }
        Ok(result)
    }
}

/// Cosine similarity; zero when either vector has no magnitude.
pub(crate) fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() {
        return 0.0;
    }

    let dot: f32 = a.iter().zip(b).map(|(x, y)| x * y).sum();
    let norm_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();

    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }

    dot / (norm_a * norm_b)
}

#[async_trait]
impl VectorStore for LocalBackend {
    async fn health_check(&self) -> Result<bool, VectorStoreError> {
        if let Some(parent) = self.path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        Ok(true)
    }

    async fn ensure_collection(&self) -> Result<(), VectorStoreError> {
        if tokio::fs::try_exists(&self.path).await? {
            return Ok(());
        }
        let state = self.state.read().await;
        self.persist(&state).await
    }

    async fn upsert(&self, records: Vec<EmbeddingRecord>) -> Result<(), VectorStoreError> {
        if records.is_empty() {
            return Ok(());
        }
        for record in &records {
            self.check_dimension(record.vector.len())?;
        }

        self.update(move |state| {
            let stored = &mut state.records;
            let mut positions: HashMap<String, usize> = stored
                .iter()
                .enumerate()
                .map(|(idx, r)| (r.chunk.id.clone(), idx))
                .collect();

            for record in records {
                match positions.get(&record.chunk.id) {
                    Some(&idx) => stored[idx] = record,
                    None => {
                        positions.insert(record.chunk.id.clone(), stored.len());
                        stored.push(record);
                    }
                }
            }
            ((), true)
        })
        .await
    }

    async fn query(
        &self,
        vector: Vec<f32>,
        repository_filter: Option<&str>,
        limit: u64,
    ) -> Result<Vec<RawMatch>, VectorStoreError> {
        self.check_dimension(vector.len())?;

        let state = self.state.read().await;
        let mut scored: Vec<(f32, &EmbeddingRecord)> = state
            .records
            .iter()
            .filter(|r| repository_filter.is_none_or(|repo| r.chunk.repository == repo))
            .map(|r| (cosine_similarity(&vector, &r.vector), r))
            .collect();

        // Stable: equal scores keep insertion order.
        scored.sort_by(|a, b| b.0.total_cmp(&a.0));
        scored.truncate(usize::try_from(limit).unwrap_or(usize::MAX));

        Ok(scored
            .into_iter()
            .map(|(score, record)| RawMatch {
                chunk_id: record.chunk.id.clone(),
                score,
                content: record.chunk.text.clone(),
                repository: record.chunk.repository.clone(),
                file_path: Some(record.chunk.source_path.clone()),
                line_start: record.chunk.line_start,
                line_end: record.chunk.line_end,
            })
            .collect())
    }

    async fn delete_repository(&self, repository: &str) -> Result<bool, VectorStoreError> {
        self.update(|state| {
            let before = (state.records.len(), state.repositories.len());
            state.records.retain(|r| r.chunk.repository != repository);
            state.repositories.retain(|r| r.repository != repository);
            let found = before != (state.records.len(), state.repositories.len());
            (found, found)
        })
        .await
    }

    async fn prune_repository(
        &self,
        repository: &str,
        keep: &HashSet<String>,
    ) -> Result<u64, VectorStoreError> {
        self.update(|state| {
            let before = state.records.len();
            state
                .records
                .retain(|r| r.chunk.repository != repository || keep.contains(&r.chunk.id));
            let pruned = (before - state.records.len()) as u64;
            (pruned, pruned > 0)
        })
        .await
    }

    async fn save_repository(&self, info: RepositoryInfo) -> Result<(), VectorStoreError> {
        self.update(move |state| {
            state.repositories.retain(|r| r.repository != info.repository);
            state.repositories.push(info);
            ((), true)
        })
        .await
    }

    async fn list_repositories(&self) -> Result<Vec<RepositoryInfo>, VectorStoreError> {
        let state = self.state.read().await;
        Ok(sort_repositories(state.repositories.clone()))
    }

    async fn clear(&self) -> Result<(), VectorStoreError> {
        self.update(|state| {
            *state = StoreState::default();
            ((), true)
        })
        .await
    }

    async fn count(&self) -> Result<u64, VectorStoreError> {
        Ok(self.state.read().await.records.len() as u64)
    }

    fn name(&self) -> &str {
        &self.collection
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Chunk, RepositoryId};
    use tempfile::TempDir;

    fn record(repository: &str, path: &str, index: u32, vector: Vec<f32>) -> EmbeddingRecord {
        EmbeddingRecord {
            vector,
            chunk: Chunk {
                id: Chunk::generate_id(repository, path, index),
                text: format!("{repository} {path} #{index}"),
                token_count: 3,
                source_path: path.to_string(),
                repository: repository.to_string(),
                chunk_index: index,
                start_offset: 0,
                end_offset: 10,
                line_start: Some(1),
                line_end: Some(2),
                truncated: false,
            },
        }
    }

    async fn open(dir: &TempDir) -> LocalBackend {
        LocalBackend::open(dir.path().join("store.json"), "test".to_string(), 2)
            .await
            .unwrap()
    }

    #[test]
    fn test_cosine_similarity() {
        assert!((cosine_similarity(&[1.0, 0.0], &[1.0, 0.0]) - 1.0).abs() < 1e-6);
        assert!(cosine_similarity(&[1.0, 0.0], &[0.0, 1.0]).abs() < 1e-6);
        assert!((cosine_similarity(&[1.0, 0.0], &[-1.0, 0.0]) + 1.0).abs() < 1e-6);
        assert_eq!(cosine_similarity(&[0.0, 0.0], &[1.0, 0.0]), 0.0);
    }

    #[tokio::test]
    async fn test_upsert_and_query_ranked() {
        let dir = TempDir::new().unwrap();
        let store = open(&dir).await;

        store
            .upsert(vec![
                record("a/a", "x.rs", 0, vec![0.0, 1.0]),
                record("a/a", "x.rs", 1, vec![1.0, 0.0]),
                record("a/a", "x.rs", 2, vec![1.0, 1.0]),
            ])
            .await
            .unwrap();

        let matches = store.query(vec![1.0, 0.0], None, 10).await.unwrap();
        let indices: Vec<&str> = matches.iter().map(|m| m.content.as_str()).collect();
        assert_eq!(indices, vec!["a/a x.rs #1", "a/a x.rs #2", "a/a x.rs #0"]);
        assert!((matches[0].score - 1.0).abs() < 1e-6);
        assert_eq!(matches[0].file_path.as_deref(), Some("x.rs"));

        let limited = store.query(vec![1.0, 0.0], None, 1).await.unwrap();
        assert_eq!(limited.len(), 1);
    }

    #[tokio::test]
    async fn test_equal_scores_keep_insertion_order() {
        let dir = TempDir::new().unwrap();
        let store = open(&dir).await;

        store
            .upsert((0..4).map(|i| record("a/a", "x.rs", i, vec![1.0, 0.0])).collect())
            .await
            .unwrap();

        let matches = store.query(vec![1.0, 0.0], None, 10).await.unwrap();
        let ids: Vec<String> = matches.into_iter().map(|m| m.chunk_id).collect();
        let expected: Vec<String> = (0..4)
            .map(|i| Chunk::generate_id("a/a", "x.rs", i))
            .collect();
        assert_eq!(ids, expected);
    }

    #[tokio::test]
    async fn test_repository_filter_and_delete() {
        let dir = TempDir::new().unwrap();
        let store = open(&dir).await;

        store
            .upsert(vec![
                record("a/a", "x.rs", 0, vec![1.0, 0.0]),
                record("b/b", "y.rs", 0, vec![1.0, 0.0]),
                record("b/b", "y.rs", 1, vec![0.5, 0.5]),
            ])
            .await
            .unwrap();

        let only_b = store.query(vec![1.0, 0.0], Some("b/b"), 10).await.unwrap();
        assert_eq!(only_b.len(), 2);
        assert!(only_b.iter().all(|m| m.repository == "b/b"));

        assert!(store.delete_repository("b/b").await.unwrap());
        assert_eq!(store.count().await.unwrap(), 1);
        assert!(store.query(vec![1.0, 0.0], Some("b/b"), 10).await.unwrap().is_empty());

        assert!(!store.delete_repository("b/b").await.unwrap());
        assert!(!store.delete_repository("nobody/here").await.unwrap());
    }

    #[tokio::test]
    async fn test_repository_records() {
        let dir = TempDir::new().unwrap();
        let store = open(&dir).await;
        let a: RepositoryId = "a/a".parse().unwrap();
        let b: RepositoryId = "b/b".parse().unwrap();

        store
            .save_repository(RepositoryInfo::indexed(&a, 1, 1, true))
            .await
            .unwrap();
        store
            .save_repository(RepositoryInfo::indexed(&b, 3, 7, false))
            .await
            .unwrap();
        store
            .save_repository(RepositoryInfo::indexed(&a, 2, 9, true))
            .await
            .unwrap();

        let repos = store.list_repositories().await.unwrap();
        assert_eq!(repos.len(), 2);
        assert_eq!(repos[0].repository, "a/a");
        assert_eq!(repos[0].chunk_count, 9);
        assert_eq!(repos[0].file_count, 2);
        assert_eq!(repos[1].url, "https://github.com/b/b");
        assert!(!repos[1].complete);

        // A record alone is enough for delete to report the repository.
        assert!(store.delete_repository("b/b").await.unwrap());

        let reopened = open(&dir).await;
        let repos = reopened.list_repositories().await.unwrap();
        assert_eq!(repos.len(), 1);
        assert_eq!(repos[0].repository, "a/a");
    }

    #[tokio::test]
    async fn test_prune_keeps_listed_ids_and_other_repositories() {
        let dir = TempDir::new().unwrap();
        let store = open(&dir).await;

        store
            .upsert(vec![
                record("a/a", "x.rs", 0, vec![1.0, 0.0]),
                record("a/a", "x.rs", 1, vec![1.0, 0.0]),
                record("a/a", "gone.rs", 0, vec![1.0, 0.0]),
                record("b/b", "y.rs", 0, vec![1.0, 0.0]),
            ])
            .await
            .unwrap();

        let keep: HashSet<String> = [Chunk::generate_id("a/a", "x.rs", 0)].into_iter().collect();
        assert_eq!(store.prune_repository("a/a", &keep).await.unwrap(), 2);
        assert_eq!(store.count().await.unwrap(), 2);
        assert_eq!(store.prune_repository("a/a", &keep).await.unwrap(), 0);

        let remaining: Vec<String> = store
            .query(vec![1.0, 0.0], None, 10)
            .await
            .unwrap()
            .into_iter()
            .map(|m| m.content)
            .collect();
        assert_eq!(remaining, vec!["a/a x.rs #0", "b/b y.rs #0"]);
    }

    #[tokio::test]
    async fn test_failed_write_leaves_memory_unchanged() {
        let dir = TempDir::new().unwrap();
        let store = open(&dir).await;
        store
            .upsert(vec![record("a/a", "x.rs", 0, vec![1.0, 0.0])])
            .await
            .unwrap();

        // A directory in the temp file's place makes the write fail.
        std::fs::create_dir(dir.path().join("store.json.tmp")).unwrap();

        let result = store
            .upsert(vec![record("a/a", "x.rs", 1, vec![0.0, 1.0])])
            .await;
        assert!(matches!(result, Err(VectorStoreError::IoError(_))));
        assert_eq!(store.count().await.unwrap(), 1);

        assert!(store.clear().await.is_err());
        assert_eq!(store.count().await.unwrap(), 1);
        assert!(store.delete_repository("a/a").await.is_err());
        assert_eq!(store.query(vec![1.0, 0.0], None, 10).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_upsert_replaces_by_id() {
        let dir = TempDir::new().unwrap();
        let store = open(&dir).await;

        store
            .upsert(vec![record("a/a", "x.rs", 0, vec![1.0, 0.0])])
            .await
            .unwrap();
        let mut updated = record("a/a", "x.rs", 0, vec![0.0, 1.0]);
        updated.chunk.text = "updated".to_string();
        store.upsert(vec![updated]).await.unwrap();

        assert_eq!(store.count().await.unwrap(), 1);
        let matches = store.query(vec![0.0, 1.0], None, 1).await.unwrap();
        assert_eq!(matches[0].content, "updated");
    }

    #[tokio::test]
    async fn test_persists_across_reopen() {
        let dir = TempDir::new().unwrap();
        {
            let store = open(&dir).await;
            store
                .upsert(vec![record("a/a", "x.rs", 0, vec![1.0, 0.0])])
                .await
                .unwrap();
        }

        let reopened = open(&dir).await;
        assert_eq!(reopened.count().await.unwrap(), 1);

        reopened.clear().await.unwrap();
        let reopened = open(&dir).await;
        assert_eq!(reopened.count().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_dimension_mismatch() {
        let dir = TempDir::new().unwrap();
        let store = open(&dir).await;

        let err = store
            .upsert(vec![record("a/a", "x.rs", 0, vec![1.0, 0.0, 0.0])])
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            VectorStoreError::DimensionMismatch {
                expected: 2,
                actual: 3
            }
        ));

        store
            .upsert(vec![record("a/a", "x.rs", 0, vec![1.0, 0.0])])
            .await
            .unwrap();
        drop(store);
        let reopen = LocalBackend::open(dir.path().join("store.json"), "test".to_string(), 4).await;
        assert!(matches!(
            reopen,
            Err(VectorStoreError::DimensionMismatch { .. })
        ));
    }
}
