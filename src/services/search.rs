//! Ranked, thresholded similarity search over a vector store.

use std::sync::Arc;

use crate::error::{EngineError, SearchError};
use crate::models::SearchResult;
use crate::services::embedding::Embedder;
use crate::services::vector_store::VectorStore;

pub struct SimilaritySearch {
    store: Arc<dyn VectorStore>,
}

impl SimilaritySearch {
    pub fn new(store: Arc<dyn VectorStore>) -> Self {
        Self { store }
    }

    /// Up to `limit` matches scoring at least `score_threshold`, best first.
    ///
    /// Matches with equal scores keep the order the store returned them in.
    pub async fn search(
        &self,
        query_vector: Vec<f32>,
        repository_filter: Option<&str>,
        limit: i64,
        score_threshold: f32,
    ) -> Result<Vec<SearchResult>, SearchError> {
        let limit = usize::try_from(limit)
            .ok()
            .filter(|l| *l > 0)
            .ok_or_else(|| EngineError::invalid(format!("limit must be positive, got {limit}")))?;
        if !score_threshold.is_finite() {
            return Err(EngineError::invalid("score_threshold must be finite").into());
        }

        let raw = self
            .store
            .query(query_vector, repository_filter, limit as u64)
            .await?;
        let fetched = raw.len();

        let mut matches: Vec<_> = raw
            .into_iter()
            .filter(|m| m.score >= score_threshold)
            .collect();
        matches.sort_by(|a, b| b.score.total_cmp(&a.score));
        matches.truncate(limit);

        tracing::debug!(
            fetched,
            kept = matches.len(),
            threshold = score_threshold,
            "similarity search"
        );

        Ok(matches.into_iter().map(SearchResult::from).collect())
    }

    /// Embed `query` and search with the resulting vector.
    pub async fn search_text(
        &self,
        embedder: &dyn Embedder,
        query: &str,
        repository_filter: Option<&str>,
        limit: i64,
        score_threshold: f32,
    ) -> Result<Vec<SearchResult>, SearchError> {
        let vector = embedder.embed_query(query).await?;
        self.search(vector, repository_filter, limit, score_threshold)
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{EmbeddingError, VectorStoreError};
    use crate::models::{EmbeddingRecord, RawMatch, RepositoryInfo};
    use async_trait::async_trait;
    use std::collections::HashSet;
    use std::sync::Mutex;

    /// Returns canned matches in the given order, honouring only `limit`.
    struct CannedStore {
        matches: Vec<RawMatch>,
        last_filter: Mutex<Option<String>>,
    }

    impl CannedStore {
        fn with_scores(scores: &[f32]) -> Self {
            let matches = scores
                .iter()
                .enumerate()
                .map(|(i, &score)| RawMatch {
                    chunk_id: format!("c{i}"),
                    score,
                    content: format!("content {i}"),
                    repository: "octo/widgets".to_string(),
                    file_path: Some("src/lib.rs".to_string()),
                    line_start: Some(1),
                    line_end: Some(10),
                })
                .collect();
            Self {
                matches,
                last_filter: Mutex::new(None),
            }
        }
    }

    #[async_trait]
    impl VectorStore for CannedStore {
        async fn health_check(&self) -> Result<bool, VectorStoreError> {
            Ok(true)
        }

        async fn ensure_collection(&self) -> Result<(), VectorStoreError> {
            Ok(())
        }

        async fn upsert(&self, _records: Vec<EmbeddingRecord>) -> Result<(), VectorStoreError> {
            Ok(())
        }

        async fn query(
            &self,
            _vector: Vec<f32>,
            repository_filter: Option<&str>,
            limit: u64,
        ) -> Result<Vec<RawMatch>, VectorStoreError> {
            *self.last_filter.lock().unwrap() = repository_filter.map(String::from);
            Ok(self.matches.iter().take(limit as usize).cloned().collect())
        }

        async fn delete_repository(&self, _repository: &str) -> Result<bool, VectorStoreError> {
            Ok(false)
        }

        async fn prune_repository(
            &self,
            _repository: &str,
            _keep: &HashSet<String>,
        ) -> Result<u64, VectorStoreError> {
            Ok(0)
        }

        async fn save_repository(&self, _info: RepositoryInfo) -> Result<(), VectorStoreError> {
            Ok(())
        }

        async fn list_repositories(&self) -> Result<Vec<RepositoryInfo>, VectorStoreError> {
            Ok(Vec::new())
        }

        async fn clear(&self) -> Result<(), VectorStoreError> {
            Ok(())
        }

        async fn count(&self) -> Result<u64, VectorStoreError> {
            Ok(self.matches.len() as u64)
        }

        fn name(&self) -> &str {
            "canned"
        }
    }

    struct ConstantEmbedder;

    #[async_trait]
    impl Embedder for ConstantEmbedder {
        async fn embed(&self, texts: Vec<String>) -> Result<Vec<Vec<f32>>, EmbeddingError> {
            Ok(texts.iter().map(|_| vec![1.0, 0.0]).collect())
        }

        fn dimension(&self) -> usize {
            2
        }

        fn model(&self) -> &str {
            "constant"
        }
    }

    fn scores(results: &[SearchResult]) -> Vec<f32> {
        results.iter().map(|r| r.score).collect()
    }

    #[tokio::test]
    async fn test_threshold_and_limit() {
        let search = SimilaritySearch::new(Arc::new(CannedStore::with_scores(&[
            0.95, 0.82, 0.79, 0.6, 0.5,
        ])));

        let results = search.search(vec![1.0], None, 3, 0.8).await.unwrap();
        assert_eq!(scores(&results), vec![0.95, 0.82]);
        assert_eq!(results[0].source, "octo/widgets - src/lib.rs:1-10");
    }

    #[tokio::test]
    async fn test_threshold_is_inclusive() {
        let search = SimilaritySearch::new(Arc::new(CannedStore::with_scores(&[0.9, 0.8, 0.7])));

        let results = search.search(vec![1.0], None, 10, 0.8).await.unwrap();
        assert_eq!(scores(&results), vec![0.9, 0.8]);
    }

    #[tokio::test]
    async fn test_ties_keep_store_order() {
        let search =
            SimilaritySearch::new(Arc::new(CannedStore::with_scores(&[0.5, 0.9, 0.5, 0.9])));

        let results = search.search(vec![1.0], None, 10, 0.0).await.unwrap();
        let ids: Vec<&str> = results.iter().map(|r| r.chunk_id.as_str()).collect();
        assert_eq!(ids, vec!["c1", "c3", "c0", "c2"]);
    }

    #[tokio::test]
    async fn test_invalid_limit() {
        let search = SimilaritySearch::new(Arc::new(CannedStore::with_scores(&[0.9])));

        for limit in [0, -1] {
            let err = search.search(vec![1.0], None, limit, 0.0).await.unwrap_err();
            assert!(matches!(err, SearchError::Engine(EngineError::InvalidArgument(_))));
        }
    }

    #[tokio::test]
    async fn test_non_finite_threshold() {
        let search = SimilaritySearch::new(Arc::new(CannedStore::with_scores(&[0.9])));

        let err = search.search(vec![1.0], None, 5, f32::NAN).await.unwrap_err();
        assert!(matches!(err, SearchError::Engine(EngineError::InvalidArgument(_))));
    }

    #[tokio::test]
    async fn test_empty_store() {
        let search = SimilaritySearch::new(Arc::new(CannedStore::with_scores(&[])));
        assert!(search.search(vec![1.0], None, 5, 0.0).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_search_text_passes_filter() {
        let store = Arc::new(CannedStore::with_scores(&[0.7]));
        let search = SimilaritySearch::new(store.clone());

        let results = search
            .search_text(&ConstantEmbedder, "how are widgets built", Some("octo/widgets"), 5, 0.0)
            .await
            .unwrap();
        assert_eq!(results.len(), 1);
        assert_eq!(
            store.last_filter.lock().unwrap().as_deref(),
            Some("octo/widgets")
        );
    }
}
