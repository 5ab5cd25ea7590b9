//! Qdrant vector store backend implementation.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use qdrant_client::Qdrant;
use qdrant_client::qdrant::point_id::PointIdOptions;
use qdrant_client::qdrant::value::Kind;
use qdrant_client::qdrant::{
    Condition, CreateCollectionBuilder, DeletePointsBuilder, Distance, Filter, GetPointsBuilder,
    PointId, PointStruct, PointsIdsList, ScrollPointsBuilder, SearchPointsBuilder,
    UpsertPointsBuilder, Value, VectorParamsBuilder,
};
use std::collections::{HashMap, HashSet};
use uuid::Uuid;

use super::{VectorStore, sort_repositories};
use crate::error::VectorStoreError;
use crate::models::{EmbeddingRecord, RawMatch, RepositoryInfo, VectorStoreConfig};

const SCROLL_PAGE: u32 = 256;

/// Qdrant vector store backend.
pub struct QdrantBackend {
    client: Qdrant,
    collection: String,
    embedding_dim: u64,
}

impl QdrantBackend {
    pub fn new(config: &VectorStoreConfig, embedding_dim: u64) -> Result<Self, VectorStoreError> {
        let mut builder = Qdrant::from_url(&config.url);

        if let Some(ref api_key) = config.api_key {
            builder = builder.api_key(api_key.clone());
        }

        let client = builder
            .build()
            .map_err(|e| VectorStoreError::ConnectionError(e.to_string()))?;

        Ok(Self {
            client,
            collection: config.collection.clone(),
            embedding_dim,
        })
    }

    /// Companion collection holding one point per indexed repository.
    fn records_collection(&self) -> String {
        format!("{}_repositories", self.collection)
    }

    async fn collection_exists(&self) -> Result<bool, VectorStoreError> {
        self.exists(&self.collection).await
    }

    async fn exists(&self, name: &str) -> Result<bool, VectorStoreError> {
        self.client
            .collection_exists(name)
            .await
            .map_err(|e| VectorStoreError::CollectionError(e.to_string()))
    }

    async fn create(&self, name: &str, size: u64) -> Result<(), VectorStoreError> {
        if self.exists(name).await? {
            return Ok(());
        }

        tracing::info!(collection = %name, dim = size, "creating collection");
        let create_collection = CreateCollectionBuilder::new(name)
            .vectors_config(VectorParamsBuilder::new(size, Distance::Cosine));

        self.client
            .create_collection(create_collection)
            .await
            .map_err(|e| VectorStoreError::CollectionError(e.to_string()))?;

        Ok(())
    }

    /// Ids of every chunk stored for `repository`.
    async fn repository_point_ids(
        &self,
        repository: &str,
    ) -> Result<Vec<PointId>, VectorStoreError> {
        let mut ids = Vec::new();
        let mut offset: Option<PointId> = None;

        loop {
            let mut scroll_builder = ScrollPointsBuilder::new(&self.collection)
                .filter(Self::repository_filter(repository))
                .limit(SCROLL_PAGE)
                .with_payload(false)
                .with_vectors(false);

            if let Some(off) = offset {
                scroll_builder = scroll_builder.offset(off);
            }

            let response = self
                .client
                .scroll(scroll_builder)
                .await
                .map_err(|e| VectorStoreError::SearchError(e.to_string()))?;

            ids.extend(response.result.into_iter().filter_map(|point| point.id));

            offset = response.next_page_offset;
            if offset.is_none() {
                break;
            }
        }

        Ok(ids)
    }

    async fn delete_ids(
        &self,
        collection: &str,
        ids: Vec<PointId>,
    ) -> Result<(), VectorStoreError> {
        if ids.is_empty() {
            return Ok(());
        }

        let delete = DeletePointsBuilder::new(collection)
            .points(PointsIdsList { ids })
            .wait(true);

        self.client
            .delete_points(delete)
            .await
            .map_err(|e| VectorStoreError::DeleteError(e.to_string()))?;

        Ok(())
    }

    fn repository_filter(repository: &str) -> Filter {
        Filter::must([Condition::matches("repository", repository.to_string())])
    }
}

fn to_payload(record: &EmbeddingRecord) -> HashMap<String, Value> {
    let chunk = &record.chunk;
    let mut payload: HashMap<String, Value> = HashMap::new();
    payload.insert("repository".to_string(), chunk.repository.clone().into());
    payload.insert("file_path".to_string(), chunk.source_path.clone().into());
    payload.insert(
        "chunk_index".to_string(),
        i64::from(chunk.chunk_index).into(),
    );
    payload.insert("content".to_string(), chunk.text.clone().into());
    payload.insert("token_count".to_string(), (chunk.token_count as i64).into());
    payload.insert("truncated".to_string(), chunk.truncated.into());
    if let Some(line_start) = chunk.line_start {
        payload.insert("line_start".to_string(), i64::from(line_start).into());
    }
    if let Some(line_end) = chunk.line_end {
        payload.insert("line_end".to_string(), i64::from(line_end).into());
    }
    payload
}

fn record_point_id(repository: &str) -> String {
    Uuid::new_v5(&Uuid::NAMESPACE_URL, repository.as_bytes()).to_string()
}

fn point_id_string(id: &PointId) -> String {
    match &id.point_id_options {
        Some(PointIdOptions::Uuid(uuid)) => uuid.clone(),
        Some(PointIdOptions::Num(num)) => num.to_string(),
        None => String::new(),
    }
}

fn info_payload(info: &RepositoryInfo) -> HashMap<String, Value> {
    let mut payload: HashMap<String, Value> = HashMap::new();
    payload.insert("repository".to_string(), info.repository.clone().into());
    payload.insert("url".to_string(), info.url.clone().into());
    payload.insert("file_count".to_string(), (info.file_count as i64).into());
    payload.insert("chunk_count".to_string(), (info.chunk_count as i64).into());
    payload.insert("indexed_at".to_string(), info.indexed_at.to_rfc3339().into());
    payload.insert("complete".to_string(), info.complete.into());
    payload
}

fn info_from_payload(payload: &HashMap<String, Value>) -> Option<RepositoryInfo> {
    let indexed_at = string_field(payload, "indexed_at")
        .and_then(|s| DateTime::parse_from_rfc3339(&s).ok())?
        .with_timezone(&Utc);

    Some(RepositoryInfo {
        repository: string_field(payload, "repository")?,
        url: string_field(payload, "url").unwrap_or_default(),
        file_count: u64_field(payload, "file_count").unwrap_or(0),
        chunk_count: u64_field(payload, "chunk_count").unwrap_or(0),
        indexed_at,
        complete: matches!(
            payload.get("complete").and_then(|v| v.kind.as_ref()),
            Some(Kind::BoolValue(true))
        ),
    })
}

fn u64_field(payload: &HashMap<String, Value>, key: &str) -> Option<u64> {
    payload.get(key).and_then(|v| match &v.kind {
        Some(Kind::IntegerValue(n)) => u64::try_from(*n).ok(),
        _ => None,
    })
}

fn string_field(payload: &HashMap<String, Value>, key: &str) -> Option<String> {
    payload.get(key).and_then(|v| match &v.kind {
        Some(Kind::StringValue(s)) => Some(s.clone()),
        _ => None,
    })
}

fn u32_field(payload: &HashMap<String, Value>, key: &str) -> Option<u32> {
    payload.get(key).and_then(|v| match &v.kind {
        Some(Kind::IntegerValue(n)) => u32::try_from(*n).ok(),
        _ => None,
    })
}

#[async_trait]
impl VectorStore for QdrantBackend {
    async fn health_check(&self) -> Result<bool, VectorStoreError> {
        self.client
            .health_check()
            .await
            .map(|_| true)
            .map_err(|e| VectorStoreError::ConnectionError(e.to_string()))
    }

    async fn ensure_collection(&self) -> Result<(), VectorStoreError> {
        self.create(&self.collection, self.embedding_dim).await?;
        self.create(&self.records_collection(), 1).await
    }

    async fn upsert(&self, records: Vec<EmbeddingRecord>) -> Result<(), VectorStoreError> {
        if records.is_empty() {
            return Ok(());
        }

        let mut points = Vec::with_capacity(records.len());
        for record in records {
            if record.vector.len() as u64 != self.embedding_dim {
                return Err(VectorStoreError::DimensionMismatch {
                    expected: self.embedding_dim as usize,
                    actual: record.vector.len(),
                });
            }
            let payload = to_payload(&record);
            points.push(PointStruct::new(record.chunk.id, record.vector, payload));
        }

        let upsert = UpsertPointsBuilder::new(&self.collection, points).wait(true);

        self.client
            .upsert_points(upsert)
            .await
            .map_err(|e| VectorStoreError::UpsertError(e.to_string()))?;

        Ok(())
    }

    async fn query(
        &self,
        vector: Vec<f32>,
        repository_filter: Option<&str>,
        limit: u64,
    ) -> Result<Vec<RawMatch>, VectorStoreError> {
        let mut search_builder =
            SearchPointsBuilder::new(&self.collection, vector, limit).with_payload(true);

        if let Some(repository) = repository_filter {
            search_builder = search_builder.filter(Self::repository_filter(repository));
        }

        let results = self
            .client
            .search_points(search_builder)
            .await
            .map_err(|e| VectorStoreError::SearchError(e.to_string()))?;

        let matches = results
            .result
            .into_iter()
            .map(|point| {
                let payload = point.payload;

                let chunk_id = point.id.as_ref().map(point_id_string).unwrap_or_default();

                RawMatch {
                    chunk_id,
                    score: point.score,
                    content: string_field(&payload, "content").unwrap_or_default(),
                    repository: string_field(&payload, "repository").unwrap_or_default(),
                    file_path: string_field(&payload, "file_path"),
                    line_start: u32_field(&payload, "line_start"),
                    line_end: u32_field(&payload, "line_end"),
                }
            })
            .collect();

        Ok(matches)
    }

    async fn delete_repository(&self, repository: &str) -> Result<bool, VectorStoreError> {
        let mut found = false;

        if self.collection_exists().await? {
            found = !self.repository_point_ids(repository).await?.is_empty();

            let delete = DeletePointsBuilder::new(&self.collection)
                .points(Self::repository_filter(repository))
                .wait(true);

            self.client
                .delete_points(delete)
                .await
                .map_err(|e| VectorStoreError::DeleteError(e.to_string()))?;
        }

        let records = self.records_collection();
        if self.exists(&records).await? {
            let id: PointId = record_point_id(repository).into();
            let existing = self
                .client
                .get_points(GetPointsBuilder::new(&records, vec![id.clone()]))
                .await
                .map_err(|e| VectorStoreError::SearchError(e.to_string()))?;
            found |= !existing.result.is_empty();
            self.delete_ids(&records, vec![id]).await?;
        }

        Ok(found)
    }

    async fn prune_repository(
        &self,
        repository: &str,
        keep: &HashSet<String>,
    ) -> Result<u64, VectorStoreError> {
        if !self.collection_exists().await? {
            return Ok(0);
        }

        let stale: Vec<PointId> = self
            .repository_point_ids(repository)
            .await?
            .into_iter()
            .filter(|id| !keep.contains(&point_id_string(id)))
            .collect();
        let pruned = stale.len() as u64;

        self.delete_ids(&self.collection, stale).await?;
        Ok(pruned)
    }

    async fn save_repository(&self, info: RepositoryInfo) -> Result<(), VectorStoreError> {
        let records = self.records_collection();
        self.create(&records, 1).await?;

        let point = PointStruct::new(
            record_point_id(&info.repository),
            vec![1.0f32],
            info_payload(&info),
        );

        self.client
            .upsert_points(UpsertPointsBuilder::new(&records, vec![point]).wait(true))
            .await
            .map_err(|e| VectorStoreError::UpsertError(e.to_string()))?;

        Ok(())
    }

    async fn list_repositories(&self) -> Result<Vec<RepositoryInfo>, VectorStoreError> {
        let records = self.records_collection();
        if !self.exists(&records).await? {
            return Ok(Vec::new());
        }

        let mut repositories = Vec::new();
        let mut offset: Option<PointId> = None;

        loop {
            let mut scroll_builder = ScrollPointsBuilder::new(&records)
                .limit(SCROLL_PAGE)
                .with_payload(true)
                .with_vectors(false);

            if let Some(off) = offset {
                scroll_builder = scroll_builder.offset(off);
            }

            let response = self
                .client
                .scroll(scroll_builder)
                .await
                .map_err(|e| VectorStoreError::SearchError(e.to_string()))?;

            repositories.extend(
                response
                    .result
                    .iter()
                    .filter_map(|point| info_from_payload(&point.payload)),
            );

            offset = response.next_page_offset;
            if offset.is_none() {
                break;
            }
        }

        Ok(sort_repositories(repositories))
    }

    async fn clear(&self) -> Result<(), VectorStoreError> {
        for name in [self.collection.clone(), self.records_collection()] {
            if self.exists(&name).await? {
                self.client
                    .delete_collection(&name)
                    .await
                    .map_err(|e| VectorStoreError::DeleteError(e.to_string()))?;
            }
        }

        self.ensure_collection().await
    }

    async fn count(&self) -> Result<u64, VectorStoreError> {
        if !self.collection_exists().await? {
            return Ok(0);
        }

        let info = self
            .client
            .collection_info(&self.collection)
            .await
            .map_err(|e| VectorStoreError::CollectionError(e.to_string()))?;

        Ok(info.result.map_or(0, |r| r.points_count.unwrap_or(0)))
    }

    fn name(&self) -> &str {
        &self.collection
    }
}
