//! Chunk, batch and embed documents, collecting per-batch outcomes.

use futures::StreamExt;
use futures::stream;
use rayon::prelude::*;
use std::collections::HashSet;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

use crate::error::{BatchError, EmbeddingError, IndexError};
use crate::models::{
    Chunk, ChunkRef, EmbeddingRecord, RepositoryId, RepositoryInfo, SourceDocument,
};
use crate::services::batch::{Batch, TokenBatcher};
use crate::services::chunker::TextChunker;
use crate::services::embedding::Embedder;
use crate::services::vector_store::VectorStore;
use crate::utils::retry::{RetryConfig, with_retry};

/// Records per upsert request.
const UPSERT_BATCH_SIZE: usize = 256;

type ProgressFn = dyn Fn(usize, usize) + Send + Sync;

/// A batch that produced no records.
#[derive(Debug)]
pub struct BatchFailure {
    /// Position of the batch in submission order.
    pub batch_index: usize,
    pub chunks: Vec<ChunkRef>,
    pub error: BatchError,
}

/// Outcome of one pipeline run.
#[derive(Debug, Default)]
pub struct EmbeddingReport {
    /// Successful records in submission order.
    pub records: Vec<EmbeddingRecord>,
    pub failures: Vec<BatchFailure>,
    /// Chunks produced by the chunker, including skipped empty ones.
    pub total_chunks: usize,
    pub skipped_empty_chunks: usize,
    pub empty_documents: usize,
    pub truncated_chunks: usize,
    pub batches: usize,
    /// True when the run was stopped before every batch finished.
    pub cancelled: bool,
    /// Stored chunks of the repository that this run no longer produced.
    pub pruned_chunks: usize,
}

impl EmbeddingReport {
    /// Every submitted batch failed.
    pub fn all_failed(&self) -> bool {
        self.batches > 0 && self.failures.len() == self.batches
    }

    /// Every batch was embedded; the records cover the whole repository.
    pub fn is_complete(&self) -> bool {
        self.failures.is_empty() && !self.cancelled
    }

    pub fn failed_chunks(&self) -> usize {
        self.failures.iter().map(|f| f.chunks.len()).sum()
    }
}

/// Drives chunking, batching and embedding for a set of documents.
///
/// The pipeline never retries: a failed batch is reported with the identity
/// of its chunks so the caller can decide what to resubmit.
pub struct EmbeddingPipeline {
    chunker: TextChunker,
    batcher: TokenBatcher,
    embedder: Arc<dyn Embedder>,
    concurrency: usize,
    progress: Option<Box<ProgressFn>>,
}

impl EmbeddingPipeline {
    pub fn new(
        chunker: TextChunker,
        batcher: TokenBatcher,
        embedder: Arc<dyn Embedder>,
        concurrency: usize,
    ) -> Self {
        Self {
            chunker,
            batcher,
            embedder,
            concurrency: concurrency.max(1),
            progress: None,
        }
    }

    /// Called with `(finished_batches, total_batches)` after every batch.
    pub fn on_progress(mut self, callback: impl Fn(usize, usize) + Send + Sync + 'static) -> Self {
        self.progress = Some(Box::new(callback));
        self
    }

    /// See [`chunk_documents`].
    pub fn chunk_documents(
        &self,
        documents: &[SourceDocument],
        report: &mut EmbeddingReport,
    ) -> Vec<Chunk> {
        chunk_documents(&self.chunker, documents, report)
    }

    pub async fn embed_documents(
        &self,
        documents: &[SourceDocument],
        cancel: &CancellationToken,
    ) -> EmbeddingReport {
        let mut report = EmbeddingReport::default();
        let chunks = self.chunk_documents(documents, &mut report);
        let batches = self.batcher.batch(&chunks);
        report.batches = batches.len();

        tracing::debug!(
            documents = documents.len(),
            chunks = chunks.len(),
            batches = batches.len(),
            concurrency = self.concurrency,
            "embedding documents"
        );

        let total = batches.len();
        let embedder = &self.embedder;
        let mut in_flight = stream::iter(batches.into_iter().enumerate().map(|(idx, batch)| {
            async move {
                let result = embedder.embed(batch.texts()).await;
                (idx, batch, result)
            }
        }))
        .buffer_unordered(self.concurrency);

        let mut finished: Vec<(usize, Vec<EmbeddingRecord>)> = Vec::new();
        let mut done = 0;

        loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    tracing::warn!(finished = done, total, "embedding cancelled");
                    report.cancelled = true;
                    break;
                }
                next = in_flight.next() => {
                    let Some((idx, batch, result)) = next else { break };
                    done += 1;
                    match zip_batch(&batch, result) {
                        Ok(records) => {
                            tracing::debug!(batch = idx, chunks = records.len(), tokens = batch.total_tokens, "batch embedded");
                            finished.push((idx, records));
                        }
                        Err(error) => {
                            tracing::warn!(batch = idx, chunks = batch.len(), "batch failed: {}", error);
                            report.failures.push(BatchFailure {
                                batch_index: idx,
                                chunks: batch.chunks.iter().map(|c| c.to_ref()).collect(),
                                error,
                            });
                        }
                    }
                    if let Some(progress) = &self.progress {
                        progress(done, total);
                    }
                }
            }
        }

        finished.sort_by_key(|(idx, _)| *idx);
        report.records = finished.into_iter().flat_map(|(_, r)| r).collect();
        report.failures.sort_by_key(|f| f.batch_index);

        tracing::info!(
            records = report.records.len(),
            failed_batches = report.failures.len(),
            batches = report.batches,
            "embedding finished"
        );
        report
    }

    /// Embed documents and write the successful records to `store`.
    ///
    /// Records embedded before a cancellation are still stored. After a
    /// complete run, chunks of the repository that were not produced again are
    /// removed. The repository record is saved unless every batch failed.
    pub async fn embed_and_store(
        &self,
        repository: &RepositoryId,
        documents: &[SourceDocument],
        store: &dyn VectorStore,
        cancel: &CancellationToken,
    ) -> Result<EmbeddingReport, IndexError> {
        let mut report = self.embed_documents(documents, cancel).await;
        let complete = report.is_complete();
        if report.records.is_empty() && !complete {
            return Ok(report);
        }

        store.ensure_collection().await?;
        let retry = RetryConfig::default();
        for part in report.records.chunks(UPSERT_BATCH_SIZE) {
            with_retry(&retry, || store.upsert(part.to_vec()))
                .await
                .into_result()?;
        }

        let name = repository.full_name();
        if complete {
            let keep: HashSet<String> =
                report.records.iter().map(|r| r.chunk.id.clone()).collect();
            let pruned = store.prune_repository(&name, &keep).await?;
            if pruned > 0 {
                tracing::info!(repository = %name, pruned, "removed stale chunks");
            }
            report.pruned_chunks = pruned as usize;
        }

        if !report.all_failed() {
            let info = RepositoryInfo::indexed(
                repository,
                documents.len() as u64,
                report.records.len() as u64,
                complete,
            );
            store.save_repository(info).await?;
        }
        Ok(report)
    }
}

/// Chunk documents in parallel, dropping chunks with no content.
///
/// The returned chunks are in document order, then chunk order.
pub fn chunk_documents(
    chunker: &TextChunker,
    documents: &[SourceDocument],
    report: &mut EmbeddingReport,
) -> Vec<Chunk> {
    let per_document: Vec<Vec<Chunk>> =
        documents.par_iter().map(|doc| chunker.chunk(doc)).collect();

    report.empty_documents = documents.iter().filter(|d| d.is_blank()).count();

    let mut chunks = Vec::new();
    for chunk in per_document.into_iter().flatten() {
        report.total_chunks += 1;
        if chunk.text.trim().is_empty() {
            report.skipped_empty_chunks += 1;
            continue;
        }
        if chunk.truncated {
            report.truncated_chunks += 1;
        }
        chunks.push(chunk);
    }
    chunks
}

/// Pair each vector with the chunk at the same position.
fn zip_batch(
    batch: &Batch<'_>,
    result: Result<Vec<Vec<f32>>, EmbeddingError>,
) -> Result<Vec<EmbeddingRecord>, BatchError> {
    let vectors = result?;
    if vectors.len() != batch.len() {
        return Err(BatchError::EmbeddingCountMismatch {
            expected: batch.len(),
            actual: vectors.len(),
        });
    }

    Ok(batch
        .chunks
        .iter()
        .zip(vectors)
        .map(|(chunk, vector)| EmbeddingRecord {
            vector,
            chunk: (*chunk).clone(),
        })
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{EngineConfig, EngineSettings};
    use crate::services::tokenizer::EstimateTokenizer;
    use crate::services::vector_store::LocalBackend;
    use async_trait::async_trait;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;
    use tempfile::TempDir;

    /// Embeds each text as `[len, first byte]`, with scripted misbehaviour.
    #[derive(Default)]
    struct FakeEmbedder {
        calls: AtomicUsize,
        /// Call numbers (0-based) that return one vector too few.
        short_calls: Vec<usize>,
        /// Call numbers that fail outright.
        failing_calls: Vec<usize>,
        /// Per-call delay, to force out-of-order completion.
        delays_ms: Vec<u64>,
        in_flight: AtomicUsize,
        max_in_flight: AtomicUsize,
        seen: Mutex<Vec<Vec<String>>>,
    }

    #[async_trait]
    impl Embedder for FakeEmbedder {
        async fn embed(&self, texts: Vec<String>) -> Result<Vec<Vec<f32>>, EmbeddingError> {
            let call = self.calls.fetch_add(1, Ordering::SeqCst);
            let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            self.max_in_flight.fetch_max(now, Ordering::SeqCst);
            self.seen.lock().unwrap().push(texts.clone());

            if let Some(ms) = self.delays_ms.get(call) {
                tokio::time::sleep(Duration::from_millis(*ms)).await;
            }
            self.in_flight.fetch_sub(1, Ordering::SeqCst);

            if self.failing_calls.contains(&call) {
                return Err(EmbeddingError::ServerError {
                    status: reqwest::StatusCode::BAD_REQUEST,
                    body: "rejected".to_string(),
                });
            }
            let mut vectors: Vec<Vec<f32>> = texts
                .iter()
                .map(|t| vec![t.len() as f32, f32::from(t.as_bytes()[0])])
                .collect();
            if self.short_calls.contains(&call) {
                vectors.pop();
            }
            Ok(vectors)
        }

        fn dimension(&self) -> usize {
            2
        }

        fn model(&self) -> &str {
            "fake"
        }
    }

    /// Never answers.
    struct HangingEmbedder;

    #[async_trait]
    impl Embedder for HangingEmbedder {
        async fn embed(&self, _texts: Vec<String>) -> Result<Vec<Vec<f32>>, EmbeddingError> {
            std::future::pending().await
        }

        fn dimension(&self) -> usize {
            2
        }

        fn model(&self) -> &str {
            "hanging"
        }
    }

    /// One 100-char chunk (25 tokens) per document, two chunks per batch.
    fn pipeline(embedder: Arc<dyn Embedder>, concurrency: usize) -> EmbeddingPipeline {
        let config = EngineConfig::new(EngineSettings {
            chunk_size: 100,
            chunk_overlap: 0,
            max_tokens_per_batch: 50,
            ..Default::default()
        })
        .unwrap();
        let chunker = TextChunker::new(&config, Arc::new(EstimateTokenizer::default()));
        EmbeddingPipeline::new(chunker, TokenBatcher::new(&config), embedder, concurrency)
    }

    fn documents(count: usize) -> Vec<SourceDocument> {
        (0..count)
            .map(|i| {
                let letter = (b'a' + i as u8) as char;
                SourceDocument::new(
                    format!("file{i}.rs"),
                    letter.to_string().repeat(100),
                    "octo/widgets",
                )
            })
            .collect()
    }

    fn widgets() -> RepositoryId {
        "octo/widgets".parse().unwrap()
    }

    fn record_paths(report: &EmbeddingReport) -> Vec<String> {
        report
            .records
            .iter()
            .map(|r| r.chunk.source_path.clone())
            .collect()
    }

    #[tokio::test]
    async fn test_all_batches_succeed() {
        let embedder = Arc::new(FakeEmbedder::default());
        let report = pipeline(embedder.clone(), 2)
            .embed_documents(&documents(5), &CancellationToken::new())
            .await;

        assert_eq!(report.total_chunks, 5);
        assert_eq!(report.batches, 3);
        assert!(report.failures.is_empty());
        assert!(!report.cancelled);
        assert_eq!(
            record_paths(&report),
            vec!["file0.rs", "file1.rs", "file2.rs", "file3.rs", "file4.rs"]
        );
        for record in &report.records {
            let first = record.chunk.text.as_bytes()[0];
            assert_eq!(record.vector, vec![100.0, f32::from(first)]);
        }
        assert_eq!(embedder.calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_records_in_submission_order_despite_completion_order() {
        let embedder = Arc::new(FakeEmbedder {
            delays_ms: vec![60, 30, 0],
            ..Default::default()
        });
        let report = pipeline(embedder, 3)
            .embed_documents(&documents(6), &CancellationToken::new())
            .await;

        assert_eq!(report.records.len(), 6);
        let paths = record_paths(&report);
        let expected: Vec<String> = (0..6).map(|i| format!("file{i}.rs")).collect();
        assert_eq!(paths, expected);
    }

    #[tokio::test]
    async fn test_count_mismatch_fails_only_that_batch() {
        let embedder = Arc::new(FakeEmbedder {
            short_calls: vec![0],
            ..Default::default()
        });
        let report = pipeline(embedder, 1)
            .embed_documents(&documents(4), &CancellationToken::new())
            .await;

        assert_eq!(report.failures.len(), 1);
        let failure = &report.failures[0];
        assert_eq!(failure.batch_index, 0);
        assert!(matches!(
            failure.error,
            BatchError::EmbeddingCountMismatch {
                expected: 2,
                actual: 1
            }
        ));
        let failed: Vec<&str> = failure
            .chunks
            .iter()
            .map(|c| c.source_path.as_str())
            .collect();
        assert_eq!(failed, vec!["file0.rs", "file1.rs"]);
        assert_eq!(record_paths(&report), vec!["file2.rs", "file3.rs"]);
        assert!(!report.all_failed());
    }

    #[tokio::test]
    async fn test_call_failure_reported_per_batch() {
        let embedder = Arc::new(FakeEmbedder {
            failing_calls: vec![1],
            ..Default::default()
        });
        let report = pipeline(embedder, 1)
            .embed_documents(&documents(6), &CancellationToken::new())
            .await;

        assert_eq!(report.failures.len(), 1);
        assert_eq!(report.failures[0].batch_index, 1);
        assert!(matches!(
            report.failures[0].error,
            BatchError::EmbeddingCallFailed(_)
        ));
        assert_eq!(report.failed_chunks(), 2);
        assert_eq!(report.records.len(), 4);
    }

    #[tokio::test]
    async fn test_all_failed() {
        let embedder = Arc::new(FakeEmbedder {
            failing_calls: vec![0, 1],
            ..Default::default()
        });
        let report = pipeline(embedder, 2)
            .embed_documents(&documents(3), &CancellationToken::new())
            .await;

        assert!(report.all_failed());
        assert!(report.records.is_empty());
    }

    #[tokio::test]
    async fn test_empty_documents_and_chunks_counted() {
        let embedder = Arc::new(FakeEmbedder::default());
        // Window 1 of the second document is pure whitespace.
        let docs = vec![
            SourceDocument::new("empty.rs", "  \n ", "octo/widgets"),
            SourceDocument::new(
                "gap.rs",
                format!("{}{}", "x".repeat(100), " ".repeat(100)),
                "octo/widgets",
            ),
        ];
        let report = pipeline(embedder, 1)
            .embed_documents(&docs, &CancellationToken::new())
            .await;

        assert_eq!(report.empty_documents, 1);
        assert_eq!(report.total_chunks, 2);
        assert_eq!(report.skipped_empty_chunks, 1);
        assert_eq!(report.records.len(), 1);
        assert_eq!(report.batches, 1);
    }

    #[tokio::test]
    async fn test_no_documents() {
        let embedder = Arc::new(FakeEmbedder::default());
        let report = pipeline(embedder.clone(), 4)
            .embed_documents(&[], &CancellationToken::new())
            .await;

        assert_eq!(report.batches, 0);
        assert!(report.records.is_empty());
        assert!(!report.all_failed());
        assert_eq!(embedder.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_concurrency_bound() {
        let embedder = Arc::new(FakeEmbedder {
            delays_ms: vec![20; 10],
            ..Default::default()
        });
        let report = pipeline(embedder.clone(), 2)
            .embed_documents(&documents(20), &CancellationToken::new())
            .await;

        assert_eq!(report.records.len(), 20);
        assert!(embedder.max_in_flight.load(Ordering::SeqCst) <= 2);
    }

    #[tokio::test]
    async fn test_cancel_before_start() {
        let cancel = CancellationToken::new();
        cancel.cancel();
        let report = pipeline(Arc::new(HangingEmbedder), 2)
            .embed_documents(&documents(4), &cancel)
            .await;

        assert!(report.cancelled);
        assert!(report.records.is_empty());
        assert_eq!(report.batches, 2);
    }

    #[tokio::test]
    async fn test_cancel_keeps_finished_records() {
        let embedder = Arc::new(FakeEmbedder {
            delays_ms: vec![0, 10_000],
            ..Default::default()
        });
        let cancel = CancellationToken::new();
        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(200)).await;
            trigger.cancel();
        });

        let report = pipeline(embedder, 1)
            .embed_documents(&documents(4), &cancel)
            .await;

        assert!(report.cancelled);
        assert_eq!(record_paths(&report), vec!["file0.rs", "file1.rs"]);
    }

    #[tokio::test]
    async fn test_progress_callback() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        let report = pipeline(Arc::new(FakeEmbedder::default()), 1)
            .on_progress(move |done, total| sink.lock().unwrap().push((done, total)))
            .embed_documents(&documents(5), &CancellationToken::new())
            .await;

        assert_eq!(report.batches, 3);
        assert_eq!(*seen.lock().unwrap(), vec![(1, 3), (2, 3), (3, 3)]);
    }

    #[tokio::test]
    async fn test_embed_and_store() {
        let dir = TempDir::new().unwrap();
        let store = LocalBackend::open(dir.path().join("store.json"), "test".to_string(), 2)
            .await
            .unwrap();

        let report = pipeline(Arc::new(FakeEmbedder::default()), 2)
            .embed_and_store(&widgets(), &documents(3), &store, &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(report.records.len(), 3);
        assert_eq!(store.count().await.unwrap(), 3);
        let repos = store.list_repositories().await.unwrap();
        assert_eq!(repos[0].repository, "octo/widgets");
        assert_eq!(repos[0].url, "https://github.com/octo/widgets");
        assert_eq!(repos[0].file_count, 3);
        assert_eq!(repos[0].chunk_count, 3);
        assert!(repos[0].complete);
    }

    #[tokio::test]
    async fn test_reindex_removes_chunks_no_longer_produced() {
        let dir = TempDir::new().unwrap();
        let store = LocalBackend::open(dir.path().join("store.json"), "test".to_string(), 2)
            .await
            .unwrap();
        let pipeline = pipeline(Arc::new(FakeEmbedder::default()), 2);

        let first = vec![
            SourceDocument::new("a.rs", "a".repeat(500), "octo/widgets"),
            SourceDocument::new("gone.rs", "g".repeat(100), "octo/widgets"),
        ];
        let report = pipeline
            .embed_and_store(&widgets(), &first, &store, &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(report.records.len(), 6);
        assert_eq!(store.count().await.unwrap(), 6);

        // a.rs shrank to one window and gone.rs was deleted.
        let second = vec![SourceDocument::new("a.rs", "a".repeat(100), "octo/widgets")];
        let report = pipeline
            .embed_and_store(&widgets(), &second, &store, &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(report.records.len(), 1);
        assert_eq!(report.pruned_chunks, 5);
        assert_eq!(store.count().await.unwrap(), 1);
        let matches = store.query(vec![1.0, 0.0], None, 10).await.unwrap();
        assert_eq!(matches[0].file_path.as_deref(), Some("a.rs"));

        let repos = store.list_repositories().await.unwrap();
        assert_eq!(repos[0].file_count, 1);
        assert_eq!(repos[0].chunk_count, 1);
    }

    #[tokio::test]
    async fn test_partial_run_keeps_previous_chunks() {
        let dir = TempDir::new().unwrap();
        let store = LocalBackend::open(dir.path().join("store.json"), "test".to_string(), 2)
            .await
            .unwrap();

        pipeline(Arc::new(FakeEmbedder::default()), 1)
            .embed_and_store(&widgets(), &documents(4), &store, &CancellationToken::new())
            .await
            .unwrap();

        // One document vanished, but the second batch fails, so nothing may be pruned.
        let flaky = Arc::new(FakeEmbedder {
            failing_calls: vec![1],
            ..Default::default()
        });
        let report = pipeline(flaky, 1)
            .embed_and_store(&widgets(), &documents(3), &store, &CancellationToken::new())
            .await
            .unwrap();
        assert!(!report.is_complete());
        assert_eq!(report.pruned_chunks, 0);
        assert_eq!(store.count().await.unwrap(), 4);

        let repos = store.list_repositories().await.unwrap();
        assert!(!repos[0].complete);
        assert_eq!(repos[0].chunk_count, 2);
    }

    #[tokio::test]
    async fn test_all_failed_run_saves_no_record() {
        let dir = TempDir::new().unwrap();
        let store = LocalBackend::open(dir.path().join("store.json"), "test".to_string(), 2)
            .await
            .unwrap();
        let embedder = Arc::new(FakeEmbedder {
            failing_calls: vec![0, 1],
            ..Default::default()
        });

        let report = pipeline(embedder, 1)
            .embed_and_store(&widgets(), &documents(3), &store, &CancellationToken::new())
            .await
            .unwrap();

        assert!(report.all_failed());
        assert_eq!(store.count().await.unwrap(), 0);
        assert!(store.list_repositories().await.unwrap().is_empty());
    }
}
