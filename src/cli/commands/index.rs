//! Index command implementation.

use anyhow::{Context, Result};
use clap::Args;
use indicatif::{ProgressBar, ProgressStyle};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::cli::output::{IndexStats, get_formatter};
use crate::models::{Config, OutputFormat, RepositoryId};
use crate::services::{
    EmbeddingPipeline, EmbeddingReport, OpenAiEmbedder, TextChunker, TokenBatcher,
    chunk_documents, create_backend, create_tokenizer,
};
use crate::sources::{DirectorySource, DocumentSource};

#[derive(Debug, Args)]
pub struct IndexArgs {
    /// Repository in owner/name form
    pub repository: String,

    /// Local checkout of the repository
    #[arg(long, short = 'p', default_value = ".")]
    pub path: PathBuf,

    /// File patterns to exclude (can be specified multiple times)
    #[arg(long, short = 'e')]
    pub exclude: Vec<String>,

    /// Chunk and batch without embedding or storing anything
    #[arg(long)]
    pub dry_run: bool,
}

pub async fn handle_index(
    args: IndexArgs,
    format: OutputFormat,
    verbose: bool,
    cancel: CancellationToken,
) -> Result<()> {
    let config = Config::load()?.config;
    let formatter = get_formatter(format);
    let start_time = Instant::now();

    let repository: RepositoryId = args.repository.parse()?;
    let engine = config.engine_config()?;

    let source = DirectorySource::from_config(&args.path, &config.indexing, &args.exclude)?;
    let scan = source
        .scan(&repository)
        .with_context(|| format!("failed to read {}", args.path.display()))?;
    let documents = scan.documents;
    let skipped_files = scan.skipped.len() as u64;

    if verbose {
        for skipped in &scan.skipped {
            eprintln!("Skipped {}: {}", skipped.path, skipped.reason);
        }
    }

    if documents.is_empty() {
        println!("{}", formatter.format_message("No files found to index."));
        return Ok(());
    }

    if verbose {
        eprintln!("Found {} files in {}", documents.len(), source.root().display());
    }

    let tokenizer = create_tokenizer(&config.indexing)?;
    let chunker = TextChunker::new(&engine, tokenizer);
    let batcher = TokenBatcher::new(&engine);

    if args.dry_run {
        let mut report = EmbeddingReport::default();
        let chunks = chunk_documents(&chunker, &documents, &mut report);
        report.batches = batcher.batch(&chunks).len();

        let mut stats = IndexStats::from_report(&repository.full_name(), documents.len(), &report);
        stats.dry_run = true;
        stats.skipped_files = skipped_files;
        stats.duration_ms = start_time.elapsed().as_millis() as u64;
        print!("{}", formatter.format_index_stats(&stats));
        return Ok(());
    }

    let embedder = Arc::new(OpenAiEmbedder::new(&config.embedding)?);
    let store = create_backend(&config.vector_store, config.embedding.dimension as usize).await?;

    let pb = ProgressBar::new(0);
    pb.set_style(
        ProgressStyle::default_bar()
            .template(
                "{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} batches ({eta})",
            )
            .context("invalid progress template")?
            .progress_chars("#>-"),
    );
    let progress = pb.clone();

    let pipeline = EmbeddingPipeline::new(
        chunker,
        batcher,
        embedder,
        config.embedding.concurrency,
    )
    .on_progress(move |done, total| {
        progress.set_length(total as u64);
        progress.set_position(done as u64);
    });

    let report = pipeline
        .embed_and_store(&repository, &documents, store.as_ref(), &cancel)
        .await?;
    pb.finish_and_clear();

    let mut stats = IndexStats::from_report(&repository.full_name(), documents.len(), &report);
    stats.skipped_files = skipped_files;
    stats.duration_ms = start_time.elapsed().as_millis() as u64;
    print!("{}", formatter.format_index_stats(&stats));

    if verbose && format == OutputFormat::Text {
        for failure in &stats.failures {
            eprintln!(
                "Batch {} failed ({} chunks): {}",
                failure.batch_index, failure.chunks, failure.error
            );
            for file in &failure.files {
                eprintln!("  {}", file);
            }
        }
    }

    if report.all_failed() {
        anyhow::bail!(
            "every embedding batch failed ({} batches); check `repo-search status`",
            report.batches
        );
    }
    if report.cancelled {
        anyhow::bail!("indexing interrupted; {} chunks stored", report.records.len());
    }

    Ok(())
}
