use anyhow::Result;
use clap::Args;
use std::time::Instant;

use crate::cli::output::get_formatter;
use crate::models::{Config, OutputFormat, RepositoryId, SearchResults};
use crate::services::{OpenAiEmbedder, SimilaritySearch, create_backend};

#[derive(Debug, Args)]
pub struct SearchArgs {
    /// Search query
    #[arg(required = true)]
    pub query: String,

    /// Only return results from this repository (owner/name)
    #[arg(long, short = 'r')]
    pub repo: Option<String>,

    /// Maximum number of results
    #[arg(long, short = 'n', allow_negative_numbers = true)]
    pub limit: Option<i64>,

    /// Minimum similarity score (inclusive)
    #[arg(long, allow_negative_numbers = true)]
    pub min_score: Option<f32>,
}

pub async fn handle_search(args: SearchArgs, format: OutputFormat, verbose: bool) -> Result<()> {
    let config = Config::load()?.config;
    let formatter = get_formatter(format);
    let start = Instant::now();

    let repository = args
        .repo
        .as_deref()
        .map(str::parse::<RepositoryId>)
        .transpose()?
        .map(|r| r.full_name());
    let engine = config.engine_config()?;
    let limit = args.limit.unwrap_or(engine.limit() as i64);
    let min_score = args.min_score.unwrap_or(engine.score_threshold());

    let embedder = OpenAiEmbedder::new(&config.embedding)?;
    let store = create_backend(&config.vector_store, config.embedding.dimension as usize).await?;
    let search = SimilaritySearch::new(store);

    if verbose {
        eprintln!(
            "Searching for '{}' (limit {}, min score {})",
            args.query, limit, min_score
        );
    }

    let results = search
        .search_text(&embedder, &args.query, repository.as_deref(), limit, min_score)
        .await?;

    let duration_ms = start.elapsed().as_millis() as u64;
    if verbose {
        eprintln!("Search completed in {}ms", duration_ms);
    }

    let results = SearchResults::new(args.query, results, duration_ms);
    print!("{}", formatter.format_search_results(&results));

    Ok(())
}
