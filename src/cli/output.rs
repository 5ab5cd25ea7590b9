use serde::Serialize;
use std::fmt::Write as FmtWrite;

use crate::models::{OutputFormat, RepositoryInfo, SearchResults};
use crate::services::EmbeddingReport;

pub trait Formatter {
    fn format_search_results(&self, results: &SearchResults) -> String;
    fn format_status(&self, status: &StatusInfo) -> String;
    fn format_index_stats(&self, stats: &IndexStats) -> String;
    fn format_repositories(&self, repos: &[RepositoryInfo]) -> String;
    fn format_message(&self, message: &str) -> String;
    fn format_error(&self, error: &str) -> String;
}

#[derive(Debug, Clone, Serialize)]
pub struct StatusInfo {
    pub embedding_url: String,
    pub embedding_model: String,
    pub embedding_connected: bool,
    pub embedding_error: Option<String>,
    pub tokenizer: String,
    pub vector_store_driver: String,
    /// Server URL or store file, depending on the driver
    pub vector_store_location: String,
    pub vector_store_connected: bool,
    pub vector_store_points: u64,
    pub collection: String,
    pub repositories: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct FailureInfo {
    pub batch_index: usize,
    pub error: String,
    pub files: Vec<String>,
    pub chunks: usize,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct IndexStats {
    pub repository: String,
    pub dry_run: bool,
    pub files_indexed: u64,
    pub skipped_files: u64,
    pub empty_files: u64,
    pub chunks_created: u64,
    pub chunks_embedded: u64,
    pub skipped_empty_chunks: u64,
    pub truncated_chunks: u64,
    pub batches: u64,
    pub failed_batches: u64,
    pub pruned_chunks: u64,
    pub failures: Vec<FailureInfo>,
    pub cancelled: bool,
    pub duration_ms: u64,
}

impl IndexStats {
    pub fn from_report(repository: &str, files: usize, report: &EmbeddingReport) -> Self {
        let failures = report
            .failures
            .iter()
            .map(|f| {
                let mut files: Vec<String> =
                    f.chunks.iter().map(|c| c.source_path.clone()).collect();
                files.dedup();
                FailureInfo {
                    batch_index: f.batch_index,
                    error: f.error.to_string(),
                    files,
                    chunks: f.chunks.len(),
                }
            })
            .collect::<Vec<_>>();

        Self {
            repository: repository.to_string(),
            dry_run: false,
            files_indexed: files as u64,
            skipped_files: 0,
            empty_files: report.empty_documents as u64,
            chunks_created: report.total_chunks as u64,
            chunks_embedded: report.records.len() as u64,
            skipped_empty_chunks: report.skipped_empty_chunks as u64,
            truncated_chunks: report.truncated_chunks as u64,
            batches: report.batches as u64,
            failed_batches: failures.len() as u64,
            pruned_chunks: report.pruned_chunks as u64,
            failures,
            cancelled: report.cancelled,
            duration_ms: 0,
        }
    }
}

/// Run a writer against a fresh buffer. Writing into a `String` cannot fail.
fn render(write: impl FnOnce(&mut String) -> std::fmt::Result) -> String {
    let mut output = String::new();
    let _ = write(&mut output);
    output
}

fn completeness(repo: &RepositoryInfo) -> &'static str {
    if repo.complete { "" } else { " (partial)" }
}

fn preview(content: &str, max_chars: usize) -> String {
    let preview: String = content.chars().take(max_chars).collect();
    if content.chars().count() > max_chars {
        format!("{}...", preview)
    } else {
        preview
    }
}

pub struct TextFormatter;

impl Formatter for TextFormatter {
    fn format_search_results(&self, results: &SearchResults) -> String {
        if results.is_empty() {
            return format!("No results found for: {}\n", results.query);
        }

        render(|output| {
            writeln!(output, "Search results for: \"{}\"", results.query)?;
            writeln!(
                output,
                "Found {} results in {}ms\n",
                results.total, results.duration_ms
            )?;

            for (i, result) in results.results.iter().enumerate() {
                writeln!(output, "{}. [Score: {:.3}]", i + 1, result.score)?;
                writeln!(output, "   Source: {}", result.source)?;
                writeln!(output, "   ---")?;
                for line in preview(&result.content, 200).lines() {
                    writeln!(output, "   {}", line)?;
                }
                writeln!(output)?;
            }
            Ok(())
        })
    }

    fn format_status(&self, status: &StatusInfo) -> String {
        render(|output| {
            writeln!(output, "Status")?;
            writeln!(output, "------")?;

            let embedding_status = if status.embedding_connected {
                "[CONNECTED]"
            } else {
                "[UNAVAILABLE]"
            };
            writeln!(output, "Embeddings:    {}", embedding_status)?;
            writeln!(output, "  URL:         {}", status.embedding_url)?;
            writeln!(output, "  Model:       {}", status.embedding_model)?;
            writeln!(output, "  Tokenizer:   {}", status.tokenizer)?;
            if let Some(ref error) = status.embedding_error {
                writeln!(output, "  Error:       {}", error)?;
            }
            writeln!(output)?;

            let vector_status = if status.vector_store_connected {
                "[CONNECTED]"
            } else {
                "[DISCONNECTED]"
            };
            writeln!(
                output,
                "Vector Store:  {} ({})",
                status.vector_store_driver, vector_status
            )?;
            writeln!(output, "  Location:    {}", status.vector_store_location)?;
            if status.vector_store_connected {
                writeln!(output, "  Collection:  {}", status.collection)?;
                writeln!(output, "  Points:      {}", status.vector_store_points)?;
                writeln!(output, "  Repos:       {}", status.repositories)?;
            }
            Ok(())
        })
    }

    fn format_index_stats(&self, stats: &IndexStats) -> String {
        render(|output| {
            if stats.dry_run {
                writeln!(output, "Dry Run: {}", stats.repository)?;
                writeln!(output, "------------------")?;
            } else if stats.cancelled {
                writeln!(output, "Indexing Interrupted: {}", stats.repository)?;
                writeln!(output, "------------------------")?;
            } else {
                writeln!(output, "Indexing Complete: {}", stats.repository)?;
                writeln!(output, "-----------------")?;
            }
            writeln!(output, "Files read: {}", stats.files_indexed)?;
            if stats.skipped_files > 0 {
                writeln!(output, "Files skipped: {}", stats.skipped_files)?;
            }
            if stats.empty_files > 0 {
                writeln!(output, "Empty files: {}", stats.empty_files)?;
            }
            writeln!(output, "Chunks created: {}", stats.chunks_created)?;
            if stats.skipped_empty_chunks > 0 {
                writeln!(output, "Empty chunks skipped: {}", stats.skipped_empty_chunks)?;
            }
            if stats.truncated_chunks > 0 {
                writeln!(output, "Chunks truncated: {}", stats.truncated_chunks)?;
            }
            writeln!(output, "Batches: {}", stats.batches)?;
            if !stats.dry_run {
                writeln!(output, "Chunks embedded: {}", stats.chunks_embedded)?;
                writeln!(output, "Failed batches: {}", stats.failed_batches)?;
                if stats.pruned_chunks > 0 {
                    writeln!(output, "Stale chunks removed: {}", stats.pruned_chunks)?;
                }
            }
            writeln!(output, "Duration: {}ms", stats.duration_ms)?;
            Ok(())
        })
    }

    fn format_repositories(&self, repos: &[RepositoryInfo]) -> String {
        if repos.is_empty() {
            return "No repositories indexed.\n".to_string();
        }

        render(|output| {
            writeln!(output, "Repositories")?;
            writeln!(output, "------------")?;
            for repo in repos {
                writeln!(output, "  {}{}", repo.repository, completeness(repo))?;
                writeln!(output, "    URL:     {}", repo.url)?;
                writeln!(
                    output,
                    "    Indexed: {} ({} files, {} chunks)",
                    repo.indexed_at.format("%Y-%m-%d %H:%M:%S UTC"),
                    repo.file_count,
                    repo.chunk_count
                )?;
            }
            Ok(())
        })
    }

    fn format_message(&self, message: &str) -> String {
        format!("{}\n", message)
    }

    fn format_error(&self, error: &str) -> String {
        format!("Error: {}\n", error)
    }
}

pub struct JsonFormatter {
    pub pretty: bool,
}

impl JsonFormatter {
    pub fn new(pretty: bool) -> Self {
        Self { pretty }
    }

    fn to_json<T: Serialize + ?Sized>(&self, value: &T) -> String {
        let result = if self.pretty {
            serde_json::to_string_pretty(value)
        } else {
            serde_json::to_string(value)
        };
        result.unwrap_or_else(|e| serde_json::json!({"error": e.to_string()}).to_string())
    }
}

impl Formatter for JsonFormatter {
    fn format_search_results(&self, results: &SearchResults) -> String {
        self.to_json(results)
    }

    fn format_status(&self, status: &StatusInfo) -> String {
        let json = serde_json::json!({
            "embedding": {
                "url": status.embedding_url,
                "model": status.embedding_model,
                "connected": status.embedding_connected,
                "error": status.embedding_error,
                "tokenizer": status.tokenizer,
            },
            "vector_store": {
                "driver": status.vector_store_driver,
                "location": status.vector_store_location,
                "connected": status.vector_store_connected,
                "collection": status.collection,
                "points": status.vector_store_points,
                "repositories": status.repositories,
            }
        });
        self.to_json(&json)
    }

    fn format_index_stats(&self, stats: &IndexStats) -> String {
        self.to_json(stats)
    }

    fn format_repositories(&self, repos: &[RepositoryInfo]) -> String {
        self.to_json(&serde_json::json!({ "repositories": repos }))
    }

    fn format_message(&self, message: &str) -> String {
        serde_json::json!({"message": message}).to_string()
    }

    fn format_error(&self, error: &str) -> String {
        serde_json::json!({"error": error}).to_string()
    }
}

pub struct MarkdownFormatter;

impl Formatter for MarkdownFormatter {
    fn format_search_results(&self, results: &SearchResults) -> String {
        if results.is_empty() {
            return format!("## No results found\n\nQuery: `{}`\n", results.query);
        }

        render(|output| {
            writeln!(output, "## Search Results\n")?;
            writeln!(output, "**Query:** `{}`\n", results.query)?;
            writeln!(
                output,
                "Found {} results in {}ms\n",
                results.total, results.duration_ms
            )?;

            for (i, result) in results.results.iter().enumerate() {
                writeln!(output, "### {}. Score: {:.3}\n", i + 1, result.score)?;
                writeln!(output, "**Source:** `{}`\n", result.source)?;
                writeln!(output, "```")?;
                writeln!(output, "{}", result.content)?;
                writeln!(output, "```\n")?;
            }
            Ok(())
        })
    }

    fn format_status(&self, status: &StatusInfo) -> String {
        render(|output| {
            writeln!(output, "## Status\n")?;

            let embedding_status = if status.embedding_connected { "✅" } else { "❌" };
            writeln!(output, "### Embeddings {}\n", embedding_status)?;
            writeln!(output, "- **URL:** `{}`", status.embedding_url)?;
            writeln!(output, "- **Model:** {}", status.embedding_model)?;
            writeln!(output, "- **Tokenizer:** {}", status.tokenizer)?;
            if let Some(ref error) = status.embedding_error {
                writeln!(output, "- **Error:** {}", error)?;
            }
            writeln!(output)?;

            let vector_status = if status.vector_store_connected {
                "✅"
            } else {
                "❌"
            };
            writeln!(
                output,
                "### Vector Store ({}) {}\n",
                status.vector_store_driver, vector_status
            )?;
            writeln!(output, "- **Location:** `{}`", status.vector_store_location)?;
            writeln!(output, "- **Collection:** {}", status.collection)?;
            writeln!(output, "- **Points:** {}", status.vector_store_points)?;
            writeln!(output, "- **Repositories:** {}", status.repositories)?;
            Ok(())
        })
    }

    fn format_index_stats(&self, stats: &IndexStats) -> String {
        render(|output| {
            let title = if stats.dry_run {
                "Dry Run"
            } else if stats.cancelled {
                "Indexing Interrupted"
            } else {
                "Indexing Complete"
            };
            writeln!(output, "## {}: `{}`\n", title, stats.repository)?;
            writeln!(output, "| Metric | Value |")?;
            writeln!(output, "|--------|-------|")?;
            writeln!(output, "| Files read | {} |", stats.files_indexed)?;
            writeln!(output, "| Files skipped | {} |", stats.skipped_files)?;
            writeln!(output, "| Empty files | {} |", stats.empty_files)?;
            writeln!(output, "| Chunks created | {} |", stats.chunks_created)?;
            writeln!(output, "| Empty chunks skipped | {} |", stats.skipped_empty_chunks)?;
            writeln!(output, "| Chunks truncated | {} |", stats.truncated_chunks)?;
            writeln!(output, "| Batches | {} |", stats.batches)?;
            if !stats.dry_run {
                writeln!(output, "| Chunks embedded | {} |", stats.chunks_embedded)?;
                writeln!(output, "| Failed batches | {} |", stats.failed_batches)?;
                writeln!(output, "| Stale chunks removed | {} |", stats.pruned_chunks)?;
            }
            writeln!(output, "| Duration | {}ms |", stats.duration_ms)?;
            Ok(())
        })
    }

    fn format_repositories(&self, repos: &[RepositoryInfo]) -> String {
        if repos.is_empty() {
            return "## Repositories\n\n*No repositories indexed.*\n".to_string();
        }

        render(|output| {
            writeln!(output, "## Repositories\n")?;
            writeln!(output, "| Repository | Files | Chunks | Indexed |")?;
            writeln!(output, "|------------|-------|--------|---------|")?;
            for repo in repos {
                writeln!(
                    output,
                    "| [`{}`]({}){} | {} | {} | {} |",
                    repo.repository,
                    repo.url,
                    completeness(repo),
                    repo.file_count,
                    repo.chunk_count,
                    repo.indexed_at.format("%Y-%m-%d %H:%M")
                )?;
            }
            Ok(())
        })
    }

    fn format_message(&self, message: &str) -> String {
        format!("> {}\n", message)
    }

    fn format_error(&self, error: &str) -> String {
        format!("> ⚠️ **Error:** {}\n", error)
    }
}

pub fn get_formatter(format: OutputFormat) -> Box<dyn Formatter> {
    match format {
        OutputFormat::Text => Box::new(TextFormatter),
        OutputFormat::Json => Box::new(JsonFormatter::new(true)),
        OutputFormat::Markdown => Box::new(MarkdownFormatter),
    }
}
