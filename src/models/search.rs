//! Search-related models for queries and results.

use serde::{Deserialize, Serialize};

/// Output format for command results.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutputFormat {
    /// Human-readable text format
    #[default]
    Text,
    /// Machine-parseable JSON format
    Json,
    /// Documentation-friendly Markdown format
    Markdown,
}

impl std::str::FromStr for OutputFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "text" => Ok(OutputFormat::Text),
            "json" => Ok(OutputFormat::Json),
            "markdown" | "md" => Ok(OutputFormat::Markdown),
            _ => Err(format!("unknown output format: {}", s)),
        }
    }
}

impl std::fmt::Display for OutputFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            OutputFormat::Text => write!(f, "text"),
            OutputFormat::Json => write!(f, "json"),
            OutputFormat::Markdown => write!(f, "markdown"),
        }
    }
}

/// A stored point as returned by a vector store query, before thresholding.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawMatch {
    pub chunk_id: String,
    pub score: f32,
    pub content: String,
    pub repository: String,
    pub file_path: Option<String>,
    pub line_start: Option<u32>,
    pub line_end: Option<u32>,
}

/// A single ranked search hit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchResult {
    /// Chunk content
    pub content: String,

    /// Human-readable origin, e.g. `owner/name - src/lib.rs:10-42`
    pub source: String,

    /// Similarity score
    pub score: f32,

    pub chunk_id: String,
    pub repository: String,
    pub file_path: Option<String>,
    pub line_start: Option<u32>,
    pub line_end: Option<u32>,
}

impl From<RawMatch> for SearchResult {
    fn from(raw: RawMatch) -> Self {
        let source = format_source(
            &raw.repository,
            raw.file_path.as_deref(),
            raw.line_start,
            raw.line_end,
        );
        Self {
            content: raw.content,
            source,
            score: raw.score,
            chunk_id: raw.chunk_id,
            repository: raw.repository,
            file_path: raw.file_path,
            line_start: raw.line_start,
            line_end: raw.line_end,
        }
    }
}

fn format_source(
    repository: &str,
    file_path: Option<&str>,
    line_start: Option<u32>,
    line_end: Option<u32>,
) -> String {
    match (file_path.filter(|p| !p.is_empty()), line_start, line_end) {
        (Some(path), Some(start), Some(end)) => {
            format!("{} - {}:{}-{}", repository, path, start, end)
        }
        (Some(path), _, _) => format!("{} - {}", repository, path),
        (None, _, _) => repository.to_string(),
    }
}

/// Collection of search results.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchResults {
    /// Query that was executed
    pub query: String,

    /// Matching results
    pub results: Vec<SearchResult>,

    /// Total matches returned
    pub total: u64,

    /// Query execution time in milliseconds
    pub duration_ms: u64,
}

impl SearchResults {
    pub fn new(query: String, results: Vec<SearchResult>, duration_ms: u64) -> Self {
        let total = results.len() as u64;
        Self {
            query,
            results,
            total,
            duration_ms,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.results.is_empty()
    }

    pub fn len(&self) -> usize {
        self.results.len()
    }
}
