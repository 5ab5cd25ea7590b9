use serde::{Deserialize, Serialize};

/// A single text file read from a repository checkout.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceDocument {
    /// Path relative to the repository root, `/`-separated.
    pub path: String,
    pub content: String,
    /// Repository identifier in `owner/name` form.
    pub repository: String,
}

impl SourceDocument {
    pub fn new(
        path: impl Into<String>,
        content: impl Into<String>,
        repository: impl Into<String>,
    ) -> Self {
        Self {
            path: path.into(),
            content: content.into(),
            repository: repository.into(),
        }
    }

    /// True when the document has nothing worth chunking.
    pub fn is_blank(&self) -> bool {
        self.content.trim().is_empty()
    }
}

/// A token-bounded window of a source document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Chunk {
    pub id: String,
    pub text: String,
    pub token_count: usize,
    pub source_path: String,
    pub repository: String,
    /// Position within the source document, gap-free from 0.
    pub chunk_index: u32,
    /// Character offset of the nominal window start.
    pub start_offset: u64,
    /// Character offset of the nominal window end (exclusive).
    pub end_offset: u64,
    pub line_start: Option<u32>,
    pub line_end: Option<u32>,
    /// Set when the window exceeded the per-chunk token ceiling and was cut.
    #[serde(default)]
    pub truncated: bool,
}

impl Chunk {
    pub fn generate_id(repository: &str, source_path: &str, chunk_index: u32) -> String {
        use uuid::Uuid;
        let name = format!("{}/{}:{}", repository, source_path, chunk_index);
        Uuid::new_v5(&Uuid::NAMESPACE_URL, name.as_bytes()).to_string()
    }

    /// Identity of this chunk, detached from its text.
    pub fn to_ref(&self) -> ChunkRef {
        ChunkRef {
            chunk_id: self.id.clone(),
            repository: self.repository.clone(),
            source_path: self.source_path.clone(),
            chunk_index: self.chunk_index,
        }
    }
}

/// Identifies a chunk without carrying its text, used in failure reports.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChunkRef {
    pub chunk_id: String,
    pub repository: String,
    pub source_path: String,
    pub chunk_index: u32,
}

/// An embedded chunk, ready to be written to a vector store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EmbeddingRecord {
    pub vector: Vec<f32>,
    pub chunk: Chunk,
}
