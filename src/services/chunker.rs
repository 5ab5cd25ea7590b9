//! Text chunking with overlap for optimal embedding.

use std::sync::Arc;

use crate::models::{Chunk, EngineConfig, SourceDocument};
use crate::services::tokenizer::TokenCounter;

/// Splits documents into overlapping, token-bounded chunks.
///
/// Window size and overlap are measured in characters. Windows start every
/// `chunk_size - chunk_overlap` characters, so neighbours share exactly
/// `chunk_overlap` characters and the last window ends at the end of the text.
#[derive(Clone)]
pub struct TextChunker {
    chunk_size: usize,
    overlap: usize,
    max_tokens: usize,
    tokenizer: Arc<dyn TokenCounter>,
}

impl TextChunker {
    pub fn new(config: &EngineConfig, tokenizer: Arc<dyn TokenCounter>) -> Self {
        Self {
            chunk_size: config.chunk_size(),
            overlap: config.chunk_overlap(),
            max_tokens: config.max_tokens_per_chunk(),
            tokenizer,
        }
    }

    /// Chunk a document into overlapping segments.
    pub fn chunk(&self, document: &SourceDocument) -> Vec<Chunk> {
        if document.is_blank() {
            return Vec::new();
        }

        self.split_with_overlap(&document.content)
            .into_iter()
            .enumerate()
            .map(|(idx, window)| self.build_chunk(document, idx as u32, window))
            .collect()
    }

    fn build_chunk(&self, document: &SourceDocument, chunk_index: u32, window: Window) -> Chunk {
        let mut text = window.text;
        let mut token_count = self.tokenizer.count_tokens(&text);
        let mut truncated = false;

        if token_count > self.max_tokens {
            let limit = i64::try_from(self.max_tokens).unwrap_or(i64::MAX);
            // limit is non-negative, truncation cannot fail
            if let Ok(cut) = self.tokenizer.truncate_to_tokens(&text, limit) {
                tracing::warn!(
                    path = %document.path,
                    chunk_index,
                    tokens = token_count,
                    max_tokens = self.max_tokens,
                    "truncating oversized chunk"
                );
                text = cut;
                token_count = self.tokenizer.count_tokens(&text);
                truncated = true;
            }
        }

        // A trailing newline belongs to the line it terminates.
        let body = text.strip_suffix('\n').unwrap_or(&text);
        let line_end = window.line_start + body.matches('\n').count() as u32;

        Chunk {
            id: Chunk::generate_id(&document.repository, &document.path, chunk_index),
            text,
            token_count,
            source_path: document.path.clone(),
            repository: document.repository.clone(),
            chunk_index,
            start_offset: window.start as u64,
            end_offset: window.end as u64,
            line_start: Some(window.line_start),
            line_end: Some(line_end),
            truncated,
        }
    }

    /// Split content into overlapping windows with position information.
    fn split_with_overlap(&self, content: &str) -> Vec<Window> {
        // Byte offset of every char, plus the end of the string.
        let boundaries: Vec<usize> = content
            .char_indices()
            .map(|(idx, _)| idx)
            .chain(std::iter::once(content.len()))
            .collect();
        let total_chars = boundaries.len() - 1;
        let step = self.chunk_size - self.overlap;

        let mut windows = Vec::new();
        let mut start = 0;
        let mut line = 1u32;
        let mut line_pos = 0;

        loop {
            let end = (start + self.chunk_size).min(total_chars);
            let (from, to) = (boundaries[start], boundaries[end]);

            line += content[boundaries[line_pos]..from].matches('\n').count() as u32;
            line_pos = start;

            windows.push(Window {
                text: content[from..to].to_string(),
                start,
                end,
                line_start: line,
            });

            if end >= total_chars {
                break;
            }
            start += step;
        }

        windows
    }
}

struct Window {
    text: String,
    start: usize,
    end: usize,
    line_start: u32,
}
