//! Greedy, order-preserving packing of chunks into embedding requests.

use crate::models::{Chunk, EngineConfig};

/// Chunks submitted together in one embedding request.
#[derive(Debug, Clone, PartialEq)]
pub struct Batch<'a> {
    pub chunks: Vec<&'a Chunk>,
    pub total_tokens: usize,
    /// A single chunk larger than the batch budget on its own.
    pub oversized: bool,
}

impl<'a> Batch<'a> {
    fn empty() -> Self {
        Self {
            chunks: Vec::new(),
            total_tokens: 0,
            oversized: false,
        }
    }

    fn singleton(chunk: &'a Chunk) -> Self {
        Self {
            chunks: vec![chunk],
            total_tokens: chunk.token_count,
            oversized: true,
        }
    }

    fn push(&mut self, chunk: &'a Chunk) {
        self.total_tokens += chunk.token_count;
        self.chunks.push(chunk);
    }

    pub fn len(&self) -> usize {
        self.chunks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.chunks.is_empty()
    }

    pub fn texts(&self) -> Vec<String> {
        self.chunks.iter().map(|c| c.text.clone()).collect()
    }
}

/// Packs chunks first-fit in arrival order.
///
/// A batch is closed as soon as the next chunk would push it over the token
/// budget or the item cap. A chunk that alone exceeds the token budget is
/// emitted as its own batch.
#[derive(Debug, Clone, Copy)]
pub struct TokenBatcher {
    max_tokens: usize,
    max_items: usize,
}

impl TokenBatcher {
    pub fn new(config: &EngineConfig) -> Self {
        Self {
            max_tokens: config.max_tokens_per_batch(),
            max_items: config.max_chunks_per_batch(),
        }
    }

    pub fn batch<'a>(&self, chunks: &'a [Chunk]) -> Vec<Batch<'a>> {
        let mut batches = Vec::new();
        let mut current = Batch::empty();

        for chunk in chunks {
            if chunk.token_count > self.max_tokens {
                if !current.is_empty() {
                    batches.push(std::mem::replace(&mut current, Batch::empty()));
                }
                batches.push(Batch::singleton(chunk));
                continue;
            }

            let fits = current.total_tokens + chunk.token_count <= self.max_tokens
                && current.len() < self.max_items;
            if !fits && !current.is_empty() {
                batches.push(std::mem::replace(&mut current, Batch::empty()));
            }
            current.push(chunk);
        }

        if !current.is_empty() {
            batches.push(current);
        }

        batches
    }
}
