//! Token counting and truncation for embedding inputs.
//!
//! The chunker and batcher only need two things from a tokenizer: a count, and a
//! prefix cut that agrees with that count. Which scheme produces the count is a
//! configuration choice.

use std::path::Path;
use std::sync::Arc;

use crate::error::EngineError;
use crate::models::{IndexingConfig, TokenizerKind};

/// Counts tokens and cuts text down to a token budget.
pub trait TokenCounter: Send + Sync {
    /// Token count of `text`. Deterministic and non-decreasing as text grows.
    fn count_tokens(&self, text: &str) -> usize;

    /// Longest prefix this tokenizer would cut `text` to for `limit` tokens.
    ///
    /// Only called when `text` is over the limit.
    fn cut_prefix<'a>(&self, text: &'a str, limit: usize) -> &'a str;

    /// Short name for logs and status output.
    fn name(&self) -> &str;

    /// Return a prefix of `text` holding at most `limit` tokens.
    ///
    /// Text already within the limit is returned unchanged, which makes the
    /// operation idempotent.
    fn truncate_to_tokens(&self, text: &str, limit: i64) -> Result<String, EngineError> {
        let limit = usize::try_from(limit).map_err(|_| {
            EngineError::invalid(format!("token limit must not be negative, got {limit}"))
        })?;

        if self.count_tokens(text) <= limit {
            return Ok(text.to_string());
        }

        let prefix = self.cut_prefix(text, limit);
        if self.count_tokens(prefix) <= limit {
            return Ok(prefix.to_string());
        }

        // Re-encoding a cut prefix can merge differently. Counts never shrink as
        // text grows, so search the char boundaries for the longest fit. The
        // empty prefix (index 0) always fits; the full prefix does not.
        let boundaries: Vec<usize> = prefix.char_indices().map(|(idx, _)| idx).collect();
        let (mut fits, mut over) = (0, boundaries.len());
        while over - fits > 1 {
            let mid = fits + (over - fits) / 2;
            if self.count_tokens(&prefix[..boundaries[mid]]) <= limit {
                fits = mid;
            } else {
                over = mid;
            }
        }
        Ok(prefix[..boundaries[fits]].to_string())
    }
}

/// Character-count heuristic: one token per `chars_per_token` characters, rounded up.
#[derive(Debug, Clone, Copy)]
pub struct EstimateTokenizer {
    chars_per_token: usize,
}

impl EstimateTokenizer {
    pub const DEFAULT_CHARS_PER_TOKEN: usize = 4;

    pub fn new(chars_per_token: usize) -> Self {
        Self {
            chars_per_token: chars_per_token.max(1),
        }
    }
}

impl Default for EstimateTokenizer {
    fn default() -> Self {
        Self::new(Self::DEFAULT_CHARS_PER_TOKEN)
    }
}

impl TokenCounter for EstimateTokenizer {
    fn count_tokens(&self, text: &str) -> usize {
        text.chars().count().div_ceil(self.chars_per_token)
    }

    fn cut_prefix<'a>(&self, text: &'a str, limit: usize) -> &'a str {
        let keep = limit.saturating_mul(self.chars_per_token);
        match text.char_indices().nth(keep) {
            Some((byte_idx, _)) => &text[..byte_idx],
            None => text,
        }
    }

    fn name(&self) -> &str {
        "estimate"
    }
}

/// HuggingFace tokenizer loaded from a `tokenizer.json`.
pub struct HfTokenizer {
    tokenizer: tokenizers::Tokenizer,
    fallback: EstimateTokenizer,
}

impl HfTokenizer {
    pub fn from_file(path: &Path) -> Result<Self, EngineError> {
        let mut tokenizer = tokenizers::Tokenizer::from_file(path).map_err(|e| {
            EngineError::Tokenizer(format!("failed to load {}: {}", path.display(), e))
        })?;

        // Counting must see the whole text.
        tokenizer
            .with_truncation(None)
            .map_err(|e| EngineError::Tokenizer(e.to_string()))?;
        tokenizer.with_padding(None);

        Ok(Self {
            tokenizer,
            fallback: EstimateTokenizer::default(),
        })
    }
}

impl TokenCounter for HfTokenizer {
    fn count_tokens(&self, text: &str) -> usize {
        match self.tokenizer.encode(text, false) {
            Ok(encoding) => encoding.len(),
            Err(e) => {
                tracing::debug!("tokenizer failed, falling back to estimate: {}", e);
                self.fallback.count_tokens(text)
            }
        }
    }

    fn cut_prefix<'a>(&self, text: &'a str, limit: usize) -> &'a str {
        if limit == 0 {
            return "";
        }
        let Ok(encoding) = self.tokenizer.encode(text, false) else {
            return self.fallback.cut_prefix(text, limit);
        };

        match encoding.get_offsets().get(limit - 1) {
            Some(&(_, end)) => &text[..floor_char_boundary(text, end.min(text.len()))],
            None => text,
        }
    }

    fn name(&self) -> &str {
        "huggingface"
    }
}

fn floor_char_boundary(text: &str, mut idx: usize) -> usize {
    while idx > 0 && !text.is_char_boundary(idx) {
        idx -= 1;
    }
    idx
}

/// Build the tokenizer selected in the indexing configuration.
pub fn create_tokenizer(config: &IndexingConfig) -> Result<Arc<dyn TokenCounter>, EngineError> {
    match config.tokenizer {
        TokenizerKind::Estimate => Ok(Arc::new(EstimateTokenizer::default())),
        TokenizerKind::HuggingFace => {
            let path = config.tokenizer_path.as_deref().ok_or_else(|| {
                EngineError::invalid("tokenizer_path is required for the huggingface tokenizer")
            })?;
            Ok(Arc::new(HfTokenizer::from_file(path)?))
        }
    }
}
