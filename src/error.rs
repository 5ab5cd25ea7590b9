//! Error types for repository indexing and search.

use thiserror::Error;

use crate::utils::retry::Retryable;

/// Errors raised by the chunking, batching and search engine itself.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum EngineError {
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("tokenizer error: {0}")]
    Tokenizer(String),
}

impl EngineError {
    pub fn invalid(message: impl Into<String>) -> Self {
        EngineError::InvalidArgument(message.into())
    }
}

/// Errors related to embedding operations.
#[derive(Debug, Error)]
pub enum EmbeddingError {
    #[error("failed to connect to embedding server: {0}")]
    ConnectionError(String),

    #[error("embedding server error: status {status}: {body}")]
    ServerError {
        status: reqwest::StatusCode,
        body: String,
    },

    #[error("embedding request failed: {0}")]
    RequestError(#[from] reqwest::Error),

    #[error("invalid embedding response: {0}")]
    InvalidResponse(String),

    #[error("missing API key for embedding provider")]
    MissingApiKey,

    #[error("embedding timeout")]
    Timeout,
}

impl Retryable for EmbeddingError {
    fn is_retryable(&self) -> bool {
        match self {
            EmbeddingError::ConnectionError(_) | EmbeddingError::Timeout => true,
            EmbeddingError::ServerError { status, .. } => {
                *status == reqwest::StatusCode::TOO_MANY_REQUESTS || status.is_server_error()
            }
            EmbeddingError::RequestError(e) => e.is_timeout() || e.is_connect(),
            EmbeddingError::InvalidResponse(_) | EmbeddingError::MissingApiKey => false,
        }
    }
}

/// Why a single embedding batch produced no records.
#[derive(Debug, Error)]
pub enum BatchError {
    #[error("embedding provider returned {actual} vectors for {expected} inputs")]
    EmbeddingCountMismatch { expected: usize, actual: usize },

    #[error("embedding call failed: {0}")]
    EmbeddingCallFailed(#[from] EmbeddingError),
}

/// Errors related to vector store operations.
#[derive(Debug, Error)]
pub enum VectorStoreError {
    #[error("failed to connect to vector store: {0}")]
    ConnectionError(String),

    #[error("collection error: {0}")]
    CollectionError(String),

    #[error("upsert error: {0}")]
    UpsertError(String),

    #[error("search error: {0}")]
    SearchError(String),

    #[error("delete error: {0}")]
    DeleteError(String),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),

    #[error("vector dimension mismatch: expected {expected}, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },
}

impl Retryable for VectorStoreError {
    fn is_retryable(&self) -> bool {
        match self {
            VectorStoreError::ConnectionError(_) => true,
            VectorStoreError::CollectionError(msg)
            | VectorStoreError::UpsertError(msg)
            | VectorStoreError::SearchError(msg)
            | VectorStoreError::DeleteError(msg) => {
                let msg_lower = msg.to_lowercase();
                msg_lower.contains("timeout")
                    || msg_lower.contains("connection")
                    || msg_lower.contains("unavailable")
                    || msg_lower.contains("too many")
            }
            VectorStoreError::IoError(_)
            | VectorStoreError::SerializationError(_)
            | VectorStoreError::DimensionMismatch { .. } => false,
        }
    }
}

/// Errors related to reading documents from a checked-out repository.
#[derive(Debug, Error)]
pub enum SourceError {
    #[error("repository path not found: {0}")]
    NotFound(String),

    #[error("directory walk error: {0}")]
    WalkError(String),

    #[error("file read error: {0}")]
    FileReadError(String),

    #[error("invalid exclude pattern: {0}")]
    InvalidPattern(String),
}

/// Errors related to indexing operations.
#[derive(Debug, Error)]
pub enum IndexError {
    #[error(transparent)]
    Engine(#[from] EngineError),

    #[error("source error: {0}")]
    Source(#[from] SourceError),

    #[error("vector store error: {0}")]
    VectorStore(#[from] VectorStoreError),
}

/// Errors related to configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("TOML parse error: {0}")]
    TomlParseError(#[from] toml::de::Error),

    #[error("TOML serialize error: {0}")]
    TomlSerializeError(#[from] toml::ser::Error),

    #[error("path error: {0}")]
    PathError(String),

    #[error("validation error: {0}")]
    ValidationError(String),
}

/// Errors related to search operations.
#[derive(Debug, Error)]
pub enum SearchError {
    #[error(transparent)]
    Engine(#[from] EngineError),

    #[error("embedding error: {0}")]
    Embedding(#[from] EmbeddingError),

    #[error("vector store error: {0}")]
    VectorStore(#[from] VectorStoreError),
}

#[cfg(test)]
mod tests {
    use super::*;

    fn server_error(status: u16, body: &str) -> EmbeddingError {
        EmbeddingError::ServerError {
            status: reqwest::StatusCode::from_u16(status).unwrap(),
            body: body.to_string(),
        }
    }

    #[test]
    fn test_client_error_body_with_status_digits_not_retried() {
        let err = server_error(
            400,
            "This model's maximum context length is 8192 tokens, however you requested 8500 tokens (429 in the prompt; 502 lines)",
        );
        assert!(!err.is_retryable());
        assert!(err.to_string().starts_with("embedding server error: status 400 Bad Request"));
    }

    #[test]
    fn test_server_errors_retryable() {
        assert!(server_error(429, "slow down").is_retryable());
        assert!(server_error(503, "").is_retryable());
        assert!(server_error(500, "internal").is_retryable());
        assert!(!server_error(400, "bad input").is_retryable());
        assert!(!server_error(401, "invalid api key").is_retryable());
        assert!(!EmbeddingError::InvalidResponse("garbage".into()).is_retryable());
        assert!(EmbeddingError::Timeout.is_retryable());
    }

    #[test]
    fn test_count_mismatch_message() {
        let err = BatchError::EmbeddingCountMismatch {
            expected: 3,
            actual: 2,
        };
        assert_eq!(
            err.to_string(),
            "embedding provider returned 2 vectors for 3 inputs"
        );
    }

    #[test]
    fn test_vector_store_retryable() {
        assert!(VectorStoreError::ConnectionError("refused".into()).is_retryable());
        assert!(VectorStoreError::UpsertError("connection reset".into()).is_retryable());
        assert!(!VectorStoreError::UpsertError("bad payload".into()).is_retryable());
    }
}
