mod batch;
mod chunker;
mod embedding;
mod pipeline;
mod search;
mod tokenizer;
pub mod vector_store;

pub use batch::{Batch, TokenBatcher};
pub use chunker::TextChunker;
pub use embedding::{Embedder, OpenAiEmbedder};
pub use pipeline::{BatchFailure, EmbeddingPipeline, EmbeddingReport, chunk_documents};
pub use search::SimilaritySearch;
pub use tokenizer::{EstimateTokenizer, HfTokenizer, TokenCounter, create_tokenizer};
pub use vector_store::{LocalBackend, QdrantBackend, VectorStore, create_backend};
