//! Utility modules.

pub mod file;
pub mod retry;

pub use file::{is_text_file, read_file_lossy, relative_path};
pub use retry::{RetryConfig, RetryResult, Retryable, with_retry};
