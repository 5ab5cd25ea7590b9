//! Where documents come from.
//!
//! Cloning and binary detection happen here, upstream of the chunking engine,
//! which only ever sees text.

mod local;

pub use local::DirectorySource;

use crate::error::SourceError;
use crate::models::{RepositoryId, SourceDocument};

/// A file left out of a scan.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SkippedFile {
    pub path: String,
    pub reason: String,
}

/// Documents read from a source, plus the files that could not be used.
#[derive(Debug, Default)]
pub struct Scan {
    pub documents: Vec<SourceDocument>,
    pub skipped: Vec<SkippedFile>,
}

/// Produces the text documents of one repository.
pub trait DocumentSource: Send + Sync {
    /// Read every document. Problems with single files are reported in
    /// [`Scan::skipped`]; only a missing or unusable source is an error.
    fn scan(&self, repository: &RepositoryId) -> Result<Scan, SourceError>;

    fn documents(&self, repository: &RepositoryId) -> Result<Vec<SourceDocument>, SourceError> {
        self.scan(repository).map(|scan| scan.documents)
    }
}
