//! Documents from a repository checkout on the local file system.

use glob::Pattern;
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

use super::{DocumentSource, Scan, SkippedFile};
use crate::error::SourceError;
use crate::models::{IndexingConfig, RepositoryId, SourceDocument};
use crate::utils::file::{is_text_file, read_file_lossy, relative_path};

/// Reads every text file under a directory.
#[derive(Debug)]
pub struct DirectorySource {
    /// Root path to scan
    root: PathBuf,

    /// Patterns matched against `/`-separated paths relative to the root
    exclude_patterns: Vec<Pattern>,

    /// Files larger than this are skipped
    max_file_size: u64,
}

impl DirectorySource {
    pub fn new(
        root: impl Into<PathBuf>,
        exclude_patterns: &[String],
        max_file_size: u64,
    ) -> Result<Self, SourceError> {
        let exclude_patterns = exclude_patterns
            .iter()
            .map(|p| Pattern::new(p).map_err(|e| SourceError::InvalidPattern(format!("{p}: {e}"))))
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Self {
            root: root.into(),
            exclude_patterns,
            max_file_size,
        })
    }

    /// Source using the exclusions and size limit from the indexing config.
    pub fn from_config(
        root: impl Into<PathBuf>,
        config: &IndexingConfig,
        extra_excludes: &[String],
    ) -> Result<Self, SourceError> {
        let patterns: Vec<String> = config
            .exclude_patterns
            .iter()
            .chain(extra_excludes)
            .cloned()
            .collect();
        Self::new(root, &patterns, config.max_file_size)
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn is_excluded(&self, relative: &str) -> bool {
        self.exclude_patterns.iter().any(|p| p.matches(relative))
    }

    /// Relative paths of the files that would be read, in walk order.
    ///
    /// Entries the walk cannot visit are recorded in `skipped`.
    fn collect_files(
        &self,
        skipped: &mut Vec<SkippedFile>,
    ) -> Result<Vec<(PathBuf, String)>, SourceError> {
        if !self.root.is_dir() {
            return Err(SourceError::NotFound(self.root.display().to_string()));
        }

        let mut files = Vec::new();
        let walker = WalkDir::new(&self.root)
            .follow_links(false)
            .sort_by_file_name()
            .into_iter()
            .filter_entry(|e| e.file_name() != ".git");

        for entry in walker {
            let entry = match entry {
                Ok(entry) => entry,
                Err(e) => {
                    let path = e
                        .path()
                        .and_then(|p| relative_path(&self.root, p))
                        .unwrap_or_default();
                    let error = SourceError::WalkError(e.to_string());
                    tracing::warn!(path = %path, "skipping: {}", error);
                    skipped.push(SkippedFile {
                        path,
                        reason: error.to_string(),
                    });
                    continue;
                }
            };
            if !entry.file_type().is_file() {
                continue;
            }

            let path = entry.path();
            let Some(relative) = relative_path(&self.root, path) else {
                continue;
            };
            if self.is_excluded(&relative) {
                tracing::debug!(path = %relative, "excluded");
                continue;
            }
            if !is_text_file(path) {
                tracing::debug!(path = %relative, "skipping binary file");
                continue;
            }

            files.push((path.to_path_buf(), relative));
        }

        Ok(files)
    }

    fn read_files(
        &self,
        files: Vec<(PathBuf, String)>,
        repository: &str,
        scan: &mut Scan,
    ) {
        for (path, relative) in files {
            match read_file_lossy(&path, self.max_file_size) {
                Ok(Some(content)) => scan
                    .documents
                    .push(SourceDocument::new(relative, content, repository)),
                Ok(None) => {
                    tracing::warn!(path = %relative, max_bytes = self.max_file_size, "skipping large file");
                    scan.skipped.push(SkippedFile {
                        path: relative,
                        reason: format!("larger than {} bytes", self.max_file_size),
                    });
                }
                Err(e) => {
                    let error = SourceError::FileReadError(e.to_string());
                    tracing::warn!(path = %relative, "skipping: {}", error);
                    scan.skipped.push(SkippedFile {
                        path: relative,
                        reason: error.to_string(),
                    });
                }
            }
        }
    }
}

impl DocumentSource for DirectorySource {
    fn scan(&self, repository: &RepositoryId) -> Result<Scan, SourceError> {
        let mut scan = Scan::default();
        let files = self.collect_files(&mut scan.skipped)?;
        self.read_files(files, &repository.full_name(), &mut scan);

        tracing::info!(
            root = %self.root.display(),
            documents = scan.documents.len(),
            skipped = scan.skipped.len(),
            "collected documents"
        );
        Ok(scan)
    }
}
