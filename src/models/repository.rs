use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::EngineError;

/// A GitHub repository identifier in `owner/name` form.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RepositoryId {
    pub owner: String,
    pub name: String,
}

impl RepositoryId {
    pub fn full_name(&self) -> String {
        format!("{}/{}", self.owner, self.name)
    }

    pub fn url(&self) -> String {
        format!("https://github.com/{}/{}", self.owner, self.name)
    }
}

impl std::str::FromStr for RepositoryId {
    type Err = EngineError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s
            .trim()
            .trim_start_matches("https://github.com/")
            .trim_end_matches(".git")
            .trim_matches('/');

        let mut parts = trimmed.split('/');
        match (parts.next(), parts.next(), parts.next()) {
            (Some(owner), Some(name), None) if is_valid_part(owner) && is_valid_part(name) => {
                Ok(Self {
                    owner: owner.to_string(),
                    name: name.to_string(),
                })
            }
            _ => Err(EngineError::invalid(format!(
                "repository must be in owner/name form, got '{}'",
                s
            ))),
        }
    }
}

impl std::fmt::Display for RepositoryId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.owner, self.name)
    }
}

fn is_valid_part(part: &str) -> bool {
    !part.is_empty()
        && part
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'))
}

/// What a vector store remembers about an indexed repository.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RepositoryInfo {
    /// `owner/name`
    pub repository: String,
    pub url: String,
    /// Files read by the last index run
    pub file_count: u64,
    /// Chunks stored by the last index run
    pub chunk_count: u64,
    pub indexed_at: DateTime<Utc>,
    /// False when the last run had failed batches or was interrupted.
    pub complete: bool,
}

impl RepositoryInfo {
    /// Record for an index run finishing now.
    pub fn indexed(id: &RepositoryId, file_count: u64, chunk_count: u64, complete: bool) -> Self {
        Self {
            repository: id.full_name(),
            url: id.url(),
            file_count,
            chunk_count,
            indexed_at: Utc::now(),
            complete,
        }
    }
}
