//! Core data models for the context pipeline.
//!
//! A [`Project`] is owned by the surrounding web application; the pipeline
//! only reads it and moves its [`ContextStatus`]. Chunks flow from the
//! indexer into a per-project vector collection as [`ChunkRecord`]s.

use std::fmt;
use std::str::FromStr;

use anyhow::bail;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Indexing lifecycle of a project's repository context.
///
/// ```text
/// NONE ──(url set)──▶ PENDING ──▶ INDEXING ──▶ READY
///                        ▲            │
///                        └── FAILED ◀─┘
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ContextStatus {
    None,
    Pending,
    Indexing,
    Ready,
    Failed,
}

impl ContextStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ContextStatus::None => "NONE",
            ContextStatus::Pending => "PENDING",
            ContextStatus::Indexing => "INDEXING",
            ContextStatus::Ready => "READY",
            ContextStatus::Failed => "FAILED",
        }
    }

    /// Whether an indexing run may start from this status.
    pub fn is_indexable(&self) -> bool {
        matches!(self, ContextStatus::Pending | ContextStatus::Failed)
    }
}

impl fmt::Display for ContextStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ContextStatus {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "NONE" => Ok(ContextStatus::None),
            "PENDING" => Ok(ContextStatus::Pending),
            "INDEXING" => Ok(ContextStatus::Indexing),
            "READY" => Ok(ContextStatus::Ready),
            "FAILED" => Ok(ContextStatus::Failed),
            other => bail!("Unknown context status: '{}'", other),
        }
    }
}

/// A project record as seen by the pipeline.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Project {
    pub id: String,
    pub owner_id: String,
    pub name: String,
    pub repository_url: Option<String>,
    pub context_status: ContextStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Project {
    /// Build a new project, deriving the initial status from the URL:
    /// `PENDING` when a non-blank URL is present, `NONE` otherwise.
    pub fn new(
        id: impl Into<String>,
        owner_id: impl Into<String>,
        name: impl Into<String>,
        repository_url: Option<String>,
    ) -> Self {
        let repository_url = repository_url
            .map(|u| u.trim().to_string())
            .filter(|u| !u.is_empty());
        let context_status = if repository_url.is_some() {
            ContextStatus::Pending
        } else {
            ContextStatus::None
        };
        let now = Utc::now();
        Self {
            id: id.into(),
            owner_id: owner_id.into(),
            name: name.into(),
            repository_url,
            context_status,
            created_at: now,
            updated_at: now,
        }
    }

    /// Apply a repository URL change.
    ///
    /// A changed, non-blank URL re-arms `PENDING`. Clearing the URL keeps
    /// the current status; once a URL has been set the project never goes
    /// back to `NONE`. Returns `true` when the change re-armed indexing.
    pub fn set_repository_url(&mut self, url: Option<String>) -> bool {
        let url = url.map(|u| u.trim().to_string()).filter(|u| !u.is_empty());
        if url == self.repository_url {
            return false;
        }
        let rearm = url.is_some();
        self.repository_url = url;
        if rearm {
            self.context_status = ContextStatus::Pending;
        }
        self.updated_at = Utc::now();
        rearm
    }
}

/// Metadata stored alongside every chunk in a project's collection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChunkMetadata {
    /// Path of the source file relative to the working copy root.
    pub source: String,
    pub chunk_index: usize,
    pub project_id: String,
}

/// A chunk ready to be submitted to a vector collection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChunkRecord {
    /// `relative_path::chunk_index`
    pub id: String,
    pub document: String,
    pub metadata: ChunkMetadata,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_round_trips_through_strings() {
        for status in [
            ContextStatus::None,
            ContextStatus::Pending,
            ContextStatus::Indexing,
            ContextStatus::Ready,
            ContextStatus::Failed,
        ] {
            assert_eq!(status.as_str().parse::<ContextStatus>().unwrap(), status);
        }
        assert!("BOGUS".parse::<ContextStatus>().is_err());
    }

    #[test]
    fn test_status_serializes_uppercase() {
        let json = serde_json::to_string(&ContextStatus::Indexing).unwrap();
        assert_eq!(json, "\"INDEXING\"");
    }

    #[test]
    fn test_new_project_status_follows_url() {
        let p = Project::new("p1", "u1", "demo", None);
        assert_eq!(p.context_status, ContextStatus::None);

        let p = Project::new("p2", "u1", "demo", Some("   ".to_string()));
        assert_eq!(p.context_status, ContextStatus::None);
        assert!(p.repository_url.is_none());

        let p = Project::new("p3", "u1", "demo", Some("https://x/r.git".to_string()));
        assert_eq!(p.context_status, ContextStatus::Pending);
    }

    #[test]
    fn test_changed_url_rearms_pending() {
        let mut p = Project::new("p1", "u1", "demo", Some("https://x/a.git".to_string()));
        p.context_status = ContextStatus::Ready;

        assert!(!p.set_repository_url(Some("https://x/a.git".to_string())));
        assert_eq!(p.context_status, ContextStatus::Ready);

        assert!(p.set_repository_url(Some("https://x/b.git".to_string())));
        assert_eq!(p.context_status, ContextStatus::Pending);
    }

    #[test]
    fn test_clearing_url_never_reverts_to_none() {
        let mut p = Project::new("p1", "u1", "demo", Some("https://x/a.git".to_string()));
        p.context_status = ContextStatus::Ready;
        assert!(!p.set_repository_url(None));
        assert!(p.repository_url.is_none());
        assert_eq!(p.context_status, ContextStatus::Ready);
    }
}
