//! Typed failures of the synchronize and index stages.
//!
//! Plumbing code returns `anyhow::Result`; the pipeline stages wrap those
//! errors into [`SyncError`] and [`IndexError`] so the orchestrator can
//! tell which stage failed and log it as such. Neither type ever reaches
//! the caller of `synchronize_and_index`.

use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

/// A Git-level failure while bringing a working copy up to date.
#[derive(Debug, Error)]
pub enum SyncError {
    #[error("clone of {url} into {path} failed: {source}")]
    Clone {
        url: String,
        path: PathBuf,
        #[source]
        source: anyhow::Error,
    },

    #[error("fetch in {path} failed: {source}")]
    Fetch {
        path: PathBuf,
        #[source]
        source: anyhow::Error,
    },

    #[error("{path} is not a usable git repository: {source}")]
    Open {
        path: PathBuf,
        #[source]
        source: anyhow::Error,
    },

    #[error("could not read origin of {path}: {source}")]
    RemoteUrl {
        path: PathBuf,
        #[source]
        source: anyhow::Error,
    },

    #[error("workspace directory {path} could not be prepared: {source}")]
    Workspace {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("synchronization timed out after {0:?}")]
    TimedOut(Duration),
}

/// A failure while turning a working copy into a vector collection.
#[derive(Debug, Error)]
pub enum IndexError {
    #[error("working copy {0} does not exist")]
    MissingWorkingCopy(PathBuf),

    #[error("walking {path} failed: {source}")]
    Walk {
        path: PathBuf,
        #[source]
        source: walkdir::Error,
    },

    #[error("vector collection {name}: {source}")]
    Collection {
        name: String,
        #[source]
        source: anyhow::Error,
    },

    #[error("project status could not be read: {0}")]
    Status(#[source] anyhow::Error),

    #[error("indexing timed out after {0:?}")]
    TimedOut(Duration),

    #[error("indexing worker failed: {0}")]
    Join(#[from] tokio::task::JoinError),
}

impl IndexError {
    pub(crate) fn collection(name: &str, source: anyhow::Error) -> Self {
        IndexError::Collection {
            name: name.to_string(),
            source,
        }
    }
}
