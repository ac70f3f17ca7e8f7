//! Bring a project's working copy in line with its repository URL.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::error::SyncError;
use crate::git::GitClient;
use crate::workspace::FilesystemWorkspace;

/// What a successful sync did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncAction {
    /// No working copy existed; a fresh clone was made.
    Cloned,
    /// The working copy already tracked the URL and was updated in place.
    Fetched,
    /// The working copy tracked a different URL; it was removed and cloned again.
    Recloned,
}

#[derive(Debug)]
pub struct SyncResult {
    pub path: PathBuf,
    pub outcome: Result<SyncAction, SyncError>,
}

impl SyncResult {
    pub fn ok(&self) -> bool {
        self.outcome.is_ok()
    }
}

/// Clones or updates working copies. Never touches project status.
#[derive(Clone)]
pub struct RepositorySynchronizer {
    workspace: FilesystemWorkspace,
    git: Arc<dyn GitClient>,
}

impl RepositorySynchronizer {
    pub fn new(workspace: FilesystemWorkspace, git: Arc<dyn GitClient>) -> Self {
        Self { workspace, git }
    }

    pub fn workspace(&self) -> &FilesystemWorkspace {
        &self.workspace
    }

    pub async fn sync(&self, project_id: &str, repo_url: &str) -> SyncResult {
        let path = self.workspace.path_for(project_id);
        let outcome = self.sync_at(project_id, repo_url, &path).await;
        match &outcome {
            Ok(action) => {
                tracing::info!(project_id, path = %path.display(), ?action, "working copy synchronized")
            }
            Err(e) => {
                tracing::warn!(project_id, path = %path.display(), error = %e, "synchronization failed")
            }
        }
        SyncResult { path, outcome }
    }

    async fn sync_at(
        &self,
        project_id: &str,
        repo_url: &str,
        path: &Path,
    ) -> Result<SyncAction, SyncError> {
        if !path.exists() {
            self.clone_into(repo_url, path).await?;
            return Ok(SyncAction::Cloned);
        }

        let repo = self.git.open(path).await.map_err(|source| SyncError::Open {
            path: path.to_path_buf(),
            source,
        })?;
        let origin = self
            .git
            .remote_url(&repo)
            .await
            .map_err(|source| SyncError::RemoteUrl {
                path: path.to_path_buf(),
                source,
            })?;

        if origin.trim() == repo_url.trim() {
            self.git
                .fetch(&repo)
                .await
                .map_err(|source| SyncError::Fetch {
                    path: path.to_path_buf(),
                    source,
                })?;
            return Ok(SyncAction::Fetched);
        }

        tracing::info!(
            project_id,
            old_url = %origin,
            new_url = repo_url,
            "repository URL changed; recloning"
        );
        self.workspace
            .destroy_async(project_id)
            .await
            .map_err(|source| SyncError::Workspace {
                path: path.to_path_buf(),
                source,
            })?;
        self.clone_into(repo_url, path).await?;
        Ok(SyncAction::Recloned)
    }

    async fn clone_into(&self, repo_url: &str, path: &Path) -> Result<(), SyncError> {
        tokio::fs::create_dir_all(self.workspace.base_dir())
            .await
            .map_err(|source| SyncError::Workspace {
                path: self.workspace.base_dir().to_path_buf(),
                source,
            })?;

        self.git
            .clone_repo(repo_url, path)
            .await
            .map_err(|source| SyncError::Clone {
                url: repo_url.to_string(),
                path: path.to_path_buf(),
                source,
            })
    }
}
