//! Per-project working-copy directories.
//!
//! Every project owns at most one directory, `base_dir/<project_id>`.
//! Removing a directory that is already gone succeeds.

use std::io;
use std::path::{Component, Path, PathBuf};

/// Resolves and removes working-copy directories under one base directory.
#[derive(Debug, Clone)]
pub struct FilesystemWorkspace {
    base_dir: PathBuf,
}

impl FilesystemWorkspace {
    pub fn new(base_dir: impl Into<PathBuf>) -> Self {
        Self {
            base_dir: base_dir.into(),
        }
    }

    pub fn base_dir(&self) -> &Path {
        &self.base_dir
    }

    pub fn path_for(&self, project_id: &str) -> PathBuf {
        self.base_dir.join(project_id)
    }

    pub fn exists(&self, project_id: &str) -> bool {
        self.path_for(project_id).exists()
    }

    /// Recursively remove the project's directory if present.
    pub fn destroy(&self, project_id: &str) -> io::Result<()> {
        remove_dir_logged(&self.path_for(project_id))
    }

    /// [`destroy`](Self::destroy) on the blocking pool.
    pub async fn destroy_async(&self, project_id: &str) -> io::Result<()> {
        let path = self.path_for(project_id);
        tokio::task::spawn_blocking(move || remove_dir_logged(&path))
            .await
            .map_err(io::Error::other)?
    }
}

fn remove_dir_logged(path: &Path) -> io::Result<()> {
    if !path.exists() {
        tracing::info!(path = %path.display(), "no working copy to remove");
        return Ok(());
    }
    match std::fs::remove_dir_all(path) {
        Ok(()) => {
            tracing::info!(path = %path.display(), "removed working copy");
            Ok(())
        }
        Err(e) => {
            tracing::warn!(path = %path.display(), error = %e, "failed to remove working copy");
            Err(e)
        }
    }
}

/// A project id addresses a directory, so it must be a single normal
/// path component.
pub fn is_valid_project_id(project_id: &str) -> bool {
    if project_id.trim().is_empty() || project_id.contains(['/', '\\', '\0']) {
        return false;
    }
    let mut components = Path::new(project_id).components();
    matches!(
        (components.next(), components.next()),
        (Some(Component::Normal(_)), None)
    )
}
