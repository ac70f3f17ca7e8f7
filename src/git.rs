//! Git access for the synchronizer.
//!
//! [`GitClient`] is the seam the synchronizer depends on; [`CommandGit`]
//! implements it by shelling out to the `git` binary.
//!
//! # Update strategy
//!
//! `fetch` runs `git fetch origin` and then hard-resets the checked-out
//! branch to its upstream, so the working tree always reflects the remote
//! default branch. A clone of an empty repository has no upstream yet;
//! the reset is skipped in that case and the tree stays empty.

use std::ffi::OsStr;
use std::path::{Path, PathBuf};
use std::process::Stdio;

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use tokio::process::Command;

use crate::config::GitConfig;

/// An opened working copy.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GitRepo {
    pub path: PathBuf,
}

#[async_trait]
pub trait GitClient: Send + Sync {
    /// Clone `url` into `path`. `path` must not exist or be empty.
    async fn clone_repo(&self, url: &str, path: &Path) -> Result<()>;

    /// Open an existing working copy. Fails if `path` is not a Git repository.
    async fn open(&self, path: &Path) -> Result<GitRepo>;

    /// URL of the `origin` remote.
    async fn remote_url(&self, repo: &GitRepo) -> Result<String>;

    /// Update the working copy from `origin`.
    async fn fetch(&self, repo: &GitRepo) -> Result<()>;
}

/// [`GitClient`] backed by the `git` command line.
#[derive(Debug, Clone)]
pub struct CommandGit {
    program: String,
    shallow: bool,
}

impl CommandGit {
    pub fn new(config: &GitConfig) -> Self {
        Self {
            program: config.program.clone(),
            shallow: config.shallow,
        }
    }

    fn command(&self, dir: Option<&Path>) -> Command {
        let mut cmd = Command::new(&self.program);
        cmd.env("GIT_TERMINAL_PROMPT", "0")
            .stdin(Stdio::null())
            .kill_on_drop(true);
        if let Some(dir) = dir {
            cmd.current_dir(dir);
        }
        cmd
    }

    /// Run git and return trimmed stdout, failing on a non-zero exit.
    async fn run<I, S>(&self, dir: Option<&Path>, args: I, what: &str) -> Result<String>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<OsStr>,
    {
        let output = self
            .command(dir)
            .args(args)
            .output()
            .await
            .with_context(|| format!("Failed to execute '{} {}'. Is git installed?", self.program, what))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            bail!("git {} failed: {}", what, stderr.trim());
        }

        Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
    }

    async fn has_upstream(&self, repo: &GitRepo) -> Result<bool> {
        let output = self
            .command(Some(&repo.path))
            .args(["rev-parse", "--verify", "--quiet", "@{u}"])
            .output()
            .await
            .with_context(|| "Failed to execute 'git rev-parse'")?;
        Ok(output.status.success())
    }
}

#[async_trait]
impl GitClient for CommandGit {
    async fn clone_repo(&self, url: &str, path: &Path) -> Result<()> {
        let mut args: Vec<&OsStr> = vec![OsStr::new("clone")];
        if self.shallow {
            args.extend([OsStr::new("--depth"), OsStr::new("1")]);
        }
        args.extend([OsStr::new("--"), OsStr::new(url), path.as_os_str()]);

        self.run(None, args, "clone").await?;
        Ok(())
    }

    async fn open(&self, path: &Path) -> Result<GitRepo> {
        if !path.is_dir() {
            bail!("{} is not a directory", path.display());
        }
        if !path.join(".git").exists() {
            bail!("{} has no .git directory", path.display());
        }
        // git walks up to an enclosing repository when `.git` is unusable.
        let toplevel = self
            .run(Some(path), ["rev-parse", "--show-toplevel"], "rev-parse")
            .await?;
        let expected = tokio::fs::canonicalize(path)
            .await
            .with_context(|| format!("Failed to resolve {}", path.display()))?;
        let found = tokio::fs::canonicalize(&toplevel)
            .await
            .with_context(|| format!("Failed to resolve {}", toplevel))?;
        if found != expected {
            bail!(
                "{} is not the root of a working copy (enclosing repository at {})",
                path.display(),
                found.display()
            );
        }
        tracing::debug!(path = %path.display(), "opened working copy");
        Ok(GitRepo {
            path: path.to_path_buf(),
        })
    }

    async fn remote_url(&self, repo: &GitRepo) -> Result<String> {
        self.run(Some(&repo.path), ["remote", "get-url", "origin"], "remote get-url")
            .await
    }

    async fn fetch(&self, repo: &GitRepo) -> Result<()> {
        let mut args = vec!["fetch", "--prune"];
        if self.shallow {
            args.extend(["--depth", "1"]);
        }
        args.push("origin");
        self.run(Some(&repo.path), args, "fetch").await?;

        if !self.has_upstream(repo).await? {
            tracing::debug!(path = %repo.path.display(), "no upstream branch; skipping reset");
            return Ok(());
        }
        self.run(Some(&repo.path), ["reset", "--hard", "@{u}"], "reset")
            .await?;
        Ok(())
    }
}
