//! Turn a working copy into the project's vector collection.
//!
//! Each pass replaces the collection wholesale:
//!
//! 1. Refuse a missing working copy.
//! 2. Delete the project's collection (absence is tolerated) and recreate it.
//! 3. Walk the tree, skipping `.git`, denylisted and excluded paths, and
//!    files over the size cap.
//! 4. Chunk every remaining file on blank lines.
//! 5. Add all chunks to the collection in one call.
//! 6. Re-read the project and mark it `READY`, or `FAILED` if 2–5 failed.
//!
//! Per-file problems are logged and skipped; they never fail the pass.

use std::collections::HashSet;
use std::ffi::OsStr;
use std::path::Path;
use std::sync::Arc;

use anyhow::Result;
use globset::{Glob, GlobSet, GlobSetBuilder};
use thiserror::Error;
use walkdir::{DirEntry, WalkDir};

use repo_context_core::chunk::{chunk_file, collection_name, ChunkLimits};
use repo_context_core::embedding::EmbeddingProvider;
use repo_context_core::models::{ChunkRecord, ContextStatus};
use repo_context_core::store::{QueryHit, VectorStore};

use crate::config::IndexingConfig;
use crate::error::IndexError;
use crate::events::Stage;
use crate::status::IndexingStatusStore;

/// Decides which files of a working copy are read.
#[derive(Debug, Clone)]
pub struct FileFilter {
    denied_extensions: HashSet<String>,
    excludes: GlobSet,
    max_file_bytes: u64,
}

impl FileFilter {
    pub fn new(denied_extensions: &[String], exclude_globs: &[String], max_file_bytes: u64) -> Result<Self> {
        Ok(Self {
            denied_extensions: denied_extensions
                .iter()
                .map(|ext| ext.trim_start_matches('.').to_ascii_lowercase())
                .collect(),
            excludes: build_globset(exclude_globs)?,
            max_file_bytes,
        })
    }

    pub fn from_config(config: &IndexingConfig) -> Result<Self> {
        Self::new(
            &config.denied_extensions,
            &config.exclude_globs,
            config.max_file_bytes,
        )
    }

    /// True if `relative_path` (`/`-separated) must not be indexed.
    ///
    /// A dotfile whose whole name is a denied extension (`.env`) is
    /// denied too.
    pub fn is_denied(&self, relative_path: &str) -> bool {
        if self.excludes.is_match(relative_path) {
            return true;
        }

        let path = Path::new(relative_path);
        if let Some(ext) = path.extension().and_then(OsStr::to_str) {
            if self.denied_extensions.contains(&ext.to_ascii_lowercase()) {
                return true;
            }
        }

        path.file_name()
            .and_then(OsStr::to_str)
            .and_then(|name| name.strip_prefix('.'))
            .is_some_and(|bare| {
                !bare.contains('.') && self.denied_extensions.contains(&bare.to_ascii_lowercase())
            })
    }

    pub fn is_oversized(&self, len: u64) -> bool {
        len > self.max_file_bytes
    }

    pub fn max_file_bytes(&self) -> u64 {
        self.max_file_bytes
    }
}

fn build_globset(patterns: &[String]) -> Result<GlobSet> {
    let mut builder = GlobSetBuilder::new();
    for pattern in patterns {
        builder.add(Glob::new(pattern)?);
    }
    Ok(builder.build()?)
}

/// Counters for one pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct IndexStats {
    pub files_indexed: usize,
    pub files_skipped: usize,
    pub files_failed: usize,
    pub chunks: usize,
}

/// How a pass that reached finalization ended.
#[derive(Debug)]
pub enum IndexOutcome {
    /// Status is `READY`.
    Ready(IndexStats),
    /// `FAILED` was written (or its write was attempted and logged).
    Failed(IndexError),
    /// The project vanished during the pass; no status was written.
    ProjectMissing,
}

#[derive(Debug, Error)]
enum FileReadError {
    #[error("could not stat file: {0}")]
    Metadata(#[source] walkdir::Error),
    #[error("{len} bytes exceeds the {limit}-byte limit")]
    TooLarge { len: u64, limit: u64 },
    #[error("could not read file: {0}")]
    Read(#[source] std::io::Error),
}

#[derive(Clone)]
pub struct ContentIndexer {
    vectors: Arc<dyn VectorStore>,
    embedder: Arc<dyn EmbeddingProvider>,
    filter: Arc<FileFilter>,
    limits: ChunkLimits,
}

impl ContentIndexer {
    pub fn new(
        vectors: Arc<dyn VectorStore>,
        embedder: Arc<dyn EmbeddingProvider>,
        filter: FileFilter,
        limits: ChunkLimits,
    ) -> Self {
        Self {
            vectors,
            embedder,
            filter: Arc::new(filter),
            limits,
        }
    }

    /// Index `repo_path` and finalize the project's status.
    ///
    /// `Err` means no terminal status was written; the caller owns
    /// recovery in that case.
    pub async fn index(
        &self,
        store: &mut IndexingStatusStore,
        project_id: &str,
        repo_path: &Path,
    ) -> Result<IndexOutcome, IndexError> {
        if !repo_path.is_dir() {
            return Err(IndexError::MissingWorkingCopy(repo_path.to_path_buf()));
        }

        let populated = self.populate(project_id, repo_path).await;

        let mut project = match store.load(project_id).await {
            Ok(Some(project)) => project,
            Ok(None) => {
                tracing::warn!(project_id, "project not found after processing");
                return Ok(IndexOutcome::ProjectMissing);
            }
            Err(e) => return Err(IndexError::Status(e)),
        };

        match populated {
            Ok(stats) => match store
                .transition(&mut project, ContextStatus::Ready, Stage::Index)
                .await
            {
                Ok(()) => {
                    tracing::info!(
                        project_id,
                        files = stats.files_indexed,
                        chunks = stats.chunks,
                        "repository context ready"
                    );
                    Ok(IndexOutcome::Ready(stats))
                }
                Err(e) => {
                    tracing::error!(project_id, error = %e, "failed to persist READY status");
                    store.mark_failed(&mut project, Stage::Index).await;
                    Ok(IndexOutcome::Failed(IndexError::Status(e)))
                }
            },
            Err(e) => {
                tracing::error!(project_id, error = %e, "context processing failed");
                store.mark_failed(&mut project, Stage::Index).await;
                Ok(IndexOutcome::Failed(e))
            }
        }
    }

    async fn populate(&self, project_id: &str, repo_path: &Path) -> Result<IndexStats, IndexError> {
        let name = collection_name(project_id);

        match self.vectors.delete_collection(&name).await {
            Ok(()) => tracing::info!(project_id, collection = %name, "deleted existing collection"),
            Err(e) => tracing::warn!(
                project_id,
                collection = %name,
                error = %e,
                "could not delete collection (maybe it did not exist)"
            ),
        }
        let collection = self
            .vectors
            .get_or_create_collection(&name, Arc::clone(&self.embedder))
            .await
            .map_err(|e| IndexError::collection(&name, e))?;

        let root = repo_path.to_path_buf();
        let owner = project_id.to_string();
        let filter = Arc::clone(&self.filter);
        let limits = self.limits;
        let (records, stats) =
            tokio::task::spawn_blocking(move || collect_chunks(&root, &owner, &filter, &limits))
                .await??;

        tracing::info!(
            project_id,
            files = stats.files_indexed,
            skipped = stats.files_skipped,
            failed = stats.files_failed,
            chunks = stats.chunks,
            "processed working copy"
        );

        if records.is_empty() {
            tracing::info!(project_id, "no processable chunks found in repository");
            return Ok(stats);
        }

        let mut documents = Vec::with_capacity(records.len());
        let mut metadatas = Vec::with_capacity(records.len());
        let mut ids = Vec::with_capacity(records.len());
        for record in records {
            documents.push(record.document);
            metadatas.push(record.metadata);
            ids.push(record.id);
        }

        collection
            .add(&documents, &metadatas, &ids)
            .await
            .map_err(|e| IndexError::collection(&name, e))?;
        tracing::info!(project_id, collection = %name, chunks = ids.len(), "added chunks to collection");

        Ok(stats)
    }

    /// Query the project's collection. No collection means no hits.
    pub async fn search(&self, project_id: &str, text: &str, limit: usize) -> Result<Vec<QueryHit>> {
        let name = collection_name(project_id);
        match self
            .vectors
            .get_collection(&name, Arc::clone(&self.embedder))
            .await?
        {
            Some(collection) => collection.query(text, limit).await,
            None => Ok(Vec::new()),
        }
    }

    /// Delete the project's collection. Returns `false` if there was none.
    pub async fn drop_collection(&self, project_id: &str) -> Result<bool> {
        let name = collection_name(project_id);
        if self
            .vectors
            .get_collection(&name, Arc::clone(&self.embedder))
            .await?
            .is_none()
        {
            return Ok(false);
        }
        self.vectors.delete_collection(&name).await?;
        Ok(true)
    }
}

/// Walk `root` and chunk every indexable file. Blocking.
pub fn collect_chunks(
    root: &Path,
    project_id: &str,
    filter: &FileFilter,
    limits: &ChunkLimits,
) -> Result<(Vec<ChunkRecord>, IndexStats), IndexError> {
    let mut records = Vec::new();
    let mut stats = IndexStats::default();

    let walker = WalkDir::new(root)
        .follow_links(false)
        .sort_by_file_name()
        .into_iter()
        .filter_entry(|entry| !is_git_dir(entry));

    for entry in walker {
        let entry = match entry {
            Ok(entry) => entry,
            Err(e) if e.depth() == 0 => {
                return Err(IndexError::Walk {
                    path: root.to_path_buf(),
                    source: e,
                })
            }
            Err(e) => {
                tracing::warn!(project_id, error = %e, "skipping unreadable path");
                stats.files_failed += 1;
                continue;
            }
        };
        if !entry.file_type().is_file() {
            continue;
        }

        let relative = relative_path(root, entry.path());
        if filter.is_denied(&relative) {
            stats.files_skipped += 1;
            continue;
        }

        match read_text(&entry, filter) {
            Ok(text) => {
                let chunks = chunk_file(&relative, project_id, &text, limits);
                stats.files_indexed += 1;
                stats.chunks += chunks.len();
                records.extend(chunks);
            }
            Err(e @ FileReadError::TooLarge { .. }) => {
                tracing::warn!(project_id, file = %relative, reason = %e, "skipping large file");
                stats.files_skipped += 1;
            }
            Err(e) => {
                tracing::warn!(project_id, file = %relative, error = %e, "failed to read file");
                stats.files_failed += 1;
            }
        }
    }

    Ok((records, stats))
}

fn is_git_dir(entry: &DirEntry) -> bool {
    entry.depth() > 0 && entry.file_name() == OsStr::new(".git")
}

/// Size-check before opening, then decode lossily.
fn read_text(entry: &DirEntry, filter: &FileFilter) -> Result<String, FileReadError> {
    let len = entry.metadata().map_err(FileReadError::Metadata)?.len();
    if filter.is_oversized(len) {
        return Err(FileReadError::TooLarge {
            len,
            limit: filter.max_file_bytes(),
        });
    }
    let bytes = std::fs::read(entry.path()).map_err(FileReadError::Read)?;
    Ok(String::from_utf8_lossy(&bytes).into_owned())
}

fn relative_path(root: &Path, path: &Path) -> String {
    let relative = path.strip_prefix(root).unwrap_or(path);
    relative
        .components()
        .map(|c| c.as_os_str().to_string_lossy())
        .collect::<Vec<_>>()
        .join("/")
}
