//! Background entry points of the context pipeline.
//!
//! A run of [`IndexingOrchestrator::synchronize_and_index`] goes through
//! these steps:
//!
//! ```text
//! lock(project) ─► open session ─► load ─► guard (PENDING|FAILED?)
//!     ─► claim INDEXING ─► sync ──fail──► FAILED + remove working copy
//!                            │
//!                            └─ok─► index ─► READY | FAILED
//!     ─► close session ─► unlock
//! ```
//!
//! Nothing escapes a run. Failures are visible through the persisted
//! status, the log, and the [`EventSink`].

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use anyhow::Result;
use sqlx::SqlitePool;
use tokio::sync::OwnedMutexGuard;
use tokio::task::JoinHandle;
use tokio::time::timeout;

use repo_context_core::store::{QueryHit, SessionFactory, VectorStore};

use crate::config::{Config, IndexingConfig};
use crate::embedding::create_provider;
use crate::error::{IndexError, SyncError};
use crate::events::{EventSink, IndexingEvent, Stage, TracingEventSink};
use crate::git::CommandGit;
use crate::indexer::{ContentIndexer, FileFilter, IndexOutcome};
use crate::projects::SqliteSessionFactory;
use crate::status::IndexingStatusStore;
use crate::sync::{RepositorySynchronizer, SyncResult};
use crate::vector_sqlite::SqliteVectorStore;
use crate::workspace::{is_valid_project_id, FilesystemWorkspace};

/// Upper bounds on the two slow stages.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StageTimeouts {
    pub sync: Duration,
    pub index: Duration,
}

impl StageTimeouts {
    pub fn from_config(config: &IndexingConfig) -> Self {
        Self {
            sync: Duration::from_secs(config.sync_timeout_secs),
            index: Duration::from_secs(config.index_timeout_secs),
        }
    }
}

impl Default for StageTimeouts {
    fn default() -> Self {
        Self::from_config(&IndexingConfig::default())
    }
}

/// One async mutex per project id, held for a whole run.
#[derive(Clone, Default)]
pub struct ProjectLocks {
    locks: Arc<Mutex<HashMap<String, Arc<tokio::sync::Mutex<()>>>>>,
}

impl ProjectLocks {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn acquire(&self, project_id: &str) -> OwnedMutexGuard<()> {
        self.lock_for(project_id).lock_owned().await
    }

    fn lock_for(&self, project_id: &str) -> Arc<tokio::sync::Mutex<()>> {
        let mut locks = self.locks.lock().unwrap_or_else(PoisonError::into_inner);
        // Entries nobody holds or waits on.
        locks.retain(|_, lock| Arc::strong_count(lock) > 1);
        Arc::clone(locks.entry(project_id.to_string()).or_default())
    }
}

#[derive(Clone)]
pub struct IndexingOrchestrator {
    sessions: Arc<dyn SessionFactory>,
    synchronizer: RepositorySynchronizer,
    indexer: ContentIndexer,
    events: Arc<dyn EventSink>,
    locks: ProjectLocks,
    timeouts: StageTimeouts,
}

impl IndexingOrchestrator {
    pub fn new(
        sessions: Arc<dyn SessionFactory>,
        synchronizer: RepositorySynchronizer,
        indexer: ContentIndexer,
    ) -> Self {
        Self {
            sessions,
            synchronizer,
            indexer,
            events: Arc::new(TracingEventSink),
            locks: ProjectLocks::new(),
            timeouts: StageTimeouts::default(),
        }
    }

    /// Wire the SQLite stores, the `git` CLI, and the configured
    /// embedding provider.
    pub fn from_config(config: &Config, pool: SqlitePool) -> Result<Self> {
        let embedder = create_provider(&config.embedding)?;
        let vectors: Arc<dyn VectorStore> = Arc::new(SqliteVectorStore::new(pool.clone()));
        let synchronizer = RepositorySynchronizer::new(
            FilesystemWorkspace::new(&config.workspace.base_dir),
            Arc::new(CommandGit::new(&config.git)),
        );
        let indexer = ContentIndexer::new(
            vectors,
            embedder,
            FileFilter::from_config(&config.indexing)?,
            config.indexing.chunk_limits(),
        );

        Ok(Self::new(Arc::new(SqliteSessionFactory::new(pool)), synchronizer, indexer)
            .with_timeouts(StageTimeouts::from_config(&config.indexing)))
    }

    pub fn with_events(mut self, events: Arc<dyn EventSink>) -> Self {
        self.events = events;
        self
    }

    pub fn with_timeouts(mut self, timeouts: StageTimeouts) -> Self {
        self.timeouts = timeouts;
        self
    }

    pub fn with_locks(mut self, locks: ProjectLocks) -> Self {
        self.locks = locks;
        self
    }

    pub fn with_sessions(mut self, sessions: Arc<dyn SessionFactory>) -> Self {
        self.sessions = sessions;
        self
    }

    pub fn workspace(&self) -> &FilesystemWorkspace {
        self.synchronizer.workspace()
    }

    pub fn synchronizer(&self) -> &RepositorySynchronizer {
        &self.synchronizer
    }

    pub fn indexer(&self) -> &ContentIndexer {
        &self.indexer
    }

    /// Synchronize the project's working copy with `repo_url` and rebuild
    /// its vector collection.
    ///
    /// Does nothing unless the project exists with status `PENDING` or
    /// `FAILED`. Never fails; the outcome is the project's final status.
    pub async fn synchronize_and_index(&self, project_id: &str, repo_url: &str) {
        if !is_valid_project_id(project_id) {
            tracing::warn!(project_id, "refusing to index project with an unusable id");
            self.events
                .emit(IndexingEvent::skipped(project_id, "invalid project id"));
            return;
        }

        let _guard = self.locks.acquire(project_id).await;

        let mut store = match IndexingStatusStore::open(self.sessions.as_ref(), Arc::clone(&self.events)).await {
            Ok(store) => store,
            Err(e) => {
                tracing::error!(project_id, error = %e, "could not open project session");
                self.events
                    .emit(IndexingEvent::failed(project_id, Stage::Guard, &e));
                return;
            }
        };

        self.run(&mut store, project_id, repo_url).await;

        tracing::debug!(project_id, "closing project session");
        store.close();
    }

    /// Fire-and-forget form of [`synchronize_and_index`](Self::synchronize_and_index).
    pub fn spawn(&self, project_id: impl Into<String>, repo_url: impl Into<String>) -> JoinHandle<()> {
        let orchestrator = self.clone();
        let project_id = project_id.into();
        let repo_url = repo_url.into();
        tokio::spawn(async move {
            orchestrator
                .synchronize_and_index(&project_id, &repo_url)
                .await
        })
    }

    async fn run(&self, store: &mut IndexingStatusStore, project_id: &str, repo_url: &str) {
        let mut project = match store.load(project_id).await {
            Ok(Some(project)) => project,
            Ok(None) => {
                tracing::warn!(project_id, "project not found; nothing to index");
                self.events
                    .emit(IndexingEvent::skipped(project_id, "project not found"));
                return;
            }
            Err(e) => {
                tracing::error!(project_id, error = %e, "could not load project");
                self.events
                    .emit(IndexingEvent::failed(project_id, Stage::Guard, &e));
                return;
            }
        };

        if !project.context_status.is_indexable() {
            tracing::info!(
                project_id,
                status = %project.context_status,
                "project is not awaiting indexing; skipping"
            );
            self.events.emit(IndexingEvent::skipped(
                project_id,
                format!("status is {}", project.context_status),
            ));
            return;
        }

        match store.claim(&mut project).await {
            Ok(true) => {}
            Ok(false) => {
                tracing::info!(
                    project_id,
                    status = %project.context_status,
                    "another run claimed the project; skipping"
                );
                self.events.emit(IndexingEvent::skipped(
                    project_id,
                    format!("claimed elsewhere, status is {}", project.context_status),
                ));
                return;
            }
            Err(e) => {
                tracing::error!(project_id, error = %e, "could not mark project INDEXING");
                self.events
                    .emit(IndexingEvent::failed(project_id, Stage::Guard, &e));
                return;
            }
        }

        let synced = match timeout(self.timeouts.sync, self.synchronizer.sync(project_id, repo_url)).await {
            Ok(result) => result,
            Err(_) => SyncResult {
                path: self.workspace().path_for(project_id),
                outcome: Err(SyncError::TimedOut(self.timeouts.sync)),
            },
        };
        let repo_path = match synced.outcome {
            Ok(_) => synced.path,
            Err(e) => {
                tracing::error!(project_id, error = %e, "repository synchronization failed");
                self.events
                    .emit(IndexingEvent::failed(project_id, Stage::Sync, &e));
                store.mark_failed(&mut project, Stage::Sync).await;
                self.discard_working_copy(project_id).await;
                return;
            }
        };

        let indexed = timeout(
            self.timeouts.index,
            self.indexer.index(store, project_id, &repo_path),
        )
        .await;
        let unfinished = match indexed {
            Ok(Ok(IndexOutcome::Ready(_))) | Ok(Ok(IndexOutcome::ProjectMissing)) => None,
            Ok(Ok(IndexOutcome::Failed(e))) => {
                self.events
                    .emit(IndexingEvent::failed(project_id, Stage::Index, &e));
                None
            }
            Ok(Err(e)) => Some(e),
            Err(_) => Some(IndexError::TimedOut(self.timeouts.index)),
        };

        if let Some(e) = unfinished {
            tracing::error!(project_id, error = %e, "indexing aborted before finalizing status");
            self.events
                .emit(IndexingEvent::failed(project_id, Stage::Index, &e));
            store.mark_failed(&mut project, Stage::Index).await;
        }
    }

    /// Remove the project's working copy. Never fails.
    ///
    /// Waits for an in-flight run on the same project to finish first.
    pub async fn remove_workspace(&self, project_id: &str) {
        if !is_valid_project_id(project_id) {
            tracing::warn!(project_id, "refusing to remove workspace for an unusable id");
            return;
        }
        let _guard = self.locks.acquire(project_id).await;
        self.discard_working_copy(project_id).await;
    }

    async fn discard_working_copy(&self, project_id: &str) {
        if let Err(e) = self.workspace().destroy_async(project_id).await {
            self.events
                .emit(IndexingEvent::failed(project_id, Stage::Cleanup, &e));
        }
    }

    /// Drop the project's vector collection. Never fails.
    pub async fn remove_collection(&self, project_id: &str) {
        if !is_valid_project_id(project_id) {
            tracing::warn!(project_id, "refusing to remove collection for an unusable id");
            return;
        }
        let _guard = self.locks.acquire(project_id).await;
        match self.indexer.drop_collection(project_id).await {
            Ok(true) => tracing::info!(project_id, "deleted collection"),
            Ok(false) => tracing::info!(project_id, "no collection to delete"),
            Err(e) => {
                tracing::warn!(project_id, error = %e, "could not delete collection");
                self.events
                    .emit(IndexingEvent::failed(project_id, Stage::Cleanup, &e));
            }
        }
    }

    /// The `limit` chunks of the project's collection closest to `text`.
    ///
    /// An unindexed project yields no hits.
    pub async fn query_context(&self, project_id: &str, text: &str, limit: usize) -> Result<Vec<QueryHit>> {
        self.indexer.search(project_id, text, limit).await
    }
}
