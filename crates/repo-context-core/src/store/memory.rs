//! In-memory store implementations for tests and embedders.
//!
//! [`InMemoryProjects`] keeps projects in a `HashMap` and records every
//! status write and session open/close, so callers can audit exactly what
//! a pipeline run did. [`InMemoryVectorStore`] keeps collections in memory
//! and answers queries by brute-force cosine similarity.
//!
//! Both are cheap to clone; clones share state.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, RwLock};

use anyhow::{anyhow, bail, Result};
use async_trait::async_trait;
use chrono::Utc;

use crate::embedding::{cosine_similarity, EmbeddingProvider};
use crate::models::{ChunkMetadata, ChunkRecord, ContextStatus, Project};

use super::{
    check_add_batch, embed_batched, ProjectSession, QueryHit, SessionFactory, VectorCollection,
    VectorStore,
};

// ─── Projects ───────────────────────────────────────────────────────

/// A status write observed by [`InMemoryProjects`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatusWrite {
    pub project_id: String,
    pub status: ContextStatus,
}

#[derive(Default)]
struct ProjectsInner {
    projects: HashMap<String, Project>,
    writes: Vec<StatusWrite>,
    sessions_opened: usize,
    sessions_closed: usize,
    fail_writes: bool,
    fail_reads: bool,
}

/// In-memory project table implementing [`SessionFactory`].
#[derive(Clone, Default)]
pub struct InMemoryProjects {
    inner: Arc<RwLock<ProjectsInner>>,
}

impl InMemoryProjects {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, project: Project) {
        let mut inner = self.inner.write().unwrap();
        inner.projects.insert(project.id.clone(), project);
    }

    pub fn remove(&self, project_id: &str) -> Option<Project> {
        self.inner.write().unwrap().projects.remove(project_id)
    }

    pub fn project(&self, project_id: &str) -> Option<Project> {
        self.inner.read().unwrap().projects.get(project_id).cloned()
    }

    pub fn status(&self, project_id: &str) -> Option<ContextStatus> {
        self.project(project_id).map(|p| p.context_status)
    }

    /// Statuses written for `project_id`, in order.
    pub fn status_writes(&self, project_id: &str) -> Vec<ContextStatus> {
        self.inner
            .read()
            .unwrap()
            .writes
            .iter()
            .filter(|w| w.project_id == project_id)
            .map(|w| w.status)
            .collect()
    }

    pub fn sessions_opened(&self) -> usize {
        self.inner.read().unwrap().sessions_opened
    }

    pub fn sessions_closed(&self) -> usize {
        self.inner.read().unwrap().sessions_closed
    }

    /// Make every subsequent status write fail.
    pub fn fail_writes(&self, fail: bool) {
        self.inner.write().unwrap().fail_writes = fail;
    }

    /// Make every subsequent project read fail.
    pub fn fail_reads(&self, fail: bool) {
        self.inner.write().unwrap().fail_reads = fail;
    }

    fn record_write(inner: &mut ProjectsInner, project_id: &str, status: ContextStatus) -> Result<()> {
        if inner.fail_writes {
            bail!("simulated status write failure");
        }
        let stored = inner
            .projects
            .get_mut(project_id)
            .ok_or_else(|| anyhow!("project {} no longer exists", project_id))?;
        stored.context_status = status;
        stored.updated_at = Utc::now();
        inner.writes.push(StatusWrite {
            project_id: project_id.to_string(),
            status,
        });
        Ok(())
    }
}

#[async_trait]
impl SessionFactory for InMemoryProjects {
    async fn open(&self) -> Result<Box<dyn ProjectSession>> {
        self.inner.write().unwrap().sessions_opened += 1;
        Ok(Box::new(InMemoryProjectSession {
            inner: Arc::clone(&self.inner),
        }))
    }
}

struct InMemoryProjectSession {
    inner: Arc<RwLock<ProjectsInner>>,
}

#[async_trait]
impl ProjectSession for InMemoryProjectSession {
    async fn get(&mut self, project_id: &str) -> Result<Option<Project>> {
        let inner = self.inner.read().unwrap();
        if inner.fail_reads {
            bail!("simulated project read failure");
        }
        Ok(inner.projects.get(project_id).cloned())
    }

    async fn update_status(&mut self, project: &mut Project, status: ContextStatus) -> Result<()> {
        let mut inner = self.inner.write().unwrap();
        InMemoryProjects::record_write(&mut inner, &project.id, status)?;
        project.context_status = status;
        Ok(())
    }

    async fn claim_for_indexing(&mut self, project: &mut Project) -> Result<bool> {
        let mut inner = self.inner.write().unwrap();
        let current = inner
            .projects
            .get(&project.id)
            .map(|p| p.context_status)
            .ok_or_else(|| anyhow!("project {} no longer exists", project.id))?;
        if !current.is_indexable() {
            project.context_status = current;
            return Ok(false);
        }
        InMemoryProjects::record_write(&mut inner, &project.id, ContextStatus::Indexing)?;
        project.context_status = ContextStatus::Indexing;
        Ok(true)
    }

    fn close(self: Box<Self>) {
        self.inner.write().unwrap().sessions_closed += 1;
    }
}

// ─── Vectors ────────────────────────────────────────────────────────

struct StoredRecord {
    record: ChunkRecord,
    vector: Vec<f32>,
}

struct InMemoryCollection {
    name: String,
    embedder: Arc<dyn EmbeddingProvider>,
    records: RwLock<Vec<StoredRecord>>,
    fail_adds: Arc<AtomicBool>,
}

/// In-memory [`VectorStore`].
#[derive(Clone, Default)]
pub struct InMemoryVectorStore {
    collections: Arc<RwLock<HashMap<String, Arc<InMemoryCollection>>>>,
    fail_adds: Arc<AtomicBool>,
    deletes: Arc<RwLock<Vec<String>>>,
}

impl InMemoryVectorStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every subsequent `add` fail.
    pub fn fail_adds(&self, fail: bool) {
        self.fail_adds.store(fail, Ordering::SeqCst);
    }

    pub fn has_collection(&self, name: &str) -> bool {
        self.collections.read().unwrap().contains_key(name)
    }

    /// Stored chunks of a collection ordered by id, or `None` if absent.
    pub fn records_of(&self, name: &str) -> Option<Vec<ChunkRecord>> {
        let collections = self.collections.read().unwrap();
        collections.get(name).map(|c| c.sorted_records())
    }

    /// Names passed to `delete_collection` that existed at the time.
    pub fn deleted(&self) -> Vec<String> {
        self.deletes.read().unwrap().clone()
    }
}

impl InMemoryCollection {
    fn sorted_records(&self) -> Vec<ChunkRecord> {
        let mut records: Vec<ChunkRecord> = self
            .records
            .read()
            .unwrap()
            .iter()
            .map(|s| s.record.clone())
            .collect();
        records.sort_by(|a, b| a.id.cmp(&b.id));
        records
    }
}

#[async_trait]
impl VectorStore for InMemoryVectorStore {
    async fn delete_collection(&self, name: &str) -> Result<()> {
        let removed = self.collections.write().unwrap().remove(name);
        match removed {
            Some(_) => {
                self.deletes.write().unwrap().push(name.to_string());
                Ok(())
            }
            None => bail!("Collection {} does not exist.", name),
        }
    }

    async fn get_or_create_collection(
        &self,
        name: &str,
        embedder: Arc<dyn EmbeddingProvider>,
    ) -> Result<Arc<dyn VectorCollection>> {
        let mut collections = self.collections.write().unwrap();
        let collection = collections
            .entry(name.to_string())
            .or_insert_with(|| {
                Arc::new(InMemoryCollection {
                    name: name.to_string(),
                    embedder,
                    records: RwLock::new(Vec::new()),
                    fail_adds: Arc::clone(&self.fail_adds),
                })
            })
            .clone();
        Ok(collection as Arc<dyn VectorCollection>)
    }

    async fn get_collection(
        &self,
        name: &str,
        _embedder: Arc<dyn EmbeddingProvider>,
    ) -> Result<Option<Arc<dyn VectorCollection>>> {
        let collections = self.collections.read().unwrap();
        Ok(collections
            .get(name)
            .map(|c| Arc::clone(c) as Arc<dyn VectorCollection>))
    }
}

#[async_trait]
impl VectorCollection for InMemoryCollection {
    fn name(&self) -> &str {
        &self.name
    }

    async fn add(
        &self,
        documents: &[String],
        metadatas: &[ChunkMetadata],
        ids: &[String],
    ) -> Result<()> {
        check_add_batch(documents, metadatas, ids)?;
        if self.fail_adds.load(Ordering::SeqCst) {
            bail!("simulated vector store failure");
        }
        let vectors = embed_batched(self.embedder.as_ref(), documents).await?;

        let mut records = self.records.write().unwrap();
        for (((document, metadata), id), vector) in
            documents.iter().zip(metadatas).zip(ids).zip(vectors)
        {
            records.retain(|s| &s.record.id != id);
            records.push(StoredRecord {
                record: ChunkRecord {
                    id: id.clone(),
                    document: document.clone(),
                    metadata: metadata.clone(),
                },
                vector,
            });
        }
        Ok(())
    }

    async fn count(&self) -> Result<usize> {
        Ok(self.records.read().unwrap().len())
    }

    async fn records(&self) -> Result<Vec<ChunkRecord>> {
        Ok(self.sorted_records())
    }

    async fn query(&self, text: &str, limit: usize) -> Result<Vec<QueryHit>> {
        let query_vec = embed_batched(self.embedder.as_ref(), &[text.to_string()])
            .await?
            .into_iter()
            .next()
            .ok_or_else(|| anyhow!("Empty embedding response"))?;

        let records = self.records.read().unwrap();
        let mut hits: Vec<QueryHit> = records
            .iter()
            .map(|s| QueryHit {
                record: s.record.clone(),
                score: cosine_similarity(&query_vec, &s.vector),
            })
            .collect();
        hits.sort_by(|a, b| {
            b.score
                .partial_cmp(&a.score)
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        hits.truncate(limit);
        Ok(hits)
    }
}
