//! Collaborator abstractions for the context pipeline.
//!
//! The pipeline never talks to a database or a vector engine directly.
//! It goes through two families of traits so that tests and alternative
//! backends can substitute their own implementations:
//!
//! | Trait | Purpose |
//! |-------|---------|
//! | [`SessionFactory`] | Opens a fresh [`ProjectSession`] per pipeline run |
//! | [`ProjectSession`] | Reads a project and persists its `context_status` |
//! | [`VectorStore`] | Deletes / creates named collections |
//! | [`VectorCollection`] | Adds chunks, counts, lists, and queries them |
//!
//! Implementations must be `Send + Sync` (sessions only `Send`) to work
//! with async runtimes.

pub mod memory;

use std::sync::Arc;

use anyhow::{bail, Result};
use async_trait::async_trait;

use crate::embedding::EmbeddingProvider;
use crate::models::{ChunkMetadata, ChunkRecord, ContextStatus, Project};

/// Opens project sessions. One session is opened per pipeline run.
#[async_trait]
pub trait SessionFactory: Send + Sync {
    async fn open(&self) -> Result<Box<dyn ProjectSession>>;
}

/// A unit of work over the project table.
///
/// Every write is committed before the call returns. Callers own the
/// session boundary and must release it with [`close`](ProjectSession::close).
#[async_trait]
pub trait ProjectSession: Send {
    /// Load a project by id.
    async fn get(&mut self, project_id: &str) -> Result<Option<Project>>;

    /// Persist `status` on the project and mirror it into `project`.
    async fn update_status(&mut self, project: &mut Project, status: ContextStatus) -> Result<()>;

    /// Move the project to `INDEXING` only if its stored status is still
    /// `PENDING` or `FAILED`.
    ///
    /// Returns `false` when another writer got there first; `project` is
    /// refreshed with the stored status in that case.
    async fn claim_for_indexing(&mut self, project: &mut Project) -> Result<bool>;

    /// Release the session.
    fn close(self: Box<Self>);
}

/// A vector database holding one named collection per project.
#[async_trait]
pub trait VectorStore: Send + Sync {
    /// Delete a collection. Fails if the collection does not exist.
    async fn delete_collection(&self, name: &str) -> Result<()>;

    /// Return the named collection, creating it bound to `embedder` if needed.
    async fn get_or_create_collection(
        &self,
        name: &str,
        embedder: Arc<dyn EmbeddingProvider>,
    ) -> Result<Arc<dyn VectorCollection>>;

    /// Return the named collection if it exists.
    async fn get_collection(
        &self,
        name: &str,
        embedder: Arc<dyn EmbeddingProvider>,
    ) -> Result<Option<Arc<dyn VectorCollection>>>;
}

/// A chunk returned from [`VectorCollection::query`].
#[derive(Debug, Clone)]
pub struct QueryHit {
    pub record: ChunkRecord,
    /// Cosine similarity to the query.
    pub score: f32,
}

/// One named set of embedded chunks.
#[async_trait]
pub trait VectorCollection: Send + Sync {
    fn name(&self) -> &str;

    /// Embed and store documents. The three slices are parallel; an id
    /// that already exists is overwritten.
    async fn add(&self, documents: &[String], metadatas: &[ChunkMetadata], ids: &[String])
        -> Result<()>;

    async fn count(&self) -> Result<usize>;

    /// All stored chunks, ordered by id.
    async fn records(&self) -> Result<Vec<ChunkRecord>>;

    /// The `limit` chunks most similar to `text`, best first.
    async fn query(&self, text: &str, limit: usize) -> Result<Vec<QueryHit>>;
}

/// Validate the parallel slices handed to [`VectorCollection::add`].
pub fn check_add_batch(documents: &[String], metadatas: &[ChunkMetadata], ids: &[String]) -> Result<()> {
    if documents.len() != metadatas.len() || documents.len() != ids.len() {
        bail!(
            "add batch length mismatch: {} documents, {} metadatas, {} ids",
            documents.len(),
            metadatas.len(),
            ids.len()
        );
    }
    Ok(())
}

/// Embed `texts` in provider-sized batches.
pub async fn embed_batched(embedder: &dyn EmbeddingProvider, texts: &[String]) -> Result<Vec<Vec<f32>>> {
    let batch_size = embedder.batch_size().max(1);
    let mut vectors = Vec::with_capacity(texts.len());
    for batch in texts.chunks(batch_size) {
        let embedded = embedder.embed(batch).await?;
        if embedded.len() != batch.len() {
            bail!(
                "embedding provider returned {} vectors for {} texts",
                embedded.len(),
                batch.len()
            );
        }
        vectors.extend(embedded);
    }
    Ok(vectors)
}
