//! SQLite-backed [`VectorStore`].
//!
//! Collections live in `vector_collections`; their chunks live in
//! `vector_records` with the embedding stored as a little-endian f32 BLOB
//! and a SHA-256 content hash. Queries are brute-force cosine similarity
//! over one collection, which is adequate at per-project scale.

use std::sync::Arc;

use anyhow::{anyhow, bail, Result};
use async_trait::async_trait;
use chrono::Utc;
use sqlx::{Row, SqlitePool};

use repo_context_core::chunk::content_hash;
use repo_context_core::embedding::{blob_to_vec, cosine_similarity, vec_to_blob, EmbeddingProvider};
use repo_context_core::models::{ChunkMetadata, ChunkRecord};
use repo_context_core::store::{
    check_add_batch, embed_batched, QueryHit, VectorCollection, VectorStore,
};

#[derive(Clone)]
pub struct SqliteVectorStore {
    pool: SqlitePool,
}

impl SqliteVectorStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    async fn exists(&self, name: &str) -> Result<bool> {
        let found: Option<String> =
            sqlx::query_scalar("SELECT name FROM vector_collections WHERE name = ?")
                .bind(name)
                .fetch_optional(&self.pool)
                .await?;
        Ok(found.is_some())
    }

    fn collection(&self, name: &str, embedder: Arc<dyn EmbeddingProvider>) -> Arc<dyn VectorCollection> {
        Arc::new(SqliteCollection {
            pool: self.pool.clone(),
            name: name.to_string(),
            embedder,
        })
    }
}

#[async_trait]
impl VectorStore for SqliteVectorStore {
    async fn delete_collection(&self, name: &str) -> Result<()> {
        let mut tx = self.pool.begin().await?;

        sqlx::query("DELETE FROM vector_records WHERE collection = ?")
            .bind(name)
            .execute(&mut *tx)
            .await?;
        let result = sqlx::query("DELETE FROM vector_collections WHERE name = ?")
            .bind(name)
            .execute(&mut *tx)
            .await?;

        if result.rows_affected() == 0 {
            tx.rollback().await?;
            bail!("Collection {} does not exist.", name);
        }
        tx.commit().await?;
        Ok(())
    }

    async fn get_or_create_collection(
        &self,
        name: &str,
        embedder: Arc<dyn EmbeddingProvider>,
    ) -> Result<Arc<dyn VectorCollection>> {
        sqlx::query(
            r#"
            INSERT INTO vector_collections (name, model, dims, created_at)
            VALUES (?, ?, ?, ?)
            ON CONFLICT(name) DO NOTHING
            "#,
        )
        .bind(name)
        .bind(embedder.model_name())
        .bind(embedder.dims() as i64)
        .bind(Utc::now().timestamp())
        .execute(&self.pool)
        .await?;

        let stored_model: String =
            sqlx::query_scalar("SELECT model FROM vector_collections WHERE name = ?")
                .bind(name)
                .fetch_one(&self.pool)
                .await?;
        if stored_model != embedder.model_name() {
            tracing::warn!(
                collection = name,
                stored_model = %stored_model,
                model = embedder.model_name(),
                "collection was created with a different embedding model"
            );
        }

        Ok(self.collection(name, embedder))
    }

    async fn get_collection(
        &self,
        name: &str,
        embedder: Arc<dyn EmbeddingProvider>,
    ) -> Result<Option<Arc<dyn VectorCollection>>> {
        if !self.exists(name).await? {
            return Ok(None);
        }
        Ok(Some(self.collection(name, embedder)))
    }
}

struct SqliteCollection {
    pool: SqlitePool,
    name: String,
    embedder: Arc<dyn EmbeddingProvider>,
}

fn row_to_record(row: &sqlx::sqlite::SqliteRow) -> Result<ChunkRecord> {
    let chunk_index: i64 = row.try_get("chunk_index")?;
    Ok(ChunkRecord {
        id: row.try_get("id")?,
        document: row.try_get("document")?,
        metadata: ChunkMetadata {
            source: row.try_get("source")?,
            chunk_index: usize::try_from(chunk_index)?,
            project_id: row.try_get("project_id")?,
        },
    })
}

#[async_trait]
impl VectorCollection for SqliteCollection {
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
        if documents.is_empty() {
            return Ok(());
        }

        let vectors = embed_batched(self.embedder.as_ref(), documents).await?;

        let mut tx = self.pool.begin().await?;
        for (((document, metadata), id), vector) in
            documents.iter().zip(metadatas).zip(ids).zip(vectors.iter())
        {
            sqlx::query(
                r#"
                INSERT INTO vector_records
                    (collection, id, document, source, chunk_index, project_id, content_hash, embedding)
                VALUES (?, ?, ?, ?, ?, ?, ?, ?)
                ON CONFLICT(collection, id) DO UPDATE SET
                    document = excluded.document,
                    source = excluded.source,
                    chunk_index = excluded.chunk_index,
                    project_id = excluded.project_id,
                    content_hash = excluded.content_hash,
                    embedding = excluded.embedding
                "#,
            )
            .bind(&self.name)
            .bind(id)
            .bind(document)
            .bind(&metadata.source)
            .bind(metadata.chunk_index as i64)
            .bind(&metadata.project_id)
            .bind(content_hash(document))
            .bind(vec_to_blob(vector))
            .execute(&mut *tx)
            .await?;
        }
        tx.commit().await?;
        Ok(())
    }

    async fn count(&self) -> Result<usize> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM vector_records WHERE collection = ?")
            .bind(&self.name)
            .fetch_one(&self.pool)
            .await?;
        Ok(count as usize)
    }

    async fn records(&self) -> Result<Vec<ChunkRecord>> {
        let rows = sqlx::query(
            r#"
            SELECT id, document, source, chunk_index, project_id
            FROM vector_records WHERE collection = ? ORDER BY id
            "#,
        )
        .bind(&self.name)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(row_to_record).collect()
    }

    async fn query(&self, text: &str, limit: usize) -> Result<Vec<QueryHit>> {
        let query_vec = embed_batched(self.embedder.as_ref(), &[text.to_string()])
            .await?
            .into_iter()
            .next()
            .ok_or_else(|| anyhow!("Empty embedding response"))?;

        let rows = sqlx::query(
            r#"
            SELECT id, document, source, chunk_index, project_id, embedding
            FROM vector_records WHERE collection = ?
            "#,
        )
        .bind(&self.name)
        .fetch_all(&self.pool)
        .await?;

        let mut hits = Vec::with_capacity(rows.len());
        for row in &rows {
            let blob: Vec<u8> = row.try_get("embedding")?;
            hits.push(QueryHit {
                record: row_to_record(row)?,
                score: cosine_similarity(&query_vec, &blob_to_vec(&blob)),
            });
        }
        hits.sort_by(|a, b| {
            b.score
                .partial_cmp(&a.score)
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        hits.truncate(limit);
        Ok(hits)
    }
}
