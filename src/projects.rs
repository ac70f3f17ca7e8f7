//! SQLite-backed project table.
//!
//! [`SqliteSessionFactory`] hands each pipeline run a [`ProjectSession`]
//! over the shared pool. A session checks a connection out per statement,
//! so a long clone or index never pins one. The free functions below are the
//! CRUD operations the web layer (and the CLI) use to create projects and
//! change their repository URL.

use anyhow::{anyhow, bail, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqliteConnection, SqlitePool};
use uuid::Uuid;

use repo_context_core::models::{ContextStatus, Project};
use repo_context_core::store::{ProjectSession, SessionFactory};

const PROJECT_COLUMNS: &str =
    "id, owner_id, name, repository_url, context_status, created_at, updated_at";

/// Opens one [`SqliteProjectSession`] per call.
#[derive(Clone)]
pub struct SqliteSessionFactory {
    pool: SqlitePool,
}

impl SqliteSessionFactory {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl SessionFactory for SqliteSessionFactory {
    async fn open(&self) -> Result<Box<dyn ProjectSession>> {
        Ok(Box::new(SqliteProjectSession {
            pool: self.pool.clone(),
        }))
    }
}

/// A project session over the shared pool.
pub struct SqliteProjectSession {
    pool: SqlitePool,
}

#[async_trait]
impl ProjectSession for SqliteProjectSession {
    async fn get(&mut self, project_id: &str) -> Result<Option<Project>> {
        get_project(&self.pool, project_id).await
    }

    async fn update_status(&mut self, project: &mut Project, status: ContextStatus) -> Result<()> {
        let now = Utc::now();
        let result = sqlx::query("UPDATE projects SET context_status = ?, updated_at = ? WHERE id = ?")
            .bind(status.as_str())
            .bind(now.timestamp())
            .bind(&project.id)
            .execute(&self.pool)
            .await?;

        if result.rows_affected() == 0 {
            bail!("project {} no longer exists", project.id);
        }
        project.context_status = status;
        project.updated_at = now;
        Ok(())
    }

    async fn claim_for_indexing(&mut self, project: &mut Project) -> Result<bool> {
        let now = Utc::now();
        let result = sqlx::query(
            r#"
            UPDATE projects SET context_status = ?, updated_at = ?
            WHERE id = ? AND context_status IN (?, ?)
            "#,
        )
        .bind(ContextStatus::Indexing.as_str())
        .bind(now.timestamp())
        .bind(&project.id)
        .bind(ContextStatus::Pending.as_str())
        .bind(ContextStatus::Failed.as_str())
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 1 {
            project.context_status = ContextStatus::Indexing;
            project.updated_at = now;
            return Ok(true);
        }

        let stored = get_project(&self.pool, &project.id)
            .await?
            .ok_or_else(|| anyhow!("project {} no longer exists", project.id))?;
        project.context_status = stored.context_status;
        Ok(false)
    }

    fn close(self: Box<Self>) {}
}

async fn fetch_project(conn: &mut SqliteConnection, project_id: &str) -> Result<Option<Project>> {
    let row = sqlx::query(&format!("SELECT {} FROM projects WHERE id = ?", PROJECT_COLUMNS))
        .bind(project_id)
        .fetch_optional(conn)
        .await?;

    row.map(|r| row_to_project(&r)).transpose()
}

fn row_to_project(row: &SqliteRow) -> Result<Project> {
    let status: String = row.try_get("context_status")?;
    Ok(Project {
        id: row.try_get("id")?,
        owner_id: row.try_get("owner_id")?,
        name: row.try_get("name")?,
        repository_url: row.try_get("repository_url")?,
        context_status: status.parse()?,
        created_at: from_ts(row.try_get("created_at")?),
        updated_at: from_ts(row.try_get("updated_at")?),
    })
}

fn from_ts(ts: i64) -> DateTime<Utc> {
    DateTime::from_timestamp(ts, 0).unwrap_or_else(Utc::now)
}

/// Create a project. Its status is `PENDING` when a repository URL is
/// given and `NONE` otherwise.
pub async fn create_project(
    pool: &SqlitePool,
    owner_id: &str,
    name: &str,
    repository_url: Option<String>,
) -> Result<Project> {
    let project = Project::new(Uuid::new_v4().to_string(), owner_id, name, repository_url);

    sqlx::query(&format!(
        "INSERT INTO projects ({}) VALUES (?, ?, ?, ?, ?, ?, ?)",
        PROJECT_COLUMNS
    ))
    .bind(&project.id)
    .bind(&project.owner_id)
    .bind(&project.name)
    .bind(&project.repository_url)
    .bind(project.context_status.as_str())
    .bind(project.created_at.timestamp())
    .bind(project.updated_at.timestamp())
    .execute(pool)
    .await?;

    Ok(project)
}

pub async fn get_project(pool: &SqlitePool, project_id: &str) -> Result<Option<Project>> {
    let mut conn = pool.acquire().await?;
    fetch_project(&mut conn, project_id).await
}

/// Change a project's repository URL.
///
/// Returns the updated project and whether indexing was re-armed
/// (`PENDING`), or `None` if the project does not exist.
pub async fn update_repository_url(
    pool: &SqlitePool,
    project_id: &str,
    repository_url: Option<String>,
) -> Result<Option<(Project, bool)>> {
    let mut tx = pool.begin().await?;

    let mut project = match fetch_project(&mut tx, project_id).await? {
        Some(p) => p,
        None => return Ok(None),
    };
    let rearmed = project.set_repository_url(repository_url);

    sqlx::query(
        "UPDATE projects SET repository_url = ?, context_status = ?, updated_at = ? WHERE id = ?",
    )
    .bind(&project.repository_url)
    .bind(project.context_status.as_str())
    .bind(project.updated_at.timestamp())
    .bind(&project.id)
    .execute(&mut *tx)
    .await?;

    tx.commit().await?;
    Ok(Some((project, rearmed)))
}

/// Delete a project row. Returns `false` if it did not exist.
pub async fn delete_project(pool: &SqlitePool, project_id: &str) -> Result<bool> {
    let result = sqlx::query("DELETE FROM projects WHERE id = ?")
        .bind(project_id)
        .execute(pool)
        .await?;
    Ok(result.rows_affected() > 0)
}
