//! The persisted `context_status` of one project, as seen by one run.
//!
//! An [`IndexingStatusStore`] owns the run's session. Every successful
//! write is reported to the [`EventSink`]; the session is released by
//! [`close`](IndexingStatusStore::close), which consumes the store.

use std::sync::Arc;

use anyhow::Result;

use repo_context_core::models::{ContextStatus, Project};
use repo_context_core::store::{ProjectSession, SessionFactory};

use crate::events::{EventSink, IndexingEvent, Stage};

pub struct IndexingStatusStore {
    session: Box<dyn ProjectSession>,
    events: Arc<dyn EventSink>,
}

impl IndexingStatusStore {
    pub async fn open(factory: &dyn SessionFactory, events: Arc<dyn EventSink>) -> Result<Self> {
        Ok(Self {
            session: factory.open().await?,
            events,
        })
    }

    pub async fn load(&mut self, project_id: &str) -> Result<Option<Project>> {
        self.session.get(project_id).await
    }

    /// Persist `to` on `project`.
    pub async fn transition(
        &mut self,
        project: &mut Project,
        to: ContextStatus,
        stage: Stage,
    ) -> Result<()> {
        let from = project.context_status;
        self.session.update_status(project, to).await?;
        self.events
            .emit(IndexingEvent::status_changed(&project.id, stage, from, to));
        Ok(())
    }

    /// Move to `INDEXING` if the stored status still allows it.
    pub async fn claim(&mut self, project: &mut Project) -> Result<bool> {
        let from = project.context_status;
        let claimed = self.session.claim_for_indexing(project).await?;
        if claimed {
            self.events.emit(IndexingEvent::status_changed(
                &project.id,
                Stage::Guard,
                from,
                ContextStatus::Indexing,
            ));
        }
        Ok(claimed)
    }

    /// Write `FAILED`, logging instead of failing.
    pub async fn mark_failed(&mut self, project: &mut Project, stage: Stage) {
        if let Err(e) = self.transition(project, ContextStatus::Failed, stage).await {
            tracing::error!(
                project_id = %project.id,
                stage = stage.as_str(),
                error = %e,
                "failed to persist FAILED status"
            );
        }
    }

    pub fn close(self) {
        self.session.close();
    }
}
