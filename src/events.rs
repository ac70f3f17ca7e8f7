//! Structured pipeline events.
//!
//! Runs are fire-and-forget, so the only failure channel besides the
//! persisted status is an [`EventSink`]. The orchestrator reports every
//! status transition, every failure, and every skipped run.

use std::fmt;
use std::sync::{Arc, Mutex};

use repo_context_core::models::ContextStatus;

/// The pipeline stage an event belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Guard,
    Sync,
    Index,
    Cleanup,
}

impl Stage {
    pub fn as_str(&self) -> &'static str {
        match self {
            Stage::Guard => "guard",
            Stage::Sync => "sync",
            Stage::Index => "index",
            Stage::Cleanup => "cleanup",
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EventKind {
    StatusChanged {
        from: ContextStatus,
        to: ContextStatus,
    },
    Failed {
        error: String,
    },
    Skipped {
        reason: String,
    },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexingEvent {
    pub project_id: String,
    pub stage: Stage,
    pub kind: EventKind,
}

impl IndexingEvent {
    pub fn status_changed(project_id: &str, stage: Stage, from: ContextStatus, to: ContextStatus) -> Self {
        Self {
            project_id: project_id.to_string(),
            stage,
            kind: EventKind::StatusChanged { from, to },
        }
    }

    pub fn failed(project_id: &str, stage: Stage, error: impl fmt::Display) -> Self {
        Self {
            project_id: project_id.to_string(),
            stage,
            kind: EventKind::Failed {
                error: error.to_string(),
            },
        }
    }

    pub fn skipped(project_id: &str, reason: impl Into<String>) -> Self {
        Self {
            project_id: project_id.to_string(),
            stage: Stage::Guard,
            kind: EventKind::Skipped {
                reason: reason.into(),
            },
        }
    }
}

/// Receives pipeline events. Implementations must not block.
pub trait EventSink: Send + Sync {
    fn emit(&self, event: IndexingEvent);
}

/// Default sink: forwards events to `tracing`.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingEventSink;

impl EventSink for TracingEventSink {
    fn emit(&self, event: IndexingEvent) {
        let project_id = event.project_id.as_str();
        let stage = event.stage.as_str();
        match &event.kind {
            EventKind::StatusChanged { from, to } => {
                tracing::info!(project_id, stage, %from, %to, "context status changed");
            }
            EventKind::Failed { error } => {
                tracing::error!(project_id, stage, error = %error, "indexing stage failed");
            }
            EventKind::Skipped { reason } => {
                tracing::info!(project_id, stage, reason = %reason, "indexing run skipped");
            }
        }
    }
}

/// Keeps every event in memory.
#[derive(Debug, Default, Clone)]
pub struct RecordingEventSink {
    events: Arc<Mutex<Vec<IndexingEvent>>>,
}

impl RecordingEventSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<IndexingEvent> {
        self.events
            .lock()
            .map(|events| events.clone())
            .unwrap_or_default()
    }

    pub fn failures(&self) -> Vec<IndexingEvent> {
        self.events()
            .into_iter()
            .filter(|e| matches!(e.kind, EventKind::Failed { .. }))
            .collect()
    }
}

impl EventSink for RecordingEventSink {
    fn emit(&self, event: IndexingEvent) {
        if let Ok(mut events) = self.events.lock() {
            events.push(event);
        }
    }
}
