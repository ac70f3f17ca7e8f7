//! # Repo Context
//!
//! Background pipeline that keeps a per-project vector collection in step
//! with the project's Git repository.
//!
//! When a project gains (or changes) a repository URL its
//! `context_status` becomes `PENDING`. A background run then clones or
//! updates the working copy, chunks its text files, embeds the chunks,
//! and replaces the project's collection, finishing in `READY` or `FAILED`.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────┐   ┌──────────────┐   ┌──────────────┐
//! │ Synchronizer │──▶│   Indexer    │──▶│ VectorStore  │
//! │  git clone/  │   │ walk, filter │   │ one collection│
//! │  fetch       │   │ chunk, embed │   │ per project  │
//! └──────┬───────┘   └──────┬───────┘   └──────────────┘
//!        │                  │
//!        ▼                  ▼
//!  FilesystemWorkspace   IndexingStatusStore (NONE/PENDING/INDEXING/READY/FAILED)
//! ```
//!
//! [`orchestrator::IndexingOrchestrator`] sequences the stages and owns
//! every status transition.
//!
//! ## Quick Start
//!
//! ```bash
//! rctx init
//! rctx project create --owner u1 --name demo --repo https://github.com/org/repo.git
//! rctx search <project-id> "how are migrations run"
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing |
//! | [`db`] | Database connection |
//! | [`migrate`] | Schema creation |
//! | [`projects`] | SQLite project sessions and CRUD |
//! | [`vector_sqlite`] | SQLite vector collections |
//! | [`embedding`] | Embedding providers |
//! | [`workspace`] | Per-project working-copy directories |
//! | [`git`] | Git client abstraction and CLI implementation |
//! | [`sync`] | Repository synchronizer |
//! | [`indexer`] | File filtering, chunking, and collection rebuild |
//! | [`status`] | Status transitions for one run |
//! | [`events`] | Structured pipeline events |
//! | [`error`] | Stage error types |
//! | [`orchestrator`] | Entry points and per-project locking |

pub mod config;
pub mod db;
pub mod embedding;
pub mod error;
pub mod events;
pub mod git;
pub mod indexer;
pub mod migrate;
pub mod orchestrator;
pub mod projects;
pub mod status;
pub mod sync;
pub mod vector_sqlite;
pub mod workspace;
