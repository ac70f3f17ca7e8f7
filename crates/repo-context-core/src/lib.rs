//! # repo-context core
//!
//! Shared, runtime-agnostic logic for the repository context pipeline:
//! project and chunk models, the blank-line chunker, the collaborator
//! traits the pipeline is written against (project sessions, vector
//! stores, embedding providers), and in-memory implementations of them.
//!
//! This crate contains no tokio, sqlx, process spawning, or filesystem
//! I/O. The application crate supplies the SQLite, Git, and HTTP-backed
//! implementations.

pub mod chunk;
pub mod embedding;
pub mod models;
pub mod store;
