//! Blank-line text chunker for repository files.
//!
//! Splits a file's text into [`ChunkRecord`]s on blank-line boundaries
//! (`\n\n`). The heuristic is deliberately simple; any smarter splitter
//! must keep the length limits and the id/metadata shape produced here,
//! because collections are compared across runs by chunk id.
//!
//! # Algorithm
//!
//! 1. Split the text on `\n\n` and drop pieces that are only whitespace.
//! 2. If nothing survives but the text has non-whitespace content, the
//!    whole text is one piece.
//! 3. Number the surviving pieces `0..N` *before* length filtering, so a
//!    discarded piece leaves a gap in the indices.
//! 4. Trim each piece; discard it when shorter than `min_chars`.
//! 5. Truncate the rest to `max_chars` characters.
//!
//! # Example
//!
//! ```rust
//! use repo_context_core::chunk::{chunk_file, ChunkLimits};
//!
//! let text = "fn main() { println!(\"hello\"); }\n\nshort";
//! let chunks = chunk_file("src/main.rs", "p1", text, &ChunkLimits::default());
//! assert_eq!(chunks.len(), 1);
//! assert_eq!(chunks[0].id, "src/main.rs::0");
//! ```

use sha2::{Digest, Sha256};

use crate::models::{ChunkMetadata, ChunkRecord};

/// Pieces shorter than this (after trimming) are noise.
pub const MIN_CHUNK_CHARS: usize = 20;

/// Upper bound on a chunk's length, kept below embedding model input limits.
pub const MAX_CHUNK_CHARS: usize = 4000;

/// Files larger than this are never opened for chunking.
pub const MAX_FILE_BYTES: u64 = 5 * 1024 * 1024;

pub const CHUNK_DELIMITER: &str = "\n\n";

const COLLECTION_PREFIX: &str = "project_context_";

/// Character limits applied to every chunk.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChunkLimits {
    pub min_chars: usize,
    pub max_chars: usize,
}

impl Default for ChunkLimits {
    fn default() -> Self {
        Self {
            min_chars: MIN_CHUNK_CHARS,
            max_chars: MAX_CHUNK_CHARS,
        }
    }
}

/// Split text into non-blank paragraphs.
pub fn split_paragraphs(text: &str) -> Vec<&str> {
    let pieces: Vec<&str> = text
        .split(CHUNK_DELIMITER)
        .filter(|piece| !piece.trim().is_empty())
        .collect();

    if pieces.is_empty() && !text.trim().is_empty() {
        return vec![text];
    }
    pieces
}

/// Chunk one file's text into records for `project_id`.
///
/// `relative_path` is used verbatim in the chunk id and `source` metadata.
pub fn chunk_file(
    relative_path: &str,
    project_id: &str,
    text: &str,
    limits: &ChunkLimits,
) -> Vec<ChunkRecord> {
    split_paragraphs(text)
        .into_iter()
        .enumerate()
        .filter_map(|(index, piece)| {
            let trimmed = piece.trim();
            if trimmed.chars().count() < limits.min_chars {
                return None;
            }
            Some(ChunkRecord {
                id: chunk_id(relative_path, index),
                document: truncate_chars(trimmed, limits.max_chars).to_string(),
                metadata: ChunkMetadata {
                    source: relative_path.to_string(),
                    chunk_index: index,
                    project_id: project_id.to_string(),
                },
            })
        })
        .collect()
}

pub fn chunk_id(relative_path: &str, index: usize) -> String {
    format!("{}::{}", relative_path, index)
}

/// Name of the vector collection that holds a project's chunks.
pub fn collection_name(project_id: &str) -> String {
    format!("{}{}", COLLECTION_PREFIX, project_id.replace('-', "_"))
}

/// SHA-256 of a chunk's text, hex encoded.
pub fn content_hash(text: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(text.as_bytes());
    format!("{:x}", hasher.finalize())
}

fn truncate_chars(text: &str, max_chars: usize) -> &str {
    match text.char_indices().nth(max_chars) {
        Some((byte_idx, _)) => &text[..byte_idx],
        None => text,
    }
}
