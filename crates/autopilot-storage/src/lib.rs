//! autopilot-storage: JSON-file persistence for scheduled tasks and goals.
//!
//! Each store is a single JSON document (`{ "tasks": [...] }`,
//! `{ "goals": [...] }`) rewritten atomically on every mutation. Every
//! mutation is a read-modify-write under an in-process lock plus an
//! advisory file lock, so the CLI and a running daemon can share the files.

pub mod document;
pub mod records;

pub use document::JsonDocument;
pub use records::{Collection, GoalDocument, GoalStore, RecordStore, TaskDocument, TaskStore};

#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("IO error on {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("Duplicate record ID: {0}")]
    Duplicate(String),
}

pub type Result<T> = std::result::Result<T, StorageError>;
