//! Sync engine error types.

use std::path::PathBuf;

/// Errors from the sync engine, resolver, router, and repair machinery.
#[derive(Debug, thiserror::Error)]
pub enum SyncError {
    #[error(transparent)]
    Storage(#[from] beadslog_storage::StorageError),

    #[error(transparent)]
    Jsonl(#[from] beadslog_core::jsonl::JsonlError),

    #[error("I/O error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The JSONL diverged from the store and cannot be reconciled.
    #[error("stale state: {0}")]
    Staleness(String),

    /// Conflict markers were malformed.
    #[error("conflict parse error at line {line}: {message}")]
    ConflictParse { line: usize, message: String },

    /// A cross-rig route lookup failed.
    #[error("no route for {0}")]
    NoRoute(String),

    /// Malformed input to a sync operation.
    #[error("invalid input: {0}")]
    Invalid(String),
}

/// Result alias for sync operations.
pub type Result<T> = std::result::Result<T, SyncError>;

impl SyncError {
    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }
}
