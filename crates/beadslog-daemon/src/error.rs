//! Daemon and client error types.

use std::path::PathBuf;

/// Errors from the daemon, wire protocol, and auto-start client.
#[derive(Debug, thiserror::Error)]
pub enum DaemonError {
    /// The socket is unreachable or the daemon is unhealthy. Clients fall
    /// back to direct mode on this.
    #[error("daemon unavailable: {0}")]
    Unavailable(String),

    /// The daemon did not recognise the operation. Clients treat this as
    /// a downgrade signal to direct mode.
    #[error("unknown operation: {0}")]
    UnknownOperation(String),

    /// Running inside a git worktree without a configured sync branch.
    #[error(
        "refusing to run in a git worktree without sync.branch configured \
         (commits would land on an arbitrary branch)"
    )]
    WorktreeUnsafe,

    /// Another daemon already holds the workspace lock.
    #[error("daemon already running (pid {pid})")]
    AlreadyRunning { pid: u32 },

    /// The server rejected the request.
    #[error("{0}")]
    Remote(String),

    #[error(transparent)]
    Storage(#[from] beadslog_storage::StorageError),

    #[error(transparent)]
    Sync(#[from] beadslog_sync::SyncError),

    #[error(transparent)]
    Lock(#[from] beadslog_lockfile::LockError),

    #[error("I/O error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("wire protocol error: {0}")]
    Wire(String),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Result alias for daemon operations.
pub type Result<T> = std::result::Result<T, DaemonError>;

impl DaemonError {
    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    /// Returns `true` if the client should downgrade to direct mode.
    pub fn is_downgrade(&self) -> bool {
        matches!(self, Self::Unavailable(_) | Self::UnknownOperation(_))
    }
}
