//! [`SqliteStore`] -- SQLite-backed storage implementation.

use std::path::{Path, PathBuf};
use std::sync::Mutex;

use rusqlite::Connection;
use tracing::{debug, info};

use crate::error::{Result, StorageError};
use crate::sqlite::schema;

/// Conventional store file name inside `.beads/`.
pub const DB_FILE_NAME: &str = "beads.db";

/// Connection setup applied before any query.
///
/// WAL keeps readers off the writer's back, which is what lets many
/// short-lived `bd` processes share the file with a daemon. The busy
/// timeout covers the window where another process holds the write lock
/// mid-export.
const CONNECTION_PRAGMAS: &str = "
    PRAGMA journal_mode = WAL;
    PRAGMA synchronous = NORMAL;
    PRAGMA foreign_keys = ON;
    PRAGMA busy_timeout = 5000;
";

/// SQLite-backed store.
///
/// Wraps a [`rusqlite::Connection`] in a `Mutex`: concurrent readers are
/// served through WAL snapshots, and the mutex gives the single-writer
/// discipline the daemon relies on.
pub struct SqliteStore {
    /// The mutex-protected SQLite connection.
    pub(crate) conn: Mutex<Connection>,

    /// On-disk path, empty for in-memory stores. The sync engine touches
    /// this file after export to keep the freshness gate honest.
    path: PathBuf,
}

impl SqliteStore {
    /// Opens (or creates) a SQLite database at the given path.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        info!(?path, "opening SQLite database");

        let conn = Connection::open(path).map_err(|e| {
            StorageError::Connection(format!("failed to open {}: {e}", path.display()))
        })?;
        Self::bootstrap(conn, path.to_path_buf())
    }

    /// Opens an in-memory SQLite database (useful for tests).
    pub fn open_in_memory() -> Result<Self> {
        debug!("opening in-memory SQLite database");
        let conn = Connection::open_in_memory()
            .map_err(|e| StorageError::Connection(format!("failed to open in-memory db: {e}")))?;
        Self::bootstrap(conn, PathBuf::new())
    }

    /// Shared constructor tail: pragmas, then schema.
    fn bootstrap(conn: Connection, path: PathBuf) -> Result<Self> {
        conn.execute_batch(CONNECTION_PRAGMAS)
            .map_err(|e| StorageError::Connection(format!("failed to set pragmas: {e}")))?;
        ensure_schema(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
            path,
        })
    }

    /// Returns the on-disk database path, or `None` for in-memory stores.
    pub fn path(&self) -> Option<&Path> {
        if self.path.as_os_str().is_empty() {
            None
        } else {
            Some(&self.path)
        }
    }

    /// Acquires the connection lock. Every operation module goes through
    /// here, so a poisoned mutex surfaces as a connection error instead of
    /// a panic cascade.
    pub(crate) fn lock_conn(&self) -> Result<std::sync::MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|e| StorageError::Connection(format!("mutex poisoned: {e}")))
    }
}

impl std::fmt::Debug for SqliteStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SqliteStore")
            .field("path", &self.path)
            .finish_non_exhaustive()
    }
}

// ---------------------------------------------------------------------------
// Schema bootstrap
// ---------------------------------------------------------------------------

/// Reads the stamped schema version, `None` before first init (or before
/// the config table exists at all).
fn stored_schema_version(conn: &Connection) -> Option<i32> {
    conn.query_row(
        "SELECT value FROM config WHERE key = 'schema_version'",
        [],
        |row| row.get::<_, String>(0),
    )
    .ok()
    .and_then(|v| v.parse().ok())
}

/// Brings the database up to [`schema::CURRENT_SCHEMA_VERSION`].
///
/// The DDL is written as `IF NOT EXISTS` throughout, so re-running it is
/// harmless; the version stamp is only a fast path that skips the
/// statement loop on every subsequent open.
fn ensure_schema(conn: &Connection) -> Result<()> {
    if let Some(version) = stored_schema_version(conn) {
        if version >= schema::CURRENT_SCHEMA_VERSION {
            debug!(version, "schema current, skipping bootstrap");
            return Ok(());
        }
    }

    for (index, statement) in schema::SCHEMA_STATEMENTS.iter().enumerate() {
        conn.execute_batch(statement)
            .map_err(|e| StorageError::Migration {
                name: format!("ddl[{index}]"),
                reason: e.to_string(),
            })?;
    }

    apply_migrations(conn)?;

    conn.execute(
        "INSERT OR REPLACE INTO config (key, value) VALUES ('schema_version', ?1)",
        rusqlite::params![schema::CURRENT_SCHEMA_VERSION.to_string()],
    )
    .map_err(|e| StorageError::Migration {
        name: "schema_version".into(),
        reason: e.to_string(),
    })?;

    info!(version = schema::CURRENT_SCHEMA_VERSION, "schema initialized");
    Ok(())
}

/// Returns `true` if the named migration has already run.
fn migration_applied(conn: &Connection, name: &str) -> bool {
    conn.query_row(
        "SELECT 1 FROM metadata WHERE key = ?1",
        rusqlite::params![format!("migration:{name}")],
        |_| Ok(()),
    )
    .is_ok()
}

/// Applies pending migrations, recording each in the `metadata` table so
/// it runs at most once per database.
fn apply_migrations(conn: &Connection) -> Result<()> {
    for &(name, sql) in schema::MIGRATIONS {
        if migration_applied(conn, name) {
            debug!(name, "migration already applied");
            continue;
        }

        debug!(name, "applying migration");
        conn.execute_batch(sql)
            .map_err(|e| StorageError::Migration {
                name: name.to_string(),
                reason: e.to_string(),
            })?;
        conn.execute(
            "INSERT INTO metadata (key, value) VALUES (?1, 'applied')",
            rusqlite::params![format!("migration:{name}")],
        )
        .map_err(|e| StorageError::Migration {
            name: name.to_string(),
            reason: format!("failed to record migration: {e}"),
        })?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn open_creates_all_tables() {
        let store = SqliteStore::open_in_memory().unwrap();
        let conn = store.lock_conn().unwrap();

        let mut stmt = conn
            .prepare("SELECT name FROM sqlite_master WHERE type = 'table' ORDER BY name")
            .unwrap();
        let tables: Vec<String> = stmt
            .query_map([], |row| row.get(0))
            .unwrap()
            .collect::<rusqlite::Result<_>>()
            .unwrap();

        for expected in [
            "comments",
            "config",
            "counters",
            "dependencies",
            "events",
            "issues",
            "labels",
            "metadata",
        ] {
            assert!(tables.iter().any(|t| t == expected), "missing table {expected}");
        }
    }

    #[test]
    fn schema_version_is_stamped() {
        let store = SqliteStore::open_in_memory().unwrap();
        let conn = store.lock_conn().unwrap();
        assert_eq!(
            stored_schema_version(&conn),
            Some(schema::CURRENT_SCHEMA_VERSION)
        );
    }

    #[test]
    fn reopen_preserves_data_and_skips_bootstrap() {
        let dir = tempfile::tempdir().unwrap();
        let db_path = dir.path().join(DB_FILE_NAME);

        {
            let store = SqliteStore::open(&db_path).unwrap();
            let conn = store.lock_conn().unwrap();
            conn.execute(
                "INSERT INTO config (key, value) VALUES ('issue_prefix', 'bd')",
                [],
            )
            .unwrap();
        }

        let reopened = SqliteStore::open(&db_path).unwrap();
        let conn = reopened.lock_conn().unwrap();
        let prefix: String = conn
            .query_row(
                "SELECT value FROM config WHERE key = 'issue_prefix'",
                [],
                |row| row.get(0),
            )
            .unwrap();
        assert_eq!(prefix, "bd");
    }

    #[test]
    fn on_disk_store_reports_path() {
        let dir = tempfile::tempdir().unwrap();
        let db_path = dir.path().join(DB_FILE_NAME);
        let store = SqliteStore::open(&db_path).unwrap();
        assert_eq!(store.path(), Some(db_path.as_path()));

        let mem = SqliteStore::open_in_memory().unwrap();
        assert_eq!(mem.path(), None);
    }
}
