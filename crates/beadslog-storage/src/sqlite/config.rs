//! Config and metadata key-value operations for [`SqliteStore`].
//!
//! Two keyspaces with identical shape but different owners: `config`
//! holds user-facing settings (issue prefix, sync branch) that export
//! alongside the issues, while `metadata` holds sync-engine bookkeeping
//! (content hashes, import times, the per-repo mtime cache) that never
//! leaves the local store. One implementation serves both.

use std::collections::HashMap;

use rusqlite::{Connection, OptionalExtension, params};

use crate::error::{Result, StorageError};
use crate::sqlite::store::SqliteStore;

/// Which key-value table an operation targets.
#[derive(Debug, Clone, Copy)]
enum Keyspace {
    Config,
    Metadata,
}

impl Keyspace {
    /// Table name, compiled into the SQL (table names cannot be bound).
    fn table(self) -> &'static str {
        match self {
            Self::Config => "config",
            Self::Metadata => "metadata",
        }
    }
}

fn kv_put(conn: &Connection, space: Keyspace, key: &str, value: &str) -> Result<()> {
    let sql = format!(
        "INSERT OR REPLACE INTO {} (key, value) VALUES (?1, ?2)",
        space.table()
    );
    conn.execute(&sql, params![key, value])?;
    Ok(())
}

fn kv_get(conn: &Connection, space: Keyspace, key: &str) -> Result<String> {
    let sql = format!("SELECT value FROM {} WHERE key = ?1", space.table());
    conn.query_row(&sql, params![key], |row| row.get(0))
        .optional()?
        .ok_or_else(|| StorageError::not_found(space.table(), key))
}

fn kv_delete(conn: &Connection, space: Keyspace, key: &str) -> Result<()> {
    let sql = format!("DELETE FROM {} WHERE key = ?1", space.table());
    conn.execute(&sql, params![key])?;
    Ok(())
}

// ---------------------------------------------------------------------------
// Connection-level helpers (shared with the transaction wrapper)
// ---------------------------------------------------------------------------

pub(crate) fn set_config_on_conn(conn: &Connection, key: &str, value: &str) -> Result<()> {
    kv_put(conn, Keyspace::Config, key, value)
}

pub(crate) fn get_config_on_conn(conn: &Connection, key: &str) -> Result<String> {
    kv_get(conn, Keyspace::Config, key)
}

pub(crate) fn set_metadata_on_conn(conn: &Connection, key: &str, value: &str) -> Result<()> {
    kv_put(conn, Keyspace::Metadata, key, value)
}

pub(crate) fn get_metadata_on_conn(conn: &Connection, key: &str) -> Result<String> {
    kv_get(conn, Keyspace::Metadata, key)
}

// ---------------------------------------------------------------------------
// SqliteStore methods
// ---------------------------------------------------------------------------

impl SqliteStore {
    /// Sets a configuration key-value pair.
    pub fn set_config_impl(&self, key: &str, value: &str) -> Result<()> {
        kv_put(&*self.lock_conn()?, Keyspace::Config, key, value)
    }

    /// Gets a configuration value by key.
    pub fn get_config_impl(&self, key: &str) -> Result<String> {
        kv_get(&*self.lock_conn()?, Keyspace::Config, key)
    }

    /// Returns every configuration key-value pair.
    pub fn get_all_config_impl(&self) -> Result<HashMap<String, String>> {
        let conn = self.lock_conn()?;
        let mut stmt = conn.prepare("SELECT key, value FROM config")?;
        let rows = stmt.query_map([], |row| {
            Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?))
        })?;
        rows.map(|row| row.map_err(StorageError::from)).collect()
    }

    /// Sets a metadata key-value pair.
    pub fn set_metadata_impl(&self, key: &str, value: &str) -> Result<()> {
        kv_put(&*self.lock_conn()?, Keyspace::Metadata, key, value)
    }

    /// Gets a metadata value by key.
    pub fn get_metadata_impl(&self, key: &str) -> Result<String> {
        kv_get(&*self.lock_conn()?, Keyspace::Metadata, key)
    }

    /// Deletes a metadata key. Missing keys are a no-op: the full-flush
    /// path clears hashes without caring whether they were ever written.
    pub fn clear_metadata_impl(&self, key: &str) -> Result<()> {
        kv_delete(&*self.lock_conn()?, Keyspace::Metadata, key)
    }

    /// Reads the per-repo mtime cache (JSON object keyed by path).
    pub fn get_repo_mtimes_impl(&self) -> Result<HashMap<String, i64>> {
        match self.get_metadata_impl(crate::sqlite::schema::metadata_keys::REPO_MTIMES) {
            Ok(raw) => Ok(serde_json::from_str(&raw).unwrap_or_default()),
            Err(e) if e.is_not_found() => Ok(HashMap::new()),
            Err(e) => Err(e),
        }
    }

    /// Writes the per-repo mtime cache.
    pub fn set_repo_mtimes_impl(&self, mtimes: &HashMap<String, i64>) -> Result<()> {
        let raw = serde_json::to_string(mtimes)?;
        self.set_metadata_impl(crate::sqlite::schema::metadata_keys::REPO_MTIMES, &raw)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_store() -> SqliteStore {
        SqliteStore::open_in_memory().unwrap()
    }

    #[test]
    fn config_roundtrip_and_overwrite() {
        let store = test_store();
        store.set_config_impl("issue_prefix", "bd").unwrap();
        assert_eq!(store.get_config_impl("issue_prefix").unwrap(), "bd");

        store.set_config_impl("issue_prefix", "proj").unwrap();
        assert_eq!(store.get_config_impl("issue_prefix").unwrap(), "proj");
    }

    #[test]
    fn missing_config_is_not_found() {
        let store = test_store();
        let err = store.get_config_impl("nope").unwrap_err();
        assert!(err.is_not_found());
    }

    #[test]
    fn keyspaces_are_independent() {
        // The same key may live in both tables without interference.
        let store = test_store();
        store.set_config_impl("shared_key", "from-config").unwrap();
        store.set_metadata_impl("shared_key", "from-metadata").unwrap();

        assert_eq!(store.get_config_impl("shared_key").unwrap(), "from-config");
        assert_eq!(
            store.get_metadata_impl("shared_key").unwrap(),
            "from-metadata"
        );

        store.clear_metadata_impl("shared_key").unwrap();
        assert!(store.get_metadata_impl("shared_key").unwrap_err().is_not_found());
        assert_eq!(store.get_config_impl("shared_key").unwrap(), "from-config");
    }

    #[test]
    fn clear_metadata_tolerates_missing_key() {
        let store = test_store();
        store.clear_metadata_impl("never_written").unwrap();
    }

    #[test]
    fn all_config_includes_schema_version() {
        let store = test_store();
        store.set_config_impl("issue_prefix", "bd").unwrap();

        let all = store.get_all_config_impl().unwrap();
        assert_eq!(all.get("issue_prefix").map(String::as_str), Some("bd"));
        // The bootstrap stamp lives in the same table.
        assert!(all.contains_key("schema_version"));
    }

    #[test]
    fn repo_mtimes_cache_roundtrip() {
        let store = test_store();
        assert!(store.get_repo_mtimes_impl().unwrap().is_empty());

        let mut mtimes = HashMap::new();
        mtimes.insert("/repo/a".to_string(), 1_700_000_000_000_i64);
        mtimes.insert("/repo/b".to_string(), 1_700_000_000_500_i64);
        store.set_repo_mtimes_impl(&mtimes).unwrap();

        let back = store.get_repo_mtimes_impl().unwrap();
        assert_eq!(back, mtimes);
    }

    #[test]
    fn corrupt_mtime_cache_degrades_to_empty() {
        let store = test_store();
        store
            .set_metadata_impl(
                crate::sqlite::schema::metadata_keys::REPO_MTIMES,
                "not json",
            )
            .unwrap();
        assert!(store.get_repo_mtimes_impl().unwrap().is_empty());
    }
}
