//! Freshness gate: decide whether the JSONL has news the store lacks.
//!
//! Before serving a read in direct mode, compare mtime(JSONL) to
//! mtime(DB). A newer JSONL means an external process (git merge,
//! sync-branch pull) wrote it out of band, so an import runs first. A
//! cached fingerprint per repo path short-circuits the import when the
//! file has not actually changed since the last look.

use std::fs;
use std::path::Path;
use std::time::UNIX_EPOCH;

use tracing::debug;

use beadslog_storage::SqliteStore;

use crate::error::Result;
use crate::import::{ImportResult, import_from_jsonl};

/// Returns the file's mtime as unix milliseconds, or `None` if absent.
fn mtime_millis(path: &Path) -> Option<i64> {
    let mtime = fs::metadata(path).ok()?.modified().ok()?;
    Some(mtime.duration_since(UNIX_EPOCH).ok()?.as_millis() as i64)
}

/// Returns `true` if the JSONL is newer than the store file.
///
/// A missing JSONL is never stale; a missing or in-memory DB is always
/// stale relative to an existing JSONL.
pub fn is_stale(db_path: Option<&Path>, jsonl_path: &Path) -> bool {
    let Some(jsonl_mtime) = mtime_millis(jsonl_path) else {
        return false;
    };
    match db_path.and_then(mtime_millis) {
        Some(db_mtime) => jsonl_mtime > db_mtime,
        None => true,
    }
}

/// Runs an import if the JSONL supersedes the store.
///
/// Returns the import result when one ran, `None` when the store was
/// already fresh. The per-repo mtime cache suppresses repeat imports of a
/// file that has not changed.
pub fn ensure_fresh(store: &SqliteStore, jsonl_path: &Path) -> Result<Option<ImportResult>> {
    if !is_stale(store.path(), jsonl_path) {
        return Ok(None);
    }

    let key = jsonl_path.to_string_lossy().into_owned();
    let current_mtime = mtime_millis(jsonl_path).unwrap_or(0);

    let mut cache = store.get_repo_mtimes_impl()?;
    if cache.get(&key) == Some(&current_mtime) {
        debug!(path = %jsonl_path.display(), "mtime cache hit, skipping import");
        return Ok(None);
    }

    let result = import_from_jsonl(store, jsonl_path)?;

    cache.insert(key, current_mtime);
    store.set_repo_mtimes_impl(&cache)?;

    Ok(Some(result))
}

/// Runs the freshness gate over the primary JSONL plus any additional
/// repo JSONLs (multi-repo fan-in).
pub fn ensure_fresh_multi(
    store: &SqliteStore,
    jsonl_paths: &[&Path],
) -> Result<Vec<ImportResult>> {
    let mut results = Vec::new();
    for path in jsonl_paths {
        if let Some(result) = ensure_fresh(store, path)? {
            results.push(result);
        }
    }
    Ok(results)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::export::export_to_jsonl;
    use beadslog_core::issue::IssueBuilder;
    use beadslog_storage::DB_FILE_NAME;
    use std::time::Duration;

    #[test]
    fn missing_jsonl_is_not_stale() {
        let dir = tempfile::tempdir().unwrap();
        let db = dir.path().join(DB_FILE_NAME);
        std::fs::write(&db, "x").unwrap();
        assert!(!is_stale(Some(&db), &dir.path().join("issues.jsonl")));
    }

    #[test]
    fn newer_jsonl_is_stale() {
        let dir = tempfile::tempdir().unwrap();
        let db = dir.path().join(DB_FILE_NAME);
        let jsonl = dir.path().join("issues.jsonl");
        std::fs::write(&db, "x").unwrap();
        std::thread::sleep(Duration::from_millis(20));
        std::fs::write(&jsonl, "{}").unwrap();
        assert!(is_stale(Some(&db), &jsonl));
    }

    #[test]
    fn export_leaves_store_fresh() {
        let dir = tempfile::tempdir().unwrap();
        let store = SqliteStore::open(dir.path().join(DB_FILE_NAME)).unwrap();
        let issue = IssueBuilder::new("A").id("bd-f1").build();
        store.create_issue_impl(&issue, "alice").unwrap();

        let jsonl = dir.path().join("issues.jsonl");
        export_to_jsonl(&store, &jsonl).unwrap();

        assert!(!is_stale(store.path(), &jsonl));
        assert!(ensure_fresh(&store, &jsonl).unwrap().is_none());
    }

    #[test]
    fn stale_jsonl_triggers_import_once() {
        let dir = tempfile::tempdir().unwrap();
        let store = SqliteStore::open(dir.path().join(DB_FILE_NAME)).unwrap();

        // Foreign JSONL written after the DB.
        std::thread::sleep(Duration::from_millis(20));
        let jsonl = dir.path().join("issues.jsonl");
        std::fs::write(
            &jsonl,
            "{\"id\":\"bd-new11\",\"title\":\"From remote\"}\n",
        )
        .unwrap();

        let first = ensure_fresh(&store, &jsonl).unwrap();
        assert!(first.is_some());
        assert_eq!(store.get_issue_impl("bd-new11").unwrap().title, "From remote");

        // Import does not touch the DB mtime, so the gate still sees the
        // JSONL as newer. The mtime cache suppresses the re-import.
        let second = ensure_fresh(&store, &jsonl).unwrap();
        assert!(second.is_none());
    }
}
