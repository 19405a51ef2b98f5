//! Store -> JSONL export with atomic file replacement.
//!
//! Write protocol:
//! 1. serialize all issues (tombstones included) into `path.tmp-<pid>`
//! 2. fsync the temp file
//! 3. rename over the destination
//! 4. record the SHA-256 of the written bytes and the file mtime in store
//!    metadata
//! 5. bump the DB file mtime past the JSONL mtime so the freshness gate
//!    does not read the export back as foreign news

use std::fs::{self, File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::Duration;

use sha2::{Digest, Sha256};
use tracing::{debug, info};

use beadslog_core::jsonl::to_jsonl_bytes;
use beadslog_storage::SqliteStore;
use beadslog_storage::sqlite::schema::metadata_keys;

use crate::error::{Result, SyncError};

/// Result of a JSONL export.
#[derive(Debug, Clone)]
pub struct ExportResult {
    /// Number of issues written.
    pub exported: usize,
    /// SHA-256 hex of the written bytes.
    pub content_hash: String,
    /// Destination path.
    pub path: PathBuf,
}

/// Exports every issue (with embedded dependencies, labels, and comments)
/// to the given JSONL path.
pub fn export_to_jsonl(store: &SqliteStore, jsonl_path: &Path) -> Result<ExportResult> {
    let mut issues = store.get_all_issues_impl()?;
    issues.sort_by(|a, b| a.id.cmp(&b.id));

    // Attach relational data for the canonical record shape.
    let ids: Vec<String> = issues.iter().map(|i| i.id.clone()).collect();
    let mut labels = store.get_labels_for_issues_impl(&ids)?;
    for issue in &mut issues {
        issue.dependencies = store.get_dependency_records_impl(&issue.id)?;
        issue.labels = labels.remove(&issue.id).unwrap_or_default();
        issue.comments = store.get_comments_impl(&issue.id)?;
    }

    let bytes = to_jsonl_bytes(&issues)?;
    let content_hash = format!("{:x}", Sha256::digest(&bytes));

    write_atomic(jsonl_path, &bytes)?;
    debug!(path = %jsonl_path.display(), count = issues.len(), "exported JSONL");

    // Record export state in metadata.
    store.set_metadata_impl(metadata_keys::JSONL_CONTENT_HASH, &content_hash)?;
    let jsonl_mtime = fs::metadata(jsonl_path)
        .and_then(|m| m.modified())
        .map_err(|e| SyncError::io(jsonl_path, e))?;
    let mtime_millis = jsonl_mtime
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as i64;
    store.set_metadata_impl(metadata_keys::LAST_EXPORT_MTIME, &mtime_millis.to_string())?;

    // Keep mtime(DB) >= mtime(JSONL): otherwise the next read would treat
    // our own export as newer foreign state and trigger a useless import.
    if let Some(db_path) = store.path() {
        let bumped = jsonl_mtime + Duration::from_millis(1);
        let db_file = OpenOptions::new()
            .append(true)
            .open(db_path)
            .map_err(|e| SyncError::io(db_path, e))?;
        db_file
            .set_modified(bumped)
            .map_err(|e| SyncError::io(db_path, e))?;
    }

    info!(count = issues.len(), path = %jsonl_path.display(), "export complete");
    Ok(ExportResult {
        exported: issues.len(),
        content_hash,
        path: jsonl_path.to_path_buf(),
    })
}

/// Writes bytes to `path` via a same-directory temp file, fsync, and rename.
pub fn write_atomic(path: &Path, bytes: &[u8]) -> Result<()> {
    let tmp_path = temp_path_for(path);

    let mut tmp = File::create(&tmp_path).map_err(|e| SyncError::io(&tmp_path, e))?;
    tmp.write_all(bytes).map_err(|e| SyncError::io(&tmp_path, e))?;
    tmp.sync_all().map_err(|e| SyncError::io(&tmp_path, e))?;
    drop(tmp);

    fs::rename(&tmp_path, path).map_err(|e| {
        let _ = fs::remove_file(&tmp_path);
        SyncError::io(path, e)
    })?;
    Ok(())
}

fn temp_path_for(path: &Path) -> PathBuf {
    let file_name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "issues.jsonl".to_owned());
    path.with_file_name(format!("{file_name}.tmp-{}", std::process::id()))
}
