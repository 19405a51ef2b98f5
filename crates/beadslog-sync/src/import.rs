//! JSONL -> store import with collision detection.
//!
//! Inputs partition into three sets:
//! - `NewIssues` -- no record with that ID in the store; inserted.
//! - `ExactMatches` -- byte-equal to the stored record's canonical form;
//!   no-op.
//! - `Collisions` -- same ID, different content; merged field-by-field
//!   with the stored record as the left side.
//!
//! Re-importing the same JSONL performs zero writes.

use std::io::ErrorKind;
use std::path::Path;
use std::time::Duration;

use chrono::Utc;
use tracing::{debug, info};

use beadslog_core::issue::Issue;
use beadslog_core::jsonl::parse_jsonl;
use beadslog_core::merge::merge_issues;
use beadslog_storage::SqliteStore;
use beadslog_storage::sqlite::schema::metadata_keys;

use crate::error::{Result, SyncError};

/// How many times a read retries when the exporter is mid-rename.
const READ_RETRIES: u32 = 3;

/// Result of an import.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ImportResult {
    /// IDs inserted as new issues.
    pub created: Vec<String>,
    /// IDs skipped because the incoming record was content-identical.
    pub unchanged: Vec<String>,
    /// IDs merged because the incoming record diverged.
    pub merged: Vec<String>,
}

impl ImportResult {
    /// Number of records that caused a write.
    pub fn writes(&self) -> usize {
        self.created.len() + self.merged.len()
    }
}

/// Imports a JSONL file into the store.
///
/// Readers must tolerate the exporter's mid-rename window, so `ENOENT`
/// retries briefly before giving up.
pub fn import_from_jsonl(store: &SqliteStore, jsonl_path: &Path) -> Result<ImportResult> {
    let content = read_with_retry(jsonl_path)?;
    let issues = parse_jsonl(&content)?;
    import_issues(store, issues)
}

fn read_with_retry(path: &Path) -> Result<String> {
    let mut attempt = 0;
    loop {
        match std::fs::read_to_string(path) {
            Ok(content) => return Ok(content),
            Err(e) if e.kind() == ErrorKind::NotFound && attempt < READ_RETRIES => {
                attempt += 1;
                std::thread::sleep(Duration::from_millis(20));
            }
            Err(e) => return Err(SyncError::io(path, e)),
        }
    }
}

/// Imports parsed issues into the store.
pub fn import_issues(store: &SqliteStore, incoming: Vec<Issue>) -> Result<ImportResult> {
    let mut result = ImportResult::default();
    let mut to_write: Vec<Issue> = Vec::new();

    for mut draft in incoming {
        if draft.id.is_empty() {
            return Err(SyncError::Invalid(
                "imported record is missing an ID".into(),
            ));
        }
        draft.set_defaults();

        match store.get_issue_impl(&draft.id) {
            Err(e) if e.is_not_found() => {
                result.created.push(draft.id.clone());
                to_write.push(draft);
            }
            Err(e) => return Err(e.into()),
            Ok(mut stored) => {
                // Attach all relational data so the comparison and the
                // merge see the full canonical record. Comments matter
                // here: a fork that only appended a comment still has to
                // classify as a collision, or the comment is dropped.
                stored.dependencies = store.get_dependency_records_impl(&stored.id)?;
                stored.labels = store.get_labels_impl(&stored.id)?;
                stored.comments = store.get_comments_impl(&stored.id)?;

                if records_byte_equal(&stored, &draft)? {
                    result.unchanged.push(draft.id.clone());
                    continue;
                }

                let merged = merge_issues(&stored, &draft);
                result.merged.push(merged.id.clone());
                to_write.push(merged);
            }
        }
    }

    if !to_write.is_empty() {
        store.upsert_issues_impl(&to_write)?;
        debug!(writes = to_write.len(), "import applied");
    }

    store.set_metadata_impl(metadata_keys::LAST_IMPORT_TIME, &Utc::now().to_rfc3339())?;

    info!(
        created = result.created.len(),
        unchanged = result.unchanged.len(),
        merged = result.merged.len(),
        "import complete"
    );
    Ok(result)
}

/// Byte-equality of two records in their canonical serialized form.
///
/// Comment rowids are store-local (each fork assigns its own), so they are
/// normalized out before serializing; everything else, comment text and
/// timestamps included, participates in the comparison.
fn records_byte_equal(stored: &Issue, draft: &Issue) -> Result<bool> {
    let normalize = |issue: &Issue| -> Result<Vec<u8>> {
        let mut canonical = issue.clone();
        for comment in &mut canonical.comments {
            comment.id = 0;
            comment.issue_id = String::new();
        }
        serde_json::to_vec(&canonical)
            .map_err(|e| SyncError::Invalid(format!("record serialization failed: {e}")))
    };
    Ok(normalize(stored)? == normalize(draft)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::export::export_to_jsonl;
    use beadslog_core::dependency::Dependency;
    use beadslog_core::enums::{DependencyType, Status};
    use beadslog_core::issue::IssueBuilder;
    use beadslog_storage::DB_FILE_NAME;
    use chrono::DateTime;

    fn at(s: &str) -> chrono::DateTime<Utc> {
        DateTime::parse_from_rfc3339(s).unwrap().with_timezone(&Utc)
    }

    #[test]
    fn import_inserts_new_issues() {
        let store = SqliteStore::open_in_memory().unwrap();
        let incoming = vec![
            IssueBuilder::new("One").id("bd-one11").build(),
            IssueBuilder::new("Two").id("bd-two22").build(),
        ];

        let result = import_issues(&store, incoming).unwrap();
        assert_eq!(result.created.len(), 2);
        assert_eq!(result.writes(), 2);
        assert_eq!(store.get_issue_impl("bd-one11").unwrap().title, "One");
    }

    #[test]
    fn import_is_idempotent() {
        let store = SqliteStore::open_in_memory().unwrap();
        let issue = IssueBuilder::new("Stable")
            .id("bd-st1")
            .created_at(at("2024-01-01T00:00:00Z"))
            .updated_at(at("2024-01-01T00:00:00Z"))
            .build();

        let first = import_issues(&store, vec![issue.clone()]).unwrap();
        assert_eq!(first.writes(), 1);

        let second = import_issues(&store, vec![issue]).unwrap();
        assert_eq!(second.writes(), 0, "re-import must perform zero writes");
        assert_eq!(second.unchanged, vec!["bd-st1"]);
    }

    #[test]
    fn import_merges_collisions() {
        let store = SqliteStore::open_in_memory().unwrap();
        let stored = IssueBuilder::new("Local title")
            .id("bd-col1")
            .created_at(at("2024-01-01T00:00:00Z"))
            .updated_at(at("2024-01-01T00:00:00Z"))
            .build();
        store.create_issue_impl(&stored, "alice").unwrap();

        let incoming = IssueBuilder::new("Remote title")
            .id("bd-col1")
            .created_at(at("2024-01-01T00:00:00Z"))
            .updated_at(at("2024-02-01T00:00:00Z"))
            .build();

        let result = import_issues(&store, vec![incoming]).unwrap();
        assert_eq!(result.merged, vec!["bd-col1"]);

        let after = store.get_issue_impl("bd-col1").unwrap();
        assert_eq!(after.title, "Remote title"); // later updated_at wins
        assert_eq!(after.updated_at, at("2024-02-01T00:00:00Z"));
    }

    #[test]
    fn import_keeps_comment_only_divergence() {
        // A comment append changes neither the content hash nor
        // updated_at, so the exact-match test has to be byte-level or the
        // comment never reaches the store.
        let store = SqliteStore::open_in_memory().unwrap();
        let stored = IssueBuilder::new("Quiet issue")
            .id("bd-cmt1")
            .created_at(at("2024-01-01T00:00:00Z"))
            .updated_at(at("2024-01-01T00:00:00Z"))
            .build();
        store.create_issue_impl(&stored, "alice").unwrap();

        // The other fork holds the same record plus one comment.
        let mut incoming = stored.clone();
        incoming.comments.push(beadslog_core::comment::Comment {
            id: 3, // remote rowid, meaningless here
            issue_id: "bd-cmt1".into(),
            author: "bob".into(),
            text: "ship it".into(),
            created_at: at("2024-01-01T06:00:00Z"),
        });

        let result = import_issues(&store, vec![incoming.clone()]).unwrap();
        assert_eq!(result.merged, vec!["bd-cmt1"]);

        let comments = store.get_comments_impl("bd-cmt1").unwrap();
        assert_eq!(comments.len(), 1);
        assert_eq!(comments[0].text, "ship it");

        // With the comment landed, the same file is now an exact match.
        let again = import_issues(&store, vec![incoming]).unwrap();
        assert_eq!(again.writes(), 0);
        assert_eq!(again.unchanged, vec!["bd-cmt1"]);
    }

    #[test]
    fn import_observes_remote_tombstone() {
        let store = SqliteStore::open_in_memory().unwrap();
        let stored = IssueBuilder::new("Alive")
            .id("bd-ts1")
            .updated_at(at("2024-01-01T00:00:00Z"))
            .build();
        store.create_issue_impl(&stored, "alice").unwrap();

        let mut incoming = IssueBuilder::new("Alive")
            .id("bd-ts1")
            .updated_at(at("2024-01-02T00:00:00Z"))
            .build();
        incoming.status = Status::Tombstone;
        incoming.deleted_at = Some(at("2024-01-02T00:00:00Z"));
        incoming.delete_reason = "deleted on fork".into();

        import_issues(&store, vec![incoming]).unwrap();

        let after = store.get_issue_impl("bd-ts1").unwrap();
        assert!(after.is_tombstone());
        assert_eq!(after.delete_reason, "deleted on fork");
    }

    #[test]
    fn export_import_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let store = SqliteStore::open(dir.path().join(DB_FILE_NAME)).unwrap();

        let issue = IssueBuilder::new("Round trip")
            .id("bd-rt1")
            .description("body")
            .build();
        store.create_issue_impl(&issue, "alice").unwrap();
        let other = IssueBuilder::new("Other").id("bd-rt2").build();
        store.create_issue_impl(&other, "alice").unwrap();
        store
            .add_dependency_impl(
                &Dependency::new("bd-rt1", "bd-rt2", DependencyType::Blocks),
                "alice",
            )
            .unwrap();

        let jsonl = dir.path().join("issues.jsonl");
        let exported = export_to_jsonl(&store, &jsonl).unwrap();

        // Import into a fresh store; the export of that store is identical.
        let dir2 = tempfile::tempdir().unwrap();
        let store2 = SqliteStore::open(dir2.path().join(DB_FILE_NAME)).unwrap();
        import_from_jsonl(&store2, &jsonl).unwrap();

        let jsonl2 = dir2.path().join("issues.jsonl");
        let reexported = export_to_jsonl(&store2, &jsonl2).unwrap();
        assert_eq!(exported.content_hash, reexported.content_hash);

        // And a second import of the same file writes nothing.
        let result = import_from_jsonl(&store2, &jsonl).unwrap();
        assert_eq!(result.writes(), 0);
    }

    #[test]
    fn import_records_last_import_time() {
        let store = SqliteStore::open_in_memory().unwrap();
        import_issues(&store, vec![IssueBuilder::new("A").id("bd-t1").build()]).unwrap();
        let recorded = store
            .get_metadata_impl(metadata_keys::LAST_IMPORT_TIME)
            .unwrap();
        assert!(recorded.contains('T'));
    }

    #[test]
    fn import_missing_id_rejected() {
        let store = SqliteStore::open_in_memory().unwrap();
        let err = import_issues(&store, vec![IssueBuilder::new("No id").build()]).unwrap_err();
        assert!(matches!(err, SyncError::Invalid(_)));
    }
}
