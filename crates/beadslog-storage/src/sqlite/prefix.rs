//! Prefix rename primitives for [`SqliteStore`].
//!
//! These are the low-level building blocks for `rename-prefix` and
//! `repair`: rewriting a single issue's ID everywhere it appears, and
//! migrating per-prefix state (dependency endpoints, counters).

use rusqlite::params;

use crate::error::{Result, StorageError};
use crate::sqlite::issues::issue_exists_on_conn;
use crate::sqlite::store::SqliteStore;

impl SqliteStore {
    /// Atomically rewrites an issue's ID.
    ///
    /// Updates the issue row, every dependency endpoint referring to the
    /// old ID, and the label/comment/event foreign keys, all in one
    /// transaction. Fails with a conflict if `new_id` is already taken.
    pub fn update_issue_id_impl(&self, old_id: &str, new_id: &str, _actor: &str) -> Result<()> {
        if old_id == new_id {
            return Ok(());
        }

        let conn = self.lock_conn()?;

        if !issue_exists_on_conn(&conn, old_id)? {
            return Err(StorageError::not_found("issue", old_id));
        }
        if issue_exists_on_conn(&conn, new_id)? {
            return Err(StorageError::conflict(format!(
                "issue {new_id} already exists"
            )));
        }

        let tx = conn
            .unchecked_transaction()
            .map_err(|e| StorageError::Transaction(format!("failed to begin: {e}")))?;

        // The issues PK and the child foreign keys change in the same
        // transaction, so enforcement has to wait until commit.
        tx.execute_batch("PRAGMA defer_foreign_keys = ON")?;

        tx.execute(
            "UPDATE dependencies SET issue_id = ?1 WHERE issue_id = ?2",
            params![new_id, old_id],
        )?;
        tx.execute(
            "UPDATE dependencies SET depends_on_id = ?1 WHERE depends_on_id = ?2",
            params![new_id, old_id],
        )?;
        tx.execute(
            "UPDATE labels SET issue_id = ?1 WHERE issue_id = ?2",
            params![new_id, old_id],
        )?;
        tx.execute(
            "UPDATE comments SET issue_id = ?1 WHERE issue_id = ?2",
            params![new_id, old_id],
        )?;
        tx.execute(
            "UPDATE events SET issue_id = ?1 WHERE issue_id = ?2",
            params![new_id, old_id],
        )?;
        tx.execute(
            "UPDATE issues SET id = ?1 WHERE id = ?2",
            params![new_id, old_id],
        )?;

        tx.commit()
            .map_err(|e| StorageError::Transaction(format!("failed to commit: {e}")))?;
        Ok(())
    }

    /// Rewrites dependency endpoints from one prefix to another.
    ///
    /// Covers rows whose issue no longer exists under the old prefix
    /// (dangling references after a partial rename).
    pub fn rename_dependency_prefix_impl(&self, old_prefix: &str, new_prefix: &str) -> Result<()> {
        let conn = self.lock_conn()?;
        let old_like = format!("{old_prefix}-%");

        let rewrite = |col: &str| -> Result<()> {
            let sql = format!(
                "UPDATE dependencies
                 SET {col} = ?1 || substr({col}, ?2)
                 WHERE {col} LIKE ?3"
            );
            // substr is 1-based: skip "<old_prefix>" and keep "-suffix".
            conn.execute(
                &sql,
                params![new_prefix, (old_prefix.len() + 1) as i64, old_like],
            )?;
            Ok(())
        };

        rewrite("issue_id")?;
        rewrite("depends_on_id")?;
        Ok(())
    }

    /// Migrates the sequential counter row from one prefix to another.
    ///
    /// If both prefixes have counters, the larger value survives.
    pub fn rename_counter_prefix_impl(&self, old_prefix: &str, new_prefix: &str) -> Result<()> {
        let conn = self.lock_conn()?;

        let old_counter: Option<i64> = conn
            .query_row(
                "SELECT counter FROM counters WHERE prefix = ?1",
                params![old_prefix],
                |row| row.get(0),
            )
            .ok();

        let Some(old_counter) = old_counter else {
            return Ok(()); // Nothing to migrate.
        };

        conn.execute(
            "INSERT INTO counters (prefix, counter) VALUES (?1, ?2)
             ON CONFLICT(prefix) DO UPDATE SET counter = MAX(counter, excluded.counter)",
            params![new_prefix, old_counter],
        )?;
        conn.execute(
            "DELETE FROM counters WHERE prefix = ?1",
            params![old_prefix],
        )?;
        Ok(())
    }

    /// Overwrites the text-bearing fields of an issue without touching
    /// `updated_at` or the tombstone guard.
    ///
    /// Rename and repair rewrite ID references mechanically; the content is
    /// otherwise unchanged, so the record's revision state stays put.
    pub fn rewrite_text_fields_impl(
        &self,
        id: &str,
        title: &str,
        description: &str,
        design: &str,
        acceptance_criteria: &str,
        notes: &str,
    ) -> Result<()> {
        let conn = self.lock_conn()?;
        let affected = conn.execute(
            "UPDATE issues SET title = ?1, description = ?2, design = ?3,
             acceptance_criteria = ?4, notes = ?5 WHERE id = ?6",
            params![title, description, design, acceptance_criteria, notes, id],
        )?;
        if affected == 0 {
            return Err(StorageError::not_found("issue", id));
        }
        Ok(())
    }

    /// Reads a prefix's sequential counter, zero if absent.
    pub fn get_counter_impl(&self, prefix: &str) -> Result<i64> {
        let conn = self.lock_conn()?;
        let counter: Option<i64> = conn
            .query_row(
                "SELECT counter FROM counters WHERE prefix = ?1",
                params![prefix],
                |row| row.get(0),
            )
            .ok();
        Ok(counter.unwrap_or(0))
    }

    /// Sets a prefix's sequential counter.
    pub fn set_counter_impl(&self, prefix: &str, counter: i64) -> Result<()> {
        let conn = self.lock_conn()?;
        conn.execute(
            "INSERT OR REPLACE INTO counters (prefix, counter) VALUES (?1, ?2)",
            params![prefix, counter],
        )?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use beadslog_core::dependency::Dependency;
    use beadslog_core::enums::DependencyType;
    use beadslog_core::issue::IssueBuilder;

    fn test_store() -> SqliteStore {
        SqliteStore::open_in_memory().unwrap()
    }

    fn make_issue(store: &SqliteStore, id: &str) {
        let issue = IssueBuilder::new(id).id(id).build();
        store.create_issue_impl(&issue, "alice").unwrap();
    }

    #[test]
    fn update_issue_id_rewrites_everything() {
        let store = test_store();
        make_issue(&store, "old-1");
        make_issue(&store, "old-2");
        store
            .add_dependency_impl(
                &Dependency::new("old-1", "old-2", DependencyType::Blocks),
                "alice",
            )
            .unwrap();
        store.add_label_impl("old-1", "keep", "alice").unwrap();
        store.add_comment_impl("old-1", "alice", "note").unwrap();

        store.update_issue_id_impl("old-1", "new-1", "alice").unwrap();

        assert!(store.get_issue_impl("old-1").unwrap_err().is_not_found());
        let renamed = store.get_issue_impl("new-1").unwrap();
        assert_eq!(renamed.title, "old-1"); // Content untouched.

        let deps = store.get_dependency_records_impl("new-1").unwrap();
        assert_eq!(deps.len(), 1);
        assert_eq!(deps[0].depends_on_id, "old-2");

        assert_eq!(store.get_labels_impl("new-1").unwrap(), vec!["keep"]);
        assert_eq!(store.get_comments_impl("new-1").unwrap().len(), 1);
        assert!(!store.get_events_impl("new-1", 10).unwrap().is_empty());
    }

    #[test]
    fn update_issue_id_rewrites_inbound_endpoints() {
        let store = test_store();
        make_issue(&store, "old-1");
        make_issue(&store, "old-2");
        store
            .add_dependency_impl(
                &Dependency::new("old-2", "old-1", DependencyType::Blocks),
                "alice",
            )
            .unwrap();

        store.update_issue_id_impl("old-1", "new-1", "alice").unwrap();

        let deps = store.get_dependency_records_impl("old-2").unwrap();
        assert_eq!(deps[0].depends_on_id, "new-1");
    }

    #[test]
    fn update_issue_id_conflict_on_taken_target() {
        let store = test_store();
        make_issue(&store, "old-1");
        make_issue(&store, "new-1");
        let err = store
            .update_issue_id_impl("old-1", "new-1", "alice")
            .unwrap_err();
        assert!(err.is_conflict());
    }

    #[test]
    fn rename_dependency_prefix_rewrites_both_columns() {
        let store = test_store();
        make_issue(&store, "old-1");
        make_issue(&store, "old-2");
        store
            .add_dependency_impl(
                &Dependency::new("old-1", "old-2", DependencyType::Blocks),
                "alice",
            )
            .unwrap();

        store.rename_dependency_prefix_impl("old", "new").unwrap();

        let conn = store.lock_conn().unwrap();
        let (from, to): (String, String) = conn
            .query_row(
                "SELECT issue_id, depends_on_id FROM dependencies",
                [],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .unwrap();
        assert_eq!(from, "new-1");
        assert_eq!(to, "new-2");
    }

    #[test]
    fn counter_migration_takes_max() {
        let store = test_store();
        store.set_counter_impl("old", 42).unwrap();
        store.set_counter_impl("new", 7).unwrap();

        store.rename_counter_prefix_impl("old", "new").unwrap();

        assert_eq!(store.get_counter_impl("new").unwrap(), 42);
        assert_eq!(store.get_counter_impl("old").unwrap(), 0);
    }
}
