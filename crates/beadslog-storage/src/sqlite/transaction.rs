//! Transaction wrapper for [`SqliteStore`].

use chrono::{DateTime, Utc};
use rusqlite::Connection;

use beadslog_core::comment::Comment;
use beadslog_core::dependency::Dependency;
use beadslog_core::issue::Issue;

use crate::error::{Result, StorageError};
use crate::sqlite::comments;
use crate::sqlite::config;
use crate::sqlite::dependencies;
use crate::sqlite::issues;
use crate::sqlite::labels;
use crate::sqlite::store::SqliteStore;
use crate::traits::{IssueUpdates, Transaction};

/// A thin wrapper around a SQLite connection that is inside a transaction.
///
/// Holds a reference to the connection (which already has an active
/// transaction via `BEGIN`) and implements [`Transaction`] by delegating to
/// the same connection-level helpers used by [`SqliteStore`].
pub(crate) struct SqliteTx<'a> {
    pub(crate) conn: &'a Connection,
}

impl Transaction for SqliteTx<'_> {
    fn create_issue(&self, issue: &Issue, actor: &str) -> Result<()> {
        issues::insert_issue(self.conn, issue, actor)
    }

    fn update_issue(&self, id: &str, updates: &IssueUpdates, actor: &str) -> Result<()> {
        issues::update_issue_on_conn(self.conn, id, updates, actor)
    }

    fn delete_issue(&self, id: &str, reason: &str, actor: &str) -> Result<()> {
        issues::delete_issue_on_conn(self.conn, id, reason, actor)
    }

    fn get_issue(&self, id: &str) -> Result<Issue> {
        issues::get_issue_on_conn(self.conn, id)
    }

    fn add_dependency(&self, dep: &Dependency, actor: &str) -> Result<()> {
        dependencies::add_dependency_on_conn(self.conn, dep, actor)
    }

    fn remove_dependency(&self, issue_id: &str, depends_on_id: &str, actor: &str) -> Result<()> {
        dependencies::remove_dependency_on_conn(self.conn, issue_id, depends_on_id, actor)
    }

    fn get_dependency_records(&self, issue_id: &str) -> Result<Vec<Dependency>> {
        dependencies::get_dependency_records_on_conn(self.conn, issue_id)
    }

    fn add_label(&self, issue_id: &str, label: &str, actor: &str) -> Result<()> {
        labels::add_label_on_conn(self.conn, issue_id, label, actor)
    }

    fn get_labels(&self, issue_id: &str) -> Result<Vec<String>> {
        labels::get_labels_on_conn(self.conn, issue_id)
    }

    fn set_config(&self, key: &str, value: &str) -> Result<()> {
        config::set_config_on_conn(self.conn, key, value)
    }

    fn get_config(&self, key: &str) -> Result<String> {
        config::get_config_on_conn(self.conn, key)
    }

    fn set_metadata(&self, key: &str, value: &str) -> Result<()> {
        config::set_metadata_on_conn(self.conn, key, value)
    }

    fn get_metadata(&self, key: &str) -> Result<String> {
        config::get_metadata_on_conn(self.conn, key)
    }

    fn add_comment(&self, issue_id: &str, author: &str, text: &str) -> Result<Comment> {
        comments::add_comment_on_conn(self.conn, issue_id, author, text)
    }

    fn import_comment(
        &self,
        issue_id: &str,
        author: &str,
        text: &str,
        created_at: DateTime<Utc>,
    ) -> Result<Comment> {
        comments::import_comment_on_conn(self.conn, issue_id, author, text, created_at)
    }

    fn get_comments(&self, issue_id: &str) -> Result<Vec<Comment>> {
        comments::get_comments_on_conn(self.conn, issue_id)
    }
}

impl SqliteStore {
    /// Executes a closure within a database transaction.
    pub fn run_in_transaction_impl(
        &self,
        f: &dyn Fn(&dyn Transaction) -> Result<()>,
    ) -> Result<()> {
        let conn = self.lock_conn()?;
        let tx = conn
            .unchecked_transaction()
            .map_err(|e| StorageError::Transaction(format!("failed to begin: {e}")))?;

        let wrapper = SqliteTx { conn: &tx };
        match f(&wrapper) {
            Ok(()) => tx
                .commit()
                .map_err(|e| StorageError::Transaction(format!("failed to commit: {e}"))),
            Err(e) => {
                // Rollback happens when the transaction guard drops.
                Err(e)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use beadslog_core::issue::IssueBuilder;

    #[test]
    fn transaction_commits_on_ok() {
        let store = SqliteStore::open_in_memory().unwrap();
        store
            .run_in_transaction_impl(&|tx| {
                let issue = IssueBuilder::new("In tx").id("bd-tx1").build();
                tx.create_issue(&issue, "alice")?;
                tx.add_label("bd-tx1", "batch", "alice")?;
                Ok(())
            })
            .unwrap();

        assert_eq!(store.get_issue_impl("bd-tx1").unwrap().title, "In tx");
        assert_eq!(store.get_labels_impl("bd-tx1").unwrap(), vec!["batch"]);
    }

    #[test]
    fn transaction_rolls_back_on_err() {
        let store = SqliteStore::open_in_memory().unwrap();
        let result = store.run_in_transaction_impl(&|tx| {
            let issue = IssueBuilder::new("Doomed").id("bd-tx2").build();
            tx.create_issue(&issue, "alice")?;
            Err(StorageError::invalid("abort"))
        });
        assert!(result.is_err());
        assert!(store.get_issue_impl("bd-tx2").unwrap_err().is_not_found());
    }
}
