//! Label operations for [`SqliteStore`].

use std::collections::HashMap;

use chrono::Utc;
use rusqlite::{Connection, params};

use beadslog_core::comment::normalize_label;
use beadslog_core::enums::EventType;

use crate::error::{Result, StorageError};
use crate::sqlite::issues::{emit_event, format_datetime, get_issue_on_conn};
use crate::sqlite::store::SqliteStore;

// ---------------------------------------------------------------------------
// Connection-level helpers
// ---------------------------------------------------------------------------

/// Adds a label on the given connection. Labels are normalized lowercase;
/// re-adding an existing label is a no-op.
pub(crate) fn add_label_on_conn(
    conn: &Connection,
    issue_id: &str,
    label: &str,
    actor: &str,
) -> Result<()> {
    let issue = get_issue_on_conn(conn, issue_id)?;
    if issue.is_tombstone() {
        return Err(StorageError::Immutable {
            id: issue_id.to_owned(),
        });
    }

    let normalized = normalize_label(label);
    if normalized.is_empty() {
        return Err(StorageError::invalid("label must not be empty"));
    }

    let inserted = conn.execute(
        "INSERT OR IGNORE INTO labels (issue_id, label) VALUES (?1, ?2)",
        params![issue_id, normalized],
    )?;

    if inserted > 0 {
        let now_str = format_datetime(&Utc::now());
        emit_event(
            conn,
            issue_id,
            EventType::LabelAdded,
            actor,
            None,
            Some(&normalized),
            None,
            &now_str,
        )?;
    }

    Ok(())
}

/// Removes a label on the given connection.
pub(crate) fn remove_label_on_conn(
    conn: &Connection,
    issue_id: &str,
    label: &str,
    actor: &str,
) -> Result<()> {
    let normalized = normalize_label(label);
    let affected = conn.execute(
        "DELETE FROM labels WHERE issue_id = ?1 AND label = ?2",
        params![issue_id, normalized],
    )?;

    if affected == 0 {
        return Err(StorageError::not_found(
            "label",
            format!("{issue_id}: {normalized}"),
        ));
    }

    let now_str = format_datetime(&Utc::now());
    emit_event(
        conn,
        issue_id,
        EventType::LabelRemoved,
        actor,
        Some(&normalized),
        None,
        None,
        &now_str,
    )?;

    Ok(())
}

/// Returns all labels for an issue on the given connection.
pub(crate) fn get_labels_on_conn(conn: &Connection, issue_id: &str) -> Result<Vec<String>> {
    let mut stmt =
        conn.prepare("SELECT label FROM labels WHERE issue_id = ?1 ORDER BY label")?;
    let rows = stmt.query_map(params![issue_id], |row| row.get::<_, String>(0))?;
    let mut labels = Vec::new();
    for row in rows {
        labels.push(row?);
    }
    Ok(labels)
}

// ---------------------------------------------------------------------------
// SqliteStore methods
// ---------------------------------------------------------------------------

impl SqliteStore {
    /// Adds a label to an issue.
    pub fn add_label_impl(&self, issue_id: &str, label: &str, actor: &str) -> Result<()> {
        let conn = self.lock_conn()?;
        add_label_on_conn(&conn, issue_id, label, actor)
    }

    /// Removes a label from an issue.
    pub fn remove_label_impl(&self, issue_id: &str, label: &str, actor: &str) -> Result<()> {
        let conn = self.lock_conn()?;
        remove_label_on_conn(&conn, issue_id, label, actor)
    }

    /// Returns all labels for an issue.
    pub fn get_labels_impl(&self, issue_id: &str) -> Result<Vec<String>> {
        let conn = self.lock_conn()?;
        get_labels_on_conn(&conn, issue_id)
    }

    /// Returns labels for many issues in a single query.
    pub fn get_labels_for_issues_impl(
        &self,
        ids: &[String],
    ) -> Result<HashMap<String, Vec<String>>> {
        let mut result: HashMap<String, Vec<String>> = HashMap::new();
        if ids.is_empty() {
            return Ok(result);
        }

        let conn = self.lock_conn()?;
        let placeholders = ids.iter().map(|_| "?").collect::<Vec<_>>().join(",");
        let sql = format!(
            "SELECT issue_id, label FROM labels
             WHERE issue_id IN ({placeholders}) ORDER BY issue_id, label"
        );
        let mut stmt = conn.prepare(&sql)?;
        let params = rusqlite::params_from_iter(ids.iter());
        let rows = stmt.query_map(params, |row| {
            Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?))
        })?;

        for row in rows {
            let (issue_id, label) = row?;
            result.entry(issue_id).or_default().push(label);
        }
        Ok(result)
    }
}
