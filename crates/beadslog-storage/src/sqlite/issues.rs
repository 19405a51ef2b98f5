//! Issue CRUD operations for [`SqliteStore`].

use chrono::{DateTime, Utc};
use rusqlite::{Connection, Row, params};

use beadslog_core::content_hash::compute_content_hash;
use beadslog_core::enums::{EventType, IssueType, Status};
use beadslog_core::filter::IssueFilter;
use beadslog_core::issue::Issue;

use crate::error::{Result, StorageError};
use crate::sqlite::queries;
use crate::sqlite::store::SqliteStore;
use crate::traits::IssueUpdates;

// ---------------------------------------------------------------------------
// Column list (shared between INSERT and SELECT)
// ---------------------------------------------------------------------------

/// All issue columns in a deterministic order for SELECT queries.
pub(crate) const ISSUE_COLUMNS: &str = r#"
    id, content_hash, title, description, design, acceptance_criteria, notes,
    status, priority, issue_type, assignee, estimated_minutes,
    created_at, created_by, updated_at,
    closed_at, close_reason, closed_by_session,
    deleted_at, delete_reason, original_type,
    due_at, defer_until,
    external_ref, source_repo, ephemeral,
    await_type, await_id, timeout_ns
"#;

/// Same as [`ISSUE_COLUMNS`] but prefixed with `issues.` for JOIN queries
/// (e.g. `created_at` exists in both `issues` and `dependencies`).
pub(crate) const ISSUE_COLUMNS_PREFIXED: &str = r#"
    issues.id, issues.content_hash, issues.title, issues.description, issues.design,
    issues.acceptance_criteria, issues.notes,
    issues.status, issues.priority, issues.issue_type, issues.assignee, issues.estimated_minutes,
    issues.created_at, issues.created_by, issues.updated_at,
    issues.closed_at, issues.close_reason, issues.closed_by_session,
    issues.deleted_at, issues.delete_reason, issues.original_type,
    issues.due_at, issues.defer_until,
    issues.external_ref, issues.source_repo, issues.ephemeral,
    issues.await_type, issues.await_id, issues.timeout_ns
"#;

// ---------------------------------------------------------------------------
// Row scanning
// ---------------------------------------------------------------------------

/// Deserialises a row into an [`Issue`].
///
/// The column order MUST match [`ISSUE_COLUMNS`].
pub(crate) fn scan_issue(row: &Row<'_>) -> rusqlite::Result<Issue> {
    let id: String = row.get("id")?;
    let content_hash: String = row.get("content_hash")?;
    let title: String = row.get("title")?;
    let description: String = row.get("description")?;
    let design: String = row.get("design")?;
    let acceptance_criteria: String = row.get("acceptance_criteria")?;
    let notes: String = row.get("notes")?;

    let status_str: String = row.get("status")?;
    let priority: i32 = row.get("priority")?;
    let issue_type_str: String = row.get("issue_type")?;
    let assignee: String = row.get("assignee")?;
    let estimated_minutes: Option<i32> = row.get("estimated_minutes")?;

    let created_at_str: String = row.get("created_at")?;
    let created_by: String = row.get("created_by")?;
    let updated_at_str: String = row.get("updated_at")?;

    let closed_at_str: Option<String> = row.get("closed_at")?;
    let close_reason: String = row.get("close_reason")?;
    let closed_by_session: String = row.get("closed_by_session")?;

    let deleted_at_str: Option<String> = row.get("deleted_at")?;
    let delete_reason: String = row.get("delete_reason")?;
    let original_type: String = row.get("original_type")?;

    let due_at_str: Option<String> = row.get("due_at")?;
    let defer_until_str: Option<String> = row.get("defer_until")?;

    let external_ref: Option<String> = row.get("external_ref")?;
    let source_repo: String = row.get("source_repo")?;
    let ephemeral_int: i32 = row.get("ephemeral")?;

    let await_type: String = row.get("await_type")?;
    let await_id: String = row.get("await_id")?;
    let timeout_ns: i64 = row.get("timeout_ns")?;

    let timeout = if timeout_ns > 0 {
        Some(std::time::Duration::from_nanos(timeout_ns as u64))
    } else {
        None
    };

    Ok(Issue {
        id,
        content_hash,
        title,
        description,
        design,
        acceptance_criteria,
        notes,
        status: Status::from(status_str),
        priority,
        issue_type: IssueType::from(issue_type_str),
        assignee,
        estimated_minutes,
        created_at: parse_datetime(&created_at_str),
        created_by,
        updated_at: parse_datetime(&updated_at_str),
        closed_at: closed_at_str.as_deref().map(parse_datetime),
        close_reason,
        closed_by_session,
        deleted_at: deleted_at_str.as_deref().map(parse_datetime),
        delete_reason,
        original_type,
        due_at: due_at_str.as_deref().map(parse_datetime),
        defer_until: defer_until_str.as_deref().map(parse_datetime),
        external_ref,
        source_repo,
        ephemeral: ephemeral_int != 0,
        await_type,
        await_id,
        timeout,
        // Relational data is attached by callers that need it:
        labels: Vec::new(),
        dependencies: Vec::new(),
        comments: Vec::new(),
    })
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

/// Formats a `DateTime<Utc>` as ISO 8601 TEXT for SQLite.
pub(crate) fn format_datetime(dt: &DateTime<Utc>) -> String {
    dt.format("%Y-%m-%dT%H:%M:%S%.3fZ").to_string()
}

/// Parses an ISO 8601 TEXT string from SQLite into a `DateTime<Utc>`.
pub(crate) fn parse_datetime(s: &str) -> DateTime<Utc> {
    s.parse::<DateTime<Utc>>().unwrap_or_else(|_| {
        chrono::NaiveDateTime::parse_from_str(s, "%Y-%m-%dT%H:%M:%S%.fZ")
            .or_else(|_| chrono::NaiveDateTime::parse_from_str(s, "%Y-%m-%dT%H:%M:%SZ"))
            .or_else(|_| chrono::NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S"))
            .map(|ndt| ndt.and_utc())
            .unwrap_or_else(|_| Utc::now())
    })
}

/// Returns `true` if an issue row with this ID exists.
pub(crate) fn issue_exists_on_conn(conn: &Connection, id: &str) -> Result<bool> {
    let count: i32 = conn.query_row(
        "SELECT COUNT(*) FROM issues WHERE id = ?1",
        params![id],
        |row| row.get(0),
    )?;
    Ok(count > 0)
}

// ---------------------------------------------------------------------------
// Issue insert helper (shared between store and transaction)
// ---------------------------------------------------------------------------

/// Inserts a single issue into the database using the provided connection.
///
/// Fails with a conflict if the ID is already present.
pub(crate) fn insert_issue(conn: &Connection, issue: &Issue, actor: &str) -> Result<()> {
    if issue.id.is_empty() {
        return Err(StorageError::invalid("issue ID must be set before insert"));
    }
    if issue_exists_on_conn(conn, &issue.id)? {
        return Err(StorageError::conflict(format!(
            "issue {} already exists",
            issue.id
        )));
    }

    let now = Utc::now();
    let now_str = format_datetime(&now);
    let content_hash = compute_content_hash(issue);

    let created_at_str = format_datetime(&issue.created_at);
    let updated_at_str = format_datetime(&issue.updated_at);
    let closed_at_str = issue.closed_at.as_ref().map(format_datetime);
    let deleted_at_str = issue.deleted_at.as_ref().map(format_datetime);
    let due_at_str = issue.due_at.as_ref().map(format_datetime);
    let defer_until_str = issue.defer_until.as_ref().map(format_datetime);
    let timeout_ns = issue.timeout.map(|d| d.as_nanos() as i64).unwrap_or(0);

    conn.execute(
        &format!(
            "INSERT INTO issues ({ISSUE_COLUMNS}) VALUES (
                ?1, ?2, ?3, ?4, ?5, ?6, ?7,
                ?8, ?9, ?10, ?11, ?12,
                ?13, ?14, ?15,
                ?16, ?17, ?18,
                ?19, ?20, ?21,
                ?22, ?23,
                ?24, ?25, ?26,
                ?27, ?28, ?29
            )"
        ),
        params![
            issue.id,                   // 1
            content_hash,               // 2
            issue.title,                // 3
            issue.description,          // 4
            issue.design,               // 5
            issue.acceptance_criteria,  // 6
            issue.notes,                // 7
            issue.status.as_str(),      // 8
            issue.priority,             // 9
            issue.issue_type.as_str(),  // 10
            issue.assignee,             // 11
            issue.estimated_minutes,    // 12
            created_at_str,             // 13
            issue.created_by,           // 14
            updated_at_str,             // 15
            closed_at_str,              // 16
            issue.close_reason,         // 17
            issue.closed_by_session,    // 18
            deleted_at_str,             // 19
            issue.delete_reason,        // 20
            issue.original_type,        // 21
            due_at_str,                 // 22
            defer_until_str,            // 23
            issue.external_ref,         // 24
            issue.source_repo,          // 25
            issue.ephemeral as i32,     // 26
            issue.await_type,           // 27
            issue.await_id,             // 28
            timeout_ns,                 // 29
        ],
    )?;

    emit_event(
        conn,
        &issue.id,
        EventType::Created,
        actor,
        None,
        None,
        None,
        &now_str,
    )?;

    Ok(())
}

/// Emits an event row into the events table.
#[allow(clippy::too_many_arguments)]
pub(crate) fn emit_event(
    conn: &Connection,
    issue_id: &str,
    event_type: EventType,
    actor: &str,
    old_value: Option<&str>,
    new_value: Option<&str>,
    comment: Option<&str>,
    created_at: &str,
) -> Result<()> {
    conn.execute(
        "INSERT INTO events (issue_id, event_type, actor, old_value, new_value, comment, created_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
        params![
            issue_id,
            event_type.as_str(),
            actor,
            old_value,
            new_value,
            comment,
            created_at,
        ],
    )?;
    Ok(())
}

/// Writes an issue row unconditionally, replacing any existing row, and
/// swaps the relational rows (dependencies, labels) for the issue's
/// embedded sets. Comments are appended if absent.
///
/// This is the import path: it preserves the record's own timestamps and
/// may write tombstones, which the normal update path refuses.
pub(crate) fn upsert_issue(conn: &Connection, issue: &Issue) -> Result<()> {
    if issue.id.is_empty() {
        return Err(StorageError::invalid("issue ID must be set before upsert"));
    }

    let content_hash = compute_content_hash(issue);
    let created_at_str = format_datetime(&issue.created_at);
    let updated_at_str = format_datetime(&issue.updated_at);
    let closed_at_str = issue.closed_at.as_ref().map(format_datetime);
    let deleted_at_str = issue.deleted_at.as_ref().map(format_datetime);
    let due_at_str = issue.due_at.as_ref().map(format_datetime);
    let defer_until_str = issue.defer_until.as_ref().map(format_datetime);
    let timeout_ns = issue.timeout.map(|d| d.as_nanos() as i64).unwrap_or(0);

    conn.execute(
        &format!(
            "INSERT OR REPLACE INTO issues ({ISSUE_COLUMNS}) VALUES (
                ?1, ?2, ?3, ?4, ?5, ?6, ?7,
                ?8, ?9, ?10, ?11, ?12,
                ?13, ?14, ?15,
                ?16, ?17, ?18,
                ?19, ?20, ?21,
                ?22, ?23,
                ?24, ?25, ?26,
                ?27, ?28, ?29
            )"
        ),
        params![
            issue.id,
            content_hash,
            issue.title,
            issue.description,
            issue.design,
            issue.acceptance_criteria,
            issue.notes,
            issue.status.as_str(),
            issue.priority,
            issue.issue_type.as_str(),
            issue.assignee,
            issue.estimated_minutes,
            created_at_str,
            issue.created_by,
            updated_at_str,
            closed_at_str,
            issue.close_reason,
            issue.closed_by_session,
            deleted_at_str,
            issue.delete_reason,
            issue.original_type,
            due_at_str,
            defer_until_str,
            issue.external_ref,
            issue.source_repo,
            issue.ephemeral as i32,
            issue.await_type,
            issue.await_id,
            timeout_ns,
        ],
    )?;

    // Dependencies and labels mirror the embedded sets exactly.
    conn.execute(
        "DELETE FROM dependencies WHERE issue_id = ?1",
        params![issue.id],
    )?;
    for dep in &issue.dependencies {
        conn.execute(
            "INSERT OR REPLACE INTO dependencies
             (issue_id, depends_on_id, type, created_at, created_by, metadata, thread_id)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            params![
                issue.id,
                dep.depends_on_id,
                dep.dep_type.as_str(),
                format_datetime(&dep.created_at),
                dep.created_by,
                dep.metadata,
                dep.thread_id,
            ],
        )?;
    }

    conn.execute("DELETE FROM labels WHERE issue_id = ?1", params![issue.id])?;
    for label in &issue.labels {
        conn.execute(
            "INSERT OR IGNORE INTO labels (issue_id, label) VALUES (?1, ?2)",
            params![issue.id, label.to_lowercase()],
        )?;
    }

    // Comments are append-only: insert any the store has not seen.
    for comment in &issue.comments {
        let created_str = format_datetime(&comment.created_at);
        let present: i32 = conn.query_row(
            "SELECT COUNT(*) FROM comments
             WHERE issue_id = ?1 AND author = ?2 AND text = ?3 AND created_at = ?4",
            params![issue.id, comment.author, comment.text, created_str],
            |row| row.get(0),
        )?;
        if present == 0 {
            conn.execute(
                "INSERT INTO comments (issue_id, author, text, created_at)
                 VALUES (?1, ?2, ?3, ?4)",
                params![issue.id, comment.author, comment.text, created_str],
            )?;
        }
    }

    Ok(())
}

// ---------------------------------------------------------------------------
// SqliteStore issue methods
// ---------------------------------------------------------------------------

impl SqliteStore {
    /// Creates a single issue.
    pub fn create_issue_impl(&self, issue: &Issue, actor: &str) -> Result<()> {
        let conn = self.lock_conn()?;
        insert_issue(&conn, issue, actor)
    }

    /// Writes an issue row unconditionally (import path).
    pub fn upsert_issue_impl(&self, issue: &Issue) -> Result<()> {
        let conn = self.lock_conn()?;
        upsert_issue(&conn, issue)
    }

    /// Upserts many issues in a single transaction.
    pub fn upsert_issues_impl(&self, issues: &[Issue]) -> Result<()> {
        let conn = self.lock_conn()?;
        let tx = conn
            .unchecked_transaction()
            .map_err(|e| StorageError::Transaction(format!("failed to begin: {e}")))?;
        tx.execute_batch("PRAGMA defer_foreign_keys = ON")?;
        for issue in issues {
            upsert_issue(&tx, issue)?;
        }
        tx.commit()
            .map_err(|e| StorageError::Transaction(format!("failed to commit: {e}")))?;
        Ok(())
    }

    /// Creates multiple issues in a single transaction.
    pub fn create_issues_impl(&self, issues: &[Issue], actor: &str) -> Result<()> {
        let conn = self.lock_conn()?;
        let tx = conn
            .unchecked_transaction()
            .map_err(|e| StorageError::Transaction(format!("failed to begin: {e}")))?;
        for issue in issues {
            insert_issue(&tx, issue, actor)?;
        }
        tx.commit()
            .map_err(|e| StorageError::Transaction(format!("failed to commit: {e}")))?;
        Ok(())
    }

    /// Retrieves an issue by ID.
    pub fn get_issue_impl(&self, id: &str) -> Result<Issue> {
        let conn = self.lock_conn()?;
        get_issue_on_conn(&conn, id)
    }

    /// Retrieves multiple issues by their IDs.
    pub fn get_issues_by_ids_impl(&self, ids: &[String]) -> Result<Vec<Issue>> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }
        let conn = self.lock_conn()?;
        let placeholders = ids.iter().map(|_| "?").collect::<Vec<_>>().join(",");
        let sql = format!("SELECT {ISSUE_COLUMNS} FROM issues WHERE id IN ({placeholders})");
        let mut stmt = conn.prepare(&sql)?;
        let params = rusqlite::params_from_iter(ids.iter());
        let rows = stmt.query_map(params, scan_issue)?;
        let mut issues = Vec::new();
        for row in rows {
            issues.push(row?);
        }
        Ok(issues)
    }

    /// Returns all issues, tombstones included.
    pub fn get_all_issues_impl(&self) -> Result<Vec<Issue>> {
        let conn = self.lock_conn()?;
        get_all_issues_on_conn(&conn)
    }

    /// Applies partial updates to an issue.
    pub fn update_issue_impl(&self, id: &str, updates: &IssueUpdates, actor: &str) -> Result<()> {
        let conn = self.lock_conn()?;
        update_issue_on_conn(&conn, id, updates, actor)
    }

    /// Closes an issue and returns the issues newly unblocked by the close.
    pub fn close_issue_impl(
        &self,
        id: &str,
        reason: &str,
        actor: &str,
        session: &str,
    ) -> Result<Vec<Issue>> {
        let conn = self.lock_conn()?;
        close_issue_on_conn(&conn, id, reason, actor, session)
    }

    /// Soft-deletes an issue by transitioning it to a tombstone.
    pub fn delete_issue_impl(&self, id: &str, reason: &str, actor: &str) -> Result<()> {
        let conn = self.lock_conn()?;
        delete_issue_on_conn(&conn, id, reason, actor)
    }

    /// Searches issues by text query and filter.
    pub fn search_issues_impl(&self, query: &str, filter: &IssueFilter) -> Result<Vec<Issue>> {
        let conn = self.lock_conn()?;
        search_issues_on_conn(&conn, query, filter)
    }

    /// Resolves a partial ID to a full ID.
    ///
    /// Resolution order: exact match, then hash-substring match across all
    /// IDs. More than one surviving candidate is an ambiguity error.
    pub fn resolve_id_impl(&self, partial: &str) -> Result<String> {
        let conn = self.lock_conn()?;
        let partial = partial.trim().to_lowercase();
        if partial.is_empty() {
            return Err(StorageError::invalid("empty ID"));
        }

        if issue_exists_on_conn(&conn, &partial)? {
            return Ok(partial);
        }

        // Substring match against the suffix part of every ID.
        let needle = partial
            .rfind('-')
            .map(|pos| partial[pos + 1..].to_owned())
            .unwrap_or_else(|| partial.clone());

        let mut stmt = conn.prepare("SELECT id FROM issues")?;
        let rows = stmt.query_map([], |row| row.get::<_, String>(0))?;
        let mut matches = Vec::new();
        for row in rows {
            let id = row?;
            if let Some(pos) = id.rfind('-') {
                if id[pos + 1..].contains(&needle) {
                    matches.push(id);
                }
            }
        }

        match matches.len() {
            0 => Err(StorageError::not_found("issue", partial)),
            1 => Ok(matches.remove(0)),
            _ => {
                matches.sort();
                Err(StorageError::AmbiguousId {
                    partial,
                    matches,
                })
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Connection-level helpers (used by both SqliteStore and Transaction)
// ---------------------------------------------------------------------------

/// Retrieves a single issue by ID on the given connection.
pub(crate) fn get_issue_on_conn(conn: &Connection, id: &str) -> Result<Issue> {
    let sql = format!("SELECT {ISSUE_COLUMNS} FROM issues WHERE id = ?1");
    conn.query_row(&sql, params![id], scan_issue)
        .map_err(|e| match e {
            rusqlite::Error::QueryReturnedNoRows => StorageError::not_found("issue", id),
            other => StorageError::Query(other),
        })
}

/// Returns every issue row on the given connection.
pub(crate) fn get_all_issues_on_conn(conn: &Connection) -> Result<Vec<Issue>> {
    let sql = format!("SELECT {ISSUE_COLUMNS} FROM issues ORDER BY id");
    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt.query_map([], scan_issue)?;
    let mut issues = Vec::new();
    for row in rows {
        issues.push(row?);
    }
    Ok(issues)
}

/// Applies partial updates on the given connection.
///
/// Tombstones are immutable; `updated_at` never moves backwards.
pub(crate) fn update_issue_on_conn(
    conn: &Connection,
    id: &str,
    updates: &IssueUpdates,
    actor: &str,
) -> Result<()> {
    let current = get_issue_on_conn(conn, id)?;
    if current.is_tombstone() {
        return Err(StorageError::Immutable { id: id.to_owned() });
    }

    // Build SET clause dynamically from non-None fields.
    let mut set_clauses: Vec<String> = Vec::new();
    let mut param_values: Vec<Box<dyn rusqlite::types::ToSql>> = Vec::new();

    macro_rules! add_field {
        ($field:ident, $col:expr) => {
            if let Some(ref val) = updates.$field {
                set_clauses.push(format!("{} = ?", $col));
                param_values.push(Box::new(val.clone()));
            }
        };
    }

    add_field!(title, "title");
    add_field!(description, "description");
    add_field!(design, "design");
    add_field!(acceptance_criteria, "acceptance_criteria");
    add_field!(notes, "notes");
    add_field!(assignee, "assignee");
    add_field!(close_reason, "close_reason");
    add_field!(closed_by_session, "closed_by_session");
    add_field!(source_repo, "source_repo");
    add_field!(await_type, "await_type");
    add_field!(await_id, "await_id");

    if let Some(ref status) = updates.status {
        set_clauses.push("status = ?".to_string());
        param_values.push(Box::new(status.as_str().to_string()));
    }
    if let Some(ref issue_type) = updates.issue_type {
        set_clauses.push("issue_type = ?".to_string());
        param_values.push(Box::new(issue_type.as_str().to_string()));
    }
    if let Some(priority) = updates.priority {
        if !(0..=4).contains(&priority) {
            return Err(StorageError::invalid(format!(
                "priority {priority} out of range 0-4"
            )));
        }
        set_clauses.push("priority = ?".to_string());
        param_values.push(Box::new(priority));
    }
    if let Some(ephemeral) = updates.ephemeral {
        set_clauses.push("ephemeral = ?".to_string());
        param_values.push(Box::new(ephemeral as i32));
    }

    // Option<Option<T>> fields: outer Some means "update", inner None clears.
    if let Some(ref ext) = updates.external_ref {
        set_clauses.push("external_ref = ?".to_string());
        param_values.push(Box::new(ext.clone()));
    }
    if let Some(ref est) = updates.estimated_minutes {
        set_clauses.push("estimated_minutes = ?".to_string());
        param_values.push(Box::new(*est));
    }
    if let Some(ref due) = updates.due_at {
        set_clauses.push("due_at = ?".to_string());
        param_values.push(Box::new(due.as_ref().map(format_datetime)));
    }
    if let Some(ref defer) = updates.defer_until {
        set_clauses.push("defer_until = ?".to_string());
        param_values.push(Box::new(defer.as_ref().map(format_datetime)));
    }
    if let Some(ref timeout) = updates.timeout {
        set_clauses.push("timeout_ns = ?".to_string());
        let ns = timeout.map(|d| d.as_nanos() as i64).unwrap_or(0);
        param_values.push(Box::new(ns));
    }

    if set_clauses.is_empty() {
        return Ok(()); // Nothing to update.
    }

    // updated_at is non-decreasing per issue.
    let now = Utc::now().max(current.updated_at);
    let now_str = format_datetime(&now);
    set_clauses.push("updated_at = ?".to_string());
    param_values.push(Box::new(now_str.clone()));

    let sql = format!("UPDATE issues SET {} WHERE id = ?", set_clauses.join(", "));
    param_values.push(Box::new(id.to_string()));

    let param_refs: Vec<&dyn rusqlite::types::ToSql> =
        param_values.iter().map(|p| p.as_ref()).collect();

    conn.execute(&sql, param_refs.as_slice())?;

    let status_changed = updates
        .status
        .as_ref()
        .is_some_and(|s| *s != current.status);
    let event_type = if status_changed {
        EventType::StatusChanged
    } else {
        EventType::Updated
    };
    emit_event(
        conn,
        id,
        event_type,
        actor,
        status_changed.then(|| current.status.as_str().to_owned()).as_deref(),
        updates
            .status
            .as_ref()
            .filter(|_| status_changed)
            .map(|s| s.as_str().to_owned())
            .as_deref(),
        None,
        &now_str,
    )?;

    Ok(())
}

/// Closes an issue on the given connection.
///
/// Returns the issues that were blocked by `id` and are now ready.
pub(crate) fn close_issue_on_conn(
    conn: &Connection,
    id: &str,
    reason: &str,
    actor: &str,
    session: &str,
) -> Result<Vec<Issue>> {
    let current = get_issue_on_conn(conn, id)?;
    if current.is_tombstone() {
        return Err(StorageError::Immutable { id: id.to_owned() });
    }

    let now = Utc::now().max(current.updated_at);
    let now_str = format_datetime(&now);

    conn.execute(
        "UPDATE issues SET status = 'closed', closed_at = ?1, close_reason = ?2,
         closed_by_session = ?3, updated_at = ?1 WHERE id = ?4",
        params![now_str, reason, session, id],
    )?;

    emit_event(
        conn,
        id,
        EventType::Closed,
        actor,
        Some(current.status.as_str()),
        Some(reason),
        None,
        &now_str,
    )?;

    queries::newly_unblocked_by_close_on_conn(conn, id)
}

/// Soft-deletes an issue on the given connection.
///
/// The record transitions to a tombstone preserving its other fields, so
/// that forks merging this JSONL observe the deletion instead of
/// resurrecting the issue.
pub(crate) fn delete_issue_on_conn(
    conn: &Connection,
    id: &str,
    reason: &str,
    actor: &str,
) -> Result<()> {
    let current = get_issue_on_conn(conn, id)?;
    if current.is_tombstone() {
        return Ok(()); // Already deleted.
    }

    let now = Utc::now().max(current.updated_at);
    let now_str = format_datetime(&now);

    conn.execute(
        "UPDATE issues SET status = 'tombstone', deleted_at = ?1, delete_reason = ?2,
         original_type = ?3, updated_at = ?1 WHERE id = ?4",
        params![now_str, reason, current.issue_type.as_str(), id],
    )?;

    emit_event(
        conn,
        id,
        EventType::Deleted,
        actor,
        Some(current.status.as_str()),
        None,
        Some(reason),
        &now_str,
    )?;

    Ok(())
}

/// Searches issues on the given connection.
pub(crate) fn search_issues_on_conn(
    conn: &Connection,
    query: &str,
    filter: &IssueFilter,
) -> Result<Vec<Issue>> {
    let mut where_clauses: Vec<String> = Vec::new();
    let mut param_values: Vec<Box<dyn rusqlite::types::ToSql>> = Vec::new();
    let mut param_idx = 1;

    // Full-text search across title, description, notes.
    if !query.is_empty() {
        where_clauses.push(format!(
            "(title LIKE ?{pi} OR description LIKE ?{pi} OR notes LIKE ?{pi})",
            pi = param_idx
        ));
        param_values.push(Box::new(format!("%{query}%")));
        param_idx += 1;
    }

    if let Some(ref status) = filter.status {
        where_clauses.push(format!("status = ?{param_idx}"));
        param_values.push(Box::new(status.as_str().to_string()));
        param_idx += 1;
    }
    if let Some(priority) = filter.priority {
        where_clauses.push(format!("priority = ?{param_idx}"));
        param_values.push(Box::new(priority));
        param_idx += 1;
    }
    if let Some(min) = filter.priority_min {
        where_clauses.push(format!("priority >= ?{param_idx}"));
        param_values.push(Box::new(min));
        param_idx += 1;
    }
    if let Some(max) = filter.priority_max {
        where_clauses.push(format!("priority <= ?{param_idx}"));
        param_values.push(Box::new(max));
        param_idx += 1;
    }
    if let Some(ref issue_type) = filter.issue_type {
        where_clauses.push(format!("issue_type = ?{param_idx}"));
        param_values.push(Box::new(issue_type.as_str().to_string()));
        param_idx += 1;
    }
    if let Some(ref assignee) = filter.assignee {
        where_clauses.push(format!("assignee = ?{param_idx}"));
        param_values.push(Box::new(assignee.clone()));
        param_idx += 1;
    }
    if let Some(ref title_contains) = filter.title_contains {
        where_clauses.push(format!("title LIKE ?{param_idx}"));
        param_values.push(Box::new(format!("%{title_contains}%")));
        param_idx += 1;
    }
    if let Some(ref desc_contains) = filter.description_contains {
        where_clauses.push(format!("description LIKE ?{param_idx}"));
        param_values.push(Box::new(format!("%{desc_contains}%")));
        param_idx += 1;
    }
    if let Some(ref notes_contains) = filter.notes_contains {
        where_clauses.push(format!("notes LIKE ?{param_idx}"));
        param_values.push(Box::new(format!("%{notes_contains}%")));
        param_idx += 1;
    }
    if let Some(ref created_after) = filter.created_after {
        where_clauses.push(format!("created_at >= ?{param_idx}"));
        param_values.push(Box::new(format_datetime(created_after)));
        param_idx += 1;
    }
    if let Some(ref created_before) = filter.created_before {
        where_clauses.push(format!("created_at <= ?{param_idx}"));
        param_values.push(Box::new(format_datetime(created_before)));
        param_idx += 1;
    }
    if let Some(ref updated_after) = filter.updated_after {
        where_clauses.push(format!("updated_at >= ?{param_idx}"));
        param_values.push(Box::new(format_datetime(updated_after)));
        param_idx += 1;
    }
    if let Some(ref updated_before) = filter.updated_before {
        where_clauses.push(format!("updated_at <= ?{param_idx}"));
        param_values.push(Box::new(format_datetime(updated_before)));
        param_idx += 1;
    }
    if let Some(ref closed_after) = filter.closed_after {
        where_clauses.push(format!("closed_at >= ?{param_idx}"));
        param_values.push(Box::new(format_datetime(closed_after)));
        param_idx += 1;
    }
    if let Some(ref closed_before) = filter.closed_before {
        where_clauses.push(format!("closed_at <= ?{param_idx}"));
        param_values.push(Box::new(format_datetime(closed_before)));
        param_idx += 1;
    }
    if filter.no_assignee {
        where_clauses.push("(assignee IS NULL OR assignee = '')".to_string());
    }
    if filter.empty_description {
        where_clauses.push("(description IS NULL OR description = '')".to_string());
    }
    if let Some(ref id_prefix) = filter.id_prefix {
        where_clauses.push(format!("id LIKE ?{param_idx}"));
        param_values.push(Box::new(format!("{id_prefix}%")));
        param_idx += 1;
    }
    if let Some(ref source_repo) = filter.source_repo {
        where_clauses.push(format!("source_repo = ?{param_idx}"));
        param_values.push(Box::new(source_repo.clone()));
        param_idx += 1;
    }
    if let Some(ephemeral) = filter.ephemeral {
        where_clauses.push(format!("ephemeral = ?{param_idx}"));
        param_values.push(Box::new(ephemeral as i32));
        param_idx += 1;
    }

    // Exclude statuses / types.
    for status in &filter.exclude_status {
        where_clauses.push(format!("status != ?{param_idx}"));
        param_values.push(Box::new(status.as_str().to_string()));
        param_idx += 1;
    }
    for itype in &filter.exclude_types {
        where_clauses.push(format!("issue_type != ?{param_idx}"));
        param_values.push(Box::new(itype.as_str().to_string()));
        param_idx += 1;
    }

    // Filter by specific IDs.
    if !filter.ids.is_empty() {
        let placeholders: Vec<String> = filter
            .ids
            .iter()
            .enumerate()
            .map(|(i, _)| format!("?{}", param_idx + i))
            .collect();
        where_clauses.push(format!("id IN ({})", placeholders.join(",")));
        for id in &filter.ids {
            param_values.push(Box::new(id.clone()));
        }
        param_idx += filter.ids.len();
    }

    // Labels AND.
    for label in &filter.labels {
        where_clauses.push(format!(
            "EXISTS (SELECT 1 FROM labels WHERE labels.issue_id = issues.id AND labels.label = ?{param_idx})"
        ));
        param_values.push(Box::new(label.to_lowercase()));
        param_idx += 1;
    }

    // Labels OR.
    if !filter.labels_any.is_empty() {
        let placeholders: Vec<String> = filter
            .labels_any
            .iter()
            .enumerate()
            .map(|(i, _)| format!("?{}", param_idx + i))
            .collect();
        where_clauses.push(format!(
            "EXISTS (SELECT 1 FROM labels WHERE labels.issue_id = issues.id AND labels.label IN ({}))",
            placeholders.join(",")
        ));
        for label in &filter.labels_any {
            param_values.push(Box::new(label.to_lowercase()));
        }
        param_idx += filter.labels_any.len();
    }

    // No labels.
    if filter.no_labels {
        where_clauses
            .push("NOT EXISTS (SELECT 1 FROM labels WHERE labels.issue_id = issues.id)".to_string());
    }

    // Build final SQL.
    let where_sql = if where_clauses.is_empty() {
        String::new()
    } else {
        format!("WHERE {}", where_clauses.join(" AND "))
    };

    let limit_sql = filter
        .limit
        .map(|l| format!(" LIMIT {l}"))
        .unwrap_or_default();

    let sql = format!(
        "SELECT {ISSUE_COLUMNS} FROM issues {where_sql} ORDER BY updated_at DESC{limit_sql}"
    );

    let param_refs: Vec<&dyn rusqlite::types::ToSql> =
        param_values.iter().map(|p| p.as_ref()).collect();

    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt.query_map(param_refs.as_slice(), scan_issue)?;

    let mut issues = Vec::new();
    for row in rows {
        issues.push(row?);
    }

    let _ = param_idx;

    Ok(issues)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sqlite::store::SqliteStore;
    use beadslog_core::issue::IssueBuilder;

    fn test_store() -> SqliteStore {
        SqliteStore::open_in_memory().unwrap()
    }

    #[test]
    fn create_and_get_issue() {
        let store = test_store();
        let issue = IssueBuilder::new("Test issue")
            .id("bd-test1")
            .description("A test description")
            .priority(2)
            .build();

        store.create_issue_impl(&issue, "alice").unwrap();

        let got = store.get_issue_impl("bd-test1").unwrap();
        assert_eq!(got.title, "Test issue");
        assert_eq!(got.description, "A test description");
        assert_eq!(got.priority, 2);
        assert!(!got.content_hash.is_empty());
    }

    #[test]
    fn duplicate_create_is_conflict() {
        let store = test_store();
        let issue = IssueBuilder::new("Dup").id("bd-dup1").build();
        store.create_issue_impl(&issue, "alice").unwrap();
        let err = store.create_issue_impl(&issue, "alice").unwrap_err();
        assert!(err.is_conflict());
    }

    #[test]
    fn get_nonexistent_issue_returns_not_found() {
        let store = test_store();
        let err = store.get_issue_impl("bd-nope").unwrap_err();
        assert!(err.is_not_found());
    }

    #[test]
    fn update_issue_partial() {
        let store = test_store();
        let issue = IssueBuilder::new("Original title").id("bd-upd1").build();
        store.create_issue_impl(&issue, "alice").unwrap();

        let updates = IssueUpdates {
            title: Some("Updated title".into()),
            priority: Some(3),
            ..Default::default()
        };
        store.update_issue_impl("bd-upd1", &updates, "bob").unwrap();

        let got = store.get_issue_impl("bd-upd1").unwrap();
        assert_eq!(got.title, "Updated title");
        assert_eq!(got.priority, 3);
    }

    #[test]
    fn update_rejects_bad_priority() {
        let store = test_store();
        let issue = IssueBuilder::new("P").id("bd-pri1").build();
        store.create_issue_impl(&issue, "alice").unwrap();
        let updates = IssueUpdates {
            priority: Some(9),
            ..Default::default()
        };
        let err = store.update_issue_impl("bd-pri1", &updates, "a").unwrap_err();
        assert!(matches!(err, StorageError::Invalid(_)));
    }

    #[test]
    fn updated_at_never_decreases() {
        let store = test_store();
        let future = Utc::now() + chrono::Duration::hours(1);
        let issue = IssueBuilder::new("Future")
            .id("bd-fut1")
            .updated_at(future)
            .build();
        store.create_issue_impl(&issue, "alice").unwrap();

        let updates = IssueUpdates {
            notes: Some("touched".into()),
            ..Default::default()
        };
        store.update_issue_impl("bd-fut1", &updates, "alice").unwrap();

        let got = store.get_issue_impl("bd-fut1").unwrap();
        assert!(got.updated_at >= future - chrono::Duration::milliseconds(1));
    }

    #[test]
    fn close_issue_sets_close_state() {
        let store = test_store();
        let issue = IssueBuilder::new("To close").id("bd-close1").build();
        store.create_issue_impl(&issue, "alice").unwrap();

        store
            .close_issue_impl("bd-close1", "completed", "alice", "session-1")
            .unwrap();

        let got = store.get_issue_impl("bd-close1").unwrap();
        assert_eq!(got.status, Status::Closed);
        assert!(got.closed_at.is_some());
        assert_eq!(got.close_reason, "completed");
        assert_eq!(got.closed_by_session, "session-1");
    }

    #[test]
    fn delete_issue_creates_tombstone() {
        let store = test_store();
        let issue = IssueBuilder::new("To delete")
            .id("bd-del1")
            .issue_type(beadslog_core::enums::IssueType::Bug)
            .build();
        store.create_issue_impl(&issue, "alice").unwrap();

        store
            .delete_issue_impl("bd-del1", "obsolete", "alice")
            .unwrap();

        let got = store.get_issue_impl("bd-del1").unwrap();
        assert!(got.is_tombstone());
        assert!(got.deleted_at.is_some());
        assert_eq!(got.delete_reason, "obsolete");
        assert_eq!(got.original_type, "bug");
    }

    #[test]
    fn tombstone_is_immutable() {
        let store = test_store();
        let issue = IssueBuilder::new("Gone").id("bd-gone1").build();
        store.create_issue_impl(&issue, "alice").unwrap();
        store.delete_issue_impl("bd-gone1", "", "alice").unwrap();

        let updates = IssueUpdates {
            title: Some("Resurrected".into()),
            ..Default::default()
        };
        let err = store
            .update_issue_impl("bd-gone1", &updates, "alice")
            .unwrap_err();
        assert!(matches!(err, StorageError::Immutable { .. }));
    }

    #[test]
    fn search_issues_by_text() {
        let store = test_store();
        let issue1 = IssueBuilder::new("Fix login bug")
            .id("bd-s1")
            .description("Users cannot log in")
            .build();
        let issue2 = IssueBuilder::new("Add dashboard")
            .id("bd-s2")
            .description("New dashboard feature")
            .build();
        store.create_issue_impl(&issue1, "alice").unwrap();
        store.create_issue_impl(&issue2, "alice").unwrap();

        let results = store
            .search_issues_impl("login", &IssueFilter::default())
            .unwrap();
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].id, "bd-s1");
    }

    #[test]
    fn search_issues_by_priority_range() {
        let store = test_store();
        for (id, pri) in [("bd-p0", 0), ("bd-p2", 2), ("bd-p4", 4)] {
            let issue = IssueBuilder::new(id).id(id).priority(pri).build();
            store.create_issue_impl(&issue, "alice").unwrap();
        }

        let filter = IssueFilter {
            priority_min: Some(1),
            priority_max: Some(3),
            ..Default::default()
        };
        let results = store.search_issues_impl("", &filter).unwrap();
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].id, "bd-p2");
    }

    #[test]
    fn resolve_id_exact_and_substring() {
        let store = test_store();
        let issue = IssueBuilder::new("A").id("bd-xyz89").build();
        store.create_issue_impl(&issue, "alice").unwrap();

        assert_eq!(store.resolve_id_impl("bd-xyz89").unwrap(), "bd-xyz89");
        assert_eq!(store.resolve_id_impl("xyz").unwrap(), "bd-xyz89");
    }

    #[test]
    fn resolve_id_ambiguous() {
        let store = test_store();
        for id in ["bd-abc11", "bd-abc22"] {
            let issue = IssueBuilder::new(id).id(id).build();
            store.create_issue_impl(&issue, "alice").unwrap();
        }
        let err = store.resolve_id_impl("abc").unwrap_err();
        match err {
            StorageError::AmbiguousId { matches, .. } => assert_eq!(matches.len(), 2),
            other => panic!("expected AmbiguousId, got {other:?}"),
        }
    }
}
