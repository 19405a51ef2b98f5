//! Dependency CRUD operations and cycle detection for [`SqliteStore`].

use std::collections::{HashSet, VecDeque};

use chrono::Utc;
use rusqlite::{Connection, params};

use beadslog_core::dependency::Dependency;
use beadslog_core::enums::{DependencyType, EventType};
use beadslog_core::issue::Issue;

use crate::error::{Result, StorageError};
use crate::sqlite::issues::{
    ISSUE_COLUMNS_PREFIXED, emit_event, format_datetime, get_issue_on_conn, scan_issue,
};
use crate::sqlite::store::SqliteStore;

// ---------------------------------------------------------------------------
// Connection-level helpers
// ---------------------------------------------------------------------------

/// Inserts a dependency on the given connection.
///
/// Enforces `(issue_id, depends_on_id, type)` uniqueness and endpoint
/// existence: the target must be a non-tombstone issue or an `external:`
/// reference. Blocking edge types are cycle-checked; `relates-to` inserts
/// the symmetric reverse edge as well.
pub(crate) fn add_dependency_on_conn(
    conn: &Connection,
    dep: &Dependency,
    actor: &str,
) -> Result<()> {
    // Source endpoint must exist locally.
    let source = get_issue_on_conn(conn, &dep.issue_id)?;
    if source.is_tombstone() {
        return Err(StorageError::Immutable {
            id: dep.issue_id.clone(),
        });
    }

    // Target endpoint: local non-tombstone issue or external reference.
    if !dep.is_external() {
        let target = get_issue_on_conn(conn, &dep.depends_on_id)?;
        if target.is_tombstone() {
            return Err(StorageError::conflict(format!(
                "cannot depend on tombstoned issue {}",
                dep.depends_on_id
            )));
        }
    }

    let already: i32 = conn.query_row(
        "SELECT COUNT(*) FROM dependencies WHERE issue_id = ?1 AND depends_on_id = ?2 AND type = ?3",
        params![dep.issue_id, dep.depends_on_id, dep.dep_type.as_str()],
        |row| row.get(0),
    )?;
    if already > 0 {
        return Err(StorageError::conflict(format!(
            "dependency {} -> {} ({}) already exists",
            dep.issue_id,
            dep.depends_on_id,
            dep.dep_type
        )));
    }

    // Cycle detection for acyclic dependency types.
    if dep.dep_type.requires_acyclic() && !dep.is_external() {
        detect_cycle(conn, &dep.issue_id, &dep.depends_on_id)?;
    }

    insert_edge(conn, dep)?;
    if dep.dep_type.is_symmetric() && !dep.is_external() {
        let reverse = Dependency {
            issue_id: dep.depends_on_id.clone(),
            depends_on_id: dep.issue_id.clone(),
            ..dep.clone()
        };
        // The forward uniqueness check covers the pair: a symmetric edge is
        // only ever written together with its mirror.
        insert_edge(conn, &reverse)?;
    }

    let now_str = format_datetime(&Utc::now());
    emit_event(
        conn,
        &dep.issue_id,
        EventType::DependencyAdded,
        actor,
        None,
        Some(&dep.depends_on_id),
        Some(dep.dep_type.as_str()),
        &now_str,
    )?;

    Ok(())
}

fn insert_edge(conn: &Connection, dep: &Dependency) -> Result<()> {
    let created_at_str = format_datetime(&dep.created_at);
    conn.execute(
        "INSERT OR REPLACE INTO dependencies
         (issue_id, depends_on_id, type, created_at, created_by, metadata, thread_id)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
        params![
            dep.issue_id,
            dep.depends_on_id,
            dep.dep_type.as_str(),
            created_at_str,
            dep.created_by,
            dep.metadata,
            dep.thread_id,
        ],
    )?;
    Ok(())
}

/// Removes a dependency on the given connection.
///
/// Removes every edge between the endpoints regardless of type, plus the
/// mirror edge of any symmetric type.
pub(crate) fn remove_dependency_on_conn(
    conn: &Connection,
    issue_id: &str,
    depends_on_id: &str,
    actor: &str,
) -> Result<()> {
    let symmetric: i32 = conn.query_row(
        "SELECT COUNT(*) FROM dependencies
         WHERE issue_id = ?1 AND depends_on_id = ?2 AND type = 'relates-to'",
        params![issue_id, depends_on_id],
        |row| row.get(0),
    )?;

    let affected = conn.execute(
        "DELETE FROM dependencies WHERE issue_id = ?1 AND depends_on_id = ?2",
        params![issue_id, depends_on_id],
    )?;

    if affected == 0 {
        return Err(StorageError::not_found(
            "dependency",
            format!("{issue_id} -> {depends_on_id}"),
        ));
    }

    if symmetric > 0 {
        conn.execute(
            "DELETE FROM dependencies
             WHERE issue_id = ?1 AND depends_on_id = ?2 AND type = 'relates-to'",
            params![depends_on_id, issue_id],
        )?;
    }

    let now_str = format_datetime(&Utc::now());
    emit_event(
        conn,
        issue_id,
        EventType::DependencyRemoved,
        actor,
        Some(depends_on_id),
        None,
        None,
        &now_str,
    )?;

    Ok(())
}

/// Returns raw dependency records for an issue on the given connection.
pub(crate) fn get_dependency_records_on_conn(
    conn: &Connection,
    issue_id: &str,
) -> Result<Vec<Dependency>> {
    let mut stmt = conn.prepare(
        "SELECT issue_id, depends_on_id, type, created_at, created_by, metadata, thread_id
         FROM dependencies WHERE issue_id = ?1 ORDER BY depends_on_id, type",
    )?;
    let rows = stmt.query_map(params![issue_id], scan_dependency)?;

    let mut deps = Vec::new();
    for row in rows {
        deps.push(row?);
    }
    Ok(deps)
}

pub(crate) fn scan_dependency(row: &rusqlite::Row<'_>) -> rusqlite::Result<Dependency> {
    Ok(Dependency {
        issue_id: row.get("issue_id")?,
        depends_on_id: row.get("depends_on_id")?,
        dep_type: DependencyType::from(row.get::<_, String>("type")?.as_str()),
        created_at: crate::sqlite::issues::parse_datetime(&row.get::<_, String>("created_at")?),
        created_by: row.get("created_by")?,
        metadata: row.get("metadata")?,
        thread_id: row.get("thread_id")?,
    })
}

// ---------------------------------------------------------------------------
// Cycle detection
// ---------------------------------------------------------------------------

/// Detects whether adding an edge `issue_id -> depends_on_id` would create a
/// cycle in the acyclic dependency graph. Uses BFS from `depends_on_id` to
/// see if `issue_id` is reachable.
fn detect_cycle(conn: &Connection, issue_id: &str, depends_on_id: &str) -> Result<()> {
    let mut visited: HashSet<String> = HashSet::new();
    let mut queue: VecDeque<String> = VecDeque::new();
    queue.push_back(depends_on_id.to_string());

    while let Some(current) = queue.pop_front() {
        if current == issue_id {
            return Err(StorageError::conflict(format!(
                "dependency {issue_id} -> {depends_on_id} would create a cycle"
            )));
        }
        if !visited.insert(current.clone()) {
            continue;
        }
        let mut stmt = conn.prepare_cached(
            "SELECT depends_on_id FROM dependencies
             WHERE issue_id = ?1 AND type IN ('blocks', 'parent-child')",
        )?;
        let rows = stmt.query_map(params![current], |row| row.get::<_, String>(0))?;
        for row in rows {
            let next = row?;
            if !visited.contains(&next) {
                queue.push_back(next);
            }
        }
    }

    Ok(())
}

// ---------------------------------------------------------------------------
// SqliteStore methods
// ---------------------------------------------------------------------------

impl SqliteStore {
    /// Adds a dependency edge.
    pub fn add_dependency_impl(&self, dep: &Dependency, actor: &str) -> Result<()> {
        let conn = self.lock_conn()?;
        add_dependency_on_conn(&conn, dep, actor)
    }

    /// Removes a dependency edge.
    pub fn remove_dependency_impl(
        &self,
        issue_id: &str,
        depends_on_id: &str,
        actor: &str,
    ) -> Result<()> {
        let conn = self.lock_conn()?;
        remove_dependency_on_conn(&conn, issue_id, depends_on_id, actor)
    }

    /// Returns raw dependency records for an issue.
    pub fn get_dependency_records_impl(&self, issue_id: &str) -> Result<Vec<Dependency>> {
        let conn = self.lock_conn()?;
        get_dependency_records_on_conn(&conn, issue_id)
    }

    /// Returns issues that the given issue depends on.
    pub fn get_dependencies_impl(&self, issue_id: &str) -> Result<Vec<Issue>> {
        let conn = self.lock_conn()?;
        let sql = format!(
            "SELECT {ISSUE_COLUMNS_PREFIXED} FROM issues
             INNER JOIN dependencies d ON issues.id = d.depends_on_id
             WHERE d.issue_id = ?1"
        );
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt.query_map(params![issue_id], scan_issue)?;
        let mut issues = Vec::new();
        for row in rows {
            issues.push(row?);
        }
        Ok(issues)
    }

    /// Returns issues that depend on the given issue.
    pub fn get_dependents_impl(&self, issue_id: &str) -> Result<Vec<Issue>> {
        let conn = self.lock_conn()?;
        let sql = format!(
            "SELECT {ISSUE_COLUMNS_PREFIXED} FROM issues
             INNER JOIN dependencies d ON issues.id = d.issue_id
             WHERE d.depends_on_id = ?1"
        );
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt.query_map(params![issue_id], scan_issue)?;
        let mut issues = Vec::new();
        for row in rows {
            issues.push(row?);
        }
        Ok(issues)
    }
}
