//! Readiness queries: ready work, blocked issues, unblock-by-close.

use std::collections::{HashSet, VecDeque};

use chrono::Utc;
use rusqlite::{Connection, params};

use beadslog_core::filter::WorkFilter;
use beadslog_core::issue::Issue;

use crate::error::Result;
use crate::sqlite::issues::{ISSUE_COLUMNS, format_datetime, get_issue_on_conn, scan_issue};
use crate::sqlite::store::SqliteStore;
use crate::traits::{BlockedIssue, Statistics};

/// SQL fragment: the issue aliased `i` has at least one unresolved blocker.
///
/// A blocker is unresolved while it is neither closed nor tombstoned.
const HAS_OPEN_BLOCKER: &str = "EXISTS (
    SELECT 1 FROM dependencies d
    INNER JOIN issues blocker ON blocker.id = d.depends_on_id
    WHERE d.issue_id = i.id
      AND d.type = 'blocks'
      AND blocker.status NOT IN ('closed', 'tombstone')
)";

impl SqliteStore {
    /// Returns issues that are ready to work on.
    ///
    /// An issue is ready if:
    /// - status is "open"
    /// - `defer_until` is absent or in the past
    /// - it has no unresolved blocking dependency
    ///
    /// Sorted by (priority asc, updated_at desc).
    pub fn get_ready_work_impl(&self, filter: &WorkFilter) -> Result<Vec<Issue>> {
        let conn = self.lock_conn()?;
        let now_str = format_datetime(&Utc::now());

        let mut where_clauses: Vec<String> = vec!["i.status = 'open'".to_string()];
        let mut param_values: Vec<Box<dyn rusqlite::types::ToSql>> = Vec::new();
        let mut param_idx = 1;

        where_clauses.push(format!("NOT {HAS_OPEN_BLOCKER}"));

        if !filter.include_deferred {
            where_clauses.push(format!(
                "(i.defer_until IS NULL OR i.defer_until <= ?{param_idx})"
            ));
            param_values.push(Box::new(now_str.clone()));
            param_idx += 1;
        }

        if !filter.include_ephemeral {
            where_clauses.push("(i.ephemeral = 0 OR i.ephemeral IS NULL)".to_string());
        }

        // Optional filters.
        if let Some(ref issue_type) = filter.issue_type {
            where_clauses.push(format!("i.issue_type = ?{param_idx}"));
            param_values.push(Box::new(issue_type.as_str().to_string()));
            param_idx += 1;
        }
        if let Some(priority) = filter.priority {
            where_clauses.push(format!("i.priority = ?{param_idx}"));
            param_values.push(Box::new(priority));
            param_idx += 1;
        }
        if let Some(ref assignee) = filter.assignee {
            where_clauses.push(format!("i.assignee = ?{param_idx}"));
            param_values.push(Box::new(assignee.clone()));
            param_idx += 1;
        }
        if filter.unassigned {
            where_clauses.push("(i.assignee IS NULL OR i.assignee = '')".to_string());
        }

        // Label filters (AND).
        for label in &filter.labels {
            where_clauses.push(format!(
                "EXISTS (SELECT 1 FROM labels WHERE labels.issue_id = i.id AND labels.label = ?{param_idx})"
            ));
            param_values.push(Box::new(label.to_lowercase()));
            param_idx += 1;
        }

        // Label filters (OR).
        if !filter.labels_any.is_empty() {
            let placeholders: Vec<String> = filter
                .labels_any
                .iter()
                .enumerate()
                .map(|(j, _)| format!("?{}", param_idx + j))
                .collect();
            where_clauses.push(format!(
                "EXISTS (SELECT 1 FROM labels WHERE labels.issue_id = i.id AND labels.label IN ({}))",
                placeholders.join(",")
            ));
            for label in &filter.labels_any {
                param_values.push(Box::new(label.to_lowercase()));
            }
            param_idx += filter.labels_any.len();
        }

        let where_sql = where_clauses.join(" AND ");
        let limit_sql = filter
            .limit
            .map(|l| format!(" LIMIT {l}"))
            .unwrap_or_default();

        let sql = format!(
            "SELECT {ISSUE_COLUMNS} FROM issues i WHERE {where_sql}
             ORDER BY i.priority ASC, i.updated_at DESC{limit_sql}"
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

    /// Returns issues that have at least one unresolved blocking dependency.
    pub fn get_blocked_issues_impl(&self, filter: &WorkFilter) -> Result<Vec<BlockedIssue>> {
        let conn = self.lock_conn()?;

        let mut where_clauses: Vec<String> = vec![
            "i.status NOT IN ('closed', 'tombstone')".to_string(),
            HAS_OPEN_BLOCKER.to_string(),
        ];
        let mut param_values: Vec<Box<dyn rusqlite::types::ToSql>> = Vec::new();
        let mut param_idx = 1;

        if let Some(ref assignee) = filter.assignee {
            where_clauses.push(format!("i.assignee = ?{param_idx}"));
            param_values.push(Box::new(assignee.clone()));
            param_idx += 1;
        }
        if let Some(priority) = filter.priority {
            where_clauses.push(format!("i.priority = ?{param_idx}"));
            param_values.push(Box::new(priority));
            param_idx += 1;
        }

        let where_sql = where_clauses.join(" AND ");
        let limit_sql = filter
            .limit
            .map(|l| format!(" LIMIT {l}"))
            .unwrap_or_default();

        let sql = format!(
            "SELECT {ISSUE_COLUMNS},
                    (SELECT COUNT(*)
                     FROM dependencies d
                     INNER JOIN issues blocker ON blocker.id = d.depends_on_id
                     WHERE d.issue_id = i.id
                       AND d.type = 'blocks'
                       AND blocker.status NOT IN ('closed', 'tombstone')
                    ) AS blocked_by_count
             FROM issues i
             WHERE {where_sql}
             ORDER BY i.priority ASC, i.updated_at DESC{limit_sql}"
        );

        let param_refs: Vec<&dyn rusqlite::types::ToSql> =
            param_values.iter().map(|p| p.as_ref()).collect();

        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt.query_map(param_refs.as_slice(), |row| {
            let issue = scan_issue(row)?;
            let blocked_by_count: i32 = row.get("blocked_by_count")?;
            Ok(BlockedIssue {
                issue,
                blocked_by_count,
            })
        })?;

        let mut result = Vec::new();
        for row in rows {
            result.push(row?);
        }

        let _ = param_idx;
        Ok(result)
    }

    /// Returns `true` if the issue has an unresolved blocking dependency.
    pub fn is_blocked_impl(&self, id: &str) -> Result<bool> {
        let conn = self.lock_conn()?;
        is_blocked_on_conn(&conn, id)
    }

    /// Returns issues transitively blocked by `id` that are now ready.
    pub fn get_newly_unblocked_by_close_impl(&self, id: &str) -> Result<Vec<Issue>> {
        let conn = self.lock_conn()?;
        newly_unblocked_by_close_on_conn(&conn, id)
    }

    /// Returns aggregate statistics.
    pub fn get_statistics_impl(&self) -> Result<Statistics> {
        let conn = self.lock_conn()?;
        let mut stats = Statistics::default();

        let count_where = |clause: &str| -> Result<i64> {
            Ok(conn.query_row(
                &format!("SELECT COUNT(*) FROM issues {clause}"),
                [],
                |row| row.get(0),
            )?)
        };

        stats.total_issues = count_where("")?;
        stats.open_issues = count_where("WHERE status = 'open'")?;
        stats.closed_issues = count_where("WHERE status = 'closed'")?;
        stats.in_progress_issues = count_where("WHERE status = 'in_progress'")?;
        stats.blocked_issues = count_where("WHERE status = 'blocked'")?;
        stats.deferred_issues = count_where("WHERE status = 'deferred'")?;
        stats.tombstone_issues = count_where("WHERE status = 'tombstone'")?;

        // By type.
        {
            let mut stmt = conn.prepare(
                "SELECT issue_type, COUNT(*) FROM issues GROUP BY issue_type ORDER BY COUNT(*) DESC",
            )?;
            let rows =
                stmt.query_map([], |row| Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)?)))?;
            for row in rows {
                stats.by_type.push(row?);
            }
        }

        // By priority.
        {
            let mut stmt = conn.prepare(
                "SELECT priority, COUNT(*) FROM issues GROUP BY priority ORDER BY priority ASC",
            )?;
            let rows =
                stmt.query_map([], |row| Ok((row.get::<_, i32>(0)?, row.get::<_, i64>(1)?)))?;
            for row in rows {
                stats.by_priority.push(row?);
            }
        }

        Ok(stats)
    }
}

// ---------------------------------------------------------------------------
// Connection-level helpers
// ---------------------------------------------------------------------------

/// Returns `true` if `id` has an unresolved blocking dependency.
pub(crate) fn is_blocked_on_conn(conn: &Connection, id: &str) -> Result<bool> {
    let count: i32 = conn.query_row(
        "SELECT COUNT(*) FROM dependencies d
         INNER JOIN issues blocker ON blocker.id = d.depends_on_id
         WHERE d.issue_id = ?1
           AND d.type = 'blocks'
           AND blocker.status NOT IN ('closed', 'tombstone')",
        params![id],
        |row| row.get(0),
    )?;
    Ok(count > 0)
}

/// Returns `true` if the issue is open, undeferred, and unblocked.
pub(crate) fn is_ready_on_conn(conn: &Connection, issue: &Issue) -> Result<bool> {
    if issue.status.as_str() != "open" {
        return Ok(false);
    }
    if issue.is_deferred_at(Utc::now()) {
        return Ok(false);
    }
    Ok(!is_blocked_on_conn(conn, &issue.id)?)
}

/// Returns issues that were blocked (directly or transitively) by `closed_id`
/// and are ready now that it is resolved.
///
/// BFS over reverse `blocks` edges; every reached dependent is re-checked
/// against the full readiness predicate so intermediate still-open blockers
/// keep their dependents out of the result.
pub(crate) fn newly_unblocked_by_close_on_conn(
    conn: &Connection,
    closed_id: &str,
) -> Result<Vec<Issue>> {
    let mut visited: HashSet<String> = HashSet::new();
    let mut queue: VecDeque<String> = VecDeque::new();
    queue.push_back(closed_id.to_string());
    visited.insert(closed_id.to_string());

    let mut unblocked = Vec::new();

    while let Some(current) = queue.pop_front() {
        let mut stmt = conn.prepare_cached(
            "SELECT issue_id FROM dependencies WHERE depends_on_id = ?1 AND type = 'blocks'",
        )?;
        let dependents: Vec<String> = stmt
            .query_map(params![current], |row| row.get::<_, String>(0))?
            .collect::<rusqlite::Result<_>>()?;

        for dep_id in dependents {
            if !visited.insert(dep_id.clone()) {
                continue;
            }
            queue.push_back(dep_id.clone());

            if let Ok(issue) = get_issue_on_conn(conn, &dep_id) {
                if is_ready_on_conn(conn, &issue)? {
                    unblocked.push(issue);
                }
            }
        }
    }

    unblocked.sort_by(|a, b| {
        a.priority
            .cmp(&b.priority)
            .then(b.updated_at.cmp(&a.updated_at))
    });
    Ok(unblocked)
}

#[cfg(test)]
mod tests {
    use super::*;
    use beadslog_core::dependency::Dependency;
    use beadslog_core::enums::{DependencyType, Status};
    use beadslog_core::issue::IssueBuilder;

    fn test_store() -> SqliteStore {
        SqliteStore::open_in_memory().unwrap()
    }

    fn make_issue(store: &SqliteStore, id: &str, priority: i32) {
        let issue = IssueBuilder::new(id).id(id).priority(priority).build();
        store.create_issue_impl(&issue, "alice").unwrap();
    }

    fn block(store: &SqliteStore, blocked: &str, blocker: &str) {
        store
            .add_dependency_impl(
                &Dependency::new(blocked, blocker, DependencyType::Blocks),
                "alice",
            )
            .unwrap();
    }

    #[test]
    fn ready_work_excludes_blocked() {
        let store = test_store();
        make_issue(&store, "bd-blk1", 2);
        make_issue(&store, "bd-blk2", 2);
        make_issue(&store, "bd-rdy1", 2);
        block(&store, "bd-blk2", "bd-blk1");

        let work = store.get_ready_work_impl(&WorkFilter::default()).unwrap();
        let ids: Vec<&str> = work.iter().map(|i| i.id.as_str()).collect();
        // blocker is ready (it blocks others but is not itself blocked).
        assert!(ids.contains(&"bd-blk1"));
        assert!(ids.contains(&"bd-rdy1"));
        assert!(!ids.contains(&"bd-blk2"));
    }

    #[test]
    fn ready_work_sorted_priority_then_recency() {
        let store = test_store();
        make_issue(&store, "bd-lo", 3);
        make_issue(&store, "bd-hi", 0);
        make_issue(&store, "bd-mid", 1);

        let work = store.get_ready_work_impl(&WorkFilter::default()).unwrap();
        let ids: Vec<&str> = work.iter().map(|i| i.id.as_str()).collect();
        assert_eq!(ids, vec!["bd-hi", "bd-mid", "bd-lo"]);
    }

    #[test]
    fn deferred_issue_not_ready_until_due() {
        let store = test_store();
        let future = Utc::now() + chrono::Duration::hours(2);
        let issue = IssueBuilder::new("Deferred")
            .id("bd-def1")
            .defer_until(future)
            .build();
        store.create_issue_impl(&issue, "alice").unwrap();

        let work = store.get_ready_work_impl(&WorkFilter::default()).unwrap();
        assert!(work.is_empty());

        let with_deferred = store
            .get_ready_work_impl(&WorkFilter {
                include_deferred: true,
                ..Default::default()
            })
            .unwrap();
        assert_eq!(with_deferred.len(), 1);
    }

    #[test]
    fn tombstoned_blocker_does_not_block() {
        let store = test_store();
        make_issue(&store, "bd-t1", 2);
        make_issue(&store, "bd-t2", 2);
        block(&store, "bd-t2", "bd-t1");
        store.delete_issue_impl("bd-t1", "", "alice").unwrap();

        assert!(!store.is_blocked_impl("bd-t2").unwrap());
        let work = store.get_ready_work_impl(&WorkFilter::default()).unwrap();
        let ids: Vec<&str> = work.iter().map(|i| i.id.as_str()).collect();
        assert!(ids.contains(&"bd-t2"));
    }

    #[test]
    fn close_unblocks_dependent() {
        let store = test_store();
        // S1: A (priority 1), B (priority 2) blocked by A.
        let a = IssueBuilder::new("A").id("bd-a").priority(1).build();
        let b = IssueBuilder::new("B").id("bd-b").priority(2).build();
        store.create_issue_impl(&a, "alice").unwrap();
        store.create_issue_impl(&b, "alice").unwrap();
        block(&store, "bd-b", "bd-a");

        let ready: Vec<String> = store
            .get_ready_work_impl(&WorkFilter::default())
            .unwrap()
            .into_iter()
            .map(|i| i.id)
            .collect();
        assert_eq!(ready, vec!["bd-a"]);

        let unblocked = store
            .close_issue_impl("bd-a", "done", "alice", "")
            .unwrap();
        assert_eq!(unblocked.len(), 1);
        assert_eq!(unblocked[0].id, "bd-b");

        let ready: Vec<String> = store
            .get_ready_work_impl(&WorkFilter::default())
            .unwrap()
            .into_iter()
            .map(|i| i.id)
            .collect();
        assert_eq!(ready, vec!["bd-b"]);

        let newly = store.get_newly_unblocked_by_close_impl("bd-a").unwrap();
        assert_eq!(newly.len(), 1);
        assert_eq!(newly[0].id, "bd-b");
    }

    #[test]
    fn close_does_not_unblock_through_open_intermediate() {
        let store = test_store();
        make_issue(&store, "bd-x", 2);
        make_issue(&store, "bd-y", 2);
        make_issue(&store, "bd-z", 2);
        // z blocked by y, y blocked by x. Closing x unblocks y but not z.
        block(&store, "bd-y", "bd-x");
        block(&store, "bd-z", "bd-y");

        let unblocked = store.close_issue_impl("bd-x", "done", "alice", "").unwrap();
        let ids: Vec<&str> = unblocked.iter().map(|i| i.id.as_str()).collect();
        assert_eq!(ids, vec!["bd-y"]);
    }

    #[test]
    fn blocked_issues_report_counts() {
        let store = test_store();
        make_issue(&store, "bd-w1", 2);
        make_issue(&store, "bd-w2", 2);
        make_issue(&store, "bd-w3", 2);
        block(&store, "bd-w3", "bd-w1");
        block(&store, "bd-w3", "bd-w2");

        let blocked = store.get_blocked_issues_impl(&WorkFilter::default()).unwrap();
        assert_eq!(blocked.len(), 1);
        assert_eq!(blocked[0].issue.id, "bd-w3");
        assert_eq!(blocked[0].blocked_by_count, 2);
    }

    #[test]
    fn statistics_counts_statuses() {
        let store = test_store();
        make_issue(&store, "bd-st1", 2);
        let closed = IssueBuilder::new("Closed")
            .id("bd-st2")
            .status(Status::Closed)
            .closed_at(Utc::now())
            .build();
        store.create_issue_impl(&closed, "alice").unwrap();
        store.delete_issue_impl("bd-st1", "", "alice").unwrap();

        let stats = store.get_statistics_impl().unwrap();
        assert_eq!(stats.total_issues, 2);
        assert_eq!(stats.closed_issues, 1);
        assert_eq!(stats.tombstone_issues, 1);
    }
}
