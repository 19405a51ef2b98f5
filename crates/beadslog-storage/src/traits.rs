//! Storage and Transaction traits -- the public API for issue persistence.
//!
//! Consumers depend on these traits rather than on concrete implementations
//! so that alternative backends (mocks, proxies) can be substituted. The
//! daemon dispatch table and the sync engine both work through [`Storage`].

use chrono::{DateTime, Utc};

use beadslog_core::comment::{Comment, Event};
use beadslog_core::dependency::Dependency;
use beadslog_core::enums::{IssueType, Status};
use beadslog_core::filter::{IssueFilter, WorkFilter};
use beadslog_core::issue::Issue;

use crate::error::Result;

// ---------------------------------------------------------------------------
// View / helper types
// ---------------------------------------------------------------------------

/// Typed partial-update struct for issues.
///
/// Only `Some` fields are applied; `None` fields are left unchanged.
/// `Option<Option<T>>` fields distinguish "leave alone" (outer `None`)
/// from "clear" (inner `None`).
#[derive(Debug, Clone, Default)]
pub struct IssueUpdates {
    pub title: Option<String>,
    pub description: Option<String>,
    pub design: Option<String>,
    pub acceptance_criteria: Option<String>,
    pub notes: Option<String>,
    pub status: Option<Status>,
    pub priority: Option<i32>,
    pub issue_type: Option<IssueType>,
    pub assignee: Option<String>,
    pub estimated_minutes: Option<Option<i32>>,
    pub external_ref: Option<Option<String>>,
    pub close_reason: Option<String>,
    pub closed_by_session: Option<String>,
    pub due_at: Option<Option<DateTime<Utc>>>,
    pub defer_until: Option<Option<DateTime<Utc>>>,
    pub ephemeral: Option<bool>,
    pub source_repo: Option<String>,
    pub await_type: Option<String>,
    pub await_id: Option<String>,
    pub timeout: Option<Option<std::time::Duration>>,
}

/// An issue that is blocked, along with the count of open blockers.
#[derive(Debug, Clone)]
pub struct BlockedIssue {
    /// The blocked issue.
    pub issue: Issue,
    /// Number of unresolved blocking dependencies.
    pub blocked_by_count: i32,
}

/// Aggregate statistics about the issue database.
#[derive(Debug, Clone, Default)]
pub struct Statistics {
    pub total_issues: i64,
    pub open_issues: i64,
    pub closed_issues: i64,
    pub in_progress_issues: i64,
    pub blocked_issues: i64,
    pub deferred_issues: i64,
    pub tombstone_issues: i64,

    /// Breakdown by issue type: `(type_name, count)`.
    pub by_type: Vec<(String, i64)>,
    /// Breakdown by priority: `(priority, count)`.
    pub by_priority: Vec<(i32, i64)>,
}

// ---------------------------------------------------------------------------
// Storage trait
// ---------------------------------------------------------------------------

/// Primary storage interface for issue persistence.
pub trait Storage: Send + Sync {
    // -- Issue CRUD ----------------------------------------------------------

    /// Creates a new issue and emits a "create" event. Fails with a
    /// conflict if the ID is already present.
    fn create_issue(&self, issue: &Issue, actor: &str) -> Result<()>;

    /// Creates multiple issues in a single transaction.
    fn create_issues(&self, issues: &[Issue], actor: &str) -> Result<()>;

    /// Retrieves an issue by its ID.
    fn get_issue(&self, id: &str) -> Result<Issue>;

    /// Retrieves multiple issues by their IDs.
    fn get_issues_by_ids(&self, ids: &[String]) -> Result<Vec<Issue>>;

    /// Returns all issues, tombstones included.
    fn get_all_issues(&self) -> Result<Vec<Issue>>;

    /// Applies partial updates to an issue. Tombstones are immutable.
    fn update_issue(&self, id: &str, updates: &IssueUpdates, actor: &str) -> Result<()>;

    /// Rewrites an issue's ID, including dependency endpoints and
    /// label/comment/event foreign keys. Used only by prefix operations.
    fn update_issue_id(&self, old_id: &str, new_id: &str, actor: &str) -> Result<()>;

    /// Closes an issue and returns the issues newly unblocked by the close.
    fn close_issue(
        &self,
        id: &str,
        reason: &str,
        actor: &str,
        session: &str,
    ) -> Result<Vec<Issue>>;

    /// Soft-deletes an issue by transitioning it to a tombstone.
    fn delete_issue(&self, id: &str, reason: &str, actor: &str) -> Result<()>;

    /// Searches issues by text query and optional filter.
    fn search_issues(&self, query: &str, filter: &IssueFilter) -> Result<Vec<Issue>>;

    /// Resolves a partial ID to a full ID, failing on ambiguity.
    fn resolve_id(&self, partial: &str) -> Result<String>;

    // -- Dependencies --------------------------------------------------------

    /// Adds a dependency edge. `relates-to` inserts the symmetric pair.
    fn add_dependency(&self, dep: &Dependency, actor: &str) -> Result<()>;

    /// Removes a dependency edge (both directions for `relates-to`).
    fn remove_dependency(&self, issue_id: &str, depends_on_id: &str, actor: &str) -> Result<()>;

    /// Returns raw dependency records for an issue.
    fn get_dependency_records(&self, issue_id: &str) -> Result<Vec<Dependency>>;

    /// Returns the issues that the given issue depends on.
    fn get_dependencies(&self, issue_id: &str) -> Result<Vec<Issue>>;

    /// Returns the issues that depend on the given issue.
    fn get_dependents(&self, issue_id: &str) -> Result<Vec<Issue>>;

    // -- Labels --------------------------------------------------------------

    /// Adds a label (normalized lowercase) to an issue.
    fn add_label(&self, issue_id: &str, label: &str, actor: &str) -> Result<()>;

    /// Removes a label from an issue.
    fn remove_label(&self, issue_id: &str, label: &str, actor: &str) -> Result<()>;

    /// Returns all labels for an issue.
    fn get_labels(&self, issue_id: &str) -> Result<Vec<String>>;

    /// Returns labels for many issues in one query (avoids N+1).
    fn get_labels_for_issues(
        &self,
        ids: &[String],
    ) -> Result<std::collections::HashMap<String, Vec<String>>>;

    // -- Work queries --------------------------------------------------------

    /// Returns open, undeferred issues with no unresolved blocking
    /// dependency, sorted by (priority asc, updated_at desc).
    fn get_ready_work(&self, filter: &WorkFilter) -> Result<Vec<Issue>>;

    /// Returns issues that have at least one unresolved blocking dependency.
    fn get_blocked_issues(&self, filter: &WorkFilter) -> Result<Vec<BlockedIssue>>;

    /// Returns `true` if the issue has an unresolved blocking dependency.
    fn is_blocked(&self, id: &str) -> Result<bool>;

    /// Returns issues transitively blocked by `id` that are now ready.
    fn get_newly_unblocked_by_close(&self, id: &str) -> Result<Vec<Issue>>;

    // -- Comments ------------------------------------------------------------

    /// Appends a comment and returns the created record.
    fn add_comment(&self, issue_id: &str, author: &str, text: &str) -> Result<Comment>;

    /// Returns all comments for an issue, oldest first.
    fn get_comments(&self, issue_id: &str) -> Result<Vec<Comment>>;

    /// Returns recent events for an issue.
    fn get_events(&self, issue_id: &str, limit: i32) -> Result<Vec<Event>>;

    /// Returns all events with id > `since_id`.
    fn get_all_events_since(&self, since_id: i64) -> Result<Vec<Event>>;

    // -- Statistics ----------------------------------------------------------

    /// Returns aggregate statistics about the issue database.
    fn get_statistics(&self) -> Result<Statistics>;

    // -- Configuration -------------------------------------------------------

    /// Sets a configuration key-value pair.
    fn set_config(&self, key: &str, value: &str) -> Result<()>;

    /// Gets a configuration value by key.
    fn get_config(&self, key: &str) -> Result<String>;

    /// Returns all configuration key-value pairs.
    fn get_all_config(&self) -> Result<std::collections::HashMap<String, String>>;

    /// Sets a metadata key-value pair.
    fn set_metadata(&self, key: &str, value: &str) -> Result<()>;

    /// Gets a metadata value by key.
    fn get_metadata(&self, key: &str) -> Result<String>;

    // -- Prefix operations ---------------------------------------------------

    /// Rewrites dependency endpoints from one prefix to another.
    fn rename_dependency_prefix(&self, old_prefix: &str, new_prefix: &str) -> Result<()>;

    /// Migrates the sequential counter row from one prefix to another.
    fn rename_counter_prefix(&self, old_prefix: &str, new_prefix: &str) -> Result<()>;

    // -- Transactions --------------------------------------------------------

    /// Executes a closure within a database transaction.
    ///
    /// If the closure returns `Ok`, the transaction is committed; otherwise
    /// it is rolled back.
    fn run_in_transaction(&self, f: &dyn Fn(&dyn Transaction) -> Result<()>) -> Result<()>;
}

// ---------------------------------------------------------------------------
// Transaction trait
// ---------------------------------------------------------------------------

/// Subset of [`Storage`] methods available inside a transaction.
pub trait Transaction {
    fn create_issue(&self, issue: &Issue, actor: &str) -> Result<()>;
    fn update_issue(&self, id: &str, updates: &IssueUpdates, actor: &str) -> Result<()>;
    fn delete_issue(&self, id: &str, reason: &str, actor: &str) -> Result<()>;
    fn get_issue(&self, id: &str) -> Result<Issue>;

    fn add_dependency(&self, dep: &Dependency, actor: &str) -> Result<()>;
    fn remove_dependency(&self, issue_id: &str, depends_on_id: &str, actor: &str) -> Result<()>;
    fn get_dependency_records(&self, issue_id: &str) -> Result<Vec<Dependency>>;

    fn add_label(&self, issue_id: &str, label: &str, actor: &str) -> Result<()>;
    fn get_labels(&self, issue_id: &str) -> Result<Vec<String>>;

    fn set_config(&self, key: &str, value: &str) -> Result<()>;
    fn get_config(&self, key: &str) -> Result<String>;
    fn set_metadata(&self, key: &str, value: &str) -> Result<()>;
    fn get_metadata(&self, key: &str) -> Result<String>;

    fn add_comment(&self, issue_id: &str, author: &str, text: &str) -> Result<Comment>;
    fn import_comment(
        &self,
        issue_id: &str,
        author: &str,
        text: &str,
        created_at: DateTime<Utc>,
    ) -> Result<Comment>;
    fn get_comments(&self, issue_id: &str) -> Result<Vec<Comment>>;
}
