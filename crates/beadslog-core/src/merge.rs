//! Deterministic field-merge rules for conflicting issue revisions.
//!
//! Used by the sync engine when an import collides with a stored record,
//! and by the conflict resolver when git leaves both sides of a JSONL
//! merge in the file. The rules compose two revisions of the same issue
//! into one without user input:
//!
//! - text fields follow the side with the larger `updated_at` (tie: left)
//! - `notes` concatenates when the sides diverge
//! - `closed` beats any non-tombstone status, `tombstone` beats everything
//! - numerically smaller `priority` wins (0 = highest)
//! - dependencies union on `(issue_id, depends_on_id, type)`

use std::collections::HashSet;

use chrono::{DateTime, Utc};

use crate::comment::Comment;
use crate::dependency::Dependency;
use crate::enums::Status;
use crate::issue::Issue;

/// Separator inserted between diverging notes.
const NOTES_SEPARATOR: &str = "\n\n---\n\n";

/// Merges two revisions of the same issue into one record.
///
/// `left` is conventionally the local/stored side and `right` the incoming
/// side; ties resolve toward `left`.
pub fn merge_issues(left: &Issue, right: &Issue) -> Issue {
    let left_newer = left.updated_at >= right.updated_at;
    let newer = if left_newer { left } else { right };

    let mut merged = Issue {
        id: left.id.clone(),
        content_hash: String::new(),

        // Text fields: the side with the larger updated_at wins.
        title: newer.title.clone(),
        description: newer.description.clone(),
        design: newer.design.clone(),
        acceptance_criteria: newer.acceptance_criteria.clone(),
        notes: merge_notes(&left.notes, &right.notes),

        status: merge_status(left, right),
        priority: left.priority.min(right.priority),
        issue_type: if !left.issue_type.as_str().is_empty() {
            left.issue_type.clone()
        } else {
            right.issue_type.clone()
        },

        assignee: newer.assignee.clone(),
        estimated_minutes: newer.estimated_minutes,

        created_at: left.created_at,
        created_by: left.created_by.clone(),
        updated_at: left.updated_at.max(right.updated_at),

        closed_at: None,
        close_reason: String::new(),
        closed_by_session: String::new(),

        deleted_at: None,
        delete_reason: String::new(),
        original_type: String::new(),

        due_at: newer.due_at,
        defer_until: newer.defer_until,
        external_ref: newer.external_ref.clone(),
        source_repo: left.source_repo.clone(),
        ephemeral: newer.ephemeral,

        await_type: newer.await_type.clone(),
        await_id: newer.await_id.clone(),
        timeout: newer.timeout,

        labels: merge_labels(&left.labels, &right.labels),
        dependencies: merge_dependencies(&left.dependencies, &right.dependencies),
        comments: merge_comments(&left.comments, &right.comments),
    };

    // Close state follows the side with the larger closed_at.
    let close_side = pick_by_time(left, right, |i| i.closed_at);
    merged.closed_at = close_side.closed_at;
    merged.close_reason = close_side.close_reason.clone();
    merged.closed_by_session = close_side.closed_by_session.clone();

    // Tombstone state follows the side with the larger deleted_at.
    let delete_side = pick_by_time(left, right, |i| i.deleted_at);
    merged.deleted_at = delete_side.deleted_at;
    merged.delete_reason = delete_side.delete_reason.clone();
    merged.original_type = delete_side.original_type.clone();

    merged
}

/// Status precedence within the non-resolved states, used only to break
/// exact `updated_at` ties so the merge stays order-independent.
fn status_rank(status: &Status) -> u8 {
    match status {
        Status::Tombstone => 5,
        Status::Closed => 4,
        Status::InProgress => 3,
        Status::Blocked => 2,
        Status::Deferred => 1,
        Status::Open | Status::Custom(_) => 0,
    }
}

fn merge_status(left: &Issue, right: &Issue) -> Status {
    // Tombstone wins over everything; closed wins over any non-tombstone.
    let (ls, rs) = (&left.status, &right.status);
    if *ls == Status::Tombstone || *rs == Status::Tombstone {
        return Status::Tombstone;
    }
    if *ls == Status::Closed || *rs == Status::Closed {
        return Status::Closed;
    }
    match left.updated_at.cmp(&right.updated_at) {
        std::cmp::Ordering::Greater => ls.clone(),
        std::cmp::Ordering::Less => rs.clone(),
        std::cmp::Ordering::Equal => {
            if status_rank(rs) > status_rank(ls) {
                rs.clone()
            } else {
                ls.clone()
            }
        }
    }
}

fn merge_notes(left: &str, right: &str) -> String {
    if left == right {
        return left.to_owned();
    }
    if left.is_empty() {
        return right.to_owned();
    }
    if right.is_empty() {
        return left.to_owned();
    }
    format!("{left}{NOTES_SEPARATOR}{right}")
}

/// Picks the side whose extracted timestamp is larger; ties and all-absent
/// resolve toward left.
fn pick_by_time<'a>(
    left: &'a Issue,
    right: &'a Issue,
    f: impl Fn(&Issue) -> Option<DateTime<Utc>>,
) -> &'a Issue {
    match (f(left), f(right)) {
        (None, Some(_)) => right,
        (Some(l), Some(r)) if r > l => right,
        _ => left,
    }
}

fn merge_labels(left: &[String], right: &[String]) -> Vec<String> {
    let mut seen: HashSet<&str> = HashSet::new();
    let mut merged = Vec::new();
    for label in left.iter().chain(right.iter()) {
        if seen.insert(label.as_str()) {
            merged.push(label.clone());
        }
    }
    merged.sort();
    merged
}

/// Union of append-only comments keyed by `(author, text, created_at)`.
///
/// Comment rowids are store-local, so the key ignores them; a comment made
/// on one fork survives a merge with a fork that never saw it.
pub fn merge_comments(left: &[Comment], right: &[Comment]) -> Vec<Comment> {
    let mut seen: HashSet<(String, String, DateTime<Utc>)> = HashSet::new();
    let mut merged = Vec::new();
    for comment in left.iter().chain(right.iter()) {
        let key = (
            comment.author.clone(),
            comment.text.clone(),
            comment.created_at,
        );
        if seen.insert(key) {
            merged.push(comment.clone());
        }
    }
    merged.sort_by(|a, b| a.created_at.cmp(&b.created_at));
    merged
}

/// Set union of dependency edges keyed by `(issue_id, depends_on_id, type)`.
/// Left's copy wins for edges present on both sides.
pub fn merge_dependencies(left: &[Dependency], right: &[Dependency]) -> Vec<Dependency> {
    let mut seen: HashSet<(String, String, String)> = HashSet::new();
    let mut merged = Vec::new();
    for dep in left.iter().chain(right.iter()) {
        if seen.insert(dep.key()) {
            merged.push(dep.clone());
        }
    }
    merged.sort_by(|a, b| a.key().cmp(&b.key()));
    merged
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::enums::DependencyType;
    use crate::issue::IssueBuilder;
    use chrono::Duration;

    fn at(s: &str) -> DateTime<Utc> {
        DateTime::parse_from_rfc3339(s).unwrap().with_timezone(&Utc)
    }

    fn base(title: &str, updated: &str) -> Issue {
        IssueBuilder::new(title)
            .id("bd-abc12")
            .created_at(at("2024-01-01T00:00:00Z"))
            .updated_at(at(updated))
            .build()
    }

    #[test]
    fn newer_title_wins() {
        let left = base("Local", "2024-01-02T00:00:00Z");
        let right = base("Remote", "2024-01-01T00:00:00Z");
        assert_eq!(merge_issues(&left, &right).title, "Local");
        assert_eq!(merge_issues(&right, &left).title, "Local");
    }

    #[test]
    fn equal_updated_at_prefers_left() {
        let left = base("Local", "2024-01-01T00:00:00Z");
        let right = base("Remote", "2024-01-01T00:00:00Z");
        assert_eq!(merge_issues(&left, &right).title, "Local");
    }

    #[test]
    fn closed_beats_open() {
        let mut left = base("A", "2024-01-05T00:00:00Z");
        let mut right = base("A", "2024-01-01T00:00:00Z");
        left.status = Status::Open;
        right.status = Status::Closed;
        right.closed_at = Some(at("2024-01-01T00:00:00Z"));
        right.close_reason = "done".into();

        let merged = merge_issues(&left, &right);
        assert_eq!(merged.status, Status::Closed);
        assert_eq!(merged.close_reason, "done");

        // Commutative.
        let merged_rev = merge_issues(&right, &left);
        assert_eq!(merged_rev.status, Status::Closed);
    }

    #[test]
    fn tombstone_beats_closed() {
        let mut left = base("A", "2024-01-01T00:00:00Z");
        let mut right = base("A", "2024-01-02T00:00:00Z");
        left.status = Status::Closed;
        right.status = Status::Tombstone;
        right.deleted_at = Some(at("2024-01-02T00:00:00Z"));
        right.delete_reason = "obsolete".into();

        let merged = merge_issues(&left, &right);
        assert_eq!(merged.status, Status::Tombstone);
        assert_eq!(merged.delete_reason, "obsolete");
        assert_eq!(merge_issues(&right, &left).status, Status::Tombstone);
    }

    #[test]
    fn smaller_priority_wins() {
        let mut left = base("A", "2024-01-01T00:00:00Z");
        let mut right = base("A", "2024-01-01T00:00:00Z");
        left.priority = 3;
        right.priority = 1;
        assert_eq!(merge_issues(&left, &right).priority, 1);
        assert_eq!(merge_issues(&right, &left).priority, 1);
    }

    #[test]
    fn updated_at_is_max() {
        let left = base("A", "2024-01-01T00:00:00Z");
        let right = base("A", "2024-03-01T00:00:00Z");
        let merged = merge_issues(&left, &right);
        assert_eq!(merged.updated_at, at("2024-03-01T00:00:00Z"));
    }

    #[test]
    fn diverging_notes_concatenate() {
        let mut left = base("A", "2024-01-01T00:00:00Z");
        let mut right = base("A", "2024-01-01T00:00:00Z");
        left.notes = "local note".into();
        right.notes = "remote note".into();
        let merged = merge_issues(&left, &right);
        assert_eq!(merged.notes, "local note\n\n---\n\nremote note");
    }

    #[test]
    fn equal_notes_kept_once() {
        let mut left = base("A", "2024-01-01T00:00:00Z");
        let mut right = base("A", "2024-01-01T00:00:00Z");
        left.notes = "same".into();
        right.notes = "same".into();
        assert_eq!(merge_issues(&left, &right).notes, "same");
    }

    #[test]
    fn dependencies_union() {
        let mut left = base("A", "2024-01-01T00:00:00Z");
        let mut right = base("A", "2024-01-01T00:00:00Z");
        left.dependencies
            .push(Dependency::new("bd-abc12", "bd-dep1", DependencyType::Blocks));
        right
            .dependencies
            .push(Dependency::new("bd-abc12", "bd-dep1", DependencyType::Blocks));
        right
            .dependencies
            .push(Dependency::new("bd-abc12", "bd-dep2", DependencyType::RelatesTo));

        let merged = merge_issues(&left, &right);
        assert_eq!(merged.dependencies.len(), 2);

        let rev = merge_issues(&right, &left);
        assert_eq!(rev.dependencies.len(), 2);
    }

    #[test]
    fn created_fields_come_from_left() {
        let mut left = base("A", "2024-01-01T00:00:00Z");
        let mut right = base("A", "2024-01-02T00:00:00Z");
        left.created_by = "alice".into();
        right.created_by = "mallory".into();
        right.created_at = left.created_at + Duration::seconds(30);

        let merged = merge_issues(&left, &right);
        assert_eq!(merged.created_by, "alice");
        assert_eq!(merged.created_at, left.created_at);
    }

    #[test]
    fn close_state_follows_larger_closed_at() {
        let mut left = base("A", "2024-01-03T00:00:00Z");
        let mut right = base("A", "2024-01-03T00:00:00Z");
        left.status = Status::Closed;
        left.closed_at = Some(at("2024-01-02T00:00:00Z"));
        left.close_reason = "first".into();
        right.status = Status::Closed;
        right.closed_at = Some(at("2024-01-03T00:00:00Z"));
        right.close_reason = "second".into();

        let merged = merge_issues(&left, &right);
        assert_eq!(merged.close_reason, "second");
        assert_eq!(merged.closed_at, Some(at("2024-01-03T00:00:00Z")));
    }

    #[test]
    fn comments_union_ignores_rowids() {
        let stamp = at("2024-01-01T12:00:00Z");
        let mut left = base("A", "2024-01-01T00:00:00Z");
        let mut right = base("A", "2024-01-01T00:00:00Z");
        left.comments.push(Comment {
            id: 1,
            issue_id: "bd-abc12".into(),
            author: "alice".into(),
            text: "shared".into(),
            created_at: stamp,
        });
        right.comments.push(Comment {
            id: 7, // different rowid on the other fork
            issue_id: "bd-abc12".into(),
            author: "alice".into(),
            text: "shared".into(),
            created_at: stamp,
        });
        right.comments.push(Comment {
            id: 8,
            issue_id: "bd-abc12".into(),
            author: "bob".into(),
            text: "only on right".into(),
            created_at: at("2024-01-02T12:00:00Z"),
        });

        let merged = merge_issues(&left, &right);
        assert_eq!(merged.comments.len(), 2);
        assert_eq!(merged.comments[0].text, "shared");
        assert_eq!(merged.comments[1].text, "only on right");
    }

    #[test]
    fn labels_union_sorted() {
        let mut left = base("A", "2024-01-01T00:00:00Z");
        let mut right = base("A", "2024-01-01T00:00:00Z");
        left.labels = vec!["backend".into(), "urgent".into()];
        right.labels = vec!["urgent".into(), "api".into()];
        let merged = merge_issues(&left, &right);
        assert_eq!(merged.labels, vec!["api", "backend", "urgent"]);
    }
}
