//! Deterministic content hashing for issues.
//!
//! Produces a SHA-256 hex digest over all substantive fields (excluding ID
//! and the creation timestamp) so that identical content produces identical
//! hashes across all clones. The sync engine uses this to recognise
//! byte-equal records during import.

use sha2::{Digest, Sha256};

use crate::issue::Issue;

/// Separator byte written between fields.
const SEP: u8 = 0;

/// Computes a deterministic content hash for an issue.
pub fn compute_content_hash(issue: &Issue) -> String {
    let mut h = Sha256::new();

    // Core fields in stable order.
    write_str(&mut h, &issue.title);
    write_str(&mut h, &issue.description);
    write_str(&mut h, &issue.design);
    write_str(&mut h, &issue.acceptance_criteria);
    write_str(&mut h, &issue.notes);
    write_str(&mut h, issue.status.as_str());
    write_int(&mut h, issue.priority);
    write_str(&mut h, issue.issue_type.as_str());
    write_str(&mut h, &issue.assignee);
    write_str(&mut h, &issue.created_by);

    // Close state.
    write_time_opt(&mut h, issue.closed_at);
    write_str(&mut h, &issue.close_reason);
    write_str(&mut h, &issue.closed_by_session);

    // Tombstone state.
    write_time_opt(&mut h, issue.deleted_at);
    write_str(&mut h, &issue.delete_reason);
    write_str(&mut h, &issue.original_type);

    // Scheduling.
    write_time_opt(&mut h, issue.due_at);
    write_time_opt(&mut h, issue.defer_until);

    // Optional fields.
    write_str_opt(&mut h, issue.external_ref.as_deref());
    write_flag(&mut h, issue.ephemeral, "ephemeral");
    if let Some(est) = issue.estimated_minutes {
        write_int(&mut h, est);
    } else {
        h.update([SEP]);
    }

    // Gate fields.
    write_str(&mut h, &issue.await_type);
    write_str(&mut h, &issue.await_id);
    write_duration(&mut h, issue.timeout);

    // Relational data.
    for label in &issue.labels {
        write_str(&mut h, label);
    }
    for dep in &issue.dependencies {
        write_str(&mut h, &dep.depends_on_id);
        write_str(&mut h, dep.dep_type.as_str());
    }

    format!("{:x}", h.finalize())
}

// -- helper writers --------------------------------------------------------

fn write_str(h: &mut Sha256, s: &str) {
    h.update(s.as_bytes());
    h.update([SEP]);
}

fn write_int(h: &mut Sha256, n: i32) {
    h.update(n.to_string().as_bytes());
    h.update([SEP]);
}

fn write_str_opt(h: &mut Sha256, s: Option<&str>) {
    if let Some(s) = s {
        h.update(s.as_bytes());
    }
    h.update([SEP]);
}

fn write_time_opt(h: &mut Sha256, t: Option<chrono::DateTime<chrono::Utc>>) {
    if let Some(t) = t {
        h.update(t.to_rfc3339().as_bytes());
    }
    h.update([SEP]);
}

fn write_duration(h: &mut Sha256, d: Option<std::time::Duration>) {
    let ns = d.map(|d| d.as_nanos() as i64).unwrap_or(0);
    h.update(ns.to_string().as_bytes());
    h.update([SEP]);
}

fn write_flag(h: &mut Sha256, b: bool, label: &str) {
    if b {
        h.update(label.as_bytes());
    }
    h.update([SEP]);
}
