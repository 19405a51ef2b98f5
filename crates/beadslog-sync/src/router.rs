//! Cross-rig routing: dispatch one operation to the store that owns it.
//!
//! When an operation receives an ID whose prefix does not belong to the
//! current workspace, the router finds the town's routes manifest, opens a
//! short-lived store against the owning workspace's `.beads`, and executes
//! there. The daemon is bypassed for these calls.

use std::collections::HashSet;
use std::path::{Path, PathBuf};

use tracing::info;

use beadslog_config::routes::{Routes, find_town};
use beadslog_core::dependency::{Dependency, format_external_ref};
use beadslog_core::enums::DependencyType;
use beadslog_core::idgen::{self, adaptive_defaults, split_id};
use beadslog_storage::{DB_FILE_NAME, SqliteStore};

use crate::error::{Result, SyncError};

/// Resolves foreign prefixes to their owning workspaces.
#[derive(Debug)]
pub struct Router {
    town_root: PathBuf,
    routes: Routes,
}

impl Router {
    /// Discovers the town by walking upward from `start`.
    pub fn discover(start: &Path) -> Result<Self> {
        let (town_root, routes) = find_town(start)
            .ok_or_else(|| SyncError::NoRoute("no town routes manifest found".into()))?;
        Ok(Self { town_root, routes })
    }

    /// Builds a router from an explicit town root and manifest.
    pub fn new(town_root: PathBuf, routes: Routes) -> Self {
        Self { town_root, routes }
    }

    /// The town root directory.
    pub fn town_root(&self) -> &Path {
        &self.town_root
    }

    /// Returns the `.beads` directory owning the given issue prefix.
    pub fn beads_dir_for_prefix(&self, prefix: &str) -> Result<PathBuf> {
        let route = self
            .routes
            .by_prefix(prefix)
            .ok_or_else(|| SyncError::NoRoute(format!("prefix '{prefix}'")))?;
        Ok(self.routes.beads_dir_for(route, &self.town_root))
    }

    /// Returns the `.beads` directory for a rig by name.
    pub fn beads_dir_for_rig(&self, name: &str) -> Result<PathBuf> {
        let route = self
            .routes
            .by_name(name)
            .ok_or_else(|| SyncError::NoRoute(format!("rig '{name}'")))?;
        Ok(self.routes.beads_dir_for(route, &self.town_root))
    }

    /// Returns the prefix registered for a rig.
    pub fn prefix_for_rig(&self, name: &str) -> Result<String> {
        let route = self
            .routes
            .by_name(name)
            .ok_or_else(|| SyncError::NoRoute(format!("rig '{name}'")))?;
        Ok(route.prefix.clone())
    }

    /// Opens a short-lived store for the workspace owning `id`'s prefix.
    pub fn open_store_for_id(&self, id: &str) -> Result<SqliteStore> {
        let (prefix, _) =
            split_id(id).ok_or_else(|| SyncError::Invalid(format!("malformed ID '{id}'")))?;
        let beads_dir = self.beads_dir_for_prefix(prefix)?;
        Ok(SqliteStore::open(beads_dir.join(DB_FILE_NAME))?)
    }
}

/// Report of a cross-rig move.
#[derive(Debug, Clone)]
pub struct MoveReport {
    /// ID the issue had in the source rig.
    pub old_id: String,
    /// ID minted in the target rig.
    pub new_id: String,
    /// Inbound dependencies rewritten to `external:` references.
    pub rewired_dependents: Vec<String>,
    /// Outbound dependencies dropped because they cannot cross stores.
    pub dropped_dependencies: Vec<String>,
}

/// Moves an issue to another rig's store.
///
/// The issue is re-created in the target under a freshly minted ID,
/// dependents in the source are rewired to `external:<rig>:<new_id>`,
/// outbound dependencies are dropped with a note on the moved record, and
/// the source record is tombstoned.
pub fn move_issue(
    source: &SqliteStore,
    target: &SqliteStore,
    target_rig: &str,
    target_prefix: &str,
    id: &str,
    actor: &str,
) -> Result<MoveReport> {
    let mut issue = source.get_issue_impl(id)?;
    if issue.is_tombstone() {
        return Err(SyncError::Invalid(format!("{id} is already deleted")));
    }
    issue.labels = source.get_labels_impl(id)?;
    issue.comments = source.get_comments_impl(id)?;
    let outbound = source.get_dependency_records_impl(id)?;

    // Mint the target-side ID.
    let target_count = target.get_all_issues_impl()?.len();
    let length = idgen::compute_adaptive_length(
        target_count + 1,
        adaptive_defaults::MIN_LENGTH,
        adaptive_defaults::MAX_LENGTH,
        adaptive_defaults::MAX_COLLISION_PROB,
    );
    let mut used_ids = HashSet::new();
    let new_id = idgen::mint_id(
        target_prefix,
        &issue.title,
        issue.issue_type.as_str(),
        actor,
        issue.created_at,
        length,
        |candidate| target.get_issue_impl(candidate).is_ok(),
        &mut used_ids,
    )
    .map_err(|e| SyncError::Invalid(e.to_string()))?;

    // Outbound dependencies cannot cross stores; note what was dropped.
    let dropped: Vec<String> = outbound
        .iter()
        .map(|d| format!("{} ({})", d.depends_on_id, d.dep_type))
        .collect();
    let mut moved = issue.clone();
    moved.id = new_id.clone();
    moved.dependencies = Vec::new();
    moved.source_repo = String::new();
    if !dropped.is_empty() {
        let note = format!(
            "Moved from {id}; dropped cross-rig dependencies: {}",
            dropped.join(", ")
        );
        if moved.notes.is_empty() {
            moved.notes = note;
        } else {
            moved.notes = format!("{}\n\n{note}", moved.notes);
        }
    }

    target.create_issue_impl(&moved, actor)?;
    for label in &moved.labels {
        target.add_label_impl(&new_id, label, actor)?;
    }
    for comment in &moved.comments {
        target.run_in_transaction_impl(&|tx| {
            tx.import_comment(&new_id, &comment.author, &comment.text, comment.created_at)?;
            Ok(())
        })?;
    }

    // Rewire inbound edges to the external reference.
    let external = format_external_ref(target_rig, &new_id);
    let mut rewired = Vec::new();
    for dependent in source.get_dependents_impl(id)? {
        let records = source.get_dependency_records_impl(&dependent.id)?;
        for record in records.iter().filter(|r| r.depends_on_id == id) {
            source.remove_dependency_impl(&dependent.id, id, actor)?;
            let mut replacement = Dependency::new(
                dependent.id.clone(),
                external.clone(),
                record.dep_type.clone(),
            );
            replacement.created_by = actor.to_owned();
            source.add_dependency_impl(&replacement, actor)?;
            rewired.push(dependent.id.clone());
        }
    }

    // Drop the moved issue's own edges, then tombstone it. Symmetric
    // edges may already be gone from the rewiring pass.
    for dep in &outbound {
        match source.remove_dependency_impl(id, &dep.depends_on_id, actor) {
            Ok(()) => {}
            Err(e) if e.is_not_found() => {}
            Err(e) => return Err(e.into()),
        }
    }
    source.delete_issue_impl(id, &format!("moved to {target_rig}:{new_id}"), actor)?;

    info!(old = id, new = %new_id, rig = target_rig, "cross-rig move complete");
    Ok(MoveReport {
        old_id: id.to_owned(),
        new_id,
        rewired_dependents: rewired,
        dropped_dependencies: dropped,
    })
}
