//! Prefix rename and multi-prefix repair.
//!
//! Rename moves every issue from one prefix to another, keeping suffixes.
//! Repair consolidates a corrupted store (several `issue_prefix` values
//! after a botched merge) by re-minting fresh hash IDs under one target
//! prefix. Neither creates tombstones: old IDs are replaced in place.
//!
//! Both operations run issue-by-issue rather than in one global
//! transaction. A failure mid-way leaves a mixed store; re-running
//! `repair` toward the desired prefix is the recovery path and is
//! idempotent because correctly-prefixed issues are left untouched.

use std::collections::{BTreeSet, HashSet};
use std::path::Path;

use tracing::info;

use beadslog_core::idgen::{self, adaptive_defaults, split_id};
use beadslog_core::issue::Issue;
use beadslog_core::rename::{
    RenameMap, prefix_rename_map, rewrite_mapped_refs, rewrite_prefix_refs,
};
use beadslog_storage::SqliteStore;
use beadslog_storage::sqlite::schema::config_keys;

use crate::error::{Result, SyncError};
use crate::export::export_to_jsonl;

/// Report of a rename or repair pass.
#[derive(Debug, Clone, Default)]
pub struct PrefixReport {
    /// Old ID -> new ID for every reassigned issue.
    pub renamed: Vec<(String, String)>,
    /// Issues whose text fields were rewritten.
    pub text_rewrites: usize,
}

/// Renames the workspace prefix: every `<old>-<suffix>` becomes
/// `<new>-<suffix>`, text references follow, dependency endpoints and the
/// sequential counter migrate, and the config prefix flips.
///
/// `jsonl_path` receives an immediate export when given; callers are
/// expected to have pulled any pending remote JSONL into the store first.
pub fn rename_prefix(
    store: &SqliteStore,
    old_prefix: &str,
    new_prefix: &str,
    jsonl_path: Option<&Path>,
) -> Result<PrefixReport> {
    idgen::validate_prefix(new_prefix).map_err(|e| SyncError::Invalid(e.to_string()))?;
    if old_prefix == new_prefix {
        return Err(SyncError::Invalid("old and new prefix are equal".into()));
    }

    let issues = store.get_all_issues_impl()?;
    let ids: Vec<String> = issues.iter().map(|i| i.id.clone()).collect();
    let map = prefix_rename_map(old_prefix, new_prefix, &ids);

    let mut report = PrefixReport::default();

    // Text references first, across every issue (issues under other
    // prefixes may reference the renamed ones).
    for issue in &issues {
        if rewrite_issue_text_with(store, issue, |text| {
            rewrite_prefix_refs(text, old_prefix, new_prefix, &map)
        })? {
            report.text_rewrites += 1;
        }
    }

    // Then the IDs themselves, dependency rows included.
    for (old_id, new_id) in &map {
        store.update_issue_id_impl(old_id, new_id, "")?;
        report.renamed.push((old_id.clone(), new_id.clone()));
    }
    report.renamed.sort();

    store.rename_dependency_prefix_impl(old_prefix, new_prefix)?;
    store.rename_counter_prefix_impl(old_prefix, new_prefix)?;
    store.set_config_impl(config_keys::ISSUE_PREFIX, new_prefix)?;

    if let Some(path) = jsonl_path {
        export_to_jsonl(store, path)?;
    }

    info!(
        old = old_prefix,
        new = new_prefix,
        renamed = report.renamed.len(),
        "prefix rename complete"
    );
    Ok(report)
}

/// Scans all issue IDs and returns the distinct prefixes present.
pub fn detect_prefixes(store: &SqliteStore) -> Result<BTreeSet<String>> {
    let issues = store.get_all_issues_impl()?;
    let mut prefixes = BTreeSet::new();
    for issue in &issues {
        if let Some((prefix, _)) = split_id(&issue.id) {
            prefixes.insert(prefix.to_owned());
        }
    }
    Ok(prefixes)
}

/// Consolidates a multi-prefix store under `target`.
///
/// Issues already carrying the target prefix are untouched; every other
/// issue receives a freshly minted hash ID under `target`. All textual ID
/// references are rewritten through the full rename map, dependency
/// endpoints follow, per-prefix counters collapse into the target's, and
/// a full export runs at the end.
pub fn repair_prefixes(
    store: &SqliteStore,
    target: &str,
    jsonl_path: Option<&Path>,
) -> Result<PrefixReport> {
    idgen::validate_prefix(target).map_err(|e| SyncError::Invalid(e.to_string()))?;

    let prefixes = detect_prefixes(store)?;
    if prefixes.len() < 2 {
        return Err(SyncError::Invalid(format!(
            "repair requires at least 2 prefixes, found {}",
            prefixes.len()
        )));
    }

    let issues = store.get_all_issues_impl()?;
    let (correct, incorrect): (Vec<&Issue>, Vec<&Issue>) = issues
        .iter()
        .partition(|i| split_id(&i.id).map(|(p, _)| p) == Some(target));

    // Mint fresh hash IDs for the incorrect partition. The batch-local set
    // prevents intra-batch collisions before anything hits the store.
    let length = idgen::compute_adaptive_length(
        issues.len(),
        adaptive_defaults::MIN_LENGTH,
        adaptive_defaults::MAX_LENGTH,
        adaptive_defaults::MAX_COLLISION_PROB,
    );
    let mut used_ids: HashSet<String> = HashSet::new();
    let mut map = RenameMap::new();
    for issue in &incorrect {
        let new_id = idgen::mint_id(
            target,
            &issue.title,
            issue.issue_type.as_str(),
            &issue.created_by,
            issue.created_at,
            length,
            |candidate| store.get_issue_impl(candidate).is_ok(),
            &mut used_ids,
        )
        .map_err(|e| SyncError::Invalid(e.to_string()))?;
        map.insert(issue.id.clone(), new_id);
    }

    let mut report = PrefixReport::default();

    // Rewrite textual references everywhere, then reassign the IDs.
    for issue in &issues {
        if rewrite_issue_text_with(store, issue, |text| rewrite_mapped_refs(text, &map))? {
            report.text_rewrites += 1;
        }
    }
    for (old_id, new_id) in &map {
        store.update_issue_id_impl(old_id, new_id, "")?;
        report.renamed.push((old_id.clone(), new_id.clone()));
    }
    report.renamed.sort();

    // Collapse the stray prefixes' counters into the target's.
    for prefix in prefixes.iter().filter(|p| p.as_str() != target) {
        store.rename_counter_prefix_impl(prefix, target)?;
    }
    store.set_config_impl(config_keys::ISSUE_PREFIX, target)?;

    if let Some(path) = jsonl_path {
        export_to_jsonl(store, path)?;
    }

    info!(
        target,
        untouched = correct.len(),
        reminted = report.renamed.len(),
        "prefix repair complete"
    );
    Ok(report)
}

/// Applies a text transform to an issue's text-bearing fields, writing the
/// result back only if anything changed. Returns whether a write happened.
fn rewrite_issue_text_with(
    store: &SqliteStore,
    issue: &Issue,
    transform: impl Fn(&str) -> String,
) -> Result<bool> {
    let title = transform(&issue.title);
    let description = transform(&issue.description);
    let design = transform(&issue.design);
    let acceptance = transform(&issue.acceptance_criteria);
    let notes = transform(&issue.notes);

    let changed = title != issue.title
        || description != issue.description
        || design != issue.design
        || acceptance != issue.acceptance_criteria
        || notes != issue.notes;
    if changed {
        store.rewrite_text_fields_impl(
            &issue.id,
            &title,
            &description,
            &design,
            &acceptance,
            &notes,
        )?;
    }
    Ok(changed)
}

#[cfg(test)]
mod tests {
    use super::*;
    use beadslog_core::dependency::Dependency;
    use beadslog_core::enums::DependencyType;
    use beadslog_core::idgen::is_hash_id;
    use beadslog_core::issue::IssueBuilder;

    fn store_with(issues: &[Issue]) -> SqliteStore {
        let store = SqliteStore::open_in_memory().unwrap();
        for issue in issues {
            store.create_issue_impl(issue, "alice").unwrap();
        }
        store
    }

    #[test]
    fn rename_rewrites_ids_text_and_dependencies() {
        // S2: old-1 references old-2 in its description; dependency old-1 -> old-2.
        let store = store_with(&[
            IssueBuilder::new("See old-2")
                .id("old-1")
                .description("See old-2")
                .build(),
            IssueBuilder::new("Related to old-1")
                .id("old-2")
                .description("Related to old-1")
                .build(),
        ]);
        store
            .add_dependency_impl(
                &Dependency::new("old-1", "old-2", DependencyType::Blocks),
                "alice",
            )
            .unwrap();

        let report = rename_prefix(&store, "old", "new", None).unwrap();
        assert_eq!(report.renamed.len(), 2);

        assert!(store.get_issue_impl("old-1").unwrap_err().is_not_found());

        let renamed = store.get_issue_impl("new-1").unwrap();
        assert_eq!(renamed.title, "See new-2");
        assert_eq!(renamed.description, "See new-2");

        let other = store.get_issue_impl("new-2").unwrap();
        assert_eq!(other.description, "Related to new-1");

        let deps = store.get_dependency_records_impl("new-1").unwrap();
        assert_eq!(deps.len(), 1);
        assert_eq!(deps[0].depends_on_id, "new-2");

        assert_eq!(
            store.get_config_impl(config_keys::ISSUE_PREFIX).unwrap(),
            "new"
        );
    }

    #[test]
    fn rename_migrates_counter() {
        let store = store_with(&[IssueBuilder::new("A").id("old-1").build()]);
        store.set_counter_impl("old", 17).unwrap();

        rename_prefix(&store, "old", "new", None).unwrap();
        assert_eq!(store.get_counter_impl("new").unwrap(), 17);
    }

    #[test]
    fn rename_rejects_same_prefix() {
        let store = store_with(&[]);
        let err = rename_prefix(&store, "bd", "bd", None).unwrap_err();
        assert!(matches!(err, SyncError::Invalid(_)));
    }

    #[test]
    fn detect_prefixes_scans_ids() {
        let store = store_with(&[
            IssueBuilder::new("A").id("test-aa111").build(),
            IssueBuilder::new("B").id("old-1").build(),
            IssueBuilder::new("C").id("another-zz9").build(),
        ]);
        let prefixes = detect_prefixes(&store).unwrap();
        assert_eq!(
            prefixes.into_iter().collect::<Vec<_>>(),
            vec!["another", "old", "test"]
        );
    }

    #[test]
    fn repair_requires_multiple_prefixes() {
        let store = store_with(&[IssueBuilder::new("A").id("test-aa111").build()]);
        let err = repair_prefixes(&store, "test", None).unwrap_err();
        assert!(matches!(err, SyncError::Invalid(_)));
    }

    #[test]
    fn repair_consolidates_under_target() {
        // S6: two test-*, two old-*, one another-*.
        let store = store_with(&[
            IssueBuilder::new("Keep 1").id("test-aa111").build(),
            IssueBuilder::new("Keep 2").id("test-bb222").build(),
            IssueBuilder::new("Fix 1").id("old-1").build(),
            IssueBuilder::new("Fix 2").id("old-2").build(),
            IssueBuilder::new("Fix 3").id("another-7").build(),
        ]);

        let report = repair_prefixes(&store, "test", None).unwrap();
        assert_eq!(report.renamed.len(), 3);

        // All five issues now share the target prefix, and the re-minted
        // IDs are hash-form.
        let issues = store.get_all_issues_impl().unwrap();
        assert_eq!(issues.len(), 5);
        for issue in &issues {
            let (prefix, _) = split_id(&issue.id).unwrap();
            assert_eq!(prefix, "test", "unexpected prefix on {}", issue.id);
        }
        for (old_id, new_id) in &report.renamed {
            assert!(store.get_issue_impl(old_id).unwrap_err().is_not_found());
            assert!(is_hash_id(new_id), "{new_id} should be hash-form");
        }

        // Untouched issues kept their IDs.
        assert!(store.get_issue_impl("test-aa111").is_ok());
        assert!(store.get_issue_impl("test-bb222").is_ok());

        assert_eq!(
            store.get_config_impl(config_keys::ISSUE_PREFIX).unwrap(),
            "test"
        );
    }

    #[test]
    fn repair_batch_ids_are_unique() {
        // Identical identity tuples force the perturbation path.
        let t = chrono::DateTime::parse_from_rfc3339("2024-01-01T00:00:00Z")
            .unwrap()
            .with_timezone(&chrono::Utc);
        let mut seed = vec![IssueBuilder::new("Anchor").id("test-aa111").build()];
        for i in 1..=4 {
            seed.push(
                IssueBuilder::new("Same title")
                    .id(format!("old-{i}"))
                    .created_at(t)
                    .created_by("bot")
                    .build(),
            );
        }
        let store = store_with(&seed);

        let report = repair_prefixes(&store, "test", None).unwrap();
        let mut new_ids: Vec<&String> = report.renamed.iter().map(|(_, n)| n).collect();
        new_ids.sort();
        new_ids.dedup();
        assert_eq!(new_ids.len(), 4, "minted IDs must be pairwise distinct");
    }

    #[test]
    fn repair_rewrites_cross_prefix_references() {
        let store = store_with(&[
            IssueBuilder::new("Anchor").id("test-aa111").build(),
            IssueBuilder::new("Moved").id("old-1").build(),
            IssueBuilder::new("Mentions old-1 and test-aa111")
                .id("another-3")
                .notes("see old-1")
                .build(),
        ]);

        let report = repair_prefixes(&store, "test", None).unwrap();
        let new_old1 = report
            .renamed
            .iter()
            .find(|(old, _)| old == "old-1")
            .map(|(_, new)| new.clone())
            .unwrap();
        let new_another3 = report
            .renamed
            .iter()
            .find(|(old, _)| old == "another-3")
            .map(|(_, new)| new.clone())
            .unwrap();

        let mentioning = store.get_issue_impl(&new_another3).unwrap();
        assert_eq!(mentioning.title, format!("Mentions {new_old1} and test-aa111"));
        assert_eq!(mentioning.notes, format!("see {new_old1}"));
    }
}
