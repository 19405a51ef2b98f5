//! `bd sync` / `bd rename-prefix` / `bd repair` -- sync engine surface.

use anyhow::{Result, bail};

use beadslog_sync::export::export_to_jsonl;
use beadslog_sync::freshness::ensure_fresh;
use beadslog_sync::repair::{detect_prefixes, rename_prefix, repair_prefixes};
use beadslog_sync::resolver::{has_conflict_markers, resolve_conflict_file};

use crate::cli::{RenamePrefixArgs, RepairArgs, SyncArgs};
use crate::context::RuntimeContext;
use crate::workspace::Workspace;

/// Execute the `bd sync` command.
pub fn run_sync(ctx: &RuntimeContext, args: &SyncArgs) -> Result<()> {
    let workspace = Workspace::open(ctx)?;
    let jsonl = workspace.jsonl_read_path();

    if args.resolve {
        let content = std::fs::read_to_string(&jsonl).unwrap_or_default();
        if !has_conflict_markers(&content) {
            println!("No conflict markers in {}", jsonl.display());
        } else {
            let report = resolve_conflict_file(&jsonl)?;
            println!(
                "Resolved {} conflict region(s); backup at {}",
                report.regions,
                report.backup_path.display()
            );
        }
    }

    if args.import {
        if let Some(result) = ensure_fresh(&workspace.store, &jsonl)? {
            println!(
                "Imported: {} new, {} merged, {} unchanged",
                result.created.len(),
                result.merged.len(),
                result.unchanged.len()
            );
        } else {
            println!("Store already up to date");
        }
    }

    if args.flush || (!args.import && !args.resolve) {
        let result = export_to_jsonl(&workspace.store, &workspace.jsonl_path())?;
        println!("Exported {} issue(s)", result.exported);
    }

    Ok(())
}

/// Execute the `bd rename-prefix` command.
pub fn run_rename_prefix(ctx: &RuntimeContext, args: &RenamePrefixArgs) -> Result<()> {
    let workspace = Workspace::open(ctx)?;
    // Pull any pending remote state in before rewriting IDs.
    workspace.refresh()?;

    let report = rename_prefix(
        &workspace.store,
        &args.old,
        &args.new,
        Some(&workspace.jsonl_path()),
    )?;
    println!(
        "Renamed {} issue(s) from '{}' to '{}' ({} text rewrites)",
        report.renamed.len(),
        args.old,
        args.new,
        report.text_rewrites
    );
    Ok(())
}

/// Execute the `bd repair` command.
pub fn run_repair(ctx: &RuntimeContext, args: &RepairArgs) -> Result<()> {
    let workspace = Workspace::open(ctx)?;
    workspace.refresh()?;

    let target = match &args.target {
        Some(target) => target.clone(),
        None => workspace.prefix(),
    };

    let prefixes = detect_prefixes(&workspace.store)?;
    if prefixes.len() < 2 {
        bail!(
            "store has {} prefix(es); repair applies only to multi-prefix corruption",
            prefixes.len()
        );
    }

    let report = repair_prefixes(&workspace.store, &target, Some(&workspace.jsonl_path()))?;
    println!(
        "Repaired {} issue(s) under prefix '{}' ({} text rewrites)",
        report.renamed.len(),
        target,
        report.text_rewrites
    );
    for (old, new) in &report.renamed {
        println!("  {old} -> {new}");
    }
    Ok(())
}
