//! `bd move` -- move an issue to another rig.

use anyhow::Result;

use beadslog_storage::{DB_FILE_NAME, SqliteStore};
use beadslog_sync::router::{Router, move_issue};

use crate::cli::MoveArgs;
use crate::context::RuntimeContext;
use crate::workspace::Workspace;

/// Execute the `bd move` command.
pub fn run(ctx: &RuntimeContext, args: &MoveArgs) -> Result<()> {
    let workspace = Workspace::open(ctx)?;
    workspace.refresh()?;

    let id = workspace.store.resolve_id_impl(&args.id)?;

    let start = workspace
        .beads_dir
        .parent()
        .unwrap_or(&workspace.beads_dir);
    let router = Router::discover(start)?;
    let target_beads = router.beads_dir_for_rig(&args.rig)?;
    let target_prefix = router.prefix_for_rig(&args.rig)?;
    let target = SqliteStore::open(target_beads.join(DB_FILE_NAME))?;

    let report = move_issue(
        &workspace.store,
        &target,
        &args.rig,
        &target_prefix,
        &id,
        &ctx.actor,
    )?;

    workspace.export()?;
    beadslog_sync::export::export_to_jsonl(
        &target,
        &target_beads.join(beadslog_core::jsonl::JSONL_FILE_NAME),
    )?;

    println!("Moved {} to {}:{}", report.old_id, args.rig, report.new_id);
    for dependent in &report.rewired_dependents {
        println!("  rewired {dependent} -> external:{}:{}", args.rig, report.new_id);
    }
    for dropped in &report.dropped_dependencies {
        println!("  dropped dependency on {dropped}");
    }
    Ok(())
}
