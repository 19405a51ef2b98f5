//! `bd close` / `bd delete` / `bd update` -- lifecycle mutations.

use anyhow::Result;
use serde_json::json;

use beadslog_config::env::session_id;
use beadslog_core::enums::{IssueType, Status};
use beadslog_storage::IssueUpdates;

use crate::cli::{CloseArgs, DeleteArgs, UpdateArgs};
use crate::context::RuntimeContext;
use crate::workspace::Workspace;

/// Execute the `bd close` command.
pub fn run_close(ctx: &RuntimeContext, args: &CloseArgs) -> Result<()> {
    let workspace = Workspace::open(ctx)?;
    let session = session_id().unwrap_or_default();

    if let Some(mut client) = workspace.try_daemon(ctx) {
        if let Ok(data) = client.call(
            "close",
            json!({
                "id": args.id,
                "reason": args.reason,
                "actor": ctx.actor,
                "session": session,
            }),
        ) {
            let id = data["id"].as_str().unwrap_or_default();
            workspace.touch(id);
            print_closed(ctx, id, &data["unblocked"]);
            return Ok(());
        }
    }

    let target = workspace.store_for_id(&args.id)?;
    let store = target.store();
    let id = store.resolve_id_impl(&args.id)?;
    let unblocked = store.close_issue_impl(&id, &args.reason, &ctx.actor, &session)?;

    if !target.is_remote() {
        workspace.export()?;
    }
    workspace.touch(&id);

    let unblocked_ids: Vec<&str> = unblocked.iter().map(|i| i.id.as_str()).collect();
    print_closed(ctx, &id, &json!(unblocked_ids));
    Ok(())
}

fn print_closed(ctx: &RuntimeContext, id: &str, unblocked: &serde_json::Value) {
    if ctx.json {
        println!("{}", json!({ "id": id, "unblocked": unblocked }));
        return;
    }
    println!("Closed {id}");
    if let Some(ids) = unblocked.as_array() {
        for unblocked_id in ids.iter().filter_map(|v| v.as_str()) {
            println!("Unblocked: {unblocked_id}");
        }
    }
}

/// Execute the `bd delete` command.
pub fn run_delete(ctx: &RuntimeContext, args: &DeleteArgs) -> Result<()> {
    let workspace = Workspace::open(ctx)?;

    if let Some(mut client) = workspace.try_daemon(ctx) {
        if client
            .call(
                "delete",
                json!({ "id": args.id, "reason": args.reason, "actor": ctx.actor }),
            )
            .is_ok()
        {
            println!("Deleted {}", args.id);
            return Ok(());
        }
    }

    let target = workspace.store_for_id(&args.id)?;
    let store = target.store();
    let id = store.resolve_id_impl(&args.id)?;
    store.delete_issue_impl(&id, &args.reason, &ctx.actor)?;

    if !target.is_remote() {
        workspace.export()?;
    }
    println!("Deleted {id}");
    Ok(())
}

/// Execute the `bd update` command.
pub fn run_update(ctx: &RuntimeContext, args: &UpdateArgs) -> Result<()> {
    let workspace = Workspace::open(ctx)?;

    let target = workspace.store_for_id(&args.id)?;
    let store = target.store();
    let id = store.resolve_id_impl(&args.id)?;

    let updates = IssueUpdates {
        title: args.title.clone(),
        description: args.description.clone(),
        notes: args.notes.clone(),
        status: args.status.as_deref().map(Status::from),
        priority: args.priority,
        assignee: args.assignee.clone(),
        issue_type: None::<IssueType>,
        ..Default::default()
    };
    store.update_issue_impl(&id, &updates, &ctx.actor)?;

    if !target.is_remote() {
        workspace.export()?;
    }
    workspace.touch(&id);
    println!("Updated {id}");
    Ok(())
}
