//! `bd show` -- display one issue with its relations.

use anyhow::Result;
use serde_json::json;

use beadslog_core::issue::Issue;

use crate::cli::IdArg;
use crate::context::RuntimeContext;
use crate::workspace::Workspace;

/// Execute the `bd show` command.
pub fn run(ctx: &RuntimeContext, args: &IdArg) -> Result<()> {
    let workspace = Workspace::open(ctx)?;

    if let Some(mut client) = workspace.try_daemon(ctx) {
        if let Ok(data) = client.call("show", json!({ "id": args.id })) {
            let issue: Issue = serde_json::from_value(data)?;
            print_issue(ctx, &issue);
            return Ok(());
        }
    }

    // Foreign-prefix IDs route to the owning rig's store directly.
    let target = workspace.store_for_id(&args.id)?;
    if !target.is_remote() {
        workspace.refresh()?;
    }
    let store = target.store();

    let id = store.resolve_id_impl(&args.id)?;
    let mut issue = store.get_issue_impl(&id)?;
    issue.dependencies = store.get_dependency_records_impl(&id)?;
    issue.labels = store.get_labels_impl(&id)?;
    issue.comments = store.get_comments_impl(&id)?;

    print_issue(ctx, &issue);
    Ok(())
}

fn print_issue(ctx: &RuntimeContext, issue: &Issue) {
    if ctx.json {
        println!("{}", serde_json::to_string_pretty(issue).unwrap_or_default());
        return;
    }

    println!(
        "{} [{}] {} (p{})",
        issue.id, issue.status, issue.title, issue.priority
    );
    if !issue.description.is_empty() {
        println!("\n{}", issue.description);
    }
    if !issue.labels.is_empty() {
        println!("\nlabels: {}", issue.labels.join(", "));
    }
    for dep in &issue.dependencies {
        println!("  -> {} ({})", dep.depends_on_id, dep.dep_type);
    }
    for comment in &issue.comments {
        println!("\n[{}] {}", comment.author, comment.text);
    }
}
