//! `bd list` / `bd ready` / `bd blocked` -- read views.

use anyhow::Result;

use beadslog_core::enums::Status;
use beadslog_core::filter::{IssueFilter, WorkFilter};
use beadslog_core::issue::Issue;

use crate::cli::{ListArgs, ReadyArgs};
use crate::context::RuntimeContext;
use crate::workspace::Workspace;

/// Execute the `bd list` command.
pub fn run_list(ctx: &RuntimeContext, args: &ListArgs) -> Result<()> {
    let workspace = Workspace::open(ctx)?;
    workspace.refresh()?;

    let mut filter = IssueFilter::live();
    filter.status = args.status.as_deref().map(Status::from);
    filter.assignee = args.assignee.clone();
    filter.limit = args.limit;

    let issues = workspace.store.search_issues_impl(&args.query, &filter)?;
    print_issues(ctx, &issues);
    Ok(())
}

/// Execute the `bd ready` command.
pub fn run_ready(ctx: &RuntimeContext, args: &ReadyArgs) -> Result<()> {
    let workspace = Workspace::open(ctx)?;
    workspace.refresh()?;

    let filter = WorkFilter {
        assignee: args.assignee.clone(),
        limit: args.limit,
        ..Default::default()
    };
    let issues = workspace.store.get_ready_work_impl(&filter)?;
    print_issues(ctx, &issues);
    Ok(())
}

/// Execute the `bd blocked` command.
pub fn run_blocked(ctx: &RuntimeContext) -> Result<()> {
    let workspace = Workspace::open(ctx)?;
    workspace.refresh()?;

    let blocked = workspace
        .store
        .get_blocked_issues_impl(&WorkFilter::default())?;
    if ctx.json {
        let rows: Vec<serde_json::Value> = blocked
            .iter()
            .map(|b| {
                serde_json::json!({
                    "issue": b.issue,
                    "blocked_by_count": b.blocked_by_count,
                })
            })
            .collect();
        println!("{}", serde_json::to_string_pretty(&rows)?);
        return Ok(());
    }
    for entry in blocked {
        println!(
            "{} [{} blockers] {}",
            entry.issue.id, entry.blocked_by_count, entry.issue.title
        );
    }
    Ok(())
}

fn print_issues(ctx: &RuntimeContext, issues: &[Issue]) {
    if ctx.json {
        println!(
            "{}",
            serde_json::to_string_pretty(issues).unwrap_or_default()
        );
        return;
    }
    for issue in issues {
        println!(
            "{} [{}] p{} {}",
            issue.id, issue.status, issue.priority, issue.title
        );
    }
}
