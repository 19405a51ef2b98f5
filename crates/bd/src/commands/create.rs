//! `bd create` -- create an issue.

use std::collections::HashSet;

use anyhow::Result;
use serde_json::json;

use beadslog_core::enums::IssueType;
use beadslog_core::idgen::{self, adaptive_defaults, next_child_id};
use beadslog_core::issue::IssueBuilder;

use crate::cli::CreateArgs;
use crate::context::RuntimeContext;
use crate::workspace::Workspace;

/// Execute the `bd create` command.
pub fn run(ctx: &RuntimeContext, args: &CreateArgs) -> Result<()> {
    let workspace = Workspace::open(ctx)?;

    // Daemon path first; fall back to direct mode on failure.
    if let Some(mut client) = workspace.try_daemon(ctx) {
        let data = client.call(
            "create",
            json!({
                "issue": {
                    "title": args.title,
                    "description": args.description,
                    "priority": args.priority,
                    "type": args.issue_type,
                    "assignee": args.assignee.clone().unwrap_or_default(),
                    "labels": args.label,
                },
                "actor": ctx.actor,
            }),
        );
        if let Ok(data) = data {
            let id = data["id"].as_str().unwrap_or_default().to_owned();
            workspace.touch(&id);
            print_created(ctx, &id);
            return Ok(());
        }
    }

    workspace.refresh()?;
    let store = &workspace.store;
    let prefix = workspace.prefix();

    let mut issue = IssueBuilder::new(&args.title)
        .description(&args.description)
        .priority(args.priority)
        .issue_type(IssueType::from(args.issue_type.as_str()).normalize())
        .created_by(&ctx.actor)
        .build();
    if let Some(ref assignee) = args.assignee {
        issue.assignee = assignee.clone();
    }

    issue.id = match &args.parent {
        Some(parent) => {
            let parent_id = store.resolve_id_impl(parent)?;
            let siblings: Vec<String> = store
                .get_all_issues_impl()?
                .into_iter()
                .map(|i| i.id)
                .collect();
            next_child_id(&parent_id, &siblings)
        }
        None => {
            let count = store.get_all_issues_impl()?.len();
            let length = idgen::compute_adaptive_length(
                count + 1,
                adaptive_defaults::MIN_LENGTH,
                adaptive_defaults::MAX_LENGTH,
                adaptive_defaults::MAX_COLLISION_PROB,
            );
            let mut used = HashSet::new();
            idgen::mint_id(
                &prefix,
                &issue.title,
                issue.issue_type.as_str(),
                &ctx.actor,
                issue.created_at,
                length,
                |candidate| store.get_issue_impl(candidate).is_ok(),
                &mut used,
            )?
        }
    };

    store.create_issue_impl(&issue, &ctx.actor)?;
    if let Some(parent) = &args.parent {
        let parent_id = store.resolve_id_impl(parent)?;
        let dep = beadslog_core::dependency::Dependency::new(
            issue.id.clone(),
            parent_id,
            beadslog_core::enums::DependencyType::ParentChild,
        );
        store.add_dependency_impl(&dep, &ctx.actor)?;
    }
    for label in &args.label {
        store.add_label_impl(&issue.id, label, &ctx.actor)?;
    }

    workspace.export()?;
    workspace.touch(&issue.id);
    print_created(ctx, &issue.id);
    Ok(())
}

fn print_created(ctx: &RuntimeContext, id: &str) {
    if ctx.json {
        println!("{}", json!({ "id": id }));
    } else {
        println!("Created {id}");
    }
}
