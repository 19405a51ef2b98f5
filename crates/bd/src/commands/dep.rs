//! `bd dep` / `bd label` / `bd comment` -- relational mutations.

use anyhow::Result;

use beadslog_core::dependency::Dependency;
use beadslog_core::enums::DependencyType;

use crate::cli::{CommentArgs, DepAddArgs, DepRemoveArgs, IdArg, LabelArgs};
use crate::context::RuntimeContext;
use crate::workspace::Workspace;

/// Execute `bd dep add`.
pub fn run_dep_add(ctx: &RuntimeContext, args: &DepAddArgs) -> Result<()> {
    let workspace = Workspace::open(ctx)?;
    workspace.refresh()?;
    let store = &workspace.store;

    let from = store.resolve_id_impl(&args.from)?;
    // External references pass through unresolved.
    let to = if args.to.starts_with(beadslog_core::dependency::EXTERNAL_REF_PREFIX) {
        args.to.clone()
    } else {
        store.resolve_id_impl(&args.to)?
    };

    let mut dep = Dependency::new(from.clone(), to.clone(), DependencyType::from(args.dep_type.as_str()));
    dep.created_by = ctx.actor.clone();
    store.add_dependency_impl(&dep, &ctx.actor)?;

    workspace.export()?;
    println!("{from} now depends on {to} ({})", dep.dep_type);
    Ok(())
}

/// Execute `bd dep remove`.
pub fn run_dep_remove(ctx: &RuntimeContext, args: &DepRemoveArgs) -> Result<()> {
    let workspace = Workspace::open(ctx)?;
    let store = &workspace.store;

    let from = store.resolve_id_impl(&args.from)?;
    let to = if args.to.starts_with(beadslog_core::dependency::EXTERNAL_REF_PREFIX) {
        args.to.clone()
    } else {
        store.resolve_id_impl(&args.to)?
    };
    store.remove_dependency_impl(&from, &to, &ctx.actor)?;

    workspace.export()?;
    println!("Removed dependency {from} -> {to}");
    Ok(())
}

/// Execute `bd label add` / `bd label remove`.
pub fn run_label(ctx: &RuntimeContext, args: &LabelArgs, add: bool) -> Result<()> {
    let workspace = Workspace::open(ctx)?;
    let store = &workspace.store;
    let id = store.resolve_id_impl(&args.id)?;

    if add {
        store.add_label_impl(&id, &args.label, &ctx.actor)?;
        println!("Labeled {id} with '{}'", args.label.to_lowercase());
    } else {
        store.remove_label_impl(&id, &args.label, &ctx.actor)?;
        println!("Removed label '{}' from {id}", args.label.to_lowercase());
    }
    workspace.export()?;
    Ok(())
}

/// Execute `bd comment`.
pub fn run_comment_add(ctx: &RuntimeContext, args: &CommentArgs) -> Result<()> {
    let workspace = Workspace::open(ctx)?;
    let store = &workspace.store;
    let id = store.resolve_id_impl(&args.id)?;

    store.add_comment_impl(&id, &ctx.actor, &args.text)?;
    workspace.export()?;
    workspace.touch(&id);
    println!("Commented on {id}");
    Ok(())
}

/// Execute `bd comments`.
pub fn run_comment_list(ctx: &RuntimeContext, args: &IdArg) -> Result<()> {
    let workspace = Workspace::open(ctx)?;
    workspace.refresh()?;
    let store = &workspace.store;
    let id = store.resolve_id_impl(&args.id)?;

    let comments = store.get_comments_impl(&id)?;
    if ctx.json {
        println!("{}", serde_json::to_string_pretty(&comments)?);
        return Ok(());
    }
    for comment in comments {
        println!("[{} @ {}] {}", comment.author, comment.created_at, comment.text);
    }
    Ok(())
}
