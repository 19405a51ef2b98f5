//! `bd` -- issue tracker CLI for the BeadsLog system.
//!
//! Parses arguments with clap, resolves the runtime context, and
//! dispatches to command handlers. The handlers route through the daemon
//! when one is reachable and fall back to direct store access otherwise.

mod cli;
mod commands;
mod context;
mod workspace;

use clap::Parser;

use cli::{Cli, Commands, DepCommands, LabelCommands};
use context::RuntimeContext;

fn main() {
    let cli = Cli::parse();
    let ctx = RuntimeContext::from_global_args(&cli.global);

    if ctx.verbose {
        tracing_subscriber::fmt()
            .with_env_filter("bd=debug,beadslog_daemon=debug,beadslog_sync=debug")
            .with_writer(std::io::stderr)
            .init();
    }

    let result = match cli.command {
        Some(Commands::Init(args)) => commands::init::run(&ctx, &args),
        Some(Commands::Create(args)) => commands::create::run(&ctx, &args),
        Some(Commands::Show(args)) => commands::show::run(&ctx, &args),
        Some(Commands::List(args)) => commands::list::run_list(&ctx, &args),
        Some(Commands::Ready(args)) => commands::list::run_ready(&ctx, &args),
        Some(Commands::Blocked) => commands::list::run_blocked(&ctx),
        Some(Commands::Close(args)) => commands::close::run_close(&ctx, &args),
        Some(Commands::Delete(args)) => commands::close::run_delete(&ctx, &args),
        Some(Commands::Update(args)) => commands::close::run_update(&ctx, &args),
        Some(Commands::Dep(DepCommands::Add(args))) => commands::dep::run_dep_add(&ctx, &args),
        Some(Commands::Dep(DepCommands::Remove(args))) => {
            commands::dep::run_dep_remove(&ctx, &args)
        }
        Some(Commands::Label(LabelCommands::Add(args))) => {
            commands::dep::run_label(&ctx, &args, true)
        }
        Some(Commands::Label(LabelCommands::Remove(args))) => {
            commands::dep::run_label(&ctx, &args, false)
        }
        Some(Commands::Comment(args)) => commands::dep::run_comment_add(&ctx, &args),
        Some(Commands::Comments(args)) => commands::dep::run_comment_list(&ctx, &args),
        Some(Commands::Sync(args)) => commands::sync_cmd::run_sync(&ctx, &args),
        Some(Commands::RenamePrefix(args)) => commands::sync_cmd::run_rename_prefix(&ctx, &args),
        Some(Commands::Repair(args)) => commands::sync_cmd::run_repair(&ctx, &args),
        Some(Commands::Move(args)) => commands::move_cmd::run(&ctx, &args),
        Some(Commands::Daemon(args)) => commands::daemon_cmd::run(&ctx, &args),
        None => {
            use clap::CommandFactory;
            Cli::command().print_help().ok();
            println!();
            Ok(())
        }
    };

    if let Err(e) = result {
        if ctx.json {
            let err_json = serde_json::json!({ "error": format!("{:#}", e) });
            if let Ok(s) = serde_json::to_string(&err_json) {
                eprintln!("{s}");
            }
        } else {
            eprintln!("Error: {:#}", e);
        }
        std::process::exit(1);
    }
}
