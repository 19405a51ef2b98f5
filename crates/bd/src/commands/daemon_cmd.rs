//! `bd daemon` -- daemon lifecycle management.

use std::sync::Arc;
use std::sync::atomic::Ordering;
use std::time::Duration;

use anyhow::{Result, bail};

use beadslog_daemon::Daemon;
use beadslog_daemon::client::DaemonClient;
use beadslog_daemon::lifecycle::{self, DaemonPaths};
use beadslog_storage::{DB_FILE_NAME, SqliteStore};

use crate::cli::DaemonArgs;
use crate::context::RuntimeContext;
use crate::workspace::{VERSION, Workspace};

/// Execute the `bd daemon` command.
pub fn run(ctx: &RuntimeContext, args: &DaemonArgs) -> Result<()> {
    if args.start {
        return run_start(ctx);
    }
    if args.stop {
        return run_stop(ctx);
    }
    run_status(ctx)
}

/// Foreground daemon entry point.
///
/// The auto-start client spawns `bd daemon --start` with
/// `BD_DAEMON_FOREGROUND=1`; the process stays attached either way so the
/// behavior is identical on every platform.
fn run_start(ctx: &RuntimeContext) -> Result<()> {
    let workspace = Workspace::open(ctx)?;
    let paths = DaemonPaths::new(&workspace.beads_dir);

    let workdir = workspace
        .beads_dir
        .parent()
        .unwrap_or(&workspace.beads_dir)
        .to_path_buf();
    if let Err(e) =
        lifecycle::check_worktree_safety(&workdir, &workspace.config, Some(&workspace.store))
    {
        lifecycle::write_error_file(&paths, &e.to_string());
        bail!(e);
    }

    let store = Arc::new(SqliteStore::open(workspace.beads_dir.join(DB_FILE_NAME))?);
    let debounce = Duration::from_secs(workspace.config.daemon.flush_debounce_secs);
    let daemon = Daemon::new(store, workspace.jsonl_path(), VERSION, debounce);

    let shutdown = daemon.shutdown_flag();
    ctrlc::set_handler(move || {
        shutdown.store(true, Ordering::SeqCst);
    })?;

    if let Err(e) = daemon.run(&paths) {
        lifecycle::write_error_file(&paths, &e.to_string());
        bail!(e);
    }
    Ok(())
}

fn run_stop(ctx: &RuntimeContext) -> Result<()> {
    let workspace = Workspace::open(ctx)?;
    let paths = DaemonPaths::new(&workspace.beads_dir);

    match DaemonClient::connect(&paths.socket_path()) {
        Ok(mut client) => {
            client.request_shutdown()?;
            println!("Daemon stopping");
        }
        Err(_) => println!("No daemon running"),
    }
    Ok(())
}

fn run_status(ctx: &RuntimeContext) -> Result<()> {
    let workspace = Workspace::open(ctx)?;
    let paths = DaemonPaths::new(&workspace.beads_dir);

    match DaemonClient::connect(&paths.socket_path()) {
        Ok(mut client) => match client.health_info(VERSION) {
            Ok(info) => {
                println!(
                    "Daemon running: pid {}, version {}, up {}s, compatible: {}",
                    info.pid, info.version, info.uptime_secs, info.compatible
                );
            }
            Err(e) => println!("Daemon socket present but unhealthy: {e}"),
        },
        Err(_) => println!("No daemon running"),
    }
    Ok(())
}
