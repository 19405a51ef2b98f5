//! `bd init` -- initialize a workspace.

use anyhow::Result;

use beadslog_config::WorkspaceConfig;

use crate::cli::InitArgs;
use crate::context::RuntimeContext;
use crate::workspace::Workspace;

/// Execute the `bd init` command.
pub fn run(_ctx: &RuntimeContext, args: &InitArgs) -> Result<()> {
    let root = std::env::current_dir()?;
    let mut config = WorkspaceConfig::default();
    config.prefix = Some(args.prefix.clone());

    let beads_dir = Workspace::init(&root, &args.prefix, &config)?;
    println!(
        "Initialized workspace with prefix '{}' at {}",
        args.prefix,
        beads_dir.display()
    );
    Ok(())
}
