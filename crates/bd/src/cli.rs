//! Command-line argument definitions.

use clap::{Args, Parser, Subcommand};

/// Dependency-aware issue tracker for agents and developers.
#[derive(Debug, Parser)]
#[command(name = "bd", version, about)]
pub struct Cli {
    #[command(flatten)]
    pub global: GlobalArgs,

    #[command(subcommand)]
    pub command: Option<Commands>,
}

/// Flags shared by every subcommand.
#[derive(Debug, Args)]
pub struct GlobalArgs {
    /// Actor name for the audit trail.
    #[arg(long, global = true)]
    pub actor: Option<String>,

    /// Bypass the daemon and operate on the store directly.
    #[arg(long, global = true)]
    pub no_daemon: bool,

    /// Output JSON instead of human-readable text.
    #[arg(long, global = true)]
    pub json: bool,

    /// Verbose logging to stderr.
    #[arg(long, short = 'v', global = true)]
    pub verbose: bool,

    /// Explicit .beads directory (overrides discovery).
    #[arg(long, global = true, env = "BEADS_DIR")]
    pub beads_dir: Option<String>,
}

#[derive(Debug, Subcommand)]
pub enum Commands {
    /// Initialize a workspace.
    Init(InitArgs),
    /// Create an issue.
    Create(CreateArgs),
    /// Show one issue with its relations.
    Show(IdArg),
    /// List issues.
    List(ListArgs),
    /// List ready work (open, unblocked, undeferred).
    Ready(ReadyArgs),
    /// List blocked issues with blocker counts.
    Blocked,
    /// Close an issue.
    Close(CloseArgs),
    /// Soft-delete an issue (tombstone).
    Delete(DeleteArgs),
    /// Update issue fields.
    Update(UpdateArgs),
    /// Manage dependencies.
    #[command(subcommand)]
    Dep(DepCommands),
    /// Manage labels.
    #[command(subcommand)]
    Label(LabelCommands),
    /// Add a comment.
    Comment(CommentArgs),
    /// List comments.
    Comments(IdArg),
    /// Synchronize the store and the JSONL file.
    Sync(SyncArgs),
    /// Rename the workspace issue prefix.
    RenamePrefix(RenamePrefixArgs),
    /// Consolidate a multi-prefix store under one prefix.
    Repair(RepairArgs),
    /// Move an issue to another rig.
    Move(MoveArgs),
    /// Daemon lifecycle.
    Daemon(DaemonArgs),
}

#[derive(Debug, Args)]
pub struct InitArgs {
    /// Issue prefix for this workspace.
    #[arg(long, default_value = "bd")]
    pub prefix: String,
}

#[derive(Debug, Args)]
pub struct CreateArgs {
    /// Issue title.
    pub title: String,

    #[arg(long, short = 'd', default_value = "")]
    pub description: String,

    /// Priority 0-4 (0 = highest).
    #[arg(long, short = 'p', default_value_t = 2)]
    pub priority: i32,

    /// Issue type (bug, feature, task, epic, chore, ...).
    #[arg(long, short = 't', default_value = "task")]
    pub issue_type: String,

    #[arg(long)]
    pub assignee: Option<String>,

    /// Create as a child of this epic (hierarchical ID).
    #[arg(long)]
    pub parent: Option<String>,

    /// Labels to attach.
    #[arg(long, short = 'l')]
    pub label: Vec<String>,
}

#[derive(Debug, Args)]
pub struct IdArg {
    /// Issue ID (full or partial).
    pub id: String,
}

#[derive(Debug, Args)]
pub struct ListArgs {
    /// Substring search over title/description/notes.
    #[arg(default_value = "")]
    pub query: String,

    #[arg(long)]
    pub status: Option<String>,

    #[arg(long)]
    pub assignee: Option<String>,

    #[arg(long)]
    pub limit: Option<i32>,
}

#[derive(Debug, Args)]
pub struct ReadyArgs {
    #[arg(long)]
    pub assignee: Option<String>,

    #[arg(long)]
    pub limit: Option<i32>,
}

#[derive(Debug, Args)]
pub struct CloseArgs {
    /// Issue ID (full or partial).
    pub id: String,

    #[arg(long, default_value = "")]
    pub reason: String,
}

#[derive(Debug, Args)]
pub struct DeleteArgs {
    /// Issue ID (full or partial).
    pub id: String,

    #[arg(long, default_value = "")]
    pub reason: String,
}

#[derive(Debug, Args)]
pub struct UpdateArgs {
    /// Issue ID (full or partial).
    pub id: String,

    #[arg(long)]
    pub title: Option<String>,

    #[arg(long)]
    pub description: Option<String>,

    #[arg(long)]
    pub notes: Option<String>,

    #[arg(long)]
    pub status: Option<String>,

    #[arg(long)]
    pub priority: Option<i32>,

    #[arg(long)]
    pub assignee: Option<String>,
}

#[derive(Debug, Subcommand)]
pub enum DepCommands {
    /// Add a dependency edge.
    Add(DepAddArgs),
    /// Remove a dependency edge.
    Remove(DepRemoveArgs),
}

#[derive(Debug, Args)]
pub struct DepAddArgs {
    /// Dependent issue.
    pub from: String,
    /// Issue it depends on (or external:<rig>:<id>).
    pub to: String,
    /// Dependency type.
    #[arg(long, short = 't', default_value = "blocks")]
    pub dep_type: String,
}

#[derive(Debug, Args)]
pub struct DepRemoveArgs {
    pub from: String,
    pub to: String,
}

#[derive(Debug, Subcommand)]
pub enum LabelCommands {
    /// Add a label.
    Add(LabelArgs),
    /// Remove a label.
    Remove(LabelArgs),
}

#[derive(Debug, Args)]
pub struct LabelArgs {
    pub id: String,
    pub label: String,
}

#[derive(Debug, Args)]
pub struct CommentArgs {
    pub id: String,
    pub text: String,
}

#[derive(Debug, Args)]
pub struct SyncArgs {
    /// Export the store to JSONL immediately.
    #[arg(long)]
    pub flush: bool,

    /// Import the JSONL into the store.
    #[arg(long)]
    pub import: bool,

    /// Resolve git conflict markers in the JSONL.
    #[arg(long)]
    pub resolve: bool,
}

#[derive(Debug, Args)]
pub struct RenamePrefixArgs {
    /// Current prefix.
    pub old: String,
    /// New prefix.
    pub new: String,
}

#[derive(Debug, Args)]
pub struct RepairArgs {
    /// Prefix to consolidate under (defaults to the configured one).
    #[arg(long)]
    pub target: Option<String>,
}

#[derive(Debug, Args)]
pub struct MoveArgs {
    /// Issue to move.
    pub id: String,
    /// Target rig name.
    pub rig: String,
}

#[derive(Debug, Args)]
pub struct DaemonArgs {
    /// Run the daemon in the foreground.
    #[arg(long)]
    pub start: bool,

    /// Stop a running daemon.
    #[arg(long)]
    pub stop: bool,

    /// Report daemon status.
    #[arg(long)]
    pub status: bool,
}
