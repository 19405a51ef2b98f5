//! Git integration for the BeadsLog system.

pub mod commands;
pub mod gitdir;

pub use commands::{GitError, git_command};
pub use gitdir::{find_git_root, is_git_repo, is_worktree};
