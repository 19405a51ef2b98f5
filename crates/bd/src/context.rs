//! Runtime context for command execution.
//!
//! The [`RuntimeContext`] holds the state a command handler needs:
//! resolved beads directory, actor name, and global flags. Constructed
//! once in `main` after CLI parsing; tests construct contexts directly
//! instead of mutating globals.

use std::env;
use std::path::PathBuf;

use anyhow::{Context as _, Result};

use beadslog_config::beads_dir::find_beads_dir;
use beadslog_git::gitdir::get_git_user_name;

use crate::cli::GlobalArgs;

/// Runtime context passed to every command handler.
#[derive(Debug, Clone)]
pub struct RuntimeContext {
    /// Resolved `.beads` directory, when one was found.
    pub beads_dir: Option<PathBuf>,

    /// Actor name for the audit trail.
    pub actor: String,

    /// Whether to produce JSON output.
    pub json: bool,

    /// Bypass the daemon.
    pub no_daemon: bool,

    /// Verbose output.
    pub verbose: bool,
}

impl RuntimeContext {
    /// Builds a `RuntimeContext` from parsed global arguments.
    pub fn from_global_args(global: &GlobalArgs) -> Self {
        let beads_dir = global
            .beads_dir
            .as_ref()
            .map(PathBuf::from)
            .filter(|p| p.is_dir())
            .or_else(|| {
                env::current_dir()
                    .ok()
                    .and_then(|cwd| find_beads_dir(&cwd))
            });

        Self {
            beads_dir,
            actor: resolve_actor(global.actor.as_deref()),
            json: global.json,
            no_daemon: global.no_daemon,
            verbose: global.verbose,
        }
    }

    /// Returns the beads directory or a user-facing error.
    pub fn require_beads_dir(&self) -> Result<PathBuf> {
        self.beads_dir
            .clone()
            .context("no .beads directory found (run 'bd init' first)")
    }
}

/// Resolves the actor name using the priority chain:
/// explicit flag > BD_ACTOR env > BEADS_ACTOR env > git config user.name >
/// USER env > "unknown".
fn resolve_actor(flag_value: Option<&str>) -> String {
    if let Some(actor) = flag_value {
        if !actor.is_empty() {
            return actor.to_string();
        }
    }

    for var in ["BD_ACTOR", "BEADS_ACTOR"] {
        if let Ok(actor) = env::var(var) {
            if !actor.is_empty() {
                return actor;
            }
        }
    }

    if let Some(name) = get_git_user_name() {
        return name;
    }

    if let Ok(user) = env::var("USER").or_else(|_| env::var("USERNAME")) {
        if !user.is_empty() {
            return user;
        }
    }

    "unknown".to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resolve_actor_with_flag() {
        assert_eq!(resolve_actor(Some("alice")), "alice");
    }

    #[test]
    fn resolve_actor_empty_flag_falls_through() {
        let result = resolve_actor(Some(""));
        assert!(!result.is_empty());
    }

    #[test]
    fn resolve_actor_none_falls_through() {
        let result = resolve_actor(None);
        assert!(!result.is_empty());
    }
}
