//! Configuration management for the BeadsLog system.

pub mod beads_dir;
pub mod config;
pub mod env;
pub mod routes;

pub use beads_dir::{find_beads_dir, find_beads_dir_or_error};
pub use config::{ConfigError, WorkspaceConfig, load_config, save_config};
pub use env::{auto_start_enabled, daemon_disabled, is_truthy};
