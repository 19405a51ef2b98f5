//! Workspace configuration: `.beads/config.yaml`.
//!
//! Configuration is layered: the YAML file provides the base, and
//! `BEADS_`-prefixed environment variables override individual keys
//! (`BEADS_SYNC_BRANCH` overrides `sync.branch`). Loading uses figment so
//! the layering is declarative.

use std::collections::HashMap;
use std::path::Path;

use figment::Figment;
use figment::providers::{Env, Format, Serialized, Yaml};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Name of the config file inside `.beads/`.
pub const CONFIG_FILE_NAME: &str = "config.yaml";

// ---------------------------------------------------------------------------
// Error types
// ---------------------------------------------------------------------------

/// Errors that can occur during configuration operations.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The configuration file could not be read or written.
    #[error("failed to read config file: {0}")]
    ReadError(#[from] std::io::Error),

    /// The configuration file contained invalid YAML.
    #[error("failed to parse config file: {0}")]
    ParseError(#[from] serde_yaml::Error),

    /// Figment could not assemble the layered configuration.
    #[error("failed to load configuration: {0}")]
    LoadError(#[from] Box<figment::Error>),

    /// The `.beads/` directory was not found.
    #[error("no .beads directory found (run 'bd init' first)")]
    BeadsDirNotFound,
}

/// A specialized `Result` type for configuration operations.
pub type Result<T> = std::result::Result<T, ConfigError>;

// ---------------------------------------------------------------------------
// Sub-configs
// ---------------------------------------------------------------------------

/// Sync configuration section.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct SyncConfig {
    /// Dedicated git branch for metadata commits. When set, the daemon may
    /// run inside user-owned worktrees.
    #[serde(default)]
    pub branch: Option<String>,

    /// Remote used for sync-branch pushes.
    #[serde(default)]
    pub remote: Option<String>,
}

/// Multi-repo configuration section.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct ReposConfig {
    /// Primary repo path (where canonical issues live).
    #[serde(default)]
    pub primary: String,

    /// Additional repos whose JSONL feeds into imports.
    #[serde(default)]
    pub additional: Vec<String>,
}

/// Daemon configuration section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DaemonConfig {
    /// Flush debounce in seconds.
    #[serde(default = "default_flush_debounce")]
    pub flush_debounce_secs: u64,
}

impl Default for DaemonConfig {
    fn default() -> Self {
        Self {
            flush_debounce_secs: default_flush_debounce(),
        }
    }
}

fn default_flush_debounce() -> u64 {
    5
}

/// Contributor routing section.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct ContributorConfig {
    /// Planning repo for contributor-routed issues.
    #[serde(default)]
    pub planning_repo: Option<String>,
}

// ---------------------------------------------------------------------------
// Main config struct
// ---------------------------------------------------------------------------

/// The full workspace configuration, corresponding to `.beads/config.yaml`.
///
/// All fields use serde defaults so a partially-specified YAML file
/// deserializes correctly.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct WorkspaceConfig {
    /// Issue ID prefix (e.g., `"bd"`).
    #[serde(default, rename = "issue-prefix")]
    pub prefix: Option<String>,

    /// Actor identity override.
    #[serde(default)]
    pub actor: Option<String>,

    /// Sync configuration.
    #[serde(default)]
    pub sync: SyncConfig,

    /// Multi-repo configuration.
    #[serde(default)]
    pub repos: ReposConfig,

    /// Daemon configuration.
    #[serde(default)]
    pub daemon: DaemonConfig,

    /// Contributor routing.
    #[serde(default)]
    pub contributor: ContributorConfig,

    /// External projects for cross-project dependency resolution.
    #[serde(default)]
    pub external_projects: HashMap<String, String>,
}

impl WorkspaceConfig {
    /// Returns the configured sync branch, if any.
    pub fn sync_branch(&self) -> Option<&str> {
        self.sync.branch.as_deref().filter(|b| !b.is_empty())
    }
}

// ---------------------------------------------------------------------------
// Public API
// ---------------------------------------------------------------------------

/// Load configuration from `.beads/config.yaml`, layered under
/// `BEADS_`-prefixed environment overrides.
///
/// A missing file yields the defaults (env overrides still apply).
pub fn load_config(beads_dir: &Path) -> Result<WorkspaceConfig> {
    let config_path = beads_dir.join(CONFIG_FILE_NAME);

    let figment = Figment::from(Serialized::defaults(WorkspaceConfig::default()))
        .merge(Yaml::file(config_path))
        .merge(Env::prefixed("BEADS_").split("_"));

    let config: WorkspaceConfig = figment.extract().map_err(Box::new)?;
    Ok(config)
}

/// Save configuration to `.beads/config.yaml`.
///
/// The directory is created if it does not exist.
pub fn save_config(beads_dir: &Path, config: &WorkspaceConfig) -> Result<()> {
    std::fs::create_dir_all(beads_dir)?;

    let config_path = beads_dir.join(CONFIG_FILE_NAME);
    let yaml = serde_yaml::to_string(config)?;
    std::fs::write(config_path, yaml)?;
    Ok(())
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let cfg = WorkspaceConfig::default();
        assert!(cfg.prefix.is_none());
        assert!(cfg.sync_branch().is_none());
        assert!(cfg.repos.additional.is_empty());
        assert_eq!(cfg.daemon.flush_debounce_secs, 5);
    }

    #[test]
    fn test_load_missing_config_returns_default() {
        let dir = tempfile::tempdir().unwrap();
        let cfg = load_config(dir.path()).unwrap();
        assert!(cfg.prefix.is_none());
    }

    #[test]
    fn test_roundtrip_config() {
        let dir = tempfile::tempdir().unwrap();
        let beads_dir = dir.path().join(".beads");

        let mut cfg = WorkspaceConfig::default();
        cfg.prefix = Some("test".to_string());
        cfg.sync.branch = Some("beads-sync".to_string());

        save_config(&beads_dir, &cfg).unwrap();
        let loaded = load_config(&beads_dir).unwrap();

        assert_eq!(loaded.prefix.as_deref(), Some("test"));
        assert_eq!(loaded.sync_branch(), Some("beads-sync"));
    }

    #[test]
    fn test_deserialize_partial_yaml() {
        let yaml = "issue-prefix: proj\n";
        let cfg: WorkspaceConfig = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(cfg.prefix.as_deref(), Some("proj"));
        // Everything else should be default.
        assert!(cfg.sync_branch().is_none());
        assert_eq!(cfg.daemon.flush_debounce_secs, 5);
    }

    #[test]
    fn test_env_overrides_sync_branch() {
        figment::Jail::expect_with(|jail| {
            jail.set_env("BEADS_SYNC_BRANCH", "from-env");
            let dir = jail.directory().to_path_buf();
            let cfg = load_config(&dir).unwrap();
            assert_eq!(cfg.sync_branch(), Some("from-env"));
            Ok(())
        });
    }

    #[test]
    fn test_empty_sync_branch_treated_as_unset() {
        let mut cfg = WorkspaceConfig::default();
        cfg.sync.branch = Some(String::new());
        assert!(cfg.sync_branch().is_none());
    }
}
