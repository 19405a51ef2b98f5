//! Workspace handle: store, config, sync paths, daemon routing.

use std::path::{Path, PathBuf};

use anyhow::{Result, bail};
use tracing::debug;

use beadslog_config::beads_dir::write_last_touched;
use beadslog_config::{WorkspaceConfig, load_config};
use beadslog_core::idgen::split_id;
use beadslog_core::jsonl::{JSONL_FILE_NAME, LEGACY_JSONL_FILE_NAME};
use beadslog_daemon::DaemonClient;
use beadslog_daemon::autostart::connect_or_start;
use beadslog_daemon::lifecycle::DaemonPaths;
use beadslog_storage::sqlite::schema::config_keys;
use beadslog_storage::{DB_FILE_NAME, SqliteStore};
use beadslog_sync::export::export_to_jsonl;
use beadslog_sync::freshness::ensure_fresh;
use beadslog_sync::router::Router;

use crate::context::RuntimeContext;

/// Client version string baked into the binary; the daemon health check
/// compares against this.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// An open workspace: the local store plus its sync configuration.
pub struct Workspace {
    pub beads_dir: PathBuf,
    pub store: SqliteStore,
    pub config: WorkspaceConfig,
}

impl Workspace {
    /// Opens the workspace the context resolved to.
    pub fn open(ctx: &RuntimeContext) -> Result<Self> {
        let beads_dir = ctx.require_beads_dir()?;
        let config = load_config(&beads_dir)?;
        let store = SqliteStore::open(beads_dir.join(DB_FILE_NAME))?;
        Ok(Self {
            beads_dir,
            store,
            config,
        })
    }

    /// Canonical JSONL path (always the write target).
    pub fn jsonl_path(&self) -> PathBuf {
        self.beads_dir.join(JSONL_FILE_NAME)
    }

    /// JSONL path for reading: the canonical file, falling back to the
    /// legacy name when only that exists.
    pub fn jsonl_read_path(&self) -> PathBuf {
        let canonical = self.jsonl_path();
        if canonical.exists() {
            return canonical;
        }
        let legacy = self.beads_dir.join(LEGACY_JSONL_FILE_NAME);
        if legacy.exists() { legacy } else { canonical }
    }

    /// Runs the freshness gate before a direct-mode read.
    pub fn refresh(&self) -> Result<()> {
        ensure_fresh(&self.store, &self.jsonl_read_path())?;
        Ok(())
    }

    /// Exports the store to the canonical JSONL. Direct-mode commands are
    /// one-shot processes, so writes flush before exit instead of through
    /// the daemon's debounce.
    pub fn export(&self) -> Result<()> {
        export_to_jsonl(&self.store, &self.jsonl_path())?;
        Ok(())
    }

    /// The workspace's configured issue prefix.
    pub fn prefix(&self) -> String {
        self.store
            .get_config_impl(config_keys::ISSUE_PREFIX)
            .ok()
            .or_else(|| self.config.prefix.clone())
            .unwrap_or_else(|| "bd".to_owned())
    }

    /// Records the most recently touched issue.
    pub fn touch(&self, issue_id: &str) {
        let _ = write_last_touched(&self.beads_dir, issue_id);
    }

    /// Attempts a daemon connection, auto-starting if permitted.
    ///
    /// Returns `None` after printing one diagnostic line; callers then run
    /// in direct mode.
    pub fn try_daemon(&self, ctx: &RuntimeContext) -> Option<DaemonClient> {
        if ctx.no_daemon {
            return None;
        }
        let workdir = self.beads_dir.parent().unwrap_or(&self.beads_dir);
        let paths = DaemonPaths::new(&self.beads_dir);
        match connect_or_start(&paths, workdir, &self.config, VERSION) {
            Ok(client) => Some(client),
            Err(e) => {
                debug!(error = %e, "daemon unavailable");
                eprintln!("bd: running without daemon ({e})");
                None
            }
        }
    }

    /// Opens the store that owns `id`: the local one when the prefix
    /// matches, otherwise a short-lived store found through the town
    /// routes. The daemon is bypassed for cross-rig calls.
    pub fn store_for_id(&self, id: &str) -> Result<TargetStore<'_>> {
        let local_prefix = self.prefix();
        match split_id(id) {
            Some((prefix, _)) if prefix != local_prefix => {
                let start = self.beads_dir.parent().unwrap_or(Path::new("."));
                let router = Router::discover(start)?;
                let store = router.open_store_for_id(id)?;
                Ok(TargetStore::Remote(store))
            }
            _ => Ok(TargetStore::Local(&self.store)),
        }
    }

    /// Initializes a new workspace under `root`.
    pub fn init(root: &Path, prefix: &str, config: &WorkspaceConfig) -> Result<PathBuf> {
        beadslog_core::idgen::validate_prefix(prefix)?;
        let beads_dir = beadslog_config::beads_dir::ensure_beads_dir(root)?;

        let db_path = beads_dir.join(DB_FILE_NAME);
        if db_path.exists() {
            bail!("workspace already initialized at {}", beads_dir.display());
        }

        let store = SqliteStore::open(&db_path)?;
        store.set_config_impl(config_keys::ISSUE_PREFIX, prefix)?;
        beadslog_config::save_config(&beads_dir, config)?;
        export_to_jsonl(&store, &beads_dir.join(JSONL_FILE_NAME))?;
        Ok(beads_dir)
    }
}

/// The store an operation targets: local or another rig's.
pub enum TargetStore<'a> {
    Local(&'a SqliteStore),
    Remote(SqliteStore),
}

impl TargetStore<'_> {
    /// The underlying store reference.
    pub fn store(&self) -> &SqliteStore {
        match self {
            TargetStore::Local(store) => store,
            TargetStore::Remote(store) => store,
        }
    }

    /// Returns `true` for a cross-rig target.
    pub fn is_remote(&self) -> bool {
        matches!(self, TargetStore::Remote(_))
    }
}
