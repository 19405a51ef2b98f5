//! Daemon lifecycle: workspace lock, pid/error files, worktree safety.

use std::path::{Path, PathBuf};

use tracing::warn;

use beadslog_config::WorkspaceConfig;
use beadslog_config::env::env_sync_branch;
use beadslog_git::gitdir::is_worktree;
use beadslog_lockfile::{LockFile, LockHeader};
use beadslog_storage::SqliteStore;
use beadslog_storage::sqlite::schema::config_keys;

use crate::error::{DaemonError, Result};

/// Lock file name inside `.beads/`.
pub const DAEMON_LOCK_FILE: &str = "daemon.lock";
/// Pid file name inside `.beads/`.
pub const DAEMON_PID_FILE: &str = "daemon.pid";
/// Error file a failed daemon start leaves for the client to surface.
pub const DAEMON_ERROR_FILE: &str = "daemon-error";

/// Well-known file paths for a workspace's daemon.
#[derive(Debug, Clone)]
pub struct DaemonPaths {
    pub beads_dir: PathBuf,
}

impl DaemonPaths {
    pub fn new(beads_dir: impl Into<PathBuf>) -> Self {
        Self {
            beads_dir: beads_dir.into(),
        }
    }

    pub fn lock_path(&self) -> PathBuf {
        self.beads_dir.join(DAEMON_LOCK_FILE)
    }

    pub fn pid_path(&self) -> PathBuf {
        self.beads_dir.join(DAEMON_PID_FILE)
    }

    pub fn error_path(&self) -> PathBuf {
        self.beads_dir.join(DAEMON_ERROR_FILE)
    }

    pub fn socket_path(&self) -> PathBuf {
        crate::socket_path::socket_path(&self.beads_dir)
    }
}

/// Holds the workspace's exclusive daemon lock for the process lifetime.
///
/// Dropping the guard removes the pid file and socket; the advisory lock
/// itself is released by the OS even on a crash.
#[derive(Debug)]
pub struct DaemonGuard {
    _lock: LockFile,
    paths: DaemonPaths,
}

impl DaemonGuard {
    /// Acquires the daemon lock, writing PID and version into the header.
    ///
    /// A second daemon observing the held lock reads the header and exits
    /// with [`DaemonError::AlreadyRunning`].
    pub fn acquire(paths: DaemonPaths, version: &str) -> Result<Self> {
        std::fs::create_dir_all(&paths.beads_dir)
            .map_err(|e| DaemonError::io(&paths.beads_dir, e))?;

        let lock_path = paths.lock_path();
        let lock = match LockFile::acquire(&lock_path, &LockHeader::current(version)) {
            Ok(lock) => lock,
            Err(beadslog_lockfile::LockError::Held { .. }) => {
                let pid = LockFile::read_header(&lock_path)
                    .map(|h| h.pid)
                    .unwrap_or(0);
                return Err(DaemonError::AlreadyRunning { pid });
            }
            Err(e) => return Err(e.into()),
        };

        let pid_path = paths.pid_path();
        std::fs::write(&pid_path, format!("{}\n", std::process::id()))
            .map_err(|e| DaemonError::io(&pid_path, e))?;

        // A clean start invalidates any stale error report.
        let _ = std::fs::remove_file(paths.error_path());

        Ok(Self { _lock: lock, paths })
    }
}

impl Drop for DaemonGuard {
    fn drop(&mut self) {
        let _ = std::fs::remove_file(self.paths.pid_path());
        let _ = std::fs::remove_file(self.paths.socket_path());
    }
}

/// Reads the pid file, if present.
pub fn read_pid_file(paths: &DaemonPaths) -> Option<u32> {
    let contents = std::fs::read_to_string(paths.pid_path()).ok()?;
    contents.trim().parse().ok()
}

/// Writes the daemon error file for the auto-start client to surface.
pub fn write_error_file(paths: &DaemonPaths, message: &str) {
    if let Err(e) = std::fs::write(paths.error_path(), message) {
        warn!(error = %e, "could not write daemon error file");
    }
}

/// Reads and removes the daemon error file.
pub fn take_error_file(paths: &DaemonPaths) -> Option<String> {
    let contents = std::fs::read_to_string(paths.error_path()).ok()?;
    let _ = std::fs::remove_file(paths.error_path());
    let trimmed = contents.trim();
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed.to_owned())
    }
}

/// Returns the configured sync branch: environment first, then
/// `config.yaml`, then the store's config table.
pub fn resolve_sync_branch(config: &WorkspaceConfig, store: Option<&SqliteStore>) -> Option<String> {
    if let Some(branch) = env_sync_branch() {
        return Some(branch);
    }
    if let Some(branch) = config.sync_branch() {
        return Some(branch.to_owned());
    }
    store
        .and_then(|s| s.get_config_impl(config_keys::SYNC_BRANCH).ok())
        .filter(|b| !b.trim().is_empty())
}

/// Checks whether a daemon may run in this working directory.
///
/// Inside a git worktree the daemon's implicit commits would land on an
/// arbitrary branch, so a configured sync branch is required there.
pub fn check_worktree_safety(
    workdir: &Path,
    config: &WorkspaceConfig,
    store: Option<&SqliteStore>,
) -> Result<()> {
    let in_worktree = is_worktree(workdir).unwrap_or(false);
    if in_worktree && resolve_sync_branch(config, store).is_none() {
        return Err(DaemonError::WorktreeUnsafe);
    }
    Ok(())
}

/// Mirrors [`check_worktree_safety`] as a boolean for auto-start gating.
pub fn should_auto_start(workdir: &Path, config: &WorkspaceConfig) -> bool {
    check_worktree_safety(workdir, config, None).is_ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn guard_writes_pid_and_cleans_up() {
        let dir = tempfile::tempdir().unwrap();
        let paths = DaemonPaths::new(dir.path());

        {
            let _guard = DaemonGuard::acquire(paths.clone(), "0.1.0").unwrap();
            assert_eq!(read_pid_file(&paths), Some(std::process::id()));

            let header = LockFile::read_header(paths.lock_path()).unwrap();
            assert_eq!(header.version, "0.1.0");
            assert_eq!(header.pid, std::process::id());
        }

        assert_eq!(read_pid_file(&paths), None, "pid file removed on drop");
    }

    #[test]
    fn error_file_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let paths = DaemonPaths::new(dir.path());

        assert_eq!(take_error_file(&paths), None);
        write_error_file(&paths, "bind failed: address in use");
        assert_eq!(
            take_error_file(&paths).as_deref(),
            Some("bind failed: address in use")
        );
        // Taking consumes the file.
        assert_eq!(take_error_file(&paths), None);
    }

    #[test]
    fn sync_branch_resolution_order() {
        let mut config = WorkspaceConfig::default();
        assert_eq!(resolve_sync_branch(&config, None), None);

        config.sync.branch = Some("from-file".into());
        assert_eq!(
            resolve_sync_branch(&config, None).as_deref(),
            Some("from-file")
        );

        let store = SqliteStore::open_in_memory().unwrap();
        store
            .set_config_impl(config_keys::SYNC_BRANCH, "from-db")
            .unwrap();
        // File config still wins over the store.
        assert_eq!(
            resolve_sync_branch(&config, Some(&store)).as_deref(),
            Some("from-file")
        );

        config.sync.branch = None;
        assert_eq!(
            resolve_sync_branch(&config, Some(&store)).as_deref(),
            Some("from-db")
        );
    }

    #[test]
    fn non_worktree_dir_is_safe() {
        let dir = tempfile::tempdir().unwrap();
        let config = WorkspaceConfig::default();
        // A plain directory is not a worktree; safety check passes.
        assert!(check_worktree_safety(dir.path(), &config, None).is_ok());
        assert!(should_auto_start(dir.path(), &config));
    }

    #[test]
    fn worktree_requires_sync_branch() {
        let dir = tempfile::tempdir().unwrap();
        let main = dir.path().join("main");
        std::fs::create_dir(&main).unwrap();

        let git = |args: &[&str], cwd: &std::path::Path| {
            let status = std::process::Command::new("git")
                .args(args)
                .current_dir(cwd)
                .output()
                .unwrap();
            assert!(status.status.success(), "git {args:?} failed: {status:?}");
        };
        git(&["init"], &main);
        git(&["config", "user.email", "t@example.com"], &main);
        git(&["config", "user.name", "t"], &main);
        git(&["commit", "--allow-empty", "-m", "init"], &main);
        let wt = dir.path().join("wt");
        git(&["worktree", "add", wt.to_str().unwrap()], &main);

        let mut config = WorkspaceConfig::default();
        // No sync branch: the daemon must refuse the worktree.
        let err = check_worktree_safety(&wt, &config, None).unwrap_err();
        assert!(matches!(err, DaemonError::WorktreeUnsafe));
        assert!(!should_auto_start(&wt, &config));

        // The main checkout is fine either way.
        assert!(check_worktree_safety(&main, &config, None).is_ok());

        // Configuring a sync branch makes the worktree safe.
        config.sync.branch = Some("beads-sync".into());
        assert!(check_worktree_safety(&wt, &config, None).is_ok());
        assert!(should_auto_start(&wt, &config));
    }
}
