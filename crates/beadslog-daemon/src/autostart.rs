//! Client-driven daemon auto-start with exponential backoff.
//!
//! Clients racing to spawn a daemon serialize on a start lock next to the
//! socket. A process-scoped failure counter backs off repeated start
//! attempts: after `n` consecutive failures the retry window is
//! `min(5 * 2^(n-1), 120)` seconds. A successful start resets the counter.

use std::path::Path;
use std::process::{Command, Stdio};
use std::sync::Mutex;
use std::time::{Duration, Instant};

use tracing::{debug, info, warn};

use beadslog_config::WorkspaceConfig;
use beadslog_config::env::{BD_DAEMON_FOREGROUND, auto_start_enabled, daemon_disabled};
use beadslog_git::gitdir::is_git_repo;
use beadslog_lockfile::{LockError, LockFile, StartLock, pid_is_alive};

use crate::client::{DaemonClient, socket_is_ready};
use crate::error::{DaemonError, Result};
use crate::lifecycle::{self, DaemonPaths};
use crate::socket_path::start_lock_path;

/// How long a client waits for a freshly spawned daemon's socket.
pub const STARTUP_WAIT: Duration = Duration::from_secs(5);

/// Poll interval while waiting for socket readiness.
pub const STARTUP_POLL: Duration = Duration::from_millis(100);

/// How long a version-mismatch restart waits for the old daemon to die.
const STOP_WAIT: Duration = Duration::from_secs(1);

/// Attempts to win or observe the start lock before giving up.
const START_LOCK_ATTEMPTS: u32 = 3;

// ---------------------------------------------------------------------------
// Backoff
// ---------------------------------------------------------------------------

/// Exponential backoff over consecutive start failures.
#[derive(Debug)]
pub struct Backoff {
    failures: u32,
    last_failure: Option<Instant>,
}

impl Backoff {
    pub const fn new() -> Self {
        Self {
            failures: 0,
            last_failure: None,
        }
    }

    /// Retry window after `n` consecutive failures: `min(5 * 2^(n-1), 120)`
    /// seconds.
    pub fn window(failures: u32) -> Duration {
        if failures == 0 {
            return Duration::ZERO;
        }
        let secs = 5u64.saturating_mul(1u64 << (failures - 1).min(32));
        Duration::from_secs(secs.min(120))
    }

    /// Whether a retry is permitted at `now`.
    pub fn can_retry_at(&self, now: Instant) -> bool {
        match self.last_failure {
            None => true,
            Some(last) => now.duration_since(last) >= Self::window(self.failures),
        }
    }

    pub fn record_failure_at(&mut self, now: Instant) {
        self.failures += 1;
        self.last_failure = Some(now);
    }

    pub fn record_success(&mut self) {
        self.failures = 0;
        self.last_failure = None;
    }

    pub fn failures(&self) -> u32 {
        self.failures
    }
}

impl Default for Backoff {
    fn default() -> Self {
        Self::new()
    }
}

/// Process-scoped backoff shared by every invocation in this process.
static BACKOFF: Mutex<Backoff> = Mutex::new(Backoff::new());

fn backoff_can_retry() -> bool {
    BACKOFF
        .lock()
        .unwrap_or_else(|e| e.into_inner())
        .can_retry_at(Instant::now())
}

fn backoff_record_failure() {
    BACKOFF
        .lock()
        .unwrap_or_else(|e| e.into_inner())
        .record_failure_at(Instant::now());
}

fn backoff_record_success() {
    BACKOFF
        .lock()
        .unwrap_or_else(|e| e.into_inner())
        .record_success();
}

// ---------------------------------------------------------------------------
// Connection entry point
// ---------------------------------------------------------------------------

/// Connects to the workspace daemon, auto-starting one if necessary.
///
/// Flow: env gates, worktree safety, dial + health, version-mismatch
/// restart, auto-start under the start lock with backoff. Any failure
/// surfaces as a downgrade error so the caller falls back to direct mode
/// with one diagnostic line.
pub fn connect_or_start(
    paths: &DaemonPaths,
    workdir: &Path,
    config: &WorkspaceConfig,
    client_version: &str,
) -> Result<DaemonClient> {
    if daemon_disabled() {
        return Err(DaemonError::Unavailable(
            "daemon disabled by BEADS_NO_DAEMON".into(),
        ));
    }
    lifecycle::check_worktree_safety(workdir, config, None)?;

    let socket = paths.socket_path();

    if let Ok(mut client) = DaemonClient::connect(&socket) {
        match client.health_info(client_version) {
            Ok(info) if info.compatible => return Ok(client),
            Ok(info) => {
                info!(
                    daemon = %info.version,
                    client = %client_version,
                    "daemon version mismatch, restarting"
                );
                restart_daemon(paths, client)?;
                return DaemonClient::connect(&socket);
            }
            Err(e) => {
                debug!(error = %e, "health probe failed, attempting start");
            }
        }
    }

    if !auto_start_enabled() {
        return Err(DaemonError::Unavailable(
            "auto-start disabled by BEADS_AUTO_START_DAEMON".into(),
        ));
    }
    if !backoff_can_retry() {
        return Err(DaemonError::Unavailable(
            "daemon start backing off after repeated failures".into(),
        ));
    }

    match start_daemon(paths, workdir) {
        Ok(()) => {
            backoff_record_success();
            DaemonClient::connect(&socket)
        }
        Err(e) => {
            backoff_record_failure();
            Err(e)
        }
    }
}

// ---------------------------------------------------------------------------
// Start sequence
// ---------------------------------------------------------------------------

/// Spawns a daemon for this workspace, serialized on the start lock.
fn start_daemon(paths: &DaemonPaths, workdir: &Path) -> Result<()> {
    let socket = paths.socket_path();
    let lock_path = start_lock_path(&socket);

    for attempt in 0..START_LOCK_ATTEMPTS {
        match StartLock::acquire(&lock_path) {
            Ok(_lock) => {
                // The daemon requires a git repository.
                if !is_git_repo(workdir) {
                    return Err(DaemonError::Unavailable(
                        "not in a git repository; daemon requires one".into(),
                    ));
                }

                spawn_daemon_process(paths)?;

                if wait_for_socket(&socket, STARTUP_WAIT) {
                    return Ok(());
                }
                let detail = lifecycle::take_error_file(paths)
                    .unwrap_or_else(|| "daemon did not become ready".into());
                return Err(DaemonError::Unavailable(detail));
            }
            Err(LockError::Held { .. }) => {
                // Someone else is starting a daemon. If they are alive and
                // actually hold the daemon lock, wait for their socket.
                let holder = StartLock::holder_pid(&lock_path);
                let holder_alive = holder.is_some_and(pid_is_alive);
                let daemon_running = LockFile::is_held(paths.lock_path());

                if holder_alive && daemon_running {
                    if wait_for_socket(&socket, STARTUP_WAIT) {
                        return Ok(());
                    }
                    return Err(DaemonError::Unavailable(
                        "peer-started daemon did not become ready".into(),
                    ));
                }

                debug!(attempt, ?holder, "reaping stale start lock");
                StartLock::remove_stale(&lock_path)?;
            }
            Err(e) => return Err(e.into()),
        }
    }

    Err(DaemonError::Unavailable(
        "could not acquire daemon start lock".into(),
    ))
}

/// Spawns the daemon process: same executable, `daemon --start`, working
/// directory at the beads dir, stdio detached, foreground marker set. The
/// child is reaped on a background thread to avoid zombies.
fn spawn_daemon_process(paths: &DaemonPaths) -> Result<()> {
    let exe = std::env::current_exe()
        .ok()
        .or_else(|| std::env::args().next().map(Into::into))
        .ok_or_else(|| DaemonError::Unavailable("cannot locate own executable".into()))?;

    let child = Command::new(&exe)
        .args(["daemon", "--start"])
        .current_dir(&paths.beads_dir)
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .env(BD_DAEMON_FOREGROUND, "1")
        .spawn()
        .map_err(|e| DaemonError::Unavailable(format!("spawn failed: {e}")))?;

    std::thread::spawn(move || {
        let mut child = child;
        let _ = child.wait();
    });

    Ok(())
}

/// Polls the socket until it answers a health roundtrip or the deadline
/// passes.
pub fn wait_for_socket(socket: &Path, timeout: Duration) -> bool {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if socket_is_ready(socket) {
            return true;
        }
        std::thread::sleep(STARTUP_POLL);
    }
    false
}

// ---------------------------------------------------------------------------
// Version-mismatch restart
// ---------------------------------------------------------------------------

/// Stops an incompatible daemon and spawns a fresh one.
fn restart_daemon(paths: &DaemonPaths, mut client: DaemonClient) -> Result<()> {
    let pid = lifecycle::read_pid_file(paths);
    let _ = client.request_shutdown();
    drop(client);

    // Poll until the old process dies, then force-kill if it lingers.
    if let Some(pid) = pid {
        let deadline = Instant::now() + STOP_WAIT;
        while pid_is_alive(pid) && Instant::now() < deadline {
            std::thread::sleep(Duration::from_millis(100));
        }
        if pid_is_alive(pid) {
            warn!(pid, "daemon ignored shutdown, force-killing");
            let _ = Command::new("kill").args(["-9", &pid.to_string()]).status();
        }
    }

    // Clear stale state before respawning.
    let _ = std::fs::remove_file(paths.socket_path());
    let _ = std::fs::remove_file(paths.pid_path());

    spawn_daemon_process(paths)?;
    if wait_for_socket(&paths.socket_path(), STARTUP_WAIT) {
        Ok(())
    } else {
        Err(DaemonError::Unavailable(
            "restarted daemon did not become ready".into(),
        ))
    }
}
