//! Environment variables consumed by the core.

/// When truthy, bypass the daemon entirely.
pub const BEADS_NO_DAEMON: &str = "BEADS_NO_DAEMON";

/// When falsy, never auto-start a daemon.
pub const BEADS_AUTO_START_DAEMON: &str = "BEADS_AUTO_START_DAEMON";

/// Dedicated branch name for metadata commits.
pub const BEADS_SYNC_BRANCH: &str = "BEADS_SYNC_BRANCH";

/// Explicit beads directory (overrides discovery).
pub const BEADS_DIR: &str = "BEADS_DIR";

/// Explicit socket path (for test isolation).
pub const BD_SOCKET: &str = "BD_SOCKET";

/// Internal; tells a spawned daemon not to daemonize again.
pub const BD_DAEMON_FOREGROUND: &str = "BD_DAEMON_FOREGROUND";

/// Optional attribution on close events.
pub const CLAUDE_SESSION_ID: &str = "CLAUDE_SESSION_ID";

/// Parses an environment value as a boolean flag.
///
/// `1`, `true`, `yes`, and `on` (case-insensitive) are truthy.
pub fn is_truthy(value: &str) -> bool {
    matches!(
        value.trim().to_ascii_lowercase().as_str(),
        "1" | "true" | "yes" | "on"
    )
}

/// Returns `true` if `BEADS_NO_DAEMON` disables the daemon.
pub fn daemon_disabled() -> bool {
    std::env::var(BEADS_NO_DAEMON)
        .map(|v| is_truthy(&v))
        .unwrap_or(false)
}

/// Returns `true` unless `BEADS_AUTO_START_DAEMON` is set falsy.
pub fn auto_start_enabled() -> bool {
    match std::env::var(BEADS_AUTO_START_DAEMON) {
        Ok(v) => is_truthy(&v),
        Err(_) => true,
    }
}

/// Returns the sync branch configured via environment, if any.
pub fn env_sync_branch() -> Option<String> {
    std::env::var(BEADS_SYNC_BRANCH)
        .ok()
        .filter(|v| !v.trim().is_empty())
}

/// Returns the session ID for close-event attribution, if any.
pub fn session_id() -> Option<String> {
    std::env::var(CLAUDE_SESSION_ID)
        .ok()
        .filter(|v| !v.trim().is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn truthy_values() {
        for v in ["1", "true", "YES", "On", " true "] {
            assert!(is_truthy(v), "{v} should be truthy");
        }
        for v in ["0", "false", "no", "off", "", "2"] {
            assert!(!is_truthy(v), "{v} should be falsy");
        }
    }
}
