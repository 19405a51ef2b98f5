//! Socket path derivation.
//!
//! The socket conventionally lives at `.beads/bd.sock`. Unix `sun_path`
//! is limited (108 bytes on Linux, 104 on macOS), so deep workspace paths
//! rehome the socket under `/tmp/beads-<hash>/bd.sock`, keyed by a hash
//! of the workspace path so concurrent workspaces never collide.

use std::path::{Path, PathBuf};

use sha2::{Digest, Sha256};

/// Socket file name.
pub const SOCKET_FILE_NAME: &str = "bd.sock";

/// Suffix of the start lock beside the socket.
pub const START_LOCK_SUFFIX: &str = ".startlock";

/// Conservative bound under every platform's `sun_path` limit.
const MAX_SOCKET_PATH: usize = 100;

/// Computes the socket path for a workspace.
///
/// Order: `BD_SOCKET` env override (test isolation), then
/// `<beads_dir>/bd.sock`, rehomed under `/tmp/beads-<hash>/` when the
/// direct path would exceed the platform limit.
pub fn socket_path(beads_dir: &Path) -> PathBuf {
    if let Ok(explicit) = std::env::var(beadslog_config::env::BD_SOCKET) {
        if !explicit.trim().is_empty() {
            return PathBuf::from(explicit);
        }
    }

    let direct = beads_dir.join(SOCKET_FILE_NAME);
    if direct.as_os_str().len() <= MAX_SOCKET_PATH {
        return direct;
    }

    rehomed_socket_path(beads_dir)
}

/// The `/tmp/beads-<hash>/bd.sock` fallback for long workspace paths.
pub fn rehomed_socket_path(beads_dir: &Path) -> PathBuf {
    let digest = Sha256::digest(beads_dir.to_string_lossy().as_bytes());
    let short = &format!("{digest:x}")[..12];
    PathBuf::from(format!("/tmp/beads-{short}")).join(SOCKET_FILE_NAME)
}

/// Start lock path for a given socket path.
pub fn start_lock_path(socket: &Path) -> PathBuf {
    let mut name = socket
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| SOCKET_FILE_NAME.to_owned());
    name.push_str(START_LOCK_SUFFIX);
    socket.with_file_name(name)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn short_path_stays_in_beads_dir() {
        let beads = Path::new("/repo/.beads");
        assert_eq!(socket_path(beads), PathBuf::from("/repo/.beads/bd.sock"));
    }

    #[test]
    fn long_path_rehomes_under_tmp() {
        let deep = format!("/{}/.beads", "deeply/nested".repeat(12));
        let path = socket_path(Path::new(&deep));
        assert!(path.starts_with("/tmp"));
        assert!(path.to_string_lossy().len() <= MAX_SOCKET_PATH);
        assert!(path.ends_with(SOCKET_FILE_NAME));
    }

    #[test]
    fn rehoming_is_stable_and_distinct() {
        let a = rehomed_socket_path(Path::new("/workspace/a/.beads"));
        let a2 = rehomed_socket_path(Path::new("/workspace/a/.beads"));
        let b = rehomed_socket_path(Path::new("/workspace/b/.beads"));
        assert_eq!(a, a2);
        assert_ne!(a, b);
    }

    #[test]
    fn start_lock_sits_beside_socket() {
        let lock = start_lock_path(Path::new("/repo/.beads/bd.sock"));
        assert_eq!(lock, PathBuf::from("/repo/.beads/bd.sock.startlock"));
    }
}
