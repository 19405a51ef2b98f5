//! Discovery and management of the `.beads/` directory.
//!
//! The `.beads/` directory is the root of a workspace's metadata. Discovery
//! walks upward from the current directory; the `BEADS_DIR` environment
//! variable takes highest priority, and a `.beads` redirect *file* (whose
//! single line names the real directory) is followed when present.

use crate::config::ConfigError;
use std::path::{Path, PathBuf};

/// The name of the beads metadata directory.
const BEADS_DIR_NAME: &str = ".beads";

/// The name of the environment variable that can override the beads directory.
const BEADS_DIR_ENV: &str = "BEADS_DIR";

/// Name of the file tracking the most recently touched issue ID.
pub const LAST_TOUCHED_FILE: &str = "last-touched";

/// Walk up the directory tree from `start` looking for a `.beads/` directory.
///
/// Returns the path to the `.beads/` directory if found, or `None` if the
/// filesystem root is reached without finding one. The `BEADS_DIR`
/// environment variable is checked first (highest priority).
pub fn find_beads_dir(start: &Path) -> Option<PathBuf> {
    // 1. Check BEADS_DIR environment variable (highest priority).
    if let Ok(env_dir) = std::env::var(BEADS_DIR_ENV) {
        let env_path = PathBuf::from(&env_dir);
        if env_path.is_dir() {
            return Some(env_path);
        }
    }

    // 2. Walk up from `start` looking for .beads/.
    let start = match start.canonicalize() {
        Ok(p) => p,
        Err(_) => return None,
    };

    let mut current = start.as_path();
    loop {
        let candidate = current.join(BEADS_DIR_NAME);
        if candidate.is_dir() {
            return Some(candidate);
        }
        // A .beads redirect file points somewhere else (e.g., a shared
        // planning workspace).
        if candidate.is_file() {
            if let Some(redirected) = follow_redirect(&candidate) {
                return Some(redirected);
            }
        }

        match current.parent() {
            Some(parent) if parent != current => {
                current = parent;
            }
            _ => break, // Reached filesystem root.
        }
    }

    None
}

/// Resolves a `.beads` redirect file to its target directory.
///
/// The file's first non-empty line is the target path, absolute or relative
/// to the file's parent directory.
fn follow_redirect(redirect_file: &Path) -> Option<PathBuf> {
    let contents = std::fs::read_to_string(redirect_file).ok()?;
    let target = contents.lines().map(str::trim).find(|l| !l.is_empty())?;

    let target_path = if Path::new(target).is_absolute() {
        PathBuf::from(target)
    } else {
        redirect_file.parent()?.join(target)
    };

    if target_path.is_dir() {
        Some(target_path)
    } else {
        None
    }
}

/// Walk up the directory tree looking for `.beads/`, returning an error if
/// not found.
pub fn find_beads_dir_or_error(start: &Path) -> Result<PathBuf, ConfigError> {
    find_beads_dir(start).ok_or(ConfigError::BeadsDirNotFound)
}

/// Ensure a `.beads/` directory exists at the given path.
///
/// If `path` itself is not called `.beads`, a `.beads/` subdirectory is
/// created under it. Returns the path to the `.beads/` directory.
pub fn ensure_beads_dir(path: &Path) -> Result<PathBuf, ConfigError> {
    let beads_dir = if path.ends_with(BEADS_DIR_NAME) {
        path.to_path_buf()
    } else {
        path.join(BEADS_DIR_NAME)
    };

    std::fs::create_dir_all(&beads_dir)?;
    Ok(beads_dir)
}

/// Records the most recently touched issue ID for default-argument commands.
pub fn write_last_touched(beads_dir: &Path, issue_id: &str) -> std::io::Result<()> {
    std::fs::write(beads_dir.join(LAST_TOUCHED_FILE), format!("{issue_id}\n"))
}

/// Reads the most recently touched issue ID, if recorded.
pub fn read_last_touched(beads_dir: &Path) -> Option<String> {
    let contents = std::fs::read_to_string(beads_dir.join(LAST_TOUCHED_FILE)).ok()?;
    let id = contents.trim();
    if id.is_empty() {
        None
    } else {
        Some(id.to_owned())
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_find_beads_dir_in_temp() {
        let dir = tempfile::tempdir().unwrap();
        let beads = dir.path().join(".beads");
        std::fs::create_dir(&beads).unwrap();

        let found = find_beads_dir(dir.path());
        assert!(found.is_some());
        // Canonicalize both for comparison (handles symlinks, /tmp vs /private/tmp).
        let found = found.unwrap().canonicalize().unwrap();
        let expected = beads.canonicalize().unwrap();
        assert_eq!(found, expected);
    }

    #[test]
    fn test_find_beads_dir_in_child() {
        let dir = tempfile::tempdir().unwrap();
        let beads = dir.path().join(".beads");
        std::fs::create_dir(&beads).unwrap();

        let child = dir.path().join("src").join("deep");
        std::fs::create_dir_all(&child).unwrap();

        let found = find_beads_dir(&child);
        assert!(found.is_some());
        let found = found.unwrap().canonicalize().unwrap();
        let expected = beads.canonicalize().unwrap();
        assert_eq!(found, expected);
    }

    #[test]
    fn test_redirect_file_followed() {
        let dir = tempfile::tempdir().unwrap();
        let real = dir.path().join("shared-beads");
        std::fs::create_dir(&real).unwrap();

        let workspace = dir.path().join("workspace");
        std::fs::create_dir(&workspace).unwrap();
        std::fs::write(
            workspace.join(".beads"),
            format!("{}\n", real.display()),
        )
        .unwrap();

        let found = find_beads_dir(&workspace).unwrap();
        assert_eq!(found, real);
    }

    #[test]
    fn test_redirect_relative_path() {
        let dir = tempfile::tempdir().unwrap();
        let real = dir.path().join("planning").join(".beads");
        std::fs::create_dir_all(&real).unwrap();

        let workspace = dir.path().join("code");
        std::fs::create_dir(&workspace).unwrap();
        std::fs::write(workspace.join(".beads"), "../planning/.beads\n").unwrap();

        let found = find_beads_dir(&workspace).unwrap();
        assert_eq!(
            found.canonicalize().unwrap(),
            real.canonicalize().unwrap()
        );
    }

    #[test]
    fn test_ensure_beads_dir_creates() {
        let dir = tempfile::tempdir().unwrap();
        let result = ensure_beads_dir(dir.path()).unwrap();
        assert!(result.is_dir());
        assert!(result.ends_with(".beads"));
    }

    #[test]
    fn test_ensure_beads_dir_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let result1 = ensure_beads_dir(dir.path()).unwrap();
        let result2 = ensure_beads_dir(dir.path()).unwrap();
        assert_eq!(result1, result2);
    }

    #[test]
    fn test_last_touched_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        assert_eq!(read_last_touched(dir.path()), None);

        write_last_touched(dir.path(), "bd-abc12").unwrap();
        assert_eq!(read_last_touched(dir.path()).as_deref(), Some("bd-abc12"));
    }
}
