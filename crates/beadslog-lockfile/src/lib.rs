//! File locking for the BeadsLog system.
//!
//! Two lock flavours back the daemon lifecycle:
//!
//! - [`LockFile`] -- an exclusive advisory lock (`flock`-style via `fs2`)
//!   held for the daemon's lifetime. The OS releases it when the process
//!   dies, so a crashed daemon never wedges the workspace.
//! - [`StartLock`] -- a short-lived create-new file that serializes clients
//!   racing to spawn a daemon. Stale start locks (holder dead) are reaped
//!   by the next client.

use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use fs2::FileExt;

/// Errors from lock operations.
#[derive(Debug, thiserror::Error)]
pub enum LockError {
    /// Another process holds the lock.
    #[error("lock is held by another process: {path}")]
    Held {
        /// Path to the contended lock file.
        path: PathBuf,
    },

    /// Underlying filesystem failure.
    #[error("lock I/O error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Result alias for lock operations.
pub type Result<T> = std::result::Result<T, LockError>;

fn io_err(path: &Path, source: std::io::Error) -> LockError {
    LockError::Io {
        path: path.to_path_buf(),
        source,
    }
}

// ---------------------------------------------------------------------------
// LockFile
// ---------------------------------------------------------------------------

/// Header written into a [`LockFile`] so other processes can identify the
/// holder.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct LockHeader {
    /// Holder's process ID.
    pub pid: u32,
    /// Holder's executable version.
    pub version: String,
}

impl LockHeader {
    /// Header for the current process.
    pub fn current(version: impl Into<String>) -> Self {
        Self {
            pid: std::process::id(),
            version: version.into(),
        }
    }

    fn to_file_contents(&self) -> String {
        format!("pid {}\nversion {}\n", self.pid, self.version)
    }

    fn parse(contents: &str) -> Self {
        let mut header = Self::default();
        for line in contents.lines() {
            if let Some(pid) = line.strip_prefix("pid ") {
                header.pid = pid.trim().parse().unwrap_or(0);
            } else if let Some(version) = line.strip_prefix("version ") {
                header.version = version.trim().to_owned();
            }
        }
        header
    }
}

/// An exclusive advisory file lock held for the owner's lifetime.
///
/// The lock is released when the guard drops or the process terminates.
/// The file itself is left in place; its header identifies the last holder.
#[derive(Debug)]
pub struct LockFile {
    file: File,
    path: PathBuf,
}

impl LockFile {
    /// Acquires the lock, failing immediately if another process holds it.
    ///
    /// On success the header is written into the file for observers.
    pub fn acquire(path: impl AsRef<Path>, header: &LockHeader) -> Result<Self> {
        let path = path.as_ref();
        let mut file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(path)
            .map_err(|e| io_err(path, e))?;

        match file.try_lock_exclusive() {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => {
                return Err(LockError::Held {
                    path: path.to_path_buf(),
                });
            }
            Err(e) => return Err(io_err(path, e)),
        }

        file.set_len(0).map_err(|e| io_err(path, e))?;
        file.seek(SeekFrom::Start(0)).map_err(|e| io_err(path, e))?;
        file.write_all(header.to_file_contents().as_bytes())
            .map_err(|e| io_err(path, e))?;
        file.sync_all().map_err(|e| io_err(path, e))?;

        Ok(Self {
            file,
            path: path.to_path_buf(),
        })
    }

    /// Returns `true` if some process currently holds the lock.
    pub fn is_held(path: impl AsRef<Path>) -> bool {
        let path = path.as_ref();
        let Ok(file) = OpenOptions::new().read(true).write(true).open(path) else {
            return false;
        };
        match file.try_lock_exclusive() {
            Ok(()) => {
                let _ = fs2::FileExt::unlock(&file);
                false
            }
            Err(_) => true,
        }
    }

    /// Reads the header of a lock file without acquiring the lock.
    pub fn read_header(path: impl AsRef<Path>) -> Result<LockHeader> {
        let path = path.as_ref();
        let mut file = File::open(path).map_err(|e| io_err(path, e))?;
        let mut contents = String::new();
        file.read_to_string(&mut contents)
            .map_err(|e| io_err(path, e))?;
        Ok(LockHeader::parse(&contents))
    }

    /// Path of the lock file.
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for LockFile {
    fn drop(&mut self) {
        let _ = fs2::FileExt::unlock(&self.file);
    }
}

// ---------------------------------------------------------------------------
// StartLock
// ---------------------------------------------------------------------------

/// A short-lived exclusive file created with `O_CREAT|O_EXCL` semantics.
///
/// Serializes clients racing to spawn a daemon. The file records the
/// creator's PID so other clients can detect a dead holder and reap the
/// lock. Removed on drop.
#[derive(Debug)]
pub struct StartLock {
    path: PathBuf,
}

impl StartLock {
    /// Creates the start lock, failing with [`LockError::Held`] if the
    /// file already exists.
    pub fn acquire(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        match OpenOptions::new().write(true).create_new(true).open(path) {
            Ok(mut file) => {
                let _ = write!(file, "{}", std::process::id());
                Ok(Self {
                    path: path.to_path_buf(),
                })
            }
            Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => Err(LockError::Held {
                path: path.to_path_buf(),
            }),
            Err(e) => Err(io_err(path, e)),
        }
    }

    /// Reads the PID recorded in an existing start lock.
    pub fn holder_pid(path: impl AsRef<Path>) -> Option<u32> {
        let contents = std::fs::read_to_string(path).ok()?;
        contents.trim().parse().ok()
    }

    /// Removes a stale start lock left by a dead holder.
    pub fn remove_stale(path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        match std::fs::remove_file(path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(io_err(path, e)),
        }
    }

    /// Path of the start lock file.
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for StartLock {
    fn drop(&mut self) {
        let _ = std::fs::remove_file(&self.path);
    }
}

// ---------------------------------------------------------------------------
// Process liveness
// ---------------------------------------------------------------------------

/// Returns `true` if a process with the given PID appears to be running.
///
/// Checks `/proc/<pid>` where available, shelling out to `kill -0`
/// otherwise.
pub fn pid_is_alive(pid: u32) -> bool {
    if pid == 0 {
        return false;
    }
    let proc_path = format!("/proc/{pid}");
    if Path::new("/proc").is_dir() {
        return Path::new(&proc_path).exists();
    }
    std::process::Command::new("kill")
        .args(["-0", &pid.to_string()])
        .output()
        .map(|out| out.status.success())
        .unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn acquire_writes_header() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("daemon.lock");

        let header = LockHeader::current("1.2.3");
        let _lock = LockFile::acquire(&path, &header).unwrap();

        let read = LockFile::read_header(&path).unwrap();
        assert_eq!(read.pid, std::process::id());
        assert_eq!(read.version, "1.2.3");
    }

    #[test]
    fn lock_is_exclusive_within_process_scope() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("daemon.lock");

        let lock = LockFile::acquire(&path, &LockHeader::current("1")).unwrap();
        // Note: flock is per-file-description, so a second acquire from the
        // same process would succeed on some platforms. is_held() from the
        // same process is similarly unreliable; we only assert reacquire
        // works after release.
        drop(lock);
        let _again = LockFile::acquire(&path, &LockHeader::current("1")).unwrap();
    }

    #[test]
    fn start_lock_is_create_new() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bd.sock.startlock");

        let lock = StartLock::acquire(&path).unwrap();
        let err = StartLock::acquire(&path).unwrap_err();
        assert!(matches!(err, LockError::Held { .. }));

        assert_eq!(StartLock::holder_pid(&path), Some(std::process::id()));

        drop(lock);
        assert!(!path.exists());
        let _again = StartLock::acquire(&path).unwrap();
    }

    #[test]
    fn remove_stale_tolerates_missing() {
        let dir = tempfile::tempdir().unwrap();
        StartLock::remove_stale(dir.path().join("nope")).unwrap();
    }

    #[test]
    fn current_process_is_alive() {
        assert!(pid_is_alive(std::process::id()));
        assert!(!pid_is_alive(0));
    }

    #[test]
    fn header_parse_roundtrip() {
        let header = LockHeader {
            pid: 4242,
            version: "0.9.1".into(),
        };
        let parsed = LockHeader::parse(&header.to_file_contents());
        assert_eq!(parsed, header);
    }
}
