//! Advisory inter-process lock files
//!
//! The lock is an exclusive OS advisory lock (`flock` on unix) taken on a
//! file next to the cache entry it guards. The kernel drops it when the
//! holder exits, so a crashed installer never wedges later runs.
//!
//! The file itself is removed on release, and removal happens while the lock
//! is still held. A waiter that opened the old file before it was unlinked
//! will lock an orphaned inode, so every acquisition checks that the path
//! still names the file it locked and retries otherwise. Only the holder ever
//! unlinks the path, which makes that check sufficient.

use crate::error::{LauncherError, LauncherResult};
use crate::fetch::{CancelToken, Registration};
use chrono::{DateTime, Utc};
use fs4::FileExt;
use serde::{Deserialize, Serialize};
use std::fs::{self, File, OpenOptions};
use std::io::{self, ErrorKind, Write};
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};
use tracing::{debug, warn};

/// How long to wait for a lock
#[derive(Debug, Clone, Copy)]
pub struct LockOptions {
    pub timeout: Duration,
    pub poll_interval: Duration,
}

impl Default for LockOptions {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(120),
            poll_interval: Duration::from_millis(100),
        }
    }
}

/// Diagnostic contents of a held lock file
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LockOwner {
    pub pid: u32,
    pub created_at: DateTime<Utc>,
}

/// Held exclusive lock; the file is unlinked and the lock released on drop
#[derive(Debug)]
pub struct LockFile {
    path: PathBuf,
    file: File,
    _registration: Registration,
}

impl LockFile {
    /// Acquire the lock at `path`, polling until `options.timeout` elapses.
    ///
    /// Fails with `LockTimeout` when the lock stays held, or `Cancelled` when
    /// `cancel` trips while waiting.
    pub fn acquire(
        path: &Path,
        options: &LockOptions,
        cancel: &CancelToken,
    ) -> LauncherResult<Self> {
        let start = Instant::now();

        loop {
            cancel.check()?;

            if let Some(lock) = Self::try_acquire(path, cancel)? {
                debug!("Acquired lock {}", path.display());
                return Ok(lock);
            }

            let waited = start.elapsed();
            if waited >= options.timeout {
                if let Some(owner) = read_owner(path) {
                    warn!(
                        "Lock {} held by pid {} since {}",
                        path.display(),
                        owner.pid,
                        owner.created_at
                    );
                }
                return Err(LauncherError::LockTimeout {
                    path: path.to_path_buf(),
                    waited,
                });
            }

            debug!("Lock {} is held, waiting", path.display());
            cancel.sleep(options.poll_interval.min(options.timeout - waited))?;
        }
    }

    /// One non-blocking attempt. `Ok(None)` means someone else holds it.
    fn try_acquire(path: &Path, cancel: &CancelToken) -> LauncherResult<Option<Self>> {
        let file = match OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(path)
        {
            Ok(file) => file,
            Err(e) if is_pending_delete(&e) => return Ok(None),
            Err(e) => {
                return Err(LauncherError::io(
                    format!("opening lock file {}", path.display()),
                    e,
                ))
            }
        };

        match file.try_lock_exclusive() {
            Ok(()) => {}
            Err(e) if is_contended(&e) => return Ok(None),
            Err(e) => {
                return Err(LauncherError::io(
                    format!("locking {}", path.display()),
                    e,
                ))
            }
        }

        // The previous holder unlinked this file after we opened it
        let linked = still_linked(&file, path)
            .map_err(|e| LauncherError::io(format!("checking lock file {}", path.display()), e))?;
        if !linked {
            debug!("Lock {} was released under us, retrying", path.display());
            return Ok(None);
        }

        let mut lock = Self {
            path: path.to_path_buf(),
            file,
            _registration: cancel.track(path),
        };
        lock.record_owner()?;
        Ok(Some(lock))
    }

    fn record_owner(&mut self) -> LauncherResult<()> {
        let owner = LockOwner {
            pid: std::process::id(),
            created_at: Utc::now(),
        };
        let content = serde_json::to_vec(&owner)?;
        self.file
            .set_len(0)
            .and_then(|()| self.file.write_all(&content))
            .map_err(|e| {
                LauncherError::io(format!("writing lock file {}", self.path.display()), e)
            })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for LockFile {
    fn drop(&mut self) {
        // Still locked here; `file` closes (and unlocks) after this returns
        match fs::remove_file(&self.path) {
            Ok(()) => debug!("Released lock {}", self.path.display()),
            Err(e) if e.kind() == ErrorKind::NotFound => {}
            Err(e) => warn!("Failed to remove lock {}: {}", self.path.display(), e),
        }
    }
}

/// Read the owner record of a lock file, if it has one
pub fn read_owner(path: &Path) -> Option<LockOwner> {
    let bytes = fs::read(path).ok()?;
    serde_json::from_slice(&bytes).ok()
}

/// `ERROR_LOCK_VIOLATION`, which `LockFileEx` reports instead of `WouldBlock`
const WINDOWS_LOCK_VIOLATION: i32 = 33;

fn is_contended(e: &io::Error) -> bool {
    e.kind() == ErrorKind::WouldBlock
        || (cfg!(windows) && e.raw_os_error() == Some(WINDOWS_LOCK_VIOLATION))
}

/// Windows refuses to open a file that is being deleted
fn is_pending_delete(e: &io::Error) -> bool {
    cfg!(windows) && e.kind() == ErrorKind::PermissionDenied
}

#[cfg(unix)]
fn still_linked(file: &File, path: &Path) -> io::Result<bool> {
    use std::os::unix::fs::MetadataExt;

    let held = file.metadata()?;
    match fs::metadata(path) {
        Ok(current) => Ok(current.dev() == held.dev() && current.ino() == held.ino()),
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(false),
        Err(e) => Err(e),
    }
}

#[cfg(not(unix))]
fn still_linked(_file: &File, path: &Path) -> io::Result<bool> {
    Ok(path.exists())
}
