//! Cooperative cancellation shared between the signal handler and blocking work
//!
//! Blocking fetch and lock code polls the token between chunks. Files that
//! must not survive an interrupted run (partial downloads, lock files) are
//! registered here so the launcher can purge them even if the blocking thread
//! is stuck in a network read when the process has to exit.

use crate::error::{LauncherError, LauncherResult};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tracing::debug;

/// Slice used when sleeping so cancellation is noticed promptly
const SLEEP_SLICE: Duration = Duration::from_millis(50);

#[derive(Debug, Default)]
struct Inner {
    cancelled: AtomicBool,
    cleanup: Mutex<Vec<PathBuf>>,
}

/// Cloneable cancellation flag with a registry of files to purge on abort
#[derive(Debug, Clone, Default)]
pub struct CancelToken {
    inner: Arc<Inner>,
}

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    /// Request cancellation
    pub fn cancel(&self) {
        self.inner.cancelled.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.inner.cancelled.load(Ordering::SeqCst)
    }

    /// Return `Err(Cancelled)` once cancellation has been requested
    pub fn check(&self) -> LauncherResult<()> {
        if self.is_cancelled() {
            Err(LauncherError::Cancelled)
        } else {
            Ok(())
        }
    }

    /// Sleep for `duration`, waking early with `Err(Cancelled)` on cancellation
    pub fn sleep(&self, duration: Duration) -> LauncherResult<()> {
        let deadline = Instant::now() + duration;
        loop {
            self.check()?;
            let now = Instant::now();
            if now >= deadline {
                return Ok(());
            }
            std::thread::sleep((deadline - now).min(SLEEP_SLICE));
        }
    }

    /// Track a file that must be removed if the run is aborted
    pub fn register(&self, path: &Path) {
        if let Ok(mut paths) = self.inner.cleanup.lock() {
            paths.push(path.to_path_buf());
        }
    }

    /// Stop tracking a file (it was committed or already removed)
    pub fn unregister(&self, path: &Path) {
        if let Ok(mut paths) = self.inner.cleanup.lock() {
            paths.retain(|p| p != path);
        }
    }

    /// Register `path` for the lifetime of the returned guard
    pub fn track(&self, path: &Path) -> Registration {
        self.register(path);
        Registration {
            token: self.clone(),
            path: path.to_path_buf(),
        }
    }

    /// Remove every registered file. Returns how many were deleted.
    pub fn purge(&self) -> usize {
        let paths = match self.inner.cleanup.lock() {
            Ok(mut paths) => std::mem::take(&mut *paths),
            Err(_) => return 0,
        };

        let mut removed = 0;
        for path in paths {
            if std::fs::remove_file(&path).is_ok() {
                debug!("Purged {}", path.display());
                removed += 1;
            }
        }
        removed
    }
}

/// Keeps a path registered with a [`CancelToken`] until dropped
#[derive(Debug)]
pub struct Registration {
    token: CancelToken,
    path: PathBuf,
}

impl Registration {
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for Registration {
    fn drop(&mut self) {
        self.token.unregister(&self.path);
    }
}
