//! Resolve the koca binary and run it as a child process
//!
//! The launcher is the only place where errors become process exit codes.
//! Resolution runs on a blocking thread and can be interrupted with Ctrl-C;
//! once the child is running, termination signals are forwarded to it and
//! its exit status becomes ours.

use crate::cache::CacheStore;
use crate::config::LauncherConfig;
use crate::error::{LauncherError, LauncherResult, EXIT_FAILURE};
use crate::fetch::{CancelToken, FetchEngine};
use crate::release::{ArtifactLocator, ReleaseCoordinate};
use crate::ui::UiContext;
use console::style;
use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::process::{ExitStatus, Stdio};
use std::sync::Arc;
use std::time::Duration;
use tokio::process::{Child, Command};
use tracing::{debug, info, warn};

/// How long an interrupted resolve may take to unwind before its files are
/// purged from under it
const CANCEL_GRACE: Duration = Duration::from_secs(2);

/// How the child's standard streams are connected
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum StdioPolicy {
    /// Share the launcher's stdin, stdout and stderr
    #[default]
    Inherit,
    /// Detach all three streams
    Null,
}

impl StdioPolicy {
    fn apply(self, cmd: &mut Command) {
        match self {
            Self::Inherit => {
                cmd.stdin(Stdio::inherit())
                    .stdout(Stdio::inherit())
                    .stderr(Stdio::inherit());
            }
            Self::Null => {
                cmd.stdin(Stdio::null())
                    .stdout(Stdio::null())
                    .stderr(Stdio::null());
            }
        }
    }
}

/// Resolves binaries through a [`CacheStore`] and executes them
pub struct Launcher {
    store: Arc<CacheStore>,
    grace: Duration,
}

impl Launcher {
    pub fn new(store: CacheStore) -> Self {
        Self {
            store: Arc::new(store),
            grace: CANCEL_GRACE,
        }
    }

    /// Wire up a store from loaded configuration
    pub fn from_config(config: &LauncherConfig, ui: UiContext) -> Self {
        let fetcher = FetchEngine::new(config.fetch.to_options(), CancelToken::new()).with_ui(ui);
        let locator = ArtifactLocator::new(config.release.host.clone(), config.cache.resolved_dir());
        let store = CacheStore::new(
            locator,
            fetcher,
            config.integrity.to_policy(),
            config.lock.to_options(),
        );
        Self::new(store)
    }

    pub fn store(&self) -> &CacheStore {
        &self.store
    }

    /// Resolve `coord` and run it with `args`, returning the exit code to
    /// report. Failures are printed to stderr before returning.
    pub async fn run<I>(&self, coord: &ReleaseCoordinate, args: I, stdio: StdioPolicy) -> u8
    where
        I: IntoIterator<Item = OsString>,
    {
        let result = match self.resolve(coord).await {
            Ok(path) => exec(&path, args, stdio).await,
            Err(e) => Err(e),
        };

        match result {
            Ok(code) => code,
            Err(e) => {
                report_error(&e);
                e.exit_code()
            }
        }
    }

    /// Resolve `coord` on a blocking thread, aborting on interrupt
    pub async fn resolve(&self, coord: &ReleaseCoordinate) -> LauncherResult<PathBuf> {
        let store = Arc::clone(&self.store);
        let target = coord.clone();
        let mut task = tokio::task::spawn_blocking(move || store.resolve(&target));

        tokio::select! {
            joined = &mut task => {
                joined.map_err(|e| LauncherError::Internal(format!("resolve task failed: {e}")))?
            }
            () = interrupted() => {
                warn!("Interrupted, cancelling install of {}", coord);
                let cancel = self.store.cancel_token();
                cancel.cancel();

                if tokio::time::timeout(self.grace, &mut task).await.is_err() {
                    // Still blocked in a read; leave nothing behind when we exit
                    let purged = cancel.purge();
                    debug!("Purged {} in-flight file(s)", purged);
                }
                Err(LauncherError::Cancelled)
            }
        }
    }
}

/// Spawn `path` with `args` verbatim and wait for it, forwarding
/// termination signals. Returns the child's exit code.
pub async fn exec<I>(path: &Path, args: I, stdio: StdioPolicy) -> LauncherResult<u8>
where
    I: IntoIterator<Item = OsString>,
{
    let mut cmd = Command::new(path);
    cmd.args(args);
    stdio.apply(&mut cmd);

    info!("Launching {}", path.display());
    let mut child = cmd.spawn().map_err(|source| LauncherError::SpawnError {
        path: path.to_path_buf(),
        source,
    })?;

    let status = wait_forwarding(&mut child).await?;
    debug!("Child exited with {}", status);
    Ok(exit_code_of(status))
}

/// Print an error and its hint the way every command-line failure looks
pub fn report_error(e: &LauncherError) {
    eprintln!("{} {}", style("Error:").red().bold(), e);
    if let Some(hint) = e.hint() {
        eprintln!("{} {}", style("Hint:").yellow(), hint);
    }
}

/// Resolves on SIGINT (and SIGTERM on unix). Never resolves if no handler
/// could be installed.
async fn interrupted() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        match signal(SignalKind::terminate()) {
            Ok(mut term) => {
                tokio::select! {
                    r = tokio::signal::ctrl_c() => {
                        if r.is_err() {
                            std::future::pending::<()>().await;
                        }
                    }
                    _ = term.recv() => {}
                }
                return;
            }
            Err(e) => debug!("Cannot listen for SIGTERM: {}", e),
        }
    }

    if tokio::signal::ctrl_c().await.is_err() {
        std::future::pending::<()>().await;
    }
}

#[cfg(unix)]
async fn wait_forwarding(child: &mut Child) -> LauncherResult<ExitStatus> {
    use tokio::signal::unix::{signal, SignalKind};

    let listen = |kind: SignalKind| {
        signal(kind).map_err(|e| LauncherError::io("installing signal handler", e))
    };
    let mut sigint = listen(SignalKind::interrupt())?;
    let mut sigterm = listen(SignalKind::terminate())?;
    let mut sighup = listen(SignalKind::hangup())?;

    loop {
        tokio::select! {
            status = child.wait() => {
                return status.map_err(|e| LauncherError::io("waiting for child process", e));
            }
            Some(()) = sigint.recv() => {
                // SAFETY: plain queries on our own process and stdin
                let (foreground, own) =
                    unsafe { (libc::tcgetpgrp(libc::STDIN_FILENO), libc::getpgrp()) };
                if sigint_needs_forwarding(foreground, own) {
                    forward_signal(child, libc::SIGINT);
                } else {
                    debug!("Terminal delivered SIGINT to the child already");
                }
            }
            Some(()) = sigterm.recv() => forward_signal(child, libc::SIGTERM),
            Some(()) = sighup.recv() => forward_signal(child, libc::SIGHUP),
        }
    }
}

/// A Ctrl-C typed at a terminal whose foreground group is ours reaches the
/// child directly. `foreground` is -1 when stdin is not a terminal.
#[cfg(unix)]
fn sigint_needs_forwarding(foreground: libc::pid_t, own: libc::pid_t) -> bool {
    foreground < 0 || foreground != own
}

#[cfg(unix)]
fn forward_signal(child: &Child, sig: libc::c_int) {
    let Some(pid) = child.id() else {
        return;
    };
    let Ok(pid) = libc::pid_t::try_from(pid) else {
        return;
    };

    debug!("Forwarding signal {} to pid {}", sig, pid);
    if unsafe { libc::kill(pid, sig) } != 0 {
        debug!(
            "Signal forward failed: {}",
            std::io::Error::last_os_error()
        );
    }
}

#[cfg(not(unix))]
async fn wait_forwarding(child: &mut Child) -> LauncherResult<ExitStatus> {
    // The console delivers Ctrl-C to the whole process group, child included
    loop {
        tokio::select! {
            status = child.wait() => {
                return status.map_err(|e| LauncherError::io("waiting for child process", e));
            }
            () = interrupted() => debug!("Interrupt received; waiting for child"),
        }
    }
}

/// Map a child's exit status onto a launcher exit code
fn exit_code_of(status: ExitStatus) -> u8 {
    if let Some(code) = status.code() {
        return (code & 0xff) as u8;
    }
    signal_exit_code(status).unwrap_or(EXIT_FAILURE)
}

#[cfg(unix)]
fn signal_exit_code(status: ExitStatus) -> Option<u8> {
    use std::os::unix::process::ExitStatusExt;
    status.signal().map(|sig| (128 + sig).min(255) as u8)
}

#[cfg(not(unix))]
fn signal_exit_code(_status: ExitStatus) -> Option<u8> {
    None
}
