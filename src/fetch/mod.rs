//! HTTP(S) retrieval of release artifacts
//!
//! Downloads stream straight into a uniquely named temp file inside the
//! destination directory, so promotion into the cache is a same-filesystem
//! rename. Redirects are followed by hand in a bounded loop; transient
//! failures are retried with exponential backoff. Any failure drops the
//! temp file, so partial content never becomes a promotion candidate.

pub mod cancel;
pub mod retry;

pub use cancel::{CancelToken, Registration};
pub use retry::{ErrorKind, RetryDecision, RetryPolicy};

use crate::error::{LauncherError, LauncherResult};
use crate::ui::{DownloadProgress, UiContext};
use sha2::{Digest, Sha256};
use std::collections::HashSet;
use std::fmt;
use std::io::{Read, Write};
use std::path::Path;
use std::time::Duration;
use tempfile::NamedTempFile;
use tracing::{debug, info, warn};

/// User-Agent header sent with every request
const USER_AGENT: &str = concat!("koca-launcher/", env!("CARGO_PKG_VERSION"));

const CHUNK_SIZE: usize = 64 * 1024;

/// Tunables for the fetch engine
#[derive(Debug, Clone, Copy)]
pub struct FetchOptions {
    /// Maximum redirect hops followed before giving up
    pub max_redirects: u32,
    pub retry: RetryPolicy,
    pub connect_timeout: Duration,
    /// Upper bound on a single request, body included
    pub timeout: Duration,
}

impl Default for FetchOptions {
    fn default() -> Self {
        Self {
            max_redirects: 5,
            retry: RetryPolicy::default(),
            connect_timeout: Duration::from_secs(15),
            timeout: Duration::from_secs(300),
        }
    }
}

/// A completed download sitting in a temp file next to its final location.
///
/// Dropping it deletes the temp file; [`DownloadResult::persist`] renames it
/// into place instead.
#[derive(Debug)]
pub struct DownloadResult {
    temp: NamedTempFile,
    /// Number of body bytes written
    pub byte_count: u64,
    /// Lowercase hex SHA-256 of the body, computed while streaming
    pub observed_hash: String,
    /// URL that finally served the body, after redirects
    pub final_url: String,
    _registration: Registration,
}

impl DownloadResult {
    pub fn temp_path(&self) -> &Path {
        self.temp.path()
    }

    /// Atomically rename the temp file to `dest`, replacing anything there
    pub fn persist(self, dest: &Path) -> LauncherResult<()> {
        self.temp.persist(dest).map(|_| ()).map_err(|e| {
            LauncherError::io(
                format!("moving download into place at {}", dest.display()),
                e.error,
            )
        })
    }
}

/// Failure of a single attempt, classified before retry decisions
enum AttemptError {
    Transport(ureq::Error),
    Status(u16),
    /// Body stream broke off mid-transfer
    Stream(String),
    /// Not retryable; surfaced as-is
    Fatal(LauncherError),
}

impl AttemptError {
    fn kind(&self) -> ErrorKind {
        match self {
            Self::Transport(e) => retry::classify_transport_error(e),
            Self::Status(code) => retry::classify_http_status(*code),
            Self::Stream(_) => ErrorKind::Connection,
            Self::Fatal(_) => ErrorKind::Other,
        }
    }
}

impl fmt::Display for AttemptError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Transport(e) => write!(f, "{e}"),
            Self::Status(code) => write!(f, "HTTP {code}"),
            Self::Stream(reason) => f.write_str(reason),
            Self::Fatal(e) => write!(f, "{e}"),
        }
    }
}

impl From<LauncherError> for AttemptError {
    fn from(e: LauncherError) -> Self {
        Self::Fatal(e)
    }
}

/// Performs bounded, retried, cancellable HTTP GETs
#[derive(Clone)]
pub struct FetchEngine {
    agent: ureq::Agent,
    options: FetchOptions,
    cancel: CancelToken,
    ui: UiContext,
}

impl FetchEngine {
    pub fn new(options: FetchOptions, cancel: CancelToken) -> Self {
        let config = ureq::Agent::config_builder()
            .max_redirects(0)
            .http_status_as_error(false)
            .timeout_connect(Some(options.connect_timeout))
            .timeout_global(Some(options.timeout))
            .user_agent(USER_AGENT)
            .build();

        Self {
            agent: config.into(),
            options,
            cancel,
            ui: UiContext::non_interactive(),
        }
    }

    /// Draw download progress according to `ui`
    pub fn with_ui(mut self, ui: UiContext) -> Self {
        self.ui = ui;
        self
    }

    pub fn options(&self) -> &FetchOptions {
        &self.options
    }

    pub fn cancel_token(&self) -> &CancelToken {
        &self.cancel
    }

    /// Download `url` into a temp file created inside `dest_dir`
    pub fn download(&self, url: &str, dest_dir: &Path) -> LauncherResult<DownloadResult> {
        info!("Downloading {}", url);
        self.with_retry(url, |engine| engine.download_once(url, dest_dir))
    }

    /// Fetch a small text resource. A 404 yields `Ok(None)`.
    pub fn fetch_text(&self, url: &str) -> LauncherResult<Option<String>> {
        debug!("Fetching {}", url);
        let result = self.with_retry(url, |engine| {
            let (response, _) = engine.open(url)?;
            response
                .into_body()
                .read_to_string()
                .map_err(AttemptError::Transport)
        });

        match result {
            Ok(text) => Ok(Some(text)),
            Err(LauncherError::RemoteError { status: 404, .. }) => Ok(None),
            Err(e) => Err(e),
        }
    }

    fn with_retry<T>(
        &self,
        url: &str,
        mut attempt_fn: impl FnMut(&Self) -> Result<T, AttemptError>,
    ) -> LauncherResult<T> {
        let mut attempt = 1u32;
        loop {
            self.cancel.check()?;

            let err = match attempt_fn(self) {
                Ok(value) => return Ok(value),
                Err(AttemptError::Fatal(e)) => return Err(e),
                Err(e) => e,
            };

            match self.options.retry.decide(attempt, err.kind()) {
                RetryDecision::RetryAfter(delay) => {
                    warn!(
                        attempt,
                        "Attempt to fetch {} failed ({}); retrying in {:?}", url, err, delay
                    );
                    self.cancel.sleep(delay)?;
                    attempt += 1;
                }
                RetryDecision::NoRetry => {
                    return Err(match err {
                        AttemptError::Status(status) => LauncherError::RemoteError {
                            url: url.to_string(),
                            status,
                        },
                        other => LauncherError::FetchFailed {
                            url: url.to_string(),
                            attempts: attempt,
                            reason: other.to_string(),
                        },
                    });
                }
            }
        }
    }

    /// Issue a GET and follow redirects until a 200 response.
    ///
    /// Returns the response and the URL that produced it.
    fn open(
        &self,
        url: &str,
    ) -> Result<(ureq::http::Response<ureq::Body>, String), AttemptError> {
        let mut current = url.to_string();
        let mut visited = HashSet::new();

        for hop in 0..=self.options.max_redirects {
            self.cancel.check()?;

            if !visited.insert(current.clone()) {
                debug!("Redirect loop detected at {}", current);
                break;
            }

            let response = self
                .agent
                .get(current.as_str())
                .call()
                .map_err(AttemptError::Transport)?;
            let status = response.status();

            if status.is_redirection() {
                let location = response
                    .headers()
                    .get(ureq::http::header::LOCATION)
                    .and_then(|v| v.to_str().ok())
                    .ok_or_else(|| LauncherError::InvalidRedirect {
                        url: current.clone(),
                        reason: format!("HTTP {} without a usable Location header", status.as_u16()),
                    })?;
                let next = resolve_location(&current, location)?;
                debug!(hop, "Redirect {} -> {}", current, next);
                current = next;
                continue;
            }

            if status.as_u16() != 200 {
                return Err(AttemptError::Status(status.as_u16()));
            }

            return Ok((response, current));
        }

        Err(AttemptError::Fatal(LauncherError::TooManyRedirects {
            url: url.to_string(),
            max: self.options.max_redirects,
        }))
    }

    fn download_once(&self, url: &str, dest_dir: &Path) -> Result<DownloadResult, AttemptError> {
        let (response, final_url) = self.open(url)?;
        let expected_len = response.body().content_length();

        let mut temp = tempfile::Builder::new()
            .prefix(".download-")
            .suffix(".tmp")
            .tempfile_in(dest_dir)
            .map_err(|e| {
                LauncherError::io(format!("creating temp file in {}", dest_dir.display()), e)
            })?;
        let registration = self.cancel.track(temp.path());

        let label = final_url.rsplit('/').next().unwrap_or(url).to_string();
        let progress = DownloadProgress::new(&self.ui, &label, expected_len);
        let mut reader = response.into_body().into_reader();
        let mut hasher = Sha256::new();
        let mut buf = vec![0u8; CHUNK_SIZE];
        let mut total = 0u64;

        loop {
            self.cancel.check()?;
            let n = match reader.read(&mut buf) {
                Ok(0) => break,
                Ok(n) => n,
                Err(e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(AttemptError::Stream(format!("reading body: {e}"))),
            };
            temp.write_all(&buf[..n]).map_err(|e| {
                LauncherError::io(format!("writing {}", temp.path().display()), e)
            })?;
            hasher.update(&buf[..n]);
            total += n as u64;
            progress.advance(n as u64);
        }
        progress.finish();

        if let Some(expected) = expected_len {
            if total != expected {
                return Err(AttemptError::Stream(format!(
                    "partial transfer: expected {expected} bytes, got {total}"
                )));
            }
        }

        temp.as_file().sync_all().map_err(|e| {
            LauncherError::io(format!("syncing {}", temp.path().display()), e)
        })?;

        let observed_hash = hex::encode(hasher.finalize());
        debug!(bytes = total, sha256 = %observed_hash, "Downloaded {}", final_url);

        Ok(DownloadResult {
            temp,
            byte_count: total,
            observed_hash,
            final_url,
            _registration: registration,
        })
    }
}

/// Resolve a `Location` header against the URL that returned it
fn resolve_location(base: &str, location: &str) -> Result<String, AttemptError> {
    let invalid = |reason: String| {
        AttemptError::Fatal(LauncherError::InvalidRedirect {
            url: base.to_string(),
            reason,
        })
    };

    let base = url::Url::parse(base).map_err(|e| invalid(e.to_string()))?;
    let next = base
        .join(location)
        .map_err(|e| invalid(format!("bad Location '{location}': {e}")))?;

    match next.scheme() {
        "http" | "https" => Ok(next.into()),
        other => Err(invalid(format!("unsupported scheme '{other}'"))),
    }
}
