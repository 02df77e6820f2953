//! Error types for the koca launcher
//!
//! All modules use `LauncherResult<T>` as their return type. Only the
//! launcher boundary turns these into diagnostics and exit codes.

use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

/// Result type alias for launcher operations
pub type LauncherResult<T> = Result<T, LauncherError>;

/// Exit code reserved for resolution and spawn failures
pub const EXIT_FAILURE: u8 = 1;

/// Exit code used when the user interrupts resolution
pub const EXIT_INTERRUPTED: u8 = 130;

/// All errors that can occur while resolving or launching koca
#[derive(Error, Debug)]
pub enum LauncherError {
    // Resolution errors
    #[error("Unsupported platform: {os}-{arch}. Prebuilt koca binaries exist for linux, darwin and windows on x64 and arm64.")]
    UnsupportedPlatform { os: String, arch: String },

    #[error("Invalid release coordinate '{value}': {reason}")]
    InvalidCoordinate { value: String, reason: String },

    // Fetch errors
    #[error("Download of {url} failed with HTTP {status}")]
    RemoteError { url: String, status: u16 },

    #[error("Download of {url} failed after {attempts} attempt(s): {reason}")]
    FetchFailed {
        url: String,
        attempts: u32,
        reason: String,
    },

    #[error("Too many redirects while downloading {url} (limit {max})")]
    TooManyRedirects { url: String, max: u32 },

    #[error("Invalid redirect from {url}: {reason}")]
    InvalidRedirect { url: String, reason: String },

    // Cache errors
    #[error("Integrity check failed for {}: {reason}", .path.display())]
    IntegrityCheckFailed { path: PathBuf, reason: String },

    #[error("Malformed checksum manifest {url}: {reason}")]
    ManifestInvalid { url: String, reason: String },

    #[error("Timed out after {}s waiting for cache lock {}", .waited.as_secs(), .path.display())]
    LockTimeout { path: PathBuf, waited: Duration },

    #[error("Cache directory unavailable: {0}")]
    CacheDirUnavailable(String),

    // Launch errors
    #[error("Failed to execute {}", .path.display())]
    SpawnError {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Interrupted")]
    Cancelled,

    // Configuration errors
    #[error("Invalid configuration at {}: {reason}", .path.display())]
    ConfigInvalid { path: PathBuf, reason: String },

    // IO errors
    #[error("IO error: {context}")]
    Io {
        context: String,
        #[source]
        source: std::io::Error,
    },

    // Serialization errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl LauncherError {
    /// Create an IO error with context
    pub fn io(context: impl Into<String>, source: std::io::Error) -> Self {
        Self::Io {
            context: context.into(),
            source,
        }
    }

    /// Create an integrity failure for a file
    pub fn integrity(path: impl Into<PathBuf>, reason: impl Into<String>) -> Self {
        Self::IntegrityCheckFailed {
            path: path.into(),
            reason: reason.into(),
        }
    }

    /// Process exit code for this error
    pub fn exit_code(&self) -> u8 {
        match self {
            Self::Cancelled => EXIT_INTERRUPTED,
            _ => EXIT_FAILURE,
        }
    }

    /// Get actionable hint for the error
    pub fn hint(&self) -> Option<&'static str> {
        match self {
            Self::UnsupportedPlatform { .. } => {
                Some("Build koca from source, or open an issue at https://github.com/koca-build/koca requesting this platform")
            }
            Self::RemoteError { status: 404, .. } => {
                Some("This release has no binary for your platform. Reinstall @koca-build/cli or pick another version")
            }
            Self::RemoteError { .. } | Self::FetchFailed { .. } | Self::TooManyRedirects { .. } => {
                Some("Check your network connection (and HTTPS_PROXY) and run koca again")
            }
            Self::IntegrityCheckFailed { .. } | Self::ManifestInvalid { .. } => {
                Some("The download was discarded. Run koca again; if it keeps failing, report it upstream")
            }
            Self::LockTimeout { .. } => {
                Some("Another koca process is installing this release. Wait for it to finish and retry")
            }
            Self::SpawnError { .. } => {
                Some("Delete the koca cache directory (or reinstall @koca-build/cli) to download a fresh binary")
            }
            Self::ConfigInvalid { .. } => Some("Fix or remove the launcher config file"),
            _ => None,
        }
    }
}
