//! On-disk cache of verified release binaries
//!
//! [`CacheStore::resolve`] is the single entry point. A cache hit is a cheap
//! existence and permission check with no network access. A miss takes the
//! per-coordinate lock, re-checks (another process may have won the race),
//! then downloads, verifies and atomically promotes the binary.
//!
//! # Layout
//!
//! ```text
//! <root>/bin/<name>/<version>/<platform>-<arch>/
//!     koca                    verified executable
//!     koca.receipt.json       install receipt
//!     koca.lock               present only while installing
//!     .download-XXXX.tmp      present only while downloading
//! ```

pub mod entry;
pub mod lock;

pub use entry::{CacheEntry, EntryState, InstallReceipt};
pub use lock::{LockFile, LockOptions};

use crate::error::{LauncherError, LauncherResult};
use crate::fetch::{CancelToken, FetchEngine};
use crate::integrity::{self, IntegrityVerifier};
use crate::release::{ArtifactLocator, ReleaseCoordinate};
use std::collections::HashMap;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

/// Default name of the checksum manifest published with each release
pub const DEFAULT_MANIFEST: &str = "checksums-sha256.txt";

/// Where expected digests come from and how strict to be without one
#[derive(Debug, Clone)]
pub struct IntegrityPolicy {
    /// Companion file in the release listing `sha256sum` digests
    pub manifest: String,
    /// Refuse to install when no digest is published for the artifact
    pub require_checksum: bool,
    /// Digests that override the manifest, keyed by artifact name
    pub pinned: HashMap<String, String>,
}

impl Default for IntegrityPolicy {
    fn default() -> Self {
        Self {
            manifest: DEFAULT_MANIFEST.to_string(),
            require_checksum: false,
            pinned: HashMap::new(),
        }
    }
}

/// Manages cached binaries under a configured root directory
pub struct CacheStore {
    locator: ArtifactLocator,
    fetcher: FetchEngine,
    verifier: IntegrityVerifier,
    integrity: IntegrityPolicy,
    lock: LockOptions,
}

impl CacheStore {
    pub fn new(
        locator: ArtifactLocator,
        fetcher: FetchEngine,
        integrity: IntegrityPolicy,
        lock: LockOptions,
    ) -> Self {
        Self {
            locator,
            fetcher,
            verifier: IntegrityVerifier::new(),
            integrity,
            lock,
        }
    }

    pub fn locator(&self) -> &ArtifactLocator {
        &self.locator
    }

    pub fn cancel_token(&self) -> &CancelToken {
        self.fetcher.cancel_token()
    }

    /// Observable state of a coordinate's entry: `Verified` or `Absent`
    pub fn entry(&self, coord: &ReleaseCoordinate) -> CacheEntry {
        let local_path = self.locator.cache_path(coord);
        let executable = is_executable(&local_path);
        let state = if executable {
            EntryState::Verified
        } else {
            EntryState::Absent
        };

        CacheEntry {
            coordinate: coord.clone(),
            local_path,
            state,
            executable,
        }
    }

    /// Read the install receipt for a coordinate, if one was written
    pub fn receipt(&self, coord: &ReleaseCoordinate) -> LauncherResult<Option<InstallReceipt>> {
        let path = self.locator.receipt_path(coord);
        match fs::read(&path) {
            Ok(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(LauncherError::io(
                format!("reading receipt {}", path.display()),
                e,
            )),
        }
    }

    /// Return the path of a verified binary for `coord`, installing it if needed
    pub fn resolve(&self, coord: &ReleaseCoordinate) -> LauncherResult<PathBuf> {
        let path = self.locator.cache_path(coord);
        if is_executable(&path) {
            debug!("Cache hit for {} at {}", coord, path.display());
            return Ok(path);
        }

        let dir = self.locator.entry_dir(coord);
        fs::create_dir_all(&dir).map_err(|e| {
            LauncherError::CacheDirUnavailable(format!("{}: {}", dir.display(), e))
        })?;

        let _lock = LockFile::acquire(
            &self.locator.lock_path(coord),
            &self.lock,
            self.cancel_token(),
        )?;

        // Another process may have finished the install while we waited
        if is_executable(&path) {
            debug!("{} was installed by another process", coord);
            return Ok(path);
        }

        self.install(coord, &dir, &path)?;
        Ok(path)
    }

    /// Download, verify and promote. Caller holds the entry lock.
    fn install(&self, coord: &ReleaseCoordinate, dir: &Path, path: &Path) -> LauncherResult<()> {
        let expected = self.expected_digest(coord)?;
        let url = self.locator.build_url(coord);

        debug!(state = %EntryState::Downloading, "Installing {}", coord);
        let download = self.fetcher.download(&url, dir)?;

        let verdict = self.verifier.check(&download, expected.as_deref());
        if let Some(reason) = verdict.failure_reason() {
            warn!(state = %EntryState::Corrupt, "Discarding download of {}", coord);
            drop(download);
            return Err(LauncherError::integrity(path, reason));
        }

        set_executable(download.temp_path())?;

        let receipt = InstallReceipt::new(
            coord.clone(),
            download.final_url.clone(),
            download.observed_hash.clone(),
            download.byte_count,
            &verdict,
        );
        download.persist(path)?;

        if let Err(e) = self.write_receipt(coord, &receipt) {
            // Receipt is informational only
            warn!("Failed to write install receipt for {}: {}", coord, e);
        }

        info!(
            state = %EntryState::Verified,
            integrity = verdict.mode(),
            "Installed {} to {}",
            coord,
            path.display()
        );
        Ok(())
    }

    /// Look up the expected SHA-256 for `coord`: pinned value, then manifest
    fn expected_digest(&self, coord: &ReleaseCoordinate) -> LauncherResult<Option<String>> {
        let artifact = coord.artifact_name();

        if let Some(pinned) = self.integrity.pinned.get(&artifact) {
            debug!("Using pinned checksum for {}", artifact);
            return Ok(Some(pinned.to_ascii_lowercase()));
        }

        let url = self.locator.companion_url(coord, &self.integrity.manifest);
        let digest = match self.fetcher.fetch_text(&url)? {
            Some(text) => {
                let digests = integrity::parse_checksums(&text).map_err(|reason| {
                    LauncherError::ManifestInvalid {
                        url: url.clone(),
                        reason,
                    }
                })?;
                let digest = digests.get(&artifact).cloned();
                if digest.is_none() {
                    warn!("{} has no entry for {}", url, artifact);
                }
                digest
            }
            None => {
                debug!("No checksum manifest at {}", url);
                None
            }
        };

        if digest.is_none() && self.integrity.require_checksum {
            return Err(LauncherError::integrity(
                self.locator.cache_path(coord),
                format!("no published checksum for {artifact} and checksums are required"),
            ));
        }

        Ok(digest)
    }

    fn write_receipt(&self, coord: &ReleaseCoordinate, receipt: &InstallReceipt) -> LauncherResult<()> {
        let path = self.locator.receipt_path(coord);
        let dir = self.locator.entry_dir(coord);
        let content = serde_json::to_vec_pretty(receipt)?;

        let mut temp = tempfile::Builder::new()
            .prefix(".receipt-")
            .suffix(".tmp")
            .tempfile_in(&dir)
            .map_err(|e| LauncherError::io(format!("creating temp file in {}", dir.display()), e))?;
        temp.write_all(&content)
            .map_err(|e| LauncherError::io("writing install receipt", e))?;
        temp.persist(&path).map_err(|e| {
            LauncherError::io(format!("writing receipt {}", path.display()), e.error)
        })?;
        Ok(())
    }
}

/// Cheap fast-path check: a non-empty regular file with an execute bit
fn is_executable(path: &Path) -> bool {
    let Ok(metadata) = fs::metadata(path) else {
        return false;
    };
    metadata.is_file() && metadata.len() > 0 && has_exec_bit(&metadata)
}

#[cfg(unix)]
fn has_exec_bit(metadata: &fs::Metadata) -> bool {
    use std::os::unix::fs::PermissionsExt;
    metadata.permissions().mode() & 0o111 != 0
}

#[cfg(not(unix))]
fn has_exec_bit(_metadata: &fs::Metadata) -> bool {
    true
}

#[cfg(unix)]
fn set_executable(path: &Path) -> LauncherResult<()> {
    use std::os::unix::fs::PermissionsExt;
    fs::set_permissions(path, fs::Permissions::from_mode(0o755))
        .map_err(|e| LauncherError::io(format!("setting permissions on {}", path.display()), e))
}

#[cfg(not(unix))]
fn set_executable(_path: &Path) -> LauncherResult<()> {
    Ok(())
}
