//! Cache entry state and install receipts

use crate::integrity::Verdict;
use crate::release::ReleaseCoordinate;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;

/// Lifecycle state of a cache entry.
///
/// Only `Absent` and `Verified` are ever reported outside the store;
/// `Downloading` and `Corrupt` exist while `resolve` holds the entry lock.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EntryState {
    /// Nothing usable at the cache path (will be fetched)
    Absent,
    /// Fetch in progress
    Downloading,
    /// Installed, integrity-checked and executable
    Verified,
    /// Downloaded content failed verification and was discarded
    Corrupt,
}

impl fmt::Display for EntryState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Absent => "absent",
            Self::Downloading => "downloading",
            Self::Verified => "verified",
            Self::Corrupt => "corrupt",
        };
        f.write_str(name)
    }
}

/// Snapshot of one coordinate's cache entry
#[derive(Debug, Clone)]
pub struct CacheEntry {
    pub coordinate: ReleaseCoordinate,
    pub local_path: PathBuf,
    pub state: EntryState,
    pub executable: bool,
}

impl CacheEntry {
    pub fn is_verified(&self) -> bool {
        self.state == EntryState::Verified
    }
}

/// Record written beside an installed binary describing how it got there
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InstallReceipt {
    pub coordinate: ReleaseCoordinate,
    pub source_url: String,
    pub sha256: String,
    pub size: u64,
    /// `sha256` when checked against a published digest, `size-only` otherwise
    pub integrity: String,
    pub installed_at: DateTime<Utc>,
}

impl InstallReceipt {
    pub fn new(
        coordinate: ReleaseCoordinate,
        source_url: String,
        sha256: String,
        size: u64,
        verdict: &Verdict,
    ) -> Self {
        Self {
            coordinate,
            source_url,
            sha256,
            size,
            integrity: verdict.mode().to_string(),
            installed_at: Utc::now(),
        }
    }

    /// Whether the binary was checked against a published digest
    pub fn is_cryptographically_verified(&self) -> bool {
        self.integrity == "sha256"
    }
}
