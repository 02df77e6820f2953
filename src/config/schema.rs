//! Configuration schema for the koca launcher
//!
//! Configuration is stored at `~/.config/koca/launcher.toml`. Every section
//! and field is optional.

use crate::cache::{IntegrityPolicy, LockOptions, DEFAULT_MANIFEST};
use crate::fetch::{FetchOptions, RetryPolicy};
use crate::integrity::is_sha256_hex;
use crate::release::locator::DEFAULT_RELEASE_HOST;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::PathBuf;
use std::time::Duration;

/// Environment variable overriding the cache root
pub const ENV_CACHE_DIR: &str = "KOCA_CACHE_DIR";

/// Environment variable overriding the release host
pub const ENV_RELEASE_HOST: &str = "KOCA_RELEASE_HOST";

/// Root configuration structure
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct LauncherConfig {
    /// Where releases are published
    pub release: ReleaseConfig,

    /// Local binary cache
    pub cache: CacheConfig,

    /// Download behaviour
    pub fetch: FetchConfig,

    /// Inter-process install lock
    pub lock: LockConfig,

    /// Checksum sources and strictness
    pub integrity: IntegrityConfig,
}

impl LauncherConfig {
    /// Check values that deserialize fine but cannot work
    pub fn validate(&self) -> Result<(), String> {
        self.integrity.validate()
    }

    /// Apply environment overrides using `lookup` to read variables
    pub fn apply_env<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(dir) = lookup(ENV_CACHE_DIR).filter(|v| !v.is_empty()) {
            self.cache.dir = Some(PathBuf::from(dir));
        }
        if let Some(host) = lookup(ENV_RELEASE_HOST).filter(|v| !v.is_empty()) {
            self.release.host = host;
        }
    }
}

/// Release host settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ReleaseConfig {
    /// Base URL; artifacts live at `<host>/<name>/releases/download/v<version>/`
    pub host: String,

    /// Project name used in URLs and binary names
    pub name: String,
}

impl Default for ReleaseConfig {
    fn default() -> Self {
        Self {
            host: DEFAULT_RELEASE_HOST.to_string(),
            name: "koca".to_string(),
        }
    }
}

/// Cache settings
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    /// Cache root (default: platform cache dir + `/koca`)
    pub dir: Option<PathBuf>,
}

impl CacheConfig {
    /// Configured cache root, or the platform default
    pub fn resolved_dir(&self) -> PathBuf {
        self.dir.clone().unwrap_or_else(default_cache_dir)
    }
}

/// Get the platform default cache root
pub fn default_cache_dir() -> PathBuf {
    dirs::cache_dir()
        .unwrap_or_else(std::env::temp_dir)
        .join("koca")
}

/// Download settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FetchConfig {
    /// Redirect hops followed before failing
    pub max_redirects: u32,

    /// Attempts per request, including the first
    pub max_attempts: u32,

    /// First backoff delay in milliseconds (doubles per retry)
    pub base_delay_ms: u64,

    /// Backoff cap in milliseconds
    pub max_delay_ms: u64,

    pub connect_timeout_secs: u64,

    /// Upper bound for a whole request, body included
    pub timeout_secs: u64,
}

impl Default for FetchConfig {
    fn default() -> Self {
        Self {
            max_redirects: 5,
            max_attempts: 4,
            base_delay_ms: 250,
            max_delay_ms: 5_000,
            connect_timeout_secs: 15,
            timeout_secs: 300,
        }
    }
}

impl FetchConfig {
    pub fn to_options(&self) -> FetchOptions {
        FetchOptions {
            max_redirects: self.max_redirects,
            retry: RetryPolicy {
                max_attempts: self.max_attempts.max(1),
                base_delay: Duration::from_millis(self.base_delay_ms),
                max_delay: Duration::from_millis(self.max_delay_ms),
            },
            connect_timeout: Duration::from_secs(self.connect_timeout_secs),
            timeout: Duration::from_secs(self.timeout_secs),
        }
    }
}

/// Install lock settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LockConfig {
    /// Give up waiting for another installer after this long
    pub timeout_secs: u64,

    pub poll_interval_ms: u64,
}

impl Default for LockConfig {
    fn default() -> Self {
        Self {
            timeout_secs: 120,
            poll_interval_ms: 100,
        }
    }
}

impl LockConfig {
    pub fn to_options(&self) -> LockOptions {
        LockOptions {
            timeout: Duration::from_secs(self.timeout_secs),
            poll_interval: Duration::from_millis(self.poll_interval_ms.max(1)),
        }
    }
}

/// Integrity settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct IntegrityConfig {
    /// Checksum manifest filename published with each release
    pub manifest: String,

    /// Fail instead of falling back to a size check when no digest exists
    pub require_checksum: bool,

    /// Artifact name to SHA-256 hex; overrides the manifest
    pub pinned: HashMap<String, String>,
}

impl Default for IntegrityConfig {
    fn default() -> Self {
        Self {
            manifest: DEFAULT_MANIFEST.to_string(),
            require_checksum: false,
            pinned: HashMap::new(),
        }
    }
}

impl IntegrityConfig {
    /// Reject pinned digests that could never match a download
    pub fn validate(&self) -> Result<(), String> {
        let mut bad: Vec<&str> = self
            .pinned
            .iter()
            .filter(|(_, digest)| !is_sha256_hex(digest.trim()))
            .map(|(artifact, _)| artifact.as_str())
            .collect();
        if bad.is_empty() {
            return Ok(());
        }

        bad.sort_unstable();
        Err(format!(
            "integrity.pinned entries must be 64 hex characters: {}",
            bad.join(", ")
        ))
    }

    pub fn to_policy(&self) -> IntegrityPolicy {
        IntegrityPolicy {
            manifest: self.manifest.clone(),
            require_checksum: self.require_checksum,
            pinned: self.pinned.clone(),
        }
    }
}
