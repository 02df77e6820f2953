//! Release coordinates: the (name, version, platform, architecture) tuple

use crate::error::{LauncherError, LauncherResult};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Operating systems with published koca binaries
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Platform {
    Linux,
    Darwin,
    Windows,
}

impl Platform {
    /// Map a Rust `std::env::consts::OS` value onto a release platform
    pub fn from_os(os: &str) -> Option<Self> {
        match os {
            "linux" => Some(Self::Linux),
            "macos" => Some(Self::Darwin),
            "windows" => Some(Self::Windows),
            _ => None,
        }
    }

    /// Name used in release artifact filenames
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Linux => "linux",
            Self::Darwin => "darwin",
            Self::Windows => "windows",
        }
    }

    /// Suffix appended to executables on this platform
    pub fn exe_suffix(&self) -> &'static str {
        match self {
            Self::Windows => ".exe",
            Self::Linux | Self::Darwin => "",
        }
    }

    /// All supported platforms
    pub fn all() -> &'static [Self] {
        &[Self::Linux, Self::Darwin, Self::Windows]
    }
}

impl fmt::Display for Platform {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// CPU architectures with published koca binaries
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Architecture {
    X64,
    Arm64,
}

impl Architecture {
    /// Map a Rust `std::env::consts::ARCH` value onto a release architecture
    pub fn from_arch(arch: &str) -> Option<Self> {
        match arch {
            "x86_64" => Some(Self::X64),
            "aarch64" => Some(Self::Arm64),
            _ => None,
        }
    }

    /// Name used in release artifact filenames
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::X64 => "x64",
            Self::Arm64 => "arm64",
        }
    }

    /// All supported architectures
    pub fn all() -> &'static [Self] {
        &[Self::X64, Self::Arm64]
    }
}

impl fmt::Display for Architecture {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Identifies exactly one prebuilt release artifact.
///
/// Immutable once constructed; the version is validated as semver and
/// stored without any leading `v`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ReleaseCoordinate {
    name: String,
    version: semver::Version,
    platform: Platform,
    architecture: Architecture,
}

impl ReleaseCoordinate {
    /// Build a coordinate, validating the name and version
    pub fn new(
        name: &str,
        version: &str,
        platform: Platform,
        architecture: Architecture,
    ) -> LauncherResult<Self> {
        validate_name(name)?;
        let normalized = normalize_version_tag(version);
        let version =
            semver::Version::parse(normalized).map_err(|e| LauncherError::InvalidCoordinate {
                value: version.to_string(),
                reason: e.to_string(),
            })?;

        Ok(Self {
            name: name.to_string(),
            version,
            platform,
            architecture,
        })
    }

    /// Build a coordinate for the platform this process is running on
    pub fn for_host(name: &str, version: &str) -> LauncherResult<Self> {
        Self::for_target(name, version, std::env::consts::OS, std::env::consts::ARCH)
    }

    /// Build a coordinate from Rust OS/arch identifiers.
    ///
    /// Fails with `UnsupportedPlatform` when either half has no published binary.
    pub fn for_target(name: &str, version: &str, os: &str, arch: &str) -> LauncherResult<Self> {
        let unsupported = || LauncherError::UnsupportedPlatform {
            os: os.to_string(),
            arch: arch.to_string(),
        };
        let platform = Platform::from_os(os).ok_or_else(unsupported)?;
        let architecture = Architecture::from_arch(arch).ok_or_else(unsupported)?;
        Self::new(name, version, platform, architecture)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn version(&self) -> &semver::Version {
        &self.version
    }

    pub fn platform(&self) -> Platform {
        self.platform
    }

    pub fn architecture(&self) -> Architecture {
        self.architecture
    }

    /// Git tag the release is published under (e.g. `v0.3.0`)
    pub fn tag(&self) -> String {
        format!("v{}", self.version)
    }

    /// Remote artifact filename, e.g. `koca-linux-x64` or `koca-windows-arm64.exe`
    pub fn artifact_name(&self) -> String {
        format!(
            "{}-{}-{}{}",
            self.name,
            self.platform,
            self.architecture,
            self.platform.exe_suffix()
        )
    }

    /// Local executable filename, e.g. `koca` or `koca.exe`
    pub fn binary_name(&self) -> String {
        format!("{}{}", self.name, self.platform.exe_suffix())
    }
}

impl fmt::Display for ReleaseCoordinate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} v{} ({}-{})",
            self.name, self.version, self.platform, self.architecture
        )
    }
}

/// Strips an optional leading `v` or `V` from a version tag
pub fn normalize_version_tag(tag: &str) -> &str {
    let trimmed = tag.trim();
    trimmed
        .strip_prefix('v')
        .or_else(|| trimmed.strip_prefix('V'))
        .unwrap_or(trimmed)
}

/// Names become URL and path segments, so keep them to a safe alphabet
fn validate_name(name: &str) -> LauncherResult<()> {
    let valid = !name.is_empty()
        && !name.starts_with('-')
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_');

    if valid {
        Ok(())
    } else {
        Err(LauncherError::InvalidCoordinate {
            value: name.to_string(),
            reason: "name must be non-empty ASCII letters, digits, '-' or '_'".to_string(),
        })
    }
}
