//! Pure mapping from release coordinates to URLs and cache paths

use crate::release::coordinate::ReleaseCoordinate;
use std::path::{Path, PathBuf};

/// Default host that serves koca releases
pub const DEFAULT_RELEASE_HOST: &str = "https://github.com/koca-build";

/// Maps coordinates to remote URLs and local cache locations.
///
/// URLs follow `<host>/<name>/releases/download/v<version>/<artifact>`;
/// cache paths follow `<root>/bin/<name>/<version>/<platform>-<arch>/<binary>`,
/// so distinct coordinates never share a URL or a path.
#[derive(Debug, Clone)]
pub struct ArtifactLocator {
    release_host: String,
    cache_root: PathBuf,
}

impl ArtifactLocator {
    pub fn new(release_host: impl Into<String>, cache_root: impl Into<PathBuf>) -> Self {
        let release_host = release_host.into();
        Self {
            release_host: release_host.trim_end_matches('/').to_string(),
            cache_root: cache_root.into(),
        }
    }

    pub fn release_host(&self) -> &str {
        &self.release_host
    }

    pub fn cache_root(&self) -> &Path {
        &self.cache_root
    }

    /// Directory holding every artifact of one release
    fn release_dir_url(&self, coord: &ReleaseCoordinate) -> String {
        format!(
            "{}/{}/releases/download/{}",
            self.release_host,
            coord.name(),
            coord.tag()
        )
    }

    /// Download URL for the coordinate's binary
    pub fn build_url(&self, coord: &ReleaseCoordinate) -> String {
        format!("{}/{}", self.release_dir_url(coord), coord.artifact_name())
    }

    /// URL of a companion file (e.g. the checksum manifest) in the same release
    pub fn companion_url(&self, coord: &ReleaseCoordinate, file_name: &str) -> String {
        format!("{}/{}", self.release_dir_url(coord), file_name)
    }

    /// Directory owning the cached binary, its receipt, lock and temp files
    pub fn entry_dir(&self, coord: &ReleaseCoordinate) -> PathBuf {
        self.cache_root
            .join("bin")
            .join(coord.name())
            .join(coord.version().to_string())
            .join(format!("{}-{}", coord.platform(), coord.architecture()))
    }

    /// Final path of the executable once installed
    pub fn cache_path(&self, coord: &ReleaseCoordinate) -> PathBuf {
        self.entry_dir(coord).join(coord.binary_name())
    }

    /// Advisory lock file guarding installation of the coordinate
    pub fn lock_path(&self, coord: &ReleaseCoordinate) -> PathBuf {
        self.entry_dir(coord)
            .join(format!("{}.lock", coord.binary_name()))
    }

    /// Install receipt written next to the executable
    pub fn receipt_path(&self, coord: &ReleaseCoordinate) -> PathBuf {
        self.entry_dir(coord)
            .join(format!("{}.receipt.json", coord.binary_name()))
    }
}
