//! Content integrity checks for downloaded binaries
//!
//! A SHA-256 digest is computed by streaming the file in fixed-size chunks.
//! When no expected digest is known for an artifact the check degrades to a
//! non-empty sanity check; that outcome is reported as [`Verdict::SizeOnly`]
//! so callers can log it differently from a cryptographic pass.

use crate::error::{LauncherError, LauncherResult};
use crate::fetch::DownloadResult;
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::fs::File;
use std::io::Read;
use std::path::Path;
use tracing::{info, warn};

const BUF_SIZE: usize = 64 * 1024;

/// Outcome of an integrity check
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Verdict {
    /// Content matched the expected SHA-256 digest
    Sha256 { digest: String },
    /// No digest was available; the file is non-empty
    SizeOnly { size: u64 },
    /// Content does not match the expected digest
    Mismatch { expected: String, actual: String },
    /// No digest was available and the file is empty
    Empty,
}

impl Verdict {
    /// Whether the file may be promoted into the cache
    pub fn is_pass(&self) -> bool {
        matches!(self, Self::Sha256 { .. } | Self::SizeOnly { .. })
    }

    /// Integrity mode label used in logs and install receipts
    pub fn mode(&self) -> &'static str {
        match self {
            Self::Sha256 { .. } | Self::Mismatch { .. } => "sha256",
            Self::SizeOnly { .. } | Self::Empty => "size-only",
        }
    }

    /// Human-readable reason for a failed verdict
    pub fn failure_reason(&self) -> Option<String> {
        match self {
            Self::Mismatch { expected, actual } => Some(format!(
                "sha256 mismatch (expected {expected}, got {actual})"
            )),
            Self::Empty => Some("downloaded file is empty".to_string()),
            _ => None,
        }
    }
}

/// Checks downloaded content against an optional expected SHA-256 digest
#[derive(Debug, Clone, Copy, Default)]
pub struct IntegrityVerifier;

impl IntegrityVerifier {
    pub fn new() -> Self {
        Self
    }

    /// Hash `path` from disk and compare it with `expected`
    pub fn verify(&self, path: &Path, expected: Option<&str>) -> LauncherResult<Verdict> {
        let (actual, size) = sha256_path(path)?;
        Ok(self.judge(path, &actual, size, expected))
    }

    /// Check a finished download using the digest observed while streaming
    pub fn check(&self, download: &DownloadResult, expected: Option<&str>) -> Verdict {
        self.judge(
            download.temp_path(),
            &download.observed_hash,
            download.byte_count,
            expected,
        )
    }

    fn judge(&self, path: &Path, actual: &str, size: u64, expected: Option<&str>) -> Verdict {
        let verdict = match expected {
            Some(expected) => {
                let expected = expected.trim().to_ascii_lowercase();
                if expected == actual {
                    Verdict::Sha256 {
                        digest: actual.to_string(),
                    }
                } else {
                    Verdict::Mismatch {
                        expected,
                        actual: actual.to_string(),
                    }
                }
            }
            None if size > 0 => Verdict::SizeOnly { size },
            None => Verdict::Empty,
        };

        match &verdict {
            Verdict::Sha256 { digest } => {
                info!(integrity = "sha256", %digest, "Verified {}", path.display());
            }
            Verdict::SizeOnly { size } => {
                warn!(
                    integrity = "size-only",
                    size,
                    "No checksum published; accepted {} on size alone",
                    path.display()
                );
            }
            Verdict::Mismatch { expected, actual } => {
                warn!(integrity = "sha256", %expected, %actual, "Checksum mismatch for {}", path.display());
            }
            Verdict::Empty => {
                warn!(integrity = "size-only", "Rejected empty file {}", path.display());
            }
        }

        verdict
    }
}

/// Compute SHA-256 of a file, returning the lowercase hex digest and byte count.
/// Reads in chunks to keep memory use bounded.
pub fn sha256_path(path: &Path) -> LauncherResult<(String, u64)> {
    let mut file = File::open(path)
        .map_err(|e| LauncherError::io(format!("opening {} for checksum", path.display()), e))?;
    let mut hasher = Sha256::new();
    let mut buf = vec![0u8; BUF_SIZE];
    let mut total = 0u64;
    loop {
        let n = file
            .read(&mut buf)
            .map_err(|e| LauncherError::io(format!("reading {}", path.display()), e))?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
        total += n as u64;
    }
    Ok((hex::encode(hasher.finalize()), total))
}

/// Check that a string is a 64-character hex SHA-256 digest
pub fn is_sha256_hex(value: &str) -> bool {
    value.len() == 64 && value.chars().all(|c| c.is_ascii_hexdigit())
}

/// Parse a `sha256sum`-format manifest into a map of filename to lowercase digest.
///
/// Each line is `<64 hex>  <filename>`; a `*` binary-mode marker before the
/// filename is accepted. Blank lines are skipped.
pub fn parse_checksums(content: &str) -> Result<HashMap<String, String>, String> {
    let mut map = HashMap::new();

    for (i, line) in content.lines().enumerate() {
        let line = line.trim_end_matches('\r');
        if line.trim().is_empty() {
            continue;
        }

        let Some((hash, filename)) = line.split_once(char::is_whitespace) else {
            return Err(format!("line {}: expected '<hash>  <filename>'", i + 1));
        };

        let hash = hash.trim();
        let filename = filename.trim().trim_start_matches('*');

        if !is_sha256_hex(hash) {
            return Err(format!(
                "line {}: expected 64 hex chars, got '{hash}'",
                i + 1
            ));
        }
        if filename.is_empty() {
            return Err(format!("line {}: empty filename", i + 1));
        }

        map.insert(filename.to_string(), hash.to_ascii_lowercase());
    }

    Ok(map)
}
