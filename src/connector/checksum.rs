//! SHA-256 sidecar checksums.
//!
//! A resource `path` may be accompanied by `path.sha256` holding the hex
//! digest, optionally followed by whitespace and a file name.

use std::path::{Path, PathBuf};

use log::warn;
use sha2::{Digest, Sha256};

use crate::repository::ChecksumPolicy;

pub const SIDECAR_EXTENSION: &str = "sha256";

pub fn sidecar_path(path: &Path) -> PathBuf {
    let mut name = path.as_os_str().to_owned();
    name.push(".");
    name.push(SIDECAR_EXTENSION);
    PathBuf::from(name)
}

pub fn sidecar_name(resource: &str) -> String {
    format!("{}.{}", resource, SIDECAR_EXTENSION)
}

/// Extract the digest from sidecar file content.
pub fn parse_sidecar(content: &str) -> Option<String> {
    let digest = content.split_whitespace().next()?.to_lowercase();
    let valid = digest.len() == 64 && digest.chars().all(|c| c.is_ascii_hexdigit());
    valid.then_some(digest)
}

pub fn sha256_hex(data: &[u8]) -> String {
    hex::encode(Sha256::digest(data))
}

/// Incremental digest over streamed chunks.
#[derive(Default)]
pub struct ChecksumCalculator {
    hasher: Sha256,
}

impl ChecksumCalculator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn update(&mut self, chunk: &[u8]) {
        self.hasher.update(chunk);
    }

    pub fn finish(self) -> String {
        hex::encode(self.hasher.finalize())
    }
}

/// Apply `policy` to a computed digest and the digest the repository
/// offered, if any. `Err` carries the message for a failed transfer.
pub fn verify(
    policy: ChecksumPolicy,
    resource: &str,
    expected: Option<&str>,
    actual: &str,
) -> Result<(), String> {
    let problem = match expected {
        _ if policy == ChecksumPolicy::Ignore => return Ok(()),
        Some(expected) if expected.eq_ignore_ascii_case(actual) => return Ok(()),
        Some(expected) => format!(
            "Checksum validation failed for {}: expected {} but was {}",
            resource, expected, actual
        ),
        None => format!(
            "Checksum validation failed for {}: no checksum available from the repository",
            resource
        ),
    };

    match policy {
        ChecksumPolicy::Fail => Err(problem),
        _ => {
            warn!("{}", problem);
            Ok(())
        }
    }
}
