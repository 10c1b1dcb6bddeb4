//! Remote and local repository descriptors.

use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use anyhow::anyhow;

use crate::artifact::{Artifact, Metadata};
use crate::update::UPDATE_POLICY_DAILY;

/// How checksum mismatches affect artifact transfers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum ChecksumPolicy {
    /// A mismatch or missing checksum fails the transfer.
    Fail,
    /// A mismatch or missing checksum is logged.
    #[default]
    Warn,
    /// Checksums are not verified.
    Ignore,
}

impl fmt::Display for ChecksumPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ChecksumPolicy::Fail => write!(f, "fail"),
            ChecksumPolicy::Warn => write!(f, "warn"),
            ChecksumPolicy::Ignore => write!(f, "ignore"),
        }
    }
}

impl FromStr for ChecksumPolicy {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "fail" => Ok(ChecksumPolicy::Fail),
            "warn" => Ok(ChecksumPolicy::Warn),
            "ignore" => Ok(ChecksumPolicy::Ignore),
            _ => Err(anyhow!(
                "Unknown checksum policy: {}. Expected fail, warn, or ignore.",
                s
            )),
        }
    }
}

/// Per-repository access policy.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RepositoryPolicy {
    pub enabled: bool,
    pub update_policy: String,
    pub checksum_policy: ChecksumPolicy,
}

impl Default for RepositoryPolicy {
    fn default() -> Self {
        Self {
            enabled: true,
            update_policy: UPDATE_POLICY_DAILY.to_string(),
            checksum_policy: ChecksumPolicy::default(),
        }
    }
}

/// A remote source of artifacts and metadata.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteRepository {
    pub id: String,
    pub content_type: String,
    pub url: String,
    pub policy: RepositoryPolicy,
}

impl RemoteRepository {
    pub fn new(id: &str, url: &str) -> Self {
        Self {
            id: id.to_string(),
            content_type: "default".to_string(),
            url: url.to_string(),
            policy: RepositoryPolicy::default(),
        }
    }

    pub fn with_policy(mut self, policy: RepositoryPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn with_update_policy(mut self, update_policy: &str) -> Self {
        self.policy.update_policy = update_policy.to_string();
        self
    }

    /// URL scheme in lowercase, e.g. `file` or `https`.
    pub fn protocol(&self) -> String {
        self.url
            .split_once("://")
            .map(|(scheme, _)| scheme.to_lowercase())
            .unwrap_or_default()
    }

    /// Key under which update status is recorded for this repository.
    pub fn status_key(&self) -> String {
        format!("{}@{}", self.id, self.url.trim_end_matches('/'))
    }
}

impl fmt::Display for RemoteRepository {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.id, self.url)
    }
}

/// Path of an artifact relative to a repository root.
pub fn artifact_path(artifact: &Artifact) -> String {
    let mut path = format!(
        "{}/{}/{}/{}-{}",
        artifact.group_id.replace('.', "/"),
        artifact.artifact_id,
        artifact.version,
        artifact.artifact_id,
        artifact.version
    );
    if !artifact.classifier.is_empty() {
        path.push('-');
        path.push_str(&artifact.classifier);
    }
    if !artifact.extension.is_empty() {
        path.push('.');
        path.push_str(&artifact.extension);
    }
    path
}

/// Path of a metadata file relative to a repository root.
pub fn metadata_path(metadata: &Metadata) -> String {
    let mut path = String::new();
    if !metadata.group_id.is_empty() {
        path.push_str(&metadata.group_id.replace('.', "/"));
        path.push('/');
        if !metadata.artifact_id.is_empty() {
            path.push_str(&metadata.artifact_id);
            path.push('/');
            if !metadata.version.is_empty() {
                path.push_str(&metadata.version);
                path.push('/');
            }
        }
    }
    path.push_str(&metadata.kind);
    path
}

/// The local cache all resolved files are stored in.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LocalRepository {
    basedir: PathBuf,
}

impl LocalRepository {
    pub fn new(basedir: impl Into<PathBuf>) -> Self {
        Self {
            basedir: basedir.into(),
        }
    }

    pub fn basedir(&self) -> &Path {
        &self.basedir
    }

    pub fn artifact_file(&self, artifact: &Artifact) -> PathBuf {
        self.basedir.join(artifact_path(artifact))
    }

    /// Local copy of metadata fetched from `repository`.
    ///
    /// The repository id is inserted before the extension so copies from
    /// different repositories do not overwrite each other.
    pub fn remote_metadata_file(&self, metadata: &Metadata, repository: &RemoteRepository) -> PathBuf {
        let relative = metadata_path(metadata);
        let named = match relative.rsplit_once('.') {
            Some((stem, ext)) if !stem.ends_with('/') => {
                format!("{}-{}.{}", stem, repository.id, ext)
            }
            _ => format!("{}-{}", relative, repository.id),
        };
        self.basedir.join(named)
    }

    /// Metadata produced locally, not tied to any repository.
    pub fn local_metadata_file(&self, metadata: &Metadata) -> PathBuf {
        let relative = metadata_path(metadata);
        let named = match relative.rsplit_once('.') {
            Some((stem, ext)) if !stem.ends_with('/') => format!("{}-local.{}", stem, ext),
            _ => format!("{}-local", relative),
        };
        self.basedir.join(named)
    }
}

impl fmt::Display for LocalRepository {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "local ({})", self.basedir.display())
    }
}
