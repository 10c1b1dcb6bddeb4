//! Connector abstraction for repository transports.
//!
//! A [`Connector`] moves artifacts and metadata between one remote
//! repository and local files. Outcomes are written back onto the transfer
//! records themselves, so one failing transfer never hides the others in
//! the same batch.

pub mod checksum;
mod events;
mod file;
mod http;
mod registry;

use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;

use crate::artifact::{Artifact, Item, Metadata};
use crate::error::{NoConnectorError, TransferError};
use crate::repository::{ChecksumPolicy, RemoteRepository, artifact_path, metadata_path};
use crate::session::Session;

pub use events::{
    RecordingTransferListener, RequestKind, TransferEvent, TransferEventKind, TransferListener,
    TransferResource, validate_transfer_events,
};
pub(crate) use events::TransferNotifier;
pub use file::{FileConnector, FileConnectorFactory};
pub use http::{HttpConnector, HttpConnectorFactory};
pub use registry::ConnectorRegistry;

/// Result slot carried by every transfer.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TransferStatus {
    outcome: Option<Result<(), TransferError>>,
    transferred: u64,
}

impl TransferStatus {
    pub fn succeed(&mut self, transferred: u64) {
        self.transferred = transferred;
        self.outcome = Some(Ok(()));
    }

    pub fn fail(&mut self, error: TransferError) {
        self.outcome = Some(Err(error));
    }

    /// The connector has not reported an outcome yet.
    pub fn is_pending(&self) -> bool {
        self.outcome.is_none()
    }

    pub fn is_success(&self) -> bool {
        matches!(self.outcome, Some(Ok(())))
    }

    pub fn error(&self) -> Option<&TransferError> {
        match &self.outcome {
            Some(Err(e)) => Some(e),
            _ => None,
        }
    }

    pub fn transferred(&self) -> u64 {
        self.transferred
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArtifactDownload {
    pub artifact: Artifact,
    pub file: PathBuf,
    pub checksum_policy: ChecksumPolicy,
    pub status: TransferStatus,
}

impl ArtifactDownload {
    pub fn new(artifact: Artifact, file: impl Into<PathBuf>, checksum_policy: ChecksumPolicy) -> Self {
        Self {
            artifact,
            file: file.into(),
            checksum_policy,
            status: TransferStatus::default(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MetadataDownload {
    pub metadata: Metadata,
    pub file: PathBuf,
    pub checksum_policy: ChecksumPolicy,
    pub status: TransferStatus,
}

impl MetadataDownload {
    pub fn new(metadata: Metadata, file: impl Into<PathBuf>, checksum_policy: ChecksumPolicy) -> Self {
        Self {
            metadata,
            file: file.into(),
            checksum_policy,
            status: TransferStatus::default(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArtifactUpload {
    pub artifact: Artifact,
    pub file: PathBuf,
    pub status: TransferStatus,
}

impl ArtifactUpload {
    pub fn new(artifact: Artifact, file: impl Into<PathBuf>) -> Self {
        Self {
            artifact,
            file: file.into(),
            status: TransferStatus::default(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MetadataUpload {
    pub metadata: Metadata,
    pub file: PathBuf,
    pub status: TransferStatus,
}

impl MetadataUpload {
    pub fn new(metadata: Metadata, file: impl Into<PathBuf>) -> Self {
        Self {
            metadata,
            file: file.into(),
            status: TransferStatus::default(),
        }
    }
}

/// Uniform view over the four transfer records, used by connector
/// implementations to run one code path for all of them.
pub(crate) struct TransferTask<'a> {
    pub item: Item,
    pub file: &'a PathBuf,
    pub checksum_policy: ChecksumPolicy,
    pub status: &'a mut TransferStatus,
}

pub(crate) fn download_tasks<'a>(
    artifacts: &'a mut [ArtifactDownload],
    metadata: &'a mut [MetadataDownload],
) -> Vec<TransferTask<'a>> {
    let artifacts = artifacts.iter_mut().map(|d| TransferTask {
        item: Item::Artifact(d.artifact.clone()),
        file: &d.file,
        checksum_policy: d.checksum_policy,
        status: &mut d.status,
    });
    let metadata = metadata.iter_mut().map(|d| TransferTask {
        item: Item::Metadata(d.metadata.clone()),
        file: &d.file,
        checksum_policy: d.checksum_policy,
        status: &mut d.status,
    });
    artifacts.chain(metadata).collect()
}

pub(crate) fn upload_tasks<'a>(
    artifacts: &'a mut [ArtifactUpload],
    metadata: &'a mut [MetadataUpload],
) -> Vec<TransferTask<'a>> {
    let artifacts = artifacts.iter_mut().map(|u| TransferTask {
        item: Item::Artifact(u.artifact.clone()),
        file: &u.file,
        checksum_policy: ChecksumPolicy::Ignore,
        status: &mut u.status,
    });
    let metadata = metadata.iter_mut().map(|u| TransferTask {
        item: Item::Metadata(u.metadata.clone()),
        file: &u.file,
        checksum_policy: ChecksumPolicy::Ignore,
        status: &mut u.status,
    });
    artifacts.chain(metadata).collect()
}

/// Transport to one remote repository.
///
/// `get` and `put` must leave an outcome on every transfer they were given.
/// Transfers left pending are treated as failed by the caller.
#[async_trait]
pub trait Connector: Send + Sync {
    fn repository(&self) -> &RemoteRepository;

    async fn get(&self, artifacts: &mut [ArtifactDownload], metadata: &mut [MetadataDownload]);

    async fn put(&self, artifacts: &mut [ArtifactUpload], metadata: &mut [MetadataUpload]);

    /// Release held resources. Further calls are not expected afterwards.
    async fn close(&self) {}
}

/// Creates connectors for the repositories it understands.
pub trait ConnectorFactory: Send + Sync {
    /// Factories with a higher priority are asked first.
    fn priority(&self) -> i32 {
        0
    }

    fn new_connector(
        &self,
        session: &Session,
        repository: &RemoteRepository,
    ) -> Result<Arc<dyn Connector>, NoConnectorError>;
}

impl fmt::Debug for dyn Connector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Connector({})", self.repository())
    }
}

/// Path of `item` relative to the repository root.
pub(crate) fn resource_name(item: &Item) -> String {
    match item {
        Item::Artifact(a) => artifact_path(a),
        Item::Metadata(m) => metadata_path(m),
    }
}

pub(crate) fn unsupported(repository: &RemoteRepository, reason: impl Into<String>) -> NoConnectorError {
    NoConnectorError {
        repository: repository.to_string(),
        content_type: repository.content_type.clone(),
        reason: reason.into(),
    }
}

static PART_COUNTER: AtomicU64 = AtomicU64::new(0);

/// Download target used until the transfer is verified.
pub(crate) fn part_path(target: &Path) -> PathBuf {
    let name = target
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    let unique = PART_COUNTER.fetch_add(1, Ordering::Relaxed);
    target.with_file_name(format!("{}.{}-{}.part", name, std::process::id(), unique))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_part_path_is_unique_sibling() {
        let target = Path::new("/repo/g/a/a.jar");
        let first = part_path(target);
        let second = part_path(target);
        assert_ne!(first, second);
        assert_eq!(first.parent(), target.parent());
    }

    #[test]
    fn test_transfer_status_lifecycle() {
        let mut status = TransferStatus::default();
        assert!(status.is_pending());
        assert!(status.error().is_none());

        status.succeed(42);
        assert!(!status.is_pending());
        assert!(status.is_success());
        assert_eq!(status.transferred(), 42);

        let artifact = Artifact::new("g", "a", "jar", "1");
        status.fail(TransferError::artifact_transfer(&artifact, "repo", "boom"));
        assert!(!status.is_success());
        assert_eq!(status.error().map(|e| e.message()), Some("boom"));
    }

    #[test]
    fn test_download_tasks_cover_both_kinds() {
        let mut artifacts = vec![ArtifactDownload::new(
            Artifact::new("g", "a", "jar", "1"),
            "/tmp/a.jar",
            ChecksumPolicy::Warn,
        )];
        let mut metadata = vec![MetadataDownload::new(
            Metadata::new("g", "a", "", "maven-metadata.xml"),
            "/tmp/m.xml",
            ChecksumPolicy::Fail,
        )];

        let tasks = download_tasks(&mut artifacts, &mut metadata);
        assert_eq!(tasks.len(), 2);
        assert!(tasks[0].item.is_artifact());
        assert!(!tasks[1].item.is_artifact());
        assert_eq!(tasks[1].checksum_policy, ChecksumPolicy::Fail);

        for task in tasks {
            task.status.succeed(1);
        }
        assert!(artifacts[0].status.is_success());
        assert!(metadata[0].status.is_success());
    }
}
