use crate::artifact::{Artifact, Metadata};
use crate::error::ResolutionError;
use crate::repository::RemoteRepository;

/// A request to make an artifact available locally.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArtifactRequest {
    pub artifact: Artifact,
    /// Where to fetch from. `None` resolves from the local repository only.
    pub repository: Option<RemoteRepository>,
    /// Remove the local copy if the repository reports the artifact missing.
    pub delete_local_copy_if_missing: bool,
}

impl ArtifactRequest {
    pub fn new(artifact: Artifact, repository: Option<RemoteRepository>) -> Self {
        Self {
            artifact,
            repository,
            delete_local_copy_if_missing: false,
        }
    }

    pub fn with_delete_local_copy_if_missing(mut self, delete: bool) -> Self {
        self.delete_local_copy_if_missing = delete;
        self
    }
}

/// A request to make a metadata file available locally.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MetadataRequest {
    pub metadata: Metadata,
    /// Where to fetch from. `None` resolves locally produced metadata.
    pub repository: Option<RemoteRepository>,
    pub delete_local_copy_if_missing: bool,
}

impl MetadataRequest {
    pub fn new(metadata: Metadata, repository: Option<RemoteRepository>) -> Self {
        Self {
            metadata,
            repository,
            delete_local_copy_if_missing: false,
        }
    }

    pub fn with_delete_local_copy_if_missing(mut self, delete: bool) -> Self {
        self.delete_local_copy_if_missing = delete;
        self
    }
}

#[derive(Debug)]
pub struct ArtifactResult {
    pub request: ArtifactRequest,
    /// The artifact with its local file set, when resolved.
    pub artifact: Option<Artifact>,
    pub error: Option<ResolutionError>,
}

impl ArtifactResult {
    pub fn is_resolved(&self) -> bool {
        self.artifact.is_some()
    }
}

#[derive(Debug)]
pub struct MetadataResult {
    pub request: MetadataRequest,
    /// The metadata with its local file set, when resolved.
    pub metadata: Option<Metadata>,
    pub error: Option<ResolutionError>,
}

impl MetadataResult {
    pub fn is_resolved(&self) -> bool {
        self.metadata.is_some()
    }
}
