//! Error types shared by update checks, connectors and the resolver.

use std::fmt;
use std::path::PathBuf;

use thiserror::Error;

use crate::artifact::{Artifact, Metadata};

fn detail(message: &str) -> String {
    if message.is_empty() {
        String::new()
    } else {
        format!(": {}", message)
    }
}

/// Classified outcome of a failed transfer.
///
/// Cached outcomes replayed from the status record use the same variant the
/// original fetch produced.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum TransferError {
    #[error("Could not find artifact {artifact} in {repository}{}", detail(.message))]
    ArtifactNotFound {
        artifact: String,
        repository: String,
        message: String,
    },

    #[error("Could not transfer artifact {artifact} from {repository}{}", detail(.message))]
    ArtifactTransfer {
        artifact: String,
        repository: String,
        message: String,
    },

    #[error("Could not find metadata {metadata} in {repository}{}", detail(.message))]
    MetadataNotFound {
        metadata: String,
        repository: String,
        message: String,
    },

    #[error("Could not transfer metadata {metadata} from {repository}{}", detail(.message))]
    MetadataTransfer {
        metadata: String,
        repository: String,
        message: String,
    },
}

impl TransferError {
    pub fn artifact_not_found(
        artifact: &Artifact,
        repository: impl fmt::Display,
        message: impl Into<String>,
    ) -> Self {
        TransferError::ArtifactNotFound {
            artifact: artifact.to_string(),
            repository: repository.to_string(),
            message: message.into(),
        }
    }

    pub fn artifact_transfer(
        artifact: &Artifact,
        repository: impl fmt::Display,
        message: impl Into<String>,
    ) -> Self {
        TransferError::ArtifactTransfer {
            artifact: artifact.to_string(),
            repository: repository.to_string(),
            message: message.into(),
        }
    }

    pub fn metadata_not_found(
        metadata: &Metadata,
        repository: impl fmt::Display,
        message: impl Into<String>,
    ) -> Self {
        TransferError::MetadataNotFound {
            metadata: metadata.to_string(),
            repository: repository.to_string(),
            message: message.into(),
        }
    }

    pub fn metadata_transfer(
        metadata: &Metadata,
        repository: impl fmt::Display,
        message: impl Into<String>,
    ) -> Self {
        TransferError::MetadataTransfer {
            metadata: metadata.to_string(),
            repository: repository.to_string(),
            message: message.into(),
        }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(
            self,
            TransferError::ArtifactNotFound { .. } | TransferError::MetadataNotFound { .. }
        )
    }

    pub fn message(&self) -> &str {
        match self {
            TransferError::ArtifactNotFound { message, .. }
            | TransferError::ArtifactTransfer { message, .. }
            | TransferError::MetadataNotFound { message, .. }
            | TransferError::MetadataTransfer { message, .. } => message,
        }
    }
}

/// Errors raised by update checks themselves, as opposed to the transfer
/// outcomes they record.
#[derive(Debug, Error)]
pub enum CheckError {
    #[error("Cannot check {item}: no local file reference")]
    InvalidRequest { item: String },

    #[error("Failed to update status record {}", .path.display())]
    Status {
        path: PathBuf,
        #[source]
        source: anyhow::Error,
    },
}

/// No registered connector can serve a repository.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[error("No connector available to access repository {repository} of type {content_type}{}", detail(.reason))]
pub struct NoConnectorError {
    pub repository: String,
    pub content_type: String,
    pub reason: String,
}

/// Why a single resolution request produced no file.
#[derive(Debug, Error)]
pub enum ResolutionError {
    #[error(transparent)]
    Transfer(#[from] TransferError),

    #[error(transparent)]
    NoConnector(#[from] NoConnectorError),

    #[error(transparent)]
    Check(#[from] CheckError),
}

impl ResolutionError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, ResolutionError::Transfer(e) if e.is_not_found())
    }

    pub fn transfer_error(&self) -> Option<&TransferError> {
        match self {
            ResolutionError::Transfer(e) => Some(e),
            _ => None,
        }
    }
}
