//! Artifact and metadata descriptors.

use std::fmt;
use std::path::{Path, PathBuf};

use crate::error::TransferError;

/// A versioned, resolvable file such as a library jar.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Artifact {
    pub group_id: String,
    pub artifact_id: String,
    pub classifier: String,
    pub extension: String,
    pub version: String,
    pub file: Option<PathBuf>,
}

impl Artifact {
    pub fn new(group_id: &str, artifact_id: &str, extension: &str, version: &str) -> Self {
        Self {
            group_id: group_id.to_string(),
            artifact_id: artifact_id.to_string(),
            classifier: String::new(),
            extension: extension.to_string(),
            version: version.to_string(),
            file: None,
        }
    }

    pub fn with_classifier(mut self, classifier: &str) -> Self {
        self.classifier = classifier.to_string();
        self
    }

    pub fn with_version(mut self, version: &str) -> Self {
        self.version = version.to_string();
        self
    }

    pub fn with_file(mut self, file: impl Into<PathBuf>) -> Self {
        self.file = Some(file.into());
        self
    }

    /// Coordinates without the version: `group:artifact:extension[:classifier]`.
    ///
    /// Nodes sharing this key are versions of the same logical component.
    pub fn versionless_key(&self) -> String {
        if self.classifier.is_empty() {
            format!("{}:{}:{}", self.group_id, self.artifact_id, self.extension)
        } else {
            format!(
                "{}:{}:{}:{}",
                self.group_id, self.artifact_id, self.extension, self.classifier
            )
        }
    }
}

impl fmt::Display for Artifact {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.versionless_key(), self.version)
    }
}

/// Which kinds of versions a metadata file describes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum MetadataNature {
    Release,
    Snapshot,
    #[default]
    ReleaseOrSnapshot,
}

/// A repository index file, e.g. the version listing of an artifact.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Metadata {
    pub group_id: String,
    pub artifact_id: String,
    pub version: String,
    pub kind: String,
    pub nature: MetadataNature,
    pub file: Option<PathBuf>,
}

impl Metadata {
    pub fn new(group_id: &str, artifact_id: &str, version: &str, kind: &str) -> Self {
        Self {
            group_id: group_id.to_string(),
            artifact_id: artifact_id.to_string(),
            version: version.to_string(),
            kind: kind.to_string(),
            nature: MetadataNature::default(),
            file: None,
        }
    }

    pub fn with_nature(mut self, nature: MetadataNature) -> Self {
        self.nature = nature;
        self
    }

    pub fn with_file(mut self, file: impl Into<PathBuf>) -> Self {
        self.file = Some(file.into());
        self
    }
}

impl fmt::Display for Metadata {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let coordinates: Vec<&str> = [
            self.group_id.as_str(),
            self.artifact_id.as_str(),
            self.version.as_str(),
        ]
        .into_iter()
        .filter(|s| !s.is_empty())
        .collect();
        if coordinates.is_empty() {
            write!(f, "{}", self.kind)
        } else {
            write!(f, "{}/{}", coordinates.join(":"), self.kind)
        }
    }
}

/// Either kind of resolvable item.
///
/// Update checks, transfers and results share this surface so the freshness
/// and orchestration logic is written once for both.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Item {
    Artifact(Artifact),
    Metadata(Metadata),
}

impl Item {
    pub fn is_artifact(&self) -> bool {
        matches!(self, Item::Artifact(_))
    }

    pub fn file(&self) -> Option<&Path> {
        match self {
            Item::Artifact(a) => a.file.as_deref(),
            Item::Metadata(m) => m.file.as_deref(),
        }
    }

    pub fn with_file(self, file: impl Into<PathBuf>) -> Self {
        match self {
            Item::Artifact(a) => Item::Artifact(a.with_file(file)),
            Item::Metadata(m) => Item::Metadata(m.with_file(file)),
        }
    }

    /// The not-found error this item produces against `repository`.
    pub fn not_found(
        &self,
        repository: impl fmt::Display,
        message: impl Into<String>,
    ) -> TransferError {
        match self {
            Item::Artifact(a) => TransferError::artifact_not_found(a, repository, message),
            Item::Metadata(m) => TransferError::metadata_not_found(m, repository, message),
        }
    }

    /// The transfer error this item produces against `repository`.
    pub fn transfer_error(
        &self,
        repository: impl fmt::Display,
        message: impl Into<String>,
    ) -> TransferError {
        match self {
            Item::Artifact(a) => TransferError::artifact_transfer(a, repository, message),
            Item::Metadata(m) => TransferError::metadata_transfer(m, repository, message),
        }
    }
}

impl fmt::Display for Item {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Item::Artifact(a) => write!(f, "artifact {}", a),
            Item::Metadata(m) => write!(f, "metadata {}", m),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_artifact_keys() {
        let artifact = Artifact::new("org.example", "lib", "jar", "1.0");
        assert_eq!(artifact.versionless_key(), "org.example:lib:jar");
        assert_eq!(artifact.to_string(), "org.example:lib:jar:1.0");

        let sources = artifact.with_classifier("sources");
        assert_eq!(sources.versionless_key(), "org.example:lib:jar:sources");
    }

    #[test]
    fn test_metadata_display() {
        let metadata = Metadata::new("gid", "aid", "ver", "maven-metadata.xml");
        assert_eq!(metadata.to_string(), "gid:aid:ver/maven-metadata.xml");

        let group_level = Metadata::new("gid", "", "", "maven-metadata.xml");
        assert_eq!(group_level.to_string(), "gid/maven-metadata.xml");

        let root = Metadata::new("", "", "", "archetype-catalog.xml");
        assert_eq!(root.to_string(), "archetype-catalog.xml");
    }

    #[test]
    fn test_item_errors_match_kind() {
        let artifact = Item::Artifact(Artifact::new("g", "a", "jar", "1"));
        assert!(matches!(
            artifact.not_found("repo", ""),
            TransferError::ArtifactNotFound { .. }
        ));

        let metadata = Item::Metadata(Metadata::new("g", "a", "1", "maven-metadata.xml"));
        assert!(matches!(
            metadata.transfer_error("repo", "boom"),
            TransferError::MetadataTransfer { .. }
        ));
    }

    #[test]
    fn test_item_file() {
        let item = Item::Metadata(Metadata::new("g", "a", "1", "m.xml"));
        assert!(item.file().is_none());
        let item = item.with_file("/tmp/m.xml");
        assert_eq!(item.file(), Some(Path::new("/tmp/m.xml")));
    }
}
