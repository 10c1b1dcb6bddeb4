//! Persisted record of update checks.
//!
//! One JSON file per local repository directory maps
//! `<file name>|<repository key>` to the time of the last check and, when
//! that check failed, the kind of failure.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use log::warn;
use serde::{Deserialize, Serialize};

use crate::artifact::Item;
use crate::error::TransferError;
use crate::repository::RemoteRepository;
use crate::runtime::Runtime;

pub const STATUS_FILE_NAME: &str = "resolver-status.json";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum CachedErrorKind {
    NotFound,
    TransferError,
}

/// A failure remembered from an earlier check.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CachedError {
    pub kind: CachedErrorKind,
    #[serde(default)]
    pub message: String,
}

impl CachedError {
    pub fn from_error(error: &TransferError) -> Self {
        let kind = if error.is_not_found() {
            CachedErrorKind::NotFound
        } else {
            CachedErrorKind::TransferError
        };
        Self {
            kind,
            message: error.message().to_string(),
        }
    }

    /// Rebuild the error the original fetch of `item` produced.
    pub fn replay(&self, item: &Item, repository: &RemoteRepository) -> TransferError {
        match self.kind {
            CachedErrorKind::NotFound => item.not_found(repository, self.message.as_str()),
            CachedErrorKind::TransferError => {
                item.transfer_error(repository, self.message.as_str())
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusEntry {
    /// Milliseconds since the Unix epoch.
    pub last_updated: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<CachedError>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusRecord {
    #[serde(default)]
    pub entries: BTreeMap<String, StatusEntry>,
}

impl StatusRecord {
    /// Location of the record tracking `file`.
    pub fn path_for(file: &Path) -> PathBuf {
        file.parent()
            .unwrap_or_else(|| Path::new(""))
            .join(STATUS_FILE_NAME)
    }

    pub fn key(file: &Path, repository: &RemoteRepository) -> String {
        let name = file
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        format!("{}|{}", name, repository.status_key())
    }

    /// Load the record at `path`. A missing record is empty; so is a
    /// corrupt one, after a warning.
    #[tracing::instrument(skip(runtime))]
    pub fn load<R: Runtime + ?Sized>(runtime: &R, path: &Path) -> Result<Self> {
        Self::read(runtime, path, false)
    }

    /// Load the record at `path` ahead of rewriting it. A corrupt record is
    /// moved aside to [`corrupt_path`](Self::corrupt_path) first, so the
    /// rewrite does not destroy it.
    #[tracing::instrument(skip(runtime))]
    pub fn load_for_update<R: Runtime + ?Sized>(runtime: &R, path: &Path) -> Result<Self> {
        Self::read(runtime, path, true)
    }

    /// Where a corrupt record at `path` is kept.
    pub fn corrupt_path(path: &Path) -> PathBuf {
        path.with_file_name(format!("{}.corrupt", STATUS_FILE_NAME))
    }

    fn read<R: Runtime + ?Sized>(runtime: &R, path: &Path, keep_corrupt: bool) -> Result<Self> {
        if !runtime.exists(path) {
            return Ok(Self::default());
        }
        let content = runtime.read_to_string(path)?;
        match serde_json::from_str(&content) {
            Ok(record) => Ok(record),
            Err(e) if keep_corrupt => {
                let aside = Self::corrupt_path(path);
                runtime
                    .rename(path, &aside)
                    .with_context(|| format!("Failed to move corrupt status record {:?}", path))?;
                warn!("Moved corrupt status record {:?} to {:?}: {}", path, aside, e);
                Ok(Self::default())
            }
            Err(e) => {
                warn!("Ignoring corrupt status record {:?}: {}", path, e);
                Ok(Self::default())
            }
        }
    }

    /// Replace the record at `path` by writing a sibling file and renaming
    /// it into place.
    #[tracing::instrument(skip(self, runtime))]
    pub fn save<R: Runtime + ?Sized>(&self, runtime: &R, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
            && !runtime.exists(parent)
        {
            runtime.create_dir_all(parent)?;
        }

        let content = serde_json::to_string_pretty(self)?;
        let temp = path.with_file_name(format!(
            "{}.{}.tmp",
            STATUS_FILE_NAME,
            std::process::id()
        ));
        runtime
            .write(&temp, content.as_bytes())
            .with_context(|| format!("Failed to write status record {:?}", temp))?;
        runtime
            .rename(&temp, path)
            .with_context(|| format!("Failed to replace status record {:?}", path))
    }

    pub fn get(&self, key: &str) -> Option<&StatusEntry> {
        self.entries.get(key)
    }

    pub fn insert(&mut self, key: String, entry: StatusEntry) {
        self.entries.insert(key, entry);
    }
}
