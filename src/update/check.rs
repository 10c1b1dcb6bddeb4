use std::path::{Path, PathBuf};

use crate::artifact::Item;
use crate::error::TransferError;
use crate::repository::RemoteRepository;

/// An update check request and its outcome.
///
/// The caller fills in the item, file, repositories and policy;
/// [`UpdateCheckManager::check`](super::UpdateCheckManager::check) fills in
/// `last_updated`, `required` and `error`.
#[derive(Debug, Clone)]
pub struct UpdateCheck {
    pub item: Item,
    /// Where the item lives in the local repository.
    pub file: Option<PathBuf>,
    /// The repository the item would be fetched from.
    pub repository: RemoteRepository,
    /// The repository whose status is recorded, when it differs from
    /// `repository` (e.g. the origin behind a mirror).
    pub authoritative_repository: Option<RemoteRepository>,
    /// Overrides the recorded last check time when set.
    pub local_last_updated: Option<i64>,
    pub policy: String,

    /// The last check time the decision was based on.
    pub last_updated: i64,
    pub required: bool,
    /// A cached failure replayed instead of contacting the repository.
    pub error: Option<TransferError>,
}

impl UpdateCheck {
    pub fn new(item: Item, repository: RemoteRepository, policy: &str) -> Self {
        let file = item.file().map(Path::to_path_buf);
        Self {
            item,
            file,
            repository,
            authoritative_repository: None,
            local_last_updated: None,
            policy: policy.to_string(),
            last_updated: 0,
            required: false,
            error: None,
        }
    }

    pub fn with_file(mut self, file: impl Into<PathBuf>) -> Self {
        self.file = Some(file.into());
        self
    }

    pub fn with_authoritative_repository(mut self, repository: RemoteRepository) -> Self {
        self.authoritative_repository = Some(repository);
        self
    }

    pub fn with_local_last_updated(mut self, last_updated: i64) -> Self {
        self.local_last_updated = Some(last_updated);
        self
    }

    pub fn with_error(mut self, error: TransferError) -> Self {
        self.error = Some(error);
        self
    }

    /// The repository the status record is keyed by.
    pub fn status_repository(&self) -> &RemoteRepository {
        self.authoritative_repository
            .as_ref()
            .unwrap_or(&self.repository)
    }
}
