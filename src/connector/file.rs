//! Connector for repositories on the local filesystem (`file://` URLs).

use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use log::{debug, warn};

use super::checksum::{self, ChecksumCalculator};
use super::{
    ArtifactDownload, ArtifactUpload, Connector, ConnectorFactory, MetadataDownload,
    MetadataUpload, RequestKind, TransferNotifier, TransferResource, TransferTask,
    download_tasks, part_path, resource_name, unsupported, upload_tasks,
};
use crate::artifact::Item;
use crate::error::{NoConnectorError, TransferError};
use crate::repository::{ChecksumPolicy, RemoteRepository};
use crate::runtime::{LockTable, copy_locked};
use crate::session::Session;

/// Map a `file://` URL to a local directory.
pub(crate) fn file_url_to_path(url: &str) -> Option<PathBuf> {
    let (scheme, rest) = url.split_once("://")?;
    if !scheme.eq_ignore_ascii_case("file") {
        return None;
    }
    let rest = rest.strip_prefix("localhost").unwrap_or(rest);
    // file:///C:/repo on Windows
    let bytes = rest.as_bytes();
    let rest = if bytes.len() > 2 && bytes[0] == b'/' && bytes[2] == b':' {
        &rest[1..]
    } else {
        rest
    };
    if rest.is_empty() {
        return None;
    }
    Some(PathBuf::from(rest.replace("%20", " ")))
}

struct FileJob {
    item: Item,
    repository: RemoteRepository,
    resource_name: String,
    remote: PathBuf,
    local: PathBuf,
    checksum_policy: ChecksumPolicy,
}

impl FileJob {
    fn resource(&self) -> TransferResource {
        TransferResource {
            repository_url: self.repository.url.clone(),
            resource_name: self.resource_name.clone(),
            file: self.local.clone(),
            content_length: None,
        }
    }
}

fn download(
    locks: &LockTable,
    notifier: &mut TransferNotifier,
    job: &FileJob,
) -> Result<u64, TransferError> {
    let length = match fs::metadata(&job.remote) {
        Ok(meta) if meta.is_file() => meta.len(),
        Ok(_) => {
            return Err(job.item.not_found(
                &job.repository,
                format!("{} is not a file", job.remote.display()),
            ));
        }
        Err(e) if e.kind() == io::ErrorKind::NotFound => {
            return Err(job.item.not_found(&job.repository, ""));
        }
        Err(e) => return Err(job.item.transfer_error(&job.repository, e.to_string())),
    };
    notifier.started(Some(length));

    // The local copy is only replaced once the new content is accepted.
    let part = part_path(&job.local);
    let discard = |part: &Path| {
        if part.exists()
            && let Err(e) = fs::remove_file(part)
        {
            warn!("Failed to remove {}: {}", part.display(), e);
        }
    };

    let mut digest = ChecksumCalculator::new();
    let copied = match copy_locked(locks, &job.remote, &part, |chunk| {
        digest.update(chunk);
        notifier.progressed(chunk.len());
    }) {
        Ok(copied) => copied,
        Err(e) => {
            discard(&part);
            return Err(job.item.transfer_error(&job.repository, format!("{:#}", e)));
        }
    };

    if job.checksum_policy != ChecksumPolicy::Ignore {
        let expected = fs::read_to_string(checksum::sidecar_path(&job.remote))
            .ok()
            .and_then(|content| checksum::parse_sidecar(&content));
        let actual = digest.finish();
        if let Err(message) = checksum::verify(
            job.checksum_policy,
            &job.resource_name,
            expected.as_deref(),
            &actual,
        ) {
            discard(&part);
            return Err(job.item.transfer_error(&job.repository, message));
        }
    }

    let _guard = locks.write(&job.local);
    if let Err(e) = fs::rename(&part, &job.local) {
        discard(&part);
        return Err(job.item.transfer_error(
            &job.repository,
            format!("Failed to move {} into place: {}", job.local.display(), e),
        ));
    }
    Ok(copied)
}

fn upload(
    locks: &LockTable,
    notifier: &mut TransferNotifier,
    job: &FileJob,
) -> Result<u64, TransferError> {
    let length = fs::metadata(&job.local)
        .map_err(|e| {
            job.item.transfer_error(
                &job.repository,
                format!("Cannot read {}: {}", job.local.display(), e),
            )
        })?
        .len();
    notifier.started(Some(length));

    let mut digest = ChecksumCalculator::new();
    let copied = copy_locked(locks, &job.local, &job.remote, |chunk| {
        digest.update(chunk);
        notifier.progressed(chunk.len());
    })
    .map_err(|e| job.item.transfer_error(&job.repository, format!("{:#}", e)))?;

    let sidecar = checksum::sidecar_path(&job.remote);
    let _guard = locks.write(&sidecar);
    fs::write(&sidecar, digest.finish()).map_err(|e| {
        job.item.transfer_error(
            &job.repository,
            format!("Failed to write {}: {}", sidecar.display(), e),
        )
    })?;

    Ok(copied)
}

/// Copies files between the local repository and a directory tree.
pub struct FileConnector {
    session: Session,
    repository: RemoteRepository,
    basedir: PathBuf,
}

impl FileConnector {
    pub fn new(session: &Session, repository: &RemoteRepository) -> Result<Self, NoConnectorError> {
        let basedir = file_url_to_path(&repository.url)
            .ok_or_else(|| unsupported(repository, format!("not a file URL: {}", repository.url)))?;
        Ok(Self {
            session: session.clone(),
            repository: repository.clone(),
            basedir,
        })
    }

    /// Each transfer gets the session's transfer deadline on its own.
    async fn run(&self, tasks: Vec<TransferTask<'_>>, request: RequestKind) {
        let deadline = self.session.config().transfer_deadline();
        for task in tasks {
            let resource_name = resource_name(&task.item);
            let job = FileJob {
                item: task.item.clone(),
                repository: self.repository.clone(),
                remote: self.basedir.join(&resource_name),
                resource_name,
                local: task.file.clone(),
                checksum_policy: task.checksum_policy,
            };
            let locks = Arc::clone(self.session.locks());
            let listener = self.session.listener().cloned();

            debug!("{:?} {} via {}", request, job.resource_name, self.repository);
            let copy = tokio::task::spawn_blocking(move || {
                let mut notifier = TransferNotifier::new(listener, request, job.resource());
                notifier.initiated();
                let result = match request {
                    RequestKind::Get => download(&locks, &mut notifier, &job),
                    RequestKind::Put => upload(&locks, &mut notifier, &job),
                };
                match &result {
                    Ok(_) => notifier.succeeded(),
                    Err(e) => notifier.failed(e),
                }
                result
            });

            match tokio::time::timeout(deadline, copy).await {
                Ok(Ok(Ok(bytes))) => task.status.succeed(bytes),
                Ok(Ok(Err(e))) => task.status.fail(e),
                Ok(Err(e)) => task
                    .status
                    .fail(task.item.transfer_error(&self.repository, e.to_string())),
                Err(_) => task.status.fail(task.item.transfer_error(
                    &self.repository,
                    format!("transfer did not finish within {:?}", deadline),
                )),
            }
        }
    }
}

#[async_trait]
impl Connector for FileConnector {
    fn repository(&self) -> &RemoteRepository {
        &self.repository
    }

    #[tracing::instrument(skip_all, fields(repository = %self.repository))]
    async fn get(&self, artifacts: &mut [ArtifactDownload], metadata: &mut [MetadataDownload]) {
        self.run(download_tasks(artifacts, metadata), RequestKind::Get)
            .await;
    }

    #[tracing::instrument(skip_all, fields(repository = %self.repository))]
    async fn put(&self, artifacts: &mut [ArtifactUpload], metadata: &mut [MetadataUpload]) {
        self.run(upload_tasks(artifacts, metadata), RequestKind::Put)
            .await;
    }
}

pub struct FileConnectorFactory;

impl ConnectorFactory for FileConnectorFactory {
    fn priority(&self) -> i32 {
        10
    }

    fn new_connector(
        &self,
        session: &Session,
        repository: &RemoteRepository,
    ) -> Result<Arc<dyn Connector>, NoConnectorError> {
        if repository.protocol() != "file" {
            return Err(unsupported(
                repository,
                format!("unsupported protocol {}", repository.protocol()),
            ));
        }
        Ok(Arc::new(FileConnector::new(session, repository)?))
    }
}
