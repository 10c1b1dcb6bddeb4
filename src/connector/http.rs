//! Connector for repositories served over HTTP(S).

use std::fs::{self, File};
use std::path::Path;
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
use crate::http::{HttpClient, HttpFailure};
use crate::repository::{ChecksumPolicy, RemoteRepository};
use crate::session::Session;

/// Fetches and publishes resources with GET and PUT requests.
///
/// Each transfer is attempted once. Connect and request timeouts come
/// from the session and surface as transfer errors.
pub struct HttpConnector {
    session: Session,
    repository: RemoteRepository,
    client: HttpClient,
    base_url: String,
}

impl HttpConnector {
    pub fn new(session: &Session, repository: &RemoteRepository) -> Result<Self, NoConnectorError> {
        let client = HttpClient::from_config(session.config())
            .map_err(|e| unsupported(repository, format!("{:#}", e)))?;
        Ok(Self {
            session: session.clone(),
            repository: repository.clone(),
            client,
            base_url: repository.url.trim_end_matches('/').to_string(),
        })
    }

    fn url_for(&self, resource: &str) -> String {
        format!("{}/{}", self.base_url, resource)
    }

    fn to_transfer_error(&self, item: &Item, failure: HttpFailure) -> TransferError {
        if failure.is_not_found() {
            item.not_found(&self.repository, failure.to_string())
        } else {
            item.transfer_error(&self.repository, failure.to_string())
        }
    }

    async fn expected_checksum(&self, url: &str) -> Option<String> {
        match self.client.get_optional_text(&checksum::sidecar_name(url)).await {
            Ok(content) => content.and_then(|c| checksum::parse_sidecar(&c)),
            Err(failure) => {
                debug!("No checksum for {}: {}", url, failure);
                None
            }
        }
    }

    async fn download(
        &self,
        task: &TransferTask<'_>,
        resource: &str,
        notifier: &mut TransferNotifier,
    ) -> Result<u64, TransferError> {
        let url = self.url_for(resource);
        let response = self
            .client
            .get(&url)
            .await
            .map_err(|f| self.to_transfer_error(&task.item, f))?;
        notifier.started(response.content_length());

        let io_error = |e: std::io::Error| task.item.transfer_error(&self.repository, e.to_string());
        if let Some(parent) = task.file.parent() {
            fs::create_dir_all(parent).map_err(io_error)?;
        }
        let part = part_path(task.file);
        let mut output = File::create(&part).map_err(io_error)?;

        let mut digest = ChecksumCalculator::new();
        let streamed = HttpClient::stream_body(response, &mut output, |chunk| {
            digest.update(chunk);
            notifier.progressed(chunk.len());
        })
        .await;
        drop(output);

        let discard = |part: &Path| {
            if let Err(e) = fs::remove_file(part) {
                warn!("Failed to remove {}: {}", part.display(), e);
            }
        };

        let bytes = match streamed {
            Ok(bytes) => bytes,
            Err(failure) => {
                discard(&part);
                return Err(self.to_transfer_error(&task.item, failure));
            }
        };

        if task.checksum_policy != ChecksumPolicy::Ignore {
            let expected = self.expected_checksum(&url).await;
            if let Err(message) = checksum::verify(
                task.checksum_policy,
                resource,
                expected.as_deref(),
                &digest.finish(),
            ) {
                discard(&part);
                return Err(task.item.transfer_error(&self.repository, message));
            }
        }

        {
            let _guard = self.session.locks().write(task.file);
            fs::rename(&part, task.file).map_err(|e| {
                discard(&part);
                io_error(e)
            })?;
        }
        Ok(bytes)
    }

    async fn upload(
        &self,
        task: &TransferTask<'_>,
        resource: &str,
        notifier: &mut TransferNotifier,
    ) -> Result<u64, TransferError> {
        let body = {
            let _guard = self.session.locks().read(task.file);
            fs::read(task.file)
        }
        .map_err(|e| {
            task.item.transfer_error(
                &self.repository,
                format!("Cannot read {}: {}", task.file.display(), e),
            )
        })?;
        let length = body.len();
        notifier.started(Some(length as u64));

        let url = self.url_for(resource);
        let digest = checksum::sha256_hex(&body);
        self.client
            .put(&url, body)
            .await
            .map_err(|f| task.item.transfer_error(&self.repository, f.to_string()))?;
        notifier.progressed(length);

        self.client
            .put(&checksum::sidecar_name(&url), digest.into_bytes())
            .await
            .map_err(|f| task.item.transfer_error(&self.repository, f.to_string()))?;

        Ok(length as u64)
    }

    async fn run(&self, tasks: Vec<TransferTask<'_>>, request: RequestKind) {
        for task in tasks {
            let resource = resource_name(&task.item);
            let mut notifier = TransferNotifier::new(
                self.session.listener().cloned(),
                request,
                TransferResource {
                    repository_url: self.repository.url.clone(),
                    resource_name: resource.clone(),
                    file: task.file.clone(),
                    content_length: None,
                },
            );
            notifier.initiated();

            let result = match request {
                RequestKind::Get => self.download(&task, &resource, &mut notifier).await,
                RequestKind::Put => self.upload(&task, &resource, &mut notifier).await,
            };
            match result {
                Ok(bytes) => {
                    notifier.succeeded();
                    task.status.succeed(bytes);
                }
                Err(e) => {
                    debug!("{:?} {} failed: {}", request, resource, e);
                    notifier.failed(&e);
                    task.status.fail(e);
                }
            }
        }
    }
}

#[async_trait]
impl Connector for HttpConnector {
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

pub struct HttpConnectorFactory;

impl ConnectorFactory for HttpConnectorFactory {
    fn new_connector(
        &self,
        session: &Session,
        repository: &RemoteRepository,
    ) -> Result<Arc<dyn Connector>, NoConnectorError> {
        match repository.protocol().as_str() {
            "http" | "https" => Ok(Arc::new(HttpConnector::new(session, repository)?)),
            other => Err(unsupported(
                repository,
                format!("unsupported protocol {}", other),
            )),
        }
    }
}
