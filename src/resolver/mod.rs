//! Batch resolution of artifacts and metadata.
//!
//! Every request is first run through an update check. Requests whose
//! local copy is fresh (or whose cached failure is replayed) are answered
//! locally; the rest are grouped per repository and fetched with one
//! connector call per repository, all repositories concurrently.

mod request;

use std::path::PathBuf;
use std::sync::Arc;

use futures_util::future::join_all;
use log::{debug, info, warn};

use crate::artifact::Item;
use crate::connector::{ArtifactDownload, ConnectorRegistry, MetadataDownload, TransferStatus};
use crate::error::{NoConnectorError, ResolutionError, TransferError};
use crate::repository::RemoteRepository;
use crate::runtime::{RealRuntime, Runtime};
use crate::session::Session;
use crate::update::{UpdateCheck, UpdateCheckManager};

pub use request::{ArtifactRequest, ArtifactResult, MetadataRequest, MetadataResult};

/// Resolves batches of requests against their repositories.
pub struct Resolver<R: Runtime = RealRuntime> {
    session: Session,
    registry: ConnectorRegistry,
    manager: UpdateCheckManager<R>,
}

impl Resolver<RealRuntime> {
    /// A resolver using the built-in connectors and the real system.
    pub fn new(session: Session) -> Self {
        Self::with_runtime(session, ConnectorRegistry::with_defaults(), Arc::new(RealRuntime))
    }
}

impl<R: Runtime> Resolver<R> {
    pub fn with_runtime(session: Session, registry: ConnectorRegistry, runtime: Arc<R>) -> Self {
        Self {
            session,
            registry,
            manager: UpdateCheckManager::new(runtime),
        }
    }

    pub fn with_registry(mut self, registry: ConnectorRegistry) -> Self {
        self.registry = registry;
        self
    }

    pub fn session(&self) -> &Session {
        &self.session
    }

    /// Resolve `requests`. Results come back in request order, one each.
    #[tracing::instrument(skip_all, fields(count = requests.len()))]
    pub async fn resolve_artifacts(&self, requests: Vec<ArtifactRequest>) -> Vec<ArtifactResult> {
        let local = self.session.local_repository();
        let jobs = requests
            .iter()
            .map(|request| {
                let file = local.artifact_file(&request.artifact);
                Job::new(
                    Item::Artifact(request.artifact.clone().with_file(&file)),
                    file,
                    request.repository.clone(),
                    request.delete_local_copy_if_missing,
                )
            })
            .collect();

        let jobs = self.resolve(jobs).await;
        requests
            .into_iter()
            .zip(jobs)
            .map(|(request, job)| {
                let (item, outcome) = job.finish();
                match (item, outcome) {
                    (Item::Artifact(artifact), Ok(())) => ArtifactResult {
                        request,
                        artifact: Some(artifact),
                        error: None,
                    },
                    (_, outcome) => ArtifactResult {
                        request,
                        artifact: None,
                        error: outcome.err(),
                    },
                }
            })
            .collect()
    }

    /// Resolve `requests`. Results come back in request order, one each.
    #[tracing::instrument(skip_all, fields(count = requests.len()))]
    pub async fn resolve_metadata(&self, requests: Vec<MetadataRequest>) -> Vec<MetadataResult> {
        let local = self.session.local_repository();
        let jobs = requests
            .iter()
            .map(|request| {
                let file = match &request.repository {
                    Some(repository) => local.remote_metadata_file(&request.metadata, repository),
                    None => local.local_metadata_file(&request.metadata),
                };
                Job::new(
                    Item::Metadata(request.metadata.clone().with_file(&file)),
                    file,
                    request.repository.clone(),
                    request.delete_local_copy_if_missing,
                )
            })
            .collect();

        let jobs = self.resolve(jobs).await;
        requests
            .into_iter()
            .zip(jobs)
            .map(|(request, job)| {
                let (item, outcome) = job.finish();
                match (item, outcome) {
                    (Item::Metadata(metadata), Ok(())) => MetadataResult {
                        request,
                        metadata: Some(metadata),
                        error: None,
                    },
                    (_, outcome) => MetadataResult {
                        request,
                        metadata: None,
                        error: outcome.err(),
                    },
                }
            })
            .collect()
    }

    async fn resolve(&self, mut jobs: Vec<Job>) -> Vec<Job> {
        let mut pending: Vec<(RemoteRepository, Vec<usize>)> = Vec::new();
        for (index, job) in jobs.iter_mut().enumerate() {
            if let Some(repository) = self.prepare(job) {
                match pending.iter_mut().find(|(r, _)| *r == repository) {
                    Some((_, indexes)) => indexes.push(index),
                    None => pending.push((repository, vec![index])),
                }
            }
        }

        let fetches = pending.iter().map(|(repository, indexes)| {
            let transfers: Vec<(Item, PathBuf)> = indexes
                .iter()
                .map(|&i| (jobs[i].item.clone(), jobs[i].file.clone()))
                .collect();
            self.fetch(repository, transfers)
        });
        let fetched = join_all(fetches).await;

        for ((repository, indexes), fetched) in pending.iter().zip(fetched) {
            match fetched {
                Ok(outcomes) => {
                    for (&i, outcome) in indexes.iter().zip(outcomes) {
                        self.complete(&mut jobs[i], outcome);
                    }
                }
                Err(e) => {
                    warn!("Cannot access {}: {}", repository, e);
                    for &i in indexes {
                        jobs[i].outcome = Some(Err(e.clone().into()));
                    }
                }
            }
        }

        jobs
    }

    /// Run the update check for `job`. Returns the repository to fetch
    /// from, or `None` when the job was answered without a transfer.
    /// Checks that need no transfer are touched right away.
    fn prepare(&self, job: &mut Job) -> Option<RemoteRepository> {
        let runtime = self.manager.runtime();
        let Some(repository) = job.repository.clone() else {
            job.outcome = Some(if runtime.is_file(&job.file) {
                Ok(())
            } else {
                let local = format!(
                    "local repository ({})",
                    self.session.local_repository().basedir().display()
                );
                Err(job.item.not_found(local, "").into())
            });
            return None;
        };

        let config = self.session.config();
        let policy = config
            .update_policy
            .clone()
            .unwrap_or_else(|| repository.policy.update_policy.clone());
        let mut check =
            UpdateCheck::new(job.item.clone(), repository.clone(), &policy).with_file(&job.file);
        if let Err(e) = self.manager.check(&self.session, &mut check) {
            job.outcome = Some(Err(e.into()));
            return None;
        }

        if !check.required {
            if let Err(e) = self.manager.touch(&self.session, &check) {
                warn!("Failed to record update check for {}: {:#}", job.item, e);
            }
            job.outcome = Some(match &check.error {
                Some(e) => Err(e.clone().into()),
                None => Ok(()),
            });
            return None;
        }

        let blocked = if config.offline {
            Some("offline")
        } else if !repository.policy.enabled {
            Some("repository disabled")
        } else {
            None
        };
        if let Some(reason) = blocked {
            debug!("Not fetching {} from {}: {}", job.item, repository, reason);
            job.outcome = Some(Err(job.item.transfer_error(&repository, reason).into()));
            return None;
        }

        job.check = Some(check);
        Some(repository)
    }

    /// One connector call for every transfer routed to `repository`.
    /// Outcomes are returned in the order of `transfers`.
    async fn fetch(
        &self,
        repository: &RemoteRepository,
        transfers: Vec<(Item, PathBuf)>,
    ) -> Result<Vec<Result<u64, TransferError>>, NoConnectorError> {
        let connector = self.registry.new_connector(&self.session, repository)?;
        let checksum_policy = self
            .session
            .config()
            .checksum_policy
            .unwrap_or(repository.policy.checksum_policy);

        let mut artifacts = Vec::new();
        let mut metadata = Vec::new();
        let mut slots = Vec::with_capacity(transfers.len());
        for (item, file) in &transfers {
            match item {
                Item::Artifact(a) => {
                    slots.push(Slot::Artifact(artifacts.len()));
                    artifacts.push(ArtifactDownload::new(a.clone(), file.clone(), checksum_policy));
                }
                Item::Metadata(m) => {
                    slots.push(Slot::Metadata(metadata.len()));
                    metadata.push(MetadataDownload::new(m.clone(), file.clone(), checksum_policy));
                }
            }
        }

        info!(
            "Fetching {} artifacts and {} metadata from {}",
            artifacts.len(),
            metadata.len(),
            repository
        );
        // Connectors may run the batch one transfer at a time, so the
        // batch gets one transfer deadline per transfer.
        let per_transfer = self.session.config().transfer_deadline();
        let count = u32::try_from(transfers.len()).unwrap_or(u32::MAX);
        let deadline = per_transfer.saturating_mul(count);
        let timed_out = tokio::time::timeout(deadline, connector.get(&mut artifacts, &mut metadata))
            .await
            .is_err();
        if timed_out {
            warn!("Transfers from {} did not finish within {:?}", repository, deadline);
        }
        connector.close().await;

        let outcomes = transfers
            .iter()
            .zip(slots)
            .map(|((item, _), slot)| {
                let status: &TransferStatus = match slot {
                    Slot::Artifact(i) => &artifacts[i].status,
                    Slot::Metadata(i) => &metadata[i].status,
                };
                match status.error() {
                    Some(e) => Err(e.clone()),
                    None if status.is_success() => Ok(status.transferred()),
                    None if timed_out => Err(item.transfer_error(
                        repository,
                        format!("transfer did not finish within {:?}", deadline),
                    )),
                    None => Err(item.transfer_error(repository, "connector reported no outcome")),
                }
            })
            .collect();
        Ok(outcomes)
    }

    /// Record the outcome of a transfer handed to a connector.
    fn complete(&self, job: &mut Job, outcome: Result<u64, TransferError>) {
        let runtime = self.manager.runtime();
        let error = outcome.as_ref().err().cloned();

        if let Some(check) = job.check.as_mut() {
            check.error = error.clone();
            if let Err(e) = self.manager.touch(&self.session, check) {
                warn!("Failed to record update check for {}: {:#}", job.item, e);
            }
        }

        if let Some(e) = &error
            && e.is_not_found()
            && job.delete_local_copy_if_missing
            && runtime.exists(&job.file)
        {
            match runtime.remove_file(&job.file) {
                Ok(()) => info!("Deleted stale local copy {:?}", job.file),
                Err(e) => warn!("Failed to delete stale local copy {:?}: {:#}", job.file, e),
            }
        }

        job.outcome = Some(match outcome {
            Ok(bytes) => {
                debug!("Resolved {} ({} bytes transferred)", job.item, bytes);
                Ok(())
            }
            Err(e) => {
                debug!("Failed to resolve {}: {}", job.item, e);
                Err(e.into())
            }
        });
    }
}

enum Slot {
    Artifact(usize),
    Metadata(usize),
}

/// One request on its way through the batch.
struct Job {
    item: Item,
    file: PathBuf,
    repository: Option<RemoteRepository>,
    delete_local_copy_if_missing: bool,
    check: Option<UpdateCheck>,
    outcome: Option<Result<(), ResolutionError>>,
}

impl Job {
    fn new(
        item: Item,
        file: PathBuf,
        repository: Option<RemoteRepository>,
        delete_local_copy_if_missing: bool,
    ) -> Self {
        Self {
            item,
            file,
            repository,
            delete_local_copy_if_missing,
            check: None,
            outcome: None,
        }
    }

    fn finish(self) -> (Item, Result<(), ResolutionError>) {
        let outcome = match self.outcome {
            Some(outcome) => outcome,
            None => Err(self
                .item
                .transfer_error("(unresolved)", "request was not processed")
                .into()),
        };
        (self.item, outcome)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::artifact::{Artifact, Metadata};
    use crate::connector::{
        ArtifactUpload, Connector, ConnectorFactory, MetadataUpload,
    };
    use crate::repository::RepositoryPolicy;
    use crate::session::SessionConfig;
    use crate::update::StatusRecord;
    use async_trait::async_trait;
    use parking_lot::Mutex;
    use std::time::Duration;
    use tempfile::{TempDir, tempdir};

    /// Serves every download from memory; unknown items are not found.
    struct MemoryConnector {
        repository: RemoteRepository,
        content: Vec<(String, &'static str)>,
        delay: Option<Duration>,
        calls: Arc<Mutex<usize>>,
    }

    #[async_trait]
    impl Connector for MemoryConnector {
        fn repository(&self) -> &RemoteRepository {
            &self.repository
        }

        async fn get(&self, artifacts: &mut [ArtifactDownload], metadata: &mut [MetadataDownload]) {
            *self.calls.lock() += 1;
            for d in artifacts.iter_mut() {
                self.pause().await;
                self.serve(&Item::Artifact(d.artifact.clone()), &d.file, &mut d.status);
            }
            for d in metadata.iter_mut() {
                self.pause().await;
                self.serve(&Item::Metadata(d.metadata.clone()), &d.file, &mut d.status);
            }
        }

        async fn put(&self, _: &mut [ArtifactUpload], _: &mut [MetadataUpload]) {}
    }

    impl MemoryConnector {
        /// Simulated time spent on one transfer.
        async fn pause(&self) {
            if let Some(delay) = self.delay {
                tokio::time::sleep(delay).await;
            }
        }

        fn serve(&self, item: &Item, file: &std::path::Path, status: &mut TransferStatus) {
            let key = match item {
                Item::Artifact(a) => a.to_string(),
                Item::Metadata(m) => m.to_string(),
            };
            match self.content.iter().find(|(k, _)| *k == key) {
                Some((_, body)) => {
                    std::fs::create_dir_all(file.parent().unwrap()).unwrap();
                    std::fs::write(file, body).unwrap();
                    status.succeed(body.len() as u64);
                }
                None => status.fail(item.not_found(&self.repository, "")),
            }
        }
    }

    struct MemoryFactory {
        content: Vec<(String, &'static str)>,
        delay: Option<Duration>,
        calls: Arc<Mutex<usize>>,
    }

    impl ConnectorFactory for MemoryFactory {
        fn new_connector(
            &self,
            _: &Session,
            repository: &RemoteRepository,
        ) -> Result<Arc<dyn Connector>, NoConnectorError> {
            if repository.protocol() != "mem" {
                return Err(crate::connector::unsupported(repository, "not a mem repository"));
            }
            Ok(Arc::new(MemoryConnector {
                repository: repository.clone(),
                content: self.content.clone(),
                delay: self.delay,
                calls: self.calls.clone(),
            }))
        }
    }

    struct Fixture {
        dir: TempDir,
        calls: Arc<Mutex<usize>>,
    }

    impl Fixture {
        fn new() -> Self {
            Self {
                dir: tempdir().unwrap(),
                calls: Arc::new(Mutex::new(0)),
            }
        }

        fn config(&self) -> SessionConfig {
            SessionConfig::default().with_local_repository(self.dir.path())
        }

        fn resolver(&self, config: SessionConfig, delay: Option<Duration>) -> Resolver {
            let mut registry = ConnectorRegistry::new();
            registry.register(Arc::new(MemoryFactory {
                content: ["a", "b", "c", "d"]
                    .iter()
                    .map(|name| (format!("g:{}:jar:1.0", name), "jar-bytes"))
                    .collect(),
                delay,
                calls: self.calls.clone(),
            }));
            Resolver::new(Session::new(config)).with_registry(registry)
        }

        fn calls(&self) -> usize {
            *self.calls.lock()
        }
    }

    fn repo() -> RemoteRepository {
        RemoteRepository::new("mem", "mem://repo")
    }

    #[test_log::test(tokio::test)]
    async fn test_fetch_then_serve_from_cache() {
        let fixture = Fixture::new();
        let resolver = fixture.resolver(fixture.config(), None);
        let request = ArtifactRequest::new(Artifact::new("g", "a", "jar", "1.0"), Some(repo()));

        let results = resolver.resolve_artifacts(vec![request.clone()]).await;
        assert_eq!(results.len(), 1);
        let artifact = results[0].artifact.as_ref().unwrap();
        let file = artifact.file.as_ref().unwrap();
        assert_eq!(std::fs::read_to_string(file).unwrap(), "jar-bytes");
        assert_eq!(fixture.calls(), 1);

        // Daily policy, just checked: no second fetch.
        let results = resolver.resolve_artifacts(vec![request]).await;
        assert!(results[0].is_resolved());
        assert_eq!(fixture.calls(), 1);
    }

    #[tokio::test]
    async fn test_results_keep_request_order() {
        let fixture = Fixture::new();
        let resolver = fixture.resolver(fixture.config(), None);
        let requests = vec![
            ArtifactRequest::new(Artifact::new("g", "missing", "jar", "1"), Some(repo())),
            ArtifactRequest::new(Artifact::new("g", "a", "jar", "1.0"), Some(repo())),
            ArtifactRequest::new(Artifact::new("g", "local", "jar", "1"), None),
        ];

        let results = resolver.resolve_artifacts(requests).await;
        assert_eq!(results[0].request.artifact.artifact_id, "missing");
        assert!(results[0].error.as_ref().unwrap().is_not_found());
        assert_eq!(results[1].request.artifact.artifact_id, "a");
        assert!(results[1].is_resolved());
        assert_eq!(results[2].request.artifact.artifact_id, "local");
        assert!(results[2].error.as_ref().unwrap().is_not_found());
        // One batched call for the repository.
        assert_eq!(fixture.calls(), 1);
    }

    #[tokio::test]
    async fn test_local_only_request_uses_existing_file() {
        let fixture = Fixture::new();
        let resolver = fixture.resolver(fixture.config(), None);
        let metadata = Metadata::new("g", "a", "", "maven-metadata.xml");
        let file = resolver
            .session()
            .local_repository()
            .local_metadata_file(&metadata);
        std::fs::create_dir_all(file.parent().unwrap()).unwrap();
        std::fs::write(&file, "<metadata/>").unwrap();

        let results = resolver
            .resolve_metadata(vec![MetadataRequest::new(metadata, None)])
            .await;
        assert_eq!(
            results[0].metadata.as_ref().unwrap().file.as_deref(),
            Some(file.as_path())
        );
        assert_eq!(fixture.calls(), 0);
    }

    #[tokio::test]
    async fn test_offline_and_disabled_never_reach_connector() {
        let fixture = Fixture::new();
        let request = ArtifactRequest::new(Artifact::new("g", "a", "jar", "1.0"), Some(repo()));

        let offline = fixture.resolver(fixture.config().with_offline(true), None);
        let results = offline.resolve_artifacts(vec![request.clone()]).await;
        let err = results[0].error.as_ref().unwrap().transfer_error().unwrap();
        assert!(!err.is_not_found());
        assert_eq!(err.message(), "offline");

        let disabled_repo = repo().with_policy(RepositoryPolicy {
            enabled: false,
            ..RepositoryPolicy::default()
        });
        let resolver = fixture.resolver(fixture.config(), None);
        let results = resolver
            .resolve_artifacts(vec![ArtifactRequest::new(
                request.artifact.clone(),
                Some(disabled_repo),
            )])
            .await;
        let err = results[0].error.as_ref().unwrap().transfer_error().unwrap();
        assert_eq!(err.message(), "repository disabled");

        assert_eq!(fixture.calls(), 0);
        // Nothing was recorded.
        let record = fixture.dir.path().join("g/a/1.0/resolver-status.json");
        assert!(!record.exists());
    }

    #[tokio::test]
    async fn test_no_connector_fails_group_without_touching() {
        let fixture = Fixture::new();
        let resolver = fixture.resolver(fixture.config(), None);
        let ftp = RemoteRepository::new("ftp", "ftp://example.org");
        let requests = vec![
            ArtifactRequest::new(Artifact::new("g", "a", "jar", "1.0"), Some(ftp.clone())),
            ArtifactRequest::new(Artifact::new("g", "b", "jar", "1.0"), Some(ftp)),
            ArtifactRequest::new(Artifact::new("g", "a", "jar", "1.0"), Some(repo())),
        ];

        let results = resolver.resolve_artifacts(requests).await;
        for result in &results[..2] {
            assert!(matches!(
                result.error,
                Some(ResolutionError::NoConnector(_))
            ));
        }
        assert!(results[2].is_resolved());

        let record = StatusRecord::load(
            &RealRuntime,
            &fixture.dir.path().join("g/b/1.0/resolver-status.json"),
        )
        .unwrap();
        assert!(record.entries.is_empty());
    }

    #[tokio::test]
    async fn test_deadline_fails_pending_transfers() {
        let fixture = Fixture::new();
        let config = fixture
            .config()
            .with_connect_timeout(Duration::from_millis(20))
            .with_request_timeout(Duration::from_millis(30));
        let resolver = fixture.resolver(config, Some(Duration::from_secs(5)));
        let request = ArtifactRequest::new(Artifact::new("g", "a", "jar", "1.0"), Some(repo()));

        let results = resolver.resolve_artifacts(vec![request]).await;
        let err = results[0].error.as_ref().unwrap().transfer_error().unwrap();
        assert!(!err.is_not_found());
        assert!(err.message().contains("did not finish within"));

        // The failure was recorded as a transfer error.
        let record = StatusRecord::load(
            &RealRuntime,
            &fixture.dir.path().join("g/a/1.0/resolver-status.json"),
        )
        .unwrap();
        let entry = record.entries.values().next().unwrap();
        assert_eq!(
            entry.error.as_ref().unwrap().kind,
            crate::update::CachedErrorKind::TransferError
        );
    }

    #[tokio::test]
    async fn test_deadline_applies_per_transfer() {
        let fixture = Fixture::new();
        let config = fixture
            .config()
            .with_connect_timeout(Duration::from_millis(10))
            .with_request_timeout(Duration::from_millis(100));
        // Each transfer fits its deadline; the batch as a whole does not.
        let resolver = fixture.resolver(config, Some(Duration::from_millis(60)));
        let requests = ["a", "b", "c", "d"]
            .iter()
            .map(|name| {
                ArtifactRequest::new(Artifact::new("g", name, "jar", "1.0"), Some(repo()))
            })
            .collect();

        let results = resolver.resolve_artifacts(requests).await;
        for result in &results {
            assert!(result.is_resolved(), "{:?}", result.error);
        }
        assert_eq!(fixture.calls(), 1);
    }

    #[tokio::test]
    async fn test_answered_locally_refreshes_check_timestamp() {
        let fixture = Fixture::new();
        let resolver = fixture.resolver(fixture.config().with_update_policy("never"), None);
        let request = ArtifactRequest::new(Artifact::new("g", "a", "jar", "1.0"), Some(repo()));
        let record = fixture.dir.path().join("g/a/1.0/resolver-status.json");
        let last_updated = || {
            StatusRecord::load(&RealRuntime, &record)
                .unwrap()
                .entries
                .values()
                .next()
                .map(|entry| entry.last_updated)
        };

        resolver.resolve_artifacts(vec![request.clone()]).await;
        let first = last_updated().unwrap();

        tokio::time::sleep(Duration::from_millis(20)).await;
        let results = resolver.resolve_artifacts(vec![request]).await;
        assert!(results[0].is_resolved());
        assert_eq!(fixture.calls(), 1);
        assert!(last_updated().unwrap() > first);
    }

    #[tokio::test]
    async fn test_session_update_policy_overrides_repository() {
        let fixture = Fixture::new();
        let resolver = fixture.resolver(fixture.config().with_update_policy("always"), None);
        let request = ArtifactRequest::new(Artifact::new("g", "a", "jar", "1.0"), Some(repo()));

        resolver.resolve_artifacts(vec![request.clone()]).await;
        resolver.resolve_artifacts(vec![request]).await;
        assert_eq!(fixture.calls(), 2);
    }
}
