//! Decides whether cached items must be fetched again.

use std::path::Path;
use std::sync::Arc;

use log::debug;

use super::check::UpdateCheck;
use super::policy::is_update_required;
use super::status::{CachedError, CachedErrorKind, StatusEntry, StatusRecord};
use crate::error::CheckError;
use crate::runtime::Runtime;
use crate::session::Session;

/// Evaluates update checks against the persisted status record.
pub struct UpdateCheckManager<R: Runtime> {
    runtime: Arc<R>,
}

impl<R: Runtime> UpdateCheckManager<R> {
    pub fn new(runtime: Arc<R>) -> Self {
        Self { runtime }
    }

    pub fn runtime(&self) -> &Arc<R> {
        &self.runtime
    }

    /// Decide whether `check.item` must be fetched from its repository.
    ///
    /// Sets `check.last_updated`, `check.required` and, when a cached
    /// failure is replayed, `check.error`.
    #[tracing::instrument(skip_all, fields(item = %check.item))]
    pub fn check(&self, session: &Session, check: &mut UpdateCheck) -> Result<(), CheckError> {
        let file = check
            .file
            .clone()
            .ok_or_else(|| CheckError::InvalidRequest {
                item: check.item.to_string(),
            })?;
        let config = session.config();
        let now = self.runtime.now_millis();

        let entry = self.read_entry(session, &file, check)?;
        let last_updated = check
            .local_last_updated
            .or_else(|| entry.as_ref().map(|e| e.last_updated))
            .or_else(|| {
                if check.item.is_artifact() {
                    self.runtime.modified_millis(&file)
                } else {
                    None
                }
            })
            .unwrap_or(0);
        check.last_updated = last_updated;

        let due = is_update_required(now, last_updated, &check.policy);

        if self.runtime.is_file(&file) {
            check.required = due;
            if !due {
                check.error = None;
            }
            debug!(
                "{} exists locally, last checked {}: update {}",
                check.item,
                last_updated,
                if due { "required" } else { "not required" }
            );
            return Ok(());
        }

        let cached = entry.and_then(|e| e.error);
        match cached {
            Some(cached) if !due => {
                let caching = match cached.kind {
                    CachedErrorKind::NotFound => config.not_found_caching,
                    CachedErrorKind::TransferError => config.transfer_error_caching,
                };
                if caching {
                    debug!("Replaying cached {:?} for {}", cached.kind, check.item);
                    check.required = false;
                    check.error = Some(cached.replay(&check.item, check.status_repository()));
                } else {
                    debug!(
                        "Ignoring cached {:?} for {}, caching disabled",
                        cached.kind, check.item
                    );
                    check.required = true;
                    check.error = None;
                }
            }
            _ => {
                debug!("{} missing locally: update required", check.item);
                check.required = true;
            }
        }

        Ok(())
    }

    /// Record that `check.item` was just checked, together with the outcome
    /// in `check.error`.
    #[tracing::instrument(skip_all, fields(item = %check.item))]
    pub fn touch(&self, session: &Session, check: &UpdateCheck) -> Result<(), CheckError> {
        let file = check
            .file
            .as_deref()
            .ok_or_else(|| CheckError::InvalidRequest {
                item: check.item.to_string(),
            })?;
        let path = StatusRecord::path_for(file);
        let key = StatusRecord::key(file, check.status_repository());
        let entry = StatusEntry {
            last_updated: self.runtime.now_millis(),
            error: check.error.as_ref().map(CachedError::from_error),
        };
        debug!("Touching {} ({:?})", key, entry.error.as_ref().map(|e| e.kind));

        let status_error = |source| CheckError::Status {
            path: path.clone(),
            source,
        };
        let _guard = session.locks().write(status_dir(&path));
        let mut record =
            StatusRecord::load_for_update(self.runtime.as_ref(), &path).map_err(status_error)?;
        record.insert(key, entry);
        record
            .save(self.runtime.as_ref(), &path)
            .map_err(status_error)
    }

    fn read_entry(
        &self,
        session: &Session,
        file: &Path,
        check: &UpdateCheck,
    ) -> Result<Option<StatusEntry>, CheckError> {
        let path = StatusRecord::path_for(file);
        let key = StatusRecord::key(file, check.status_repository());

        let _guard = session.locks().read(status_dir(&path));
        let record =
            StatusRecord::load(self.runtime.as_ref(), &path).map_err(|source| CheckError::Status {
                path: path.clone(),
                source,
            })?;
        Ok(record.get(&key).cloned())
    }
}

fn status_dir(record: &Path) -> &Path {
    record.parent().unwrap_or(record)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::artifact::{Artifact, Item, Metadata};
    use crate::error::TransferError;
    use crate::repository::RemoteRepository;
    use crate::runtime::{MockRuntime, RealRuntime};
    use crate::session::SessionConfig;
    use crate::update::policy::local_midnight;
    use std::path::PathBuf;
    use tempfile::{TempDir, tempdir};

    const HOUR: i64 = 60 * 60 * 1000;

    fn repository() -> RemoteRepository {
        RemoteRepository::new("central", "https://repo.example.org/")
    }

    struct Fixture {
        dir: TempDir,
        manager: UpdateCheckManager<RealRuntime>,
    }

    impl Fixture {
        fn new() -> Self {
            Self {
                dir: tempdir().unwrap(),
                manager: UpdateCheckManager::new(Arc::new(RealRuntime)),
            }
        }

        fn session(&self) -> Session {
            Session::new(SessionConfig::default().with_local_repository(self.dir.path()))
        }

        fn metadata_file(&self, create: bool) -> PathBuf {
            let file = self.dir.path().join("g/a/maven-metadata-central.xml");
            if create {
                std::fs::create_dir_all(file.parent().unwrap()).unwrap();
                std::fs::write(&file, "<metadata/>").unwrap();
            }
            file
        }

        fn metadata_check(&self, file: &Path, policy: &str) -> UpdateCheck {
            let metadata = Metadata::new("g", "a", "", "maven-metadata.xml").with_file(file);
            UpdateCheck::new(Item::Metadata(metadata), repository(), policy)
        }

        fn artifact_check(&self, create: bool, policy: &str) -> UpdateCheck {
            let file = self.dir.path().join("g/a/1.0/a-1.0.jar");
            if create {
                std::fs::create_dir_all(file.parent().unwrap()).unwrap();
                std::fs::write(&file, "jar").unwrap();
            }
            let artifact = Artifact::new("g", "a", "jar", "1.0").with_file(&file);
            UpdateCheck::new(Item::Artifact(artifact), repository(), policy)
        }
    }

    #[test]
    fn test_no_file_is_invalid_request() {
        let fixture = Fixture::new();
        let metadata = Metadata::new("g", "a", "", "maven-metadata.xml");
        let mut check = UpdateCheck::new(Item::Metadata(metadata), repository(), "daily");

        let err = fixture
            .manager
            .check(&fixture.session(), &mut check)
            .unwrap_err();
        assert!(matches!(err, CheckError::InvalidRequest { .. }));
        assert!(!check.required);
        assert_eq!(check.last_updated, 0);
    }

    #[test]
    fn test_policy_required_with_stale_timestamp() {
        let fixture = Fixture::new();
        let session = fixture.session();
        let file = fixture.metadata_file(true);
        let yesterday = chrono::Utc::now().timestamp_millis() - 24 * HOUR;

        for policy in ["always", "daily", "interval:60"] {
            let mut check = fixture
                .metadata_check(&file, policy)
                .with_local_last_updated(yesterday);
            fixture.manager.check(&session, &mut check).unwrap();
            assert!(check.required, "{} should require an update", policy);
            assert!(check.error.is_none());
        }
    }

    #[test]
    fn test_policy_not_required_with_fresh_timestamp() {
        let fixture = Fixture::new();
        let session = fixture.session();
        let file = fixture.metadata_file(true);
        let now = chrono::Utc::now().timestamp_millis();

        for policy in ["never", "daily", "interval:61", "bogus"] {
            let mut check = fixture
                .metadata_check(&file, policy)
                .with_local_last_updated(now);
            fixture.manager.check(&session, &mut check).unwrap();
            assert!(!check.required, "{} should not require an update", policy);
        }
    }

    #[test]
    fn test_first_check_then_touch() {
        let fixture = Fixture::new();
        let session = fixture.session();
        let file = fixture.metadata_file(true);

        // never checked before
        let mut check = fixture.metadata_check(&file, "daily");
        fixture.manager.check(&session, &mut check).unwrap();
        assert!(check.required);
        assert_eq!(check.last_updated, 0);

        fixture.manager.touch(&session, &check).unwrap();

        let mut check = fixture.metadata_check(&file, "daily");
        fixture.manager.check(&session, &mut check).unwrap();
        assert!(!check.required);

        // local file gone, no cached error
        std::fs::remove_file(&file).unwrap();
        let mut check = fixture.metadata_check(&file, "daily");
        fixture.manager.check(&session, &mut check).unwrap();
        assert!(check.required);
    }

    #[test]
    fn test_touch_then_check_interval() {
        let fixture = Fixture::new();
        let session = fixture.session();
        let file = fixture.metadata_file(true);

        let mut check = fixture.metadata_check(&file, "interval:60");
        fixture.manager.check(&session, &mut check).unwrap();
        assert!(check.required);

        fixture.manager.touch(&session, &check).unwrap();

        let mut check = fixture.metadata_check(&file, "interval:60");
        fixture.manager.check(&session, &mut check).unwrap();
        assert!(!check.required);
    }

    #[test]
    fn test_touch_over_corrupt_record_keeps_it() {
        let fixture = Fixture::new();
        let session = fixture.session();
        let file = fixture.metadata_file(true);
        let record = StatusRecord::path_for(&file);
        std::fs::write(&record, "{\"entries\": [").unwrap();

        let check = fixture.metadata_check(&file, "daily");
        fixture.manager.touch(&session, &check).unwrap();

        let kept = std::fs::read_to_string(StatusRecord::corrupt_path(&record)).unwrap();
        assert_eq!(kept, "{\"entries\": [");
        let rewritten = StatusRecord::load(&RealRuntime, &record).unwrap();
        assert_eq!(rewritten.entries.len(), 1);
    }

    #[test]
    fn test_missing_file_with_due_update_is_required() {
        let fixture = Fixture::new();
        let file = fixture.metadata_file(false);
        let mut check = fixture
            .metadata_check(&file, "daily")
            .with_local_last_updated(chrono::Utc::now().timestamp_millis() - 48 * HOUR);

        fixture.manager.check(&fixture.session(), &mut check).unwrap();
        assert!(check.required);
    }

    fn touch_with_error(fixture: &Fixture, session: &Session, check: &UpdateCheck, not_found: bool) {
        let error = if not_found {
            check.item.not_found(&check.repository, "")
        } else {
            check.item.transfer_error(&check.repository, "connection reset")
        };
        let failed = check.clone().with_error(error);
        fixture.manager.touch(session, &failed).unwrap();
    }

    #[test]
    fn test_not_found_cached() {
        let fixture = Fixture::new();
        let session = fixture.session();
        let check = fixture.artifact_check(false, "daily");
        touch_with_error(&fixture, &session, &check, true);

        let mut check = fixture.artifact_check(false, "daily");
        fixture.manager.check(&session, &mut check).unwrap();
        assert!(!check.required);
        assert!(matches!(
            check.error,
            Some(TransferError::ArtifactNotFound { .. })
        ));
    }

    #[test]
    fn test_not_found_caching_disabled() {
        let fixture = Fixture::new();
        let session = Session::new(
            SessionConfig::default()
                .with_local_repository(fixture.dir.path())
                .with_not_found_caching(false),
        );
        let check = fixture.artifact_check(false, "daily");
        touch_with_error(&fixture, &session, &check, true);

        let mut check = fixture.artifact_check(false, "daily");
        fixture.manager.check(&session, &mut check).unwrap();
        assert!(check.required);
        assert!(check.error.is_none());
    }

    #[test]
    fn test_transfer_error_caching() {
        let fixture = Fixture::new();
        let file = fixture.metadata_file(false);
        let check = fixture.metadata_check(&file, "daily");

        let caching = Session::new(
            SessionConfig::default()
                .with_local_repository(fixture.dir.path())
                .with_transfer_error_caching(true),
        );
        touch_with_error(&fixture, &caching, &check, false);

        let mut replayed = fixture.metadata_check(&file, "daily");
        fixture.manager.check(&caching, &mut replayed).unwrap();
        assert!(!replayed.required);
        match replayed.error {
            Some(TransferError::MetadataTransfer { message, .. }) => {
                assert_eq!(message, "connection reset")
            }
            other => panic!("unexpected error {:?}", other),
        }

        // Default sessions do not cache transfer errors.
        let mut ignored = fixture.metadata_check(&file, "daily");
        fixture
            .manager
            .check(&fixture.session(), &mut ignored)
            .unwrap();
        assert!(ignored.required);
        assert!(ignored.error.is_none());
    }

    #[test]
    fn test_cached_error_not_replayed_when_due() {
        let fixture = Fixture::new();
        let session = fixture.session();
        let check = fixture.artifact_check(false, "always");
        touch_with_error(&fixture, &session, &check, true);

        let mut check = fixture.artifact_check(false, "always");
        fixture.manager.check(&session, &mut check).unwrap();
        assert!(check.required);
        assert!(check.error.is_none());
    }

    #[test]
    fn test_artifact_falls_back_to_file_mtime() {
        let fixture = Fixture::new();
        let session = fixture.session();

        let mut check = fixture.artifact_check(true, "interval:60");
        let file = check.file.clone().unwrap();
        fixture.manager.check(&session, &mut check).unwrap();
        assert!(!check.required, "freshly written file counts as checked");

        let two_hours_ago = chrono::Utc::now().timestamp() - 2 * 3600;
        filetime::set_file_mtime(&file, filetime::FileTime::from_unix_time(two_hours_ago, 0))
            .unwrap();
        let mut check = fixture.artifact_check(false, "interval:60");
        fixture.manager.check(&session, &mut check).unwrap();
        assert!(check.required);
        assert_eq!(check.last_updated, two_hours_ago * 1000);
    }

    #[test]
    fn test_existing_file_clears_error_when_fresh() {
        let fixture = Fixture::new();
        let file = fixture.metadata_file(true);
        let mut check = fixture
            .metadata_check(&file, "never")
            .with_error(TransferError::MetadataTransfer {
                metadata: "m".into(),
                repository: "r".into(),
                message: "old".into(),
            });
        fixture.manager.check(&fixture.session(), &mut check).unwrap();
        assert!(!check.required);
        assert!(check.error.is_none());
    }

    #[test]
    fn test_authoritative_repository_keys_status() {
        let fixture = Fixture::new();
        let session = fixture.session();
        let file = fixture.metadata_file(true);
        let origin = RemoteRepository::new("origin", "https://origin.example.org");

        let check = fixture
            .metadata_check(&file, "daily")
            .with_authoritative_repository(origin.clone());
        fixture.manager.touch(&session, &check).unwrap();

        // Same origin behind a different mirror: fresh.
        let mut mirrored = fixture
            .metadata_check(&file, "daily")
            .with_authoritative_repository(origin);
        fixture.manager.check(&session, &mut mirrored).unwrap();
        assert!(!mirrored.required);

        // Without the origin the mirror has never been checked.
        let mut direct = fixture.metadata_check(&file, "daily");
        fixture.manager.check(&session, &mut direct).unwrap();
        assert!(direct.required);
    }

    #[test]
    fn test_daily_boundary_with_mock_clock() {
        let now = chrono::Utc::now().timestamp_millis();
        let midnight = local_midnight(now).unwrap();
        let file = PathBuf::from("/repo/g/a/maven-metadata-central.xml");

        let mut runtime = MockRuntime::new();
        runtime.expect_now_millis().return_const(now);
        runtime.expect_exists().returning(|_| false);
        runtime.expect_is_file().returning(|_| true);
        let manager = UpdateCheckManager::new(Arc::new(runtime));
        let session = Session::new(SessionConfig::default());

        let metadata = Metadata::new("g", "a", "", "maven-metadata.xml").with_file(&file);
        let mut check = UpdateCheck::new(Item::Metadata(metadata), repository(), "daily")
            .with_local_last_updated(midnight - 1);
        manager.check(&session, &mut check).unwrap();
        assert!(check.required);

        check.local_last_updated = Some(midnight + 1);
        manager.check(&session, &mut check).unwrap();
        assert!(!check.required);
    }

    #[test]
    fn test_touch_reports_status_write_failure() {
        let mut runtime = MockRuntime::new();
        runtime.expect_now_millis().return_const(1_000i64);
        runtime.expect_exists().returning(|_| true);
        runtime
            .expect_read_to_string()
            .returning(|_| Ok("{}".to_string()));
        runtime
            .expect_write()
            .returning(|_, _| Err(anyhow::anyhow!("disk full")));
        let manager = UpdateCheckManager::new(Arc::new(runtime));
        let session = Session::new(SessionConfig::default());

        let metadata =
            Metadata::new("g", "a", "", "maven-metadata.xml").with_file("/repo/g/a/m.xml");
        let check = UpdateCheck::new(Item::Metadata(metadata), repository(), "daily");
        let err = manager.touch(&session, &check).unwrap_err();
        match err {
            CheckError::Status { path, .. } => {
                assert_eq!(path, PathBuf::from("/repo/g/a/resolver-status.json"))
            }
            other => panic!("unexpected error {:?}", other),
        }
    }
}
