//! Session configuration shared by update checks, connectors and the resolver.

use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use log::{debug, warn};

use crate::connector::TransferListener;
use crate::repository::{ChecksumPolicy, LocalRepository};
use crate::runtime::{LockTable, Runtime};

pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(30 * 60);

const ENV_CONNECT_TIMEOUT: &str = "REPOSYNC_CONNECT_TIMEOUT";
const ENV_REQUEST_TIMEOUT: &str = "REPOSYNC_REQUEST_TIMEOUT";
const ENV_CHECKSUM_POLICY: &str = "REPOSYNC_CHECKSUM_POLICY";
const ENV_UPDATE_POLICY: &str = "REPOSYNC_UPDATE_POLICY";
const ENV_NOT_FOUND_CACHING: &str = "REPOSYNC_NOT_FOUND_CACHING";
const ENV_TRANSFER_ERROR_CACHING: &str = "REPOSYNC_TRANSFER_ERROR_CACHING";
const ENV_OFFLINE: &str = "REPOSYNC_OFFLINE";
const ENV_LOCAL_REPOSITORY: &str = "REPOSYNC_LOCAL_REPOSITORY";

/// Tunables consumed by the resolution engine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionConfig {
    /// Time allowed to establish a connection.
    pub connect_timeout: Duration,
    /// Time allowed to finish a transfer once started.
    pub request_timeout: Duration,
    /// Overrides the checksum policy of every repository when set.
    pub checksum_policy: Option<ChecksumPolicy>,
    /// Overrides the update policy of every repository when set.
    pub update_policy: Option<String>,
    pub not_found_caching: bool,
    pub transfer_error_caching: bool,
    pub offline: bool,
    pub local_repository: PathBuf,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
            checksum_policy: None,
            update_policy: None,
            not_found_caching: true,
            transfer_error_caching: false,
            offline: false,
            local_repository: default_local_repository(dirs::home_dir()),
        }
    }
}

fn default_local_repository(home: Option<PathBuf>) -> PathBuf {
    home.unwrap_or_else(|| PathBuf::from("."))
        .join(".reposync")
        .join("repository")
}

impl SessionConfig {
    /// Defaults overlaid with `REPOSYNC_*` environment variables.
    ///
    /// Malformed values are ignored with a warning.
    pub fn from_env<R: Runtime + ?Sized>(runtime: &R) -> Self {
        let mut config = Self {
            local_repository: default_local_repository(runtime.home_dir()),
            ..Self::default()
        };

        if let Some(millis) = env_parsed::<u64, R>(runtime, ENV_CONNECT_TIMEOUT) {
            config.connect_timeout = Duration::from_millis(millis);
        }
        if let Some(millis) = env_parsed::<u64, R>(runtime, ENV_REQUEST_TIMEOUT) {
            config.request_timeout = Duration::from_millis(millis);
        }
        if let Some(policy) = env_parsed::<ChecksumPolicy, R>(runtime, ENV_CHECKSUM_POLICY) {
            config.checksum_policy = Some(policy);
        }
        if let Ok(policy) = runtime.env_var(ENV_UPDATE_POLICY) {
            config.update_policy = Some(policy);
        }
        if let Some(enabled) = env_flag(runtime, ENV_NOT_FOUND_CACHING) {
            config.not_found_caching = enabled;
        }
        if let Some(enabled) = env_flag(runtime, ENV_TRANSFER_ERROR_CACHING) {
            config.transfer_error_caching = enabled;
        }
        if let Some(enabled) = env_flag(runtime, ENV_OFFLINE) {
            config.offline = enabled;
        }
        if let Ok(path) = runtime.env_var(ENV_LOCAL_REPOSITORY) {
            config.local_repository = PathBuf::from(path);
        }

        debug!("Session configuration: {:?}", config);
        config
    }

    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    pub fn with_checksum_policy(mut self, policy: ChecksumPolicy) -> Self {
        self.checksum_policy = Some(policy);
        self
    }

    pub fn with_update_policy(mut self, policy: &str) -> Self {
        self.update_policy = Some(policy.to_string());
        self
    }

    pub fn with_not_found_caching(mut self, enabled: bool) -> Self {
        self.not_found_caching = enabled;
        self
    }

    pub fn with_transfer_error_caching(mut self, enabled: bool) -> Self {
        self.transfer_error_caching = enabled;
        self
    }

    pub fn with_offline(mut self, offline: bool) -> Self {
        self.offline = offline;
        self
    }

    pub fn with_local_repository(mut self, path: impl Into<PathBuf>) -> Self {
        self.local_repository = path.into();
        self
    }

    /// Upper bound for one transfer, from connect through the last byte.
    pub fn transfer_deadline(&self) -> Duration {
        self.connect_timeout.saturating_add(self.request_timeout)
    }
}

fn env_parsed<T, R>(runtime: &R, key: &str) -> Option<T>
where
    T: std::str::FromStr,
    T::Err: fmt::Display,
    R: Runtime + ?Sized,
{
    let value = runtime.env_var(key).ok()?;
    match value.trim().parse::<T>() {
        Ok(parsed) => Some(parsed),
        Err(e) => {
            warn!("Ignoring {}={:?}: {}", key, value, e);
            None
        }
    }
}

fn env_flag<R: Runtime + ?Sized>(runtime: &R, key: &str) -> Option<bool> {
    let value = runtime.env_var(key).ok()?;
    match value.trim().to_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => {
            warn!("Ignoring {}={:?}: expected true or false", key, value);
            None
        }
    }
}

/// One resolution session: configuration plus the state shared by every
/// operation running under it.
///
/// Cloning is cheap and clones share the lock table and listener.
#[derive(Clone)]
pub struct Session {
    config: SessionConfig,
    local_repository: LocalRepository,
    locks: Arc<LockTable>,
    listener: Option<Arc<dyn TransferListener>>,
}

impl Session {
    pub fn new(config: SessionConfig) -> Self {
        let local_repository = LocalRepository::new(config.local_repository.clone());
        Self {
            config,
            local_repository,
            locks: Arc::new(LockTable::new()),
            listener: None,
        }
    }

    pub fn with_listener(mut self, listener: Arc<dyn TransferListener>) -> Self {
        self.listener = Some(listener);
        self
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    pub fn local_repository(&self) -> &LocalRepository {
        &self.local_repository
    }

    pub fn locks(&self) -> &Arc<LockTable> {
        &self.locks
    }

    pub fn listener(&self) -> Option<&Arc<dyn TransferListener>> {
        self.listener.as_ref()
    }
}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("config", &self.config)
            .field("locks", &self.locks)
            .field("listener", &self.listener.is_some())
            .finish()
    }
}
