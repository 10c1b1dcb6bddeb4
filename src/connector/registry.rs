//! Registry of connector factories.

use std::sync::Arc;

use log::debug;

use super::{Connector, ConnectorFactory, FileConnectorFactory, HttpConnectorFactory};
use crate::error::NoConnectorError;
use crate::repository::RemoteRepository;
use crate::session::Session;

/// Picks a connector for a repository by asking each registered factory,
/// highest priority first, until one accepts.
#[derive(Default, Clone)]
pub struct ConnectorRegistry {
    factories: Vec<Arc<dyn ConnectorFactory>>,
}

impl ConnectorRegistry {
    /// Create a new empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry with the built-in `file://` and `http(s)://` connectors.
    pub fn with_defaults() -> Self {
        let mut registry = Self::new();
        registry.register(Arc::new(FileConnectorFactory));
        registry.register(Arc::new(HttpConnectorFactory));
        registry
    }

    /// Register a factory. Factories with equal priority keep registration order.
    pub fn register(&mut self, factory: Arc<dyn ConnectorFactory>) {
        self.factories.push(factory);
        self.factories
            .sort_by_key(|factory| std::cmp::Reverse(factory.priority()));
    }

    pub fn len(&self) -> usize {
        self.factories.len()
    }

    pub fn is_empty(&self) -> bool {
        self.factories.is_empty()
    }

    /// Create a connector for `repository`.
    ///
    /// When every factory declines, the returned error carries each
    /// factory's reason.
    pub fn new_connector(
        &self,
        session: &Session,
        repository: &RemoteRepository,
    ) -> Result<Arc<dyn Connector>, NoConnectorError> {
        let mut reasons = Vec::new();
        for factory in &self.factories {
            match factory.new_connector(session, repository) {
                Ok(connector) => {
                    debug!("Using connector for {}", repository);
                    return Ok(connector);
                }
                Err(e) => reasons.push(e.reason),
            }
        }

        Err(NoConnectorError {
            repository: repository.to_string(),
            content_type: repository.content_type.clone(),
            reason: if reasons.is_empty() {
                "no connector factories registered".to_string()
            } else {
                reasons.join("; ")
            },
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connector::{ArtifactDownload, ArtifactUpload, MetadataDownload, MetadataUpload};
    use crate::session::SessionConfig;
    use async_trait::async_trait;

    struct NamedConnector {
        repository: RemoteRepository,
    }

    #[async_trait]
    impl Connector for NamedConnector {
        fn repository(&self) -> &RemoteRepository {
            &self.repository
        }

        async fn get(&self, _: &mut [ArtifactDownload], _: &mut [MetadataDownload]) {}

        async fn put(&self, _: &mut [ArtifactUpload], _: &mut [MetadataUpload]) {}
    }

    struct Fixed {
        priority: i32,
        id: &'static str,
    }

    impl ConnectorFactory for Fixed {
        fn priority(&self) -> i32 {
            self.priority
        }

        fn new_connector(
            &self,
            _: &Session,
            _: &RemoteRepository,
        ) -> Result<Arc<dyn Connector>, NoConnectorError> {
            Ok(Arc::new(NamedConnector {
                repository: RemoteRepository::new(self.id, "mem://"),
            }))
        }
    }

    #[test]
    fn test_highest_priority_wins() {
        let mut registry = ConnectorRegistry::new();
        registry.register(Arc::new(Fixed { priority: 1, id: "low" }));
        registry.register(Arc::new(Fixed { priority: 5, id: "high" }));
        assert_eq!(registry.len(), 2);

        let session = Session::new(SessionConfig::default());
        let connector = registry
            .new_connector(&session, &RemoteRepository::new("r", "mem://x"))
            .unwrap();
        assert_eq!(connector.repository().id, "high");
    }

    #[test]
    fn test_unsupported_protocol_collects_reasons() {
        let registry = ConnectorRegistry::with_defaults();
        let session = Session::new(SessionConfig::default());
        let err = registry
            .new_connector(&session, &RemoteRepository::new("ftp", "ftp://example.org"))
            .unwrap_err();

        assert_eq!(err.repository, "ftp (ftp://example.org)");
        assert!(err.reason.contains("unsupported protocol ftp"));
    }

    #[test]
    fn test_empty_registry() {
        let registry = ConnectorRegistry::new();
        assert!(registry.is_empty());
        let session = Session::new(SessionConfig::default());
        let err = registry
            .new_connector(&session, &RemoteRepository::new("r", "file:///x"))
            .unwrap_err();
        assert!(err.reason.contains("no connector factories"));
    }
}
