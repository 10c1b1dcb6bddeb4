//! Transfer progress events.

use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Result, bail, ensure};
use parking_lot::Mutex;

use crate::error::TransferError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransferEventKind {
    Initiated,
    Started,
    Progressed,
    Succeeded,
    Failed,
}

impl fmt::Display for TransferEventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            TransferEventKind::Initiated => "INITIATED",
            TransferEventKind::Started => "STARTED",
            TransferEventKind::Progressed => "PROGRESSED",
            TransferEventKind::Succeeded => "SUCCEEDED",
            TransferEventKind::Failed => "FAILED",
        };
        write!(f, "{}", name)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestKind {
    Get,
    Put,
}

/// What is being transferred and where it comes from or goes to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransferResource {
    pub repository_url: String,
    pub resource_name: String,
    pub file: PathBuf,
    /// Total size when known up front.
    pub content_length: Option<u64>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransferEvent {
    pub kind: TransferEventKind,
    pub request: RequestKind,
    pub resource: TransferResource,
    /// Cumulative bytes moved so far.
    pub transferred: u64,
    /// Bytes in this chunk. Only set for PROGRESSED.
    pub data_length: usize,
    pub error: Option<TransferError>,
}

/// Receives events for every transfer of a session.
pub trait TransferListener: Send + Sync {
    fn transfer_event(&self, event: &TransferEvent);
}

/// Keeps every event it sees, in arrival order.
#[derive(Debug, Default)]
pub struct RecordingTransferListener {
    events: Mutex<Vec<TransferEvent>>,
}

impl RecordingTransferListener {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<TransferEvent> {
        self.events.lock().clone()
    }

    pub fn clear(&self) {
        self.events.lock().clear();
    }
}

impl TransferListener for RecordingTransferListener {
    fn transfer_event(&self, event: &TransferEvent) {
        self.events.lock().push(event.clone());
    }
}

/// Check that `events` is one complete, successful transfer of
/// `expected_size` bytes: INITIATED, STARTED, PROGRESSED with strictly
/// growing totals, then SUCCEEDED and nothing after it.
pub fn validate_transfer_events(events: &[TransferEvent], expected_size: u64) -> Result<()> {
    let mut iter = events.iter();

    let Some(first) = iter.next() else {
        bail!("initiate event is missing");
    };
    ensure!(
        first.kind == TransferEventKind::Initiated,
        "expected INITIATED, got {}",
        first.kind
    );

    let Some(second) = iter.next() else {
        bail!("start event is missing");
    };
    ensure!(
        second.kind == TransferEventKind::Started,
        "expected STARTED, got {}",
        second.kind
    );

    let mut transferred = 0u64;
    let mut data_length = 0u64;
    let mut succeeded = None;
    for event in iter.by_ref() {
        match event.kind {
            TransferEventKind::Progressed => {
                ensure!(
                    event.transferred > transferred,
                    "transferred bytes did not grow: {} after {}",
                    event.transferred,
                    transferred
                );
                transferred = event.transferred;
                data_length += event.data_length as u64;
            }
            TransferEventKind::Succeeded => {
                succeeded = Some(event);
                break;
            }
            other => bail!("unexpected {} event during transfer", other),
        }
    }

    let Some(succeeded) = succeeded else {
        bail!("succeed event is missing");
    };
    let trailing = iter.count();
    ensure!(trailing == 0, "{} events after SUCCEEDED", trailing);
    ensure!(
        data_length == expected_size,
        "progress events transferred bytes don't match: {} != {}",
        data_length,
        expected_size
    );
    ensure!(
        succeeded.transferred == expected_size,
        "succeed event transferred bytes don't match: {} != {}",
        succeeded.transferred,
        expected_size
    );
    Ok(())
}

/// Emits the event sequence of one transfer to the session listener.
pub(crate) struct TransferNotifier {
    listener: Option<Arc<dyn TransferListener>>,
    request: RequestKind,
    resource: TransferResource,
    transferred: u64,
}

impl TransferNotifier {
    pub(crate) fn new(
        listener: Option<Arc<dyn TransferListener>>,
        request: RequestKind,
        resource: TransferResource,
    ) -> Self {
        Self {
            listener,
            request,
            resource,
            transferred: 0,
        }
    }

    pub(crate) fn transferred(&self) -> u64 {
        self.transferred
    }

    fn emit(&self, kind: TransferEventKind, data_length: usize, error: Option<TransferError>) {
        if let Some(listener) = &self.listener {
            listener.transfer_event(&TransferEvent {
                kind,
                request: self.request,
                resource: self.resource.clone(),
                transferred: self.transferred,
                data_length,
                error,
            });
        }
    }

    pub(crate) fn initiated(&self) {
        self.emit(TransferEventKind::Initiated, 0, None);
    }

    pub(crate) fn started(&mut self, content_length: Option<u64>) {
        self.resource.content_length = content_length;
        self.emit(TransferEventKind::Started, 0, None);
    }

    pub(crate) fn progressed(&mut self, chunk: usize) {
        if chunk == 0 {
            return;
        }
        self.transferred += chunk as u64;
        self.emit(TransferEventKind::Progressed, chunk, None);
    }

    pub(crate) fn succeeded(&self) {
        self.emit(TransferEventKind::Succeeded, 0, None);
    }

    pub(crate) fn failed(&self, error: &TransferError) {
        self.emit(TransferEventKind::Failed, 0, Some(error.clone()));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::artifact::Artifact;

    fn resource() -> TransferResource {
        TransferResource {
            repository_url: "file:///repo".into(),
            resource_name: "g/a/1/a-1.jar".into(),
            file: PathBuf::from("/tmp/a-1.jar"),
            content_length: None,
        }
    }

    fn notifier(listener: &Arc<RecordingTransferListener>) -> TransferNotifier {
        let listener: Arc<dyn TransferListener> = listener.clone();
        TransferNotifier::new(Some(listener), RequestKind::Get, resource())
    }

    #[test]
    fn test_valid_sequence() {
        let listener = Arc::new(RecordingTransferListener::new());
        let mut n = notifier(&listener);
        n.initiated();
        n.started(Some(10));
        n.progressed(4);
        n.progressed(0);
        n.progressed(6);
        n.succeeded();

        let events = listener.events();
        assert_eq!(events.len(), 5);
        assert_eq!(events[1].resource.content_length, Some(10));
        assert_eq!(events[3].transferred, 10);
        validate_transfer_events(&events, 10).unwrap();
    }

    #[test]
    fn test_size_mismatch_detected() {
        let listener = Arc::new(RecordingTransferListener::new());
        let mut n = notifier(&listener);
        n.initiated();
        n.started(None);
        n.progressed(3);
        n.succeeded();

        let err = validate_transfer_events(&listener.events(), 10).unwrap_err();
        assert!(err.to_string().contains("don't match"));
    }

    #[test]
    fn test_failed_transfer_is_not_valid_success() {
        let listener = Arc::new(RecordingTransferListener::new());
        let n = notifier(&listener);
        n.initiated();
        let error = TransferError::artifact_not_found(&Artifact::new("g", "a", "jar", "1"), "r", "");
        n.failed(&error);

        let events = listener.events();
        assert_eq!(events[1].kind, TransferEventKind::Failed);
        assert_eq!(events[1].error.as_ref(), Some(&error));
        assert!(validate_transfer_events(&events, 0).is_err());
    }

    #[test]
    fn test_missing_events_detected() {
        assert!(validate_transfer_events(&[], 0).is_err());

        let listener = Arc::new(RecordingTransferListener::new());
        let mut n = notifier(&listener);
        n.initiated();
        n.started(None);
        n.progressed(1);
        assert!(validate_transfer_events(&listener.events(), 1).is_err());

        n.succeeded();
        n.succeeded();
        assert!(validate_transfer_events(&listener.events(), 1).is_err());
    }

    #[test]
    fn test_no_listener_is_silent() {
        let mut n = TransferNotifier::new(None, RequestKind::Put, resource());
        n.initiated();
        n.progressed(5);
        assert_eq!(n.transferred(), 5);
    }
}
