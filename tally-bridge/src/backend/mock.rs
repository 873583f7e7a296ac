//! In-memory bridge backend for tests and demos

use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use tracing::debug;
use uuid::Uuid;

use super::{BridgeBackend, CreatedRequest, RequestId, RequestStatus};
use crate::{Error, Result};

/// Scripted reply to one request
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MockReply {
    /// Complete with this XML
    Data(String),
    /// Complete without data
    Empty,
    /// Fail with this remote message
    Failed(String),
    /// Never complete
    Hang,
}

type Responder = dyn Fn(&str) -> MockReply + Send + Sync;

#[derive(Debug)]
struct QueuedRequest {
    reply: MockReply,
    polls_remaining: u32,
}

/// Backend that answers from a responder closure.
///
/// Queued requests report `Pending` for `pending_polls` status calls before
/// resolving to the scripted reply.
pub struct MockBridgeBackend {
    responder: Box<Responder>,
    pending_polls: u32,
    legacy: bool,
    alive: AtomicBool,
    probe_error: AtomicBool,
    requests: Mutex<HashMap<String, QueuedRequest>>,
    payloads: Mutex<Vec<String>>,
    check_calls: AtomicUsize,
    create_calls: AtomicUsize,
    status_calls: AtomicUsize,
}

impl MockBridgeBackend {
    /// Create a mock whose requests are answered by `responder`
    pub fn new<F>(responder: F) -> Self
    where
        F: Fn(&str) -> MockReply + Send + Sync + 'static,
    {
        Self {
            responder: Box::new(responder),
            pending_polls: 0,
            legacy: false,
            alive: AtomicBool::new(true),
            probe_error: AtomicBool::new(false),
            requests: Mutex::new(HashMap::new()),
            payloads: Mutex::new(Vec::new()),
            check_calls: AtomicUsize::new(0),
            create_calls: AtomicUsize::new(0),
            status_calls: AtomicUsize::new(0),
        }
    }

    /// Report `Pending` this many times before resolving
    pub fn with_pending_polls(mut self, polls: u32) -> Self {
        self.pending_polls = polls;
        self
    }

    /// Answer synchronously from `create_request`
    pub fn legacy(mut self) -> Self {
        self.legacy = true;
        self
    }

    /// Set whether the desktop bridge appears online
    pub fn set_alive(&self, alive: bool) {
        self.alive.store(alive, Ordering::SeqCst);
    }

    /// Make `check_session` fail with a transport error
    pub fn set_probe_error(&self, failing: bool) {
        self.probe_error.store(failing, Ordering::SeqCst);
    }

    /// Number of `check_session` calls
    pub fn check_calls(&self) -> usize {
        self.check_calls.load(Ordering::SeqCst)
    }

    /// Number of `create_request` calls
    pub fn create_calls(&self) -> usize {
        self.create_calls.load(Ordering::SeqCst)
    }

    /// Number of `get_request_status` calls
    pub fn status_calls(&self) -> usize {
        self.status_calls.load(Ordering::SeqCst)
    }

    /// Every payload submitted so far, in order
    pub fn payloads(&self) -> Vec<String> {
        self.payloads.lock().clone()
    }

    /// Requests queued and not yet resolved
    pub fn pending_requests(&self) -> usize {
        self.requests.lock().len()
    }

    /// Total transport calls of any kind
    pub fn total_calls(&self) -> usize {
        self.check_calls() + self.create_calls() + self.status_calls()
    }
}

#[async_trait]
impl BridgeBackend for MockBridgeBackend {
    async fn check_session(&self, _session_code: &str) -> Result<bool> {
        self.check_calls.fetch_add(1, Ordering::SeqCst);
        if self.probe_error.load(Ordering::SeqCst) {
            return Err(Error::Transport("mock probe failure".to_string()));
        }
        Ok(self.alive.load(Ordering::SeqCst))
    }

    async fn create_request(
        &self,
        _session_code: &str,
        xml_request: &str,
    ) -> Result<CreatedRequest> {
        self.create_calls.fetch_add(1, Ordering::SeqCst);
        self.payloads.lock().push(xml_request.to_string());

        let reply = (self.responder)(xml_request);

        if self.legacy {
            return match reply {
                MockReply::Data(xml) => Ok(CreatedRequest::Immediate(Some(xml))),
                MockReply::Empty | MockReply::Hang => Ok(CreatedRequest::Immediate(None)),
                MockReply::Failed(msg) => Err(Error::Transport(msg)),
            };
        }

        let id = Uuid::new_v4().to_string();
        debug!(request_id = %id, "Mock request queued");
        self.requests.lock().insert(
            id.clone(),
            QueuedRequest {
                reply,
                polls_remaining: self.pending_polls,
            },
        );
        Ok(CreatedRequest::Queued(RequestId(id)))
    }

    async fn get_request_status(&self, request_id: &RequestId) -> Result<RequestStatus> {
        self.status_calls.fetch_add(1, Ordering::SeqCst);

        let mut requests = self.requests.lock();
        let request = requests
            .get_mut(&request_id.0)
            .ok_or_else(|| Error::Transport(format!("Unknown request {}", request_id)))?;

        if request.polls_remaining > 0 {
            request.polls_remaining -= 1;
            return Ok(RequestStatus::Pending);
        }
        if request.reply == MockReply::Hang {
            return Ok(RequestStatus::Pending);
        }

        // Final status: the request is forgotten once reported
        let request = requests
            .remove(&request_id.0)
            .ok_or_else(|| Error::Transport(format!("Unknown request {}", request_id)))?;
        Ok(match request.reply {
            MockReply::Data(xml) => RequestStatus::Completed(Some(xml)),
            MockReply::Empty => RequestStatus::Completed(None),
            MockReply::Failed(msg) => RequestStatus::Failed(Some(msg)),
            MockReply::Hang => RequestStatus::Pending,
        })
    }

    fn name(&self) -> &str {
        "mock"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_pending_then_completed() {
        let mock = MockBridgeBackend::new(|_| MockReply::Data("<ENVELOPE/>".into()))
            .with_pending_polls(2);

        let CreatedRequest::Queued(id) = mock.create_request("ABCD", "<X/>").await.unwrap() else {
            panic!("expected queued request");
        };
        assert_eq!(mock.get_request_status(&id).await.unwrap(), RequestStatus::Pending);
        assert_eq!(mock.get_request_status(&id).await.unwrap(), RequestStatus::Pending);
        assert_eq!(
            mock.get_request_status(&id).await.unwrap(),
            RequestStatus::Completed(Some("<ENVELOPE/>".into()))
        );
        assert_eq!(mock.status_calls(), 3);
        assert_eq!(mock.payloads(), vec!["<X/>".to_string()]);
        assert_eq!(mock.pending_requests(), 0);
    }

    #[tokio::test]
    async fn test_resolved_requests_are_forgotten() {
        let mock = MockBridgeBackend::new(|xml| match xml {
            "<FAIL/>" => MockReply::Failed("bridge error".into()),
            "<HANG/>" => MockReply::Hang,
            _ => MockReply::Empty,
        });

        let mut ids = Vec::new();
        for payload in ["<FAIL/>", "<HANG/>", "<EMPTY/>"] {
            let CreatedRequest::Queued(id) = mock.create_request("ABCD", payload).await.unwrap()
            else {
                panic!("expected queued request");
            };
            ids.push(id);
        }
        assert_eq!(mock.pending_requests(), 3);

        assert_eq!(
            mock.get_request_status(&ids[0]).await.unwrap(),
            RequestStatus::Failed(Some("bridge error".into()))
        );
        assert_eq!(mock.get_request_status(&ids[1]).await.unwrap(), RequestStatus::Pending);
        assert_eq!(
            mock.get_request_status(&ids[2]).await.unwrap(),
            RequestStatus::Completed(None)
        );
        assert_eq!(mock.pending_requests(), 1);
        assert!(mock.get_request_status(&ids[0]).await.is_err());
    }

    #[tokio::test]
    async fn test_legacy_mode() {
        let mock = MockBridgeBackend::new(|_| MockReply::Data("<ENVELOPE/>".into())).legacy();
        assert_eq!(
            mock.create_request("ABCD", "<X/>").await.unwrap(),
            CreatedRequest::Immediate(Some("<ENVELOPE/>".into()))
        );
    }

    #[tokio::test]
    async fn test_liveness_controls() {
        let mock = MockBridgeBackend::new(|_| MockReply::Empty);
        assert!(mock.check_session("ABCD").await.unwrap());
        mock.set_alive(false);
        assert!(!mock.check_session("ABCD").await.unwrap());
        mock.set_probe_error(true);
        assert!(mock.check_session("ABCD").await.is_err());
        assert_eq!(mock.check_calls(), 3);
    }

    #[tokio::test]
    async fn test_unknown_request_id() {
        let mock = MockBridgeBackend::new(|_| MockReply::Empty);
        assert!(mock.get_request_status(&"missing".into()).await.is_err());
    }
}
