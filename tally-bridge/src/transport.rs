//! Request transport: submit to the queue, then poll until resolved
//!
//! One [`RequestTransport::send`] call owns one poll loop. Calls are
//! independent futures, so a slow export never delays a liveness probe or
//! another fetch.

use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::backend::{BridgeBackend, CreatedRequest, RequestId, RequestStatus};
use crate::config::TransportConfig;
use crate::metrics::{BRIDGE_POLLS_TOTAL, BRIDGE_REQUESTS_TOTAL, BRIDGE_REQUEST_DURATION};
use crate::{Error, Result};

const DEFAULT_FAILURE_MESSAGE: &str = "Tally request failed";
const NO_DATA_MESSAGE: &str = "No response from Tally";

/// Resolution of a request that was not an error
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Delivery {
    /// Raw XML returned by Tally
    Response(String),
    /// The owning session was torn down while waiting
    Cancelled,
}

/// State of a queued request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PendingState {
    /// Awaiting the desktop bridge
    Pending,
    /// Resolved with data
    Completed,
    /// Resolved with an error
    Failed,
}

/// A request in flight; lives for one `send` call
#[derive(Debug)]
pub struct PendingRequest {
    /// Queue-assigned id
    pub id: RequestId,
    /// Collection id of the payload (for logs and metrics)
    pub collection: String,
    /// Current state
    pub state: PendingState,
    /// Response once completed
    pub result: Option<String>,
    /// Error once failed
    pub error: Option<String>,
    /// Status polls issued
    pub polls: u32,
}

impl PendingRequest {
    fn new(id: RequestId, collection: String) -> Self {
        Self {
            id,
            collection,
            state: PendingState::Pending,
            result: None,
            error: None,
            polls: 0,
        }
    }

    fn apply(&mut self, status: RequestStatus) {
        self.polls += 1;
        match status {
            RequestStatus::Pending => {}
            RequestStatus::Completed(Some(data)) if !data.is_empty() => {
                self.state = PendingState::Completed;
                self.result = Some(data);
            }
            RequestStatus::Completed(_) => {
                self.state = PendingState::Failed;
                self.error = Some(NO_DATA_MESSAGE.to_string());
            }
            RequestStatus::Failed(message) => {
                self.state = PendingState::Failed;
                self.error = Some(
                    message
                        .filter(|m| !m.is_empty())
                        .unwrap_or_else(|| DEFAULT_FAILURE_MESSAGE.to_string()),
                );
            }
        }
    }
}

/// Extract the `<ID>` of a request envelope
fn collection_of(payload: &str) -> String {
    payload
        .split_once("<ID>")
        .and_then(|(_, rest)| rest.split_once("</ID>"))
        .map(|(id, _)| id.trim().to_string())
        .unwrap_or_else(|| "unknown".to_string())
}

/// Sends payloads through a [`BridgeBackend`] and resolves them by polling
#[derive(Clone)]
pub struct RequestTransport {
    backend: Arc<dyn BridgeBackend>,
    poll_interval: Duration,
    request_timeout: Duration,
}

impl RequestTransport {
    /// Create new transport
    pub fn new(backend: Arc<dyn BridgeBackend>, config: &TransportConfig) -> Self {
        Self {
            backend,
            poll_interval: config.poll_interval(),
            request_timeout: config.request_timeout(),
        }
    }

    /// Backend name
    pub fn backend_name(&self) -> &str {
        self.backend.name()
    }

    /// Ask the queue whether the desktop bridge for `session_code` is online
    pub async fn check_session(&self, session_code: &str) -> Result<bool> {
        self.backend.check_session(session_code).await
    }

    /// Send `payload` and wait for its response.
    ///
    /// Returns [`Delivery::Cancelled`] when `cancel` fires before resolution,
    /// [`Error::Transport`] when the queue reports failure or no data, and
    /// [`Error::Timeout`] once the request ceiling has elapsed.
    pub async fn send(
        &self,
        session_code: &str,
        payload: &str,
        cancel: &CancellationToken,
    ) -> Result<Delivery> {
        let collection = collection_of(payload);
        let started = Instant::now();

        let created = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Ok(Delivery::Cancelled),
            created = self.backend.create_request(session_code, payload) => created,
        };

        let result = match created {
            Ok(CreatedRequest::Immediate(Some(data))) if !data.is_empty() => {
                debug!(collection = %collection, "Request answered synchronously");
                Ok(Delivery::Response(data))
            }
            Ok(CreatedRequest::Immediate(_)) => Err(Error::Transport(NO_DATA_MESSAGE.to_string())),
            Ok(CreatedRequest::Queued(id)) => {
                let mut pending = PendingRequest::new(id, collection.clone());
                self.poll(&mut pending, started, cancel).await
            }
            Err(e) => Err(e),
        };

        let outcome = match &result {
            Ok(Delivery::Response(_)) => "completed",
            Ok(Delivery::Cancelled) => "cancelled",
            Err(e) => e.kind(),
        };
        BRIDGE_REQUESTS_TOTAL
            .with_label_values(&[collection.as_str(), outcome])
            .inc();
        BRIDGE_REQUEST_DURATION
            .with_label_values(&[collection.as_str()])
            .observe(started.elapsed().as_secs_f64());

        result
    }

    async fn poll(
        &self,
        pending: &mut PendingRequest,
        started: Instant,
        cancel: &CancellationToken,
    ) -> Result<Delivery> {
        debug!(request_id = %pending.id, collection = %pending.collection, "Polling request");

        while started.elapsed() < self.request_timeout {
            let status = tokio::select! {
                biased;
                _ = cancel.cancelled() => return Ok(Delivery::Cancelled),
                status = self.backend.get_request_status(&pending.id) => status?,
            };
            BRIDGE_POLLS_TOTAL.inc();
            pending.apply(status);

            match pending.state {
                PendingState::Completed => {
                    debug!(
                        request_id = %pending.id,
                        polls = pending.polls,
                        "Request completed"
                    );
                    return Ok(Delivery::Response(pending.result.take().unwrap_or_default()));
                }
                PendingState::Failed => {
                    let message = pending
                        .error
                        .take()
                        .unwrap_or_else(|| DEFAULT_FAILURE_MESSAGE.to_string());
                    warn!(request_id = %pending.id, error = %message, "Request failed");
                    return Err(Error::Transport(message));
                }
                PendingState::Pending => {}
            }

            tokio::select! {
                biased;
                _ = cancel.cancelled() => return Ok(Delivery::Cancelled),
                _ = tokio::time::sleep(self.poll_interval) => {}
            }
        }

        warn!(
            request_id = %pending.id,
            polls = pending.polls,
            "Request timed out waiting for Tally"
        );
        Err(Error::Timeout {
            seconds: self.request_timeout.as_secs(),
            operation: "Tally is taking too long to respond".to_string(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::{MockBridgeBackend, MockReply};

    fn transport(mock: MockBridgeBackend) -> (Arc<MockBridgeBackend>, RequestTransport) {
        let mock = Arc::new(mock);
        let transport = RequestTransport::new(mock.clone(), &TransportConfig::default());
        (mock, transport)
    }

    #[test]
    fn test_collection_of() {
        assert_eq!(collection_of("<HEADER><ID>LedgerCollection</ID></HEADER>"), "LedgerCollection");
        assert_eq!(collection_of("<ENVELOPE/>"), "unknown");
    }

    #[tokio::test(start_paused = true)]
    async fn test_resolves_after_pending_polls() {
        let (mock, transport) = transport(
            MockBridgeBackend::new(|_| MockReply::Data("<ENVELOPE/>".into())).with_pending_polls(3),
        );

        let delivery = transport
            .send("ABCD", "<ID>X</ID>", &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(delivery, Delivery::Response("<ENVELOPE/>".into()));
        assert_eq!(mock.status_calls(), 4);
    }

    #[tokio::test]
    async fn test_legacy_immediate_result() {
        let (mock, transport) =
            transport(MockBridgeBackend::new(|_| MockReply::Data("<ENVELOPE/>".into())).legacy());

        let delivery = transport
            .send("ABCD", "<ID>X</ID>", &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(delivery, Delivery::Response("<ENVELOPE/>".into()));
        assert_eq!(mock.status_calls(), 0);
    }

    #[tokio::test]
    async fn test_remote_failure_carries_message() {
        let (_, transport) =
            transport(MockBridgeBackend::new(|_| MockReply::Failed("Company not open".into())));

        let err = transport
            .send("ABCD", "<ID>X</ID>", &CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Transport(ref m) if m == "Company not open"));
    }

    #[tokio::test]
    async fn test_failure_without_message_uses_default() {
        let (_, transport) = transport(MockBridgeBackend::new(|_| MockReply::Failed(String::new())));

        let err = transport
            .send("ABCD", "<ID>X</ID>", &CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Transport(ref m) if m == "Tally request failed"));
    }

    #[tokio::test]
    async fn test_completed_without_data_is_transport_error() {
        let (_, transport) = transport(MockBridgeBackend::new(|_| MockReply::Empty));

        let err = transport
            .send("ABCD", "<ID>X</ID>", &CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Transport(_)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_times_out_after_ceiling() {
        let (mock, transport) = transport(MockBridgeBackend::new(|_| MockReply::Hang));

        let started = Instant::now();
        let err = transport
            .send("ABCD", "<ID>X</ID>", &CancellationToken::new())
            .await
            .unwrap_err();

        assert!(matches!(err, Error::Timeout { seconds: 600, .. }));
        assert!(started.elapsed() >= Duration::from_secs(600));
        assert!(mock.status_calls() >= 600);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancellation_stops_polling() {
        let (mock, transport) = transport(MockBridgeBackend::new(|_| MockReply::Hang));
        let cancel = CancellationToken::new();

        let canceller = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(5)).await;
            canceller.cancel();
        });

        let delivery = transport.send("ABCD", "<ID>X</ID>", &cancel).await.unwrap();
        assert_eq!(delivery, Delivery::Cancelled);

        let polls = mock.status_calls();
        assert!(polls <= 6);
        tokio::time::sleep(Duration::from_secs(30)).await;
        assert_eq!(mock.status_calls(), polls);
    }

    #[tokio::test]
    async fn test_cancelled_before_send() {
        let (mock, transport) = transport(MockBridgeBackend::new(|_| MockReply::Hang));
        let cancel = CancellationToken::new();
        cancel.cancel();

        let delivery = transport.send("ABCD", "<ID>X</ID>", &cancel).await.unwrap();
        assert_eq!(delivery, Delivery::Cancelled);
        assert_eq!(mock.create_calls(), 0);
    }
}
