//! Bridge queue backend interface

pub mod http;
pub mod mock;

pub use http::HttpBridgeBackend;
pub use mock::{MockBridgeBackend, MockReply};

use crate::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Identifier of a queued request
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RequestId(pub String);

impl fmt::Display for RequestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for RequestId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// Outcome of submitting a request to the queue
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CreatedRequest {
    /// Queued; resolve by polling
    Queued(RequestId),
    /// Legacy synchronous mode: result returned directly
    Immediate(Option<String>),
}

/// Status of a queued request
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RequestStatus {
    /// Not yet picked up or still running on the desktop side
    Pending,
    /// Finished with response data
    Completed(Option<String>),
    /// Finished with a remote error message
    Failed(Option<String>),
}

/// Command queue between this client and the desktop bridge
#[async_trait]
pub trait BridgeBackend: Send + Sync {
    /// Whether the desktop bridge for this session code is online
    async fn check_session(&self, session_code: &str) -> Result<bool>;

    /// Submit an XML request for the desktop bridge to forward to Tally
    async fn create_request(&self, session_code: &str, xml_request: &str)
        -> Result<CreatedRequest>;

    /// Current status of a queued request
    async fn get_request_status(&self, request_id: &RequestId) -> Result<RequestStatus>;

    /// Backend name
    fn name(&self) -> &str;
}
