//! Notifications emitted by the session manager and client

use async_trait::async_trait;
use serde::Serialize;
use std::fmt;
use tokio::sync::mpsc;
use tracing::{info, warn};

/// Client operation named in fetch notifications
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Operation {
    /// Trial balance fetch
    TrialBalance,
    /// Month-wise balances fetch
    MonthWise,
    /// GST registration audit
    GstAudit,
}

impl Operation {
    /// Metrics label
    pub fn as_str(self) -> &'static str {
        match self {
            Operation::TrialBalance => "trial_balance",
            Operation::MonthWise => "month_wise",
            Operation::GstAudit => "gst_audit",
        }
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Session and fetch events
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum BridgeEvent {
    /// Handshake succeeded
    Connected {
        /// Session code
        session_code: String,
        /// Company open in Tally
        company_name: String,
    },
    /// Handshake rejected or failed
    ConnectFailed {
        /// User-facing reason
        reason: String,
    },
    /// A connected session failed its liveness probe
    ConnectionLost {
        /// Session code
        session_code: String,
        /// User-facing reason
        reason: String,
    },
    /// A persisted session passed its restoration probe
    Restored {
        /// Session code
        session_code: String,
        /// Company from the persisted record
        company_name: String,
    },
    /// Explicit disconnect
    Disconnected,
    /// Fetch returned data
    FetchCompleted {
        /// Operation
        operation: Operation,
        /// Records returned
        records: usize,
    },
    /// Fetch failed; the caller received `None`
    FetchFailed {
        /// Operation
        operation: Operation,
        /// User-facing reason
        reason: String,
    },
}

/// Receiver of bridge events
#[async_trait]
pub trait BridgeListener: Send + Sync {
    /// Handle one event
    async fn on_event(&self, event: BridgeEvent);
}

/// Logs every event through `tracing`
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingListener;

#[async_trait]
impl BridgeListener for TracingListener {
    async fn on_event(&self, event: BridgeEvent) {
        match &event {
            BridgeEvent::Connected {
                session_code,
                company_name,
            } => info!(%session_code, %company_name, "Connected to Tally"),
            BridgeEvent::Restored {
                session_code,
                company_name,
            } => info!(%session_code, %company_name, "Tally session restored"),
            BridgeEvent::Disconnected => info!("Disconnected from Tally"),
            BridgeEvent::FetchCompleted { operation, records } => {
                info!(%operation, records, "Fetch completed")
            }
            BridgeEvent::ConnectFailed { reason } => warn!(%reason, "Connection failed"),
            BridgeEvent::ConnectionLost {
                session_code,
                reason,
            } => warn!(%session_code, %reason, "Connection lost"),
            BridgeEvent::FetchFailed { operation, reason } => {
                warn!(%operation, %reason, "Fetch failed")
            }
        }
    }
}

/// Forwards events into an unbounded channel
#[derive(Debug, Clone)]
pub struct ChannelListener {
    tx: mpsc::UnboundedSender<BridgeEvent>,
}

impl ChannelListener {
    /// Listener plus the receiving end
    pub fn new() -> (Self, mpsc::UnboundedReceiver<BridgeEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }
}

#[async_trait]
impl BridgeListener for ChannelListener {
    async fn on_event(&self, event: BridgeEvent) {
        // Receiver dropped: nobody is listening
        let _ = self.tx.send(event);
    }
}
