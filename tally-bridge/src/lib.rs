//! # Tally Bridge Client
//!
//! Session-oriented client for extracting ledger and balance data from an
//! on-premise Tally instance through the desktop bridge relay:
//! - XML request/response protocol (TDL collection exports)
//! - Asynchronous command queue resolved by bounded polling
//! - Long-lived session with periodic liveness probes
//! - Month-wise balances with automatic per-month fallback
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────┐
//! │        BridgeClient (connect / fetch_* / state)     │
//! └────────────┬──────────────────────────┬─────────────┘
//!              │                          │
//!     ┌────────▼────────┐        ┌────────▼─────────┐
//!     │ SessionManager  │        │ MonthWiseFetcher │
//!     │ liveness probe  │        │ anomaly+fallback │
//!     └────────┬────────┘        └────────┬─────────┘
//!              │                          │
//! ┌────────────▼──────────────────────────▼─────────────┐
//! │    RequestTransport (create → poll → resolve)       │
//! └────────────┬────────────────────────────────────────┘
//!              │  BridgeBackend (HTTP queue / mock)
//! ┌────────────▼────────────────────────────────────────┐
//! │   query builders ──► Tally ──► sanitize ──► parser  │
//! └─────────────────────────────────────────────────────┘
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs, rust_2018_idioms, unused_qualifications)]

pub mod backend;
pub mod client;
pub mod config;
pub mod error;
pub mod metrics;
pub mod monthwise;
pub mod notify;
pub mod parser;
pub mod query;
pub mod sanitize;
pub mod session;
pub mod store;
pub mod transport;
pub mod types;

pub use backend::{BridgeBackend, CreatedRequest, RequestId, RequestStatus};
pub use client::BridgeClient;
pub use config::Config;
pub use error::{Error, Result};
pub use notify::{BridgeEvent, BridgeListener, Operation};
pub use session::SessionManager;
pub use store::{FileSessionStore, MemorySessionStore, PersistedSession, SessionStore};
pub use transport::{Delivery, RequestTransport};
pub use types::*;

/// Minimum accepted session code length
pub const MIN_SESSION_CODE_LEN: usize = 4;

/// Default status poll interval (milliseconds)
pub const DEFAULT_POLL_INTERVAL_MS: u64 = 1_000;

/// Default ceiling for a single queued request (seconds)
pub const DEFAULT_REQUEST_TIMEOUT_SECONDS: u64 = 600;

/// Default liveness probe interval (seconds)
pub const DEFAULT_LIVENESS_INTERVAL_SECONDS: u64 = 30;

/// Default timeout for one liveness probe (seconds)
pub const DEFAULT_PROBE_TIMEOUT_SECONDS: u64 = 10;

/// Default HTTP timeout for one bridge endpoint call (seconds)
pub const DEFAULT_HTTP_TIMEOUT_SECONDS: u64 = 30;
