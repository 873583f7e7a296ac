//! Error types for the bridge client

use thiserror::Error;

/// Result type for bridge operations
pub type Result<T> = std::result::Result<T, Error>;

/// Bridge client errors
#[derive(Error, Debug)]
pub enum Error {
    /// Malformed input rejected before any I/O
    #[error("Validation error: {0}")]
    Validation(String),

    /// Data operation attempted without an active session
    #[error("Not connected: connect to the Tally bridge first")]
    NotConnected,

    /// Queue reported a failure or returned no data
    #[error("Bridge transport error: {0}")]
    Transport(String),

    /// Polling ceiling exceeded
    #[error("Timeout after {seconds}s: {operation}")]
    Timeout {
        /// Ceiling that elapsed
        seconds: u64,
        /// Operation
        operation: String,
    },

    /// XML unparseable even after sanitization
    #[error("XML parse error: {0}")]
    Parse(String),

    /// Operation cancelled by session teardown
    #[error("Operation cancelled")]
    Cancelled,

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Persisted session store error
    #[error("Session store error: {0}")]
    Store(String),

    /// XML writer error
    #[error("XML serialization error: {0}")]
    XmlWrite(String),

    /// HTTP client error
    #[error("HTTP client error: {0}")]
    Http(#[from] reqwest::Error),

    /// JSON error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Short label used for metrics and event payloads
    pub fn kind(&self) -> &'static str {
        match self {
            Error::Validation(_) => "validation",
            Error::NotConnected => "not_connected",
            Error::Transport(_) | Error::Http(_) => "transport",
            Error::Timeout { .. } => "timeout",
            Error::Parse(_) => "parse",
            Error::Cancelled => "cancelled",
            Error::Config(_) => "config",
            Error::Store(_) | Error::Io(_) => "store",
            Error::XmlWrite(_) => "xml_write",
            Error::Json(_) => "json",
        }
    }
}

impl From<quick_xml::Error> for Error {
    fn from(err: quick_xml::Error) -> Self {
        Error::Parse(err.to_string())
    }
}
