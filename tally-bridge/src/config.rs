//! Configuration for the bridge client

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use crate::{
    DEFAULT_HTTP_TIMEOUT_SECONDS, DEFAULT_LIVENESS_INTERVAL_SECONDS, DEFAULT_POLL_INTERVAL_MS,
    DEFAULT_PROBE_TIMEOUT_SECONDS, DEFAULT_REQUEST_TIMEOUT_SECONDS, MIN_SESSION_CODE_LEN,
};

/// Bridge client configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Service name (log and metrics prefix)
    pub service_name: String,

    /// Relay endpoint
    pub endpoint: EndpointConfig,

    /// Request transport
    pub transport: TransportConfig,

    /// Session lifecycle
    pub session: SessionConfig,

    /// Month-wise anomaly detection
    pub anomaly: AnomalyConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            service_name: "tally-bridge".to_string(),
            endpoint: EndpointConfig::default(),
            transport: TransportConfig::default(),
            session: SessionConfig::default(),
            anomaly: AnomalyConfig::default(),
        }
    }
}

/// Relay endpoint configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EndpointConfig {
    /// Edge function URL
    pub url: String,

    /// API key sent as bearer token and `apikey` header
    pub api_key: Option<String>,

    /// Timeout for one HTTP call (seconds)
    pub timeout_seconds: u64,
}

impl Default for EndpointConfig {
    fn default() -> Self {
        Self {
            url: "http://localhost:54321/functions/v1/tally-bridge".to_string(),
            api_key: None,
            timeout_seconds: DEFAULT_HTTP_TIMEOUT_SECONDS,
        }
    }
}

/// Request transport configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TransportConfig {
    /// Status poll interval (milliseconds)
    pub poll_interval_ms: u64,

    /// Ceiling for one queued request (seconds)
    pub request_timeout_seconds: u64,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: DEFAULT_POLL_INTERVAL_MS,
            request_timeout_seconds: DEFAULT_REQUEST_TIMEOUT_SECONDS, // 10 minutes
        }
    }
}

impl TransportConfig {
    /// Poll interval as a duration
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    /// Request ceiling as a duration
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_seconds)
    }
}

/// Session lifecycle configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Minimum accepted session code length
    pub min_code_length: usize,

    /// Liveness probe interval (seconds)
    pub liveness_interval_seconds: u64,

    /// Timeout for one liveness probe (seconds)
    pub probe_timeout_seconds: u64,

    /// Directory holding the persisted session record
    pub state_dir: PathBuf,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            min_code_length: MIN_SESSION_CODE_LEN,
            liveness_interval_seconds: DEFAULT_LIVENESS_INTERVAL_SECONDS,
            probe_timeout_seconds: DEFAULT_PROBE_TIMEOUT_SECONDS,
            state_dir: PathBuf::from("./data/tally-bridge"),
        }
    }
}

impl SessionConfig {
    /// Liveness interval as a duration
    pub fn liveness_interval(&self) -> Duration {
        Duration::from_secs(self.liveness_interval_seconds)
    }

    /// Probe timeout as a duration
    pub fn probe_timeout(&self) -> Duration {
        Duration::from_secs(self.probe_timeout_seconds)
    }
}

/// Tuning for the constant-across-months check on bulk month-wise results
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AnomalyConfig {
    /// Maximum ledgers sampled
    pub sample_size: usize,

    /// Minimum sampled ledgers before the check applies
    pub min_sample: usize,

    /// Share of sampled ledgers that must be constant to flag the result
    pub constant_ratio: f64,
}

impl Default for AnomalyConfig {
    fn default() -> Self {
        Self {
            sample_size: 25,
            min_sample: 5,
            constant_ratio: 0.8,
        }
    }
}

impl Config {
    /// Load from file
    pub fn from_file(path: impl AsRef<std::path::Path>) -> crate::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Config = toml::from_str(&content)
            .map_err(|e| crate::Error::Config(format!("Failed to parse config: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    /// Load from environment variables (and `.env` when present)
    pub fn from_env() -> crate::Result<Self> {
        dotenvy::dotenv().ok();

        let mut config = Config::default();

        if let Ok(url) = std::env::var("TALLY_BRIDGE_URL") {
            config.endpoint.url = url;
        }

        if let Ok(key) = std::env::var("TALLY_BRIDGE_API_KEY") {
            config.endpoint.api_key = Some(key).filter(|k| !k.is_empty());
        }

        if let Some(secs) = env_parse("TALLY_BRIDGE_HTTP_TIMEOUT_SECS")? {
            config.endpoint.timeout_seconds = secs;
        }

        if let Some(ms) = env_parse("TALLY_BRIDGE_POLL_INTERVAL_MS")? {
            config.transport.poll_interval_ms = ms;
        }

        if let Some(secs) = env_parse("TALLY_BRIDGE_REQUEST_TIMEOUT_SECS")? {
            config.transport.request_timeout_seconds = secs;
        }

        if let Some(secs) = env_parse("TALLY_BRIDGE_LIVENESS_INTERVAL_SECS")? {
            config.session.liveness_interval_seconds = secs;
        }

        if let Some(secs) = env_parse("TALLY_BRIDGE_PROBE_TIMEOUT_SECS")? {
            config.session.probe_timeout_seconds = secs;
        }

        if let Ok(dir) = std::env::var("TALLY_BRIDGE_STATE_DIR") {
            config.session.state_dir = PathBuf::from(dir);
        }

        config.validate()?;
        Ok(config)
    }

    /// Reject settings that would stall or disable the client
    pub fn validate(&self) -> crate::Result<()> {
        if self.endpoint.url.trim().is_empty() {
            return Err(crate::Error::Config("endpoint.url is empty".to_string()));
        }
        if self.transport.poll_interval_ms == 0 {
            return Err(crate::Error::Config(
                "transport.poll_interval_ms must be positive".to_string(),
            ));
        }
        if self.transport.request_timeout_seconds == 0 {
            return Err(crate::Error::Config(
                "transport.request_timeout_seconds must be positive".to_string(),
            ));
        }
        if self.session.liveness_interval_seconds == 0 {
            return Err(crate::Error::Config(
                "session.liveness_interval_seconds must be positive".to_string(),
            ));
        }
        if self.session.probe_timeout_seconds == 0 {
            return Err(crate::Error::Config(
                "session.probe_timeout_seconds must be positive".to_string(),
            ));
        }
        if !(self.anomaly.constant_ratio > 0.0 && self.anomaly.constant_ratio <= 1.0) {
            return Err(crate::Error::Config(
                "anomaly.constant_ratio must be in (0, 1]".to_string(),
            ));
        }
        Ok(())
    }
}

fn env_parse<T: FromStr>(key: &str) -> crate::Result<Option<T>> {
    match std::env::var(key) {
        Ok(raw) => raw
            .trim()
            .parse()
            .map(Some)
            .map_err(|_| crate::Error::Config(format!("{} is not a valid number: {:?}", key, raw))),
        Err(_) => Ok(None),
    }
}
