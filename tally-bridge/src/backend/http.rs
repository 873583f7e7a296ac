//! HTTP backend for the bridge relay's JSON edge endpoint

use async_trait::async_trait;
use reqwest::Client;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::json;
use std::time::Duration;
use tracing::{debug, warn};

use super::{BridgeBackend, CreatedRequest, RequestId, RequestStatus};
use crate::config::EndpointConfig;
use crate::{Error, Result};

#[derive(Debug, Deserialize)]
struct CheckSessionResponse {
    #[serde(default)]
    connected: bool,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SendRequestResponse {
    request_id: Option<String>,
    data: Option<String>,
    error: Option<String>,
}

#[derive(Debug, Deserialize)]
struct RequestStatusResponse {
    status: Option<String>,
    data: Option<String>,
    error: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ErrorBody {
    error: String,
}

/// Bridge backend that talks to the relay over HTTPS.
///
/// Every call is a `POST` of `{"action": ...}` to a single endpoint.
pub struct HttpBridgeBackend {
    config: EndpointConfig,
    client: Client,
}

impl HttpBridgeBackend {
    /// Create new HTTP backend
    pub fn new(config: EndpointConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_seconds))
            .build()
            .map_err(|e| Error::Config(format!("HTTP client: {}", e)))?;

        Ok(Self { config, client })
    }

    /// Endpoint URL
    pub fn endpoint(&self) -> &str {
        &self.config.url
    }

    async fn invoke<T: DeserializeOwned>(&self, body: serde_json::Value) -> Result<T> {
        let mut request = self.client.post(&self.config.url).json(&body);
        if let Some(key) = &self.config.api_key {
            request = request.bearer_auth(key).header("apikey", key);
        }

        let response = request
            .send()
            .await
            .map_err(|e| Error::Transport(format!("Bridge endpoint unreachable: {}", e)))?;

        let status = response.status();
        let text = response.text().await?;

        if !status.is_success() {
            let message = serde_json::from_str::<ErrorBody>(&text)
                .map(|b| b.error)
                .unwrap_or(text);
            return Err(Error::Transport(format!(
                "Bridge endpoint returned {}: {}",
                status.as_u16(),
                message
            )));
        }

        Ok(serde_json::from_str(&text)?)
    }
}

#[async_trait]
impl BridgeBackend for HttpBridgeBackend {
    async fn check_session(&self, session_code: &str) -> Result<bool> {
        let response: CheckSessionResponse = self
            .invoke(json!({ "action": "check-session", "sessionCode": session_code }))
            .await?;
        Ok(response.connected)
    }

    async fn create_request(
        &self,
        session_code: &str,
        xml_request: &str,
    ) -> Result<CreatedRequest> {
        let response: SendRequestResponse = self
            .invoke(json!({
                "action": "send-request",
                "sessionCode": session_code,
                "xmlRequest": xml_request,
            }))
            .await?;

        if let Some(error) = response.error {
            return Err(Error::Transport(error));
        }
        if let Some(id) = response.request_id {
            debug!(request_id = %id, "Request queued");
            return Ok(CreatedRequest::Queued(RequestId(id)));
        }
        if response.data.is_some() {
            return Ok(CreatedRequest::Immediate(response.data));
        }

        Err(Error::Transport(
            "Failed to create request: response carried neither requestId nor data".to_string(),
        ))
    }

    async fn get_request_status(&self, request_id: &RequestId) -> Result<RequestStatus> {
        let response: RequestStatusResponse = self
            .invoke(json!({ "action": "get-request-status", "requestId": request_id.0 }))
            .await?;

        match response.status.as_deref() {
            Some("completed") => Ok(RequestStatus::Completed(response.data)),
            Some("failed") => Ok(RequestStatus::Failed(response.error)),
            Some("pending") | Some("processing") => Ok(RequestStatus::Pending),
            None => match response.error {
                Some(error) => Err(Error::Transport(error)),
                None => Ok(RequestStatus::Pending),
            },
            Some(other) => {
                warn!(request_id = %request_id, status = other, "Unknown request status");
                Ok(RequestStatus::Pending)
            }
        }
    }

    fn name(&self) -> &str {
        "http"
    }
}
