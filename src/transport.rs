//! HTTP transport seam for the registration client.
//!
//! The reconciliation engine never talks to `reqwest` directly; it hands a
//! [`RequestSpec`] to a [`Transport`] and gets back either an HTTP status
//! plus body or a [`TransportError`]. That keeps the state machine
//! deterministic under test (in-memory fakes, wiremock) and keeps TLS/DNS
//! concerns out of the core.

use async_trait::async_trait;
use thiserror::Error;

use crate::config::RuntimeConfig;
use crate::constants;
use crate::error::Result;

/// The two logical operations the registration API supports.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operation {
    /// Inform the service of this device's token and attributes (HTTP PUT).
    Register,
    /// Remove this device's registration (HTTP DELETE).
    Unregister,
}

/// A fully built registration request, derived from a settings snapshot.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestSpec {
    /// Register or unregister.
    pub operation: Operation,
    /// Hex-encoded device token; the endpoint path key.
    pub token_hex: String,
    /// JSON body for register requests; `None` for unregister.
    pub body: Option<serde_json::Value>,
}

/// Response from the registration service.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransportResponse {
    /// HTTP status code.
    pub status: u16,
    /// Response body, possibly empty.
    pub body: String,
}

/// A request that never produced an HTTP response: timeout, connection
/// refused, DNS failure. Always classified as retryable.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{0}")]
pub struct TransportError(pub String);

/// Asynchronous HTTP collaborator for registration requests.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Perform the request and return the service's answer.
    ///
    /// Implementations must map any non-HTTP failure (including timeouts)
    /// to [`TransportError`] and must not retry internally — retry is the
    /// registration client's job.
    async fn send(&self, spec: &RequestSpec)
        -> std::result::Result<TransportResponse, TransportError>;
}

/// `reqwest`-backed transport for the registration API.
#[derive(Debug, Clone)]
pub struct HttpTransport {
    client: reqwest::Client,
    server_url: String,
    app_key: String,
    app_secret: String,
}

impl HttpTransport {
    /// Build a transport from the runtime configuration.
    pub fn new(config: &RuntimeConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(constants::HTTP_REQUEST_TIMEOUT)
            .build()
            .map_err(|e| std::io::Error::other(e.to_string()))?;

        Ok(Self {
            client,
            server_url: config.server_url.trim_end_matches('/').to_string(),
            app_key: config.app_key.clone(),
            app_secret: config.app_secret.clone(),
        })
    }

    fn url(&self, token_hex: &str) -> String {
        format!("{}/api/device_tokens/{}", self.server_url, token_hex)
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn send(
        &self,
        spec: &RequestSpec,
    ) -> std::result::Result<TransportResponse, TransportError> {
        let url = self.url(&spec.token_hex);

        let request = match spec.operation {
            Operation::Register => {
                let mut request = self.client.put(&url);
                if let Some(ref body) = spec.body {
                    request = request.json(body);
                }
                request
            }
            Operation::Unregister => self.client.delete(&url),
        };

        let response = request
            .basic_auth(&self.app_key, Some(&self.app_secret))
            .send()
            .await
            .map_err(|e| TransportError(e.to_string()))?;

        let status = response.status().as_u16();
        let body = response.text().await.unwrap_or_default();
        log::debug!("registration request {:?} -> HTTP {}", spec.operation, status);

        Ok(TransportResponse { status, body })
    }
}
