//! Push-channel gateway — HTTP delivery to the external push provider.
//!
//! Uses `reqwest` for transport. The gateway is strictly best-effort from
//! the pipeline's point of view; errors here are classified so the caller
//! can log something useful, never so it can fail the notification.

use std::time::Duration;

use async_trait::async_trait;
use secrecy::{ExposeSecret, SecretString};
use serde::Serialize;
use tracing::{info, warn};

/// Request timeout for a single push delivery.
const PUSH_TIMEOUT: Duration = Duration::from_secs(30);

/// Push delivery failures, classified from the provider's response.
#[derive(Debug, thiserror::Error)]
pub enum PushError {
    /// The provider rejected our credentials.
    #[error("push auth rejected: {reason}")]
    Unauthorized {
        /// Provider's reason string, when it gave one.
        reason: String,
    },
    /// The provider throttled us.
    #[error("push rate limited")]
    RateLimited,
    /// The device token is malformed or no longer registered.
    #[error("push token rejected: {reason}")]
    BadToken {
        /// Provider's reason string.
        reason: String,
    },
    /// Any other non-success response.
    #[error("push gateway returned {status}: {body}")]
    Gateway {
        /// HTTP status code.
        status: u16,
        /// Response body, as returned.
        body: String,
    },
    /// The request never completed.
    #[error("push transport error: {reason}")]
    Transport {
        /// Error description.
        reason: String,
    },
    /// Failed to build the HTTP client.
    #[error("failed to build push client: {reason}")]
    ClientBuild {
        /// Error description.
        reason: String,
    },
}

impl PushError {
    fn from_status(status: u16, body: String) -> Self {
        match status {
            401 | 403 => Self::Unauthorized { reason: body },
            429 => Self::RateLimited,
            400 | 404 | 410 => Self::BadToken { reason: body },
            _ => Self::Gateway { status, body },
        }
    }
}

/// One push request as the provider sees it.
#[derive(Debug, Serialize)]
pub struct PushMessage<'a> {
    pub token: &'a str,
    pub title: &'a str,
    pub body: &'a str,
    pub data: &'a serde_json::Value,
}

/// Seam between the fan-out pipeline and the push provider. The HTTP
/// gateway below is the production implementation; tests substitute
/// recording or failing doubles.
#[async_trait]
pub trait PushGateway: Send + Sync {
    /// Deliver one push. Returns the provider's delivery id when it
    /// reports one.
    async fn send(&self, message: PushMessage<'_>) -> Result<Option<String>, PushError>;
}

/// HTTP push gateway: POSTs JSON to the provider endpoint with a bearer
/// API key.
pub struct HttpPushGateway {
    endpoint: String,
    api_key: SecretString,
    client: reqwest::Client,
}

impl std::fmt::Debug for HttpPushGateway {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpPushGateway")
            .field("endpoint", &self.endpoint)
            .finish_non_exhaustive()
    }
}

impl HttpPushGateway {
    pub fn new(endpoint: impl Into<String>, api_key: SecretString) -> Result<Self, PushError> {
        let client = reqwest::Client::builder()
            .timeout(PUSH_TIMEOUT)
            .build()
            .map_err(|e| PushError::ClientBuild {
                reason: e.to_string(),
            })?;
        let endpoint = endpoint.into();

        info!(endpoint = %endpoint, "push gateway initialized");
        Ok(Self {
            endpoint,
            api_key,
            client,
        })
    }
}

#[async_trait]
impl PushGateway for HttpPushGateway {
    async fn send(&self, message: PushMessage<'_>) -> Result<Option<String>, PushError> {
        let response = self
            .client
            .post(&self.endpoint)
            .bearer_auth(self.api_key.expose_secret())
            .json(&message)
            .send()
            .await
            .map_err(|e| PushError::Transport {
                reason: e.to_string(),
            })?;

        let status = response.status().as_u16();
        if response.status().is_success() {
            let delivery_id = response
                .headers()
                .get("x-delivery-id")
                .and_then(|v| v.to_str().ok())
                .map(String::from);
            info!(status, delivery_id = ?delivery_id, "push delivered");
            return Ok(delivery_id);
        }

        let body = response.text().await.unwrap_or_default();
        warn!(status, body = %body, "push rejected");
        Err(PushError::from_status(status, body))
    }
}
