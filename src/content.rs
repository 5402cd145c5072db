//! Content generation seam — the engine invokes it, never authors copy.
//!
//! What to say is an external capability: the worker hands over the task's
//! templating payload and gets back a subject and body, or a failure that
//! ends the task's cycle.

use std::time::Duration;

use async_trait::async_trait;
use secrecy::ExposeSecret;
use serde::Deserialize;

use crate::config::ContentServiceConfig;
use crate::error::ContentError;

/// Generated outreach copy for one message.
#[derive(Debug, Clone, Deserialize)]
pub struct GeneratedContent {
    pub subject: String,
    pub body: String,
}

/// External content-generation capability.
#[async_trait]
pub trait ContentGenerator: Send + Sync {
    /// Produce subject/body for the given templating payload.
    async fn generate(
        &self,
        payload: &serde_json::Value,
    ) -> Result<GeneratedContent, ContentError>;
}

/// HTTP-backed generator calling the platform's content service.
pub struct HttpContentGenerator {
    client: reqwest::Client,
    config: ContentServiceConfig,
    timeout: Duration,
}

impl HttpContentGenerator {
    /// Create a generator with the given per-request timeout.
    pub fn new(config: ContentServiceConfig, timeout: Duration) -> Result<Self, ContentError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| ContentError::RequestFailed {
                reason: format!("Failed to build HTTP client: {e}"),
            })?;
        Ok(Self {
            client,
            config,
            timeout,
        })
    }
}

#[async_trait]
impl ContentGenerator for HttpContentGenerator {
    async fn generate(
        &self,
        payload: &serde_json::Value,
    ) -> Result<GeneratedContent, ContentError> {
        let mut request = self.client.post(&self.config.endpoint).json(payload);
        if let Some(key) = &self.config.api_key {
            request = request.bearer_auth(key.expose_secret());
        }

        let response = request.send().await.map_err(|e| {
            if e.is_timeout() {
                ContentError::Timeout {
                    timeout: self.timeout,
                }
            } else {
                ContentError::RequestFailed {
                    reason: e.to_string(),
                }
            }
        })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ContentError::Rejected {
                reason: format!("{status}: {body}"),
            });
        }

        response
            .json::<GeneratedContent>()
            .await
            .map_err(|e| ContentError::InvalidResponse {
                reason: e.to_string(),
            })
    }
}
