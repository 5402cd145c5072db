//! HTTP send-API provider — outbound via a JSON delivery API.

use async_trait::async_trait;
use secrecy::ExposeSecret;
use serde::Serialize;

use crate::config::HttpProviderConfig;
use crate::error::SendError;
use crate::sender::{OutboundMessage, SendProvider};

/// Request body for the delivery API.
#[derive(Debug, Serialize)]
struct SendRequest<'a> {
    from: &'a str,
    to: &'a str,
    subject: &'a str,
    body: &'a str,
}

/// Outbound provider speaking a JSON send API.
pub struct HttpApiProvider {
    client: reqwest::Client,
    config: HttpProviderConfig,
}

impl HttpApiProvider {
    pub fn new(config: HttpProviderConfig) -> Self {
        Self {
            client: reqwest::Client::new(),
            config,
        }
    }
}

#[async_trait]
impl SendProvider for HttpApiProvider {
    fn name(&self) -> &str {
        "http"
    }

    async fn attempt_send(&self, message: &OutboundMessage) -> Result<(), SendError> {
        let request = SendRequest {
            from: &self.config.from_address,
            to: &message.recipient,
            subject: &message.subject,
            body: &message.body,
        };

        let response = self
            .client
            .post(&self.config.endpoint)
            .bearer_auth(self.config.api_key.expose_secret())
            .json(&request)
            .send()
            .await
            .map_err(|e| SendError::Transient {
                provider: "http".into(),
                reason: format!("Request failed: {e}"),
            })?;

        let status = response.status().as_u16();
        if (200..300).contains(&status) {
            return Ok(());
        }

        let body = response.text().await.unwrap_or_default();
        Err(classify_response(status, &body))
    }
}

/// Classify a non-2xx API response into the engine's failure taxonomy.
///
/// 401/403 are our credentials; 429 and 5xx are the provider's problem for
/// now; a 4xx complaining about the recipient is a hard bounce.
fn classify_response(status: u16, body: &str) -> SendError {
    let reason = format!("{status}: {body}");

    match status {
        401 | 403 => SendError::ProviderRejected {
            provider: "http".into(),
            reason,
        },
        429 => SendError::Transient {
            provider: "http".into(),
            reason,
        },
        400..=499 => {
            let lower = body.to_lowercase();
            if lower.contains("recipient") || lower.contains("address") || lower.contains("mailbox")
            {
                SendError::RecipientRejected {
                    provider: "http".into(),
                    reason,
                }
            } else {
                SendError::ProviderRejected {
                    provider: "http".into(),
                    reason,
                }
            }
        }
        _ => SendError::Transient {
            provider: "http".into(),
            reason,
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn auth_failures_are_provider_faults() {
        assert!(!classify_response(401, "unauthorized").is_hard_bounce());
        assert!(!classify_response(401, "unauthorized").is_transient());
        assert!(!classify_response(403, "forbidden").is_transient());
    }

    #[test]
    fn rate_limit_is_transient() {
        assert!(classify_response(429, "slow down").is_transient());
    }

    #[test]
    fn server_errors_are_transient() {
        assert!(classify_response(500, "oops").is_transient());
        assert!(classify_response(503, "maintenance").is_transient());
    }

    #[test]
    fn invalid_recipient_is_a_hard_bounce() {
        let err = classify_response(400, r#"{"error": "invalid recipient address"}"#);
        assert!(err.is_hard_bounce());

        let err = classify_response(422, "mailbox does not exist");
        assert!(err.is_hard_bounce());
    }

    #[test]
    fn other_client_errors_are_provider_faults() {
        let err = classify_response(400, r#"{"error": "template field missing"}"#);
        assert!(!err.is_hard_bounce());
        assert!(!err.is_transient());
    }
}
