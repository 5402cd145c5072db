//! SMTP provider — outbound via lettre over rustls.

use async_trait::async_trait;
use lettre::transport::smtp::authentication::Credentials;
use lettre::{Message, SmtpTransport, Transport};
use secrecy::ExposeSecret;

use crate::config::SmtpProviderConfig;
use crate::error::SendError;
use crate::sender::{OutboundMessage, SendProvider};

/// Outbound provider speaking SMTP.
pub struct SmtpProvider {
    config: SmtpProviderConfig,
}

impl SmtpProvider {
    pub fn new(config: SmtpProviderConfig) -> Self {
        Self { config }
    }
}

#[async_trait]
impl SendProvider for SmtpProvider {
    fn name(&self) -> &str {
        "smtp"
    }

    async fn attempt_send(&self, message: &OutboundMessage) -> Result<(), SendError> {
        // A from-address that won't parse is our misconfiguration; a
        // recipient that won't parse is a bad address, same as a 553.
        let from = self.config.from_address.parse().map_err(|e| {
            SendError::ProviderRejected {
                provider: "smtp".into(),
                reason: format!("Invalid from address: {e}"),
            }
        })?;
        let to = message
            .recipient
            .parse()
            .map_err(|e| SendError::RecipientRejected {
                provider: "smtp".into(),
                reason: format!("Invalid recipient address: {e}"),
            })?;

        let email = Message::builder()
            .from(from)
            .to(to)
            .subject(&message.subject)
            .body(message.body.clone())
            .map_err(|e| SendError::ProviderRejected {
                provider: "smtp".into(),
                reason: format!("Failed to build email: {e}"),
            })?;

        let config = self.config.clone();
        let result = tokio::task::spawn_blocking(move || {
            let creds = Credentials::new(
                config.username.clone(),
                config.password.expose_secret().to_string(),
            );

            let transport = SmtpTransport::relay(&config.host)
                .map_err(|e| SendError::Transient {
                    provider: "smtp".into(),
                    reason: format!("SMTP relay setup failed: {e}"),
                })?
                .port(config.port)
                .credentials(creds)
                .build();

            transport
                .send(&email)
                .map(|_| ())
                .map_err(|e| classify_smtp_error(&e))
        })
        .await
        .map_err(|e| SendError::Transient {
            provider: "smtp".into(),
            reason: format!("Send task panicked: {e}"),
        })?;

        result
    }
}

/// Classify a lettre SMTP error into the engine's failure taxonomy.
///
/// Permanent codes intrinsic to the recipient (550 mailbox unavailable,
/// 551 user not local, 553 mailbox name not allowed) are hard bounces.
/// Other permanent codes — auth failures in particular — are provider
/// problems the next provider may not share. Everything else is transient.
fn classify_smtp_error(error: &lettre::transport::smtp::Error) -> SendError {
    let reason = error.to_string();

    if error.is_permanent() {
        match extract_status_code(&reason) {
            Some(550 | 551 | 553) => SendError::RecipientRejected {
                provider: "smtp".into(),
                reason,
            },
            _ => SendError::ProviderRejected {
                provider: "smtp".into(),
                reason,
            },
        }
    } else {
        SendError::Transient {
            provider: "smtp".into(),
            reason,
        }
    }
}

/// Pull the first SMTP status code (4xx/5xx) out of an error message.
fn extract_status_code(message: &str) -> Option<u16> {
    let bytes = message.as_bytes();
    for window in bytes.windows(3) {
        if window.iter().all(u8::is_ascii_digit) {
            let code = (u16::from(window[0] - b'0') * 100)
                + (u16::from(window[1] - b'0') * 10)
                + u16::from(window[2] - b'0');
            if (400..600).contains(&code) {
                return Some(code);
            }
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extracts_code_from_error_text() {
        assert_eq!(
            extract_status_code("permanent error (550): mailbox unavailable"),
            Some(550)
        );
        assert_eq!(
            extract_status_code("transient error (421): service not available"),
            Some(421)
        );
        assert_eq!(extract_status_code("connection refused"), None);
    }

    #[test]
    fn ignores_digit_runs_outside_smtp_range() {
        assert_eq!(extract_status_code("retry in 120 seconds"), None);
        assert_eq!(extract_status_code("code 999 unknown"), None);
    }

    #[tokio::test]
    async fn unparseable_recipient_is_a_hard_bounce() {
        let provider = SmtpProvider::new(SmtpProviderConfig {
            host: "smtp.example.com".into(),
            port: 587,
            username: "sender".into(),
            password: secrecy::SecretString::from("secret"),
            from_address: "outreach@example.com".into(),
        });

        let message = OutboundMessage {
            id: uuid::Uuid::new_v4(),
            recipient: "not an address".into(),
            subject: "Hi".into(),
            body: "Body".into(),
        };

        let err = provider.attempt_send(&message).await.unwrap_err();
        assert!(err.is_hard_bounce());
    }

    #[tokio::test]
    async fn unparseable_from_address_is_provider_fault() {
        let provider = SmtpProvider::new(SmtpProviderConfig {
            host: "smtp.example.com".into(),
            port: 587,
            username: "sender".into(),
            password: secrecy::SecretString::from("secret"),
            from_address: "broken from".into(),
        });

        let message = OutboundMessage {
            id: uuid::Uuid::new_v4(),
            recipient: "lead@example.com".into(),
            subject: "Hi".into(),
            body: "Body".into(),
        };

        let err = provider.attempt_send(&message).await.unwrap_err();
        assert!(!err.is_hard_bounce());
        assert!(!err.is_transient());
    }
}
