//! Outbound send providers and ordered failover.
//!
//! Providers are a uniform capability behind [`SendProvider`]; the
//! [`FailoverSender`] walks the configured list in priority order and hides
//! provider-specific failure modes behind a single [`SendOutcome`].

pub mod http;
pub mod legacy;
pub mod smtp;

pub use http::HttpApiProvider;
#[allow(deprecated)]
pub use legacy::SingleProviderSender;
pub use smtp::SmtpProvider;

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tracing::{info, warn};
use uuid::Uuid;

use crate::error::SendError;

/// One message ready for delivery.
#[derive(Debug, Clone)]
pub struct OutboundMessage {
    pub id: Uuid,
    pub recipient: String,
    pub subject: String,
    pub body: String,
}

/// A single outbound provider.
#[async_trait]
pub trait SendProvider: Send + Sync {
    /// Stable name, recorded as `provider_used` on success.
    fn name(&self) -> &str;

    /// Attempt delivery of one message.
    async fn attempt_send(&self, message: &OutboundMessage) -> Result<(), SendError>;
}

/// Aggregate outcome of a failover send.
#[derive(Debug, Clone)]
pub enum SendOutcome {
    /// Delivered; `provider` is the one that succeeded.
    Sent { provider: String },
    /// The recipient address itself was rejected — terminal for the message,
    /// no further provider attempted.
    HardBounce { provider: String, detail: String },
    /// Every provider failed without a hard bounce; transient at the
    /// message level. Carries per-provider error detail.
    Exhausted { attempts: Vec<(String, String)> },
}

/// Ordered-fallback sender over an immutable provider list.
///
/// Provider attempts for one message are strictly sequential — failover is
/// ordered, not raced. Each attempt is bounded by `send_timeout`; a timeout
/// counts as a transient failure.
pub struct FailoverSender {
    providers: Vec<Arc<dyn SendProvider>>,
    send_timeout: Duration,
}

impl FailoverSender {
    pub fn new(providers: Vec<Arc<dyn SendProvider>>, send_timeout: Duration) -> Self {
        Self {
            providers,
            send_timeout,
        }
    }

    /// Number of configured providers.
    #[must_use]
    pub fn provider_count(&self) -> usize {
        self.providers.len()
    }

    /// Try each provider in priority order, stopping at first success or
    /// at a failure intrinsic to the recipient.
    pub async fn send(&self, message: &OutboundMessage) -> SendOutcome {
        let mut attempts = Vec::new();

        for provider in &self.providers {
            let name = provider.name().to_string();
            let attempt = tokio::time::timeout(self.send_timeout, provider.attempt_send(message));

            match attempt.await {
                Ok(Ok(())) => {
                    info!(
                        message = %message.id,
                        recipient = %message.recipient,
                        provider = %name,
                        "Message delivered"
                    );
                    return SendOutcome::Sent { provider: name };
                }
                Ok(Err(SendError::RecipientRejected { reason, .. })) => {
                    warn!(
                        message = %message.id,
                        recipient = %message.recipient,
                        provider = %name,
                        reason = %reason,
                        "Hard bounce — recipient rejected, failover stopped"
                    );
                    // Trying another provider cannot fix an invalid recipient.
                    return SendOutcome::HardBounce {
                        provider: name,
                        detail: reason,
                    };
                }
                Ok(Err(err)) => {
                    warn!(
                        message = %message.id,
                        provider = %name,
                        error = %err,
                        "Provider attempt failed, trying next"
                    );
                    attempts.push((name, err.to_string()));
                }
                Err(_) => {
                    let err = SendError::Timeout {
                        provider: name.clone(),
                        timeout: self.send_timeout,
                    };
                    warn!(message = %message.id, provider = %name, error = %err, "Provider attempt timed out");
                    attempts.push((name, err.to_string()));
                }
            }
        }

        SendOutcome::Exhausted { attempts }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Scripted provider for failover tests.
    struct ScriptedProvider {
        name: &'static str,
        behavior: Behavior,
        calls: AtomicUsize,
    }

    enum Behavior {
        Succeed,
        Transient,
        RejectRecipient,
        RejectProvider,
        Hang,
    }

    impl ScriptedProvider {
        fn new(name: &'static str, behavior: Behavior) -> Arc<Self> {
            Arc::new(Self {
                name,
                behavior,
                calls: AtomicUsize::new(0),
            })
        }

        fn call_count(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl SendProvider for ScriptedProvider {
        fn name(&self) -> &str {
            self.name
        }

        async fn attempt_send(&self, _message: &OutboundMessage) -> Result<(), SendError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            match self.behavior {
                Behavior::Succeed => Ok(()),
                Behavior::Transient => Err(SendError::Transient {
                    provider: self.name.into(),
                    reason: "connection refused".into(),
                }),
                Behavior::RejectRecipient => Err(SendError::RecipientRejected {
                    provider: self.name.into(),
                    reason: "550 mailbox unavailable".into(),
                }),
                Behavior::RejectProvider => Err(SendError::ProviderRejected {
                    provider: self.name.into(),
                    reason: "535 authentication failed".into(),
                }),
                Behavior::Hang => {
                    tokio::time::sleep(Duration::from_secs(3600)).await;
                    Ok(())
                }
            }
        }
    }

    fn message() -> OutboundMessage {
        OutboundMessage {
            id: Uuid::new_v4(),
            recipient: "x@y.com".into(),
            subject: "Hello".into(),
            body: "Body".into(),
        }
    }

    fn sender(providers: Vec<Arc<dyn SendProvider>>) -> FailoverSender {
        FailoverSender::new(providers, Duration::from_millis(100))
    }

    #[tokio::test]
    async fn first_success_stops_failover() {
        let a = ScriptedProvider::new("a", Behavior::Transient);
        let b = ScriptedProvider::new("b", Behavior::Succeed);
        let c = ScriptedProvider::new("c", Behavior::Succeed);

        let outcome = sender(vec![a.clone(), b.clone(), c.clone()])
            .send(&message())
            .await;

        match outcome {
            SendOutcome::Sent { provider } => assert_eq!(provider, "b"),
            other => panic!("expected Sent, got {other:?}"),
        }
        assert_eq!(a.call_count(), 1);
        assert_eq!(b.call_count(), 1);
        assert_eq!(c.call_count(), 0, "c must never be attempted");
    }

    #[tokio::test]
    async fn recipient_rejection_short_circuits() {
        let a = ScriptedProvider::new("a", Behavior::RejectRecipient);
        let b = ScriptedProvider::new("b", Behavior::Succeed);

        let outcome = sender(vec![a.clone(), b.clone()]).send(&message()).await;

        match outcome {
            SendOutcome::HardBounce { provider, detail } => {
                assert_eq!(provider, "a");
                assert!(detail.contains("550"));
            }
            other => panic!("expected HardBounce, got {other:?}"),
        }
        assert_eq!(b.call_count(), 0, "hard bounce must not continue failover");
    }

    #[tokio::test]
    async fn provider_misconfiguration_continues_to_next() {
        let a = ScriptedProvider::new("a", Behavior::RejectProvider);
        let b = ScriptedProvider::new("b", Behavior::Succeed);

        let outcome = sender(vec![a.clone(), b.clone()]).send(&message()).await;

        match outcome {
            SendOutcome::Sent { provider } => assert_eq!(provider, "b"),
            other => panic!("expected Sent, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn exhaustion_reports_every_attempt() {
        let a = ScriptedProvider::new("a", Behavior::Transient);
        let b = ScriptedProvider::new("b", Behavior::Transient);

        let outcome = sender(vec![a.clone(), b.clone()]).send(&message()).await;

        match outcome {
            SendOutcome::Exhausted { attempts } => {
                assert_eq!(attempts.len(), 2);
                assert_eq!(attempts[0].0, "a");
                assert_eq!(attempts[1].0, "b");
            }
            other => panic!("expected Exhausted, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn timeout_counts_as_transient_attempt() {
        let a = ScriptedProvider::new("a", Behavior::Hang);
        let b = ScriptedProvider::new("b", Behavior::Succeed);

        let outcome = sender(vec![a.clone(), b.clone()]).send(&message()).await;

        match outcome {
            SendOutcome::Sent { provider } => assert_eq!(provider, "b"),
            other => panic!("expected Sent after timeout failover, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn no_providers_exhausts_immediately() {
        let outcome = sender(vec![]).send(&message()).await;
        match outcome {
            SendOutcome::Exhausted { attempts } => assert!(attempts.is_empty()),
            other => panic!("expected Exhausted, got {other:?}"),
        }
    }
}
