//! Superseded single-provider sender, kept as a non-functional stub.
//!
//! All traffic routes through the failover sender. This type remains only
//! so stray callers fail loudly instead of silently sending without
//! failover or bounce handling.

use crate::error::SendError;
use crate::sender::OutboundMessage;

/// The retired direct sender. Every call fails.
#[deprecated(note = "route sends through FailoverSender")]
pub struct SingleProviderSender;

#[allow(deprecated)]
impl SingleProviderSender {
    pub async fn send(&self, _message: &OutboundMessage) -> Result<(), SendError> {
        Err(SendError::ProviderRejected {
            provider: "legacy".into(),
            reason: "single-provider sending is retired; use the failover sender".into(),
        })
    }
}

#[cfg(test)]
#[allow(deprecated)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn legacy_sender_always_fails() {
        let message = OutboundMessage {
            id: uuid::Uuid::new_v4(),
            recipient: "x@y.com".into(),
            subject: "Hi".into(),
            body: "Body".into(),
        };

        let err = SingleProviderSender.send(&message).await.unwrap_err();
        assert!(!err.is_transient());
        assert!(err.to_string().contains("retired"));
    }
}
