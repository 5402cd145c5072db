//! Bounce tracker — single authority on recipient suppression and the
//! append-only ledger of delivery failures.

use std::sync::Arc;

use chrono::Utc;
use tracing::info;

use crate::config::SuppressionPolicy;
use crate::error::StoreError;
use crate::model::BounceRecord;
use crate::store::Store;

/// Owns bounce accounting and suppression decisions. Read on every send
/// path; written only when a provider reports a hard bounce.
pub struct BounceTracker {
    store: Arc<dyn Store>,
    policy: SuppressionPolicy,
}

impl BounceTracker {
    pub fn new(store: Arc<dyn Store>, policy: SuppressionPolicy) -> Self {
        Self { store, policy }
    }

    /// Whether the recipient should currently receive outbound messages.
    pub async fn is_suppressed(&self, recipient: &str) -> Result<bool, StoreError> {
        Ok(self
            .store
            .get_bounce(recipient)
            .await?
            .is_some_and(|record| record.is_suppressed_at(Utc::now())))
    }

    /// Record a bounce and apply the suppression policy.
    ///
    /// The count increment and metadata merge are a single atomic upsert in
    /// the store. The policy then escalates: a first bounce earns a
    /// temporary cooldown; once the count reaches the configured threshold
    /// with the previous bounce inside the rolling window, suppression
    /// becomes permanent. Escalation only ever tightens — a permanent
    /// record is returned as-is.
    pub async fn record_bounce(
        &self,
        recipient: &str,
        metadata: serde_json::Value,
    ) -> Result<BounceRecord, StoreError> {
        let now = Utc::now();
        let prior = self.store.get_bounce(recipient).await?;
        let record = self.store.record_bounce(recipient, &metadata, now).await?;

        if record.permanent {
            return Ok(record);
        }

        let repeat_within_window = prior
            .as_ref()
            .and_then(|p| p.last_bounce_at)
            .is_some_and(|previous| now - previous <= chrono_dur(self.policy.rolling_window));

        if record.bounce_count >= self.policy.permanent_after && repeat_within_window {
            self.store.apply_suppression(recipient, None, true).await?;
            info!(
                recipient = %recipient,
                bounces = record.bounce_count,
                "Recipient permanently suppressed"
            );
        } else {
            let until = now + chrono_dur(self.policy.cooldown);
            self.store
                .apply_suppression(recipient, Some(until), false)
                .await?;
            info!(
                recipient = %recipient,
                bounces = record.bounce_count,
                until = %until,
                "Recipient temporarily suppressed"
            );
        }

        self.store
            .get_bounce(recipient)
            .await?
            .ok_or_else(|| StoreError::NotFound {
                entity: "bounce record".into(),
                id: recipient.to_string(),
            })
    }
}

fn chrono_dur(d: std::time::Duration) -> chrono::Duration {
    chrono::Duration::from_std(d).unwrap_or_else(|_| chrono::Duration::days(3650))
}

#[cfg(test)]
mod tests {
    use super::*;

    use std::time::Duration;

    use crate::store::LibSqlStore;

    async fn tracker(policy: SuppressionPolicy) -> BounceTracker {
        let store: Arc<dyn Store> = Arc::new(LibSqlStore::new_memory().await.unwrap());
        BounceTracker::new(store, policy)
    }

    fn meta(code: &str) -> serde_json::Value {
        serde_json::json!({"provider": "smtp", "code": code})
    }

    #[tokio::test]
    async fn unknown_recipient_is_not_suppressed() {
        let tracker = tracker(SuppressionPolicy::default()).await;
        assert!(!tracker.is_suppressed("new@lead.com").await.unwrap());
    }

    #[tokio::test]
    async fn first_bounce_applies_temporary_cooldown() {
        let tracker = tracker(SuppressionPolicy::default()).await;

        let record = tracker
            .record_bounce("x@y.com", meta("550"))
            .await
            .unwrap();

        assert_eq!(record.bounce_count, 1);
        assert!(!record.permanent);
        assert!(record.suppressed_until.is_some());
        assert!(tracker.is_suppressed("x@y.com").await.unwrap());
    }

    #[tokio::test]
    async fn repeated_bounces_escalate_to_permanent() {
        let tracker = tracker(SuppressionPolicy {
            cooldown: Duration::from_secs(3600),
            permanent_after: 3,
            rolling_window: Duration::from_secs(7 * 24 * 3600),
        })
        .await;

        let first = tracker.record_bounce("x@y.com", meta("550")).await.unwrap();
        let second = tracker.record_bounce("x@y.com", meta("550")).await.unwrap();
        assert!(!first.permanent);
        assert!(!second.permanent);

        let third = tracker.record_bounce("x@y.com", meta("550")).await.unwrap();
        assert_eq!(third.bounce_count, 3);
        assert!(third.permanent);
        assert!(tracker.is_suppressed("x@y.com").await.unwrap());
    }

    #[tokio::test]
    async fn permanent_record_stays_permanent() {
        let tracker = tracker(SuppressionPolicy {
            cooldown: Duration::from_secs(3600),
            permanent_after: 1,
            rolling_window: Duration::from_secs(7 * 24 * 3600),
        })
        .await;

        // permanent_after = 1 can't fire on the first bounce (no prior
        // bounce inside the window), so force it with a second report.
        tracker.record_bounce("x@y.com", meta("550")).await.unwrap();
        let second = tracker.record_bounce("x@y.com", meta("550")).await.unwrap();
        assert!(second.permanent);

        // Further bounces keep it permanent and keep counting.
        let third = tracker.record_bounce("x@y.com", meta("421")).await.unwrap();
        assert!(third.permanent);
        assert_eq!(third.bounce_count, 3);
    }

    #[tokio::test]
    async fn metadata_accumulates_across_bounces() {
        let tracker = tracker(SuppressionPolicy::default()).await;

        tracker
            .record_bounce("x@y.com", serde_json::json!({"code": "550"}))
            .await
            .unwrap();
        let record = tracker
            .record_bounce("x@y.com", serde_json::json!({"classification": "hard_bounce"}))
            .await
            .unwrap();

        assert_eq!(record.metadata["code"], "550");
        assert_eq!(record.metadata["classification"], "hard_bounce");
    }

    #[tokio::test]
    async fn counts_are_tracked_per_recipient() {
        let tracker = tracker(SuppressionPolicy::default()).await;

        tracker.record_bounce("a@y.com", meta("550")).await.unwrap();
        tracker.record_bounce("a@y.com", meta("550")).await.unwrap();
        let other = tracker.record_bounce("b@y.com", meta("550")).await.unwrap();

        assert_eq!(other.bounce_count, 1);
    }
}
