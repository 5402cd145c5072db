//! Persistent data model — follow-up tasks, email messages, bounce records.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Lifecycle status of a follow-up task.
///
/// Transitions are monotonic except `Processing → Pending` on a transient
/// send failure (retry). `Sent` and `Cancelled` never transition again.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Pending,
    Processing,
    Sent,
    Failed,
    Cancelled,
}

impl TaskStatus {
    /// True if the task will never transition again.
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Sent | Self::Failed | Self::Cancelled)
    }
}

/// A scheduled follow-up intent, created by a campaign step and mutated
/// exclusively by the queue worker. Rows are never deleted.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FollowUpTask {
    /// Unique ID.
    pub id: Uuid,
    /// Lead this follow-up targets.
    pub lead_id: Uuid,
    /// Campaign step that scheduled it.
    pub campaign_id: Uuid,
    /// Due time. A task is eligible whenever `scheduled_at <= now`,
    /// however far in the past.
    pub scheduled_at: DateTime<Utc>,
    /// Lifecycle status.
    pub status: TaskStatus,
    /// Number of transient-failure retries consumed so far.
    pub attempt_count: u32,
    /// Reason for the most recent failure, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
    /// Templating context for content generation. The recipient address
    /// lives under the `"recipient"` key.
    pub payload: serde_json::Value,
    /// Set when a worker claims the task; used by the stale-claim sweep.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub claimed_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl FollowUpTask {
    /// Create a new pending task.
    pub fn new(
        lead_id: Uuid,
        campaign_id: Uuid,
        scheduled_at: DateTime<Utc>,
        payload: serde_json::Value,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            lead_id,
            campaign_id,
            scheduled_at,
            status: TaskStatus::Pending,
            attempt_count: 0,
            last_error: None,
            payload,
            claimed_at: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// Recipient address from the task payload, if present.
    #[must_use]
    pub fn recipient(&self) -> Option<&str> {
        self.payload.get("recipient").and_then(|v| v.as_str())
    }
}

/// Delivery status of an email message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageStatus {
    Draft,
    Sent,
    Bounced,
    Suppressed,
}

/// A concrete outbound email, created in `Draft` just before a send attempt.
///
/// `provider_used` and `sent_at` are set together, only on the `Sent`
/// transition. A retried task drafts a fresh message on its next attempt;
/// earlier drafts remain as the attempt audit trail.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmailMessage {
    pub id: Uuid,
    /// Task that produced this message.
    pub task_id: Uuid,
    pub lead_id: Uuid,
    pub recipient: String,
    pub subject: String,
    pub body: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub provider_used: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sent_at: Option<DateTime<Utc>>,
    pub status: MessageStatus,
    pub created_at: DateTime<Utc>,
}

impl EmailMessage {
    /// Draft a message for a task, ready to hand to the sender.
    pub fn draft(
        task: &FollowUpTask,
        recipient: impl Into<String>,
        subject: impl Into<String>,
        body: impl Into<String>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            task_id: task.id,
            lead_id: task.lead_id,
            recipient: recipient.into(),
            subject: subject.into(),
            body: body.into(),
            provider_used: None,
            sent_at: None,
            status: MessageStatus::Draft,
            created_at: Utc::now(),
        }
    }
}

/// Per-recipient bounce ledger entry. One row per recipient address;
/// `bounce_count` only increases, and a permanent suppression is never
/// cleared automatically.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BounceRecord {
    pub recipient: String,
    pub bounce_count: u32,
    /// When the most recent bounce was recorded. `None` on rows that
    /// predate diagnostic tracking.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_bounce_at: Option<DateTime<Utc>>,
    /// Merged diagnostic payload (provider, error code, classification).
    /// Empty object on rows that predate diagnostic tracking.
    pub metadata: serde_json::Value,
    /// Temporary suppression horizon, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub suppressed_until: Option<DateTime<Utc>>,
    /// Permanent suppression flag.
    pub permanent: bool,
    pub created_at: DateTime<Utc>,
}

impl BounceRecord {
    /// Whether this recipient is suppressed at the given instant.
    #[must_use]
    pub fn is_suppressed_at(&self, now: DateTime<Utc>) -> bool {
        self.permanent || self.suppressed_until.is_some_and(|until| until > now)
    }
}
