//! Backend-agnostic `Store` trait — single async interface for all
//! persistence the engine touches: follow-up tasks, email messages, and
//! the bounce ledger.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::error::StoreError;
use crate::model::{BounceRecord, EmailMessage, FollowUpTask, TaskStatus};

/// Persistence interface for the delivery engine.
///
/// Task-status writes are guarded: `finish_task` and `release_task` only
/// apply to a task currently in Processing, and `claim_task` only wins from
/// Pending. The claim is the engine's sole concurrency-control point.
#[async_trait]
pub trait Store: Send + Sync {
    /// Run all pending schema migrations.
    async fn run_migrations(&self) -> Result<(), StoreError>;

    // ── Follow-up tasks ─────────────────────────────────────────────

    /// Insert a new task.
    async fn insert_task(&self, task: &FollowUpTask) -> Result<(), StoreError>;

    /// Get a task by ID.
    async fn get_task(&self, id: Uuid) -> Result<Option<FollowUpTask>, StoreError>;

    /// All pending tasks due at or before `now`, oldest first, up to `limit`.
    async fn due_tasks(
        &self,
        now: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<FollowUpTask>, StoreError>;

    /// Atomically claim a task (Pending → Processing). Returns `false` if
    /// another worker instance won the claim or the task is no longer
    /// pending.
    async fn claim_task(&self, id: Uuid, now: DateTime<Utc>) -> Result<bool, StoreError>;

    /// Return a claimed task to Pending for a later retry, recording the
    /// consumed attempt and the failure reason. Only applies from Processing.
    async fn release_task(
        &self,
        id: Uuid,
        attempt_count: u32,
        last_error: &str,
    ) -> Result<(), StoreError>;

    /// Move a claimed task to a terminal status. Only applies from
    /// Processing; `last_error` carries the reason for Failed/Cancelled.
    async fn finish_task(
        &self,
        id: Uuid,
        status: TaskStatus,
        last_error: Option<&str>,
    ) -> Result<(), StoreError>;

    /// Revert tasks stuck in Processing since before `stale_before` back to
    /// Pending (crash recovery). Returns the number reclaimed.
    async fn reclaim_stale_tasks(&self, stale_before: DateTime<Utc>) -> Result<usize, StoreError>;

    // ── Email messages ──────────────────────────────────────────────

    /// Insert a new message (normally in Draft).
    async fn insert_message(&self, message: &EmailMessage) -> Result<(), StoreError>;

    /// Get a message by ID.
    async fn get_message(&self, id: Uuid) -> Result<Option<EmailMessage>, StoreError>;

    /// All messages drafted for a task, oldest first.
    async fn messages_for_task(&self, task_id: Uuid) -> Result<Vec<EmailMessage>, StoreError>;

    /// Mark a draft message Sent, setting `provider_used` and `sent_at`
    /// together.
    async fn mark_message_sent(
        &self,
        id: Uuid,
        provider: &str,
        sent_at: DateTime<Utc>,
    ) -> Result<(), StoreError>;

    /// Mark a draft message Bounced.
    async fn mark_message_bounced(&self, id: Uuid) -> Result<(), StoreError>;

    // ── Bounce ledger ───────────────────────────────────────────────

    /// Get the bounce record for a recipient, if any.
    async fn get_bounce(&self, recipient: &str) -> Result<Option<BounceRecord>, StoreError>;

    /// Record a bounce: increment `bounce_count`, set `last_bounce_at`, and
    /// merge `metadata` into the existing diagnostics — all as a single
    /// atomic upsert, never read-modify-write through application memory.
    /// Returns the updated record.
    async fn record_bounce(
        &self,
        recipient: &str,
        metadata: &serde_json::Value,
        now: DateTime<Utc>,
    ) -> Result<BounceRecord, StoreError>;

    /// Apply a suppression decision. `permanent` is monotonic: once set it
    /// is never cleared by a later temporary decision.
    async fn apply_suppression(
        &self,
        recipient: &str,
        until: Option<DateTime<Utc>>,
        permanent: bool,
    ) -> Result<(), StoreError>;
}
