//! Follow-up queue worker — turns due follow-up tasks into delivery
//! attempts, one bounded pass at a time.
//!
//! The worker holds no timer; an external trigger (cron, operator) calls
//! `process_queue()`. Concurrent invocations are safe: the atomic
//! Pending→Processing claim in the store is the sole mutual-exclusion
//! point, so overlapping passes never double-send a task.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::Utc;
use futures::stream::{self, StreamExt};
use tokio::sync::Mutex;
use tracing::{debug, error, info, warn};

use crate::bounce::BounceTracker;
use crate::config::EngineConfig;
use crate::content::ContentGenerator;
use crate::error::Result;
use crate::model::{EmailMessage, FollowUpTask, TaskStatus};
use crate::sender::{FailoverSender, OutboundMessage, SendOutcome};
use crate::store::Store;

/// Outcome counts for one queue pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PassSummary {
    /// Tasks delivered this pass.
    pub sent: usize,
    /// Tasks that failed — terminally or queued for a later retry.
    pub failed: usize,
    /// Tasks skipped: suppressed recipients and claims lost to a
    /// concurrent pass.
    pub skipped: usize,
}

/// Per-task result, tallied into the pass summary.
enum TaskOutcome {
    Sent,
    Failed,
    Skipped,
}

/// Background worker converting due, pending follow-up tasks into delivery
/// attempts — exactly once per occurrence under normal operation,
/// at-least-once under failure.
pub struct FollowUpWorker {
    store: Arc<dyn Store>,
    sender: Arc<FailoverSender>,
    content: Arc<dyn ContentGenerator>,
    bounces: Arc<BounceTracker>,
    config: EngineConfig,
    /// Per-recipient locks: two tasks for the same recipient never send
    /// concurrently, keeping bounce reads consistent with in-flight sends.
    recipient_locks: Mutex<HashMap<String, Arc<Mutex<()>>>>,
}

impl FollowUpWorker {
    pub fn new(
        store: Arc<dyn Store>,
        sender: Arc<FailoverSender>,
        content: Arc<dyn ContentGenerator>,
        bounces: Arc<BounceTracker>,
        config: EngineConfig,
    ) -> Self {
        Self {
            store,
            sender,
            content,
            bounces,
            config,
            recipient_locks: Mutex::new(HashMap::new()),
        }
    }

    /// Run one queue pass: reclaim stale claims, fetch everything due, and
    /// process each task independently. One task's failure never aborts
    /// the batch, and no task is left in Processing afterwards.
    pub async fn process_queue(&self) -> Result<PassSummary> {
        let now = Utc::now();

        let stale_before = now - chrono_dur(self.config.stale_claim_after);
        let reclaimed = self.store.reclaim_stale_tasks(stale_before).await?;
        if reclaimed > 0 {
            warn!(reclaimed, "Reclaimed stale processing claims");
        }

        let due = self.store.due_tasks(now, self.config.batch_limit).await?;
        debug!(due = due.len(), "Queue pass starting");

        let outcomes: Vec<TaskOutcome> = stream::iter(due)
            .map(|task| self.process_task(task))
            .buffer_unordered(self.config.parallelism)
            .collect()
            .await;

        let mut summary = PassSummary::default();
        for outcome in outcomes {
            match outcome {
                TaskOutcome::Sent => summary.sent += 1,
                TaskOutcome::Failed => summary.failed += 1,
                TaskOutcome::Skipped => summary.skipped += 1,
            }
        }

        info!(
            sent = summary.sent,
            failed = summary.failed,
            skipped = summary.skipped,
            "Queue pass complete"
        );
        Ok(summary)
    }

    async fn process_task(&self, task: FollowUpTask) -> TaskOutcome {
        match self.store.claim_task(task.id, Utc::now()).await {
            Ok(true) => {}
            Ok(false) => {
                debug!(task = %task.id, "Claim lost to a concurrent worker");
                return TaskOutcome::Skipped;
            }
            Err(e) => {
                warn!(task = %task.id, error = %e, "Claim failed");
                return TaskOutcome::Skipped;
            }
        }
        self.run_claimed(task).await
    }

    /// The per-task pipeline, entered only by the claim winner.
    async fn run_claimed(&self, task: FollowUpTask) -> TaskOutcome {
        let Some(recipient) = task.recipient().map(str::to_string) else {
            self.fail(&task, "task payload has no recipient address")
                .await;
            return TaskOutcome::Failed;
        };

        let lock = self.recipient_lock(&recipient).await;
        let _guard = lock.lock().await;

        let generated = match tokio::time::timeout(
            self.config.content_timeout,
            self.content.generate(&task.payload),
        )
        .await
        {
            Ok(Ok(content)) => content,
            Ok(Err(e)) => {
                warn!(task = %task.id, error = %e, "Content generation failed");
                self.fail(&task, &format!("content generation failed: {e}"))
                    .await;
                return TaskOutcome::Failed;
            }
            Err(_) => {
                warn!(task = %task.id, "Content generation timed out");
                self.fail(&task, "content generation timed out").await;
                return TaskOutcome::Failed;
            }
        };

        match self.bounces.is_suppressed(&recipient).await {
            Ok(true) => {
                info!(
                    task = %task.id,
                    recipient = %recipient,
                    "Recipient suppressed — follow-up cancelled"
                );
                self.finish(&task, TaskStatus::Cancelled, Some("recipient suppressed"))
                    .await;
                return TaskOutcome::Skipped;
            }
            Ok(false) => {}
            Err(e) => {
                warn!(task = %task.id, error = %e, "Suppression check failed");
                self.release(
                    &task,
                    task.attempt_count,
                    &format!("suppression check failed: {e}"),
                )
                .await;
                return TaskOutcome::Failed;
            }
        }

        let message = EmailMessage::draft(&task, &recipient, &generated.subject, &generated.body);
        if let Err(e) = self.store.insert_message(&message).await {
            warn!(task = %task.id, error = %e, "Failed to draft message");
            self.release(
                &task,
                task.attempt_count,
                &format!("failed to draft message: {e}"),
            )
            .await;
            return TaskOutcome::Failed;
        }

        let outbound = OutboundMessage {
            id: message.id,
            recipient: recipient.clone(),
            subject: message.subject.clone(),
            body: message.body.clone(),
        };

        match self.sender.send(&outbound).await {
            SendOutcome::Sent { provider } => {
                if let Err(e) = self
                    .store
                    .mark_message_sent(message.id, &provider, Utc::now())
                    .await
                {
                    error!(message = %message.id, error = %e, "Failed to persist sent message");
                }
                self.finish(&task, TaskStatus::Sent, None).await;
                TaskOutcome::Sent
            }
            SendOutcome::HardBounce { provider, detail } => {
                if let Err(e) = self.store.mark_message_bounced(message.id).await {
                    error!(message = %message.id, error = %e, "Failed to persist bounced message");
                }

                let metadata = serde_json::json!({
                    "provider": provider,
                    "error": detail,
                    "classification": "hard_bounce",
                });
                if let Err(e) = self.bounces.record_bounce(&recipient, metadata).await {
                    error!(recipient = %recipient, error = %e, "Failed to record bounce");
                }

                self.finish(
                    &task,
                    TaskStatus::Failed,
                    Some(&format!("hard bounce via {provider}: {detail}")),
                )
                .await;
                TaskOutcome::Failed
            }
            SendOutcome::Exhausted { attempts } => {
                let detail = attempts
                    .iter()
                    .map(|(provider, err)| format!("{provider}: {err}"))
                    .collect::<Vec<_>>()
                    .join("; ");
                let consumed = task.attempt_count + 1;

                if consumed >= self.config.max_attempts {
                    error!(task = %task.id, attempts = consumed, "Retries exhausted — task failed");
                    self.finish(
                        &task,
                        TaskStatus::Failed,
                        Some(&format!(
                            "all providers exhausted after {consumed} attempts: {detail}"
                        )),
                    )
                    .await;
                } else {
                    info!(
                        task = %task.id,
                        attempt = consumed,
                        "All providers exhausted — queued for retry"
                    );
                    self.release(&task, consumed, &format!("all providers exhausted: {detail}"))
                        .await;
                }
                TaskOutcome::Failed
            }
        }
    }

    async fn recipient_lock(&self, recipient: &str) -> Arc<Mutex<()>> {
        let mut locks = self.recipient_locks.lock().await;
        locks
            .entry(recipient.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    async fn fail(&self, task: &FollowUpTask, reason: &str) {
        self.finish(task, TaskStatus::Failed, Some(reason)).await;
    }

    async fn finish(&self, task: &FollowUpTask, status: TaskStatus, reason: Option<&str>) {
        if let Err(e) = self.store.finish_task(task.id, status, reason).await {
            error!(task = %task.id, error = %e, "Failed to persist terminal task status");
        }
    }

    async fn release(&self, task: &FollowUpTask, attempt_count: u32, reason: &str) {
        if let Err(e) = self
            .store
            .release_task(task.id, attempt_count, reason)
            .await
        {
            error!(task = %task.id, error = %e, "Failed to release task for retry");
        }
    }
}

fn chrono_dur(d: std::time::Duration) -> chrono::Duration {
    chrono::Duration::from_std(d).unwrap_or_else(|_| chrono::Duration::days(3650))
}
