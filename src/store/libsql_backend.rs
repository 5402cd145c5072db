//! libSQL backend — async `Store` trait implementation.
//!
//! Supports local file and in-memory databases. The task claim and the
//! bounce upsert are single conditional statements so concurrent worker
//! instances stay safe without a lock manager.

use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use libsql::{Connection, Database as LibSqlDatabase, params};
use tracing::info;
use uuid::Uuid;

use crate::error::StoreError;
use crate::model::{BounceRecord, EmailMessage, FollowUpTask, MessageStatus, TaskStatus};
use crate::store::migrations;
use crate::store::traits::Store;

/// libSQL store backend.
///
/// Stores a single connection that is reused for all operations.
/// `libsql::Connection` is `Send + Sync` and safe for concurrent async use.
pub struct LibSqlStore {
    #[allow(dead_code)]
    db: Arc<LibSqlDatabase>,
    conn: Connection,
}

impl LibSqlStore {
    /// Open (or create) a local database file and run migrations.
    pub async fn new_local(path: &Path) -> Result<Self, StoreError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| {
                StoreError::Open(format!("Failed to create database directory: {e}"))
            })?;
        }

        let db = libsql::Builder::new_local(path)
            .build()
            .await
            .map_err(|e| StoreError::Open(format!("Failed to open libSQL database: {e}")))?;

        let conn = db
            .connect()
            .map_err(|e| StoreError::Open(format!("Failed to create connection: {e}")))?;

        let store = Self {
            db: Arc::new(db),
            conn,
        };
        migrations::run_migrations(&store.conn).await?;
        info!(path = %path.display(), "Database opened");
        Ok(store)
    }

    /// Create an in-memory database (for tests).
    pub async fn new_memory() -> Result<Self, StoreError> {
        let db = libsql::Builder::new_local(":memory:")
            .build()
            .await
            .map_err(|e| StoreError::Open(format!("Failed to create in-memory database: {e}")))?;

        let conn = db
            .connect()
            .map_err(|e| StoreError::Open(format!("Failed to create connection: {e}")))?;

        let store = Self {
            db: Arc::new(db),
            conn,
        };
        migrations::run_migrations(&store.conn).await?;
        Ok(store)
    }

    fn conn(&self) -> &Connection {
        &self.conn
    }
}

// ── Helper functions ────────────────────────────────────────────────

/// Parse an RFC 3339 or SQLite datetime string into DateTime<Utc>.
fn parse_datetime(s: &str) -> DateTime<Utc> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return dt.with_timezone(&Utc);
    }
    if let Ok(ndt) = chrono::NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S%.f") {
        return ndt.and_utc();
    }
    if let Ok(ndt) = chrono::NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S") {
        return ndt.and_utc();
    }
    DateTime::<Utc>::MIN_UTC
}

fn task_status_to_str(status: TaskStatus) -> &'static str {
    match status {
        TaskStatus::Pending => "pending",
        TaskStatus::Processing => "processing",
        TaskStatus::Sent => "sent",
        TaskStatus::Failed => "failed",
        TaskStatus::Cancelled => "cancelled",
    }
}

fn str_to_task_status(s: &str) -> TaskStatus {
    match s {
        "processing" => TaskStatus::Processing,
        "sent" => TaskStatus::Sent,
        "failed" => TaskStatus::Failed,
        "cancelled" => TaskStatus::Cancelled,
        _ => TaskStatus::Pending,
    }
}

fn str_to_message_status(s: &str) -> MessageStatus {
    match s {
        "sent" => MessageStatus::Sent,
        "bounced" => MessageStatus::Bounced,
        "suppressed" => MessageStatus::Suppressed,
        _ => MessageStatus::Draft,
    }
}

fn parse_uuid(s: &str) -> Uuid {
    Uuid::parse_str(s).unwrap_or_else(|_| Uuid::nil())
}

/// Convert `Option<&str>` to a libsql Value (NULL when absent).
fn opt_text(s: Option<&str>) -> libsql::Value {
    match s {
        Some(s) => libsql::Value::Text(s.to_string()),
        None => libsql::Value::Null,
    }
}

/// Convert `Option<String>` to a libsql Value.
fn opt_text_owned(s: Option<String>) -> libsql::Value {
    match s {
        Some(s) => libsql::Value::Text(s),
        None => libsql::Value::Null,
    }
}

const TASK_COLUMNS: &str = "id, lead_id, campaign_id, scheduled_at, status, attempt_count, \
                            last_error, payload, claimed_at, created_at, updated_at";

/// Map a libsql Row to a FollowUpTask. Column order matches TASK_COLUMNS.
fn row_to_task(row: &libsql::Row) -> Result<FollowUpTask, libsql::Error> {
    let id: String = row.get(0)?;
    let lead_id: String = row.get(1)?;
    let campaign_id: String = row.get(2)?;
    let scheduled_at: String = row.get(3)?;
    let status: String = row.get(4)?;
    let attempt_count: i64 = row.get(5)?;
    let last_error: Option<String> = row.get::<String>(6).ok();
    let payload: String = row.get(7)?;
    let claimed_at: Option<String> = row.get::<String>(8).ok();
    let created_at: String = row.get(9)?;
    let updated_at: String = row.get(10)?;

    Ok(FollowUpTask {
        id: parse_uuid(&id),
        lead_id: parse_uuid(&lead_id),
        campaign_id: parse_uuid(&campaign_id),
        scheduled_at: parse_datetime(&scheduled_at),
        status: str_to_task_status(&status),
        attempt_count: u32::try_from(attempt_count).unwrap_or(0),
        last_error,
        payload: serde_json::from_str(&payload).unwrap_or(serde_json::Value::Null),
        claimed_at: claimed_at.as_deref().map(parse_datetime),
        created_at: parse_datetime(&created_at),
        updated_at: parse_datetime(&updated_at),
    })
}

const MESSAGE_COLUMNS: &str = "id, task_id, lead_id, recipient, subject, body, provider_used, \
                               sent_at, status, created_at";

/// Map a libsql Row to an EmailMessage. Column order matches MESSAGE_COLUMNS.
fn row_to_message(row: &libsql::Row) -> Result<EmailMessage, libsql::Error> {
    let id: String = row.get(0)?;
    let task_id: String = row.get(1)?;
    let lead_id: String = row.get(2)?;
    let recipient: String = row.get(3)?;
    let subject: String = row.get(4)?;
    let body: String = row.get(5)?;
    let provider_used: Option<String> = row.get::<String>(6).ok();
    let sent_at: Option<String> = row.get::<String>(7).ok();
    let status: String = row.get(8)?;
    let created_at: String = row.get(9)?;

    Ok(EmailMessage {
        id: parse_uuid(&id),
        task_id: parse_uuid(&task_id),
        lead_id: parse_uuid(&lead_id),
        recipient,
        subject,
        body,
        provider_used,
        sent_at: sent_at.as_deref().map(parse_datetime),
        status: str_to_message_status(&status),
        created_at: parse_datetime(&created_at),
    })
}

const BOUNCE_COLUMNS: &str =
    "recipient, bounce_count, suppressed_until, permanent, created_at, metadata, last_bounce_at";

/// Map a libsql Row to a BounceRecord. Column order matches BOUNCE_COLUMNS.
///
/// `metadata` and `last_bounce_at` may be NULL on rows predating the
/// diagnostics columns — those read as "no detail yet", not as errors.
fn row_to_bounce(row: &libsql::Row) -> Result<BounceRecord, libsql::Error> {
    let recipient: String = row.get(0)?;
    let bounce_count: i64 = row.get(1)?;
    let suppressed_until: Option<String> = row.get::<String>(2).ok();
    let permanent: i64 = row.get(3)?;
    let created_at: String = row.get(4)?;
    let metadata: Option<String> = row.get::<String>(5).ok();
    let last_bounce_at: Option<String> = row.get::<String>(6).ok();

    Ok(BounceRecord {
        recipient,
        bounce_count: u32::try_from(bounce_count).unwrap_or(0),
        last_bounce_at: last_bounce_at.as_deref().map(parse_datetime),
        metadata: metadata
            .as_deref()
            .and_then(|m| serde_json::from_str(m).ok())
            .unwrap_or_else(|| serde_json::json!({})),
        suppressed_until: suppressed_until.as_deref().map(parse_datetime),
        permanent: permanent != 0,
        created_at: parse_datetime(&created_at),
    })
}

fn query_err(e: libsql::Error) -> StoreError {
    StoreError::Query(e.to_string())
}

// ── Store implementation ────────────────────────────────────────────

#[async_trait]
impl Store for LibSqlStore {
    async fn run_migrations(&self) -> Result<(), StoreError> {
        migrations::run_migrations(self.conn()).await
    }

    async fn insert_task(&self, task: &FollowUpTask) -> Result<(), StoreError> {
        let payload = serde_json::to_string(&task.payload)
            .map_err(|e| StoreError::Serialization(e.to_string()))?;

        self.conn()
            .execute(
                "INSERT INTO follow_up_tasks
                    (id, lead_id, campaign_id, scheduled_at, status, attempt_count,
                     last_error, payload, claimed_at, created_at, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)",
                params![
                    task.id.to_string(),
                    task.lead_id.to_string(),
                    task.campaign_id.to_string(),
                    task.scheduled_at.to_rfc3339(),
                    task_status_to_str(task.status),
                    i64::from(task.attempt_count),
                    opt_text(task.last_error.as_deref()),
                    payload,
                    opt_text_owned(task.claimed_at.map(|t| t.to_rfc3339())),
                    task.created_at.to_rfc3339(),
                    task.updated_at.to_rfc3339(),
                ],
            )
            .await
            .map_err(query_err)?;
        Ok(())
    }

    async fn get_task(&self, id: Uuid) -> Result<Option<FollowUpTask>, StoreError> {
        let sql = format!("SELECT {TASK_COLUMNS} FROM follow_up_tasks WHERE id = ?1");
        let mut rows = self
            .conn()
            .query(&sql, params![id.to_string()])
            .await
            .map_err(query_err)?;

        match rows.next().await.map_err(query_err)? {
            Some(row) => Ok(Some(row_to_task(&row).map_err(query_err)?)),
            None => Ok(None),
        }
    }

    async fn due_tasks(
        &self,
        now: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<FollowUpTask>, StoreError> {
        let sql = format!(
            "SELECT {TASK_COLUMNS} FROM follow_up_tasks
             WHERE status = 'pending' AND scheduled_at <= ?1
             ORDER BY scheduled_at ASC
             LIMIT ?2"
        );
        let mut rows = self
            .conn()
            .query(&sql, params![now.to_rfc3339(), limit as i64])
            .await
            .map_err(query_err)?;

        let mut tasks = Vec::new();
        while let Some(row) = rows.next().await.map_err(query_err)? {
            tasks.push(row_to_task(&row).map_err(query_err)?);
        }
        Ok(tasks)
    }

    async fn claim_task(&self, id: Uuid, now: DateTime<Utc>) -> Result<bool, StoreError> {
        let affected = self
            .conn()
            .execute(
                "UPDATE follow_up_tasks
                 SET status = 'processing', claimed_at = ?2, updated_at = ?2
                 WHERE id = ?1 AND status = 'pending'",
                params![id.to_string(), now.to_rfc3339()],
            )
            .await
            .map_err(query_err)?;
        Ok(affected == 1)
    }

    async fn release_task(
        &self,
        id: Uuid,
        attempt_count: u32,
        last_error: &str,
    ) -> Result<(), StoreError> {
        self.conn()
            .execute(
                "UPDATE follow_up_tasks
                 SET status = 'pending', attempt_count = ?2, last_error = ?3,
                     claimed_at = NULL, updated_at = ?4
                 WHERE id = ?1 AND status = 'processing'",
                params![
                    id.to_string(),
                    i64::from(attempt_count),
                    last_error,
                    Utc::now().to_rfc3339(),
                ],
            )
            .await
            .map_err(query_err)?;
        Ok(())
    }

    async fn finish_task(
        &self,
        id: Uuid,
        status: TaskStatus,
        last_error: Option<&str>,
    ) -> Result<(), StoreError> {
        let affected = self
            .conn()
            .execute(
                "UPDATE follow_up_tasks
                 SET status = ?2, last_error = ?3, claimed_at = NULL, updated_at = ?4
                 WHERE id = ?1 AND status = 'processing'",
                params![
                    id.to_string(),
                    task_status_to_str(status),
                    opt_text(last_error),
                    Utc::now().to_rfc3339(),
                ],
            )
            .await
            .map_err(query_err)?;

        if affected == 0 {
            return Err(StoreError::NotFound {
                entity: "claimed follow-up task".into(),
                id: id.to_string(),
            });
        }
        Ok(())
    }

    async fn reclaim_stale_tasks(&self, stale_before: DateTime<Utc>) -> Result<usize, StoreError> {
        let affected = self
            .conn()
            .execute(
                "UPDATE follow_up_tasks
                 SET status = 'pending', claimed_at = NULL, updated_at = ?2
                 WHERE status = 'processing'
                   AND claimed_at IS NOT NULL
                   AND claimed_at < ?1",
                params![stale_before.to_rfc3339(), Utc::now().to_rfc3339()],
            )
            .await
            .map_err(query_err)?;
        Ok(affected as usize)
    }

    async fn insert_message(&self, message: &EmailMessage) -> Result<(), StoreError> {
        let status = match message.status {
            MessageStatus::Draft => "draft",
            MessageStatus::Sent => "sent",
            MessageStatus::Bounced => "bounced",
            MessageStatus::Suppressed => "suppressed",
        };

        self.conn()
            .execute(
                "INSERT INTO email_messages
                    (id, task_id, lead_id, recipient, subject, body, provider_used,
                     sent_at, status, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
                params![
                    message.id.to_string(),
                    message.task_id.to_string(),
                    message.lead_id.to_string(),
                    message.recipient.clone(),
                    message.subject.clone(),
                    message.body.clone(),
                    opt_text(message.provider_used.as_deref()),
                    opt_text_owned(message.sent_at.map(|t| t.to_rfc3339())),
                    status,
                    message.created_at.to_rfc3339(),
                ],
            )
            .await
            .map_err(query_err)?;
        Ok(())
    }

    async fn get_message(&self, id: Uuid) -> Result<Option<EmailMessage>, StoreError> {
        let sql = format!("SELECT {MESSAGE_COLUMNS} FROM email_messages WHERE id = ?1");
        let mut rows = self
            .conn()
            .query(&sql, params![id.to_string()])
            .await
            .map_err(query_err)?;

        match rows.next().await.map_err(query_err)? {
            Some(row) => Ok(Some(row_to_message(&row).map_err(query_err)?)),
            None => Ok(None),
        }
    }

    async fn messages_for_task(&self, task_id: Uuid) -> Result<Vec<EmailMessage>, StoreError> {
        let sql = format!(
            "SELECT {MESSAGE_COLUMNS} FROM email_messages
             WHERE task_id = ?1 ORDER BY created_at ASC"
        );
        let mut rows = self
            .conn()
            .query(&sql, params![task_id.to_string()])
            .await
            .map_err(query_err)?;

        let mut messages = Vec::new();
        while let Some(row) = rows.next().await.map_err(query_err)? {
            messages.push(row_to_message(&row).map_err(query_err)?);
        }
        Ok(messages)
    }

    async fn mark_message_sent(
        &self,
        id: Uuid,
        provider: &str,
        sent_at: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        let affected = self
            .conn()
            .execute(
                "UPDATE email_messages
                 SET status = 'sent', provider_used = ?2, sent_at = ?3
                 WHERE id = ?1 AND status = 'draft'",
                params![id.to_string(), provider, sent_at.to_rfc3339()],
            )
            .await
            .map_err(query_err)?;

        if affected == 0 {
            return Err(StoreError::NotFound {
                entity: "draft email message".into(),
                id: id.to_string(),
            });
        }
        Ok(())
    }

    async fn mark_message_bounced(&self, id: Uuid) -> Result<(), StoreError> {
        let affected = self
            .conn()
            .execute(
                "UPDATE email_messages
                 SET status = 'bounced'
                 WHERE id = ?1 AND status = 'draft'",
                params![id.to_string()],
            )
            .await
            .map_err(query_err)?;

        if affected == 0 {
            return Err(StoreError::NotFound {
                entity: "draft email message".into(),
                id: id.to_string(),
            });
        }
        Ok(())
    }

    async fn get_bounce(&self, recipient: &str) -> Result<Option<BounceRecord>, StoreError> {
        let sql = format!("SELECT {BOUNCE_COLUMNS} FROM bounce_tracker WHERE recipient = ?1");
        let mut rows = self
            .conn()
            .query(&sql, params![recipient])
            .await
            .map_err(query_err)?;

        match rows.next().await.map_err(query_err)? {
            Some(row) => Ok(Some(row_to_bounce(&row).map_err(query_err)?)),
            None => Ok(None),
        }
    }

    async fn record_bounce(
        &self,
        recipient: &str,
        metadata: &serde_json::Value,
        now: DateTime<Utc>,
    ) -> Result<BounceRecord, StoreError> {
        let metadata_json = serde_json::to_string(metadata)
            .map_err(|e| StoreError::Serialization(e.to_string()))?;

        // Single-statement upsert: the count increment and the metadata
        // merge happen inside the database, so concurrent bounce reports
        // for the same recipient never lose updates.
        self.conn()
            .execute(
                "INSERT INTO bounce_tracker
                    (recipient, bounce_count, suppressed_until, permanent,
                     created_at, metadata, last_bounce_at)
                 VALUES (?1, 1, NULL, 0, ?2, ?3, ?2)
                 ON CONFLICT(recipient) DO UPDATE SET
                     bounce_count = bounce_tracker.bounce_count + 1,
                     last_bounce_at = excluded.last_bounce_at,
                     metadata = json_patch(COALESCE(bounce_tracker.metadata, '{}'),
                                           excluded.metadata)",
                params![recipient, now.to_rfc3339(), metadata_json],
            )
            .await
            .map_err(query_err)?;

        self.get_bounce(recipient)
            .await?
            .ok_or_else(|| StoreError::NotFound {
                entity: "bounce record".into(),
                id: recipient.to_string(),
            })
    }

    async fn apply_suppression(
        &self,
        recipient: &str,
        until: Option<DateTime<Utc>>,
        permanent: bool,
    ) -> Result<(), StoreError> {
        // MAX keeps the permanent flag monotonic under racing decisions.
        self.conn()
            .execute(
                "UPDATE bounce_tracker
                 SET suppressed_until = ?2, permanent = MAX(permanent, ?3)
                 WHERE recipient = ?1",
                params![
                    recipient,
                    opt_text_owned(until.map(|t| t.to_rfc3339())),
                    i64::from(permanent),
                ],
            )
            .await
            .map_err(query_err)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn store() -> LibSqlStore {
        LibSqlStore::new_memory().await.unwrap()
    }

    fn task_due(minutes_ago: i64) -> FollowUpTask {
        FollowUpTask::new(
            Uuid::new_v4(),
            Uuid::new_v4(),
            Utc::now() - chrono::Duration::minutes(minutes_ago),
            serde_json::json!({"recipient": "lead@example.com"}),
        )
    }

    // ── Task tests ──────────────────────────────────────────────────

    #[tokio::test]
    async fn insert_and_get_task_roundtrip() {
        let store = store().await;
        let task = task_due(5);
        store.insert_task(&task).await.unwrap();

        let loaded = store.get_task(task.id).await.unwrap().unwrap();
        assert_eq!(loaded.id, task.id);
        assert_eq!(loaded.lead_id, task.lead_id);
        assert_eq!(loaded.status, TaskStatus::Pending);
        assert_eq!(loaded.attempt_count, 0);
        assert_eq!(loaded.recipient(), Some("lead@example.com"));
    }

    #[tokio::test]
    async fn due_tasks_oldest_first() {
        let store = store().await;
        let newer = task_due(5);
        let older = task_due(60);
        store.insert_task(&newer).await.unwrap();
        store.insert_task(&older).await.unwrap();

        let due = store.due_tasks(Utc::now(), 10).await.unwrap();
        assert_eq!(due.len(), 2);
        assert_eq!(due[0].id, older.id);
        assert_eq!(due[1].id, newer.id);
    }

    #[tokio::test]
    async fn future_tasks_are_not_due() {
        let store = store().await;
        let future = task_due(-60); // scheduled an hour from now
        store.insert_task(&future).await.unwrap();

        let due = store.due_tasks(Utc::now(), 10).await.unwrap();
        assert!(due.is_empty());
    }

    #[tokio::test]
    async fn far_past_task_is_still_due() {
        let store = store().await;
        let ancient = task_due(60 * 24 * 30); // a month overdue
        store.insert_task(&ancient).await.unwrap();

        let due = store.due_tasks(Utc::now(), 10).await.unwrap();
        assert_eq!(due.len(), 1);
    }

    #[tokio::test]
    async fn claim_is_exclusive() {
        let store = store().await;
        let task = task_due(5);
        store.insert_task(&task).await.unwrap();

        assert!(store.claim_task(task.id, Utc::now()).await.unwrap());
        // Second claim loses: the task is no longer pending.
        assert!(!store.claim_task(task.id, Utc::now()).await.unwrap());

        let loaded = store.get_task(task.id).await.unwrap().unwrap();
        assert_eq!(loaded.status, TaskStatus::Processing);
        assert!(loaded.claimed_at.is_some());
    }

    #[tokio::test]
    async fn finish_requires_processing() {
        let store = store().await;
        let task = task_due(5);
        store.insert_task(&task).await.unwrap();

        // Not claimed yet — finishing must fail, not silently overwrite.
        let err = store
            .finish_task(task.id, TaskStatus::Sent, None)
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::NotFound { .. }));

        store.claim_task(task.id, Utc::now()).await.unwrap();
        store
            .finish_task(task.id, TaskStatus::Sent, None)
            .await
            .unwrap();

        let loaded = store.get_task(task.id).await.unwrap().unwrap();
        assert_eq!(loaded.status, TaskStatus::Sent);
        assert!(loaded.claimed_at.is_none());

        // Terminal states never transition again.
        let err = store
            .finish_task(task.id, TaskStatus::Failed, Some("late"))
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::NotFound { .. }));
    }

    #[tokio::test]
    async fn release_returns_task_to_pending() {
        let store = store().await;
        let task = task_due(5);
        store.insert_task(&task).await.unwrap();
        store.claim_task(task.id, Utc::now()).await.unwrap();

        store
            .release_task(task.id, 1, "all providers exhausted")
            .await
            .unwrap();

        let loaded = store.get_task(task.id).await.unwrap().unwrap();
        assert_eq!(loaded.status, TaskStatus::Pending);
        assert_eq!(loaded.attempt_count, 1);
        assert_eq!(loaded.last_error.as_deref(), Some("all providers exhausted"));
        assert!(loaded.claimed_at.is_none());
        // scheduled_at untouched — the task is retried on the next poll.
        let due = store.due_tasks(Utc::now(), 10).await.unwrap();
        assert_eq!(due.len(), 1);
    }

    #[tokio::test]
    async fn reclaim_only_touches_stale_claims() {
        let store = store().await;
        let stale = task_due(30);
        let fresh = task_due(30);
        store.insert_task(&stale).await.unwrap();
        store.insert_task(&fresh).await.unwrap();

        store
            .claim_task(stale.id, Utc::now() - chrono::Duration::hours(1))
            .await
            .unwrap();
        store.claim_task(fresh.id, Utc::now()).await.unwrap();

        let reclaimed = store
            .reclaim_stale_tasks(Utc::now() - chrono::Duration::minutes(10))
            .await
            .unwrap();
        assert_eq!(reclaimed, 1);

        let stale = store.get_task(stale.id).await.unwrap().unwrap();
        let fresh = store.get_task(fresh.id).await.unwrap().unwrap();
        assert_eq!(stale.status, TaskStatus::Pending);
        assert_eq!(fresh.status, TaskStatus::Processing);
    }

    // ── Message tests ───────────────────────────────────────────────

    #[tokio::test]
    async fn sent_message_sets_provider_and_timestamp_together() {
        let store = store().await;
        let task = task_due(5);
        store.insert_task(&task).await.unwrap();

        let message = EmailMessage::draft(&task, "lead@example.com", "Hi", "Body");
        store.insert_message(&message).await.unwrap();

        let sent_at = Utc::now();
        store
            .mark_message_sent(message.id, "smtp", sent_at)
            .await
            .unwrap();

        let loaded = store.get_message(message.id).await.unwrap().unwrap();
        assert_eq!(loaded.status, MessageStatus::Sent);
        assert_eq!(loaded.provider_used.as_deref(), Some("smtp"));
        assert!(loaded.sent_at.is_some());

        // The Sent transition is written once.
        let err = store
            .mark_message_sent(message.id, "http", Utc::now())
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::NotFound { .. }));
    }

    #[tokio::test]
    async fn bounced_message_keeps_no_provider() {
        let store = store().await;
        let task = task_due(5);
        store.insert_task(&task).await.unwrap();

        let message = EmailMessage::draft(&task, "bad@example.com", "Hi", "Body");
        store.insert_message(&message).await.unwrap();
        store.mark_message_bounced(message.id).await.unwrap();

        let loaded = store.get_message(message.id).await.unwrap().unwrap();
        assert_eq!(loaded.status, MessageStatus::Bounced);
        assert!(loaded.provider_used.is_none());
        assert!(loaded.sent_at.is_none());
    }

    #[tokio::test]
    async fn messages_for_task_lists_all_attempts() {
        let store = store().await;
        let task = task_due(5);
        store.insert_task(&task).await.unwrap();

        let first = EmailMessage::draft(&task, "lead@example.com", "Hi", "Body");
        let second = EmailMessage::draft(&task, "lead@example.com", "Hi", "Body");
        store.insert_message(&first).await.unwrap();
        store.insert_message(&second).await.unwrap();

        let messages = store.messages_for_task(task.id).await.unwrap();
        assert_eq!(messages.len(), 2);
    }

    // ── Bounce ledger tests ─────────────────────────────────────────

    #[tokio::test]
    async fn bounce_count_is_monotonic() {
        let store = store().await;
        let meta = serde_json::json!({"provider": "smtp"});

        let first = store
            .record_bounce("x@y.com", &meta, Utc::now())
            .await
            .unwrap();
        assert_eq!(first.bounce_count, 1);

        let second = store
            .record_bounce("x@y.com", &meta, Utc::now())
            .await
            .unwrap();
        assert_eq!(second.bounce_count, 2);
        assert!(second.last_bounce_at.is_some());
    }

    #[tokio::test]
    async fn bounce_metadata_merges_instead_of_overwriting() {
        let store = store().await;

        store
            .record_bounce(
                "x@y.com",
                &serde_json::json!({"provider": "smtp", "code": "550"}),
                Utc::now(),
            )
            .await
            .unwrap();

        let updated = store
            .record_bounce(
                "x@y.com",
                &serde_json::json!({"classification": "hard_bounce"}),
                Utc::now(),
            )
            .await
            .unwrap();

        // Earlier diagnostic fields survive the second report.
        assert_eq!(updated.metadata["provider"], "smtp");
        assert_eq!(updated.metadata["code"], "550");
        assert_eq!(updated.metadata["classification"], "hard_bounce");
    }

    #[tokio::test]
    async fn suppression_permanent_is_monotonic() {
        let store = store().await;
        store
            .record_bounce("x@y.com", &serde_json::json!({}), Utc::now())
            .await
            .unwrap();

        store.apply_suppression("x@y.com", None, true).await.unwrap();
        // A later temporary decision must not clear the permanent flag.
        store
            .apply_suppression("x@y.com", Some(Utc::now() + chrono::Duration::hours(1)), false)
            .await
            .unwrap();

        let record = store.get_bounce("x@y.com").await.unwrap().unwrap();
        assert!(record.permanent);
    }

    #[tokio::test]
    async fn unknown_recipient_has_no_record() {
        let store = store().await;
        assert!(store.get_bounce("nobody@y.com").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn file_backed_store_opens() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("outreach.db");
        let store = LibSqlStore::new_local(&path).await.unwrap();

        let task = task_due(5);
        store.insert_task(&task).await.unwrap();
        assert!(store.get_task(task.id).await.unwrap().is_some());
    }
}
