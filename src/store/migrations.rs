//! Version-tracked database migrations for the libSQL backend.
//!
//! Each migration has a version number and SQL. `run_migrations()` checks
//! the current version and applies only the new ones sequentially.
//! On first run against a legacy DB (tables exist, no `_migrations` table),
//! it detects the existing schema, adds the later diagnostic columns
//! idempotently, and seeds the version table without re-creating tables.

use libsql::Connection;

use crate::error::StoreError;

/// A single migration step.
struct Migration {
    version: i64,
    name: &'static str,
    sql: &'static str,
}

/// All migrations in order. Add new versions to the end.
static MIGRATIONS: &[Migration] = &[
    Migration {
        version: 1,
        name: "initial_schema",
        sql: r#"
            CREATE TABLE IF NOT EXISTS follow_up_tasks (
                id TEXT PRIMARY KEY,
                lead_id TEXT NOT NULL,
                campaign_id TEXT NOT NULL,
                scheduled_at TEXT NOT NULL,
                status TEXT NOT NULL DEFAULT 'pending',
                attempt_count INTEGER NOT NULL DEFAULT 0,
                last_error TEXT,
                payload TEXT NOT NULL DEFAULT '{}',
                claimed_at TEXT,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_follow_up_tasks_status ON follow_up_tasks(status);
            CREATE INDEX IF NOT EXISTS idx_follow_up_tasks_scheduled ON follow_up_tasks(scheduled_at);

            CREATE TABLE IF NOT EXISTS email_messages (
                id TEXT PRIMARY KEY,
                task_id TEXT NOT NULL,
                lead_id TEXT NOT NULL,
                recipient TEXT NOT NULL,
                subject TEXT NOT NULL,
                body TEXT NOT NULL,
                provider_used TEXT,
                sent_at TEXT,
                status TEXT NOT NULL DEFAULT 'draft',
                created_at TEXT NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_email_messages_task ON email_messages(task_id);
            CREATE INDEX IF NOT EXISTS idx_email_messages_recipient ON email_messages(recipient);

            CREATE TABLE IF NOT EXISTS bounce_tracker (
                recipient TEXT PRIMARY KEY,
                bounce_count INTEGER NOT NULL DEFAULT 0,
                suppressed_until TEXT,
                permanent INTEGER NOT NULL DEFAULT 0,
                created_at TEXT NOT NULL
            );
        "#,
    },
    Migration {
        version: 2,
        name: "bounce_diagnostics",
        sql: r#"
            ALTER TABLE bounce_tracker ADD COLUMN metadata TEXT;
            ALTER TABLE bounce_tracker ADD COLUMN last_bounce_at TEXT;
        "#,
    },
];

/// Run all pending migrations against the given connection.
///
/// Creates the `_migrations` table if it doesn't exist.
/// Detects legacy databases (tables exist but no `_migrations` table) and
/// seeds the version table without re-running DDL.
pub async fn run_migrations(conn: &Connection) -> Result<(), StoreError> {
    conn.execute(
        "CREATE TABLE IF NOT EXISTS _migrations (
            version INTEGER PRIMARY KEY,
            name TEXT NOT NULL,
            applied_at TEXT NOT NULL DEFAULT (datetime('now'))
        )",
        (),
    )
    .await
    .map_err(|e| StoreError::Migration(format!("Failed to create _migrations table: {e}")))?;

    let current_version = get_current_version(conn).await?;

    // Legacy DB: bounce_tracker exists but _migrations is empty. The
    // diagnostic columns were originally bolted onto the live table, so
    // some deployments already carry them and some don't — add them with
    // errors ignored, then seed both versions.
    if current_version == 0 && legacy_tables_exist(conn).await? {
        let _ = conn
            .execute("ALTER TABLE bounce_tracker ADD COLUMN metadata TEXT", ())
            .await;
        let _ = conn
            .execute(
                "ALTER TABLE bounce_tracker ADD COLUMN last_bounce_at TEXT",
                (),
            )
            .await;

        seed_version(conn, 1, "initial_schema").await?;
        seed_version(conn, 2, "bounce_diagnostics").await?;
        tracing::info!("Legacy database detected — seeded migrations V1-V2");
    }

    let current_version = get_current_version(conn).await?;
    for migration in MIGRATIONS {
        if migration.version > current_version {
            tracing::info!(
                version = migration.version,
                name = migration.name,
                "Applying migration"
            );
            conn.execute_batch(migration.sql).await.map_err(|e| {
                StoreError::Migration(format!(
                    "Migration V{} ({}) failed: {e}",
                    migration.version, migration.name
                ))
            })?;
            seed_version(conn, migration.version, migration.name).await?;
        }
    }

    let version = get_current_version(conn).await?;
    tracing::debug!(version, "Database migrations complete");

    Ok(())
}

/// Get the highest applied migration version, or 0 if none.
async fn get_current_version(conn: &Connection) -> Result<i64, StoreError> {
    let mut rows = conn
        .query("SELECT COALESCE(MAX(version), 0) FROM _migrations", ())
        .await
        .map_err(|e| StoreError::Migration(format!("Failed to query migration version: {e}")))?;

    let row = rows
        .next()
        .await
        .map_err(|e| StoreError::Migration(format!("Failed to read migration version: {e}")))?;

    match row {
        Some(row) => {
            let version: i64 = row.get(0).map_err(|e| {
                StoreError::Migration(format!("Failed to parse migration version: {e}"))
            })?;
            Ok(version)
        }
        None => Ok(0),
    }
}

/// Check if legacy tables already exist.
async fn legacy_tables_exist(conn: &Connection) -> Result<bool, StoreError> {
    let mut rows = conn
        .query(
            "SELECT COUNT(*) FROM sqlite_master WHERE type='table' AND name='bounce_tracker'",
            (),
        )
        .await
        .map_err(|e| StoreError::Query(format!("Failed to check legacy tables: {e}")))?;

    let row = rows
        .next()
        .await
        .map_err(|e| StoreError::Query(format!("Failed to read legacy check: {e}")))?;

    match row {
        Some(row) => {
            let count: i64 = row.get(0).unwrap_or(0);
            Ok(count > 0)
        }
        None => Ok(false),
    }
}

/// Insert a version record into `_migrations`.
async fn seed_version(conn: &Connection, version: i64, name: &str) -> Result<(), StoreError> {
    conn.execute(
        "INSERT OR IGNORE INTO _migrations (version, name) VALUES (?1, ?2)",
        libsql::params![version, name],
    )
    .await
    .map_err(|e| StoreError::Migration(format!("Failed to record migration V{version}: {e}")))?;
    Ok(())
}
