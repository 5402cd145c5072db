use std::str::FromStr;
use std::sync::Arc;

use anyhow::Context;
use chrono::Utc;

use outreach_engine::bounce::BounceTracker;
use outreach_engine::config::{
    ContentServiceConfig, EngineConfig, HttpProviderConfig, SmtpProviderConfig, provider_order,
};
use outreach_engine::content::{ContentGenerator, HttpContentGenerator};
use outreach_engine::sender::{FailoverSender, HttpApiProvider, SendProvider, SmtpProvider};
use outreach_engine::store::{LibSqlStore, Store};
use outreach_engine::worker::FollowUpWorker;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Install rustls crypto provider before any TLS usage
    rustls::crypto::ring::default_provider()
        .install_default()
        .expect("Failed to install rustls crypto provider");

    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_target(false)
        .init();

    let config = EngineConfig::from_env();

    let db_path =
        std::env::var("OUTREACH_DB_PATH").unwrap_or_else(|_| "./data/outreach.db".to_string());

    eprintln!("📮 Outreach Engine v{}", env!("CARGO_PKG_VERSION"));
    eprintln!("   Database: {}", db_path);
    eprintln!(
        "   Max attempts: {}, parallelism: {}",
        config.max_attempts, config.parallelism
    );

    // ── Store ────────────────────────────────────────────────────────
    let store: Arc<dyn Store> = Arc::new(
        LibSqlStore::new_local(std::path::Path::new(&db_path))
            .await
            .with_context(|| format!("Failed to open database at {db_path}"))?,
    );

    // ── Providers ────────────────────────────────────────────────────
    let mut providers: Vec<Arc<dyn SendProvider>> = Vec::new();
    for name in provider_order() {
        match name.as_str() {
            "smtp" => match SmtpProviderConfig::from_env() {
                Some(cfg) => {
                    eprintln!("   Provider: smtp ({}:{})", cfg.host, cfg.port);
                    providers.push(Arc::new(SmtpProvider::new(cfg)));
                }
                None => tracing::warn!("Provider 'smtp' listed but OUTREACH_SMTP_HOST not set"),
            },
            "http" => match HttpProviderConfig::from_env() {
                Some(cfg) => {
                    eprintln!("   Provider: http ({})", cfg.endpoint);
                    providers.push(Arc::new(HttpApiProvider::new(cfg)));
                }
                None => tracing::warn!("Provider 'http' listed but OUTREACH_API_URL not set"),
            },
            other => tracing::warn!(provider = %other, "Unknown provider in OUTREACH_PROVIDER_ORDER"),
        }
    }
    anyhow::ensure!(
        !providers.is_empty(),
        "No send providers configured — set OUTREACH_SMTP_HOST and/or OUTREACH_API_URL"
    );

    let sender = Arc::new(FailoverSender::new(providers, config.send_timeout));

    // ── Content service ──────────────────────────────────────────────
    let content_config = ContentServiceConfig::from_env()
        .context("OUTREACH_CONTENT_URL not set — the engine cannot author copy itself")?;
    let content: Arc<dyn ContentGenerator> = Arc::new(
        HttpContentGenerator::new(content_config, config.content_timeout)
            .context("Failed to build content service client")?,
    );

    // ── Worker ───────────────────────────────────────────────────────
    let bounces = Arc::new(BounceTracker::new(
        Arc::clone(&store),
        config.suppression.clone(),
    ));
    let worker = FollowUpWorker::new(store, sender, content, bounces, config);

    // One-shot by default; with OUTREACH_CRON set, keep running passes on
    // the schedule until interrupted.
    match std::env::var("OUTREACH_CRON").ok() {
        None => {
            let summary = worker.process_queue().await?;
            eprintln!(
                "   Pass complete: {} sent, {} failed, {} skipped",
                summary.sent, summary.failed, summary.skipped
            );
        }
        Some(expr) => {
            let schedule = cron::Schedule::from_str(&expr)
                .with_context(|| format!("Invalid OUTREACH_CRON expression: {expr}"))?;
            eprintln!("   Schedule: {}", expr);

            loop {
                let Some(next) = schedule.upcoming(Utc).next() else {
                    tracing::info!("Schedule has no further occurrences, exiting");
                    break;
                };
                let wait = (next - Utc::now())
                    .to_std()
                    .unwrap_or(std::time::Duration::ZERO);

                tokio::select! {
                    _ = tokio::time::sleep(wait) => {
                        if let Err(e) = worker.process_queue().await {
                            tracing::error!(error = %e, "Queue pass failed");
                        }
                    }
                    _ = tokio::signal::ctrl_c() => {
                        tracing::info!("Shutting down");
                        break;
                    }
                }
            }
        }
    }

    Ok(())
}
