//! Initialization helpers for the application:
//! - database connection + migrations
//! - background worker spawn helpers
//!
//! This module keeps `main.rs` down to wiring.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use chrono::Utc;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;

use crate::config::{Config, ReminderConfig};
use crate::services::ledger::ReminderLedger;
use crate::services::reminders::ReminderScheduler;

/// Redact potentially sensitive information from a database URL before logging.
///
/// Attempts to parse the URL and remove userinfo (username:password) components.
/// Falls back to removing everything before '@' or returning "(redacted)".
pub fn redact_db_url(db_url: &str) -> String {
    if let Ok(url) = url::Url::parse(db_url) {
        let scheme = url.scheme();
        let host = url.host_str().unwrap_or("");
        let port_part = url.port().map(|p| format!(":{}", p)).unwrap_or_default();
        format!("{}://{}{}{}", scheme, host, port_part, url.path())
    } else if let Some(at_pos) = db_url.find('@') {
        format!("(redacted){}", &db_url[at_pos + 1..])
    } else {
        "(redacted)".to_string()
    }
}

/// Open the SQLite pool (creating the file and its directory when missing)
/// and run migrations.
pub async fn init_db(config: &Config) -> Result<sqlx::SqlitePool> {
    let db_url = &config.database.url;
    tracing::info!("Connecting to database: {}", redact_db_url(db_url));

    let db_path = db_url.strip_prefix("sqlite://").unwrap_or(db_url);
    let db_file_path = Path::new(db_path);

    if let Some(parent) = db_file_path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent).map_err(|e| {
                anyhow::anyhow!(
                    "Failed to create database directory {}: {}",
                    parent.display(),
                    e
                )
            })?;
        }
    }
    let existed = db_file_path.exists();

    let connect_options = sqlx::sqlite::SqliteConnectOptions::new()
        .filename(db_path)
        .create_if_missing(true);

    let pool = sqlx::sqlite::SqlitePoolOptions::new()
        .max_connections(config.database.max_connections)
        .connect_with(connect_options)
        .await?;

    if existed {
        tracing::info!("Opened database file: {}", db_file_path.display());
    } else {
        tracing::info!("Created database file: {}", db_file_path.display());
    }

    tracing::info!("Running database migrations");
    sqlx::migrate!("./migrations").run(&pool).await?;

    Ok(pool)
}

/// Spawn the reminder loop and the ledger garbage collector. Each worker
/// listens on `shutdown` and exits at its next wait point.
pub fn spawn_background_workers(
    state: Arc<crate::AppState>,
    shutdown: broadcast::Sender<()>,
) -> Vec<JoinHandle<()>> {
    let reminders = &state.config.reminders;
    let mut handles = Vec::new();

    if reminders.enabled {
        handles.push(spawn_reminder_loop(
            state.scheduler.clone(),
            reminders,
            shutdown.subscribe(),
        ));
    } else {
        tracing::warn!("Reminders are disabled by configuration");
    }

    handles.push(spawn_ledger_gc(
        state.ledger.clone(),
        Duration::from_secs(reminders.ledger_gc_interval_seconds.max(1)),
        shutdown.subscribe(),
    ));

    handles
}

/// Run a tick after the first delay and then once per poll interval.
pub fn spawn_reminder_loop(
    scheduler: Arc<ReminderScheduler>,
    config: &ReminderConfig,
    mut shutdown_rx: broadcast::Receiver<()>,
) -> JoinHandle<()> {
    let first_delay = Duration::from_secs(config.first_tick_delay_seconds);
    let interval = Duration::from_secs(config.poll_interval_seconds.max(1));

    tokio::spawn(async move {
        tracing::info!(
            "Reminder loop starts in {}s, then every {}s",
            first_delay.as_secs(),
            interval.as_secs()
        );
        let mut wait = first_delay;
        loop {
            tokio::select! {
                _ = shutdown_rx.recv() => {
                    tracing::info!("Reminder loop shutting down");
                    break;
                }
                _ = tokio::time::sleep(wait) => {}
            }

            let report = scheduler.tick().await;
            tracing::debug!(
                users = report.users,
                sent = report.sent,
                already_sent = report.already_sent,
                "Reminder tick finished"
            );
            wait = interval;
        }
    })
}

/// Periodically drop ledger entries whose events can no longer be due.
pub fn spawn_ledger_gc(
    ledger: Arc<ReminderLedger>,
    interval: Duration,
    mut shutdown_rx: broadcast::Receiver<()>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            tokio::select! {
                _ = shutdown_rx.recv() => {
                    tracing::info!("Ledger GC worker shutting down");
                    break;
                }
                _ = tokio::time::sleep(interval) => {}
            }

            match ledger.purge_expired(Utc::now()).await {
                Ok(0) => {}
                Ok(removed) => tracing::info!("Ledger GC removed {} expired entries", removed),
                Err(e) => tracing::warn!("Ledger GC failed: {}", e),
            }
        }
    })
}
