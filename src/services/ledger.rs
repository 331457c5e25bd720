use std::collections::HashMap;

use chrono::{DateTime, Utc};
use sqlx::SqlitePool;
use tokio::sync::RwLock;

use crate::db::repository::SentReminderRepository;
use crate::error::AppResult;

/// Reminders already delivered, keyed by `(user_id, event_id)`.
///
/// Membership checks are served from memory; every record is also written to
/// `sent_reminders` so a restart does not re-send. Entries carry the instant
/// after which their event can no longer be reminder-eligible and are purged
/// by [`ReminderLedger::purge_expired`].
pub struct ReminderLedger {
    pool: SqlitePool,
    entries: RwLock<HashMap<(i64, String), i64>>,
}

impl ReminderLedger {
    /// Build the ledger from every stored entry still live at `now`.
    pub async fn load(pool: SqlitePool, now: DateTime<Utc>) -> AppResult<Self> {
        let rows = SentReminderRepository::list_active(&pool, now.timestamp()).await?;
        let entries: HashMap<_, _> = rows
            .into_iter()
            .map(|r| ((r.user_id, r.event_id), r.expires_at))
            .collect();

        tracing::info!("Reminder ledger warmed with {} entries", entries.len());
        Ok(Self {
            pool,
            entries: RwLock::new(entries),
        })
    }

    pub async fn contains(&self, user_id: i64, event_id: &str) -> bool {
        self.entries
            .read()
            .await
            .contains_key(&(user_id, event_id.to_string()))
    }

    /// Mark a reminder as delivered. The in-memory entry is kept even when
    /// the durable write fails, so this process still won't send it twice.
    pub async fn record(
        &self,
        user_id: i64,
        event_id: &str,
        expires_at: DateTime<Utc>,
    ) -> AppResult<()> {
        let expires_at = expires_at.timestamp();
        {
            let mut entries = self.entries.write().await;
            let slot = entries
                .entry((user_id, event_id.to_string()))
                .or_insert(expires_at);
            *slot = (*slot).max(expires_at);
        }

        SentReminderRepository::insert(&self.pool, user_id, event_id, expires_at).await
    }

    /// Drop entries that expired before `now`; returns how many were removed
    /// from memory.
    pub async fn purge_expired(&self, now: DateTime<Utc>) -> AppResult<usize> {
        let cutoff = now.timestamp();
        let removed = {
            let mut entries = self.entries.write().await;
            let before = entries.len();
            entries.retain(|_, expires_at| *expires_at >= cutoff);
            before - entries.len()
        };

        let deleted = SentReminderRepository::delete_expired(&self.pool, cutoff).await?;
        tracing::debug!(
            "Reminder ledger GC removed {} in-memory and {} stored entries",
            removed,
            deleted
        );
        Ok(removed)
    }

    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }
}
