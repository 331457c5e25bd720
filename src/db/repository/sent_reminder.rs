use chrono::Utc;
use sqlx::SqlitePool;

use crate::db::models::SentReminder;
use crate::error::{AppError, AppResult};

pub struct SentReminderRepository;

impl SentReminderRepository {
    /// Record a delivered reminder. Re-recording the same `(user_id, event_id)`
    /// is a no-op.
    pub async fn insert(
        pool: &SqlitePool,
        user_id: i64,
        event_id: &str,
        expires_at: i64,
    ) -> AppResult<()> {
        let now = Utc::now().naive_utc();
        sqlx::query(
            r#"
            INSERT OR IGNORE INTO sent_reminders (user_id, event_id, expires_at, sent_at)
            VALUES (?, ?, ?, ?)
            "#,
        )
        .bind(user_id)
        .bind(event_id)
        .bind(expires_at)
        .bind(now)
        .execute(pool)
        .await
        .map_err(AppError::Database)?;

        Ok(())
    }

    /// Entries that have not expired at `now` (unix seconds).
    pub async fn list_active(pool: &SqlitePool, now: i64) -> AppResult<Vec<SentReminder>> {
        sqlx::query_as::<_, SentReminder>(
            r#"
            SELECT user_id, event_id, expires_at, sent_at
            FROM sent_reminders
            WHERE expires_at >= ?
            "#,
        )
        .bind(now)
        .fetch_all(pool)
        .await
        .map_err(AppError::Database)
    }

    /// Delete entries with `expires_at < now`; returns how many were removed.
    pub async fn delete_expired(pool: &SqlitePool, now: i64) -> AppResult<u64> {
        let result = sqlx::query("DELETE FROM sent_reminders WHERE expires_at < ?")
            .bind(now)
            .execute(pool)
            .await
            .map_err(AppError::Database)?;

        Ok(result.rows_affected())
    }
}
