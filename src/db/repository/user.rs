use chrono::Utc;
use sqlx::SqlitePool;

use crate::db::models::User;
use crate::error::{AppError, AppResult};

// ============================================================================
// User Repository
// ============================================================================

pub struct UserRepository;

impl UserRepository {
    pub async fn find_by_id(pool: &SqlitePool, telegram_id: i64) -> AppResult<Option<User>> {
        sqlx::query_as::<_, User>(
            r#"
            SELECT telegram_id, credentials_json, lang, created_at, updated_at
            FROM users
            WHERE telegram_id = ?
            "#,
        )
        .bind(telegram_id)
        .fetch_optional(pool)
        .await
        .map_err(AppError::Database)
    }

    /// Stored credential JSON for the user, if any.
    pub async fn get_credentials(pool: &SqlitePool, telegram_id: i64) -> AppResult<Option<String>> {
        let value: Option<Option<String>> =
            sqlx::query_scalar("SELECT credentials_json FROM users WHERE telegram_id = ?")
                .bind(telegram_id)
                .fetch_optional(pool)
                .await
                .map_err(AppError::Database)?;

        Ok(value.flatten())
    }

    /// Insert or overwrite the credential JSON for one user. A single statement,
    /// so concurrent calls for the same user resolve to last-write-wins and
    /// never produce a second row.
    pub async fn upsert_credentials(
        pool: &SqlitePool,
        telegram_id: i64,
        credentials_json: &str,
    ) -> AppResult<()> {
        let now = Utc::now().naive_utc();
        sqlx::query(
            r#"
            INSERT INTO users (telegram_id, credentials_json, created_at, updated_at)
            VALUES (?, ?, ?, ?)
            ON CONFLICT(telegram_id) DO UPDATE SET
                credentials_json = excluded.credentials_json,
                updated_at = excluded.updated_at
            "#,
        )
        .bind(telegram_id)
        .bind(credentials_json)
        .bind(now)
        .bind(now)
        .execute(pool)
        .await
        .map_err(AppError::Database)?;

        Ok(())
    }

    /// Remember the user's preferred language, creating the row if needed.
    pub async fn upsert_lang(pool: &SqlitePool, telegram_id: i64, lang: &str) -> AppResult<()> {
        let now = Utc::now().naive_utc();
        sqlx::query(
            r#"
            INSERT INTO users (telegram_id, lang, created_at, updated_at)
            VALUES (?, ?, ?, ?)
            ON CONFLICT(telegram_id) DO UPDATE SET
                lang = excluded.lang,
                updated_at = excluded.updated_at
            "#,
        )
        .bind(telegram_id)
        .bind(lang)
        .bind(now)
        .bind(now)
        .execute(pool)
        .await
        .map_err(AppError::Database)?;

        Ok(())
    }

    pub async fn get_lang(pool: &SqlitePool, telegram_id: i64) -> AppResult<Option<String>> {
        let value: Option<Option<String>> =
            sqlx::query_scalar("SELECT lang FROM users WHERE telegram_id = ?")
                .bind(telegram_id)
                .fetch_optional(pool)
                .await
                .map_err(AppError::Database)?;

        Ok(value.flatten())
    }

    /// Ids of every user that completed the handshake at least once.
    pub async fn list_with_credentials(pool: &SqlitePool) -> AppResult<Vec<i64>> {
        sqlx::query_scalar(
            r#"
            SELECT telegram_id
            FROM users
            WHERE credentials_json IS NOT NULL
            ORDER BY telegram_id
            "#,
        )
        .fetch_all(pool)
        .await
        .map_err(AppError::Database)
    }
}
