use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use sqlx::SqlitePool;

use crate::db::repository::UserRepository;
use crate::error::{AppError, AppResult};

/// Seconds shaved off the provider-reported lifetime so a token is refreshed
/// shortly before it actually stops working.
const EXPIRY_SKEW_SECS: i64 = 60;

/// Serialized authorization state of one user against the calendar provider.
#[derive(Clone, PartialEq, Serialize, Deserialize)]
pub struct CredentialBlob {
    pub access_token: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub refresh_token: Option<String>,
    /// `None` means the provider did not report a lifetime; treated as valid.
    #[serde(default)]
    pub expires_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub scopes: Vec<String>,
}

impl std::fmt::Debug for CredentialBlob {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CredentialBlob")
            .field("access_token", &"<redacted>")
            .field(
                "refresh_token",
                &self.refresh_token.as_ref().map(|_| "<redacted>"),
            )
            .field("expires_at", &self.expires_at)
            .field("scopes", &self.scopes)
            .finish()
    }
}

impl CredentialBlob {
    /// Build a blob from a token endpoint answer issued at `now`.
    pub fn issued_at(
        now: DateTime<Utc>,
        access_token: impl Into<String>,
        refresh_token: Option<String>,
        expires_in_secs: Option<i64>,
        scopes: Vec<String>,
    ) -> Self {
        Self {
            access_token: access_token.into(),
            refresh_token,
            expires_at: expires_in_secs
                .map(|secs| now + Duration::seconds(secs) - Duration::seconds(EXPIRY_SKEW_SECS)),
            scopes,
        }
    }

    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        match self.expires_at {
            Some(expires_at) => now >= expires_at,
            None => false,
        }
    }

    pub fn has_refresh_token(&self) -> bool {
        self.refresh_token
            .as_deref()
            .map(|t| !t.is_empty())
            .unwrap_or(false)
    }

    pub fn status_at(&self, now: DateTime<Utc>) -> CredentialStatus {
        if !self.is_expired_at(now) {
            CredentialStatus::Valid
        } else if self.has_refresh_token() {
            CredentialStatus::ExpiredRefreshable
        } else {
            CredentialStatus::ExpiredTerminal
        }
    }
}

/// Derived state of a user's stored credential.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CredentialStatus {
    Absent,
    Valid,
    ExpiredRefreshable,
    ExpiredTerminal,
}

impl CredentialStatus {
    pub fn of(blob: Option<&CredentialBlob>, now: DateTime<Utc>) -> Self {
        match blob {
            Some(blob) => blob.status_at(now),
            None => CredentialStatus::Absent,
        }
    }
}

/// Durable per-user credential records, one row per user.
#[derive(Clone)]
pub struct CredentialStore {
    pool: SqlitePool,
}

impl CredentialStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Overwrite the user's credential, creating the record on first save.
    pub async fn upsert(&self, user_id: i64, blob: &CredentialBlob) -> AppResult<()> {
        let json = serde_json::to_string(blob)?;
        UserRepository::upsert_credentials(&self.pool, user_id, &json).await
    }

    pub async fn get(&self, user_id: i64) -> AppResult<Option<CredentialBlob>> {
        let Some(json) = UserRepository::get_credentials(&self.pool, user_id).await? else {
            return Ok(None);
        };

        serde_json::from_str(&json).map(Some).map_err(|e| {
            tracing::warn!("Stored credential for user {} is unreadable: {}", user_id, e);
            AppError::Serialization(e)
        })
    }

    /// Users that have a stored credential, in no meaningful order.
    pub async fn list_with_credentials(&self) -> AppResult<Vec<i64>> {
        UserRepository::list_with_credentials(&self.pool).await
    }

    pub async fn status(&self, user_id: i64, now: DateTime<Utc>) -> AppResult<CredentialStatus> {
        let blob = self.get(user_id).await?;
        Ok(CredentialStatus::of(blob.as_ref(), now))
    }
}
