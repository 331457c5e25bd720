use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

/// A Telegram user known to the bot.
///
/// `credentials_json` is the serialized `CredentialBlob`; it is `NULL` until the
/// user completes the authorization handshake.
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct User {
    pub telegram_id: i64,
    #[serde(skip_serializing)]
    pub credentials_json: Option<String>,
    pub lang: Option<String>,
    pub created_at: NaiveDateTime,
    pub updated_at: NaiveDateTime,
}

impl User {
    pub fn has_credentials(&self) -> bool {
        self.credentials_json.is_some()
    }
}
