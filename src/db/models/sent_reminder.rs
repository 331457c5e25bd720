use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

/// One delivered reminder. `expires_at` is a unix timestamp after which the
/// event can no longer fall into the lookahead window.
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct SentReminder {
    pub user_id: i64,
    pub event_id: String,
    pub expires_at: i64,
    pub sent_at: NaiveDateTime,
}
