pub mod assistant;
pub mod auth;
pub mod bot;
pub mod calendar;
pub mod credentials;
pub mod google_calendar;
pub mod google_oauth;
pub mod init;
pub mod keyboard;
pub mod ledger;
pub mod notifications;
pub mod refresh_gate;
pub mod reminders;
pub mod telegram;

use std::future::Future;
use std::time::Duration;

use crate::error::{AppError, AppResult};

/// Bound an external call. `what` names the call in the resulting error.
pub async fn with_timeout<T, F>(what: &str, limit: Duration, fut: F) -> AppResult<T>
where
    F: Future<Output = AppResult<T>>,
{
    match tokio::time::timeout(limit, fut).await {
        Ok(result) => result,
        Err(_) => Err(AppError::Timeout(format!(
            "{} did not complete within {}s",
            what,
            limit.as_secs()
        ))),
    }
}
