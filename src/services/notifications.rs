use async_trait::async_trait;

use crate::error::AppResult;

/// Outbound message delivery to a user's chat.
///
/// Implementations report failure instead of panicking; callers decide whether
/// a failed send is retried.
#[async_trait]
pub trait Notifier: Send + Sync + 'static {
    async fn send_text(&self, chat_id: i64, text: &str) -> AppResult<()>;
}
