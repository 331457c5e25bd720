use async_trait::async_trait;
use teloxide::prelude::*;
use teloxide::types::{BotCommand, ChatId};

use crate::error::{AppError, AppResult};
use crate::i18n;
use crate::services::notifications::Notifier;

#[derive(Clone)]
pub struct TelegramService {
    bot: Bot,
}

impl TelegramService {
    pub async fn new(token: String) -> AppResult<Self> {
        let bot = Bot::new(token);

        // Verify the bot token by getting bot info
        match bot.get_me().await {
            Ok(me) => {
                tracing::info!("Telegram bot initialized: @{}", me.username());
                Ok(Self { bot })
            }
            Err(e) => {
                tracing::error!("Failed to initialize Telegram bot: {}", e);
                Err(AppError::Telegram(format!(
                    "Failed to initialize bot: {}",
                    e
                )))
            }
        }
    }

    pub async fn send_message(&self, chat_id: i64, text: &str) -> AppResult<i32> {
        match self
            .bot
            .send_message(ChatId(chat_id), text)
            .disable_web_page_preview(true)
            .await
        {
            Ok(sent_message) => {
                tracing::debug!(
                    "Telegram message sent to {}: message_id={}",
                    chat_id,
                    sent_message.id
                );
                Ok(sent_message.id.0)
            }
            Err(e) => {
                tracing::warn!("Failed to send Telegram message to {}: {}", chat_id, e);
                Err(AppError::Telegram(format!("Failed to send message: {}", e)))
            }
        }
    }

    /// Publish the command menu shown next to the message input.
    pub async fn register_commands(&self) -> AppResult<()> {
        let commands = ["start", "calendar", "events", "status", "login", "help"]
            .into_iter()
            .map(|c| BotCommand::new(c, i18n::t(&format!("command.{}", c))))
            .collect::<Vec<_>>();

        self.bot
            .set_my_commands(commands)
            .await
            .map_err(|e| AppError::Telegram(format!("Failed to set bot commands: {}", e)))?;
        Ok(())
    }

    pub fn get_bot(&self) -> &Bot {
        &self.bot
    }
}

#[async_trait]
impl Notifier for TelegramService {
    async fn send_text(&self, chat_id: i64, text: &str) -> AppResult<()> {
        self.send_message(chat_id, text).await.map(|_| ())
    }
}
