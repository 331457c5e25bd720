//! Telegram update handling: commands, free text and date-picker callbacks.

use std::error::Error;
use std::sync::Arc;

use chrono::{Datelike, NaiveDate};
use sqlx::SqlitePool;
use teloxide::dispatching::{DefaultKey, UpdateHandler};
use teloxide::error_handlers::LoggingErrorHandler;
use teloxide::prelude::*;
use teloxide::types::User;
use teloxide::utils::command::BotCommands;

use crate::db::repository::UserRepository;
use crate::i18n;
use crate::services::assistant::Assistant;
use crate::services::auth::{looks_like_auth_code, AuthorizationHandshake};
use crate::services::calendar::CalendarTools;
use crate::services::keyboard::{build_calendar, shift_month, CalendarAction, CalendarCallback};
use crate::services::refresh_gate::{CredentialGate, Resolution};

pub type HandlerError = Box<dyn Error + Send + Sync + 'static>;
pub type HandlerResult = Result<(), HandlerError>;

const EVENTS_COMMAND_LIMIT: usize = 10;

#[derive(BotCommands, Clone, Debug, PartialEq)]
#[command(rename_rule = "lowercase")]
pub enum Command {
    #[command(description = "start the bot")]
    Start,
    #[command(description = "show help")]
    Help,
    #[command(description = "connect Google Calendar")]
    Login,
    #[command(description = "list upcoming events")]
    Events,
    #[command(description = "show connection status")]
    Status,
    #[command(description = "pick a date")]
    Calendar,
}

/// Everything the handlers need, injected into the dispatcher.
pub struct BotContext {
    pub pool: SqlitePool,
    pub gate: CredentialGate,
    pub handshake: AuthorizationHandshake,
    pub tools: CalendarTools,
    pub assistant: Option<Arc<Assistant>>,
    pub reminder_minutes: i64,
}

pub fn schema() -> UpdateHandler<HandlerError> {
    let commands = teloxide::filter_command::<Command, _>().endpoint(on_command);

    let messages = Update::filter_message()
        .branch(commands)
        .branch(dptree::endpoint(on_text));

    let callbacks = Update::filter_callback_query()
        .filter(|q: CallbackQuery| {
            q.data
                .as_deref()
                .map(CalendarCallback::is_calendar_data)
                .unwrap_or(false)
        })
        .endpoint(on_calendar_callback);

    dptree::entry().branch(messages).branch(callbacks)
}

pub fn build_dispatcher(
    bot: Bot,
    ctx: Arc<BotContext>,
) -> Dispatcher<Bot, HandlerError, DefaultKey> {
    Dispatcher::builder(bot, schema())
        .dependencies(dptree::deps![ctx])
        .default_handler(|update| async move {
            tracing::trace!("Unhandled update {:?}", update.id);
        })
        .error_handler(LoggingErrorHandler::with_custom_text(
            "Error in the Telegram dispatcher",
        ))
        .build()
}

// ----------------------------------------------------------------------------
// Endpoints. Failures are logged and answered here so the dispatcher keeps
// going.
// ----------------------------------------------------------------------------

async fn on_command(bot: Bot, msg: Message, cmd: Command, ctx: Arc<BotContext>) -> HandlerResult {
    let lang = user_lang(&ctx, msg.from()).await;
    if let Err(e) = handle_command(&bot, &msg, cmd.clone(), &ctx, &lang).await {
        tracing::error!("Command {:?} failed in chat {}: {}", cmd, msg.chat.id, e);
        report_failure(&bot, msg.chat.id, &lang).await;
    }
    Ok(())
}

async fn on_text(bot: Bot, msg: Message, ctx: Arc<BotContext>) -> HandlerResult {
    let Some(text) = msg.text() else {
        return Ok(());
    };
    let lang = user_lang(&ctx, msg.from()).await;
    if let Err(e) = handle_text(&bot, &msg, text, &ctx, &lang).await {
        tracing::error!("Message handling failed in chat {}: {}", msg.chat.id, e);
        report_failure(&bot, msg.chat.id, &lang).await;
    }
    Ok(())
}

async fn on_calendar_callback(bot: Bot, q: CallbackQuery, ctx: Arc<BotContext>) -> HandlerResult {
    let lang = user_lang(&ctx, Some(&q.from)).await;
    if let Err(e) = handle_callback(&bot, &q, &ctx, &lang).await {
        tracing::error!("Calendar callback failed for user {}: {}", q.from.id, e);
        let chat_id = q
            .message
            .as_ref()
            .map(|m| m.chat.id)
            .unwrap_or(ChatId(q.from.id.0 as i64));
        report_failure(&bot, chat_id, &lang).await;
    }
    Ok(())
}

async fn report_failure(bot: &Bot, chat_id: ChatId, lang: &str) {
    if let Err(e) = bot
        .send_message(chat_id, i18n::tr(Some(lang), "bot.generic_error", None))
        .await
    {
        tracing::warn!("Could not report failure to chat {}: {}", chat_id, e);
    }
}

// ----------------------------------------------------------------------------
// Handlers
// ----------------------------------------------------------------------------

async fn handle_command(
    bot: &Bot,
    msg: &Message,
    cmd: Command,
    ctx: &BotContext,
    lang: &str,
) -> HandlerResult {
    let Some(user) = msg.from() else {
        return Ok(());
    };
    let user_id = user.id.0 as i64;
    let lang_opt = Some(lang);

    let text = match cmd {
        Command::Start => {
            let detected = i18n::resolve_language(user.language_code.as_deref());
            if let Err(e) = UserRepository::upsert_lang(&ctx.pool, user_id, &detected).await {
                tracing::warn!("Could not store language for user {}: {}", user_id, e);
            }
            let minutes = ctx.reminder_minutes.to_string();
            i18n::tr(
                Some(detected.as_str()),
                "bot.start",
                Some(&[
                    ("name", user.first_name.as_str()),
                    ("minutes", minutes.as_str()),
                ]),
            )
        }
        Command::Help => i18n::tr(lang_opt, "bot.help", None),
        Command::Login => {
            let url = ctx.handshake.begin();
            i18n::tr(lang_opt, "bot.login", Some(&[("url", url.as_str())]))
        }
        Command::Events => match ctx.gate.resolve_detailed(user_id).await {
            Resolution::Valid(cred) => {
                ctx.tools
                    .list_upcoming(&cred, EVENTS_COMMAND_LIMIT, lang_opt)
                    .await
            }
            other => auth_prompt(&other, lang),
        },
        Command::Status => {
            let resolution = ctx.gate.resolve_detailed(user_id).await;
            i18n::tr(lang_opt, status_key(&resolution), None)
        }
        Command::Calendar => {
            let today = ctx.tools.today();
            bot.send_message(msg.chat.id, i18n::tr(lang_opt, "calendar.pick_date", None))
                .reply_markup(build_calendar(today.year(), today.month(), today, lang))
                .await?;
            return Ok(());
        }
    };

    bot.send_message(msg.chat.id, text)
        .disable_web_page_preview(true)
        .await?;
    Ok(())
}

async fn handle_text(
    bot: &Bot,
    msg: &Message,
    text: &str,
    ctx: &BotContext,
    lang: &str,
) -> HandlerResult {
    let Some(user) = msg.from() else {
        return Ok(());
    };
    let user_id = user.id.0 as i64;
    let lang_opt = Some(lang);

    let reply = if looks_like_auth_code(text) {
        match ctx.handshake.complete(user_id, text).await {
            Ok(()) => i18n::tr(lang_opt, "auth.success", None),
            Err(e) => i18n::tr(
                lang_opt,
                "auth.failed",
                Some(&[("err", e.to_string().as_str())]),
            ),
        }
    } else if text.starts_with('/') {
        i18n::tr(lang_opt, "bot.help", None)
    } else {
        match ctx.gate.resolve_detailed(user_id).await {
            Resolution::Valid(cred) => match &ctx.assistant {
                Some(assistant) => {
                    bot.send_chat_action(msg.chat.id, teloxide::types::ChatAction::Typing)
                        .await?;
                    assistant.reply(&cred, text, lang_opt).await?
                }
                None => i18n::tr(lang_opt, "bot.assistant_disabled", None),
            },
            other => auth_prompt(&other, lang),
        }
    };

    bot.send_message(msg.chat.id, reply)
        .disable_web_page_preview(true)
        .await?;
    Ok(())
}

async fn handle_callback(
    bot: &Bot,
    q: &CallbackQuery,
    ctx: &BotContext,
    lang: &str,
) -> HandlerResult {
    let data = q.data.as_deref().unwrap_or_default();
    let callback = match parse_callback(data, lang) {
        Ok(cb) => cb,
        Err(reply) => {
            tracing::warn!("Rejected calendar callback {:?} from user {}", data, q.from.id);
            bot.answer_callback_query(q.id.clone())
                .text(reply)
                .show_alert(true)
                .await?;
            return Ok(());
        }
    };
    bot.answer_callback_query(q.id.clone()).await?;

    let Some(message) = q.message.as_ref() else {
        return Ok(());
    };

    let today = ctx.tools.today();
    match callback.action {
        CalendarAction::Ignore => {}
        CalendarAction::Prev | CalendarAction::Next | CalendarAction::Today => {
            let (year, month) = navigation_target(&callback, today);
            if (year, month) != (callback.year, callback.month) {
                bot.edit_message_reply_markup(message.chat.id, message.id)
                    .reply_markup(build_calendar(year, month, today, lang))
                    .await?;
            }
        }
        CalendarAction::Day => {
            let Some(date) = callback.date() else {
                return Ok(());
            };
            let user_id = q.from.id.0 as i64;
            let text = match ctx.gate.resolve_detailed(user_id).await {
                Resolution::Valid(cred) => ctx.tools.events_for_date(&cred, date, Some(lang)).await,
                other => auth_prompt(&other, lang),
            };
            bot.send_message(message.chat.id, text).await?;
        }
    }
    Ok(())
}

// ----------------------------------------------------------------------------
// Helpers
// ----------------------------------------------------------------------------

/// Stored language first, then the client's language code.
async fn user_lang(ctx: &BotContext, user: Option<&User>) -> String {
    let Some(user) = user else {
        return i18n::DEFAULT_LANG.to_string();
    };
    match UserRepository::get_lang(&ctx.pool, user.id.0 as i64).await {
        Ok(Some(lang)) => i18n::resolve_language(Some(lang.as_str())),
        Ok(None) => i18n::resolve_language(user.language_code.as_deref()),
        Err(e) => {
            tracing::warn!("Could not load language for user {}: {}", user.id, e);
            i18n::resolve_language(user.language_code.as_deref())
        }
    }
}

fn auth_prompt(resolution: &Resolution, lang: &str) -> String {
    let key = match resolution {
        Resolution::Valid(_) | Resolution::Absent => "auth.login_required",
        Resolution::RefreshFailed { terminal: true } => "auth.reauth_required",
        Resolution::RefreshFailed { terminal: false } => "auth.temporarily_unavailable",
    };
    i18n::tr(Some(lang), key, None)
}

fn status_key(resolution: &Resolution) -> &'static str {
    match resolution {
        Resolution::Valid(_) => "status.authorized",
        Resolution::Absent => "status.not_authorized",
        Resolution::RefreshFailed { terminal: true } => "status.reauth_required",
        Resolution::RefreshFailed { terminal: false } => "status.temporarily_unavailable",
    }
}

/// Decode picker data; the error is the localized text shown to the user.
fn parse_callback(data: &str, lang: &str) -> Result<CalendarCallback, String> {
    data.parse::<CalendarCallback>().map_err(|e| {
        tracing::debug!("Calendar callback parse error: {}", e);
        i18n::tr(Some(lang), "calendar.invalid_selection", None)
    })
}

/// Month shown after a navigation button was pressed.
fn navigation_target(callback: &CalendarCallback, today: NaiveDate) -> (i32, u32) {
    match callback.action {
        CalendarAction::Prev => shift_month(callback.year, callback.month, -1),
        CalendarAction::Next => shift_month(callback.year, callback.month, 1),
        CalendarAction::Today => (today.year(), today.month()),
        CalendarAction::Ignore | CalendarAction::Day => (callback.year, callback.month),
    }
}
