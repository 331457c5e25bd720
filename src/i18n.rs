/*
Bot message catalogue.

This module provides:
- An embedded translations store for RU/EN (compile-time embedded JSON).
- `tr` to look up a message by key for a given language, with optional params.
- `t` / `t_with` convenience wrappers using the default language (DEFAULT_LANG).

Usage:
    use crate::i18n;
    let msg = i18n::tr(Some("en"), "auth.login_required", None);
    let msg = i18n::t_with("reminder.timed", &[("summary", "Standup"), ("range", "10:00 - 10:15")]);

Notes:
- Placeholders in translation strings use single-brace format: `{name}`.
- Default language is `ru`. If a key is missing for the requested language,
  the default language is used.
*/

use std::collections::HashMap;
use std::sync::OnceLock;

pub const DEFAULT_LANG: &str = "ru";

static TRANSLATIONS: OnceLock<HashMap<String, HashMap<String, String>>> = OnceLock::new();

const RU_JSON: &str = r#"
{
  "bot.start": "Привет, {name}! 👋\n\nЯ Hope — твой ассистент с Календарем. 🤖📅\n\nЧто я умею:\n🔹 Записывать события в Google Calendar (\"Запиши к врачу завтра в 10\")\n🔹 Напоминать о встречах за {minutes} минут\n🔹 Удалять события (\"Удали встречу с врачом\")\n🔹 Показывать твой график\n\nС чего начать:\n1. Напиши /login чтобы авторизоваться в Google.\n2. Затем просто пиши мне, что нужно сделать!",
  "bot.help": "Справка по командам: ℹ️\n\n/start — Перезапустить бота\n/login — Авторизация в Google Calendar\n/events — Показать ближайшие события\n/calendar — Выбрать дату в календаре\n/status — Проверить статус подключения\n/help — Показать это сообщение\n\nПримеры запросов:\n— \"Запиши тренировку в четверг в 19:00 на 1.5 часа\"\n— \"Какие планы на завтра?\"\n— \"Удали обед с коллегами\"",
  "bot.login": "🔗 Авторизация\n\nПерейди по ссылке, авторизуйся и пришли мне код подтверждения:\n{url}",
  "bot.generic_error": "Ой, что-то пошло не так.",
  "bot.assistant_disabled": "Ассистент сейчас недоступен. Используй /events и /calendar.",
  "auth.login_required": "⛔️ Сначала нужно авторизоваться. Напиши /login",
  "auth.reauth_required": "⛔️ Доступ к Google Calendar отозван или истёк. Авторизуйся заново: /login",
  "auth.temporarily_unavailable": "⚠️ Не удалось обновить доступ к Google Calendar. Попробуй позже.",
  "auth.success": "Отлично! Ты успешно авторизован. Теперь можешь просить меня записать что-то в календарь.",
  "auth.failed": "❌ Не удалось авторизоваться. Ошибка: {err}",
  "status.authorized": "✅ Статус: Авторизован в Google Calendar.",
  "status.reauth_required": "⚠️ Статус: Требуется повторная авторизация. Используйте /login.",
  "status.temporarily_unavailable": "⚠️ Статус: Не удалось обновить токен, попробуйте позже.",
  "status.not_authorized": "❌ Статус: Не авторизован. Используйте /login.",
  "calendar.pick_date": "📅 Выберите дату:",
  "calendar.invalid_selection": "Не удалось распознать выбор. Откройте календарь заново: /calendar",
  "calendar.prev": "◀️ Пред.",
  "calendar.today": "Сегодня",
  "calendar.next": "След. ▶️",
  "calendar.months": "Январь,Февраль,Март,Апрель,Май,Июнь,Июль,Август,Сентябрь,Октябрь,Ноябрь,Декабрь",
  "calendar.weekdays": "Пн,Вт,Ср,Чт,Пт,Сб,Вс",
  "reminder.timed": "⏰ Напоминание! Скоро: {summary}: {range}",
  "reminder.all_day": "⏰ Напоминание! Сегодня: {summary}",
  "events.untitled": "Без названия",
  "events.none_upcoming": "Нет предстоящих событий.",
  "events.upcoming_header": "Предстоящие события:",
  "events.line_timed": "- Дата/Время: {when} | Название: \"{summary}\" | ID: {id}",
  "events.line_all_day": "- Дата: {when} | Название: \"{summary}\" | ID: {id}",
  "events.fetch_failed": "Ошибка получения списка событий: {err}",
  "events.none_on_date": "На {date} событий нет.",
  "events.on_date_header": "События на {date}:",
  "events.day_line_timed": "- {range} {summary}",
  "events.day_line_all_day": "- Весь день: {summary}",
  "tool.create.success": "Событие '{title}' успешно создано в {when}. Link: {link}",
  "tool.create.failed": "Не удалось создать событие. Ошибка: {err}",
  "tool.delete.success": "Событие '{summary}' (ID: {id}) успешно удалено.",
  "tool.delete.no_events": "Предстоящих событий не найдено.",
  "tool.delete.not_found": "Не найдено предстоящего события, содержащего '{query}' в названии.",
  "tool.delete.failed": "Не удалось удалить событие. Ошибка: {err}",
  "tool.unknown": "Неизвестная функция: {name}",
  "command.start": "Запустить бота",
  "command.calendar": "📅 Календарь",
  "command.events": "Ближайшие события",
  "command.status": "Статус подключения",
  "command.login": "Авторизация в Google",
  "command.help": "Справка",
  "oauth.page_title": "Hope — авторизация",
  "oauth.code_intro": "Скопируйте этот код и отправьте его боту в Telegram:",
  "oauth.denied": "Авторизация отклонена: {err}",
  "oauth.missing_code": "Код авторизации не получен."
}
"#;

const EN_JSON: &str = r#"
{
  "bot.start": "Hi, {name}! 👋\n\nI'm Hope, your calendar assistant. 🤖📅\n\nWhat I can do:\n🔹 Add events to Google Calendar (\"Book the dentist tomorrow at 10\")\n🔹 Remind you about meetings {minutes} minutes ahead\n🔹 Delete events (\"Delete the dentist appointment\")\n🔹 Show your schedule\n\nGetting started:\n1. Send /login to connect your Google account.\n2. Then just tell me what to do!",
  "bot.help": "Commands: ℹ️\n\n/start — Restart the bot\n/login — Connect Google Calendar\n/events — Show upcoming events\n/calendar — Pick a date in the calendar\n/status — Check connection status\n/help — Show this message\n\nExample requests:\n— \"Add a workout on Thursday at 19:00 for 1.5 hours\"\n— \"What are my plans for tomorrow?\"\n— \"Delete lunch with colleagues\"",
  "bot.login": "🔗 Authorization\n\nOpen the link, sign in and send me the confirmation code:\n{url}",
  "bot.generic_error": "Oops, something went wrong.",
  "bot.assistant_disabled": "The assistant is unavailable right now. Use /events and /calendar.",
  "auth.login_required": "⛔️ You need to sign in first. Send /login",
  "auth.reauth_required": "⛔️ Google Calendar access was revoked or has expired. Please sign in again: /login",
  "auth.temporarily_unavailable": "⚠️ Could not refresh Google Calendar access. Please try again later.",
  "auth.success": "Great! You are signed in. Now you can ask me to add things to your calendar.",
  "auth.failed": "❌ Sign-in failed. Error: {err}",
  "status.authorized": "✅ Status: Connected to Google Calendar.",
  "status.reauth_required": "⚠️ Status: Re-authorization required. Use /login.",
  "status.temporarily_unavailable": "⚠️ Status: Token refresh failed, try again later.",
  "status.not_authorized": "❌ Status: Not connected. Use /login.",
  "calendar.pick_date": "📅 Pick a date:",
  "calendar.invalid_selection": "That selection could not be read. Open the calendar again: /calendar",
  "calendar.prev": "◀️ Prev",
  "calendar.today": "Today",
  "calendar.next": "Next ▶️",
  "calendar.months": "January,February,March,April,May,June,July,August,September,October,November,December",
  "calendar.weekdays": "Mo,Tu,We,Th,Fr,Sa,Su",
  "reminder.timed": "⏰ Reminder! Coming up: {summary}: {range}",
  "reminder.all_day": "⏰ Reminder! Today: {summary}",
  "events.untitled": "Untitled",
  "events.none_upcoming": "No upcoming events.",
  "events.upcoming_header": "Upcoming events:",
  "events.line_timed": "- Date/Time: {when} | Title: \"{summary}\" | ID: {id}",
  "events.line_all_day": "- Date: {when} | Title: \"{summary}\" | ID: {id}",
  "events.fetch_failed": "Failed to fetch events: {err}",
  "events.none_on_date": "No events on {date}.",
  "events.on_date_header": "Events on {date}:",
  "events.day_line_timed": "- {range} {summary}",
  "events.day_line_all_day": "- All day: {summary}",
  "tool.create.success": "Event '{title}' created for {when}. Link: {link}",
  "tool.create.failed": "Failed to create the event. Error: {err}",
  "tool.delete.success": "Event '{summary}' (ID: {id}) deleted.",
  "tool.delete.no_events": "No upcoming events found.",
  "tool.delete.not_found": "No upcoming event with '{query}' in its title.",
  "tool.delete.failed": "Failed to delete the event. Error: {err}",
  "tool.unknown": "Unknown function: {name}",
  "command.start": "Start the bot",
  "command.calendar": "📅 Calendar",
  "command.events": "Upcoming events",
  "command.status": "Connection status",
  "command.login": "Connect Google",
  "command.help": "Help",
  "oauth.page_title": "Hope — authorization",
  "oauth.code_intro": "Copy this code and send it to the bot in Telegram:",
  "oauth.denied": "Authorization was denied: {err}",
  "oauth.missing_code": "No authorization code received."
}
"#;

fn build_translations() -> HashMap<String, HashMap<String, String>> {
    let mut out: HashMap<String, HashMap<String, String>> = HashMap::new();

    // The catalogues are compile-time constants covered by tests; a parse
    // failure degrades to key passthrough instead of aborting.
    for (lang, json) in [("ru", RU_JSON), ("en", EN_JSON)] {
        match serde_json::from_str::<HashMap<String, String>>(json) {
            Ok(map) => {
                out.insert(lang.to_string(), map);
            }
            Err(e) => {
                tracing::error!("failed to parse {} translations: {}", lang, e);
                out.insert(lang.to_string(), HashMap::new());
            }
        }
    }

    out
}

/// Returns the global translations map (lang -> (key -> message)).
fn translations() -> &'static HashMap<String, HashMap<String, String>> {
    TRANSLATIONS.get_or_init(build_translations)
}

/// Normalize a language tag into a short, lowercase code (e.g. "en-US" -> "en").
///
/// Telegram reports `language_code` as an IETF tag; translations are keyed by
/// the primary subtag only.
pub fn normalize_language(lang: &str) -> String {
    lang.split('-').next().unwrap_or(lang).to_lowercase()
}

/// Returns true if the given language code has a catalogue (e.g. "ru", "en").
pub fn is_supported_language(lang: &str) -> bool {
    translations().contains_key(lang)
}

/// Picks the catalogue for a Telegram `language_code`, falling back to
/// DEFAULT_LANG for anything unsupported.
pub fn resolve_language(code: Option<&str>) -> String {
    code.map(normalize_language)
        .filter(|l| is_supported_language(l))
        .unwrap_or_else(|| DEFAULT_LANG.to_string())
}

/// Translate a key using an explicit language (or default if None).
///
/// Placeholders `{name}` are replaced from `params`. Missing keys fall back to
/// the default language and then to the key itself.
pub fn tr(lang: Option<&str>, key: &str, params: Option<&[(&str, &str)]>) -> String {
    let map = translations();

    let desired = lang.unwrap_or(DEFAULT_LANG);

    let val = map
        .get(desired)
        .and_then(|m| m.get(key))
        .cloned()
        .or_else(|| map.get(DEFAULT_LANG).and_then(|m| m.get(key)).cloned())
        .unwrap_or_else(|| key.to_string());

    if let Some(params) = params {
        let mut s = val;
        for (k, v) in params {
            s = s.replace(&format!("{{{}}}", k), v);
        }
        s
    } else {
        val
    }
}

/// Convenience wrapper: translate using default language (DEFAULT_LANG).
pub fn t(key: &str) -> String {
    tr(None, key, None)
}

/// Convenience wrapper with params (default language).
pub fn t_with(key: &str, params: &[(&str, &str)]) -> String {
    tr(None, key, Some(params))
}

/// Comma-separated list entry, e.g. a month or weekday name.
pub fn list_item(lang: &str, key: &str, index: usize) -> String {
    tr(Some(lang), key, None)
        .split(',')
        .nth(index)
        .map(str::to_string)
        .unwrap_or_default()
}
