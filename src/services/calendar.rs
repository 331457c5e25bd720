//! Calendar operations offered to the assistant and the chat commands.
//!
//! Every operation takes the caller's [`ResolvedCredential`] as an argument and
//! answers with user-facing text; provider errors are turned into text here.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, FixedOffset, NaiveDate, NaiveDateTime, NaiveTime, TimeZone, Utc};
use chrono_tz::Tz;
use serde_json::Value;

use crate::error::{AppError, AppResult};
use crate::i18n;
use crate::services::google_calendar::{
    CalendarEvent, CalendarProvider, EventQuery, EventTime, NewEvent,
};
use crate::services::refresh_gate::ResolvedCredential;
use crate::services::with_timeout;

pub const CREATE_EVENT: &str = "create_calendar_event";
pub const DELETE_EVENT: &str = "delete_calendar_event_by_summary";
pub const LIST_EVENTS: &str = "list_upcoming_events";

/// How many upcoming events are searched when deleting by title.
const DELETE_SEARCH_LIMIT: usize = 20;
const DEFAULT_LIST_LIMIT: usize = 10;
const MAX_LIST_LIMIT: usize = 50;

const NAIVE_FORMATS: [&str; 4] = [
    "%Y-%m-%dT%H:%M:%S",
    "%Y-%m-%dT%H:%M",
    "%Y-%m-%d %H:%M:%S",
    "%Y-%m-%d %H:%M",
];

/// Parse an ISO-8601 start time. Values without an offset are read in `tz`.
pub fn parse_start_time(value: &str, tz: &Tz) -> AppResult<(DateTime<FixedOffset>, bool)> {
    let value = value.trim();
    if let Ok(dt) = DateTime::parse_from_rfc3339(value) {
        return Ok((dt, false));
    }

    let naive = NAIVE_FORMATS
        .iter()
        .find_map(|fmt| NaiveDateTime::parse_from_str(value, fmt).ok())
        .or_else(|| {
            NaiveDate::parse_from_str(value, "%Y-%m-%d")
                .ok()
                .map(|d| d.and_time(NaiveTime::MIN))
        })
        .ok_or_else(|| AppError::BadRequest(format!("unrecognised start time '{}'", value)))?;

    let local = tz
        .from_local_datetime(&naive)
        .earliest()
        .ok_or_else(|| AppError::BadRequest(format!("'{}' does not exist in {}", value, tz)))?;
    Ok((local.fixed_offset(), true))
}

fn duration_from_hours(hours: f64) -> AppResult<chrono::Duration> {
    if !hours.is_finite() || hours <= 0.0 || hours > 24.0 * 31.0 {
        return Err(AppError::BadRequest(format!(
            "invalid duration: {} hours",
            hours
        )));
    }
    Ok(chrono::Duration::seconds((hours * 3600.0).round() as i64))
}

fn summary_or_untitled(event: &CalendarEvent, lang: Option<&str>) -> String {
    event
        .summary
        .as_deref()
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .unwrap_or_else(|| i18n::tr(lang, "events.untitled", None))
}

#[derive(Clone)]
pub struct CalendarTools {
    calendar: Arc<dyn CalendarProvider>,
    calendar_id: String,
    tz: Tz,
    timeout: Duration,
}

impl CalendarTools {
    pub fn new(
        calendar: Arc<dyn CalendarProvider>,
        calendar_id: impl Into<String>,
        tz: Tz,
        timeout: Duration,
    ) -> Self {
        Self {
            calendar,
            calendar_id: calendar_id.into(),
            tz,
            timeout,
        }
    }

    pub fn timezone(&self) -> Tz {
        self.tz
    }

    pub fn today(&self) -> NaiveDate {
        Utc::now().with_timezone(&self.tz).date_naive()
    }

    async fn list(
        &self,
        cred: &ResolvedCredential,
        time_min: DateTime<Utc>,
        time_max: Option<DateTime<Utc>>,
        max_results: Option<usize>,
    ) -> AppResult<Vec<CalendarEvent>> {
        let query = EventQuery {
            calendar_id: self.calendar_id.clone(),
            time_min,
            time_max,
            max_results,
        };
        with_timeout(
            "calendar list",
            self.timeout,
            self.calendar.list_events(cred, &query),
        )
        .await
    }

    pub async fn create_event(
        &self,
        cred: &ResolvedCredential,
        title: &str,
        start_time: &str,
        duration_hours: f64,
        lang: Option<&str>,
    ) -> String {
        match self.try_create_event(cred, title, start_time, duration_hours).await {
            Ok((start, link)) => {
                let when = start.format("%H:%M %d-%m-%Y").to_string();
                i18n::tr(
                    lang,
                    "tool.create.success",
                    Some(&[
                        ("title", title.trim()),
                        ("when", when.as_str()),
                        ("link", link.as_deref().unwrap_or("-")),
                    ]),
                )
            }
            Err(e) => {
                tracing::warn!("Failed to create event for user {}: {}", cred.user_id, e);
                i18n::tr(lang, "tool.create.failed", Some(&[("err", e.to_string().as_str())]))
            }
        }
    }

    async fn try_create_event(
        &self,
        cred: &ResolvedCredential,
        title: &str,
        start_time: &str,
        duration_hours: f64,
    ) -> AppResult<(DateTime<FixedOffset>, Option<String>)> {
        let title = title.trim();
        if title.is_empty() {
            return Err(AppError::BadRequest("event title is empty".to_string()));
        }
        let (start, was_naive) = parse_start_time(start_time, &self.tz)?;
        let end = start + duration_from_hours(duration_hours)?;

        let event = NewEvent {
            summary: title.to_string(),
            start,
            end,
            time_zone: was_naive.then(|| self.tz.name().to_string()),
        };

        let created = with_timeout(
            "calendar insert",
            self.timeout,
            self.calendar.insert_event(cred, &self.calendar_id, &event),
        )
        .await?;

        tracing::info!("Created event {} for user {}", created.id, cred.user_id);
        Ok((start, created.html_link))
    }

    pub async fn delete_event_by_summary(
        &self,
        cred: &ResolvedCredential,
        query: &str,
        lang: Option<&str>,
    ) -> String {
        let needle = query.trim().to_lowercase();
        let events = match self
            .list(cred, Utc::now(), None, Some(DELETE_SEARCH_LIMIT))
            .await
        {
            Ok(events) => events,
            Err(e) => {
                return i18n::tr(lang, "tool.delete.failed", Some(&[("err", e.to_string().as_str())]))
            }
        };

        if events.is_empty() {
            return i18n::tr(lang, "tool.delete.no_events", None);
        }

        let found = events.iter().find(|e| {
            e.summary
                .as_deref()
                .map(|s| s.to_lowercase().contains(&needle))
                .unwrap_or(false)
        });

        let Some(event) = found else {
            return i18n::tr(lang, "tool.delete.not_found", Some(&[("query", query.trim())]));
        };

        let deleted = with_timeout(
            "calendar delete",
            self.timeout,
            self.calendar
                .delete_event(cred, &self.calendar_id, &event.id),
        )
        .await;

        match deleted {
            Ok(()) => {
                tracing::info!("Deleted event {} for user {}", event.id, cred.user_id);
                i18n::tr(
                    lang,
                    "tool.delete.success",
                    Some(&[
                        ("summary", summary_or_untitled(event, lang).as_str()),
                        ("id", event.id.as_str()),
                    ]),
                )
            }
            Err(e) => {
                tracing::warn!("Failed to delete event {} for user {}: {}", event.id, cred.user_id, e);
                i18n::tr(lang, "tool.delete.failed", Some(&[("err", e.to_string().as_str())]))
            }
        }
    }

    pub async fn list_upcoming(
        &self,
        cred: &ResolvedCredential,
        max_results: usize,
        lang: Option<&str>,
    ) -> String {
        let max_results = max_results.clamp(1, MAX_LIST_LIMIT);
        let events = match self.list(cred, Utc::now(), None, Some(max_results)).await {
            Ok(events) => events,
            Err(e) => {
                return i18n::tr(lang, "events.fetch_failed", Some(&[("err", e.to_string().as_str())]))
            }
        };

        if events.is_empty() {
            return i18n::tr(lang, "events.none_upcoming", None);
        }

        let mut out = i18n::tr(lang, "events.upcoming_header", None);
        for event in &events {
            let (key, when) = match &event.start {
                EventTime::DateTime(dt) => ("events.line_timed", dt.format("%d.%m.%Y %H:%M")),
                EventTime::Date(d) => ("events.line_all_day", d.format("%d.%m.%Y")),
            };
            out.push('\n');
            out.push_str(&i18n::tr(
                lang,
                key,
                Some(&[
                    ("when", when.to_string().as_str()),
                    ("summary", summary_or_untitled(event, lang).as_str()),
                    ("id", event.id.as_str()),
                ]),
            ));
        }
        out
    }

    /// Events of one local day in the configured timezone.
    pub async fn events_for_date(
        &self,
        cred: &ResolvedCredential,
        date: NaiveDate,
        lang: Option<&str>,
    ) -> String {
        let label = date.format("%d.%m.%Y").to_string();
        let (Some(day_start), Some(day_end)) = (
            self.local_midnight(date),
            date.succ_opt().and_then(|d| self.local_midnight(d)),
        ) else {
            return i18n::tr(lang, "events.none_on_date", Some(&[("date", label.as_str())]));
        };

        let events = match self.list(cred, day_start, Some(day_end), None).await {
            Ok(events) => events,
            Err(e) => {
                return i18n::tr(lang, "events.fetch_failed", Some(&[("err", e.to_string().as_str())]))
            }
        };

        if events.is_empty() {
            return i18n::tr(lang, "events.none_on_date", Some(&[("date", label.as_str())]));
        }

        let mut out = i18n::tr(lang, "events.on_date_header", Some(&[("date", label.as_str())]));
        for event in &events {
            let summary = summary_or_untitled(event, lang);
            let line = match (&event.start, &event.end) {
                (EventTime::DateTime(start), EventTime::DateTime(end)) => {
                    let range = format!(
                        "{} - {}",
                        start.with_timezone(&self.tz).format("%H:%M"),
                        end.with_timezone(&self.tz).format("%H:%M")
                    );
                    i18n::tr(
                        lang,
                        "events.day_line_timed",
                        Some(&[("range", range.as_str()), ("summary", summary.as_str())]),
                    )
                }
                (EventTime::DateTime(start), EventTime::Date(_)) => {
                    let range = start.with_timezone(&self.tz).format("%H:%M").to_string();
                    i18n::tr(
                        lang,
                        "events.day_line_timed",
                        Some(&[("range", range.as_str()), ("summary", summary.as_str())]),
                    )
                }
                (EventTime::Date(_), _) => i18n::tr(
                    lang,
                    "events.day_line_all_day",
                    Some(&[("summary", summary.as_str())]),
                ),
            };
            out.push('\n');
            out.push_str(&line);
        }
        out
    }

    fn local_midnight(&self, date: NaiveDate) -> Option<DateTime<Utc>> {
        self.tz
            .from_local_datetime(&date.and_time(NaiveTime::MIN))
            .earliest()
            .map(|dt| dt.with_timezone(&Utc))
    }

    /// Run a tool call requested by the language model.
    pub async fn dispatch(
        &self,
        cred: &ResolvedCredential,
        name: &str,
        args: &Value,
        lang: Option<&str>,
    ) -> String {
        tracing::debug!("Tool call {} for user {}", name, cred.user_id);
        match name {
            CREATE_EVENT => {
                let title = args.get("title").and_then(Value::as_str).unwrap_or("");
                let start_time = args.get("start_time").and_then(Value::as_str).unwrap_or("");
                let hours = args
                    .get("duration_hours")
                    .and_then(|v| v.as_f64().or_else(|| v.as_str()?.trim().parse().ok()))
                    .unwrap_or(1.0);
                self.create_event(cred, title, start_time, hours, lang).await
            }
            DELETE_EVENT => {
                let summary = args
                    .get("event_summary")
                    .and_then(Value::as_str)
                    .unwrap_or("");
                if summary.trim().is_empty() {
                    return i18n::tr(
                        lang,
                        "tool.delete.failed",
                        Some(&[("err", "event_summary is required")]),
                    );
                }
                self.delete_event_by_summary(cred, summary, lang).await
            }
            LIST_EVENTS => {
                let max = args
                    .get("max_results")
                    .and_then(Value::as_u64)
                    .map(|n| n as usize)
                    .unwrap_or(DEFAULT_LIST_LIMIT);
                self.list_upcoming(cred, max, lang).await
            }
            other => i18n::tr(lang, "tool.unknown", Some(&[("name", other)])),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::credentials::CredentialBlob;
    use async_trait::async_trait;
    use std::sync::Mutex;

    /// Calendar backed by a vector; inserts get sequential ids.
    #[derive(Default)]
    struct MemoryCalendar {
        events: Mutex<Vec<CalendarEvent>>,
        inserted: Mutex<Vec<NewEvent>>,
        last_query: Mutex<Option<EventQuery>>,
    }

    #[async_trait]
    impl CalendarProvider for MemoryCalendar {
        async fn list_events(
            &self,
            _cred: &ResolvedCredential,
            query: &EventQuery,
        ) -> AppResult<Vec<CalendarEvent>> {
            *self.last_query.lock().unwrap() = Some(query.clone());
            let mut events = self.events.lock().unwrap().clone();
            if let Some(max) = query.max_results {
                events.truncate(max);
            }
            Ok(events)
        }

        async fn insert_event(
            &self,
            _cred: &ResolvedCredential,
            _calendar_id: &str,
            event: &NewEvent,
        ) -> AppResult<CalendarEvent> {
            let mut inserted = self.inserted.lock().unwrap();
            inserted.push(event.clone());
            let id = format!("created-{}", inserted.len());
            Ok(CalendarEvent {
                html_link: Some(format!("https://calendar.example/{}", id)),
                id,
                summary: Some(event.summary.clone()),
                start: EventTime::DateTime(event.start),
                end: EventTime::DateTime(event.end),
            })
        }

        async fn delete_event(
            &self,
            _cred: &ResolvedCredential,
            _calendar_id: &str,
            event_id: &str,
        ) -> AppResult<()> {
            let mut events = self.events.lock().unwrap();
            let before = events.len();
            events.retain(|e| e.id != event_id);
            if events.len() == before {
                return Err(AppError::NotFound("calendar event".into()));
            }
            Ok(())
        }
    }

    fn cred() -> ResolvedCredential {
        ResolvedCredential {
            user_id: 5,
            blob: CredentialBlob {
                access_token: "t".into(),
                refresh_token: None,
                expires_at: None,
                scopes: vec![],
            },
        }
    }

    fn event(id: &str, summary: &str, start: EventTime) -> CalendarEvent {
        CalendarEvent {
            id: id.into(),
            summary: Some(summary.into()),
            end: start.clone(),
            start,
            html_link: None,
        }
    }

    fn tools(calendar: Arc<MemoryCalendar>) -> CalendarTools {
        CalendarTools::new(
            calendar,
            "primary",
            chrono_tz::Europe::Moscow,
            Duration::from_secs(5),
        )
    }

    #[test]
    fn start_time_parsing() {
        let tz = chrono_tz::Europe::Moscow;

        let (dt, naive) = parse_start_time("2024-06-06T19:00:00", &tz).unwrap();
        assert!(naive);
        assert_eq!(dt.to_rfc3339(), "2024-06-06T19:00:00+03:00");

        let (dt, naive) = parse_start_time("2024-06-06T19:00:00Z", &tz).unwrap();
        assert!(!naive);
        assert_eq!(dt.with_timezone(&Utc).to_rfc3339(), "2024-06-06T19:00:00+00:00");

        assert!(parse_start_time("2024-06-06 19:30", &tz).is_ok());
        assert!(parse_start_time("next thursday", &tz).is_err());
    }

    #[tokio::test]
    async fn create_event_interprets_naive_time_in_configured_zone() {
        let calendar = Arc::new(MemoryCalendar::default());
        let text = tools(calendar.clone())
            .create_event(&cred(), "Тренировка", "2024-06-06T19:00:00", 1.5, Some("ru"))
            .await;

        assert!(text.contains("19:00 06-06-2024"), "{}", text);
        assert!(text.contains("https://calendar.example/created-1"));

        let inserted = calendar.inserted.lock().unwrap();
        assert_eq!(inserted[0].start.to_rfc3339(), "2024-06-06T19:00:00+03:00");
        assert_eq!(inserted[0].end.to_rfc3339(), "2024-06-06T20:30:00+03:00");
        assert_eq!(inserted[0].time_zone.as_deref(), Some("Europe/Moscow"));
    }

    #[tokio::test]
    async fn create_event_rejects_bad_input_as_text() {
        let calendar = Arc::new(MemoryCalendar::default());
        let t = tools(calendar.clone());

        let text = t.create_event(&cred(), "X", "someday", 1.0, Some("en")).await;
        assert!(text.starts_with("Failed to create the event"));
        let text = t
            .create_event(&cred(), "X", "2024-06-06T19:00:00", -2.0, Some("en"))
            .await;
        assert!(text.starts_with("Failed to create the event"));
        assert!(calendar.inserted.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn delete_by_summary_matches_case_insensitively() {
        let calendar = Arc::new(MemoryCalendar::default());
        let day = NaiveDate::from_ymd_opt(2030, 1, 1).unwrap();
        calendar.events.lock().unwrap().extend([
            event("a", "Обед с коллегами", EventTime::Date(day)),
            event("b", "Врач", EventTime::Date(day)),
        ]);
        let t = tools(calendar.clone());

        let text = t.delete_event_by_summary(&cred(), "обед", Some("ru")).await;
        assert!(text.contains("(ID: a)"), "{}", text);
        assert_eq!(calendar.events.lock().unwrap().len(), 1);

        let text = t.delete_event_by_summary(&cred(), "концерт", Some("en")).await;
        assert_eq!(text, "No upcoming event with 'концерт' in its title.");

        let query = calendar.last_query.lock().unwrap().clone().unwrap();
        assert_eq!(query.max_results, Some(DELETE_SEARCH_LIMIT));
    }

    #[tokio::test]
    async fn list_upcoming_formats_both_kinds() {
        let calendar = Arc::new(MemoryCalendar::default());
        let t = tools(calendar.clone());
        assert_eq!(
            t.list_upcoming(&cred(), 10, Some("en")).await,
            "No upcoming events."
        );

        let timed = DateTime::parse_from_rfc3339("2024-06-01T16:00:00+03:00").unwrap();
        calendar.events.lock().unwrap().extend([
            event("t1", "Врач", EventTime::DateTime(timed)),
            event(
                "d1",
                "Отпуск",
                EventTime::Date(NaiveDate::from_ymd_opt(2024, 6, 2).unwrap()),
            ),
        ]);

        let text = t.list_upcoming(&cred(), 10, Some("ru")).await;
        let lines: Vec<_> = text.lines().collect();
        assert_eq!(lines[0], "Предстоящие события:");
        assert_eq!(
            lines[1],
            "- Дата/Время: 01.06.2024 16:00 | Название: \"Врач\" | ID: t1"
        );
        assert_eq!(lines[2], "- Дата: 02.06.2024 | Название: \"Отпуск\" | ID: d1");
    }

    #[tokio::test]
    async fn events_for_date_queries_local_day() {
        let calendar = Arc::new(MemoryCalendar::default());
        let t = tools(calendar.clone());
        let date = NaiveDate::from_ymd_opt(2024, 6, 1).unwrap();

        let text = t.events_for_date(&cred(), date, Some("en")).await;
        assert_eq!(text, "No events on 01.06.2024.");

        let query = calendar.last_query.lock().unwrap().clone().unwrap();
        assert_eq!(query.time_min.to_rfc3339(), "2024-05-31T21:00:00+00:00");
        assert_eq!(
            query.time_max.map(|t| t.to_rfc3339()),
            Some("2024-06-01T21:00:00+00:00".to_string())
        );
    }

    #[tokio::test]
    async fn dispatch_routes_by_name() {
        let calendar = Arc::new(MemoryCalendar::default());
        let t = tools(calendar.clone());

        let args = serde_json::json!({
            "title": "Standup",
            "start_time": "2024-06-03T10:00:00+03:00",
            "duration_hours": "0.25"
        });
        let text = t.dispatch(&cred(), CREATE_EVENT, &args, Some("en")).await;
        assert!(text.starts_with("Event 'Standup' created for 10:00 03-06-2024"), "{}", text);
        let inserted = calendar.inserted.lock().unwrap().clone();
        assert_eq!(inserted[0].end - inserted[0].start, chrono::Duration::minutes(15));

        let text = t
            .dispatch(&cred(), "send_email", &serde_json::json!({}), Some("en"))
            .await;
        assert_eq!(text, "Unknown function: send_email");
    }
}
