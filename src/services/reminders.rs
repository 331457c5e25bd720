//! Periodic reminder delivery.
//!
//! Each tick fans out over every user with a stored credential. Users are
//! processed concurrently and independently: a user's credential is resolved,
//! passed explicitly into that user's calendar query and dropped when the
//! user's task ends. A reminder is recorded in the [`ReminderLedger`] only
//! after it was delivered, so a failed send is retried on the next tick.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, NaiveDate, NaiveTime, TimeZone, Utc};
use futures::StreamExt;
use sqlx::SqlitePool;
use tokio::sync::Mutex;

use crate::db::repository::UserRepository;
use crate::i18n;
use crate::services::google_calendar::{CalendarEvent, CalendarProvider, EventQuery, EventTime};
use crate::services::ledger::ReminderLedger;
use crate::services::notifications::Notifier;
use crate::services::refresh_gate::{CredentialGate, ResolvedCredential};
use crate::services::with_timeout;

#[derive(Debug, Clone)]
pub struct ReminderSettings {
    pub calendar_id: String,
    pub lookahead: chrono::Duration,
    pub concurrency: usize,
    pub timeout: Duration,
}

/// Counters for one tick, mostly for logging and tests.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct TickReport {
    pub users: usize,
    pub unauthenticated: usize,
    pub failed_users: usize,
    pub sent: usize,
    pub already_sent: usize,
    pub delivery_failures: usize,
}

enum UserOutcome {
    Unauthenticated,
    Failed,
    Processed {
        sent: usize,
        already_sent: usize,
        delivery_failures: usize,
    },
}

pub struct ReminderScheduler {
    pool: SqlitePool,
    gate: CredentialGate,
    calendar: Arc<dyn CalendarProvider>,
    notifier: Arc<dyn Notifier>,
    ledger: Arc<ReminderLedger>,
    settings: ReminderSettings,
    // Ticks never overlap, even if a caller fires them back to back.
    running: Mutex<()>,
}

impl ReminderScheduler {
    pub fn new(
        pool: SqlitePool,
        gate: CredentialGate,
        calendar: Arc<dyn CalendarProvider>,
        notifier: Arc<dyn Notifier>,
        ledger: Arc<ReminderLedger>,
        settings: ReminderSettings,
    ) -> Self {
        Self {
            pool,
            gate,
            calendar,
            notifier,
            ledger,
            settings,
            running: Mutex::new(()),
        }
    }

    pub async fn tick(&self) -> TickReport {
        self.tick_at(Utc::now()).await
    }

    pub async fn tick_at(&self, now: DateTime<Utc>) -> TickReport {
        let _running = self.running.lock().await;
        let mut report = TickReport::default();

        let users = match with_timeout(
            "listing authenticated users",
            self.settings.timeout,
            self.gate.store().list_with_credentials(),
        )
        .await
        {
            Ok(users) => users,
            Err(e) => {
                tracing::error!("Reminder tick could not list users: {}", e);
                return report;
            }
        };
        report.users = users.len();

        let outcomes: Vec<UserOutcome> = futures::stream::iter(users)
            .map(|user_id| self.process_user(user_id, now))
            .buffer_unordered(self.settings.concurrency.max(1))
            .collect()
            .await;

        for outcome in outcomes {
            match outcome {
                UserOutcome::Unauthenticated => report.unauthenticated += 1,
                UserOutcome::Failed => report.failed_users += 1,
                UserOutcome::Processed {
                    sent,
                    already_sent,
                    delivery_failures,
                } => {
                    report.sent += sent;
                    report.already_sent += already_sent;
                    report.delivery_failures += delivery_failures;
                }
            }
        }

        if report.sent > 0 || report.delivery_failures > 0 || report.failed_users > 0 {
            tracing::info!(
                "Reminder tick: {} users, {} sent, {} delivery failures, {} failed users",
                report.users,
                report.sent,
                report.delivery_failures,
                report.failed_users
            );
        } else {
            tracing::debug!("Reminder tick: {} users, nothing to send", report.users);
        }

        report
    }

    async fn process_user(&self, user_id: i64, now: DateTime<Utc>) -> UserOutcome {
        let Some(cred) = self.gate.resolve(user_id).await else {
            tracing::debug!("Skipping reminders for user {}: not authenticated", user_id);
            return UserOutcome::Unauthenticated;
        };

        let events = match self.fetch_window(&cred, now).await {
            Ok(events) => events,
            Err(e) => {
                tracing::warn!("Failed to fetch events for user {}: {}", user_id, e);
                return UserOutcome::Failed;
            }
        };

        let lang = with_timeout(
            "user language lookup",
            self.settings.timeout,
            UserRepository::get_lang(&self.pool, user_id),
        )
        .await
        .ok()
        .flatten();

        let mut sent = 0;
        let mut already_sent = 0;
        let mut delivery_failures = 0;

        for event in events
            .iter()
            .filter(|e| is_due(e, now, self.settings.lookahead))
        {
            if self.ledger.contains(user_id, &event.id).await {
                already_sent += 1;
                continue;
            }

            let text = format_reminder(event, lang.as_deref());
            let delivery = with_timeout(
                "reminder delivery",
                self.settings.timeout,
                self.notifier.send_text(user_id, &text),
            )
            .await;

            match delivery {
                Ok(()) => {
                    sent += 1;
                    tracing::info!("Sent reminder for event {} to user {}", event.id, user_id);

                    let expires_at = ledger_expiry(event, self.settings.lookahead);
                    if let Err(e) = with_timeout(
                        "reminder ledger write",
                        self.settings.timeout,
                        self.ledger.record(user_id, &event.id, expires_at),
                    )
                    .await
                    {
                        tracing::warn!(
                            "Reminder for event {} (user {}) was sent but not persisted: {}",
                            event.id,
                            user_id,
                            e
                        );
                    }
                }
                Err(e) => {
                    delivery_failures += 1;
                    tracing::warn!(
                        "Failed to deliver reminder for event {} to user {}: {}",
                        event.id,
                        user_id,
                        e
                    );
                }
            }
        }

        UserOutcome::Processed {
            sent,
            already_sent,
            delivery_failures,
        }
    }

    async fn fetch_window(
        &self,
        cred: &ResolvedCredential,
        now: DateTime<Utc>,
    ) -> crate::error::AppResult<Vec<CalendarEvent>> {
        let query = EventQuery {
            calendar_id: self.settings.calendar_id.clone(),
            time_min: now,
            time_max: Some(now + self.settings.lookahead),
            max_results: None,
        };
        with_timeout(
            "calendar list",
            self.settings.timeout,
            self.calendar.list_events(cred, &query),
        )
        .await
    }
}

/// Whether `event` needs a reminder at `now`.
///
/// Timed events qualify when their start lies in `[now, now + lookahead)`.
/// All-day events qualify when their dates overlap the UTC dates the window
/// touches.
pub fn is_due(event: &CalendarEvent, now: DateTime<Utc>, lookahead: chrono::Duration) -> bool {
    match &event.start {
        EventTime::DateTime(start) => {
            let start = start.with_timezone(&Utc);
            now <= start && start < now + lookahead
        }
        EventTime::Date(first_day) => {
            let end_day = all_day_end(event, *first_day);
            let window_first = now.date_naive();
            let window_last = (now + lookahead).date_naive();
            *first_day <= window_last && end_day > window_first
        }
    }
}

/// Instant after which `event` can no longer be due, so its ledger entry may go.
pub fn ledger_expiry(event: &CalendarEvent, lookahead: chrono::Duration) -> DateTime<Utc> {
    match &event.start {
        EventTime::DateTime(start) => start.with_timezone(&Utc) + lookahead,
        EventTime::Date(first_day) => {
            let end_day = all_day_end(event, *first_day);
            Utc.from_utc_datetime(&end_day.and_time(NaiveTime::MIN)) + lookahead
        }
    }
}

/// Exclusive end date of an all-day event. A missing end, or one not after
/// the start, means the event covers `first_day` only.
fn all_day_end(event: &CalendarEvent, first_day: NaiveDate) -> NaiveDate {
    match &event.end {
        EventTime::Date(d) if *d > first_day => *d,
        _ => first_day.succ_opt().unwrap_or(first_day),
    }
}

/// Reminder text: a time range for timed events, date-only wording for
/// all-day ones. Times are shown in the event's own offset.
pub fn format_reminder(event: &CalendarEvent, lang: Option<&str>) -> String {
    let summary = event
        .summary
        .as_deref()
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .unwrap_or_else(|| i18n::tr(lang, "events.untitled", None));

    match (&event.start, &event.end) {
        (EventTime::DateTime(start), end) => {
            let range = match end {
                EventTime::DateTime(end) => {
                    format!("{} - {}", start.format("%H:%M"), end.format("%H:%M"))
                }
                EventTime::Date(_) => start.format("%H:%M").to_string(),
            };
            i18n::tr(
                lang,
                "reminder.timed",
                Some(&[("summary", summary.as_str()), ("range", range.as_str())]),
            )
        }
        (EventTime::Date(_), _) => {
            i18n::tr(lang, "reminder.all_day", Some(&[("summary", summary.as_str())]))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::test_pool;
    use crate::error::{AppError, AppResult};
    use crate::services::credentials::{CredentialBlob, CredentialStore};
    use crate::services::notifications::tests::RecordingNotifier;
    use crate::services::refresh_gate::tests::{expired, FakeProvider};
    use async_trait::async_trait;
    use chrono::{Duration as ChronoDuration, FixedOffset, NaiveDate, TimeZone};
    use std::collections::{HashMap, HashSet};
    use std::sync::Mutex as StdMutex;

    /// Calendar keyed by access token, so a lookup with the wrong user's
    /// credential returns the wrong user's events and shows up in assertions.
    #[derive(Default)]
    struct FakeCalendar {
        events_by_token: HashMap<String, Vec<CalendarEvent>>,
        failing_tokens: HashSet<String>,
        hanging_tokens: HashSet<String>,
        calls: StdMutex<Vec<(i64, String)>>,
    }

    #[async_trait]
    impl CalendarProvider for FakeCalendar {
        async fn list_events(
            &self,
            cred: &ResolvedCredential,
            _query: &EventQuery,
        ) -> AppResult<Vec<CalendarEvent>> {
            self.calls
                .lock()
                .unwrap()
                .push((cred.user_id, cred.access_token().to_string()));
            if self.failing_tokens.contains(cred.access_token()) {
                return Err(AppError::ServiceUnavailable("calendar down".into()));
            }
            if self.hanging_tokens.contains(cred.access_token()) {
                std::future::pending::<()>().await;
            }
            Ok(self
                .events_by_token
                .get(cred.access_token())
                .cloned()
                .unwrap_or_default())
        }

        async fn insert_event(
            &self,
            _cred: &ResolvedCredential,
            _calendar_id: &str,
            _event: &crate::services::google_calendar::NewEvent,
        ) -> AppResult<CalendarEvent> {
            Err(AppError::BadRequest("not supported".into()))
        }

        async fn delete_event(
            &self,
            _cred: &ResolvedCredential,
            _calendar_id: &str,
            _event_id: &str,
        ) -> AppResult<()> {
            Err(AppError::BadRequest("not supported".into()))
        }
    }

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 6, 1, 12, 50, 0).unwrap()
    }

    fn timed(id: &str, summary: &str, start: &str, end: &str) -> CalendarEvent {
        CalendarEvent {
            id: id.to_string(),
            summary: Some(summary.to_string()),
            start: EventTime::DateTime(DateTime::parse_from_rfc3339(start).unwrap()),
            end: EventTime::DateTime(DateTime::parse_from_rfc3339(end).unwrap()),
            html_link: None,
        }
    }

    fn all_day(id: &str, summary: &str, day: NaiveDate) -> CalendarEvent {
        CalendarEvent {
            id: id.to_string(),
            summary: Some(summary.to_string()),
            start: EventTime::Date(day),
            end: EventTime::Date(day.succ_opt().unwrap()),
            html_link: None,
        }
    }

    fn token_blob(user_id: i64) -> CredentialBlob {
        CredentialBlob {
            access_token: format!("token-{}", user_id),
            refresh_token: Some(format!("refresh-{}", user_id)),
            expires_at: None,
            scopes: vec![],
        }
    }

    struct Harness {
        pool: SqlitePool,
        store: CredentialStore,
        notifier: Arc<RecordingNotifier>,
        scheduler: ReminderScheduler,
    }

    async fn harness(calendar: FakeCalendar) -> Harness {
        harness_with_pool(test_pool().await, calendar, Arc::new(RecordingNotifier::default()))
            .await
    }

    async fn harness_with_pool(
        pool: SqlitePool,
        calendar: FakeCalendar,
        notifier: Arc<RecordingNotifier>,
    ) -> Harness {
        let store = CredentialStore::new(pool.clone());
        let gate = CredentialGate::new(
            store.clone(),
            Arc::new(FakeProvider::default()),
            Duration::from_secs(5),
        );
        let ledger = Arc::new(ReminderLedger::load(pool.clone(), now()).await.unwrap());
        let scheduler = ReminderScheduler::new(
            pool.clone(),
            gate,
            Arc::new(calendar),
            notifier.clone(),
            ledger,
            ReminderSettings {
                calendar_id: "primary".to_string(),
                lookahead: ChronoDuration::minutes(30),
                concurrency: 4,
                timeout: Duration::from_secs(5),
            },
        );
        Harness {
            pool,
            store,
            notifier,
            scheduler,
        }
    }

    fn doctor() -> CalendarEvent {
        timed(
            "evt-doctor",
            "Врач",
            "2024-06-01T16:00:00+03:00",
            "2024-06-01T17:00:00+03:00",
        )
    }

    #[test]
    fn timed_reminder_shows_range_in_event_offset() {
        let text = format_reminder(&doctor(), None);
        assert!(text.contains("16:00 - 17:00"), "{}", text);
        assert!(text.contains("Врач"));
    }

    #[test]
    fn all_day_reminder_has_no_time_range() {
        let event = all_day("evt-bday", "День рождения", NaiveDate::from_ymd_opt(2024, 6, 1).unwrap());
        let text = format_reminder(&event, Some("ru"));
        assert_eq!(text, "⏰ Напоминание! Сегодня: День рождения");
        assert!(!text.contains(" - "));

        let en = format_reminder(&event, Some("en"));
        assert_eq!(en, "⏰ Reminder! Today: День рождения");
    }

    #[test]
    fn untitled_event_gets_placeholder() {
        let mut event = doctor();
        event.summary = Some("   ".to_string());
        assert!(format_reminder(&event, Some("en")).contains("Untitled"));
    }

    #[test]
    fn due_window_boundaries() {
        let window = ChronoDuration::minutes(30);
        let at = |h: u32, m: u32| {
            let offset = FixedOffset::east_opt(0).unwrap();
            let start = offset.with_ymd_and_hms(2024, 6, 1, h, m, 0).unwrap();
            CalendarEvent {
                id: "x".into(),
                summary: None,
                start: EventTime::DateTime(start),
                end: EventTime::DateTime(start + ChronoDuration::hours(1)),
                html_link: None,
            }
        };

        assert!(is_due(&at(12, 50), now(), window));
        assert!(is_due(&at(13, 19), now(), window));
        assert!(!is_due(&at(13, 20), now(), window));
        assert!(!is_due(&at(12, 49), now(), window));

        let today = all_day("d", "d", NaiveDate::from_ymd_opt(2024, 6, 1).unwrap());
        let tomorrow = all_day("d", "d", NaiveDate::from_ymd_opt(2024, 6, 2).unwrap());
        let yesterday = all_day("d", "d", NaiveDate::from_ymd_opt(2024, 5, 31).unwrap());
        assert!(is_due(&today, now(), window));
        assert!(!is_due(&tomorrow, now(), window));
        assert!(!is_due(&yesterday, now(), window));

        // Window crossing midnight picks up the next day's all-day event.
        let late = Utc.with_ymd_and_hms(2024, 6, 1, 23, 45, 0).unwrap();
        assert!(is_due(&tomorrow, late, window));
    }

    #[test]
    fn ledger_expiry_for_both_kinds() {
        let window = ChronoDuration::minutes(30);
        assert_eq!(
            ledger_expiry(&doctor(), window),
            Utc.with_ymd_and_hms(2024, 6, 1, 13, 30, 0).unwrap()
        );
        let event = all_day("d", "d", NaiveDate::from_ymd_opt(2024, 6, 1).unwrap());
        assert_eq!(
            ledger_expiry(&event, window),
            Utc.with_ymd_and_hms(2024, 6, 2, 0, 30, 0).unwrap()
        );
    }

    #[test]
    fn single_day_event_without_proper_end_expires_after_its_day() {
        let window = ChronoDuration::minutes(30);
        let day = NaiveDate::from_ymd_opt(2024, 6, 1).unwrap();
        let mut event = all_day("d", "d", day);
        event.end = EventTime::Date(day);

        let expiry = ledger_expiry(&event, window);
        assert_eq!(expiry, Utc.with_ymd_and_hms(2024, 6, 2, 0, 30, 0).unwrap());

        let last_due = Utc.with_ymd_and_hms(2024, 6, 1, 23, 59, 0).unwrap();
        assert!(is_due(&event, last_due, window));
        assert!(expiry > last_due);
        assert!(!is_due(&event, expiry, window));
    }

    #[tokio::test]
    async fn ledger_gc_keeps_entry_while_all_day_event_is_due() {
        let day = NaiveDate::from_ymd_opt(2024, 6, 1).unwrap();
        let mut event = all_day("evt-holiday", "Праздник", day);
        event.end = EventTime::Date(day);

        let mut calendar = FakeCalendar::default();
        calendar.events_by_token.insert("token-1".into(), vec![event]);
        let h = harness(calendar).await;
        h.store.upsert(1, &token_blob(1)).await.unwrap();

        let first = h.scheduler.tick_at(now()).await;
        assert_eq!(first.sent, 1);

        let later = now() + ChronoDuration::hours(1);
        h.scheduler.ledger.purge_expired(later).await.unwrap();
        let second = h.scheduler.tick_at(later).await;

        assert_eq!(second.sent, 0);
        assert_eq!(second.already_sent, 1);
        assert_eq!(h.notifier.attempts(), 1);
    }

    #[tokio::test]
    async fn hung_calendar_does_not_hold_up_other_users() {
        let mut calendar = FakeCalendar::default();
        calendar
            .events_by_token
            .insert("token-1".into(), vec![doctor()]);
        calendar.hanging_tokens.insert("token-2".into());

        let pool = test_pool().await;
        let store = CredentialStore::new(pool.clone());
        store.upsert(1, &token_blob(1)).await.unwrap();
        store.upsert(2, &token_blob(2)).await.unwrap();
        let notifier = Arc::new(RecordingNotifier::default());
        let gate = CredentialGate::new(
            store,
            Arc::new(FakeProvider::default()),
            Duration::from_secs(5),
        );
        let scheduler = ReminderScheduler::new(
            pool.clone(),
            gate,
            Arc::new(calendar),
            notifier.clone(),
            Arc::new(ReminderLedger::load(pool, now()).await.unwrap()),
            ReminderSettings {
                calendar_id: "primary".to_string(),
                lookahead: ChronoDuration::minutes(30),
                concurrency: 1,
                timeout: Duration::from_millis(500),
            },
        );

        let report = tokio::time::timeout(Duration::from_secs(10), scheduler.tick_at(now()))
            .await
            .expect("tick must finish despite a hung calendar call");

        assert_eq!(report.users, 2);
        assert_eq!(report.failed_users, 1);
        assert_eq!(report.sent, 1);
        let sent = notifier.sent();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].0, 1);
    }

    #[tokio::test]
    async fn duplicate_tick_sends_once() {
        let mut calendar = FakeCalendar::default();
        calendar
            .events_by_token
            .insert("token-1".into(), vec![doctor()]);
        let h = harness(calendar).await;
        h.store.upsert(1, &token_blob(1)).await.unwrap();

        let first = h.scheduler.tick_at(now()).await;
        let second = h.scheduler.tick_at(now() + ChronoDuration::seconds(60)).await;

        assert_eq!(first.sent, 1);
        assert_eq!(second.sent, 0);
        assert_eq!(second.already_sent, 1);
        assert_eq!(h.notifier.attempts(), 1);
        let sent = h.notifier.sent();
        assert_eq!(sent[0].0, 1);
        assert!(sent[0].1.contains("16:00 - 17:00"));
    }

    #[tokio::test]
    async fn restart_does_not_resend() {
        let pool = test_pool().await;
        let mut calendar = FakeCalendar::default();
        calendar
            .events_by_token
            .insert("token-1".into(), vec![doctor()]);
        let first = harness_with_pool(pool.clone(), calendar, Arc::new(RecordingNotifier::default())).await;
        first.store.upsert(1, &token_blob(1)).await.unwrap();
        assert_eq!(first.scheduler.tick_at(now()).await.sent, 1);

        let mut calendar = FakeCalendar::default();
        calendar
            .events_by_token
            .insert("token-1".into(), vec![doctor()]);
        let restarted = harness_with_pool(first.pool.clone(), calendar, Arc::new(RecordingNotifier::default())).await;
        let report = restarted
            .scheduler
            .tick_at(now() + ChronoDuration::minutes(1))
            .await;
        assert_eq!(report.sent, 0);
        assert_eq!(restarted.notifier.attempts(), 0);
    }

    #[tokio::test]
    async fn failed_delivery_is_retried_next_tick() {
        let mut calendar = FakeCalendar::default();
        calendar
            .events_by_token
            .insert("token-1".into(), vec![doctor()]);
        let h = harness(calendar).await;
        h.store.upsert(1, &token_blob(1)).await.unwrap();
        h.notifier.unreachable.lock().unwrap().insert(1);

        let first = h.scheduler.tick_at(now()).await;
        assert_eq!(first.delivery_failures, 1);
        assert_eq!(first.sent, 0);

        h.notifier.unreachable.lock().unwrap().clear();
        let second = h.scheduler.tick_at(now() + ChronoDuration::seconds(60)).await;
        assert_eq!(second.sent, 1);
        assert_eq!(h.notifier.sent().len(), 1);
    }

    #[tokio::test]
    async fn users_are_isolated() {
        let mut calendar = FakeCalendar::default();
        calendar.events_by_token.insert(
            "token-2".into(),
            vec![timed(
                "shared-id",
                "Встреча U2",
                "2024-06-01T13:10:00Z",
                "2024-06-01T13:40:00Z",
            )],
        );
        calendar.events_by_token.insert(
            "token-3".into(),
            vec![timed(
                "shared-id",
                "Встреча U3",
                "2024-06-01T13:05:00Z",
                "2024-06-01T13:35:00Z",
            )],
        );
        calendar.failing_tokens.insert("token-4".into());
        let h = harness(calendar).await;

        // U1: expired credential that cannot be refreshed.
        h.store.upsert(1, &expired("token-1", None)).await.unwrap();
        h.store.upsert(2, &token_blob(2)).await.unwrap();
        h.store.upsert(3, &token_blob(3)).await.unwrap();
        // U4: calendar provider fails.
        h.store.upsert(4, &token_blob(4)).await.unwrap();

        let report = h.scheduler.tick_at(now()).await;
        assert_eq!(report.users, 4);
        assert_eq!(report.unauthenticated, 1);
        assert_eq!(report.failed_users, 1);
        assert_eq!(report.sent, 2);

        let mut sent = h.notifier.sent();
        sent.sort();
        assert_eq!(sent.len(), 2);
        assert_eq!(sent[0].0, 2);
        assert!(sent[0].1.contains("Встреча U2"));
        assert_eq!(sent[1].0, 3);
        assert!(sent[1].1.contains("Встреча U3"));
    }

    #[tokio::test]
    async fn calendar_calls_use_own_credentials() {
        let calendar = Arc::new(FakeCalendar::default());
        let pool = test_pool().await;
        let store = CredentialStore::new(pool.clone());
        for id in 1..=5 {
            store.upsert(id, &token_blob(id)).await.unwrap();
        }
        let gate = CredentialGate::new(
            store,
            Arc::new(FakeProvider::default()),
            Duration::from_secs(5),
        );
        let scheduler = ReminderScheduler::new(
            pool.clone(),
            gate,
            calendar.clone(),
            Arc::new(RecordingNotifier::default()),
            Arc::new(ReminderLedger::load(pool, now()).await.unwrap()),
            ReminderSettings {
                calendar_id: "primary".to_string(),
                lookahead: ChronoDuration::minutes(30),
                concurrency: 5,
                timeout: Duration::from_secs(5),
            },
        );

        scheduler.tick_at(now()).await;

        let calls = calendar.calls.lock().unwrap().clone();
        assert_eq!(calls.len(), 5);
        for (user_id, token) in calls {
            assert_eq!(token, format!("token-{}", user_id));
        }
    }

    #[tokio::test]
    async fn user_without_credentials_is_a_no_op() {
        let h = harness(FakeCalendar::default()).await;
        UserRepository::upsert_lang(&h.pool, 9, "en").await.unwrap();

        let report = h.scheduler.tick_at(now()).await;
        assert_eq!(report, TickReport::default());
        assert_eq!(h.notifier.attempts(), 0);
    }

    #[tokio::test]
    async fn reminder_uses_stored_language() {
        let mut calendar = FakeCalendar::default();
        calendar
            .events_by_token
            .insert("token-1".into(), vec![doctor()]);
        let h = harness(calendar).await;
        h.store.upsert(1, &token_blob(1)).await.unwrap();
        UserRepository::upsert_lang(&h.pool, 1, "en").await.unwrap();

        h.scheduler.tick_at(now()).await;
        let sent = h.notifier.sent();
        assert_eq!(sent[0].1, "⏰ Reminder! Coming up: Врач: 16:00 - 17:00");
    }
}
