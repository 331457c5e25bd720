//! Google Calendar v3 client and the provider-neutral event types the rest of
//! the crate works with.

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, FixedOffset, NaiveDate, NaiveTime, TimeZone, Utc};
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};

use crate::error::{AppError, AppResult};
use crate::services::refresh_gate::ResolvedCredential;

/// Safety net against a provider that keeps returning page tokens.
const MAX_PAGES: usize = 10;

/// Start or end of an event: an instant with its original offset, or a
/// date-only marker for all-day events.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EventTime {
    DateTime(DateTime<FixedOffset>),
    Date(NaiveDate),
}

impl EventTime {
    pub fn is_all_day(&self) -> bool {
        matches!(self, EventTime::Date(_))
    }

    /// The instant this marker denotes; all-day dates are taken at midnight UTC.
    pub fn to_utc(&self) -> DateTime<Utc> {
        match self {
            EventTime::DateTime(dt) => dt.with_timezone(&Utc),
            EventTime::Date(d) => Utc.from_utc_datetime(&d.and_time(NaiveTime::MIN)),
        }
    }

    /// Calendar day of this marker as seen in `tz`.
    pub fn date_in<Tz: TimeZone>(&self, tz: &Tz) -> NaiveDate {
        match self {
            EventTime::DateTime(dt) => dt.with_timezone(tz).date_naive(),
            EventTime::Date(d) => *d,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct CalendarEvent {
    pub id: String,
    pub summary: Option<String>,
    pub start: EventTime,
    pub end: EventTime,
    pub html_link: Option<String>,
}

impl CalendarEvent {
    pub fn is_all_day(&self) -> bool {
        self.start.is_all_day()
    }
}

/// Event to create. Times carry their own offset; `time_zone` is the IANA
/// name when known.
#[derive(Debug, Clone)]
pub struct NewEvent {
    pub summary: String,
    pub start: DateTime<FixedOffset>,
    pub end: DateTime<FixedOffset>,
    pub time_zone: Option<String>,
}

/// Events whose start lies in `[time_min, time_max)`, expanded into single
/// instances and ordered by start time.
#[derive(Debug, Clone)]
pub struct EventQuery {
    pub calendar_id: String,
    pub time_min: DateTime<Utc>,
    pub time_max: Option<DateTime<Utc>>,
    pub max_results: Option<usize>,
}

#[async_trait]
pub trait CalendarProvider: Send + Sync + 'static {
    async fn list_events(
        &self,
        cred: &ResolvedCredential,
        query: &EventQuery,
    ) -> AppResult<Vec<CalendarEvent>>;

    async fn insert_event(
        &self,
        cred: &ResolvedCredential,
        calendar_id: &str,
        event: &NewEvent,
    ) -> AppResult<CalendarEvent>;

    async fn delete_event(
        &self,
        cred: &ResolvedCredential,
        calendar_id: &str,
        event_id: &str,
    ) -> AppResult<()>;
}

// ----------------------------------------------------------------------------
// Wire types
// ----------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct EventListResponse {
    #[serde(default)]
    items: Vec<ApiEvent>,
    next_page_token: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ApiEvent {
    id: String,
    status: Option<String>,
    summary: Option<String>,
    start: Option<ApiEventTime>,
    end: Option<ApiEventTime>,
    html_link: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ApiEventTime {
    #[serde(skip_serializing_if = "Option::is_none")]
    date_time: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    date: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    time_zone: Option<String>,
}

#[derive(Debug, Serialize)]
struct ApiNewEvent<'a> {
    summary: &'a str,
    start: ApiEventTime,
    end: ApiEventTime,
}

impl ApiEventTime {
    fn parse(&self) -> Option<EventTime> {
        if let Some(dt) = &self.date_time {
            return DateTime::parse_from_rfc3339(dt).ok().map(EventTime::DateTime);
        }
        self.date
            .as_deref()
            .and_then(|d| NaiveDate::parse_from_str(d, "%Y-%m-%d").ok())
            .map(EventTime::Date)
    }

    fn timed(dt: &DateTime<FixedOffset>, time_zone: Option<&str>) -> Self {
        Self {
            date_time: Some(dt.to_rfc3339()),
            date: None,
            time_zone: time_zone.map(str::to_string),
        }
    }
}

impl ApiEvent {
    fn into_event(self) -> Option<CalendarEvent> {
        if self.status.as_deref() == Some("cancelled") {
            return None;
        }

        let start = self.start.as_ref().and_then(ApiEventTime::parse);
        let end = self.end.as_ref().and_then(ApiEventTime::parse);
        match (start, end) {
            (Some(start), Some(end)) => Some(CalendarEvent {
                id: self.id,
                summary: self.summary,
                start,
                end,
                html_link: self.html_link,
            }),
            (Some(start), None) => Some(CalendarEvent {
                id: self.id,
                summary: self.summary,
                end: start.clone(),
                start,
                html_link: self.html_link,
            }),
            _ => {
                tracing::debug!("Skipping event {} without a usable start", self.id);
                None
            }
        }
    }
}

// ----------------------------------------------------------------------------
// Client
// ----------------------------------------------------------------------------

pub struct GoogleCalendarClient {
    base_url: String,
    http: reqwest::Client,
}

impl GoogleCalendarClient {
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> AppResult<Self> {
        let http = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            http,
        })
    }

    fn events_url(&self, calendar_id: &str) -> String {
        format!(
            "{}/calendars/{}/events",
            self.base_url,
            urlencoding::encode(calendar_id)
        )
    }

    async fn check_status(response: reqwest::Response) -> AppResult<reqwest::Response> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }

        match status {
            StatusCode::UNAUTHORIZED => Err(AppError::NotAuthenticated),
            StatusCode::TOO_MANY_REQUESTS => Err(AppError::RateLimited),
            StatusCode::NOT_FOUND | StatusCode::GONE => {
                Err(AppError::NotFound("calendar event".to_string()))
            }
            s if s.is_server_error() => Err(AppError::ServiceUnavailable(format!(
                "calendar API returned {}",
                s
            ))),
            s => {
                let body = response.text().await.unwrap_or_default();
                Err(AppError::GoogleApi(format!("API error ({}): {}", s, body)))
            }
        }
    }

    async fn list_page(
        &self,
        cred: &ResolvedCredential,
        query: &EventQuery,
        page_token: Option<&str>,
    ) -> AppResult<EventListResponse> {
        let mut request = self
            .http
            .get(self.events_url(&query.calendar_id))
            .bearer_auth(cred.access_token())
            .query(&[
                ("timeMin", query.time_min.to_rfc3339()),
                ("singleEvents", "true".to_string()),
                ("orderBy", "startTime".to_string()),
            ]);

        if let Some(time_max) = query.time_max {
            request = request.query(&[("timeMax", time_max.to_rfc3339())]);
        }
        if let Some(max) = query.max_results {
            request = request.query(&[("maxResults", max.to_string())]);
        }
        if let Some(token) = page_token {
            request = request.query(&[("pageToken", token)]);
        }

        let response = Self::check_status(request.send().await?).await?;
        let body = response.text().await?;
        serde_json::from_str(&body)
            .map_err(|e| AppError::GoogleApi(format!("failed to parse event list: {}", e)))
    }
}

#[async_trait]
impl CalendarProvider for GoogleCalendarClient {
    async fn list_events(
        &self,
        cred: &ResolvedCredential,
        query: &EventQuery,
    ) -> AppResult<Vec<CalendarEvent>> {
        let mut events = Vec::new();
        let mut page_token: Option<String> = None;

        for _ in 0..MAX_PAGES {
            let page = self.list_page(cred, query, page_token.as_deref()).await?;
            events.extend(page.items.into_iter().filter_map(ApiEvent::into_event));

            if let Some(max) = query.max_results {
                if events.len() >= max {
                    events.truncate(max);
                    break;
                }
            }

            match page.next_page_token {
                Some(token) => page_token = Some(token),
                None => break,
            }
        }

        tracing::debug!(
            "Fetched {} events from calendar {} for user {}",
            events.len(),
            query.calendar_id,
            cred.user_id
        );
        Ok(events)
    }

    async fn insert_event(
        &self,
        cred: &ResolvedCredential,
        calendar_id: &str,
        event: &NewEvent,
    ) -> AppResult<CalendarEvent> {
        let body = ApiNewEvent {
            summary: &event.summary,
            start: ApiEventTime::timed(&event.start, event.time_zone.as_deref()),
            end: ApiEventTime::timed(&event.end, event.time_zone.as_deref()),
        };

        let response = self
            .http
            .post(self.events_url(calendar_id))
            .bearer_auth(cred.access_token())
            .json(&body)
            .send()
            .await?;
        let response = Self::check_status(response).await?;

        let created: ApiEvent = serde_json::from_str(&response.text().await?)
            .map_err(|e| AppError::GoogleApi(format!("failed to parse created event: {}", e)))?;
        created
            .into_event()
            .ok_or_else(|| AppError::GoogleApi("created event has no start time".to_string()))
    }

    async fn delete_event(
        &self,
        cred: &ResolvedCredential,
        calendar_id: &str,
        event_id: &str,
    ) -> AppResult<()> {
        let url = format!(
            "{}/{}",
            self.events_url(calendar_id),
            urlencoding::encode(event_id)
        );
        let response = self
            .http
            .delete(url)
            .bearer_auth(cred.access_token())
            .send()
            .await?;
        Self::check_status(response).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::credentials::CredentialBlob;
    use wiremock::matchers::{header, method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn cred() -> ResolvedCredential {
        ResolvedCredential {
            user_id: 1,
            blob: CredentialBlob {
                access_token: "token-1".to_string(),
                refresh_token: None,
                expires_at: None,
                scopes: vec![],
            },
        }
    }

    fn query(max: Option<usize>) -> EventQuery {
        EventQuery {
            calendar_id: "primary".to_string(),
            time_min: Utc.with_ymd_and_hms(2024, 6, 1, 12, 50, 0).unwrap(),
            time_max: Some(Utc.with_ymd_and_hms(2024, 6, 1, 13, 20, 0).unwrap()),
            max_results: max,
        }
    }

    #[tokio::test]
    async fn list_events_parses_timed_and_all_day() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/calendars/primary/events"))
            .and(header("authorization", "Bearer token-1"))
            .and(query_param("singleEvents", "true"))
            .and(query_param("orderBy", "startTime"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "items": [
                    {
                        "id": "timed",
                        "summary": "Врач",
                        "start": {"dateTime": "2024-06-01T16:00:00+03:00"},
                        "end": {"dateTime": "2024-06-01T17:00:00+03:00"},
                        "htmlLink": "https://calendar.google.com/event?eid=1"
                    },
                    {
                        "id": "allday",
                        "start": {"date": "2024-06-01"},
                        "end": {"date": "2024-06-02"}
                    },
                    {
                        "id": "gone",
                        "status": "cancelled"
                    }
                ]
            })))
            .mount(&server)
            .await;

        let client = GoogleCalendarClient::new(server.uri(), Duration::from_secs(5)).unwrap();
        let events = client.list_events(&cred(), &query(None)).await.unwrap();

        assert_eq!(events.len(), 2);
        assert_eq!(events[0].id, "timed");
        assert_eq!(events[0].summary.as_deref(), Some("Врач"));
        assert!(!events[0].is_all_day());
        assert_eq!(
            events[0].start.to_utc(),
            Utc.with_ymd_and_hms(2024, 6, 1, 13, 0, 0).unwrap()
        );
        assert!(events[1].is_all_day());
        assert_eq!(
            events[1].end,
            EventTime::Date(NaiveDate::from_ymd_opt(2024, 6, 2).unwrap())
        );
    }

    #[tokio::test]
    async fn list_events_follows_pages_up_to_max() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/calendars/primary/events"))
            .and(query_param("pageToken", "next"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "items": [
                    {"id": "b", "start": {"date": "2024-06-02"}, "end": {"date": "2024-06-03"}},
                    {"id": "c", "start": {"date": "2024-06-03"}, "end": {"date": "2024-06-04"}}
                ]
            })))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/calendars/primary/events"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "items": [
                    {"id": "a", "start": {"date": "2024-06-01"}, "end": {"date": "2024-06-02"}}
                ],
                "nextPageToken": "next"
            })))
            .mount(&server)
            .await;

        let client = GoogleCalendarClient::new(server.uri(), Duration::from_secs(5)).unwrap();
        let events = client.list_events(&cred(), &query(Some(2))).await.unwrap();
        let ids: Vec<_> = events.iter().map(|e| e.id.as_str()).collect();
        assert_eq!(ids, vec!["a", "b"]);
    }

    #[tokio::test]
    async fn provider_errors_are_classified() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/calendars/primary/events"))
            .respond_with(ResponseTemplate::new(429))
            .mount(&server)
            .await;
        Mock::given(method("DELETE"))
            .and(path("/calendars/primary/events/missing"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;
        Mock::given(method("DELETE"))
            .and(path("/calendars/primary/events/denied"))
            .respond_with(ResponseTemplate::new(401))
            .mount(&server)
            .await;

        let client = GoogleCalendarClient::new(server.uri(), Duration::from_secs(5)).unwrap();
        assert!(matches!(
            client.list_events(&cred(), &query(None)).await,
            Err(AppError::RateLimited)
        ));
        assert!(matches!(
            client.delete_event(&cred(), "primary", "missing").await,
            Err(AppError::NotFound(_))
        ));
        assert!(matches!(
            client.delete_event(&cred(), "primary", "denied").await,
            Err(AppError::NotAuthenticated)
        ));
    }

    #[tokio::test]
    async fn insert_event_round_trips_through_api() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/calendars/primary/events"))
            .and(header("authorization", "Bearer token-1"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "id": "new-1",
                "summary": "Тренировка",
                "start": {"dateTime": "2024-06-06T19:00:00+03:00", "timeZone": "Europe/Moscow"},
                "end": {"dateTime": "2024-06-06T20:30:00+03:00", "timeZone": "Europe/Moscow"},
                "htmlLink": "https://calendar.google.com/event?eid=new-1"
            })))
            .expect(1)
            .mount(&server)
            .await;

        let offset = FixedOffset::east_opt(3 * 3600).unwrap();
        let start = offset.with_ymd_and_hms(2024, 6, 6, 19, 0, 0).unwrap();
        let event = NewEvent {
            summary: "Тренировка".to_string(),
            start,
            end: start + chrono::Duration::minutes(90),
            time_zone: Some("Europe/Moscow".to_string()),
        };

        let client = GoogleCalendarClient::new(server.uri(), Duration::from_secs(5)).unwrap();
        let created = client.insert_event(&cred(), "primary", &event).await.unwrap();
        assert_eq!(created.id, "new-1");
        assert_eq!(created.start, EventTime::DateTime(start));
        assert_eq!(
            created.html_link.as_deref(),
            Some("https://calendar.google.com/event?eid=new-1")
        );
    }
}
