//! Calendar events across several calendars.
//!
//! This module provides:
//! - [`CalendarQuery`] - Which calendars to read, how far ahead, and how to authenticate
//! - [`EventRecord`] / [`EventCache`] - Normalized events and a fetch snapshot
//! - [`CalendarClient`] - Low-level HTTP client for the calendar API
//! - [`EventFetcher`] - Parallel multi-calendar fetch with merge and sort

use chrono::{DateTime, Duration, FixedOffset, NaiveDate, NaiveTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::error::ErrorKind;
use crate::token::TokenError;

mod client;
mod fetcher;

pub use client::{CalendarClient, RequestAuth, CALENDAR_API_BASE};
pub use fetcher::EventFetcher;

/// Summary used for events that have none.
pub const UNTITLED_EVENT: &str = "No title";

/// How calendar requests are authenticated.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum AuthMethod {
    /// Static API key; only public calendars are readable.
    #[default]
    #[serde(rename = "apiKey")]
    ApiKey,

    /// Bearer token from the signed-in user's session.
    #[serde(rename = "oauth")]
    OAuth,
}

impl AuthMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::ApiKey => "apiKey",
            Self::OAuth => "oauth",
        }
    }
}

impl std::fmt::Display for AuthMethod {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What to fetch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct CalendarQuery {
    /// Calendar identifiers, e.g. `primary` or an email address.
    pub calendar_ids: Vec<String>,

    /// Days ahead of now to look.
    pub time_range: u32,

    /// Per-calendar request cap. The merged list is not truncated.
    pub max_results: u32,

    pub auth_method: AuthMethod,
}

impl Default for CalendarQuery {
    fn default() -> Self {
        Self {
            calendar_ids: Vec::new(),
            time_range: 7,
            max_results: 5,
            auth_method: AuthMethod::ApiKey,
        }
    }
}

impl CalendarQuery {
    /// Query the given calendars with the default window and API-key auth.
    pub fn new(calendar_ids: Vec<String>) -> Self {
        Self {
            calendar_ids,
            ..Default::default()
        }
    }

    /// Query the given calendars as the signed-in user.
    pub fn oauth(calendar_ids: Vec<String>) -> Self {
        Self::new(calendar_ids).with_auth_method(AuthMethod::OAuth)
    }

    pub fn with_auth_method(mut self, auth_method: AuthMethod) -> Self {
        self.auth_method = auth_method;
        self
    }

    pub fn with_time_range(mut self, days: u32) -> Self {
        self.time_range = days;
        self
    }

    pub fn with_max_results(mut self, max_results: u32) -> Self {
        self.max_results = max_results;
        self
    }
}

/// Start or end of an event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum EventTime {
    /// All-day event.
    Date(NaiveDate),

    /// Timed event, in the offset the API reported.
    DateTime(DateTime<FixedOffset>),
}

impl EventTime {
    /// The instant used for ordering. A date is midnight UTC of that day.
    pub fn instant(&self) -> DateTime<Utc> {
        match self {
            Self::Date(date) => date.and_time(NaiveTime::MIN).and_utc(),
            Self::DateTime(date_time) => date_time.with_timezone(&Utc),
        }
    }

    pub fn is_all_day(&self) -> bool {
        matches!(self, Self::Date(_))
    }
}

/// A normalized calendar event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EventRecord {
    pub id: String,

    /// Calendar the event was read from.
    pub calendar_id: String,

    /// Title, [`UNTITLED_EVENT`] when the API has none.
    pub summary: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub location: Option<String>,

    /// `None` if the API sent no usable start.
    pub start: Option<EventTime>,

    pub end: Option<EventTime>,

    /// Link to the event in the calendar web UI.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub html_link: Option<String>,
}

impl EventRecord {
    /// Ordering instant of the start, if any.
    pub fn start_instant(&self) -> Option<DateTime<Utc>> {
        self.start.as_ref().map(EventTime::instant)
    }
}

/// Result of one successful fetch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventCache {
    /// When the fetch completed.
    pub timestamp: DateTime<Utc>,

    /// Events from every calendar, ascending by start.
    pub events: Vec<EventRecord>,
}

/// Entry of the signed-in user's calendar list.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CalendarListEntry {
    pub id: String,

    #[serde(default)]
    pub summary: String,

    /// Whether this is the user's primary calendar.
    #[serde(default)]
    pub primary: bool,

    /// `owner`, `writer`, `reader` or `freeBusyReader`.
    #[serde(default)]
    pub access_role: Option<String>,
}

/// Bounds of an events request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimeWindow {
    pub time_min: DateTime<Utc>,
    pub time_max: DateTime<Utc>,
}

impl TimeWindow {
    /// From `now` to `days` days later.
    ///
    /// Returns `None` when the end of the window is past the representable
    /// date range.
    pub fn days_ahead(now: DateTime<Utc>, days: u32) -> Option<Self> {
        let span = Duration::try_days(i64::from(days))?;
        Some(Self {
            time_min: now,
            time_max: now.checked_add_signed(span)?,
        })
    }

    /// Query-string form of `time_min`.
    pub fn time_min_param(&self) -> String {
        self.time_min.to_rfc3339_opts(SecondsFormat::Millis, true)
    }

    /// Query-string form of `time_max`.
    pub fn time_max_param(&self) -> String {
        self.time_max.to_rfc3339_opts(SecondsFormat::Millis, true)
    }
}

/// Error from a single calendar API call.
#[derive(Debug, Error)]
pub enum CalendarError {
    /// The API rejected the credential (HTTP 401).
    #[error("unauthorized: {message}")]
    Unauthorized { message: String },

    /// Any other non-2xx response.
    #[error("calendar API returned {status}: {message}")]
    Status { status: u16, message: String },

    #[error("network error: {message}")]
    Network { message: String },

    #[error("invalid response: {message}")]
    InvalidResponse { message: String },

    #[error("configuration error: {message}")]
    Config { message: String },
}

impl CalendarError {
    /// Classify this error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Unauthorized { .. } => ErrorKind::AuthExpired,
            Self::Status { .. } => ErrorKind::TransientProvider,
            Self::Network { .. } | Self::InvalidResponse { .. } => ErrorKind::NetworkOrProtocol,
            Self::Config { .. } => ErrorKind::Config,
        }
    }
}

/// Error that aborts a whole fetch.
#[derive(Debug, Error)]
pub enum FetchError {
    /// No usable access token; see [`TokenError::kind`].
    #[error(transparent)]
    Token(#[from] TokenError),

    /// Missing API key or OAuth configuration, or a rejected API key.
    #[error("configuration error: {message}")]
    Config { message: String },

    /// A request that is not downgraded per calendar failed.
    #[error(transparent)]
    Calendar(#[from] CalendarError),
}

impl FetchError {
    /// Classify this error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Token(e) => e.kind(),
            Self::Config { .. } => ErrorKind::Config,
            Self::Calendar(e) => e.kind(),
        }
    }
}

/// Stable ascending sort by start instant.
///
/// Events without a start stay in the slots they occupy; only the timed
/// events are reordered among the remaining slots.
pub(crate) fn sort_events(events: Vec<EventRecord>) -> Vec<EventRecord> {
    let mut timed = Vec::with_capacity(events.len());
    let mut slots = Vec::with_capacity(events.len());

    for event in events {
        if event.start.is_some() {
            timed.push(event);
            slots.push(None);
        } else {
            slots.push(Some(event));
        }
    }

    timed.sort_by_key(EventRecord::start_instant);

    let mut timed = timed.into_iter();
    slots
        .into_iter()
        .filter_map(|slot| slot.or_else(|| timed.next()))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn event(id: &str, start: Option<EventTime>) -> EventRecord {
        EventRecord {
            id: id.to_string(),
            calendar_id: "primary".to_string(),
            summary: id.to_string(),
            description: None,
            location: None,
            start,
            end: None,
            html_link: None,
        }
    }

    fn at(rfc3339: &str) -> Option<EventTime> {
        Some(EventTime::DateTime(
            DateTime::parse_from_rfc3339(rfc3339).unwrap(),
        ))
    }

    fn ids(events: &[EventRecord]) -> Vec<&str> {
        events.iter().map(|e| e.id.as_str()).collect()
    }

    #[test]
    fn test_query_defaults() {
        let query: CalendarQuery = serde_json::from_str("{}").unwrap();
        assert!(query.calendar_ids.is_empty());
        assert_eq!(query.time_range, 7);
        assert_eq!(query.max_results, 5);
        assert_eq!(query.auth_method, AuthMethod::ApiKey);
    }

    #[test]
    fn test_query_camel_case() {
        let query: CalendarQuery = serde_json::from_value(serde_json::json!({
            "calendarIds": ["primary", "team@example.com"],
            "timeRange": 14,
            "maxResults": 10,
            "authMethod": "oauth"
        }))
        .unwrap();

        assert_eq!(query.calendar_ids.len(), 2);
        assert_eq!(query.time_range, 14);
        assert_eq!(query.auth_method, AuthMethod::OAuth);
    }

    #[test]
    fn test_event_time_instant() {
        let date = EventTime::Date(NaiveDate::from_ymd_opt(2024, 3, 4).unwrap());
        assert_eq!(date.instant().to_rfc3339(), "2024-03-04T00:00:00+00:00");
        assert!(date.is_all_day());

        let timed = at("2024-03-04T09:30:00+02:00").unwrap();
        assert_eq!(timed.instant().to_rfc3339(), "2024-03-04T07:30:00+00:00");
    }

    #[test]
    fn test_event_time_serialization() {
        let date = EventTime::Date(NaiveDate::from_ymd_opt(2024, 3, 4).unwrap());
        assert_eq!(
            serde_json::to_value(&date).unwrap(),
            serde_json::json!({ "date": "2024-03-04" })
        );
    }

    #[test]
    fn test_sort_events_mixes_dates_and_date_times() {
        let events = vec![
            event("late", at("2024-03-05T10:00:00Z")),
            event("all-day", Some(EventTime::Date(NaiveDate::from_ymd_opt(2024, 3, 5).unwrap()))),
            event("early", at("2024-03-04T23:00:00Z")),
        ];

        let sorted = sort_events(events);
        assert_eq!(ids(&sorted), vec!["early", "all-day", "late"]);
    }

    #[test]
    fn test_sort_events_is_stable() {
        let events = vec![
            event("a", at("2024-03-04T10:00:00Z")),
            event("b", at("2024-03-04T10:00:00Z")),
        ];
        assert_eq!(ids(&sort_events(events)), vec!["a", "b"]);
    }

    #[test]
    fn test_sort_events_missing_start_keeps_slot() {
        let events = vec![
            event("c", at("2024-03-06T10:00:00Z")),
            event("none", None),
            event("a", at("2024-03-04T10:00:00Z")),
        ];

        let sorted = sort_events(events);
        assert_eq!(ids(&sorted), vec!["a", "none", "c"]);
    }

    #[test]
    fn test_time_window_params() {
        let now = DateTime::parse_from_rfc3339("2024-03-04T10:00:00Z")
            .unwrap()
            .with_timezone(&Utc);
        let window = TimeWindow::days_ahead(now, 7).unwrap();

        assert_eq!(window.time_min_param(), "2024-03-04T10:00:00.000Z");
        assert_eq!(window.time_max_param(), "2024-03-11T10:00:00.000Z");
    }

    #[test]
    fn test_time_window_out_of_range() {
        assert!(TimeWindow::days_ahead(Utc::now(), u32::MAX).is_none());
        assert!(TimeWindow::days_ahead(Utc::now(), 366).is_some());
    }

    #[test]
    fn test_error_kinds() {
        let unauthorized = CalendarError::Unauthorized {
            message: "invalid credentials".to_string(),
        };
        assert_eq!(unauthorized.kind(), ErrorKind::AuthExpired);

        let status = CalendarError::Status {
            status: 500,
            message: "backend error".to_string(),
        };
        assert_eq!(status.kind(), ErrorKind::TransientProvider);
        assert!(status.kind().is_retryable());

        let fetch = FetchError::from(TokenError::NotAuthenticated);
        assert_eq!(fetch.kind(), ErrorKind::NotAuthenticated);
    }
}
