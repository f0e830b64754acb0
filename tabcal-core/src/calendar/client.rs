//! Calendar API client.
//!
//! Handles request building, authentication, status mapping and response
//! parsing for the events and calendar-list endpoints.

use chrono::{DateTime, NaiveDate};
use reqwest::StatusCode;
use serde::Deserialize;
use tracing::{debug, warn};
use url::Url;

use super::{CalendarError, CalendarListEntry, EventRecord, EventTime, TimeWindow, UNTITLED_EVENT};
use crate::store::Secret;

/// Base URL for the Google Calendar API v3.
pub const CALENDAR_API_BASE: &str = "https://www.googleapis.com/calendar/v3";

/// Credential attached to a calendar request.
#[derive(Debug, Clone)]
pub enum RequestAuth {
    /// `Authorization: Bearer <token>`.
    Bearer(Secret),

    /// `key=<api key>` query parameter.
    ApiKey(Secret),
}

impl RequestAuth {
    fn apply(&self, request: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match self {
            Self::Bearer(token) => request.bearer_auth(token.expose()),
            Self::ApiKey(key) => request.query(&[("key", key.expose())]),
        }
    }
}

/// Low-level calendar API client.
#[derive(Debug, Clone)]
pub struct CalendarClient {
    http: reqwest::Client,
    base_url: String,
}

impl CalendarClient {
    /// Create a client for the public API endpoint.
    pub fn new() -> Self {
        Self::with_http_client(reqwest::Client::new())
    }

    /// Create a client that sends requests through `http`.
    pub fn with_http_client(http: reqwest::Client) -> Self {
        Self {
            http,
            base_url: CALENDAR_API_BASE.to_string(),
        }
    }

    /// Point the client at another API root.
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// List events of one calendar inside `window`.
    ///
    /// Recurring events are expanded and results come ordered by start.
    pub async fn list_events(
        &self,
        calendar_id: &str,
        auth: &RequestAuth,
        window: &TimeWindow,
        max_results: u32,
    ) -> Result<Vec<EventRecord>, CalendarError> {
        let url = self.endpoint(&["calendars", calendar_id, "events"])?;

        let request = self.http.get(url).query(&[
            ("timeMin", window.time_min_param()),
            ("timeMax", window.time_max_param()),
            ("maxResults", max_results.to_string()),
            ("singleEvents", "true".to_string()),
            ("orderBy", "startTime".to_string()),
        ]);

        let body = send(auth.apply(request)).await?;
        let list: EventListResponse = serde_json::from_str(&body).map_err(|e| {
            CalendarError::InvalidResponse {
                message: format!("failed to parse events of {}: {}", calendar_id, e),
            }
        })?;

        let events: Vec<EventRecord> = list
            .items
            .into_iter()
            .filter_map(|item| convert_event(item, calendar_id))
            .collect();

        debug!("Fetched {} events from calendar {}", events.len(), calendar_id);
        Ok(events)
    }

    /// List the calendars of the signed-in user.
    pub async fn list_calendars(
        &self,
        auth: &RequestAuth,
    ) -> Result<Vec<CalendarListEntry>, CalendarError> {
        let url = self.endpoint(&["users", "me", "calendarList"])?;

        let body = send(auth.apply(self.http.get(url))).await?;
        let list: CalendarListResponse =
            serde_json::from_str(&body).map_err(|e| CalendarError::InvalidResponse {
                message: format!("failed to parse calendar list: {}", e),
            })?;

        Ok(list.items)
    }

    fn endpoint(&self, segments: &[&str]) -> Result<Url, CalendarError> {
        let invalid = || CalendarError::Config {
            message: format!("invalid calendar API base URL: {}", self.base_url),
        };

        let mut url = Url::parse(&self.base_url).map_err(|_| invalid())?;
        url.path_segments_mut()
            .map_err(|_| invalid())?
            .pop_if_empty()
            .extend(segments);
        Ok(url)
    }
}

impl Default for CalendarClient {
    fn default() -> Self {
        Self::new()
    }
}

/// Send the request and return the body of a 2xx response.
async fn send(request: reqwest::RequestBuilder) -> Result<String, CalendarError> {
    let response = request.send().await.map_err(|e| {
        if e.is_timeout() {
            CalendarError::Network {
                message: "request timeout".to_string(),
            }
        } else {
            CalendarError::Network {
                message: format!("request failed: {}", e),
            }
        }
    })?;

    let status = response.status();

    if status == StatusCode::UNAUTHORIZED {
        return Err(CalendarError::Unauthorized {
            message: "access token or API key rejected".to_string(),
        });
    }

    if !status.is_success() {
        let body = response.text().await.unwrap_or_default();
        return Err(CalendarError::Status {
            status: status.as_u16(),
            message: body.trim().to_string(),
        });
    }

    response.text().await.map_err(|e| CalendarError::Network {
        message: format!("failed to read response: {}", e),
    })
}

fn convert_event(event: ApiEvent, calendar_id: &str) -> Option<EventRecord> {
    if event.status.as_deref() == Some("cancelled") {
        return None;
    }

    let start = parse_event_time(&event.id, "start", event.start);
    let end = parse_event_time(&event.id, "end", event.end);

    Some(EventRecord {
        summary: event
            .summary
            .filter(|s| !s.is_empty())
            .unwrap_or_else(|| UNTITLED_EVENT.to_string()),
        id: event.id,
        calendar_id: calendar_id.to_string(),
        description: event.description,
        location: event.location,
        start,
        end,
        html_link: event.html_link,
    })
}

fn parse_event_time(id: &str, field: &str, time: Option<ApiEventTime>) -> Option<EventTime> {
    let time = time?;
    match (time.date_time, time.date) {
        (Some(date_time), _) => DateTime::parse_from_rfc3339(&date_time)
            .map_err(|e| warn!("Failed to parse {} time of event {}: {}", field, id, e))
            .ok()
            .map(EventTime::DateTime),
        (None, Some(date)) => NaiveDate::parse_from_str(&date, "%Y-%m-%d")
            .map_err(|e| warn!("Failed to parse {} date of event {}: {}", field, id, e))
            .ok()
            .map(EventTime::Date),
        (None, None) => None,
    }
}

#[derive(Debug, Deserialize)]
struct EventListResponse {
    #[serde(default)]
    items: Vec<ApiEvent>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ApiEvent {
    #[serde(default)]
    id: String,
    summary: Option<String>,
    description: Option<String>,
    location: Option<String>,
    start: Option<ApiEventTime>,
    end: Option<ApiEventTime>,
    html_link: Option<String>,
    status: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ApiEventTime {
    date: Option<String>,
    date_time: Option<String>,
}

#[derive(Debug, Deserialize)]
struct CalendarListResponse {
    #[serde(default)]
    items: Vec<CalendarListEntry>,
}
