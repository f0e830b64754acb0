//! Presentation of fetched events.

use chrono::{DateTime, TimeZone};
use serde::Serialize;

use tabcal_core::{EventCache, EventRecord, EventTime};

use crate::config::DisplayConfig;

/// Check whether an event starts on the local date of `now`.
///
/// All-day events compare their date directly; timed events are converted to
/// the timezone of `now` first.
pub fn is_today<Tz: TimeZone>(event: &EventRecord, now: &DateTime<Tz>) -> bool {
    match &event.start {
        Some(EventTime::Date(date)) => *date == now.date_naive(),
        Some(EventTime::DateTime(start)) => {
            start.with_timezone(&now.timezone()).date_naive() == now.date_naive()
        }
        None => false,
    }
}

/// Short en-US label for the start of an event.
pub fn format_event_date<Tz: TimeZone>(event: &EventRecord, now: &DateTime<Tz>) -> String
where
    Tz::Offset: std::fmt::Display,
{
    let today = is_today(event, now);

    match &event.start {
        None => String::new(),
        Some(EventTime::Date(_)) if today => "Today".to_string(),
        Some(EventTime::Date(date)) => date.format("%a, %b %-d").to_string(),
        Some(EventTime::DateTime(start)) => {
            let local = start.with_timezone(&now.timezone());
            if today {
                format!("Today at {}", local.format("%-I:%M %p"))
            } else {
                local.format("%a, %b %-d, %-I:%M %p").to_string()
            }
        }
    }
}

/// Apply the today/upcoming filters and the presentation cap.
pub fn visible_events<'a, Tz: TimeZone>(
    events: &'a [EventRecord],
    display: &DisplayConfig,
    max_results: usize,
    now: &DateTime<Tz>,
) -> Vec<&'a EventRecord> {
    events
        .iter()
        .filter(|event| {
            let today = is_today(event, now);
            (today && display.show_today) || (!today && display.show_upcoming)
        })
        .take(max_results)
        .collect()
}

/// Plain-text rendering, one event per line plus optional detail lines.
pub fn render_text<Tz: TimeZone>(
    events: &[&EventRecord],
    display: &DisplayConfig,
    now: &DateTime<Tz>,
) -> String
where
    Tz::Offset: std::fmt::Display,
{
    if events.is_empty() {
        return "No upcoming events\n".to_string();
    }

    let mut out = String::new();
    for event in events {
        let when = format_event_date(event, now);
        out.push_str(&format!("{:<24} {}\n", when, event.summary));

        if display.show_location {
            if let Some(location) = &event.location {
                out.push_str(&format!("{:<24} @ {}\n", "", location));
            }
        }
        if display.show_description {
            if let Some(description) = &event.description {
                for line in description.lines().filter(|l| !l.trim().is_empty()) {
                    out.push_str(&format!("{:<24} {}\n", "", line.trim()));
                }
            }
        }
    }
    out
}

#[derive(Serialize)]
struct JsonView<'a> {
    timestamp: &'a DateTime<chrono::Utc>,
    events: &'a [&'a EventRecord],
}

/// JSON rendering of the visible part of a cache.
pub fn render_json(cache: &EventCache, events: &[&EventRecord]) -> serde_json::Result<String> {
    serde_json::to_string_pretty(&JsonView {
        timestamp: &cache.timestamp,
        events,
    })
}
