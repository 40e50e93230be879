//! iCalendar feed construction.
//!
//! [`CalendarBuilder`] collects typed [`CalendarEvent`]s first and validates
//! them into an immutable [`CalendarDocument`]; rendering is a separate, pure
//! pass over that value. Given the same inputs and build instant the output is
//! byte-for-byte identical.
//!
//! The document layout is fixed for compatibility with existing subscribers:
//!
//! ```text
//! BEGIN:VCALENDAR            five-line preamble
//! VERSION:2.0
//! PRODID:-//DTEK <name>//EN
//! CALSCALE:GREGORIAN
//! METHOD:PUBLISH
//! BEGIN:VTIMEZONE            fixed +02:00, no daylight rule
//! ...
//! END:VTIMEZONE
//! BEGIN:VEVENT               one block per event
//! ...
//! END:VEVENT
//! END:VCALENDAR
//! ```


use std::collections::HashSet;
use std::fmt;

use chrono::{DateTime, SecondsFormat, Utc};

use crate::error::CalendarError;
use crate::schedule::{NormalizedSchedule, ShutdownNotice};
use crate::time::TimeCoercion;

/// Summary used when none is configured.
pub const DEFAULT_SUMMARY: &str = "Power outage";

const LINE_ENDING: &str = "\r\n";

/// A single calendar event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CalendarEvent {
    /// Identifier, unique within the document and across builds.
    pub uid: String,
    /// Event title.
    pub summary: String,
    /// Human-readable address, if any.
    pub location: Option<String>,
    /// Free-form details.
    pub description: Option<String>,
    /// When the underlying data was stamped upstream.
    pub stamp: DateTime<Utc>,
    /// Start of the event (inclusive).
    pub start: DateTime<Utc>,
    /// End of the event (exclusive).
    pub end: DateTime<Utc>,
}

/// A validated calendar ready for serialization.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CalendarDocument {
    name: String,
    coercion: TimeCoercion,
    events: Vec<CalendarEvent>,
}

impl CalendarDocument {
    /// Calendar name, as shown in `PRODID`.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Events in document order.
    pub fn events(&self) -> &[CalendarEvent] {
        &self.events
    }

    /// IANA name used for `TZID`.
    pub fn timezone_id(&self) -> &'static str {
        self.coercion.timezone().name()
    }

    /// Returns the document as individual content lines.
    pub fn lines(&self) -> Vec<String> {
        let tzid = self.timezone_id();
        let mut lines = vec![
            "BEGIN:VCALENDAR".to_string(),
            "VERSION:2.0".to_string(),
            format!("PRODID:-//DTEK {}//EN", self.name),
            "CALSCALE:GREGORIAN".to_string(),
            "METHOD:PUBLISH".to_string(),
            "BEGIN:VTIMEZONE".to_string(),
            format!("TZID:{tzid}"),
            "BEGIN:STANDARD".to_string(),
            "DTSTART:19700101T000000".to_string(),
            "TZOFFSETFROM:+0200".to_string(),
            "TZOFFSETTO:+0200".to_string(),
            "END:STANDARD".to_string(),
            "END:VTIMEZONE".to_string(),
        ];

        for event in &self.events {
            lines.push("BEGIN:VEVENT".to_string());
            lines.push(format!("UID:{}", event.uid));
            // Feed-local wall time with a literal `Z`; subscribers rely on it.
            lines.push(format!(
                "DTSTAMP:{}Z",
                self.coercion.to_calendar_stamp(event.stamp)
            ));
            lines.push(format!(
                "DTSTART;TZID={tzid}:{}",
                self.coercion.to_calendar_stamp(event.start)
            ));
            lines.push(format!(
                "DTEND;TZID={tzid}:{}",
                self.coercion.to_calendar_stamp(event.end)
            ));
            lines.push(format!("SUMMARY:{}", escape_text(&event.summary)));
            if let Some(location) = &event.location {
                lines.push(format!("LOCATION:{}", escape_text(location)));
            }
            if let Some(description) = &event.description {
                lines.push(format!("DESCRIPTION:{}", escape_text(description)));
            }
            lines.push("END:VEVENT".to_string());
        }

        lines.push("END:VCALENDAR".to_string());
        lines
    }
}

impl fmt::Display for CalendarDocument {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for line in self.lines() {
            f.write_str(&line)?;
            f.write_str(LINE_ENDING)?;
        }
        Ok(())
    }
}

/// Accumulates events for one document.
///
/// ```
/// use chrono::{TimeZone, Utc};
/// use outagecal_core::{CalendarBuilder, NormalizedSchedule, TimeCoercion};
///
/// let schedule = NormalizedSchedule {
///     updated_at: Utc.with_ymd_and_hms(2024, 1, 1, 6, 0, 0).unwrap(),
///     intervals: vec![],
/// };
/// let document = CalendarBuilder::new("DTEK DNEM Outages 3.1", TimeCoercion::default())
///     .with_location("Dnipro")
///     .with_schedule(&schedule)
///     .build()
///     .unwrap();
/// assert!(document.to_string().starts_with("BEGIN:VCALENDAR\r\n"));
/// ```
#[derive(Debug, Clone)]
pub struct CalendarBuilder {
    name: String,
    coercion: TimeCoercion,
    location: Option<String>,
    summary: String,
    built_at: DateTime<Utc>,
    entries: Vec<Entry>,
}

/// An event recorded by the builder; rendered into a [`CalendarEvent`] only in
/// [`CalendarBuilder::build`], so every setter applies to every event.
#[derive(Debug, Clone)]
struct Entry {
    stamp: DateTime<Utc>,
    start: DateTime<Utc>,
    end: DateTime<Utc>,
    reason: Option<String>,
}

impl CalendarBuilder {
    /// Creates a builder stamped with the current time.
    pub fn new(name: impl Into<String>, coercion: TimeCoercion) -> Self {
        Self {
            name: name.into(),
            coercion,
            location: None,
            summary: DEFAULT_SUMMARY.to_string(),
            built_at: Utc::now(),
            entries: Vec::new(),
        }
    }

    /// Builder: fix the build instant (used for UIDs and "refreshed at").
    #[must_use]
    pub fn with_built_at(mut self, built_at: DateTime<Utc>) -> Self {
        self.built_at = built_at;
        self
    }

    /// Builder: set the location attached to every event.
    #[must_use]
    pub fn with_location(mut self, location: impl Into<String>) -> Self {
        let location = location.into();
        self.location = (!location.trim().is_empty()).then_some(location);
        self
    }

    /// Builder: set the event summary.
    #[must_use]
    pub fn with_summary(mut self, summary: impl Into<String>) -> Self {
        self.summary = summary.into();
        self
    }

    /// Adds one event per outage interval.
    #[must_use]
    pub fn with_schedule(mut self, schedule: &NormalizedSchedule) -> Self {
        self.entries
            .extend(schedule.intervals.iter().map(|interval| Entry {
                stamp: schedule.updated_at,
                start: interval.start,
                end: interval.end,
                reason: None,
            }));
        self
    }

    /// Adds an event for a planned shutdown.
    #[must_use]
    pub fn with_shutdown(mut self, notice: &ShutdownNotice) -> Self {
        self.entries.push(Entry {
            stamp: notice.updated_at,
            start: notice.started_at,
            end: notice.ends_at,
            reason: Some(notice.reason.clone()),
        });
        self
    }

    /// Prefix shared by every UID in this document.
    pub fn uid_prefix(&self) -> String {
        format!(
            "{}{}",
            sanitize_name(&self.name),
            self.built_at.to_rfc3339_opts(SecondsFormat::Millis, true)
        )
    }

    /// Validates the events and produces the document.
    pub fn build(self) -> Result<CalendarDocument, CalendarError> {
        let prefix = self.uid_prefix();
        let events: Vec<CalendarEvent> = self
            .entries
            .iter()
            .enumerate()
            .map(|(index, entry)| {
                let freshness = self.freshness(entry.stamp);
                let description = match &entry.reason {
                    Some(reason) => format!("{reason}\n{freshness}"),
                    None => freshness,
                };
                CalendarEvent {
                    uid: format!("{prefix}@{index}"),
                    summary: self.summary.clone(),
                    location: self.location.clone(),
                    description: Some(description),
                    stamp: entry.stamp,
                    start: entry.start,
                    end: entry.end,
                }
            })
            .collect();

        let mut seen = HashSet::with_capacity(events.len());
        for event in &events {
            if event.start >= event.end {
                return Err(CalendarError::EmptyInterval {
                    uid: event.uid.clone(),
                    start: event.start.to_rfc3339(),
                    end: event.end.to_rfc3339(),
                });
            }
            if !seen.insert(event.uid.as_str()) {
                return Err(CalendarError::DuplicateUid {
                    uid: event.uid.clone(),
                });
            }
        }

        Ok(CalendarDocument {
            name: self.name,
            coercion: self.coercion,
            events,
        })
    }

    fn freshness(&self, updated_at: DateTime<Utc>) -> String {
        format!(
            "updated at {}\nrefreshed at {}",
            self.coercion.localize(updated_at),
            self.coercion.localize(self.built_at)
        )
    }
}

/// Escapes a TEXT value: backslash, semicolon, comma and newline.
///
/// Each input character is mapped once, so backslashes introduced by the
/// escaping are never escaped again. Carriage returns are dropped.
pub fn escape_text(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    for c in input.chars() {
        match c {
            '\\' => out.push_str("\\\\"),
            ';' => out.push_str("\\;"),
            ',' => out.push_str("\\,"),
            '\n' => out.push_str("\\n"),
            '\r' => {}
            other => out.push(other),
        }
    }
    out
}

/// Keeps ASCII letters, digits and underscores.
pub fn sanitize_name(name: &str) -> String {
    name.chars()
        .filter(|c| c.is_ascii_alphanumeric() || *c == '_')
        .collect()
}
