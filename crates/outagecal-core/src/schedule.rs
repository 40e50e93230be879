//! Outage schedule model and interval normalization.
//!
//! The upstream table describes each clock hour `1..=24` of a day with an
//! [`HourCode`]. [`normalize`] turns a set of such days into a minimal,
//! chronologically ordered list of [`OutageInterval`]s in which no two
//! intervals touch or overlap.
//!
//! Hour `h` covers local wall-clock minutes `[(h-1)*60, h*60)` of its day, so
//! hour 24 ends at midnight of the next day and merges with hour 1 of that day.

use std::collections::BTreeMap;

use chrono::{DateTime, Duration, Utc};
use chrono_tz::Tz;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::time::resolve_local;

/// Upstream state of a single clock hour.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HourCode {
    /// Power is on for the whole hour (`yes`).
    PowerOn,
    /// Power is off for the whole hour (`no`).
    Outage,
    /// Power is off for the first 30 minutes (`first`).
    FirstHalf,
    /// Power is off for the last 30 minutes (`second`).
    SecondHalf,
}

impl HourCode {
    /// Parses an upstream code. Returns `None` for anything unrecognized.
    pub fn from_raw(code: &str) -> Option<Self> {
        match code {
            "yes" => Some(Self::PowerOn),
            "no" => Some(Self::Outage),
            "first" => Some(Self::FirstHalf),
            "second" => Some(Self::SecondHalf),
            _ => None,
        }
    }

    /// Returns the upstream spelling of this code.
    pub fn as_raw(&self) -> &'static str {
        match self {
            Self::PowerOn => "yes",
            Self::Outage => "no",
            Self::FirstHalf => "first",
            Self::SecondHalf => "second",
        }
    }

    /// Minutes within the hour during which power is off, if any.
    fn outage_minutes(self) -> Option<(u32, u32)> {
        match self {
            Self::PowerOn => None,
            Self::Outage => Some((0, 60)),
            Self::FirstHalf => Some((0, 30)),
            Self::SecondHalf => Some((30, 60)),
        }
    }
}

/// How to treat hours that have no entry at all in a day's table.
///
/// Two generations of the upstream schedule disagree on this, so it is a
/// per-feed setting rather than a guess.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum MissingHourPolicy {
    /// A missing hour carries no outage.
    #[default]
    NoOutage,
    /// A missing hour is a full-hour outage.
    Outage,
}

/// One day of the upstream table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DaySchedule {
    midnight: DateTime<Tz>,
    hours: BTreeMap<u8, HourCode>,
}

impl DaySchedule {
    /// Creates an empty day anchored at the given local midnight.
    pub fn new(midnight: DateTime<Tz>) -> Self {
        Self {
            midnight,
            hours: BTreeMap::new(),
        }
    }

    /// Builds a day from raw `(hour key, code)` pairs.
    ///
    /// Keys outside `1..=24` are dropped, `None` values count as missing and
    /// unrecognized codes are recorded as [`HourCode::PowerOn`]. Both
    /// anomalies are logged.
    pub fn from_raw_hours<'a, I>(midnight: DateTime<Tz>, hours: I) -> Self
    where
        I: IntoIterator<Item = (&'a str, Option<&'a str>)>,
    {
        let mut day = Self::new(midnight);
        for (key, code) in hours {
            let Some(hour) = key.trim().parse::<u8>().ok().filter(|h| (1..=24).contains(h)) else {
                warn!(key, day = %midnight.date_naive(), "Ignoring hour key outside 1..=24");
                continue;
            };
            let Some(code) = code else {
                continue;
            };
            let parsed = HourCode::from_raw(code).unwrap_or_else(|| {
                warn!(
                    hour,
                    code,
                    day = %midnight.date_naive(),
                    "Unrecognized hour code, treating as no outage"
                );
                HourCode::PowerOn
            });
            day.hours.insert(hour, parsed);
        }
        day
    }

    /// Builder: sets the code for `hour` (`1..=24`). Other hours are ignored.
    #[must_use]
    pub fn with_hour(mut self, hour: u8, code: HourCode) -> Self {
        self.set_hour(hour, code);
        self
    }

    /// Sets the code for `hour`. Returns `false` if the hour is out of range.
    pub fn set_hour(&mut self, hour: u8, code: HourCode) -> bool {
        if !(1..=24).contains(&hour) {
            return false;
        }
        self.hours.insert(hour, code);
        true
    }

    /// Returns the local midnight this day is anchored at.
    pub fn midnight(&self) -> DateTime<Tz> {
        self.midnight
    }

    /// Returns the code recorded for `hour`, if any.
    pub fn hour(&self, hour: u8) -> Option<HourCode> {
        self.hours.get(&hour).copied()
    }

    /// Number of hours with an entry.
    pub fn len(&self) -> usize {
        self.hours.len()
    }

    /// Returns true if no hour has an entry.
    pub fn is_empty(&self) -> bool {
        self.hours.is_empty()
    }
}

/// A half-open outage interval `[start, end)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutageInterval {
    /// Start of the outage (inclusive).
    pub start: DateTime<Utc>,
    /// End of the outage (exclusive).
    pub end: DateTime<Utc>,
}

impl OutageInterval {
    /// Creates an interval, or `None` unless `start < end`.
    pub fn new(start: DateTime<Utc>, end: DateTime<Utc>) -> Option<Self> {
        (start < end).then_some(Self { start, end })
    }

    /// Length of the interval.
    pub fn duration(&self) -> Duration {
        self.end - self.start
    }
}

/// Normalized outage data for one refresh cycle.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NormalizedSchedule {
    /// When the upstream schedule was last updated.
    pub updated_at: DateTime<Utc>,
    /// Merged, ordered outage intervals.
    pub intervals: Vec<OutageInterval>,
}

impl NormalizedSchedule {
    /// Normalizes `days` with the given policy.
    pub fn from_days(
        updated_at: DateTime<Utc>,
        days: &[DaySchedule],
        policy: MissingHourPolicy,
    ) -> Self {
        Self {
            updated_at,
            intervals: normalize_with(days, policy),
        }
    }
}

/// A one-off planned shutdown announced for the address.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ShutdownNotice {
    /// When the notice was last updated upstream.
    pub updated_at: DateTime<Utc>,
    /// Start of the shutdown.
    pub started_at: DateTime<Utc>,
    /// Announced end of the shutdown.
    pub ends_at: DateTime<Utc>,
    /// Human-readable reason.
    pub reason: String,
}

/// Normalizes days treating missing hours as "no outage".
pub fn normalize(days: &[DaySchedule]) -> Vec<OutageInterval> {
    normalize_with(days, MissingHourPolicy::default())
}

/// Normalizes days into merged, ordered outage intervals.
///
/// Days are processed in chronological order regardless of input order. An
/// interval that starts at or before the end of the previous one extends it.
pub fn normalize_with(days: &[DaySchedule], policy: MissingHourPolicy) -> Vec<OutageInterval> {
    let mut ordered: Vec<&DaySchedule> = days.iter().collect();
    ordered.sort_by_key(|day| day.midnight.with_timezone(&Utc));

    let mut result: Vec<OutageInterval> = Vec::new();
    for day in ordered {
        let tz = day.midnight.timezone();
        let base = day.midnight.naive_local();

        for hour in 1..=24u8 {
            let code = match (day.hours.get(&hour), policy) {
                (Some(code), _) => *code,
                (None, MissingHourPolicy::NoOutage) => continue,
                (None, MissingHourPolicy::Outage) => HourCode::Outage,
            };
            let Some((from, to)) = code.outage_minutes() else {
                continue;
            };

            let offset = i64::from(hour - 1) * 60;
            let start = resolve_local(&tz, base + Duration::minutes(offset + i64::from(from)));
            let end = resolve_local(&tz, base + Duration::minutes(offset + i64::from(to)));
            let (Some(start), Some(end)) = (start, end) else {
                warn!(hour, day = %day.midnight.date_naive(), "Hour does not map to local time");
                continue;
            };

            match OutageInterval::new(start.with_timezone(&Utc), end.with_timezone(&Utc)) {
                Some(interval) => push_merged(&mut result, interval),
                None => {
                    debug!(hour, day = %day.midnight.date_naive(), "Dropping empty interval");
                }
            }
        }
    }

    result
}

fn push_merged(result: &mut Vec<OutageInterval>, next: OutageInterval) {
    if let Some(last) = result.last_mut()
        && next.start <= last.end
    {
        if next.end > last.end {
            last.end = next.end;
        }
        return;
    }
    result.push(next);
}
