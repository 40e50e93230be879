//! Time coercion for upstream schedule strings.
//!
//! The upstream service is inconsistent about how it writes timestamps: some
//! fields are `date time`, others `time date`, and dates come either as
//! `DD.MM.YYYY` or `YYYY-MM-DD`. It also writes midnight as hour `24` of the
//! previous day. [`TimeCoercion`] reconciles all of that into UTC instants and
//! renders instants back into the feed timezone.
//!
//! The timezone is an explicit value, never process state, so several feeds
//! with different zones can coexist and tests can pin a zone.

use std::fmt;
use std::sync::LazyLock;

use chrono::{DateTime, Duration, NaiveDate, NaiveDateTime, NaiveTime, TimeZone, Utc};
use chrono_tz::Tz;
use regex::Regex;

use crate::error::TimeError;

/// Default feed timezone. The legacy name keeps `TZID` stable for existing
/// subscribers.
pub const DEFAULT_TIMEZONE: Tz = chrono_tz::Europe::Kiev;

static TIME_TOKEN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(\d{1,2}):(\d{2})(?::(\d{2}))?$").expect("Invalid time token regex")
});

const DATE_FORMATS: [&str; 2] = ["%d.%m.%Y", "%Y-%m-%d"];

/// Maps a local wall-clock value to an instant in `tz`.
///
/// Ambiguous values (clocks going back) resolve to the earliest instant.
/// Values inside a gap (clocks going forward) are shifted forward by one hour.
pub fn resolve_local<T: TimeZone>(tz: &T, naive: NaiveDateTime) -> Option<DateTime<T>> {
    tz.from_local_datetime(&naive)
        .earliest()
        .or_else(|| tz.from_local_datetime(&(naive + Duration::hours(1))).earliest())
}

/// A localized date and time, as shown to feed consumers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LocalStamp {
    /// `YYYY-MM-DD`
    pub date: String,
    /// `HH:MM:SS`
    pub time: String,
}

impl fmt::Display for LocalStamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.date, self.time)
    }
}

/// Converts between upstream strings, UTC instants and feed-local renderings.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimeCoercion {
    tz: Tz,
}

impl Default for TimeCoercion {
    fn default() -> Self {
        Self::new(DEFAULT_TIMEZONE)
    }
}

impl TimeCoercion {
    /// Creates a coercion bound to the given timezone.
    pub fn new(tz: Tz) -> Self {
        Self { tz }
    }

    /// Returns the feed timezone.
    pub fn timezone(&self) -> Tz {
        self.tz
    }

    /// Parses a whitespace-separated pair such as `"14.03.2024 09:30"` or
    /// `"09:30 14.03.2024"`.
    pub fn parse(&self, input: &str) -> Result<DateTime<Utc>, TimeError> {
        let tokens: Vec<&str> = input.split_whitespace().collect();
        match tokens.as_slice() {
            [first, second] => self.to_timestamp(first, second),
            _ => Err(TimeError::MalformedPair {
                input: input.to_string(),
            }),
        }
    }

    /// Converts a date token and a time token, given in either order, into an
    /// instant.
    ///
    /// The token containing a colon is the time. Hour `24` is rolled over to
    /// hour `0` of the following day.
    pub fn to_timestamp(&self, first: &str, second: &str) -> Result<DateTime<Utc>, TimeError> {
        let (date_token, time_token) = if first.contains(':') {
            (second, first)
        } else if second.contains(':') {
            (first, second)
        } else {
            return Err(TimeError::MissingTime {
                first: first.to_string(),
                second: second.to_string(),
            });
        };

        let naive = coerce_local(date_token, time_token)?;
        resolve_local(&self.tz, naive)
            .map(|dt| dt.with_timezone(&Utc))
            .ok_or_else(|| TimeError::NonexistentLocalTime {
                value: naive.to_string(),
                timezone: self.tz.name().to_string(),
            })
    }

    /// Returns local midnight of the calendar day that contains `epoch_seconds`.
    pub fn midnight(&self, epoch_seconds: i64) -> Result<DateTime<Tz>, TimeError> {
        let instant = Utc
            .timestamp_opt(epoch_seconds, 0)
            .single()
            .ok_or(TimeError::InvalidEpoch(epoch_seconds))?;
        let naive = instant
            .with_timezone(&self.tz)
            .date_naive()
            .and_time(NaiveTime::MIN);

        resolve_local(&self.tz, naive).ok_or_else(|| TimeError::NonexistentLocalTime {
            value: naive.to_string(),
            timezone: self.tz.name().to_string(),
        })
    }

    /// Renders an instant as a local date and time.
    pub fn localize(&self, instant: DateTime<Utc>) -> LocalStamp {
        let local = instant.with_timezone(&self.tz);
        LocalStamp {
            date: local.format("%Y-%m-%d").to_string(),
            time: local.format("%H:%M:%S").to_string(),
        }
    }

    /// Renders an instant as `YYYYMMDDThhmmss` in the feed timezone.
    pub fn to_calendar_stamp(&self, instant: DateTime<Utc>) -> String {
        instant
            .with_timezone(&self.tz)
            .format("%Y%m%dT%H%M%S")
            .to_string()
    }
}

/// Combines a date token and a time token into a local wall-clock value.
pub fn coerce_local(date_token: &str, time_token: &str) -> Result<NaiveDateTime, TimeError> {
    let date = parse_date(date_token)?;

    let invalid_time = || TimeError::InvalidTime {
        token: time_token.to_string(),
    };
    let caps = TIME_TOKEN.captures(time_token).ok_or_else(invalid_time)?;
    let field = |i: usize| -> Result<u32, TimeError> {
        caps.get(i)
            .map_or(Ok(0), |m| m.as_str().parse().map_err(|_| invalid_time()))
    };
    let (mut hour, minute, second) = (field(1)?, field(2)?, field(3)?);

    let mut date = date;
    if hour == 24 {
        date = date.succ_opt().ok_or_else(invalid_time)?;
        hour = 0;
    }

    let time = NaiveTime::from_hms_opt(hour, minute, second).ok_or_else(invalid_time)?;
    Ok(date.and_time(time))
}

fn parse_date(token: &str) -> Result<NaiveDate, TimeError> {
    DATE_FORMATS
        .iter()
        .find_map(|fmt| NaiveDate::parse_from_str(token, fmt).ok())
        .ok_or_else(|| TimeError::InvalidDate {
            token: token.to_string(),
        })
}
