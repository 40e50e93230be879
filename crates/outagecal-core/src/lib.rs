//! Core logic: schedule normalization, time coercion, calendar rendering

pub mod calendar;
pub mod error;
pub mod schedule;
pub mod time;
pub mod tracing;

pub use calendar::{CalendarBuilder, CalendarDocument, CalendarEvent, escape_text, sanitize_name};
pub use error::{CalendarError, TimeError};
pub use schedule::{
    DaySchedule, HourCode, MissingHourPolicy, NormalizedSchedule, OutageInterval, ShutdownNotice,
    normalize, normalize_with,
};
pub use time::{DEFAULT_TIMEZONE, LocalStamp, TimeCoercion, coerce_local, resolve_local};
pub use tracing::{TracingConfig, TracingError, TracingOutputFormat, init_tracing, parse_level};
