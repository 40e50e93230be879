//! Error types for time coercion and calendar rendering.

use thiserror::Error;

/// Errors raised while coercing upstream date/time strings.
///
/// Every variant indicates format drift on the upstream side, so callers are
/// expected to abort the current refresh instead of substituting a default.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TimeError {
    /// The input did not split into exactly one date and one time token.
    #[error("expected a date and a time token, got {input:?}")]
    MalformedPair { input: String },

    /// Neither token of the pair contains a colon.
    #[error("no time token in {first:?} / {second:?}")]
    MissingTime { first: String, second: String },

    /// The date token matches neither `DD.MM.YYYY` nor `YYYY-MM-DD`.
    #[error("unrecognized date token {token:?}")]
    InvalidDate { token: String },

    /// The time token is not `HH:MM` or `HH:MM:SS` with a valid clock value.
    #[error("unrecognized time token {token:?}")]
    InvalidTime { token: String },

    /// The local wall-clock value cannot be mapped to an instant.
    #[error("local time {value} does not exist in {timezone}")]
    NonexistentLocalTime { value: String, timezone: String },

    /// An epoch timestamp outside the representable range.
    #[error("invalid epoch timestamp {0}")]
    InvalidEpoch(i64),
}

/// Invariant violations detected while building a calendar document.
///
/// These are programming errors: a document that fails these checks would
/// corrupt the published feed, so it is rejected as a whole.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CalendarError {
    /// Two events in one document share an identifier.
    #[error("duplicate event uid {uid}")]
    DuplicateUid { uid: String },

    /// An event does not end strictly after it starts.
    #[error("event {uid} ends at {end} which is not after its start {start}")]
    EmptyInterval {
        uid: String,
        start: String,
        end: String,
    },
}
