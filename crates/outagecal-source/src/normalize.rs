//! Raw record to normalized schedule conversion.
//!
//! Every date/time string is coerced in the feed timezone. A string that does
//! not parse aborts the conversion: it means the upstream format drifted and
//! the refresh must fail rather than publish a guessed schedule.

use outagecal_core::{
    DaySchedule, MissingHourPolicy, NormalizedSchedule, ShutdownNotice, TimeCoercion, TimeError,
};
use tracing::debug;

use crate::error::{SourceError, SourceResult};
use crate::raw::{RawDay, RawScheduleRecord, RawShutdown};

/// Reason used for shutdown category 1.
pub const PLANNED_WORKS_REASON: &str = "Планові ремонтні роботи";

/// Reason used when the category is not recognized.
pub const UNKNOWN_REASON: &str = "Unknown";

/// A raw record after coercion and interval normalization.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NormalizedRecord {
    /// Group label, e.g. `3.1`.
    pub group: String,
    /// Merged outage intervals.
    pub schedule: NormalizedSchedule,
    /// Planned shutdown, if announced.
    pub shutdown: Option<ShutdownNotice>,
}

/// Converts a raw record.
pub fn normalize_record(
    raw: &RawScheduleRecord,
    coercion: &TimeCoercion,
    policy: MissingHourPolicy,
) -> SourceResult<NormalizedRecord> {
    let updated_at = coercion
        .parse(&raw.schedule.updated_at)
        .map_err(|e| invalid("schedule.updatedAt", e))?;

    let days = raw
        .schedule
        .days
        .iter()
        .map(|day| convert_day(day, coercion))
        .collect::<SourceResult<Vec<_>>>()?;

    let schedule = NormalizedSchedule::from_days(updated_at, &days, policy);
    let shutdown = raw
        .shutdown
        .as_ref()
        .map(|s| convert_shutdown(s, coercion))
        .transpose()?;

    debug!(
        group = %raw.group,
        days = days.len(),
        intervals = schedule.intervals.len(),
        shutdown = shutdown.is_some(),
        "Normalized schedule record"
    );

    Ok(NormalizedRecord {
        group: raw.group.label(),
        schedule,
        shutdown,
    })
}

/// Maps a shutdown category to its human-readable reason.
pub fn shutdown_reason(kind: Option<i64>, sub_type: Option<&str>) -> String {
    match kind {
        Some(1) => PLANNED_WORKS_REASON.to_string(),
        Some(2) => sub_type.unwrap_or(UNKNOWN_REASON).to_string(),
        _ => UNKNOWN_REASON.to_string(),
    }
}

fn convert_day(day: &RawDay, coercion: &TimeCoercion) -> SourceResult<DaySchedule> {
    let midnight = coercion
        .midnight(day.timestamp)
        .map_err(|e| invalid("days[].timestamp", e))?;
    Ok(DaySchedule::from_raw_hours(
        midnight,
        day.hours.iter().map(|(k, v)| (k.as_str(), v.as_deref())),
    ))
}

fn convert_shutdown(raw: &RawShutdown, coercion: &TimeCoercion) -> SourceResult<ShutdownNotice> {
    Ok(ShutdownNotice {
        updated_at: coercion
            .parse(&raw.updated_at)
            .map_err(|e| invalid("shutdown.updatedAt", e))?,
        started_at: coercion
            .parse(&raw.start_date)
            .map_err(|e| invalid("shutdown.startDate", e))?,
        ends_at: coercion
            .parse(&raw.end_date)
            .map_err(|e| invalid("shutdown.endDate", e))?,
        reason: shutdown_reason(raw.kind.as_number(), raw.sub_type.as_deref()),
    })
}

fn invalid(field: &str, err: TimeError) -> SourceError {
    SourceError::invalid_response(format!("{field}: {err}")).with_source(err)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::SourceErrorCode;
    use chrono::{DateTime, TimeZone, Utc};

    fn utc(y: i32, m: u32, d: u32, h: u32, min: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(y, m, d, h, min, 0).unwrap()
    }

    // 2024-01-01T00:00 and 2024-01-02T00:00 in Kyiv.
    const JAN_1: i64 = 1_704_060_000;
    const JAN_2: i64 = JAN_1 + 86_400;

    fn record(json: &str) -> RawScheduleRecord {
        RawScheduleRecord::from_json(json).unwrap()
    }

    #[test]
    fn converts_schedule() {
        let raw = record(&format!(
            r#"{{
                "group": 3.1,
                "schedule": {{
                    "updatedAt": "01.01.2024 08:00",
                    "days": [
                        {{ "timestamp": {JAN_1}, "hours": {{ "3": "no", "4": "no", "5": "first", "24": "no" }} }},
                        {{ "timestamp": {JAN_2}, "hours": {{ "1": "second", "2": "yes" }} }}
                    ]
                }}
            }}"#
        ));

        let normalized =
            normalize_record(&raw, &TimeCoercion::default(), MissingHourPolicy::NoOutage).unwrap();

        assert_eq!(normalized.group, "3.1");
        assert_eq!(normalized.schedule.updated_at, utc(2024, 1, 1, 6, 0));
        let spans: Vec<_> = normalized
            .schedule
            .intervals
            .iter()
            .map(|i| (i.start, i.end))
            .collect();
        assert_eq!(
            spans,
            vec![
                (utc(2024, 1, 1, 0, 0), utc(2024, 1, 1, 2, 30)),
                (utc(2024, 1, 1, 21, 0), utc(2024, 1, 1, 22, 0)),
                (utc(2024, 1, 1, 22, 30), utc(2024, 1, 1, 23, 0)),
            ]
        );
        assert!(normalized.shutdown.is_none());
    }

    #[test]
    fn converts_shutdown() {
        let raw = record(&format!(
            r#"{{
                "group": 1,
                "schedule": {{ "updatedAt": "01.01.2024 08:00", "days": [{{ "timestamp": {JAN_1}, "hours": {{}} }}] }},
                "shutdown": {{
                    "updatedAt": "07:15 01.01.2024",
                    "startDate": "09:00 02.01.2024",
                    "endDate": "17:00 02.01.2024",
                    "type": 1
                }}
            }}"#
        ));

        let notice = normalize_record(&raw, &TimeCoercion::default(), MissingHourPolicy::NoOutage)
            .unwrap()
            .shutdown
            .unwrap();
        assert_eq!(notice.updated_at, utc(2024, 1, 1, 5, 15));
        assert_eq!(notice.started_at, utc(2024, 1, 2, 7, 0));
        assert_eq!(notice.ends_at, utc(2024, 1, 2, 15, 0));
        assert_eq!(notice.reason, PLANNED_WORKS_REASON);
    }

    #[test]
    fn reasons() {
        assert_eq!(shutdown_reason(Some(1), Some("ignored")), PLANNED_WORKS_REASON);
        assert_eq!(shutdown_reason(Some(2), Some("Emergency")), "Emergency");
        assert_eq!(shutdown_reason(Some(2), None), UNKNOWN_REASON);
        assert_eq!(shutdown_reason(Some(7), None), UNKNOWN_REASON);
        assert_eq!(shutdown_reason(None, None), UNKNOWN_REASON);
    }

    #[test]
    fn missing_hours_follow_policy() {
        let raw = record(&format!(
            r#"{{ "group": 2, "schedule": {{ "updatedAt": "01.01.2024 08:00",
                "days": [{{ "timestamp": {JAN_1}, "hours": {{ "1": "yes" }} }}] }} }}"#
        ));
        let coercion = TimeCoercion::default();

        let lenient = normalize_record(&raw, &coercion, MissingHourPolicy::NoOutage).unwrap();
        assert!(lenient.schedule.intervals.is_empty());

        let strict = normalize_record(&raw, &coercion, MissingHourPolicy::Outage).unwrap();
        assert_eq!(strict.schedule.intervals.len(), 1);
        assert_eq!(strict.schedule.intervals[0].start, utc(2023, 12, 31, 23, 0));
    }

    #[test]
    fn unparseable_timestamp_fails() {
        let raw = record(
            r#"{ "group": 2, "schedule": { "updatedAt": "yesterday", "days": [] } }"#,
        );
        let err = normalize_record(&raw, &TimeCoercion::default(), MissingHourPolicy::NoOutage)
            .unwrap_err();
        assert_eq!(err.code(), SourceErrorCode::InvalidResponse);
        assert!(err.message().starts_with("schedule.updatedAt"));
    }

    #[test]
    fn unparseable_shutdown_date_fails() {
        let raw = record(
            r#"{ "group": 2, "schedule": { "updatedAt": "01.01.2024 08:00", "days": [] },
                 "shutdown": { "updatedAt": "07:15 01.01.2024", "startDate": "soon",
                               "endDate": "17:00 02.01.2024", "type": 1 } }"#,
        );
        let err = normalize_record(&raw, &TimeCoercion::default(), MissingHourPolicy::NoOutage)
            .unwrap_err();
        assert!(err.message().starts_with("shutdown.startDate"));
    }
}
