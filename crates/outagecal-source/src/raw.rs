//! Raw records as produced by the scraping collaborator.
//!
//! The collaborator prints one JSON object per run:
//!
//! ```json
//! {
//!   "group": 3.1,
//!   "schedule": {
//!     "updatedAt": "14.03.2024 09:30",
//!     "days": [
//!       { "timestamp": 1710367200, "hours": { "1": "yes", "2": "first", "3": "no" } }
//!     ]
//!   },
//!   "shutdown": {
//!     "updatedAt": "09:30 14.03.2024",
//!     "startDate": "10:00 15.03.2024",
//!     "endDate": "18:00 15.03.2024",
//!     "type": 1
//!   }
//! }
//! ```
//!
//! Field values are kept as upstream strings; interpretation happens in
//! [`crate::normalize`].

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::{SourceError, SourceResult};

/// One scrape of an address.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawScheduleRecord {
    /// Outage group the address belongs to.
    pub group: RawGroup,
    /// Hourly table.
    pub schedule: RawSchedule,
    /// Planned shutdown announced for the address, if any.
    #[serde(default)]
    pub shutdown: Option<RawShutdown>,
}

impl RawScheduleRecord {
    /// Parses a record from JSON text.
    pub fn from_json(input: &str) -> SourceResult<Self> {
        serde_json::from_str(input).map_err(|e| {
            SourceError::invalid_response(format!("malformed schedule record: {e}")).with_source(e)
        })
    }
}

/// Group identifier as sent upstream: usually a number, sometimes a label
/// such as `"GPV3.1"`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RawGroup {
    /// Numeric group, e.g. `3.1`.
    Number(f64),
    /// Textual group label.
    Label(String),
}

impl RawGroup {
    /// Returns the label shown to subscribers, e.g. `3.1` or `2`.
    ///
    /// Textual labels lose their non-numeric prefix.
    pub fn label(&self) -> String {
        match self {
            Self::Number(n) => n.to_string(),
            Self::Label(s) => {
                let trimmed = s.trim_start_matches(|c: char| !c.is_ascii_digit() && c != '.');
                match trimmed.parse::<f64>() {
                    Ok(n) => n.to_string(),
                    Err(_) => s.trim().to_string(),
                }
            }
        }
    }
}

impl fmt::Display for RawGroup {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.label())
    }
}

/// The hourly table plus its freshness marker.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawSchedule {
    /// Date/time pair in either order, e.g. `"14.03.2024 09:30"`.
    pub updated_at: String,
    /// Days in the observation window, usually today and tomorrow.
    #[serde(default)]
    pub days: Vec<RawDay>,
}

/// One day of the hourly table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RawDay {
    /// Epoch seconds identifying the day.
    pub timestamp: i64,
    /// Hour key (`"1"`..`"24"`) to code. `null` means no entry.
    #[serde(default)]
    pub hours: BTreeMap<String, Option<String>>,
}

/// Planned shutdown fields.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawShutdown {
    /// Date/time pair, typically `time date` order.
    pub updated_at: String,
    /// Date/time pair.
    #[serde(alias = "start_date")]
    pub start_date: String,
    /// Date/time pair.
    #[serde(alias = "end_date")]
    pub end_date: String,
    /// Shutdown category; `1` is planned maintenance, `2` carries `subType`.
    #[serde(rename = "type")]
    pub kind: RawShutdownKind,
    /// Free-text reason for category 2.
    #[serde(default, alias = "sub_type")]
    pub sub_type: Option<String>,
}

/// Shutdown category as sent upstream, either a number or a numeric string.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RawShutdownKind {
    /// Numeric category.
    Number(i64),
    /// Category as a string.
    Text(String),
}

impl RawShutdownKind {
    /// Numeric value, if any.
    pub fn as_number(&self) -> Option<i64> {
        match self {
            Self::Number(n) => Some(*n),
            Self::Text(s) => s.trim().parse().ok(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const RECORD: &str = r#"{
        "group": 3.1,
        "schedule": {
            "updatedAt": "14.03.2024 09:30",
            "days": [
                { "timestamp": 1710367200, "hours": { "1": "yes", "2": "first", "3": null } }
            ]
        },
        "shutdown": {
            "updatedAt": "09:30 14.03.2024",
            "start_date": "10:00 15.03.2024",
            "end_date": "18:00 15.03.2024",
            "type": "2",
            "sub_type": "Аварійні роботи"
        }
    }"#;

    #[test]
    fn parses_full_record() {
        let record = RawScheduleRecord::from_json(RECORD).unwrap();
        assert_eq!(record.group.label(), "3.1");
        assert_eq!(record.schedule.updated_at, "14.03.2024 09:30");
        assert_eq!(record.schedule.days.len(), 1);

        let day = &record.schedule.days[0];
        assert_eq!(day.timestamp, 1_710_367_200);
        assert_eq!(day.hours.get("2"), Some(&Some("first".to_string())));
        assert_eq!(day.hours.get("3"), Some(&None));

        let shutdown = record.shutdown.unwrap();
        assert_eq!(shutdown.start_date, "10:00 15.03.2024");
        assert_eq!(shutdown.kind.as_number(), Some(2));
        assert_eq!(shutdown.sub_type.as_deref(), Some("Аварійні роботи"));
    }

    #[test]
    fn shutdown_is_optional() {
        let record = RawScheduleRecord::from_json(
            r#"{ "group": 2, "schedule": { "updatedAt": "14.03.2024 09:30", "days": [] }, "shutdown": null }"#,
        )
        .unwrap();
        assert!(record.shutdown.is_none());
        assert_eq!(record.group.to_string(), "2");
    }

    #[test]
    fn group_labels() {
        assert_eq!(RawGroup::Label("GPV3.1".into()).label(), "3.1");
        assert_eq!(RawGroup::Label("Група 4".into()).label(), "4");
        assert_eq!(RawGroup::Label("none".into()).label(), "none");
        assert_eq!(RawGroup::Number(1.0).label(), "1");
    }

    #[test]
    fn malformed_json_is_invalid_response() {
        let err = RawScheduleRecord::from_json("{ \"group\": ").unwrap_err();
        assert_eq!(err.code(), crate::SourceErrorCode::InvalidResponse);
    }
}
