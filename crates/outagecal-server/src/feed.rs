//! Feed pipeline: fetch, normalize, build, serialize.
//!
//! A [`Feed`] owns the settings and source for one address. Its pipeline is
//! wrapped in a [`FeedCoordinator`] so concurrent HTTP requests and the
//! periodic driver share runs. Feeds never share state with each other.

use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use chrono_tz::Tz;
use outagecal_core::{CalendarBuilder, MissingHourPolicy, ShutdownNotice, TimeCoercion};
use outagecal_source::{RawScheduleRecord, ScheduleSource, normalize_record};
use serde::Serialize;
use sha2::{Digest, Sha256};
use tracing::{debug, info};

use crate::coordinator::RefreshCoordinator;
use crate::error::{FeedError, ServerError, ServerResult};

/// Coordinator type used for every feed.
pub type FeedCoordinator = RefreshCoordinator<Arc<FeedSnapshot>, FeedError>;

/// Per-feed settings.
#[derive(Debug, Clone)]
pub struct FeedSettings {
    /// URL path segment, e.g. `dnem-home`.
    pub slug: String,
    /// Utility region code, e.g. `dnem`.
    pub region: String,
    /// Address shown as the event location.
    pub location: Option<String>,
    /// Timezone used for parsing and rendering.
    pub coercion: TimeCoercion,
    /// Treatment of hours missing from the table.
    pub missing_hours: MissingHourPolicy,
}

impl FeedSettings {
    /// Creates settings with the default timezone and policy.
    pub fn new(slug: impl Into<String>, region: impl Into<String>) -> Self {
        Self {
            slug: slug.into(),
            region: region.into(),
            location: None,
            coercion: TimeCoercion::default(),
            missing_hours: MissingHourPolicy::default(),
        }
    }

    /// Builder: set the location.
    pub fn with_location(mut self, location: impl Into<String>) -> Self {
        self.location = Some(location.into());
        self
    }

    /// Builder: set the timezone.
    pub fn with_timezone(mut self, tz: Tz) -> Self {
        self.coercion = TimeCoercion::new(tz);
        self
    }

    /// Builder: set the missing-hour policy.
    pub fn with_missing_hours(mut self, policy: MissingHourPolicy) -> Self {
        self.missing_hours = policy;
        self
    }

    /// Calendar name, e.g. `DTEK DNEM Outages 3.1`.
    pub fn calendar_name(&self, group: &str) -> String {
        format!("DTEK {} Outages {}", self.region.to_uppercase(), group)
    }

    /// Event summary, e.g. `Power outage (group 3.1)`.
    pub fn summary(&self, group: &str) -> String {
        format!("Power outage (group {group})")
    }
}

/// Planned shutdown details published next to the calendar.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ShutdownMetadata {
    /// Feed slug.
    pub feed: String,
    /// Group label.
    pub group: String,
    /// The notice itself.
    #[serde(flatten)]
    pub notice: ShutdownNotice,
}

/// Result of one successful pipeline run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FeedSnapshot {
    /// Serialized calendar.
    pub body: String,
    /// Strong entity tag for `body`.
    pub etag: String,
    /// Build instant.
    pub built_at: DateTime<Utc>,
    /// Group label.
    pub group: String,
    /// Number of calendar events.
    pub events: usize,
    /// Planned shutdown, if any.
    pub shutdown: Option<ShutdownMetadata>,
}

/// One independent feed.
pub struct Feed {
    settings: FeedSettings,
    source: Arc<dyn ScheduleSource>,
}

impl Feed {
    /// Creates a feed reading from `source`.
    pub fn new(settings: FeedSettings, source: Arc<dyn ScheduleSource>) -> Self {
        Self { settings, source }
    }

    /// Returns the settings.
    pub fn settings(&self) -> &FeedSettings {
        &self.settings
    }

    /// Runs the pure half of the pipeline on an already fetched record.
    pub fn render(
        &self,
        raw: &RawScheduleRecord,
        built_at: DateTime<Utc>,
    ) -> Result<FeedSnapshot, FeedError> {
        let settings = &self.settings;
        let record = normalize_record(raw, &settings.coercion, settings.missing_hours)
            .map_err(|e| e.with_source_name(&settings.slug))?;

        let mut builder =
            CalendarBuilder::new(settings.calendar_name(&record.group), settings.coercion)
                .with_built_at(built_at)
                .with_summary(settings.summary(&record.group));
        if let Some(location) = &settings.location {
            builder = builder.with_location(location.clone());
        }
        builder = builder.with_schedule(&record.schedule);
        if let Some(notice) = &record.shutdown {
            builder = builder.with_shutdown(notice);
        }
        let document = builder.build()?;

        let body = document.to_string();
        debug!(
            feed = %settings.slug,
            events = document.events().len(),
            bytes = body.len(),
            "Rendered calendar"
        );

        Ok(FeedSnapshot {
            etag: etag_for(&body),
            body,
            built_at,
            events: document.events().len(),
            shutdown: record.shutdown.map(|notice| ShutdownMetadata {
                feed: settings.slug.clone(),
                group: record.group.clone(),
                notice,
            }),
            group: record.group,
        })
    }

    /// Fetches a fresh record and renders it.
    pub async fn refresh(&self) -> Result<FeedSnapshot, FeedError> {
        let raw = self.source.fetch().await?;
        let snapshot = self.render(&raw, Utc::now())?;
        info!(
            feed = %self.settings.slug,
            source = self.source.name(),
            group = %snapshot.group,
            events = snapshot.events,
            "Feed refreshed"
        );
        Ok(snapshot)
    }

    /// Wraps the feed in a coordinator named after its slug.
    pub fn into_coordinator(self) -> FeedCoordinator {
        let slug = self.settings.slug.clone();
        let feed = Arc::new(self);
        RefreshCoordinator::new(slug, move || {
            let feed = Arc::clone(&feed);
            async move { feed.refresh().await.map(Arc::new) }
        })
    }
}

/// All feeds served by one process, keyed by slug.
#[derive(Debug, Default)]
pub struct FeedRegistry {
    feeds: BTreeMap<String, Arc<FeedCoordinator>>,
}

impl FeedRegistry {
    /// Creates an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a feed. Slugs must be unique.
    pub fn insert(&mut self, coordinator: FeedCoordinator) -> ServerResult<()> {
        let slug = coordinator.name().to_string();
        if self.feeds.contains_key(&slug) {
            return Err(ServerError::DuplicateFeed { slug });
        }
        self.feeds.insert(slug, Arc::new(coordinator));
        Ok(())
    }

    /// Looks up a feed by slug.
    pub fn get(&self, slug: &str) -> Option<Arc<FeedCoordinator>> {
        self.feeds.get(slug).cloned()
    }

    /// Iterates over all feeds in slug order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &Arc<FeedCoordinator>)> {
        self.feeds.iter().map(|(slug, c)| (slug.as_str(), c))
    }

    /// Number of feeds.
    pub fn len(&self) -> usize {
        self.feeds.len()
    }

    /// True if no feed is registered.
    pub fn is_empty(&self) -> bool {
        self.feeds.is_empty()
    }
}

/// Quoted SHA-256 hex digest of `body`.
pub fn etag_for(body: &str) -> String {
    let digest = Sha256::digest(body.as_bytes());
    format!("\"{}\"", hex::encode(digest))
}

mod hex {
    pub fn encode(bytes: impl AsRef<[u8]>) -> String {
        bytes
            .as_ref()
            .iter()
            .map(|b| format!("{:02x}", b))
            .collect()
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use chrono::TimeZone;
    use outagecal_source::{ErrorSource, SourceError, StaticSource};

    // 2024-01-01T00:00 in Kyiv.
    pub(crate) const JAN_1: i64 = 1_704_060_000;

    pub(crate) fn sample_record() -> RawScheduleRecord {
        RawScheduleRecord::from_json(&format!(
            r#"{{
                "group": 3.1,
                "schedule": {{
                    "updatedAt": "01.01.2024 08:00",
                    "days": [{{ "timestamp": {JAN_1}, "hours": {{ "5": "no", "6": "no", "7": "first" }} }}]
                }},
                "shutdown": {{
                    "updatedAt": "07:00 01.01.2024",
                    "startDate": "09:00 02.01.2024",
                    "endDate": "17:00 02.01.2024",
                    "type": 1
                }}
            }}"#
        ))
        .unwrap()
    }

    pub(crate) fn static_feed(slug: &str) -> Feed {
        Feed::new(
            FeedSettings::new(slug, "dnem").with_location("Dnipro, Shevchenka St 1"),
            Arc::new(StaticSource::new("fixture", sample_record())),
        )
    }

    fn built_at() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 1, 1, 6, 0, 5).unwrap()
    }

    #[test]
    fn names_follow_region_and_group() {
        let settings = FeedSettings::new("home", "kem");
        assert_eq!(settings.calendar_name("1.2"), "DTEK KEM Outages 1.2");
        assert_eq!(settings.summary("1.2"), "Power outage (group 1.2)");
    }

    #[test]
    fn render_builds_calendar_and_metadata() {
        let snapshot = static_feed("home").render(&sample_record(), built_at()).unwrap();

        assert_eq!(snapshot.group, "3.1");
        assert_eq!(snapshot.events, 2);
        assert!(snapshot.body.contains("PRODID:-//DTEK DTEK DNEM Outages 3.1//EN\r\n"));
        assert!(snapshot.body.contains("SUMMARY:Power outage (group 3.1)\r\n"));
        assert!(snapshot.body.contains("DTSTART;TZID=Europe/Kiev:20240101T040000\r\n"));
        assert!(snapshot.body.contains("DTEND;TZID=Europe/Kiev:20240101T063000\r\n"));
        assert_eq!(
            snapshot.body.matches("LOCATION:Dnipro\\, Shevchenka St 1\r\n").count(),
            snapshot.events
        );

        let shutdown = snapshot.shutdown.unwrap();
        assert_eq!(shutdown.feed, "home");
        assert_eq!(shutdown.notice.started_at, Utc.with_ymd_and_hms(2024, 1, 2, 7, 0, 0).unwrap());
    }

    #[test]
    fn every_schedule_event_carries_location() {
        let raw = RawScheduleRecord::from_json(&format!(
            r#"{{
                "group": 3.1,
                "schedule": {{
                    "updatedAt": "01.01.2024 08:00",
                    "days": [{{ "timestamp": {JAN_1}, "hours": {{ "5": "no", "12": "first" }} }}]
                }}
            }}"#
        ))
        .unwrap();
        let feed = Feed::new(
            FeedSettings::new("home", "dnem").with_location("Dnipro"),
            Arc::new(StaticSource::new("fixture", raw.clone())),
        );

        let snapshot = feed.render(&raw, built_at()).unwrap();
        assert_eq!(snapshot.events, 2);
        assert!(snapshot.shutdown.is_none());
        assert_eq!(snapshot.body.matches("BEGIN:VEVENT\r\n").count(), 2);
        assert_eq!(snapshot.body.matches("LOCATION:Dnipro\r\n").count(), 2);
    }

    #[test]
    fn etag_tracks_body() {
        let feed = static_feed("home");
        let a = feed.render(&sample_record(), built_at()).unwrap();
        let b = feed.render(&sample_record(), built_at()).unwrap();
        assert_eq!(a.etag, b.etag);
        assert_eq!(a.etag, etag_for(&a.body));
        assert_eq!(a.etag.len(), 66);

        let later = feed
            .render(&sample_record(), built_at() + chrono::Duration::seconds(1))
            .unwrap();
        assert_ne!(a.etag, later.etag);
    }

    #[test]
    fn shutdown_metadata_json() {
        let snapshot = static_feed("home").render(&sample_record(), built_at()).unwrap();
        let json = serde_json::to_value(snapshot.shutdown.unwrap()).unwrap();
        assert_eq!(json["feed"], "home");
        assert_eq!(json["group"], "3.1");
        assert_eq!(json["reason"], "Планові ремонтні роботи");
        assert_eq!(json["startedAt"], "2024-01-02T07:00:00Z");
        assert_eq!(json["endsAt"], "2024-01-02T15:00:00Z");
    }

    #[tokio::test]
    async fn coordinator_runs_pipeline() {
        let coordinator = static_feed("home").into_coordinator();
        assert_eq!(coordinator.name(), "home");

        let snapshot = coordinator.request().await.unwrap();
        assert_eq!(snapshot.events, 2);
        assert_eq!(coordinator.last_good().await.as_deref(), Some(&*snapshot));
    }

    #[tokio::test]
    async fn source_failure_surfaces() {
        let feed = Feed::new(
            FeedSettings::new("down", "dnem"),
            Arc::new(ErrorSource::new("scraper", SourceError::unavailable("exit 1"))),
        );
        let err = feed.refresh().await.unwrap_err();
        assert!(matches!(err, FeedError::Source(_)));
        assert!(err.is_retryable());
    }

    #[test]
    fn registry_rejects_duplicates() {
        let mut registry = FeedRegistry::new();
        registry.insert(static_feed("a").into_coordinator()).unwrap();
        registry.insert(static_feed("b").into_coordinator()).unwrap();
        assert!(matches!(
            registry.insert(static_feed("a").into_coordinator()),
            Err(ServerError::DuplicateFeed { .. })
        ));
        assert_eq!(registry.len(), 2);
        assert!(registry.get("b").is_some());
        assert!(registry.get("c").is_none());
        let slugs: Vec<_> = registry.iter().map(|(slug, _)| slug).collect();
        assert_eq!(slugs, vec!["a", "b"]);
    }
}
