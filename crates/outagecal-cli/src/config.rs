//! Configuration file.
//!
//! One `config.toml`, by default at `~/.config/outagecal/config.toml`:
//!
//! ```toml
//! [server]
//! bind = "0.0.0.0:8086"
//!
//! [logging]
//! level = "info"
//! format = "json"
//!
//! [[feeds]]
//! slug = "home"
//! region = "dnem"
//! location = "Dnipro, Shevchenka St 1"
//! refresh_interval_secs = 1800
//!
//! [feeds.source]
//! kind = "command"
//! program = "node"
//! args = ["scrape.js", "--street", "Shevchenka"]
//! ```

use std::collections::{BTreeMap, HashSet};
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use chrono_tz::Tz;
use outagecal_core::{
    DEFAULT_TIMEZONE, MissingHourPolicy, TracingConfig, TracingOutputFormat, parse_level,
};
use outagecal_server::{Feed, FeedSettings, SchedulerConfig, ServerConfig};
use outagecal_source::{CommandSource, DEFAULT_COMMAND_TIMEOUT, FileSource, ScheduleSource};
use serde::{Deserialize, Serialize};
use tracing::Level;

use crate::error::{CliError, CliResult};

/// Top-level configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    /// HTTP listener settings.
    pub server: ServerSettings,

    /// Log output settings for `serve`.
    pub logging: LoggingSettings,

    /// Independent feeds, one calendar each.
    pub feeds: Vec<FeedConfig>,
}

/// `[server]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerSettings {
    /// Listen address.
    pub bind: SocketAddr,

    /// Seconds background refreshes get to stop on shutdown.
    pub shutdown_timeout_secs: u64,
}

impl Default for ServerSettings {
    fn default() -> Self {
        let defaults = ServerConfig::default();
        Self {
            bind: defaults.bind,
            shutdown_timeout_secs: defaults.shutdown_timeout.as_secs(),
        }
    }
}

impl ServerSettings {
    /// Converts to the server's configuration.
    pub fn to_server_config(&self) -> ServerConfig {
        ServerConfig::new(self.bind)
            .with_shutdown_timeout(Duration::from_secs(self.shutdown_timeout_secs))
    }
}

/// `[logging]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingSettings {
    /// Level for `outagecal` targets when `RUST_LOG` is unset.
    pub level: String,

    /// Output format.
    pub format: TracingOutputFormat,
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: TracingOutputFormat::Compact,
        }
    }
}

impl LoggingSettings {
    /// Tracing setup for the long-running server; `verbose` forces debug.
    pub fn tracing_config(&self, verbose: bool) -> CliResult<TracingConfig> {
        let level = if verbose {
            Level::DEBUG
        } else {
            parse_level(&self.level)?
        };
        Ok(TracingConfig::service()
            .with_level(level)
            .with_format(self.format))
    }
}

/// One `[[feeds]]` entry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FeedConfig {
    /// URL name: the calendar is served at `/{slug}.ics`.
    pub slug: String,

    /// Region code, e.g. `dnem` or `kem`.
    pub region: String,

    /// Address shown as the event location.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub location: Option<String>,

    /// IANA zone the upstream schedule is expressed in.
    #[serde(default = "default_timezone")]
    pub timezone: String,

    /// Meaning of hours absent from a day's table.
    #[serde(default)]
    pub missing_hours: MissingHourPolicy,

    /// Refresh in the background this often; lazily on request otherwise.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub refresh_interval_secs: Option<u64>,

    /// Where raw records come from.
    pub source: SourceSettings,
}

fn default_timezone() -> String {
    DEFAULT_TIMEZONE.name().to_string()
}

/// `[feeds.source]` table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum SourceSettings {
    /// Run a scraper program and read the record from its stdout.
    Command {
        program: PathBuf,
        #[serde(default)]
        args: Vec<String>,
        #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
        env: BTreeMap<String, String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        timeout_secs: Option<u64>,
    },
    /// Read the record from a file kept current by another job.
    File { path: PathBuf },
}

impl SourceSettings {
    fn validate(&self, slug: &str) -> CliResult<()> {
        match self {
            Self::Command {
                program,
                timeout_secs,
                ..
            } => {
                if program.as_os_str().is_empty() {
                    return Err(CliError::config(format!(
                        "feed {slug}: source program must not be empty"
                    )));
                }
                if *timeout_secs == Some(0) {
                    return Err(CliError::config(format!(
                        "feed {slug}: source timeout_secs must be positive"
                    )));
                }
            }
            Self::File { path } => {
                if path.as_os_str().is_empty() {
                    return Err(CliError::config(format!(
                        "feed {slug}: source path must not be empty"
                    )));
                }
            }
        }
        Ok(())
    }

    /// Instantiates the source.
    pub fn build(&self, name: &str) -> Arc<dyn ScheduleSource> {
        match self {
            Self::Command {
                program,
                args,
                env,
                timeout_secs,
            } => {
                let timeout = timeout_secs.map_or(DEFAULT_COMMAND_TIMEOUT, Duration::from_secs);
                let source = env.iter().fold(
                    CommandSource::new(name, program)
                        .with_args(args)
                        .with_timeout(timeout),
                    |source, (key, value)| source.with_env(key, value),
                );
                Arc::new(source)
            }
            Self::File { path } => Arc::new(FileSource::new(name, path)),
        }
    }
}

impl FeedConfig {
    /// Parsed zone.
    pub fn tz(&self) -> CliResult<Tz> {
        self.timezone.parse::<Tz>().map_err(|_| {
            CliError::config(format!(
                "feed {}: unknown timezone {:?}",
                self.slug, self.timezone
            ))
        })
    }

    /// Scheduler settings when background refresh is enabled.
    pub fn scheduler_config(&self) -> Option<SchedulerConfig> {
        self.refresh_interval_secs
            .map(|secs| SchedulerConfig::new(Duration::from_secs(secs)))
    }

    /// Pipeline settings for this feed.
    pub fn settings(&self) -> CliResult<FeedSettings> {
        let mut settings = FeedSettings::new(&self.slug, &self.region)
            .with_timezone(self.tz()?)
            .with_missing_hours(self.missing_hours);
        if let Some(location) = &self.location {
            settings = settings.with_location(location.clone());
        }
        Ok(settings)
    }

    /// Builds the feed with its configured source.
    pub fn build_feed(&self) -> CliResult<Feed> {
        Ok(Feed::new(self.settings()?, self.source.build(&self.slug)))
    }

    fn validate(&self) -> CliResult<()> {
        if !is_url_safe(&self.slug) {
            return Err(CliError::config(format!(
                "feed slug {:?} must be non-empty and use only letters, digits, '-' and '_'",
                self.slug
            )));
        }
        if self.region.trim().is_empty() {
            return Err(CliError::config(format!(
                "feed {}: region must not be empty",
                self.slug
            )));
        }
        if self.refresh_interval_secs == Some(0) {
            return Err(CliError::config(format!(
                "feed {}: refresh_interval_secs must be positive",
                self.slug
            )));
        }
        self.tz()?;
        self.source.validate(&self.slug)
    }
}

fn is_url_safe(slug: &str) -> bool {
    !slug.is_empty()
        && slug
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
}

impl AppConfig {
    /// Reads, parses and validates the file at `path`.
    pub fn load(path: &Path) -> CliResult<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            CliError::config(format!("failed to read {}: {e}", path.display()))
        })?;
        Self::parse(&content).map_err(|e| match e {
            CliError::Config(message) => {
                CliError::config(format!("{}: {message}", path.display()))
            }
            other => other,
        })
    }

    /// Parses and validates TOML text.
    pub fn parse(content: &str) -> CliResult<Self> {
        let config: Self = toml::from_str(content)
            .map_err(|e| CliError::config(format!("failed to parse config: {e}")))?;
        config.validate()?;
        Ok(config)
    }

    /// Checks everything that would otherwise fail at startup.
    pub fn validate(&self) -> CliResult<()> {
        parse_level(&self.logging.level)?;
        if self.feeds.is_empty() {
            return Err(CliError::config("no feeds configured"));
        }
        let mut seen = HashSet::new();
        for feed in &self.feeds {
            feed.validate()?;
            if !seen.insert(feed.slug.as_str()) {
                return Err(CliError::config(format!("duplicate feed slug {:?}", feed.slug)));
            }
        }
        Ok(())
    }

    /// Looks up a feed by slug.
    pub fn feed(&self, slug: &str) -> CliResult<&FeedConfig> {
        self.feeds
            .iter()
            .find(|feed| feed.slug == slug)
            .ok_or_else(|| CliError::config(format!("no feed named {slug:?}")))
    }

    /// Returns the default configuration file path.
    pub fn default_path() -> PathBuf {
        Self::default_config_dir().join("config.toml")
    }

    /// Returns the default configuration directory.
    pub fn default_config_dir() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("outagecal")
    }
}

/// Settings for `render` runs that name no configured feed.
pub fn adhoc_settings(region: &str, location: Option<&str>) -> FeedSettings {
    let settings = FeedSettings::new("render", region);
    match location {
        Some(location) => settings.with_location(location),
        None => settings,
    }
}
