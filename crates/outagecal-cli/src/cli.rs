//! Command-line interface definition.

use std::net::SocketAddr;
use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};

use crate::config::AppConfig;

/// outagecal - DTEK outage schedules as subscribable calendars
#[derive(Debug, Parser)]
#[command(name = "outagecal")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Path to configuration file
    #[arg(long, short, global = true, env = "OUTAGECAL_CONFIG")]
    pub config: Option<PathBuf>,

    /// Enable debug output
    #[arg(long, short, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Command,
}

impl Cli {
    /// Configuration file to use: `--config` or the per-user default.
    pub fn config_path(&self) -> PathBuf {
        self.config.clone().unwrap_or_else(AppConfig::default_path)
    }
}

/// Available commands.
#[derive(Debug, Subcommand)]
pub enum Command {
    /// Serve every configured feed over HTTP
    Serve {
        /// Listen address, overrides `[server] bind`
        #[arg(long)]
        bind: Option<SocketAddr>,
    },

    /// Render a saved raw record to a calendar on stdout
    Render(RenderArgs),

    /// Configuration commands
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

/// Arguments of `outagecal render`.
#[derive(Debug, Clone, Args)]
pub struct RenderArgs {
    /// Raw schedule record (JSON) as printed by the scraper
    #[arg(long, short)]
    pub input: PathBuf,

    /// Take feed settings from this configured feed
    #[arg(long, short)]
    pub feed: Option<String>,

    /// Region code used when no feed is given
    #[arg(long, default_value = "dnem", conflicts_with = "feed")]
    pub region: String,

    /// Event location used when no feed is given
    #[arg(long, conflicts_with = "feed")]
    pub location: Option<String>,
}

/// Configuration actions.
#[derive(Debug, Subcommand)]
pub enum ConfigAction {
    /// Validate configuration
    Validate,

    /// Print the effective configuration
    Show,

    /// Show configuration file path
    Path,
}
