//! Offline render of a saved raw record.

use std::io::Write;
use std::path::Path;
use std::sync::Arc;

use outagecal_server::{Feed, FeedSettings};
use outagecal_source::FileSource;
use tracing::debug;

use crate::cli::RenderArgs;
use crate::config::{AppConfig, adhoc_settings};
use crate::error::CliResult;

/// Renders `args.input` and writes the calendar to stdout.
pub async fn run(config_path: &Path, args: &RenderArgs) -> CliResult<()> {
    let settings = match &args.feed {
        Some(slug) => AppConfig::load(config_path)?.feed(slug)?.settings()?,
        None => adhoc_settings(&args.region, args.location.as_deref()),
    };

    let body = render(settings, &args.input).await?;
    let mut stdout = std::io::stdout().lock();
    stdout.write_all(body.as_bytes())?;
    stdout.flush()?;
    Ok(())
}

/// Runs the normalize, build and serialize pipeline on the record at `input`.
pub async fn render(settings: FeedSettings, input: &Path) -> CliResult<String> {
    debug!(feed = %settings.slug, input = %input.display(), "Rendering saved record");
    let feed = Feed::new(settings, Arc::new(FileSource::new("input", input)));
    Ok(feed.refresh().await?.body)
}
