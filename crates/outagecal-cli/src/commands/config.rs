//! Configuration commands.

use std::path::Path;

use crate::config::AppConfig;
use crate::error::{CliError, CliResult};

/// Validates the configuration file.
pub fn validate(path: &Path) -> CliResult<()> {
    let config = AppConfig::load(path)?;
    println!(
        "Configuration is valid ({} feed{}).",
        config.feeds.len(),
        if config.feeds.len() == 1 { "" } else { "s" }
    );
    Ok(())
}

/// Prints the effective configuration, defaults included.
pub fn show(path: &Path) -> CliResult<()> {
    let config = AppConfig::load(path)?;
    let toml_str = toml::to_string_pretty(&config)
        .map_err(|e| CliError::config(format!("failed to serialize config: {e}")))?;
    println!("# {}", path.display());
    println!("{toml_str}");
    Ok(())
}

/// Shows the configuration file path.
pub fn path(path: &Path) -> CliResult<()> {
    println!("config: {}", path.display());
    Ok(())
}
