//! outagecal CLI entry point.

use std::process::ExitCode;

use clap::Parser;

use outagecal_cli::cli::{Cli, Command, ConfigAction};
use outagecal_cli::commands;
use outagecal_cli::config::AppConfig;
use outagecal_cli::error::CliResult;
use outagecal_core::{TracingConfig, init_tracing};

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("error: {e}");
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> CliResult<()> {
    let config_path = cli.config_path();

    match &cli.command {
        Command::Serve { bind } => {
            let config = AppConfig::load(&config_path)?;
            init_tracing(config.logging.tracing_config(cli.verbose)?)?;
            commands::serve::run(&config, *bind).await
        }
        Command::Render(args) => {
            init_tracing(TracingConfig::cli(cli.verbose))?;
            commands::render::run(&config_path, args).await
        }
        Command::Config { action } => {
            init_tracing(TracingConfig::cli(cli.verbose))?;
            match action {
                ConfigAction::Validate => commands::config::validate(&config_path),
                ConfigAction::Show => commands::config::show(&config_path),
                ConfigAction::Path => commands::config::path(&config_path),
            }
        }
    }
}
