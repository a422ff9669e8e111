// Baton turn runner
// Main entry point for the baton binary

use baton_engine::cli::{Cli, Command, ConfigAction};
use baton_engine::config::Config;
use baton_engine::handlers::{
    handle_config_path, handle_config_show, handle_config_validate, handle_run, OutputFormat,
    RunOptions,
};
use baton_engine::telemetry::init_telemetry_with_level;
use clap::Parser;
use std::time::Duration;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Parse CLI arguments
    let cli = Cli::parse();

    // Determine output format
    let format = if cli.json {
        OutputFormat::Json
    } else {
        OutputFormat::Text
    };

    // Load configuration (or use custom path if provided)
    let mut config = if let Some(config_path) = &cli.config {
        Config::load_from_path(config_path)?
    } else {
        Config::load_or_create()?
    };

    if let Some(level) = &cli.log {
        config.core.log_level = level.clone();
        config.validate()?;
    }

    // RUST_LOG, when set, overrides the configured level
    init_telemetry_with_level(&config.core.log_level);
    tracing::debug!("Baton v{}", env!("CARGO_PKG_VERSION"));

    match cli.command {
        Command::Run {
            inputs,
            gap_ms,
            plain,
            timeout_secs,
        } => {
            let options = RunOptions {
                gap: Duration::from_millis(gap_ms),
                agent_mode: !plain,
                timeout: Duration::from_secs(timeout_secs),
            };
            handle_run(inputs, options, &config, format).await
        }

        Command::Config { action } => match action {
            ConfigAction::Show => handle_config_show(&config, format),
            ConfigAction::Path => handle_config_path(cli.config.as_deref(), format),
            ConfigAction::Validate => handle_config_validate(&config, format),
        },
    }
}
