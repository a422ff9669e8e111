//! CLI interface for Baton
//!
//! This module provides the command-line interface using clap's derive API.
//! The binary drives a single in-process runner against the built-in echo
//! agent, which is enough to watch cancel-and-replace from a terminal.

use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// Baton turn runner
///
/// Runs conversations whose newest input always wins: submitting while a turn
/// is in progress cancels it and starts the new one.
#[derive(Parser, Debug)]
#[command(name = "baton")]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// Output in JSON format
    #[arg(long, global = true)]
    pub json: bool,

    /// Set log level (error, warn, info, debug, trace)
    #[arg(long, global = true, value_name = "LEVEL")]
    pub log: Option<String>,

    /// Specify alternate configuration file
    #[arg(long, global = true, value_name = "PATH")]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

/// Available commands
#[derive(Subcommand, Debug)]
pub enum Command {
    /// Submit inputs to one conversation and print its events
    ///
    /// Each input is submitted `--gap-ms` after the previous one; an input
    /// that arrives while the previous turn is still running supersedes it.
    Run {
        /// Inputs to submit, in order
        #[arg(required = true)]
        inputs: Vec<String>,

        /// Delay between submissions in milliseconds
        #[arg(long, default_value = "0", value_name = "MS")]
        gap_ms: u64,

        /// Produce each turn as a single fragment instead of word by word
        #[arg(long)]
        plain: bool,

        /// Give up waiting for the last turn after this many seconds
        #[arg(long, default_value = "30", value_name = "SECS")]
        timeout_secs: u64,
    },

    /// Manage configuration
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

/// Configuration management actions
#[derive(Subcommand, Debug)]
pub enum ConfigAction {
    /// Show current configuration
    Show,

    /// Print the configuration file path
    Path,

    /// Validate configuration file
    Validate,
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_parse_run_with_flags() {
        let cli = Cli::try_parse_from([
            "baton", "--json", "run", "first", "second", "--gap-ms", "20", "--plain",
        ])
        .unwrap();

        assert!(cli.json);
        match cli.command {
            Command::Run {
                inputs,
                gap_ms,
                plain,
                timeout_secs,
            } => {
                assert_eq!(inputs, vec!["first", "second"]);
                assert_eq!(gap_ms, 20);
                assert!(plain);
                assert_eq!(timeout_secs, 30);
            }
            other => panic!("unexpected command: {:?}", other),
        }
    }

    #[test]
    fn test_run_requires_input() {
        assert!(Cli::try_parse_from(["baton", "run"]).is_err());
    }

    #[test]
    fn test_parse_config_show() {
        let cli = Cli::try_parse_from(["baton", "config", "show", "--config", "/tmp/c.toml"])
            .unwrap();
        assert_eq!(cli.config, Some(PathBuf::from("/tmp/c.toml")));
        assert!(matches!(
            cli.command,
            Command::Config {
                action: ConfigAction::Show
            }
        ));
    }
}
