//! Command handlers for CLI operations
//!
//! This module implements the handlers for all CLI commands:
//! - run: Submit inputs to one conversation and stream its events
//! - config show / path / validate

use anyhow::{Context, Result};
use serde_json::json;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use crate::agent::EchoAgent;
use crate::config::Config;
use crate::registry::{ConversationOptions, TranscriptEntry};
use crate::service::RunnerService;
use sdk::types::{Identity, OutputEvent, Role, TurnId};

/// Owner used for conversations created from the command line
const CLI_OWNER: &str = "cli";

/// How long each output wait lasts before checking the deadline again
const WAIT_SLICE: Duration = Duration::from_millis(100);

/// Output format for command results
#[derive(Debug, Clone, Copy)]
pub enum OutputFormat {
    /// Human-readable text output
    Text,
    /// JSON output for machine consumption
    Json,
}

/// Options for `baton run`
#[derive(Debug, Clone)]
pub struct RunOptions {
    /// Delay between submissions
    pub gap: Duration,

    /// Stream word by word (true) or as one fragment
    pub agent_mode: bool,

    /// Give up waiting for the last turn after this long
    pub timeout: Duration,
}

/// Submit inputs to a fresh conversation and print every event
///
/// Inputs are submitted in order with `gap` between them. The command returns
/// once the last submitted turn has ended, then prints the transcript.
pub async fn handle_run(
    inputs: Vec<String>,
    options: RunOptions,
    config: &Config,
    format: OutputFormat,
) -> Result<()> {
    let agent = Arc::new(EchoAgent::from_config(&config.agent));
    let service = RunnerService::start(config, agent);

    let result = run_inputs(&service, inputs, &options, format).await;
    service.stop().await.context("Failed to stop runner")?;
    result
}

async fn run_inputs(
    service: &RunnerService,
    inputs: Vec<String>,
    options: &RunOptions,
    format: OutputFormat,
) -> Result<()> {
    let owner = Identity::from(CLI_OWNER);
    let id = service
        .create_conversation_with(
            &owner,
            ConversationOptions {
                agent_mode: options.agent_mode,
            },
        )
        .await;

    if let OutputFormat::Text = format {
        println!("Conversation {}", id);
    }

    let mut last_turn = None;
    for (i, input) in inputs.into_iter().enumerate() {
        if i > 0 && !options.gap.is_zero() {
            tokio::time::sleep(options.gap).await;
        }
        let turn = service
            .submit_input(&owner, &id, input.as_str())
            .await
            .with_context(|| format!("Failed to submit input '{}'", input))?;
        print_submitted(turn, &input, format);
        last_turn = Some(turn);

        for event in service.drain_output(&owner, &id).await? {
            print_event(&event, format);
        }
    }

    let Some(last_turn) = last_turn else {
        return Ok(());
    };

    let deadline = tokio::time::Instant::now() + options.timeout;
    loop {
        let events = service.wait_output(&owner, &id, WAIT_SLICE).await?;
        let mut finished = false;
        for event in &events {
            print_event(event, format);
            finished |= event.turn() == last_turn && event.is_terminal();
        }
        if finished {
            break;
        }
        if tokio::time::Instant::now() >= deadline {
            anyhow::bail!(
                "Turn {} did not finish within {}s",
                last_turn,
                options.timeout.as_secs()
            );
        }
    }

    let transcript = service.transcript(&owner, &id).await?;
    print_transcript(&transcript, format)
}

fn print_submitted(turn: TurnId, input: &str, format: OutputFormat) {
    match format {
        OutputFormat::Text => println!("> [turn {}] {}", turn, input),
        OutputFormat::Json => println!(
            "{}",
            json!({ "type": "submitted", "turn": turn.0, "content": input })
        ),
    }
}

fn print_event(event: &OutputEvent, format: OutputFormat) {
    match format {
        OutputFormat::Text => match event {
            OutputEvent::Fragment { turn, text } => println!("  [turn {}] {:?}", turn, text),
            OutputEvent::TurnStarted { turn } => println!("  [turn {}] started", turn),
            OutputEvent::TurnCompleted { turn } => println!("  [turn {}] completed", turn),
            OutputEvent::TurnCancelled { turn } => println!("  [turn {}] cancelled", turn),
            OutputEvent::TurnFailed { turn, reason } => {
                println!("  [turn {}] failed: {}", turn, reason)
            }
        },
        OutputFormat::Json => match serde_json::to_string(event) {
            Ok(line) => println!("{}", line),
            Err(e) => tracing::warn!("Failed to serialize event: {}", e),
        },
    }
}

fn print_transcript(transcript: &[TranscriptEntry], format: OutputFormat) -> Result<()> {
    match format {
        OutputFormat::Text => {
            println!();
            println!("Transcript:");
            for entry in transcript {
                let speaker = match entry.role {
                    Role::Submitter => "you",
                    Role::System => "agent",
                };
                println!("  {:>5}: {}", speaker, entry.content);
            }
        }
        OutputFormat::Json => {
            let output = json!({ "type": "transcript", "entries": transcript });
            println!("{}", serde_json::to_string(&output)?);
        }
    }
    Ok(())
}

/// Print the effective configuration
pub fn handle_config_show(config: &Config, format: OutputFormat) -> Result<()> {
    match format {
        OutputFormat::Text => print!("{}", config.to_toml()?),
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(config)?),
    }
    Ok(())
}

/// Print which configuration file is in effect
pub fn handle_config_path(path: Option<&Path>, format: OutputFormat) -> Result<()> {
    let path = match path {
        Some(path) => path.to_path_buf(),
        None => Config::default_config_path()?,
    };
    match format {
        OutputFormat::Text => println!("{}", path.display()),
        OutputFormat::Json => println!("{}", json!({ "path": path })),
    }
    Ok(())
}

/// Report that the configuration loaded and validated
///
/// Loading already validates, so reaching this handler means it passed.
pub fn handle_config_validate(config: &Config, format: OutputFormat) -> Result<()> {
    config.validate()?;
    match format {
        OutputFormat::Text => println!("Configuration is valid"),
        OutputFormat::Json => println!("{}", json!({ "valid": true })),
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fast_config() -> Config {
        let mut config = Config::default();
        config.agent.echo_delay_ms = 1;
        config.runner.shutdown_timeout_secs = 2;
        config
    }

    #[tokio::test]
    async fn test_handle_run_completes() {
        let options = RunOptions {
            gap: Duration::ZERO,
            agent_mode: true,
            timeout: Duration::from_secs(5),
        };
        let result = handle_run(
            vec!["first input".to_string(), "second input".to_string()],
            options,
            &fast_config(),
            OutputFormat::Json,
        )
        .await;
        assert!(result.is_ok());
    }

    #[tokio::test]
    async fn test_handle_run_reports_timeout() {
        let mut config = fast_config();
        config.agent.echo_delay_ms = 1_000;
        let options = RunOptions {
            gap: Duration::ZERO,
            agent_mode: true,
            timeout: Duration::from_millis(150),
        };
        let result = handle_run(
            vec!["slow words here".to_string()],
            options,
            &config,
            OutputFormat::Text,
        )
        .await;
        assert!(result.is_err());
    }

    #[test]
    fn test_config_handlers() {
        let config = Config::default();
        assert!(handle_config_show(&config, OutputFormat::Json).is_ok());
        assert!(handle_config_validate(&config, OutputFormat::Text).is_ok());
        assert!(handle_config_path(Some(Path::new("/tmp/baton.toml")), OutputFormat::Text).is_ok());
    }
}
