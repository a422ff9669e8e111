//! Configuration management
//!
//! This module handles loading, validation, and management of the Baton configuration.
//! Configuration is stored in TOML format at ~/.baton/config.toml.
//!
//! # Configuration Sections
//!
//! - **core**: Log level
//! - **runner**: Executor polling, shutdown timeout, input size limit
//! - **bus**: Lifecycle notification channel capacity
//! - **agent**: Default agent mode and built-in echo agent pacing
//!
//! Every section and field is optional in the file; missing values take their
//! defaults. Embedders and tests can build a [`Config`] in code with
//! `Config::default()` and adjust fields directly.
//!
//! # Examples
//!
//! ```no_run
//! use baton_engine::config::Config;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! // Load configuration from default location
//! let config = Config::load_or_create()?;
//!
//! // Access configuration values
//! println!("Log level: {}", config.core.log_level);
//! println!("Shutdown timeout: {}s", config.runner.shutdown_timeout_secs);
//! # Ok(())
//! # }
//! ```

use sdk::errors::EngineError;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Upper bound for `runner.idle_poll_interval_ms`
pub const MAX_IDLE_POLL_INTERVAL_MS: u64 = 60_000;

/// Main configuration structure
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Config {
    /// Core engine settings
    #[serde(default)]
    pub core: CoreConfig,

    /// Turn runner settings
    #[serde(default)]
    pub runner: RunnerConfig,

    /// Lifecycle bus settings
    #[serde(default)]
    pub bus: BusConfig,

    /// Agent settings
    #[serde(default)]
    pub agent: AgentConfig,
}

/// Core engine configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CoreConfig {
    /// Log level (error, warn, info, debug, trace)
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

/// Turn runner configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunnerConfig {
    /// How often the idle executor re-scans for work (0 = only on notification)
    #[serde(default)]
    pub idle_poll_interval_ms: u64,

    /// How long `stop` waits for the executor before aborting it
    #[serde(default = "default_shutdown_timeout_secs")]
    pub shutdown_timeout_secs: u64,

    /// Largest accepted input in bytes (0 = unlimited)
    #[serde(default = "default_max_content_bytes")]
    pub max_content_bytes: usize,
}

impl RunnerConfig {
    /// Idle poll interval, or `None` when the executor waits on notification only
    pub fn idle_poll_interval(&self) -> Option<Duration> {
        match self.idle_poll_interval_ms {
            0 => None,
            ms => Some(Duration::from_millis(ms)),
        }
    }
}

/// Lifecycle bus configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BusConfig {
    /// Capacity of each subscriber channel
    #[serde(default = "default_channel_capacity")]
    pub channel_capacity: usize,
}

/// Agent configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AgentConfig {
    /// Mode given to conversations created without explicit options
    #[serde(default = "default_true")]
    pub agent_mode: bool,

    /// Pause between fragments of the built-in echo agent
    #[serde(default = "default_echo_delay_ms")]
    pub echo_delay_ms: u64,
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_true() -> bool {
    true
}

fn default_shutdown_timeout_secs() -> u64 {
    30
}

fn default_max_content_bytes() -> usize {
    1024 * 1024
}

fn default_channel_capacity() -> usize {
    crate::message_bus::DEFAULT_CHANNEL_CAPACITY
}

fn default_echo_delay_ms() -> u64 {
    50
}

impl Default for CoreConfig {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
        }
    }
}

impl Default for RunnerConfig {
    fn default() -> Self {
        Self {
            idle_poll_interval_ms: 0,
            shutdown_timeout_secs: default_shutdown_timeout_secs(),
            max_content_bytes: default_max_content_bytes(),
        }
    }
}

impl Default for BusConfig {
    fn default() -> Self {
        Self {
            channel_capacity: default_channel_capacity(),
        }
    }
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            agent_mode: true,
            echo_delay_ms: default_echo_delay_ms(),
        }
    }
}

impl Config {
    /// Load configuration from the default location (~/.baton/config.toml)
    ///
    /// If the configuration file doesn't exist, creates a default configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// - Configuration file cannot be read
    /// - TOML parsing fails
    /// - Validation fails
    pub fn load_or_create() -> Result<Self, EngineError> {
        let config_path = Self::default_config_path()?;

        if config_path.exists() {
            Self::load_from_path(&config_path)
        } else {
            Self::create_default(&config_path)
        }
    }

    /// Load configuration from a specific path
    ///
    /// A leading `~` is expanded to the home directory.
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// - File cannot be read
    /// - TOML parsing fails
    /// - Validation fails
    pub fn load_from_path(path: &Path) -> Result<Self, EngineError> {
        let path = expand_path(path)?;
        let contents = fs::read_to_string(&path)
            .map_err(|e| EngineError::Config(format!("Failed to read config file: {}", e)))?;

        let config: Config = toml::from_str(&contents)
            .map_err(|e| EngineError::Config(format!("Failed to parse config: {}", e)))?;

        config.validate()?;

        Ok(config)
    }

    /// Create default configuration and save to path
    ///
    /// Creates the configuration directory if it doesn't exist.
    fn create_default(path: &Path) -> Result<Self, EngineError> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(|e| {
                EngineError::Config(format!("Failed to create config directory: {}", e))
            })?;
        }

        let config = Self::default_config();
        fs::write(path, config.to_toml()?)
            .map_err(|e| EngineError::Config(format!("Failed to write config file: {}", e)))?;

        Ok(config)
    }

    /// Get the default configuration file path (~/.baton/config.toml)
    pub fn default_config_path() -> Result<PathBuf, EngineError> {
        let home = dirs::home_dir()
            .ok_or_else(|| EngineError::Config("Could not determine home directory".to_string()))?;

        Ok(home.join(".baton").join("config.toml"))
    }

    /// Create a default configuration
    pub fn default_config() -> Self {
        Self::default()
    }

    /// Serialize as pretty TOML
    pub fn to_toml(&self) -> Result<String, EngineError> {
        toml::to_string_pretty(self)
            .map_err(|e| EngineError::Config(format!("Failed to serialize config: {}", e)))
    }

    /// Validate configuration values
    ///
    /// # Errors
    ///
    /// Returns `EngineError::Config` describing the first invalid field.
    pub fn validate(&self) -> Result<(), EngineError> {
        let valid_log_levels = ["error", "warn", "info", "debug", "trace"];
        if !valid_log_levels.contains(&self.core.log_level.as_str()) {
            return Err(EngineError::Config(format!(
                "Invalid log level '{}'. Must be one of: {}",
                self.core.log_level,
                valid_log_levels.join(", ")
            )));
        }

        if self.runner.idle_poll_interval_ms > MAX_IDLE_POLL_INTERVAL_MS {
            return Err(EngineError::Config(format!(
                "idle_poll_interval_ms must be 0 or between 1 and {}",
                MAX_IDLE_POLL_INTERVAL_MS
            )));
        }

        if self.runner.shutdown_timeout_secs == 0 {
            return Err(EngineError::Config(
                "shutdown_timeout_secs must be at least 1".to_string(),
            ));
        }

        if self.bus.channel_capacity == 0 {
            return Err(EngineError::Config(
                "channel_capacity must be at least 1".to_string(),
            ));
        }

        Ok(())
    }
}

/// Expand ~ in path to user's home directory
pub fn expand_path(path: &Path) -> Result<PathBuf, EngineError> {
    let path_str = path
        .to_str()
        .ok_or_else(|| EngineError::Config("Invalid UTF-8 in path".to_string()))?;

    if let Some(rest) = path_str.strip_prefix("~/") {
        let home = dirs::home_dir()
            .ok_or_else(|| EngineError::Config("Could not determine home directory".to_string()))?;

        Ok(home.join(rest))
    } else if path_str == "~" {
        dirs::home_dir()
            .ok_or_else(|| EngineError::Config("Could not determine home directory".to_string()))
    } else {
        Ok(path.to_path_buf())
    }
}
