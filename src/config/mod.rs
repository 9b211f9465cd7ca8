//! Configuration management.
//!
//! This module handles:
//! - Environment variable loading
//! - Configuration validation
//! - Default value handling
//! - The versioned [`LoopSettings`] shared by every component
//!
//! # Example
//!
//! ```
//! use test_mender::config::{Config, LoopSettings, DEFAULT_MODEL};
//!
//! // Create a config directly (use Config::from_env() in production)
//! let config = Config {
//!     database_path: "./data/knowledge.db".to_string(),
//!     log_level: "info".to_string(),
//!     model_base_url: "http://localhost:11434".to_string(),
//!     model: DEFAULT_MODEL.to_string(),
//!     model_timeout_ms: 45_000,
//!     snapshot_interval_ms: 300_000,
//!     settings: LoopSettings::default(),
//! };
//!
//! println!("Using model: {}", config.model);
//! ```

mod settings;
mod validation;

pub use settings::{LoopSettings, SETTINGS_VERSION};
pub use validation::{
    validate_config, MAX_FIX_ATTEMPTS, MAX_INTERVAL_MS, MAX_TESTS_PER_TURN, MAX_TIMEOUT_MS,
    MIN_INTERVAL_MS, MIN_TIMEOUT_MS,
};

use std::time::Duration;

use crate::error::ConfigError;

/// Default database path.
pub const DEFAULT_DATABASE_PATH: &str = "./data/knowledge.db";

/// Default log level.
pub const DEFAULT_LOG_LEVEL: &str = "info";

/// Default model endpoint.
pub const DEFAULT_MODEL_BASE_URL: &str = "http://localhost:11434";

/// Default model identifier.
pub const DEFAULT_MODEL: &str = "gemma3:4b";

/// Default model query bound in milliseconds.
pub const DEFAULT_MODEL_TIMEOUT_MS: u64 = 45_000;

/// Default delay between turns in milliseconds.
pub const DEFAULT_CYCLE_DELAY_MS: u64 = 5_000;

/// Default health monitor period in milliseconds.
pub const DEFAULT_MONITOR_INTERVAL_MS: u64 = 60_000;

/// Default durable snapshot period in milliseconds.
pub const DEFAULT_SNAPSHOT_INTERVAL_MS: u64 = 300_000;

/// Default candidate execution bound in milliseconds.
pub const DEFAULT_EXECUTION_TIMEOUT_MS: u64 = 30_000;

/// Default fix attempts per failing test per turn.
pub const DEFAULT_MAX_FIX_ATTEMPTS: u32 = 5;

/// Default tests generated per turn.
pub const DEFAULT_TESTS_PER_TURN: u32 = 3;

/// Application configuration.
///
/// Process-level values (paths, endpoints) live directly on this struct.
/// Component behaviour lives in [`LoopSettings`].
#[derive(Debug, Clone, PartialEq)]
pub struct Config {
    /// Snapshot database path.
    pub database_path: String,
    /// Log level (error, warn, info, debug, trace).
    pub log_level: String,
    /// Base URL of the model query endpoint.
    pub model_base_url: String,
    /// Model identifier.
    pub model: String,
    /// Model query bound in milliseconds.
    pub model_timeout_ms: u64,
    /// Durable snapshot period in milliseconds.
    pub snapshot_interval_ms: u64,
    /// Versioned component settings.
    pub settings: LoopSettings,
}

impl Config {
    /// Load configuration from environment variables.
    ///
    /// Optional environment variables (with defaults):
    /// - `DATABASE_PATH`: Snapshot database (default: `./data/knowledge.db`)
    /// - `LOG_LEVEL`: Logging level (default: `info`)
    /// - `MODEL_BASE_URL`: Model endpoint (default: `http://localhost:11434`)
    /// - `MODEL_NAME`: Model identifier (default: `gemma3:4b`)
    /// - `MODEL_TIMEOUT_MS`: Model query bound (default: `45000`)
    /// - `CYCLE_DELAY_MS`: Delay between turns (default: `5000`)
    /// - `MONITOR_INTERVAL_MS`: Health monitor period (default: `60000`)
    /// - `SNAPSHOT_INTERVAL_MS`: Durable snapshot period (default: `300000`)
    /// - `EXECUTION_TIMEOUT_MS`: Candidate execution bound (default: `30000`)
    /// - `MAX_FIX_ATTEMPTS`: Fix attempts per failing test (default: `5`)
    /// - `TESTS_PER_TURN`: Tests generated per turn (default: `3`)
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] if a numeric variable does not parse or any
    /// value fails validation (see [`validate_config`]).
    #[must_use = "configuration should be used"]
    pub fn from_env() -> Result<Self, ConfigError> {
        // Load .env file if present (ignore errors)
        let _ = dotenvy::dotenv();

        let database_path =
            std::env::var("DATABASE_PATH").unwrap_or_else(|_| DEFAULT_DATABASE_PATH.into());
        let log_level = std::env::var("LOG_LEVEL").unwrap_or_else(|_| DEFAULT_LOG_LEVEL.into());
        let model_base_url =
            std::env::var("MODEL_BASE_URL").unwrap_or_else(|_| DEFAULT_MODEL_BASE_URL.into());
        let model = std::env::var("MODEL_NAME").unwrap_or_else(|_| DEFAULT_MODEL.into());

        let model_timeout_ms = parse_env_u64("MODEL_TIMEOUT_MS", DEFAULT_MODEL_TIMEOUT_MS)?;
        let cycle_delay_ms = parse_env_u64("CYCLE_DELAY_MS", DEFAULT_CYCLE_DELAY_MS)?;
        let monitor_interval_ms =
            parse_env_u64("MONITOR_INTERVAL_MS", DEFAULT_MONITOR_INTERVAL_MS)?;
        let snapshot_interval_ms =
            parse_env_u64("SNAPSHOT_INTERVAL_MS", DEFAULT_SNAPSHOT_INTERVAL_MS)?;
        let execution_timeout_ms =
            parse_env_u64("EXECUTION_TIMEOUT_MS", DEFAULT_EXECUTION_TIMEOUT_MS)?;
        let max_fix_attempts = parse_env_u32("MAX_FIX_ATTEMPTS", DEFAULT_MAX_FIX_ATTEMPTS)?;
        let tests_per_turn = parse_env_u32("TESTS_PER_TURN", DEFAULT_TESTS_PER_TURN)?;

        let model_timeout = Duration::from_millis(model_timeout_ms);
        let mut settings = LoopSettings::default();
        settings.generator.model_timeout = model_timeout;
        settings.fix.model_timeout = model_timeout;
        settings.learner.model_timeout = model_timeout;
        settings.executor.timeout = Duration::from_millis(execution_timeout_ms);
        settings.monitor.interval = Duration::from_millis(monitor_interval_ms);
        settings.orchestrator.cycle_delay = Duration::from_millis(cycle_delay_ms);
        settings.orchestrator.max_fix_attempts = max_fix_attempts;
        settings.orchestrator.tests_per_turn = tests_per_turn;

        let config = Self {
            database_path,
            log_level,
            model_base_url,
            model,
            model_timeout_ms,
            snapshot_interval_ms,
            settings,
        };

        validate_config(&config)?;
        Ok(config)
    }

    /// Durable snapshot period.
    #[must_use]
    pub const fn snapshot_interval(&self) -> Duration {
        Duration::from_millis(self.snapshot_interval_ms)
    }
}

/// Parse an environment variable as u64, using a default if not set.
fn parse_env_u64(name: &str, default: u64) -> Result<u64, ConfigError> {
    std::env::var(name).map_or(Ok(default), |val| {
        val.parse().map_err(|_| ConfigError::InvalidValue {
            var: name.into(),
            reason: "must be a positive integer".into(),
        })
    })
}

/// Parse an environment variable as u32, using a default if not set.
fn parse_env_u32(name: &str, default: u32) -> Result<u32, ConfigError> {
    std::env::var(name).map_or(Ok(default), |val| {
        val.parse().map_err(|_| ConfigError::InvalidValue {
            var: name.into(),
            reason: "must be a positive integer".into(),
        })
    })
}
