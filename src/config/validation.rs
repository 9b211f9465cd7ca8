//! Configuration validation.
//!
//! This module provides validation logic for configuration values,
//! ensuring they are within acceptable ranges.

use std::time::Duration;

use super::Config;
use crate::error::ConfigError;

/// Minimum allowed timeout in milliseconds (100 milliseconds).
pub const MIN_TIMEOUT_MS: u64 = 100;

/// Maximum allowed timeout in milliseconds (5 minutes).
pub const MAX_TIMEOUT_MS: u64 = 300_000;

/// Minimum allowed period for timers in milliseconds.
pub const MIN_INTERVAL_MS: u64 = 10;

/// Maximum allowed period for timers in milliseconds (1 hour).
pub const MAX_INTERVAL_MS: u64 = 3_600_000;

/// Maximum allowed fix attempts per failing test.
pub const MAX_FIX_ATTEMPTS: u32 = 20;

/// Maximum allowed tests per turn.
pub const MAX_TESTS_PER_TURN: u32 = 50;

/// Validate configuration values.
///
/// # Errors
///
/// Returns [`ConfigError::InvalidValue`] if any value is out of range:
/// - `DATABASE_PATH` must not be empty
/// - `MODEL_TIMEOUT_MS` and `EXECUTION_TIMEOUT_MS` must be between 100 and 300000
/// - `CYCLE_DELAY_MS`, `MONITOR_INTERVAL_MS`, `SNAPSHOT_INTERVAL_MS` must be between 10 and 3600000
/// - `MAX_FIX_ATTEMPTS` must be between 1 and 20
/// - `TESTS_PER_TURN` must be between 1 and 50
/// - the loop settings must pass [`super::LoopSettings::validate`]
#[must_use = "validation result should be checked"]
pub fn validate_config(config: &Config) -> Result<(), ConfigError> {
    if config.database_path.trim().is_empty() {
        return Err(ConfigError::InvalidValue {
            var: "DATABASE_PATH".into(),
            reason: "must not be empty".into(),
        });
    }

    check_range(
        "MODEL_TIMEOUT_MS",
        config.model_timeout_ms,
        MIN_TIMEOUT_MS,
        MAX_TIMEOUT_MS,
    )?;
    check_range(
        "EXECUTION_TIMEOUT_MS",
        millis(config.settings.executor.timeout),
        MIN_TIMEOUT_MS,
        MAX_TIMEOUT_MS,
    )?;
    check_range(
        "CYCLE_DELAY_MS",
        millis(config.settings.orchestrator.cycle_delay),
        MIN_INTERVAL_MS,
        MAX_INTERVAL_MS,
    )?;
    check_range(
        "MONITOR_INTERVAL_MS",
        millis(config.settings.monitor.interval),
        MIN_INTERVAL_MS,
        MAX_INTERVAL_MS,
    )?;
    check_range(
        "SNAPSHOT_INTERVAL_MS",
        config.snapshot_interval_ms,
        MIN_INTERVAL_MS,
        MAX_INTERVAL_MS,
    )?;
    check_range(
        "MAX_FIX_ATTEMPTS",
        u64::from(config.settings.orchestrator.max_fix_attempts),
        1,
        u64::from(MAX_FIX_ATTEMPTS),
    )?;
    check_range(
        "TESTS_PER_TURN",
        u64::from(config.settings.orchestrator.tests_per_turn),
        1,
        u64::from(MAX_TESTS_PER_TURN),
    )?;

    config.settings.validate()
}

fn check_range(var: &str, value: u64, min: u64, max: u64) -> Result<(), ConfigError> {
    if value < min || value > max {
        return Err(ConfigError::InvalidValue {
            var: var.into(),
            reason: format!("must be between {min} and {max}"),
        });
    }
    Ok(())
}

fn millis(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}
