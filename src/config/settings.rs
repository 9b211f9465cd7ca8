//! Versioned component settings.
//!
//! Every component takes its own section of [`LoopSettings`] by value at
//! construction. Adding a knob means adding a field here, so callers and
//! callees can never disagree about which options exist.

use crate::error::ConfigError;
use crate::fix::FixEngineConfig;
use crate::health::MonitorConfig;
use crate::learning::LearnerConfig;
use crate::orchestrator::OrchestratorConfig;
use crate::pipeline::{ExecutorConfig, GeneratorConfig};

/// Current settings layout version.
pub const SETTINGS_VERSION: u32 = 1;

/// Settings for every component in the loop.
#[derive(Debug, Clone, PartialEq)]
pub struct LoopSettings {
    /// Layout version, checked by [`LoopSettings::validate`].
    pub version: u32,
    /// Test generator settings.
    pub generator: GeneratorConfig,
    /// Test executor settings.
    pub executor: ExecutorConfig,
    /// Fix engine settings.
    pub fix: FixEngineConfig,
    /// Learning engine settings.
    pub learner: LearnerConfig,
    /// Health monitor settings.
    pub monitor: MonitorConfig,
    /// Turn driver settings.
    pub orchestrator: OrchestratorConfig,
}

impl Default for LoopSettings {
    fn default() -> Self {
        Self {
            version: SETTINGS_VERSION,
            generator: GeneratorConfig::default(),
            executor: ExecutorConfig::default(),
            fix: FixEngineConfig::default(),
            learner: LearnerConfig::default(),
            monitor: MonitorConfig::default(),
            orchestrator: OrchestratorConfig::default(),
        }
    }
}

impl LoopSettings {
    /// Reject settings written for a different layout.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::InvalidValue`] if `version` is not
    /// [`SETTINGS_VERSION`] or a hysteresis band is inverted.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.version != SETTINGS_VERSION {
            return Err(ConfigError::InvalidValue {
                var: "settings.version".into(),
                reason: format!(
                    "unsupported version {} (expected {SETTINGS_VERSION})",
                    self.version
                ),
            });
        }

        if self.generator.regress_below >= self.generator.escalate_above {
            return Err(ConfigError::InvalidValue {
                var: "settings.generator".into(),
                reason: "regress_below must be lower than escalate_above".into(),
            });
        }

        if self.generator.window_size == 0 {
            return Err(ConfigError::InvalidValue {
                var: "settings.generator.window_size".into(),
                reason: "must be at least 1".into(),
            });
        }

        Ok(())
    }
}
