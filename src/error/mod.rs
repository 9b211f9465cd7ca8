//! Error types for the test-repair loop.
//!
//! This module defines a hierarchical error system:
//! - [`AppError`]: Top-level application errors
//! - [`PipelineError`]: Failures inside a generate/execute/fix/learn turn
//! - [`ModelError`]: Model query capability failures
//! - [`StoreError`]: Knowledge store and snapshot persistence errors
//! - [`ConfigError`]: Configuration errors
//!
//! Every pipeline error maps to an error-history category through
//! [`PipelineError::category`], so it can be recorded instead of escaping.
//!
//! All errors implement `Send + Sync` for async compatibility.

use thiserror::Error;

/// Top-level application error.
///
/// This is the main error type returned by startup and wiring code.
/// It wraps all subsystem errors for unified error handling.
#[derive(Debug, Error)]
pub enum AppError {
    /// Pipeline error.
    #[error("Pipeline error: {0}")]
    Pipeline(#[from] PipelineError),

    /// Model query error.
    #[error("Model error: {0}")]
    Model(#[from] ModelError),

    /// Knowledge store error.
    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    /// Configuration error.
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),
}

/// Errors raised inside a single pipeline turn.
///
/// All variants are recovered at the component boundary where they occur
/// and turned into an error-history record or a health issue.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum PipelineError {
    /// Test generation could not produce a test.
    #[error("Test generation failed: {reason}")]
    GenerationFailed {
        /// Why generation failed.
        reason: String,
    },

    /// A runtime fault in candidate code was captured.
    #[error("Execution fault: {reason}")]
    ExecutionFault {
        /// The classified fault message.
        reason: String,
    },

    /// Candidate code exceeded its wall-clock budget.
    #[error("Execution timed out after {timeout_ms}ms")]
    ExecutionTimeout {
        /// Timeout in milliseconds.
        timeout_ms: u64,
    },

    /// The model capability could not be reached.
    #[error("Model unavailable: {message}")]
    ModelUnavailable {
        /// Description of the failure.
        message: String,
    },

    /// The model capability did not answer in time.
    #[error("Model query timed out after {timeout_ms}ms")]
    ModelTimeout {
        /// Timeout in milliseconds.
        timeout_ms: u64,
    },

    /// No known fix pattern matched the failure.
    #[error("No fix pattern matches: {signature}")]
    NoPatternMatch {
        /// The normalized error signature.
        signature: String,
    },

    /// Durable snapshot storage is missing or corrupt.
    #[error("Persistence unavailable: {message}")]
    PersistenceUnavailable {
        /// Description of the failure.
        message: String,
    },

    /// A fix was requested for a test that was never recorded.
    #[error("Unknown test: {test_id}")]
    UnknownTest {
        /// The unknown test id.
        test_id: u64,
    },

    /// The knowledge store rejected an operation.
    #[error("Store error: {0}")]
    Store(#[from] StoreError),
}

impl PipelineError {
    /// Error-history category this error is recorded under.
    #[must_use]
    pub const fn category(&self) -> &'static str {
        match self {
            Self::GenerationFailed { .. } => "test_generation_failure",
            Self::ExecutionFault { .. } => "execution_fault",
            Self::ExecutionTimeout { .. } => "execution_timeout",
            Self::ModelUnavailable { .. } => "model_unavailable",
            Self::ModelTimeout { .. } => "model_timeout",
            Self::NoPatternMatch { .. } => "no_pattern_match",
            Self::PersistenceUnavailable { .. } => "persistence_unavailable",
            Self::UnknownTest { .. } | Self::Store(_) => "system_exception",
        }
    }

    /// Returns true if the turn can continue after this error.
    ///
    /// Store and lineage failures are not recoverable within a turn.
    #[must_use]
    pub const fn is_recoverable(&self) -> bool {
        !matches!(self, Self::UnknownTest { .. } | Self::Store(_))
    }
}

/// Model query capability errors.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ModelError {
    /// The query did not complete within its bound.
    #[error("Model query timeout after {timeout_ms}ms")]
    Timeout {
        /// Timeout in milliseconds.
        timeout_ms: u64,
    },

    /// The model endpoint could not serve the query.
    #[error("Model unavailable: {message}")]
    Unavailable {
        /// Description of the failure.
        message: String,
    },
}

impl From<ModelError> for PipelineError {
    fn from(err: ModelError) -> Self {
        match err {
            ModelError::Timeout { timeout_ms } => Self::ModelTimeout { timeout_ms },
            ModelError::Unavailable { message } => Self::ModelUnavailable { message },
        }
    }
}

/// Knowledge store errors.
///
/// These errors represent failures of the in-memory store and of its
/// durable snapshot backend.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum StoreError {
    /// No entry exists under the key.
    #[error("Key not found: {key}")]
    NotFound {
        /// The missing key.
        key: String,
    },

    /// An entry could not be converted to or from its typed form.
    #[error("Serialization failed for {key}: {message}")]
    Serialization {
        /// The entry key.
        key: String,
        /// Description of the failure.
        message: String,
    },

    /// The durable snapshot is missing or unreadable.
    #[error("Persistence unavailable: {message}")]
    PersistenceUnavailable {
        /// Description of the failure.
        message: String,
    },

    /// Failed to connect to the snapshot database.
    #[error("Database connection failed: {message}")]
    ConnectionFailed {
        /// Description of the connection failure.
        message: String,
    },

    /// A snapshot query failed.
    #[error("Query failed: {message}")]
    QueryFailed {
        /// Description of the failure.
        message: String,
    },

    /// Database migration failed.
    #[error("Migration failed: {version} - {message}")]
    MigrationFailed {
        /// The migration version that failed.
        version: String,
        /// Description of the failure.
        message: String,
    },

    /// A transaction touched a key it did not lock.
    #[error("Key not locked by transaction: {key}")]
    NotInTransaction {
        /// The unlocked key.
        key: String,
    },

    /// A test already has a recorded successor.
    #[error("Lineage violation: test {test_id} already superseded by {existing}")]
    LineageViolation {
        /// The test being superseded again.
        test_id: u64,
        /// The successor already on record.
        existing: u64,
    },
}

/// Configuration errors.
///
/// These errors represent failures in configuration loading and validation.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ConfigError {
    /// Required configuration is missing.
    #[error("Missing required: {var}")]
    MissingRequired {
        /// The missing variable name.
        var: String,
    },

    /// Configuration value is invalid.
    #[error("Invalid value for {var}: {reason}")]
    InvalidValue {
        /// The variable name.
        var: String,
        /// Why the value is invalid.
        reason: String,
    },
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use static_assertions::assert_impl_all;

    assert_impl_all!(AppError: Send, Sync, std::error::Error);
    assert_impl_all!(PipelineError: Send, Sync, std::error::Error, Clone);
    assert_impl_all!(ModelError: Send, Sync, std::error::Error, Clone);
    assert_impl_all!(StoreError: Send, Sync, std::error::Error, Clone);
    assert_impl_all!(ConfigError: Send, Sync, std::error::Error, Clone);

    #[test]
    fn test_app_error_display_pipeline() {
        let err = AppError::Pipeline(PipelineError::GenerationFailed {
            reason: "model down".to_string(),
        });
        assert_eq!(
            err.to_string(),
            "Pipeline error: Test generation failed: model down"
        );
    }

    #[test]
    fn test_app_error_display_config() {
        let err = AppError::Config(ConfigError::MissingRequired {
            var: "DATABASE_PATH".to_string(),
        });
        assert_eq!(
            err.to_string(),
            "Configuration error: Missing required: DATABASE_PATH"
        );
    }

    #[test]
    fn test_app_error_from_store_error() {
        let app_err: AppError = StoreError::NotFound {
            key: "fix_knowledge".to_string(),
        }
        .into();
        assert!(matches!(app_err, AppError::Store(_)));
    }

    #[test]
    fn test_app_error_from_model_error() {
        let app_err: AppError = ModelError::Timeout { timeout_ms: 10 }.into();
        assert!(matches!(app_err, AppError::Model(_)));
    }

    #[test]
    fn test_model_timeout_converts_to_pipeline_timeout() {
        let err: PipelineError = ModelError::Timeout { timeout_ms: 45000 }.into();
        assert_eq!(err, PipelineError::ModelTimeout { timeout_ms: 45000 });
        assert_eq!(err.to_string(), "Model query timed out after 45000ms");
    }

    #[test]
    fn test_model_unavailable_converts_to_pipeline_unavailable() {
        let err: PipelineError = ModelError::Unavailable {
            message: "connection refused".to_string(),
        }
        .into();
        assert_eq!(err.category(), "model_unavailable");
    }

    #[test]
    fn test_pipeline_error_categories() {
        assert_eq!(
            PipelineError::GenerationFailed {
                reason: String::new()
            }
            .category(),
            "test_generation_failure"
        );
        assert_eq!(
            PipelineError::ExecutionTimeout { timeout_ms: 1 }.category(),
            "execution_timeout"
        );
        assert_eq!(
            PipelineError::UnknownTest { test_id: 9 }.category(),
            "system_exception"
        );
    }

    #[test]
    fn test_pipeline_error_recoverability() {
        assert!(PipelineError::NoPatternMatch {
            signature: "x".to_string()
        }
        .is_recoverable());
        assert!(!PipelineError::UnknownTest { test_id: 1 }.is_recoverable());
        assert!(!PipelineError::Store(StoreError::QueryFailed {
            message: "locked".to_string()
        })
        .is_recoverable());
    }

    #[test]
    fn test_store_error_display_lineage_violation() {
        let err = StoreError::LineageViolation {
            test_id: 3,
            existing: 4,
        };
        assert_eq!(
            err.to_string(),
            "Lineage violation: test 3 already superseded by 4"
        );
    }

    #[test]
    fn test_store_error_display_migration_failed() {
        let err = StoreError::MigrationFailed {
            version: "001".to_string(),
            message: "syntax error".to_string(),
        };
        assert_eq!(err.to_string(), "Migration failed: 001 - syntax error");
    }

    #[test]
    fn test_config_error_display_invalid_value() {
        let err = ConfigError::InvalidValue {
            var: "CYCLE_DELAY_MS".to_string(),
            reason: "must be a number".to_string(),
        };
        assert_eq!(
            err.to_string(),
            "Invalid value for CYCLE_DELAY_MS: must be a number"
        );
    }
}
