//! Trait definitions for dependency injection.
//!
//! This module defines the seams the loop talks through:
//! - [`ModelClient`]: Opaque model query capability
//! - [`SnapshotStore`]: Durable snapshot backend for the knowledge store
//! - [`ResourceGauge`]: Resource gauges read by the health monitor
//! - [`TimeProvider`]: Time abstraction for testing
//!
//! # Mocking
//!
//! All traits are annotated with `#[cfg_attr(test, mockall::automock)]`
//! which generates mock implementations automatically for testing.
//!
//! # Example
//!
//! ```
//! use test_mender::traits::{TimeProvider, RealTimeProvider};
//!
//! let time_provider = RealTimeProvider;
//! let now = time_provider.now();
//! println!("Current time: {now}");
//! ```

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::error::{ModelError, StoreError};
use crate::knowledge::KnowledgeSnapshot;

/// Model query capability.
///
/// A single operation that returns text or fails. Callers treat every
/// failure as a typed error feeding their fallback path.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ModelClient: Send + Sync {
    /// Query the model with a prompt, bounded by `timeout`.
    ///
    /// # Errors
    ///
    /// Returns [`ModelError::Timeout`] when the bound is exceeded and
    /// [`ModelError::Unavailable`] for any other failure.
    async fn query(&self, prompt: &str, timeout: Duration) -> Result<String, ModelError>;
}

/// Durable storage for knowledge store snapshots.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait SnapshotStore: Send + Sync {
    /// Persist a snapshot.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] if the write fails.
    async fn save(&self, snapshot: &KnowledgeSnapshot) -> Result<(), StoreError>;

    /// Load the most recent snapshot.
    ///
    /// Returns `None` if no snapshot has ever been written.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::PersistenceUnavailable`] if the latest snapshot
    /// cannot be decoded, or another [`StoreError`] if the read fails.
    async fn load_latest(&self) -> Result<Option<KnowledgeSnapshot>, StoreError>;

    /// Delete all but the newest `keep` snapshots, returning how many were removed.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] if the delete fails.
    async fn prune(&self, keep: u32) -> Result<u64, StoreError>;
}

/// Resource gauges for the health monitor.
#[cfg_attr(test, mockall::automock)]
pub trait ResourceGauge: Send + Sync {
    /// Disk usage of the data volume in percent (0.0-100.0).
    ///
    /// # Errors
    ///
    /// Returns a description of the failure if the gauge cannot be read.
    fn disk_usage_percent(&self) -> Result<f64, String>;
}

/// Time provider trait for testing.
///
/// This trait abstracts time operations to allow for
/// deterministic testing by providing fixed timestamps.
#[cfg_attr(test, mockall::automock)]
pub trait TimeProvider: Send + Sync {
    /// Get the current time.
    fn now(&self) -> DateTime<Utc>;
}

/// Real time provider using system clock.
///
/// This is the production implementation that returns the actual current time.
#[derive(Debug, Clone, Copy, Default)]
pub struct RealTimeProvider;

impl TimeProvider for RealTimeProvider {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use static_assertions::assert_impl_all;

    assert_impl_all!(RealTimeProvider: Send, Sync, Clone, Copy, Default);

    #[test]
    fn test_real_time_provider_is_monotonic_enough() {
        let provider = RealTimeProvider;
        let first = provider.now();
        let second = provider.now();
        assert!(second >= first);
    }

    #[test]
    fn test_mock_time_provider_returns_fixed_time() {
        let fixed = Utc::now() - chrono::Duration::minutes(15);
        let mut mock = MockTimeProvider::new();
        mock.expect_now().return_const(fixed);
        assert_eq!(mock.now(), fixed);
    }

    #[tokio::test]
    async fn test_mock_model_client_timeout() {
        let mut mock = MockModelClient::new();
        mock.expect_query()
            .returning(|_, timeout| {
                Err(ModelError::Timeout {
                    timeout_ms: u64::try_from(timeout.as_millis()).unwrap(),
                })
            });
        let result = mock.query("hi", Duration::from_millis(250)).await;
        assert_eq!(result, Err(ModelError::Timeout { timeout_ms: 250 }));
    }
}
