//! Durable snapshot lifecycle.
//!
//! [`rehydrate`] loads the latest snapshot on startup. [`Persister`] writes
//! snapshots on a timer and once more on shutdown.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tracing::{debug, info, warn};

use super::KnowledgeStore;
use crate::error::{PipelineError, StoreError};
use crate::health::{HealthIssue, IssueKind, Severity};
use crate::traits::SnapshotStore;

/// Message of the issue raised when no usable snapshot exists.
pub const NO_BACKUPS_MESSAGE: &str = "No durable knowledge snapshot exists yet";

/// Result of [`rehydrate`].
#[derive(Debug)]
pub struct Rehydrated {
    /// The loaded (or empty) store.
    pub store: KnowledgeStore,
    /// Issues raised while loading.
    pub issues: Vec<HealthIssue>,
}

impl Rehydrated {
    /// Whether the store was restored from a snapshot.
    #[must_use]
    pub fn restored(&self) -> bool {
        self.issues.is_empty()
    }
}

/// Build a store from the latest durable snapshot.
///
/// A missing snapshot yields an empty store and a `no_backups` issue. A
/// corrupt or unreadable one does the same and also records a
/// `persistence_unavailable` occurrence in the new store's error history.
pub async fn rehydrate(backend: &dyn SnapshotStore) -> Rehydrated {
    let store = KnowledgeStore::new();

    let failure = match backend.load_latest().await {
        Ok(Some(snapshot)) => {
            let revision = snapshot.revision;
            match store.restore(snapshot).await {
                Ok(()) => {
                    store.mark_durable(Utc::now());
                    info!(revision, "Knowledge store restored from snapshot");
                    return Rehydrated {
                        store,
                        issues: Vec::new(),
                    };
                }
                Err(e) => Some(e),
            }
        }
        Ok(None) => None,
        Err(e) => Some(e),
    };

    let mut issue = HealthIssue::new(IssueKind::NoBackups, Severity::Low, NO_BACKUPS_MESSAGE);

    match failure {
        None => info!("No knowledge snapshot found, starting empty"),
        Some(e) => {
            let message = match e {
                StoreError::PersistenceUnavailable { message } => message,
                other => other.to_string(),
            };
            warn!(error = %message, "Knowledge snapshot unusable, starting empty");
            let category = PipelineError::PersistenceUnavailable {
                message: message.clone(),
            }
            .category();
            if let Err(record_err) = store.record_error(category, &message, Utc::now()).await {
                warn!(error = %record_err, "Failed to record persistence failure");
            }
            issue = issue.with_details(serde_json::json!({ "reason": message }));
        }
    }

    Rehydrated {
        store,
        issues: vec![issue],
    }
}

/// Periodic snapshot writer.
pub struct Persister {
    store: Arc<KnowledgeStore>,
    backend: Arc<dyn SnapshotStore>,
    period: Duration,
}

impl Persister {
    /// Create a persister writing every `period`.
    #[must_use]
    pub fn new(store: Arc<KnowledgeStore>, backend: Arc<dyn SnapshotStore>, period: Duration) -> Self {
        Self {
            store,
            backend,
            period,
        }
    }

    /// Snapshot the store and write it now. Returns the persisted revision.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] if the backend write fails. The durable marker
    /// is only advanced on success.
    pub async fn persist_now(&self) -> Result<u64, StoreError> {
        let snapshot = self.store.snapshot().await;
        let revision = snapshot.revision;
        self.backend.save(&snapshot).await?;
        self.store.mark_durable(snapshot.taken_at);
        debug!(revision, "Knowledge store persisted");
        Ok(revision)
    }

    /// Run until `shutdown` fires, then write a final snapshot.
    pub fn spawn(self, mut shutdown: broadcast::Receiver<()>) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = interval_at(Instant::now() + self.period, self.period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

            info!(
                interval_ms = u64::try_from(self.period.as_millis()).unwrap_or(u64::MAX),
                "Persister started"
            );

            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        if let Err(e) = self.persist_now().await {
                            warn!(error = %e, "Periodic snapshot failed");
                        }
                    }
                    _ = shutdown.recv() => {
                        info!("Persister shutting down");
                        break;
                    }
                }
            }

            if let Err(e) = self.persist_now().await {
                warn!(error = %e, "Final snapshot failed");
            }
            info!("Persister stopped");
        })
    }
}
