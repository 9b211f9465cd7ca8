//! Process wiring.
//!
//! [`Runtime`] builds every component over one shared [`KnowledgeStore`],
//! starts the background tasks, and drives the orchestrator until a
//! shutdown signal arrives.

use std::future::Future;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::broadcast;
use tracing::{info, warn};

use crate::channel::{status_channel, ChannelMessage, StatusSender};
use crate::config::{validate_config, Config, LoopSettings};
use crate::error::AppError;
use crate::fix::FixEngine;
use crate::health::{HealthIssue, HealthMonitor, SystemResourceGauge};
use crate::knowledge::persist::{rehydrate, Persister};
use crate::knowledge::{KnowledgeStore, SqliteSnapshotStore};
use crate::learning::LearningEngine;
use crate::model::HttpModelClient;
use crate::orchestrator::Orchestrator;
use crate::pipeline::{TestExecutor, TestGenerator};
use crate::traits::{ModelClient, RealTimeProvider, ResourceGauge, SnapshotStore, TimeProvider};

/// A fully wired loop, ready to run.
pub struct Runtime {
    store: Arc<KnowledgeStore>,
    orchestrator: Arc<Orchestrator>,
    monitor: Arc<HealthMonitor>,
    persister: Persister,
    status_tx: StatusSender,
    startup_issues: Vec<HealthIssue>,
}

impl Runtime {
    /// Wire the loop from configuration: HTTP model client, `SQLite`
    /// snapshots, and a disk gauge on the database volume.
    ///
    /// # Errors
    ///
    /// Returns [`AppError`] if the configuration is invalid, the model client
    /// cannot be built, or the snapshot database cannot be opened.
    pub async fn from_config(config: &Config) -> Result<Self, AppError> {
        validate_config(config)?;

        let model: Arc<dyn ModelClient> = Arc::new(HttpModelClient::new(
            config.model_base_url.clone(),
            config.model.clone(),
        )?);
        let backend: Arc<dyn SnapshotStore> =
            Arc::new(SqliteSnapshotStore::new(&config.database_path).await?);
        let data_dir = Path::new(&config.database_path)
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
            .unwrap_or_else(|| Path::new("."));
        let gauge: Arc<dyn ResourceGauge> = Arc::new(SystemResourceGauge::new(data_dir));

        Ok(Self::build(
            &config.settings,
            Duration::from_millis(config.snapshot_interval_ms),
            model,
            backend,
            gauge,
            Arc::new(RealTimeProvider),
        )
        .await)
    }

    /// Wire the loop over explicit collaborators.
    pub async fn build(
        settings: &LoopSettings,
        snapshot_interval: Duration,
        model: Arc<dyn ModelClient>,
        backend: Arc<dyn SnapshotStore>,
        gauge: Arc<dyn ResourceGauge>,
        clock: Arc<dyn TimeProvider>,
    ) -> Self {
        let rehydrated = rehydrate(backend.as_ref()).await;
        let startup_issues = rehydrated.issues;
        let store = Arc::new(rehydrated.store);
        let (status_tx, _) = status_channel();

        let executor = Arc::new(TestExecutor::new(
            Arc::clone(&store),
            settings.executor.clone(),
        ));
        let generator = Arc::new(TestGenerator::new(
            Arc::clone(&store),
            Arc::clone(&model),
            settings.generator.clone(),
        ));
        let fixer = Arc::new(FixEngine::new(
            Arc::clone(&store),
            Arc::clone(&model),
            Arc::clone(&executor),
            settings.fix.clone(),
        ));
        let learner = Arc::new(LearningEngine::new(
            Arc::clone(&store),
            model,
            settings.learner.clone(),
        ));
        let orchestrator = Arc::new(
            Orchestrator::new(
                Arc::clone(&store),
                generator,
                executor,
                fixer,
                learner,
                settings.orchestrator.clone(),
            )
            .with_status_channel(status_tx.clone()),
        );
        let monitor = Arc::new(
            HealthMonitor::new(Arc::clone(&store), gauge, clock, settings.monitor.clone())
                .with_status_channel(status_tx.clone()),
        );
        let persister = Persister::new(Arc::clone(&store), backend, snapshot_interval);

        Self {
            store,
            orchestrator,
            monitor,
            persister,
            status_tx,
            startup_issues,
        }
    }

    /// Shared knowledge store.
    #[must_use]
    pub fn store(&self) -> Arc<KnowledgeStore> {
        Arc::clone(&self.store)
    }

    /// Turn driver.
    #[must_use]
    pub fn orchestrator(&self) -> Arc<Orchestrator> {
        Arc::clone(&self.orchestrator)
    }

    /// Issues raised while loading the knowledge snapshot.
    #[must_use]
    pub fn startup_issues(&self) -> &[HealthIssue] {
        &self.startup_issues
    }

    /// Subscribe to outbound channel messages.
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<ChannelMessage> {
        self.status_tx.subscribe()
    }

    /// Run until `signal` resolves, then stop every task. The persister
    /// writes a final snapshot on the way out.
    pub async fn run_until(self, signal: impl Future<Output = ()> + Send) {
        for issue in &self.startup_issues {
            warn!(kind = %issue.kind, message = %issue.message, "Startup issue");
        }

        let (shutdown_tx, _) = broadcast::channel(1);
        let persister = self.persister.spawn(shutdown_tx.subscribe());
        let monitor = Arc::clone(&self.monitor).spawn(shutdown_tx.subscribe());
        let turns = tokio::spawn(Arc::clone(&self.orchestrator).run(shutdown_tx.subscribe()));

        signal.await;
        info!("Shutdown requested");
        if shutdown_tx.send(()).is_err() {
            warn!("No running tasks to stop");
        }

        for (name, handle) in [("orchestrator", turns), ("monitor", monitor), ("persister", persister)]
        {
            if let Err(e) = handle.await {
                warn!(task = name, error = %e, "Task ended abnormally");
            }
        }
        info!(turns = self.orchestrator.turns(), "Runtime stopped");
    }
}
