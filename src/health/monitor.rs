//! Periodic health monitor.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, info, warn};

use super::agents::{AgentStatusMap, AgentTracker, MODEL_FAILURE_FLOOR, MONITOR};
use super::checks::{evaluate, HealthInputs, HEALTH_CHECK_FAILURE};
use super::types::HealthReport;
use crate::channel::{publish, ChannelMessage, StatusSender};
use crate::config::DEFAULT_MONITOR_INTERVAL_MS;
use crate::error::StoreError;
use crate::knowledge::{
    ErrorHistory, FixKnowledge, HealthChecks, KnowledgeStore, MonitorStats, AGENT_STATUS,
    ERROR_HISTORY, FIX_KNOWLEDGE, HEALTH_CHECKS, MONITOR_STATS,
};
use crate::traits::{ResourceGauge, TimeProvider};

/// Health monitor thresholds.
#[derive(Debug, Clone, PartialEq)]
pub struct MonitorConfig {
    /// Time between passes.
    pub interval: Duration,
    /// Disk usage (percent) at which `disk_usage` is raised.
    pub disk_threshold_percent: f64,
    /// Patterns plus insights below which `limited_knowledge` is raised.
    pub knowledge_floor: usize,
    /// Consecutive model failures at which `model_failures` is raised.
    pub model_failure_floor: u32,
    /// Idle time after which a periodic agent is reported as stalled.
    pub stall_warn_after: Duration,
    /// Idle time after which a stalled agent is high severity.
    pub stall_after: Duration,
    /// Occurrence count a category must exceed to count as recurring.
    pub recurring_threshold: u64,
    /// Only categories seen this recently can recur.
    pub recurring_window: Duration,
    /// `system_exception` count that must be exceeded.
    pub system_exception_floor: u64,
    /// Only exceptions seen this recently are reported.
    pub system_exception_window: Duration,
    /// `unfixable_test` count that must be exceeded.
    pub unfixable_floor: u64,
    /// Maximum length of the recurring-errors message.
    pub message_limit: usize,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_millis(DEFAULT_MONITOR_INTERVAL_MS),
            disk_threshold_percent: 90.0,
            knowledge_floor: 5,
            model_failure_floor: MODEL_FAILURE_FLOOR,
            stall_warn_after: Duration::from_secs(5 * 60),
            stall_after: Duration::from_secs(10 * 60),
            recurring_threshold: 1,
            recurring_window: Duration::from_secs(60 * 60),
            system_exception_floor: 0,
            system_exception_window: Duration::from_secs(30 * 60),
            unfixable_floor: 5,
            message_limit: 500,
        }
    }
}

/// Inspects the knowledge store and resource gauges on a timer.
///
/// [`HealthMonitor::check`] only reads. [`HealthMonitor::run_pass`] also
/// records the pass: summary entries, counters, and a
/// `health_check_failure` occurrence when issues were found.
pub struct HealthMonitor {
    store: Arc<KnowledgeStore>,
    gauge: Arc<dyn ResourceGauge>,
    clock: Arc<dyn TimeProvider>,
    config: MonitorConfig,
    agent: AgentTracker,
    status_tx: Option<StatusSender>,
}

impl HealthMonitor {
    /// Create a monitor.
    #[must_use]
    pub fn new(
        store: Arc<KnowledgeStore>,
        gauge: Arc<dyn ResourceGauge>,
        clock: Arc<dyn TimeProvider>,
        config: MonitorConfig,
    ) -> Self {
        let agent = AgentTracker::new(Arc::clone(&store), MONITOR, true);
        Self {
            store,
            gauge,
            clock,
            config,
            agent,
            status_tx: None,
        }
    }

    /// Publish a `status_update` after every pass.
    #[must_use]
    pub fn with_status_channel(mut self, sender: StatusSender) -> Self {
        self.status_tx = Some(sender);
        self
    }

    /// Settings in use.
    #[must_use]
    pub const fn config(&self) -> &MonitorConfig {
        &self.config
    }

    async fn inputs(&self) -> Result<HealthInputs, StoreError> {
        let knowledge: FixKnowledge = self.store.get_or_default(FIX_KNOWLEDGE).await?;
        let agents: AgentStatusMap = self.store.get_or_default(AGENT_STATUS).await?;
        let errors: ErrorHistory = self.store.get_or_default(ERROR_HISTORY).await?;
        Ok(HealthInputs {
            now: self.clock.now(),
            disk_usage: self.gauge.disk_usage_percent(),
            has_backup: self.store.last_durable().is_some(),
            knowledge_items: knowledge.pattern_count() + knowledge.insight_count(),
            agents,
            errors,
        })
    }

    /// Evaluate every check without recording anything.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] if an inspected entry cannot be decoded.
    pub async fn check(&self) -> Result<HealthReport, StoreError> {
        let inputs = self.inputs().await?;
        let issues = evaluate(&inputs, &self.config);
        Ok(HealthReport::new(issues, inputs.now))
    }

    /// Run one pass and record it.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] if the store cannot be read or updated.
    pub async fn run_pass(&self) -> Result<HealthReport, StoreError> {
        let report = self.check().await?;
        let at = report.checked_at;
        self.agent.touch(at).await?;

        let issues = report.issues.clone();
        let status = report.status;
        self.store
            .update_as(HEALTH_CHECKS, move |checks: &mut HealthChecks| {
                checks.timestamp = Some(at);
                checks.check_count += 1;
                checks.alert_count = issues.len();
                checks.status = status;
                checks.issues = issues;
                Ok(())
            })
            .await?;

        let alerted = !report.is_healthy();
        self.store
            .update_as(MONITOR_STATS, move |stats: &mut MonitorStats| {
                stats.health_checks += 1;
                if alerted {
                    stats.health_alerts += 1;
                }
                stats.last_check = Some(at);
                Ok(())
            })
            .await?;

        if alerted {
            self.store
                .record_error(HEALTH_CHECK_FAILURE, report.alerts().join("; "), at)
                .await?;
            for issue in &report.issues {
                warn!(
                    kind = %issue.kind,
                    severity = %issue.severity,
                    message = %issue.message,
                    "Health issue detected"
                );
            }
        } else {
            debug!("Health pass clean");
        }

        publish(self.status_tx.as_ref(), ChannelMessage::status_update(&report));
        Ok(report)
    }

    /// Run passes every `interval` until `shutdown` fires.
    pub fn spawn(self: Arc<Self>, mut shutdown: broadcast::Receiver<()>) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = interval(self.config.interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

            info!(
                interval_ms = u64::try_from(self.config.interval.as_millis()).unwrap_or(u64::MAX),
                "Health monitor started"
            );

            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        match self.run_pass().await {
                            Ok(report) => debug!(status = %report.status, issues = report.issues.len(), "Health pass complete"),
                            Err(e) => warn!(error = %e, "Health pass failed"),
                        }
                    }
                    _ = shutdown.recv() => {
                        info!("Health monitor shutting down");
                        break;
                    }
                }
            }
        })
    }
}
