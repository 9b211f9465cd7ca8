//! Per-agent activity records.
//!
//! Each agent updates its own [`AgentStatus`] on every action. The health
//! monitor only reads them.

use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::StoreError;
use crate::knowledge::{KnowledgeStore, AGENT_STATUS};

/// Test generator agent.
pub const TEST_GENERATOR: &str = "TestGenerator";
/// Test executor agent.
pub const TEST_EXECUTOR: &str = "TestExecutor";
/// Fix engine agent.
pub const FIXER: &str = "Fixer";
/// Learning engine agent.
pub const LEARNER: &str = "Learner";
/// Health monitor agent.
pub const MONITOR: &str = "Monitor";

/// Model failures after which an agent stops asking the model.
pub const MODEL_FAILURE_FLOOR: u32 = 3;

/// Activity record of one agent.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AgentStatus {
    /// Latest action.
    pub last_action_at: Option<DateTime<Utc>>,
    /// Model failures since the last model success.
    pub model_failure_count: u32,
    /// Whether the agent is expected to act on a schedule.
    pub expects_periodic: bool,
    /// Whether the agent's circuit breaker is open.
    #[serde(default)]
    pub circuit_open: bool,
    /// Actions ever.
    #[serde(default)]
    pub total_actions: u64,
}

/// Agent statuses keyed by agent name.
pub type AgentStatusMap = BTreeMap<String, AgentStatus>;

/// Write handle for one agent's status.
#[derive(Debug, Clone)]
pub struct AgentTracker {
    store: Arc<KnowledgeStore>,
    name: &'static str,
    expects_periodic: bool,
}

impl AgentTracker {
    /// Create a tracker.
    #[must_use]
    pub const fn new(store: Arc<KnowledgeStore>, name: &'static str, expects_periodic: bool) -> Self {
        Self {
            store,
            name,
            expects_periodic,
        }
    }

    /// Agent name.
    #[must_use]
    pub const fn name(&self) -> &'static str {
        self.name
    }

    async fn modify<R: Send>(
        &self,
        f: impl FnOnce(&mut AgentStatus) -> R + Send,
    ) -> Result<R, StoreError> {
        let name = self.name;
        let periodic = self.expects_periodic;
        self.store
            .update_as(AGENT_STATUS, move |map: &mut AgentStatusMap| {
                let status = map.entry(name.to_string()).or_default();
                status.expects_periodic = periodic;
                Ok(f(status))
            })
            .await
    }

    /// Record an action.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] if the status entry cannot be updated.
    pub async fn touch(&self, at: DateTime<Utc>) -> Result<(), StoreError> {
        self.modify(|status| {
            status.last_action_at = Some(at);
            status.total_actions += 1;
        })
        .await
    }

    /// Record a failed model query. Returns the new failure count.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] if the status entry cannot be updated.
    pub async fn model_failure(&self, at: DateTime<Utc>) -> Result<u32, StoreError> {
        let count = self
            .modify(|status| {
                status.last_action_at = Some(at);
                status.model_failure_count = status.model_failure_count.saturating_add(1);
                status.model_failure_count
            })
            .await?;
        tracing::debug!(agent = self.name, count, "Model failure recorded");
        Ok(count)
    }

    /// Record a successful model query, resetting the failure count.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] if the status entry cannot be updated.
    pub async fn model_success(&self, at: DateTime<Utc>) -> Result<(), StoreError> {
        self.modify(|status| {
            status.last_action_at = Some(at);
            status.model_failure_count = 0;
        })
        .await
    }

    /// Mirror the agent's circuit breaker state.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] if the status entry cannot be updated.
    pub async fn set_circuit(&self, open: bool) -> Result<(), StoreError> {
        self.modify(|status| status.circuit_open = open).await
    }

    /// Current status, if the agent has ever been recorded.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] if the status entry cannot be decoded.
    pub async fn status(&self) -> Result<Option<AgentStatus>, StoreError> {
        let map: AgentStatusMap = self.store.get_or_default(AGENT_STATUS).await?;
        Ok(map.get(self.name).cloned())
    }

    /// Whether the agent should still ask the model, or go straight to its fallback.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] if the status entry cannot be decoded.
    pub async fn model_allowed(&self) -> Result<bool, StoreError> {
        Ok(self
            .status()
            .await?
            .is_none_or(|s| s.model_failure_count < MODEL_FAILURE_FLOOR))
    }
}
