//! Turn driver.
//!
//! One turn generates a batch of tests, executes each, repairs the failing
//! ones along their lineage, and feeds every fix attempt to the learner.
//! A turn in which every test passed first time is mined for success
//! concepts instead.
//! Component failures are classified into the error history and never abort
//! the turn. Each fallible agent sits behind a [`CircuitBreaker`]; after
//! several turns in a row with errors the orchestrator resets them and logs
//! a self-healing action.
//!
//! ```text
//! generate ──▶ execute ──passed──▶ done
//!                 │
//!               failed
//!                 ▼
//!               fix ──▶ learn ──success──▶ done
//!                 ▲       │
//!                 └─failed┘  (up to max_fix_attempts, then unfixable_test)
//! ```

mod circuit_breaker;

pub use circuit_breaker::{CircuitBreaker, CircuitBreakerConfig, CircuitState};

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Utc;
use tokio::sync::{broadcast, Mutex};
use tracing::{debug, info, warn};

use crate::channel::{publish, ChannelMessage, StatusSender};
use crate::config::{DEFAULT_CYCLE_DELAY_MS, DEFAULT_MAX_FIX_ATTEMPTS, DEFAULT_TESTS_PER_TURN};
use crate::error::PipelineError;
use crate::fix::FixEngine;
use crate::health::{AgentTracker, FIXER, LEARNER, TEST_GENERATOR, UNFIXABLE_TEST};
use crate::knowledge::{
    ErrorHistory, KnowledgeStore, SelfHealingAction, SelfHealingLog, ERROR_HISTORY,
    SELF_HEALING_ACTIONS,
};
use crate::learning::LearningEngine;
use crate::pipeline::{Difficulty, FixAttempt, Test, TestExecutor, TestGenerator, TestResult};

/// Category recorded for each fix attempt whose successor still fails.
pub const FIX_FAILURE: &str = "fix_failure";

/// Sender name on channel messages.
pub const ORCHESTRATOR: &str = "Orchestrator";

/// Turn driver settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OrchestratorConfig {
    /// Tests generated per turn.
    pub tests_per_turn: u32,
    /// Fix attempts per failing test per turn.
    pub max_fix_attempts: u32,
    /// Delay between turns.
    pub cycle_delay: Duration,
    /// Consecutive turns with errors that trigger self-healing.
    pub max_consecutive_error_turns: u32,
    /// Breaker thresholds shared by every agent.
    pub breaker: CircuitBreakerConfig,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            tests_per_turn: DEFAULT_TESTS_PER_TURN,
            max_fix_attempts: DEFAULT_MAX_FIX_ATTEMPTS,
            cycle_delay: Duration::from_millis(DEFAULT_CYCLE_DELAY_MS),
            max_consecutive_error_turns: 3,
            breaker: CircuitBreakerConfig::default(),
        }
    }
}

/// What one turn did.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TurnReport {
    /// Turn number, starting at 1.
    pub turn: u64,
    /// Tests generated and executed.
    pub executed: usize,
    /// Original tests that passed first time.
    pub passed: usize,
    /// Original tests that failed first time.
    pub failed: usize,
    /// Fix attempts committed.
    pub fix_attempts: usize,
    /// Failing tests repaired this turn.
    pub repaired: usize,
    /// Failing tests that exhausted their fix attempts.
    pub unfixable: usize,
    /// Generation attempts that failed.
    pub generation_failures: usize,
    /// Concepts learned from tests that passed first time.
    pub success_concepts: usize,
    /// Calls refused by an open breaker.
    pub skipped: usize,
    /// Unexpected component errors.
    pub errors: usize,
}

impl TurnReport {
    /// Whether the turn hit generation failures or unexpected errors.
    #[must_use]
    pub const fn had_errors(&self) -> bool {
        self.errors > 0 || self.generation_failures > 0
    }
}

#[derive(Debug, Clone, Copy)]
enum Guarded {
    Generator,
    Fixer,
    Learner,
}

struct Breakers {
    generator: CircuitBreaker,
    fixer: CircuitBreaker,
    learner: CircuitBreaker,
}

impl Breakers {
    fn new(config: &CircuitBreakerConfig) -> Self {
        Self {
            generator: CircuitBreaker::new(TEST_GENERATOR, config.clone()),
            fixer: CircuitBreaker::new(FIXER, config.clone()),
            learner: CircuitBreaker::new(LEARNER, config.clone()),
        }
    }

    fn get(&mut self, which: Guarded) -> &mut CircuitBreaker {
        match which {
            Guarded::Generator => &mut self.generator,
            Guarded::Fixer => &mut self.fixer,
            Guarded::Learner => &mut self.learner,
        }
    }
}

/// Drives generate, execute, fix, and learn turns.
pub struct Orchestrator {
    store: Arc<KnowledgeStore>,
    generator: Arc<TestGenerator>,
    executor: Arc<TestExecutor>,
    fixer: Arc<FixEngine>,
    learner: Arc<LearningEngine>,
    config: OrchestratorConfig,
    breakers: Mutex<Breakers>,
    turns: AtomicU64,
    status_tx: Option<StatusSender>,
}

impl Orchestrator {
    /// Create an orchestrator over already-built components.
    #[must_use]
    pub fn new(
        store: Arc<KnowledgeStore>,
        generator: Arc<TestGenerator>,
        executor: Arc<TestExecutor>,
        fixer: Arc<FixEngine>,
        learner: Arc<LearningEngine>,
        config: OrchestratorConfig,
    ) -> Self {
        let breakers = Mutex::new(Breakers::new(&config.breaker));
        Self {
            store,
            generator,
            executor,
            fixer,
            learner,
            config,
            breakers,
            turns: AtomicU64::new(0),
            status_tx: None,
        }
    }

    /// Publish self-healing messages on `sender`.
    #[must_use]
    pub fn with_status_channel(mut self, sender: StatusSender) -> Self {
        self.status_tx = Some(sender);
        self
    }

    /// Turns completed so far.
    #[must_use]
    pub fn turns(&self) -> u64 {
        self.turns.load(Ordering::SeqCst)
    }

    /// State of an agent's breaker.
    pub async fn circuit_state(&self, agent: &str) -> Option<CircuitState> {
        let breakers = self.breakers.lock().await;
        let state = [&breakers.generator, &breakers.fixer, &breakers.learner]
            .into_iter()
            .find(|b| b.agent() == agent)
            .map(CircuitBreaker::state);
        state
    }

    fn tracker(&self, which: Guarded) -> &AgentTracker {
        match which {
            Guarded::Generator => self.generator.agent(),
            Guarded::Fixer => self.fixer.agent(),
            Guarded::Learner => self.learner.agent(),
        }
    }

    // ========================================================================
    // Breakers
    // ========================================================================

    async fn admit(&self, which: Guarded, report: &mut TurnReport) -> bool {
        let now = Instant::now();
        let mut breakers = self.breakers.lock().await;
        let breaker = breakers.get(which);
        let was_open = breaker.is_open();
        let allowed = breaker.allows(now);
        if !allowed {
            report.skipped += 1;
            debug!(
                agent = breaker.agent(),
                remaining_ms = breaker
                    .remaining_cooldown(now)
                    .map_or(0, |d| u64::try_from(d.as_millis()).unwrap_or(u64::MAX)),
                "Circuit open, skipping call"
            );
        }
        drop(breakers);
        if was_open && allowed {
            self.mirror(which, false).await;
        }
        allowed
    }

    async fn settle(&self, which: Guarded, ok: bool) {
        let mut breakers = self.breakers.lock().await;
        let breaker = breakers.get(which);
        let was_open = breaker.is_open();
        if ok {
            breaker.record_success();
        } else {
            breaker.record_failure(Instant::now());
        }
        let is_open = breaker.is_open();
        drop(breakers);
        if was_open != is_open {
            self.mirror(which, is_open).await;
        }
    }

    async fn mirror(&self, which: Guarded, open: bool) {
        if let Err(e) = self.tracker(which).set_circuit(open).await {
            warn!(error = %e, "Failed to record circuit state");
        }
    }

    async fn record(&self, category: &str, detail: String) {
        if let Err(e) = self.store.record_error(category, detail, Utc::now()).await {
            warn!(category, error = %e, "Failed to record error occurrence");
        }
    }

    async fn record_fault(&self, error: &PipelineError, report: &mut TurnReport) {
        report.errors += 1;
        warn!(category = error.category(), error = %error, "Component error");
        self.record(error.category(), error.to_string()).await;
    }

    // ========================================================================
    // Turn
    // ========================================================================

    /// Run one full turn.
    pub async fn run_turn(&self) -> TurnReport {
        let mut report = TurnReport {
            turn: self.turns.fetch_add(1, Ordering::SeqCst) + 1,
            ..TurnReport::default()
        };

        let difficulty = match self.generator.current_difficulty().await {
            Ok(difficulty) => difficulty,
            Err(e) => {
                self.record_fault(&e, &mut report).await;
                Difficulty::default()
            }
        };

        let mut passed = Vec::new();
        for _ in 0..self.config.tests_per_turn {
            let Some(test) = self.generate(difficulty, &mut report).await else {
                continue;
            };
            let result = self.executor.execute(&test).await;
            report.executed += 1;

            if let Err(e) = self.generator.record_outcome(result.passed).await {
                self.record_fault(&e, &mut report).await;
            }

            if result.passed {
                report.passed += 1;
                passed.push(test);
            } else {
                report.failed += 1;
                self.repair(test, result, &mut report).await;
            }
        }
        if report.failed == 0 && !passed.is_empty() {
            self.learn_from_success(&passed, &mut report).await;
        }

        info!(
            turn = report.turn,
            executed = report.executed,
            passed = report.passed,
            fix_attempts = report.fix_attempts,
            repaired = report.repaired,
            unfixable = report.unfixable,
            errors = report.errors,
            "Turn complete"
        );
        report
    }

    async fn generate(&self, difficulty: Difficulty, report: &mut TurnReport) -> Option<Test> {
        let mut tier = Some(difficulty);
        let mut tries = 0;
        while let Some(current) = tier {
            if tries == 2 || !self.admit(Guarded::Generator, report).await {
                break;
            }
            tries += 1;
            match self.generator.generate(current).await {
                Ok(test) => {
                    self.settle(Guarded::Generator, true).await;
                    return Some(test);
                }
                Err(e @ PipelineError::GenerationFailed { .. }) => {
                    report.generation_failures += 1;
                    warn!(difficulty = %current, error = %e, "Test generation failed");
                    self.record(e.category(), e.to_string()).await;
                    self.settle(Guarded::Generator, false).await;
                    tier = current.simpler();
                }
                Err(e) => {
                    self.record_fault(&e, report).await;
                    self.settle(Guarded::Generator, false).await;
                    break;
                }
            }
        }
        None
    }

    async fn repair(&self, original: Test, first: TestResult, report: &mut TurnReport) {
        let original_id = original.id;
        let mut test = original;
        let mut result = first;

        for _ in 0..self.config.max_fix_attempts {
            if !self.admit(Guarded::Fixer, report).await {
                return;
            }
            let outcome = match self.fixer.fix(&test, &result).await {
                Ok(outcome) => {
                    self.settle(Guarded::Fixer, true).await;
                    outcome
                }
                Err(e) => {
                    self.record_fault(&e, report).await;
                    self.settle(Guarded::Fixer, false).await;
                    return;
                }
            };
            report.fix_attempts += 1;
            self.learn(&outcome.attempt, report).await;

            if outcome.attempt.success {
                report.repaired += 1;
                info!(
                    test_id = original_id,
                    new_test_id = outcome.new_test.id,
                    "Test repaired"
                );
                return;
            }

            self.record(
                FIX_FAILURE,
                format!(
                    "Fix for test {} failed: {}",
                    test.id,
                    outcome.result.failure_reason.as_deref().unwrap_or("unknown")
                ),
            )
            .await;
            test = outcome.new_test;
            result = outcome.result;
        }

        report.unfixable += 1;
        warn!(
            test_id = original_id,
            attempts = self.config.max_fix_attempts,
            "Test still failing after fix attempts"
        );
        self.record(
            UNFIXABLE_TEST,
            format!(
                "Test {original_id} still failing after {} fix attempts: {}",
                self.config.max_fix_attempts,
                result.failure_reason.as_deref().unwrap_or("unknown")
            ),
        )
        .await;
    }

    async fn learn(&self, attempt: &FixAttempt, report: &mut TurnReport) {
        if !self.admit(Guarded::Learner, report).await {
            return;
        }
        match self.learner.learn(attempt).await {
            Ok(outcome) => {
                debug!(
                    bucket = %outcome.bucket,
                    concept = outcome.concept.as_deref().unwrap_or("none"),
                    from_model = outcome.from_model,
                    "Attempt learned"
                );
                self.settle(Guarded::Learner, true).await;
            }
            Err(e) => {
                self.record_fault(&e, report).await;
                self.settle(Guarded::Learner, false).await;
            }
        }
    }

    async fn learn_from_success(&self, passed: &[Test], report: &mut TurnReport) {
        if !self.admit(Guarded::Learner, report).await {
            return;
        }
        match self.learner.learn_from_success(passed).await {
            Ok(concepts) => {
                report.success_concepts += concepts.len();
                self.settle(Guarded::Learner, true).await;
            }
            Err(e) => {
                self.record_fault(&e, report).await;
                self.settle(Guarded::Learner, false).await;
            }
        }
    }

    // ========================================================================
    // Self-healing
    // ========================================================================

    /// Close every breaker and log the action.
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError::Store`] if the action log cannot be written.
    pub async fn self_heal(&self, reason: &str) -> Result<SelfHealingAction, PipelineError> {
        {
            let mut breakers = self.breakers.lock().await;
            breakers.generator.reset();
            breakers.fixer.reset();
            breakers.learner.reset();
        }
        for which in [Guarded::Generator, Guarded::Fixer, Guarded::Learner] {
            self.mirror(which, false).await;
        }

        let errors: ErrorHistory = self.store.get_or_default(ERROR_HISTORY).await?;
        let most_common_error = errors
            .iter()
            .max_by_key(|(_, record)| record.count)
            .map(|(category, _)| category.clone());

        let action = SelfHealingAction {
            timestamp: Utc::now(),
            action: "reset_circuit_breakers".to_string(),
            reason: reason.to_string(),
            most_common_error,
        };
        let logged = action.clone();
        self.store
            .update_as(SELF_HEALING_ACTIONS, move |log: &mut SelfHealingLog| {
                log.push(logged);
                Ok(())
            })
            .await?;

        warn!(
            reason,
            most_common_error = action.most_common_error.as_deref().unwrap_or("none"),
            "Self-healing: circuit breakers reset"
        );
        publish(
            self.status_tx.as_ref(),
            ChannelMessage::message(
                ORCHESTRATOR,
                format!("Self-healing: {} ({reason})", action.action),
            ),
        );
        Ok(action)
    }

    /// Run turns until `shutdown` fires. A turn in progress always finishes.
    pub async fn run(self: Arc<Self>, mut shutdown: broadcast::Receiver<()>) {
        info!(
            tests_per_turn = self.config.tests_per_turn,
            max_fix_attempts = self.config.max_fix_attempts,
            "Orchestrator started"
        );
        let mut error_turns = 0_u32;

        loop {
            let report = self.run_turn().await;

            if report.had_errors() {
                error_turns += 1;
                if error_turns >= self.config.max_consecutive_error_turns {
                    let reason = format!("{error_turns} consecutive turns with errors");
                    if let Err(e) = self.self_heal(&reason).await {
                        warn!(error = %e, "Self-healing failed");
                    }
                    error_turns = 0;
                }
            } else {
                error_turns = 0;
            }

            tokio::select! {
                () = tokio::time::sleep(self.config.cycle_delay) => {}
                _ = shutdown.recv() => {
                    info!(turns = self.turns(), "Orchestrator shutting down");
                    break;
                }
            }
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::fix::FixEngineConfig;
    use crate::health::{AgentStatusMap, SYSTEM_EXCEPTION};
    use crate::knowledge::{FixKnowledge, LearningStats, AGENT_STATUS, FIX_KNOWLEDGE, LEARNING_STATS};
    use crate::learning::LearnerConfig;
    use crate::pipeline::{ExecutorConfig, GeneratorConfig};
    use crate::test_utils::{mock_model_answering, mock_model_unavailable};
    use crate::traits::ModelClient;
    use pretty_assertions::assert_eq;

    fn unavailable_model() -> Arc<dyn ModelClient> {
        Arc::new(mock_model_unavailable())
    }

    fn answering(text: &'static str) -> Arc<dyn ModelClient> {
        Arc::new(mock_model_answering(text))
    }

    fn orchestrator_with(
        store: &Arc<KnowledgeStore>,
        generator_model: Arc<dyn ModelClient>,
        fix_model: Arc<dyn ModelClient>,
        config: OrchestratorConfig,
    ) -> Orchestrator {
        let executor = Arc::new(TestExecutor::new(
            Arc::clone(store),
            ExecutorConfig {
                timeout: Duration::from_secs(2),
            },
        ));
        let generator = Arc::new(TestGenerator::new(
            Arc::clone(store),
            generator_model,
            GeneratorConfig::default(),
        ));
        let fixer = Arc::new(FixEngine::new(
            Arc::clone(store),
            Arc::clone(&fix_model),
            Arc::clone(&executor),
            FixEngineConfig::default(),
        ));
        let learner = Arc::new(LearningEngine::new(
            Arc::clone(store),
            fix_model,
            LearnerConfig::default(),
        ));
        Orchestrator::new(
            Arc::clone(store),
            generator,
            executor,
            fixer,
            learner,
            config,
        )
    }

    const BROKEN_TEST: &str = r#"{
        "description": "doubles its input",
        "test_type": "function",
        "code": "def test_function(value):\n    return value + 1",
        "inputs": {"value": 10},
        "criteria": "output == value * 2"
    }"#;

    #[tokio::test]
    async fn test_turn_repairs_failing_tests_with_fallback() {
        let store = Arc::new(KnowledgeStore::new());
        let orchestrator = orchestrator_with(
            &store,
            answering(BROKEN_TEST),
            unavailable_model(),
            OrchestratorConfig {
                tests_per_turn: 2,
                ..OrchestratorConfig::default()
            },
        );

        let report = orchestrator.run_turn().await;
        assert_eq!(report.turn, 1);
        assert_eq!(report.executed, 2);
        assert_eq!(report.failed, 2);
        assert_eq!(report.repaired, 2);
        assert_eq!(report.fix_attempts, 2);
        assert!(!report.had_errors());

        let knowledge: FixKnowledge = store.get_as(FIX_KNOWLEDGE).await.unwrap().unwrap();
        assert_eq!(knowledge.fixes_attempted, 2);
        assert_eq!(knowledge.fixes_successful, 2);

        let stats: LearningStats = store.get_as(LEARNING_STATS).await.unwrap().unwrap();
        assert_eq!(stats.learning_sessions, 2);
    }

    const PASSING_TEST: &str = r#"{
        "description": "doubles its input",
        "test_type": "function",
        "code": "def test_function(value):\n    return value * 2",
        "inputs": {"value": 10},
        "criteria": "output == value * 2"
    }"#;

    #[tokio::test]
    async fn test_open_learner_breaker_still_counts_attempts() {
        let store = Arc::new(KnowledgeStore::new());
        let orchestrator = orchestrator_with(
            &store,
            answering(BROKEN_TEST),
            unavailable_model(),
            OrchestratorConfig {
                tests_per_turn: 1,
                ..OrchestratorConfig::default()
            },
        );
        {
            let mut breakers = orchestrator.breakers.lock().await;
            for _ in 0..CircuitBreakerConfig::default().failure_threshold {
                breakers.learner.record_failure(Instant::now());
            }
        }
        assert_eq!(
            orchestrator.circuit_state(LEARNER).await,
            Some(CircuitState::Open)
        );

        let report = orchestrator.run_turn().await;
        assert_eq!(report.repaired, 1);
        assert_eq!(report.skipped, 1);

        let stats: LearningStats = store.get_as(LEARNING_STATS).await.unwrap().unwrap();
        assert_eq!(stats.success_patterns["function_code_change"], 1);
        assert_eq!(stats.learning_sessions, 0);
        assert_eq!(stats.concepts_learned, 0);
    }

    #[tokio::test]
    async fn test_clean_turn_learns_from_passing_tests() {
        let store = Arc::new(KnowledgeStore::new());
        let orchestrator = orchestrator_with(
            &store,
            answering(PASSING_TEST),
            unavailable_model(),
            OrchestratorConfig {
                tests_per_turn: 3,
                ..OrchestratorConfig::default()
            },
        );

        let report = orchestrator.run_turn().await;
        assert_eq!(report.passed, 3);
        assert_eq!(report.fix_attempts, 0);
        assert_eq!(report.success_concepts, 1);

        let stats: LearningStats = store.get_as(LEARNING_STATS).await.unwrap().unwrap();
        assert_eq!(stats.learning_sessions, 1);
        assert_eq!(stats.success_concepts, 1);
        assert!(store.get("success_pattern_function_0").await.is_ok());
    }

    #[tokio::test]
    async fn test_generation_failure_retries_simpler_then_skips() {
        let store = Arc::new(KnowledgeStore::new());
        let orchestrator = orchestrator_with(
            &store,
            unavailable_model(),
            unavailable_model(),
            OrchestratorConfig {
                tests_per_turn: 1,
                ..OrchestratorConfig::default()
            },
        );

        // Beginner has no simpler tier, so one failure skips the slot.
        let report = orchestrator.run_turn().await;
        assert_eq!(report.generation_failures, 1);
        assert_eq!(report.executed, 0);
        assert!(report.had_errors());

        let errors: ErrorHistory = store.get_as(ERROR_HISTORY).await.unwrap().unwrap();
        assert_eq!(errors["test_generation_failure"].count, 1);
    }

    #[tokio::test]
    async fn test_generator_breaker_opens_and_is_mirrored() {
        let store = Arc::new(KnowledgeStore::new());
        let orchestrator = orchestrator_with(
            &store,
            unavailable_model(),
            unavailable_model(),
            OrchestratorConfig {
                tests_per_turn: 5,
                ..OrchestratorConfig::default()
            },
        );

        let report = orchestrator.run_turn().await;
        assert_eq!(report.generation_failures, 3);
        assert_eq!(report.skipped, 2);
        assert_eq!(
            orchestrator.circuit_state(TEST_GENERATOR).await,
            Some(CircuitState::Open)
        );

        let agents: AgentStatusMap = store.get_as(AGENT_STATUS).await.unwrap().unwrap();
        assert!(agents[TEST_GENERATOR].circuit_open);
    }

    #[tokio::test]
    async fn test_self_heal_resets_breakers_and_logs() {
        let store = Arc::new(KnowledgeStore::new());
        let (tx, mut rx) = crate::channel::status_channel();
        let orchestrator = orchestrator_with(
            &store,
            unavailable_model(),
            unavailable_model(),
            OrchestratorConfig {
                tests_per_turn: 3,
                ..OrchestratorConfig::default()
            },
        )
        .with_status_channel(tx);

        orchestrator.run_turn().await;
        assert_eq!(
            orchestrator.circuit_state(TEST_GENERATOR).await,
            Some(CircuitState::Open)
        );

        let action = orchestrator
            .self_heal("3 consecutive turns with errors")
            .await
            .unwrap();
        assert_eq!(action.action, "reset_circuit_breakers");
        assert_eq!(
            action.most_common_error.as_deref(),
            Some("test_generation_failure")
        );
        assert_eq!(
            orchestrator.circuit_state(TEST_GENERATOR).await,
            Some(CircuitState::Closed)
        );

        let log: SelfHealingLog = store.get_as(SELF_HEALING_ACTIONS).await.unwrap().unwrap();
        assert_eq!(log.len(), 1);
        let agents: AgentStatusMap = store.get_as(AGENT_STATUS).await.unwrap().unwrap();
        assert!(!agents[TEST_GENERATOR].circuit_open);
        assert!(matches!(
            rx.recv().await.unwrap(),
            ChannelMessage::Message { ref sender, .. } if sender == ORCHESTRATOR
        ));
    }

    #[tokio::test]
    async fn test_unrepairable_test_is_recorded_after_max_attempts() {
        // Criteria that no candidate output can satisfy.
        const IMPOSSIBLE: &str = r#"{
            "description": "never passes",
            "test_type": "function",
            "code": "def test_function(value):\n    return value",
            "inputs": {"value": 10},
            "criteria": "output == output + 1"
        }"#;
        let store = Arc::new(KnowledgeStore::new());
        let orchestrator = orchestrator_with(
            &store,
            answering(IMPOSSIBLE),
            unavailable_model(),
            OrchestratorConfig {
                tests_per_turn: 1,
                max_fix_attempts: 2,
                ..OrchestratorConfig::default()
            },
        );

        let report = orchestrator.run_turn().await;
        assert_eq!(report.fix_attempts, 2);
        assert_eq!(report.unfixable, 1);
        assert_eq!(report.repaired, 0);

        let errors: ErrorHistory = store.get_as(ERROR_HISTORY).await.unwrap().unwrap();
        assert_eq!(errors[FIX_FAILURE].count, 2);
        assert_eq!(errors[UNFIXABLE_TEST].count, 1);
        assert!(!errors.contains_key(SYSTEM_EXCEPTION));
    }

    #[tokio::test]
    async fn test_run_stops_on_shutdown() {
        let store = Arc::new(KnowledgeStore::new());
        let orchestrator = Arc::new(orchestrator_with(
            &store,
            answering(BROKEN_TEST),
            unavailable_model(),
            OrchestratorConfig {
                tests_per_turn: 1,
                cycle_delay: Duration::from_millis(10),
                ..OrchestratorConfig::default()
            },
        ));
        let (shutdown_tx, shutdown_rx) = broadcast::channel(1);
        let handle = tokio::spawn(Arc::clone(&orchestrator).run(shutdown_rx));

        tokio::time::sleep(Duration::from_millis(100)).await;
        shutdown_tx.send(()).unwrap();
        handle.await.unwrap();
        assert!(orchestrator.turns() >= 1);
    }
}
