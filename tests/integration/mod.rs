//! Integration tests for the repair loop.
//!
//! These tests verify end-to-end behaviour including:
//! - Full generate, execute, fix and learn turns
//! - Fix pattern selection and crediting
//! - Health monitor properties over repeated passes
//! - Snapshot persistence and runtime shutdown

#![allow(clippy::unwrap_used, clippy::expect_used)]

mod health_properties;
mod persistence;
mod repair_loop;

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use test_mender::error::ModelError;
use test_mender::fix::{FixEngine, FixEngineConfig};
use test_mender::knowledge::KnowledgeStore;
use test_mender::learning::{LearnerConfig, LearningEngine};
use test_mender::orchestrator::{Orchestrator, OrchestratorConfig};
use test_mender::pipeline::{
    Difficulty, ExecutorConfig, GeneratorConfig, Test, TestDraft, TestExecutor, TestGenerator,
    TestSpec, TestType,
};
use test_mender::traits::{ModelClient, ResourceGauge, TimeProvider};

// ============================================================================
// Stubs
// ============================================================================

/// Model stub with one fixed behaviour.
pub enum StubModel {
    /// Answer every prompt with this text.
    Answer(String),
    /// Time out every query.
    Timeout,
    /// Refuse every query.
    Unavailable,
}

/// Counts queries made through it.
pub struct CountingModel {
    inner: StubModel,
    calls: AtomicUsize,
}

impl CountingModel {
    pub fn new(inner: StubModel) -> Self {
        Self {
            inner,
            calls: AtomicUsize::new(0),
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ModelClient for CountingModel {
    async fn query(&self, _prompt: &str, timeout: Duration) -> Result<String, ModelError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        match &self.inner {
            StubModel::Answer(text) => Ok(text.clone()),
            StubModel::Timeout => Err(ModelError::Timeout {
                timeout_ms: u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX),
            }),
            StubModel::Unavailable => Err(ModelError::Unavailable {
                message: "connection refused".into(),
            }),
        }
    }
}

/// Disk gauge stuck at one reading.
pub struct StaticGauge(pub f64);

impl ResourceGauge for StaticGauge {
    fn disk_usage_percent(&self) -> Result<f64, String> {
        Ok(self.0)
    }
}

/// Clock stuck at one instant.
pub struct FixedClock(pub DateTime<Utc>);

impl TimeProvider for FixedClock {
    fn now(&self) -> DateTime<Utc> {
        self.0
    }
}

pub fn model(stub: StubModel) -> Arc<CountingModel> {
    Arc::new(CountingModel::new(stub))
}

// ============================================================================
// Wiring
// ============================================================================

/// Every pipeline component over one store.
pub struct Pipeline {
    pub store: Arc<KnowledgeStore>,
    pub generator: Arc<TestGenerator>,
    pub executor: Arc<TestExecutor>,
    pub fixer: Arc<FixEngine>,
    pub learner: Arc<LearningEngine>,
}

impl Pipeline {
    pub fn new(generator_model: Arc<dyn ModelClient>, fix_model: Arc<dyn ModelClient>) -> Self {
        let store = Arc::new(KnowledgeStore::new());
        let executor = Arc::new(TestExecutor::new(
            Arc::clone(&store),
            ExecutorConfig {
                timeout: Duration::from_secs(2),
            },
        ));
        let generator = Arc::new(TestGenerator::new(
            Arc::clone(&store),
            generator_model,
            GeneratorConfig::default(),
        ));
        let fixer = Arc::new(FixEngine::new(
            Arc::clone(&store),
            Arc::clone(&fix_model),
            Arc::clone(&executor),
            FixEngineConfig::default(),
        ));
        let learner = Arc::new(LearningEngine::new(
            Arc::clone(&store),
            fix_model,
            LearnerConfig::default(),
        ));
        Self {
            store,
            generator,
            executor,
            fixer,
            learner,
        }
    }

    pub fn orchestrator(&self, config: OrchestratorConfig) -> Orchestrator {
        Orchestrator::new(
            Arc::clone(&self.store),
            Arc::clone(&self.generator),
            Arc::clone(&self.executor),
            Arc::clone(&self.fixer),
            Arc::clone(&self.learner),
            config,
        )
    }

    /// Record a beginner function test of `code` against the doubling spec.
    pub async fn record(&self, code: &str) -> Test {
        self.store
            .record_test(
                TestDraft {
                    difficulty: Difficulty::Beginner,
                    test_type: TestType::Function,
                    description: "doubles its input".into(),
                    code: code.into(),
                    spec: TestSpec::default(),
                    parent_id: None,
                },
                Utc::now(),
            )
            .await
            .unwrap()
    }
}

/// Generator answer producing an off-by-one doubling candidate.
pub const OFF_BY_ONE_TEST: &str = r#"{
    "description": "doubles its input",
    "test_type": "function",
    "code": "def test_function(value):\n    return value + 1",
    "inputs": {"value": 10},
    "criteria": "output == value * 2"
}"#;
