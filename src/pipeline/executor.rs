//! Time-bounded test execution.
//!
//! Candidate code runs on the blocking pool inside the sandbox. Every exit
//! path yields a [`TestResult`]: faults become failing results with a
//! classified reason, and a deadline overrun becomes the
//! [`TIMEOUT_SIGNATURE`] category. Performance tests repeat the candidate
//! and are judged on its timing.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Utc;
use tracing::{debug, info, warn};

use super::signature::TIMEOUT_SIGNATURE;
use super::types::{Test, TestResult, TestType};
use crate::error::PipelineError;
use crate::health::{AgentTracker, TEST_EXECUTOR};
use crate::knowledge::{KnowledgeStore, TestExecutionStats, TEST_EXECUTION_STATS};
use crate::sandbox::{self, Outcome, Value};

/// Input naming how many times a performance test runs.
pub const ITERATIONS_INPUT: &str = "iterations";

/// Upper bound on performance-test iterations.
pub const MAX_ITERATIONS: u32 = 1_000;

/// Executor settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecutorConfig {
    /// Wall-clock bound on one execution.
    pub timeout: Duration,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_millis(crate::config::DEFAULT_EXECUTION_TIMEOUT_MS),
        }
    }
}

/// Runs tests against their specs.
pub struct TestExecutor {
    store: Arc<KnowledgeStore>,
    config: ExecutorConfig,
    agent: AgentTracker,
}

impl TestExecutor {
    /// Create an executor.
    #[must_use]
    pub fn new(store: Arc<KnowledgeStore>, config: ExecutorConfig) -> Self {
        let agent = AgentTracker::new(Arc::clone(&store), TEST_EXECUTOR, true);
        Self {
            store,
            config,
            agent,
        }
    }

    /// Status handle of this agent.
    #[must_use]
    pub const fn agent(&self) -> &AgentTracker {
        &self.agent
    }

    /// Run a test and judge its output.
    ///
    /// Performance tests run `iterations` times (an input, default 1) and
    /// are judged on `total_time`, `average_time` and `iterations` as well
    /// as `output`. Faults and timeouts are recorded in the error history.
    ///
    /// Never fails: bookkeeping errors are logged and the verdict is still
    /// returned.
    pub async fn execute(&self, test: &Test) -> TestResult {
        let started = Instant::now();
        let (outcome, timing) = self.run_bounded(test, started).await;
        let duration_ms = u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX);
        let at = Utc::now();

        let result = match outcome {
            Outcome::Returned(output) => judge(test, output, timing, duration_ms, at),
            Outcome::Fault(reason) => {
                self.record_fault(
                    test.id,
                    &PipelineError::ExecutionFault {
                        reason: reason.clone(),
                    },
                )
                .await;
                TestResult::fail(test.id, String::new(), reason, duration_ms, at)
            }
            Outcome::Timeout => {
                let timeout_ms =
                    u64::try_from(self.config.timeout.as_millis()).unwrap_or(u64::MAX);
                self.record_fault(test.id, &PipelineError::ExecutionTimeout { timeout_ms })
                    .await;
                TestResult::fail_with_signature(
                    test.id,
                    format!(
                        "Test timed out after {} seconds",
                        self.config.timeout.as_secs_f64()
                    ),
                    TIMEOUT_SIGNATURE,
                    duration_ms,
                    at,
                )
            }
        };

        if let Err(e) = self
            .store
            .update_as(TEST_EXECUTION_STATS, |stats: &mut TestExecutionStats| {
                stats.record(result.passed);
                Ok(())
            })
            .await
        {
            warn!(error = %e, test_id = test.id, "Failed to update execution stats");
        }
        if let Err(e) = self.agent.touch(at).await {
            warn!(error = %e, "Failed to record executor activity");
        }

        info!(
            test_id = test.id,
            passed = result.passed,
            duration_ms,
            "Test executed"
        );
        if let Some(reason) = &result.failure_reason {
            debug!(test_id = test.id, reason = %reason, "Test failure reason");
        }
        result
    }

    async fn record_fault(&self, test_id: u64, error: &PipelineError) {
        debug!(test_id, category = error.category(), error = %error, "Candidate did not return");
        if let Err(e) = self
            .store
            .record_error(error.category(), format!("Test {test_id}: {error}"), Utc::now())
            .await
        {
            warn!(error = %e, test_id, "Failed to record execution fault");
        }
    }

    async fn run_bounded(&self, test: &Test, started: Instant) -> (Outcome, Option<Timing>) {
        let deadline = started + self.config.timeout;
        let code = test.code.clone();
        let mut inputs = test.spec.inputs.clone();
        let iterations = match test.test_type {
            TestType::Performance => Some(iterations_of(&mut inputs)),
            _ => None,
        };
        let handle = tokio::task::spawn_blocking(move || {
            let began = Instant::now();
            let outcome = sandbox::run_repeated(&code, &inputs, iterations.unwrap_or(1), deadline);
            let timing = iterations.map(|iterations| Timing {
                iterations,
                total: began.elapsed(),
            });
            (outcome, timing)
        });

        match tokio::time::timeout(self.config.timeout, handle).await {
            Ok(Ok(finished)) => finished,
            Ok(Err(e)) => (
                Outcome::Fault(format!("SystemError: execution context failed: {e}")),
                None,
            ),
            Err(_) => (Outcome::Timeout, None),
        }
    }
}

/// Wall-clock measurement of a performance run.
#[derive(Debug, Clone, Copy, PartialEq)]
struct Timing {
    iterations: u32,
    total: Duration,
}

impl Timing {
    fn average_secs(self) -> f64 {
        self.total.as_secs_f64() / f64::from(self.iterations.max(1))
    }
}

/// Take the `iterations` input out of a performance test's inputs.
fn iterations_of(inputs: &mut BTreeMap<String, i64>) -> u32 {
    inputs
        .remove(ITERATIONS_INPUT)
        .and_then(|n| u32::try_from(n).ok())
        .unwrap_or(1)
        .clamp(1, MAX_ITERATIONS)
}

fn judge(
    test: &Test,
    output: Value,
    timing: Option<Timing>,
    duration_ms: u64,
    at: chrono::DateTime<Utc>,
) -> TestResult {
    let mut vars: BTreeMap<String, Value> = test
        .spec
        .inputs
        .iter()
        .map(|(name, value)| (name.clone(), Value::Int(*value)))
        .collect();
    vars.insert("output".to_string(), output);
    if let Some(timing) = timing {
        vars.insert("total_time".to_string(), Value::Float(timing.total.as_secs_f64()));
        vars.insert("average_time".to_string(), Value::Float(timing.average_secs()));
        vars.insert(
            ITERATIONS_INPUT.to_string(),
            Value::Int(i64::from(timing.iterations)),
        );
    }

    let rendered = output.to_string();
    match sandbox::evaluate_criteria(&test.spec.criteria, &vars) {
        Ok(true) => TestResult::pass(test.id, rendered, duration_ms, at),
        Ok(false) => {
            let reason = match timing {
                Some(timing) => format!(
                    "PerformanceError: `{}` not met (average_time {:.6}s over {} iterations)",
                    test.spec.criteria,
                    timing.average_secs(),
                    timing.iterations
                ),
                None => format!(
                    "AssertionError: output does not satisfy `{}` (got {rendered})",
                    test.spec.criteria
                ),
            };
            TestResult::fail(test.id, rendered, reason, duration_ms, at)
        }
        Err(fault) => TestResult::fail(
            test.id,
            rendered,
            format!("CriteriaError: {fault}"),
            duration_ms,
            at,
        ),
    }
}
