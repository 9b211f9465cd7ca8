//! Fix engine.
//!
//! One call to [`FixEngine::fix`] walks a failing test through
//!
//! ```text
//! Pending ──▶ PatternMatch ──▶ Applying ──▶ Succeeded
//!                                       └─▶ Failed
//! ```
//!
//! `PatternMatch` classifies the failure and selects a stored pattern with
//! [`select_pattern`]. Synthesis then tries that pattern, the model, and the
//! fallback template in that order. `Applying` stages the successor test and
//! re-runs it through the [`TestExecutor`]. Either terminal state commits a
//! [`FixAttempt`] in a single store transaction that also issues the
//! successor's id; patterns are created or credited on success and charged on
//! failure, never removed.

mod apply;
mod matching;
mod synthesis;

pub use apply::{fallback_code, Remedy, Swap, DEFAULT_SWAPS};
pub use matching::{classify, pattern_key, select_pattern, ErrorClass, PATTERN_KEY_WORDS};
pub use synthesis::{Proposal, ProposalSource};

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tracing::{debug, info};

use crate::error::{PipelineError, StoreError};
use crate::health::{AgentTracker, FIXER};
use crate::knowledge::{
    BoundedRing, FixExample, FixKnowledge, FixPattern, FixedTestsStats, Insights,
    KnowledgeStore, LearningStats, PatternRef, RecoveryStrategies, RecoveryStrategy, TestLedger,
    FIXED_TESTS_STATS, FIX_KNOWLEDGE, LEARNING_STATS, RECOVERY_STRATEGIES, TEST_HISTORY,
};
use crate::pipeline::{FixAttempt, Test, TestExecutor, TestResult};
use crate::traits::ModelClient;
use synthesis::Synthesis;

/// Fix engine settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FixEngineConfig {
    /// Bound on each model query.
    pub model_timeout: Duration,
    /// Consecutive failures after which a pattern ranks behind healthy ones.
    pub demote_after_failures: u32,
}

impl Default for FixEngineConfig {
    fn default() -> Self {
        Self {
            model_timeout: Duration::from_millis(crate::config::DEFAULT_MODEL_TIMEOUT_MS),
            demote_after_failures: 2,
        }
    }
}

/// State of one fix.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FixState {
    /// Accepted, not yet classified.
    Pending,
    /// Looking up a stored pattern.
    PatternMatch,
    /// Successor staged and re-running.
    Applying,
    /// Successor passed.
    Succeeded,
    /// Successor failed.
    Failed,
}

impl FixState {
    /// Whether the fix is finished.
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Succeeded | Self::Failed)
    }
}

/// Everything one fix produced.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FixOutcome {
    /// The committed attempt.
    pub attempt: FixAttempt,
    /// Successor test.
    pub new_test: Test,
    /// Re-verification result of the successor.
    pub result: TestResult,
    /// Where the remedy came from.
    pub source: ProposalSource,
    /// States visited, ending in a terminal one.
    pub states: Vec<FixState>,
}

impl FixOutcome {
    /// Terminal state.
    #[must_use]
    pub fn state(&self) -> FixState {
        self.states.last().copied().unwrap_or(FixState::Pending)
    }
}

/// Selects, applies, and verifies fixes for failing tests.
pub struct FixEngine {
    store: Arc<KnowledgeStore>,
    model: Arc<dyn ModelClient>,
    executor: Arc<TestExecutor>,
    config: FixEngineConfig,
    agent: AgentTracker,
}

impl FixEngine {
    /// Create a fix engine.
    #[must_use]
    pub fn new(
        store: Arc<KnowledgeStore>,
        model: Arc<dyn ModelClient>,
        executor: Arc<TestExecutor>,
        config: FixEngineConfig,
    ) -> Self {
        let agent = AgentTracker::new(Arc::clone(&store), FIXER, false);
        Self {
            store,
            model,
            executor,
            config,
            agent,
        }
    }

    /// Status handle of this agent.
    #[must_use]
    pub const fn agent(&self) -> &AgentTracker {
        &self.agent
    }

    /// Fix a failing test and commit the attempt.
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError::UnknownTest`] if the ledger never issued the
    /// test, and [`PipelineError::Store`] if the test already has a successor
    /// or the store cannot be updated. Nothing is committed on error.
    pub async fn fix(&self, test: &Test, result: &TestResult) -> Result<FixOutcome, PipelineError> {
        let mut states = vec![FixState::Pending];
        self.agent.touch(Utc::now()).await?;

        let ledger: TestLedger = self.store.get_or_default(TEST_HISTORY).await?;
        if !ledger.issued(test.id) {
            return Err(PipelineError::UnknownTest { test_id: test.id });
        }
        let lineage: FixedTestsStats = self.store.get_or_default(FIXED_TESTS_STATS).await?;
        if let Some(existing) = lineage.successor(test.id) {
            return Err(StoreError::LineageViolation {
                test_id: test.id,
                existing,
            }
            .into());
        }

        states.push(FixState::PatternMatch);
        let class = classify(result, test.test_type);
        let knowledge: FixKnowledge = self.store.get_or_default(FIX_KNOWLEDGE).await?;
        let known = select_pattern(&knowledge, &class, self.config.demote_after_failures);
        match known {
            Some(pattern) => debug!(test_id = test.id, pattern = %pattern.reference(), "Pattern matched"),
            None => debug!(
                test_id = test.id,
                error = %PipelineError::NoPatternMatch { signature: class.prefix.clone() },
                "No stored pattern, synthesizing"
            ),
        }

        let proposal = Synthesis {
            test,
            result,
            class: &class,
            known,
            model: self.model.as_ref(),
            agent: &self.agent,
            model_timeout: self.config.model_timeout,
        }
        .propose()
        .await?;

        states.push(FixState::Applying);
        let applied_at = Utc::now();
        let staged: TestLedger = self.store.get_or_default(TEST_HISTORY).await?;
        let staged = staged.preview(proposal.draft.clone(), applied_at);
        let mut verification = self.executor.execute(&staged).await;
        let success = verification.passed;
        states.push(if success {
            FixState::Succeeded
        } else {
            FixState::Failed
        });

        let (attempt, new_test) = self
            .commit(test, result, &class, &proposal, success, applied_at)
            .await?;
        verification.test_id = new_test.id;

        info!(
            test_id = test.id,
            new_test_id = new_test.id,
            fix_type = %attempt.fix_type,
            source = ?proposal.source,
            success,
            "Fix attempt recorded"
        );
        Ok(FixOutcome {
            attempt,
            new_test,
            result: verification,
            source: proposal.source,
            states,
        })
    }

    /// Record the successor and everything learned from it in one step.
    ///
    /// The ledger, lineage, pattern knowledge, recovery strategies and the
    /// learning histogram change together or not at all.
    async fn commit(
        &self,
        test: &Test,
        result: &TestResult,
        class: &ErrorClass,
        proposal: &Proposal,
        success: bool,
        applied_at: DateTime<Utc>,
    ) -> Result<(FixAttempt, Test), PipelineError> {
        let failure = result
            .failure_reason
            .clone()
            .unwrap_or_else(|| class.prefix.clone());
        let fix_type = proposal.remedy.fix_type();
        let template = proposal.remedy.template();
        let credited = match (&proposal.pattern, success) {
            (Some(reference), _) => Some(reference.clone()),
            (None, true) => Some(PatternRef {
                prefix: class.pattern_key(),
                test_type: test.test_type,
                fix_type,
            }),
            (None, false) => None,
        };

        let keys = [
            TEST_HISTORY,
            FIXED_TESTS_STATS,
            FIX_KNOWLEDGE,
            RECOVERY_STRATEGIES,
            LEARNING_STATS,
        ];
        let committed = self
            .store
            .transact(&keys, |txn| {
                let new_test = txn.update_as(TEST_HISTORY, |ledger: &mut TestLedger| {
                    Ok(ledger.record(proposal.draft.clone(), applied_at))
                })?;
                let (old_id, new_id) = (test.id, new_test.id);
                txn.update_as(FIXED_TESTS_STATS, |stats: &mut FixedTestsStats| {
                    stats.append(old_id, new_id)?;
                    if success {
                        stats.count += 1;
                    }
                    Ok(())
                })?;

                let attempt = FixAttempt {
                    test_id: old_id,
                    new_test_id: Some(new_id),
                    test_type: test.test_type,
                    fix_type,
                    analysis: proposal.analysis.clone(),
                    success,
                    pattern: credited.clone(),
                    applied_at,
                };
                txn.update_as(FIX_KNOWLEDGE, |knowledge: &mut FixKnowledge| {
                    if let Some(reference) = &credited {
                        if knowledge.pattern(reference).is_none() {
                            knowledge.insert_pattern(FixPattern {
                                prefix: reference.prefix.clone(),
                                test_type: reference.test_type,
                                fix_type: reference.fix_type,
                                template: template.clone(),
                                insights: Insights::default(),
                                examples: BoundedRing::new(),
                                success_count: 0,
                                failure_count: 0,
                                consecutive_failures: 0,
                                last_success: None,
                                created_at: applied_at,
                            });
                        }
                        if let Some(pattern) = knowledge.pattern_mut(reference) {
                            if success {
                                pattern.record_success(FixExample {
                                    test_id: old_id,
                                    new_test_id: new_id,
                                    failure: failure.clone(),
                                    applied_at,
                                });
                            } else {
                                pattern.record_failure();
                            }
                        }
                    }
                    knowledge.record_attempt(attempt.clone());
                    Ok(())
                })?;

                if success {
                    txn.update_as(RECOVERY_STRATEGIES, |strategies: &mut RecoveryStrategies| {
                        strategies
                            .entry(failure.clone())
                            .and_modify(|s| {
                                s.success_count += 1;
                                s.last_success = applied_at;
                                s.fix_type = fix_type;
                                s.template.clone_from(&template);
                            })
                            .or_insert_with(|| RecoveryStrategy {
                                description: proposal.analysis.clone(),
                                action: "apply_fix".to_string(),
                                fix_type,
                                template: template.clone(),
                                success_count: 1,
                                last_success: applied_at,
                            });
                        Ok(())
                    })?;
                }

                txn.update_as(LEARNING_STATS, |stats: &mut LearningStats| {
                    stats.tally(attempt.bucket(), success, applied_at);
                    Ok(())
                })?;
                Ok((attempt, new_test))
            })
            .await?;
        Ok(committed)
    }
}
