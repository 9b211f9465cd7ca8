//! Test generation with adaptive difficulty.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use serde::Deserialize;
use tracing::{debug, info, warn};

use super::types::{Difficulty, Test, TestDraft, TestSpec, TestType};
use crate::error::{PipelineError, StoreError};
use crate::health::{AgentTracker, TEST_GENERATOR};
use crate::knowledge::{KnowledgeStore, TestGenerationHistory, TEST_GENERATION_HISTORY};
use crate::model::parse_response;
use crate::sandbox;
use crate::traits::ModelClient;

/// Candidate every fallback path produces. It satisfies the default spec.
pub const FALLBACK_CODE: &str = "def test_function(value):\n    return value * 2";

const TEST_TYPES: [TestType; 3] = [TestType::Function, TestType::System, TestType::Performance];

/// Generator settings.
#[derive(Debug, Clone, PartialEq)]
pub struct GeneratorConfig {
    /// Outcomes in the rolling success window.
    pub window_size: usize,
    /// Escalate when the window's success rate is above this.
    pub escalate_above: f64,
    /// Regress when the window's success rate is below this.
    pub regress_below: f64,
    /// Bound on each model query.
    pub model_timeout: Duration,
}

impl Default for GeneratorConfig {
    fn default() -> Self {
        Self {
            window_size: 5,
            escalate_above: 0.9,
            regress_below: 0.5,
            model_timeout: Duration::from_millis(crate::config::DEFAULT_MODEL_TIMEOUT_MS),
        }
    }
}

#[derive(Debug, Deserialize)]
struct GeneratedTest {
    #[serde(default)]
    description: String,
    #[serde(default, alias = "type")]
    test_type: Option<TestType>,
    code: String,
    #[serde(default)]
    inputs: BTreeMap<String, i64>,
    #[serde(default, alias = "success_criteria")]
    criteria: String,
}

/// Produces new tests and tracks the difficulty tier.
pub struct TestGenerator {
    store: Arc<KnowledgeStore>,
    model: Arc<dyn ModelClient>,
    config: GeneratorConfig,
    agent: AgentTracker,
}

impl TestGenerator {
    /// Create a generator.
    #[must_use]
    pub fn new(
        store: Arc<KnowledgeStore>,
        model: Arc<dyn ModelClient>,
        config: GeneratorConfig,
    ) -> Self {
        let agent = AgentTracker::new(Arc::clone(&store), TEST_GENERATOR, true);
        Self {
            store,
            model,
            config,
            agent,
        }
    }

    /// Status handle of this agent.
    #[must_use]
    pub const fn agent(&self) -> &AgentTracker {
        &self.agent
    }

    /// Current difficulty tier.
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError::Store`] if the history entry cannot be read.
    pub async fn current_difficulty(&self) -> Result<Difficulty, PipelineError> {
        let history: TestGenerationHistory =
            self.store.get_or_default(TEST_GENERATION_HISTORY).await?;
        Ok(history.current_complexity)
    }

    /// Generate and record one test at `difficulty`.
    ///
    /// The test type rotates with the generation counter. After repeated
    /// model failures the agent skips the model and emits the fallback test.
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError::GenerationFailed`] if the model fails or
    /// produces code or criteria that do not parse, and
    /// [`PipelineError::Store`] if the ledger cannot be written.
    pub async fn generate(&self, difficulty: Difficulty) -> Result<Test, PipelineError> {
        let now = Utc::now();
        self.agent.touch(now).await?;

        let history: TestGenerationHistory =
            self.store.get_or_default(TEST_GENERATION_HISTORY).await?;
        let slot = usize::try_from(history.total_generated % TEST_TYPES.len() as u64).unwrap_or(0);
        let test_type = TEST_TYPES[slot];

        let draft = if self.agent.model_allowed().await? {
            self.draft_from_model(difficulty, test_type).await?
        } else {
            debug!(%difficulty, %test_type, "Model disabled for generator, using fallback test");
            fallback_draft(difficulty, test_type)
        };

        let test = self.store.record_test(draft, Utc::now()).await?;
        self.store
            .update_as(TEST_GENERATION_HISTORY, |h: &mut TestGenerationHistory| {
                h.total_generated += 1;
                Ok(())
            })
            .await?;

        info!(
            test_id = test.id,
            difficulty = %test.difficulty,
            test_type = %test.test_type,
            "Test generated"
        );
        Ok(test)
    }

    async fn draft_from_model(
        &self,
        difficulty: Difficulty,
        test_type: TestType,
    ) -> Result<TestDraft, PipelineError> {
        let prompt = generation_prompt(difficulty, test_type);
        let response = match self.model.query(&prompt, self.config.model_timeout).await {
            Ok(response) => {
                self.agent.model_success(Utc::now()).await?;
                response
            }
            Err(e) => {
                self.agent.model_failure(Utc::now()).await?;
                let cause = PipelineError::from(e);
                warn!(error = %cause, "Model query failed during generation");
                return Err(PipelineError::GenerationFailed {
                    reason: cause.to_string(),
                });
            }
        };

        let generated: GeneratedTest = match parse_response(&response) {
            Ok(generated) => generated,
            Err(e) => {
                warn!(error = %e, "Unparseable generation response, using fallback test");
                return Ok(fallback_draft(difficulty, test_type));
            }
        };

        sandbox::parse_program(&generated.code).map_err(|e| PipelineError::GenerationFailed {
            reason: format!("generated code is invalid: {e}"),
        })?;

        let defaults = TestSpec::default();
        let criteria = if generated.criteria.trim().is_empty() {
            defaults.criteria
        } else {
            generated.criteria.trim().to_string()
        };
        sandbox::parse_expression(&criteria).map_err(|e| PipelineError::GenerationFailed {
            reason: format!("generated criteria are invalid: {e}"),
        })?;
        let inputs = if generated.inputs.is_empty() {
            defaults.inputs
        } else {
            generated.inputs
        };

        Ok(TestDraft {
            difficulty,
            test_type: generated
                .test_type
                .filter(|t| *t != TestType::Any)
                .unwrap_or(test_type),
            description: if generated.description.is_empty() {
                format!("{difficulty} {test_type} test")
            } else {
                generated.description
            },
            code: generated.code,
            spec: TestSpec { inputs, criteria },
            parent_id: None,
        })
    }

    /// Feed one execution outcome into the rolling window.
    ///
    /// Once the window is full, a success rate above the high-water mark
    /// escalates the tier and one below the low-water mark regresses it.
    /// Any change clears the window. Returns the new tier on change.
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError::Store`] if the history entry cannot be updated.
    #[allow(clippy::cast_precision_loss)]
    pub async fn record_outcome(&self, passed: bool) -> Result<Option<Difficulty>, PipelineError> {
        let window = self.config.window_size.max(1);
        let escalate_above = self.config.escalate_above;
        let regress_below = self.config.regress_below;

        let changed = self
            .store
            .update_as(TEST_GENERATION_HISTORY, move |h: &mut TestGenerationHistory| {
                h.recent_results.push(passed);
                if h.recent_results.len() > window {
                    let excess = h.recent_results.len() - window;
                    h.recent_results.drain(..excess);
                }
                let successes = h.recent_results.iter().filter(|p| **p).count();
                h.success_rate = successes as f64 / h.recent_results.len() as f64;

                if h.recent_results.len() < window {
                    return Ok::<_, StoreError>(None);
                }

                let current = h.current_complexity;
                let next = if h.success_rate > escalate_above {
                    Some(current.harder()).filter(|d| *d != current)
                } else if h.success_rate < regress_below {
                    current.simpler()
                } else {
                    None
                };

                if let Some(next) = next {
                    h.current_complexity = next;
                    h.recent_results.clear();
                    h.complexity_changes += 1;
                }
                Ok(next)
            })
            .await?;

        if let Some(difficulty) = changed {
            info!(%difficulty, "Difficulty tier changed");
        }
        Ok(changed)
    }
}

fn fallback_draft(difficulty: Difficulty, test_type: TestType) -> TestDraft {
    TestDraft {
        difficulty,
        test_type,
        description: format!("Fallback {test_type} test"),
        code: FALLBACK_CODE.to_string(),
        spec: TestSpec::default(),
        parent_id: None,
    }
}

fn generation_prompt(difficulty: Difficulty, test_type: TestType) -> String {
    let timing = if test_type == TestType::Performance {
        "An `iterations` input sets how many times the function runs, and the \
         criteria may also use `total_time`, `average_time` (seconds) and `iterations`.\n"
    } else {
        ""
    };
    format!(
        "Generate a {difficulty} level {test_type} test for a self-improving test system.\n\
         The candidate code is a single Python-style function using only integer \
         arithmetic, comparisons, if/elif/else, while loops and return.\n\
         Inputs are named integers passed as the function's parameters.\n\
         The criteria is one boolean expression over the inputs and `output`, \
         for example `output == value * 2`.\n\
         {timing}\
         Return ONLY a JSON object:\n\
         {{\"description\": \"...\", \"test_type\": \"{test_type}\", \
         \"code\": \"def test_function(value):\\n    return ...\", \
         \"inputs\": {{\"value\": 10}}, \"criteria\": \"output == value * 2\"}}"
    )
}
