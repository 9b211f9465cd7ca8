//! Choosing a remedy: known pattern, then model, then fallback.

use std::time::Duration;

use chrono::Utc;
use serde::Deserialize;
use tracing::{debug, warn};

use super::apply::{fallback_code, Remedy, Swap};
use super::matching::ErrorClass;
use crate::error::{ModelError, StoreError};
use crate::health::{AgentTracker, MODEL_FAILURE_FLOOR};
use crate::knowledge::{FixPattern, PatternRef};
use crate::model::parse_response;
use crate::pipeline::{FixType, Test, TestDraft, TestResult};
use crate::sandbox;
use crate::traits::ModelClient;

/// Where a proposal came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProposalSource {
    /// A stored fix pattern.
    KnownPattern,
    /// Model-backed synthesis.
    Model,
    /// The generic fallback.
    Fallback,
}

/// A remedy ready to apply.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Proposal {
    /// The change.
    pub remedy: Remedy,
    /// The successor it produces.
    pub draft: TestDraft,
    /// Explanation recorded on the attempt.
    pub analysis: String,
    /// Origin.
    pub source: ProposalSource,
    /// Pattern applied, when the source is a known pattern.
    pub pattern: Option<PatternRef>,
}

#[derive(Debug, Deserialize)]
struct ModelFix {
    #[serde(default)]
    analysis: String,
    #[serde(default)]
    fix_type: Option<String>,
    #[serde(default, alias = "code")]
    fixed_code: Option<String>,
    #[serde(default, alias = "success_criteria")]
    criteria: Option<String>,
    #[serde(default)]
    swaps: Vec<Swap>,
}

/// Inputs to synthesis for one failure.
pub(super) struct Synthesis<'a> {
    pub test: &'a Test,
    pub result: &'a TestResult,
    pub class: &'a ErrorClass,
    pub known: Option<&'a FixPattern>,
    pub model: &'a dyn ModelClient,
    pub agent: &'a AgentTracker,
    pub model_timeout: Duration,
}

impl Synthesis<'_> {
    /// Produce a proposal. Falls through known pattern, model, fallback.
    pub(super) async fn propose(&self) -> Result<Proposal, StoreError> {
        if let Some(proposal) = self.from_known_pattern() {
            return Ok(proposal);
        }

        let reason = if self.agent.model_allowed().await? {
            match self.from_model().await? {
                Ok(proposal) => return Ok(proposal),
                Err(reason) => reason,
            }
        } else {
            format!("model disabled after {MODEL_FAILURE_FLOOR} consecutive failures")
        };

        Ok(self.fallback(&reason))
    }

    fn from_known_pattern(&self) -> Option<Proposal> {
        let pattern = self.known?;
        let remedy = Remedy::from_template(pattern.fix_type, &pattern.template)?;
        let Some(draft) = remedy.apply(self.test) else {
            debug!(pattern = %pattern.reference(), "Known pattern does not change this test");
            return None;
        };
        Some(Proposal {
            analysis: format!(
                "Applied known {} pattern for '{}' ({} prior successes)",
                pattern.fix_type, pattern.prefix, pattern.success_count
            ),
            remedy,
            draft,
            source: ProposalSource::KnownPattern,
            pattern: Some(pattern.reference()),
        })
    }

    /// Outer error is bookkeeping; inner error is the fallback reason.
    async fn from_model(&self) -> Result<Result<Proposal, String>, StoreError> {
        let prompt = fix_prompt(self.test, self.result, self.class);
        let response = match self.model.query(&prompt, self.model_timeout).await {
            Ok(response) => {
                self.agent.model_success(Utc::now()).await?;
                response
            }
            Err(e) => {
                self.agent.model_failure(Utc::now()).await?;
                warn!(error = %e, test_id = self.test.id, "Model query failed during fix synthesis");
                return Ok(Err(match e {
                    ModelError::Timeout { timeout_ms } => {
                        format!("model query timed out after {timeout_ms}ms")
                    }
                    ModelError::Unavailable { message } => format!("model unavailable: {message}"),
                }));
            }
        };

        let fix: ModelFix = match parse_response(&response) {
            Ok(fix) => fix,
            Err(e) => return Ok(Err(format!("model response unusable: {e}"))),
        };
        Ok(self.proposal_from_model(fix))
    }

    fn proposal_from_model(&self, fix: ModelFix) -> Result<Proposal, String> {
        let fix_type = fix
            .fix_type
            .as_deref()
            .and_then(FixType::parse)
            .or_else(|| {
                if fix.fixed_code.is_some() {
                    Some(FixType::CodeChange)
                } else if fix.criteria.is_some() {
                    Some(FixType::TestChange)
                } else if fix.swaps.is_empty() {
                    None
                } else {
                    Some(FixType::ConfigChange)
                }
            })
            .ok_or_else(|| "model proposed no change".to_string())?;

        let remedy = match fix_type {
            FixType::CodeChange => {
                let code = fix.fixed_code.ok_or("model proposed a code change without code")?;
                sandbox::parse_program(&code)
                    .map_err(|e| format!("model proposed invalid code: {e}"))?;
                Remedy::CodeChange { code }
            }
            FixType::TestChange => {
                let criteria = fix
                    .criteria
                    .ok_or("model proposed a test change without criteria")?;
                sandbox::parse_expression(&criteria)
                    .map_err(|e| format!("model proposed invalid criteria: {e}"))?;
                Remedy::TestChange { criteria }
            }
            FixType::ConfigChange if fix.swaps.is_empty() => Remedy::default_swaps(),
            FixType::ConfigChange => Remedy::ConfigChange { swaps: fix.swaps },
        };

        let draft = remedy
            .apply(self.test)
            .ok_or_else(|| format!("model {fix_type} leaves the test unchanged"))?;
        Ok(Proposal {
            analysis: if fix.analysis.is_empty() {
                format!("Model proposed a {fix_type}")
            } else {
                fix.analysis
            },
            remedy,
            draft,
            source: ProposalSource::Model,
            pattern: None,
        })
    }

    fn fallback(&self, reason: &str) -> Proposal {
        let remedy = Remedy::CodeChange {
            code: fallback_code(&self.test.spec),
        };
        let draft = remedy.apply(self.test).unwrap_or_else(|| {
            // Already the fallback; re-issue it unchanged so the lineage still advances.
            self.test
                .successor(self.test.code.clone(), self.test.spec.clone())
        });
        Proposal {
            remedy,
            draft,
            analysis: format!("Fallback fix: {reason}"),
            source: ProposalSource::Fallback,
            pattern: None,
        }
    }
}

fn fix_prompt(test: &Test, result: &TestResult, class: &ErrorClass) -> String {
    let inputs = serde_json::to_string(&test.spec.inputs).unwrap_or_default();
    format!(
        "A {test_type} test (id {id}) failed.\n\
         Code:\n{code}\n\
         Inputs: {inputs}\n\
         Criteria: {criteria}\n\
         Failure ({category}): {reason}\n\
         Propose one fix. Return ONLY a JSON object:\n\
         {{\"analysis\": \"...\", \"fix_type\": \"code_change|config_change|test_change\", \
         \"fixed_code\": \"...\", \"criteria\": \"...\", \
         \"swaps\": [{{\"from\": \"...\", \"to\": \"...\"}}]}}\n\
         Use fixed_code for code_change, criteria for test_change, swaps for config_change.",
        test_type = test.test_type,
        id = test.id,
        code = test.code,
        criteria = test.spec.criteria,
        category = class.category,
        reason = result.failure_reason.as_deref().unwrap_or(&class.prefix),
    )
}
