//! Learning from fix attempts.
//!
//! The fix engine counts each attempt in a histogram bucket of
//! [`LearningStats`] when it commits. Learning adds the insight work: a
//! successful attempt yields a [`Concept`] entry and merges its insights
//! into the credited fix pattern. Passing tests are mined separately for
//! shared code, which becomes a [`SuccessConcept`].

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tracing::{debug, info, warn};

use crate::error::{PipelineError, StoreError};
use crate::health::{AgentTracker, LEARNER};
use crate::knowledge::{
    concept_key, success_concept_key, Concept, FixExample, FixKnowledge, InsightSet,
    KnowledgeStore, LearningStats, SuccessConcept, TestLedger, FIX_KNOWLEDGE, LEARNING_STATS,
    MAX_INSIGHTS, TEST_HISTORY,
};
use crate::model::parse_response;
use crate::pipeline::{Difficulty, FixAttempt, Test, TestType};
use crate::traits::ModelClient;

/// Passing tests of one type needed before a success concept is derived.
pub const MIN_SUCCESS_EXAMPLES: usize = 3;

/// Shortest code line counted as shared between passing tests.
const MIN_SHARED_LINE: usize = 10;

/// Learning engine settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LearnerConfig {
    /// Bound on each model query.
    pub model_timeout: Duration,
}

impl Default for LearnerConfig {
    fn default() -> Self {
        Self {
            model_timeout: Duration::from_millis(crate::config::DEFAULT_MODEL_TIMEOUT_MS),
        }
    }
}

/// What one call to [`LearningEngine::learn`] produced.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LearningOutcome {
    /// Histogram bucket the attempt was counted in.
    pub bucket: String,
    /// Key of the concept written, for successful attempts.
    pub concept: Option<String>,
    /// Insights derived, empty for failed attempts.
    pub insights: InsightSet,
    /// Whether the insights came from the model.
    pub from_model: bool,
}

/// Turns fix attempts into statistics and insights.
pub struct LearningEngine {
    store: Arc<KnowledgeStore>,
    model: Arc<dyn ModelClient>,
    config: LearnerConfig,
    agent: AgentTracker,
}

impl LearningEngine {
    /// Create a learning engine.
    #[must_use]
    pub fn new(
        store: Arc<KnowledgeStore>,
        model: Arc<dyn ModelClient>,
        config: LearnerConfig,
    ) -> Self {
        let agent = AgentTracker::new(Arc::clone(&store), LEARNER, false);
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

    /// Learn from one fix attempt.
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError::Store`] if an entry cannot be updated.
    pub async fn learn(&self, attempt: &FixAttempt) -> Result<LearningOutcome, PipelineError> {
        let now = Utc::now();
        self.agent.touch(now).await?;
        let bucket = attempt.bucket();

        let (insights, from_model) = if attempt.success {
            self.derive_insights(attempt).await?
        } else {
            (InsightSet::default(), false)
        };

        let success = attempt.success;
        let principles = insights.principles.len() as u64;
        let concept_index = self
            .store
            .update_as(LEARNING_STATS, move |stats: &mut LearningStats| {
                stats.learning_sessions += 1;
                stats.last_updated = Some(now);
                if !success {
                    return Ok::<_, StoreError>(None);
                }
                let index = stats.concepts_learned;
                stats.concepts_learned += 1;
                stats.rules_discovered += principles;
                Ok(Some(index))
            })
            .await?;

        let concept = match concept_index {
            Some(index) => Some(self.write_concept(attempt, &insights, index).await?),
            None => None,
        };

        if let Some(reference) = attempt.pattern.clone().filter(|_| success) {
            let merged = insights.clone();
            let added = self
                .store
                .update_as(FIX_KNOWLEDGE, move |knowledge: &mut FixKnowledge| {
                    Ok(knowledge
                        .pattern_mut(&reference)
                        .map_or(0, |pattern| pattern.insights.merge(&merged)))
                })
                .await?;
            debug!(added, "Insights merged into fix pattern");
        }

        info!(
            test_id = attempt.test_id,
            bucket = %bucket,
            success,
            concept = concept.as_deref().unwrap_or("-"),
            "Learned from fix attempt"
        );
        Ok(LearningOutcome {
            bucket,
            concept,
            insights,
            from_model,
        })
    }

    async fn write_concept(
        &self,
        attempt: &FixAttempt,
        insights: &InsightSet,
        index: u64,
    ) -> Result<String, StoreError> {
        let key = concept_key(attempt.fix_type, index);
        let concept = Concept {
            kind: "fix_pattern".to_string(),
            pattern: attempt.pattern.clone(),
            fix_type: attempt.fix_type,
            insights: insights.clone(),
            examples: vec![FixExample {
                test_id: attempt.test_id,
                new_test_id: attempt.new_test_id.unwrap_or(attempt.test_id),
                failure: attempt
                    .pattern
                    .as_ref()
                    .map_or_else(|| attempt.analysis.clone(), |p| p.prefix.clone()),
                applied_at: attempt.applied_at,
            }],
            created_at: Utc::now(),
        };
        self.store.put_as(&key, &concept).await?;
        Ok(key)
    }

    async fn derive_insights(&self, attempt: &FixAttempt) -> Result<(InsightSet, bool), StoreError> {
        let prompt = self.insight_prompt(attempt).await?;
        Ok(match self.model_insights(&prompt).await? {
            Some(set) => (set, true),
            None => (heuristic_insights(attempt), false),
        })
    }

    async fn model_insights(&self, prompt: &str) -> Result<Option<InsightSet>, StoreError> {
        if !self.agent.model_allowed().await? {
            return Ok(None);
        }
        match self.model.query(prompt, self.config.model_timeout).await {
            Ok(response) => {
                self.agent.model_success(Utc::now()).await?;
                match parse_response::<InsightSet>(&response) {
                    Ok(set) if !set.is_empty() => return Ok(Some(capped(set))),
                    Ok(_) => debug!("Model returned no insights, using heuristics"),
                    Err(e) => warn!(error = %e, "Unparseable insight response, using heuristics"),
                }
            }
            Err(e) => {
                self.agent.model_failure(Utc::now()).await?;
                warn!(error = %e, "Model query failed during learning, using heuristics");
            }
        }
        Ok(None)
    }

    /// Learn from tests that passed on their first run.
    ///
    /// Tests are grouped by type. A type with at least
    /// [`MIN_SUCCESS_EXAMPLES`] passing tests whose code shares lines yields
    /// a [`SuccessConcept`]. Returns the keys of the concepts written.
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError::Store`] if an entry cannot be updated.
    pub async fn learn_from_success(&self, passed: &[Test]) -> Result<Vec<String>, PipelineError> {
        if passed.is_empty() {
            debug!("No passing tests to learn from");
            return Ok(Vec::new());
        }
        let now = Utc::now();
        self.agent.touch(now).await?;

        let mut by_type: BTreeMap<TestType, Vec<&Test>> = BTreeMap::new();
        for test in passed {
            by_type.entry(test.test_type).or_default().push(test);
        }

        let mut concepts = Vec::new();
        for (test_type, tests) in by_type {
            if tests.len() < MIN_SUCCESS_EXAMPLES {
                continue;
            }
            let patterns = shared_code(&tests);
            if patterns.is_empty() {
                continue;
            }
            let prompt = success_prompt(test_type, &patterns, &tests);
            let insights = match self.model_insights(&prompt).await? {
                Some(set) => set,
                None => success_heuristics(test_type, &patterns),
            };

            let principles = insights.principles.len() as u64;
            let index = self
                .store
                .update_as(LEARNING_STATS, move |stats: &mut LearningStats| {
                    let index = stats.success_concepts;
                    stats.success_concepts += 1;
                    stats.concepts_learned += 1;
                    stats.rules_discovered += principles;
                    Ok::<_, StoreError>(index)
                })
                .await?;
            let key = success_concept_key(test_type, index);
            let concept = SuccessConcept {
                kind: "success_pattern".to_string(),
                test_type,
                patterns,
                insights,
                examples: tests.iter().take(MIN_SUCCESS_EXAMPLES).map(|t| t.id).collect(),
                created_at: now,
            };
            self.store.put_as(&key, &concept).await?;
            concepts.push(key);
        }

        self.store
            .update_as(LEARNING_STATS, move |stats: &mut LearningStats| {
                stats.learning_sessions += 1;
                stats.last_updated = Some(now);
                Ok(())
            })
            .await?;
        info!(
            passed = passed.len(),
            concepts = concepts.len(),
            "Learned from passing tests"
        );
        Ok(concepts)
    }

    async fn insight_prompt(&self, attempt: &FixAttempt) -> Result<String, StoreError> {
        let ledger: TestLedger = self.store.get_or_default(TEST_HISTORY).await?;
        let code_of = |id: Option<u64>| {
            id.and_then(|id| ledger.get(id))
                .map_or("(not retained)", |t| t.code.as_str())
                .to_string()
        };
        Ok(format!(
            "Extract learning insights from a successful fix.\n\
             Test type: {test_type}\nFix type: {fix_type}\n\
             Original code:\n{before}\nFixed code:\n{after}\n\
             Analysis: {analysis}\n\
             Return ONLY a JSON object:\n\
             {{\"principles\": [\"...\"], \"patterns\": [\"...\"], \"applications\": [\"...\"]}}",
            test_type = attempt.test_type,
            fix_type = attempt.fix_type,
            before = code_of(Some(attempt.test_id)),
            after = code_of(attempt.new_test_id),
            analysis = attempt.analysis,
        ))
    }
}

/// Lines shared by every test of a difficulty that has at least two tests.
fn shared_code(tests: &[&Test]) -> Vec<String> {
    let mut by_difficulty: BTreeMap<Difficulty, Vec<&str>> = BTreeMap::new();
    for test in tests {
        by_difficulty
            .entry(test.difficulty)
            .or_default()
            .push(test.code.as_str());
    }

    let mut shared = Vec::new();
    for (difficulty, codes) in by_difficulty {
        let Some((first, rest)) = codes.split_first() else {
            continue;
        };
        if rest.is_empty() {
            continue;
        }
        let common: BTreeSet<&str> = first
            .lines()
            .map(str::trim)
            .filter(|line| line.len() >= MIN_SHARED_LINE)
            .filter(|line| rest.iter().all(|code| code.lines().any(|l| l.trim() == *line)))
            .collect();
        shared.extend(
            common
                .into_iter()
                .take(MAX_INSIGHTS)
                .map(|line| format!("common_code_{difficulty}: {line}")),
        );
    }
    shared
}

fn success_prompt(test_type: TestType, patterns: &[String], tests: &[&Test]) -> String {
    let samples = tests
        .iter()
        .take(MIN_SUCCESS_EXAMPLES)
        .enumerate()
        .map(|(i, t)| format!("Test {}:\n{}\nDescription: {}", i + 1, t.code, t.description))
        .collect::<Vec<_>>()
        .join("\n\n");
    format!(
        "Extract learning insights from successful {test_type} tests.\n\
         Patterns discovered:\n{patterns}\n\
         Sample successful tests:\n{samples}\n\
         Return ONLY a JSON object:\n\
         {{\"principles\": [\"...\"], \"patterns\": [\"...\"], \"applications\": [\"...\"]}}",
        patterns = patterns.join("\n"),
    )
}

/// Deterministic insights for passing tests when the model cannot supply any.
fn success_heuristics(test_type: TestType, patterns: &[String]) -> InsightSet {
    InsightSet {
        principles: vec![format!(
            "Passing {test_type} tests share {} recurring code lines",
            patterns.len()
        )],
        patterns: patterns.iter().take(MAX_INSIGHTS).cloned().collect(),
        applications: vec![format!("Reuse these shapes when generating {test_type} tests")],
    }
}

fn capped(mut set: InsightSet) -> InsightSet {
    set.principles.truncate(MAX_INSIGHTS);
    set.patterns.truncate(MAX_INSIGHTS);
    set.applications.truncate(MAX_INSIGHTS);
    set
}

/// Deterministic insights used when the model cannot supply any.
#[must_use]
pub fn heuristic_insights(attempt: &FixAttempt) -> InsightSet {
    let signature = attempt
        .pattern
        .as_ref()
        .map_or("an unclassified failure", |p| p.prefix.as_str());
    let category = signature
        .split_once(':')
        .map_or(signature, |(head, _)| head);
    InsightSet {
        principles: vec![format!(
            "A {} resolves {category} in {} tests",
            attempt.fix_type, attempt.test_type
        )],
        patterns: vec![format!("Failures starting with '{signature}'")],
        applications: vec![format!(
            "Try a {} first when a {} test fails with {category}",
            attempt.fix_type, attempt.test_type
        )],
    }
}
