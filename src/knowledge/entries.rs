//! Typed views of the named knowledge store entries.
//!
//! Each constant names a top-level group of the persisted document. The
//! structs below are the shapes stored under those names.

use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::ring::BoundedRing;
use crate::error::StoreError;
use crate::health::{HealthIssue, HealthStatus};
use crate::pipeline::{Difficulty, FixAttempt, FixType, Test, TestDraft, TestType};

// ============================================================================
// Keys
// ============================================================================

/// Latest health pass summary.
pub const HEALTH_CHECKS: &str = "health_checks";
/// Cumulative monitor counters.
pub const MONITOR_STATS: &str = "monitor_stats";
/// Generator complexity and rolling success window.
pub const TEST_GENERATION_HISTORY: &str = "test_generation_history";
/// Execution counters.
pub const TEST_EXECUTION_STATS: &str = "test_execution_stats";
/// Fix counters and known patterns.
pub const FIX_KNOWLEDGE: &str = "fix_knowledge";
/// Learning counters and outcome histograms.
pub const LEARNING_STATS: &str = "learning_stats";
/// Successful fixes and the test lineage chain.
pub const FIXED_TESTS_STATS: &str = "fixed_tests_stats";
/// Error records keyed by category.
pub const ERROR_HISTORY: &str = "error_history";
/// Recovery strategies keyed by exact failure message.
pub const RECOVERY_STRATEGIES: &str = "recovery_strategies";
/// Per-agent activity.
pub const AGENT_STATUS: &str = "agent_status";
/// Recently recorded tests.
pub const TEST_HISTORY: &str = "test_history";
/// Self-healing actions taken by the orchestrator.
pub const SELF_HEALING_ACTIONS: &str = "self_healing_actions";

/// Prefix of learned concept entries.
pub const CONCEPT_PREFIX: &str = "fix_pattern_";
/// Prefix of concepts learned from passing tests.
pub const SUCCESS_CONCEPT_PREFIX: &str = "success_pattern_";

/// Retained occurrences per error record.
pub const MAX_OCCURRENCES: usize = 10;
/// Retained examples per fix pattern.
pub const MAX_EXAMPLES: usize = 5;
/// Retained strings per insight list.
pub const MAX_INSIGHTS: usize = 5;
/// Retained fix attempts in `fix_knowledge`.
pub const MAX_RECENT_ATTEMPTS: usize = 20;
/// Retained tests in the ledger.
pub const MAX_LEDGER_TESTS: usize = 200;
/// Retained self-healing actions.
pub const MAX_HEALING_ACTIONS: usize = 20;

/// Key of the `n`th learned concept for a fix type.
#[must_use]
pub fn concept_key(fix_type: FixType, n: u64) -> String {
    format!("{CONCEPT_PREFIX}{fix_type}_{n}")
}

/// Key of the `n`th concept learned from passing tests of a type.
#[must_use]
pub fn success_concept_key(test_type: TestType, n: u64) -> String {
    format!("{SUCCESS_CONCEPT_PREFIX}{test_type}_{n}")
}

// ============================================================================
// Error History
// ============================================================================

/// One recorded occurrence of an error category.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Occurrence {
    /// When it happened.
    pub timestamp: DateTime<Utc>,
    /// Detail payload.
    pub detail: String,
}

/// Accumulated history of one error category.
///
/// `count` is cumulative; `occurrences` keeps only the newest details.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorRecord {
    /// Total occurrences ever recorded.
    pub count: u64,
    /// First occurrence.
    pub first_seen: DateTime<Utc>,
    /// Latest occurrence.
    pub last_seen: DateTime<Utc>,
    /// Latest detail.
    pub details: String,
    /// Newest occurrences.
    pub occurrences: BoundedRing<Occurrence, MAX_OCCURRENCES>,
}

impl ErrorRecord {
    /// Start a record with its first occurrence.
    #[must_use]
    pub fn new(detail: impl Into<String>, at: DateTime<Utc>) -> Self {
        let mut record = Self {
            count: 0,
            first_seen: at,
            last_seen: at,
            details: String::new(),
            occurrences: BoundedRing::new(),
        };
        record.record(detail, at);
        record
    }

    /// Add an occurrence.
    pub fn record(&mut self, detail: impl Into<String>, at: DateTime<Utc>) {
        let detail = detail.into();
        self.count += 1;
        self.last_seen = at;
        self.details.clone_from(&detail);
        self.occurrences.push(Occurrence {
            timestamp: at,
            detail,
        });
    }

    /// Occurrences counted but no longer retained.
    #[must_use]
    pub fn truncated(&self) -> u64 {
        self.count.saturating_sub(self.occurrences.len() as u64)
    }
}

/// Error records keyed by category.
pub type ErrorHistory = BTreeMap<String, ErrorRecord>;

// ============================================================================
// Fix Knowledge
// ============================================================================

/// Identity of a fix pattern: normalized prefix plus what it applies to.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct PatternRef {
    /// Normalized error prefix the pattern is keyed by.
    pub prefix: String,
    /// Test type the pattern applies to.
    pub test_type: TestType,
    /// Kind of change the pattern applies.
    pub fix_type: FixType,
}

impl fmt::Display for PatternRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} [{}/{}]", self.prefix, self.test_type, self.fix_type)
    }
}

/// Plain insight lists as produced by learning.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct InsightSet {
    /// General rules.
    #[serde(default)]
    pub principles: Vec<String>,
    /// Recognizable shapes of the failure.
    #[serde(default)]
    pub patterns: Vec<String>,
    /// Where the rule applies.
    #[serde(default)]
    pub applications: Vec<String>,
}

impl InsightSet {
    /// Whether all lists are empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.principles.is_empty() && self.patterns.is_empty() && self.applications.is_empty()
    }
}

/// Bounded insight lists attached to a fix pattern.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Insights {
    /// General rules.
    pub principles: BoundedRing<String, MAX_INSIGHTS>,
    /// Recognizable shapes of the failure.
    pub patterns: BoundedRing<String, MAX_INSIGHTS>,
    /// Where the rule applies.
    pub applications: BoundedRing<String, MAX_INSIGHTS>,
}

impl Insights {
    /// Append new strings, skipping ones already held. Returns how many were added.
    pub fn merge(&mut self, set: &InsightSet) -> usize {
        fn extend(ring: &mut BoundedRing<String, MAX_INSIGHTS>, items: &[String]) -> usize {
            let mut added = 0;
            for item in items {
                if !ring.iter().any(|existing| existing == item) {
                    ring.push(item.clone());
                    added += 1;
                }
            }
            added
        }
        extend(&mut self.principles, &set.principles)
            + extend(&mut self.patterns, &set.patterns)
            + extend(&mut self.applications, &set.applications)
    }

    /// Total retained strings.
    #[must_use]
    pub fn len(&self) -> usize {
        self.principles.len() + self.patterns.len() + self.applications.len()
    }

    /// Whether no strings are retained.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// A past successful application of a pattern.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FixExample {
    /// Test that failed.
    pub test_id: u64,
    /// Test that passed after the fix.
    pub new_test_id: u64,
    /// Exact failure message.
    pub failure: String,
    /// When the fix was applied.
    pub applied_at: DateTime<Utc>,
}

/// A reusable error-signature to remediation record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FixPattern {
    /// Normalized error prefix.
    pub prefix: String,
    /// Test type the pattern applies to.
    pub test_type: TestType,
    /// Kind of change.
    pub fix_type: FixType,
    /// Remedy body: code, criteria, or swap lines depending on `fix_type`.
    pub template: String,
    /// Derived insights.
    #[serde(default)]
    pub insights: Insights,
    /// Newest successful applications.
    #[serde(default)]
    pub examples: BoundedRing<FixExample, MAX_EXAMPLES>,
    /// Successful applications ever.
    pub success_count: u64,
    /// Failed applications ever.
    #[serde(default)]
    pub failure_count: u64,
    /// Failures since the last success.
    #[serde(default)]
    pub consecutive_failures: u32,
    /// Latest success.
    pub last_success: Option<DateTime<Utc>>,
    /// When the pattern was learned.
    pub created_at: DateTime<Utc>,
}

impl FixPattern {
    /// Identity of this pattern.
    #[must_use]
    pub fn reference(&self) -> PatternRef {
        PatternRef {
            prefix: self.prefix.clone(),
            test_type: self.test_type,
            fix_type: self.fix_type,
        }
    }

    /// Whether this pattern matches the given identity.
    #[must_use]
    pub fn is(&self, reference: &PatternRef) -> bool {
        self.prefix == reference.prefix
            && self.test_type == reference.test_type
            && self.fix_type == reference.fix_type
    }

    /// Credit a successful application.
    pub fn record_success(&mut self, example: FixExample) {
        self.success_count += 1;
        self.consecutive_failures = 0;
        self.last_success = Some(example.applied_at);
        self.examples.push(example);
    }

    /// Charge a failed application.
    pub fn record_failure(&mut self) {
        self.failure_count += 1;
        self.consecutive_failures = self.consecutive_failures.saturating_add(1);
    }
}

/// Fix counters and the pattern table.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FixKnowledge {
    /// Fix attempts ever.
    pub fixes_attempted: u64,
    /// Successful fix attempts ever.
    pub fixes_successful: u64,
    /// `fixes_successful / fixes_attempted`.
    pub success_rate: f64,
    /// Tests that ended up passing after a fix.
    pub tests_fixed_successfully: u64,
    /// Patterns keyed by normalized error prefix.
    pub known_patterns: BTreeMap<String, Vec<FixPattern>>,
    /// Newest fix attempts.
    #[serde(default)]
    pub recent_attempts: BoundedRing<FixAttempt, MAX_RECENT_ATTEMPTS>,
}

impl FixKnowledge {
    /// Look up a pattern by identity.
    #[must_use]
    pub fn pattern(&self, reference: &PatternRef) -> Option<&FixPattern> {
        self.known_patterns
            .get(&reference.prefix)?
            .iter()
            .find(|p| p.is(reference))
    }

    /// Look up a pattern by identity for modification.
    pub fn pattern_mut(&mut self, reference: &PatternRef) -> Option<&mut FixPattern> {
        self.known_patterns
            .get_mut(&reference.prefix)?
            .iter_mut()
            .find(|p| p.is(reference))
    }

    /// Insert a new pattern. Existing patterns are never replaced.
    pub fn insert_pattern(&mut self, pattern: FixPattern) {
        let bucket = self.known_patterns.entry(pattern.prefix.clone()).or_default();
        if !bucket.iter().any(|p| p.is(&pattern.reference())) {
            bucket.push(pattern);
        }
    }

    /// Number of distinct patterns.
    #[must_use]
    pub fn pattern_count(&self) -> usize {
        self.known_patterns.values().map(Vec::len).sum()
    }

    /// Number of retained insight strings across patterns.
    #[must_use]
    pub fn insight_count(&self) -> usize {
        self.known_patterns
            .values()
            .flatten()
            .map(|p| p.insights.len())
            .sum()
    }

    /// Count an attempt and refresh the success rate.
    #[allow(clippy::cast_precision_loss)]
    pub fn record_attempt(&mut self, attempt: FixAttempt) {
        self.fixes_attempted += 1;
        if attempt.success {
            self.fixes_successful += 1;
            self.tests_fixed_successfully += 1;
        }
        self.success_rate = self.fixes_successful as f64 / self.fixes_attempted as f64;
        self.recent_attempts.push(attempt);
    }
}

/// Strategy reused for an exact failure message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecoveryStrategy {
    /// Human-readable summary.
    pub description: String,
    /// Action name.
    pub action: String,
    /// Kind of change.
    pub fix_type: FixType,
    /// Remedy body.
    pub template: String,
    /// Successful applications.
    pub success_count: u64,
    /// Latest success.
    pub last_success: DateTime<Utc>,
}

/// Recovery strategies keyed by exact failure message.
pub type RecoveryStrategies = BTreeMap<String, RecoveryStrategy>;

/// Successful fixes and the append-only lineage chain.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FixedTestsStats {
    /// Fixes whose successor passed.
    pub count: u64,
    /// Superseded test id to successor id.
    pub lineage: BTreeMap<u64, u64>,
}

impl FixedTestsStats {
    /// Successor of a test, if it has been superseded.
    #[must_use]
    pub fn successor(&self, test_id: u64) -> Option<u64> {
        self.lineage.get(&test_id).copied()
    }

    /// Append a supersession.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::LineageViolation`] if `old` already has a successor.
    pub fn append(&mut self, old: u64, new: u64) -> Result<(), StoreError> {
        if let Some(existing) = self.successor(old) {
            return Err(StoreError::LineageViolation {
                test_id: old,
                existing,
            });
        }
        self.lineage.insert(old, new);
        Ok(())
    }
}

// ============================================================================
// Learning
// ============================================================================

/// Learning counters and outcome histograms.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LearningStats {
    /// Calls to learn.
    pub learning_sessions: u64,
    /// Success concepts written, numbering the next one.
    #[serde(default)]
    pub success_concepts: u64,
    /// Concept entries written.
    pub concepts_learned: u64,
    /// New principle strings derived.
    pub rules_discovered: u64,
    /// Successful attempts per `"<test_type>_<fix_type>"`.
    pub success_patterns: BTreeMap<String, u64>,
    /// Failed attempts per `"<test_type>_<fix_type>"`.
    pub failure_patterns: BTreeMap<String, u64>,
    /// Latest update.
    pub last_updated: Option<DateTime<Utc>>,
}

impl LearningStats {
    /// Count one fix attempt in its histogram bucket.
    pub fn tally(&mut self, bucket: String, success: bool, at: DateTime<Utc>) {
        let histogram = if success {
            &mut self.success_patterns
        } else {
            &mut self.failure_patterns
        };
        *histogram.entry(bucket).or_insert(0) += 1;
        self.last_updated = Some(at);
    }
}

/// A learned concept stored under `fix_pattern_<fix_type>_<n>`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Concept {
    /// Always `"fix_pattern"`.
    #[serde(rename = "type")]
    pub kind: String,
    /// Pattern the concept was derived from.
    pub pattern: Option<PatternRef>,
    /// Kind of change.
    pub fix_type: FixType,
    /// Derived insights.
    pub insights: InsightSet,
    /// Applications backing the concept.
    pub examples: Vec<FixExample>,
    /// When the concept was derived.
    pub created_at: DateTime<Utc>,
}

/// A concept learned from passing tests, stored under
/// `success_pattern_<test_type>_<n>`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SuccessConcept {
    /// Always `"success_pattern"`.
    #[serde(rename = "type")]
    pub kind: String,
    /// Test type of every example test.
    pub test_type: TestType,
    /// What the passing tests had in common.
    pub patterns: Vec<String>,
    /// Derived insights.
    pub insights: InsightSet,
    /// Ids of up to three passing tests.
    pub examples: Vec<u64>,
    /// When the concept was derived.
    pub created_at: DateTime<Utc>,
}

// ============================================================================
// Execution And Generation
// ============================================================================

/// Execution counters.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TestExecutionStats {
    /// Executions.
    pub tests_run: u64,
    /// Passing executions.
    pub tests_passed: u64,
    /// Failing executions.
    pub tests_failed: u64,
    /// `tests_passed / tests_run`.
    pub pass_rate: f64,
}

impl TestExecutionStats {
    /// Count one execution.
    #[allow(clippy::cast_precision_loss)]
    pub fn record(&mut self, passed: bool) {
        self.tests_run += 1;
        if passed {
            self.tests_passed += 1;
        } else {
            self.tests_failed += 1;
        }
        self.pass_rate = self.tests_passed as f64 / self.tests_run as f64;
    }
}

/// Generator complexity state.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TestGenerationHistory {
    /// Current difficulty tier.
    pub current_complexity: Difficulty,
    /// Success rate over `recent_results`.
    pub success_rate: f64,
    /// Tests generated ever.
    pub total_generated: u64,
    /// Newest outcomes, oldest first. Cleared on every tier change.
    pub recent_results: Vec<bool>,
    /// Tier changes ever.
    #[serde(default)]
    pub complexity_changes: u64,
}

/// Recently recorded tests and the id counter.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TestLedger {
    /// Last assigned id.
    pub next_id: u64,
    /// Newest tests.
    pub tests: BoundedRing<Test, MAX_LEDGER_TESTS>,
}

impl TestLedger {
    /// Assign an id and record the test.
    pub fn record(&mut self, draft: TestDraft, at: DateTime<Utc>) -> Test {
        let test = self.preview(draft, at);
        self.next_id = test.id;
        self.tests.push(test.clone());
        test
    }

    /// The test [`TestLedger::record`] would produce next, without recording it.
    #[must_use]
    pub fn preview(&self, draft: TestDraft, at: DateTime<Utc>) -> Test {
        Test {
            id: self.next_id + 1,
            parent_id: draft.parent_id,
            difficulty: draft.difficulty,
            test_type: draft.test_type,
            description: draft.description,
            code: draft.code,
            spec: draft.spec,
            created_at: at,
        }
    }

    /// Whether a test id has been assigned.
    #[must_use]
    pub const fn issued(&self, test_id: u64) -> bool {
        test_id > 0 && test_id <= self.next_id
    }

    /// Look up a retained test.
    #[must_use]
    pub fn get(&self, test_id: u64) -> Option<&Test> {
        self.tests.iter().rev().find(|t| t.id == test_id)
    }
}

// ============================================================================
// Monitoring
// ============================================================================

/// Latest health pass summary.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct HealthChecks {
    /// When the pass ran.
    pub timestamp: Option<DateTime<Utc>>,
    /// Passes ever.
    pub check_count: u64,
    /// Issues in this pass.
    pub alert_count: usize,
    /// Aggregate status of this pass.
    #[serde(default)]
    pub status: HealthStatus,
    /// Issues in this pass.
    pub issues: Vec<HealthIssue>,
}

/// Cumulative monitor counters.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MonitorStats {
    /// Passes ever.
    pub health_checks: u64,
    /// Passes that raised at least one issue.
    pub health_alerts: u64,
    /// Latest pass.
    pub last_check: Option<DateTime<Utc>>,
}

/// A self-healing action taken after repeated failing turns.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SelfHealingAction {
    /// When the action ran.
    pub timestamp: DateTime<Utc>,
    /// What was done.
    pub action: String,
    /// Why.
    pub reason: String,
    /// Most frequent error category at the time.
    pub most_common_error: Option<String>,
}

/// Self-healing action log.
pub type SelfHealingLog = BoundedRing<SelfHealingAction, MAX_HEALING_ACTIONS>;
