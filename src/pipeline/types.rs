//! Data model for tests, results, and fix attempts.

use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::signature::normalize_signature;
use crate::knowledge::PatternRef;

// ============================================================================
// Enums
// ============================================================================

/// Difficulty tier of a generated test.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize,
)]
#[serde(rename_all = "lowercase")]
pub enum Difficulty {
    /// Single-expression functions.
    #[default]
    Beginner,
    /// Short functions with branches.
    Intermediate,
    /// Loops and accumulators.
    Advanced,
    /// Nested control flow.
    Expert,
}

impl Difficulty {
    /// All tiers from simplest to hardest.
    pub const ALL: [Self; 4] = [
        Self::Beginner,
        Self::Intermediate,
        Self::Advanced,
        Self::Expert,
    ];

    /// Next harder tier, saturating at [`Difficulty::Expert`].
    #[must_use]
    pub const fn harder(self) -> Self {
        match self {
            Self::Beginner => Self::Intermediate,
            Self::Intermediate => Self::Advanced,
            Self::Advanced | Self::Expert => Self::Expert,
        }
    }

    /// Next simpler tier, or `None` at [`Difficulty::Beginner`].
    #[must_use]
    pub const fn simpler(self) -> Option<Self> {
        match self {
            Self::Beginner => None,
            Self::Intermediate => Some(Self::Beginner),
            Self::Advanced => Some(Self::Intermediate),
            Self::Expert => Some(Self::Advanced),
        }
    }

    /// Lowercase name.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Beginner => "beginner",
            Self::Intermediate => "intermediate",
            Self::Advanced => "advanced",
            Self::Expert => "expert",
        }
    }
}

impl fmt::Display for Difficulty {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What a test exercises.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize,
)]
#[serde(rename_all = "lowercase")]
pub enum TestType {
    /// A single function's input/output relation.
    #[default]
    Function,
    /// Behaviour across several steps.
    System,
    /// Work bounded by a time budget.
    Performance,
    /// Fix pattern scope matching every other test type.
    Any,
}

impl TestType {
    /// Lowercase name.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Function => "function",
            Self::System => "system",
            Self::Performance => "performance",
            Self::Any => "any",
        }
    }
}

impl fmt::Display for TestType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// How a fix changes a failing test.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FixType {
    /// Rewrite the success criteria.
    TestChange,
    /// Swap an operational detail of the implementation.
    ConfigChange,
    /// Rewrite the implementation body.
    CodeChange,
}

impl FixType {
    /// Snake-case name.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::TestChange => "test_change",
            Self::ConfigChange => "config_change",
            Self::CodeChange => "code_change",
        }
    }

    /// Parse the snake-case name.
    #[must_use]
    pub fn parse(value: &str) -> Option<Self> {
        match value.trim() {
            "test_change" => Some(Self::TestChange),
            "config_change" => Some(Self::ConfigChange),
            "code_change" => Some(Self::CodeChange),
            _ => None,
        }
    }
}

impl fmt::Display for FixType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ============================================================================
// Tests
// ============================================================================

/// The implicit specification a test's code must satisfy.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TestSpec {
    /// Named integer arguments passed to the candidate function.
    pub inputs: BTreeMap<String, i64>,
    /// Boolean expression over the inputs and `output`.
    pub criteria: String,
}

impl TestSpec {
    /// Spec with a single `value` input.
    #[must_use]
    pub fn single(value: i64, criteria: impl Into<String>) -> Self {
        Self {
            inputs: BTreeMap::from([("value".to_string(), value)]),
            criteria: criteria.into(),
        }
    }
}

impl Default for TestSpec {
    fn default() -> Self {
        Self::single(10, "output == value * 2")
    }
}

/// A test before the ledger assigns its id.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TestDraft {
    /// Difficulty tier.
    pub difficulty: Difficulty,
    /// What the test exercises.
    pub test_type: TestType,
    /// Short description.
    pub description: String,
    /// Candidate implementation source.
    pub code: String,
    /// Expected relation.
    pub spec: TestSpec,
    /// Test this one supersedes, if it came from a fix.
    pub parent_id: Option<u64>,
}

/// A generated test. Immutable once recorded.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Test {
    /// Monotonic id.
    pub id: u64,
    /// Test this one supersedes, if any.
    pub parent_id: Option<u64>,
    /// Difficulty tier.
    pub difficulty: Difficulty,
    /// What the test exercises.
    pub test_type: TestType,
    /// Short description.
    pub description: String,
    /// Candidate implementation source.
    pub code: String,
    /// Expected relation.
    pub spec: TestSpec,
    /// When the test was recorded.
    pub created_at: DateTime<Utc>,
}

impl Test {
    /// Draft a successor carrying this test's metadata.
    #[must_use]
    pub fn successor(&self, code: String, spec: TestSpec) -> TestDraft {
        TestDraft {
            difficulty: self.difficulty,
            test_type: self.test_type,
            description: self.description.clone(),
            code,
            spec,
            parent_id: Some(self.id),
        }
    }
}

/// Outcome of one execution attempt.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TestResult {
    /// Executed test.
    pub test_id: u64,
    /// Whether the output met the criteria.
    pub passed: bool,
    /// Rendered return value, or empty when execution failed.
    pub output: String,
    /// Exact failure message, present only when `passed` is false.
    pub failure_reason: Option<String>,
    /// Normalized failure signature, present only when `passed` is false.
    pub error_signature: Option<String>,
    /// Wall-clock execution time.
    pub duration_ms: u64,
    /// When execution finished.
    pub executed_at: DateTime<Utc>,
}

impl TestResult {
    /// A passing result.
    #[must_use]
    pub fn pass(test_id: u64, output: String, duration_ms: u64, at: DateTime<Utc>) -> Self {
        Self {
            test_id,
            passed: true,
            output,
            failure_reason: None,
            error_signature: None,
            duration_ms,
            executed_at: at,
        }
    }

    /// A failing result whose signature is derived from the reason.
    #[must_use]
    pub fn fail(
        test_id: u64,
        output: String,
        reason: String,
        duration_ms: u64,
        at: DateTime<Utc>,
    ) -> Self {
        let signature = normalize_signature(&reason);
        Self {
            test_id,
            passed: false,
            output,
            failure_reason: Some(reason),
            error_signature: Some(signature),
            duration_ms,
            executed_at: at,
        }
    }

    /// A failing result with a fixed signature category.
    #[must_use]
    pub fn fail_with_signature(
        test_id: u64,
        reason: String,
        signature: &str,
        duration_ms: u64,
        at: DateTime<Utc>,
    ) -> Self {
        Self {
            test_id,
            passed: false,
            output: String::new(),
            failure_reason: Some(reason),
            error_signature: Some(signature.to_string()),
            duration_ms,
            executed_at: at,
        }
    }
}

/// One fix try, recorded whether it succeeded or not.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FixAttempt {
    /// Test being fixed.
    pub test_id: u64,
    /// Superseding test, if one was produced.
    pub new_test_id: Option<u64>,
    /// Test type of the fixed test.
    pub test_type: TestType,
    /// Kind of change applied.
    pub fix_type: FixType,
    /// Explanation of the change.
    pub analysis: String,
    /// Whether re-verification passed.
    pub success: bool,
    /// Pattern credited with the outcome, if any.
    pub pattern: Option<PatternRef>,
    /// When the fix was applied.
    pub applied_at: DateTime<Utc>,
}

impl FixAttempt {
    /// Histogram bucket `"<test_type>_<fix_type>"`.
    #[must_use]
    pub fn bucket(&self) -> String {
        format!("{}_{}", self.test_type, self.fix_type)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_difficulty_ladder() {
        assert_eq!(Difficulty::Beginner.harder(), Difficulty::Intermediate);
        assert_eq!(Difficulty::Expert.harder(), Difficulty::Expert);
        assert_eq!(Difficulty::Beginner.simpler(), None);
        assert_eq!(Difficulty::Expert.simpler(), Some(Difficulty::Advanced));
    }

    #[test]
    fn test_enum_serialization() {
        assert_eq!(
            serde_json::to_string(&FixType::ConfigChange).unwrap(),
            r#""config_change""#
        );
        assert_eq!(
            serde_json::to_string(&Difficulty::Advanced).unwrap(),
            r#""advanced""#
        );
        assert_eq!(
            serde_json::from_str::<TestType>(r#""performance""#).unwrap(),
            TestType::Performance
        );
    }

    #[test]
    fn test_fix_type_parse() {
        assert_eq!(FixType::parse("code_change"), Some(FixType::CodeChange));
        assert_eq!(FixType::parse(" test_change "), Some(FixType::TestChange));
        assert_eq!(FixType::parse("rewrite"), None);
    }

    #[test]
    fn test_failed_result_carries_signature() {
        let result = TestResult::fail(
            7,
            String::new(),
            "ZeroDivisionError: division by zero (line 3)".into(),
            1,
            Utc::now(),
        );
        assert!(!result.passed);
        assert_eq!(
            result.error_signature.as_deref(),
            Some("ZeroDivisionError: division by zero (line XXX)")
        );
    }

    #[test]
    fn test_passed_result_has_no_signature() {
        let result = TestResult::pass(1, "20".into(), 1, Utc::now());
        assert!(result.error_signature.is_none());
        assert!(result.failure_reason.is_none());
    }

    #[test]
    fn test_attempt_bucket() {
        let attempt = FixAttempt {
            test_id: 1,
            new_test_id: Some(2),
            test_type: TestType::System,
            fix_type: FixType::CodeChange,
            analysis: String::new(),
            success: false,
            pattern: None,
            applied_at: Utc::now(),
        };
        assert_eq!(attempt.bucket(), "system_code_change");
    }
}
