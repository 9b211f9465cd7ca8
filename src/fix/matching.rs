//! Failure classification and pattern selection.

use crate::knowledge::{FixKnowledge, FixPattern};
use crate::pipeline::{normalize_signature, TestResult, TestType, TIMEOUT_SIGNATURE};

/// Words of a signature kept in a new pattern's key.
pub const PATTERN_KEY_WORDS: usize = 5;

/// A failure reduced to what pattern lookup needs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ErrorClass {
    /// Leading exception name, e.g. `ZeroDivisionError`, or `execution_timeout`.
    pub category: String,
    /// Test type of the failing test.
    pub test_type: TestType,
    /// Normalized signature prefix.
    pub prefix: String,
}

impl ErrorClass {
    /// Key a new pattern for this failure is stored under.
    #[must_use]
    pub fn pattern_key(&self) -> String {
        pattern_key(&self.prefix)
    }
}

/// Classify a failing result.
#[must_use]
pub fn classify(result: &TestResult, test_type: TestType) -> ErrorClass {
    let prefix = result.error_signature.clone().unwrap_or_else(|| {
        normalize_signature(result.failure_reason.as_deref().unwrap_or(&result.output))
    });
    ErrorClass {
        category: category_of(&prefix),
        test_type,
        prefix,
    }
}

fn category_of(signature: &str) -> String {
    if signature == TIMEOUT_SIGNATURE {
        return TIMEOUT_SIGNATURE.to_string();
    }
    signature
        .split_once(':')
        .map(|(head, _)| head.trim())
        .filter(|head| {
            !head.is_empty() && head.chars().all(|c| c.is_ascii_alphanumeric() || c == '_')
        })
        .map_or_else(|| "unknown".to_string(), str::to_string)
}

/// Leading words of a signature, used as a new pattern's key.
#[must_use]
pub fn pattern_key(prefix: &str) -> String {
    prefix
        .split(' ')
        .take(PATTERN_KEY_WORDS)
        .collect::<Vec<_>>()
        .join(" ")
}

/// Pick the pattern to apply for a failure.
///
/// Candidates are patterns whose key is a prefix of the signature, scoped to
/// the failure's test type or to [`TestType::Any`], with fewer than
/// `demote_after` consecutive failures. They are ranked by, in order:
///
/// 1. longest key
/// 2. exact `test_type` match over `any`
/// 3. higher `success_count`
/// 4. more recent `last_success`
///
/// `None` sends the fix to model synthesis.
#[must_use]
pub fn select_pattern<'a>(
    knowledge: &'a FixKnowledge,
    class: &ErrorClass,
    demote_after: u32,
) -> Option<&'a FixPattern> {
    knowledge
        .known_patterns
        .iter()
        .filter(|(key, _)| !key.is_empty() && class.prefix.starts_with(key.as_str()))
        .flat_map(|(key, patterns)| patterns.iter().map(move |p| (key.len(), p)))
        .filter(|(_, p)| p.test_type == class.test_type || p.test_type == TestType::Any)
        .filter(|(_, p)| p.consecutive_failures < demote_after)
        .max_by_key(|(key_len, p)| {
            (
                *key_len,
                p.test_type == class.test_type,
                p.success_count,
                p.last_success,
            )
        })
        .map(|(_, p)| p)
}
