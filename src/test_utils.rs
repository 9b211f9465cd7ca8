//! Test utilities and mock factories.
//!
//! This module provides shared testing infrastructure:
//! - Model mocks for the success, timeout and outage paths
//! - Test drafts and a fixed clock
//!
//! Only compiled for tests (`#[cfg(test)]`).

#![allow(clippy::unwrap_used, clippy::expect_used)]

use chrono::{DateTime, Utc};

use crate::error::ModelError;
use crate::pipeline::{Difficulty, TestDraft, TestSpec, TestType};
use crate::traits::{MockModelClient, MockTimeProvider};

/// A model that always answers `text`.
#[must_use]
pub fn mock_model_answering(text: impl Into<String>) -> MockModelClient {
    let text = text.into();
    let mut mock = MockModelClient::new();
    mock.expect_query()
        .returning(move |_prompt, _timeout| Ok(text.clone()));
    mock
}

/// A model whose queries always time out.
#[must_use]
pub fn mock_model_timeout(timeout_ms: u64) -> MockModelClient {
    let mut mock = MockModelClient::new();
    mock.expect_query()
        .returning(move |_prompt, _timeout| Err(ModelError::Timeout { timeout_ms }));
    mock
}

/// A model that is never reachable.
#[must_use]
pub fn mock_model_unavailable() -> MockModelClient {
    let mut mock = MockModelClient::new();
    mock.expect_query().returning(|_prompt, _timeout| {
        Err(ModelError::Unavailable {
            message: "connection refused".into(),
        })
    });
    mock
}

/// A model that must not be queried.
#[must_use]
pub fn mock_model_unused() -> MockModelClient {
    let mut mock = MockModelClient::new();
    mock.expect_query().never();
    mock
}

/// A clock stuck at `at`.
#[must_use]
pub fn fixed_clock(at: DateTime<Utc>) -> MockTimeProvider {
    let mut mock = MockTimeProvider::new();
    mock.expect_now().return_const(at);
    mock
}

/// Beginner function-test draft of `code` against the default spec.
#[must_use]
pub fn draft(code: &str) -> TestDraft {
    TestDraft {
        difficulty: Difficulty::Beginner,
        test_type: TestType::Function,
        description: "doubling".into(),
        code: code.into(),
        spec: TestSpec::default(),
        parent_id: None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::traits::{ModelClient, TimeProvider};
    use std::time::Duration;

    #[tokio::test]
    async fn test_model_mocks() {
        let timeout = Duration::from_millis(10);
        assert_eq!(
            mock_model_answering("hi").query("p", timeout).await.unwrap(),
            "hi"
        );
        assert_eq!(
            mock_model_timeout(10).query("p", timeout).await,
            Err(ModelError::Timeout { timeout_ms: 10 })
        );
        assert!(matches!(
            mock_model_unavailable().query("p", timeout).await,
            Err(ModelError::Unavailable { .. })
        ));
    }

    #[test]
    fn test_fixed_clock_and_draft() {
        let at = Utc::now();
        assert_eq!(fixed_clock(at).now(), at);
        let draft = draft("def test_function(value):\n    return value");
        assert_eq!(draft.spec, TestSpec::default());
        assert!(draft.parent_id.is_none());
    }
}
