//! Turning a remedy into a successor test.

use serde::Deserialize;

use crate::pipeline::{FixType, Test, TestDraft, TestSpec};

/// Arithmetic strategy swaps tried by a config change with no swaps of its own.
pub const DEFAULT_SWAPS: [(&str, &str); 4] =
    [("<< 1", "* 2"), ("* 2", "<< 1"), ("//", "/"), ("/", "//")];

const SWAP_SEPARATOR: &str = " => ";

/// One textual replacement in the implementation.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct Swap {
    /// Text to find.
    pub from: String,
    /// Replacement.
    pub to: String,
}

impl Swap {
    /// Create a swap.
    #[must_use]
    pub fn new(from: impl Into<String>, to: impl Into<String>) -> Self {
        Self {
            from: from.into(),
            to: to.into(),
        }
    }
}

/// A concrete change to a failing test.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Remedy {
    /// Replace the criteria.
    TestChange {
        /// New criteria expression.
        criteria: String,
    },
    /// Apply the first swap whose `from` occurs in the code.
    ConfigChange {
        /// Candidate swaps, tried in order.
        swaps: Vec<Swap>,
    },
    /// Replace the implementation.
    CodeChange {
        /// New implementation.
        code: String,
    },
}

impl Remedy {
    /// Config change over [`DEFAULT_SWAPS`].
    #[must_use]
    pub fn default_swaps() -> Self {
        Self::ConfigChange {
            swaps: DEFAULT_SWAPS
                .iter()
                .map(|(from, to)| Swap::new(*from, *to))
                .collect(),
        }
    }

    /// Kind of change.
    #[must_use]
    pub const fn fix_type(&self) -> FixType {
        match self {
            Self::TestChange { .. } => FixType::TestChange,
            Self::ConfigChange { .. } => FixType::ConfigChange,
            Self::CodeChange { .. } => FixType::CodeChange,
        }
    }

    /// Body stored on a fix pattern.
    ///
    /// Swaps are stored one per line as `from => to`.
    #[must_use]
    pub fn template(&self) -> String {
        match self {
            Self::TestChange { criteria } => criteria.clone(),
            Self::ConfigChange { swaps } => swaps
                .iter()
                .map(|s| format!("{}{SWAP_SEPARATOR}{}", s.from, s.to))
                .collect::<Vec<_>>()
                .join("\n"),
            Self::CodeChange { code } => code.clone(),
        }
    }

    /// Rebuild a remedy from a stored pattern body.
    ///
    /// Returns `None` if the body is empty or has no usable swap lines.
    #[must_use]
    pub fn from_template(fix_type: FixType, template: &str) -> Option<Self> {
        if template.trim().is_empty() {
            return None;
        }
        match fix_type {
            FixType::TestChange => Some(Self::TestChange {
                criteria: template.trim().to_string(),
            }),
            FixType::CodeChange => Some(Self::CodeChange {
                code: template.to_string(),
            }),
            FixType::ConfigChange => {
                let swaps: Vec<Swap> = template
                    .lines()
                    .filter_map(|line| line.split_once(SWAP_SEPARATOR))
                    .filter(|(from, _)| !from.is_empty())
                    .map(|(from, to)| Swap::new(from, to))
                    .collect();
                (!swaps.is_empty()).then_some(Self::ConfigChange { swaps })
            }
        }
    }

    /// Successor of `test` with this remedy applied.
    ///
    /// Returns `None` when the remedy would leave the test unchanged.
    #[must_use]
    pub fn apply(&self, test: &Test) -> Option<TestDraft> {
        let (code, spec) = match self {
            Self::TestChange { criteria } => (
                test.code.clone(),
                TestSpec {
                    inputs: test.spec.inputs.clone(),
                    criteria: criteria.clone(),
                },
            ),
            Self::ConfigChange { swaps } => {
                let swap = swaps
                    .iter()
                    .find(|s| !s.from.is_empty() && test.code.contains(&s.from))?;
                (test.code.replace(&swap.from, &swap.to), test.spec.clone())
            }
            Self::CodeChange { code } => (code.clone(), test.spec.clone()),
        };

        if code == test.code && spec == test.spec {
            return None;
        }
        Some(test.successor(code, spec))
    }
}

/// Always-available implementation taking the test's input names.
///
/// With the default `value` input this is [`crate::pipeline::FALLBACK_CODE`].
#[must_use]
pub fn fallback_code(spec: &TestSpec) -> String {
    let params: Vec<&str> = spec.inputs.keys().map(String::as_str).collect();
    match params.first() {
        None => crate::pipeline::FALLBACK_CODE.to_string(),
        Some(first) => format!(
            "def test_function({}):\n    return {first} * 2",
            params.join(", ")
        ),
    }
}
