//! Test generation and execution.
//!
//! - [`TestGenerator`]: produces tests at a difficulty tier and adapts the tier
//! - [`TestExecutor`]: runs a test in the sandbox and judges the output
//! - [`normalize_signature`]: turns failure text into a stable signature

mod executor;
mod generator;
mod signature;
mod types;

pub use executor::{ExecutorConfig, TestExecutor, ITERATIONS_INPUT, MAX_ITERATIONS};
pub use generator::{GeneratorConfig, TestGenerator, FALLBACK_CODE};
pub use signature::{normalize_signature, truncate_chars, SIGNATURE_PREFIX_LEN, TIMEOUT_SIGNATURE};
pub use types::{
    Difficulty, FixAttempt, FixType, Test, TestDraft, TestResult, TestSpec, TestType,
};
