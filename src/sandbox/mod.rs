//! Isolated interpreter for candidate code.
//!
//! Candidates are written in a small indentation-based language with
//! integer, float, boolean and `None` values. A candidate is either a single
//! `def name(params):` function or a bare body whose free variables are the
//! test inputs.
//!
//! ```text
//! code ──▶ parser::parse_program ──▶ Program ──▶ eval::run_program ──▶ Outcome
//!                                                  (deadline polled)
//! ```
//!
//! Nothing here panics or escapes: every fault, including a local read
//! before assignment, becomes [`Outcome::Fault`] with a classified message.
//!
//! # Example
//!
//! ```
//! use std::collections::BTreeMap;
//! use std::time::{Duration, Instant};
//! use test_mender::sandbox::{run, Outcome, Value};
//!
//! let inputs = BTreeMap::from([("value".to_string(), 10)]);
//! let outcome = run("return value << 1", &inputs, Instant::now() + Duration::from_secs(1));
//! assert_eq!(outcome, Outcome::Returned(Value::Int(20)));
//! ```

mod eval;
mod parser;

pub use parser::{parse_expression, parse_program, Program, SyntaxError};

use std::collections::BTreeMap;
use std::fmt;
use std::time::Instant;

/// A runtime value.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Value {
    /// 64-bit integer. Overflow is a fault.
    Int(i64),
    /// Double-precision float.
    Float(f64),
    /// Boolean.
    Bool(bool),
    /// Absence of a value.
    None,
}

impl Value {
    /// Python truthiness.
    #[must_use]
    #[allow(clippy::float_cmp)]
    pub fn truthy(self) -> bool {
        match self {
            Self::Int(v) => v != 0,
            Self::Float(v) => v != 0.0,
            Self::Bool(v) => v,
            Self::None => false,
        }
    }

    /// Python type name, used in fault messages.
    #[must_use]
    pub const fn type_name(self) -> &'static str {
        match self {
            Self::Int(_) => "int",
            Self::Float(_) => "float",
            Self::Bool(_) => "bool",
            Self::None => "NoneType",
        }
    }
}

impl fmt::Display for Value {
    #[allow(clippy::float_cmp)]
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Int(v) => write!(f, "{v}"),
            Self::Float(v) if v.is_nan() => f.write_str("nan"),
            Self::Float(v) if v.is_infinite() => {
                f.write_str(if v.is_sign_positive() { "inf" } else { "-inf" })
            }
            Self::Float(v) if v.fract() == 0.0 && v.abs() < 1e16 => write!(f, "{v:.1}"),
            Self::Float(v) => write!(f, "{v}"),
            Self::Bool(true) => f.write_str("True"),
            Self::Bool(false) => f.write_str("False"),
            Self::None => f.write_str("None"),
        }
    }
}

/// Result of running a candidate. Every exit path produces one.
#[derive(Debug, Clone, PartialEq)]
pub enum Outcome {
    /// The candidate returned (or fell off the end, returning `None`).
    Returned(Value),
    /// A classified runtime or syntax fault.
    Fault(String),
    /// The deadline passed before the candidate finished.
    Timeout,
}

/// Parse and run candidate code with named integer inputs.
#[must_use]
pub fn run(code: &str, inputs: &BTreeMap<String, i64>, deadline: Instant) -> Outcome {
    match parse_program(code) {
        Ok(program) => eval::run_program(&program, inputs, deadline),
        Err(e) => Outcome::Fault(e.to_string()),
    }
}

/// Parse candidate code once and run it `iterations` times.
///
/// Stops at the first run that does not return and yields its outcome;
/// otherwise yields the last run's. Zero iterations count as one.
#[must_use]
pub fn run_repeated(
    code: &str,
    inputs: &BTreeMap<String, i64>,
    iterations: u32,
    deadline: Instant,
) -> Outcome {
    let program = match parse_program(code) {
        Ok(program) => program,
        Err(e) => return Outcome::Fault(e.to_string()),
    };
    let mut outcome = eval::run_program(&program, inputs, deadline);
    for _ in 1..iterations {
        if !matches!(outcome, Outcome::Returned(_)) {
            break;
        }
        outcome = eval::run_program(&program, inputs, deadline);
    }
    outcome
}

/// Evaluate a pass criterion such as `output == value * 2`.
///
/// # Errors
///
/// Returns the fault message if the criterion does not parse or evaluate.
pub fn evaluate_criteria(criteria: &str, vars: &BTreeMap<String, Value>) -> Result<bool, String> {
    let expr = parse_expression(criteria).map_err(|e| e.to_string())?;
    eval::eval_expression(&expr, vars).map(Value::truthy)
}
