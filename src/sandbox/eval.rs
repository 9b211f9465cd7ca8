//! Tree-walking evaluator.
//!
//! Every fault surfaces as a Python-style message with the line it occurred
//! on. The deadline is polled as statements execute, so a runaway loop ends
//! in [`Outcome::Timeout`] instead of blocking its thread forever.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::time::Instant;

use super::parser::{
    BinOp, CmpOp, Expr, Program, Stmt, UnaryOp, MAX_EXPRESSION_TOKENS, MAX_NESTING,
};
use super::{Outcome, Value};

/// Statements between deadline checks.
const DEADLINE_POLL_INTERVAL: u64 = 64;

/// Deepest expression or block recursion before the run faults.
const MAX_EVAL_DEPTH: usize = MAX_EXPRESSION_TOKENS + MAX_NESTING;

#[derive(Debug)]
enum Interrupt {
    Fault {
        message: String,
        line: Option<usize>,
    },
    Timeout,
}

impl Interrupt {
    fn fault(message: impl Into<String>) -> Self {
        Self::Fault {
            message: message.into(),
            line: None,
        }
    }

    fn at(self, at: usize) -> Self {
        match self {
            Self::Fault {
                message,
                line: None,
            } => Self::Fault {
                message,
                line: Some(at),
            },
            other => other,
        }
    }
}

enum Flow {
    Next,
    Return(Value),
    Break,
    Continue,
}

type Eval<T> = Result<T, Interrupt>;

/// Run a parsed program against named integer inputs.
#[must_use]
pub fn run_program(program: &Program, inputs: &BTreeMap<String, i64>, deadline: Instant) -> Outcome {
    let mut locals = HashMap::new();
    match &program.params {
        Some(params) => {
            for param in params {
                let Some(value) = inputs.get(param) else {
                    let name = program.name.as_deref().unwrap_or("function");
                    return Outcome::Fault(format!(
                        "TypeError: {name}() missing required argument: '{param}'"
                    ));
                };
                locals.insert(param.clone(), Value::Int(*value));
            }
        }
        None => {
            for (name, value) in inputs {
                locals.insert(name.clone(), Value::Int(*value));
            }
        }
    }

    let mut assigned = HashSet::new();
    collect_assigned(&program.body, &mut assigned);

    let mut frame = Frame {
        locals,
        assigned,
        deadline,
        steps: 0,
        depth: 0,
    };

    match frame.exec_block(&program.body) {
        Ok(Flow::Return(value)) => Outcome::Returned(value),
        Ok(Flow::Next) => Outcome::Returned(Value::None),
        Ok(Flow::Break | Flow::Continue) => {
            Outcome::Fault("SyntaxError: 'break' outside loop".to_string())
        }
        Err(Interrupt::Timeout) => Outcome::Timeout,
        Err(Interrupt::Fault { message, line }) => Outcome::Fault(match line {
            Some(line) => format!("{message} (line {line})"),
            None => message,
        }),
    }
}

/// Evaluate a standalone expression against bound variables.
///
/// # Errors
///
/// Returns the fault message if evaluation fails.
pub fn eval_expression(expr: &Expr, vars: &BTreeMap<String, Value>) -> Result<Value, String> {
    let mut frame = Frame {
        locals: vars.iter().map(|(k, v)| (k.clone(), *v)).collect(),
        assigned: HashSet::new(),
        deadline: Instant::now() + std::time::Duration::from_secs(1),
        steps: 0,
        depth: 0,
    };
    frame.eval(expr).map_err(|interrupt| match interrupt {
        Interrupt::Fault { message, .. } => message,
        Interrupt::Timeout => "TimeoutError: expression took too long".to_string(),
    })
}

fn collect_assigned(body: &[Stmt], names: &mut HashSet<String>) {
    for stmt in body {
        match stmt {
            Stmt::Assign { name, .. } | Stmt::AugAssign { name, .. } => {
                names.insert(name.clone());
            }
            Stmt::If {
                branches, orelse, ..
            } => {
                for (_, branch) in branches {
                    collect_assigned(branch, names);
                }
                collect_assigned(orelse, names);
            }
            Stmt::While { body, .. } => collect_assigned(body, names),
            Stmt::Return { .. }
            | Stmt::Break { .. }
            | Stmt::Continue { .. }
            | Stmt::Pass
            | Stmt::Expr { .. } => {}
        }
    }
}

struct Frame {
    locals: HashMap<String, Value>,
    assigned: HashSet<String>,
    deadline: Instant,
    steps: u64,
    depth: usize,
}

impl Frame {
    fn tick(&mut self) -> Eval<()> {
        self.steps += 1;
        if self.steps % DEADLINE_POLL_INTERVAL == 0 && Instant::now() >= self.deadline {
            return Err(Interrupt::Timeout);
        }
        Ok(())
    }

    fn descend<T>(&mut self, step: impl FnOnce(&mut Self) -> Eval<T>) -> Eval<T> {
        if self.depth >= MAX_EVAL_DEPTH {
            return Err(Interrupt::fault(
                "RecursionError: maximum recursion depth exceeded",
            ));
        }
        self.depth += 1;
        let result = step(self);
        self.depth -= 1;
        result
    }

    fn exec_block(&mut self, body: &[Stmt]) -> Eval<Flow> {
        self.descend(|frame| frame.exec_statements(body))
    }

    fn exec_statements(&mut self, body: &[Stmt]) -> Eval<Flow> {
        for stmt in body {
            match self.exec(stmt)? {
                Flow::Next => {}
                flow => return Ok(flow),
            }
        }
        Ok(Flow::Next)
    }

    fn exec(&mut self, stmt: &Stmt) -> Eval<Flow> {
        self.tick()?;
        match stmt {
            Stmt::Assign { name, value, line } => {
                let value = self.eval(value).map_err(|i| i.at(*line))?;
                self.locals.insert(name.clone(), value);
                Ok(Flow::Next)
            }
            Stmt::AugAssign {
                name,
                op,
                value,
                line,
            } => {
                let current = self.lookup(name).map_err(|i| i.at(*line))?;
                let rhs = self.eval(value).map_err(|i| i.at(*line))?;
                let result = binary(*op, current, rhs).map_err(|i| i.at(*line))?;
                self.locals.insert(name.clone(), result);
                Ok(Flow::Next)
            }
            Stmt::If {
                branches,
                orelse,
                line,
            } => {
                for (cond, body) in branches {
                    if self.eval(cond).map_err(|i| i.at(*line))?.truthy() {
                        return self.exec_block(body);
                    }
                }
                self.exec_block(orelse)
            }
            Stmt::While { cond, body, line } => {
                loop {
                    self.tick()?;
                    if !self.eval(cond).map_err(|i| i.at(*line))?.truthy() {
                        break;
                    }
                    match self.exec_block(body)? {
                        Flow::Next | Flow::Continue => {}
                        Flow::Break => break,
                        flow @ Flow::Return(_) => return Ok(flow),
                    }
                }
                Ok(Flow::Next)
            }
            Stmt::Return { value, line } => {
                let value = match value {
                    Some(expr) => self.eval(expr).map_err(|i| i.at(*line))?,
                    None => Value::None,
                };
                Ok(Flow::Return(value))
            }
            Stmt::Break { .. } => Ok(Flow::Break),
            Stmt::Continue { .. } => Ok(Flow::Continue),
            Stmt::Pass => Ok(Flow::Next),
            Stmt::Expr { value, line } => {
                self.eval(value).map_err(|i| i.at(*line))?;
                Ok(Flow::Next)
            }
        }
    }

    fn lookup(&self, name: &str) -> Eval<Value> {
        if let Some(value) = self.locals.get(name) {
            return Ok(*value);
        }
        if self.assigned.contains(name) {
            return Err(Interrupt::fault(format!(
                "UnboundLocalError: local variable '{name}' referenced before assignment"
            )));
        }
        Err(Interrupt::fault(format!(
            "NameError: name '{name}' is not defined"
        )))
    }

    fn eval(&mut self, expr: &Expr) -> Eval<Value> {
        self.descend(|frame| frame.eval_node(expr))
    }

    fn eval_node(&mut self, expr: &Expr) -> Eval<Value> {
        match expr {
            Expr::Int(v) => Ok(Value::Int(*v)),
            Expr::Float(v) => Ok(Value::Float(*v)),
            Expr::Bool(v) => Ok(Value::Bool(*v)),
            Expr::None => Ok(Value::None),
            Expr::Name(name) => self.lookup(name),
            Expr::Unary(op, operand) => {
                let value = self.eval(operand)?;
                unary(*op, value)
            }
            Expr::Binary(op, left, right) => {
                let left = self.eval(left)?;
                let right = self.eval(right)?;
                binary(*op, left, right)
            }
            Expr::Compare(first, chain) => {
                let mut left = self.eval(first)?;
                for (op, next) in chain {
                    let right = self.eval(next)?;
                    if !compare(*op, left, right)? {
                        return Ok(Value::Bool(false));
                    }
                    left = right;
                }
                Ok(Value::Bool(true))
            }
            Expr::And(left, right) => {
                let left = self.eval(left)?;
                if left.truthy() {
                    self.eval(right)
                } else {
                    Ok(left)
                }
            }
            Expr::Or(left, right) => {
                let left = self.eval(left)?;
                if left.truthy() {
                    Ok(left)
                } else {
                    self.eval(right)
                }
            }
            Expr::Call(name, args) => {
                let mut values = Vec::with_capacity(args.len());
                for arg in args {
                    values.push(self.eval(arg)?);
                }
                self.call(name, &values)
            }
        }
    }

    fn call(&self, name: &str, args: &[Value]) -> Eval<Value> {
        match (name, args) {
            ("abs", [value]) => match value.as_number()? {
                Number::Int(v) => v
                    .checked_abs()
                    .map(Value::Int)
                    .ok_or_else(overflow),
                Number::Float(v) => Ok(Value::Float(v.abs())),
            },
            ("int", [value]) => match value.as_number()? {
                Number::Int(v) => Ok(Value::Int(v)),
                Number::Float(v) => float_to_int(v.trunc()),
            },
            ("bool", [value]) => Ok(Value::Bool(value.truthy())),
            ("min" | "max", [_, _, ..]) => {
                let mut best = args[0];
                for candidate in &args[1..] {
                    let replace = if name == "min" {
                        compare(CmpOp::Lt, *candidate, best)?
                    } else {
                        compare(CmpOp::Gt, *candidate, best)?
                    };
                    if replace {
                        best = *candidate;
                    }
                }
                Ok(best)
            }
            ("abs" | "int" | "bool", _) => Err(Interrupt::fault(format!(
                "TypeError: {name}() takes exactly one argument ({} given)",
                args.len()
            ))),
            ("min" | "max", _) => Err(Interrupt::fault(format!(
                "TypeError: {name} expected at least 2 arguments, got {}",
                args.len()
            ))),
            _ if self.locals.contains_key(name) => Err(Interrupt::fault(format!(
                "TypeError: '{}' object is not callable",
                self.locals.get(name).map_or("NoneType", |v| v.type_name())
            ))),
            _ => Err(Interrupt::fault(format!(
                "NameError: name '{name}' is not defined"
            ))),
        }
    }
}

// ============================================================================
// Operators
// ============================================================================

#[derive(Debug, Clone, Copy)]
enum Number {
    Int(i64),
    Float(f64),
}

impl Value {
    fn as_number(self) -> Eval<Number> {
        match self {
            Self::Int(v) => Ok(Number::Int(v)),
            Self::Bool(v) => Ok(Number::Int(i64::from(v))),
            Self::Float(v) => Ok(Number::Float(v)),
            Self::None => Err(Interrupt::fault(
                "TypeError: bad operand type: 'NoneType'",
            )),
        }
    }
}

fn overflow() -> Interrupt {
    Interrupt::fault("OverflowError: integer overflow")
}

#[allow(clippy::cast_possible_truncation, clippy::cast_precision_loss)]
fn float_to_int(v: f64) -> Eval<Value> {
    if v.is_nan() {
        return Err(Interrupt::fault(
            "ValueError: cannot convert float NaN to integer",
        ));
    }
    if v.is_infinite() || v >= i64::MAX as f64 || v < i64::MIN as f64 {
        return Err(Interrupt::fault(
            "OverflowError: cannot convert float infinity to integer",
        ));
    }
    Ok(Value::Int(v as i64))
}

fn unsupported(op: &str, left: Value, right: Value) -> Interrupt {
    Interrupt::fault(format!(
        "TypeError: unsupported operand type(s) for {op}: '{}' and '{}'",
        left.type_name(),
        right.type_name()
    ))
}

fn unary(op: UnaryOp, value: Value) -> Eval<Value> {
    match op {
        UnaryOp::Not => Ok(Value::Bool(!value.truthy())),
        UnaryOp::Pos | UnaryOp::Neg => {
            let symbol = if op == UnaryOp::Neg { "-" } else { "+" };
            let number = value.as_number().map_err(|_| {
                Interrupt::fault(format!(
                    "TypeError: bad operand type for unary {symbol}: '{}'",
                    value.type_name()
                ))
            })?;
            match (op, number) {
                (UnaryOp::Neg, Number::Int(v)) => v.checked_neg().map(Value::Int).ok_or_else(overflow),
                (UnaryOp::Neg, Number::Float(v)) => Ok(Value::Float(-v)),
                (_, Number::Int(v)) => Ok(Value::Int(v)),
                (_, Number::Float(v)) => Ok(Value::Float(v)),
            }
        }
    }
}

fn binary(op: BinOp, left: Value, right: Value) -> Eval<Value> {
    let symbol = op.symbol();
    let (Ok(a), Ok(b)) = (left.as_number(), right.as_number()) else {
        return Err(unsupported(symbol, left, right));
    };

    match (a, b) {
        (Number::Int(a), Number::Int(b)) => int_binary(op, a, b),
        (a, b) => {
            let (a, b) = (a.to_f64(), b.to_f64());
            float_binary(op, a, b).ok_or_else(|| unsupported(symbol, left, right))?
        }
    }
}

impl Number {
    #[allow(clippy::cast_precision_loss)]
    const fn to_f64(self) -> f64 {
        match self {
            Self::Int(v) => v as f64,
            Self::Float(v) => v,
        }
    }
}

fn int_binary(op: BinOp, a: i64, b: i64) -> Eval<Value> {
    let zero_div = || Interrupt::fault("ZeroDivisionError: integer division or modulo by zero");
    let result = match op {
        BinOp::Add => a.checked_add(b).ok_or_else(overflow)?,
        BinOp::Sub => a.checked_sub(b).ok_or_else(overflow)?,
        BinOp::Mul => a.checked_mul(b).ok_or_else(overflow)?,
        BinOp::Div => {
            if b == 0 {
                return Err(Interrupt::fault("ZeroDivisionError: division by zero"));
            }
            #[allow(clippy::cast_precision_loss)]
            return Ok(Value::Float(a as f64 / b as f64));
        }
        BinOp::FloorDiv => {
            if b == 0 {
                return Err(zero_div());
            }
            let q = a.checked_div(b).ok_or_else(overflow)?;
            if a % b != 0 && ((a < 0) != (b < 0)) {
                q - 1
            } else {
                q
            }
        }
        BinOp::Mod => {
            if b == 0 {
                return Err(zero_div());
            }
            let r = a.checked_rem(b).unwrap_or(0);
            if r != 0 && ((r < 0) != (b < 0)) {
                r + b
            } else {
                r
            }
        }
        BinOp::Shl => {
            if b < 0 {
                return Err(Interrupt::fault("ValueError: negative shift count"));
            }
            if a == 0 {
                0
            } else {
                let shift = u32::try_from(b).map_err(|_| overflow())?;
                1_i64
                    .checked_shl(shift)
                    .filter(|factor| *factor > 0)
                    .and_then(|factor| a.checked_mul(factor))
                    .ok_or_else(overflow)?
            }
        }
    };
    Ok(Value::Int(result))
}

/// `None` means the operator does not apply to floats.
fn float_binary(op: BinOp, a: f64, b: f64) -> Option<Eval<Value>> {
    let zero = || {
        Err(Interrupt::fault(
            "ZeroDivisionError: float division by zero",
        ))
    };
    Some(match op {
        BinOp::Add => Ok(Value::Float(a + b)),
        BinOp::Sub => Ok(Value::Float(a - b)),
        BinOp::Mul => Ok(Value::Float(a * b)),
        BinOp::Div if b == 0.0 => zero(),
        BinOp::Div => Ok(Value::Float(a / b)),
        BinOp::FloorDiv if b == 0.0 => zero(),
        BinOp::FloorDiv => Ok(Value::Float((a / b).floor())),
        BinOp::Mod if b == 0.0 => zero(),
        BinOp::Mod => Ok(Value::Float(a - b * (a / b).floor())),
        BinOp::Shl => return None,
    })
}

#[allow(clippy::float_cmp)]
fn compare(op: CmpOp, left: Value, right: Value) -> Eval<bool> {
    let numbers = (left.as_number(), right.as_number());
    let ordering = match numbers {
        (Ok(Number::Int(a)), Ok(Number::Int(b))) => Some(a.cmp(&b)),
        (Ok(a), Ok(b)) => a.to_f64().partial_cmp(&b.to_f64()),
        _ => {
            let both_none = matches!((left, right), (Value::None, Value::None));
            return match op {
                CmpOp::Eq => Ok(both_none),
                CmpOp::Ne => Ok(!both_none),
                _ => Err(Interrupt::fault(format!(
                    "TypeError: '{}' not supported between instances of '{}' and '{}'",
                    op.symbol(),
                    left.type_name(),
                    right.type_name()
                ))),
            };
        }
    };

    let Some(ordering) = ordering else {
        // NaN compares unequal to everything.
        return Ok(op == CmpOp::Ne);
    };
    Ok(match op {
        CmpOp::Eq => ordering.is_eq(),
        CmpOp::Ne => ordering.is_ne(),
        CmpOp::Lt => ordering.is_lt(),
        CmpOp::Le => ordering.is_le(),
        CmpOp::Gt => ordering.is_gt(),
        CmpOp::Ge => ordering.is_ge(),
    })
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::super::parser::parse_program;
    use super::*;
    use std::time::Duration;
    use test_case::test_case;

    fn run(code: &str, value: i64) -> Outcome {
        let program = parse_program(code).unwrap();
        let inputs = BTreeMap::from([("value".to_string(), value)]);
        run_program(&program, &inputs, Instant::now() + Duration::from_secs(5))
    }

    #[test_case("return value << 1", 10, Value::Int(20) ; "shift doubles")]
    #[test_case("return value * 2", 10, Value::Int(20) ; "multiply")]
    #[test_case("return value // 3", -7, Value::Int(-3) ; "floor division rounds down")]
    #[test_case("return value % 3", -7, Value::Int(2) ; "modulo takes divisor sign")]
    #[test_case("return value / 4", 10, Value::Float(2.5) ; "true division")]
    #[test_case("return 1 < value <= 10", 10, Value::Bool(true) ; "chained comparison")]
    #[test_case("return value and 0 or 7", 1, Value::Int(7) ; "and or return operands")]
    #[test_case("return max(value, 3, -2)", 1, Value::Int(3) ; "builtin max")]
    #[test_case("return abs(-value)", 4, Value::Int(4) ; "builtin abs")]
    #[test_case("return True + 1", 0, Value::Int(2) ; "bool arithmetic")]
    fn test_returns(code: &str, value: i64, expected: Value) {
        assert_eq!(run(code, value), Outcome::Returned(expected));
    }

    #[test]
    fn test_def_with_loop() {
        let code = "\
def test_function(value):
    total = 0
    i = 0
    while i < value:
        i += 1
        if i % 2 == 0:
            continue
        total += i
    return total
";
        assert_eq!(run(code, 5), Outcome::Returned(Value::Int(9)));
    }

    #[test]
    fn test_missing_return_is_none() {
        assert_eq!(run("x = value", 1), Outcome::Returned(Value::None));
    }

    #[test]
    fn test_unbound_local_is_classified() {
        let code = "\
def test_function(value):
    if value > 100:
        result = value
    return result
";
        assert_eq!(
            run(code, 1),
            Outcome::Fault(
                "UnboundLocalError: local variable 'result' referenced before assignment (line 4)"
                    .to_string()
            )
        );
    }

    #[test]
    fn test_name_error() {
        assert_eq!(
            run("return missing + 1", 1),
            Outcome::Fault("NameError: name 'missing' is not defined (line 1)".to_string())
        );
    }

    #[test]
    fn test_zero_division() {
        assert_eq!(
            run("x = 0\nreturn value / x", 1),
            Outcome::Fault("ZeroDivisionError: division by zero (line 2)".to_string())
        );
    }

    #[test]
    fn test_overflow_is_fault() {
        let outcome = run("return value * value", i64::MAX);
        assert!(matches!(outcome, Outcome::Fault(m) if m.starts_with("OverflowError")));
        let outcome = run("return value << 63", 1);
        assert!(matches!(outcome, Outcome::Fault(m) if m.starts_with("OverflowError")));
    }

    #[test]
    fn test_none_arithmetic_is_type_error() {
        let outcome = run("x = None\nreturn x + value", 1);
        assert_eq!(
            outcome,
            Outcome::Fault(
                "TypeError: unsupported operand type(s) for +: 'NoneType' and 'int' (line 2)"
                    .to_string()
            )
        );
    }

    #[test]
    fn test_missing_parameter() {
        let outcome = run("def f(other):\n    return other", 1);
        assert_eq!(
            outcome,
            Outcome::Fault("TypeError: f() missing required argument: 'other'".to_string())
        );
    }

    #[test]
    fn test_infinite_loop_times_out() {
        let program = parse_program("while True:\n    pass").unwrap();
        let outcome = run_program(
            &program,
            &BTreeMap::new(),
            Instant::now() + Duration::from_millis(50),
        );
        assert_eq!(outcome, Outcome::Timeout);
    }

    #[test]
    fn test_eval_expression_with_output() {
        let expr = super::super::parser::parse_expression("output == value * 2").unwrap();
        let vars = BTreeMap::from([
            ("value".to_string(), Value::Int(10)),
            ("output".to_string(), Value::Int(20)),
        ]);
        assert_eq!(eval_expression(&expr, &vars), Ok(Value::Bool(true)));
    }

    #[test]
    fn test_deep_tree_faults_instead_of_overflowing() {
        let mut expr = Expr::Name("value".to_string());
        for _ in 0..=MAX_EVAL_DEPTH {
            expr = Expr::Unary(UnaryOp::Neg, Box::new(expr));
        }
        let vars = BTreeMap::from([("value".to_string(), Value::Int(1))]);

        assert_eq!(
            eval_expression(&expr, &vars),
            Err("RecursionError: maximum recursion depth exceeded".to_string())
        );
    }

    #[test]
    fn test_depth_resets_between_statements() {
        let body = (0..200)
            .map(|i| format!("x{i} = ((((value))))"))
            .collect::<Vec<_>>()
            .join("\n");
        assert_eq!(
            run(&format!("{body}\nreturn x199"), 3),
            Outcome::Returned(Value::Int(3))
        );
    }

    #[test]
    fn test_none_equality() {
        let expr = super::super::parser::parse_expression("output == None").unwrap();
        let vars = BTreeMap::from([("output".to_string(), Value::None)]);
        assert_eq!(eval_expression(&expr, &vars), Ok(Value::Bool(true)));
    }
}
