//! Tokenizer and parser for candidate code.
//!
//! Each statement occupies one physical line. Blocks are delimited by
//! indentation, and `#` starts a comment that runs to the end of the line.

use std::fmt;

/// Deepest nesting of blocks, parentheses or prefix operators accepted.
pub const MAX_NESTING: usize = 64;

/// Longest expression accepted, in tokens. This also bounds the height of
/// left-leaning operator chains such as `1 + 1 + ... + 1`.
pub const MAX_EXPRESSION_TOKENS: usize = 512;

// ============================================================================
// Syntax Tree
// ============================================================================

/// Binary arithmetic operators.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinOp {
    /// `+`
    Add,
    /// `-`
    Sub,
    /// `*`
    Mul,
    /// `/`
    Div,
    /// `//`
    FloorDiv,
    /// `%`
    Mod,
    /// `<<`
    Shl,
}

impl BinOp {
    /// Source symbol.
    #[must_use]
    pub const fn symbol(self) -> &'static str {
        match self {
            Self::Add => "+",
            Self::Sub => "-",
            Self::Mul => "*",
            Self::Div => "/",
            Self::FloorDiv => "//",
            Self::Mod => "%",
            Self::Shl => "<<",
        }
    }
}

/// Comparison operators.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CmpOp {
    /// `==`
    Eq,
    /// `!=`
    Ne,
    /// `<`
    Lt,
    /// `<=`
    Le,
    /// `>`
    Gt,
    /// `>=`
    Ge,
}

impl CmpOp {
    /// Source symbol.
    #[must_use]
    pub const fn symbol(self) -> &'static str {
        match self {
            Self::Eq => "==",
            Self::Ne => "!=",
            Self::Lt => "<",
            Self::Le => "<=",
            Self::Gt => ">",
            Self::Ge => ">=",
        }
    }
}

/// Unary operators.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnaryOp {
    /// `-`
    Neg,
    /// `+`
    Pos,
    /// `not`
    Not,
}

/// Expression node.
#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    /// Integer literal.
    Int(i64),
    /// Float literal.
    Float(f64),
    /// `True` / `False`.
    Bool(bool),
    /// `None`.
    None,
    /// Variable reference.
    Name(String),
    /// Unary operation.
    Unary(UnaryOp, Box<Expr>),
    /// Binary operation.
    Binary(BinOp, Box<Expr>, Box<Expr>),
    /// Chained comparison `a < b <= c`.
    Compare(Box<Expr>, Vec<(CmpOp, Expr)>),
    /// Short-circuit `and`.
    And(Box<Expr>, Box<Expr>),
    /// Short-circuit `or`.
    Or(Box<Expr>, Box<Expr>),
    /// Builtin call.
    Call(String, Vec<Expr>),
}

/// Statement node. Every variant records its source line.
#[derive(Debug, Clone, PartialEq)]
pub enum Stmt {
    /// `name = value`
    Assign {
        /// Target.
        name: String,
        /// Assigned expression.
        value: Expr,
        /// Source line.
        line: usize,
    },
    /// `name op= value`
    AugAssign {
        /// Target.
        name: String,
        /// Operator.
        op: BinOp,
        /// Right-hand side.
        value: Expr,
        /// Source line.
        line: usize,
    },
    /// `if` / `elif` chain with optional `else`.
    If {
        /// Condition and body per branch.
        branches: Vec<(Expr, Vec<Stmt>)>,
        /// `else` body.
        orelse: Vec<Stmt>,
        /// Source line.
        line: usize,
    },
    /// `while cond:`
    While {
        /// Loop condition.
        cond: Expr,
        /// Loop body.
        body: Vec<Stmt>,
        /// Source line.
        line: usize,
    },
    /// `return [value]`
    Return {
        /// Returned expression.
        value: Option<Expr>,
        /// Source line.
        line: usize,
    },
    /// `break`
    Break {
        /// Source line.
        line: usize,
    },
    /// `continue`
    Continue {
        /// Source line.
        line: usize,
    },
    /// `pass`
    Pass,
    /// Bare expression, evaluated for its faults.
    Expr {
        /// Expression.
        value: Expr,
        /// Source line.
        line: usize,
    },
}

/// A parsed candidate.
#[derive(Debug, Clone, PartialEq)]
pub struct Program {
    /// Function name, if the code was wrapped in a `def`.
    pub name: Option<String>,
    /// Declared parameters. `None` for a bare body, which receives every input.
    pub params: Option<Vec<String>>,
    /// Statements.
    pub body: Vec<Stmt>,
}

/// A parse failure.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyntaxError {
    /// 1-based source line.
    pub line: usize,
    /// What went wrong.
    pub message: String,
}

impl fmt::Display for SyntaxError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SyntaxError: {} (line {})", self.message, self.line)
    }
}

impl std::error::Error for SyntaxError {}

fn syntax(line: usize, message: impl Into<String>) -> SyntaxError {
    SyntaxError {
        line,
        message: message.into(),
    }
}

// ============================================================================
// Tokens
// ============================================================================

#[derive(Debug, Clone, PartialEq)]
enum Token {
    Int(i64),
    Float(f64),
    Name(String),
    Sym(&'static str),
}

const SYMBOLS: [&str; 23] = [
    "//=", "<<", "//", "==", "!=", "<=", ">=", "+=", "-=", "*=", "%=", "+", "-", "*", "/", "%",
    "<", ">", "(", ")", ",", ":", "=",
];

const KEYWORDS: [&str; 17] = [
    "if", "elif", "else", "while", "return", "pass", "break", "continue", "def", "and", "or",
    "not", "True", "False", "None", "for", "in",
];

fn tokenize(text: &str, line: usize) -> Result<Vec<Token>, SyntaxError> {
    let mut tokens = Vec::new();
    let mut rest = text;

    'outer: while let Some(c) = rest.chars().next() {
        if c.is_whitespace() {
            rest = &rest[c.len_utf8()..];
            continue;
        }

        if c.is_ascii_digit() || (c == '.' && rest[1..].starts_with(|d: char| d.is_ascii_digit())) {
            let len = rest
                .find(|ch: char| !(ch.is_ascii_alphanumeric() || ch == '.' || ch == '_'))
                .unwrap_or(rest.len());
            let literal = rest[..len].replace('_', "");
            rest = &rest[len..];
            if literal.contains(['.', 'e', 'E']) {
                let value = literal
                    .parse::<f64>()
                    .map_err(|_| syntax(line, format!("invalid decimal literal '{literal}'")))?;
                tokens.push(Token::Float(value));
            } else {
                let value = literal
                    .parse::<i64>()
                    .map_err(|_| syntax(line, format!("invalid integer literal '{literal}'")))?;
                tokens.push(Token::Int(value));
            }
            continue;
        }

        if c.is_alphabetic() || c == '_' {
            let len = rest
                .find(|ch: char| !(ch.is_alphanumeric() || ch == '_'))
                .unwrap_or(rest.len());
            tokens.push(Token::Name(rest[..len].to_string()));
            rest = &rest[len..];
            continue;
        }

        for symbol in SYMBOLS {
            if rest.starts_with(symbol) {
                tokens.push(Token::Sym(symbol));
                rest = &rest[symbol.len()..];
                continue 'outer;
            }
        }

        return Err(syntax(line, format!("invalid character '{c}'")));
    }

    Ok(tokens)
}

// ============================================================================
// Lines And Blocks
// ============================================================================

#[derive(Debug)]
struct Line {
    number: usize,
    indent: usize,
    tokens: Vec<Token>,
}

fn logical_lines(code: &str) -> Result<Vec<Line>, SyntaxError> {
    let mut lines = Vec::new();
    for (idx, raw) in code.lines().enumerate() {
        let number = idx + 1;
        let text = raw.split('#').next().unwrap_or_default();
        if text.trim().is_empty() {
            continue;
        }
        let indent = text
            .chars()
            .take_while(|c| *c == ' ' || *c == '\t')
            .map(|c| if c == '\t' { 4 } else { 1 })
            .sum();
        lines.push(Line {
            number,
            indent,
            tokens: tokenize(text, number)?,
        });
    }
    Ok(lines)
}

/// Parse candidate code.
///
/// If a top-level `def` is present its body is the program and every other
/// top-level line is ignored. Otherwise the whole text is a bare body.
///
/// # Errors
///
/// Returns [`SyntaxError`] for malformed code.
pub fn parse_program(code: &str) -> Result<Program, SyntaxError> {
    let lines = logical_lines(code)?;
    if lines.is_empty() {
        return Ok(Program {
            name: None,
            params: None,
            body: Vec::new(),
        });
    }

    let def_at = lines
        .iter()
        .position(|l| l.indent == 0 && matches!(l.tokens.first(), Some(Token::Name(n)) if n == "def"));

    if let Some(start) = def_at {
        let header = &lines[start];
        let (name, params) = parse_def_header(header)?;
        let mut pos = start + 1;
        let body = parse_suite(&lines, &mut pos, header, 0)?;
        return Ok(Program {
            name: Some(name),
            params: Some(params),
            body,
        });
    }

    let base = lines[0].indent;
    let mut pos = 0;
    let body = parse_block(&lines, &mut pos, base, 0)?;
    if let Some(line) = lines.get(pos) {
        return Err(syntax(line.number, "unindent does not match any outer indentation level"));
    }
    Ok(Program {
        name: None,
        params: None,
        body,
    })
}

fn parse_def_header(line: &Line) -> Result<(String, Vec<String>), SyntaxError> {
    let err = || syntax(line.number, "invalid function definition");
    let tokens = &line.tokens;
    let name = match tokens.get(1) {
        Some(Token::Name(n)) if !KEYWORDS.contains(&n.as_str()) => n.clone(),
        _ => return Err(err()),
    };
    if tokens.get(2) != Some(&Token::Sym("(")) || tokens.last() != Some(&Token::Sym(":")) {
        return Err(err());
    }
    let inner = &tokens[3..tokens.len() - 1];
    let Some((Token::Sym(")"), params)) = inner.split_last() else {
        return Err(err());
    };

    let mut names = Vec::new();
    for (i, token) in params.iter().enumerate() {
        match (i % 2, token) {
            (0, Token::Name(n)) if !KEYWORDS.contains(&n.as_str()) => names.push(n.clone()),
            (1, Token::Sym(",")) => {}
            _ => return Err(err()),
        }
    }
    Ok((name, names))
}

fn parse_suite(
    lines: &[Line],
    pos: &mut usize,
    header: &Line,
    depth: usize,
) -> Result<Vec<Stmt>, SyntaxError> {
    match lines.get(*pos) {
        Some(next) if next.indent > header.indent => {
            if depth >= MAX_NESTING {
                return Err(syntax(header.number, "too many statically nested blocks"));
            }
            let indent = next.indent;
            parse_block(lines, pos, indent, depth + 1)
        }
        _ => Err(syntax(header.number, "expected an indented block")),
    }
}

fn parse_block(
    lines: &[Line],
    pos: &mut usize,
    indent: usize,
    depth: usize,
) -> Result<Vec<Stmt>, SyntaxError> {
    let mut body = Vec::new();
    while let Some(line) = lines.get(*pos) {
        if line.indent < indent {
            break;
        }
        if line.indent > indent {
            return Err(syntax(line.number, "unexpected indent"));
        }
        body.push(parse_statement(lines, pos, depth)?);
    }
    Ok(body)
}

fn keyword(tokens: &[Token]) -> Option<&str> {
    match tokens.first() {
        Some(Token::Name(n)) if KEYWORDS.contains(&n.as_str()) => Some(n.as_str()),
        _ => None,
    }
}

/// Split `if cond: rest` into the condition tokens and any inline body.
fn split_header(line: &Line) -> Result<(&[Token], &[Token]), SyntaxError> {
    let mut depth = 0_i32;
    for (i, token) in line.tokens.iter().enumerate() {
        match token {
            Token::Sym("(") => depth += 1,
            Token::Sym(")") => depth -= 1,
            Token::Sym(":") if depth == 0 => {
                return Ok((&line.tokens[1..i], &line.tokens[i + 1..]));
            }
            _ => {}
        }
    }
    Err(syntax(line.number, "expected ':'"))
}

fn parse_compound_body(
    lines: &[Line],
    pos: &mut usize,
    header: &Line,
    inline: &[Token],
    depth: usize,
) -> Result<Vec<Stmt>, SyntaxError> {
    *pos += 1;
    if inline.is_empty() {
        parse_suite(lines, pos, header, depth)
    } else {
        Ok(vec![parse_simple(inline, header.number)?])
    }
}

fn parse_statement(lines: &[Line], pos: &mut usize, depth: usize) -> Result<Stmt, SyntaxError> {
    let line = &lines[*pos];
    let number = line.number;

    match keyword(&line.tokens) {
        Some("if") => {
            let mut branches = Vec::new();
            let mut orelse = Vec::new();

            let (cond, inline) = split_header(line)?;
            let cond = parse_expr_tokens(cond, number)?;
            branches.push((cond, parse_compound_body(lines, pos, line, inline, depth)?));

            while let Some(next) = lines.get(*pos) {
                if next.indent != line.indent {
                    break;
                }
                match keyword(&next.tokens) {
                    Some("elif") => {
                        let (cond, inline) = split_header(next)?;
                        let cond = parse_expr_tokens(cond, next.number)?;
                        branches.push((cond, parse_compound_body(lines, pos, next, inline, depth)?));
                    }
                    Some("else") => {
                        let (cond, inline) = split_header(next)?;
                        if !cond.is_empty() {
                            return Err(syntax(next.number, "invalid syntax"));
                        }
                        orelse = parse_compound_body(lines, pos, next, inline, depth)?;
                        break;
                    }
                    _ => break,
                }
            }

            Ok(Stmt::If {
                branches,
                orelse,
                line: number,
            })
        }
        Some("while") => {
            let (cond, inline) = split_header(line)?;
            let cond = parse_expr_tokens(cond, number)?;
            let body = parse_compound_body(lines, pos, line, inline, depth)?;
            Ok(Stmt::While {
                cond,
                body,
                line: number,
            })
        }
        Some("elif" | "else") => Err(syntax(number, "invalid syntax")),
        Some("def") => Err(syntax(number, "nested functions are not supported")),
        Some("for") => Err(syntax(number, "'for' loops are not supported")),
        _ => {
            *pos += 1;
            parse_simple(&line.tokens, number)
        }
    }
}

fn parse_simple(tokens: &[Token], line: usize) -> Result<Stmt, SyntaxError> {
    match keyword(tokens) {
        Some("return") => {
            let value = if tokens.len() > 1 {
                Some(parse_expr_tokens(&tokens[1..], line)?)
            } else {
                None
            };
            return Ok(Stmt::Return { value, line });
        }
        Some("pass") if tokens.len() == 1 => return Ok(Stmt::Pass),
        Some("break") if tokens.len() == 1 => return Ok(Stmt::Break { line }),
        Some("continue") if tokens.len() == 1 => return Ok(Stmt::Continue { line }),
        Some("if" | "while" | "elif" | "else" | "def" | "for") => {
            return Err(syntax(line, "compound statement not allowed here"));
        }
        _ => {}
    }

    if let [Token::Name(name), Token::Sym(op), rest @ ..] = tokens {
        let aug = match *op {
            "+=" => Some(BinOp::Add),
            "-=" => Some(BinOp::Sub),
            "*=" => Some(BinOp::Mul),
            "//=" => Some(BinOp::FloorDiv),
            "%=" => Some(BinOp::Mod),
            _ => None,
        };
        if *op == "=" || aug.is_some() {
            if KEYWORDS.contains(&name.as_str()) {
                return Err(syntax(line, format!("cannot assign to {name}")));
            }
            let value = parse_expr_tokens(rest, line)?;
            return Ok(match aug {
                Some(op) => Stmt::AugAssign {
                    name: name.clone(),
                    op,
                    value,
                    line,
                },
                None => Stmt::Assign {
                    name: name.clone(),
                    value,
                    line,
                },
            });
        }
    }

    Ok(Stmt::Expr {
        value: parse_expr_tokens(tokens, line)?,
        line,
    })
}

// ============================================================================
// Expressions
// ============================================================================

/// Parse a standalone expression, such as a pass criterion.
///
/// # Errors
///
/// Returns [`SyntaxError`] (reported on line 1) for malformed input.
pub fn parse_expression(text: &str) -> Result<Expr, SyntaxError> {
    let tokens = tokenize(text, 1)?;
    parse_expr_tokens(&tokens, 1)
}

fn parse_expr_tokens(tokens: &[Token], line: usize) -> Result<Expr, SyntaxError> {
    if tokens.is_empty() {
        return Err(syntax(line, "expected an expression"));
    }
    if tokens.len() > MAX_EXPRESSION_TOKENS {
        return Err(syntax(line, "expression is too long"));
    }
    let mut parser = ExprParser {
        tokens,
        pos: 0,
        line,
        depth: 0,
    };
    let expr = parser.or()?;
    if parser.pos != tokens.len() {
        return Err(syntax(line, "invalid syntax"));
    }
    Ok(expr)
}

struct ExprParser<'a> {
    tokens: &'a [Token],
    pos: usize,
    line: usize,
    depth: usize,
}

impl ExprParser<'_> {
    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos)
    }

    fn eat_sym(&mut self, symbol: &str) -> bool {
        if matches!(self.peek(), Some(Token::Sym(s)) if *s == symbol) {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    fn eat_keyword(&mut self, word: &str) -> bool {
        if matches!(self.peek(), Some(Token::Name(n)) if n == word) {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    fn error(&self) -> SyntaxError {
        syntax(self.line, "invalid syntax")
    }

    fn nested(
        &mut self,
        rule: fn(&mut Self) -> Result<Expr, SyntaxError>,
    ) -> Result<Expr, SyntaxError> {
        if self.depth >= MAX_NESTING {
            return Err(syntax(self.line, "too many nested parentheses"));
        }
        self.depth += 1;
        let expr = rule(self);
        self.depth -= 1;
        expr
    }

    fn or(&mut self) -> Result<Expr, SyntaxError> {
        let mut left = self.and()?;
        while self.eat_keyword("or") {
            let right = self.and()?;
            left = Expr::Or(Box::new(left), Box::new(right));
        }
        Ok(left)
    }

    fn and(&mut self) -> Result<Expr, SyntaxError> {
        let mut left = self.not()?;
        while self.eat_keyword("and") {
            let right = self.not()?;
            left = Expr::And(Box::new(left), Box::new(right));
        }
        Ok(left)
    }

    fn not(&mut self) -> Result<Expr, SyntaxError> {
        if self.eat_keyword("not") {
            let operand = self.nested(Self::not)?;
            return Ok(Expr::Unary(UnaryOp::Not, Box::new(operand)));
        }
        self.comparison()
    }

    fn comparison(&mut self) -> Result<Expr, SyntaxError> {
        let first = self.shift()?;
        let mut chain = Vec::new();
        loop {
            let op = match self.peek() {
                Some(Token::Sym("==")) => CmpOp::Eq,
                Some(Token::Sym("!=")) => CmpOp::Ne,
                Some(Token::Sym("<")) => CmpOp::Lt,
                Some(Token::Sym("<=")) => CmpOp::Le,
                Some(Token::Sym(">")) => CmpOp::Gt,
                Some(Token::Sym(">=")) => CmpOp::Ge,
                _ => break,
            };
            self.pos += 1;
            chain.push((op, self.shift()?));
        }
        if chain.is_empty() {
            Ok(first)
        } else {
            Ok(Expr::Compare(Box::new(first), chain))
        }
    }

    fn binary_level(
        &mut self,
        ops: &[(&str, BinOp)],
        next: fn(&mut Self) -> Result<Expr, SyntaxError>,
    ) -> Result<Expr, SyntaxError> {
        let mut left = next(self)?;
        'scan: loop {
            for (symbol, op) in ops {
                if self.eat_sym(symbol) {
                    let right = next(self)?;
                    left = Expr::Binary(*op, Box::new(left), Box::new(right));
                    continue 'scan;
                }
            }
            return Ok(left);
        }
    }

    fn shift(&mut self) -> Result<Expr, SyntaxError> {
        self.binary_level(&[("<<", BinOp::Shl)], Self::arith)
    }

    fn arith(&mut self) -> Result<Expr, SyntaxError> {
        self.binary_level(&[("+", BinOp::Add), ("-", BinOp::Sub)], Self::term)
    }

    fn term(&mut self) -> Result<Expr, SyntaxError> {
        self.binary_level(
            &[
                ("*", BinOp::Mul),
                ("//", BinOp::FloorDiv),
                ("/", BinOp::Div),
                ("%", BinOp::Mod),
            ],
            Self::unary,
        )
    }

    fn unary(&mut self) -> Result<Expr, SyntaxError> {
        let op = if self.eat_sym("-") {
            UnaryOp::Neg
        } else if self.eat_sym("+") {
            UnaryOp::Pos
        } else {
            return self.atom();
        };
        let operand = self.nested(Self::unary)?;
        Ok(Expr::Unary(op, Box::new(operand)))
    }

    fn atom(&mut self) -> Result<Expr, SyntaxError> {
        let token = self.peek().cloned().ok_or_else(|| self.error())?;
        self.pos += 1;
        match token {
            Token::Int(v) => Ok(Expr::Int(v)),
            Token::Float(v) => Ok(Expr::Float(v)),
            Token::Sym("(") => {
                let inner = self.nested(Self::or)?;
                if self.eat_sym(")") {
                    Ok(inner)
                } else {
                    Err(syntax(self.line, "'(' was never closed"))
                }
            }
            Token::Name(name) => match name.as_str() {
                "True" => Ok(Expr::Bool(true)),
                "False" => Ok(Expr::Bool(false)),
                "None" => Ok(Expr::None),
                word if KEYWORDS.contains(&word) => Err(self.error()),
                _ if self.eat_sym("(") => {
                    let mut args = Vec::new();
                    if !self.eat_sym(")") {
                        loop {
                            args.push(self.nested(Self::or)?);
                            if self.eat_sym(")") {
                                break;
                            }
                            if !self.eat_sym(",") {
                                return Err(self.error());
                            }
                        }
                    }
                    Ok(Expr::Call(name, args))
                }
                _ => Ok(Expr::Name(name)),
            },
            Token::Sym(_) => Err(self.error()),
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn name(n: &str) -> Box<Expr> {
        Box::new(Expr::Name(n.to_string()))
    }

    #[test]
    fn test_parse_shift_expression() {
        let expr = parse_expression("value << 1").unwrap();
        assert_eq!(
            expr,
            Expr::Binary(BinOp::Shl, name("value"), Box::new(Expr::Int(1)))
        );
    }

    #[test]
    fn test_precedence_mul_over_add() {
        let expr = parse_expression("1 + 2 * 3").unwrap();
        assert_eq!(
            expr,
            Expr::Binary(
                BinOp::Add,
                Box::new(Expr::Int(1)),
                Box::new(Expr::Binary(
                    BinOp::Mul,
                    Box::new(Expr::Int(2)),
                    Box::new(Expr::Int(3))
                ))
            )
        );
    }

    #[test]
    fn test_chained_comparison() {
        let expr = parse_expression("0 <= output < 100").unwrap();
        assert!(matches!(expr, Expr::Compare(_, chain) if chain.len() == 2));
    }

    #[test]
    fn test_floor_div_is_one_token() {
        let expr = parse_expression("a // 2").unwrap();
        assert!(matches!(expr, Expr::Binary(BinOp::FloorDiv, _, _)));
    }

    #[test]
    fn test_parse_def_program() {
        let code = "def test_function(value, scale):\n    result = value * scale\n    return result\n";
        let program = parse_program(code).unwrap();
        assert_eq!(program.name.as_deref(), Some("test_function"));
        assert_eq!(
            program.params,
            Some(vec!["value".to_string(), "scale".to_string()])
        );
        assert_eq!(program.body.len(), 2);
    }

    #[test]
    fn test_parse_bare_body() {
        let program = parse_program("return value << 1").unwrap();
        assert_eq!(program.params, None);
        assert!(matches!(
            program.body.as_slice(),
            [Stmt::Return { value: Some(_), line: 1 }]
        ));
    }

    #[test]
    fn test_if_elif_else_chain() {
        let code = "\
def f(x):
    if x > 10:
        return 1
    elif x > 5:
        return 2
    else:
        return 3
";
        let program = parse_program(code).unwrap();
        assert!(matches!(
            &program.body[0],
            Stmt::If { branches, orelse, .. } if branches.len() == 2 && orelse.len() == 1
        ));
    }

    #[test]
    fn test_inline_suite() {
        let program = parse_program("if value > 0: return 1\nreturn 0").unwrap();
        assert_eq!(program.body.len(), 2);
    }

    #[test]
    fn test_comments_and_blank_lines_skipped() {
        let code = "# header\n\nx = 1  # set x\n\nreturn x\n";
        let program = parse_program(code).unwrap();
        assert_eq!(program.body.len(), 2);
    }

    #[test]
    fn test_top_level_lines_outside_def_ignored() {
        let code = "def f(value):\n    return value\n\nprint(f(10))\n";
        let program = parse_program(code).unwrap();
        assert_eq!(program.body.len(), 1);
    }

    #[test]
    fn test_missing_block_reports_line() {
        let err = parse_program("def f(x):\n    if x:\n    return 1").unwrap_err();
        assert_eq!(err.line, 2);
        assert_eq!(
            err.to_string(),
            "SyntaxError: expected an indented block (line 2)"
        );
    }

    #[test]
    fn test_unexpected_indent() {
        let err = parse_program("x = 1\n    y = 2").unwrap_err();
        assert_eq!(err.message, "unexpected indent");
    }

    #[test]
    fn test_invalid_character() {
        let err = parse_expression("value $ 2").unwrap_err();
        assert!(err.message.contains("invalid character"));
    }

    #[test]
    fn test_dangling_operator() {
        assert!(parse_expression("value *").is_err());
    }

    #[test]
    fn test_aug_assign() {
        let program = parse_program("total += 2").unwrap();
        assert!(matches!(
            &program.body[0],
            Stmt::AugAssign { op: BinOp::Add, .. }
        ));
    }

    #[test]
    fn test_deep_parentheses_are_rejected() {
        let text = format!("output == {}1{}", "(".repeat(200), ")".repeat(200));
        let err = parse_expression(&text).unwrap_err();
        assert_eq!(err.message, "too many nested parentheses");

        let text = format!("{}1{}", "(".repeat(MAX_NESTING), ")".repeat(MAX_NESTING));
        assert_eq!(parse_expression(&text).unwrap(), Expr::Int(1));
    }

    #[test]
    fn test_huge_inputs_fail_without_overflowing() {
        let text = format!("output == {}1{}", "(".repeat(200_000), ")".repeat(200_000));
        assert!(parse_expression(&text).is_err());

        let code = format!("return {}value", "-".repeat(200_000));
        assert_eq!(
            parse_program(&code).unwrap_err().message,
            "expression is too long"
        );

        let chain = vec!["1"; 100_000].join(" + ");
        assert!(parse_expression(&chain).is_err());
    }

    #[test]
    fn test_prefix_operator_chain_is_bounded() {
        let text = format!("{}value", "not ".repeat(MAX_NESTING + 1));
        let err = parse_expression(&text).unwrap_err();
        assert_eq!(err.message, "too many nested parentheses");
    }

    #[test]
    fn test_deep_blocks_are_rejected() {
        let mut code = String::new();
        for level in 0..=MAX_NESTING {
            code.push_str(&" ".repeat(level));
            code.push_str("if value:\n");
        }
        code.push_str(&" ".repeat(MAX_NESTING + 1));
        code.push_str("return 1\n");

        let err = parse_program(&code).unwrap_err();
        assert_eq!(err.message, "too many statically nested blocks");
    }

    #[test]
    fn test_call_arguments() {
        let expr = parse_expression("max(a, b, 3)").unwrap();
        assert!(matches!(expr, Expr::Call(ref f, ref args) if f == "max" && args.len() == 3));
    }
}
