//! Row-filter expressions.
//!
//! A small infix language evaluated once per table row, where identifiers
//! name columns:
//!
//! ```text
//! max_value > 25 && !(time_step % 4 == 0)
//! label == "ar" ? cells >= 10 : cells >= 50
//! ```
//!
//! Operators by increasing precedence: `?:`, `||`, `&&`, `== !=`,
//! `< <= > >=`, `+ -`, `* / %`, unary `! -`. Literals are numbers, quoted
//! strings, `true` and `false`.

use crate::error::ExprError;
use crate::table::{Schema, Table};
use crate::value::Value;
use ordered_float::OrderedFloat;
use std::collections::BTreeSet;
use std::fmt::{Display, Formatter, Result as FormatResult};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum UnaryOp {
    Not,
    Neg,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BinaryOp {
    Or,
    And,
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
    Add,
    Sub,
    Mul,
    Div,
    Rem,
}

impl BinaryOp {
    fn symbol(self) -> &'static str {
        match self {
            BinaryOp::Or => "||",
            BinaryOp::And => "&&",
            BinaryOp::Eq => "==",
            BinaryOp::Ne => "!=",
            BinaryOp::Lt => "<",
            BinaryOp::Le => "<=",
            BinaryOp::Gt => ">",
            BinaryOp::Ge => ">=",
            BinaryOp::Add => "+",
            BinaryOp::Sub => "-",
            BinaryOp::Mul => "*",
            BinaryOp::Div => "/",
            BinaryOp::Rem => "%",
        }
    }
}

/// Parsed expression tree.
#[derive(Clone, Debug, PartialEq)]
pub enum Expr {
    Literal(Value),
    Column(String),
    Unary(UnaryOp, Box<Expr>),
    Binary(BinaryOp, Box<Expr>, Box<Expr>),
    Conditional(Box<Expr>, Box<Expr>, Box<Expr>),
}

impl Expr {
    /// Parse an expression.
    ///
    /// # Errors
    /// Returns an [`ExprError`] describing the first syntax error.
    pub fn parse(source: &str) -> Result<Self, ExprError> {
        let tokens = tokenize(source)?;
        let mut parser = Parser { tokens, pos: 0 };
        let expr = parser.conditional()?;
        parser.expect(&Token::End, "end of expression")?;
        Ok(expr)
    }

    /// Columns the expression reads.
    #[must_use]
    pub fn columns(&self) -> BTreeSet<&str> {
        let mut out = BTreeSet::new();
        self.collect_columns(&mut out);
        out
    }

    fn collect_columns<'a>(&'a self, out: &mut BTreeSet<&'a str>) {
        match self {
            Expr::Literal(_) => {}
            Expr::Column(name) => {
                out.insert(name);
            }
            Expr::Unary(_, e) => e.collect_columns(out),
            Expr::Binary(_, l, r) => {
                l.collect_columns(out);
                r.collect_columns(out);
            }
            Expr::Conditional(c, t, f) => {
                c.collect_columns(out);
                t.collect_columns(out);
                f.collect_columns(out);
            }
        }
    }

    /// Evaluate against one row laid out as `schema`.
    ///
    /// # Errors
    /// Returns an [`ExprError`] for unknown columns or ill-typed operands.
    pub fn evaluate(&self, schema: &Schema, row: &[Value]) -> Result<Value, ExprError> {
        match self {
            Expr::Literal(v) => Ok(v.clone()),
            Expr::Column(name) => schema
                .index_of(name)
                .and_then(|i| row.get(i))
                .cloned()
                .ok_or_else(|| ExprError::UnknownColumn(name.clone())),
            Expr::Unary(UnaryOp::Not, e) => {
                let v = e.evaluate(schema, row)?;
                Ok(Value::Bool(!truthy("!", &v)?))
            }
            Expr::Unary(UnaryOp::Neg, e) => match e.evaluate(schema, row)? {
                Value::Int(i) => Ok(Value::Int(-i)),
                Value::Float(f) => Ok(Value::Float(-f)),
                other => Err(ExprError::Operand {
                    op: "-".into(),
                    operand: other.type_name(),
                }),
            },
            Expr::Binary(BinaryOp::And, l, r) => {
                let lv = l.evaluate(schema, row)?;
                if !truthy("&&", &lv)? {
                    return Ok(Value::Bool(false));
                }
                Ok(Value::Bool(truthy("&&", &r.evaluate(schema, row)?)?))
            }
            Expr::Binary(BinaryOp::Or, l, r) => {
                let lv = l.evaluate(schema, row)?;
                if truthy("||", &lv)? {
                    return Ok(Value::Bool(true));
                }
                Ok(Value::Bool(truthy("||", &r.evaluate(schema, row)?)?))
            }
            Expr::Binary(op, l, r) => binary(*op, &l.evaluate(schema, row)?, &r.evaluate(schema, row)?),
            Expr::Conditional(c, t, f) => {
                if truthy("?", &c.evaluate(schema, row)?)? {
                    t.evaluate(schema, row)
                } else {
                    f.evaluate(schema, row)
                }
            }
        }
    }

    /// One boolean per row of `table`: whether the expression holds.
    ///
    /// Column names are checked up front, so an unknown column is reported
    /// even for a zero-row table.
    ///
    /// # Errors
    /// Returns an [`ExprError`] for unknown columns or ill-typed operands.
    pub fn mask(&self, table: &Table) -> Result<Vec<bool>, ExprError> {
        if let Some(missing) = self.columns().into_iter().find(|c| table.schema().index_of(c).is_none()) {
            return Err(ExprError::UnknownColumn(missing.to_string()));
        }
        table
            .rows()
            .map(|row| truthy("?", &self.evaluate(table.schema(), &row)?))
            .collect()
    }
}

impl Display for Expr {
    fn fmt(&self, f: &mut Formatter<'_>) -> FormatResult {
        match self {
            Expr::Literal(v) => write!(f, "{v}"),
            Expr::Column(name) => write!(f, "{name}"),
            Expr::Unary(UnaryOp::Not, e) => write!(f, "!{e}"),
            Expr::Unary(UnaryOp::Neg, e) => write!(f, "-{e}"),
            Expr::Binary(op, l, r) => write!(f, "({l} {} {r})", op.symbol()),
            Expr::Conditional(c, t, e) => write!(f, "({c} ? {t} : {e})"),
        }
    }
}

fn truthy(op: &str, v: &Value) -> Result<bool, ExprError> {
    match v {
        Value::Bool(b) => Ok(*b),
        Value::Int(i) => Ok(*i != 0),
        Value::Float(x) => Ok(x.0 != 0.0),
        other => Err(ExprError::Operand {
            op: op.to_string(),
            operand: other.type_name(),
        }),
    }
}

fn binary(op: BinaryOp, l: &Value, r: &Value) -> Result<Value, ExprError> {
    let mismatch = || ExprError::Operands {
        op: op.symbol().to_string(),
        left: l.type_name(),
        right: r.type_name(),
    };

    match (op, l, r) {
        (BinaryOp::Eq | BinaryOp::Ne, Value::Str(a), Value::Str(b)) => Ok(Value::Bool((a == b) == (op == BinaryOp::Eq))),
        (BinaryOp::Eq | BinaryOp::Ne, Value::Bool(a), Value::Bool(b)) => {
            Ok(Value::Bool((a == b) == (op == BinaryOp::Eq)))
        }
        (BinaryOp::Lt | BinaryOp::Le | BinaryOp::Gt | BinaryOp::Ge, Value::Str(a), Value::Str(b)) => {
            Ok(Value::Bool(compare(op, a.cmp(b))))
        }
        (BinaryOp::Add, Value::Str(a), Value::Str(b)) => Ok(Value::Str(format!("{a}{b}"))),
        (BinaryOp::Add | BinaryOp::Sub | BinaryOp::Mul | BinaryOp::Rem, Value::Int(a), Value::Int(b)) => {
            let out = match op {
                BinaryOp::Add => a.checked_add(*b),
                BinaryOp::Sub => a.checked_sub(*b),
                BinaryOp::Mul => a.checked_mul(*b),
                _ => a.checked_rem(*b),
            };
            // overflow and `% 0` fall back to float semantics
            Ok(out.map_or_else(|| float_arith(op, l, r), Value::Int))
        }
        (_, Value::Int(_) | Value::Float(_), Value::Int(_) | Value::Float(_)) => match op {
            BinaryOp::Eq | BinaryOp::Ne | BinaryOp::Lt | BinaryOp::Le | BinaryOp::Gt | BinaryOp::Ge => {
                let (a, b) = (l.as_f64().ok_or_else(mismatch)?, r.as_f64().ok_or_else(mismatch)?);
                let ord = OrderedFloat(a).cmp(&OrderedFloat(b));
                Ok(Value::Bool(compare(op, ord)))
            }
            _ => Ok(float_arith(op, l, r)),
        },
        _ => Err(mismatch()),
    }
}

fn float_arith(op: BinaryOp, l: &Value, r: &Value) -> Value {
    let a = l.as_f64().unwrap_or(f64::NAN);
    let b = r.as_f64().unwrap_or(f64::NAN);
    let out = match op {
        BinaryOp::Add => a + b,
        BinaryOp::Sub => a - b,
        BinaryOp::Mul => a * b,
        BinaryOp::Div => a / b,
        BinaryOp::Rem => a % b,
        _ => f64::NAN,
    };
    Value::from(out)
}

fn compare(op: BinaryOp, ord: std::cmp::Ordering) -> bool {
    match op {
        BinaryOp::Eq => ord.is_eq(),
        BinaryOp::Ne => ord.is_ne(),
        BinaryOp::Lt => ord.is_lt(),
        BinaryOp::Le => ord.is_le(),
        BinaryOp::Gt => ord.is_gt(),
        BinaryOp::Ge => ord.is_ge(),
        _ => false,
    }
}

// ---------- lexer ----------

#[derive(Clone, Debug, PartialEq)]
enum Token {
    Num(f64, bool),
    Str(String),
    Ident(String),
    Op(&'static str),
    LParen,
    RParen,
    Question,
    Colon,
    End,
}

impl Display for Token {
    fn fmt(&self, f: &mut Formatter<'_>) -> FormatResult {
        match self {
            Token::Num(n, _) => write!(f, "number {n}"),
            Token::Str(s) => write!(f, "string {s:?}"),
            Token::Ident(name) => write!(f, "'{name}'"),
            Token::Op(op) => write!(f, "'{op}'"),
            Token::LParen => write!(f, "'('"),
            Token::RParen => write!(f, "')'"),
            Token::Question => write!(f, "'?'"),
            Token::Colon => write!(f, "':'"),
            Token::End => write!(f, "end of expression"),
        }
    }
}

const OPERATORS: [&str; 16] = [
    "&&", "||", "==", "!=", "<=", ">=", "<", ">", "+", "-", "*", "/", "%", "!", "=", "&",
];

fn tokenize(source: &str) -> Result<Vec<(Token, usize)>, ExprError> {
    let chars: Vec<(usize, char)> = source.char_indices().collect();
    let mut tokens = Vec::new();
    let mut i = 0;
    while i < chars.len() {
        let (offset, ch) = chars[i];
        if ch.is_whitespace() {
            i += 1;
            continue;
        }
        if ch.is_ascii_digit() || (ch == '.' && chars.get(i + 1).is_some_and(|(_, c)| c.is_ascii_digit())) {
            let start = i;
            while i < chars.len() && (chars[i].1.is_ascii_alphanumeric() || chars[i].1 == '.') {
                // exponent sign, as in 1e-3
                if matches!(chars[i].1, 'e' | 'E') && chars.get(i + 1).is_some_and(|(_, c)| *c == '-' || *c == '+') {
                    i += 1;
                }
                i += 1;
            }
            let end = chars.get(i).map_or(source.len(), |(o, _)| *o);
            let text = &source[offset..end];
            let is_int = !text.contains(['.', 'e', 'E']);
            let value = text.parse::<f64>().map_err(|_| ExprError::Syntax {
                expected: "a number".into(),
                found: text.to_string(),
                offset: chars[start].0,
            })?;
            tokens.push((Token::Num(value, is_int), offset));
            continue;
        }
        if ch.is_alphabetic() || ch == '_' {
            let start = offset;
            while i < chars.len() && (chars[i].1.is_alphanumeric() || chars[i].1 == '_' || chars[i].1 == '.') {
                i += 1;
            }
            let end = chars.get(i).map_or(source.len(), |(o, _)| *o);
            tokens.push((Token::Ident(source[start..end].to_string()), start));
            continue;
        }
        if ch == '"' || ch == '\'' {
            let quote = ch;
            let mut text = String::new();
            i += 1;
            loop {
                let Some(&(_, c)) = chars.get(i) else {
                    return Err(ExprError::UnterminatedString(offset));
                };
                i += 1;
                if c == quote {
                    break;
                }
                text.push(c);
            }
            tokens.push((Token::Str(text), offset));
            continue;
        }
        let single = match ch {
            '(' => Some(Token::LParen),
            ')' => Some(Token::RParen),
            '?' => Some(Token::Question),
            ':' => Some(Token::Colon),
            _ => None,
        };
        if let Some(token) = single {
            tokens.push((token, offset));
            i += 1;
            continue;
        }
        let rest = &source[offset..];
        let Some(op) = OPERATORS.iter().find(|op| rest.starts_with(**op)) else {
            return Err(ExprError::UnexpectedChar { ch, offset });
        };
        if *op == "=" || *op == "&" {
            return Err(ExprError::UnexpectedChar { ch, offset });
        }
        tokens.push((Token::Op(op), offset));
        i += op.len();
    }
    tokens.push((Token::End, source.len()));
    Ok(tokens)
}

// ---------- parser ----------

struct Parser {
    tokens: Vec<(Token, usize)>,
    pos: usize,
}

impl Parser {
    fn peek(&self) -> &Token {
        &self.tokens[self.pos.min(self.tokens.len() - 1)].0
    }

    fn offset(&self) -> usize {
        self.tokens[self.pos.min(self.tokens.len() - 1)].1
    }

    fn bump(&mut self) -> Token {
        let token = self.peek().clone();
        if self.pos < self.tokens.len() - 1 {
            self.pos += 1;
        }
        token
    }

    fn expect(&mut self, token: &Token, what: &str) -> Result<(), ExprError> {
        if self.peek() == token {
            self.bump();
            Ok(())
        } else {
            Err(ExprError::Syntax {
                expected: what.to_string(),
                found: self.peek().to_string(),
                offset: self.offset(),
            })
        }
    }

    fn eat_op(&mut self, ops: &[(&str, BinaryOp)]) -> Option<BinaryOp> {
        let Token::Op(sym) = self.peek() else {
            return None;
        };
        let op = ops.iter().find(|(s, _)| s == sym).map(|(_, op)| *op)?;
        self.bump();
        Some(op)
    }

    fn conditional(&mut self) -> Result<Expr, ExprError> {
        let cond = self.binary_level(0)?;
        if self.peek() != &Token::Question {
            return Ok(cond);
        }
        self.bump();
        let then = self.conditional()?;
        self.expect(&Token::Colon, "':'")?;
        let otherwise = self.conditional()?;
        Ok(Expr::Conditional(Box::new(cond), Box::new(then), Box::new(otherwise)))
    }

    fn binary_level(&mut self, level: usize) -> Result<Expr, ExprError> {
        const LEVELS: [&[(&str, BinaryOp)]; 6] = [
            &[("||", BinaryOp::Or)],
            &[("&&", BinaryOp::And)],
            &[("==", BinaryOp::Eq), ("!=", BinaryOp::Ne)],
            &[
                ("<", BinaryOp::Lt),
                ("<=", BinaryOp::Le),
                (">", BinaryOp::Gt),
                (">=", BinaryOp::Ge),
            ],
            &[("+", BinaryOp::Add), ("-", BinaryOp::Sub)],
            &[("*", BinaryOp::Mul), ("/", BinaryOp::Div), ("%", BinaryOp::Rem)],
        ];
        if level == LEVELS.len() {
            return self.unary();
        }
        let mut lhs = self.binary_level(level + 1)?;
        while let Some(op) = self.eat_op(LEVELS[level]) {
            let rhs = self.binary_level(level + 1)?;
            lhs = Expr::Binary(op, Box::new(lhs), Box::new(rhs));
        }
        Ok(lhs)
    }

    fn unary(&mut self) -> Result<Expr, ExprError> {
        match self.peek() {
            Token::Op("!") => {
                self.bump();
                Ok(Expr::Unary(UnaryOp::Not, Box::new(self.unary()?)))
            }
            Token::Op("-") => {
                self.bump();
                Ok(Expr::Unary(UnaryOp::Neg, Box::new(self.unary()?)))
            }
            _ => self.primary(),
        }
    }

    #[allow(clippy::cast_possible_truncation)]
    fn primary(&mut self) -> Result<Expr, ExprError> {
        let offset = self.offset();
        match self.bump() {
            Token::Num(n, true) if n.abs() < 9.0e15 => Ok(Expr::Literal(Value::Int(n as i64))),
            Token::Num(n, _) => Ok(Expr::Literal(Value::from(n))),
            Token::Str(s) => Ok(Expr::Literal(Value::Str(s))),
            Token::Ident(name) if name == "true" => Ok(Expr::Literal(Value::Bool(true))),
            Token::Ident(name) if name == "false" => Ok(Expr::Literal(Value::Bool(false))),
            Token::Ident(name) => Ok(Expr::Column(name)),
            Token::LParen => {
                let inner = self.conditional()?;
                self.expect(&Token::RParen, "')'")?;
                Ok(inner)
            }
            other => Err(ExprError::Syntax {
                expected: "a value, column or '('".into(),
                found: other.to_string(),
                offset,
            }),
        }
    }
}
