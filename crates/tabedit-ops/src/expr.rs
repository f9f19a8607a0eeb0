//! Row-wise formula and predicate language
//!
//! Grammar, lowest precedence first:
//!
//! ```text
//! or      := and ("or" and)*
//! and     := not ("and" not)*
//! not     := "not" not | compare
//! compare := sum (("=" | "!=" | "<" | "<=" | ">" | ">=") sum)?
//! sum     := product (("+" | "-") product)*
//! product := unary (("*" | "/") unary)*
//! unary   := "-" unary | primary
//! primary := number | string | true | false | null | column | "(" or ")"
//! column  := identifier | "[" any text "]"
//! ```

use crate::error::{EvalError, ExprError};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::fmt::{self, Display, Formatter};
use tabedit_table::{Table, Value};

/// Unary operators
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnaryOp {
    Neg,
    Not,
}

/// Binary operators
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinaryOp {
    Add,
    Sub,
    Mul,
    Div,
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
    And,
    Or,
}

impl BinaryOp {
    fn symbol(self) -> &'static str {
        match self {
            Self::Add => "+",
            Self::Sub => "-",
            Self::Mul => "*",
            Self::Div => "/",
            Self::Eq => "=",
            Self::Ne => "!=",
            Self::Lt => "<",
            Self::Le => "<=",
            Self::Gt => ">",
            Self::Ge => ">=",
            Self::And => "and",
            Self::Or => "or",
        }
    }
}

/// Parsed expression tree
#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    Literal(Value),
    Column(String),
    Unary {
        op: UnaryOp,
        expr: Box<Expr>,
    },
    Binary {
        op: BinaryOp,
        left: Box<Expr>,
        right: Box<Expr>,
    },
}

impl Expr {
    fn collect_columns<'a>(&'a self, out: &mut Vec<&'a str>) {
        match self {
            Self::Literal(_) => {}
            Self::Column(name) => {
                if !out.contains(&name.as_str()) {
                    out.push(name);
                }
            }
            Self::Unary { expr, .. } => expr.collect_columns(out),
            Self::Binary { left, right, .. } => {
                left.collect_columns(out);
                right.collect_columns(out);
            }
        }
    }

    fn eval(&self, table: &Table, row: usize) -> Result<Value, EvalError> {
        match self {
            Self::Literal(v) => Ok(v.clone()),
            Self::Column(name) => {
                let column = table
                    .resolve_column(name)
                    .ok_or_else(|| EvalError::UnknownColumn(name.clone()))?;
                Ok(table.cell(row, column).clone())
            }
            Self::Unary { op, expr } => {
                let value = expr.eval(table, row)?;
                match (op, value) {
                    (_, Value::Null) => Ok(Value::Null),
                    (UnaryOp::Neg, Value::Number(n)) => Ok(Value::Number(-n)),
                    (UnaryOp::Not, Value::Bool(b)) => Ok(Value::Bool(!b)),
                    (UnaryOp::Neg, other) => Err(EvalError::type_mismatch("-", &other, &other)),
                    (UnaryOp::Not, other) => Err(EvalError::type_mismatch("not", &other, &other)),
                }
            }
            Self::Binary { op, left, right } => {
                let lhs = left.eval(table, row)?;
                // short-circuit logic before evaluating the right side
                match (op, &lhs) {
                    (BinaryOp::And, Value::Bool(false) | Value::Null) => {
                        return Ok(Value::Bool(false))
                    }
                    (BinaryOp::Or, Value::Bool(true)) => return Ok(Value::Bool(true)),
                    _ => {}
                }
                let rhs = right.eval(table, row)?;
                binary(*op, &lhs, &rhs)
            }
        }
    }
}

fn binary(op: BinaryOp, lhs: &Value, rhs: &Value) -> Result<Value, EvalError> {
    use BinaryOp as B;
    match op {
        B::Add | B::Sub | B::Mul | B::Div => arithmetic(op, lhs, rhs),
        B::Eq | B::Ne => {
            let equal = match (lhs, rhs) {
                (Value::Null, Value::Null) => true,
                (Value::Null, _) | (_, Value::Null) => false,
                _ => compare(op, lhs, rhs)? == Ordering::Equal,
            };
            Ok(Value::Bool(if op == B::Eq { equal } else { !equal }))
        }
        B::Lt | B::Le | B::Gt | B::Ge => {
            if lhs.is_null() || rhs.is_null() {
                return Ok(Value::Bool(false));
            }
            let ord = compare(op, lhs, rhs)?;
            Ok(Value::Bool(match op {
                B::Lt => ord == Ordering::Less,
                B::Le => ord != Ordering::Greater,
                B::Gt => ord == Ordering::Greater,
                _ => ord != Ordering::Less,
            }))
        }
        // the left side already failed to short-circuit, so the right decides
        B::And | B::Or => match (lhs, rhs) {
            (Value::Bool(_) | Value::Null, Value::Bool(b)) => Ok(Value::Bool(*b)),
            (Value::Bool(_) | Value::Null, Value::Null) => Ok(Value::Bool(false)),
            _ => Err(EvalError::type_mismatch(op.symbol(), lhs, rhs)),
        },
    }
}

fn compare(op: BinaryOp, lhs: &Value, rhs: &Value) -> Result<Ordering, EvalError> {
    match (lhs, rhs) {
        (Value::Number(a), Value::Number(b)) => Ok(a.total_cmp(b)),
        (Value::Text(a), Value::Text(b)) => Ok(a.cmp(b)),
        (Value::Bool(a), Value::Bool(b)) => Ok(a.cmp(b)),
        _ => Err(EvalError::type_mismatch(op.symbol(), lhs, rhs)),
    }
}

fn arithmetic(op: BinaryOp, lhs: &Value, rhs: &Value) -> Result<Value, EvalError> {
    match (lhs, rhs) {
        (Value::Null, _) | (_, Value::Null) => Ok(Value::Null),
        (Value::Number(a), Value::Number(b)) => match op {
            BinaryOp::Add => Ok(Value::Number(a + b)),
            BinaryOp::Sub => Ok(Value::Number(a - b)),
            BinaryOp::Mul => Ok(Value::Number(a * b)),
            _ if *b == 0.0 => Err(EvalError::DivisionByZero),
            _ => Ok(Value::Number(a / b)),
        },
        (Value::Text(a), Value::Text(b)) if op == BinaryOp::Add => Ok(Value::Text(format!("{a}{b}"))),
        (Value::Text(a), Value::Number(b)) if op == BinaryOp::Add => Ok(Value::Text(format!("{a}{b}"))),
        (Value::Number(a), Value::Text(b)) if op == BinaryOp::Add => Ok(Value::Text(format!("{a}{b}"))),
        _ => Err(EvalError::type_mismatch(op.symbol(), lhs, rhs)),
    }
}

/// A parsed formula that keeps its source text
///
/// Serialises as the source string, so operations carry formulas like
/// `"Price * Qty"` on the wire.
#[derive(Debug, Clone, PartialEq)]
pub struct Formula {
    source: String,
    expr: Expr,
}

impl Formula {
    /// Parse formula source
    ///
    /// # Errors
    /// Returns `ExprError` with the offending position
    pub fn parse(source: &str) -> Result<Self, ExprError> {
        let tokens = Lexer::new(source).tokenize()?;
        if tokens.len() > MAX_TOKENS {
            return Err(ExprError::TooLong { limit: MAX_TOKENS });
        }
        let mut parser = Parser {
            tokens,
            pos: 0,
            depth: 0,
        };
        let expr = parser.parse_or()?;
        match parser.peek() {
            Token::Eof => Ok(Self {
                source: source.trim().to_string(),
                expr,
            }),
            other => Err(ExprError::UnexpectedToken {
                found: other.describe(),
                position: parser.position(),
            }),
        }
    }

    /// Formula wrapping a single literal
    #[must_use]
    pub fn literal(value: Value) -> Self {
        Self {
            source: literal_source(&value),
            expr: Expr::Literal(value),
        }
    }

    /// Source text
    #[inline]
    #[must_use]
    pub fn source(&self) -> &str {
        &self.source
    }

    /// Expression tree
    #[inline]
    #[must_use]
    pub fn expr(&self) -> &Expr {
        &self.expr
    }

    /// Column names referenced, in first-use order
    #[must_use]
    pub fn columns(&self) -> Vec<&str> {
        let mut out = Vec::new();
        self.expr.collect_columns(&mut out);
        out
    }

    /// Evaluate against one row of `table`
    ///
    /// # Errors
    /// Returns `EvalError` for unknown columns, type mismatches or
    /// division by zero
    pub fn eval(&self, table: &Table, row: usize) -> Result<Value, EvalError> {
        self.expr.eval(table, row)
    }

    /// Evaluate as a row predicate; null counts as false
    ///
    /// # Errors
    /// Returns `EvalError::NotBoolean` if the result is not a boolean
    pub fn matches(&self, table: &Table, row: usize) -> Result<bool, EvalError> {
        match self.eval(table, row)? {
            Value::Bool(b) => Ok(b),
            Value::Null => Ok(false),
            other => Err(EvalError::NotBoolean(other.type_name())),
        }
    }
}

fn literal_source(value: &Value) -> String {
    match value {
        Value::Text(s) => format!("\"{}\"", s.replace('"', "\\\"")),
        other => other.to_string(),
    }
}

impl Display for Formula {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.write_str(&self.source)
    }
}

impl std::str::FromStr for Formula {
    type Err = ExprError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl Serialize for Formula {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.serialize_str(&self.source)
    }
}

impl<'de> Deserialize<'de> for Formula {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let source = String::deserialize(deserializer)?;
        Self::parse(&source).map_err(serde::de::Error::custom)
    }
}

// ============================================================================
// LEXER
// ============================================================================

#[derive(Debug, Clone, PartialEq)]
enum Token {
    Number(f64),
    Str(String),
    Ident(String),
    True,
    False,
    Null,
    And,
    Or,
    Not,
    LParen,
    RParen,
    Plus,
    Minus,
    Star,
    Slash,
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
    Eof,
}

impl Token {
    fn describe(&self) -> String {
        match self {
            Self::Number(n) => format!("number {n}"),
            Self::Str(s) => format!("string {s:?}"),
            Self::Ident(s) => format!("column {s}"),
            Self::Eof => "end of input".to_string(),
            other => format!("{other:?}").to_lowercase(),
        }
    }
}

struct Lexer<'a> {
    source: &'a str,
    chars: std::iter::Peekable<std::str::CharIndices<'a>>,
}

impl<'a> Lexer<'a> {
    fn new(source: &'a str) -> Self {
        Self {
            source,
            chars: source.char_indices().peekable(),
        }
    }

    fn tokenize(mut self) -> Result<Vec<(Token, usize)>, ExprError> {
        let mut tokens = Vec::new();
        loop {
            while self.chars.peek().is_some_and(|(_, c)| c.is_whitespace()) {
                self.chars.next();
            }
            let Some(&(start, c)) = self.chars.peek() else {
                tokens.push((Token::Eof, self.source.len()));
                return Ok(tokens);
            };
            let token = match c {
                '(' => self.single(Token::LParen),
                ')' => self.single(Token::RParen),
                '+' => self.single(Token::Plus),
                '-' => self.single(Token::Minus),
                '*' => self.single(Token::Star),
                '/' => self.single(Token::Slash),
                '=' => {
                    self.chars.next();
                    self.eat('=');
                    Token::Eq
                }
                '!' => {
                    self.chars.next();
                    if self.eat('=') {
                        Token::Ne
                    } else {
                        Token::Not
                    }
                }
                '<' => {
                    self.chars.next();
                    if self.eat('=') {
                        Token::Le
                    } else if self.eat('>') {
                        Token::Ne
                    } else {
                        Token::Lt
                    }
                }
                '>' => {
                    self.chars.next();
                    if self.eat('=') {
                        Token::Ge
                    } else {
                        Token::Gt
                    }
                }
                '&' => {
                    self.chars.next();
                    self.eat('&');
                    Token::And
                }
                '|' => {
                    self.chars.next();
                    self.eat('|');
                    Token::Or
                }
                '"' | '\'' => Token::Str(self.quoted(c, start)?),
                '[' => {
                    self.chars.next();
                    let name = self.until(']', start)?;
                    Token::Ident(name.trim().to_string())
                }
                c if c.is_ascii_digit() || c == '.' => self.number(start)?,
                c if c.is_alphabetic() || c == '_' => self.word(),
                other => {
                    return Err(ExprError::UnexpectedChar {
                        found: other,
                        position: start,
                    })
                }
            };
            tokens.push((token, start));
        }
    }

    fn single(&mut self, token: Token) -> Token {
        self.chars.next();
        token
    }

    fn eat(&mut self, expected: char) -> bool {
        if self.chars.peek().is_some_and(|(_, c)| *c == expected) {
            self.chars.next();
            true
        } else {
            false
        }
    }

    fn quoted(&mut self, quote: char, start: usize) -> Result<String, ExprError> {
        self.chars.next();
        let mut out = String::new();
        while let Some((_, c)) = self.chars.next() {
            match c {
                '\\' => {
                    if let Some((_, escaped)) = self.chars.next() {
                        out.push(escaped);
                    }
                }
                c if c == quote => return Ok(out),
                c => out.push(c),
            }
        }
        Err(ExprError::Unterminated { position: start })
    }

    fn until(&mut self, end: char, start: usize) -> Result<String, ExprError> {
        let mut out = String::new();
        for (_, c) in self.chars.by_ref() {
            if c == end {
                return Ok(out);
            }
            out.push(c);
        }
        Err(ExprError::Unterminated { position: start })
    }

    fn number(&mut self, start: usize) -> Result<Token, ExprError> {
        let mut end = start;
        while let Some(&(i, c)) = self.chars.peek() {
            if c.is_ascii_digit() || c == '.' {
                end = i + c.len_utf8();
                self.chars.next();
            } else {
                break;
            }
        }
        let text = &self.source[start..end];
        text.parse::<f64>()
            .map(Token::Number)
            .map_err(|_| ExprError::InvalidNumber {
                text: text.to_string(),
                position: start,
            })
    }

    fn word(&mut self) -> Token {
        let mut word = String::new();
        while let Some(&(_, c)) = self.chars.peek() {
            if c.is_alphanumeric() || c == '_' {
                word.push(c);
                self.chars.next();
            } else {
                break;
            }
        }
        match word.to_ascii_lowercase().as_str() {
            "true" => Token::True,
            "false" => Token::False,
            "null" => Token::Null,
            "and" => Token::And,
            "or" => Token::Or,
            "not" => Token::Not,
            _ => Token::Ident(word),
        }
    }
}

// ============================================================================
// PARSER
// ============================================================================

/// Deepest nesting of parentheses, `not` and unary minus
const MAX_DEPTH: usize = 64;

/// Longest formula in tokens; binary chains build trees this deep
const MAX_TOKENS: usize = 2048;

struct Parser {
    tokens: Vec<(Token, usize)>,
    pos: usize,
    depth: usize,
}

impl Parser {
    fn peek(&self) -> &Token {
        self.tokens.get(self.pos).map_or(&Token::Eof, |(t, _)| t)
    }

    fn position(&self) -> usize {
        self.tokens.get(self.pos).map_or(0, |(_, p)| *p)
    }

    fn advance(&mut self) -> Token {
        let token = self.peek().clone();
        if self.pos < self.tokens.len() {
            self.pos += 1;
        }
        token
    }

    /// Run `parse` one nesting level down
    fn nested(
        &mut self,
        parse: fn(&mut Self) -> Result<Expr, ExprError>,
    ) -> Result<Expr, ExprError> {
        if self.depth >= MAX_DEPTH {
            return Err(ExprError::TooDeep {
                limit: MAX_DEPTH,
                position: self.position(),
            });
        }
        self.depth += 1;
        let result = parse(self);
        self.depth -= 1;
        result
    }

    fn binary_chain(
        &mut self,
        next: fn(&mut Self) -> Result<Expr, ExprError>,
        ops: &[(Token, BinaryOp)],
    ) -> Result<Expr, ExprError> {
        let mut left = next(self)?;
        while let Some(op) = ops.iter().find(|(t, _)| t == self.peek()).map(|(_, op)| *op) {
            self.advance();
            let right = next(self)?;
            left = Expr::Binary {
                op,
                left: Box::new(left),
                right: Box::new(right),
            };
        }
        Ok(left)
    }

    fn parse_or(&mut self) -> Result<Expr, ExprError> {
        self.binary_chain(Self::parse_and, &[(Token::Or, BinaryOp::Or)])
    }

    fn parse_and(&mut self) -> Result<Expr, ExprError> {
        self.binary_chain(Self::parse_not, &[(Token::And, BinaryOp::And)])
    }

    fn parse_not(&mut self) -> Result<Expr, ExprError> {
        if *self.peek() == Token::Not {
            self.advance();
            let expr = self.nested(Self::parse_not)?;
            return Ok(Expr::Unary {
                op: UnaryOp::Not,
                expr: Box::new(expr),
            });
        }
        self.parse_compare()
    }

    fn parse_compare(&mut self) -> Result<Expr, ExprError> {
        let left = self.parse_sum()?;
        let op = match self.peek() {
            Token::Eq => BinaryOp::Eq,
            Token::Ne => BinaryOp::Ne,
            Token::Lt => BinaryOp::Lt,
            Token::Le => BinaryOp::Le,
            Token::Gt => BinaryOp::Gt,
            Token::Ge => BinaryOp::Ge,
            _ => return Ok(left),
        };
        self.advance();
        let right = self.parse_sum()?;
        Ok(Expr::Binary {
            op,
            left: Box::new(left),
            right: Box::new(right),
        })
    }

    fn parse_sum(&mut self) -> Result<Expr, ExprError> {
        self.binary_chain(
            Self::parse_product,
            &[(Token::Plus, BinaryOp::Add), (Token::Minus, BinaryOp::Sub)],
        )
    }

    fn parse_product(&mut self) -> Result<Expr, ExprError> {
        self.binary_chain(
            Self::parse_unary,
            &[(Token::Star, BinaryOp::Mul), (Token::Slash, BinaryOp::Div)],
        )
    }

    fn parse_unary(&mut self) -> Result<Expr, ExprError> {
        if *self.peek() == Token::Minus {
            self.advance();
            let expr = self.nested(Self::parse_unary)?;
            return Ok(Expr::Unary {
                op: UnaryOp::Neg,
                expr: Box::new(expr),
            });
        }
        self.parse_primary()
    }

    fn parse_primary(&mut self) -> Result<Expr, ExprError> {
        let position = self.position();
        match self.advance() {
            Token::Number(n) => Ok(Expr::Literal(Value::Number(n))),
            Token::Str(s) => Ok(Expr::Literal(Value::Text(s))),
            Token::True => Ok(Expr::Literal(Value::Bool(true))),
            Token::False => Ok(Expr::Literal(Value::Bool(false))),
            Token::Null => Ok(Expr::Literal(Value::Null)),
            Token::Ident(name) => Ok(Expr::Column(name)),
            Token::LParen => {
                let inner = self.nested(Self::parse_or)?;
                match self.advance() {
                    Token::RParen => Ok(inner),
                    other => Err(ExprError::UnexpectedToken {
                        found: other.describe(),
                        position: self.position(),
                    }),
                }
            }
            Token::Eof => Err(ExprError::UnexpectedEnd),
            other => Err(ExprError::UnexpectedToken {
                found: other.describe(),
                position,
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tabedit_table::row;

    fn table() -> Table {
        Table::from_rows(
            ["Price", "Qty", "Name", "Unit Cost"],
            [row([
                ("Price", Value::Number(2.5)),
                ("Qty", Value::Number(4.0)),
                ("Name", Value::text("bolt")),
                ("Unit Cost", Value::Number(1.0)),
            ])],
        )
        .unwrap()
    }

    fn eval(src: &str) -> Result<Value, EvalError> {
        Formula::parse(src).unwrap().eval(&table(), 0)
    }

    #[test]
    fn arithmetic_precedence() {
        assert_eq!(eval("Price * Qty + 1").unwrap(), Value::Number(11.0));
        assert_eq!(eval("Price * (Qty + 1)").unwrap(), Value::Number(12.5));
        assert_eq!(eval("-Qty / 2").unwrap(), Value::Number(-2.0));
    }

    #[test]
    fn bracketed_columns() {
        assert_eq!(eval("[Unit Cost] * 3").unwrap(), Value::Number(3.0));
    }

    #[test]
    fn case_insensitive_columns() {
        assert_eq!(eval("price").unwrap(), Value::Number(2.5));
    }

    #[test]
    fn comparisons_and_logic() {
        assert_eq!(eval("Qty > 3 and Name = 'bolt'").unwrap(), Value::Bool(true));
        assert_eq!(eval("not Qty >= 4 or Price <> 2.5").unwrap(), Value::Bool(false));
    }

    #[test]
    fn incompatible_comparison_errors() {
        assert!(matches!(eval("Name > 3"), Err(EvalError::TypeMismatch { .. })));
    }

    #[test]
    fn unknown_column_errors() {
        assert_eq!(eval("Cost * 2"), Err(EvalError::UnknownColumn("Cost".to_string())));
    }

    #[test]
    fn division_by_zero_errors() {
        assert_eq!(eval("Price / 0"), Err(EvalError::DivisionByZero));
    }

    #[test]
    fn text_concatenation() {
        assert_eq!(eval("Name + \"-\" + Qty").unwrap(), Value::text("bolt-4"));
    }

    #[test]
    fn null_propagates_in_arithmetic() {
        assert_eq!(eval("null + 1").unwrap(), Value::Null);
        assert_eq!(eval("null = null").unwrap(), Value::Bool(true));
        assert_eq!(eval("null < 1").unwrap(), Value::Bool(false));
    }

    #[test]
    fn parse_errors_carry_position() {
        assert!(matches!(
            Formula::parse("Price +"),
            Err(ExprError::UnexpectedEnd)
        ));
        assert!(matches!(
            Formula::parse("Price $ 2"),
            Err(ExprError::UnexpectedChar { found: '$', position: 6 })
        ));
        assert!(matches!(
            Formula::parse("'open"),
            Err(ExprError::Unterminated { position: 0 })
        ));
    }

    #[test]
    fn referenced_columns_deduplicated() {
        let f = Formula::parse("Price * Qty + Price").unwrap();
        assert_eq!(f.columns(), vec!["Price", "Qty"]);
    }

    #[test]
    fn serde_uses_source() {
        let f = Formula::parse("Price * Qty").unwrap();
        assert_eq!(serde_json::to_string(&f).unwrap(), "\"Price * Qty\"");
        let back: Formula = serde_json::from_str("\"Price * Qty\"").unwrap();
        assert_eq!(back, f);
    }

    #[test]
    fn predicate_requires_boolean() {
        let f = Formula::parse("Price").unwrap();
        assert_eq!(f.matches(&table(), 0), Err(EvalError::NotBoolean("number")));
    }

    #[test]
    fn nesting_is_bounded() {
        let shallow = format!("{}1{}", "(".repeat(MAX_DEPTH), ")".repeat(MAX_DEPTH));
        assert!(Formula::parse(&shallow).is_ok());

        let deep = format!("{}1{}", "(".repeat(1_000), ")".repeat(1_000));
        assert!(matches!(
            Formula::parse(&deep),
            Err(ExprError::TooDeep { limit: MAX_DEPTH, .. })
        ));
        let huge = format!("{}1{}", "(".repeat(200_000), ")".repeat(200_000));
        assert_eq!(Formula::parse(&huge), Err(ExprError::TooLong { limit: MAX_TOKENS }));
        let chain = vec!["Qty"; 5_000].join(" + ");
        assert_eq!(Formula::parse(&chain), Err(ExprError::TooLong { limit: MAX_TOKENS }));
        let negations = format!("{}Qty", "-".repeat(1_000));
        assert!(matches!(Formula::parse(&negations), Err(ExprError::TooDeep { .. })));
        let nots = format!("{}true", "not ".repeat(1_000));
        assert!(matches!(Formula::parse(&nots), Err(ExprError::TooDeep { .. })));
    }
}
