//! Condition expression language.
//!
//! Block references are substituted as JSON literals before parsing, so an
//! expression such as `<agent.score> >= 7 && <start.input.mode> == "fast"`
//! reaches this module as `8 >= 7 && "fast" == "fast"`. The grammar is a
//! small JavaScript-flavoured subset: literals (including JSON arrays and
//! objects), arithmetic, comparisons, `&&`, `||`, `!`, `contains`, and the
//! `.length`, `.includes()`, `.toLowerCase()`, `.toUpperCase()`, `.trim()`
//! postfix forms.

use serde_json::Value as Json;
use std::cmp::Ordering;
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum ExpressionError {
    #[error("Invalid condition expression: {0}")]
    Parse(String),

    #[error("Condition evaluation failed: {0}")]
    Evaluation(String),
}

/// Parsed condition expression.
#[derive(Debug, Clone, PartialEq)]
pub enum Expression {
    // Arithmetic
    Sum(Box<Expression>, Box<Expression>),
    Subtract(Box<Expression>, Box<Expression>),
    Multiply(Box<Expression>, Box<Expression>),
    Divide(Box<Expression>, Box<Expression>),
    Negate(Box<Expression>),

    // Logical
    Not(Box<Expression>),
    And(Box<Expression>, Box<Expression>),
    Or(Box<Expression>, Box<Expression>),

    // Comparison
    Equal(Box<Expression>, Box<Expression>),
    NotEqual(Box<Expression>, Box<Expression>),
    StrictEqual(Box<Expression>, Box<Expression>),
    StrictNotEqual(Box<Expression>, Box<Expression>),
    GreaterThan(Box<Expression>, Box<Expression>),
    GreaterThanOrEqual(Box<Expression>, Box<Expression>),
    SmallerThan(Box<Expression>, Box<Expression>),
    SmallerThanOrEqual(Box<Expression>, Box<Expression>),
    Contains(Box<Expression>, Box<Expression>),

    // Postfix
    Length(Box<Expression>),
    Lowercase(Box<Expression>),
    Uppercase(Box<Expression>),
    Trim(Box<Expression>),

    Literal(Json),
}

impl Expression {
    pub fn parse(source: &str) -> Result<Expression, ExpressionError> {
        let tokens = tokenize(source)?;
        if tokens.is_empty() {
            return Err(ExpressionError::Parse("empty expression".into()));
        }
        let mut parser = Parser { tokens, pos: 0 };
        let expr = parser.parse_or()?;
        if let Some(token) = parser.peek() {
            return Err(ExpressionError::Parse(format!("unexpected token {:?}", token)));
        }
        Ok(expr)
    }

    pub fn evaluate(&self) -> Result<Json, ExpressionError> {
        use Expression::*;
        Ok(match self {
            Literal(v) => v.clone(),

            Not(e) => Json::Bool(!is_truthy(&e.evaluate()?)),
            And(l, r) => {
                let left = l.evaluate()?;
                if !is_truthy(&left) {
                    return Ok(left);
                }
                r.evaluate()?
            }
            Or(l, r) => {
                let left = l.evaluate()?;
                if is_truthy(&left) {
                    return Ok(left);
                }
                r.evaluate()?
            }

            Equal(l, r) => Json::Bool(loose_eq(&l.evaluate()?, &r.evaluate()?)),
            NotEqual(l, r) => Json::Bool(!loose_eq(&l.evaluate()?, &r.evaluate()?)),
            StrictEqual(l, r) => Json::Bool(strict_eq(&l.evaluate()?, &r.evaluate()?)),
            StrictNotEqual(l, r) => Json::Bool(!strict_eq(&l.evaluate()?, &r.evaluate()?)),
            GreaterThan(l, r) => compare(l, r, |o| o == Ordering::Greater)?,
            GreaterThanOrEqual(l, r) => compare(l, r, |o| o != Ordering::Less)?,
            SmallerThan(l, r) => compare(l, r, |o| o == Ordering::Less)?,
            SmallerThanOrEqual(l, r) => compare(l, r, |o| o != Ordering::Greater)?,
            Contains(l, r) => Json::Bool(contains(&l.evaluate()?, &r.evaluate()?)),

            Sum(l, r) => {
                let (left, right) = (l.evaluate()?, r.evaluate()?);
                if left.is_string() || right.is_string() {
                    Json::String(format!("{}{}", display(&left), display(&right)))
                } else {
                    let (a, b) = arith(&left, &right, "+")?;
                    number(a + b)?
                }
            }
            Subtract(l, r) => {
                let (a, b) = arith(&l.evaluate()?, &r.evaluate()?, "-")?;
                number(a - b)?
            }
            Multiply(l, r) => {
                let (a, b) = arith(&l.evaluate()?, &r.evaluate()?, "*")?;
                number(a * b)?
            }
            Divide(l, r) => {
                let (a, b) = arith(&l.evaluate()?, &r.evaluate()?, "/")?;
                if b == 0.0 {
                    return Err(ExpressionError::Evaluation("division by zero".into()));
                }
                number(a / b)?
            }
            Negate(e) => {
                let v = e.evaluate()?;
                let n = to_number(&v).ok_or_else(|| {
                    ExpressionError::Evaluation(format!("cannot negate {}", display(&v)))
                })?;
                number(-n)?
            }

            Length(e) => match e.evaluate()? {
                Json::String(s) => Json::from(s.chars().count()),
                Json::Array(items) => Json::from(items.len()),
                Json::Object(map) => Json::from(map.len()),
                other => {
                    return Err(ExpressionError::Evaluation(format!(
                        "{} has no length",
                        display(&other)
                    )))
                }
            },
            Lowercase(e) => Json::String(display(&e.evaluate()?).to_lowercase()),
            Uppercase(e) => Json::String(display(&e.evaluate()?).to_uppercase()),
            Trim(e) => Json::String(display(&e.evaluate()?).trim().to_string()),
        })
    }
}

/// Parse and evaluate `source`, reducing the result to a boolean.
pub fn evaluate_condition(source: &str) -> Result<bool, ExpressionError> {
    Ok(is_truthy(&Expression::parse(source)?.evaluate()?))
}

/// JavaScript truthiness over JSON values.
pub fn is_truthy(value: &Json) -> bool {
    match value {
        Json::Null => false,
        Json::Bool(b) => *b,
        Json::Number(n) => n.as_f64().map(|f| f != 0.0 && !f.is_nan()).unwrap_or(false),
        Json::String(s) => !s.is_empty(),
        Json::Array(_) | Json::Object(_) => true,
    }
}

fn display(value: &Json) -> String {
    match value {
        Json::String(s) => s.clone(),
        Json::Null => "null".to_string(),
        other => other.to_string(),
    }
}

fn to_number(value: &Json) -> Option<f64> {
    match value {
        Json::Number(n) => n.as_f64(),
        Json::Bool(b) => Some(if *b { 1.0 } else { 0.0 }),
        Json::String(s) => s.trim().parse().ok(),
        Json::Null => Some(0.0),
        _ => None,
    }
}

fn number(n: f64) -> Result<Json, ExpressionError> {
    serde_json::Number::from_f64(n)
        .map(Json::Number)
        .ok_or_else(|| ExpressionError::Evaluation("result is not a finite number".into()))
}

fn arith(left: &Json, right: &Json, op: &str) -> Result<(f64, f64), ExpressionError> {
    match (to_number(left), to_number(right)) {
        (Some(a), Some(b)) => Ok((a, b)),
        _ => Err(ExpressionError::Evaluation(format!(
            "cannot apply '{}' to {} and {}",
            op,
            display(left),
            display(right)
        ))),
    }
}

fn loose_eq(left: &Json, right: &Json) -> bool {
    match (left, right) {
        (Json::Null, Json::Null) => true,
        (Json::Null, _) | (_, Json::Null) => false,
        (Json::String(a), Json::String(b)) => a == b,
        (Json::Array(_) | Json::Object(_), _) | (_, Json::Array(_) | Json::Object(_)) => left == right,
        _ => match (to_number(left), to_number(right)) {
            (Some(a), Some(b)) => a == b,
            _ => false,
        },
    }
}

fn strict_eq(left: &Json, right: &Json) -> bool {
    match (left, right) {
        (Json::Number(a), Json::Number(b)) => a.as_f64() == b.as_f64(),
        _ => left == right,
    }
}

fn compare(
    l: &Expression,
    r: &Expression,
    accept: impl Fn(Ordering) -> bool,
) -> Result<Json, ExpressionError> {
    let (left, right) = (l.evaluate()?, r.evaluate()?);
    let ordering = match (&left, &right) {
        (Json::String(a), Json::String(b)) => Some(a.cmp(b)),
        _ => match (to_number(&left), to_number(&right)) {
            (Some(a), Some(b)) => a.partial_cmp(&b),
            _ => None,
        },
    };
    Ok(Json::Bool(ordering.map(accept).unwrap_or(false)))
}

fn contains(haystack: &Json, needle: &Json) -> bool {
    match haystack {
        Json::String(s) => s.contains(display(needle).as_str()),
        Json::Array(items) => items.iter().any(|item| loose_eq(item, needle)),
        Json::Object(map) => needle.as_str().map(|k| map.contains_key(k)).unwrap_or(false),
        _ => false,
    }
}

#[derive(Debug, Clone, PartialEq)]
enum Token {
    Literal(Json),
    Ident(String),
    Op(&'static str),
    LParen,
    RParen,
    Dot,
}

const OPERATORS: [&str; 15] = [
    "===", "!==", "==", "!=", ">=", "<=", "&&", "||", ">", "<", "!", "+", "-", "*", "/",
];

fn tokenize(source: &str) -> Result<Vec<Token>, ExpressionError> {
    let chars: Vec<char> = source.chars().collect();
    let mut tokens = Vec::new();
    let mut i = 0;

    while i < chars.len() {
        let c = chars[i];
        if c.is_whitespace() {
            i += 1;
            continue;
        }

        if c.is_ascii_digit() {
            let start = i;
            while i < chars.len() && (chars[i].is_ascii_digit() || chars[i] == '.') {
                i += 1;
            }
            let text: String = chars[start..i].iter().collect();
            let n: f64 = text
                .parse()
                .map_err(|_| ExpressionError::Parse(format!("invalid number '{}'", text)))?;
            tokens.push(Token::Literal(number(n).map_err(|e| ExpressionError::Parse(e.to_string()))?));
            continue;
        }

        if c == '"' || c == '\'' {
            let (text, next) = read_string(&chars, i)?;
            tokens.push(Token::Literal(Json::String(text)));
            i = next;
            continue;
        }

        if c == '[' || c == '{' {
            let end = matching_bracket(&chars, i)?;
            let text: String = chars[i..=end].iter().collect();
            let value: Json = serde_json::from_str(&text)
                .map_err(|e| ExpressionError::Parse(format!("invalid JSON literal: {}", e)))?;
            tokens.push(Token::Literal(value));
            i = end + 1;
            continue;
        }

        if c.is_alphabetic() || c == '_' || c == '$' {
            let start = i;
            while i < chars.len() && (chars[i].is_alphanumeric() || chars[i] == '_' || chars[i] == '$') {
                i += 1;
            }
            let word: String = chars[start..i].iter().collect();
            tokens.push(match word.as_str() {
                "true" => Token::Literal(Json::Bool(true)),
                "false" => Token::Literal(Json::Bool(false)),
                "null" | "undefined" => Token::Literal(Json::Null),
                "contains" => Token::Op("contains"),
                _ => Token::Ident(word),
            });
            continue;
        }

        match c {
            '(' => {
                tokens.push(Token::LParen);
                i += 1;
                continue;
            }
            ')' => {
                tokens.push(Token::RParen);
                i += 1;
                continue;
            }
            '.' => {
                tokens.push(Token::Dot);
                i += 1;
                continue;
            }
            _ => {}
        }

        let rest: String = chars[i..chars.len().min(i + 3)].iter().collect();
        match OPERATORS.iter().find(|op| rest.starts_with(**op)) {
            Some(op) => {
                tokens.push(Token::Op(*op));
                i += op.len();
            }
            None => return Err(ExpressionError::Parse(format!("unexpected character '{}'", c))),
        }
    }

    Ok(tokens)
}

fn read_string(chars: &[char], start: usize) -> Result<(String, usize), ExpressionError> {
    let quote = chars[start];
    if quote == '"' {
        // Substituted references arrive JSON-encoded; let serde handle escapes.
        let mut i = start + 1;
        while i < chars.len() {
            match chars[i] {
                '\\' => i += 2,
                '"' => {
                    let text: String = chars[start..=i].iter().collect();
                    let value: String = serde_json::from_str(&text)
                        .map_err(|e| ExpressionError::Parse(format!("invalid string literal: {}", e)))?;
                    return Ok((value, i + 1));
                }
                _ => i += 1,
            }
        }
        return Err(ExpressionError::Parse("unterminated string".into()));
    }

    let mut out = String::new();
    let mut i = start + 1;
    while i < chars.len() {
        match chars[i] {
            '\\' if i + 1 < chars.len() => {
                out.push(match chars[i + 1] {
                    'n' => '\n',
                    't' => '\t',
                    'r' => '\r',
                    other => other,
                });
                i += 2;
            }
            c if c == quote => return Ok((out, i + 1)),
            c => {
                out.push(c);
                i += 1;
            }
        }
    }
    Err(ExpressionError::Parse("unterminated string".into()))
}

fn matching_bracket(chars: &[char], start: usize) -> Result<usize, ExpressionError> {
    let mut depth = 0usize;
    let mut in_string = false;
    let mut i = start;
    while i < chars.len() {
        let c = chars[i];
        if in_string {
            if c == '\\' {
                i += 1;
            } else if c == '"' {
                in_string = false;
            }
        } else {
            match c {
                '"' => in_string = true,
                '[' | '{' => depth += 1,
                ']' | '}' => {
                    depth -= 1;
                    if depth == 0 {
                        return Ok(i);
                    }
                }
                _ => {}
            }
        }
        i += 1;
    }
    Err(ExpressionError::Parse("unbalanced brackets".into()))
}

struct Parser {
    tokens: Vec<Token>,
    pos: usize,
}

impl Parser {
    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos)
    }

    fn next(&mut self) -> Option<Token> {
        let token = self.tokens.get(self.pos).cloned();
        self.pos += 1;
        token
    }

    fn eat_op(&mut self, ops: &[&'static str]) -> Option<&'static str> {
        match self.peek() {
            Some(Token::Op(op)) if ops.contains(op) => {
                let op = *op;
                self.pos += 1;
                Some(op)
            }
            _ => None,
        }
    }

    fn expect(&mut self, expected: Token) -> Result<(), ExpressionError> {
        match self.next() {
            Some(token) if token == expected => Ok(()),
            other => Err(ExpressionError::Parse(format!(
                "expected {:?}, found {:?}",
                expected, other
            ))),
        }
    }

    fn parse_or(&mut self) -> Result<Expression, ExpressionError> {
        let mut left = self.parse_and()?;
        while self.eat_op(&["||"]).is_some() {
            left = Expression::Or(Box::new(left), Box::new(self.parse_and()?));
        }
        Ok(left)
    }

    fn parse_and(&mut self) -> Result<Expression, ExpressionError> {
        let mut left = self.parse_comparison()?;
        while self.eat_op(&["&&"]).is_some() {
            left = Expression::And(Box::new(left), Box::new(self.parse_comparison()?));
        }
        Ok(left)
    }

    fn parse_comparison(&mut self) -> Result<Expression, ExpressionError> {
        let mut left = self.parse_additive()?;
        while let Some(op) =
            self.eat_op(&["===", "!==", "==", "!=", ">=", "<=", ">", "<", "contains"])
        {
            let l = Box::new(left);
            let r = Box::new(self.parse_additive()?);
            left = match op {
                "===" => Expression::StrictEqual(l, r),
                "!==" => Expression::StrictNotEqual(l, r),
                "==" => Expression::Equal(l, r),
                "!=" => Expression::NotEqual(l, r),
                ">=" => Expression::GreaterThanOrEqual(l, r),
                "<=" => Expression::SmallerThanOrEqual(l, r),
                ">" => Expression::GreaterThan(l, r),
                "<" => Expression::SmallerThan(l, r),
                _ => Expression::Contains(l, r),
            };
        }
        Ok(left)
    }

    fn parse_additive(&mut self) -> Result<Expression, ExpressionError> {
        let mut left = self.parse_multiplicative()?;
        while let Some(op) = self.eat_op(&["+", "-"]) {
            let right = Box::new(self.parse_multiplicative()?);
            left = if op == "+" {
                Expression::Sum(Box::new(left), right)
            } else {
                Expression::Subtract(Box::new(left), right)
            };
        }
        Ok(left)
    }

    fn parse_multiplicative(&mut self) -> Result<Expression, ExpressionError> {
        let mut left = self.parse_unary()?;
        while let Some(op) = self.eat_op(&["*", "/"]) {
            let right = Box::new(self.parse_unary()?);
            left = if op == "*" {
                Expression::Multiply(Box::new(left), right)
            } else {
                Expression::Divide(Box::new(left), right)
            };
        }
        Ok(left)
    }

    fn parse_unary(&mut self) -> Result<Expression, ExpressionError> {
        match self.eat_op(&["!", "-"]) {
            Some("!") => Ok(Expression::Not(Box::new(self.parse_unary()?))),
            Some(_) => Ok(Expression::Negate(Box::new(self.parse_unary()?))),
            None => self.parse_postfix(),
        }
    }

    fn parse_postfix(&mut self) -> Result<Expression, ExpressionError> {
        let mut expr = self.parse_primary()?;
        while self.peek() == Some(&Token::Dot) {
            self.pos += 1;
            let name = match self.next() {
                Some(Token::Ident(name)) => name,
                other => {
                    return Err(ExpressionError::Parse(format!(
                        "expected property name, found {:?}",
                        other
                    )))
                }
            };
            let inner = Box::new(expr);
            expr = match name.as_str() {
                "length" => Expression::Length(inner),
                "includes" => {
                    self.expect(Token::LParen)?;
                    let arg = self.parse_or()?;
                    self.expect(Token::RParen)?;
                    Expression::Contains(inner, Box::new(arg))
                }
                "toLowerCase" | "toUpperCase" | "trim" => {
                    self.expect(Token::LParen)?;
                    self.expect(Token::RParen)?;
                    match name.as_str() {
                        "toLowerCase" => Expression::Lowercase(inner),
                        "toUpperCase" => Expression::Uppercase(inner),
                        _ => Expression::Trim(inner),
                    }
                }
                other => {
                    return Err(ExpressionError::Parse(format!("unsupported member '{}'", other)))
                }
            };
        }
        Ok(expr)
    }

    fn parse_primary(&mut self) -> Result<Expression, ExpressionError> {
        match self.next() {
            Some(Token::Literal(value)) => Ok(Expression::Literal(value)),
            Some(Token::LParen) => {
                let expr = self.parse_or()?;
                self.expect(Token::RParen)?;
                Ok(expr)
            }
            Some(Token::Ident(name)) => {
                Err(ExpressionError::Parse(format!("unknown identifier '{}'", name)))
            }
            other => Err(ExpressionError::Parse(format!("unexpected token {:?}", other))),
        }
    }
}
