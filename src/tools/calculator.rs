//! `calculator`: arithmetic expression evaluation.
//!
//! A small recursive-descent parser over `f64`. Nothing but arithmetic is
//! accepted: numbers, `+ - * / % ^` (`**` is accepted for `^`), parentheses,
//! unary signs, the constants `pi` and `e`, and a fixed set of functions.
//!
//! Precedence, lowest first: `+ -`, `* / %`, unary sign, `^` (right
//! associative). So `-2^2` is `-4` and `2^3^2` is `512`.

use anyhow::Context;
use async_trait::async_trait;
use serde_json::{json, Value};
use thiserror::Error;

use crate::agent_core::registry::{Tool, ToolInvoker};
use crate::inference::ToolDefinition;

/// Longest expression accepted, in characters.
const MAX_EXPRESSION_CHARS: usize = 512;

/// Deepest nesting of parentheses, signs and powers.
const MAX_DEPTH: usize = 64;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum CalcError {
    #[error("empty expression")]
    Empty,

    #[error("expression longer than {MAX_EXPRESSION_CHARS} characters")]
    TooLong,

    #[error("expression nested too deeply")]
    TooDeep,

    #[error("unexpected character '{ch}' at position {position}")]
    UnexpectedChar { ch: char, position: usize },

    #[error("invalid number '{text}'")]
    InvalidNumber { text: String },

    #[error("unexpected {found} at position {position}")]
    UnexpectedToken { found: String, position: usize },

    #[error("unexpected end of expression")]
    UnexpectedEnd,

    #[error("unknown name '{name}'")]
    UnknownName { name: String },

    #[error("division by zero")]
    DivisionByZero,

    #[error("result is not a finite number")]
    NotFinite,
}

// ─── Tokens ──────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq)]
enum Token {
    Number(f64),
    Ident(String),
    Plus,
    Minus,
    Star,
    Slash,
    Percent,
    Caret,
    LParen,
    RParen,
}

impl Token {
    fn describe(&self) -> String {
        match self {
            Token::Number(n) => format!("number {n}"),
            Token::Ident(name) => format!("name '{name}'"),
            Token::Plus => "'+'".into(),
            Token::Minus => "'-'".into(),
            Token::Star => "'*'".into(),
            Token::Slash => "'/'".into(),
            Token::Percent => "'%'".into(),
            Token::Caret => "'^'".into(),
            Token::LParen => "'('".into(),
            Token::RParen => "')'".into(),
        }
    }
}

fn tokenize(input: &str) -> Result<Vec<(Token, usize)>, CalcError> {
    let chars: Vec<char> = input.chars().collect();
    let mut tokens = Vec::new();
    let mut i = 0;

    while i < chars.len() {
        let c = chars[i];
        let start = i;
        let token = match c {
            c if c.is_whitespace() => {
                i += 1;
                continue;
            }
            '0'..='9' | '.' => {
                while i < chars.len() && (chars[i].is_ascii_digit() || chars[i] == '.') {
                    i += 1;
                }
                let text: String = chars[start..i].iter().collect();
                let value = text
                    .parse::<f64>()
                    .map_err(|_| CalcError::InvalidNumber { text })?;
                tokens.push((Token::Number(value), start));
                continue;
            }
            c if c.is_ascii_alphabetic() => {
                while i < chars.len() && chars[i].is_ascii_alphanumeric() {
                    i += 1;
                }
                let name: String = chars[start..i].iter().collect();
                tokens.push((Token::Ident(name.to_lowercase()), start));
                continue;
            }
            '*' if chars.get(i + 1) == Some(&'*') => {
                i += 1;
                Token::Caret
            }
            '+' => Token::Plus,
            '-' => Token::Minus,
            '*' | '×' => Token::Star,
            '/' | '÷' => Token::Slash,
            '%' => Token::Percent,
            '^' => Token::Caret,
            '(' => Token::LParen,
            ')' => Token::RParen,
            other => {
                return Err(CalcError::UnexpectedChar {
                    ch: other,
                    position: start,
                })
            }
        };
        tokens.push((token, start));
        i += 1;
    }

    Ok(tokens)
}

// ─── Parser ──────────────────────────────────────────────────────────────────

struct Parser {
    tokens: Vec<(Token, usize)>,
    pos: usize,
    depth: usize,
}

impl Parser {
    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos).map(|(t, _)| t)
    }

    fn next(&mut self) -> Option<Token> {
        let token = self.tokens.get(self.pos).map(|(t, _)| t.clone());
        if token.is_some() {
            self.pos += 1;
        }
        token
    }

    fn unexpected(&self) -> CalcError {
        match self.tokens.get(self.pos) {
            Some((token, position)) => CalcError::UnexpectedToken {
                found: token.describe(),
                position: *position,
            },
            None => CalcError::UnexpectedEnd,
        }
    }

    fn expect(&mut self, expected: Token) -> Result<(), CalcError> {
        if self.peek() == Some(&expected) {
            self.pos += 1;
            Ok(())
        } else {
            Err(self.unexpected())
        }
    }

    fn descend(&mut self) -> Result<(), CalcError> {
        self.depth += 1;
        if self.depth > MAX_DEPTH {
            return Err(CalcError::TooDeep);
        }
        Ok(())
    }

    /// expr := term (('+' | '-') term)*
    fn expr(&mut self) -> Result<f64, CalcError> {
        let mut value = self.term()?;
        loop {
            match self.peek() {
                Some(Token::Plus) => {
                    self.pos += 1;
                    value += self.term()?;
                }
                Some(Token::Minus) => {
                    self.pos += 1;
                    value -= self.term()?;
                }
                _ => return Ok(value),
            }
        }
    }

    /// term := unary (('*' | '/' | '%') unary)*
    fn term(&mut self) -> Result<f64, CalcError> {
        let mut value = self.unary()?;
        loop {
            match self.peek() {
                Some(Token::Star) => {
                    self.pos += 1;
                    value *= self.unary()?;
                }
                Some(Token::Slash) => {
                    self.pos += 1;
                    let divisor = self.unary()?;
                    if divisor == 0.0 {
                        return Err(CalcError::DivisionByZero);
                    }
                    value /= divisor;
                }
                Some(Token::Percent) => {
                    self.pos += 1;
                    let divisor = self.unary()?;
                    if divisor == 0.0 {
                        return Err(CalcError::DivisionByZero);
                    }
                    value %= divisor;
                }
                _ => return Ok(value),
            }
        }
    }

    /// unary := ('+' | '-') unary | power
    fn unary(&mut self) -> Result<f64, CalcError> {
        match self.peek() {
            Some(Token::Plus) => {
                self.pos += 1;
                self.descend()?;
                let value = self.unary();
                self.depth -= 1;
                value
            }
            Some(Token::Minus) => {
                self.pos += 1;
                self.descend()?;
                let value = self.unary().map(|v| -v);
                self.depth -= 1;
                value
            }
            _ => self.power(),
        }
    }

    /// power := primary ('^' unary)?
    fn power(&mut self) -> Result<f64, CalcError> {
        let base = self.primary()?;
        if self.peek() == Some(&Token::Caret) {
            self.pos += 1;
            self.descend()?;
            let exponent = self.unary();
            self.depth -= 1;
            return Ok(base.powf(exponent?));
        }
        Ok(base)
    }

    /// primary := number | constant | function '(' expr ')' | '(' expr ')'
    fn primary(&mut self) -> Result<f64, CalcError> {
        match self.next() {
            Some(Token::Number(value)) => Ok(value),
            Some(Token::LParen) => {
                self.descend()?;
                let value = self.expr();
                self.depth -= 1;
                let value = value?;
                self.expect(Token::RParen)?;
                Ok(value)
            }
            Some(Token::Ident(name)) => match name.as_str() {
                "pi" => Ok(std::f64::consts::PI),
                "e" => Ok(std::f64::consts::E),
                _ => {
                    let function = function(&name).ok_or(CalcError::UnknownName { name })?;
                    self.expect(Token::LParen)?;
                    self.descend()?;
                    let argument = self.expr();
                    self.depth -= 1;
                    let argument = argument?;
                    self.expect(Token::RParen)?;
                    Ok(function(argument))
                }
            },
            Some(_) => {
                self.pos -= 1;
                Err(self.unexpected())
            }
            None => Err(CalcError::UnexpectedEnd),
        }
    }
}

fn function(name: &str) -> Option<fn(f64) -> f64> {
    let f: fn(f64) -> f64 = match name {
        "sqrt" => f64::sqrt,
        "abs" => f64::abs,
        "sin" => f64::sin,
        "cos" => f64::cos,
        "tan" => f64::tan,
        "ln" => f64::ln,
        "log" => f64::log10,
        "round" => f64::round,
        "floor" => f64::floor,
        "ceil" => f64::ceil,
        _ => return None,
    };
    Some(f)
}

/// Evaluate an arithmetic expression.
pub fn evaluate(expression: &str) -> Result<f64, CalcError> {
    if expression.chars().count() > MAX_EXPRESSION_CHARS {
        return Err(CalcError::TooLong);
    }
    let tokens = tokenize(expression)?;
    if tokens.is_empty() {
        return Err(CalcError::Empty);
    }

    let mut parser = Parser {
        tokens,
        pos: 0,
        depth: 0,
    };
    let value = parser.expr()?;
    if parser.pos < parser.tokens.len() {
        return Err(parser.unexpected());
    }
    if !value.is_finite() {
        return Err(CalcError::NotFinite);
    }
    Ok(value)
}

/// Integral results render without a fractional part.
fn to_json_number(value: f64) -> Value {
    if value.fract() == 0.0 && value.abs() < 1e15 {
        json!(value as i64)
    } else {
        json!(value)
    }
}

// ─── Tool ────────────────────────────────────────────────────────────────────

pub struct Calculator;

#[async_trait]
impl ToolInvoker for Calculator {
    async fn invoke(&self, arguments: Value) -> anyhow::Result<Value> {
        let expression = arguments
            .get("expression")
            .and_then(Value::as_str)
            .context("missing required argument 'expression'")?;

        let value = evaluate(expression).with_context(|| format!("cannot evaluate '{expression}'"))?;
        Ok(to_json_number(value))
    }
}

impl Tool for Calculator {
    fn definition(&self) -> ToolDefinition {
        ToolDefinition {
            name: "calculator".into(),
            description: "Evaluate an arithmetic expression. Supports + - * / % ^, parentheses, \
                pi, e, and sqrt, abs, sin, cos, tan, ln, log, round, floor, ceil."
                .into(),
            parameters: json!({
                "type": "object",
                "properties": {
                    "expression": {
                        "type": "string",
                        "description": "Expression to evaluate, e.g. (2 + 3) * sqrt(16)"
                    }
                },
                "required": ["expression"]
            }),
        }
    }
}

// ─── Tests ───────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    fn approx(expression: &str, expected: f64) {
        let value = evaluate(expression).unwrap();
        assert!(
            (value - expected).abs() < 1e-9,
            "{expression} = {value}, expected {expected}"
        );
    }

    #[test]
    fn test_precedence_and_associativity() {
        approx("2+2", 4.0);
        approx("2 + 3 * 4", 14.0);
        approx("(2 + 3) * 4", 20.0);
        approx("10 - 4 - 3", 3.0);
        approx("2^3^2", 512.0);
        approx("2 ** 10", 1024.0);
        approx("-2^2", -4.0);
        approx("2^-1", 0.5);
        approx("7 % 3", 1.0);
        approx("--3", 3.0);
    }

    #[test]
    fn test_constants_and_functions() {
        approx("pi", std::f64::consts::PI);
        approx("2 * e", 2.0 * std::f64::consts::E);
        approx("sqrt(16) + abs(-2)", 6.0);
        approx("log(1000)", 3.0);
        approx("ln(e)", 1.0);
        approx("round(2.5) + floor(1.9) + ceil(1.1)", 3.0 + 1.0 + 2.0);
        approx("cos(0) + sin(0) + tan(0)", 1.0);
        approx("SQRT(9)", 3.0);
    }

    #[test]
    fn test_errors() {
        assert_eq!(evaluate("1/0"), Err(CalcError::DivisionByZero));
        assert_eq!(evaluate("5 % 0"), Err(CalcError::DivisionByZero));
        assert_eq!(evaluate(""), Err(CalcError::Empty));
        assert_eq!(evaluate("2 +"), Err(CalcError::UnexpectedEnd));
        assert_eq!(evaluate("(1 + 2"), Err(CalcError::UnexpectedEnd));
        assert!(matches!(evaluate("1 2"), Err(CalcError::UnexpectedToken { position: 2, .. })));
        assert!(matches!(evaluate("2 & 3"), Err(CalcError::UnexpectedChar { ch: '&', .. })));
        assert!(matches!(evaluate("1.2.3"), Err(CalcError::InvalidNumber { .. })));
        assert!(matches!(evaluate("exit(1)"), Err(CalcError::UnknownName { .. })));
        assert_eq!(evaluate("sqrt(-1)"), Err(CalcError::NotFinite));
    }

    #[test]
    fn test_code_is_rejected() {
        assert!(evaluate("process.exit()").is_err());
        assert!(evaluate("a = 1").is_err());
    }

    #[test]
    fn test_nesting_is_bounded() {
        let deep = format!("{}1{}", "(".repeat(100), ")".repeat(100));
        assert_eq!(evaluate(&deep), Err(CalcError::TooDeep));
        let ok = format!("{}1{}", "(".repeat(10), ")".repeat(10));
        approx(&ok, 1.0);
    }

    #[tokio::test]
    async fn test_tool_returns_number() {
        let result = Calculator
            .invoke(json!({"expression": "2+2"}))
            .await
            .unwrap();
        assert_eq!(result, json!(4));

        let result = Calculator
            .invoke(json!({"expression": "1/4"}))
            .await
            .unwrap();
        assert_eq!(result, json!(0.25));
    }

    #[tokio::test]
    async fn test_tool_failures() {
        let err = Calculator
            .invoke(json!({"expression": "1/0"}))
            .await
            .unwrap_err();
        assert!(format!("{err:#}").contains("division by zero"));

        assert!(Calculator.invoke(json!({})).await.is_err());
    }
}
