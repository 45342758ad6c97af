//! Arithmetic expression evaluator.
//!
//! Accepts numeric literals, parentheses and the operators `+ - * / // % **`.
//! `**` binds tighter than unary minus and is right-associative, `/` always
//! yields a float, `//` floors and `%` takes the sign of the divisor. Anything
//! else (names, calls, attribute access, strings) is rejected before evaluation.

use std::fmt;
use thiserror::Error;

const MAX_DEPTH: usize = 64;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ExprError {
    #[error("empty expression")]
    Empty,
    #[error("unexpected character '{ch}' at position {pos}")]
    UnexpectedChar { ch: char, pos: usize },
    #[error("names are not allowed: '{0}'")]
    Name(String),
    #[error("invalid number '{0}'")]
    InvalidNumber(String),
    #[error("unexpected end of expression")]
    UnexpectedEnd,
    #[error("unexpected '{token}' at position {pos}")]
    UnexpectedToken { token: String, pos: usize },
    #[error("division by zero")]
    DivisionByZero,
    #[error("result is too large")]
    Overflow,
    #[error("result is not a real number")]
    NotReal,
    #[error("expression is nested too deeply")]
    TooDeep,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Number {
    Int(i64),
    Float(f64),
}

impl Number {
    #[allow(clippy::cast_precision_loss)]
    fn as_f64(self) -> f64 {
        match self {
            Self::Int(i) => i as f64,
            Self::Float(f) => f,
        }
    }
}

impl fmt::Display for Number {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match *self {
            Self::Int(i) => write!(f, "{i}"),
            Self::Float(v) => f.write_str(&format_float(v)),
        }
    }
}

/// Shortest round-trip float text; whole floats keep a `.0`, extremes use `e±XX`.
fn format_float(v: f64) -> String {
    let magnitude = v.abs();
    if magnitude != 0.0 && !(1e-4..1e16).contains(&magnitude) {
        let raw = format!("{v:e}");
        let (mantissa, exponent) = raw.split_once('e').unwrap_or((raw.as_str(), "0"));
        let exponent: i32 = exponent.parse().unwrap_or(0);
        let sign = if exponent < 0 { '-' } else { '+' };
        return format!("{mantissa}e{sign}{:02}", exponent.abs());
    }
    if v.fract() == 0.0 {
        format!("{v:.1}")
    } else {
        format!("{v}")
    }
}

/// Evaluate an arithmetic expression.
///
/// # Errors
/// Returns an [`ExprError`] for malformed input or an arithmetic failure.
pub fn evaluate(input: &str) -> Result<Number, ExprError> {
    let tokens = tokenize(input)?;
    if tokens.is_empty() {
        return Err(ExprError::Empty);
    }
    let mut parser = Parser { tokens, pos: 0, depth: 0 };
    let value = parser.expr()?;
    if let Some((token, pos)) = parser.tokens.get(parser.pos) {
        return Err(ExprError::UnexpectedToken { token: token.to_string(), pos: *pos });
    }
    Ok(value)
}

#[derive(Debug, Clone, Copy, PartialEq)]
enum Token {
    Num(Number),
    Plus,
    Minus,
    Star,
    Slash,
    DoubleSlash,
    Percent,
    DoubleStar,
    LParen,
    RParen,
}

impl fmt::Display for Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Num(n) => write!(f, "{n}"),
            Self::Plus => f.write_str("+"),
            Self::Minus => f.write_str("-"),
            Self::Star => f.write_str("*"),
            Self::Slash => f.write_str("/"),
            Self::DoubleSlash => f.write_str("//"),
            Self::Percent => f.write_str("%"),
            Self::DoubleStar => f.write_str("**"),
            Self::LParen => f.write_str("("),
            Self::RParen => f.write_str(")"),
        }
    }
}

fn tokenize(input: &str) -> Result<Vec<(Token, usize)>, ExprError> {
    let chars: Vec<char> = input.chars().collect();
    let mut tokens = Vec::new();
    let mut i = 0;
    while i < chars.len() {
        let ch = chars[i];
        let start = i;
        let token = match ch {
            c if c.is_whitespace() => {
                i += 1;
                continue;
            }
            '0'..='9' | '.' => {
                let (number, end) = lex_number(&chars, i)?;
                i = end;
                tokens.push((Token::Num(number), start));
                continue;
            }
            c if c.is_alphabetic() || c == '_' => {
                let mut end = i;
                while end < chars.len() && (chars[end].is_alphanumeric() || chars[end] == '_') {
                    end += 1;
                }
                return Err(ExprError::Name(chars[i..end].iter().collect()));
            }
            '+' => Token::Plus,
            '-' => Token::Minus,
            '*' if chars.get(i + 1) == Some(&'*') => {
                i += 1;
                Token::DoubleStar
            }
            '*' => Token::Star,
            '/' if chars.get(i + 1) == Some(&'/') => {
                i += 1;
                Token::DoubleSlash
            }
            '/' => Token::Slash,
            '%' => Token::Percent,
            '(' => Token::LParen,
            ')' => Token::RParen,
            other => return Err(ExprError::UnexpectedChar { ch: other, pos: i }),
        };
        tokens.push((token, start));
        i += 1;
    }
    Ok(tokens)
}

fn lex_number(chars: &[char], start: usize) -> Result<(Number, usize), ExprError> {
    let mut end = start;
    let mut is_float = false;
    while end < chars.len() && chars[end].is_ascii_digit() {
        end += 1;
    }
    if end < chars.len() && chars[end] == '.' {
        is_float = true;
        end += 1;
        while end < chars.len() && chars[end].is_ascii_digit() {
            end += 1;
        }
    }
    if end < chars.len() && matches!(chars[end], 'e' | 'E') {
        let mut probe = end + 1;
        if probe < chars.len() && matches!(chars[probe], '+' | '-') {
            probe += 1;
        }
        if probe < chars.len() && chars[probe].is_ascii_digit() {
            is_float = true;
            end = probe;
            while end < chars.len() && chars[end].is_ascii_digit() {
                end += 1;
            }
        }
    }
    let text: String = chars[start..end].iter().collect();
    if text == "." {
        return Err(ExprError::InvalidNumber(text));
    }
    let number = if is_float {
        let value: f64 = text.parse().map_err(|_| ExprError::InvalidNumber(text.clone()))?;
        if !value.is_finite() {
            return Err(ExprError::Overflow);
        }
        Number::Float(value)
    } else {
        Number::Int(text.parse().map_err(|_| ExprError::Overflow)?)
    };
    Ok((number, end))
}

struct Parser {
    tokens: Vec<(Token, usize)>,
    pos: usize,
    depth: usize,
}

impl Parser {
    fn peek(&self) -> Option<Token> {
        self.tokens.get(self.pos).map(|(token, _)| *token)
    }

    fn advance(&mut self) -> Result<(Token, usize), ExprError> {
        let item = self.tokens.get(self.pos).copied().ok_or(ExprError::UnexpectedEnd)?;
        self.pos += 1;
        Ok(item)
    }

    fn enter(&mut self) -> Result<(), ExprError> {
        self.depth += 1;
        if self.depth > MAX_DEPTH {
            return Err(ExprError::TooDeep);
        }
        Ok(())
    }

    fn expr(&mut self) -> Result<Number, ExprError> {
        let mut value = self.term()?;
        while let Some(op @ (Token::Plus | Token::Minus)) = self.peek() {
            self.pos += 1;
            let rhs = self.term()?;
            value = if op == Token::Plus { add(value, rhs)? } else { sub(value, rhs)? };
        }
        Ok(value)
    }

    fn term(&mut self) -> Result<Number, ExprError> {
        let mut value = self.unary()?;
        while let Some(op @ (Token::Star | Token::Slash | Token::DoubleSlash | Token::Percent)) =
            self.peek()
        {
            self.pos += 1;
            let rhs = self.unary()?;
            value = match op {
                Token::Star => mul(value, rhs)?,
                Token::Slash => true_div(value, rhs)?,
                Token::DoubleSlash => floor_div(value, rhs)?,
                _ => modulo(value, rhs)?,
            };
        }
        Ok(value)
    }

    fn unary(&mut self) -> Result<Number, ExprError> {
        match self.peek() {
            Some(op @ (Token::Plus | Token::Minus)) => {
                self.pos += 1;
                self.enter()?;
                let operand = self.unary()?;
                self.depth -= 1;
                if op == Token::Minus { negate(operand) } else { Ok(operand) }
            }
            _ => self.power(),
        }
    }

    fn power(&mut self) -> Result<Number, ExprError> {
        let base = self.atom()?;
        if self.peek() == Some(Token::DoubleStar) {
            self.pos += 1;
            self.enter()?;
            let exponent = self.unary()?;
            self.depth -= 1;
            return pow(base, exponent);
        }
        Ok(base)
    }

    fn atom(&mut self) -> Result<Number, ExprError> {
        match self.advance()? {
            (Token::Num(n), _) => Ok(n),
            (Token::LParen, _) => {
                self.enter()?;
                let value = self.expr()?;
                self.depth -= 1;
                match self.advance()? {
                    (Token::RParen, _) => Ok(value),
                    (token, pos) => Err(ExprError::UnexpectedToken { token: token.to_string(), pos }),
                }
            }
            (token, pos) => Err(ExprError::UnexpectedToken { token: token.to_string(), pos }),
        }
    }
}

fn finite(value: f64) -> Result<Number, ExprError> {
    if value.is_finite() { Ok(Number::Float(value)) } else { Err(ExprError::Overflow) }
}

fn add(a: Number, b: Number) -> Result<Number, ExprError> {
    match (a, b) {
        (Number::Int(x), Number::Int(y)) => x.checked_add(y).map(Number::Int).ok_or(ExprError::Overflow),
        _ => finite(a.as_f64() + b.as_f64()),
    }
}

fn sub(a: Number, b: Number) -> Result<Number, ExprError> {
    match (a, b) {
        (Number::Int(x), Number::Int(y)) => x.checked_sub(y).map(Number::Int).ok_or(ExprError::Overflow),
        _ => finite(a.as_f64() - b.as_f64()),
    }
}

fn mul(a: Number, b: Number) -> Result<Number, ExprError> {
    match (a, b) {
        (Number::Int(x), Number::Int(y)) => x.checked_mul(y).map(Number::Int).ok_or(ExprError::Overflow),
        _ => finite(a.as_f64() * b.as_f64()),
    }
}

fn negate(a: Number) -> Result<Number, ExprError> {
    match a {
        Number::Int(x) => x.checked_neg().map(Number::Int).ok_or(ExprError::Overflow),
        Number::Float(x) => Ok(Number::Float(-x)),
    }
}

fn true_div(a: Number, b: Number) -> Result<Number, ExprError> {
    let divisor = b.as_f64();
    if divisor == 0.0 {
        return Err(ExprError::DivisionByZero);
    }
    finite(a.as_f64() / divisor)
}

fn floor_div(a: Number, b: Number) -> Result<Number, ExprError> {
    match (a, b) {
        (Number::Int(_), Number::Int(0)) => Err(ExprError::DivisionByZero),
        (Number::Int(x), Number::Int(y)) => {
            let q = x.checked_div(y).ok_or(ExprError::Overflow)?;
            let adjust = x % y != 0 && ((x < 0) != (y < 0));
            Ok(Number::Int(if adjust { q - 1 } else { q }))
        }
        _ => {
            let divisor = b.as_f64();
            if divisor == 0.0 {
                return Err(ExprError::DivisionByZero);
            }
            finite((a.as_f64() / divisor).floor())
        }
    }
}

fn modulo(a: Number, b: Number) -> Result<Number, ExprError> {
    match (a, b) {
        (Number::Int(_), Number::Int(0)) => Err(ExprError::DivisionByZero),
        (Number::Int(x), Number::Int(y)) => {
            let r = x.checked_rem(y).ok_or(ExprError::Overflow)?;
            Ok(Number::Int(if r != 0 && ((r < 0) != (y < 0)) { r + y } else { r }))
        }
        _ => {
            let divisor = b.as_f64();
            if divisor == 0.0 {
                return Err(ExprError::DivisionByZero);
            }
            let r = a.as_f64() % divisor;
            finite(if r != 0.0 && ((r < 0.0) != (divisor < 0.0)) { r + divisor } else { r })
        }
    }
}

fn pow(base: Number, exponent: Number) -> Result<Number, ExprError> {
    if let (Number::Int(b), Number::Int(e)) = (base, exponent) {
        if e >= 0 {
            match b {
                0 | 1 => return Ok(Number::Int(if e == 0 { 1 } else { b })),
                -1 => return Ok(Number::Int(if e % 2 == 0 { 1 } else { -1 })),
                _ => {}
            }
            let e = u32::try_from(e).map_err(|_| ExprError::Overflow)?;
            return b.checked_pow(e).map(Number::Int).ok_or(ExprError::Overflow);
        }
    }
    let (b, e) = (base.as_f64(), exponent.as_f64());
    if b == 0.0 && e < 0.0 {
        return Err(ExprError::DivisionByZero);
    }
    if b < 0.0 && e.fract() != 0.0 {
        return Err(ExprError::NotReal);
    }
    finite(b.powf(e))
}
