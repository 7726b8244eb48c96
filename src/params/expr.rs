//! Expression evaluator trait boundary plus a minimal reference
//! implementation (supplemented scope, §1/§9): arithmetic over
//! `+ - * / ^`, parentheses, unary minus, named variables, and the
//! elementary functions `sin cos exp ln sqrt abs`.

use std::collections::HashMap;

use crate::error::{CoreError, CoreResult};

/// Read/write access to named scalars during parameter-script evaluation
/// and initial-condition formula resolution. The driver depends on this
/// trait, not on any concrete evaluator, so a production deployment can
/// substitute a richer one without touching core semantics.
pub trait ExpressionEnv {
    fn get(&self, name: &str) -> Option<f64>;
    fn set(&mut self, name: &str, value: f64);
    fn eval(&self, expr: &str) -> CoreResult<f64>;
}

/// Evaluation environment backed by a flat symbol table and a small
/// recursive-descent parser. Supports loop-counter substitution (batch
/// mode writes `i1`, `i2`, … into the same table before PARSE re-runs).
#[derive(Debug, Clone, Default)]
pub struct ScalarEnv {
    symbols: HashMap<String, f64>,
}

impl ScalarEnv {
    pub fn new() -> Self {
        Self::default()
    }
}

impl ExpressionEnv for ScalarEnv {
    fn get(&self, name: &str) -> Option<f64> {
        self.symbols.get(name).copied()
    }

    fn set(&mut self, name: &str, value: f64) {
        self.symbols.insert(name.to_string(), value);
    }

    fn eval(&self, expr: &str) -> CoreResult<f64> {
        let tokens = tokenize(expr)?;
        let mut parser = Parser { tokens: &tokens, pos: 0, env: self };
        let value = parser.parse_expr()?;
        if parser.pos != tokens.len() {
            return Err(CoreError::Configuration(format!("trailing tokens in expression: {expr}")));
        }
        Ok(value)
    }
}

#[derive(Debug, Clone, PartialEq)]
enum Token {
    Number(f64),
    Ident(String),
    Plus,
    Minus,
    Star,
    Slash,
    Caret,
    LParen,
    RParen,
    Comma,
}

fn tokenize(src: &str) -> CoreResult<Vec<Token>> {
    let mut tokens = Vec::new();
    let chars: Vec<char> = src.chars().collect();
    let mut i = 0;
    while i < chars.len() {
        let c = chars[i];
        match c {
            ' ' | '\t' => i += 1,
            '+' => { tokens.push(Token::Plus); i += 1; }
            '-' => { tokens.push(Token::Minus); i += 1; }
            '*' => { tokens.push(Token::Star); i += 1; }
            '/' => { tokens.push(Token::Slash); i += 1; }
            '^' => { tokens.push(Token::Caret); i += 1; }
            '(' => { tokens.push(Token::LParen); i += 1; }
            ')' => { tokens.push(Token::RParen); i += 1; }
            ',' => { tokens.push(Token::Comma); i += 1; }
            c if c.is_ascii_digit() || c == '.' => {
                let start = i;
                while i < chars.len() && (chars[i].is_ascii_digit() || chars[i] == '.' || chars[i] == 'e' || chars[i] == 'E'
                    || ((chars[i] == '+' || chars[i] == '-') && i > start && (chars[i - 1] == 'e' || chars[i - 1] == 'E')))
                {
                    i += 1;
                }
                let text: String = chars[start..i].iter().collect();
                let v: f64 = text
                    .parse()
                    .map_err(|_| CoreError::Configuration(format!("bad number literal: {text}")))?;
                tokens.push(Token::Number(v));
            }
            c if c.is_alphabetic() || c == '_' => {
                let start = i;
                while i < chars.len() && (chars[i].is_alphanumeric() || chars[i] == '_') {
                    i += 1;
                }
                tokens.push(Token::Ident(chars[start..i].iter().collect()));
            }
            _ => return Err(CoreError::Configuration(format!("unexpected character '{c}' in expression"))),
        }
    }
    Ok(tokens)
}

struct Parser<'a> {
    tokens: &'a [Token],
    pos: usize,
    env: &'a ScalarEnv,
}

impl<'a> Parser<'a> {
    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos)
    }

    fn bump(&mut self) -> Option<&Token> {
        let t = self.tokens.get(self.pos);
        if t.is_some() {
            self.pos += 1;
        }
        t
    }

    // expr := term (('+' | '-') term)*
    fn parse_expr(&mut self) -> CoreResult<f64> {
        let mut value = self.parse_term()?;
        loop {
            match self.peek() {
                Some(Token::Plus) => { self.bump(); value += self.parse_term()?; }
                Some(Token::Minus) => { self.bump(); value -= self.parse_term()?; }
                _ => break,
            }
        }
        Ok(value)
    }

    // term := power (('*' | '/') power)*
    fn parse_term(&mut self) -> CoreResult<f64> {
        let mut value = self.parse_power()?;
        loop {
            match self.peek() {
                Some(Token::Star) => { self.bump(); value *= self.parse_power()?; }
                Some(Token::Slash) => {
                    self.bump();
                    let rhs = self.parse_power()?;
                    value /= rhs;
                }
                _ => break,
            }
        }
        Ok(value)
    }

    // power := unary ('^' power)?   (right-associative)
    fn parse_power(&mut self) -> CoreResult<f64> {
        let base = self.parse_unary()?;
        if let Some(Token::Caret) = self.peek() {
            self.bump();
            let exp = self.parse_power()?;
            return Ok(base.powf(exp));
        }
        Ok(base)
    }

    fn parse_unary(&mut self) -> CoreResult<f64> {
        if let Some(Token::Minus) = self.peek() {
            self.bump();
            return Ok(-self.parse_unary()?);
        }
        if let Some(Token::Plus) = self.peek() {
            self.bump();
            return self.parse_unary();
        }
        self.parse_atom()
    }

    fn parse_atom(&mut self) -> CoreResult<f64> {
        match self.bump().cloned() {
            Some(Token::Number(v)) => Ok(v),
            Some(Token::LParen) => {
                let v = self.parse_expr()?;
                match self.bump() {
                    Some(Token::RParen) => Ok(v),
                    _ => Err(CoreError::Configuration("expected closing parenthesis".into())),
                }
            }
            Some(Token::Ident(name)) => {
                if let Some(Token::LParen) = self.peek() {
                    self.bump();
                    let arg = self.parse_expr()?;
                    match self.bump() {
                        Some(Token::RParen) => {}
                        _ => return Err(CoreError::Configuration("expected closing parenthesis".into())),
                    }
                    apply_function(&name, arg)
                } else {
                    self.env
                        .get(&name)
                        .ok_or_else(|| CoreError::Configuration(format!("undefined variable: {name}")))
                }
            }
            other => Err(CoreError::Configuration(format!("unexpected token: {other:?}"))),
        }
    }
}

fn apply_function(name: &str, arg: f64) -> CoreResult<f64> {
    match name {
        "sin" => Ok(arg.sin()),
        "cos" => Ok(arg.cos()),
        "exp" => Ok(arg.exp()),
        "ln" => Ok(arg.ln()),
        "sqrt" => Ok(arg.sqrt()),
        "abs" => Ok(arg.abs()),
        other => Err(CoreError::Configuration(format!("unknown function: {other}"))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn arithmetic_precedence() {
        let env = ScalarEnv::new();
        assert_eq!(env.eval("2 + 3 * 4").unwrap(), 14.0);
        assert_eq!(env.eval("(2 + 3) * 4").unwrap(), 20.0);
        assert_eq!(env.eval("2 ^ 3 ^ 2").unwrap(), 512.0); // right-assoc: 2^(3^2)
    }

    #[test]
    fn unary_minus_and_functions() {
        let env = ScalarEnv::new();
        assert!((env.eval("sqrt(4) - 2.0").unwrap()).abs() < 1e-12);
        assert!((env.eval("-abs(-5)").unwrap() + 5.0).abs() < 1e-12);
    }

    #[test]
    fn named_variables_resolve() {
        let mut env = ScalarEnv::new();
        env.set("x", 3.0);
        env.set("y", 4.0);
        assert_eq!(env.eval("x*x + y*y").unwrap(), 25.0);
    }

    #[test]
    fn undefined_variable_errors() {
        let env = ScalarEnv::new();
        assert!(env.eval("missing + 1").is_err());
    }
}
