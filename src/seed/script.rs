//! `js:{...}` markers in seed documents.
//!
//! A marker holds a single call such as `encryptPassword('secret')` or
//! `randomValue(12)`. Arguments are literals (strings, numbers, booleans,
//! null); the call is dispatched through [`SeedingToolset`].

use super::toolset::SeedingToolset;
use crate::document::Document;
use regex::Regex;
use serde_json::{Number, Value};
use std::sync::LazyLock;
use thiserror::Error;
use tracing::warn;

const MARKER_PREFIX: &str = "js:{";

static MARKER: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"js:\{(.*?)\}").expect("marker pattern is a valid regex")
});

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ScriptError {
    #[error("unknown seeding function '{0}'")]
    UnknownFunction(String),
    #[error("invalid expression '{expr}': {message}")]
    Syntax { expr: String, message: String },
    #[error("{function}: {message}")]
    Arguments { function: String, message: String },
}

#[derive(Debug, Clone, PartialEq)]
pub struct Call {
    pub name: String,
    pub args: Vec<Value>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Marker<'a> {
    /// No `js:{` in the value.
    Absent,
    /// `js:{` present but with no expression or no closing brace.
    Malformed,
    Expr(&'a str),
}

pub fn find_marker(value: &str) -> Marker<'_> {
    if !value.contains(MARKER_PREFIX) {
        return Marker::Absent;
    }
    match MARKER.captures(value).and_then(|c| c.get(1)) {
        Some(m) if !m.as_str().trim().is_empty() => Marker::Expr(m.as_str()),
        _ => Marker::Malformed,
    }
}

/// Resolves every top-level string field carrying a marker. The whole field
/// value is replaced by the call result.
pub fn preprocess_document(
    mut document: Document,
    toolset: &SeedingToolset,
) -> Result<Document, ScriptError> {
    for (field, value) in document.iter_mut() {
        let Value::String(text) = value else {
            continue;
        };
        match find_marker(text) {
            Marker::Absent => {}
            Marker::Malformed => {
                warn!(field = %field, value = %text, "invalid replacement script");
            }
            Marker::Expr(expr) => {
                let call = parse_call(expr)?;
                *value = toolset.call(&call)?;
            }
        }
    }
    Ok(document)
}

pub fn parse_call(expr: &str) -> Result<Call, ScriptError> {
    let mut parser = Parser {
        expr,
        chars: expr.trim().chars().collect(),
        pos: 0,
    };
    let call = parser.call()?;
    parser.skip_ws();
    if parser.pos < parser.chars.len() {
        return Err(parser.error("unexpected trailing input"));
    }
    Ok(call)
}

struct Parser<'a> {
    expr: &'a str,
    chars: Vec<char>,
    pos: usize,
}

impl Parser<'_> {
    fn error(&self, message: impl Into<String>) -> ScriptError {
        ScriptError::Syntax {
            expr: self.expr.to_string(),
            message: message.into(),
        }
    }

    fn peek(&self) -> Option<char> {
        self.chars.get(self.pos).copied()
    }

    fn skip_ws(&mut self) {
        while self.peek().is_some_and(char::is_whitespace) {
            self.pos += 1;
        }
    }

    fn call(&mut self) -> Result<Call, ScriptError> {
        self.skip_ws();
        let name = self.ident()?;
        self.skip_ws();
        let mut args = Vec::new();
        if self.peek() != Some('(') {
            return Ok(Call { name, args });
        }
        self.pos += 1;
        self.skip_ws();
        if self.peek() == Some(')') {
            self.pos += 1;
            return Ok(Call { name, args });
        }
        loop {
            args.push(self.literal()?);
            self.skip_ws();
            match self.peek() {
                Some(',') => self.pos += 1,
                Some(')') => {
                    self.pos += 1;
                    return Ok(Call { name, args });
                }
                _ => return Err(self.error("expected ',' or ')'")),
            }
        }
    }

    fn ident(&mut self) -> Result<String, ScriptError> {
        let start = self.pos;
        while let Some(c) = self.peek() {
            let ok = if self.pos == start {
                c.is_ascii_alphabetic() || c == '_' || c == '$'
            } else {
                c.is_ascii_alphanumeric() || c == '_' || c == '$'
            };
            if !ok {
                break;
            }
            self.pos += 1;
        }
        if self.pos == start {
            return Err(self.error("expected a function name"));
        }
        Ok(self.chars[start..self.pos].iter().collect())
    }

    fn literal(&mut self) -> Result<Value, ScriptError> {
        self.skip_ws();
        match self.peek() {
            Some(q @ ('\'' | '"')) => self.string(q),
            Some(c) if c == '-' || c.is_ascii_digit() => self.number(),
            Some(c) if c.is_ascii_alphabetic() => {
                let word = self.ident()?;
                match word.as_str() {
                    "true" => Ok(Value::Bool(true)),
                    "false" => Ok(Value::Bool(false)),
                    "null" => Ok(Value::Null),
                    _ => Err(self.error(format!("'{word}' is not a literal"))),
                }
            }
            _ => Err(self.error("expected a literal argument")),
        }
    }

    fn string(&mut self, quote: char) -> Result<Value, ScriptError> {
        self.pos += 1;
        let mut out = String::new();
        while let Some(c) = self.peek() {
            self.pos += 1;
            match c {
                c if c == quote => return Ok(Value::String(out)),
                '\\' => {
                    let escaped = self.peek().ok_or_else(|| self.error("dangling escape"))?;
                    self.pos += 1;
                    out.push(match escaped {
                        'n' => '\n',
                        't' => '\t',
                        other => other,
                    });
                }
                c => out.push(c),
            }
        }
        Err(self.error("unterminated string"))
    }

    fn number(&mut self) -> Result<Value, ScriptError> {
        let start = self.pos;
        if self.peek() == Some('-') {
            self.pos += 1;
        }
        while self
            .peek()
            .is_some_and(|c| c.is_ascii_digit() || c == '.' || c == 'e' || c == 'E')
        {
            self.pos += 1;
        }
        let text: String = self.chars[start..self.pos].iter().collect();
        if let Ok(n) = text.parse::<i64>() {
            return Ok(Value::from(n));
        }
        text.parse::<f64>()
            .ok()
            .and_then(Number::from_f64)
            .map(Value::Number)
            .ok_or_else(|| self.error(format!("invalid number '{text}'")))
    }
}

#[cfg(test)]
mod tests {
    use super::{Marker, ScriptError, find_marker, parse_call, preprocess_document};
    use crate::document::doc;
    use crate::seed::toolset::{SeedingToolset, encrypt_password};
    use serde_json::{Value, json};

    #[test]
    fn markers_are_found_non_greedily() {
        assert_eq!(find_marker("plain"), Marker::Absent);
        assert_eq!(
            find_marker("js:{encryptPassword('a')} and js:{uuid()}"),
            Marker::Expr("encryptPassword('a')")
        );
        assert_eq!(find_marker("js:{}"), Marker::Malformed);
        assert_eq!(find_marker("js:{   }"), Marker::Malformed);
        assert_eq!(find_marker("js:{uuid()"), Marker::Malformed);
    }

    #[test]
    fn calls_parse_literal_arguments() {
        let call = parse_call(" pick('a, b', \"c\\\"d\", -3, 2.5, true, null) ").expect("parse");
        assert_eq!(call.name, "pick");
        assert_eq!(
            call.args,
            vec![
                json!("a, b"),
                json!("c\"d"),
                json!(-3),
                json!(2.5),
                json!(true),
                Value::Null
            ]
        );
        assert_eq!(parse_call("uuid").expect("bare").args, Vec::<Value>::new());
    }

    #[test]
    fn non_literal_expressions_are_rejected() {
        for expr in [
            "process.exit(1)",
            "f(g())",
            "f('a'",
            "f(x)",
            "1 + 1",
            "f() ; g()",
        ] {
            assert!(
                matches!(parse_call(expr), Err(ScriptError::Syntax { .. })),
                "{expr} should not parse"
            );
        }
    }

    #[test]
    fn password_marker_is_replaced_with_its_hash() {
        let toolset = SeedingToolset::default();
        let out = preprocess_document(
            doc(json!({
                "username": "admin",
                "password": "js:{encryptPassword('secret')}",
                "age": 3
            })),
            &toolset,
        )
        .expect("preprocess");
        assert_eq!(out.get("password"), Some(&json!(encrypt_password("secret"))));
        assert_eq!(out.get("username"), Some(&json!("admin")));
        assert_eq!(out.get("age"), Some(&json!(3)));
    }

    #[test]
    fn malformed_marker_leaves_field_untouched() {
        let toolset = SeedingToolset::default();
        let out = preprocess_document(doc(json!({"token": "js:{}"})), &toolset).expect("ok");
        assert_eq!(out.get("token"), Some(&json!("js:{}")));
    }

    #[test]
    fn unknown_function_fails_the_document() {
        let toolset = SeedingToolset::default();
        let err = preprocess_document(doc(json!({"x": "js:{eval('1')}"})), &toolset)
            .expect_err("unknown function");
        assert_eq!(err, ScriptError::UnknownFunction("eval".into()));
    }
}
