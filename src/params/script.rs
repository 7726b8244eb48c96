//! Parameter-script reader (supplemented scope, §1/§6/§9): line-oriented
//! source of scalar definitions and commands. §1 excludes the parser as
//! an independent component, but the driver's PARSE state (§4.6) needs a
//! trait boundary to depend on; `ScriptSource` is that boundary, backed
//! here by an in-memory line reader sufficient for the exhaustive command
//! table of §6.

use std::collections::HashMap;
use std::env;

use crate::error::{CoreError, CoreResult};

/// One parsed line of a parameter script.
#[derive(Debug, Clone, PartialEq)]
pub enum Directive {
    /// `<name>  <expression>`.
    Assignment { name: String, expr: String },
    /// `<command> <option>[=<value>] ...`.
    Command { name: String, options: Vec<(String, Option<String>)> },
}

/// A source of parameter-script directives, decoupled from any concrete
/// file or string backing so the driver can be handed a pre-parsed batch
/// override without re-reading a file (spec §4.9 BATCH_NEXT re-enters
/// PARSE with loop-variable assignments already visible).
pub trait ScriptSource {
    fn directives(&self) -> CoreResult<Vec<Directive>>;
}

/// Parses an entire script held as a string in memory.
#[derive(Debug, Clone)]
pub struct InMemoryScript {
    text: String,
}

impl InMemoryScript {
    pub fn new(text: impl Into<String>) -> Self {
        Self { text: text.into() }
    }
}

impl ScriptSource for InMemoryScript {
    fn directives(&self) -> CoreResult<Vec<Directive>> {
        parse_script(&self.text)
    }
}

/// Recognized top-level command names (spec §6's exhaustive table).
const COMMANDS: &[&str] = &["set", "icond", "grid", "mnemonic", "continue_if", "break"];

fn parse_script(text: &str) -> CoreResult<Vec<Directive>> {
    let mut out = Vec::new();
    for (lineno, raw_line) in text.lines().enumerate() {
        let line = strip_comment(raw_line).trim();
        if line.is_empty() {
            continue;
        }
        let expanded = expand_env_vars(line).map_err(|e| {
            CoreError::Configuration(format!("line {}: {e}", lineno + 1))
        })?;
        out.push(parse_line(&expanded).map_err(|e| {
            CoreError::Configuration(format!("line {}: {e}", lineno + 1))
        })?);
    }
    Ok(out)
}

/// Strips a `#`-prefixed comment, honoring double-quoted strings (a `#`
/// inside quotes is literal).
fn strip_comment(line: &str) -> &str {
    let mut in_quotes = false;
    let mut escaped = false;
    for (idx, c) in line.char_indices() {
        if escaped {
            escaped = false;
            continue;
        }
        match c {
            '\\' if in_quotes => escaped = true,
            '"' => in_quotes = !in_quotes,
            '#' if !in_quotes => return &line[..idx],
            _ => {}
        }
    }
    line
}

fn expand_env_vars(line: &str) -> Result<String, String> {
    let mut out = String::with_capacity(line.len());
    let chars: Vec<char> = line.chars().collect();
    let mut i = 0;
    while i < chars.len() {
        if chars[i] == '$' && i + 1 < chars.len() {
            if chars[i + 1] == '{' {
                let end = chars[i + 2..]
                    .iter()
                    .position(|&c| c == '}')
                    .ok_or_else(|| "unterminated ${...}".to_string())?;
                let name: String = chars[i + 2..i + 2 + end].iter().collect();
                let value = env::var(&name).map_err(|_| format!("unset environment variable: {name}"))?;
                out.push_str(&value);
                i += 2 + end + 1;
                continue;
            } else if chars[i + 1].is_alphabetic() || chars[i + 1] == '_' {
                let start = i + 1;
                let mut j = start;
                while j < chars.len() && (chars[j].is_alphanumeric() || chars[j] == '_') {
                    j += 1;
                }
                let name: String = chars[start..j].iter().collect();
                let value = env::var(&name).map_err(|_| format!("unset environment variable: {name}"))?;
                out.push_str(&value);
                i = j;
                continue;
            }
        }
        out.push(chars[i]);
        i += 1;
    }
    Ok(out)
}

fn parse_line(line: &str) -> Result<Directive, String> {
    let tokens = split_tokens(line)?;
    if tokens.is_empty() {
        return Err("empty directive after expansion".to_string());
    }

    if COMMANDS.contains(&tokens[0].as_str()) {
        let name = tokens[0].clone();
        let mut options = Vec::new();
        for tok in &tokens[1..] {
            match tok.split_once('=') {
                Some((k, v)) => options.push((k.to_string(), Some(unquote(v)))),
                None => options.push((tok.clone(), None)),
            }
        }
        return Ok(Directive::Command { name, options });
    }

    if tokens.len() < 2 {
        return Err(format!("assignment '{}' missing an expression", tokens[0]));
    }
    Ok(Directive::Assignment { name: tokens[0].clone(), expr: tokens[1..].join(" ") })
}

fn unquote(s: &str) -> String {
    if s.len() >= 2 && s.starts_with('"') && s.ends_with('"') {
        s[1..s.len() - 1].replace("\\\"", "\"")
    } else {
        s.to_string()
    }
}

/// Splits a line into whitespace-separated tokens, treating a
/// double-quoted run (with `\"` escapes) as a single token.
fn split_tokens(line: &str) -> Result<Vec<String>, String> {
    let mut tokens = Vec::new();
    let mut cur = String::new();
    let mut in_quotes = false;
    let mut escaped = false;
    let mut has_content = false;

    for c in line.chars() {
        if escaped {
            cur.push(c);
            escaped = false;
            continue;
        }
        match c {
            '\\' if in_quotes => escaped = true,
            '"' => {
                in_quotes = !in_quotes;
                cur.push('"');
                has_content = true;
            }
            c if c.is_whitespace() && !in_quotes => {
                if has_content {
                    tokens.push(cur.clone());
                    cur.clear();
                    has_content = false;
                }
            }
            c => {
                cur.push(c);
                has_content = true;
            }
        }
    }
    if in_quotes {
        return Err("unterminated quoted string".to_string());
    }
    if has_content {
        tokens.push(cur);
    }
    Ok(tokens)
}

/// Batch loop counters made visible to the evaluator before a BATCH_NEXT
/// re-parse (spec §4.9). A thin wrapper so the driver can hand the
/// evaluator-visible assignments to anything implementing `ScriptSource`
/// without threading a `HashMap` through every call site.
pub fn loop_counter_assignments(counters: &HashMap<String, i64>) -> Vec<Directive> {
    counters
        .iter()
        .map(|(name, value)| Directive::Assignment { name: name.clone(), expr: value.to_string() })
        .collect()
}
