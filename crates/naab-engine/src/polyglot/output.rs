//! Extracts a block's return value from captured stdout.
//!
//! Executor scaffolding frames the payload with a sentinel line: text
//! before the sentinel is log output, text after it is the JSON return
//! value. Output without a sentinel falls back to heuristics — the last
//! balanced JSON document, else the last literal on its own line.
//! Number parsing never consults the locale.

use crate::ast::TypeExpr;
use crate::interpreter::Value;
use crate::polyglot::marshal::json_to_value;
use serde_json::Value as Json;

/// Marker emitted by executor scaffolding on its own line, directly
/// before the JSON payload.
pub const RESULT_SENTINEL: &str = "__NAAB_RESULT__";

/// Parsed executor output.
#[derive(Debug)]
pub struct ParsedOutput {
    /// The recovered return value (Null when nothing was recoverable).
    pub return_value: Value,
    /// Captured log output (everything that was not the payload).
    pub log_output: String,
}

/// Split `stdout` into log output and a return value.
///
/// `hint` is the declared return type: when JSON parsing fails but the
/// payload fits the hint as a plain literal, the literal is accepted.
pub fn parse_output(stdout: &str, hint: Option<&TypeExpr>) -> ParsedOutput {
    if let Some(at) = stdout.rfind(RESULT_SENTINEL) {
        let logs = &stdout[..at];
        let payload = stdout[at + RESULT_SENTINEL.len()..].trim();
        let value = parse_payload(payload, hint);
        return match value {
            Some(v) => ParsedOutput {
                return_value: v,
                log_output: trim_trailing_newline(logs).to_string(),
            },
            None => ParsedOutput {
                return_value: Value::Null,
                log_output: trim_trailing_newline(stdout).to_string(),
            },
        };
    }

    // No sentinel: heuristically take the last JSON document.
    if let Some((value, start)) = last_json_document(stdout) {
        return ParsedOutput {
            return_value: value,
            log_output: trim_trailing_newline(&stdout[..start]).to_string(),
        };
    }

    // Else the last non-empty line, if it reads as a literal.
    if let Some(line) = stdout.lines().rev().find(|l| !l.trim().is_empty()) {
        if let Some(value) = parse_literal(line.trim(), hint) {
            let start = line.as_ptr() as usize - stdout.as_ptr() as usize;
            return ParsedOutput {
                return_value: value,
                log_output: trim_trailing_newline(&stdout[..start]).to_string(),
            };
        }
    }

    ParsedOutput {
        return_value: Value::Null,
        log_output: trim_trailing_newline(stdout).to_string(),
    }
}

fn parse_payload(payload: &str, hint: Option<&TypeExpr>) -> Option<Value> {
    if payload.is_empty() {
        return Some(Value::Null);
    }
    if let Ok(json) = serde_json::from_str::<Json>(payload) {
        return Some(json_to_value(&json));
    }
    parse_literal(payload, hint)
}

/// Plain-literal fallbacks, matching the loose forms foreign runtimes
/// print: bare ints and floats, `True`/`False`, `null`/`nil`/`None`.
fn parse_literal(text: &str, hint: Option<&TypeExpr>) -> Option<Value> {
    let trimmed = text.trim();
    if trimmed.is_empty() {
        return None;
    }
    if is_integer_literal(trimmed) {
        if let Ok(i) = trimmed.parse::<i64>() {
            return Some(Value::Int(i));
        }
    }
    if is_float_literal(trimmed) {
        if let Ok(f) = trimmed.parse::<f64>() {
            return Some(Value::Float(f));
        }
    }
    match trimmed {
        "true" | "True" | "TRUE" => return Some(Value::Bool(true)),
        "false" | "False" | "FALSE" => return Some(Value::Bool(false)),
        "null" | "nil" | "None" => return Some(Value::Null),
        _ => {}
    }
    // A bare string is only accepted when the declared type asks for one.
    if matches!(hint, Some(TypeExpr::String)) {
        return Some(Value::string(trimmed));
    }
    None
}

fn is_integer_literal(s: &str) -> bool {
    let digits = s.strip_prefix('-').unwrap_or(s);
    !digits.is_empty() && digits.bytes().all(|b| b.is_ascii_digit())
}

fn is_float_literal(s: &str) -> bool {
    let body = s.strip_prefix('-').unwrap_or(s);
    let Some((int_part, frac_part)) = body.split_once('.') else {
        return false;
    };
    !int_part.is_empty()
        && !frac_part.is_empty()
        && int_part.bytes().all(|b| b.is_ascii_digit())
        && frac_part.bytes().all(|b| b.is_ascii_digit())
}

/// Find the last `{`- or `[`-opened suffix of `text` that parses as
/// JSON. Returns the value and the byte offset where the document
/// starts.
fn last_json_document(text: &str) -> Option<(Value, usize)> {
    let bytes = text.as_bytes();
    for start in (0..bytes.len()).rev() {
        if bytes[start] != b'{' && bytes[start] != b'[' {
            continue;
        }
        let candidate = text[start..].trim_end();
        if let Ok(json) = serde_json::from_str::<Json>(candidate) {
            return Some((json_to_value(&json), start));
        }
    }
    None
}

fn trim_trailing_newline(s: &str) -> &str {
    s.strip_suffix('\n').unwrap_or(s)
}
