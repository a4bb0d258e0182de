//! Runtime error taxonomy.
//!
//! Every failure in the engine travels through [`NaabError`]: a category,
//! a message, and optional source location, stack frames, "did you mean?"
//! suggestions and (for user `throw`) a value payload. Categories map to
//! stable 4-digit error-code prefixes.

mod report;
mod sanitize;
mod suggest;

pub use report::render_report;
pub use sanitize::sanitize_message;
pub use suggest::{closest_match, suggestions_for};

use crate::ast::Span;
use crate::interpreter::Value;
use std::fmt;

/// Error categories with their code prefixes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// E0xxx: incompatible operand variants, unmarshallable values.
    Type,
    /// E1xxx: division by zero, bounds, timeouts, capability denials,
    /// foreign-runtime faults.
    Runtime,
    /// E2xxx: block or module not found, version incompatibility.
    Import,
    /// E3xxx: surfaced by the parser; the core propagates.
    Syntax,
    /// E4xxx: undefined variable, with nearest-match suggestions.
    Name,
    /// E5xxx: invalid literal, overflow, size limits, malformed JSON.
    Value,
    /// User-raised `throw`; carries a value payload instead of a code.
    Throw,
}

impl ErrorKind {
    /// The 4-digit code prefix for this category.
    pub fn code_prefix(&self) -> &'static str {
        match self {
            ErrorKind::Type => "E0",
            ErrorKind::Runtime => "E1",
            ErrorKind::Import => "E2",
            ErrorKind::Syntax => "E3",
            ErrorKind::Name => "E4",
            ErrorKind::Value => "E5",
            ErrorKind::Throw => "",
        }
    }

    /// Category name as rendered to users.
    pub fn name(&self) -> &'static str {
        match self {
            ErrorKind::Type => "TypeError",
            ErrorKind::Runtime => "RuntimeError",
            ErrorKind::Import => "ImportError",
            ErrorKind::Syntax => "SyntaxError",
            ErrorKind::Name => "NameError",
            ErrorKind::Value => "ValueError",
            ErrorKind::Throw => "Throw",
        }
    }
}

/// A stack frame recorded while an error propagates out of function calls.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    /// Function name (`<main>` for the top level).
    pub function: String,
    /// Source file.
    pub file: String,
    /// Call-site location.
    pub span: Span,
}

/// The single error type carried through evaluation.
#[derive(Debug, Clone)]
pub struct NaabError {
    /// Category.
    pub kind: ErrorKind,
    /// Primary message. For `Throw` this is the display form of the payload.
    pub message: String,
    /// Where the error originated (not where it was caught).
    pub span: Option<Span>,
    /// Call stack, innermost first.
    pub frames: Vec<Frame>,
    /// Up to three nearest-match suggestions, most similar first.
    pub suggestions: Vec<String>,
    /// The thrown value, for `ErrorKind::Throw`.
    pub payload: Option<Value>,
}

impl NaabError {
    /// Build an error of `kind` with `message` and no location.
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            span: None,
            frames: Vec::new(),
            suggestions: Vec::new(),
            payload: None,
        }
    }

    /// E0xxx type error.
    pub fn type_error(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Type, message)
    }

    /// E1xxx runtime error.
    pub fn runtime(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Runtime, message)
    }

    /// E2xxx import error.
    pub fn import(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Import, message)
    }

    /// E3xxx syntax error (propagated, not produced, by the core).
    pub fn syntax(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Syntax, message)
    }

    /// E4xxx name error with candidate suggestions.
    pub fn name_error(name: &str, candidates: &[String]) -> Self {
        let mut err = Self::new(ErrorKind::Name, format!("undefined variable '{name}'"));
        // "Did you mean?" needs a unique closest candidate; ambiguous
        // ties and distant names offer no suggestion at all.
        if let Some(best) = suggest::closest_match(name, candidates) {
            let mut suggestions = suggest::suggestions_for(name, candidates);
            suggestions.retain(|s| *s != best);
            suggestions.insert(0, best);
            suggestions.truncate(3);
            err.suggestions = suggestions;
        }
        err
    }

    /// E5xxx value error.
    pub fn value_error(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Value, message)
    }

    /// A user-thrown error carrying `payload`.
    pub fn thrown(payload: Value) -> Self {
        let message = payload.display_string();
        Self {
            kind: ErrorKind::Throw,
            message,
            span: None,
            frames: Vec::new(),
            suggestions: Vec::new(),
            payload: Some(payload),
        }
    }

    /// Attach a source location if none is recorded yet.
    ///
    /// Errors keep the location where they originated; callers sprinkle
    /// this along the unwind path so the innermost span wins.
    pub fn with_span(mut self, span: Span) -> Self {
        if self.span.is_none() && span != Span::UNKNOWN {
            self.span = Some(span);
        }
        self
    }

    /// Push a stack frame as the error crosses a function boundary.
    pub fn push_frame(&mut self, function: &str, file: &str, span: Span) {
        self.frames.push(Frame {
            function: function.to_string(),
            file: file.to_string(),
            span,
        });
    }

    /// The payload a `catch` clause binds: the thrown value for `Throw`,
    /// otherwise the message as a string.
    pub fn catch_value(&self) -> Value {
        match &self.payload {
            Some(v) => v.clone(),
            None => Value::string(&self.message),
        }
    }
}

impl fmt::Display for NaabError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.kind == ErrorKind::Throw {
            write!(f, "uncaught throw: {}", self.message)?;
        } else {
            write!(f, "{}: {}", self.kind.name(), self.message)?;
        }
        if let Some(span) = self.span {
            write!(f, " (at {span})")?;
        }
        if let Some(best) = self.suggestions.first() {
            write!(f, ". Did you mean '{best}'?")?;
        }
        Ok(())
    }
}

impl std::error::Error for NaabError {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_code_prefixes() {
        assert_eq!(ErrorKind::Type.code_prefix(), "E0");
        assert_eq!(ErrorKind::Runtime.code_prefix(), "E1");
        assert_eq!(ErrorKind::Import.code_prefix(), "E2");
        assert_eq!(ErrorKind::Syntax.code_prefix(), "E3");
        assert_eq!(ErrorKind::Name.code_prefix(), "E4");
        assert_eq!(ErrorKind::Value.code_prefix(), "E5");
    }

    #[test]
    fn test_name_error_suggestion_in_display() {
        let err = NaabError::name_error(
            "countr",
            &["counter".to_string(), "total".to_string()],
        );
        assert_eq!(err.kind, ErrorKind::Name);
        let rendered = err.to_string();
        assert!(rendered.contains("undefined variable 'countr'"));
        assert!(rendered.contains("Did you mean 'counter'?"));
    }

    #[test]
    fn test_ambiguous_candidates_offer_no_suggestion() {
        // "cat" is distance 1 from both candidates; no unique minimum,
        // so no headline suggestion either.
        let err = NaabError::name_error("cat", &["cap".to_string(), "car".to_string()]);
        assert!(err.suggestions.is_empty());
        assert!(!err.to_string().contains("Did you mean"));
    }

    #[test]
    fn test_unique_closest_match_leads_suggestions() {
        // value is distance 1, valet and vault are distance 2: a unique
        // minimum leads and the near-misses ride along.
        let err = NaabError::name_error(
            "valu",
            &["value".to_string(), "valet".to_string(), "vault".to_string()],
        );
        assert_eq!(err.suggestions.first().map(String::as_str), Some("value"));
        assert!(err.suggestions.len() <= 3);
    }

    #[test]
    fn test_innermost_span_wins() {
        let err = NaabError::runtime("division by zero")
            .with_span(Span::new(4, 9))
            .with_span(Span::new(1, 1));
        assert_eq!(err.span, Some(Span::new(4, 9)));
    }

    #[test]
    fn test_thrown_payload_round_trip() {
        let err = NaabError::thrown(Value::string("boom"));
        assert_eq!(err.kind, ErrorKind::Throw);
        assert_eq!(err.catch_value().display_string(), "boom");
    }
}
