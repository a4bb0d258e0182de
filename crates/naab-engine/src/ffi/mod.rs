//! FFI boundary: foreign-exception containment and callback safety.
//!
//! Every foreign invocation is wrapped so exceptions (and panics) become
//! a tagged [`ForeignCallOutcome`] instead of unwinding across the
//! boundary. Callbacks from foreign code into NAAb are validated against
//! their declared signature before they run.

mod async_callback;
mod validator;

pub use async_callback::{
    execute_parallel, execute_race, execute_with_retry, AsyncCallback, AsyncCallbackPool,
    AsyncCallbackResult, CallbackFn, CancelToken,
};
pub use validator::{
    validate_args, validate_arity, validate_handle, validate_return, CallbackError,
};

use crate::error::NaabError;
use crate::interpreter::Value;
use std::panic::{catch_unwind, AssertUnwindSafe};

/// Tagged result of a foreign invocation.
#[derive(Debug)]
pub enum ForeignCallOutcome {
    /// The call completed with a value.
    Success(Value),
    /// The foreign runtime raised; the error stays on this side of the
    /// boundary.
    Failure {
        /// Foreign error type name (`ZeroDivisionError`, `panic`, ...).
        error_type: String,
        /// Foreign error message.
        message: String,
    },
}

impl ForeignCallOutcome {
    /// True for [`ForeignCallOutcome::Success`].
    pub fn is_success(&self) -> bool {
        matches!(self, ForeignCallOutcome::Success(_))
    }

    /// Convert into the engine error channel, tagging the language the
    /// failure came from.
    pub fn into_result(self, language: &str) -> Result<Value, NaabError> {
        match self {
            ForeignCallOutcome::Success(v) => Ok(v),
            ForeignCallOutcome::Failure {
                error_type,
                message,
            } => Err(NaabError::runtime(format!(
                "{language} raised {error_type}: {message}"
            ))),
        }
    }
}

/// Run `call` with panic containment.
///
/// A panic in foreign glue terminates only the current evaluation: it is
/// caught here and reported as a `panic` failure naming `site`.
pub fn contain<F>(site: &str, call: F) -> ForeignCallOutcome
where
    F: FnOnce() -> Result<Value, NaabError>,
{
    match catch_unwind(AssertUnwindSafe(call)) {
        Ok(Ok(value)) => ForeignCallOutcome::Success(value),
        Ok(Err(err)) => ForeignCallOutcome::Failure {
            error_type: err.kind.name().to_string(),
            message: err.message,
        },
        Err(panic) => ForeignCallOutcome::Failure {
            error_type: "panic".to_string(),
            message: panic_message(site, panic),
        },
    }
}

/// Panic-containment wrapper for the engine's own foreign call sites.
///
/// Errors the executor already tagged pass through unchanged; only
/// panics are converted, as a Runtime failure naming the language and
/// `site`.
pub fn guard<F>(site: &str, language: &str, call: F) -> Result<Value, NaabError>
where
    F: FnOnce() -> Result<Value, NaabError>,
{
    match catch_unwind(AssertUnwindSafe(call)) {
        Ok(result) => result,
        Err(panic) => Err(NaabError::runtime(format!(
            "{language} raised panic: {}",
            panic_message(site, panic)
        ))),
    }
}

fn panic_message(site: &str, panic: Box<dyn std::any::Any + Send>) -> String {
    panic
        .downcast_ref::<&str>()
        .map(|s| s.to_string())
        .or_else(|| panic.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| format!("unknown panic in {site}"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_success_passes_through() {
        let outcome = contain("test", || Ok(Value::Int(1)));
        assert!(outcome.is_success());
        assert_eq!(outcome.into_result("python").unwrap().as_int(), Some(1));
    }

    #[test]
    fn test_error_becomes_failure() {
        let outcome = contain("test", || Err(NaabError::runtime("bad call")));
        let err = outcome.into_result("python").unwrap_err();
        assert!(err.message.contains("python raised"));
        assert!(err.message.contains("bad call"));
    }

    #[test]
    fn test_guard_preserves_errors_and_contains_panics() {
        let value = guard("site", "python", || Ok(Value::Int(1))).unwrap();
        assert_eq!(value.as_int(), Some(1));

        let err = guard("site", "python", || {
            Err(crate::error::NaabError::type_error("kept as-is"))
        })
        .unwrap_err();
        assert_eq!(err.kind, crate::error::ErrorKind::Type);
        assert_eq!(err.message, "kept as-is");

        let err = guard("site", "python", || panic!("kaboom")).unwrap_err();
        assert!(err.message.contains("panic"));
        assert!(err.message.contains("kaboom"));
    }

    #[test]
    fn test_panic_is_contained() {
        let outcome = contain("glue", || panic!("ffi glue exploded"));
        match outcome {
            ForeignCallOutcome::Failure {
                error_type,
                message,
            } => {
                assert_eq!(error_type, "panic");
                assert!(message.contains("exploded"));
            }
            _ => panic!("expected failure"),
        }
    }
}
