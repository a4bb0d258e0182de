//! Callback signature validation at the FFI boundary.
//!
//! Foreign code holding a NAAb callable goes through these checks before
//! the callable runs: the handle must be non-null, the arity must match,
//! each argument's variant must be compatible with the declared parameter
//! type (`Any` matches anything), and the return value must match the
//! declared return type.

use crate::ast::TypeExpr;
use crate::error::NaabError;
use crate::interpreter::Value;
use std::os::raw::c_void;
use thiserror::Error;

/// Callback validation failures, raised back into the foreign runtime.
#[derive(Debug, Error)]
pub enum CallbackError {
    /// The callback handle was null.
    #[error("callback handle is null")]
    NullHandle,

    /// Argument count mismatch.
    #[error("callback expects {expected} arguments, got {actual}")]
    ArityMismatch {
        /// Declared parameter count.
        expected: usize,
        /// Supplied argument count.
        actual: usize,
    },

    /// An argument's variant is incompatible with its declared type.
    #[error("callback argument {index} expects {expected}, got {actual}")]
    ArgumentType {
        /// Zero-based argument position.
        index: usize,
        /// Declared type name.
        expected: String,
        /// Supplied variant name.
        actual: String,
    },

    /// The return value's variant is incompatible with the declared
    /// return type.
    #[error("callback return expects {expected}, got {actual}")]
    ReturnType {
        /// Declared type name.
        expected: String,
        /// Returned variant name.
        actual: String,
    },
}

impl From<CallbackError> for NaabError {
    fn from(err: CallbackError) -> Self {
        NaabError::type_error(format!("callback validation failed: {err}"))
    }
}

/// The handle must be non-null.
pub fn validate_handle(handle: *const c_void) -> Result<(), CallbackError> {
    if handle.is_null() {
        return Err(CallbackError::NullHandle);
    }
    Ok(())
}

/// The argument count must match the declared parameter count.
pub fn validate_arity(actual: usize, expected: usize) -> Result<(), CallbackError> {
    if actual != expected {
        return Err(CallbackError::ArityMismatch { expected, actual });
    }
    Ok(())
}

/// Every argument must be compatible with its declared type.
pub fn validate_args(args: &[Value], expected: &[TypeExpr]) -> Result<(), CallbackError> {
    validate_arity(args.len(), expected.len())?;
    for (index, (arg, ty)) in args.iter().zip(expected.iter()).enumerate() {
        if !arg.matches_type(ty) {
            return Err(CallbackError::ArgumentType {
                index,
                expected: ty.name().to_string(),
                actual: arg.type_name().to_string(),
            });
        }
    }
    Ok(())
}

/// The return value must be compatible with the declared return type.
pub fn validate_return(value: &Value, expected: &TypeExpr) -> Result<(), CallbackError> {
    if !value.matches_type(expected) {
        return Err(CallbackError::ReturnType {
            expected: expected.name().to_string(),
            actual: value.type_name().to_string(),
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_null_handle_rejected() {
        assert!(matches!(
            validate_handle(std::ptr::null()),
            Err(CallbackError::NullHandle)
        ));
        let marker = 1u8;
        assert!(validate_handle(&marker as *const u8 as *const c_void).is_ok());
    }

    #[test]
    fn test_arity_mismatch() {
        let err = validate_arity(2, 3).unwrap_err();
        assert_eq!(err.to_string(), "callback expects 3 arguments, got 2");
    }

    #[test]
    fn test_argument_types() {
        let args = vec![Value::Int(1), Value::string("x")];
        let expected = vec![TypeExpr::Int, TypeExpr::String];
        assert!(validate_args(&args, &expected).is_ok());

        let expected = vec![TypeExpr::Int, TypeExpr::Bool];
        let err = validate_args(&args, &expected).unwrap_err();
        assert!(err.to_string().contains("argument 1"));
        assert!(err.to_string().contains("bool"));
    }

    #[test]
    fn test_any_matches_everything() {
        let args = vec![Value::Null, Value::list(vec![])];
        assert!(validate_args(&args, &[TypeExpr::Any, TypeExpr::Any]).is_ok());
    }

    #[test]
    fn test_return_type_checked() {
        assert!(validate_return(&Value::Int(1), &TypeExpr::Int).is_ok());
        assert!(validate_return(&Value::Int(1), &TypeExpr::Float).is_ok()); // widening
        let err = validate_return(&Value::string("no"), &TypeExpr::Int).unwrap_err();
        assert!(matches!(err, CallbackError::ReturnType { .. }));
    }

    #[test]
    fn test_converts_to_type_error() {
        let err: NaabError = CallbackError::NullHandle.into();
        assert_eq!(err.kind, crate::error::ErrorKind::Type);
        assert!(err.message.contains("callback validation failed"));
    }
}
