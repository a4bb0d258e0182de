//! Overflow-checked integer arithmetic for user values.

use crate::error::NaabError;

fn overflow(op: &str, a: i64, b: i64) -> NaabError {
    NaabError::value_error(format!("integer overflow in {a} {op} {b}"))
}

/// Checked addition; Value/overflow on wrap.
pub fn checked_add(a: i64, b: i64) -> Result<i64, NaabError> {
    a.checked_add(b).ok_or_else(|| overflow("+", a, b))
}

/// Checked subtraction; Value/overflow on wrap.
pub fn checked_sub(a: i64, b: i64) -> Result<i64, NaabError> {
    a.checked_sub(b).ok_or_else(|| overflow("-", a, b))
}

/// Checked multiplication; Value/overflow on wrap.
pub fn checked_mul(a: i64, b: i64) -> Result<i64, NaabError> {
    a.checked_mul(b).ok_or_else(|| overflow("*", a, b))
}

/// Checked division; Runtime error on division by zero, Value/overflow on
/// `i64::MIN / -1`.
pub fn checked_div(a: i64, b: i64) -> Result<i64, NaabError> {
    if b == 0 {
        return Err(NaabError::runtime("division by zero"));
    }
    a.checked_div(b).ok_or_else(|| overflow("/", a, b))
}

/// Checked remainder; Runtime error on zero modulus.
pub fn checked_rem(a: i64, b: i64) -> Result<i64, NaabError> {
    if b == 0 {
        return Err(NaabError::runtime("modulo by zero"));
    }
    a.checked_rem(b).ok_or_else(|| overflow("%", a, b))
}

/// Checked negation; Value/overflow on `-i64::MIN`.
pub fn checked_neg(a: i64) -> Result<i64, NaabError> {
    a.checked_neg()
        .ok_or_else(|| NaabError::value_error(format!("integer overflow in -{a}")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;

    #[test]
    fn test_normal_arithmetic() {
        assert_eq!(checked_add(2, 3).unwrap(), 5);
        assert_eq!(checked_sub(2, 3).unwrap(), -1);
        assert_eq!(checked_mul(6, 7).unwrap(), 42);
        assert_eq!(checked_div(7, 2).unwrap(), 3);
        assert_eq!(checked_rem(7, 2).unwrap(), 1);
        assert_eq!(checked_neg(5).unwrap(), -5);
    }

    #[test]
    fn test_overflow_is_value_error() {
        let err = checked_add(i64::MAX, 1).unwrap_err();
        assert_eq!(err.kind, ErrorKind::Value);
        assert!(checked_mul(i64::MAX, 2).is_err());
        assert!(checked_sub(i64::MIN, 1).is_err());
        assert!(checked_neg(i64::MIN).is_err());
        assert!(checked_div(i64::MIN, -1).is_err());
    }

    #[test]
    fn test_zero_divisors_are_runtime_errors() {
        assert_eq!(checked_div(1, 0).unwrap_err().kind, ErrorKind::Runtime);
        assert_eq!(checked_rem(1, 0).unwrap_err().kind, ErrorKind::Runtime);
    }
}
