//! Resource limits: scoped timeouts, recursion and input caps.
//!
//! Timeouts are cooperative. A [`ScopedTimeout`] carries a wall-clock
//! deadline; foreign call sites, subprocess waits and pool tasks call
//! [`ScopedTimeout::check`] at their checkpoints. Embedded runtimes are
//! never preempted (see the concurrency notes in the crate docs).

mod safe_math;
mod safe_time;
mod secure;

pub use safe_math::{checked_add, checked_div, checked_mul, checked_neg, checked_rem, checked_sub};
pub use safe_time::{elapsed_ms, MonotonicCounter};
pub use secure::SecureString;

use crate::error::NaabError;
use std::time::{Duration, Instant};

/// Default timeout applied to foreign block execution.
pub const DEFAULT_BLOCK_TIMEOUT: Duration = Duration::from_secs(30);

/// Maximum evaluator recursion depth.
pub const MAX_EVAL_DEPTH: usize = 256;

/// Maximum total program source size in bytes.
pub const MAX_SOURCE_BYTES: usize = 1024 * 1024;

/// Maximum size of a single inline foreign-code block in bytes.
pub const MAX_INLINE_BLOCK_BYTES: usize = 256 * 1024;

/// A wall-clock deadline checked cooperatively.
#[derive(Debug, Clone)]
pub struct ScopedTimeout {
    started: Instant,
    limit: Duration,
    operation: String,
}

impl ScopedTimeout {
    /// Arm a timeout of `limit` for `operation`. The timer starts now.
    pub fn new(operation: impl Into<String>, limit: Duration) -> Self {
        Self {
            started: Instant::now(),
            limit,
            operation: operation.into(),
        }
    }

    /// Arm the default block-execution timeout.
    pub fn for_block(operation: impl Into<String>) -> Self {
        Self::new(operation, DEFAULT_BLOCK_TIMEOUT)
    }

    /// The configured limit.
    pub fn limit(&self) -> Duration {
        self.limit
    }

    /// Time left before the deadline, zero once expired.
    pub fn remaining(&self) -> Duration {
        self.limit.saturating_sub(self.started.elapsed())
    }

    /// True once the deadline has elapsed.
    pub fn expired(&self) -> bool {
        self.started.elapsed() >= self.limit
    }

    /// Cooperative checkpoint: Runtime/timeout once the deadline passes.
    pub fn check(&self) -> Result<(), NaabError> {
        if self.expired() {
            Err(NaabError::runtime(format!(
                "timeout: {} exceeded {} ms (ran {} ms)",
                self.operation,
                self.limit.as_millis(),
                elapsed_ms(self.started)
            )))
        } else {
            Ok(())
        }
    }

    /// The operation name this timeout guards.
    pub fn operation(&self) -> &str {
        &self.operation
    }
}

/// Reject program sources above [`MAX_SOURCE_BYTES`].
pub fn check_source_size(bytes: usize) -> Result<(), NaabError> {
    if bytes > MAX_SOURCE_BYTES {
        return Err(NaabError::value_error(format!(
            "source too large: {bytes} bytes (limit {MAX_SOURCE_BYTES})"
        )));
    }
    Ok(())
}

/// Reject inline blocks above [`MAX_INLINE_BLOCK_BYTES`].
pub fn check_inline_block_size(language: &str, bytes: usize) -> Result<(), NaabError> {
    if bytes > MAX_INLINE_BLOCK_BYTES {
        return Err(NaabError::value_error(format!(
            "inline {language} block too large: {bytes} bytes (limit {MAX_INLINE_BLOCK_BYTES})"
        )));
    }
    Ok(())
}

/// Evaluator recursion-depth guard.
///
/// Increment on entry to a recursive evaluation, decrement on exit; the
/// guard fails with Runtime/recursion past [`MAX_EVAL_DEPTH`].
#[derive(Debug, Default)]
pub struct DepthGuard {
    depth: usize,
    limit: usize,
}

impl DepthGuard {
    /// Guard with the default evaluator limit.
    pub fn new() -> Self {
        Self::with_limit(MAX_EVAL_DEPTH)
    }

    /// Guard with a custom limit.
    pub fn with_limit(limit: usize) -> Self {
        Self { depth: 0, limit }
    }

    /// Enter one level.
    pub fn enter(&mut self) -> Result<(), NaabError> {
        if self.depth >= self.limit {
            return Err(NaabError::runtime(format!(
                "recursion limit of {} exceeded",
                self.limit
            )));
        }
        self.depth += 1;
        Ok(())
    }

    /// Leave one level.
    pub fn exit(&mut self) {
        self.depth = self.depth.saturating_sub(1);
    }

    /// Current depth.
    pub fn depth(&self) -> usize {
        self.depth
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    #[test]
    fn test_timeout_passes_then_fails() {
        let t = ScopedTimeout::new("unit", Duration::from_millis(30));
        assert!(t.check().is_ok());
        assert!(!t.expired());
        thread::sleep(Duration::from_millis(40));
        assert!(t.expired());
        let err = t.check().unwrap_err();
        assert!(err.message.contains("timeout"));
        assert!(err.message.contains("unit"));
    }

    #[test]
    fn test_remaining_saturates() {
        let t = ScopedTimeout::new("unit", Duration::from_millis(1));
        thread::sleep(Duration::from_millis(5));
        assert_eq!(t.remaining(), Duration::ZERO);
    }

    #[test]
    fn test_depth_guard_enforces_limit() {
        let mut guard = DepthGuard::with_limit(3);
        for _ in 0..3 {
            guard.enter().unwrap();
        }
        assert!(guard.enter().is_err());
        guard.exit();
        assert!(guard.enter().is_ok());
    }

    #[test]
    fn test_size_caps() {
        assert!(check_source_size(10).is_ok());
        assert!(check_source_size(MAX_SOURCE_BYTES + 1).is_err());
        assert!(check_inline_block_size("python", 128).is_ok());
        let err = check_inline_block_size("python", MAX_INLINE_BLOCK_BYTES + 1).unwrap_err();
        assert!(err.message.contains("python"));
    }
}
