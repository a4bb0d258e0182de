//! Security subsystem: the capability sandbox and the audit log.

mod audit;
mod sandbox;

pub use audit::{
    verify_log, AuditConfig, AuditError, AuditEvent, AuditLogger, VerificationResult,
    GENESIS_PREV_HASH,
};
pub use sandbox::{Capability, SandboxGuard};
