//! Capability-based sandbox guard.
//!
//! Side-effecting operations (block loads, block calls, filesystem and
//! network access, process spawning) consult the guard before
//! proceeding. A missing capability fails with Runtime/denied and emits
//! exactly one SECURITY_VIOLATION audit event.
//!
//! The guard is advisory: it blocks NAAb-level operations, not arbitrary
//! syscalls issued by foreign code that is already executing in-process.

use crate::error::NaabError;
use crate::security::AuditLogger;
use parking_lot::RwLock;
use std::collections::HashSet;
use std::fmt;
use std::sync::Arc;

/// Named permissions consulted by the guard.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Capability {
    /// Load a block from the registry.
    BlockLoad,
    /// Invoke a block (inline or loaded).
    BlockCall,
    /// Read from the filesystem.
    FsRead,
    /// Write to the filesystem.
    FsWrite,
    /// Open network connections.
    Network,
    /// Spawn child processes.
    SpawnProcess,
}

impl Capability {
    /// Wire name used in audit events.
    pub fn as_str(&self) -> &'static str {
        match self {
            Capability::BlockLoad => "BLOCK_LOAD",
            Capability::BlockCall => "BLOCK_CALL",
            Capability::FsRead => "FS_READ",
            Capability::FsWrite => "FS_WRITE",
            Capability::Network => "NETWORK",
            Capability::SpawnProcess => "SPAWN_PROCESS",
        }
    }

    /// All capabilities.
    pub fn all() -> [Capability; 6] {
        [
            Capability::BlockLoad,
            Capability::BlockCall,
            Capability::FsRead,
            Capability::FsWrite,
            Capability::Network,
            Capability::SpawnProcess,
        ]
    }
}

impl fmt::Display for Capability {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Process-wide capability set.
pub struct SandboxGuard {
    granted: RwLock<HashSet<Capability>>,
    audit: Arc<AuditLogger>,
}

impl SandboxGuard {
    /// Guard granting every capability (the default for trusted runs).
    pub fn permissive(audit: Arc<AuditLogger>) -> Self {
        Self {
            granted: RwLock::new(Capability::all().into_iter().collect()),
            audit,
        }
    }

    /// Guard granting only `caps`.
    pub fn with_capabilities(
        caps: impl IntoIterator<Item = Capability>,
        audit: Arc<AuditLogger>,
    ) -> Self {
        Self {
            granted: RwLock::new(caps.into_iter().collect()),
            audit,
        }
    }

    /// Grant a capability.
    pub fn grant(&self, cap: Capability) {
        self.granted.write().insert(cap);
    }

    /// Revoke a capability.
    pub fn revoke(&self, cap: Capability) {
        self.granted.write().remove(&cap);
    }

    /// True when `cap` is granted.
    pub fn has(&self, cap: Capability) -> bool {
        self.granted.read().contains(&cap)
    }

    /// Gate `operation` on `subject` behind `cap`.
    ///
    /// Denial logs one SECURITY_VIOLATION event and fails with
    /// Runtime/denied naming the operation and the missing capability.
    pub fn require(&self, cap: Capability, operation: &str, subject: &str) -> Result<(), NaabError> {
        if self.has(cap) {
            return Ok(());
        }
        self.audit.log_security_violation(operation, subject, cap.as_str());
        Err(NaabError::runtime(format!(
            "denied: {operation} on '{subject}' requires capability {cap}"
        )))
    }
}
