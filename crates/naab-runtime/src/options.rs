//! Runtime configuration.

use naab_engine::security::Capability;
use std::path::PathBuf;

/// Options controlling a [`Session`](crate::Session).
#[derive(Debug, Clone)]
pub struct RuntimeOptions {
    /// Directory holding library blocks (`<id>` source files with
    /// `<id>.json` sidecars). `None` disables `use` statements.
    pub blocks_dir: Option<PathBuf>,

    /// Audit log path. `None` disables event logging.
    pub audit_log: Option<PathBuf>,

    /// Enable the audit hash chain.
    pub tamper_evident: bool,

    /// HMAC-SHA256 signing key for audit entries.
    pub hmac_key: Option<String>,

    /// Capabilities granted to the program. `None` grants all.
    pub capabilities: Option<Vec<Capability>>,

    /// Run independent inline blocks in parallel.
    pub parallel_polyglot: bool,

    /// Polyglot worker thread count (0 = auto).
    pub worker_threads: usize,

    /// Redact filesystem paths in rendered errors (production mode).
    pub redact_errors: bool,

    /// Extra subprocess interpreters to register, as
    /// `(language, program, file_extension)` triples.
    pub extra_interpreters: Vec<(String, String, String)>,
}

impl Default for RuntimeOptions {
    fn default() -> Self {
        Self {
            blocks_dir: None,
            audit_log: None,
            tamper_evident: false,
            hmac_key: None,
            capabilities: None,
            parallel_polyglot: true,
            worker_threads: 0,
            redact_errors: false,
            extra_interpreters: Vec::new(),
        }
    }
}
