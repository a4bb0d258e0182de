//! Per-language executor implementations.
//!
//! Embedded runtimes (Python, JavaScript) are feature-gated so the base
//! build carries no system prerequisites; the subprocess and dynamic-
//! library executors are always available.

pub mod cpp;
pub mod dylib;
pub mod rust_dylib;
pub mod subprocess;

#[cfg(feature = "javascript")]
pub mod javascript;
#[cfg(feature = "python")]
pub mod python;

use crate::polyglot::ExecutorRegistry;
use crate::security::{AuditLogger, SandboxGuard};
use std::sync::Arc;

/// Register every executor available in this build.
///
/// Languages: `rust` (dynamic libraries), `cpp`, `shell` (alias `sh`),
/// `csharp` (alias `cs`), plus `python` (alias `py`) and `javascript`
/// (alias `js`) when their features are enabled.
pub fn register_defaults(
    registry: &ExecutorRegistry,
    sandbox: Arc<SandboxGuard>,
    audit: Arc<AuditLogger>,
) {
    registry.register(Arc::new(rust_dylib::RustExecutor::new(
        sandbox.clone(),
        audit.clone(),
    )));
    registry.register(Arc::new(cpp::CppExecutor::new(
        sandbox.clone(),
        audit.clone(),
    )));

    let shell = Arc::new(subprocess::ShellExecutor::new(
        sandbox.clone(),
        audit.clone(),
    ));
    registry.register(shell.clone());
    registry.register_alias("sh", shell);

    let csharp = Arc::new(subprocess::CSharpExecutor::new(sandbox, audit));
    registry.register(csharp.clone());
    registry.register_alias("cs", csharp);

    #[cfg(feature = "python")]
    {
        let py = Arc::new(python::PythonExecutor::new());
        registry.register(py.clone());
        registry.register_alias("py", py);
    }

    #[cfg(feature = "javascript")]
    {
        let js = Arc::new(javascript::JsExecutor::new());
        registry.register(js.clone());
        registry.register_alias("js", js);
    }
}
