//! Subprocess-style executors: shell, C#, and a generic interpreter
//! façade.
//!
//! Each call spawns a child process, feeds it the block source plus the
//! JSON-encoded bindings, captures stdout/stderr, and recovers the
//! return value through the output parser. Timeout expiry kills the
//! child — no orphan is left behind.

use crate::error::NaabError;
use crate::interpreter::Value;
use crate::limits::ScopedTimeout;
use crate::polyglot::marshal::{bindings_to_json, value_to_json};
use crate::polyglot::output::{parse_output, RESULT_SENTINEL};
use crate::polyglot::Executor;
use crate::security::{AuditLogger, Capability, SandboxGuard};
use std::io::{Read, Write};
use std::process::{Child, Command, Stdio};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

/// Collected output of a finished child process.
#[derive(Debug)]
pub struct ChildOutput {
    /// Captured stdout.
    pub stdout: String,
    /// Captured stderr.
    pub stderr: String,
    /// Whether the child exited successfully.
    pub success: bool,
}

/// Run `command` to completion under `timeout`, feeding `stdin_data`.
///
/// On expiry the child is killed and reaped before the error returns.
pub fn run_with_timeout(
    command: &mut Command,
    stdin_data: Option<&[u8]>,
    timeout: &ScopedTimeout,
    audit: &AuditLogger,
) -> Result<ChildOutput, NaabError> {
    command.stdin(Stdio::piped()).stdout(Stdio::piped()).stderr(Stdio::piped());
    let mut child = command
        .spawn()
        .map_err(|e| NaabError::runtime(format!("failed to spawn {:?}: {e}", command.get_program())))?;

    if let Some(data) = stdin_data {
        if let Some(mut stdin) = child.stdin.take() {
            let _ = stdin.write_all(data);
        }
    } else {
        drop(child.stdin.take());
    }

    // Drain pipes on their own threads so a chatty child cannot block on
    // a full pipe while we poll for exit.
    let stdout_reader = spawn_reader(child.stdout.take());
    let stderr_reader = spawn_reader(child.stderr.take());

    let status = loop {
        match child.try_wait() {
            Ok(Some(status)) => break status,
            Ok(None) => {
                if timeout.expired() {
                    kill_child(&mut child);
                    audit.log_timeout(timeout.operation(), timeout.limit().as_millis() as u64);
                    let _ = stdout_reader.join();
                    let _ = stderr_reader.join();
                    return Err(NaabError::runtime(format!(
                        "timeout: {} exceeded {} ms",
                        timeout.operation(),
                        timeout.limit().as_millis()
                    )));
                }
                thread::sleep(Duration::from_millis(10));
            }
            Err(e) => {
                kill_child(&mut child);
                return Err(NaabError::runtime(format!("wait failed: {e}")));
            }
        }
    };

    let stdout = stdout_reader.join().unwrap_or_default();
    let stderr = stderr_reader.join().unwrap_or_default();
    Ok(ChildOutput {
        stdout,
        stderr,
        success: status.success(),
    })
}

fn spawn_reader<R: Read + Send + 'static>(pipe: Option<R>) -> thread::JoinHandle<String> {
    thread::spawn(move || {
        let mut out = String::new();
        if let Some(mut pipe) = pipe {
            let mut buf = Vec::new();
            let _ = pipe.read_to_end(&mut buf);
            out = String::from_utf8_lossy(&buf).into_owned();
        }
        out
    })
}

fn kill_child(child: &mut Child) {
    let _ = child.kill();
    let _ = child.wait();
}

/// Decide whether a block body reads as a single expression (to be
/// wrapped so its value is captured) or as statements (run as-is).
pub fn is_expression(code: &str, language: &str) -> bool {
    let trimmed = code.trim();
    if trimmed.is_empty() || trimmed.lines().count() > 1 {
        return false;
    }
    match language {
        "csharp" | "cs" => {
            !trimmed.contains("class ")
                && !trimmed.contains("void ")
                && !trimmed.contains("using ")
                && !trimmed.ends_with(';')
        }
        "rust" => {
            !trimmed.contains("fn ")
                && !trimmed.contains("use ")
                && !trimmed.contains("struct ")
                && !trimmed.starts_with("let ")
                && !trimmed.ends_with(';')
        }
        "shell" | "sh" => false, // shell has no expression form
        _ => !trimmed.ends_with(';'),
    }
}

fn shell_quote(text: &str) -> String {
    format!("'{}'", text.replace('\'', r"'\''"))
}

fn next_scratch_id() -> u64 {
    use std::sync::atomic::{AtomicU64, Ordering};
    static NEXT: AtomicU64 = AtomicU64::new(0);
    NEXT.fetch_add(1, Ordering::Relaxed)
}

// ============================================================================
// Shell
// ============================================================================

/// Executes shell blocks via `/bin/sh -c`.
///
/// Bindings are prepended as shell variables; the return value is
/// recovered heuristically from stdout (the last JSON document or
/// literal line).
pub struct ShellExecutor {
    sandbox: Arc<SandboxGuard>,
    audit: Arc<AuditLogger>,
}

impl ShellExecutor {
    /// New shell executor.
    pub fn new(sandbox: Arc<SandboxGuard>, audit: Arc<AuditLogger>) -> Self {
        Self { sandbox, audit }
    }

    fn run(&self, code: &str, bindings: &[(String, Value)]) -> Result<ChildOutput, NaabError> {
        self.sandbox
            .require(Capability::SpawnProcess, "spawn_shell", "/bin/sh")?;

        let mut script = String::new();
        for (name, value) in bindings {
            let rendered = match value {
                Value::Str(s) => s.to_string(),
                other => other.display_string(),
            };
            script.push_str(&format!("{name}={}\n", shell_quote(&rendered)));
        }
        script.push_str(code);

        let timeout = ScopedTimeout::for_block("shell block");
        let mut command = Command::new("/bin/sh");
        command.arg("-c").arg(&script);
        run_with_timeout(&mut command, None, &timeout, &self.audit)
    }
}

impl Executor for ShellExecutor {
    fn language(&self) -> &str {
        "shell"
    }

    fn is_initialized(&self) -> bool {
        true
    }

    fn execute(&self, code: &str) -> Result<(), NaabError> {
        let output = self.run(code, &[])?;
        if !output.success {
            return Err(NaabError::runtime(format!(
                "shell block failed: {}",
                output.stderr.trim()
            )));
        }
        Ok(())
    }

    fn execute_with_return(
        &self,
        code: &str,
        bindings: &[(String, Value)],
    ) -> Result<Value, NaabError> {
        let output = self.run(code, bindings)?;
        if !output.success {
            return Err(NaabError::runtime(format!(
                "shell block failed: {}",
                output.stderr.trim()
            )));
        }
        Ok(parse_output(&output.stdout, None).return_value)
    }

    fn call_function(&self, name: &str, _args: &[Value]) -> Result<Value, NaabError> {
        Err(NaabError::runtime(format!(
            "shell blocks have no addressable entry points (requested '{name}')"
        )))
    }
}

// ============================================================================
// C#
// ============================================================================

/// Executes C# blocks via `dotnet-script`.
///
/// Expression bodies are wrapped so the result is serialised as JSON
/// behind the sentinel; statement bodies run as-is.
pub struct CSharpExecutor {
    sandbox: Arc<SandboxGuard>,
    audit: Arc<AuditLogger>,
}

impl CSharpExecutor {
    /// New C# executor.
    pub fn new(sandbox: Arc<SandboxGuard>, audit: Arc<AuditLogger>) -> Self {
        Self { sandbox, audit }
    }

    fn scaffold(&self, code: &str, bindings: &[(String, Value)]) -> Result<String, NaabError> {
        let mut script = String::from("using System;\nusing System.Text.Json;\n");
        for (name, value) in bindings {
            let literal = value_to_json(value)?.to_string();
            script.push_str(&format!(
                "var {name} = JsonSerializer.Deserialize<JsonElement>({});\n",
                csharp_string_literal(&literal)
            ));
        }
        if is_expression(code, "csharp") {
            script.push_str(&format!(
                "var __naab_result = ({});\nConsole.WriteLine(\"{RESULT_SENTINEL}\");\nConsole.WriteLine(JsonSerializer.Serialize(__naab_result));\n",
                code.trim()
            ));
        } else {
            script.push_str(code);
            script.push('\n');
        }
        Ok(script)
    }

    fn run(&self, code: &str, bindings: &[(String, Value)]) -> Result<ChildOutput, NaabError> {
        self.sandbox
            .require(Capability::SpawnProcess, "spawn_csharp", "dotnet-script")?;
        let script = self.scaffold(code, bindings)?;

        let path = std::env::temp_dir().join(format!(
            "naab-cs-{}-{}.csx",
            std::process::id(),
            next_scratch_id()
        ));
        std::fs::write(&path, &script)
            .map_err(|e| NaabError::runtime(format!("cannot write C# scaffold: {e}")))?;

        let timeout = ScopedTimeout::for_block("csharp block");
        let mut command = Command::new("dotnet-script");
        command.arg(&path);
        let result = run_with_timeout(&mut command, None, &timeout, &self.audit);
        let _ = std::fs::remove_file(&path);
        result
    }
}

fn csharp_string_literal(text: &str) -> String {
    format!(
        "\"{}\"",
        text.replace('\\', "\\\\").replace('"', "\\\"")
    )
}

impl Executor for CSharpExecutor {
    fn language(&self) -> &str {
        "csharp"
    }

    fn is_initialized(&self) -> bool {
        true
    }

    fn execute(&self, code: &str) -> Result<(), NaabError> {
        let output = self.run(code, &[])?;
        if !output.success {
            return Err(NaabError::runtime(format!(
                "csharp block failed: {}",
                output.stderr.trim()
            )));
        }
        Ok(())
    }

    fn execute_with_return(
        &self,
        code: &str,
        bindings: &[(String, Value)],
    ) -> Result<Value, NaabError> {
        let output = self.run(code, bindings)?;
        if !output.success {
            return Err(NaabError::runtime(format!(
                "csharp block failed: {}",
                output.stderr.trim()
            )));
        }
        Ok(parse_output(&output.stdout, None).return_value)
    }

    fn call_function(&self, name: &str, args: &[Value]) -> Result<Value, NaabError> {
        // Named entry points are invoked by synthesising a call
        // expression over the JSON-decoded arguments.
        let rendered: Vec<String> = args
            .iter()
            .map(|a| value_to_json(a).map(|j| j.to_string()))
            .collect::<Result<_, _>>()?;
        self.execute_with_return(&format!("{name}({})", rendered.join(", ")), &[])
    }
}

// ============================================================================
// Generic interpreter façade
// ============================================================================

/// Runs blocks through an arbitrary interpreter binary (`ruby`, `perl`,
/// ...). The block source is written to a temp file passed as argv[1]
/// and the JSON bindings as argv[2]; the block is responsible for
/// printing the sentinel followed by its JSON result.
pub struct GenericSubprocessExecutor {
    language: String,
    program: String,
    extension: String,
    sandbox: Arc<SandboxGuard>,
    audit: Arc<AuditLogger>,
}

impl GenericSubprocessExecutor {
    /// Façade for `language` running `program`.
    pub fn new(
        language: &str,
        program: &str,
        extension: &str,
        sandbox: Arc<SandboxGuard>,
        audit: Arc<AuditLogger>,
    ) -> Self {
        Self {
            language: language.to_string(),
            program: program.to_string(),
            extension: extension.to_string(),
            sandbox,
            audit,
        }
    }

    fn run(&self, code: &str, bindings: &[(String, Value)]) -> Result<ChildOutput, NaabError> {
        self.sandbox
            .require(Capability::SpawnProcess, "spawn_subprocess", &self.program)?;

        let path = std::env::temp_dir().join(format!(
            "naab-{}-{}-{}.{}",
            self.language,
            std::process::id(),
            next_scratch_id(),
            self.extension
        ));
        std::fs::write(&path, code)
            .map_err(|e| NaabError::runtime(format!("cannot write block source: {e}")))?;

        let timeout = ScopedTimeout::new(
            format!("{} block", self.language),
            crate::limits::DEFAULT_BLOCK_TIMEOUT,
        );
        let mut command = Command::new(&self.program);
        command.arg(&path).arg(bindings_to_json(bindings)?);
        let result = run_with_timeout(&mut command, None, &timeout, &self.audit);
        let _ = std::fs::remove_file(&path);
        result
    }
}

impl Executor for GenericSubprocessExecutor {
    fn language(&self) -> &str {
        &self.language
    }

    fn is_initialized(&self) -> bool {
        true
    }

    fn execute(&self, code: &str) -> Result<(), NaabError> {
        let output = self.run(code, &[])?;
        if !output.success {
            return Err(NaabError::runtime(format!(
                "{} block failed: {}",
                self.language,
                output.stderr.trim()
            )));
        }
        Ok(())
    }

    fn execute_with_return(
        &self,
        code: &str,
        bindings: &[(String, Value)],
    ) -> Result<Value, NaabError> {
        let output = self.run(code, bindings)?;
        if !output.success {
            return Err(NaabError::runtime(format!(
                "{} block failed: {}",
                self.language,
                output.stderr.trim()
            )));
        }
        Ok(parse_output(&output.stdout, None).return_value)
    }

    fn call_function(&self, name: &str, _args: &[Value]) -> Result<Value, NaabError> {
        Err(NaabError::runtime(format!(
            "{} blocks have no addressable entry points (requested '{name}')",
            self.language
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::security::AuditConfig;

    fn services() -> (Arc<SandboxGuard>, Arc<AuditLogger>) {
        let audit = Arc::new(AuditLogger::disabled());
        (Arc::new(SandboxGuard::permissive(audit.clone())), audit)
    }

    #[test]
    fn test_expression_detection() {
        assert!(is_expression("1 + 2", "csharp"));
        assert!(!is_expression("Console.WriteLine(1);", "csharp"));
        assert!(!is_expression("using System;", "csharp"));
        assert!(is_expression("a * b", "rust"));
        assert!(!is_expression("let x = 1;", "rust"));
        assert!(!is_expression("echo hi", "shell"));
        assert!(!is_expression("line one\nline two", "csharp"));
    }

    #[test]
    fn test_shell_quote() {
        assert_eq!(shell_quote("plain"), "'plain'");
        assert_eq!(shell_quote("it's"), r"'it'\''s'");
    }

    #[cfg(unix)]
    #[test]
    fn test_shell_executor_returns_last_line() {
        let (sandbox, audit) = services();
        let exec = ShellExecutor::new(sandbox, audit);
        let value = exec.execute_with_return("echo computing; echo 42", &[]).unwrap();
        assert_eq!(value.as_int(), Some(42));
    }

    #[cfg(unix)]
    #[test]
    fn test_shell_executor_sees_bindings() {
        let (sandbox, audit) = services();
        let exec = ShellExecutor::new(sandbox, audit);
        let bindings = vec![("greeting".to_string(), Value::Int(7))];
        let value = exec.execute_with_return("echo \"$greeting\"", &bindings).unwrap();
        assert_eq!(value.as_int(), Some(7));
    }

    #[cfg(unix)]
    #[test]
    fn test_shell_failure_carries_stderr() {
        let (sandbox, audit) = services();
        let exec = ShellExecutor::new(sandbox, audit);
        let err = exec.execute("echo oops >&2; exit 3").unwrap_err();
        assert!(err.message.contains("oops"));
    }

    #[cfg(unix)]
    #[test]
    fn test_timeout_kills_child() {
        let audit = Arc::new(AuditLogger::disabled());
        let timeout = ScopedTimeout::new("sleep test", Duration::from_millis(100));
        let mut command = Command::new("/bin/sh");
        command.arg("-c").arg("sleep 30");
        let started = std::time::Instant::now();
        let err = run_with_timeout(&mut command, None, &timeout, &audit).unwrap_err();
        assert!(err.message.contains("timeout"));
        // The child was killed and reaped well before its sleep ended.
        assert!(started.elapsed() < Duration::from_secs(5));
    }

    #[cfg(unix)]
    #[test]
    fn test_timeout_emits_audit_event() {
        let path = std::env::temp_dir().join(format!(
            "naab-subprocess-audit-{}.jsonl",
            std::process::id()
        ));
        std::fs::remove_file(&path).ok();
        let audit = AuditLogger::new(AuditConfig {
            log_file: Some(path.clone()),
            ..Default::default()
        });
        let timeout = ScopedTimeout::new("audit test", Duration::from_millis(50));
        let mut command = Command::new("/bin/sh");
        command.arg("-c").arg("sleep 30");
        run_with_timeout(&mut command, None, &timeout, &audit).unwrap_err();

        let text = std::fs::read_to_string(&path).unwrap();
        assert!(text.contains("TIMEOUT"));
        std::fs::remove_file(&path).ok();
    }

    #[test]
    fn test_sandbox_gates_spawn() {
        let audit = Arc::new(AuditLogger::disabled());
        let sandbox = Arc::new(SandboxGuard::with_capabilities([], audit.clone()));
        let exec = ShellExecutor::new(sandbox, audit);
        let err = exec.execute("echo hi").unwrap_err();
        assert!(err.message.contains("SPAWN_PROCESS"));
    }

    #[cfg(unix)]
    #[test]
    fn test_generic_executor_honours_sentinel_contract() {
        let (sandbox, audit) = services();
        let exec = GenericSubprocessExecutor::new("posix", "/bin/sh", "sh", sandbox, audit);
        let code = "echo working\necho __NAAB_RESULT__\necho '{\"ok\": true}'";
        let value = exec.execute_with_return(code, &[]).unwrap();
        assert!(matches!(
            value.member_get("ok").unwrap(),
            Value::Bool(true)
        ));
    }

    #[cfg(unix)]
    #[test]
    fn test_generic_executor_passes_bindings_as_argv() {
        let (sandbox, audit) = services();
        let exec = GenericSubprocessExecutor::new("posix", "/bin/sh", "sh", sandbox, audit);
        // $1 is the JSON bindings object.
        let code = "echo __NAAB_RESULT__\nprintf '%s' \"$1\"";
        let bindings = vec![("n".to_string(), Value::Int(9))];
        let value = exec.execute_with_return(code, &bindings).unwrap();
        assert_eq!(value.member_get("n").unwrap().as_int(), Some(9));
    }

    #[test]
    fn test_csharp_scaffold_wraps_expressions() {
        let (sandbox, audit) = services();
        let exec = CSharpExecutor::new(sandbox, audit);
        let script = exec
            .scaffold("a.GetInt32() + 1", &[("a".to_string(), Value::Int(1))])
            .unwrap();
        assert!(script.contains(RESULT_SENTINEL));
        assert!(script.contains("JsonSerializer.Serialize(__naab_result)"));
        assert!(script.contains("var a = JsonSerializer.Deserialize<JsonElement>(\"1\");"));
    }
}
