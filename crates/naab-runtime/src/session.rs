//! Program execution sessions.

use crate::{DirectoryBlockLoader, RuntimeOptions};
use naab_engine::ast::Program;
use naab_engine::error::{render_report, NaabError};
use naab_engine::interpreter::{Interpreter, InterpreterOptions, RuntimeContext};
use naab_engine::polyglot::executors::{register_defaults, subprocess::GenericSubprocessExecutor};
use naab_engine::polyglot::ExecutorRegistry;
use naab_engine::security::{AuditConfig, AuditLogger, SandboxGuard};
use naab_engine::limits::SecureString;
use std::sync::Arc;

/// A configured interpreter ready to run programs.
///
/// The session owns the executor registry, sandbox, audit logger and
/// block loader, wired together from [`RuntimeOptions`].
pub struct Session {
    interpreter: Interpreter,
    options: RuntimeOptions,
}

impl Session {
    /// Build a session from options.
    pub fn new(options: &RuntimeOptions) -> Self {
        let audit = Arc::new(AuditLogger::new(AuditConfig {
            log_file: options.audit_log.clone(),
            tamper_evident: options.tamper_evident,
            hmac_key: options.hmac_key.as_deref().map(SecureString::from),
            ..Default::default()
        }));

        let sandbox = Arc::new(match &options.capabilities {
            Some(caps) => SandboxGuard::with_capabilities(caps.iter().copied(), audit.clone()),
            None => SandboxGuard::permissive(audit.clone()),
        });

        let registry = Arc::new(ExecutorRegistry::new());
        register_defaults(&registry, sandbox.clone(), audit.clone());
        for (language, program, extension) in &options.extra_interpreters {
            registry.register(Arc::new(GenericSubprocessExecutor::new(
                language,
                program,
                extension,
                sandbox.clone(),
                audit.clone(),
            )));
        }

        #[cfg(feature = "python")]
        naab_engine::polyglot::executors::python::initialize();

        let ctx = RuntimeContext {
            registry,
            sandbox,
            audit,
            loader: options
                .blocks_dir
                .as_ref()
                .map(|dir| Arc::new(DirectoryBlockLoader::new(dir)) as _),
        };

        let worker_count = if options.worker_threads == 0 {
            naab_engine::polyglot::pool::default_worker_count()
        } else {
            options.worker_threads
        };

        let interpreter = Interpreter::new(
            ctx,
            InterpreterOptions {
                parallel_polyglot: options.parallel_polyglot,
                worker_count,
                source_file: "<main>".to_string(),
            },
        );

        Self {
            interpreter,
            options: options.clone(),
        }
    }

    /// Run a parsed program to completion.
    pub fn run(&mut self, program: &Program) -> Result<(), NaabError> {
        self.interpreter.run_program(program)
    }

    /// Render an error with source context for terminal display.
    pub fn render_error(&self, error: &NaabError, source: &str, file: &str) -> String {
        render_report(error, source, file, self.options.redact_errors)
    }

    /// The underlying interpreter, for embedding.
    pub fn interpreter_mut(&mut self) -> &mut Interpreter {
        &mut self.interpreter
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use naab_engine::ast::*;
    use naab_engine::error::ErrorKind;
    use naab_engine::security::Capability;
    use std::fs;

    fn sp() -> Span {
        Span::new(1, 1)
    }

    fn use_main(block_id: &str, alias: &str) -> Program {
        Program {
            uses: vec![Stmt::Use {
                block_id: block_id.to_string(),
                alias: alias.to_string(),
                span: sp(),
            }],
            source_file: "test.naab".to_string(),
            ..Default::default()
        }
    }

    fn blocks_dir(tag: &str) -> std::path::PathBuf {
        let dir = std::env::temp_dir().join(format!(
            "naab-session-{tag}-{}",
            std::process::id()
        ));
        fs::create_dir_all(&dir).unwrap();
        dir
    }

    #[cfg(unix)]
    #[test]
    fn test_use_statement_loads_and_calls_block() {
        let dir = blocks_dir("use");
        fs::write(
            dir.join("BLOCK-SH-ANSWER.json"),
            r#"{"name": "answer", "language": "shell", "file": "BLOCK-SH-ANSWER.sh"}"#,
        )
        .unwrap();
        fs::write(dir.join("BLOCK-SH-ANSWER.sh"), "echo 42").unwrap();

        let mut session = Session::new(&RuntimeOptions {
            blocks_dir: Some(dir.clone()),
            ..Default::default()
        });

        // use BLOCK-SH-ANSWER as answer; let r = answer(); return r
        let mut program = use_main("BLOCK-SH-ANSWER", "answer");
        program.main = vec![
            Stmt::VarDecl {
                name: "r".to_string(),
                init: Expr::Call {
                    callee: Box::new(Expr::Ident("answer".to_string(), sp())),
                    args: vec![],
                    span: sp(),
                },
                span: sp(),
            },
            Stmt::ExprStmt(Expr::Call {
                callee: Box::new(Expr::Ident("print".to_string(), sp())),
                args: vec![Expr::Ident("r".to_string(), sp())],
                span: sp(),
            }),
        ];
        session.run(&program).unwrap();
        fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn test_hash_mismatch_fails_import() {
        let dir = blocks_dir("mismatch");
        fs::write(
            dir.join("BLOCK-TAMPERED.json"),
            r#"{"name": "t", "language": "shell", "file": "BLOCK-TAMPERED.sh",
                "hash": "0000000000000000000000000000000000000000000000000000000000000000"}"#,
        )
        .unwrap();
        fs::write(dir.join("BLOCK-TAMPERED.sh"), "echo changed").unwrap();

        let audit_path = dir.join("audit.jsonl");
        let mut session = Session::new(&RuntimeOptions {
            blocks_dir: Some(dir.clone()),
            audit_log: Some(audit_path.clone()),
            ..Default::default()
        });

        let err = session.run(&use_main("BLOCK-TAMPERED", "t")).unwrap_err();
        assert_eq!(err.kind, ErrorKind::Import);
        assert!(err.message.contains("integrity"));

        let log = fs::read_to_string(&audit_path).unwrap();
        assert!(log.contains("HASH_MISMATCH"));
        fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn test_block_load_capability_enforced() {
        let dir = blocks_dir("caps");
        fs::write(
            dir.join("BLOCK-X.json"),
            r#"{"name": "x", "language": "shell", "file": "BLOCK-X.sh"}"#,
        )
        .unwrap();
        fs::write(dir.join("BLOCK-X.sh"), "echo 1").unwrap();

        let mut session = Session::new(&RuntimeOptions {
            blocks_dir: Some(dir.clone()),
            capabilities: Some(vec![Capability::BlockCall]),
            ..Default::default()
        });
        let err = session.run(&use_main("BLOCK-X", "x")).unwrap_err();
        assert!(err.message.contains("BLOCK_LOAD"));
        fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn test_render_error_includes_context() {
        let session = Session::new(&RuntimeOptions::default());
        let mut err = NaabError::runtime("division by zero");
        err.span = Some(Span::new(1, 5));
        let report = session.render_error(&err, "1 / 0", "main.naab");
        assert!(report.contains("RuntimeError"));
        assert!(report.contains("main.naab:1:5"));
    }

    #[test]
    fn test_default_registry_languages() {
        let session = Session::new(&RuntimeOptions::default());
        let langs = session.interpreter.context().registry.languages();
        for expected in ["rust", "cpp", "shell", "sh", "csharp", "cs"] {
            assert!(
                langs.contains(&expected.to_string()),
                "missing {expected} in {langs:?}"
            );
        }
    }

    #[test]
    fn test_extra_interpreter_registration() {
        let session = Session::new(&RuntimeOptions {
            extra_interpreters: vec![(
                "ruby".to_string(),
                "ruby".to_string(),
                "rb".to_string(),
            )],
            ..Default::default()
        });
        assert!(session
            .interpreter
            .context()
            .registry
            .get("ruby")
            .is_some());
    }

    #[test]
    fn test_use_without_loader_is_import_error() {
        let mut session = Session::new(&RuntimeOptions::default());
        let err = session.run(&use_main("BLOCK-ANY", "b")).unwrap_err();
        assert_eq!(err.kind, ErrorKind::Import);
        assert!(err.message.contains("no block loader"));
    }

    #[test]
    fn test_session_runs_plain_program() {
        let mut session = Session::new(&RuntimeOptions::default());
        let program = Program {
            main: vec![Stmt::VarDecl {
                name: "x".to_string(),
                init: Expr::IntLit(41, sp()),
                span: sp(),
            }],
            source_file: "test.naab".to_string(),
            ..Default::default()
        };
        session.run(&program).unwrap();
        let value = session
            .interpreter_mut()
            .globals()
            .get("x")
            .unwrap();
        assert_eq!(value.as_int(), Some(41));
    }
}
