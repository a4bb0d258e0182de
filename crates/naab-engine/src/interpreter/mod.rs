//! The tree-walking interpreter.
//!
//! Walks a parsed [`Program`](crate::ast::Program) statement by
//! statement. `return`, `break` and `continue` are structured control
//! results ([`Flow`]) threaded through every statement evaluation — they
//! are not errors, and user-visible `throw` never doubles as control
//! flow. Contiguous runs of inline-code statements are handed to the
//! polyglot scheduler and executed as parallel waves.

mod builtins;
mod environment;
mod eval;
mod exec;
mod value;

pub use environment::Environment;
pub use value::{
    BlockMetadata, BlockValue, ForeignObject, FunctionValue, StructDef, StructInstance, Value,
};

use crate::ast::{Program, Span, Stmt};
use crate::error::NaabError;
use crate::limits::{DepthGuard, ScopedTimeout};
use crate::polyglot::loader::BlockLoader;
use crate::polyglot::pool::ThreadPool;
use crate::polyglot::scheduler::PolyglotScheduler;
use crate::polyglot::ExecutorRegistry;
use crate::security::{AuditLogger, SandboxGuard};
use parking_lot::Mutex;
use std::io::Write;
use std::sync::Arc;

/// Structured control results for non-local exits.
#[derive(Debug)]
pub enum Flow {
    /// Fall through to the next statement.
    Normal,
    /// `return` with its value, caught by the enclosing call.
    Return(Value),
    /// `break`, caught by the enclosing loop.
    Break,
    /// `continue`, caught by the enclosing loop.
    Continue,
}

/// Debugger probe, consulted before each statement when attached.
pub trait DebugHook: Send + Sync {
    /// Whether to pause before the statement at `span`.
    fn should_break(&self, span: Span) -> bool;

    /// Called when a breakpoint hits; returns when execution resumes.
    fn on_break(&self, span: Span);
}

/// Shared services threaded through the evaluator.
///
/// These are process-wide singletons in spirit (audit log, sandbox,
/// registry) but are passed explicitly rather than reached for as
/// ambient globals.
#[derive(Clone)]
pub struct RuntimeContext {
    /// Language → executor mapping.
    pub registry: Arc<ExecutorRegistry>,
    /// Capability guard for side-effecting operations.
    pub sandbox: Arc<SandboxGuard>,
    /// Audit event log.
    pub audit: Arc<AuditLogger>,
    /// Block registry resolver for `use` statements.
    pub loader: Option<Arc<dyn BlockLoader>>,
}

impl RuntimeContext {
    /// A permissive context with no loader and a disabled audit log,
    /// for embedding and tests.
    pub fn permissive(registry: Arc<ExecutorRegistry>) -> Self {
        let audit = Arc::new(AuditLogger::disabled());
        Self {
            sandbox: Arc::new(SandboxGuard::permissive(audit.clone())),
            audit,
            registry,
            loader: None,
        }
    }
}

/// Interpreter options.
#[derive(Debug, Clone)]
pub struct InterpreterOptions {
    /// Run independent inline blocks in parallel waves.
    pub parallel_polyglot: bool,
    /// Worker threads for the polyglot pool.
    pub worker_count: usize,
    /// Source file name for error reporting.
    pub source_file: String,
}

impl Default for InterpreterOptions {
    fn default() -> Self {
        Self {
            parallel_polyglot: true,
            worker_count: crate::polyglot::pool::default_worker_count(),
            source_file: "<main>".to_string(),
        }
    }
}

/// The AST walker.
pub struct Interpreter {
    ctx: RuntimeContext,
    options: InterpreterOptions,
    globals: Arc<Environment>,
    scheduler: PolyglotScheduler,
    depth: DepthGuard,
    struct_defs: rustc_hash::FxHashMap<String, Arc<StructDef>>,
    out: Arc<Mutex<dyn Write + Send>>,
    debug_hook: Option<Arc<dyn DebugHook>>,
}

impl Interpreter {
    /// Interpreter writing `print` output to stdout.
    pub fn new(ctx: RuntimeContext, options: InterpreterOptions) -> Self {
        Self::with_output(ctx, options, Arc::new(Mutex::new(std::io::stdout())))
    }

    /// Interpreter with a custom output sink.
    pub fn with_output(
        ctx: RuntimeContext,
        options: InterpreterOptions,
        out: Arc<Mutex<dyn Write + Send>>,
    ) -> Self {
        // Workers that may call into embedded Python must create their
        // thread state and run the warmup before their first task; the
        // ordering is load-bearing on constrained platforms.
        #[cfg(feature = "python")]
        let worker_init: Option<crate::polyglot::pool::WorkerInit> = Some(Arc::new(|_id| {
            crate::polyglot::executors::python::register_worker_thread();
        }));
        #[cfg(not(feature = "python"))]
        let worker_init: Option<crate::polyglot::pool::WorkerInit> = None;

        let pool = ThreadPool::with_workers(options.worker_count, worker_init);
        let scheduler = PolyglotScheduler::new(pool, ctx.registry.clone());
        Self {
            ctx,
            options,
            globals: Environment::new(),
            scheduler,
            depth: DepthGuard::new(),
            struct_defs: rustc_hash::FxHashMap::default(),
            out,
            debug_hook: None,
        }
    }

    /// Attach a debugger.
    pub fn set_debug_hook(&mut self, hook: Arc<dyn DebugHook>) {
        self.debug_hook = Some(hook);
    }

    /// The global environment.
    pub fn globals(&self) -> &Arc<Environment> {
        &self.globals
    }

    /// The runtime context.
    pub fn context(&self) -> &RuntimeContext {
        &self.ctx
    }

    /// Run a whole program: structs and functions are bound first, then
    /// `use` statements resolve their blocks, then the main block runs.
    pub fn run_program(&mut self, program: &Program) -> Result<(), NaabError> {
        let globals = self.globals.clone();
        for decl in &program.structs {
            self.declare_struct(decl, &globals)?;
        }
        for decl in &program.functions {
            self.declare_function(decl, &globals);
        }
        let mut loaded_blocks: Vec<&str> = Vec::new();
        for use_stmt in &program.uses {
            match self.exec_stmt(use_stmt, &globals)? {
                Flow::Normal => {}
                _ => {
                    return Err(NaabError::syntax("control flow outside of a function")
                        .with_span(use_stmt.span()))
                }
            }
            if let Stmt::Use { block_id, .. } = use_stmt {
                loaded_blocks.push(block_id);
            }
        }
        // Blocks imported together are correlated in the registry's
        // usage statistics.
        if let Some(loader) = &self.ctx.loader {
            for (i, a) in loaded_blocks.iter().enumerate() {
                for b in &loaded_blocks[i + 1..] {
                    loader.record_pair(a, b);
                }
            }
        }
        match self.exec_block(&program.main, &globals)? {
            Flow::Normal | Flow::Return(_) => Ok(()),
            Flow::Break | Flow::Continue => Err(NaabError::syntax(
                "break or continue outside of a loop",
            )),
        }
    }

    /// Evaluate a statement list in a fresh child of the globals, for
    /// embedding and tests. Returns the value of a trailing `return`.
    pub fn run_stmts(&mut self, stmts: &[Stmt]) -> Result<Value, NaabError> {
        let env = Environment::child_of(&self.globals);
        match self.exec_block(stmts, &env)? {
            Flow::Return(v) => Ok(v),
            _ => Ok(Value::Null),
        }
    }

    pub(crate) fn write_line(&self, text: &str) {
        let mut out = self.out.lock();
        let _ = writeln!(out, "{text}");
    }

    pub(crate) fn block_timeout(&self, language: &str) -> ScopedTimeout {
        ScopedTimeout::for_block(format!("{language} block"))
    }
}
