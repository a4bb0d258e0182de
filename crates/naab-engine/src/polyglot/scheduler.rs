//! Drives dependency groups through the worker pool.
//!
//! For each wave the scheduler snapshots every block's read-set from the
//! interpreter environment, submits one task per block, joins the wave,
//! and commits assigned results back in wave order. Environments never
//! cross threads; tasks receive value snapshots. The first failure (in
//! source order) becomes the wave's failure and later waves do not run,
//! but every task already submitted runs to completion first.

use crate::error::NaabError;
use crate::interpreter::{Environment, Value};
use crate::polyglot::analyzer::DependencyGroup;
use crate::polyglot::pool::{TaskHandle, ThreadPool};
use crate::polyglot::ExecutorRegistry;
use std::sync::Arc;

/// Parallel polyglot driver.
pub struct PolyglotScheduler {
    pool: ThreadPool,
    registry: Arc<ExecutorRegistry>,
}

impl PolyglotScheduler {
    /// Scheduler backed by `pool` and `registry`.
    pub fn new(pool: ThreadPool, registry: Arc<ExecutorRegistry>) -> Self {
        Self { pool, registry }
    }

    /// The executor registry.
    pub fn registry(&self) -> &Arc<ExecutorRegistry> {
        &self.registry
    }

    /// Execute `groups` in order, committing writes into `env`.
    pub fn execute_groups(
        &self,
        groups: &[DependencyGroup],
        env: &Arc<Environment>,
    ) -> Result<(), NaabError> {
        for group in groups {
            self.execute_wave(group, env)?;
        }
        Ok(())
    }

    /// Execute one wave: submit all, join all, commit, surface failure.
    fn execute_wave(
        &self,
        group: &DependencyGroup,
        env: &Arc<Environment>,
    ) -> Result<(), NaabError> {
        struct Pending {
            assigned: Option<String>,
            span: crate::ast::Span,
            handle: TaskHandle<Result<Value, NaabError>>,
        }

        let mut pending: Vec<Pending> = Vec::with_capacity(group.blocks.len());

        for block in &group.blocks {
            let executor = self
                .registry
                .require(&block.code.language)
                .map_err(|e| e.with_span(block.code.span))?;

            let mut bindings: Vec<(String, Value)> = Vec::with_capacity(block.reads.len());
            for name in &block.reads {
                let value = env.get(name).ok_or_else(|| {
                    NaabError::name_error(name, &env.all_names()).with_span(block.code.span)
                })?;
                bindings.push((name.clone(), value));
            }

            let source = block.code.source.clone();
            let language = block.code.language.clone();
            let handle = self
                .pool
                .submit(move || {
                    // Panics in executor glue must not take the worker
                    // down; they surface as the block's failure.
                    crate::ffi::guard("inline block", &language, || {
                        executor.execute_with_return(&source, &bindings)
                    })
                })
                .map_err(|e| NaabError::runtime(e.to_string()).with_span(block.code.span))?;

            pending.push(Pending {
                assigned: block.assigned.clone(),
                span: block.code.span,
                handle,
            });
        }

        // Join the whole wave before committing or failing, so every
        // submitted block runs to completion.
        let mut first_failure: Option<NaabError> = None;
        for task in pending {
            match task.handle.wait() {
                Ok(Ok(value)) => {
                    if let Some(name) = task.assigned {
                        // Intra-wave writes never collide (no WAW inside
                        // a wave), so commit order within the wave is
                        // irrelevant; this thread serialises all commits.
                        env.define(name, value);
                    }
                }
                Ok(Err(err)) => {
                    if first_failure.is_none() {
                        first_failure = Some(err.with_span(task.span));
                    }
                }
                Err(pool_err) => {
                    if first_failure.is_none() {
                        first_failure =
                            Some(NaabError::runtime(pool_err.to_string()).with_span(task.span));
                    }
                }
            }
        }

        match first_failure {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::{Expr, InlineCode, Span, Stmt};
    use crate::error::ErrorKind;
    use crate::polyglot::analyzer;
    use crate::polyglot::testing::MockExecutor;

    fn scheduler() -> PolyglotScheduler {
        let registry = Arc::new(ExecutorRegistry::new());
        registry.register(Arc::new(MockExecutor::new("python")));
        PolyglotScheduler::new(ThreadPool::with_workers(4, None), registry)
    }

    fn let_block(name: &str, source: &str, reads: &[&str]) -> Stmt {
        Stmt::VarDecl {
            name: name.to_string(),
            init: Expr::InlineCode(Arc::new(InlineCode {
                language: "python".to_string(),
                source: source.to_string(),
                bound_variables: reads.iter().map(|s| s.to_string()).collect(),
                span: Span::UNKNOWN,
            })),
            span: Span::UNKNOWN,
        }
    }

    #[test]
    fn test_parallel_wave_commits_both_writes() {
        // let a = 1; let b = 2; let x = <<python a + 10>>; let y = <<python b + 20>>
        let env = Environment::new();
        env.define("a", Value::Int(1));
        env.define("b", Value::Int(2));
        let stmts = vec![
            let_block("x", "a + 10", &["a"]),
            let_block("y", "b + 20", &["b"]),
        ];
        let groups = analyzer::analyze(&stmts);
        assert_eq!(groups.len(), 1);

        scheduler().execute_groups(&groups, &env).unwrap();
        assert_eq!(env.get("x").unwrap().as_int(), Some(11));
        assert_eq!(env.get("y").unwrap().as_int(), Some(22));
    }

    #[test]
    fn test_raw_chain_sees_previous_wave_result() {
        // let x = <<python 100>>; let y = <<python x + 1>>
        let env = Environment::new();
        let stmts = vec![
            let_block("x", "100", &[]),
            let_block("y", "x + 1", &["x"]),
        ];
        let groups = analyzer::analyze(&stmts);
        assert_eq!(groups.len(), 2);

        scheduler().execute_groups(&groups, &env).unwrap();
        assert_eq!(env.get("y").unwrap().as_int(), Some(101));
    }

    #[test]
    fn test_scheduler_matches_sequential_execution() {
        // Same program both ways must produce the same final environment.
        let stmts = vec![
            let_block("a", "1", &[]),
            let_block("b", "2", &[]),
            let_block("c", "a + b", &["a", "b"]),
            let_block("d", "c + 10", &["c"]),
        ];

        let parallel_env = Environment::new();
        let groups = analyzer::analyze(&stmts);
        scheduler().execute_groups(&groups, &parallel_env).unwrap();

        let sequential_env = Environment::new();
        let exec = MockExecutor::new("python");
        for stmt in &stmts {
            let (code, assigned) = stmt.polyglot_payload().unwrap();
            let bindings: Vec<(String, Value)> = code
                .bound_variables
                .iter()
                .map(|n| (n.clone(), sequential_env.get(n).unwrap()))
                .collect();
            let value = crate::polyglot::Executor::execute_with_return(
                &exec,
                &code.source,
                &bindings,
            )
            .unwrap();
            sequential_env.define(assigned.unwrap(), value);
        }

        for name in ["a", "b", "c", "d"] {
            assert!(parallel_env
                .get(name)
                .unwrap()
                .equals(&sequential_env.get(name).unwrap()));
        }
    }

    #[test]
    fn test_failure_stops_later_waves() {
        let env = Environment::new();
        let stmts = vec![
            let_block("x", "fail", &[]),
            let_block("y", "x + 1", &["x"]),
        ];
        let groups = analyzer::analyze(&stmts);
        let err = scheduler().execute_groups(&groups, &env).unwrap_err();
        assert!(err.message.contains("forced failure"));
        assert!(env.get("y").is_none(), "second wave must not run");
    }

    #[test]
    fn test_sibling_in_failed_wave_still_commits() {
        let env = Environment::new();
        let stmts = vec![
            let_block("x", "fail", &[]),
            let_block("y", "7", &[]),
        ];
        let groups = analyzer::analyze(&stmts);
        assert_eq!(groups.len(), 1, "independent blocks share the wave");
        scheduler().execute_groups(&groups, &env).unwrap_err();
        // The sibling had already been submitted; it runs to completion
        // and its write lands.
        assert_eq!(env.get("y").unwrap().as_int(), Some(7));
    }

    #[test]
    fn test_unbound_read_is_name_error() {
        let env = Environment::new();
        env.define("total", Value::Int(3));
        let stmts = vec![let_block("x", "totl + 1", &["totl"])];
        let groups = analyzer::analyze(&stmts);
        let err = scheduler().execute_groups(&groups, &env).unwrap_err();
        assert_eq!(err.kind, ErrorKind::Name);
        assert_eq!(err.suggestions, vec!["total".to_string()]);
    }

    #[test]
    fn test_unknown_language_is_import_error() {
        let env = Environment::new();
        let stmts = vec![Stmt::ExprStmt(Expr::InlineCode(Arc::new(InlineCode {
            language: "fortran".to_string(),
            source: "1".to_string(),
            bound_variables: vec![],
            span: Span::UNKNOWN,
        })))];
        let groups = analyzer::analyze(&stmts);
        let err = scheduler().execute_groups(&groups, &env).unwrap_err();
        assert_eq!(err.kind, ErrorKind::Import);
    }
}
