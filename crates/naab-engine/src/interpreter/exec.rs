//! Statement execution.

use super::{BlockMetadata, BlockValue, Environment, Flow, FunctionValue, Interpreter, StructDef, Value};
use crate::ast::{Expr, FnDecl, Stmt, StructDecl};
use crate::error::NaabError;
use crate::limits;
use crate::polyglot::analyzer;
use crate::polyglot::loader::source_hash;
use crate::security::Capability;
use std::sync::Arc;

impl Interpreter {
    /// Execute a statement list.
    ///
    /// Contiguous runs of two or more inline-code statements are handed
    /// to the dependency analyzer and run as parallel waves; everything
    /// else executes sequentially in source order.
    pub(crate) fn exec_block(
        &mut self,
        stmts: &[Stmt],
        env: &Arc<Environment>,
    ) -> Result<Flow, NaabError> {
        let mut i = 0;
        while i < stmts.len() {
            if self.options.parallel_polyglot {
                let run = stmts[i..]
                    .iter()
                    .take_while(|s| s.polyglot_payload().is_some())
                    .count();
                if run >= 2 {
                    self.exec_polyglot_window(&stmts[i..i + run], env)?;
                    i += run;
                    continue;
                }
            }

            match self.exec_stmt(&stmts[i], env)? {
                Flow::Normal => {}
                flow => return Ok(flow),
            }
            i += 1;
        }
        Ok(Flow::Normal)
    }

    /// Run one window of polyglot statements through the scheduler.
    fn exec_polyglot_window(
        &mut self,
        window: &[Stmt],
        env: &Arc<Environment>,
    ) -> Result<(), NaabError> {
        let groups = analyzer::analyze(window);
        for group in &groups {
            for block in &group.blocks {
                let code = &block.code;
                limits::check_inline_block_size(&code.language, code.source.len())
                    .map_err(|e| e.with_span(code.span))?;
                self.ctx
                    .sandbox
                    .require(Capability::BlockCall, "execute_inline_block", &code.language)
                    .map_err(|e| e.with_span(code.span))?;
                self.ctx.audit.log_block_execute("<inline>", &code.language);
            }
        }
        self.scheduler.execute_groups(&groups, env)
    }

    /// Execute one statement.
    pub(crate) fn exec_stmt(
        &mut self,
        stmt: &Stmt,
        env: &Arc<Environment>,
    ) -> Result<Flow, NaabError> {
        if let Some(hook) = self.debug_hook.clone() {
            let span = stmt.span();
            if hook.should_break(span) {
                hook.on_break(span);
            }
        }

        match stmt {
            Stmt::VarDecl { name, init, .. } => {
                let value = self.eval_expr(init, env)?;
                env.define(name.clone(), value);
                Ok(Flow::Normal)
            }

            Stmt::Assign { target, value, span } => {
                let value = self.eval_expr(value, env)?;
                match target {
                    Expr::Ident(name, _) => {
                        env.set(name, value).map_err(|e| e.with_span(*span))?;
                    }
                    Expr::Index { object, index, .. } => {
                        let object = self.eval_expr(object, env)?;
                        let index = self.eval_expr(index, env)?;
                        object.index_set(&index, value).map_err(|e| e.with_span(*span))?;
                    }
                    Expr::Member { object, field, .. } => {
                        let object = self.eval_expr(object, env)?;
                        object.member_set(field, value).map_err(|e| e.with_span(*span))?;
                    }
                    other => {
                        return Err(NaabError::syntax("invalid assignment target")
                            .with_span(other.span()))
                    }
                }
                Ok(Flow::Normal)
            }

            Stmt::ExprStmt(expr) => {
                self.eval_expr(expr, env)?;
                Ok(Flow::Normal)
            }

            Stmt::If {
                condition,
                then_branch,
                else_branch,
                ..
            } => {
                if self.eval_expr(condition, env)?.truthy() {
                    self.exec_stmt(then_branch, env)
                } else if let Some(else_branch) = else_branch {
                    self.exec_stmt(else_branch, env)
                } else {
                    Ok(Flow::Normal)
                }
            }

            Stmt::While {
                condition, body, ..
            } => {
                while self.eval_expr(condition, env)?.truthy() {
                    match self.exec_stmt(body, env)? {
                        Flow::Normal | Flow::Continue => {}
                        Flow::Break => break,
                        flow @ Flow::Return(_) => return Ok(flow),
                    }
                }
                Ok(Flow::Normal)
            }

            Stmt::For {
                var,
                iterable,
                body,
                span,
            } => {
                let iterable = self.eval_expr(iterable, env)?;
                let items = self.iteration_items(&iterable).map_err(|e| e.with_span(*span))?;
                let loop_env = Environment::child_of(env);
                for item in items {
                    loop_env.define(var.clone(), item);
                    match self.exec_stmt(body, &loop_env)? {
                        Flow::Normal | Flow::Continue => {}
                        Flow::Break => break,
                        flow @ Flow::Return(_) => return Ok(flow),
                    }
                }
                Ok(Flow::Normal)
            }

            Stmt::Break(_) => Ok(Flow::Break),
            Stmt::Continue(_) => Ok(Flow::Continue),

            Stmt::Return(expr, _) => {
                let value = match expr {
                    Some(expr) => self.eval_expr(expr, env)?,
                    None => Value::Null,
                };
                Ok(Flow::Return(value))
            }

            Stmt::Throw(expr, span) => {
                let payload = self.eval_expr(expr, env)?;
                Err(NaabError::thrown(payload).with_span(*span))
            }

            Stmt::Try {
                body,
                catch,
                finally,
                ..
            } => self.exec_try(body, catch.as_ref(), finally.as_deref(), env),

            Stmt::Block(stmts, _) => {
                let block_env = Environment::child_of(env);
                self.exec_block(stmts, &block_env)
            }

            Stmt::FnDecl(decl) => {
                self.declare_function(decl, env);
                Ok(Flow::Normal)
            }

            Stmt::StructDecl(decl) => {
                self.declare_struct(decl, env)?;
                Ok(Flow::Normal)
            }

            Stmt::Use {
                block_id,
                alias,
                span,
            } => {
                let block = self.load_block(block_id).map_err(|e| e.with_span(*span))?;
                env.define(alias.clone(), block);
                Ok(Flow::Normal)
            }
        }
    }

    /// Try/catch/finally.
    ///
    /// The catch clause binds the thrown value (or the error message for
    /// engine errors) in a fresh child scope. `finally` runs exactly once
    /// on every exit path; if the `finally` block itself raises or exits
    /// non-locally, that outcome replaces the in-flight one.
    fn exec_try(
        &mut self,
        body: &Stmt,
        catch: Option<&(String, Box<Stmt>)>,
        finally: Option<&Stmt>,
        env: &Arc<Environment>,
    ) -> Result<Flow, NaabError> {
        let mut outcome = self.exec_stmt(body, env);

        if let Err(err) = &outcome {
            if let Some((binding, handler)) = catch {
                let catch_env = Environment::child_of(env);
                catch_env.define(binding.clone(), err.catch_value());
                outcome = self.exec_stmt(handler, &catch_env);
            }
        }

        if let Some(finally) = finally {
            match self.exec_stmt(finally, env) {
                Ok(Flow::Normal) => {}
                superseding => outcome = superseding,
            }
        }

        outcome
    }

    fn iteration_items(&self, iterable: &Value) -> Result<Vec<Value>, NaabError> {
        match iterable {
            Value::List(items) => Ok(items.read().clone()),
            Value::Dict(entries) => Ok(entries.read().keys().map(|k| Value::string(k)).collect()),
            Value::Str(s) => Ok(s.chars().map(|c| Value::string(&c.to_string())).collect()),
            other => Err(NaabError::type_error(format!(
                "cannot iterate over {}",
                other.type_name()
            ))),
        }
    }

    /// Bind a function declaration, capturing the declaring scope.
    pub(crate) fn declare_function(&mut self, decl: &Arc<FnDecl>, env: &Arc<Environment>) {
        let function = FunctionValue {
            name: decl.name.clone(),
            params: decl.params.clone(),
            return_type: decl.return_type.clone(),
            body: decl.body.clone(),
            source_file: decl.source_file.clone(),
            span: decl.span,
            captured_env: env.clone(),
        };
        env.define(decl.name.clone(), Value::Function(Arc::new(function)));
    }

    /// Register a struct definition.
    pub(crate) fn declare_struct(
        &mut self,
        decl: &Arc<StructDecl>,
        _env: &Arc<Environment>,
    ) -> Result<(), NaabError> {
        let def = StructDef::new(decl.name.clone(), decl.fields.clone());
        self.struct_defs.insert(decl.name.clone(), Arc::new(def));
        Ok(())
    }

    /// Resolve a `use` statement through the block loader, verifying
    /// source integrity against the registered hash.
    fn load_block(&mut self, block_id: &str) -> Result<Value, NaabError> {
        self.ctx
            .sandbox
            .require(Capability::BlockLoad, "load_block", block_id)?;

        let loader = self
            .ctx
            .loader
            .clone()
            .ok_or_else(|| NaabError::import("no block loader configured"))?;

        let info = loader.get_block(block_id)?;
        let source = loader.load_source(block_id)?;
        limits::check_source_size(source.len())?;

        let actual = source_hash(&source);
        if !info.code_hash.is_empty() && actual != info.code_hash {
            self.ctx
                .audit
                .log_hash_mismatch(block_id, &info.code_hash, &actual);
            return Err(NaabError::import(format!(
                "block {block_id} failed integrity check (hash mismatch)"
            )));
        }

        let executor = self.ctx.registry.require(&info.language)?;
        self.ctx.audit.log_block_load(block_id, &actual);
        loader.record_usage(block_id, 0);

        Ok(Value::Block(Arc::new(BlockValue {
            metadata: BlockMetadata {
                id: info.block_id,
                language: info.language,
                version: info.version,
                hash: actual,
            },
            source: String::from_utf8_lossy(&source).into_owned(),
            executor,
        })))
    }
}
