//! Expression evaluation.

use super::{builtins, Environment, Flow, FunctionValue, Interpreter, StructInstance, Value};
use crate::ast::{BinaryOp, Expr, InlineCode, Param, Span, TypeExpr, UnaryOp};
use crate::error::NaabError;
use crate::limits::{self, checked_add, checked_div, checked_mul, checked_neg, checked_rem, checked_sub};
use crate::security::Capability;
use indexmap::IndexMap;
use parking_lot::RwLock;
use std::sync::Arc;

/// Largest list a range expression may materialise.
const MAX_RANGE_LEN: i64 = 1 << 24;

impl Interpreter {
    /// Evaluate one expression to a value.
    pub(crate) fn eval_expr(
        &mut self,
        expr: &Expr,
        env: &Arc<Environment>,
    ) -> Result<Value, NaabError> {
        self.depth.enter().map_err(|e| e.with_span(expr.span()))?;
        let result = self.eval_expr_inner(expr, env);
        self.depth.exit();
        result.map_err(|e| e.with_span(expr.span()))
    }

    fn eval_expr_inner(
        &mut self,
        expr: &Expr,
        env: &Arc<Environment>,
    ) -> Result<Value, NaabError> {
        match expr {
            Expr::IntLit(v, _) => Ok(Value::Int(*v)),
            Expr::FloatLit(v, _) => Ok(Value::Float(*v)),
            Expr::StringLit(v, _) => Ok(Value::string(v)),
            Expr::BoolLit(v, _) => Ok(Value::Bool(*v)),
            Expr::NullLit(_) => Ok(Value::Null),

            Expr::Ident(name, _) => env
                .get(name)
                .ok_or_else(|| NaabError::name_error(name, &env.all_names())),

            Expr::Binary {
                op, left, right, ..
            } => self.eval_binary(*op, left, right, env),

            Expr::Unary { op, operand, .. } => {
                let value = self.eval_expr(operand, env)?;
                match op {
                    UnaryOp::Not => Ok(Value::Bool(!value.truthy())),
                    UnaryOp::Neg => match value {
                        Value::Int(i) => Ok(Value::Int(checked_neg(i)?)),
                        Value::Float(f) => Ok(Value::Float(-f)),
                        other => Err(NaabError::type_error(format!(
                            "cannot negate {}",
                            other.type_name()
                        ))),
                    },
                }
            }

            Expr::Call { callee, args, span } => self.eval_call(callee, args, *span, env),

            Expr::Member { object, field, .. } => {
                let object = self.eval_expr(object, env)?;
                object.member_get(field)
            }

            Expr::Index { object, index, .. } => {
                let object = self.eval_expr(object, env)?;
                let index = self.eval_expr(index, env)?;
                object.index_get(&index)
            }

            Expr::Range { start, end, .. } => {
                let start = self.expect_int(start, env)?;
                let end = self.expect_int(end, env)?;
                if end.saturating_sub(start) > MAX_RANGE_LEN {
                    return Err(NaabError::value_error(format!(
                        "range {start}..{end} is too large"
                    )));
                }
                Ok(Value::list((start..end).map(Value::Int).collect()))
            }

            Expr::ListLit(items, _) => {
                let mut out = Vec::with_capacity(items.len());
                for item in items {
                    out.push(self.eval_expr(item, env)?);
                }
                Ok(Value::list(out))
            }

            Expr::DictLit(entries, _) => {
                let mut out = IndexMap::with_capacity(entries.len());
                for (key, value) in entries {
                    out.insert(key.clone(), self.eval_expr(value, env)?);
                }
                Ok(Value::dict(out))
            }

            Expr::StructLit {
                type_name, fields, ..
            } => self.eval_struct_literal(type_name, fields, env),

            Expr::InlineCode(code) => self.eval_inline_code(code, env),

            Expr::IfExpr {
                condition,
                then_branch,
                else_branch,
                ..
            } => {
                if self.eval_expr(condition, env)?.truthy() {
                    self.eval_expr(then_branch, env)
                } else {
                    self.eval_expr(else_branch, env)
                }
            }

            Expr::Lambda { params, body, span } => Ok(Value::Function(Arc::new(FunctionValue {
                name: "<lambda>".to_string(),
                params: params.clone(),
                return_type: TypeExpr::Any,
                body: (**body).clone(),
                source_file: self.options.source_file.clone(),
                span: *span,
                captured_env: env.clone(),
            }))),

            Expr::Match {
                subject, arms, ..
            } => {
                let subject = self.eval_expr(subject, env)?;
                for arm in arms {
                    match &arm.pattern {
                        Some(pattern) => {
                            let candidate = self.eval_expr(pattern, env)?;
                            if subject.equals(&candidate) {
                                return self.eval_expr(&arm.body, env);
                            }
                        }
                        None => return self.eval_expr(&arm.body, env),
                    }
                }
                Err(NaabError::value_error(format!(
                    "no match arm for {}",
                    subject.display_string()
                )))
            }

            // x |> f(a, b) desugars to f(x, a, b).
            Expr::Pipeline { value, call, span } => {
                let piped = self.eval_expr(value, env)?;
                match call.as_ref() {
                    Expr::Call { callee, args, .. } => {
                        self.eval_call_with_piped(callee, piped, args, *span, env)
                    }
                    callee => self.eval_call_with_piped(callee, piped, &[], *span, env),
                }
            }
        }
    }

    fn expect_int(&mut self, expr: &Expr, env: &Arc<Environment>) -> Result<i64, NaabError> {
        let value = self.eval_expr(expr, env)?;
        value.as_int().ok_or_else(|| {
            NaabError::type_error(format!("expected int, got {}", value.type_name()))
                .with_span(expr.span())
        })
    }

    fn eval_binary(
        &mut self,
        op: BinaryOp,
        left: &Expr,
        right: &Expr,
        env: &Arc<Environment>,
    ) -> Result<Value, NaabError> {
        // Short-circuit operators evaluate the right side lazily.
        match op {
            BinaryOp::And => {
                let lhs = self.eval_expr(left, env)?;
                if !lhs.truthy() {
                    return Ok(Value::Bool(false));
                }
                let rhs = self.eval_expr(right, env)?;
                return Ok(Value::Bool(rhs.truthy()));
            }
            BinaryOp::Or => {
                let lhs = self.eval_expr(left, env)?;
                if lhs.truthy() {
                    return Ok(Value::Bool(true));
                }
                let rhs = self.eval_expr(right, env)?;
                return Ok(Value::Bool(rhs.truthy()));
            }
            _ => {}
        }

        let lhs = self.eval_expr(left, env)?;
        let rhs = self.eval_expr(right, env)?;

        let incompatible = || {
            NaabError::type_error(format!(
                "operator {} not defined for {} and {}",
                op.symbol(),
                lhs.type_name(),
                rhs.type_name()
            ))
        };

        match op {
            BinaryOp::Add => match (&lhs, &rhs) {
                (Value::Int(a), Value::Int(b)) => Ok(Value::Int(checked_add(*a, *b)?)),
                (Value::Str(a), Value::Str(b)) => Ok(Value::string(&format!("{a}{b}"))),
                (Value::List(a), Value::List(b)) => {
                    let mut out = a.read().clone();
                    out.extend(b.read().iter().cloned());
                    Ok(Value::list(out))
                }
                _ => self.numeric_float_op(&lhs, &rhs, incompatible, |a, b| Ok(a + b)),
            },
            BinaryOp::Sub => match (&lhs, &rhs) {
                (Value::Int(a), Value::Int(b)) => Ok(Value::Int(checked_sub(*a, *b)?)),
                _ => self.numeric_float_op(&lhs, &rhs, incompatible, |a, b| Ok(a - b)),
            },
            BinaryOp::Mul => match (&lhs, &rhs) {
                (Value::Int(a), Value::Int(b)) => Ok(Value::Int(checked_mul(*a, *b)?)),
                _ => self.numeric_float_op(&lhs, &rhs, incompatible, |a, b| Ok(a * b)),
            },
            BinaryOp::Div => match (&lhs, &rhs) {
                (Value::Int(a), Value::Int(b)) => Ok(Value::Int(checked_div(*a, *b)?)),
                _ => self.numeric_float_op(&lhs, &rhs, incompatible, |a, b| {
                    if b == 0.0 {
                        Err(NaabError::runtime("division by zero"))
                    } else {
                        Ok(a / b)
                    }
                }),
            },
            BinaryOp::Mod => match (&lhs, &rhs) {
                (Value::Int(a), Value::Int(b)) => Ok(Value::Int(checked_rem(*a, *b)?)),
                _ => self.numeric_float_op(&lhs, &rhs, incompatible, |a, b| {
                    if b == 0.0 {
                        Err(NaabError::runtime("modulo by zero"))
                    } else {
                        Ok(a % b)
                    }
                }),
            },

            BinaryOp::Eq => Ok(Value::Bool(lhs.equals(&rhs))),
            BinaryOp::Ne => Ok(Value::Bool(!lhs.equals(&rhs))),

            BinaryOp::Lt | BinaryOp::Le | BinaryOp::Gt | BinaryOp::Ge => {
                let ordering = match (&lhs, &rhs) {
                    (Value::Str(a), Value::Str(b)) => a.cmp(b),
                    _ => {
                        let (a, b) = match (lhs.as_float(), rhs.as_float()) {
                            (Some(a), Some(b)) => (a, b),
                            _ => return Err(incompatible()),
                        };
                        a.partial_cmp(&b).ok_or_else(|| {
                            NaabError::value_error("comparison with NaN is undefined")
                        })?
                    }
                };
                let result = match op {
                    BinaryOp::Lt => ordering.is_lt(),
                    BinaryOp::Le => ordering.is_le(),
                    BinaryOp::Gt => ordering.is_gt(),
                    _ => ordering.is_ge(),
                };
                Ok(Value::Bool(result))
            }

            BinaryOp::And | BinaryOp::Or => unreachable!("handled above"),
        }
    }

    fn numeric_float_op(
        &self,
        lhs: &Value,
        rhs: &Value,
        incompatible: impl FnOnce() -> NaabError,
        op: impl FnOnce(f64, f64) -> Result<f64, NaabError>,
    ) -> Result<Value, NaabError> {
        match (lhs, rhs) {
            (Value::Int(_) | Value::Float(_), Value::Int(_) | Value::Float(_)) => {
                let a = lhs.as_float().expect("numeric");
                let b = rhs.as_float().expect("numeric");
                Ok(Value::Float(op(a, b)?))
            }
            _ => Err(incompatible()),
        }
    }

    fn eval_struct_literal(
        &mut self,
        type_name: &str,
        fields: &[(String, Expr)],
        env: &Arc<Environment>,
    ) -> Result<Value, NaabError> {
        let def = self
            .struct_defs
            .get(type_name)
            .cloned()
            .ok_or_else(|| NaabError::name_error(type_name, &self.struct_names()))?;

        let mut slots: Vec<Option<Value>> = vec![None; def.field_count()];
        for (name, expr) in fields {
            let index = def.field_index(name).ok_or_else(|| {
                NaabError::value_error(format!("struct {type_name} has no field '{name}'"))
            })?;
            slots[index] = Some(self.eval_expr(expr, env)?);
        }
        let mut values = Vec::with_capacity(slots.len());
        for (slot, (name, _)) in slots.into_iter().zip(def.fields.iter()) {
            match slot {
                Some(v) => values.push(v),
                None => {
                    return Err(NaabError::value_error(format!(
                        "struct {type_name} literal is missing field '{name}'"
                    )))
                }
            }
        }
        Ok(Value::Struct(Arc::new(StructInstance {
            def,
            fields: RwLock::new(values),
        })))
    }

    pub(crate) fn struct_names(&self) -> Vec<String> {
        self.struct_defs.keys().cloned().collect()
    }

    fn eval_call(
        &mut self,
        callee: &Expr,
        args: &[Expr],
        span: Span,
        env: &Arc<Environment>,
    ) -> Result<Value, NaabError> {
        let mut values = Vec::with_capacity(args.len());
        for arg in args {
            values.push(self.eval_expr(arg, env)?);
        }
        self.dispatch_call(callee, values, span, env)
    }

    fn eval_call_with_piped(
        &mut self,
        callee: &Expr,
        piped: Value,
        args: &[Expr],
        span: Span,
        env: &Arc<Environment>,
    ) -> Result<Value, NaabError> {
        let mut values = Vec::with_capacity(args.len() + 1);
        values.push(piped);
        for arg in args {
            values.push(self.eval_expr(arg, env)?);
        }
        self.dispatch_call(callee, values, span, env)
    }

    fn dispatch_call(
        &mut self,
        callee: &Expr,
        args: Vec<Value>,
        span: Span,
        env: &Arc<Environment>,
    ) -> Result<Value, NaabError> {
        // Builtins are reachable only when the name is not shadowed by a
        // user binding.
        if let Expr::Ident(name, _) = callee {
            match env.get(name) {
                Some(value) => return self.call_value(&value, args, span),
                None if builtins::is_builtin(name) => {
                    return builtins::call(self, name, args).map_err(|e| e.with_span(span))
                }
                None => return Err(NaabError::name_error(name, &env.all_names()).with_span(span)),
            }
        }
        let callee = self.eval_expr(callee, env)?;
        self.call_value(&callee, args, span)
    }

    /// Call a runtime value: user functions and blocks are callable.
    pub(crate) fn call_value(
        &mut self,
        callee: &Value,
        args: Vec<Value>,
        span: Span,
    ) -> Result<Value, NaabError> {
        match callee {
            Value::Function(func) => self.call_function_value(func, args, span),
            Value::Block(block) => self.call_block_value(block, args, span),
            other => Err(NaabError::type_error(format!(
                "{} is not callable",
                other.type_name()
            ))
            .with_span(span)),
        }
    }

    /// Bind parameters and execute a user function.
    pub(crate) fn call_function_value(
        &mut self,
        func: &Arc<FunctionValue>,
        args: Vec<Value>,
        span: Span,
    ) -> Result<Value, NaabError> {
        self.depth.enter().map_err(|e| e.with_span(span))?;
        let result = self.call_function_inner(func, args, span);
        self.depth.exit();
        result.map_err(|mut e| {
            e.push_frame(&func.name, &func.source_file, span);
            e
        })
    }

    fn call_function_inner(
        &mut self,
        func: &Arc<FunctionValue>,
        args: Vec<Value>,
        span: Span,
    ) -> Result<Value, NaabError> {
        if args.len() > func.params.len() {
            return Err(NaabError::type_error(format!(
                "{} expects at most {} arguments, got {}",
                func.name,
                func.params.len(),
                args.len()
            ))
            .with_span(span));
        }

        // Calls run in a child of the environment captured at
        // declaration, not of the caller's scope.
        let call_env = Environment::child_of(&func.captured_env);

        let mut args = args.into_iter();
        for (index, param) in func.params.iter().enumerate() {
            let value = match args.next() {
                Some(v) => v,
                None => match &param.default {
                    Some(default) => self.eval_expr(default, &call_env)?,
                    None => {
                        return Err(NaabError::type_error(format!(
                            "{} is missing required argument '{}' (position {})",
                            func.name, param.name, index
                        ))
                        .with_span(span))
                    }
                },
            };
            self.check_param(func, param, &value, span)?;
            call_env.define(param.name.clone(), value);
        }

        match self.exec_stmt(&func.body, &call_env)? {
            Flow::Return(value) => {
                if !value.matches_type(&func.return_type) {
                    return Err(NaabError::type_error(format!(
                        "{} declares return type {}, returned {}",
                        func.name,
                        func.return_type.name(),
                        value.type_name()
                    ))
                    .with_span(span));
                }
                Ok(value)
            }
            Flow::Normal => Ok(Value::Null),
            Flow::Break | Flow::Continue => Err(NaabError::syntax(
                "break or continue outside of a loop",
            )
            .with_span(span)),
        }
    }

    fn check_param(
        &self,
        func: &FunctionValue,
        param: &Param,
        value: &Value,
        span: Span,
    ) -> Result<(), NaabError> {
        if value.matches_type(&param.ty) {
            return Ok(());
        }
        Err(NaabError::type_error(format!(
            "{}: parameter '{}' expects {}, got {}",
            func.name,
            param.name,
            param.ty.name(),
            value.type_name()
        ))
        .with_span(span))
    }

    /// Invoke a library block as a callable. Arguments are exposed to
    /// the foreign side positionally (`arg0`, `arg1`, ...) plus as the
    /// full `args` list.
    fn call_block_value(
        &mut self,
        block: &Arc<super::BlockValue>,
        args: Vec<Value>,
        span: Span,
    ) -> Result<Value, NaabError> {
        let meta = &block.metadata;
        self.ctx
            .sandbox
            .require(Capability::BlockCall, "call_block", &meta.id)
            .map_err(|e| e.with_span(span))?;
        self.ctx.audit.log_block_execute(&meta.id, &meta.language);

        let mut bindings: Vec<(String, Value)> = args
            .iter()
            .enumerate()
            .map(|(i, v)| (format!("arg{i}"), v.clone()))
            .collect();
        bindings.push(("args".to_string(), Value::list(args)));

        let timeout = self.block_timeout(&meta.language);
        let result = crate::ffi::guard(&meta.id, &meta.language, || {
            block.executor.execute_with_return(&block.source, &bindings)
        });
        if timeout.expired() {
            self.ctx
                .audit
                .log_timeout(&format!("{} block {}", meta.language, meta.id), timeout.limit().as_millis() as u64);
        }
        result.map_err(|e| e.with_span(span))
    }

    /// Evaluate a lone inline-code expression (the single-block case of
    /// the polyglot scheduler).
    pub(crate) fn eval_inline_code(
        &mut self,
        code: &Arc<InlineCode>,
        env: &Arc<Environment>,
    ) -> Result<Value, NaabError> {
        limits::check_inline_block_size(&code.language, code.source.len())?;
        self.ctx
            .sandbox
            .require(Capability::BlockCall, "execute_inline_block", &code.language)?;

        let executor = self.ctx.registry.require(&code.language)?;
        let mut bindings = Vec::with_capacity(code.bound_variables.len());
        for name in &code.bound_variables {
            let value = env
                .get(name)
                .ok_or_else(|| NaabError::name_error(name, &env.all_names()))?;
            bindings.push((name.clone(), value));
        }

        self.ctx.audit.log_block_execute("<inline>", &code.language);
        let timeout = self.block_timeout(&code.language);
        let result = crate::ffi::guard("inline block", &code.language, || {
            executor.execute_with_return(&code.source, &bindings)
        });
        if timeout.expired() {
            self.ctx.audit.log_timeout(
                &format!("inline {} block", code.language),
                timeout.limit().as_millis() as u64,
            );
        }
        result
    }
}
