//! Embedded QuickJS executor (feature `javascript`).
//!
//! One engine runtime and context are shared across every JavaScript
//! block. The engine is single-threaded; the executor serialises all
//! access through a mutex, which is the engine's "global lock" in the
//! sense the concurrency model requires. Address-space coexistence with
//! the Python runtime is part of the worker init ordering: Python's
//! warmup must run before this engine allocates (see the python module).

use crate::error::NaabError;
use crate::interpreter::Value;
use crate::polyglot::Executor;
use indexmap::IndexMap;
use parking_lot::Mutex;
use rquickjs::{Array, Context, Ctx, Object, Runtime};

struct Engine {
    // Kept alive for the context's lifetime.
    _runtime: Runtime,
    context: Context,
}

/// The embedded JavaScript executor.
pub struct JsExecutor {
    engine: Mutex<Option<Engine>>,
}

// SAFETY: the engine is only ever touched while the mutex is held, so
// the single-threaded QuickJS state is never accessed concurrently.
unsafe impl Send for JsExecutor {}
unsafe impl Sync for JsExecutor {}

impl JsExecutor {
    /// Create the executor; the engine context is built on first use.
    pub fn new() -> Self {
        Self {
            engine: Mutex::new(None),
        }
    }

    fn with_context<R>(
        &self,
        f: impl FnOnce(&Ctx<'_>) -> Result<R, NaabError>,
    ) -> Result<R, NaabError> {
        let mut guard = self.engine.lock();
        if guard.is_none() {
            let runtime = Runtime::new()
                .map_err(|e| NaabError::runtime(format!("cannot create js runtime: {e}")))?;
            let context = Context::full(&runtime)
                .map_err(|e| NaabError::runtime(format!("cannot create js context: {e}")))?;
            *guard = Some(Engine {
                _runtime: runtime,
                context,
            });
        }
        let engine = guard.as_ref().expect("engine initialised above");
        engine.context.with(|ctx| f(&ctx))
    }

    fn eval_in<'js>(
        ctx: &Ctx<'js>,
        code: &str,
        bindings: &[(String, Value)],
    ) -> Result<Value, NaabError> {
        let globals = ctx.globals();
        for (name, value) in bindings {
            let js = value_to_js(ctx, value)?;
            globals
                .set(name.as_str(), js)
                .map_err(|e| js_error(ctx, e))?;
        }
        let result: rquickjs::Value<'js> =
            ctx.eval(code).map_err(|e| js_error(ctx, e))?;
        js_to_value(ctx, &result)
    }
}

impl Default for JsExecutor {
    fn default() -> Self {
        Self::new()
    }
}

fn js_error(ctx: &Ctx<'_>, err: rquickjs::Error) -> NaabError {
    if let rquickjs::Error::Exception = err {
        let caught = ctx.catch();
        let rendered = caught
            .as_exception()
            .and_then(|e| e.message())
            .unwrap_or_else(|| format!("{caught:?}"));
        return NaabError::runtime(format!("javascript raised Error: {rendered}"));
    }
    NaabError::runtime(format!("javascript raised {err}"))
}

/// NAAb → JS marshalling.
fn value_to_js<'js>(ctx: &Ctx<'js>, value: &Value) -> Result<rquickjs::Value<'js>, NaabError> {
    use rquickjs::IntoJs;
    let convert = |e: rquickjs::Error| js_error(ctx, e);
    match value {
        Value::Null => Ok(rquickjs::Value::new_null(ctx.clone())),
        Value::Int(i) => i.into_js(ctx).map_err(convert),
        Value::Float(f) => f.into_js(ctx).map_err(convert),
        Value::Bool(b) => b.into_js(ctx).map_err(convert),
        Value::Str(s) => s.as_ref().into_js(ctx).map_err(convert),
        Value::List(items) => {
            let array = Array::new(ctx.clone()).map_err(convert)?;
            for (i, item) in items.read().iter().enumerate() {
                array.set(i, value_to_js(ctx, item)?).map_err(convert)?;
            }
            Ok(array.into_value())
        }
        Value::Dict(entries) => {
            let object = Object::new(ctx.clone()).map_err(convert)?;
            for (key, item) in entries.read().iter() {
                object
                    .set(key.as_str(), value_to_js(ctx, item)?)
                    .map_err(convert)?;
            }
            Ok(object.into_value())
        }
        other => Err(NaabError::type_error(format!(
            "cannot marshal {} into javascript",
            other.type_name()
        ))),
    }
}

/// JS → NAAb marshalling.
fn js_to_value(ctx: &Ctx<'_>, value: &rquickjs::Value<'_>) -> Result<Value, NaabError> {
    if value.is_undefined() || value.is_null() {
        return Ok(Value::Null);
    }
    if let Some(b) = value.as_bool() {
        return Ok(Value::Bool(b));
    }
    if let Some(i) = value.as_int() {
        return Ok(Value::Int(i64::from(i)));
    }
    if let Some(f) = value.as_float() {
        return Ok(Value::Float(f));
    }
    if let Some(s) = value.as_string() {
        let text = s
            .to_string()
            .map_err(|e| js_error(ctx, e))?;
        return Ok(Value::string(&text));
    }
    if let Some(array) = value.as_array() {
        let mut out = Vec::with_capacity(array.len());
        for item in array.iter::<rquickjs::Value>() {
            let item = item.map_err(|e| js_error(ctx, e))?;
            out.push(js_to_value(ctx, &item)?);
        }
        return Ok(Value::list(out));
    }
    if let Some(object) = value.as_object() {
        let mut out = IndexMap::new();
        for entry in object.props::<String, rquickjs::Value>() {
            let (key, item) = entry.map_err(|e| js_error(ctx, e))?;
            out.insert(key, js_to_value(ctx, &item)?);
        }
        return Ok(Value::dict(out));
    }
    Err(NaabError::type_error(format!(
        "javascript value of type {} is not representable",
        value.type_name()
    )))
}

impl Executor for JsExecutor {
    fn language(&self) -> &str {
        "javascript"
    }

    fn is_initialized(&self) -> bool {
        true
    }

    fn execute(&self, code: &str) -> Result<(), NaabError> {
        self.with_context(|ctx| {
            let _: rquickjs::Value<'_> = ctx.eval(code).map_err(|e| js_error(ctx, e))?;
            Ok(())
        })
    }

    fn execute_with_return(
        &self,
        code: &str,
        bindings: &[(String, Value)],
    ) -> Result<Value, NaabError> {
        self.with_context(|ctx| Self::eval_in(ctx, code, bindings))
    }

    fn call_function(&self, name: &str, args: &[Value]) -> Result<Value, NaabError> {
        self.with_context(|ctx| {
            let globals = ctx.globals();
            let func: rquickjs::Function<'_> = globals
                .get(name)
                .map_err(|_| NaabError::runtime(format!("javascript function not found: {name}")))?;
            let mut js_args = rquickjs::function::Args::new(ctx.clone(), args.len());
            for arg in args {
                js_args
                    .push_arg(value_to_js(ctx, arg)?)
                    .map_err(|e| js_error(ctx, e))?;
            }
            let result: rquickjs::Value<'_> =
                func.call_arg(js_args).map_err(|e| js_error(ctx, e))?;
            js_to_value(ctx, &result)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_expression_eval() {
        let exec = JsExecutor::new();
        let v = exec.execute_with_return("6 * 7", &[]).unwrap();
        assert_eq!(v.as_int(), Some(42));
    }

    #[test]
    fn test_bindings_and_objects() {
        let exec = JsExecutor::new();
        let bindings = vec![("s".to_string(), Value::Int(7))];
        let v = exec
            .execute_with_return("({double: s * 2, square: s * s})", &bindings)
            .unwrap();
        assert_eq!(v.member_get("double").unwrap().as_int(), Some(14));
        assert_eq!(v.member_get("square").unwrap().as_int(), Some(49));
    }

    #[test]
    fn test_context_is_shared_across_blocks() {
        let exec = JsExecutor::new();
        exec.execute("globalThis.counter = 10").unwrap();
        let v = exec.execute_with_return("counter + 1", &[]).unwrap();
        assert_eq!(v.as_int(), Some(11));
    }

    #[test]
    fn test_errors_surface() {
        let exec = JsExecutor::new();
        let err = exec.execute_with_return("nope.missing", &[]).unwrap_err();
        assert!(err.message.contains("javascript raised"));
    }

    #[test]
    fn test_call_function() {
        let exec = JsExecutor::new();
        exec.execute("function add(a, b) { return a + b }").unwrap();
        let v = exec
            .call_function("add", &[Value::Int(2), Value::Int(3)])
            .unwrap();
        assert_eq!(v.as_int(), Some(5));
    }
}
