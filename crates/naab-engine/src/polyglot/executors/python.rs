//! Embedded CPython executor (feature `python`).
//!
//! One interpreter serves every Python block in the process. The GIL
//! discipline mirrors the constrained-platform workaround this engine
//! inherited:
//!
//! 1. [`initialize`] runs once on the main thread and leaves the GIL
//!    released.
//! 2. Every pool worker that may touch Python calls
//!    [`register_worker_thread`] before its first task. The first GIL
//!    acquisition on a thread creates that thread's interpreter state —
//!    doing it eagerly here means the state is allocated while address
//!    space is still unfragmented, and [`warmup`] then exercises every C
//!    API primitive on the execution path (module lookup, eval, exec,
//!    int/float/bool/str checks and conversions, list/tuple/dict ops,
//!    error fetch and clear) before any other embedded tenant runs.
//!    Skipping this reintroduces a late shadow-memory allocation that
//!    fails only after the address space fills — indistinguishable from
//!    random corruption. Preserve the ordering.
//! 3. Shutdown never finalises the interpreter; the OS reclaims the
//!    process (finalisation faults on the platforms this dance exists
//!    for).

use crate::error::NaabError;
use crate::interpreter::{ForeignObject, Value};
use crate::polyglot::Executor;
use indexmap::IndexMap;
use pyo3::exceptions::PySyntaxError;
use pyo3::prelude::*;
use pyo3::types::{PyBool, PyDict, PyFloat, PyInt, PyList, PyString, PyTuple};
use std::any::Any;
use std::cell::Cell;
use std::sync::Once;

/// Initialise the embedded interpreter. Idempotent; call from the main
/// thread before any worker starts.
pub fn initialize() {
    static ONCE: Once = Once::new();
    ONCE.call_once(|| {
        pyo3::prepare_freethreaded_python();
    });
}

thread_local! {
    static WORKER_READY: Cell<bool> = const { Cell::new(false) };
}

/// Per-worker setup: create this thread's interpreter state and run the
/// warmup. Must run before the worker's first Python task; see the
/// module docs for why the ordering is load-bearing.
pub fn register_worker_thread() {
    if WORKER_READY.with(Cell::get) {
        return;
    }
    initialize();
    Python::with_gil(warmup);
    WORKER_READY.with(|ready| ready.set(true));
}

/// True once this thread has registered (fast-path GIL entry).
pub fn worker_registered() -> bool {
    WORKER_READY.with(Cell::get)
}

/// Exercise every C API primitive used on the execution path.
fn warmup(py: Python<'_>) {
    let globals = match py.import_bound("__main__") {
        Ok(main) => main.dict(),
        Err(_) => return,
    };

    // Expression evaluation and int conversion.
    if let Ok(result) = py.eval_bound("1+1", Some(&globals), None) {
        let _ = result.extract::<i64>();
        let _ = result.str().map(|s| s.to_string_lossy().into_owned());
    }
    // Statement execution.
    let _ = py.run_bound("_naab_warmup = 42", Some(&globals), None);
    let _ = py.run_bound("del _naab_warmup", Some(&globals), None);
    // Float, string and bool paths.
    let f = PyFloat::new_bound(py, 3.14);
    let _ = f.extract::<f64>();
    let s = PyString::new_bound(py, "warmup");
    let _ = s.to_str();
    let _ = PyBool::new_bound(py, true).is_true();
    // List, tuple and dict ops used by the marshaller.
    let list = PyList::new_bound(py, [1i64, 2i64]);
    let _ = list.len();
    let _ = list.get_item(0);
    let tuple = PyTuple::new_bound(py, [42i64]);
    let _ = tuple.len();
    let dict = PyDict::new_bound(py);
    let _ = dict.set_item("key", 99i64);
    let _ = dict.get_item("key");
    // Error fetch and clear.
    let _ = py.eval_bound("1/0", Some(&globals), None).map_err(|e| {
        let _ = e.get_type_bound(py).qualname();
    });
}

/// An opaque Python object held across the boundary.
///
/// Dropping the inner `Py<PyAny>` releases the reference under the GIL
/// (pyo3 defers the decref to the next acquisition when the lock is not
/// held), which satisfies the idempotent-release contract for Foreign
/// values.
pub struct PyForeign {
    object: Py<PyAny>,
}

impl PyForeign {
    /// Borrow the wrapped object.
    pub fn bind<'py>(&self, py: Python<'py>) -> &Bound<'py, PyAny> {
        self.object.bind(py)
    }
}

impl ForeignObject for PyForeign {
    fn language(&self) -> &str {
        "python"
    }

    fn type_name(&self) -> String {
        Python::with_gil(|py| {
            self.object
                .bind(py)
                .get_type()
                .qualname()
                .map(|q| q.to_string())
                .unwrap_or_else(|_| "object".to_string())
        })
    }

    fn repr(&self) -> String {
        Python::with_gil(|py| match self.object.bind(py).repr() {
            Ok(r) => r.to_string_lossy().into_owned(),
            Err(_) => "<python object>".to_string(),
        })
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

/// NAAb → Python marshalling.
pub fn value_to_py<'py>(py: Python<'py>, value: &Value) -> Result<Bound<'py, PyAny>, NaabError> {
    match value {
        Value::Null => Ok(py.None().into_bound(py)),
        Value::Int(i) => Ok(i.to_object(py).into_bound(py)),
        Value::Float(f) => Ok(f.to_object(py).into_bound(py)),
        Value::Bool(b) => Ok(b.to_object(py).into_bound(py)),
        Value::Str(s) => Ok(PyString::new_bound(py, s).into_any()),
        Value::List(items) => {
            let list = PyList::empty_bound(py);
            for item in items.read().iter() {
                list.append(value_to_py(py, item)?)
                    .map_err(|e| py_err(py, e))?;
            }
            Ok(list.into_any())
        }
        Value::Dict(entries) => {
            let dict = PyDict::new_bound(py);
            for (key, item) in entries.read().iter() {
                dict.set_item(key, value_to_py(py, item)?)
                    .map_err(|e| py_err(py, e))?;
            }
            Ok(dict.into_any())
        }
        Value::Foreign(foreign) => match foreign.as_any().downcast_ref::<PyForeign>() {
            // Same-runtime handles pass through without copying.
            Some(py_obj) => Ok(py_obj.object.clone_ref(py).into_bound(py)),
            None => Err(NaabError::type_error(format!(
                "cannot pass a {} handle to python",
                foreign.language()
            ))),
        },
        other => Err(NaabError::type_error(format!(
            "cannot marshal {} into python",
            other.type_name()
        ))),
    }
}

/// Python → NAAb marshalling.
///
/// `bool` is checked before `int` (bool ⊂ int in Python); integers that
/// do not fit 64 bits come back as floats with documented precision
/// loss; dicts require string keys; everything else becomes a Foreign
/// handle.
pub fn py_to_value(obj: &Bound<'_, PyAny>) -> Result<Value, NaabError> {
    let py = obj.py();
    if obj.is_none() {
        return Ok(Value::Null);
    }
    if obj.is_instance_of::<PyBool>() {
        return Ok(Value::Bool(obj.extract::<bool>().map_err(|e| py_err(py, e))?));
    }
    if obj.is_instance_of::<PyInt>() {
        if let Ok(i) = obj.extract::<i64>() {
            return Ok(Value::Int(i));
        }
        let f = obj.extract::<f64>().map_err(|e| py_err(py, e))?;
        return Ok(Value::Float(f));
    }
    if obj.is_instance_of::<PyFloat>() {
        return Ok(Value::Float(obj.extract::<f64>().map_err(|e| py_err(py, e))?));
    }
    if obj.is_instance_of::<PyString>() {
        return Ok(Value::string(
            &obj.extract::<String>().map_err(|e| py_err(py, e))?,
        ));
    }
    if let Ok(list) = obj.downcast::<PyList>() {
        let mut out = Vec::with_capacity(list.len());
        for item in list.iter() {
            out.push(py_to_value(&item)?);
        }
        return Ok(Value::list(out));
    }
    if let Ok(tuple) = obj.downcast::<PyTuple>() {
        let mut out = Vec::with_capacity(tuple.len());
        for item in tuple.iter() {
            out.push(py_to_value(&item)?);
        }
        return Ok(Value::list(out));
    }
    if let Ok(dict) = obj.downcast::<PyDict>() {
        let mut out = IndexMap::with_capacity(dict.len());
        for (key, item) in dict.iter() {
            let Ok(key) = key.extract::<String>() else {
                return Err(NaabError::type_error(
                    "python dict with non-string keys is not representable",
                ));
            };
            out.insert(key, py_to_value(&item)?);
        }
        return Ok(Value::dict(out));
    }
    Ok(Value::Foreign(std::sync::Arc::new(PyForeign {
        object: obj.clone().unbind(),
    })))
}

fn py_err(py: Python<'_>, err: PyErr) -> NaabError {
    let type_name = err
        .get_type_bound(py)
        .qualname()
        .map(|q| q.to_string())
        .unwrap_or_else(|_| "Exception".to_string());
    NaabError::runtime(format!("python raised {type_name}: {}", err.value_bound(py)))
}

/// The embedded Python executor.
pub struct PythonExecutor;

impl PythonExecutor {
    /// Create (and lazily initialise) the shared interpreter.
    pub fn new() -> Self {
        initialize();
        Self
    }

    /// Eval-first strategy: try expression mode; on a syntax error split
    /// the source into a statement prefix plus a final line, execute the
    /// prefix, then evaluate the final line (executing it instead when it
    /// is itself a statement, yielding Null).
    fn eval_source(
        &self,
        py: Python<'_>,
        globals: &Bound<'_, PyDict>,
        code: &str,
    ) -> Result<Value, NaabError> {
        match py.eval_bound(code, Some(globals), None) {
            Ok(obj) => py_to_value(&obj),
            Err(err) if err.is_instance_of::<PySyntaxError>(py) => {
                let lines: Vec<&str> = code.lines().collect();
                let last_index = match lines.iter().rposition(|l| !l.trim().is_empty()) {
                    Some(i) => i,
                    None => return Ok(Value::Null),
                };
                let prefix = lines[..last_index].join("\n");
                let tail = lines[last_index];

                if !prefix.trim().is_empty() {
                    py.run_bound(&prefix, Some(globals), None)
                        .map_err(|e| py_err(py, e))?;
                }
                match py.eval_bound(tail.trim(), Some(globals), None) {
                    Ok(obj) => py_to_value(&obj),
                    Err(err) if err.is_instance_of::<PySyntaxError>(py) => {
                        // The tail is a statement too; run it for effect.
                        py.run_bound(tail, Some(globals), None)
                            .map_err(|e| py_err(py, e))?;
                        Ok(Value::Null)
                    }
                    Err(err) => Err(py_err(py, err)),
                }
            }
            Err(err) => Err(py_err(py, err)),
        }
    }

    fn with_globals<R>(
        &self,
        f: impl FnOnce(Python<'_>, &Bound<'_, PyDict>) -> Result<R, NaabError>,
    ) -> Result<R, NaabError> {
        Python::with_gil(|py| {
            let main = py.import_bound("__main__").map_err(|e| py_err(py, e))?;
            let globals = main.dict();
            f(py, &globals)
        })
    }
}

impl Default for PythonExecutor {
    fn default() -> Self {
        Self::new()
    }
}

impl Executor for PythonExecutor {
    fn language(&self) -> &str {
        "python"
    }

    fn is_initialized(&self) -> bool {
        true
    }

    fn execute(&self, code: &str) -> Result<(), NaabError> {
        self.with_globals(|py, globals| {
            py.run_bound(code, Some(globals), None)
                .map_err(|e| py_err(py, e))
        })
    }

    fn execute_with_return(
        &self,
        code: &str,
        bindings: &[(String, Value)],
    ) -> Result<Value, NaabError> {
        self.with_globals(|py, globals| {
            for (name, value) in bindings {
                globals
                    .set_item(name, value_to_py(py, value)?)
                    .map_err(|e| py_err(py, e))?;
            }
            self.eval_source(py, globals, code)
        })
    }

    fn call_function(&self, name: &str, args: &[Value]) -> Result<Value, NaabError> {
        self.with_globals(|py, globals| {
            let func = globals
                .get_item(name)
                .map_err(|e| py_err(py, e))?
                .ok_or_else(|| {
                    NaabError::runtime(format!("python function not found: {name}"))
                })?;
            let mut py_args = Vec::with_capacity(args.len());
            for arg in args {
                py_args.push(value_to_py(py, arg)?);
            }
            let tuple = PyTuple::new_bound(py, py_args);
            let result = func.call1(tuple).map_err(|e| py_err(py, e))?;
            py_to_value(&result)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn executor() -> PythonExecutor {
        PythonExecutor::new()
    }

    #[test]
    fn test_expression_eval() {
        let v = executor().execute_with_return("6 * 7", &[]).unwrap();
        assert_eq!(v.as_int(), Some(42));
    }

    #[test]
    fn test_bindings_reach_globals() {
        let bindings = vec![("s".to_string(), Value::Int(7))];
        let v = executor()
            .execute_with_return("{\"double\": s * 2, \"square\": s * s}", &bindings)
            .unwrap();
        assert_eq!(v.member_get("double").unwrap().as_int(), Some(14));
        assert_eq!(v.member_get("square").unwrap().as_int(), Some(49));
    }

    #[test]
    fn test_multi_statement_split() {
        let v = executor()
            .execute_with_return("x = 10\ny = 4\nx + y", &[])
            .unwrap();
        assert_eq!(v.as_int(), Some(14));
    }

    #[test]
    fn test_statement_tail_yields_null() {
        let v = executor()
            .execute_with_return("q = 1\nq = q + 1", &[])
            .unwrap();
        assert!(matches!(v, Value::Null));
    }

    #[test]
    fn test_bool_checked_before_int() {
        let v = executor().execute_with_return("True", &[]).unwrap();
        assert!(matches!(v, Value::Bool(true)));
    }

    #[test]
    fn test_oversized_int_degrades_to_float() {
        let v = executor().execute_with_return("2 ** 100", &[]).unwrap();
        assert!(matches!(v, Value::Float(_)));
    }

    #[test]
    fn test_marshal_round_trip() {
        let exec = executor();
        for value in [
            Value::Null,
            Value::Int(-5),
            Value::Float(2.5),
            Value::Bool(false),
            Value::string("snake"),
            Value::list(vec![Value::Int(1), Value::string("two")]),
        ] {
            let bindings = vec![("v".to_string(), value.clone())];
            let back = exec.execute_with_return("v", &bindings).unwrap();
            assert!(value.equals(&back), "{value:?} failed round trip");
        }
    }

    #[test]
    fn test_foreign_handle_for_opaque_objects() {
        let v = executor().execute_with_return("object()", &[]).unwrap();
        match &v {
            Value::Foreign(f) => {
                assert_eq!(f.language(), "python");
                assert!(f.repr().contains("object"));
            }
            other => panic!("expected Foreign, got {other:?}"),
        }
    }

    #[test]
    fn test_errors_carry_python_type_name() {
        let err = executor().execute_with_return("1 / 0", &[]).unwrap_err();
        assert!(err.message.contains("ZeroDivisionError"));
    }

    #[test]
    fn test_call_function() {
        let exec = executor();
        exec.execute("def naab_add(a, b):\n    return a + b").unwrap();
        let v = exec
            .call_function("naab_add", &[Value::Int(2), Value::Int(3)])
            .unwrap();
        assert_eq!(v.as_int(), Some(5));
    }

    #[test]
    fn test_worker_registration_is_idempotent() {
        register_worker_thread();
        register_worker_thread();
        assert!(worker_registered());
    }
}
