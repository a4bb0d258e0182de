//! Rust block executor.
//!
//! A Rust block is a function exported from a shared object built
//! against `naab-sdk`, addressed as
//! `rust:///absolute/path/to/lib.so::function_name`. Libraries are
//! cached by path and symbols by `path::function` for the life of the
//! process. Arguments and results cross the boundary as `NaabValue`
//! C-ABI handles; every handle is freed on this side after the call.

use super::dylib::Library;
use crate::error::NaabError;
use crate::interpreter::Value;
use crate::polyglot::Executor;
use crate::security::{AuditLogger, Capability, SandboxGuard};
use naab_sdk::{NaabBlockFn, NaabValue, NaabValueKind};
use parking_lot::Mutex;
use rustc_hash::FxHashMap;
use std::ffi::{CStr, CString};
use std::os::raw::c_char;
use std::sync::Arc;

/// Executor for `rust://` block references.
pub struct RustExecutor {
    sandbox: Arc<SandboxGuard>,
    audit: Arc<AuditLogger>,
    libraries: Mutex<FxHashMap<String, Arc<Library>>>,
    symbols: Mutex<FxHashMap<String, NaabBlockFn>>,
}

impl RustExecutor {
    /// New executor with empty caches.
    pub fn new(sandbox: Arc<SandboxGuard>, audit: Arc<AuditLogger>) -> Self {
        Self {
            sandbox,
            audit,
            libraries: Mutex::new(FxHashMap::default()),
            symbols: Mutex::new(FxHashMap::default()),
        }
    }

    /// Split `rust://<path>::<function>` into its parts.
    fn parse_uri(uri: &str) -> Result<(&str, &str), NaabError> {
        let rest = uri.trim().strip_prefix("rust://").ok_or_else(|| {
            NaabError::value_error(format!(
                "invalid rust block reference '{uri}': expected rust://<path>::<function>"
            ))
        })?;
        let (path, function) = rest.rsplit_once("::").ok_or_else(|| {
            NaabError::value_error(format!(
                "invalid rust block reference '{uri}': missing ::<function>"
            ))
        })?;
        if path.is_empty() || function.is_empty() {
            return Err(NaabError::value_error(format!(
                "invalid rust block reference '{uri}': empty path or function"
            )));
        }
        if !path.starts_with('/') {
            return Err(NaabError::value_error(format!(
                "rust block path must be absolute: '{path}'"
            )));
        }
        Ok((path, function))
    }

    fn library(&self, path: &str) -> Result<Arc<Library>, NaabError> {
        if let Some(lib) = self.libraries.lock().get(path) {
            return Ok(lib.clone());
        }
        self.sandbox
            .require(Capability::BlockLoad, "load_rust_library", path)?;
        let lib = Arc::new(
            Library::open(path).map_err(|e| NaabError::import(e.to_string()))?,
        );
        self.audit.log_block_load(path, "");
        self.libraries.lock().insert(path.to_string(), lib.clone());
        Ok(lib)
    }

    fn function(&self, path: &str, name: &str) -> Result<NaabBlockFn, NaabError> {
        let key = format!("{path}::{name}");
        if let Some(f) = self.symbols.lock().get(&key) {
            return Ok(*f);
        }
        let lib = self.library(path)?;
        // SAFETY: the exported block signature is fixed by the SDK
        // contract, and cached libraries are never unloaded.
        let func: NaabBlockFn = unsafe {
            lib.function(name)
                .map_err(|e| NaabError::import(e.to_string()))?
        };
        self.symbols.lock().insert(key, func);
        Ok(func)
    }

    /// Fetch the block library's thread-local error message, if its SDK
    /// copy exports one.
    fn block_error(&self, path: &str) -> Option<String> {
        let lib = self.libraries.lock().get(path)?.clone();
        type LastErrorFn = extern "C" fn() -> *const c_char;
        // SAFETY: naab_last_error has this exact signature in every SDK build.
        let last_error: LastErrorFn = unsafe { lib.function("naab_last_error").ok()? };
        let ptr = last_error();
        if ptr.is_null() {
            return None;
        }
        // SAFETY: the SDK returns a NUL-terminated string owned by TLS.
        Some(unsafe { CStr::from_ptr(ptr) }.to_string_lossy().into_owned())
    }

    /// Call one block function with marshalled arguments.
    fn call_block(&self, uri: &str, args: &[Value]) -> Result<Value, NaabError> {
        let (path, function) = Self::parse_uri(uri)?;
        self.sandbox
            .require(Capability::BlockCall, "call_rust_block", uri)?;
        let func = self.function(path, function)?;

        let mut handles: Vec<*mut NaabValue> = Vec::with_capacity(args.len());
        for arg in args {
            match value_to_handle(arg) {
                Ok(handle) => handles.push(handle),
                Err(err) => {
                    free_handles(&handles);
                    return Err(err);
                }
            }
        }

        self.audit.log_block_execute(uri, "rust");
        // SAFETY: func has the SDK block signature; handles are live and
        // exclusively owned until freed below.
        let result = unsafe { func(handles.as_mut_ptr(), handles.len()) };
        free_handles(&handles);

        if result.is_null() {
            let detail = self
                .block_error(path)
                .unwrap_or_else(|| "block returned null with no error message".to_string());
            return Err(NaabError::runtime(format!(
                "rust block {function} in {path} failed: {detail}"
            )));
        }
        let value = handle_to_value(result);
        // SAFETY: result is an owned handle transferred to us by the block.
        unsafe { naab_sdk::naab_value_free(result) };
        value
    }
}

fn free_handles(handles: &[*mut NaabValue]) {
    for &handle in handles {
        // SAFETY: every handle came from value_to_handle and is freed once.
        unsafe { naab_sdk::naab_value_free(handle) };
    }
}

/// NAAb value → C-ABI handle. Only scalar variants cross this boundary.
fn value_to_handle(value: &Value) -> Result<*mut NaabValue, NaabError> {
    match value {
        Value::Null => Ok(naab_sdk::naab_value_null()),
        Value::Int(i) => Ok(naab_sdk::naab_value_int(*i)),
        Value::Float(f) => Ok(naab_sdk::naab_value_float(*f)),
        Value::Bool(b) => Ok(naab_sdk::naab_value_bool(*b)),
        Value::Str(s) => {
            let c = CString::new(s.replace('\0', " "))
                .map_err(|_| NaabError::value_error("string not representable"))?;
            // SAFETY: c is valid for the duration of the call.
            Ok(unsafe { naab_sdk::naab_value_string(c.as_ptr()) })
        }
        other => Err(NaabError::type_error(format!(
            "cannot pass {} to a rust block",
            other.type_name()
        ))),
    }
}

/// C-ABI handle → NAAb value.
fn handle_to_value(handle: *const NaabValue) -> Result<Value, NaabError> {
    // SAFETY: handle is a live SDK handle for every accessor below.
    unsafe {
        match naab_sdk::naab_value_tag(handle) {
            NaabValueKind::Null => Ok(Value::Null),
            NaabValueKind::Int => Ok(Value::Int(naab_sdk::naab_value_as_int(handle))),
            NaabValueKind::Float => Ok(Value::Float(naab_sdk::naab_value_as_float(handle))),
            NaabValueKind::Bool => Ok(Value::Bool(naab_sdk::naab_value_as_bool(handle))),
            NaabValueKind::String => {
                let ptr = naab_sdk::naab_value_as_string(handle);
                if ptr.is_null() {
                    return Ok(Value::string(""));
                }
                Ok(Value::string(&CStr::from_ptr(ptr).to_string_lossy()))
            }
        }
    }
}

impl Executor for RustExecutor {
    fn language(&self) -> &str {
        "rust"
    }

    fn is_initialized(&self) -> bool {
        true
    }

    fn execute(&self, code: &str) -> Result<(), NaabError> {
        self.call_block(code, &[]).map(|_| ())
    }

    fn execute_with_return(
        &self,
        code: &str,
        bindings: &[(String, Value)],
    ) -> Result<Value, NaabError> {
        // Bound variables become positional arguments, in binding order.
        let args: Vec<Value> = bindings.iter().map(|(_, v)| v.clone()).collect();
        self.call_block(code, &args)
    }

    fn call_function(&self, name: &str, args: &[Value]) -> Result<Value, NaabError> {
        self.call_block(name, args)
    }
}
