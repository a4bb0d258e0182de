//! C++ block executor.
//!
//! The block body is treated as an expression-oriented inline program:
//! it is wrapped in C scaffolding that serialises the expression's value
//! as JSON, compiled to a shared object with the system compiler, and
//! called through `dlopen`. Compiled artifacts are cached keyed by the
//! SHA-256 of the generated source, so repeated calls in one program
//! skip compilation.

use super::dylib::Library;
use crate::error::NaabError;
use crate::interpreter::Value;
use crate::limits::ScopedTimeout;
use crate::polyglot::loader::source_hash;
use crate::polyglot::marshal::json_to_value;
use crate::polyglot::Executor;
use crate::security::{AuditLogger, Capability, SandboxGuard};
use parking_lot::Mutex;
use rustc_hash::FxHashMap;
use std::ffi::CStr;
use std::os::raw::c_char;
use std::path::PathBuf;
use std::process::Command;
use std::sync::Arc;

type EntryFn = unsafe extern "C" fn() -> *const c_char;

const ENTRY_SYMBOL: &str = "naab_block_entry";

/// Executor compiling inline C++ blocks to shared objects.
pub struct CppExecutor {
    sandbox: Arc<SandboxGuard>,
    audit: Arc<AuditLogger>,
    cache_dir: PathBuf,
    compiled: Mutex<FxHashMap<String, Arc<Library>>>,
}

impl CppExecutor {
    /// Executor caching artifacts under the system temp directory.
    pub fn new(sandbox: Arc<SandboxGuard>, audit: Arc<AuditLogger>) -> Self {
        Self {
            sandbox,
            audit,
            cache_dir: std::env::temp_dir().join(format!("naab-cpp-cache-{}", std::process::id())),
            compiled: Mutex::new(FxHashMap::default()),
        }
    }

    /// Wrap the block body and bindings in the JSON-emitting scaffolding.
    fn scaffold(code: &str, bindings: &[(String, Value)]) -> Result<String, NaabError> {
        let mut src = String::from(
            r#"#include <string>
#include <sstream>

static std::string naab_json(long long v) { return std::to_string(v); }
static std::string naab_json(int v) { return std::to_string(v); }
static std::string naab_json(double v) { std::ostringstream o; o << v; return o.str(); }
static std::string naab_json(bool v) { return v ? "true" : "false"; }
static std::string naab_json(const std::string& v) {
    std::string out = "\"";
    for (char c : v) {
        if (c == '"' || c == '\\') { out += '\\'; }
        out += c;
    }
    return out + "\"";
}
static std::string naab_json(const char* v) { return naab_json(std::string(v)); }

"#,
        );

        for (name, value) in bindings {
            let literal = match value {
                Value::Null => "0".to_string(),
                Value::Int(i) => format!("{i}LL"),
                Value::Float(f) => format!("{f:?}"),
                Value::Bool(b) => b.to_string(),
                Value::Str(s) => format!(
                    "std::string(\"{}\")",
                    s.replace('\\', "\\\\").replace('"', "\\\"")
                ),
                other => {
                    return Err(NaabError::type_error(format!(
                        "cannot bind {} into a cpp block",
                        other.type_name()
                    )))
                }
            };
            src.push_str(&format!("static const auto {name} = {literal};\n"));
        }

        src.push_str(&format!(
            r#"
extern "C" const char* {ENTRY_SYMBOL}() {{
    static std::string naab_result;
    auto value = ({body});
    naab_result = naab_json(value);
    return naab_result.c_str();
}}
"#,
            body = code.trim()
        ));
        Ok(src)
    }

    /// Compile `source` (or reuse the cached artifact) and load it.
    fn compile(&self, source: &str) -> Result<Arc<Library>, NaabError> {
        let key = source_hash(source.as_bytes());
        if let Some(lib) = self.compiled.lock().get(&key) {
            return Ok(lib.clone());
        }

        self.sandbox
            .require(Capability::SpawnProcess, "compile_cpp_block", "c++")?;
        std::fs::create_dir_all(&self.cache_dir)
            .map_err(|e| NaabError::runtime(format!("cannot create cpp cache dir: {e}")))?;

        let src_path = self.cache_dir.join(format!("{key}.cpp"));
        let lib_path = self.cache_dir.join(format!("{key}.so"));
        std::fs::write(&src_path, source)
            .map_err(|e| NaabError::runtime(format!("cannot write cpp source: {e}")))?;

        if !lib_path.exists() {
            let timeout = ScopedTimeout::for_block("cpp compile");
            let output = Command::new("c++")
                .args(["-std=c++17", "-shared", "-fPIC", "-O2", "-o"])
                .arg(&lib_path)
                .arg(&src_path)
                .output()
                .map_err(|e| NaabError::runtime(format!("cannot run c++ compiler: {e}")))?;
            timeout.check()?;
            if !output.status.success() {
                return Err(NaabError::runtime(format!(
                    "cpp block failed to compile: {}",
                    String::from_utf8_lossy(&output.stderr).trim()
                )));
            }
        }

        let lib = Arc::new(
            Library::open(&lib_path.to_string_lossy())
                .map_err(|e| NaabError::import(e.to_string()))?,
        );
        self.audit
            .log_block_load(&lib_path.to_string_lossy(), &key);
        self.compiled.lock().insert(key, lib.clone());
        Ok(lib)
    }

    fn run(&self, code: &str, bindings: &[(String, Value)]) -> Result<Value, NaabError> {
        let source = Self::scaffold(code, bindings)?;
        let lib = self.compile(&source)?;
        self.audit.log_block_execute("<inline>", "cpp");

        // SAFETY: the scaffolding exports ENTRY_SYMBOL with this exact
        // signature, and the library stays loaded in the cache.
        let entry: EntryFn = unsafe {
            lib.function(ENTRY_SYMBOL)
                .map_err(|e| NaabError::import(e.to_string()))?
        };
        // SAFETY: entry returns a pointer into a static std::string that
        // outlives this call.
        let ptr = unsafe { entry() };
        if ptr.is_null() {
            return Err(NaabError::runtime("cpp block returned no result"));
        }
        let payload = unsafe { CStr::from_ptr(ptr) }.to_string_lossy();
        let json = serde_json::from_str(&payload).map_err(|e| {
            NaabError::value_error(format!("cpp block produced malformed JSON: {e}"))
        })?;
        Ok(json_to_value(&json))
    }
}

impl Executor for CppExecutor {
    fn language(&self) -> &str {
        "cpp"
    }

    fn is_initialized(&self) -> bool {
        true
    }

    fn execute(&self, code: &str) -> Result<(), NaabError> {
        self.run(code, &[]).map(|_| ())
    }

    fn execute_with_return(
        &self,
        code: &str,
        bindings: &[(String, Value)],
    ) -> Result<Value, NaabError> {
        self.run(code, bindings)
    }

    fn call_function(&self, name: &str, _args: &[Value]) -> Result<Value, NaabError> {
        Err(NaabError::runtime(format!(
            "cpp blocks are expression-oriented; no entry point '{name}'"
        )))
    }
}
