//! Polyglot execution substrate.
//!
//! Each foreign language implements the [`Executor`] contract; the
//! [`ExecutorRegistry`] maps language names to executor handles. Embedded
//! executors (Python, JavaScript) are long-lived and shared across every
//! block of their language; subprocess-style executors are thin façades
//! that spawn processes on demand.

pub mod analyzer;
pub mod executors;
pub mod loader;
pub mod marshal;
pub mod output;
pub mod pool;
pub mod scheduler;

use crate::error::NaabError;
use crate::interpreter::Value;
use parking_lot::RwLock;
use rustc_hash::FxHashMap;
use std::sync::Arc;

/// Per-language runtime adapter.
pub trait Executor: Send + Sync {
    /// Language identifier (`python`, `javascript`, `rust`, ...).
    fn language(&self) -> &str;

    /// Readiness probe.
    fn is_initialized(&self) -> bool;

    /// Run `code` for its side effects; no return value is captured.
    fn execute(&self, code: &str) -> Result<(), NaabError>;

    /// Evaluate `code` and return its result.
    ///
    /// `bindings` carries the NAAb read-set into the foreign runtime:
    /// embedded executors inject the values as globals, subprocess
    /// executors serialise them as JSON.
    fn execute_with_return(
        &self,
        code: &str,
        bindings: &[(String, Value)],
    ) -> Result<Value, NaabError>;

    /// Invoke a named entry point, where the runtime supports one.
    fn call_function(&self, name: &str, args: &[Value]) -> Result<Value, NaabError>;
}

impl std::fmt::Debug for dyn Executor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Executor")
            .field("language", &self.language())
            .finish()
    }
}

/// Maps language names (and aliases) to executor handles.
pub struct ExecutorRegistry {
    executors: RwLock<FxHashMap<String, Arc<dyn Executor>>>,
}

impl ExecutorRegistry {
    /// An empty registry.
    pub fn new() -> Self {
        Self {
            executors: RwLock::new(FxHashMap::default()),
        }
    }

    /// Register `executor` under its language name.
    pub fn register(&self, executor: Arc<dyn Executor>) {
        let name = executor.language().to_string();
        self.executors.write().insert(name, executor);
    }

    /// Register `executor` under an additional alias (`py` → `python`).
    pub fn register_alias(&self, alias: &str, executor: Arc<dyn Executor>) {
        self.executors.write().insert(alias.to_string(), executor);
    }

    /// The executor for `language`, if registered.
    pub fn get(&self, language: &str) -> Option<Arc<dyn Executor>> {
        self.executors.read().get(language).cloned()
    }

    /// The executor for `language`, or an Import error naming the
    /// registered languages.
    pub fn require(&self, language: &str) -> Result<Arc<dyn Executor>, NaabError> {
        self.get(language).ok_or_else(|| {
            let mut known = self.languages();
            known.sort();
            NaabError::import(format!(
                "no executor registered for language '{language}' (available: {})",
                known.join(", ")
            ))
        })
    }

    /// Registered language names, aliases included.
    pub fn languages(&self) -> Vec<String> {
        self.executors.read().keys().cloned().collect()
    }
}

impl Default for ExecutorRegistry {
    fn default() -> Self {
        Self::new()
    }
}
