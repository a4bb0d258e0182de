//! Lexically scoped environments with a parent chain.

use crate::error::NaabError;
use crate::interpreter::Value;
use parking_lot::RwLock;
use rustc_hash::FxHashMap;
use std::sync::Arc;

/// A name→value scope with an optional parent.
///
/// Function calls create a child of the callee's captured environment
/// (not the caller's scope), which is what makes closures work.
#[derive(Debug, Default)]
pub struct Environment {
    bindings: RwLock<FxHashMap<String, Value>>,
    parent: Option<Arc<Environment>>,
}

impl Environment {
    /// A root scope.
    pub fn new() -> Arc<Environment> {
        Arc::new(Environment::default())
    }

    /// A child scope of `parent`.
    pub fn child_of(parent: &Arc<Environment>) -> Arc<Environment> {
        Arc::new(Environment {
            bindings: RwLock::new(FxHashMap::default()),
            parent: Some(parent.clone()),
        })
    }

    /// Define `name` in this scope unconditionally, shadowing any outer
    /// binding of the same name.
    pub fn define(&self, name: impl Into<String>, value: Value) {
        self.bindings.write().insert(name.into(), value);
    }

    /// Look `name` up, walking the parent chain to the root.
    pub fn get(&self, name: &str) -> Option<Value> {
        if let Some(v) = self.bindings.read().get(name) {
            return Some(v.clone());
        }
        self.parent.as_ref()?.get(name)
    }

    /// Update `name` in the innermost scope that defines it.
    ///
    /// Writing an undefined name is a Name error carrying in-scope
    /// candidates for "did you mean?".
    pub fn set(&self, name: &str, value: Value) -> Result<(), NaabError> {
        if self.set_existing(name, &value) {
            return Ok(());
        }
        Err(NaabError::name_error(name, &self.all_names()))
    }

    fn set_existing(&self, name: &str, value: &Value) -> bool {
        {
            let mut bindings = self.bindings.write();
            if bindings.contains_key(name) {
                bindings.insert(name.to_string(), value.clone());
                return true;
            }
        }
        match &self.parent {
            Some(parent) => parent.set_existing(name, value),
            None => false,
        }
    }

    /// True when `name` is visible from this scope.
    pub fn has(&self, name: &str) -> bool {
        self.bindings.read().contains_key(name)
            || self.parent.as_ref().is_some_and(|p| p.has(name))
    }

    /// Every name visible from this scope, for suggestion lookups.
    pub fn all_names(&self) -> Vec<String> {
        let mut names: Vec<String> = Vec::new();
        let mut env: Option<&Environment> = Some(self);
        while let Some(e) = env {
            names.extend(e.bindings.read().keys().cloned());
            env = e.parent.as_deref();
        }
        names.sort();
        names.dedup();
        names
    }

    /// The parent scope, if any.
    pub fn parent(&self) -> Option<&Arc<Environment>> {
        self.parent.as_ref()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;

    #[test]
    fn test_define_and_get() {
        let env = Environment::new();
        env.define("x", Value::Int(1));
        assert_eq!(env.get("x").unwrap().as_int(), Some(1));
        assert!(env.get("y").is_none());
    }

    #[test]
    fn test_child_sees_parent_until_shadowed() {
        let root = Environment::new();
        root.define("x", Value::Int(1));
        let child = Environment::child_of(&root);
        assert_eq!(child.get("x").unwrap().as_int(), Some(1));

        child.define("x", Value::Int(2));
        assert_eq!(child.get("x").unwrap().as_int(), Some(2));
        assert_eq!(root.get("x").unwrap().as_int(), Some(1));
    }

    #[test]
    fn test_set_updates_innermost_defining_scope() {
        let root = Environment::new();
        root.define("n", Value::Int(0));
        let mid = Environment::child_of(&root);
        let leaf = Environment::child_of(&mid);

        leaf.set("n", Value::Int(5)).unwrap();
        assert_eq!(root.get("n").unwrap().as_int(), Some(5));

        mid.define("n", Value::Int(100));
        leaf.set("n", Value::Int(7)).unwrap();
        assert_eq!(mid.get("n").unwrap().as_int(), Some(7));
        assert_eq!(root.get("n").unwrap().as_int(), Some(5));
    }

    #[test]
    fn test_set_undefined_is_name_error_with_suggestions() {
        let env = Environment::new();
        env.define("counter", Value::Int(0));
        let err = env.set("countr", Value::Int(1)).unwrap_err();
        assert_eq!(err.kind, ErrorKind::Name);
        assert_eq!(err.suggestions, vec!["counter".to_string()]);
    }

    #[test]
    fn test_all_names_flattens_chain() {
        let root = Environment::new();
        root.define("a", Value::Int(1));
        let child = Environment::child_of(&root);
        child.define("b", Value::Int(2));
        child.define("a", Value::Int(3)); // shadowing still yields one "a"
        assert_eq!(child.all_names(), vec!["a".to_string(), "b".to_string()]);
    }

    #[test]
    fn test_has_walks_parents() {
        let root = Environment::new();
        root.define("x", Value::Null);
        let child = Environment::child_of(&root);
        assert!(child.has("x"));
        assert!(!child.has("y"));
    }
}
