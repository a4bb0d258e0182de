//! Runtime value representation.
//!
//! [`Value`] is a closed tagged union. Composite variants (lists, dicts,
//! structs) are shared by reference: assigning or passing one aliases the
//! same storage, and mutation through one binding is observable through
//! all others. Interior mutability goes through `parking_lot` locks so
//! snapshots of values can cross the polyglot worker pool.
//!
//! Reference-counted cycles (`x` containing itself) are legal and are
//! handled by per-operation visited sets in display, equality and
//! traversal; such cycles leak storage because there is no cycle
//! collector.

use crate::ast::{Param, Span, Stmt, TypeExpr};
use crate::error::NaabError;
use crate::interpreter::Environment;
use crate::polyglot::Executor;
use indexmap::IndexMap;
use parking_lot::RwLock;
use rustc_hash::FxHashMap;
use std::any::Any;
use std::collections::HashSet;
use std::fmt;
use std::sync::Arc;

/// Immutable struct type definition, registered by `struct` declarations.
#[derive(Debug)]
pub struct StructDef {
    /// Type name.
    pub type_name: String,
    /// Ordered fields with declared types.
    pub fields: Vec<(String, TypeExpr)>,
    /// Precomputed field-name → index map; index access must agree with
    /// name access.
    index: FxHashMap<String, usize>,
}

impl StructDef {
    /// Build a definition, precomputing the name→index map.
    pub fn new(type_name: impl Into<String>, fields: Vec<(String, TypeExpr)>) -> Self {
        let index = fields
            .iter()
            .enumerate()
            .map(|(i, (name, _))| (name.clone(), i))
            .collect();
        Self {
            type_name: type_name.into(),
            fields,
            index,
        }
    }

    /// Index of `field`, if declared.
    pub fn field_index(&self, field: &str) -> Option<usize> {
        self.index.get(field).copied()
    }

    /// Number of fields.
    pub fn field_count(&self) -> usize {
        self.fields.len()
    }
}

/// A struct instance: shared definition plus mutable field slots.
#[derive(Debug)]
pub struct StructInstance {
    /// The definition this instance was built from.
    pub def: Arc<StructDef>,
    /// Field values in declaration order.
    pub fields: RwLock<Vec<Value>>,
}

impl StructInstance {
    /// Read a field by name.
    pub fn get(&self, field: &str) -> Option<Value> {
        let i = self.def.field_index(field)?;
        self.fields.read().get(i).cloned()
    }

    /// Write a field by name. Returns false for undeclared fields.
    pub fn set(&self, field: &str, value: Value) -> bool {
        match self.def.field_index(field) {
            Some(i) => {
                self.fields.write()[i] = value;
                true
            }
            None => false,
        }
    }

    /// Read a field by position.
    pub fn get_index(&self, index: usize) -> Option<Value> {
        self.fields.read().get(index).cloned()
    }
}

/// A user-defined function closure.
#[derive(Debug)]
pub struct FunctionValue {
    /// Function name (`<lambda>` for anonymous functions).
    pub name: String,
    /// Parameters with declared types and defaults.
    pub params: Vec<Param>,
    /// Declared return type.
    pub return_type: TypeExpr,
    /// Body statement.
    pub body: Stmt,
    /// Declaring source file.
    pub source_file: String,
    /// Declaration location.
    pub span: Span,
    /// Lexical scope captured at declaration. Calls execute in a child of
    /// this environment, never of the caller's scope.
    pub captured_env: Arc<Environment>,
}

/// Identifying metadata for a foreign-code block.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlockMetadata {
    /// Registry identifier (`BLOCK-CPP-MATH`) or `<inline>`.
    pub id: String,
    /// Language name.
    pub language: String,
    /// Version string.
    pub version: String,
    /// SHA-256 of the source, lowercase hex.
    pub hash: String,
}

/// A foreign-code block bound to its executor.
pub struct BlockValue {
    /// Metadata.
    pub metadata: BlockMetadata,
    /// The block source.
    pub source: String,
    /// Executor handle — shared for embedded runtimes (one Python
    /// interpreter serves every Python block), owned for per-block
    /// artifacts (a compiled C++ object).
    pub executor: Arc<dyn Executor>,
}

impl fmt::Debug for BlockValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BlockValue")
            .field("id", &self.metadata.id)
            .field("language", &self.metadata.language)
            .finish()
    }
}

/// An opaque handle into a foreign runtime.
///
/// The concrete type's `Drop` re-enters the foreign runtime under its
/// lock to release the reference; the release must be idempotent.
pub trait ForeignObject: Send + Sync {
    /// Owning runtime's language name.
    fn language(&self) -> &str;
    /// Foreign type name for error messages.
    fn type_name(&self) -> String;
    /// Foreign `repr` for display.
    fn repr(&self) -> String;
    /// Downcast support.
    fn as_any(&self) -> &dyn Any;
}

/// Runtime values.
#[derive(Clone)]
pub enum Value {
    /// Absent value.
    Null,
    /// 64-bit signed integer.
    Int(i64),
    /// IEEE-754 double.
    Float(f64),
    /// Boolean.
    Bool(bool),
    /// Immutable shared UTF-8 text.
    Str(Arc<str>),
    /// Shared mutable ordered sequence.
    List(Arc<RwLock<Vec<Value>>>),
    /// Shared mutable insertion-ordered string-keyed map.
    Dict(Arc<RwLock<IndexMap<String, Value>>>),
    /// Shared struct instance.
    Struct(Arc<StructInstance>),
    /// User function closure.
    Function(Arc<FunctionValue>),
    /// Foreign-code block.
    Block(Arc<BlockValue>),
    /// Opaque foreign-runtime handle.
    Foreign(Arc<dyn ForeignObject>),
}

impl Value {
    /// String value from borrowed text.
    pub fn string(s: &str) -> Value {
        Value::Str(Arc::from(s))
    }

    /// List value from elements.
    pub fn list(items: Vec<Value>) -> Value {
        Value::List(Arc::new(RwLock::new(items)))
    }

    /// Dict value from entries.
    pub fn dict(entries: IndexMap<String, Value>) -> Value {
        Value::Dict(Arc::new(RwLock::new(entries)))
    }

    /// Variant name for error messages.
    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Null => "null",
            Value::Int(_) => "int",
            Value::Float(_) => "float",
            Value::Bool(_) => "bool",
            Value::Str(_) => "string",
            Value::List(_) => "list",
            Value::Dict(_) => "dict",
            Value::Struct(_) => "struct",
            Value::Function(_) => "function",
            Value::Block(_) => "block",
            Value::Foreign(_) => "foreign",
        }
    }

    /// Truthiness: falsy values are null, false, 0, 0.0 and empty
    /// strings, lists and dicts.
    pub fn truthy(&self) -> bool {
        match self {
            Value::Null => false,
            Value::Bool(b) => *b,
            Value::Int(i) => *i != 0,
            Value::Float(f) => *f != 0.0,
            Value::Str(s) => !s.is_empty(),
            Value::List(l) => !l.read().is_empty(),
            Value::Dict(d) => !d.read().is_empty(),
            _ => true,
        }
    }

    /// The integer payload, if this is an Int.
    pub fn as_int(&self) -> Option<i64> {
        match self {
            Value::Int(i) => Some(*i),
            _ => None,
        }
    }

    /// The float payload; Ints widen.
    pub fn as_float(&self) -> Option<f64> {
        match self {
            Value::Float(f) => Some(*f),
            Value::Int(i) => Some(*i as f64),
            _ => None,
        }
    }

    /// The string payload, if this is a Str.
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Str(s) => Some(s),
            _ => None,
        }
    }

    /// Stable address of the shared payload, for cycle detection and
    /// reference equality. Primitives have none.
    fn payload_addr(&self) -> Option<usize> {
        match self {
            Value::List(l) => Some(Arc::as_ptr(l) as usize),
            Value::Dict(d) => Some(Arc::as_ptr(d) as usize),
            Value::Struct(s) => Some(Arc::as_ptr(s) as usize),
            Value::Function(f) => Some(Arc::as_ptr(f) as usize),
            Value::Block(b) => Some(Arc::as_ptr(b) as usize),
            Value::Foreign(f) => Some(Arc::as_ptr(f) as *const () as usize),
            _ => None,
        }
    }

    /// Render for display. Lists and dicts recurse; revisiting a value
    /// already on the rendering path prints `...`.
    pub fn display_string(&self) -> String {
        let mut visited = HashSet::new();
        self.display_inner(&mut visited)
    }

    fn display_inner(&self, visited: &mut HashSet<usize>) -> String {
        if let Some(addr) = self.payload_addr() {
            if !visited.insert(addr) {
                return "...".to_string();
            }
            let out = self.display_open(visited);
            visited.remove(&addr);
            return out;
        }
        self.display_open(visited)
    }

    fn display_open(&self, visited: &mut HashSet<usize>) -> String {
        match self {
            Value::Null => "null".to_string(),
            Value::Int(i) => i.to_string(),
            Value::Float(f) => f.to_string(),
            Value::Bool(b) => b.to_string(),
            Value::Str(s) => s.to_string(),
            Value::List(l) => {
                let items: Vec<String> =
                    l.read().iter().map(|v| v.display_inner(visited)).collect();
                format!("[{}]", items.join(", "))
            }
            Value::Dict(d) => {
                let items: Vec<String> = d
                    .read()
                    .iter()
                    .map(|(k, v)| format!("{}: {}", k, v.display_inner(visited)))
                    .collect();
                format!("{{{}}}", items.join(", "))
            }
            Value::Struct(s) => {
                let fields = s.fields.read();
                let items: Vec<String> = s
                    .def
                    .fields
                    .iter()
                    .zip(fields.iter())
                    .map(|((name, _), v)| format!("{}: {}", name, v.display_inner(visited)))
                    .collect();
                format!("{} {{ {} }}", s.def.type_name, items.join(", "))
            }
            Value::Function(f) => format!("<fn {}>", f.name),
            Value::Block(b) => format!("<block {} ({})>", b.metadata.id, b.metadata.language),
            Value::Foreign(f) => f.repr(),
        }
    }

    /// Structural equality on primitives, lists, dicts and structs;
    /// reference equality on functions, blocks and foreign handles.
    pub fn equals(&self, other: &Value) -> bool {
        let mut visited = HashSet::new();
        self.equals_inner(other, &mut visited)
    }

    fn equals_inner(&self, other: &Value, visited: &mut HashSet<(usize, usize)>) -> bool {
        // Shared composites: identical payloads are equal without
        // recursion, and a revisited pair terminates cyclic comparisons.
        if let (Some(a), Some(b)) = (self.payload_addr(), other.payload_addr()) {
            if a == b {
                return true;
            }
            if !visited.insert((a, b)) {
                return true;
            }
        }
        match (self, other) {
            (Value::Null, Value::Null) => true,
            (Value::Int(a), Value::Int(b)) => a == b,
            (Value::Float(a), Value::Float(b)) => a == b,
            (Value::Int(a), Value::Float(b)) | (Value::Float(b), Value::Int(a)) => {
                *a as f64 == *b
            }
            (Value::Bool(a), Value::Bool(b)) => a == b,
            (Value::Str(a), Value::Str(b)) => a == b,
            (Value::List(a), Value::List(b)) => {
                let (a, b) = (a.read(), b.read());
                a.len() == b.len()
                    && a.iter().zip(b.iter()).all(|(x, y)| x.equals_inner(y, visited))
            }
            (Value::Dict(a), Value::Dict(b)) => {
                let (a, b) = (a.read(), b.read());
                a.len() == b.len()
                    && a.iter().all(|(k, v)| {
                        b.get(k).is_some_and(|w| v.equals_inner(w, visited))
                    })
            }
            (Value::Struct(a), Value::Struct(b)) => {
                a.def.type_name == b.def.type_name && {
                    let (fa, fb) = (a.fields.read(), b.fields.read());
                    fa.len() == fb.len()
                        && fa.iter().zip(fb.iter()).all(|(x, y)| x.equals_inner(y, visited))
                }
            }
            // Reference equality was already decided by the payload
            // address check above.
            (Value::Function(_), Value::Function(_))
            | (Value::Block(_), Value::Block(_))
            | (Value::Foreign(_), Value::Foreign(_)) => false,
            _ => false,
        }
    }

    /// Invoke `visitor` on every value directly referenced by this one.
    pub fn traverse(&self, visitor: &mut dyn FnMut(&Value)) {
        match self {
            Value::List(l) => {
                for v in l.read().iter() {
                    visitor(v);
                }
            }
            Value::Dict(d) => {
                for v in d.read().values() {
                    visitor(v);
                }
            }
            Value::Struct(s) => {
                for v in s.fields.read().iter() {
                    visitor(v);
                }
            }
            _ => {}
        }
    }

    /// Index read for lists (integer index, negatives count from the
    /// end), dicts (string key) and strings (integer index).
    pub fn index_get(&self, index: &Value) -> Result<Value, NaabError> {
        match (self, index) {
            (Value::List(l), Value::Int(i)) => {
                let items = l.read();
                let idx = resolve_index(*i, items.len())?;
                Ok(items[idx].clone())
            }
            (Value::Str(s), Value::Int(i)) => {
                let chars: Vec<char> = s.chars().collect();
                let idx = resolve_index(*i, chars.len())?;
                Ok(Value::string(&chars[idx].to_string()))
            }
            (Value::Dict(d), Value::Str(key)) => d.read().get(key.as_ref()).cloned().ok_or_else(|| {
                NaabError::value_error(format!("key '{key}' not found in dict"))
            }),
            (recv, idx) => Err(NaabError::type_error(format!(
                "cannot index {} with {}",
                recv.type_name(),
                idx.type_name()
            ))),
        }
    }

    /// Index write for lists and dicts.
    pub fn index_set(&self, index: &Value, value: Value) -> Result<(), NaabError> {
        match (self, index) {
            (Value::List(l), Value::Int(i)) => {
                let mut items = l.write();
                let idx = resolve_index(*i, items.len())?;
                items[idx] = value;
                Ok(())
            }
            (Value::Dict(d), Value::Str(key)) => {
                d.write().insert(key.to_string(), value);
                Ok(())
            }
            (recv, idx) => Err(NaabError::type_error(format!(
                "cannot assign into {} with {} index",
                recv.type_name(),
                idx.type_name()
            ))),
        }
    }

    /// Member read: struct field (by precomputed index) or dict entry.
    pub fn member_get(&self, field: &str) -> Result<Value, NaabError> {
        match self {
            Value::Struct(s) => s.get(field).ok_or_else(|| {
                NaabError::value_error(format!(
                    "struct {} has no field '{field}'",
                    s.def.type_name
                ))
            }),
            Value::Dict(d) => d.read().get(field).cloned().ok_or_else(|| {
                NaabError::value_error(format!("key '{field}' not found in dict"))
            }),
            Value::Null => Err(NaabError::runtime(format!(
                "cannot access member '{field}' of null"
            ))),
            other => Err(NaabError::type_error(format!(
                "cannot access member '{field}' of {}",
                other.type_name()
            ))),
        }
    }

    /// Member write: struct field or dict entry.
    pub fn member_set(&self, field: &str, value: Value) -> Result<(), NaabError> {
        match self {
            Value::Struct(s) => {
                if s.set(field, value) {
                    Ok(())
                } else {
                    Err(NaabError::value_error(format!(
                        "struct {} has no field '{field}'",
                        s.def.type_name
                    )))
                }
            }
            Value::Dict(d) => {
                d.write().insert(field.to_string(), value);
                Ok(())
            }
            other => Err(NaabError::type_error(format!(
                "cannot assign member '{field}' on {}",
                other.type_name()
            ))),
        }
    }

    /// Check a value against a declared type. `Any` matches everything;
    /// Int satisfies Float.
    pub fn matches_type(&self, ty: &TypeExpr) -> bool {
        match ty {
            TypeExpr::Any => true,
            TypeExpr::Int => matches!(self, Value::Int(_)),
            TypeExpr::Float => matches!(self, Value::Float(_) | Value::Int(_)),
            TypeExpr::Bool => matches!(self, Value::Bool(_)),
            TypeExpr::String => matches!(self, Value::Str(_)),
            TypeExpr::List => matches!(self, Value::List(_)),
            TypeExpr::Dict => matches!(self, Value::Dict(_)),
            TypeExpr::Named(name) => match self {
                Value::Struct(s) => s.def.type_name == *name,
                _ => false,
            },
        }
    }
}

fn resolve_index(index: i64, len: usize) -> Result<usize, NaabError> {
    let idx = if index < 0 { index + len as i64 } else { index };
    if idx < 0 || idx as usize >= len {
        return Err(NaabError::value_error(format!(
            "index {index} out of bounds for length {len}"
        )));
    }
    Ok(idx as usize)
}

impl fmt::Debug for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}({})", self.type_name(), self.display_string())
    }
}
