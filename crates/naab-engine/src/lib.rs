//! NAAb core runtime.
//!
//! NAAb is a small dynamically-typed scripting language whose
//! distinguishing feature is polyglot execution: inline blocks of
//! foreign code are first-class values, executed through per-language
//! adapters, marshalled across the boundary, and — when independent —
//! run concurrently on a bounded worker pool.
//!
//! This crate provides:
//! - the tree-walking interpreter ([`interpreter`]) with its value
//!   model, environments and exception control flow;
//! - the polyglot substrate ([`polyglot`]): executors, marshalling,
//!   output parsing, dependency analysis, the worker pool and the wave
//!   scheduler;
//! - the cross-cutting runtime services: error taxonomy ([`error`]),
//!   resource limits ([`limits`]), the capability sandbox and the
//!   tamper-evident audit log ([`security`]), and the FFI boundary
//!   ([`ffi`]).
//!
//! # Concurrency model
//!
//! NAAb code is evaluated on one thread. Parallelism is confined to
//! foreign blocks: the dependency analyzer proves independence, the
//! scheduler runs each wave on the pool, and writes commit back only
//! after the wave joins. Embedded runtimes each have a single global
//! lock and are never preempted; subprocess executors translate timeout
//! expiry into killing the child.

#![warn(missing_docs)]
#![warn(rust_2018_idioms)]

pub mod ast;
pub mod error;
pub mod ffi;
pub mod interpreter;
pub mod limits;
pub mod polyglot;
pub mod security;

pub use error::{ErrorKind, NaabError};
pub use interpreter::{Environment, Interpreter, InterpreterOptions, RuntimeContext, Value};
pub use polyglot::{Executor, ExecutorRegistry};
pub use security::{AuditLogger, Capability, SandboxGuard};
