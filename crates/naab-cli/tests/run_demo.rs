//! The shipped demo programs must stay in sync with the AST's JSON
//! shape.

use naab_engine::ast::Program;
use naab_runtime::{RuntimeOptions, Session};

fn demo(name: &str) -> Program {
    let path = format!("{}/../../demos/{name}", env!("CARGO_MANIFEST_DIR"));
    let text = std::fs::read_to_string(&path).unwrap_or_else(|e| panic!("{path}: {e}"));
    serde_json::from_str(&text).unwrap_or_else(|e| panic!("{path}: {e}"))
}

#[test]
fn test_demo_deserialises() {
    let program = demo("parallel_shell.json");
    assert_eq!(program.main.len(), 3);
    assert_eq!(program.source_file, "parallel_shell.naab");
}

#[cfg(unix)]
#[test]
fn test_demo_runs_end_to_end() {
    let program = demo("parallel_shell.json");
    let mut session = Session::new(&RuntimeOptions::default());
    session.run(&program).unwrap();
}
