//! Integration Test: Blocking I/O Prohibition
//!
//! **Policy**: Async functions in the bridge crates MUST NOT use blocking I/O.
//! **Required**: Use `tokio::fs`, `tokio::net`, `tokio::process`.
//!
//! Blocking calls in plain functions are fine: config and replay scripts are
//! loaded before the daemon starts serving.

use architectural_enforcement::{
    code_part, is_in_async_function, is_test_code, scan_production, Violation,
};

/// Blocking constructs that must not appear inside async functions
const FORBIDDEN: &[&str] = &[
    "std::fs::",
    "std::net::",
    "std::process::Command",
    "std::thread::sleep",
    "reqwest::blocking",
    ".read_line(",
];

#[test]
fn test_no_blocking_io_in_async_functions() {
    let violations = find_blocking_io_violations();

    if !violations.is_empty() {
        eprintln!("\n❌ Blocking I/O found inside async functions:\n");
        for violation in &violations {
            eprintln!("  ❌ {violation}");
        }
        eprintln!("\n✅ Use instead:");
        eprintln!("  - tokio::fs::read_to_string().await");
        eprintln!("  - tokio::process::Command");
        eprintln!("  - tokio::io::AsyncBufReadExt::lines()");

        panic!(
            "\nFound {} blocking I/O violation(s) in async code.",
            violations.len()
        );
    }
}

fn find_blocking_io_violations() -> Vec<Violation> {
    scan_production(|_, lines, idx| {
        is_blocking_call(code_part(lines[idx]))
            && is_in_async_function(lines, idx)
            && !is_test_code(lines, idx)
    })
}

fn is_blocking_call(code: &str) -> bool {
    FORBIDDEN.iter().any(|pattern| code.contains(pattern))
}

// ============================================================================
// Detector tests
// ============================================================================

#[test]
fn test_detects_blocking_calls() {
    assert!(is_blocking_call("let s = std::fs::read_to_string(p)?;"));
    assert!(is_blocking_call("let c = std::process::Command::new(\"codex\");"));
    assert!(!is_blocking_call("let c = tokio::process::Command::new(\"codex\");"));
    assert!(!is_blocking_call("let s = tokio::fs::read_to_string(p).await?;"));
}

#[test]
fn test_blocking_call_in_plain_function_is_allowed() {
    let lines = vec![
        "pub fn load_script(path: &Path) -> Result<Vec<ReplayStep>> {",
        "    let text = std::fs::read_to_string(path)?;",
        "}",
    ];
    assert!(is_blocking_call(lines[1]));
    assert!(!is_in_async_function(&lines, 1));
}

#[test]
fn test_blocking_call_in_async_function_is_flagged() {
    let lines = vec![
        "async fn run_streamed(&self, input: &str) -> Result<EventStream> {",
        "    let out = std::process::Command::new(bin).output()?;",
        "}",
    ];
    assert!(is_blocking_call(lines[1]));
    assert!(is_in_async_function(&lines, 1));
}
