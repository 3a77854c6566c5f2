//! Integration Test: Sleep Prohibition
//!
//! **Policy**: Production code in the bridge crates MUST NOT use sleep().
//! **Required**: Wait on events instead: channel receives, `tokio::select!`,
//! child process exit, `mpsc::Sender::closed()`.
//!
//! Exceptions:
//! - Exponential backoff (needs a computed delay and a retry context)
//! - Test code

use architectural_enforcement::{code_part, is_test_code, scan_production, Violation};

#[test]
fn test_no_sleep_in_production_code() {
    let violations = find_sleep_violations();

    if !violations.is_empty() {
        eprintln!("\n❌ sleep() calls found in production code:\n");
        for violation in &violations {
            eprintln!("  ❌ {violation}");
        }
        eprintln!("\n✅ Use instead:");
        eprintln!("  - rx.recv().await for channel events");
        eprintln!("  - tokio::select! over the events you wait for");
        eprintln!("  - child.wait().await for process exit");

        panic!(
            "\nFound {} sleep() violation(s) in production code.",
            violations.len()
        );
    }
}

fn find_sleep_violations() -> Vec<Violation> {
    scan_production(|_, lines, idx| {
        let code = code_part(lines[idx]);
        is_sleep_call(code) && !is_test_code(lines, idx) && !is_backoff_context(lines, idx)
    })
}

fn is_sleep_call(code: &str) -> bool {
    code.contains("::sleep(") || code.contains(".sleep(") || code.contains("sleep_until(")
}

/// Exponential backoff: a computed delay near retry wording
fn is_backoff_context(lines: &[&str], idx: usize) -> bool {
    let start = idx.saturating_sub(10);
    let window = lines[start..=idx].join("\n").to_lowercase();

    let has_calculation = window.contains("<<") || window.contains("pow(") || window.contains("* 2");
    let has_context = ["retry", "reconnect", "backoff", "attempt"]
        .iter()
        .any(|word| window.contains(word));

    has_calculation && has_context
}

// ============================================================================
// Detector tests
// ============================================================================

#[test]
fn test_detects_sleep_calls() {
    assert!(is_sleep_call("tokio::time::sleep(Duration::from_millis(10)).await;"));
    assert!(is_sleep_call("std::thread::sleep(d);"));
    assert!(is_sleep_call("clock.sleep(d).await;"));
    assert!(!is_sleep_call("let sleeping = false;"));
    assert!(!is_sleep_call(code_part("// tokio::time::sleep(d)")));
}

#[test]
fn test_backoff_detection() {
    let backoff = vec![
        "for attempt in 0..5 {",
        "    let delay = base * 2u32.pow(attempt);",
        "    tokio::time::sleep(delay).await;",
        "}",
    ];
    assert!(is_backoff_context(&backoff, 2));

    let plain = vec!["loop {", "    tokio::time::sleep(d).await;", "}"];
    assert!(!is_backoff_context(&plain, 1));
}

#[test]
fn test_sleep_in_test_module_is_allowed() {
    let lines = vec![
        "fn run() {}",
        "#[cfg(test)]",
        "mod tests {",
        "    async fn wait() { tokio::time::sleep(d).await; }",
        "}",
    ];
    assert!(is_sleep_call(lines[3]));
    assert!(is_test_code(&lines, 3));
}
