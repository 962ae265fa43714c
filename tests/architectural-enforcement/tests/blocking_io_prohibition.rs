//! Integration Test: Blocking I/O Prohibition
//!
//! **Policy**: async functions in production gateway code MUST NOT use
//! blocking I/O.
//! **Required**: Use `tokio::fs`, `tokio::net` and async `reqwest` inside async
//! code. Blocking work (the session refresher helper, config loading before
//! the server starts) lives in plain functions and runs off the event loop.

use architectural_enforcement::{code_part, is_in_async_fn, is_test_code, production_sources};

/// Patterns that block the calling thread
const BLOCKING_PATTERNS: &[(&str, &str)] = &[
    ("std::fs::", "Blocking file I/O"),
    ("std::net::", "Blocking network I/O"),
    ("std::process::Command", "Blocking process I/O"),
    ("Command::new(", "Blocking process I/O"),
    ("reqwest::blocking", "Blocking HTTP client"),
    ("std::io::stdin()", "Blocking stdin"),
    ("std::thread::sleep", "Blocking sleep"),
];

/// Test that production code does not use blocking I/O in async functions
#[test]
fn test_no_blocking_io_in_production_code() {
    let violations = find_blocking_io_violations();

    if !violations.is_empty() {
        eprintln!("\n❌ CRITICAL: Blocking I/O calls found in async production code!\n");

        for violation in &violations {
            eprintln!("  ❌ {violation}");
        }

        eprintln!("\n✅ REQUIRED async I/O:");
        eprintln!("  - tokio::fs::read().await, tokio::fs::write().await");
        eprintln!("  - reqwest::Client (async)");
        eprintln!("  - tokio::task::spawn_blocking for unavoidable blocking work");
        eprintln!("\n✅ ACCEPTABLE blocking I/O:");
        eprintln!("  - Non-async functions (config loading, refresher helpers)");
        eprintln!("  - Test code");

        panic!(
            "\nFound {} blocking I/O violation(s) in production code.\nFix these before merging!",
            violations.len()
        );
    }
}

/// Find all blocking I/O calls inside async production functions
fn find_blocking_io_violations() -> Vec<String> {
    let mut violations = Vec::new();

    for file in production_sources() {
        let lines = file.lines();
        for (idx, line) in lines.iter().enumerate() {
            let code = code_part(line);
            if is_test_code(&lines, idx) || !is_in_async_fn(&lines, idx) {
                continue;
            }
            for (pattern, what) in BLOCKING_PATTERNS {
                if code.contains(pattern) {
                    violations.push(format!(
                        "{}:{} - {what}: {}",
                        file.path.display(),
                        idx + 1,
                        line.trim()
                    ));
                }
            }
        }
    }

    violations
}

#[test]
fn test_blocking_call_in_async_fn_is_flagged() {
    let test_code = vec![
        "pub async fn load(&self) {",
        "    let s = std::fs::read_to_string(path);",
        "}",
    ];
    assert!(is_in_async_fn(&test_code, 1));
    assert!(code_part(test_code[1]).contains("std::fs::"));
}
