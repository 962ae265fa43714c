//! Integration Test: Sleep Prohibition
//!
//! **Policy**: Production gateway code MUST NOT call sleep to wait for events.
//! Replies are awaited on the delivery slot with a deadline, periodic work
//! uses `tokio::time::interval`.
//! **Exceptions**: the fixed reconnect backoff of the side channel, test code.

use architectural_enforcement::{code_part, is_test_code, production_sources};

/// Test that production code does not contain sleep() calls
#[test]
fn test_no_sleep_in_production_code() {
    let violations = find_sleep_violations();

    if !violations.is_empty() {
        eprintln!("\n❌ CRITICAL: Sleep calls found in production code!\n");

        for violation in &violations {
            eprintln!("  ❌ {violation}");
        }

        eprintln!("\n✅ ACCEPTABLE sleep uses:");
        eprintln!("  - Reconnect backoff in the side channel supervisor");
        eprintln!("  - Test code (#[cfg(test)] modules)");
        eprintln!("  - Periodic tasks using tokio::time::interval()");
        eprintln!("\n❌ FORBIDDEN:");
        eprintln!("  - Sleep in polling loops");
        eprintln!("  - Sleep to 'wait' for a reply (use the delivery slot with a timeout)");

        panic!(
            "\nFound {} sleep violation(s) in production code.\nFix these before merging!",
            violations.len()
        );
    }
}

/// Find all sleep() calls in production code
fn find_sleep_violations() -> Vec<String> {
    let mut violations = Vec::new();

    for file in production_sources() {
        let lines = file.lines();
        for (idx, line) in lines.iter().enumerate() {
            let code = code_part(line);
            if !(code.contains("::sleep(") || code.contains(".sleep(")) {
                continue;
            }
            if is_test_code(&lines, idx) || is_backoff_context(&lines, idx) {
                continue;
            }
            violations.push(format!("{}:{} - {}", file.path.display(), idx + 1, line.trim()));
        }
    }

    violations
}

/// Check if sleep waits out a reconnect backoff
fn is_backoff_context(lines: &[&str], current_idx: usize) -> bool {
    let context_range = current_idx.saturating_sub(15)..std::cmp::min(current_idx + 5, lines.len());

    let mut has_backoff = false;
    let mut has_reconnect_context = false;

    for line in &lines[context_range] {
        let line = line.to_lowercase();
        if line.contains("backoff") {
            has_backoff = true;
        }
        if line.contains("reconnect") || line.contains("retry") || line.contains("cancel") {
            has_reconnect_context = true;
        }
    }

    has_backoff && has_reconnect_context
}

#[test]
fn test_backoff_detection() {
    let test_code = vec![
        "loop {",
        "    tokio::select! {",
        "        () = cancel.cancelled() => break,",
        "        () = tokio::time::sleep(agent.reconnect_backoff()) => {}",
        "    }",
        "}",
    ];
    assert!(is_backoff_context(&test_code, 3));
}

#[test]
fn test_polling_sleep_is_not_backoff() {
    let test_code = vec![
        "loop {",
        "    if ready() { break; }",
        "    tokio::time::sleep(Duration::from_millis(10)).await;",
        "}",
    ];
    assert!(!is_backoff_context(&test_code, 2));
}
