//! Integration Test: Async Core Rules
//!
//! The streaming core runs one cooperative loop per request on a shared
//! runtime. A blocking wait stalls every other session on that worker, and a
//! panic kills the request without a terminal event.

use architectural_enforcement::{find_violations, find_violations_in_async_fns};

#[test]
fn test_no_blocking_waits_in_production_code() {
    let violations = find_violations(&["std::thread::sleep", "thread::sleep(", "reqwest::blocking", "block_on("]);

    if !violations.is_empty() {
        eprintln!("\n❌ Blocking calls found in production code!\n");
        for violation in &violations {
            eprintln!("  ❌ {violation}");
        }
        eprintln!("\n✅ Use tokio::time::sleep().await and async reqwest instead");
        panic!("Found {} blocking call(s) in production code", violations.len());
    }
}

#[test]
fn test_no_unwrap_or_expect_in_production_code() {
    let violations = find_violations(&[".unwrap()", ".expect("]);

    if !violations.is_empty() {
        eprintln!("\n❌ Panicking shortcuts found in production code!\n");
        for violation in &violations {
            eprintln!("  ❌ {violation}");
        }
        eprintln!("\n✅ Propagate with `?` or handle the None/Err case");
        panic!("Found {} unwrap/expect call(s) in production code", violations.len());
    }
}

#[test]
fn test_no_blocking_io_in_async_functions() {
    let violations = find_violations_in_async_fns(&[
        "std::fs::",
        "std::io::Write",
        "std::io::BufRead",
        "std::net::",
        "std::process::Command",
    ]);

    if !violations.is_empty() {
        eprintln!("\n❌ Blocking I/O found inside async functions!\n");
        for violation in &violations {
            eprintln!("  ❌ {violation}");
        }
        eprintln!("\n✅ Use tokio::fs, tokio::net and tokio::process inside async code");
        panic!("Found {} blocking I/O call(s) in async functions", violations.len());
    }
}
