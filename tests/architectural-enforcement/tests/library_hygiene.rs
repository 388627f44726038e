//! Integration Test: Library Hygiene
//!
//! - no blocking file I/O inside `async fn` (use `tokio::fs`)
//! - the core library reports through `tracing`, never the console
//! - the core library propagates errors instead of unwrapping

use architectural_enforcement::{assert_clean, crate_src, scan};

const CORE: &str = "marionette/core";
const PLAYER: &str = "marionette/player";

#[test]
fn test_no_blocking_io_in_async_functions() {
    let mut violations = Vec::new();
    for krate in [CORE, PLAYER] {
        violations.extend(scan(&crate_src(krate), |line| {
            line.in_async_fn
                && (line.code.contains("std::fs::")
                    || line.code.contains("std::net::")
                    || line.code.contains("reqwest::blocking"))
        }));
    }
    assert_clean(
        "Blocking I/O found inside async functions",
        "Use tokio::fs / tokio::net, or move the call into a synchronous helper.",
        &violations,
    );
}

#[test]
fn test_core_does_not_print() {
    let violations = scan(&crate_src(CORE), |line| {
        line.code.contains("println!") || line.code.contains("eprintln!") || line.code.contains("dbg!(")
    });
    assert_clean(
        "Console output found in the engine core",
        "Log through tracing (debug!/info!/warn!).",
        &violations,
    );
}

#[test]
fn test_core_does_not_unwrap() {
    let violations = scan(&crate_src(CORE), |line| {
        line.code.contains(".unwrap()") || line.code.contains(".expect(")
    });
    assert_clean(
        "unwrap()/expect() found in engine core production code",
        "Return an EngineError with `?` instead.",
        &violations,
    );
}
