//! Integration Test: Clock Discipline
//!
//! The engine core advances time only from the frame tick. Production code in
//! `marionette/core` must not sleep and must not read the wall clock; every
//! delayed continuation goes through the timer queue.

use architectural_enforcement::{assert_clean, crate_src, scan};

const CORE: &str = "marionette/core";

#[test]
fn test_core_never_sleeps() {
    let violations = scan(&crate_src(CORE), |line| {
        line.code.contains("::sleep(") || line.code.contains(".sleep(")
    });
    assert_clean(
        "Sleep calls found in the engine core",
        "Schedule a wakeup on the TimerQueue instead of sleeping.",
        &violations,
    );
}

#[test]
fn test_core_never_reads_the_wall_clock() {
    let violations = scan(&crate_src(CORE), |line| {
        line.code.contains("Instant::now")
            || line.code.contains("SystemTime")
            || line.code.contains("tokio::time::")
    });
    assert_clean(
        "Wall-clock reads found in the engine core",
        "Use the VirtualClock time handed down from Engine::tick.",
        &violations,
    );
}

#[test]
fn test_player_paces_frames_with_an_interval() {
    let violations = scan(&crate_src("marionette/player"), |line| {
        line.code.contains("::sleep(")
    });
    assert_clean(
        "Sleep calls found in the player",
        "Pace the frame loop with tokio::time::interval.",
        &violations,
    );
}
