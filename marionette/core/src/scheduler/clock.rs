//! Virtual monotonic clock
//!
//! The engine never reads wall-clock time. The host advances this clock once
//! per frame, which makes every timer and envelope deterministic under test.

use std::time::Duration;

/// Monotonic engine time, advanced only by [`VirtualClock::advance`]
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct VirtualClock {
    now: Duration,
}

impl VirtualClock {
    /// Clock starting at zero
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Current engine time
    #[must_use]
    pub fn now(&self) -> Duration {
        self.now
    }

    /// Move forward by `delta` and return the new time
    pub fn advance(&mut self, delta: Duration) -> Duration {
        self.now = self.now.saturating_add(delta);
        self.now
    }

    /// Time elapsed since `earlier` (zero if `earlier` is in the future)
    #[must_use]
    pub fn since(&self, earlier: Duration) -> Duration {
        self.now.saturating_sub(earlier)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_advance_accumulates() {
        let mut clock = VirtualClock::new();
        clock.advance(Duration::from_millis(16));
        clock.advance(Duration::from_millis(17));
        assert_eq!(clock.now(), Duration::from_millis(33));
        assert_eq!(clock.since(Duration::from_millis(30)), Duration::from_millis(3));
        assert_eq!(clock.since(Duration::from_secs(1)), Duration::ZERO);
    }
}
