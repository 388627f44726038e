//! Timer Scheduling
//!
//! Every delayed continuation in the engine (crossfade completion, keyframe
//! advance, idle rotation, viseme onsets and releases) is an entry in one
//! [`TimerQueue`], fired against the [`VirtualClock`].
//!
//! # Ordering
//!
//! Entries fire in `(fire_at, insertion order)` order, so two timers armed for
//! the same instant fire in the order they were scheduled.
//!
//! # Cancellation
//!
//! Cancellation is lazy: the payload is dropped immediately and the heap slot
//! is skipped when it reaches the top.

mod clock;

pub use clock::VirtualClock;

use std::cmp::Reverse;
use std::collections::{BinaryHeap, HashMap};
use std::time::Duration;

/// Handle to a scheduled timer
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TimerId(u64);

/// A timer that has come due
#[derive(Debug, Clone, PartialEq)]
pub struct DueTimer<T> {
    /// Handle the timer was scheduled under
    pub id: TimerId,
    /// Time the timer was armed for
    pub fire_at: Duration,
    /// The continuation
    pub payload: T,
}

/// Min-heap of pending continuations keyed by fire time
#[derive(Debug)]
pub struct TimerQueue<T> {
    heap: BinaryHeap<Reverse<(Duration, u64)>>,
    pending: HashMap<u64, (Duration, T)>,
    next_seq: u64,
}

impl<T> Default for TimerQueue<T> {
    fn default() -> Self {
        Self {
            heap: BinaryHeap::new(),
            pending: HashMap::new(),
            next_seq: 0,
        }
    }
}

impl<T> TimerQueue<T> {
    /// Empty queue
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Arm a timer at an absolute engine time
    pub fn schedule(&mut self, fire_at: Duration, payload: T) -> TimerId {
        let seq = self.next_seq;
        self.next_seq += 1;
        self.heap.push(Reverse((fire_at, seq)));
        self.pending.insert(seq, (fire_at, payload));
        TimerId(seq)
    }

    /// Arm a timer `delay` after `now`
    pub fn schedule_after(&mut self, now: Duration, delay: Duration, payload: T) -> TimerId {
        self.schedule(now.saturating_add(delay), payload)
    }

    /// Cancel one timer, returning its payload if it was still pending
    pub fn cancel(&mut self, id: TimerId) -> Option<T> {
        self.pending.remove(&id.0).map(|(_, payload)| payload)
    }

    /// Cancel every pending timer whose payload matches; returns how many
    pub fn cancel_where<F>(&mut self, mut predicate: F) -> usize
    where
        F: FnMut(&T) -> bool,
    {
        let before = self.pending.len();
        self.pending.retain(|_, (_, payload)| !predicate(payload));
        let removed = before - self.pending.len();
        if self.pending.is_empty() {
            self.heap.clear();
        }
        removed
    }

    /// Pop the earliest timer due at or before `now`
    pub fn pop_due(&mut self, now: Duration) -> Option<DueTimer<T>> {
        while let Some(Reverse((fire_at, seq))) = self.heap.peek().copied() {
            if !self.pending.contains_key(&seq) {
                self.heap.pop();
                continue;
            }
            if fire_at > now {
                return None;
            }
            self.heap.pop();
            let (fire_at, payload) = self.pending.remove(&seq)?;
            return Some(DueTimer {
                id: TimerId(seq),
                fire_at,
                payload,
            });
        }
        None
    }

    /// Fire time of the earliest live timer
    #[must_use]
    pub fn next_deadline(&self) -> Option<Duration> {
        self.pending.values().map(|(fire_at, _)| *fire_at).min()
    }

    /// Whether a timer is still pending
    #[must_use]
    pub fn is_pending(&self, id: TimerId) -> bool {
        self.pending.contains_key(&id.0)
    }

    /// Number of live timers
    #[must_use]
    pub fn len(&self) -> usize {
        self.pending.len()
    }

    /// Whether no timers are pending
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }

    /// Live payloads, in no particular order
    pub fn iter(&self) -> impl Iterator<Item = &T> {
        self.pending.values().map(|(_, payload)| payload)
    }

    /// Drop every pending timer
    pub fn clear(&mut self) {
        self.heap.clear();
        self.pending.clear();
    }
}
