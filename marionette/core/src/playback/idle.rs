//! Idle Scheduler
//!
//! Owns the idle pool (resolved idle sequences, preloaded at initialization)
//! and picks from it uniformly at random. Repeats are allowed. A seed in the
//! configuration makes the rotation reproducible.
//!
//! The scheduler only arms and cancels its own rotation timer; whether
//! rotation may run at all is the controller's call.

use std::sync::Arc;
use std::time::Duration;

use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use tracing::debug;

use super::PlaybackWakeup;
use crate::clip::Sequence;
use crate::config::IdleConfig;
use crate::frame::Wakeup;
use crate::scheduler::{TimerId, TimerQueue};

/// Chooses and rotates idle sequences
#[derive(Debug)]
pub struct IdleScheduler {
    names: Vec<String>,
    pool: Vec<Arc<Sequence>>,
    rng: StdRng,
    settle_delay: Duration,
    running: bool,
    pending: Option<TimerId>,
}

impl IdleScheduler {
    /// Scheduler for the configured idle names (pool starts empty)
    #[must_use]
    pub fn new(config: &IdleConfig) -> Self {
        let rng = config
            .seed
            .map_or_else(StdRng::from_entropy, StdRng::seed_from_u64);
        Self {
            names: config.clips.clone(),
            pool: Vec::new(),
            rng,
            settle_delay: config.settle_delay,
            running: false,
            pending: None,
        }
    }

    /// Whether `name` is one of the configured idle sequences
    #[must_use]
    pub fn is_idle_name(&self, name: &str) -> bool {
        self.names.iter().any(|n| n == name)
    }

    /// Configured idle names
    #[must_use]
    pub fn names(&self) -> &[String] {
        &self.names
    }

    /// Add a resolved idle sequence to the pool (ignored if not an idle name)
    pub fn add_to_pool(&mut self, sequence: Arc<Sequence>) {
        if !self.is_idle_name(&sequence.name) {
            return;
        }
        if self.pool.iter().any(|s| s.name == sequence.name) {
            return;
        }
        debug!(sequence = %sequence.name, "Idle sequence added to pool");
        self.pool.push(sequence);
    }

    /// Number of playable idle sequences
    #[must_use]
    pub fn pool_len(&self) -> usize {
        self.pool.len()
    }

    /// Pick the next idle sequence
    pub fn choose(&mut self) -> Option<Arc<Sequence>> {
        self.pool.choose(&mut self.rng).cloned()
    }

    /// Pause added after an idle sequence ends on its own
    #[must_use]
    pub fn settle_delay(&self) -> Duration {
        self.settle_delay
    }

    /// Mark rotation as running
    pub fn start(&mut self) {
        self.running = true;
    }

    /// Whether rotation is running
    #[must_use]
    pub fn is_running(&self) -> bool {
        self.running
    }

    /// Arm the rotation timer at `fire_at`, replacing any pending one
    pub fn arm(&mut self, fire_at: Duration, generation: u64, timers: &mut TimerQueue<Wakeup>) {
        if let Some(id) = self.pending.take() {
            timers.cancel(id);
        }
        self.pending = Some(timers.schedule(
            fire_at,
            Wakeup::Playback(PlaybackWakeup::IdleRotate { generation }),
        ));
    }

    /// Forget the pending timer after it fired
    pub fn fired(&mut self) {
        self.pending = None;
    }

    /// Stop rotation and cancel the pending timer
    pub fn stop(&mut self, timers: &mut TimerQueue<Wakeup>) {
        self.running = false;
        if let Some(id) = self.pending.take() {
            timers.cancel(id);
        }
    }

    /// Drop the pool and stop
    pub fn reset(&mut self, timers: &mut TimerQueue<Wakeup>) {
        self.stop(timers);
        self.pool.clear();
    }
}
