//! Expression Timeline Player
//!
//! Each frame, every cue whose time has elapsed since the queue-start epoch
//! sets its channel's target, then every live channel steps toward its target
//! by exponential smoothing:
//!
//! ```text
//! current += (target - current) * (1 - e^(-rate * dt))
//! ```
//!
//! The step never overshoots, so a channel approaches its target from one
//! side and snaps onto it once within [`SNAP_EPSILON`].
//!
//! Channels in the reserved viseme set belong to lip-sync and are never
//! written here.

use std::collections::{BTreeMap, HashSet};
use std::time::Duration;

use tracing::{debug, warn};

use super::{cue_due, ExpressionEvent};
use crate::avatar::AvatarRig;
use crate::config::ExpressionConfig;

/// Distance at which a channel snaps onto its target
pub const SNAP_EPSILON: f32 = 1e-4;

#[derive(Clone, Debug, PartialEq)]
struct Cue {
    due: Duration,
    channel: String,
    intensity: f32,
}

/// Consumes expression cue batches and smooths channel weights
#[derive(Debug)]
pub struct ExpressionTimeline {
    smoothing_rate: f32,
    reserved: HashSet<String>,
    queue: Vec<Cue>,
    cursor: usize,
    epoch: Duration,
    current: BTreeMap<String, f32>,
    target: BTreeMap<String, f32>,
    missing_logged: HashSet<String>,
}

impl ExpressionTimeline {
    /// Player skipping the `reserved` (viseme) channels
    pub fn new(config: &ExpressionConfig, reserved: impl IntoIterator<Item = String>) -> Self {
        Self {
            smoothing_rate: config.smoothing_rate,
            reserved: reserved.into_iter().collect(),
            queue: Vec::new(),
            cursor: 0,
            epoch: Duration::ZERO,
            current: BTreeMap::new(),
            target: BTreeMap::new(),
            missing_logged: HashSet::new(),
        }
    }

    /// Replace the queue with `events`, starting its epoch at `now`
    ///
    /// Cues whose time is non-finite or too far out to schedule are dropped,
    /// as are cues with a NaN intensity. Negative times clamp to zero and
    /// infinite intensities clamp into [0, 1].
    ///
    /// Every referenced channel restarts from zero; channels of the previous
    /// queue that are not referenced ease back to zero.
    pub fn play(&mut self, events: Vec<ExpressionEvent>, now: Duration, rig: &mut dyn AvatarRig) {
        let received = events.len();
        let mut queue: Vec<Cue> = events
            .into_iter()
            .filter(|event| {
                let reserved = self.reserved.contains(&event.channel);
                if reserved {
                    debug!(channel = %event.channel, "Skipping expression cue on viseme channel");
                }
                !reserved
            })
            .filter_map(|event| {
                let Some(due) = cue_due(now, event.time) else {
                    warn!(
                        channel = %event.channel,
                        time = event.time,
                        "Dropping expression cue with unusable time"
                    );
                    return None;
                };
                if event.intensity.is_nan() {
                    warn!(channel = %event.channel, "Dropping expression cue without an intensity");
                    return None;
                }
                Some(Cue {
                    due,
                    channel: event.channel,
                    intensity: event.intensity.clamp(0.0, 1.0),
                })
            })
            .collect();
        queue.sort_by_key(|cue| cue.due);

        for target in self.target.values_mut() {
            *target = 0.0;
        }
        self.missing_logged.clear();
        for cue in &queue {
            self.current.insert(cue.channel.clone(), 0.0);
            self.target.insert(cue.channel.clone(), 0.0);
            self.write(&cue.channel, 0.0, rig);
        }

        debug!(received, queued = queue.len(), "Expression queue replaced");
        self.queue = queue;
        self.cursor = 0;
        self.epoch = now;
    }

    /// Consume due cues and smooth every live channel
    pub fn tick(&mut self, now: Duration, dt: Duration, rig: &mut dyn AvatarRig) {
        while let Some(cue) = self.queue.get(self.cursor) {
            if cue.due > now {
                break;
            }
            self.target.insert(cue.channel.clone(), cue.intensity);
            self.cursor += 1;
        }

        let factor = 1.0 - (-self.smoothing_rate * dt.as_secs_f32()).exp();
        let mut updates = Vec::new();
        for (channel, &target) in &self.target {
            let current = self.current.get(channel).copied().unwrap_or(0.0);
            if current == 0.0 && target == 0.0 {
                continue;
            }
            let mut next = current + (target - current) * factor;
            if (target - next).abs() < SNAP_EPSILON {
                next = target;
            }
            updates.push((channel.clone(), next));
        }

        for (channel, value) in updates {
            self.write(&channel, value, rig);
            self.current.insert(channel, value);
        }
    }

    fn write(&mut self, channel: &str, value: f32, rig: &mut dyn AvatarRig) {
        if self.reserved.contains(channel) {
            return;
        }
        if let Err(e) = rig.set_channel(channel, value) {
            if self.missing_logged.insert(channel.to_string()) {
                warn!(channel, error = %e, "Expression channel unavailable");
            }
        }
    }

    /// Cues consumed from the current queue
    #[must_use]
    pub fn consumed(&self) -> usize {
        self.cursor
    }

    /// Cues in the current queue
    #[must_use]
    pub fn queued(&self) -> usize {
        self.queue.len()
    }

    /// Smoothed value of a channel
    #[must_use]
    pub fn current(&self, channel: &str) -> Option<f32> {
        self.current.get(channel).copied()
    }

    /// Target value of a channel
    #[must_use]
    pub fn target(&self, channel: &str) -> Option<f32> {
        self.target.get(channel).copied()
    }

    /// Drop the queue and all channel state
    pub fn reset(&mut self) {
        self.queue.clear();
        self.cursor = 0;
        self.current.clear();
        self.target.clear();
        self.missing_logged.clear();
    }
}
