//! Frame Driver
//!
//! One tick advances everything, always in the same order:
//!
//! ```text
//! clock.advance(min(delta, max_frame_delta))
//!     │
//!     ├─→ fire due timers (playback + viseme), in (fire_at, insertion) order
//!     ├─→ expression player writes its channels
//!     ├─→ viseme player writes its channels
//!     ├─→ mixer advances clip sampling
//!     └─→ breathing writes the chest joint
//! ```
//!
//! The result is a [`FrameOutput`] that the engine hands to the render
//! surface.

use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tracing::trace;

use crate::avatar::AvatarRig;
use crate::breathing::{BreathingConfig, BreathingModulator, BreathingPatch};
use crate::clip::Sequence;
use crate::config::EngineConfig;
use crate::playback::{
    ActionSnapshot, IdleScheduler, PlaybackController, PlaybackPhase, PlaybackWakeup,
};
use crate::scheduler::{TimerQueue, VirtualClock};
use crate::timeline::{
    ExpressionEvent, ExpressionTimeline, VisemaEvent, VisemeTimeline, VisemeWakeup,
};

/// Every continuation the engine's timer queue can hold
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Wakeup {
    /// Playback controller step
    Playback(PlaybackWakeup),
    /// Viseme player step
    Viseme(VisemeWakeup),
}

/// The final pose description of one frame
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct FrameOutput {
    /// Frame counter since initialization
    pub index: u64,
    /// Engine time after this frame
    pub now: Duration,
    /// Delta actually applied (after clamping)
    pub delta: Duration,
    /// Weighted actions, outgoing first
    pub actions: Vec<ActionSnapshot>,
    /// Sequence owning the body
    pub active_animation: Option<String>,
    /// Playback phase after this frame
    pub phase: PlaybackPhase,
}

/// Owns the clock, the timer queue and every per-frame component
#[derive(Debug)]
pub struct FrameDriver {
    clock: VirtualClock,
    timers: TimerQueue<Wakeup>,
    max_frame_delta: Duration,
    frame_index: u64,
    controller: PlaybackController,
    expressions: ExpressionTimeline,
    visemes: VisemeTimeline,
    breathing: BreathingModulator,
}

impl FrameDriver {
    /// Driver at time zero with nothing playing
    #[must_use]
    pub fn new(config: &EngineConfig) -> Self {
        Self {
            clock: VirtualClock::new(),
            timers: TimerQueue::new(),
            max_frame_delta: config.playback.max_frame_delta,
            frame_index: 0,
            controller: PlaybackController::new(
                config.playback.clone(),
                IdleScheduler::new(&config.idle),
            ),
            expressions: ExpressionTimeline::new(
                &config.expression,
                config.viseme.channels.iter().cloned(),
            ),
            visemes: VisemeTimeline::new(config.viseme.clone()),
            breathing: BreathingModulator::new(config.breathing, config.breathing_joint.clone()),
        }
    }

    /// Current engine time
    #[must_use]
    pub fn now(&self) -> Duration {
        self.clock.now()
    }

    /// Frames ticked so far
    #[must_use]
    pub fn frame_index(&self) -> u64 {
        self.frame_index
    }

    /// Playback controller (read-only)
    #[must_use]
    pub fn controller(&self) -> &PlaybackController {
        &self.controller
    }

    /// Expression player (read-only)
    #[must_use]
    pub fn expressions(&self) -> &ExpressionTimeline {
        &self.expressions
    }

    /// Viseme player (read-only)
    #[must_use]
    pub fn visemes(&self) -> &VisemeTimeline {
        &self.visemes
    }

    /// Breathing modulator (read-only)
    #[must_use]
    pub fn breathing(&self) -> &BreathingModulator {
        &self.breathing
    }

    /// Pending timers
    #[must_use]
    pub fn pending_timers(&self) -> usize {
        self.timers.len()
    }

    /// Add a resolved idle sequence to the rotation pool
    pub fn add_idle(&mut self, sequence: Arc<Sequence>) {
        self.controller.idle_mut().add_to_pool(sequence);
    }

    /// Whether `name` is one of the idle sequences
    #[must_use]
    pub fn is_idle_name(&self, name: &str) -> bool {
        self.controller.idle().is_idle_name(name)
    }

    /// Start idle rotation (no-op while a directed sequence owns the body)
    pub fn start_idle(&mut self) -> bool {
        let now = self.clock.now();
        self.controller.start_idle(now, &mut self.timers)
    }

    /// Hand a resolved sequence to the playback controller
    pub fn play(&mut self, sequence: Arc<Sequence>, crossfade: Option<Duration>) {
        let now = self.clock.now();
        self.controller.play(sequence, crossfade, now, &mut self.timers);
    }

    /// Replace the expression queue; its epoch is now
    pub fn play_expressions(&mut self, events: Vec<ExpressionEvent>, rig: &mut dyn AvatarRig) {
        let now = self.clock.now();
        self.expressions.play(events, now, rig);
    }

    /// Start a viseme run at now and dispatch cues that are already due
    pub fn play_visemas(&mut self, events: Vec<VisemaEvent>, rig: &mut dyn AvatarRig) {
        let now = self.clock.now();
        self.visemes.play(events, now, &mut self.timers, rig);
        self.fire_due(rig);
    }

    /// Merge a partial breathing update
    pub fn set_breathing(&mut self, patch: BreathingPatch) -> BreathingConfig {
        self.breathing.update(patch)
    }

    /// Fire every timer due at the current time
    pub fn fire_due(&mut self, rig: &mut dyn AvatarRig) -> usize {
        let now = self.clock.now();
        let mut fired = 0;
        while let Some(due) = self.timers.pop_due(now) {
            fired += 1;
            match due.payload {
                Wakeup::Playback(wakeup) => {
                    self.controller.on_wakeup(wakeup, due.fire_at, &mut self.timers);
                }
                Wakeup::Viseme(wakeup) => {
                    self.visemes.on_wakeup(wakeup, due.fire_at, &mut self.timers, rig);
                }
            }
        }
        fired
    }

    /// Advance one frame
    pub fn tick(&mut self, delta: Duration, rig: &mut dyn AvatarRig) -> FrameOutput {
        let delta = delta.min(self.max_frame_delta);
        let now = self.clock.advance(delta);
        self.frame_index += 1;

        let fired = self.fire_due(rig);
        self.expressions.tick(now, delta, rig);
        self.visemes.tick(now, rig);
        self.controller.advance(now, delta);
        let allowed = self.controller.state().breathing_allowed();
        self.breathing.apply(now, allowed, rig);

        if fired > 0 {
            trace!(frame = self.frame_index, fired, "Timers fired");
        }

        FrameOutput {
            index: self.frame_index,
            now,
            delta,
            actions: self.controller.mixer().snapshot(),
            active_animation: self.controller.state().active_name().map(ToString::to_string),
            phase: self.controller.state().phase,
        }
    }

    /// Put the breathing joint back at its rest rotation
    pub fn rest_pose(&mut self, rig: &mut dyn AvatarRig) {
        self.breathing.stop(rig);
    }

    /// Drop every timer and all playback, expression, viseme and breathing state
    pub fn reset(&mut self) {
        self.controller.reset(&mut self.timers);
        self.visemes.reset(&mut self.timers);
        self.expressions.reset();
        self.breathing.reset();
        self.timers.clear();
    }
}
