//! Playback Controller
//!
//! The only writer of [`PlaybackState`]. Every activation (directed or idle)
//! bumps the generation, cancels the previous activation's pending timers and
//! arms the timers the new sequence needs:
//!
//! | Sequence | Timer |
//! |---|---|
//! | one-shot single clip | `SequenceEnd` at the clip duration |
//! | looping single idle clip | `IdleRotate` at the clip duration |
//! | keyframe chain | `KeyframeAdvance` at `max(duration − crossfade, min_schedule_delay)` |
//! | crossfade in flight | `CrossfadeComplete` at the crossfade duration |
//!
//! Crossfade completions are never cancelled: each one names the mixer fade
//! it belongs to, and the mixer ignores fades that were superseded.

use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, info, trace, warn};

use super::idle::IdleScheduler;
use super::mixer::Mixer;
use super::{Motion, PlaybackPhase, PlaybackState, PlaybackWakeup};
use crate::clip::{Keyframe, Sequence, SequenceBody};
use crate::config::PlaybackConfig;
use crate::frame::Wakeup;
use crate::scheduler::TimerQueue;

/// Idle-vs-directed state machine plus the mixer it drives
#[derive(Debug)]
pub struct PlaybackController {
    config: PlaybackConfig,
    state: PlaybackState,
    mixer: Mixer,
    idle: IdleScheduler,
    deferred_crossfade: Duration,
}

impl PlaybackController {
    /// Controller in the `Idle` phase with nothing playing
    #[must_use]
    pub fn new(config: PlaybackConfig, idle: IdleScheduler) -> Self {
        Self {
            config,
            state: PlaybackState::default(),
            mixer: Mixer::new(),
            idle,
            deferred_crossfade: Duration::ZERO,
        }
    }

    /// Current state
    #[must_use]
    pub fn state(&self) -> &PlaybackState {
        &self.state
    }

    /// Two-valued mode
    #[must_use]
    pub fn motion(&self) -> Motion {
        self.state.motion()
    }

    /// The mixer
    #[must_use]
    pub fn mixer(&self) -> &Mixer {
        &self.mixer
    }

    /// The idle scheduler
    #[must_use]
    pub fn idle(&self) -> &IdleScheduler {
        &self.idle
    }

    /// Mutable idle scheduler (pool population)
    pub fn idle_mut(&mut self) -> &mut IdleScheduler {
        &mut self.idle
    }

    /// Crossfade used when the caller passes none
    #[must_use]
    pub fn default_crossfade(&self) -> Duration {
        self.config.default_crossfade
    }

    // ========================================================================
    // Requests
    // ========================================================================

    /// Play a resolved sequence
    ///
    /// An idle sequence restarts idle rotation beginning with it. Anything else
    /// suspends idle rotation and becomes the directed sequence, after its
    /// `delay` if it has one.
    pub fn play(
        &mut self,
        sequence: Arc<Sequence>,
        crossfade: Option<Duration>,
        now: Duration,
        timers: &mut TimerQueue<Wakeup>,
    ) {
        let crossfade = crossfade.unwrap_or(self.config.default_crossfade);

        if self.idle.is_idle_name(&sequence.name) {
            self.idle.add_to_pool(sequence.clone());
            self.enter_idle(Some(sequence), crossfade, now, timers);
            return;
        }

        self.cancel_pending(timers);
        self.idle.stop(timers);

        let delay = sequence.start_delay();
        if !delay.is_zero() {
            self.state.generation += 1;
            let generation = self.state.generation;
            info!(
                sequence = %sequence.name,
                delay_ms = delay.as_millis() as u64,
                "Sequence deferred"
            );
            self.state.deferred = Some(sequence);
            self.state.phase = PlaybackPhase::Transitioning {
                target: Motion::Specific,
            };
            self.deferred_crossfade = crossfade;
            timers.schedule_after(
                now,
                delay,
                Wakeup::Playback(PlaybackWakeup::DeferredStart { generation }),
            );
            return;
        }

        self.activate(sequence, crossfade, Motion::Specific, now, timers);
    }

    /// Start idle rotation
    ///
    /// No-op (returns `false`) while the phase targets `Specific`. While idle
    /// rotation already runs, it restarts with a fresh selection.
    pub fn start_idle(&mut self, now: Duration, timers: &mut TimerQueue<Wakeup>) -> bool {
        if self.state.motion() == Motion::Specific {
            debug!(phase = ?self.state.phase, "Idle start ignored while directed sequence owns the body");
            return false;
        }
        self.enter_idle(None, self.config.default_crossfade, now, timers);
        true
    }

    /// Stop idle rotation without changing the pose
    pub fn stop_idle(&mut self, timers: &mut TimerQueue<Wakeup>) {
        self.idle.stop(timers);
    }

    /// Handle a due playback timer
    pub fn on_wakeup(&mut self, wakeup: PlaybackWakeup, now: Duration, timers: &mut TimerQueue<Wakeup>) {
        if let PlaybackWakeup::CrossfadeComplete { generation, fade } = wakeup {
            self.mixer.complete_crossfade(fade);
            if generation == self.state.generation {
                if let PlaybackPhase::Transitioning { target } = self.state.phase {
                    if self.state.deferred.is_none() {
                        self.state.phase = PlaybackPhase::settled(target);
                        debug!(motion = %target, "Crossfade complete");
                    }
                }
            }
            return;
        }

        if wakeup.generation() != self.state.generation {
            trace!(?wakeup, current = self.state.generation, "Stale playback wakeup ignored");
            return;
        }

        match wakeup {
            PlaybackWakeup::KeyframeAdvance { index, .. } => {
                self.advance_keyframe(index, now, timers);
            }
            PlaybackWakeup::SequenceEnd { .. } => self.sequence_ended(now, timers),
            PlaybackWakeup::IdleRotate { .. } => {
                self.idle.fired();
                if self.state.motion() == Motion::Specific {
                    return;
                }
                self.enter_idle(None, self.config.default_crossfade, now, timers);
            }
            PlaybackWakeup::DeferredStart { .. } => {
                if let Some(sequence) = self.state.deferred.take() {
                    let crossfade = self.deferred_crossfade;
                    self.activate(sequence, crossfade, Motion::Specific, now, timers);
                }
            }
            PlaybackWakeup::CrossfadeComplete { .. } => {}
        }
    }

    /// Advance the mixer
    pub fn advance(&mut self, now: Duration, dt: Duration) {
        self.mixer.advance(now, dt);
    }

    /// Cancel every playback timer and return to an empty `Idle` state
    pub fn reset(&mut self, timers: &mut TimerQueue<Wakeup>) {
        timers.cancel_where(|w| matches!(w, Wakeup::Playback(_)));
        self.idle.reset(timers);
        self.mixer.clear();
        let generation = self.state.generation + 1;
        self.state = PlaybackState {
            generation,
            ..PlaybackState::default()
        };
    }

    // ========================================================================
    // Transitions
    // ========================================================================

    /// Cancel pending idle/keyframe/end/deferred timers (not crossfade completions)
    fn cancel_pending(&mut self, timers: &mut TimerQueue<Wakeup>) {
        let cancelled = timers.cancel_where(|w| {
            matches!(w, Wakeup::Playback(p) if !matches!(p, PlaybackWakeup::CrossfadeComplete { .. }))
        });
        if cancelled > 0 {
            trace!(cancelled, "Pending playback timers cancelled");
        }
        self.state.deferred = None;
    }

    fn enter_idle(
        &mut self,
        first: Option<Arc<Sequence>>,
        crossfade: Duration,
        now: Duration,
        timers: &mut TimerQueue<Wakeup>,
    ) {
        self.cancel_pending(timers);
        self.idle.stop(timers);
        self.idle.start();

        match first.or_else(|| self.idle.choose()) {
            Some(sequence) => self.activate(sequence, crossfade, Motion::Idle, now, timers),
            None => {
                warn!("Idle pool is empty; holding the current pose");
                self.state.generation += 1;
                self.state.active = None;
                self.state.owner = Motion::Idle;
                self.state.keyframe = 0;
                self.state.phase = PlaybackPhase::Idle;
            }
        }
    }

    fn activate(
        &mut self,
        sequence: Arc<Sequence>,
        crossfade: Duration,
        owner: Motion,
        now: Duration,
        timers: &mut TimerQueue<Wakeup>,
    ) {
        self.state.generation += 1;
        let generation = self.state.generation;

        let fade = self
            .mixer
            .crossfade_to(sequence.first_clip().clone(), now, crossfade);
        self.state.phase = match fade {
            Some(fade) => {
                timers.schedule_after(
                    now,
                    crossfade,
                    Wakeup::Playback(PlaybackWakeup::CrossfadeComplete { generation, fade }),
                );
                PlaybackPhase::Transitioning { target: owner }
            }
            None => PlaybackPhase::settled(owner),
        };
        self.state.active = Some(sequence.clone());
        self.state.owner = owner;
        self.state.keyframe = 0;
        self.state.deferred = None;

        match &sequence.body {
            SequenceBody::Single { clip } => {
                let end = now + clip.duration.max(self.config.min_schedule_delay);
                if sequence.is_one_shot() {
                    timers.schedule(end, Wakeup::Playback(PlaybackWakeup::SequenceEnd { generation }));
                } else if owner == Motion::Idle {
                    self.idle.arm(end, generation, timers);
                }
            }
            SequenceBody::Chained { keyframes } => {
                self.schedule_keyframe(keyframes, 0, now, generation, timers);
            }
        }

        info!(
            sequence = %sequence.name,
            motion = %owner,
            crossfade_ms = crossfade.as_millis() as u64,
            generation,
            "Sequence activated"
        );
    }

    fn keyframe_crossfade(&self, keyframe: &Keyframe) -> Duration {
        keyframe.crossfade.unwrap_or(self.config.default_crossfade)
    }

    fn schedule_keyframe(
        &self,
        keyframes: &[Keyframe],
        index: usize,
        now: Duration,
        generation: u64,
        timers: &mut TimerQueue<Wakeup>,
    ) {
        let Some(keyframe) = keyframes.get(index) else {
            return;
        };
        let lead = keyframe
            .duration
            .saturating_sub(self.keyframe_crossfade(keyframe))
            .max(self.config.min_schedule_delay);
        timers.schedule_after(
            now,
            lead,
            Wakeup::Playback(PlaybackWakeup::KeyframeAdvance {
                generation,
                index: index + 1,
            }),
        );
    }

    fn blend_to_keyframe(
        &mut self,
        keyframes: &[Keyframe],
        index: usize,
        crossfade: Duration,
        now: Duration,
        timers: &mut TimerQueue<Wakeup>,
    ) {
        let generation = self.state.generation;
        if let Some(fade) = self
            .mixer
            .crossfade_to(keyframes[index].clip.clone(), now, crossfade)
        {
            timers.schedule_after(
                now,
                crossfade,
                Wakeup::Playback(PlaybackWakeup::CrossfadeComplete { generation, fade }),
            );
        }
        self.state.keyframe = index;
        self.schedule_keyframe(keyframes, index, now, generation, timers);
    }

    fn advance_keyframe(&mut self, index: usize, now: Duration, timers: &mut TimerQueue<Wakeup>) {
        let Some(sequence) = self.state.active.clone() else {
            return;
        };
        let SequenceBody::Chained { keyframes } = &sequence.body else {
            return;
        };
        let Some(previous) = index.checked_sub(1).and_then(|i| keyframes.get(i)) else {
            return;
        };
        let crossfade = self.keyframe_crossfade(previous);

        if index < keyframes.len() {
            trace!(sequence = %sequence.name, keyframe = index, "Keyframe advance");
            self.blend_to_keyframe(keyframes, index, crossfade, now, timers);
            return;
        }

        if sequence.is_one_shot() && self.state.owner == Motion::Specific {
            debug!(sequence = %sequence.name, "Temporary chain complete");
            self.enter_idle(None, crossfade, now, timers);
        } else if self.state.owner == Motion::Idle {
            let settle = self.idle.settle_delay();
            self.idle.arm(now + settle, self.state.generation, timers);
        } else {
            trace!(sequence = %sequence.name, "Chain loops");
            self.blend_to_keyframe(keyframes, 0, crossfade, now, timers);
        }
    }

    fn sequence_ended(&mut self, now: Duration, timers: &mut TimerQueue<Wakeup>) {
        match self.state.owner {
            Motion::Specific => {
                debug!(sequence = ?self.state.active_name(), "One-shot sequence finished");
                self.enter_idle(None, self.config.default_crossfade, now, timers);
            }
            Motion::Idle => {
                let settle = self.idle.settle_delay();
                self.idle.arm(now + settle, self.state.generation, timers);
            }
        }
    }
}
