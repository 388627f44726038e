//! Two-slot animation mixer
//!
//! Holds at most two weighted actions: the `current` one and, while a
//! crossfade is in flight, the `outgoing` one. The outgoing action stays at
//! full weight while the incoming weight ramps 0→1 from the clock, so there is
//! never a frame where the summed weight dips and the rig falls back to its
//! bind pose.
//!
//! Starting a new crossfade while one is pending releases the old outgoing
//! action immediately and promotes the current action (at full weight) to
//! outgoing.

use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tracing::trace;

use crate::clip::Clip;

/// Handle identifying one crossfade
pub type FadeId = u64;

/// Weighted state of one playing action, as handed to the renderer
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct ActionSnapshot {
    /// Clip reference
    pub clip: String,
    /// Blend weight in [0, 1]
    pub weight: f32,
    /// Playback position within the clip, in seconds
    pub time: f32,
}

#[derive(Clone, Copy, Debug, PartialEq)]
struct Fade {
    id: FadeId,
    start: Duration,
    duration: Duration,
}

#[derive(Clone, Debug)]
struct Action {
    clip: Arc<Clip>,
    /// Local playback position (wraps at the clip duration)
    time: Duration,
    weight: f32,
    fade: Option<Fade>,
}

impl Action {
    fn new(clip: Arc<Clip>, weight: f32, fade: Option<Fade>) -> Self {
        Self {
            clip,
            time: Duration::ZERO,
            weight,
            fade,
        }
    }

    fn advance(&mut self, now: Duration, dt: Duration) {
        let length = self.clip.duration;
        self.time = if length.is_zero() {
            Duration::ZERO
        } else {
            let nanos = (self.time + dt).as_nanos() % length.as_nanos();
            Duration::from_nanos(u64::try_from(nanos).unwrap_or(0))
        };
        if let Some(fade) = self.fade {
            self.weight = fade_weight(fade, now);
        }
    }

    fn snapshot(&self) -> ActionSnapshot {
        ActionSnapshot {
            clip: self.clip.source.clone(),
            weight: self.weight,
            time: self.time.as_secs_f32(),
        }
    }
}

fn fade_weight(fade: Fade, now: Duration) -> f32 {
    if fade.duration.is_zero() {
        return 1.0;
    }
    let elapsed = now.saturating_sub(fade.start).as_secs_f32();
    (elapsed / fade.duration.as_secs_f32()).clamp(0.0, 1.0)
}

/// Blends between at most two looping actions
#[derive(Debug, Default)]
pub struct Mixer {
    current: Option<Action>,
    outgoing: Option<Action>,
    next_fade: FadeId,
}

impl Mixer {
    /// Empty mixer
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Blend into `clip` over `duration`
    ///
    /// Returns the fade handle when a crossfade is now in flight; `None` when
    /// the clip took over immediately (nothing playing, or a zero duration).
    ///
    /// Interrupting a crossfade releases its outgoing action and promotes the
    /// part-faded incoming one to the outgoing slot at full weight, so the
    /// mixer never holds more than two actions. The promoted clip jumps from
    /// its partial weight to 1 on that frame.
    pub fn crossfade_to(&mut self, clip: Arc<Clip>, now: Duration, duration: Duration) -> Option<FadeId> {
        let Some(mut previous) = self.current.take() else {
            self.current = Some(Action::new(clip, 1.0, None));
            return None;
        };

        if duration.is_zero() {
            self.outgoing = None;
            self.current = Some(Action::new(clip, 1.0, None));
            trace!("Mixer cut");
            return None;
        }

        if let Some(released) = self.outgoing.take() {
            trace!(clip = %released.clip.source, "Releasing superseded outgoing action");
        }
        previous.weight = 1.0;
        previous.fade = None;
        self.outgoing = Some(previous);

        self.next_fade += 1;
        let fade = Fade {
            id: self.next_fade,
            start: now,
            duration,
        };
        self.current = Some(Action::new(clip, 0.0, Some(fade)));
        Some(fade.id)
    }

    /// Finish crossfade `fade`: release the outgoing action
    ///
    /// Returns `false` if that crossfade was already superseded.
    pub fn complete_crossfade(&mut self, fade: FadeId) -> bool {
        let Some(current) = self.current.as_mut() else {
            return false;
        };
        if current.fade.map(|f| f.id) != Some(fade) {
            return false;
        }
        current.fade = None;
        current.weight = 1.0;
        self.outgoing = None;
        true
    }

    /// Advance playback positions and recompute the incoming weight
    pub fn advance(&mut self, now: Duration, dt: Duration) {
        if let Some(outgoing) = self.outgoing.as_mut() {
            outgoing.advance(now, dt);
        }
        if let Some(current) = self.current.as_mut() {
            current.advance(now, dt);
        }
    }

    /// Whether a crossfade is in flight
    #[must_use]
    pub fn is_crossfading(&self) -> bool {
        self.outgoing.is_some()
    }

    /// Number of weighted actions (0, 1 or 2)
    #[must_use]
    pub fn action_count(&self) -> usize {
        usize::from(self.current.is_some()) + usize::from(self.outgoing.is_some())
    }

    /// The clip currently taking over (or playing)
    #[must_use]
    pub fn current_clip(&self) -> Option<&Arc<Clip>> {
        self.current.as_ref().map(|a| &a.clip)
    }

    /// Weight of the current action
    #[must_use]
    pub fn current_weight(&self) -> Option<f32> {
        self.current.as_ref().map(|a| a.weight)
    }

    /// Outgoing first, then current
    #[must_use]
    pub fn snapshot(&self) -> Vec<ActionSnapshot> {
        self.outgoing
            .iter()
            .chain(self.current.iter())
            .map(Action::snapshot)
            .collect()
    }

    /// Stop everything
    pub fn clear(&mut self) {
        self.current = None;
        self.outgoing = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn clip(name: &str, secs: u64) -> Arc<Clip> {
        Arc::new(Clip::new(name, Duration::from_secs(secs)))
    }

    fn ms(n: u64) -> Duration {
        Duration::from_millis(n)
    }

    #[test]
    fn test_first_clip_starts_at_full_weight() {
        let mut mixer = Mixer::new();
        assert_eq!(mixer.crossfade_to(clip("idle", 4), ms(0), ms(500)), None);
        assert_eq!(mixer.action_count(), 1);
        assert_eq!(mixer.current_weight(), Some(1.0));
    }

    #[test]
    fn test_crossfade_ramps_incoming() {
        let mut mixer = Mixer::new();
        mixer.crossfade_to(clip("idle", 4), ms(0), ms(0));
        let fade = mixer.crossfade_to(clip("wave", 2), ms(1000), ms(500)).unwrap();

        mixer.advance(ms(1250), ms(250));
        let snapshot = mixer.snapshot();
        assert_eq!(snapshot.len(), 2);
        assert_eq!(snapshot[0].clip, "idle");
        assert!((snapshot[0].weight - 1.0).abs() < f32::EPSILON);
        assert!((snapshot[1].weight - 0.5).abs() < 1e-4);

        assert!(mixer.complete_crossfade(fade));
        assert_eq!(mixer.action_count(), 1);
        assert_eq!(mixer.current_weight(), Some(1.0));
    }

    #[test]
    fn test_interrupting_crossfade_keeps_two_actions() {
        let mut mixer = Mixer::new();
        mixer.crossfade_to(clip("a", 4), ms(0), ms(0));
        let first = mixer.crossfade_to(clip("b", 4), ms(0), ms(500)).unwrap();
        mixer.advance(ms(100), ms(100));
        assert!((mixer.snapshot()[1].weight - 0.2).abs() < 1e-4);
        let second = mixer.crossfade_to(clip("c", 4), ms(100), ms(500)).unwrap();

        assert_eq!(mixer.action_count(), 2);
        let snapshot = mixer.snapshot();
        // the part-faded "b" now holds the outgoing slot at full weight
        assert_eq!(snapshot[0].clip, "b");
        assert!((snapshot[0].weight - 1.0).abs() < f32::EPSILON);
        assert_eq!(snapshot[1].clip, "c");
        assert_eq!(snapshot[1].weight, 0.0);

        assert!(!mixer.complete_crossfade(first));
        assert_eq!(mixer.action_count(), 2);
        assert!(mixer.complete_crossfade(second));
        assert_eq!(mixer.action_count(), 1);
    }

    #[test]
    fn test_zero_crossfade_cuts() {
        let mut mixer = Mixer::new();
        mixer.crossfade_to(clip("a", 4), ms(0), ms(0));
        mixer.crossfade_to(clip("b", 4), ms(0), ms(500));
        assert_eq!(mixer.crossfade_to(clip("c", 4), ms(10), Duration::ZERO), None);
        assert_eq!(mixer.action_count(), 1);
        assert_eq!(mixer.current_clip().unwrap().source, "c");
    }

    #[test]
    fn test_actions_loop() {
        let mut mixer = Mixer::new();
        mixer.crossfade_to(clip("a", 2), ms(0), ms(0));
        mixer.advance(ms(2500), ms(2500));
        assert!((mixer.snapshot()[0].time - 0.5).abs() < 1e-4);
    }
}
