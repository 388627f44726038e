//! Viseme Timeline Player
//!
//! A run is one `play` call. Every cue becomes an `Onset` timer at
//! `epoch + time`; an onset ramps its channel from wherever it is to the "on"
//! intensity over the fade-in window and arms a `Release` after the hold
//! window, which ramps the channel back to zero over the fade-out window.
//! Neighbouring cues overlap freely during their fades.
//!
//! A release only applies if its onset is still the channel's latest one. Rest
//! markers (`neutral`, `sil`) close the mouth: every active channel fades out.
//!
//! Starting a new run cancels the previous run's pending onsets and releases
//! and fades whatever it left open.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::time::Duration;

use tracing::{debug, trace, warn};

use super::{cue_due, VisemaEvent};
use crate::avatar::AvatarRig;
use crate::config::VisemeConfig;
use crate::frame::Wakeup;
use crate::scheduler::TimerQueue;

/// Continuations the viseme player schedules
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum VisemeWakeup {
    /// Cue `index` of run `run` is due
    Onset {
        /// Run the cue belongs to
        run: u64,
        /// Cue index within the run
        index: usize,
    },
    /// The hold window of an onset elapsed
    Release {
        /// Run the onset belongs to
        run: u64,
        /// Cue index within the run
        index: usize,
        /// Channel onset serial the release belongs to
        serial: u64,
    },
}

impl VisemeWakeup {
    /// Run that armed this wakeup
    #[must_use]
    pub fn run(&self) -> u64 {
        match self {
            Self::Onset { run, .. } | Self::Release { run, .. } => *run,
        }
    }
}

/// Linear ramp of one channel
#[derive(Clone, Copy, Debug, PartialEq)]
struct Envelope {
    from: f32,
    to: f32,
    start: Duration,
    duration: Duration,
}

impl Envelope {
    fn progress(&self, now: Duration) -> f32 {
        if self.duration.is_zero() {
            return 1.0;
        }
        let elapsed = now.saturating_sub(self.start).as_secs_f32();
        (elapsed / self.duration.as_secs_f32()).clamp(0.0, 1.0)
    }

    fn value(&self, now: Duration) -> f32 {
        self.from + (self.to - self.from) * self.progress(now)
    }

    fn is_done(&self, now: Duration) -> bool {
        now >= self.start.saturating_add(self.duration)
    }
}

/// Timer-driven lip-sync player
#[derive(Debug)]
pub struct VisemeTimeline {
    config: VisemeConfig,
    run: u64,
    epoch: Duration,
    cues: Vec<String>,
    envelopes: BTreeMap<String, Envelope>,
    serials: HashMap<String, u64>,
    onsets: usize,
    missing_logged: HashSet<String>,
}

impl VisemeTimeline {
    /// Player with the configured envelope windows
    #[must_use]
    pub fn new(config: VisemeConfig) -> Self {
        Self {
            config,
            run: 0,
            epoch: Duration::ZERO,
            cues: Vec::new(),
            envelopes: BTreeMap::new(),
            serials: HashMap::new(),
            onsets: 0,
            missing_logged: HashSet::new(),
        }
    }

    /// Reserved viseme channel names
    #[must_use]
    pub fn channels(&self) -> &[String] {
        &self.config.channels
    }

    /// Start a new run at `now`
    ///
    /// Cues whose time is non-finite or too far out to schedule are dropped;
    /// negative times clamp to zero.
    /// Past-due cues fire on the next dispatch.
    pub fn play(
        &mut self,
        events: Vec<VisemaEvent>,
        now: Duration,
        timers: &mut TimerQueue<Wakeup>,
        rig: &dyn AvatarRig,
    ) {
        let cancelled = timers.cancel_where(|w| matches!(w, Wakeup::Viseme(_)));
        self.close_all(now, rig);

        self.run += 1;
        self.epoch = now;
        self.onsets = 0;
        self.missing_logged.clear();

        let mut cues: Vec<(Duration, String)> = events
            .into_iter()
            .filter_map(|event| match cue_due(now, event.time) {
                Some(due) => Some((due, event.channel)),
                None => {
                    warn!(
                        channel = %event.channel,
                        time = event.time,
                        "Dropping viseme cue with unusable time"
                    );
                    None
                }
            })
            .collect();
        cues.sort_by_key(|(due, _)| *due);

        for (index, (due, _)) in cues.iter().enumerate() {
            timers.schedule(
                *due,
                Wakeup::Viseme(VisemeWakeup::Onset {
                    run: self.run,
                    index,
                }),
            );
        }
        self.cues = cues.into_iter().map(|(_, channel)| channel).collect();

        debug!(
            run = self.run,
            cues = self.cues.len(),
            cancelled,
            "Viseme run started"
        );
    }

    /// Handle a due viseme timer
    ///
    /// `at` is the time the timer was armed for; envelopes start there even
    /// when the dispatch happens a little later.
    pub fn on_wakeup(
        &mut self,
        wakeup: VisemeWakeup,
        at: Duration,
        timers: &mut TimerQueue<Wakeup>,
        rig: &dyn AvatarRig,
    ) {
        if wakeup.run() != self.run {
            trace!(?wakeup, run = self.run, "Stale viseme wakeup ignored");
            return;
        }
        match wakeup {
            VisemeWakeup::Onset { index, .. } => self.onset(index, at, timers, rig),
            VisemeWakeup::Release { index, serial, .. } => self.release(index, serial, at, rig),
        }
    }

    fn onset(&mut self, index: usize, now: Duration, timers: &mut TimerQueue<Wakeup>, rig: &dyn AvatarRig) {
        let Some(channel) = self.cues.get(index).cloned() else {
            return;
        };
        self.onsets += 1;

        if self.config.rest_markers.iter().any(|m| *m == channel) {
            trace!(marker = %channel, "Rest marker");
            self.close_all(now, rig);
            return;
        }

        if !rig.has_channel(&channel) {
            if self.missing_logged.insert(channel.clone()) {
                warn!(channel = %channel, "Viseme channel missing on avatar");
            }
            return;
        }

        let from = self.value_of(&channel, now, rig);
        self.envelopes.insert(
            channel.clone(),
            Envelope {
                from,
                to: self.config.target_for(&channel),
                start: now,
                duration: self.config.fade_in,
            },
        );
        let serial = self.serials.entry(channel).or_default();
        *serial += 1;
        timers.schedule_after(
            now,
            self.config.hold,
            Wakeup::Viseme(VisemeWakeup::Release {
                run: self.run,
                index,
                serial: *serial,
            }),
        );
    }

    fn release(&mut self, index: usize, serial: u64, now: Duration, rig: &dyn AvatarRig) {
        let Some(channel) = self.cues.get(index).cloned() else {
            return;
        };
        if self.serials.get(&channel).copied() != Some(serial) {
            trace!(channel = %channel, "Release superseded by a newer onset");
            return;
        }
        self.fade_out(channel, now, rig);
    }

    /// Current weight of a channel, from its envelope or the rig
    fn value_of(&self, channel: &str, now: Duration, rig: &dyn AvatarRig) -> f32 {
        self.envelopes
            .get(channel)
            .map(|env| env.value(now))
            .or_else(|| rig.channel_value(channel))
            .unwrap_or(0.0)
    }

    fn fade_out(&mut self, channel: String, now: Duration, rig: &dyn AvatarRig) {
        let from = self.value_of(&channel, now, rig);
        if from == 0.0 {
            self.envelopes.remove(&channel);
            return;
        }
        self.envelopes.insert(
            channel,
            Envelope {
                from,
                to: 0.0,
                start: now,
                duration: self.config.fade_out,
            },
        );
    }

    /// Fade every open viseme channel to zero
    fn close_all(&mut self, now: Duration, rig: &dyn AvatarRig) {
        let open: Vec<String> = self
            .config
            .channels
            .iter()
            .chain(self.envelopes.keys())
            .filter(|c| self.value_of(c, now, rig) > 0.0)
            .cloned()
            .collect::<HashSet<_>>()
            .into_iter()
            .collect();
        for channel in open {
            // invalidate pending releases for the channel
            *self.serials.entry(channel.clone()).or_default() += 1;
            self.fade_out(channel, now, rig);
        }
    }

    /// Write envelope values for this frame
    pub fn tick(&mut self, now: Duration, rig: &mut dyn AvatarRig) {
        let mut finished = Vec::new();
        for (channel, envelope) in &self.envelopes {
            let value = envelope.value(now);
            if let Err(e) = rig.set_channel(channel, value) {
                trace!(channel = %channel, error = %e, "Viseme write skipped");
            }
            if envelope.is_done(now) {
                finished.push(channel.clone());
            }
        }
        for channel in finished {
            self.envelopes.remove(&channel);
        }
    }

    /// Current run id
    #[must_use]
    pub fn run(&self) -> u64 {
        self.run
    }

    /// Queue-start epoch of the current run
    #[must_use]
    pub fn epoch(&self) -> Duration {
        self.epoch
    }

    /// Onsets handled in the current run (rest markers included)
    #[must_use]
    pub fn onsets(&self) -> usize {
        self.onsets
    }

    /// Channels with an envelope in progress
    #[must_use]
    pub fn active_channels(&self) -> Vec<&str> {
        self.envelopes.keys().map(String::as_str).collect()
    }

    /// Cancel the run and forget all channel state
    pub fn reset(&mut self, timers: &mut TimerQueue<Wakeup>) {
        timers.cancel_where(|w| matches!(w, Wakeup::Viseme(_)));
        self.run += 1;
        self.cues.clear();
        self.envelopes.clear();
        self.serials.clear();
        self.onsets = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::avatar::HeadlessRig;

    struct Harness {
        player: VisemeTimeline,
        timers: TimerQueue<Wakeup>,
        rig: HeadlessRig,
        now: Duration,
    }

    impl Harness {
        fn new() -> Self {
            Self {
                player: VisemeTimeline::new(VisemeConfig::default()),
                timers: TimerQueue::new(),
                rig: HeadlessRig::standard(),
                now: Duration::ZERO,
            }
        }

        fn play(&mut self, events: Vec<VisemaEvent>) {
            self.player.play(events, self.now, &mut self.timers, &self.rig);
        }

        fn step_to(&mut self, until_ms: u64) {
            let until = Duration::from_millis(until_ms);
            while self.now < until {
                self.now += Duration::from_millis(5);
                while let Some(due) = self.timers.pop_due(self.now) {
                    if let Wakeup::Viseme(wakeup) = due.payload {
                        self.player
                            .on_wakeup(wakeup, due.fire_at, &mut self.timers, &self.rig);
                    }
                }
                self.player.tick(self.now, &mut self.rig);
            }
        }

        fn value(&self, channel: &str) -> f32 {
            self.rig.channel_value(channel).unwrap_or_default()
        }
    }

    #[test]
    fn test_onset_hold_release() {
        let mut h = Harness::new();
        h.play(vec![VisemaEvent::new("aa", 0.0)]);

        h.step_to(25);
        let mid = h.value("aa");
        assert!(mid > 0.0 && mid < 1.0);

        h.step_to(50);
        assert!((h.value("aa") - 1.0).abs() < 1e-6);

        h.step_to(180);
        assert!((h.value("aa") - 1.0).abs() < 1e-6);

        h.step_to(240);
        assert!(h.value("aa") < 1.0 && h.value("aa") > 0.0);

        h.step_to(300);
        assert_eq!(h.value("aa"), 0.0);
        assert!(h.player.active_channels().is_empty());
    }

    #[test]
    fn test_second_cue_starts_on_time() {
        let mut h = Harness::new();
        h.play(vec![VisemaEvent::new("aa", 0.0), VisemaEvent::new("oh", 0.5)]);

        h.step_to(495);
        assert_eq!(h.value("oh"), 0.0);
        h.step_to(525);
        assert!(h.value("oh") > 0.0);
        assert_eq!(h.value("aa"), 0.0);
    }

    #[test]
    fn test_release_skipped_after_newer_onset() {
        let mut h = Harness::new();
        h.play(vec![VisemaEvent::new("aa", 0.0), VisemaEvent::new("aa", 0.1)]);

        // first release at 180 ms must not fade the second onset
        h.step_to(200);
        assert!((h.value("aa") - 1.0).abs() < 1e-6);
        h.step_to(400);
        assert_eq!(h.value("aa"), 0.0);
    }

    #[test]
    fn test_rest_marker_closes_mouth() {
        let mut h = Harness::new();
        h.play(vec![VisemaEvent::new("ee", 0.0), VisemaEvent::new("sil", 0.06)]);
        h.step_to(60);
        assert!(h.value("ee") > 0.9);
        h.step_to(200);
        assert_eq!(h.value("ee"), 0.0);
        assert_eq!(h.player.onsets(), 2);
    }

    #[test]
    fn test_new_run_cancels_previous() {
        let mut h = Harness::new();
        h.play(vec![VisemaEvent::new("aa", 0.0), VisemaEvent::new("oh", 0.3)]);
        h.step_to(100);

        h.play(vec![VisemaEvent::new("ih", 0.5)]);
        h.step_to(450);
        assert_eq!(h.value("aa"), 0.0);
        assert_eq!(h.rig.write_count("oh"), 0);
        assert_eq!(h.value("ih"), 0.0);

        h.step_to(650);
        assert!(h.value("ih") > 0.0);
    }

    #[test]
    fn test_missing_channel_skipped() {
        let mut h = Harness::new();
        h.rig = HeadlessRig::new(["aa"]);
        h.play(vec![VisemaEvent::new("ou", 0.0), VisemaEvent::new("aa", 0.0)]);
        h.step_to(60);
        assert!(h.value("aa") > 0.9);
        assert_eq!(h.player.onsets(), 2);
    }

    #[test]
    fn test_unschedulable_cues_dropped() {
        let mut h = Harness::new();
        h.now = Duration::from_secs(2);
        h.play(vec![
            VisemaEvent::new("aa", 1e20),
            VisemaEvent::new("oh", f32::NAN),
            VisemaEvent::new("ee", 0.0),
        ]);
        assert_eq!(h.timers.len(), 1);

        h.step_to(2_060);
        assert!(h.value("ee") > 0.9);
        assert_eq!(h.rig.write_count("aa"), 0);
        assert_eq!(h.rig.write_count("oh"), 0);
        assert_eq!(h.player.onsets(), 1);
    }
}
