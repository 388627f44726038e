//! Breathing Modulator
//!
//! A slow sinusoidal rotation layered on top of the chest joint so the avatar
//! never looks frozen, even while an idle clip holds still. The offset is
//!
//! ```text
//! amplitude * sin(φ) * envelope(sin(φ'))
//! φ  = 2π t / period
//! φ' = 2π t / (period * ENVELOPE_PERIOD_RATIO)
//! ```
//!
//! so consecutive breaths vary a little in depth without ever exceeding
//! `amplitude`.

use std::f32::consts::TAU;
use std::time::Duration;

use glam::Quat;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::avatar::AvatarRig;

/// Ratio between the depth-modulation period and the breath period
const ENVELOPE_PERIOD_RATIO: f32 = 3.7;

/// Floor of the depth envelope
const ENVELOPE_FLOOR: f32 = 0.8;

/// Breathing parameters
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct BreathingConfig {
    /// Length of one breath in seconds
    pub period_seconds: f32,
    /// Peak rotation offset in radians
    pub amplitude: f32,
    /// Whether the modulator runs
    pub enabled: bool,
}

impl Default for BreathingConfig {
    fn default() -> Self {
        Self {
            period_seconds: 4.0,
            amplitude: 0.02,
            enabled: true,
        }
    }
}

/// Partial update for [`BreathingConfig`]; unset fields keep their value
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct BreathingPatch {
    /// New breath period
    pub period_seconds: Option<f32>,
    /// New amplitude
    pub amplitude: Option<f32>,
    /// Enable or disable
    pub enabled: Option<bool>,
}

impl BreathingConfig {
    /// Merge a patch, ignoring values that cannot drive the modulator
    pub fn merge(&mut self, patch: BreathingPatch) {
        if let Some(period) = patch.period_seconds {
            if period.is_finite() && period > 0.0 {
                self.period_seconds = period;
            } else {
                warn!(period, "Ignoring invalid breathing period");
            }
        }
        if let Some(amplitude) = patch.amplitude {
            if amplitude.is_finite() && amplitude >= 0.0 {
                self.amplitude = amplitude;
            } else {
                warn!(amplitude, "Ignoring invalid breathing amplitude");
            }
        }
        if let Some(enabled) = patch.enabled {
            self.enabled = enabled;
        }
    }
}

/// Offset in radians at `t` seconds into a breathing run
#[must_use]
pub fn breathing_offset(config: &BreathingConfig, t: f32) -> f32 {
    let phase = TAU * t / config.period_seconds;
    let envelope_phase = TAU * t / (config.period_seconds * ENVELOPE_PERIOD_RATIO);
    let envelope = ENVELOPE_FLOOR + (1.0 - ENVELOPE_FLOOR) * envelope_phase.sin();
    config.amplitude * phase.sin() * envelope
}

/// Applies breathing to one joint each frame
#[derive(Debug)]
pub struct BreathingModulator {
    config: BreathingConfig,
    joint: String,
    /// Rest rotation captured on first activation
    base: Option<Quat>,
    /// Clock time the current run started
    origin: Option<Duration>,
    missing_joint_logged: bool,
}

impl BreathingModulator {
    /// Create a modulator for `joint`
    pub fn new(config: BreathingConfig, joint: impl Into<String>) -> Self {
        Self {
            config,
            joint: joint.into(),
            base: None,
            origin: None,
            missing_joint_logged: false,
        }
    }

    /// Current parameters
    #[must_use]
    pub fn config(&self) -> BreathingConfig {
        self.config
    }

    /// Merge a partial update and return the result
    pub fn update(&mut self, patch: BreathingPatch) -> BreathingConfig {
        self.config.merge(patch);
        debug!(config = ?self.config, "Breathing configuration updated");
        self.config
    }

    /// Whether a run is in progress
    #[must_use]
    pub fn is_running(&self) -> bool {
        self.origin.is_some()
    }

    /// Cached rest rotation, if captured
    #[must_use]
    pub fn base_rotation(&self) -> Option<Quat> {
        self.base
    }

    /// Advance one frame
    ///
    /// `allowed` lets the active sequence suspend breathing without touching
    /// the caller's configuration.
    pub fn apply(&mut self, now: Duration, allowed: bool, rig: &mut dyn AvatarRig) {
        if !(self.config.enabled && allowed) {
            self.stop(rig);
            return;
        }

        let base = match self.base {
            Some(base) => base,
            None => match rig.joint_rotation(&self.joint) {
                Some(rotation) => {
                    self.base = Some(rotation);
                    rotation
                }
                None => {
                    if !self.missing_joint_logged {
                        warn!(joint = %self.joint, "Breathing joint not found on avatar");
                        self.missing_joint_logged = true;
                    }
                    return;
                }
            },
        };

        let origin = *self.origin.get_or_insert(now);
        let t = now.saturating_sub(origin).as_secs_f32();
        let offset = breathing_offset(&self.config, t);
        rig.set_joint_rotation(&self.joint, base * Quat::from_rotation_x(offset));
    }

    /// End the current run and put the joint back at rest
    pub fn stop(&mut self, rig: &mut dyn AvatarRig) {
        if self.origin.take().is_some() {
            if let Some(base) = self.base {
                rig.set_joint_rotation(&self.joint, base);
            }
        }
    }

    /// Forget everything, including the cached rest rotation
    pub fn reset(&mut self) {
        self.base = None;
        self.origin = None;
        self.missing_joint_logged = false;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::avatar::HeadlessRig;

    fn rig() -> HeadlessRig {
        HeadlessRig::new(Vec::<String>::new()).with_joint("chest", Quat::from_rotation_y(0.3))
    }

    #[test]
    fn test_offset_bounded_by_amplitude() {
        let config = BreathingConfig {
            period_seconds: 3.0,
            amplitude: 0.05,
            enabled: true,
        };
        for step in 0..2000 {
            let t = step as f32 * 0.01;
            assert!(breathing_offset(&config, t).abs() <= 0.05 + 1e-6);
        }
        assert!(breathing_offset(&config, 0.0).abs() < 1e-6);
    }

    #[test]
    fn test_patch_merges_partially() {
        let mut config = BreathingConfig::default();
        config.merge(BreathingPatch {
            amplitude: Some(0.1),
            ..Default::default()
        });
        assert!((config.amplitude - 0.1).abs() < f32::EPSILON);
        assert!((config.period_seconds - 4.0).abs() < f32::EPSILON);
        assert!(config.enabled);

        config.merge(BreathingPatch {
            period_seconds: Some(-1.0),
            enabled: Some(false),
            ..Default::default()
        });
        assert!((config.period_seconds - 4.0).abs() < f32::EPSILON);
        assert!(!config.enabled);
    }

    #[test]
    fn test_enable_disable_cycles_do_not_drift() {
        let mut rig = rig();
        let rest = rig.joint_rotation("chest").unwrap();
        let mut modulator = BreathingModulator::new(BreathingConfig::default(), "chest");

        for cycle in 0..5u64 {
            modulator.update(BreathingPatch {
                enabled: Some(true),
                ..Default::default()
            });
            for frame in 0..37u64 {
                let now = Duration::from_millis(cycle * 10_000 + frame * 16);
                modulator.apply(now, true, &mut rig);
            }
            modulator.update(BreathingPatch {
                enabled: Some(false),
                ..Default::default()
            });
            modulator.apply(Duration::from_millis(cycle * 10_000 + 700), true, &mut rig);

            let after = rig.joint_rotation("chest").unwrap();
            assert!(after.abs_diff_eq(rest, 1e-6));
        }
        assert_eq!(modulator.base_rotation(), Some(rest));
    }

    #[test]
    fn test_suspended_by_sequence() {
        let mut rig = rig();
        let mut modulator = BreathingModulator::new(BreathingConfig::default(), "chest");

        modulator.apply(Duration::from_secs(1), true, &mut rig);
        assert!(modulator.is_running());

        modulator.apply(Duration::from_secs(2), false, &mut rig);
        assert!(!modulator.is_running());
        assert!(modulator.config().enabled);
    }

    #[test]
    fn test_missing_joint_is_ignored() {
        let mut rig = HeadlessRig::new(["happy"]);
        let mut modulator = BreathingModulator::new(BreathingConfig::default(), "chest");
        modulator.apply(Duration::from_secs(1), true, &mut rig);
        assert!(modulator.base_rotation().is_none());
        assert_eq!(rig.write_count("chest"), 0);
    }
}
