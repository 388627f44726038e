//! Timed Cue Players
//!
//! Two players consume externally timed cue batches against the engine clock:
//!
//! - [`ExpressionTimeline`]: facial expressions, consumed once per frame and
//!   smoothed exponentially toward their targets
//! - [`VisemeTimeline`]: mouth shapes, driven by timers with fade envelopes
//!
//! Cue times are seconds relative to the moment the batch was handed over
//! (the queue-start epoch). Field names follow the upstream pipeline's wire
//! format (`expresion`/`tiempo`/`intensidad`, `visema`/`tiempo`).

pub mod expression;
pub mod viseme;

use std::time::Duration;

use serde::{Deserialize, Serialize};

pub use expression::ExpressionTimeline;
pub use viseme::{VisemeTimeline, VisemeWakeup};

fn full_intensity() -> f32 {
    1.0
}

/// A scheduled facial-expression cue
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ExpressionEvent {
    /// Expression channel
    #[serde(rename = "expresion")]
    pub channel: String,
    /// Seconds after the queue-start epoch
    #[serde(rename = "tiempo")]
    pub time: f32,
    /// Target weight, clamped to [0, 1] on use
    #[serde(rename = "intensidad", default = "full_intensity")]
    pub intensity: f32,
}

impl ExpressionEvent {
    /// Build a cue
    pub fn new(channel: impl Into<String>, time: f32, intensity: f32) -> Self {
        Self {
            channel: channel.into(),
            time,
            intensity,
        }
    }
}

/// A scheduled phoneme cue
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct VisemaEvent {
    /// Viseme channel or rest marker
    #[serde(rename = "visema")]
    pub channel: String,
    /// Seconds after the queue-start epoch
    #[serde(rename = "tiempo")]
    pub time: f32,
}

impl VisemaEvent {
    /// Build a cue
    pub fn new(channel: impl Into<String>, time: f32) -> Self {
        Self {
            channel: channel.into(),
            time,
        }
    }
}

/// Offset of a cue from its epoch
///
/// Negative times clamp to zero. Non-finite times and times beyond what a
/// [`Duration`] can hold give `None`.
pub(crate) fn cue_time(time: f32) -> Option<Duration> {
    if !time.is_finite() {
        return None;
    }
    Duration::try_from_secs_f32(time.max(0.0)).ok()
}

/// Absolute due time of a cue handed over at `epoch`, `None` when unschedulable
pub(crate) fn cue_due(epoch: Duration, time: f32) -> Option<Duration> {
    cue_time(time).and_then(|offset| epoch.checked_add(offset))
}
