//! Playback State Machine
//!
//! Decides which body animation plays: idle rotation or a directed sequence,
//! and orchestrates the crossfades between them.
//!
//! # Phases
//!
//! ```text
//!            play_animation(name)                 crossfade done
//!   Idle ───────────────────────▶ Transitioning ────────────────▶ Specific
//!    ▲         idle selection      {target}                          │
//!    │◀──────────────────────────────┘                               │
//!    └───────────── one-shot ends / temporary chain completes ───────┘
//! ```
//!
//! All delayed steps are [`PlaybackWakeup`]s in the engine's timer queue.
//! Each carries the generation of the activation that armed it; the
//! controller ignores wakeups from superseded activations.

pub mod controller;
pub mod idle;
pub mod mixer;

use std::sync::Arc;

use serde::Serialize;

use crate::clip::Sequence;

pub use controller::PlaybackController;
pub use idle::IdleScheduler;
pub use mixer::{ActionSnapshot, FadeId, Mixer};

/// The two observable motion modes
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize)]
pub enum Motion {
    /// Idle rotation owns the body
    Idle,
    /// A directed sequence owns the body
    Specific,
}

impl std::fmt::Display for Motion {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Idle => write!(f, "idle"),
            Self::Specific => write!(f, "specific"),
        }
    }
}

/// Exactly one of these holds at any time
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
pub enum PlaybackPhase {
    /// Idle rotation is running
    Idle,
    /// A crossfade (or deferred start) toward `target` is in flight
    Transitioning {
        /// Mode the transition ends in
        target: Motion,
    },
    /// A directed sequence is playing
    Specific,
}

impl PlaybackPhase {
    /// Phase a settled motion corresponds to
    #[must_use]
    pub fn settled(motion: Motion) -> Self {
        match motion {
            Motion::Idle => Self::Idle,
            Motion::Specific => Self::Specific,
        }
    }

    /// Mode this phase is in or heading to
    #[must_use]
    pub fn motion(&self) -> Motion {
        match self {
            Self::Idle => Motion::Idle,
            Self::Specific => Motion::Specific,
            Self::Transitioning { target } => *target,
        }
    }

    /// Whether a transition is in flight
    #[must_use]
    pub fn is_transitioning(&self) -> bool {
        matches!(self, Self::Transitioning { .. })
    }
}

/// Continuations the playback controller schedules
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PlaybackWakeup {
    /// A crossfade window elapsed
    CrossfadeComplete {
        /// Arming activation
        generation: u64,
        /// Mixer fade handle
        fade: FadeId,
    },
    /// Time to blend into keyframe `index` (`index == len` ends the chain)
    KeyframeAdvance {
        /// Arming activation
        generation: u64,
        /// Next keyframe
        index: usize,
    },
    /// A one-shot sequence played through
    SequenceEnd {
        /// Arming activation
        generation: u64,
    },
    /// Time to pick the next idle clip
    IdleRotate {
        /// Arming activation
        generation: u64,
    },
    /// A delayed sequence is due
    DeferredStart {
        /// Arming activation
        generation: u64,
    },
}

impl PlaybackWakeup {
    /// Generation of the activation that armed this wakeup
    #[must_use]
    pub fn generation(&self) -> u64 {
        match self {
            Self::CrossfadeComplete { generation, .. }
            | Self::KeyframeAdvance { generation, .. }
            | Self::SequenceEnd { generation }
            | Self::IdleRotate { generation }
            | Self::DeferredStart { generation } => *generation,
        }
    }
}

/// Read-only view of the controller's state
#[derive(Clone, Debug)]
pub struct PlaybackState {
    /// Current phase
    pub phase: PlaybackPhase,
    /// Sequence owning the body (the one taking over, during a transition)
    pub active: Option<Arc<Sequence>>,
    /// Which mode the active sequence belongs to
    pub owner: Motion,
    /// Keyframe currently playing (0 for single clips)
    pub keyframe: usize,
    /// Activation counter; bumped by every activation
    pub generation: u64,
    /// Sequence waiting out its `delay`
    pub deferred: Option<Arc<Sequence>>,
}

impl Default for PlaybackState {
    fn default() -> Self {
        Self {
            phase: PlaybackPhase::Idle,
            active: None,
            owner: Motion::Idle,
            keyframe: 0,
            generation: 0,
            deferred: None,
        }
    }
}

impl PlaybackState {
    /// Two-valued mode (transitions count as their target)
    #[must_use]
    pub fn motion(&self) -> Motion {
        self.phase.motion()
    }

    /// Name of the active sequence
    #[must_use]
    pub fn active_name(&self) -> Option<&str> {
        self.active.as_ref().map(|s| s.name.as_str())
    }

    /// Whether the active sequence lets breathing run
    #[must_use]
    pub fn breathing_allowed(&self) -> bool {
        self.active.as_ref().map_or(true, |s| s.breathing_allowed())
    }
}
