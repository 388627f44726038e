//! Marionette Core - Animation & Expression Synchronization for a Speaking Avatar
//!
//! This crate keeps one 3D avatar's body motion, facial expressions and lip
//! movement in sync with independently timed upstream event streams. It owns
//! clip loading and caching, the idle-vs-directed playback state machine,
//! crossfade scheduling, the expression and viseme players, and a breathing
//! modulator, all advanced from a single per-frame tick.
//!
//! Rendering, asset parsing and the avatar model itself stay outside, behind
//! ports.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────────┐
//! │                         Host / Player                            │
//! │   presentation loop ── tick(delta) ──┐      EventFeed ─ dispatch │
//! └──────────────────────────────────────┼───────────────────┬───────┘
//!                                        │                   │
//! ┌──────────────────────────────────────┼───────────────────┼───────┐
//! │                     MARIONETTE CORE  ▼                   ▼       │
//! │  ┌────────────────────────────────────────────────────────────┐  │
//! │  │                          Engine                            │  │
//! │  │  ┌───────────┐  ┌──────────────────────────────────────┐   │  │
//! │  │  │ ClipCache │  │             FrameDriver              │   │  │
//! │  │  │ (OnceCell │  │  VirtualClock ─▶ TimerQueue<Wakeup>  │   │  │
//! │  │  │  per key) │  │  PlaybackController (Mixer, Idle)    │   │  │
//! │  │  └─────┬─────┘  │  ExpressionTimeline  VisemeTimeline  │   │  │
//! │  │        │        │  BreathingModulator                  │   │  │
//! │  │        │        └──────────────────────────────────────┘   │  │
//! │  └────────┼───────────────────────────┬───────────────────────┘  │
//! └───────────┼───────────────────────────┼──────────────────────────┘
//!             ▼                           ▼
//!   SequenceSource / AssetLoader    AvatarRig / RenderSurface
//!   (animation service over HTTP)   (scene graph, renderer)
//! ```
//!
//! # Key Types
//!
//! - [`Engine`]: the public surface (initialize, play, tick, cleanup)
//! - [`ClipCache`]: fetch-once clip and sequence storage
//! - [`FrameDriver`]: the per-frame update order
//! - [`PlaybackController`]: idle rotation vs. directed sequences
//! - [`ExpressionTimeline`] / [`VisemeTimeline`]: timed cue players
//! - [`BreathingModulator`]: continuous chest motion
//!
//! # Quick Start
//!
//! ```ignore
//! use marionette_core::{
//!     Engine, EngineConfig, EnginePorts, HeadlessAvatarLoader, HeadlessSurface,
//! };
//!
//! let config = EngineConfig::default();
//! let ports = EnginePorts::http(
//!     &config,
//!     Arc::new(HeadlessAvatarLoader::default()),
//!     Box::new(HeadlessSurface::new()),
//! )?;
//! let mut engine = Engine::new(config, ports)?;
//! engine.initialize().await?;
//!
//! engine.play_animation("wave", Some(0.5)).await;
//! loop {
//!     let frame = engine.tick(Duration::from_millis(16))?;
//!     // ...
//! }
//! ```
//!
//! # Determinism
//!
//! Nothing in this crate reads the wall clock or sleeps. Time only moves when
//! the host calls [`Engine::tick`], so every scenario can be replayed exactly
//! in tests.

#![deny(missing_docs)]
#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod avatar;
pub mod breathing;
pub mod cache;
pub mod clip;
pub mod config;
pub mod engine;
pub mod error;
pub mod feed;
pub mod frame;
pub mod playback;
pub mod scheduler;
pub mod source;
pub mod test_utils;
pub mod timeline;

// Re-exports for convenience
pub use glam;
pub use avatar::{
    AvatarLoader, AvatarRig, HeadlessAvatarLoader, HeadlessRig, HeadlessSurface, RenderSurface,
};
pub use breathing::{breathing_offset, BreathingConfig, BreathingModulator, BreathingPatch};
pub use cache::ClipCache;
pub use clip::{
    AssetLoader, Clip, ClipDecoder, KeyframeDescriptor, NominalDecoder, Sequence, SequenceBody,
    SequenceDescriptor,
};
pub use engine::{Engine, EnginePorts, EngineStatus, Lifecycle};
pub use error::EngineError;
pub use feed::{decode_message, ChannelFeed, EventFeed, FeedError, FeedMessage, LineFeed};
pub use frame::{FrameDriver, FrameOutput, Wakeup};
pub use playback::{
    ActionSnapshot, IdleScheduler, Mixer, Motion, PlaybackController, PlaybackPhase,
    PlaybackState, PlaybackWakeup,
};
pub use scheduler::{TimerId, TimerQueue, VirtualClock};
pub use source::{
    DirAssetLoader, HttpAssetLoader, HttpSequenceSource, SequenceListing, SequenceSource,
    SequenceSummary, StaticSequenceSource,
};
pub use timeline::{ExpressionEvent, ExpressionTimeline, VisemaEvent, VisemeTimeline, VisemeWakeup};

// Config exports
pub use config::{
    default_config_path, load_config, load_config_from_path, ConfigError, ConfigOverrides,
    ConfigSource, EngineConfig, EngineToml,
};
