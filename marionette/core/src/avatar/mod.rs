//! Avatar Ports
//!
//! The engine never touches a scene graph directly. Everything it needs from
//! the loaded avatar model goes through [`AvatarRig`]: named blend channels
//! (expressions and visemes) and joint rotations (breathing). The render call
//! itself sits behind [`RenderSurface`], and model loading behind
//! [`AvatarLoader`].
//!
//! [`headless`] provides in-memory implementations used by the player binary
//! and the tests.

pub mod headless;

use async_trait::async_trait;
use glam::Quat;

use crate::error::EngineError;
use crate::frame::FrameOutput;

pub use headless::{HeadlessAvatarLoader, HeadlessRig, HeadlessSurface};

/// Mutable view of the loaded avatar model
pub trait AvatarRig: Send {
    /// Whether the model exposes a blend channel with this name
    fn has_channel(&self, name: &str) -> bool;

    /// Current weight of a blend channel
    fn channel_value(&self, name: &str) -> Option<f32>;

    /// Write a blend channel weight
    ///
    /// # Errors
    ///
    /// Returns `EngineError::MissingChannel` if the model has no such channel.
    fn set_channel(&mut self, name: &str, value: f32) -> Result<(), EngineError>;

    /// Current local rotation of a joint
    fn joint_rotation(&self, joint: &str) -> Option<Quat>;

    /// Write a joint's local rotation; returns `false` if the joint is absent
    fn set_joint_rotation(&mut self, joint: &str, rotation: Quat) -> bool;
}

/// Loads the avatar model the engine animates
#[async_trait]
pub trait AvatarLoader: Send + Sync {
    /// Load the model and hand back its rig
    async fn load_avatar(&self) -> Result<Box<dyn AvatarRig>, EngineError>;
}

/// The render context the engine owns while initialized
pub trait RenderSurface: Send {
    /// Bind to the host container
    ///
    /// # Errors
    ///
    /// Returns `EngineError::ContextUnavailable` when there is nothing to
    /// render into.
    fn attach(&mut self) -> Result<(), EngineError>;

    /// Consume the final pose of a frame
    fn render(&mut self, frame: &FrameOutput, rig: &dyn AvatarRig);

    /// Release GPU/scene resources
    fn release(&mut self);
}
