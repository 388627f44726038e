//! Headless avatar implementations
//!
//! An in-memory rig that records every write, a surface that only counts
//! frames, and a loader producing the rig. The player binary runs on these
//! when no renderer is attached.

use std::collections::{BTreeMap, HashMap};

use async_trait::async_trait;
use glam::Quat;
use tracing::trace;

use super::{AvatarLoader, AvatarRig, RenderSurface};
use crate::error::EngineError;
use crate::frame::FrameOutput;

/// Expression presets of a VRM avatar
pub const STANDARD_EXPRESSIONS: &[&str] = &[
    "neutral",
    "happy",
    "angry",
    "sad",
    "relaxed",
    "surprised",
    "blink",
    "blinkLeft",
    "blinkRight",
    "lookUp",
    "lookDown",
    "lookLeft",
    "lookRight",
    "blush",
];

/// Mouth-shape presets of a VRM avatar
pub const STANDARD_VISEMES: &[&str] = &["aa", "ih", "ou", "ee", "oh"];

/// In-memory rig
#[derive(Clone, Debug, Default)]
pub struct HeadlessRig {
    channels: BTreeMap<String, f32>,
    joints: HashMap<String, Quat>,
    writes: HashMap<String, usize>,
}

impl HeadlessRig {
    /// Rig with the given channels (all at zero) and no joints
    pub fn new<I, S>(channels: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            channels: channels.into_iter().map(|c| (c.into(), 0.0)).collect(),
            joints: HashMap::new(),
            writes: HashMap::new(),
        }
    }

    /// Rig with the standard VRM expressions, visemes and a `chest` joint
    #[must_use]
    pub fn standard() -> Self {
        Self::new(STANDARD_EXPRESSIONS.iter().chain(STANDARD_VISEMES).copied())
            .with_joint("chest", Quat::IDENTITY)
    }

    /// Add a joint with its rest rotation
    #[must_use]
    pub fn with_joint(mut self, name: impl Into<String>, rotation: Quat) -> Self {
        self.joints.insert(name.into(), rotation);
        self
    }

    /// Number of writes a channel (or joint) received
    #[must_use]
    pub fn write_count(&self, name: &str) -> usize {
        self.writes.get(name).copied().unwrap_or(0)
    }

    /// All channel weights, sorted by name
    #[must_use]
    pub fn channels(&self) -> &BTreeMap<String, f32> {
        &self.channels
    }
}

impl AvatarRig for HeadlessRig {
    fn has_channel(&self, name: &str) -> bool {
        self.channels.contains_key(name)
    }

    fn channel_value(&self, name: &str) -> Option<f32> {
        self.channels.get(name).copied()
    }

    fn set_channel(&mut self, name: &str, value: f32) -> Result<(), EngineError> {
        let slot = self
            .channels
            .get_mut(name)
            .ok_or_else(|| EngineError::MissingChannel(name.to_string()))?;
        *slot = value;
        *self.writes.entry(name.to_string()).or_default() += 1;
        Ok(())
    }

    fn joint_rotation(&self, joint: &str) -> Option<Quat> {
        self.joints.get(joint).copied()
    }

    fn set_joint_rotation(&mut self, joint: &str, rotation: Quat) -> bool {
        match self.joints.get_mut(joint) {
            Some(slot) => {
                *slot = rotation;
                *self.writes.entry(joint.to_string()).or_default() += 1;
                true
            }
            None => false,
        }
    }
}

/// Loader returning a fresh [`HeadlessRig`]
#[derive(Clone, Debug)]
pub struct HeadlessAvatarLoader {
    rig: HeadlessRig,
}

impl HeadlessAvatarLoader {
    /// Loader handing out clones of `rig`
    #[must_use]
    pub fn new(rig: HeadlessRig) -> Self {
        Self { rig }
    }
}

impl Default for HeadlessAvatarLoader {
    fn default() -> Self {
        Self::new(HeadlessRig::standard())
    }
}

#[async_trait]
impl AvatarLoader for HeadlessAvatarLoader {
    async fn load_avatar(&self) -> Result<Box<dyn AvatarRig>, EngineError> {
        Ok(Box::new(self.rig.clone()))
    }
}

/// Surface that renders nothing and counts frames
#[derive(Debug)]
pub struct HeadlessSurface {
    available: bool,
    attached: bool,
    frames_rendered: u64,
    last_frame: Option<FrameOutput>,
}

impl HeadlessSurface {
    /// A surface that attaches successfully
    #[must_use]
    pub fn new() -> Self {
        Self {
            available: true,
            attached: false,
            frames_rendered: 0,
            last_frame: None,
        }
    }

    /// A surface whose container is missing
    #[must_use]
    pub fn unavailable() -> Self {
        Self {
            available: false,
            ..Self::new()
        }
    }

    /// Frames consumed since attach
    #[must_use]
    pub fn frames_rendered(&self) -> u64 {
        self.frames_rendered
    }

    /// The most recent frame
    #[must_use]
    pub fn last_frame(&self) -> Option<&FrameOutput> {
        self.last_frame.as_ref()
    }

    /// Whether the surface is currently bound
    #[must_use]
    pub fn is_attached(&self) -> bool {
        self.attached
    }
}

impl Default for HeadlessSurface {
    fn default() -> Self {
        Self::new()
    }
}

impl RenderSurface for HeadlessSurface {
    fn attach(&mut self) -> Result<(), EngineError> {
        if !self.available {
            return Err(EngineError::ContextUnavailable(
                "headless surface has no container".to_string(),
            ));
        }
        self.attached = true;
        self.frames_rendered = 0;
        Ok(())
    }

    fn render(&mut self, frame: &FrameOutput, _rig: &dyn AvatarRig) {
        if !self.attached {
            return;
        }
        self.frames_rendered += 1;
        trace!(
            frame = frame.index,
            actions = frame.actions.len(),
            "headless frame"
        );
        self.last_frame = Some(frame.clone());
    }

    fn release(&mut self) {
        self.attached = false;
        self.last_frame = None;
    }
}
