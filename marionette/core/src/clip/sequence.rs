//! Sequence descriptors and resolved sequences
//!
//! The animation service describes a named animation either as one clip
//! (`vrma_file`) or as a chain of keyframe clips, each held for `duration`
//! seconds and blended into the next over `crossfade` seconds. A keyframe
//! list, when present and non-empty, wins over `vrma_file`.

use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use super::Clip;
use crate::error::EngineError;

/// One entry of a keyframe chain, as served
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct KeyframeDescriptor {
    /// Clip reference
    pub vrma: String,
    /// Seconds the keyframe is held
    pub duration: f32,
    /// Seconds of blend into the next keyframe (engine default when absent)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub crossfade: Option<f32>,
}

/// Declarative plan for one named animation, as served by `GET /sequence/{name}`
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct SequenceDescriptor {
    /// Name the service files the sequence under
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sequence: Option<String>,
    /// Free-text description
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// Single clip reference
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub vrma_file: Option<String>,
    /// Keyframe chain
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub keyframes: Option<Vec<KeyframeDescriptor>>,
    /// Whether a single clip repeats
    #[serde(default, rename = "loop", skip_serializing_if = "Option::is_none")]
    pub looping: Option<bool>,
    /// Return to idle once played through
    #[serde(default)]
    pub temporary: bool,
    /// Whether breathing may run while this sequence is active
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub breathing: Option<bool>,
    /// Seconds to wait before the sequence takes over
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub delay: Option<f32>,
}

/// A validated keyframe, still unresolved
#[derive(Clone, Debug, PartialEq)]
pub struct PlannedKeyframe {
    /// Clip reference
    pub clip_ref: String,
    /// Hold time
    pub duration: Duration,
    /// Blend into the next keyframe
    pub crossfade: Option<Duration>,
}

/// Which clips a descriptor needs, in load order
#[derive(Clone, Debug, PartialEq)]
pub enum ClipPlan {
    /// One clip
    Single {
        /// Clip reference
        clip_ref: String,
    },
    /// A keyframe chain
    Chained {
        /// Keyframes in play order
        keyframes: Vec<PlannedKeyframe>,
    },
}

impl SequenceDescriptor {
    /// Single-clip descriptor
    pub fn single(clip_ref: impl Into<String>) -> Self {
        Self {
            vrma_file: Some(clip_ref.into()),
            ..Self::default()
        }
    }

    /// Keyframe-chain descriptor from `(clip_ref, duration_secs, crossfade_secs)`
    pub fn chained<I, S>(keyframes: I) -> Self
    where
        I: IntoIterator<Item = (S, f32, f32)>,
        S: Into<String>,
    {
        Self {
            keyframes: Some(
                keyframes
                    .into_iter()
                    .map(|(vrma, duration, crossfade)| KeyframeDescriptor {
                        vrma: vrma.into(),
                        duration,
                        crossfade: Some(crossfade),
                    })
                    .collect(),
            ),
            ..Self::default()
        }
    }

    /// Set the `loop` flag
    #[must_use]
    pub fn with_loop(mut self, looping: bool) -> Self {
        self.looping = Some(looping);
        self
    }

    /// Set the `temporary` flag
    #[must_use]
    pub fn with_temporary(mut self, temporary: bool) -> Self {
        self.temporary = temporary;
        self
    }

    /// Set the `breathing` flag
    #[must_use]
    pub fn with_breathing(mut self, breathing: bool) -> Self {
        self.breathing = Some(breathing);
        self
    }

    /// Set the start delay in seconds
    #[must_use]
    pub fn with_delay(mut self, delay: f32) -> Self {
        self.delay = Some(delay);
        self
    }

    /// Validate the descriptor and list the clips it needs
    ///
    /// # Errors
    ///
    /// Returns `EngineError::MalformedSequence` when there is neither a clip
    /// reference nor a keyframe list, or a keyframe has a non-positive
    /// duration or a negative crossfade.
    pub fn plan(&self, name: &str) -> Result<ClipPlan, EngineError> {
        if let Some(keyframes) = self.keyframes.as_ref().filter(|k| !k.is_empty()) {
            let keyframes = keyframes
                .iter()
                .enumerate()
                .map(|(index, keyframe)| plan_keyframe(name, index, keyframe))
                .collect::<Result<Vec<_>, _>>()?;
            return Ok(ClipPlan::Chained { keyframes });
        }

        match self.vrma_file.as_deref().map(str::trim) {
            Some(clip_ref) if !clip_ref.is_empty() => Ok(ClipPlan::Single {
                clip_ref: clip_ref.to_string(),
            }),
            _ => Err(EngineError::malformed(
                name,
                "no clip reference and no keyframes",
            )),
        }
    }
}

fn plan_keyframe(
    name: &str,
    index: usize,
    keyframe: &KeyframeDescriptor,
) -> Result<PlannedKeyframe, EngineError> {
    if keyframe.vrma.trim().is_empty() {
        return Err(EngineError::malformed(
            name,
            format!("keyframe {index} has no clip reference"),
        ));
    }
    let duration = Duration::try_from_secs_f32(keyframe.duration)
        .ok()
        .filter(|d| !d.is_zero())
        .ok_or_else(|| {
            EngineError::malformed(
                name,
                format!("keyframe {index} has invalid duration {}", keyframe.duration),
            )
        })?;
    let crossfade = keyframe
        .crossfade
        .map(|secs| {
            Duration::try_from_secs_f32(secs).map_err(|_| {
                EngineError::malformed(
                    name,
                    format!("keyframe {index} has invalid crossfade {secs}"),
                )
            })
        })
        .transpose()?;
    Ok(PlannedKeyframe {
        clip_ref: keyframe.vrma.trim().to_string(),
        duration,
        crossfade,
    })
}

impl ClipPlan {
    /// Clip references in load order (duplicates included)
    #[must_use]
    pub fn clip_refs(&self) -> Vec<&str> {
        match self {
            Self::Single { clip_ref } => vec![clip_ref.as_str()],
            Self::Chained { keyframes } => keyframes.iter().map(|k| k.clip_ref.as_str()).collect(),
        }
    }

    /// Combine with clips loaded in [`ClipPlan::clip_refs`] order
    ///
    /// # Errors
    ///
    /// Returns `EngineError::AssetLoad` if the clip count does not match.
    pub fn assemble(self, name: &str, clips: Vec<Arc<Clip>>) -> Result<SequenceBody, EngineError> {
        let expected = match &self {
            Self::Single { .. } => 1,
            Self::Chained { keyframes } => keyframes.len(),
        };
        if clips.len() != expected {
            return Err(EngineError::asset_load(
                name,
                format!("expected {expected} clips, got {}", clips.len()),
            ));
        }
        Ok(match self {
            Self::Single { .. } => {
                let mut clips = clips;
                match clips.pop() {
                    Some(clip) => SequenceBody::Single { clip },
                    None => return Err(EngineError::asset_load(name, "missing clip")),
                }
            }
            Self::Chained { keyframes } => SequenceBody::Chained {
                keyframes: keyframes
                    .into_iter()
                    .zip(clips)
                    .map(|(planned, clip)| Keyframe {
                        clip,
                        duration: planned.duration,
                        crossfade: planned.crossfade,
                    })
                    .collect(),
            },
        })
    }
}

/// A keyframe with its clip loaded
#[derive(Clone, Debug, PartialEq)]
pub struct Keyframe {
    /// The clip to play
    pub clip: Arc<Clip>,
    /// Hold time
    pub duration: Duration,
    /// Blend into the next keyframe (engine default when `None`)
    pub crossfade: Option<Duration>,
}

/// Resolved clips of a sequence
#[derive(Clone, Debug, PartialEq)]
pub enum SequenceBody {
    /// One clip
    Single {
        /// The clip
        clip: Arc<Clip>,
    },
    /// Keyframe chain (never empty)
    Chained {
        /// Keyframes in play order
        keyframes: Vec<Keyframe>,
    },
}

/// A descriptor with every clip it references loaded
#[derive(Clone, Debug, PartialEq)]
pub struct Sequence {
    /// Name the sequence was requested under
    pub name: String,
    /// The descriptor it was built from
    pub descriptor: Arc<SequenceDescriptor>,
    /// Loaded clips
    pub body: SequenceBody,
}

impl Sequence {
    /// Assemble a resolved sequence
    pub fn new(
        name: impl Into<String>,
        descriptor: Arc<SequenceDescriptor>,
        body: SequenceBody,
    ) -> Self {
        Self {
            name: name.into(),
            descriptor,
            body,
        }
    }

    /// Plays once and then hands back to idle
    #[must_use]
    pub fn is_one_shot(&self) -> bool {
        self.descriptor.temporary || self.descriptor.looping == Some(false)
    }

    /// Whether breathing may run while this sequence is active
    #[must_use]
    pub fn breathing_allowed(&self) -> bool {
        self.descriptor.breathing.unwrap_or(true)
    }

    /// Activation delay (zero when absent or invalid)
    #[must_use]
    pub fn start_delay(&self) -> Duration {
        self.descriptor
            .delay
            .and_then(|secs| Duration::try_from_secs_f32(secs).ok())
            .unwrap_or(Duration::ZERO)
    }

    /// The clip that plays first
    #[must_use]
    pub fn first_clip(&self) -> &Arc<Clip> {
        match &self.body {
            SequenceBody::Single { clip } => clip,
            SequenceBody::Chained { keyframes } => &keyframes[0].clip,
        }
    }

    /// Time until the sequence ends on its own (one cycle for single clips)
    #[must_use]
    pub fn natural_duration(&self) -> Duration {
        match &self.body {
            SequenceBody::Single { clip } => clip.duration,
            SequenceBody::Chained { keyframes } => keyframes.iter().map(|k| k.duration).sum(),
        }
    }
}
