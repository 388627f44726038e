//! Engine Error Types
//!
//! One taxonomy for everything the engine can report. Per-event failures
//! (a missing channel, a malformed cue) are logged where they happen and never
//! abort the surrounding queue; initialization failures are surfaced to the
//! caller and mirrored in the engine status.

use thiserror::Error;

use crate::config::ConfigError;

/// Errors produced by the synchronization engine and its ports
#[derive(Debug, Error)]
pub enum EngineError {
    /// No render container/context to draw into (fatal at init)
    #[error("Render context unavailable: {0}")]
    ContextUnavailable(String),

    /// Network or decode failure while loading a model, clip, or sequence
    #[error("Failed to load {resource}: {reason}")]
    AssetLoad {
        /// The sequence name, clip reference, or model that failed
        resource: String,
        /// Human-readable cause
        reason: String,
    },

    /// Descriptor has neither a single clip reference nor keyframe data
    #[error("Sequence '{name}' is malformed: {reason}")]
    MalformedSequence {
        /// Sequence name as requested
        name: String,
        /// What was wrong with the descriptor
        reason: String,
    },

    /// A named expression/viseme channel is absent on the loaded avatar
    #[error("Avatar has no channel named '{0}'")]
    MissingChannel(String),

    /// Operation requires an initialized engine
    #[error("Engine is not ready")]
    NotReady,

    /// Invalid configuration
    #[error(transparent)]
    Config(#[from] ConfigError),
}

impl EngineError {
    /// Build an [`EngineError::AssetLoad`] from any displayable cause
    pub fn asset_load(resource: impl Into<String>, reason: impl std::fmt::Display) -> Self {
        Self::AssetLoad {
            resource: resource.into(),
            reason: reason.to_string(),
        }
    }

    /// Build an [`EngineError::MalformedSequence`]
    pub fn malformed(name: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::MalformedSequence {
            name: name.into(),
            reason: reason.into(),
        }
    }

    /// Whether the error only affects a single request (the engine keeps running)
    #[must_use]
    pub fn is_recoverable(&self) -> bool {
        !matches!(self, Self::ContextUnavailable(_) | Self::Config(_))
    }
}
