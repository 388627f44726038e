//! Animation Clips
//!
//! A [`Clip`] is the engine's view of a decoded animation asset: where it came
//! from, how long one cycle lasts, and opaque sample data the renderer knows
//! how to apply. Parsing the asset format itself is someone else's job and
//! sits behind [`ClipDecoder`].

pub mod sequence;

use std::time::Duration;

use async_trait::async_trait;

use crate::error::EngineError;

pub use sequence::{
    ClipPlan, Keyframe, KeyframeDescriptor, PlannedKeyframe, Sequence, SequenceBody,
    SequenceDescriptor,
};

/// A sampled, ready-to-play animation
#[derive(Clone, Debug, PartialEq)]
pub struct Clip {
    /// Clip reference the clip was loaded from
    pub source: String,
    /// Length of one cycle
    pub duration: Duration,
    /// Decoded sample data, opaque to the engine
    pub samples: Vec<u8>,
}

impl Clip {
    /// Clip without sample data
    pub fn new(source: impl Into<String>, duration: Duration) -> Self {
        Self {
            source: source.into(),
            duration,
            samples: Vec::new(),
        }
    }

    /// Attach decoded samples
    #[must_use]
    pub fn with_samples(mut self, samples: Vec<u8>) -> Self {
        self.samples = samples;
        self
    }
}

/// Fetches and decodes clip assets by reference
#[async_trait]
pub trait AssetLoader: Send + Sync {
    /// Load the clip at `clip_ref`
    ///
    /// # Errors
    ///
    /// Returns `EngineError::AssetLoad` on fetch or decode failure.
    async fn load_clip(&self, clip_ref: &str) -> Result<Clip, EngineError>;
}

/// Turns raw asset bytes into a [`Clip`]
pub trait ClipDecoder: Send + Sync {
    /// Decode `bytes` fetched from `source`
    ///
    /// # Errors
    ///
    /// Returns `EngineError::AssetLoad` if the bytes are not a valid clip.
    fn decode(&self, source: &str, bytes: &[u8]) -> Result<Clip, EngineError>;
}

/// Decoder that keeps the bytes and assigns every clip the same duration
///
/// Used by the headless player, which has no animation parser.
#[derive(Clone, Copy, Debug)]
pub struct NominalDecoder {
    duration: Duration,
}

impl NominalDecoder {
    /// Decoder reporting `duration` for every clip
    #[must_use]
    pub fn new(duration: Duration) -> Self {
        Self { duration }
    }
}

impl Default for NominalDecoder {
    fn default() -> Self {
        Self::new(Duration::from_secs(4))
    }
}

impl ClipDecoder for NominalDecoder {
    fn decode(&self, source: &str, bytes: &[u8]) -> Result<Clip, EngineError> {
        if bytes.is_empty() {
            return Err(EngineError::asset_load(source, "empty asset"));
        }
        Ok(Clip::new(source, self.duration).with_samples(bytes.to_vec()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_nominal_decoder() {
        let decoder = NominalDecoder::new(Duration::from_secs(2));
        let clip = decoder.decode("wave.vrma", b"glTF").unwrap();
        assert_eq!(clip.duration, Duration::from_secs(2));
        assert_eq!(clip.samples, b"glTF".to_vec());

        assert!(matches!(
            decoder.decode("empty.vrma", &[]),
            Err(EngineError::AssetLoad { .. })
        ));
    }
}
