//! Test Utilities
//!
//! Recording fakes for the engine's ports. They count every request so tests
//! can assert how often the network would have been hit, and can be told to
//! fail for specific names.
//!
//! # Usage
//!
//! ```ignore
//! use marionette_core::test_utils::fixture_ports;
//!
//! let (source, assets) = fixture_ports();
//! let cache = ClipCache::new(source.clone(), assets.clone());
//! cache.load("wave").await?;
//! assert_eq!(source.fetch_count("wave"), 1);
//! ```

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;

use crate::avatar::{AvatarLoader, AvatarRig};
use crate::clip::{AssetLoader, Clip, SequenceDescriptor};
use crate::error::EngineError;
use crate::source::{SequenceSource, SequenceSummary};

// ============================================================================
// Sequence Source
// ============================================================================

/// In-memory [`SequenceSource`] that records fetches
#[derive(Debug, Default)]
pub struct RecordingSequenceSource {
    descriptors: Mutex<HashMap<String, SequenceDescriptor>>,
    fetch_counts: Mutex<HashMap<String, usize>>,
    unavailable: Mutex<HashSet<String>>,
    yields: usize,
}

impl RecordingSequenceSource {
    /// Empty source
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a descriptor
    #[must_use]
    pub fn with_sequence(self, name: &str, descriptor: SequenceDescriptor) -> Self {
        self.descriptors.lock().insert(name.to_string(), descriptor);
        self
    }

    /// Yield to the runtime this many times inside every fetch
    #[must_use]
    pub fn with_yields(mut self, yields: usize) -> Self {
        self.yields = yields;
        self
    }

    /// Make fetches of `name` fail
    pub fn set_unavailable(&self, name: &str) {
        self.unavailable.lock().insert(name.to_string());
    }

    /// Make fetches of `name` succeed again
    pub fn set_available(&self, name: &str) {
        self.unavailable.lock().remove(name);
    }

    /// Fetches of `name` so far, failed ones included
    #[must_use]
    pub fn fetch_count(&self, name: &str) -> usize {
        self.fetch_counts.lock().get(name).copied().unwrap_or(0)
    }

    /// Fetches of any name so far
    #[must_use]
    pub fn total_fetches(&self) -> usize {
        self.fetch_counts.lock().values().sum()
    }
}

#[async_trait]
impl SequenceSource for RecordingSequenceSource {
    fn name(&self) -> &'static str {
        "recording"
    }

    async fn fetch_descriptor(&self, name: &str) -> Result<SequenceDescriptor, EngineError> {
        *self.fetch_counts.lock().entry(name.to_string()).or_default() += 1;
        for _ in 0..self.yields {
            tokio::task::yield_now().await;
        }
        if self.unavailable.lock().contains(name) {
            return Err(EngineError::asset_load(name, "HTTP 503 Service Unavailable"));
        }
        self.descriptors
            .lock()
            .get(name)
            .cloned()
            .ok_or_else(|| EngineError::asset_load(name, "HTTP 404 Not Found"))
    }

    async fn list_sequences(&self) -> Result<Vec<SequenceSummary>, EngineError> {
        let mut listing: Vec<SequenceSummary> = self
            .descriptors
            .lock()
            .iter()
            .map(|(name, d)| SequenceSummary {
                sequence: name.clone(),
                description: d.description.clone(),
            })
            .collect();
        listing.sort_by(|a, b| a.sequence.cmp(&b.sequence));
        Ok(listing)
    }

    async fn health_check(&self) -> bool {
        true
    }
}

// ============================================================================
// Asset Loader
// ============================================================================

/// [`AssetLoader`] producing empty clips with configured durations
#[derive(Debug)]
pub struct RecordingAssetLoader {
    durations: Mutex<HashMap<String, Duration>>,
    default_duration: Duration,
    load_counts: Mutex<HashMap<String, usize>>,
    failing: Mutex<HashSet<String>>,
    yields: usize,
}

impl RecordingAssetLoader {
    /// Loader giving unknown clips `default_duration`
    #[must_use]
    pub fn new(default_duration: Duration) -> Self {
        Self {
            durations: Mutex::new(HashMap::new()),
            default_duration,
            load_counts: Mutex::new(HashMap::new()),
            failing: Mutex::new(HashSet::new()),
            yields: 0,
        }
    }

    /// Give `clip_ref` a specific duration
    #[must_use]
    pub fn with_clip(self, clip_ref: &str, duration: Duration) -> Self {
        self.durations.lock().insert(clip_ref.to_string(), duration);
        self
    }

    /// Yield to the runtime this many times inside every load
    #[must_use]
    pub fn with_yields(mut self, yields: usize) -> Self {
        self.yields = yields;
        self
    }

    /// Make loads of `clip_ref` fail
    pub fn set_failing(&self, clip_ref: &str) {
        self.failing.lock().insert(clip_ref.to_string());
    }

    /// Loads of `clip_ref` so far
    #[must_use]
    pub fn load_count(&self, clip_ref: &str) -> usize {
        self.load_counts.lock().get(clip_ref).copied().unwrap_or(0)
    }

    /// Loads of any clip so far
    #[must_use]
    pub fn total_loads(&self) -> usize {
        self.load_counts.lock().values().sum()
    }
}

#[async_trait]
impl AssetLoader for RecordingAssetLoader {
    async fn load_clip(&self, clip_ref: &str) -> Result<Clip, EngineError> {
        *self.load_counts.lock().entry(clip_ref.to_string()).or_default() += 1;
        for _ in 0..self.yields {
            tokio::task::yield_now().await;
        }
        if self.failing.lock().contains(clip_ref) {
            return Err(EngineError::asset_load(clip_ref, "decode failed"));
        }
        let duration = self
            .durations
            .lock()
            .get(clip_ref)
            .copied()
            .unwrap_or(self.default_duration);
        Ok(Clip::new(clip_ref, duration))
    }
}

// ============================================================================
// Avatar Loader
// ============================================================================

/// [`AvatarLoader`] that always fails
#[derive(Clone, Debug)]
pub struct FailingAvatarLoader {
    reason: String,
}

impl FailingAvatarLoader {
    /// Loader failing with `reason`
    pub fn new(reason: impl Into<String>) -> Self {
        Self {
            reason: reason.into(),
        }
    }
}

#[async_trait]
impl AvatarLoader for FailingAvatarLoader {
    async fn load_avatar(&self) -> Result<Box<dyn AvatarRig>, EngineError> {
        Err(EngineError::asset_load("avatar model", &self.reason))
    }
}

// ============================================================================
// Fixture
// ============================================================================

/// Ports preloaded with a small catalogue
///
/// | name | shape | clip durations |
/// |---|---|---|
/// | `idle` | single, looping | 4.0 s |
/// | `idle_look` | single, looping | 3.0 s |
/// | `wave` | single, `loop: false` | 2.0 s |
/// | `talk` | single, looping, `breathing: false` | 5.0 s |
/// | `bow_later` | single, `temporary`, `delay: 0.5` | 1.5 s |
/// | `nod` | chain of two 1.0 s keyframes, 0.25 s crossfades, `temporary` | 1.0 s each |
/// | `pose_cycle` | chain of two 1.0 s keyframes, 0.25 s crossfades, looping | 1.0 s each |
/// | `broken` | neither `vrma_file` nor `keyframes` | |
#[must_use]
pub fn fixture_ports() -> (Arc<RecordingSequenceSource>, Arc<RecordingAssetLoader>) {
    let source = RecordingSequenceSource::new()
        .with_sequence("idle", SequenceDescriptor::single("animations/idle.vrma"))
        .with_sequence(
            "idle_look",
            SequenceDescriptor::single("animations/idle_look.vrma"),
        )
        .with_sequence(
            "wave",
            SequenceDescriptor::single("animations/wave.vrma").with_loop(false),
        )
        .with_sequence(
            "talk",
            SequenceDescriptor::single("animations/talk.vrma").with_breathing(false),
        )
        .with_sequence(
            "bow_later",
            SequenceDescriptor::single("animations/bow.vrma")
                .with_temporary(true)
                .with_delay(0.5),
        )
        .with_sequence(
            "nod",
            SequenceDescriptor::chained([
                ("poses/nod_a.vrma", 1.0, 0.25),
                ("poses/nod_b.vrma", 1.0, 0.25),
            ])
            .with_temporary(true),
        )
        .with_sequence(
            "pose_cycle",
            SequenceDescriptor::chained([
                ("poses/pose_a.vrma", 1.0, 0.25),
                ("poses/pose_b.vrma", 1.0, 0.25),
            ]),
        )
        .with_sequence("broken", SequenceDescriptor::default());

    let assets = RecordingAssetLoader::new(Duration::from_secs(1))
        .with_clip("animations/idle.vrma", Duration::from_secs(4))
        .with_clip("animations/idle_look.vrma", Duration::from_secs(3))
        .with_clip("animations/wave.vrma", Duration::from_secs(2))
        .with_clip("animations/talk.vrma", Duration::from_secs(5))
        .with_clip("animations/bow.vrma", Duration::from_millis(1500));

    (Arc::new(source), Arc::new(assets))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_recording_source_counts() {
        let (source, _) = fixture_ports();
        assert!(source.fetch_descriptor("wave").await.is_ok());
        assert!(source.fetch_descriptor("missing").await.is_err());
        source.set_unavailable("wave");
        assert!(source.fetch_descriptor("wave").await.is_err());
        assert_eq!(source.fetch_count("wave"), 2);
        assert_eq!(source.total_fetches(), 3);
    }

    #[tokio::test]
    async fn test_recording_loader_durations() {
        let (_, assets) = fixture_ports();
        let clip = assets.load_clip("animations/wave.vrma").await.unwrap();
        assert_eq!(clip.duration, Duration::from_secs(2));
        let clip = assets.load_clip("poses/nod_a.vrma").await.unwrap();
        assert_eq!(clip.duration, Duration::from_secs(1));
        assert_eq!(assets.total_loads(), 2);
    }
}
