//! In-memory and on-disk sources
//!
//! Used by the player when it runs against a directory of sequence files
//! instead of the animation service.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::RwLock;
use tracing::{debug, warn};

use super::{SequenceSource, SequenceSummary};
use crate::clip::{AssetLoader, Clip, ClipDecoder, SequenceDescriptor};
use crate::error::EngineError;

/// Sequence descriptors held in memory
#[derive(Debug, Default)]
pub struct StaticSequenceSource {
    sequences: RwLock<BTreeMap<String, SequenceDescriptor>>,
}

impl StaticSequenceSource {
    /// Empty source
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a descriptor (builder form)
    #[must_use]
    pub fn with_sequence(self, name: impl Into<String>, descriptor: SequenceDescriptor) -> Self {
        self.insert(name, descriptor);
        self
    }

    /// Add or replace a descriptor
    pub fn insert(&self, name: impl Into<String>, descriptor: SequenceDescriptor) {
        self.sequences.write().insert(name.into(), descriptor);
    }

    /// Number of descriptors
    #[must_use]
    pub fn len(&self) -> usize {
        self.sequences.read().len()
    }

    /// Whether the source holds no descriptors
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.sequences.read().is_empty()
    }

    /// Load every `*.json` descriptor in `dir`
    ///
    /// A descriptor is filed under its `sequence` field, or the file stem when
    /// that is absent. Files that fail to parse are logged and skipped.
    ///
    /// # Errors
    ///
    /// Returns `EngineError::AssetLoad` if the directory cannot be read.
    pub fn from_dir(dir: impl AsRef<Path>) -> Result<Self, EngineError> {
        let dir = dir.as_ref();
        let entries = std::fs::read_dir(dir)
            .map_err(|e| EngineError::asset_load(dir.display().to_string(), e))?;

        let source = Self::new();
        for entry in entries.flatten() {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            match read_descriptor(&path) {
                Ok(descriptor) => {
                    let name = descriptor.sequence.clone().or_else(|| {
                        path.file_stem()
                            .and_then(|s| s.to_str())
                            .map(ToString::to_string)
                    });
                    if let Some(name) = name {
                        debug!(sequence = %name, path = %path.display(), "Loaded sequence file");
                        source.insert(name, descriptor);
                    }
                }
                Err(e) => warn!(path = %path.display(), error = %e, "Skipping sequence file"),
            }
        }
        Ok(source)
    }
}

fn read_descriptor(path: &Path) -> Result<SequenceDescriptor, EngineError> {
    let resource = path.display().to_string();
    let text = std::fs::read_to_string(path).map_err(|e| EngineError::asset_load(&resource, e))?;
    serde_json::from_str(&text).map_err(|e| EngineError::asset_load(&resource, e))
}

#[async_trait]
impl SequenceSource for StaticSequenceSource {
    fn name(&self) -> &'static str {
        "static"
    }

    async fn fetch_descriptor(&self, name: &str) -> Result<SequenceDescriptor, EngineError> {
        self.sequences
            .read()
            .get(name)
            .cloned()
            .ok_or_else(|| EngineError::asset_load(name, "sequence not found"))
    }

    async fn list_sequences(&self) -> Result<Vec<SequenceSummary>, EngineError> {
        Ok(self
            .sequences
            .read()
            .iter()
            .map(|(name, descriptor)| SequenceSummary {
                sequence: name.clone(),
                description: descriptor.description.clone(),
            })
            .collect())
    }

    async fn health_check(&self) -> bool {
        true
    }
}

/// Reads clip assets relative to a directory
#[derive(Clone)]
pub struct DirAssetLoader {
    root: PathBuf,
    decoder: Arc<dyn ClipDecoder>,
}

impl std::fmt::Debug for DirAssetLoader {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DirAssetLoader")
            .field("root", &self.root)
            .finish_non_exhaustive()
    }
}

impl DirAssetLoader {
    /// Loader rooted at `root`
    pub fn new(root: impl Into<PathBuf>, decoder: Arc<dyn ClipDecoder>) -> Self {
        Self {
            root: root.into(),
            decoder,
        }
    }

    /// File a clip reference maps to; URLs map to their last path segment
    #[must_use]
    pub fn path_for(&self, clip_ref: &str) -> PathBuf {
        let relative = if clip_ref.contains("://") {
            clip_ref.rsplit('/').next().unwrap_or(clip_ref)
        } else {
            clip_ref
        };
        self.root.join(relative)
    }
}

#[async_trait]
impl AssetLoader for DirAssetLoader {
    async fn load_clip(&self, clip_ref: &str) -> Result<Clip, EngineError> {
        let path = self.path_for(clip_ref);
        let bytes = tokio::fs::read(&path)
            .await
            .map_err(|e| EngineError::asset_load(clip_ref, format!("{}: {e}", path.display())))?;
        self.decoder.decode(clip_ref, &bytes)
    }
}
