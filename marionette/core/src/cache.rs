//! Clip Cache
//!
//! Fetch-once storage for everything the engine pulls from the animation
//! service:
//!
//! - **Clips** keyed by clip reference
//! - **Descriptors** keyed by sequence name
//! - **Sequences** (descriptor plus loaded clips) keyed by sequence name
//!
//! # In-flight Guard
//!
//! Each key owns a `tokio::sync::OnceCell`. Concurrent callers for the same
//! key all await the one fetch that got there first; nobody fetches twice.
//! A failed fetch leaves the cell empty, so a later call retries.
//!
//! The maps themselves sit behind `parking_lot` mutexes that are only held
//! long enough to find or create a cell, never across an await.
//!
//! [`ClipCache`] is cheap to clone; clones share the same storage, so a host
//! can resolve sequences on a spawned task while the engine keeps ticking.

use std::collections::HashMap;
use std::sync::Arc;

use futures::future::{join_all, try_join_all};
use parking_lot::Mutex;
use tokio::sync::OnceCell;
use tracing::{debug, info};

use crate::clip::{AssetLoader, Clip, Sequence, SequenceDescriptor};
use crate::error::EngineError;
use crate::source::{SequenceSource, SequenceSummary};

type Slot<T> = Arc<OnceCell<Arc<T>>>;
type SlotMap<T> = Mutex<HashMap<String, Slot<T>>>;

/// Find or create the cell for `key`
fn slot<T>(map: &SlotMap<T>, key: &str) -> Slot<T> {
    map.lock().entry(key.to_string()).or_default().clone()
}

/// Value of `key` if it has been loaded
fn loaded<T>(map: &SlotMap<T>, key: &str) -> Option<Arc<T>> {
    map.lock().get(key).and_then(|cell| cell.get().cloned())
}

fn loaded_count<T>(map: &SlotMap<T>) -> usize {
    map.lock().values().filter(|cell| cell.initialized()).count()
}

struct CacheInner {
    source: Arc<dyn SequenceSource>,
    assets: Arc<dyn AssetLoader>,
    clips: SlotMap<Clip>,
    descriptors: SlotMap<SequenceDescriptor>,
    sequences: SlotMap<Sequence>,
}

/// Shared fetch-once cache of clips and sequences
#[derive(Clone)]
pub struct ClipCache {
    inner: Arc<CacheInner>,
}

impl std::fmt::Debug for ClipCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClipCache")
            .field("source", &self.inner.source.name())
            .field("clips", &self.clip_count())
            .field("sequences", &self.sequence_count())
            .finish()
    }
}

impl ClipCache {
    /// Create an empty cache over the given ports
    pub fn new(source: Arc<dyn SequenceSource>, assets: Arc<dyn AssetLoader>) -> Self {
        Self {
            inner: Arc::new(CacheInner {
                source,
                assets,
                clips: Mutex::new(HashMap::new()),
                descriptors: Mutex::new(HashMap::new()),
                sequences: Mutex::new(HashMap::new()),
            }),
        }
    }

    /// Load a clip by reference, fetching it at most once
    ///
    /// # Errors
    ///
    /// Returns `EngineError::AssetLoad` if the fetch or decode fails.
    pub async fn get_or_load(&self, clip_ref: &str) -> Result<Arc<Clip>, EngineError> {
        let cell = slot(&self.inner.clips, clip_ref);
        cell.get_or_try_init(|| async {
            debug!(clip = clip_ref, "Fetching clip");
            self.inner.assets.load_clip(clip_ref).await.map(Arc::new)
        })
        .await
        .cloned()
    }

    /// Get a sequence descriptor by name, fetching it at most once
    ///
    /// # Errors
    ///
    /// Returns `EngineError::AssetLoad` if the source cannot supply it.
    pub async fn get_sequence(&self, name: &str) -> Result<Arc<SequenceDescriptor>, EngineError> {
        let cell = slot(&self.inner.descriptors, name);
        cell.get_or_try_init(|| async {
            debug!(sequence = name, source = self.inner.source.name(), "Fetching descriptor");
            self.inner.source.fetch_descriptor(name).await.map(Arc::new)
        })
        .await
        .cloned()
    }

    /// Resolve a sequence: its descriptor and every clip it references
    ///
    /// Keyframe clips are fetched concurrently.
    ///
    /// # Errors
    ///
    /// Returns `EngineError::MalformedSequence` for an unusable descriptor and
    /// `EngineError::AssetLoad` for any failed fetch.
    pub async fn load(&self, name: &str) -> Result<Arc<Sequence>, EngineError> {
        let cell = slot(&self.inner.sequences, name);
        cell.get_or_try_init(|| self.resolve(name)).await.cloned()
    }

    async fn resolve(&self, name: &str) -> Result<Arc<Sequence>, EngineError> {
        let descriptor = self.get_sequence(name).await?;
        let plan = descriptor.plan(name)?;
        let clip_refs: Vec<String> = plan.clip_refs().into_iter().map(String::from).collect();
        let clips = try_join_all(clip_refs.iter().map(|r| self.get_or_load(r))).await?;
        let body = plan.assemble(name, clips)?;
        info!(sequence = name, clips = clip_refs.len(), "Sequence ready");
        Ok(Arc::new(Sequence::new(name, descriptor, body)))
    }

    /// Resolve several sequences concurrently, keeping per-name results
    pub async fn preload(&self, names: &[String]) -> Vec<(String, Result<Arc<Sequence>, EngineError>)> {
        let results = join_all(names.iter().map(|name| self.load(name))).await;
        names.iter().cloned().zip(results).collect()
    }

    /// Accept a descriptor pushed from outside (e.g. the event feed)
    ///
    /// Returns `false` and keeps the existing entry if the name is already
    /// cached or being fetched.
    pub fn insert_descriptor(&self, name: &str, descriptor: SequenceDescriptor) -> bool {
        let cell = slot(&self.inner.descriptors, name);
        let inserted = cell.set(Arc::new(descriptor)).is_ok();
        if inserted {
            debug!(sequence = name, "Descriptor inserted");
        }
        inserted
    }

    /// A resolved sequence, without fetching
    #[must_use]
    pub fn peek(&self, name: &str) -> Option<Arc<Sequence>> {
        loaded(&self.inner.sequences, name)
    }

    /// A loaded clip, without fetching
    #[must_use]
    pub fn peek_clip(&self, clip_ref: &str) -> Option<Arc<Clip>> {
        loaded(&self.inner.clips, clip_ref)
    }

    /// Names the source can serve
    ///
    /// # Errors
    ///
    /// Returns `EngineError::AssetLoad` if the listing cannot be fetched.
    pub async fn list_sequences(&self) -> Result<Vec<SequenceSummary>, EngineError> {
        self.inner.source.list_sequences().await
    }

    /// Whether the sequence source is reachable
    pub async fn source_healthy(&self) -> bool {
        self.inner.source.health_check().await
    }

    /// Number of loaded clips
    #[must_use]
    pub fn clip_count(&self) -> usize {
        loaded_count(&self.inner.clips)
    }

    /// Number of resolved sequences
    #[must_use]
    pub fn sequence_count(&self) -> usize {
        loaded_count(&self.inner.sequences)
    }

    /// Drop every entry
    pub fn clear(&self) {
        self.inner.clips.lock().clear();
        self.inner.descriptors.lock().clear();
        self.inner.sequences.lock().clear();
        debug!("Clip cache cleared");
    }
}
