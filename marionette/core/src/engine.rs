//! Engine Facade
//!
//! The public surface a host talks to. The engine owns the render surface,
//! the loaded avatar rig, the clip cache and the frame driver; the host owns
//! the presentation loop and calls [`Engine::tick`] once per frame.
//!
//! # Lifecycle
//!
//! ```text
//!   new ──▶ Loading ──initialize()──▶ Ready ──cleanup()──▶ Loading
//!               │                       ▲
//!               └──── failure ──▶ Error ┘ (initialize() again to retry)
//! ```
//!
//! Status changes are published on a `tokio::sync::watch` channel so UI code
//! can follow progress without polling.

use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tokio::sync::watch;
use tracing::{debug, error, info, trace, warn};

use crate::avatar::{AvatarLoader, AvatarRig, RenderSurface};
use crate::breathing::{BreathingConfig, BreathingPatch};
use crate::cache::ClipCache;
use crate::clip::{AssetLoader, NominalDecoder, Sequence};
use crate::config::EngineConfig;
use crate::error::EngineError;
use crate::feed::FeedMessage;
use crate::frame::{FrameDriver, FrameOutput};
use crate::playback::PlaybackState;
use crate::source::{HttpAssetLoader, HttpSequenceSource, SequenceSource};
use crate::timeline::{ExpressionEvent, VisemaEvent};

/// High-level engine lifecycle
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Lifecycle {
    /// Not initialized yet, or initialization in progress
    Loading,
    /// Rendering and accepting requests
    Ready,
    /// Initialization failed; see `last_error`
    Error,
}

/// Observable engine state
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct EngineStatus {
    /// Current lifecycle stage
    pub lifecycle: Lifecycle,
    /// Initialization progress in [0, 1]
    pub progress: f32,
    /// Most recent error message
    pub last_error: Option<String>,
    /// Sequence owning the body
    pub active_animation: Option<String>,
}

impl Default for EngineStatus {
    fn default() -> Self {
        Self {
            lifecycle: Lifecycle::Loading,
            progress: 0.0,
            last_error: None,
            active_animation: None,
        }
    }
}

/// The collaborators an engine is wired to
pub struct EnginePorts {
    /// Where sequence descriptors come from
    pub source: Arc<dyn SequenceSource>,
    /// Where clip assets come from
    pub assets: Arc<dyn AssetLoader>,
    /// Loads the avatar model
    pub avatar_loader: Arc<dyn AvatarLoader>,
    /// The render context
    pub surface: Box<dyn RenderSurface>,
}

impl EnginePorts {
    /// Ports talking to the animation service over HTTP
    ///
    /// Clip assets are decoded by a [`NominalDecoder`]; hosts with a real
    /// asset parser replace `assets` afterwards.
    ///
    /// # Errors
    ///
    /// Returns `EngineError::Config` if the service URL is invalid.
    pub fn http(
        config: &EngineConfig,
        avatar_loader: Arc<dyn AvatarLoader>,
        surface: Box<dyn RenderSurface>,
    ) -> Result<Self, EngineError> {
        Ok(Self {
            source: Arc::new(HttpSequenceSource::new(&config.service)?),
            assets: Arc::new(HttpAssetLoader::new(
                &config.service,
                Arc::new(NominalDecoder::default()),
            )?),
            avatar_loader,
            surface,
        })
    }
}

fn crossfade_from_secs(secs: Option<f32>) -> Option<Duration> {
    let secs = secs?;
    match Duration::try_from_secs_f32(secs) {
        Ok(duration) => Some(duration),
        Err(_) => {
            warn!(crossfade = secs, "Invalid crossfade; using the default");
            None
        }
    }
}

/// Animation and expression synchronization engine for one avatar
pub struct Engine {
    config: EngineConfig,
    cache: ClipCache,
    avatar_loader: Arc<dyn AvatarLoader>,
    surface: Box<dyn RenderSurface>,
    surface_attached: bool,
    rig: Option<Box<dyn AvatarRig>>,
    driver: FrameDriver,
    status_tx: watch::Sender<EngineStatus>,
}

impl std::fmt::Debug for Engine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Engine")
            .field("cache", &self.cache)
            .field("surface_attached", &self.surface_attached)
            .field("rig_loaded", &self.rig.is_some())
            .field("status", &*self.status_tx.borrow())
            .finish()
    }
}

impl Engine {
    /// Create an engine; nothing is loaded until [`Engine::initialize`]
    ///
    /// # Errors
    ///
    /// Returns `EngineError::Config` if the configuration does not validate.
    pub fn new(config: EngineConfig, ports: EnginePorts) -> Result<Self, EngineError> {
        config.validate()?;
        let (status_tx, _) = watch::channel(EngineStatus::default());
        Ok(Self {
            cache: ClipCache::new(ports.source, ports.assets),
            avatar_loader: ports.avatar_loader,
            surface: ports.surface,
            surface_attached: false,
            rig: None,
            driver: FrameDriver::new(&config),
            config,
            status_tx,
        })
    }

    // ========================================================================
    // Lifecycle
    // ========================================================================

    /// Attach the render surface, load the avatar and start idle rotation
    ///
    /// Idle sequences that fail to load are logged and left out of the pool.
    /// Calling this again after a failure (or after [`Engine::cleanup`])
    /// retries from scratch.
    ///
    /// # Errors
    ///
    /// `EngineError::ContextUnavailable` if the surface cannot attach and
    /// `EngineError::AssetLoad` if the avatar model fails to load. Either way
    /// the status moves to [`Lifecycle::Error`].
    pub async fn initialize(&mut self) -> Result<(), EngineError> {
        if self.rig.is_some() || self.surface_attached {
            self.cleanup();
        }
        self.update_status(|s| {
            s.lifecycle = Lifecycle::Loading;
            s.progress = 0.0;
        });

        if let Err(e) = self.surface.attach() {
            return Err(self.fail(e));
        }
        self.surface_attached = true;
        self.set_progress(0.2);

        let rig = match self.avatar_loader.load_avatar().await {
            Ok(rig) => rig,
            Err(e) => {
                self.surface.release();
                self.surface_attached = false;
                return Err(self.fail(e));
            }
        };
        self.rig = Some(rig);
        self.set_progress(0.5);

        let names = self.config.idle.clips.clone();
        let results = self.cache.preload(&names).await;
        let total = results.len().max(1) as f32;
        for (done, (name, result)) in results.into_iter().enumerate() {
            match result {
                Ok(sequence) => self.driver.add_idle(sequence),
                Err(e) => warn!(sequence = %name, error = %e, "Idle sequence unavailable"),
            }
            self.set_progress(0.5 + 0.5 * (done + 1) as f32 / total);
        }

        let pool = self.driver.controller().idle().pool_len();
        if pool == 0 {
            warn!("No idle sequence could be loaded; the avatar will hold its pose");
        }
        self.driver.start_idle();
        self.publish_active();

        self.update_status(|s| {
            s.lifecycle = Lifecycle::Ready;
            s.progress = 1.0;
            s.last_error = None;
        });
        info!(idle_pool = pool, "Engine ready");
        Ok(())
    }

    /// Cancel all timers, release render resources and clear caches
    ///
    /// Safe to call at any time, any number of times.
    pub fn cleanup(&mut self) {
        if let Some(rig) = self.rig.as_deref_mut() {
            self.driver.rest_pose(rig);
        }
        self.driver.reset();
        if self.surface_attached {
            self.surface.release();
            self.surface_attached = false;
        }
        self.rig = None;
        self.cache.clear();
        self.update_status(|s| {
            s.lifecycle = Lifecycle::Loading;
            s.progress = 0.0;
            s.active_animation = None;
        });
        debug!("Engine cleaned up");
    }

    fn fail(&self, e: EngineError) -> EngineError {
        error!(error = %e, "Engine initialization failed");
        let message = e.to_string();
        self.update_status(|s| {
            s.lifecycle = Lifecycle::Error;
            s.last_error = Some(message);
        });
        e
    }

    fn update_status(&self, f: impl FnOnce(&mut EngineStatus)) {
        self.status_tx.send_modify(f);
    }

    fn set_progress(&self, progress: f32) {
        self.update_status(|s| s.progress = progress.clamp(0.0, 1.0));
    }

    fn record_error(&self, message: String) {
        self.update_status(|s| s.last_error = Some(message));
    }

    fn publish_active(&self) {
        let active = self.driver.controller().state().active_name().map(String::from);
        self.status_tx.send_if_modified(|s| {
            if s.active_animation == active {
                return false;
            }
            s.active_animation = active;
            true
        });
    }

    // ========================================================================
    // Requests
    // ========================================================================

    /// Play a named sequence, logging any failure
    ///
    /// Returns whether the sequence was handed to the playback controller.
    /// On failure the playback state is left untouched.
    pub async fn play_animation(&mut self, name: &str, crossfade: Option<f32>) -> bool {
        match self.try_play_animation(name, crossfade).await {
            Ok(()) => true,
            Err(e) => {
                warn!(sequence = %name, error = %e, "Animation not played");
                self.record_error(e.to_string());
                false
            }
        }
    }

    /// Play a named sequence, returning the failure
    ///
    /// `crossfade` is in seconds; `None` (or an invalid value) uses the
    /// configured default.
    ///
    /// # Errors
    ///
    /// `EngineError::NotReady` before initialization, otherwise whatever
    /// resolving the sequence failed with.
    pub async fn try_play_animation(
        &mut self,
        name: &str,
        crossfade: Option<f32>,
    ) -> Result<(), EngineError> {
        if self.rig.is_none() {
            return Err(EngineError::NotReady);
        }
        let sequence = self.cache.load(name).await?;
        self.apply_prepared(sequence, crossfade)
    }

    /// Handle to the clip cache for loading sequences off the frame loop
    ///
    /// Pair with [`Engine::apply_prepared`] to play the result.
    #[must_use]
    pub fn loader(&self) -> ClipCache {
        self.cache.clone()
    }

    /// Play a sequence that was already resolved
    ///
    /// # Errors
    ///
    /// Returns `EngineError::NotReady` before initialization.
    pub fn apply_prepared(
        &mut self,
        sequence: Arc<Sequence>,
        crossfade: Option<f32>,
    ) -> Result<(), EngineError> {
        if self.rig.is_none() {
            return Err(EngineError::NotReady);
        }
        self.driver.play(sequence, crossfade_from_secs(crossfade));
        self.publish_active();
        Ok(())
    }

    /// Play the outcome of a load started through [`Engine::loader`]
    ///
    /// Failures are logged and recorded in the status the same way
    /// [`Engine::play_animation`] does, leaving playback untouched.
    pub fn play_loaded(
        &mut self,
        name: &str,
        loaded: Result<Arc<Sequence>, EngineError>,
        crossfade: Option<f32>,
    ) -> bool {
        match loaded.and_then(|sequence| self.apply_prepared(sequence, crossfade)) {
            Ok(()) => true,
            Err(e) => {
                warn!(sequence = %name, error = %e, "Animation not played");
                self.record_error(e.to_string());
                false
            }
        }
    }

    /// Replace the expression queue
    pub fn play_expressions(&mut self, events: Vec<ExpressionEvent>) {
        let Some(rig) = self.rig.as_deref_mut() else {
            warn!(cues = events.len(), "Expressions dropped: engine not ready");
            return;
        };
        self.driver.play_expressions(events, rig);
    }

    /// Start a lip-sync run, superseding the previous one
    pub fn play_visemas(&mut self, events: Vec<VisemaEvent>) {
        let Some(rig) = self.rig.as_deref_mut() else {
            warn!(cues = events.len(), "Visemes dropped: engine not ready");
            return;
        };
        self.driver.play_visemas(events, rig);
    }

    /// Merge a partial breathing update and return the result
    pub fn set_breathing_config(&mut self, patch: BreathingPatch) -> BreathingConfig {
        self.driver.set_breathing(patch)
    }

    /// Route one upstream message
    ///
    /// Animation messages are resolved and played before this returns; see
    /// [`Engine::accept`] to keep resolution off the caller's frame loop.
    pub async fn dispatch(&mut self, message: FeedMessage) {
        if let Some(name) = self.accept(message) {
            self.play_animation(&name, None).await;
        }
    }

    /// Apply an upstream message without waiting on I/O
    ///
    /// Cue batches and errors take effect immediately. An animation message
    /// only registers its descriptor and hands the sequence name back; the
    /// caller resolves it through [`Engine::loader`] and finishes with
    /// [`Engine::play_loaded`].
    pub fn accept(&mut self, message: FeedMessage) -> Option<String> {
        trace!(kind = message.kind(), "Feed message");
        match message {
            FeedMessage::Keepalive => None,
            FeedMessage::Visemas {
                events, message_id, ..
            } => {
                debug!(message_id = ?message_id, cues = events.len(), "Visemes received");
                self.play_visemas(events);
                None
            }
            FeedMessage::Expressions { events, message_id } => {
                debug!(message_id = ?message_id, cues = events.len(), "Expressions received");
                self.play_expressions(events);
                None
            }
            FeedMessage::Animation {
                name,
                descriptor,
                message_id,
            } => {
                debug!(sequence = %name, message_id = ?message_id, "Animation received");
                self.cache.insert_descriptor(&name, descriptor);
                Some(name)
            }
            FeedMessage::Error { message } => {
                warn!(error = %message, "Upstream pipeline reported an error");
                self.record_error(message);
                None
            }
        }
    }

    // ========================================================================
    // Frame loop
    // ========================================================================

    /// Advance one frame and hand it to the render surface
    ///
    /// # Errors
    ///
    /// Returns `EngineError::NotReady` before initialization.
    pub fn tick(&mut self, delta: Duration) -> Result<FrameOutput, EngineError> {
        let Some(rig) = self.rig.as_deref_mut() else {
            return Err(EngineError::NotReady);
        };
        let frame = self.driver.tick(delta, rig);
        self.surface.render(&frame, rig);
        self.publish_active();
        Ok(frame)
    }

    // ========================================================================
    // Observation
    // ========================================================================

    /// Snapshot of the current status
    #[must_use]
    pub fn status(&self) -> EngineStatus {
        self.status_tx.borrow().clone()
    }

    /// Receiver notified on every status change
    #[must_use]
    pub fn subscribe(&self) -> watch::Receiver<EngineStatus> {
        self.status_tx.subscribe()
    }

    /// Read-only playback state
    #[must_use]
    pub fn playback(&self) -> &PlaybackState {
        self.driver.controller().state()
    }

    /// The frame driver (read-only)
    #[must_use]
    pub fn driver(&self) -> &FrameDriver {
        &self.driver
    }

    /// The loaded avatar rig
    #[must_use]
    pub fn rig(&self) -> Option<&dyn AvatarRig> {
        self.rig.as_deref()
    }

    /// Current engine time
    #[must_use]
    pub fn now(&self) -> Duration {
        self.driver.now()
    }

    /// Effective configuration
    #[must_use]
    pub fn config(&self) -> &EngineConfig {
        &self.config
    }
}

impl Drop for Engine {
    fn drop(&mut self) {
        if self.rig.is_some() || self.surface_attached {
            self.cleanup();
        }
    }
}
