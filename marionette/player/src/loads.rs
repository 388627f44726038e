//! Sequence loads beside the frame loop
//!
//! Resolving a sequence can mean a descriptor fetch plus several clip
//! downloads. A worker task resolves requested names one at a time, in
//! request order, and hands each outcome back over a channel the frame loop
//! selects on alongside its frame timer.

use std::sync::Arc;

use marionette_core::{ClipCache, EngineError, Sequence};
use tokio::sync::mpsc;
use tracing::{debug, trace};

/// A finished load: the requested name and its outcome
pub type Resolved = (String, Result<Arc<Sequence>, EngineError>);

/// Handle to the load worker
pub struct SequenceLoads {
    requests: mpsc::UnboundedSender<String>,
    ready: mpsc::UnboundedReceiver<Resolved>,
    pending: usize,
}

impl SequenceLoads {
    /// Start the worker on the current runtime
    pub fn spawn(loader: ClipCache) -> Self {
        let (requests, mut inbox) = mpsc::unbounded_channel::<String>();
        let (done, ready) = mpsc::unbounded_channel();

        tokio::spawn(async move {
            while let Some(name) = inbox.recv().await {
                trace!(sequence = %name, "Resolving sequence");
                let outcome = loader.load(&name).await;
                if done.send((name, outcome)).is_err() {
                    break;
                }
            }
            debug!("Sequence load worker stopped");
        });

        Self {
            requests,
            ready,
            pending: 0,
        }
    }

    /// Queue `name` for resolution
    pub fn request(&mut self, name: impl Into<String>) {
        let name = name.into();
        debug!(sequence = %name, "Sequence load queued");
        if self.requests.send(name).is_ok() {
            self.pending += 1;
        }
    }

    /// Loads requested but not yet handed back
    pub fn pending(&self) -> usize {
        self.pending
    }

    /// Next finished load; pends while nothing is outstanding
    pub async fn next_ready(&mut self) -> Option<Resolved> {
        let resolved = self.ready.recv().await?;
        self.pending = self.pending.saturating_sub(1);
        Some(resolved)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    use marionette_core::test_utils::{RecordingAssetLoader, RecordingSequenceSource};
    use marionette_core::{
        Engine, EngineConfig, EnginePorts, HeadlessAvatarLoader, HeadlessRig, HeadlessSurface,
        SequenceDescriptor,
    };

    const STEP: Duration = Duration::from_millis(16);

    async fn slow_engine(yields: usize) -> Engine {
        let source = RecordingSequenceSource::new()
            .with_sequence("idle", SequenceDescriptor::single("animations/idle.vrma"))
            .with_sequence(
                "wave",
                SequenceDescriptor::single("animations/wave.vrma").with_loop(false),
            )
            .with_sequence("nod", SequenceDescriptor::single("animations/nod.vrma"))
            .with_yields(yields);
        let assets = RecordingAssetLoader::new(Duration::from_secs(1)).with_yields(yields);
        let mut config = EngineConfig::default();
        config.idle.clips = vec!["idle".into()];
        let ports = EnginePorts {
            source: Arc::new(source),
            assets: Arc::new(assets),
            avatar_loader: Arc::new(HeadlessAvatarLoader::new(HeadlessRig::standard())),
            surface: Box::new(HeadlessSurface::new()),
        };
        let mut engine = Engine::new(config, ports).unwrap();
        engine.initialize().await.unwrap();
        engine
    }

    #[tokio::test]
    async fn test_frames_advance_while_a_sequence_loads() {
        let mut engine = slow_engine(25).await;
        let mut loads = SequenceLoads::spawn(engine.loader());
        loads.request("wave");
        assert_eq!(loads.pending(), 1);

        let first = engine.tick(STEP).unwrap().index;
        let mut frames_while_loading = 0;
        let (name, loaded) = loop {
            tokio::select! {
                biased;
                Some(resolved) = loads.next_ready() => break resolved,
                () = tokio::task::yield_now() => {
                    engine.tick(STEP).unwrap();
                    frames_while_loading += 1;
                    assert_eq!(engine.playback().active_name(), Some("idle"));
                }
            }
        };

        assert!(frames_while_loading >= 5, "{frames_while_loading} frames");
        assert_eq!(engine.driver().frame_index(), first + frames_while_loading);
        assert_eq!(loads.pending(), 0);
        assert!(engine.play_loaded(&name, loaded, None));
        assert_eq!(engine.playback().active_name(), Some("wave"));
    }

    #[tokio::test]
    async fn test_requests_resolve_in_order() {
        let engine = slow_engine(3).await;
        let mut loads = SequenceLoads::spawn(engine.loader());
        for name in ["nod", "missing", "wave"] {
            loads.request(name);
        }

        let mut order = Vec::new();
        while loads.pending() > 0 {
            let (name, loaded) = loads.next_ready().await.unwrap();
            order.push((name, loaded.is_ok()));
        }
        assert_eq!(
            order,
            vec![
                ("nod".to_string(), true),
                ("missing".to_string(), false),
                ("wave".to_string(), true),
            ]
        );
    }
}
