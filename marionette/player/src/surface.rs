//! Render surface writing one JSON document per frame

use std::io::Write;

use marionette_core::{AvatarRig, EngineError, FrameOutput, RenderSurface};
use serde_json::json;
use tracing::warn;

/// Streams frames as JSON lines, including the channel weights that moved
pub struct JsonLinesSurface<W> {
    out: W,
    channels: Vec<String>,
    every: u64,
    attached: bool,
    failed: bool,
}

impl<W: Write + Send> JsonLinesSurface<W> {
    /// Surface writing every `every`-th frame to `out`
    pub fn new(out: W, channels: Vec<String>, every: u64) -> Self {
        Self {
            out,
            channels,
            every: every.max(1),
            attached: false,
            failed: false,
        }
    }

    #[cfg(test)]
    fn into_inner(self) -> W {
        self.out
    }
}

impl<W: Write + Send> RenderSurface for JsonLinesSurface<W> {
    fn attach(&mut self) -> Result<(), EngineError> {
        self.attached = true;
        Ok(())
    }

    fn render(&mut self, frame: &FrameOutput, rig: &dyn AvatarRig) {
        if !self.attached || self.failed || frame.index % self.every != 0 {
            return;
        }
        let weights: serde_json::Map<String, serde_json::Value> = self
            .channels
            .iter()
            .filter_map(|name| {
                let value = rig.channel_value(name)?;
                (value > 0.0).then(|| (name.clone(), json!(value)))
            })
            .collect();
        let line = json!({ "frame": frame, "channels": weights });

        if let Err(e) = writeln!(self.out, "{line}").and_then(|()| self.out.flush()) {
            warn!(error = %e, "Frame output closed; no further frames will be written");
            self.failed = true;
        }
    }

    fn release(&mut self) {
        self.attached = false;
    }
}
