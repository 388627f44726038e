//! Marionette Player - Headless Frame Loop for the Avatar Engine
//!
//! Runs the engine against a headless avatar, feeding it upstream messages
//! (one JSON document per line) and optionally streaming every frame to
//! stdout as JSON.
//!
//! Sequences requested with `--play` or by the feed resolve on a worker task
//! beside the frame loop and start playing once they arrive.
//!
//! # Usage
//!
//! ```bash
//! # Talk to the animation service, read messages from stdin
//! marionette-player --service-url http://localhost:5000 --feed -
//!
//! # Offline: descriptors and clips from a directory, replay a recorded feed
//! marionette-player --sequences ./sequences --feed session.jsonl --emit-frames
//!
//! # Play a couple of sequences and stop after ten seconds
//! marionette-player --play wave --play nod --duration 10
//!
//! # Verbose logging (logs go to stderr)
//! RUST_LOG=debug marionette-player
//! ```

mod loads;
mod surface;

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use marionette_core::avatar::headless::STANDARD_EXPRESSIONS;
use marionette_core::glam::Quat;
use marionette_core::{
    load_config_from_path, ConfigOverrides, DirAssetLoader, Engine, EngineConfig, EnginePorts,
    EventFeed, FeedError, FeedMessage, HeadlessAvatarLoader, HeadlessRig, HeadlessSurface, LineFeed,
    NominalDecoder, RenderSurface, SequenceSource, StaticSequenceSource,
};
use tokio::io::{AsyncBufRead, BufReader};
use tokio::time::{interval, Instant, MissedTickBehavior};
use tracing::{debug, error, info, warn};

use loads::SequenceLoads;
use surface::JsonLinesSurface;

/// Marionette Player - drive a speaking avatar without a renderer
#[derive(Parser, Debug)]
#[command(name = "marionette-player")]
#[command(author, version, about, long_about = None)]
pub struct Args {
    /// Configuration file path
    #[arg(short = 'c', long, env = "MARIONETTE_CONFIG", value_name = "FILE")]
    config: Option<PathBuf>,

    /// Animation service base URL
    #[arg(short = 'u', long, value_name = "URL")]
    service_url: Option<String>,

    /// Serve descriptors (`*.json`) and clips from this directory instead
    #[arg(short = 's', long, value_name = "DIR", conflicts_with = "service_url")]
    sequences: Option<PathBuf>,

    /// Upstream message feed, one JSON document per line ("-" for stdin)
    #[arg(short = 'f', long, value_name = "PATH")]
    feed: Option<String>,

    /// Sequences to play right after initialization, in order
    #[arg(short = 'p', long = "play", value_name = "NAME")]
    play: Vec<String>,

    /// Idle pool override (comma separated)
    #[arg(long, value_delimiter = ',', value_name = "NAMES")]
    idle: Option<Vec<String>>,

    /// Seed for idle selection
    #[arg(long, value_name = "SEED")]
    seed: Option<u64>,

    /// Blend channels the headless avatar exposes (comma separated)
    #[arg(long, value_delimiter = ',', value_name = "NAMES")]
    channels: Option<Vec<String>>,

    /// Disable the breathing modulator
    #[arg(long)]
    no_breathing: bool,

    /// Frames per second of the presentation loop
    #[arg(long, default_value_t = 60, value_parser = clap::value_parser!(u32).range(1..=240))]
    fps: u32,

    /// Stop after this many seconds
    #[arg(short = 'd', long, value_name = "SECS")]
    duration: Option<f64>,

    /// Stop once the feed is exhausted
    #[arg(long, requires = "feed")]
    exit_on_eof: bool,

    /// Write frames to stdout as JSON lines
    #[arg(long)]
    emit_frames: bool,

    /// With --emit-frames, write only every Nth frame
    #[arg(long, default_value_t = 1, value_name = "N")]
    frame_stride: u64,

    /// Duration reported for clips read from --sequences
    #[arg(long, default_value_t = 4.0, value_name = "SECS")]
    clip_secs: f64,

    /// List the available sequences and exit
    #[arg(long)]
    list: bool,

    /// Log level (trace, debug, info, warn, error)
    #[arg(short = 'l', long, env = "MARIONETTE_LOG_LEVEL", default_value = "info")]
    log_level: String,
}

/// Initialize logging with the specified level
///
/// Logs always go to stderr; stdout carries frames.
fn init_logging(level: &str) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        tracing_subscriber::EnvFilter::new(format!(
            "marionette_player={level},marionette_core={level}"
        ))
    });

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_writer(std::io::stderr)
        .init();
}

fn load_config(args: &Args) -> Result<EngineConfig> {
    let mut config = load_config_from_path(args.config.clone())
        .context("Failed to load configuration")?;

    let mut overrides = ConfigOverrides::new();
    if let Some(ref url) = args.service_url {
        overrides = overrides.with_service_url(url.clone());
    }
    if let Some(ref clips) = args.idle {
        overrides = overrides.with_idle_clips(clips.clone());
    }
    if let Some(seed) = args.seed {
        overrides = overrides.with_idle_seed(seed);
    }
    if args.no_breathing {
        overrides = overrides.with_breathing_enabled(false);
    }
    overrides.apply(&mut config);

    config.validate().context("Invalid configuration")?;
    Ok(config)
}

/// Channel names of the headless avatar
fn avatar_channels(args: &Args, config: &EngineConfig) -> Vec<String> {
    if let Some(ref channels) = args.channels {
        return channels.clone();
    }
    let mut channels: Vec<String> = STANDARD_EXPRESSIONS
        .iter()
        .map(ToString::to_string)
        .collect();
    channels.extend(config.viseme.channels.iter().cloned());
    channels
}

fn build_surface(args: &Args, channels: Vec<String>) -> Box<dyn RenderSurface> {
    if !args.emit_frames {
        return Box::new(HeadlessSurface::new());
    }
    Box::new(JsonLinesSurface::new(
        std::io::stdout(),
        channels,
        args.frame_stride,
    ))
}

fn build_ports(args: &Args, config: &EngineConfig) -> Result<EnginePorts> {
    let channels = avatar_channels(args, config);
    let rig = HeadlessRig::new(channels.iter().cloned()).with_joint(
        config.breathing_joint.clone(),
        Quat::IDENTITY,
    );
    let avatar_loader = Arc::new(HeadlessAvatarLoader::new(rig));
    let surface = build_surface(args, channels);

    let Some(ref dir) = args.sequences else {
        return EnginePorts::http(config, avatar_loader, surface)
            .context("Failed to set up the animation service client");
    };

    let clip_duration = Duration::try_from_secs_f64(args.clip_secs)
        .with_context(|| format!("Invalid --clip-secs: {}", args.clip_secs))?;
    let source = StaticSequenceSource::from_dir(dir)
        .with_context(|| format!("Failed to read sequences from {}", dir.display()))?;
    info!(sequences = source.len(), dir = %dir.display(), "Local sequences loaded");

    Ok(EnginePorts {
        source: Arc::new(source),
        assets: Arc::new(DirAssetLoader::new(
            dir.clone(),
            Arc::new(NominalDecoder::new(clip_duration)),
        )),
        avatar_loader,
        surface,
    })
}

async fn open_feed(path: &str) -> Result<Box<dyn EventFeed>> {
    fn boxed<R: AsyncBufRead + Unpin + Send + 'static>(reader: R) -> Box<dyn EventFeed> {
        Box::new(LineFeed::new(reader))
    }

    if path == "-" {
        return Ok(boxed(BufReader::new(tokio::io::stdin())));
    }
    let file = tokio::fs::File::open(path)
        .await
        .with_context(|| format!("Failed to open feed {path}"))?;
    Ok(boxed(BufReader::new(file)))
}

async fn list_sequences(source: &dyn SequenceSource) -> Result<()> {
    let mut sequences = source
        .list_sequences()
        .await
        .context("Failed to list sequences")?;
    sequences.sort_by(|a, b| a.sequence.cmp(&b.sequence));
    for summary in sequences {
        match summary.description {
            Some(description) => println!("{}\t{description}", summary.sequence),
            None => println!("{}", summary.sequence),
        }
    }
    Ok(())
}

/// Next feed message, or never when there is no feed
async fn next_message(
    feed: &mut Option<Box<dyn EventFeed>>,
) -> Result<Option<FeedMessage>, FeedError> {
    match feed.as_mut() {
        Some(feed) => feed.next_message().await,
        None => std::future::pending().await,
    }
}

async fn run(args: Args) -> Result<()> {
    let config = load_config(&args)?;
    info!(source = ?config.source(), service = %config.service.base_url, "Configuration loaded");

    let ports = build_ports(&args, &config)?;
    if args.list {
        return list_sequences(ports.source.as_ref()).await;
    }

    let mut feed = match args.feed {
        Some(ref path) => Some(open_feed(path).await?),
        None => None,
    };

    let mut engine = Engine::new(config, ports).context("Failed to create engine")?;
    engine
        .initialize()
        .await
        .context("Engine initialization failed")?;

    let mut loads = SequenceLoads::spawn(engine.loader());
    for name in &args.play {
        loads.request(name.as_str());
    }

    let period = Duration::from_secs_f64(1.0 / f64::from(args.fps));
    let mut frames = interval(period);
    frames.set_missed_tick_behavior(MissedTickBehavior::Skip);

    let started = Instant::now();
    let deadline = args
        .duration
        .map(Duration::try_from_secs_f64)
        .transpose()
        .context("Invalid --duration")?;
    let mut last = started;
    let mut status = engine.subscribe();

    info!(fps = args.fps, "Frame loop running");
    loop {
        tokio::select! {
            _ = frames.tick() => {
                let now = Instant::now();
                let frame = engine.tick(now - last)?;
                last = now;
                if deadline.is_some_and(|limit| now - started >= limit) {
                    info!(frames = frame.index, "Duration reached");
                    break;
                }
            }
            message = next_message(&mut feed) => match message {
                Ok(Some(message)) => {
                    if let Some(name) = engine.accept(message) {
                        loads.request(name);
                    }
                }
                Ok(None) => {
                    info!("Feed closed");
                    feed = None;
                    if args.exit_on_eof {
                        break;
                    }
                }
                Err(FeedError::Decode(reason)) => warn!(%reason, "Skipping feed message"),
                Err(e) => {
                    error!(error = %e, "Feed failed");
                    feed = None;
                    if args.exit_on_eof {
                        break;
                    }
                }
            },
            Some((name, loaded)) = loads.next_ready() => {
                if !engine.play_loaded(&name, loaded, None) {
                    warn!(sequence = %name, pending = loads.pending(), "Requested sequence did not start");
                }
            }
            changed = status.changed() => {
                if changed.is_ok() {
                    let current = status.borrow_and_update().clone();
                    debug!(
                        lifecycle = ?current.lifecycle,
                        active = ?current.active_animation,
                        error = ?current.last_error,
                        "Engine status"
                    );
                }
            }
            _ = tokio::signal::ctrl_c() => {
                info!("Interrupted");
                break;
            }
        }
    }

    let summary = serde_json::to_string(&engine.status()).unwrap_or_default();
    info!(
        frames = engine.driver().frame_index(),
        pending_loads = loads.pending(),
        status = %summary,
        "Stopping"
    );
    engine.cleanup();
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    init_logging(&args.log_level);

    info!("Marionette Player starting");
    info!("Version: {}", env!("CARGO_PKG_VERSION"));

    if let Err(e) = run(args).await {
        error!(error = %format!("{e:#}"), "Player failed");
        return Err(e);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use marionette_core::AssetLoader;

    #[test]
    fn test_args_parse() {
        let args = Args::try_parse_from([
            "marionette-player",
            "--sequences",
            "/tmp/seq",
            "--play",
            "wave",
            "--play",
            "nod",
            "--idle",
            "idle,idle_look",
            "--fps",
            "30",
        ])
        .unwrap();
        assert_eq!(args.play, vec!["wave", "nod"]);
        assert_eq!(
            args.idle,
            Some(vec!["idle".to_string(), "idle_look".to_string()])
        );
        assert_eq!(args.fps, 30);
        assert!(!args.emit_frames);
    }

    #[test]
    fn test_avatar_channels_default_and_override() {
        let config = EngineConfig::default();
        let args = Args::try_parse_from(["marionette-player"]).unwrap();
        let channels = avatar_channels(&args, &config);
        assert!(channels.iter().any(|c| c == "happy"));
        assert!(channels.iter().any(|c| c == "aa"));

        let args =
            Args::try_parse_from(["marionette-player", "--channels", "smile,aa"]).unwrap();
        assert_eq!(avatar_channels(&args, &config), vec!["smile", "aa"]);
    }

    #[test]
    fn test_args_reject_conflicts() {
        assert!(Args::try_parse_from([
            "marionette-player",
            "--sequences",
            "/tmp/seq",
            "--service-url",
            "http://localhost:5000",
        ])
        .is_err());
        assert!(Args::try_parse_from(["marionette-player", "--exit-on-eof"]).is_err());
        assert!(Args::try_parse_from(["marionette-player", "--fps", "0"]).is_err());
    }

    #[tokio::test]
    async fn test_local_ports_from_directory() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join("wave.json"),
            r#"{"sequence": "wave", "vrma_file": "wave.vrma", "loop": false}"#,
        )
        .unwrap();
        std::fs::write(dir.path().join("wave.vrma"), b"glTF").unwrap();

        let args = Args::try_parse_from([
            "marionette-player",
            "--sequences",
            dir.path().to_str().unwrap(),
        ])
        .unwrap();
        let ports = build_ports(&args, &EngineConfig::default()).unwrap();
        let descriptor = ports.source.fetch_descriptor("wave").await.unwrap();
        assert_eq!(descriptor.sequence.as_deref(), Some("wave"));
        let clip = ports.assets.load_clip("wave.vrma").await.unwrap();
        assert_eq!(clip.duration, Duration::from_secs(4));
    }

    #[tokio::test]
    async fn test_feed_file_is_read_line_by_line() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("feed.jsonl");
        std::fs::write(&path, "alive\n{\"expresiones\": []}\n").unwrap();

        let mut feed = Some(open_feed(path.to_str().unwrap()).await.unwrap());
        assert!(next_message(&mut feed).await.unwrap().is_some());
        assert!(next_message(&mut feed).await.unwrap().is_some());
        assert!(next_message(&mut feed).await.unwrap().is_none());
    }
}
