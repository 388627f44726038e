//! End-to-end scenarios against the engine facade
//!
//! Every test wires the engine to the in-crate fixture ports and a headless
//! rig/surface, then drives it with simulated frames. No test sleeps; time
//! only moves through `Engine::tick`.

use std::sync::Arc;
use std::time::Duration;

use pretty_assertions::assert_eq;

use marionette_core::test_utils::{fixture_ports, RecordingAssetLoader, RecordingSequenceSource};
use marionette_core::{
    decode_message, AvatarRig, BreathingPatch, ClipCache, Engine, EngineConfig, EngineError,
    EnginePorts, EventFeed, ExpressionEvent, HeadlessAvatarLoader, HeadlessRig, HeadlessSurface,
    Lifecycle, LineFeed, Motion, PlaybackPhase, SequenceDescriptor, VisemaEvent,
};

const STEP: Duration = Duration::from_millis(10);

struct Rig {
    engine: Engine,
    source: Arc<RecordingSequenceSource>,
    assets: Arc<RecordingAssetLoader>,
}

async fn ready_engine() -> Rig {
    ready_engine_with(EngineConfig::default()).await
}

async fn ready_engine_with(mut config: EngineConfig) -> Rig {
    config.idle.seed = Some(11);
    let (source, assets) = fixture_ports();
    let ports = EnginePorts {
        source: source.clone(),
        assets: assets.clone(),
        avatar_loader: Arc::new(HeadlessAvatarLoader::new(HeadlessRig::standard())),
        surface: Box::new(HeadlessSurface::new()),
    };
    let mut engine = Engine::new(config, ports).unwrap();
    engine.initialize().await.unwrap();
    Rig {
        engine,
        source,
        assets,
    }
}

/// Tick in 10 ms frames until `elapsed` has passed since `start`
fn run_until(engine: &mut Engine, start: Duration, elapsed: Duration) {
    while engine.now() < start + elapsed {
        let frame = engine.tick(STEP).unwrap();
        assert!(frame.actions.len() <= 2, "more than two weighted actions");
    }
}

fn channel(engine: &Engine, name: &str) -> f32 {
    engine
        .rig()
        .and_then(|rig| rig.channel_value(name))
        .unwrap_or_default()
}

// =============================================================================
// Scenario A: one-shot returns to idle
// =============================================================================

#[tokio::test]
async fn test_one_shot_wave_returns_to_idle() {
    let Rig { mut engine, .. } = ready_engine().await;
    let start = engine.now();

    assert!(engine.play_animation("wave", Some(0.5)).await);
    assert_eq!(engine.playback().motion(), Motion::Specific);
    assert_eq!(engine.status().active_animation.as_deref(), Some("wave"));

    run_until(&mut engine, start, Duration::from_millis(1990));
    assert_eq!(engine.playback().motion(), Motion::Specific);
    assert_eq!(engine.playback().phase, PlaybackPhase::Specific);

    run_until(&mut engine, start, Duration::from_millis(2000));
    assert_eq!(engine.playback().motion(), Motion::Idle);
    assert_eq!(engine.playback().active_name(), Some("idle"));
    assert!(engine.driver().controller().idle().is_running());

    run_until(&mut engine, start, Duration::from_millis(2600));
    assert_eq!(engine.playback().phase, PlaybackPhase::Idle);
    assert_eq!(engine.status().active_animation.as_deref(), Some("idle"));
}

// =============================================================================
// Scenario B: viseme overlap timing
// =============================================================================

#[tokio::test]
async fn test_viseme_runs_overlap_on_schedule() {
    let Rig { mut engine, .. } = ready_engine().await;
    let start = engine.now();
    engine.play_visemas(vec![VisemaEvent::new("aa", 0.0), VisemaEvent::new("oh", 0.5)]);

    run_until(&mut engine, start, Duration::from_millis(20));
    let rising = channel(&engine, "aa");
    assert!(rising > 0.0 && rising < 1.0);

    run_until(&mut engine, start, Duration::from_millis(50));
    assert!((channel(&engine, "aa") - 1.0).abs() < 1e-6);

    run_until(&mut engine, start, Duration::from_millis(250));
    let falling = channel(&engine, "aa");
    assert!(falling > 0.0 && falling < 1.0);

    run_until(&mut engine, start, Duration::from_millis(300));
    assert_eq!(channel(&engine, "aa"), 0.0);

    run_until(&mut engine, start, Duration::from_millis(490));
    assert_eq!(channel(&engine, "oh"), 0.0);

    run_until(&mut engine, start, Duration::from_millis(520));
    assert!(channel(&engine, "oh") > 0.0);
}

// =============================================================================
// Scenario C: expression approach
// =============================================================================

#[tokio::test]
async fn test_expression_approaches_target_without_exceeding() {
    let Rig { mut engine, .. } = ready_engine().await;
    engine.play_expressions(vec![ExpressionEvent::new("happy", 1.0, 0.8)]);

    let mut previous = 0.0;
    for _ in 0..75 {
        engine.tick(Duration::from_millis(16)).unwrap();
        let value = channel(&engine, "happy");
        assert!(value <= 0.8, "overshoot: {value}");
        assert!(value >= previous);
        previous = value;
    }
    assert!(previous > 0.5, "too slow: {previous}");

    for _ in 0..300 {
        engine.tick(Duration::from_millis(16)).unwrap();
        assert!(channel(&engine, "happy") <= 0.8);
    }
    assert!((channel(&engine, "happy") - 0.8).abs() < 1e-3);
}

// =============================================================================
// Scenario D: malformed sequence
// =============================================================================

#[tokio::test]
async fn test_malformed_sequence_leaves_state_untouched() {
    let Rig { mut engine, .. } = ready_engine().await;
    let before = engine.playback().clone();

    assert!(!engine.play_animation("broken", None).await);

    let after = engine.playback();
    assert_eq!(after.phase, before.phase);
    assert_eq!(after.generation, before.generation);
    assert_eq!(after.active_name(), before.active_name());

    let status = engine.status();
    assert_eq!(status.lifecycle, Lifecycle::Ready);
    assert!(status.last_error.unwrap().contains("malformed"));

    let err = engine.try_play_animation("broken", None).await.unwrap_err();
    assert!(matches!(err, EngineError::MalformedSequence { ref name, .. } if name == "broken"));
    assert!(err.is_recoverable());
}

#[tokio::test]
async fn test_unknown_sequence_is_an_asset_error() {
    let Rig { mut engine, .. } = ready_engine().await;
    let err = engine.try_play_animation("moonwalk", None).await.unwrap_err();
    assert!(matches!(err, EngineError::AssetLoad { .. }));
    assert_eq!(engine.playback().motion(), Motion::Idle);
}

// =============================================================================
// Idle suspension
// =============================================================================

#[tokio::test]
async fn test_idle_never_rotates_while_directed() {
    let Rig { mut engine, .. } = ready_engine().await;
    let start = engine.now();

    // request lands just before the first idle rotation is due
    run_until(&mut engine, start, Duration::from_millis(3990));
    assert!(engine.play_animation("talk", Some(0.3)).await);

    for _ in 0..2000 {
        engine.tick(STEP).unwrap();
        assert_eq!(engine.playback().motion(), Motion::Specific);
        assert_eq!(engine.playback().active_name(), Some("talk"));
        assert!(!engine.driver().controller().idle().is_running());
    }
}

#[tokio::test]
async fn test_idle_name_restarts_rotation() {
    let mut config = EngineConfig::default();
    config.idle.clips = vec!["idle".into(), "idle_look".into()];
    let Rig { mut engine, .. } = ready_engine_with(config).await;

    assert!(engine.play_animation("talk", None).await);
    assert_eq!(engine.playback().motion(), Motion::Specific);

    assert!(engine.play_animation("idle_look", Some(0.2)).await);
    assert_eq!(engine.playback().motion(), Motion::Idle);
    assert_eq!(engine.playback().active_name(), Some("idle_look"));
    assert!(engine.driver().controller().idle().is_running());
}

// =============================================================================
// Keyframe chains, delays, interruption
// =============================================================================

#[tokio::test]
async fn test_temporary_chain_returns_to_idle() {
    let Rig { mut engine, .. } = ready_engine().await;
    let start = engine.now();
    assert!(engine.play_animation("nod", Some(0.25)).await);
    assert_eq!(engine.playback().keyframe, 0);

    // second keyframe blends in at 1.0 - 0.25
    run_until(&mut engine, start, Duration::from_millis(760));
    assert_eq!(engine.playback().keyframe, 1);
    assert_eq!(engine.playback().motion(), Motion::Specific);

    // chain ends 0.75 s after the second keyframe started
    run_until(&mut engine, start, Duration::from_millis(1510));
    assert_eq!(engine.playback().motion(), Motion::Idle);
    assert_eq!(engine.playback().active_name(), Some("idle"));
}

#[tokio::test]
async fn test_looping_chain_wraps_to_first_keyframe() {
    let Rig { mut engine, .. } = ready_engine().await;
    let start = engine.now();
    assert!(engine.play_animation("pose_cycle", Some(0.0)).await);

    run_until(&mut engine, start, Duration::from_millis(1510));
    assert_eq!(engine.playback().keyframe, 0);
    assert_eq!(engine.playback().active_name(), Some("pose_cycle"));
    assert_eq!(engine.playback().motion(), Motion::Specific);
}

#[tokio::test]
async fn test_delayed_sequence_starts_after_delay() {
    let Rig { mut engine, .. } = ready_engine().await;
    let start = engine.now();
    assert!(engine.play_animation("bow_later", Some(0.0)).await);

    assert_eq!(
        engine.playback().phase,
        PlaybackPhase::Transitioning {
            target: Motion::Specific
        }
    );
    assert_eq!(engine.playback().active_name(), Some("idle"));

    run_until(&mut engine, start, Duration::from_millis(500));
    assert_eq!(engine.playback().active_name(), Some("bow_later"));
    assert_eq!(engine.playback().phase, PlaybackPhase::Specific);

    // 1.5 s clip, temporary
    run_until(&mut engine, start, Duration::from_millis(2000));
    assert_eq!(engine.playback().motion(), Motion::Idle);
}

#[tokio::test]
async fn test_interrupting_a_delay_cancels_it() {
    let Rig { mut engine, .. } = ready_engine().await;
    let start = engine.now();
    assert!(engine.play_animation("bow_later", None).await);
    run_until(&mut engine, start, Duration::from_millis(200));

    assert!(engine.play_animation("talk", Some(0.0)).await);
    run_until(&mut engine, start, Duration::from_millis(3000));
    assert_eq!(engine.playback().active_name(), Some("talk"));
}

#[tokio::test]
async fn test_interrupting_a_crossfade_keeps_two_actions_at_most() {
    let Rig { mut engine, .. } = ready_engine().await;
    assert!(engine.play_animation("wave", Some(0.5)).await);
    engine.tick(STEP).unwrap();
    assert!(engine.play_animation("talk", Some(0.5)).await);
    let frame = engine.tick(STEP).unwrap();
    assert_eq!(frame.actions.len(), 2);
    assert_eq!(frame.actions[1].clip, "animations/talk.vrma");

    let now = engine.now();
    run_until(&mut engine, now, Duration::from_millis(600));
    assert_eq!(engine.playback().phase, PlaybackPhase::Specific);
    assert_eq!(engine.driver().controller().mixer().action_count(), 1);
}

// =============================================================================
// Breathing
// =============================================================================

#[tokio::test]
async fn test_breathing_toggle_restores_rest_pose() {
    let Rig { mut engine, .. } = ready_engine().await;
    for _ in 0..50 {
        engine.tick(Duration::from_millis(16)).unwrap();
    }
    let rest = engine.driver().breathing().base_rotation().unwrap();
    let moved = engine.rig().unwrap().joint_rotation("chest").unwrap();
    assert_ne!(moved, rest);

    let config = engine.set_breathing_config(BreathingPatch {
        enabled: Some(false),
        ..BreathingPatch::default()
    });
    assert!(!config.enabled);
    assert!((config.period_seconds - 4.0).abs() < f32::EPSILON);

    engine.tick(Duration::from_millis(16)).unwrap();
    assert_eq!(engine.rig().unwrap().joint_rotation("chest"), Some(rest));
}

#[tokio::test]
async fn test_breathing_suspended_for_sequences_that_opt_out() {
    let Rig { mut engine, .. } = ready_engine().await;
    engine.tick(Duration::from_millis(16)).unwrap();
    assert!(engine.driver().breathing().is_running());

    assert!(engine.play_animation("talk", None).await);
    engine.tick(Duration::from_millis(16)).unwrap();
    assert!(!engine.driver().breathing().is_running());
}

// =============================================================================
// Cache and feed
// =============================================================================

#[tokio::test]
async fn test_repeated_play_fetches_once() {
    let Rig {
        mut engine,
        source,
        assets,
    } = ready_engine().await;
    assert!(engine.play_animation("wave", None).await);
    assert!(engine.play_animation("talk", None).await);
    assert!(engine.play_animation("wave", None).await);

    assert_eq!(source.fetch_count("wave"), 1);
    assert_eq!(assets.load_count("animations/wave.vrma"), 1);
}

#[tokio::test]
async fn test_concurrent_loads_share_one_fetch() {
    let source = Arc::new(
        RecordingSequenceSource::new()
            .with_sequence(
                "nod",
                SequenceDescriptor::chained([
                    ("poses/nod_a.vrma", 1.0, 0.25),
                    ("poses/nod_b.vrma", 1.0, 0.25),
                ]),
            )
            .with_yields(3),
    );
    let assets = Arc::new(RecordingAssetLoader::new(Duration::from_secs(1)).with_yields(3));
    let cache = ClipCache::new(source.clone(), assets.clone());

    let (a, b, c) = tokio::join!(cache.load("nod"), cache.load("nod"), cache.load("nod"));
    let (a, b, c) = (a.unwrap(), b.unwrap(), c.unwrap());
    assert!(Arc::ptr_eq(&a, &b));
    assert!(Arc::ptr_eq(&b, &c));
    assert_eq!(source.fetch_count("nod"), 1);
    assert_eq!(assets.load_count("poses/nod_a.vrma"), 1);
    assert_eq!(assets.load_count("poses/nod_b.vrma"), 1);

    let (x, y) = tokio::join!(
        cache.get_or_load("poses/other.vrma"),
        cache.get_or_load("poses/other.vrma")
    );
    assert!(Arc::ptr_eq(&x.unwrap(), &y.unwrap()));
    assert_eq!(assets.load_count("poses/other.vrma"), 1);
}

#[tokio::test]
async fn test_loads_off_the_frame_loop() {
    let Rig { mut engine, .. } = ready_engine().await;
    let loader = engine.loader();
    let task = tokio::spawn(async move { loader.load("wave").await });

    engine.tick(STEP).unwrap();
    let sequence = task.await.unwrap().unwrap();
    engine.apply_prepared(sequence, Some(0.2)).unwrap();
    assert_eq!(engine.playback().active_name(), Some("wave"));
}

#[tokio::test]
async fn test_animation_message_resolves_beside_the_loop() {
    let Rig {
        mut engine, source, ..
    } = ready_engine().await;
    let message = decode_message(
        r#"{"sequence": "greet", "vrma_file": "animations/greet.vrma", "loop": false}"#,
    )
    .unwrap();
    let name = engine.accept(message).unwrap();
    assert_eq!(name, "greet");
    assert_eq!(engine.playback().active_name(), Some("idle"));

    let loaded = engine.loader().load(&name).await;
    assert!(engine.play_loaded(&name, loaded, None));
    assert_eq!(engine.playback().active_name(), Some("greet"));
    assert_eq!(source.fetch_count("greet"), 0);

    let missing = engine.loader().load("missing").await;
    assert!(!engine.play_loaded("missing", missing, None));
    assert_eq!(engine.playback().active_name(), Some("greet"));
    assert!(engine.status().last_error.is_some());
}

#[tokio::test]
async fn test_feed_messages_drive_the_engine() {
    let Rig {
        mut engine, source, ..
    } = ready_engine().await;
    let input = concat!(
        "alive\n",
        r#"{"sequence": "greet", "vrma_file": "animations/greet.vrma", "loop": false, "message_id": "m1"}"#,
        "\n",
        r#"{"message_id": "m1", "expresiones": [{"expresion": "happy", "tiempo": 0.0, "intensidad": 0.6}]}"#,
        "\n",
        r#"{"audio_url": "a.wav", "message_id": "m1", "visemas": [{"visema": "aa", "tiempo": 0.0}]}"#,
        "\n",
        r#"{"error": "tts failed", "type": "error"}"#,
        "\n",
    );
    let mut feed = LineFeed::new(tokio::io::BufReader::new(input.as_bytes()));
    while let Some(message) = feed.next_message().await.unwrap() {
        engine.dispatch(message).await;
    }

    assert_eq!(engine.playback().active_name(), Some("greet"));
    assert_eq!(source.fetch_count("greet"), 0);
    assert_eq!(engine.status().last_error.as_deref(), Some("tts failed"));

    for _ in 0..10 {
        engine.tick(STEP).unwrap();
    }
    assert!(channel(&engine, "happy") > 0.0);
    assert!((channel(&engine, "aa") - 1.0).abs() < 1e-6);
}

#[tokio::test]
async fn test_expression_cues_on_viseme_channels_are_ignored() {
    let Rig { mut engine, .. } = ready_engine().await;
    let message = decode_message(
        r#"{"expresiones": [{"expresion": "aa", "tiempo": 0.0}, {"expresion": "sad", "tiempo": 0.0}]}"#,
    )
    .unwrap();
    engine.dispatch(message).await;
    for _ in 0..30 {
        engine.tick(STEP).unwrap();
    }
    assert_eq!(channel(&engine, "aa"), 0.0);
    assert!(channel(&engine, "sad") > 0.0);
}

#[tokio::test]
async fn test_out_of_range_cue_times_are_dropped() {
    let Rig { mut engine, .. } = ready_engine().await;
    let visemes = decode_message(
        r#"{"visemas": [{"visema": "aa", "tiempo": 1e30}, {"visema": "oh", "tiempo": 0.0}]}"#,
    )
    .unwrap();
    let expressions = decode_message(
        r#"{"expresiones": [{"expresion": "happy", "tiempo": 1e20, "intensidad": 0.5},
                            {"expresion": "sad", "tiempo": 0.0, "intensidad": 0.5}]}"#,
    )
    .unwrap();
    engine.dispatch(visemes).await;
    engine.dispatch(expressions).await;

    for _ in 0..30 {
        engine.tick(STEP).unwrap();
    }
    assert_eq!(channel(&engine, "aa"), 0.0);
    assert_eq!(channel(&engine, "happy"), 0.0);
    assert!(channel(&engine, "oh") > 0.0);
    assert!(channel(&engine, "sad") > 0.0);
}

#[tokio::test]
async fn test_cleanup_then_reinitialize() {
    let Rig {
        mut engine, source, ..
    } = ready_engine().await;
    assert!(engine.play_animation("wave", None).await);
    engine.play_visemas(vec![VisemaEvent::new("aa", 0.5)]);
    assert!(engine.driver().pending_timers() > 0);

    engine.cleanup();
    assert_eq!(engine.driver().pending_timers(), 0);
    assert!(matches!(engine.tick(STEP), Err(EngineError::NotReady)));

    engine.initialize().await.unwrap();
    assert_eq!(engine.status().lifecycle, Lifecycle::Ready);
    assert_eq!(engine.playback().active_name(), Some("idle"));
    // the cache was cleared, so idle was fetched again
    assert_eq!(source.fetch_count("idle"), 2);
}
