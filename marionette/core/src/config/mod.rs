//! TOML Configuration File Support
//!
//! Centralized configuration loading for the engine, supporting a TOML file at
//! `~/.config/marionette/engine.toml`.
//!
//! # Configuration Priority
//!
//! Configuration values are loaded with the following priority (highest first):
//! 1. CLI arguments (via [`ConfigOverrides`])
//! 2. Environment variables
//! 3. TOML configuration file
//! 4. Default values
//!
//! # Example Configuration
//!
//! ```toml
//! [service]
//! base_url = "http://localhost:5003"
//! request_timeout_ms = 30000
//!
//! [idle]
//! clips = ["idle", "idle_look_around"]
//! settle_delay_secs = 0.3
//!
//! [playback]
//! default_crossfade_secs = 0.5
//! min_schedule_delay_secs = 0.05
//!
//! [expression]
//! smoothing_rate = 8.0
//!
//! [viseme]
//! channels = ["aa", "ih", "ou", "ee", "oh"]
//! fade_in_secs = 0.05
//! hold_secs = 0.18
//! fade_out_secs = 0.12
//!
//! [viseme.intensity]
//! aa = 1.0
//! oh = 0.9
//!
//! [breathing]
//! enabled = true
//! period_secs = 4.0
//! amplitude = 0.02
//! joint = "chest"
//! ```

use std::collections::HashMap;
use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::breathing::BreathingConfig;

// =============================================================================
// Error Types
// =============================================================================

/// Errors that can occur when loading configuration
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Failed to read config file
    #[error("Failed to read config file at {path}: {source}")]
    ReadError {
        /// The path that was attempted
        path: PathBuf,
        /// The underlying IO error
        source: std::io::Error,
    },

    /// Failed to parse TOML
    #[error("Failed to parse TOML config: {0}")]
    ParseError(#[from] toml::de::Error),

    /// Invalid configuration value
    #[error("Invalid configuration: {0}")]
    ValidationError(String),
}

// =============================================================================
// Configuration Source Tracking
// =============================================================================

/// Tracks where a configuration value came from
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConfigSource {
    /// Value from command-line argument
    Cli,
    /// Value from environment variable
    Env,
    /// Value from TOML configuration file
    File,
    /// Default value
    Default,
}

impl std::fmt::Display for ConfigSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Cli => write!(f, "CLI"),
            Self::Env => write!(f, "environment"),
            Self::File => write!(f, "config file"),
            Self::Default => write!(f, "default"),
        }
    }
}

// =============================================================================
// Runtime Configuration Sections
// =============================================================================

/// Animation service connection settings
#[derive(Clone, Debug, PartialEq)]
pub struct ServiceConfig {
    /// Base URL of the animation service (sequence descriptors and clip assets)
    pub base_url: String,
    /// Timeout applied to every HTTP request
    pub request_timeout: Duration,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:5003".to_string(),
            request_timeout: Duration::from_secs(30),
        }
    }
}

/// Idle rotation settings
#[derive(Clone, Debug, PartialEq)]
pub struct IdleConfig {
    /// Sequence names that make up the idle pool
    pub clips: Vec<String>,
    /// Extra pause after an idle sequence ends on its own
    pub settle_delay: Duration,
    /// Fixed RNG seed for reproducible rotation (random when unset)
    pub seed: Option<u64>,
}

impl Default for IdleConfig {
    fn default() -> Self {
        Self {
            clips: vec!["idle".to_string()],
            settle_delay: Duration::from_millis(300),
            seed: None,
        }
    }
}

/// Crossfade and scheduling settings
#[derive(Clone, Debug, PartialEq)]
pub struct PlaybackConfig {
    /// Crossfade used when a caller does not pass one
    pub default_crossfade: Duration,
    /// Floor for keyframe-chain timers (never schedule zero/negative delays)
    pub min_schedule_delay: Duration,
    /// Upper bound for a single frame delta (stalls are not replayed)
    pub max_frame_delta: Duration,
}

impl Default for PlaybackConfig {
    fn default() -> Self {
        Self {
            default_crossfade: Duration::from_millis(500),
            min_schedule_delay: Duration::from_millis(50),
            max_frame_delta: Duration::from_millis(250),
        }
    }
}

/// Expression player settings
#[derive(Clone, Debug, PartialEq)]
pub struct ExpressionConfig {
    /// Exponential smoothing rate constant (per second)
    pub smoothing_rate: f32,
}

impl Default for ExpressionConfig {
    fn default() -> Self {
        Self {
            smoothing_rate: 8.0,
        }
    }
}

/// Viseme player settings
#[derive(Clone, Debug, PartialEq)]
pub struct VisemeConfig {
    /// Reserved viseme channel names (never written by the expression player)
    pub channels: Vec<String>,
    /// Cue names that close the mouth instead of addressing a channel
    pub rest_markers: Vec<String>,
    /// Target weight of an active viseme
    pub on_intensity: f32,
    /// Per-viseme target weights overriding `on_intensity`
    pub intensity: HashMap<String, f32>,
    /// Ramp-up window
    pub fade_in: Duration,
    /// Time from onset until the fade-out starts
    pub hold: Duration,
    /// Ramp-down window
    pub fade_out: Duration,
}

impl Default for VisemeConfig {
    fn default() -> Self {
        Self {
            channels: ["aa", "ih", "ou", "ee", "oh"]
                .iter()
                .map(ToString::to_string)
                .collect(),
            rest_markers: vec!["neutral".to_string(), "sil".to_string()],
            on_intensity: 1.0,
            intensity: HashMap::new(),
            fade_in: Duration::from_millis(50),
            hold: Duration::from_millis(180),
            fade_out: Duration::from_millis(120),
        }
    }
}

impl VisemeConfig {
    /// Target weight for a viseme channel
    #[must_use]
    pub fn target_for(&self, channel: &str) -> f32 {
        self.intensity
            .get(channel)
            .copied()
            .unwrap_or(self.on_intensity)
            .clamp(0.0, 1.0)
    }
}

// =============================================================================
// TOML Configuration Structures
// =============================================================================

/// Service section of the TOML configuration
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ServiceToml {
    /// Animation service base URL
    pub base_url: Option<String>,
    /// Request timeout in milliseconds
    pub request_timeout_ms: Option<u64>,
}

/// Idle section of the TOML configuration
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct IdleToml {
    /// Idle pool sequence names
    pub clips: Option<Vec<String>>,
    /// Settle delay in seconds
    pub settle_delay_secs: Option<f32>,
    /// RNG seed
    pub seed: Option<u64>,
}

/// Playback section of the TOML configuration
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct PlaybackToml {
    /// Default crossfade in seconds
    pub default_crossfade_secs: Option<f32>,
    /// Minimum scheduling delay in seconds
    pub min_schedule_delay_secs: Option<f32>,
    /// Maximum frame delta in seconds
    pub max_frame_delta_secs: Option<f32>,
}

/// Expression section of the TOML configuration
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ExpressionToml {
    /// Smoothing rate constant
    pub smoothing_rate: Option<f32>,
}

/// Viseme section of the TOML configuration
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct VisemeToml {
    /// Reserved viseme channel names
    pub channels: Option<Vec<String>>,
    /// Rest marker cue names
    pub rest_markers: Option<Vec<String>>,
    /// Default "on" intensity
    pub on_intensity: Option<f32>,
    /// Per-viseme intensities
    pub intensity: Option<HashMap<String, f32>>,
    /// Fade-in window in seconds
    pub fade_in_secs: Option<f32>,
    /// Hold window in seconds
    pub hold_secs: Option<f32>,
    /// Fade-out window in seconds
    pub fade_out_secs: Option<f32>,
}

/// Breathing section of the TOML configuration
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct BreathingToml {
    /// Whether breathing runs
    pub enabled: Option<bool>,
    /// Breath period in seconds
    pub period_secs: Option<f32>,
    /// Peak rotation offset in radians
    pub amplitude: Option<f32>,
    /// Joint the offset is applied to
    pub joint: Option<String>,
}

/// Top-level TOML configuration structure
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineToml {
    /// Animation service section
    pub service: ServiceToml,
    /// Idle rotation section
    pub idle: IdleToml,
    /// Playback section
    pub playback: PlaybackToml,
    /// Expression player section
    pub expression: ExpressionToml,
    /// Viseme player section
    pub viseme: VisemeToml,
    /// Breathing section
    pub breathing: BreathingToml,
}

// =============================================================================
// Main Configuration Struct
// =============================================================================

/// Centralized configuration for the engine
///
/// Consolidates all configuration sources and tracks where values came from.
/// Use [`load_config`] to load configuration with proper priority handling.
#[derive(Clone, Debug)]
pub struct EngineConfig {
    /// Animation service connection
    pub service: ServiceConfig,
    /// Idle rotation
    pub idle: IdleConfig,
    /// Crossfades and scheduling
    pub playback: PlaybackConfig,
    /// Expression player
    pub expression: ExpressionConfig,
    /// Viseme player
    pub viseme: VisemeConfig,
    /// Initial breathing parameters
    pub breathing: BreathingConfig,
    /// Joint the breathing offset is applied to
    pub breathing_joint: String,
    /// Path to the config file that was loaded (if any)
    pub config_file_path: Option<PathBuf>,
    source: ConfigSource,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            service: ServiceConfig::default(),
            idle: IdleConfig::default(),
            playback: PlaybackConfig::default(),
            expression: ExpressionConfig::default(),
            viseme: VisemeConfig::default(),
            breathing: BreathingConfig::default(),
            breathing_joint: "chest".to_string(),
            config_file_path: None,
            source: ConfigSource::Default,
        }
    }
}

impl EngineConfig {
    /// Create a new configuration with default values
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Get the primary source of this configuration
    #[must_use]
    pub fn source(&self) -> ConfigSource {
        self.source
    }

    /// Set the configuration source
    pub fn set_source(&mut self, source: ConfigSource) {
        self.source = source;
    }

    /// Check values the engine cannot run with
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::ValidationError` describing the first bad value.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.service.base_url.trim().is_empty() {
            return Err(ConfigError::ValidationError(
                "service.base_url must not be empty".to_string(),
            ));
        }
        if self.idle.clips.iter().any(|c| c.trim().is_empty()) {
            return Err(ConfigError::ValidationError(
                "idle.clips must not contain empty names".to_string(),
            ));
        }
        if self.playback.min_schedule_delay.is_zero() {
            return Err(ConfigError::ValidationError(
                "playback.min_schedule_delay must be positive".to_string(),
            ));
        }
        if self.playback.max_frame_delta.is_zero() {
            return Err(ConfigError::ValidationError(
                "playback.max_frame_delta must be positive".to_string(),
            ));
        }
        if !(self.expression.smoothing_rate.is_finite() && self.expression.smoothing_rate > 0.0) {
            return Err(ConfigError::ValidationError(format!(
                "expression.smoothing_rate must be a positive number, got {}",
                self.expression.smoothing_rate
            )));
        }
        let on = self.viseme.on_intensity;
        if !(0.0..=1.0).contains(&on) {
            return Err(ConfigError::ValidationError(format!(
                "viseme.on_intensity must be within 0.0-1.0, got {on}"
            )));
        }
        if let Some((name, value)) = self
            .viseme
            .intensity
            .iter()
            .find(|(_, v)| !(0.0..=1.0).contains(*v))
        {
            return Err(ConfigError::ValidationError(format!(
                "viseme.intensity.{name} must be within 0.0-1.0, got {value}"
            )));
        }
        if !(self.breathing.period_seconds.is_finite() && self.breathing.period_seconds > 0.0) {
            return Err(ConfigError::ValidationError(
                "breathing.period_secs must be positive".to_string(),
            ));
        }
        if !(self.breathing.amplitude.is_finite() && self.breathing.amplitude >= 0.0) {
            return Err(ConfigError::ValidationError(
                "breathing.amplitude must be a non-negative number".to_string(),
            ));
        }
        Ok(())
    }
}

// =============================================================================
// Configuration Loading
// =============================================================================

/// Get the default configuration file path
///
/// Returns `$XDG_CONFIG_HOME/marionette/engine.toml` or
/// `~/.config/marionette/engine.toml` if `XDG_CONFIG_HOME` is not set.
#[must_use]
pub fn default_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|p| p.join("marionette").join("engine.toml"))
}

/// Load configuration from all sources with proper priority
///
/// # Errors
///
/// Returns an error if the config file exists but cannot be parsed.
/// A missing config file is not an error (defaults are used).
pub fn load_config() -> Result<EngineConfig, ConfigError> {
    load_config_from_path(default_config_path())
}

/// Load configuration from a specific path
///
/// # Arguments
///
/// * `path` - Optional path to the configuration file. If `None`, only defaults
///   and environment variables are used.
///
/// # Errors
///
/// Returns an error if the specified config file cannot be read or parsed, or
/// if the merged configuration fails validation.
pub fn load_config_from_path(path: Option<PathBuf>) -> Result<EngineConfig, ConfigError> {
    let mut config = EngineConfig::default();

    if let Some(ref config_path) = path {
        if config_path.exists() {
            let toml_content =
                std::fs::read_to_string(config_path).map_err(|e| ConfigError::ReadError {
                    path: config_path.clone(),
                    source: e,
                })?;

            let toml_config: EngineToml = toml::from_str(&toml_content)?;
            apply_toml_config(&mut config, &toml_config);
            config.config_file_path = Some(config_path.clone());
            config.source = ConfigSource::File;

            tracing::info!(
                path = %config_path.display(),
                "Loaded configuration from file"
            );
        } else {
            tracing::debug!(
                path = %config_path.display(),
                "Config file not found, using defaults"
            );
        }
    }

    apply_env_config(&mut config);
    config.validate()?;

    Ok(config)
}

/// Seconds from TOML as a `Duration`, ignoring negative or non-finite values
fn secs(value: f32) -> Option<Duration> {
    Duration::try_from_secs_f32(value).ok()
}

/// Apply TOML configuration values to the config struct
fn apply_toml_config(config: &mut EngineConfig, toml: &EngineToml) {
    // Service
    if let Some(ref url) = toml.service.base_url {
        config.service.base_url = url.clone();
    }
    if let Some(ms) = toml.service.request_timeout_ms {
        config.service.request_timeout = Duration::from_millis(ms);
    }

    // Idle
    if let Some(ref clips) = toml.idle.clips {
        config.idle.clips = clips.clone();
    }
    if let Some(delay) = toml.idle.settle_delay_secs.and_then(secs) {
        config.idle.settle_delay = delay;
    }
    if toml.idle.seed.is_some() {
        config.idle.seed = toml.idle.seed;
    }

    // Playback
    if let Some(fade) = toml.playback.default_crossfade_secs.and_then(secs) {
        config.playback.default_crossfade = fade;
    }
    if let Some(delay) = toml.playback.min_schedule_delay_secs.and_then(secs) {
        config.playback.min_schedule_delay = delay;
    }
    if let Some(delta) = toml.playback.max_frame_delta_secs.and_then(secs) {
        config.playback.max_frame_delta = delta;
    }

    // Expression
    if let Some(rate) = toml.expression.smoothing_rate {
        config.expression.smoothing_rate = rate;
    }

    // Viseme
    if let Some(ref channels) = toml.viseme.channels {
        config.viseme.channels = channels.clone();
    }
    if let Some(ref markers) = toml.viseme.rest_markers {
        config.viseme.rest_markers = markers.clone();
    }
    if let Some(on) = toml.viseme.on_intensity {
        config.viseme.on_intensity = on;
    }
    if let Some(ref table) = toml.viseme.intensity {
        config.viseme.intensity = table.clone();
    }
    if let Some(fade) = toml.viseme.fade_in_secs.and_then(secs) {
        config.viseme.fade_in = fade;
    }
    if let Some(hold) = toml.viseme.hold_secs.and_then(secs) {
        config.viseme.hold = hold;
    }
    if let Some(fade) = toml.viseme.fade_out_secs.and_then(secs) {
        config.viseme.fade_out = fade;
    }

    // Breathing
    if let Some(enabled) = toml.breathing.enabled {
        config.breathing.enabled = enabled;
    }
    if let Some(period) = toml.breathing.period_secs {
        config.breathing.period_seconds = period;
    }
    if let Some(amplitude) = toml.breathing.amplitude {
        config.breathing.amplitude = amplitude;
    }
    if let Some(ref joint) = toml.breathing.joint {
        config.breathing_joint = joint.clone();
    }
}

/// Apply environment variable overrides to the config
fn apply_env_config(config: &mut EngineConfig) {
    if let Ok(url) = std::env::var("MARIONETTE_SERVICE_URL") {
        config.service.base_url = url;
        config.source = ConfigSource::Env;
    }
    if let Ok(timeout) = std::env::var("MARIONETTE_REQUEST_TIMEOUT_MS") {
        if let Ok(ms) = timeout.parse::<u64>() {
            config.service.request_timeout = Duration::from_millis(ms);
            config.source = ConfigSource::Env;
        }
    }
    if let Ok(clips) = std::env::var("MARIONETTE_IDLE_CLIPS") {
        let clips: Vec<String> = clips
            .split(',')
            .map(str::trim)
            .filter(|c| !c.is_empty())
            .map(ToString::to_string)
            .collect();
        if !clips.is_empty() {
            config.idle.clips = clips;
            config.source = ConfigSource::Env;
        }
    }
    if let Ok(seed) = std::env::var("MARIONETTE_IDLE_SEED") {
        if let Ok(seed) = seed.parse::<u64>() {
            config.idle.seed = Some(seed);
            config.source = ConfigSource::Env;
        }
    }
    if let Ok(fade) = std::env::var("MARIONETTE_DEFAULT_CROSSFADE") {
        if let Some(fade) = fade.parse::<f32>().ok().and_then(secs) {
            config.playback.default_crossfade = fade;
            config.source = ConfigSource::Env;
        }
    }
    if let Ok(enabled) = std::env::var("MARIONETTE_BREATHING") {
        config.breathing.enabled = enabled != "0" && enabled.to_lowercase() != "false";
        config.source = ConfigSource::Env;
    }
}

// =============================================================================
// CLI Override Support
// =============================================================================

/// Builder for applying CLI overrides to configuration
///
/// Use this after [`load_config`] to apply command-line argument overrides.
#[derive(Clone, Debug, Default)]
pub struct ConfigOverrides {
    /// Animation service URL override
    pub service_url: Option<String>,

    /// Idle pool override
    pub idle_clips: Option<Vec<String>>,

    /// Breathing enabled override
    pub breathing_enabled: Option<bool>,

    /// Idle RNG seed override
    pub idle_seed: Option<u64>,
}

impl ConfigOverrides {
    /// Create a new empty set of overrides
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Set service URL override
    #[must_use]
    pub fn with_service_url(mut self, url: String) -> Self {
        self.service_url = Some(url);
        self
    }

    /// Set idle pool override
    #[must_use]
    pub fn with_idle_clips(mut self, clips: Vec<String>) -> Self {
        self.idle_clips = Some(clips);
        self
    }

    /// Set breathing enabled override
    #[must_use]
    pub fn with_breathing_enabled(mut self, enabled: bool) -> Self {
        self.breathing_enabled = Some(enabled);
        self
    }

    /// Set idle RNG seed override
    #[must_use]
    pub fn with_idle_seed(mut self, seed: u64) -> Self {
        self.idle_seed = Some(seed);
        self
    }

    /// Apply overrides to a configuration
    pub fn apply(&self, config: &mut EngineConfig) {
        if self.service_url.is_some()
            || self.idle_clips.is_some()
            || self.breathing_enabled.is_some()
            || self.idle_seed.is_some()
        {
            config.source = ConfigSource::Cli;
        }

        if let Some(ref url) = self.service_url {
            config.service.base_url = url.clone();
        }
        if let Some(ref clips) = self.idle_clips {
            config.idle.clips = clips.clone();
        }
        if let Some(enabled) = self.breathing_enabled {
            config.breathing.enabled = enabled;
        }
        if self.idle_seed.is_some() {
            config.idle.seed = self.idle_seed;
        }
    }
}

// =============================================================================
// Tests
// =============================================================================
