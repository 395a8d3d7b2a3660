//! Configuration for the cueplay audio core
//!
//! All tunables live in one TOML file. Every field has a built-in default,
//! so an empty or missing file yields the stock behaviour.
//!
//! ```toml
//! [cache]
//! eviction_timeout_secs = 60.0
//!
//! [cue]
//! loop_restart_threshold = 0.9
//!
//! [mix]
//! sound_gain = 0.8
//!
//! [logging]
//! level = "debug"
//! ```

use crate::error::Result;
use cueplay_common::config::{self as common_config, LoggingConfig, CONFIG_ENV_VAR};
use serde::Deserialize;
use std::path::Path;

/// Application name used for the platform config directory
pub const APP_NAME: &str = "cueplay";

/// Top-level configuration file
#[derive(Debug, Clone, Default, Deserialize)]
pub struct AudioConfig {
    #[serde(default)]
    pub cache: CacheConfig,

    #[serde(default)]
    pub stream: StreamConfig,

    #[serde(default)]
    pub cue: CueConfig,

    #[serde(default)]
    pub mix: MixConfig,

    #[serde(default)]
    pub logging: LoggingConfig,
}

impl AudioConfig {
    /// Resolve (CLI → `CUEPLAY_CONFIG` → platform dir) and load the config.
    pub fn load(cli_path: Option<&Path>) -> Result<Self> {
        let path = common_config::resolve_config_path(cli_path, CONFIG_ENV_VAR, APP_NAME);
        let config = common_config::load_or_default(path.as_deref())?;
        Ok(config)
    }

    /// Parse a config from TOML text.
    pub fn from_toml_str(text: &str) -> Result<Self> {
        let config = toml::from_str(text).map_err(cueplay_common::Error::from)?;
        Ok(config)
    }
}

/// Clip cache timers
#[derive(Debug, Clone, Deserialize)]
pub struct CacheConfig {
    /// Unreferenced clips older than this are evicted
    #[serde(default = "default_eviction_timeout")]
    pub eviction_timeout_secs: f64,

    /// Interval between eviction sweeps
    #[serde(default = "default_sweep_interval")]
    pub sweep_interval_secs: f64,

    /// Interval between device housekeeping pumps
    #[serde(default = "default_housekeeping_interval")]
    pub housekeeping_interval_secs: f64,

    /// Capacity of the device completion queue
    #[serde(default = "default_completion_queue")]
    pub completion_queue_capacity: usize,

    /// Issue voices that wait for a source when the device has none free
    #[serde(default = "default_virtual_voices")]
    pub virtual_voices: bool,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            eviction_timeout_secs: default_eviction_timeout(),
            sweep_interval_secs: default_sweep_interval(),
            housekeeping_interval_secs: default_housekeeping_interval(),
            completion_queue_capacity: default_completion_queue(),
            virtual_voices: default_virtual_voices(),
        }
    }
}

fn default_eviction_timeout() -> f64 {
    60.0
}

fn default_sweep_interval() -> f64 {
    60.0
}

fn default_housekeeping_interval() -> f64 {
    0.125
}

fn default_completion_queue() -> usize {
    256
}

fn default_virtual_voices() -> bool {
    true
}

/// Streaming decoder sizing
#[derive(Debug, Clone, Deserialize)]
pub struct StreamConfig {
    /// Number of hardware buffers cycled per stream
    #[serde(default = "default_buffer_count")]
    pub buffer_count: usize,

    /// Interleaved 16-bit samples per hardware buffer
    #[serde(default = "default_buffer_samples")]
    pub buffer_samples: usize,
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            buffer_count: default_buffer_count(),
            buffer_samples: default_buffer_samples(),
        }
    }
}

fn default_buffer_count() -> usize {
    4
}

fn default_buffer_samples() -> usize {
    4096
}

/// Sequenced cue timing
#[derive(Debug, Clone, Deserialize)]
pub struct CueConfig {
    /// Fade applied to Start/Loop when jumping to End
    #[serde(default = "default_segment_fade_out")]
    pub segment_fade_out_secs: f32,

    /// Start hands over to Loop when this close to its end
    #[serde(default = "default_start_tolerance")]
    pub start_transition_tolerance_secs: f64,

    /// Fraction of the loop played before the next iteration starts
    #[serde(default = "default_loop_restart_threshold")]
    pub loop_restart_threshold: f64,

    /// Fade-in of the next iteration as a fraction of the remaining loop time
    #[serde(default = "default_loop_restart_fade_ratio")]
    pub loop_restart_fade_ratio: f32,

    /// Fade-out used when a loop-only cue runs out of time
    #[serde(default = "default_loop_end_fade")]
    pub loop_end_fade_secs: f32,

    /// Gain restore time when `play` hits an already playing cue
    #[serde(default = "default_reserved_restore_fade")]
    pub reserved_restore_fade_secs: f32,

    /// Fade applied to a leftover voice when a cue restarts
    #[serde(default = "default_stray_voice_fade")]
    pub stray_voice_fade_secs: f32,

    /// Fade-in of a leading Loop segment as a fraction of its length
    #[serde(default = "default_loop_fade_in_ratio")]
    pub loop_fade_in_ratio: f32,
}

impl Default for CueConfig {
    fn default() -> Self {
        Self {
            segment_fade_out_secs: default_segment_fade_out(),
            start_transition_tolerance_secs: default_start_tolerance(),
            loop_restart_threshold: default_loop_restart_threshold(),
            loop_restart_fade_ratio: default_loop_restart_fade_ratio(),
            loop_end_fade_secs: default_loop_end_fade(),
            reserved_restore_fade_secs: default_reserved_restore_fade(),
            stray_voice_fade_secs: default_stray_voice_fade(),
            loop_fade_in_ratio: default_loop_fade_in_ratio(),
        }
    }
}

fn default_segment_fade_out() -> f32 {
    0.2
}

fn default_start_tolerance() -> f64 {
    0.05
}

fn default_loop_restart_threshold() -> f64 {
    0.9
}

fn default_loop_restart_fade_ratio() -> f32 {
    0.6
}

fn default_loop_end_fade() -> f32 {
    0.1
}

fn default_reserved_restore_fade() -> f32 {
    0.5
}

fn default_stray_voice_fade() -> f32 {
    0.5
}

fn default_loop_fade_in_ratio() -> f32 {
    0.1
}

/// Startup mix levels
#[derive(Debug, Clone, Deserialize)]
pub struct MixConfig {
    /// Applied to every clip voice
    #[serde(default = "default_unit_gain")]
    pub master_gain: f32,

    /// Applied to sound (non-music) clip voices
    #[serde(default = "default_unit_gain")]
    pub sound_gain: f32,
}

impl Default for MixConfig {
    fn default() -> Self {
        Self {
            master_gain: default_unit_gain(),
            sound_gain: default_unit_gain(),
        }
    }
}

fn default_unit_gain() -> f32 {
    1.0
}
