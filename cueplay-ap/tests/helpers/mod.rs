//! Test helpers for cueplay-ap integration tests
//!
//! Provides reusable test infrastructure components:
//! - MockCodec: a trivial framed-PCM codec with an Ogg-like 3-packet header
//! - MemoryAssets: in-memory, case-insensitive asset store
//! - engine builders and a tick driver for the simulated device
//! - log_capture: counts tracing events by level while a closure runs

#![allow(dead_code)]

pub mod log_capture;
pub mod memory_assets;
pub mod mock_codec;

pub use log_capture::count_warnings;
pub use memory_assets::MemoryAssets;
pub use mock_codec::{encode_stream, sine_frames, tone, MockCodec, MockCodecFactory, StreamBuilder};

use cueplay_ap::audio::SimulatedOutput;
use cueplay_ap::playback::AudioEngine;
use cueplay_ap::AudioConfig;

/// Sample rate used by generated clips
pub const RATE: u32 = 1000;

/// Exactly representable tick (1/64 s)
pub const TICK: f64 = 0.015625;

pub type TestEngine = AudioEngine<SimulatedOutput>;

pub fn engine(assets: MemoryAssets) -> TestEngine {
    engine_with_config(assets, AudioConfig::default())
}

pub fn engine_with_config(assets: MemoryAssets, config: AudioConfig) -> TestEngine {
    AudioEngine::new(SimulatedOutput::new(), assets, MockCodecFactory, config)
}

/// Engine over a device that refuses sources beyond `limit`
pub fn engine_with_source_limit(assets: MemoryAssets, limit: usize) -> TestEngine {
    AudioEngine::new(
        SimulatedOutput::new().with_source_limit(limit),
        assets,
        MockCodecFactory,
        AudioConfig::default(),
    )
}

/// Advance the device and the engine by `dt`
pub fn tick(engine: &mut TestEngine, dt: f64) {
    engine.output_mut().advance(dt);
    engine.update(dt);
}

/// Tick until the engine clock reaches `until`
pub fn run_until(engine: &mut TestEngine, until: f64, dt: f64) {
    while engine.now() < until {
        tick(engine, dt);
    }
}
