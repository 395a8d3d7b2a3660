//! # cueplay Audio Playback Core (cueplay-ap)
//!
//! Streaming decode, clip caching and sequenced cue playback for a game engine.
//!
//! **Architecture:**
//! - [`audio`] holds the device and codec seams ([`audio::AudioOutput`],
//!   [`audio::StreamCodec`]), the shared data types, a symphonia-backed codec
//!   and a deterministic simulated device.
//! - [`playback`] holds the engine context, the clip cache with its voice
//!   arena, gain ramps, the streaming decoder, sequenced cues and the music
//!   channel.
//!
//! Everything runs on a single cooperative update tick: the owner calls
//! [`playback::AudioEngine::update`] once per frame, then updates its streams,
//! cues and music player with the same engine.

pub mod audio;
pub mod config;
pub mod error;
pub mod playback;

pub use audio::{AudioCategory, AudioId, AudioProperties};
pub use config::AudioConfig;
pub use error::{Error, Result};
pub use playback::{AudioEngine, AudioEvent, GainRamp, MusicPlayer, SequencedCue, StreamDecoder};
