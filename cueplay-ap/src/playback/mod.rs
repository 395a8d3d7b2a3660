//! Playback components
//!
//! Leaves first: [`gain_ramp`], [`stream`], [`clip_cache`], then the
//! [`engine`] context and the components driven through it: [`cue`] and
//! [`music`].

pub mod clip_cache;
pub mod cue;
pub mod engine;
pub mod events;
pub mod gain_ramp;
pub mod music;
pub mod stream;

pub use clip_cache::{normalize_path, AssetLoader, ClipCache, ClipLoader, VoiceInfo};
pub use cue::{CueDescriptor, CuePart, SequencedCue};
pub use engine::AudioEngine;
pub use events::AudioEvent;
pub use gain_ramp::{GainRamp, GainTarget};
pub use music::MusicPlayer;
pub use stream::{decode_clip, DecodedClip, StreamDecoder};
