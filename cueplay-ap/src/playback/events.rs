//! Playback events
//!
//! Collected by the clip cache while processing device completions and
//! handed to the engine owner through [`crate::playback::AudioEngine::take_events`].

use crate::audio::AudioId;

/// Something the engine owner may want to react to
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AudioEvent {
    /// A voice stopped (naturally, by `stop`, or at the end of a fade-out)
    /// and its resources were released
    VoiceFinished(AudioId),

    /// An unreferenced clip was evicted from the cache (normalized path key)
    ClipEvicted(String),
}
