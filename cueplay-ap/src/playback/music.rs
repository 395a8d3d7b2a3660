//! Background music channel
//!
//! One looping track at a time. Changing track fades the old one out and
//! can delay the start of the new one; the delay is counted down by
//! [`MusicPlayer::update`].
//!
//! Tracks play in the [`AudioCategory::Music`] mix category, so the engine's
//! sound gain does not touch them.

use crate::audio::output::AudioOutput;
use crate::audio::types::{AudioCategory, AudioId, AudioProperties};
use crate::playback::engine::AudioEngine;
use tracing::{debug, info};

/// Background music player
#[derive(Debug, Clone)]
pub struct MusicPlayer {
    current: AudioId,
    path: Option<String>,
    /// Per-track gain
    track_gain: f32,
    /// Master music gain
    master_gain: f32,
    /// Seconds until the pending track starts (0 = nothing pending)
    start_after: f32,
    looping: bool,
}

impl Default for MusicPlayer {
    fn default() -> Self {
        Self::new()
    }
}

impl MusicPlayer {
    pub fn new() -> Self {
        Self {
            current: AudioId::INVALID,
            path: None,
            track_gain: 1.0,
            master_gain: 1.0,
            start_after: 0.0,
            looping: true,
        }
    }

    /// Fade out the current track over `fade_out_old` and start `path` looping.
    pub fn play_music<O: AudioOutput>(&mut self, engine: &mut AudioEngine<O>, path: &str, fade_out_old: f32) {
        self.play_music_looped(engine, path, fade_out_old, true);
    }

    pub fn play_music_looped<O: AudioOutput>(
        &mut self,
        engine: &mut AudioEngine<O>,
        path: &str,
        fade_out_old: f32,
        looping: bool,
    ) {
        if path.is_empty() {
            return;
        }
        self.release_current(engine, fade_out_old);
        self.start_after = 0.0;

        let properties = AudioProperties::listener_relative()
            .with_gain(self.track_gain * self.master_gain)
            .with_looping(looping)
            .with_category(AudioCategory::Music);
        self.current = engine.play_clip_with(path, properties);
        self.path = Some(path.to_string());
        self.looping = looping;
        info!("Music: {} ({})", path, self.current);
    }

    /// Switch to `path`, starting it `start_new_after` seconds from now.
    pub fn change_music<O: AudioOutput>(
        &mut self,
        engine: &mut AudioEngine<O>,
        path: &str,
        fade_out_old: f32,
        start_new_after: f32,
    ) {
        if path.is_empty() {
            return;
        }
        let delay = start_new_after.max(0.0);
        if delay == 0.0 {
            self.play_music(engine, path, fade_out_old);
            return;
        }

        self.release_current(engine, fade_out_old);
        self.path = Some(path.to_string());
        self.looping = true;
        self.start_after = delay;
        debug!("Music: {} scheduled in {:.2}s", path, delay);
    }

    /// Fade out and forget the current track; cancels a pending change.
    pub fn stop_music<O: AudioOutput>(&mut self, engine: &mut AudioEngine<O>, fade_out: f32) {
        self.start_after = 0.0;
        self.release_current(engine, fade_out);
    }

    /// Count down a pending track change.
    pub fn update<O: AudioOutput>(&mut self, engine: &mut AudioEngine<O>, dt: f32) {
        if self.start_after <= 0.0 {
            return;
        }
        self.start_after -= dt;
        if self.start_after <= 0.0 {
            self.start_after = 0.0;
            if let Some(path) = self.path.clone() {
                let looping = self.looping;
                self.play_music_looped(engine, &path, 0.0, looping);
            }
        }
    }

    pub fn is_playing<O: AudioOutput>(&self, engine: &AudioEngine<O>) -> bool {
        engine.is_voice_active(self.current)
    }

    /// A track change is waiting for its delay
    pub fn is_pending(&self) -> bool {
        self.start_after > 0.0
    }

    /// Set the master music gain
    pub fn set_gain<O: AudioOutput>(&mut self, engine: &mut AudioEngine<O>, gain: f32) {
        self.master_gain = gain;
        if self.current.is_valid() {
            engine.set_gain(self.current, self.track_gain * self.master_gain, true);
        }
    }

    /// Master music gain
    pub fn gain(&self) -> f32 {
        self.master_gain
    }

    /// Re-enabling restarts the last track
    pub fn set_enabled<O: AudioOutput>(&mut self, engine: &mut AudioEngine<O>, enabled: bool) {
        if !enabled {
            return;
        }
        if let Some(path) = self.path.clone() {
            self.play_music(engine, &path, 0.0);
        }
    }

    pub fn current_track(&self) -> Option<&str> {
        self.path.as_deref()
    }

    pub fn audio_id(&self) -> AudioId {
        self.current
    }

    fn release_current<O: AudioOutput>(&mut self, engine: &mut AudioEngine<O>, fade_out: f32) {
        if self.current.is_valid() {
            engine.set_loop(self.current, false);
            engine.stop_with_fade_out(self.current, fade_out);
            self.current = AudioId::INVALID;
        }
    }
}
