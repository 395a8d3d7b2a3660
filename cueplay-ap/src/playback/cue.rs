//! Sequenced cues
//!
//! A [`SequencedCue`] plays up to three clips as one sound: an optional
//! Start, a Loop repeated with crossfades for as long as requested, and an
//! optional End timed to finish exactly when the requested time runs out.
//!
//! ```text
//!  Start ──(start over)──▶ Loop ──(end fits in time left)──▶ End ──▶ None
//!    │                      ▲  │
//!    │                      └──┘ crossfaded restart at 90% of loop length
//!    └──(end fits in time left)──▶ End
//! ```
//!
//! Timing is measured against the engine clock, so cues advance exactly as
//! far as the engine has been updated.

use crate::audio::output::AudioOutput;
use crate::audio::types::{AudioId, AudioProperties};
use crate::config::CueConfig;
use crate::error::{Error, Result};
use crate::playback::engine::AudioEngine;
use serde::Deserialize;
use std::path::Path;
use tracing::{debug, error, info, warn};

/// Which segment of a cue is currently sounding
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CuePart {
    /// Nothing scheduled
    #[default]
    None,
    Start,
    Loop,
    End,
}

/// On-disk cue definition (TOML).
///
/// ```toml
/// start = "engine_start.ogg"
/// loop = "engine_loop.ogg"
/// end = "engine_stop.ogg"
/// play_time = 8.0
/// gain = 0.8
/// ```
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CueDescriptor {
    pub start: Option<String>,
    #[serde(rename = "loop")]
    pub looped: Option<String>,
    pub end: Option<String>,
    /// Default play time when `play` is called with 0
    pub play_time: Option<f64>,
    pub gain: Option<f32>,
    pub relative: Option<bool>,
    pub rolloff_factor: Option<f32>,
    pub reference_distance: Option<f32>,
}

impl CueDescriptor {
    pub fn from_toml_str(text: &str) -> Result<Self> {
        toml::from_str(text).map_err(|e| Error::Format(format!("Invalid cue descriptor: {}", e)))
    }
}

#[derive(Debug, Clone)]
struct Segment {
    path: String,
    duration: f64,
}

fn duration_of(segment: &Option<Segment>) -> f64 {
    segment.as_ref().map_or(0.0, |s| s.duration)
}

/// Start/Loop/End cue with automatic transitions
#[derive(Debug, Clone)]
pub struct SequencedCue {
    start: Option<Segment>,
    looped: Option<Segment>,
    end: Option<Segment>,
    current: CuePart,
    audio_id: AudioId,
    requested: f64,
    initial_requested: f64,
    started_at: f64,
    elapsed: f64,
    loop_started: f64,
    reserved: f64,
    properties: AudioProperties,
    initial_gain: f32,
    config: CueConfig,
}

impl SequencedCue {
    /// Build a cue from clip paths. Empty or `None` paths leave that part out.
    pub fn new<O: AudioOutput>(
        engine: &mut AudioEngine<O>,
        start: Option<&str>,
        looped: Option<&str>,
        end: Option<&str>,
    ) -> Self {
        let start = Self::segment(engine, start);
        let looped = Self::segment(engine, looped);
        let end = Self::segment(engine, end);
        Self {
            start,
            looped,
            end,
            current: CuePart::None,
            audio_id: AudioId::INVALID,
            requested: 0.0,
            initial_requested: 0.0,
            started_at: 0.0,
            elapsed: 0.0,
            loop_started: 0.0,
            reserved: 0.0,
            properties: AudioProperties::listener_relative(),
            initial_gain: 1.0,
            config: engine.config().cue.clone(),
        }
    }

    /// Load a cue from a TOML descriptor read through the engine's assets.
    ///
    /// Segment paths that do not exist as given are looked up next to the
    /// descriptor by file name.
    pub fn from_descriptor<O: AudioOutput>(engine: &mut AudioEngine<O>, path: &str) -> Result<Self> {
        let bytes = engine
            .read_asset(path)
            .map_err(|e| Error::NotFound(format!("{}: {}", path, e)))?;
        let text = String::from_utf8(bytes)
            .map_err(|e| Error::Format(format!("{}: not UTF-8 ({})", path, e)))?;
        let descriptor = CueDescriptor::from_toml_str(&text)?;
        Self::from_parts(engine, path, &descriptor)
    }

    /// Build a cue from an already parsed descriptor located at `descriptor_path`.
    pub fn from_parts<O: AudioOutput>(
        engine: &mut AudioEngine<O>,
        descriptor_path: &str,
        descriptor: &CueDescriptor,
    ) -> Result<Self> {
        let resolve = |segment: &Option<String>| {
            segment
                .as_deref()
                .filter(|p| !p.is_empty())
                .and_then(|p| resolve_segment(&*engine, descriptor_path, p))
        };
        let start = resolve(&descriptor.start);
        let looped = resolve(&descriptor.looped);
        let end = resolve(&descriptor.end);

        let mut cue = Self::new(engine, start.as_deref(), looped.as_deref(), end.as_deref());
        if cue.start.is_none() && cue.looped.is_none() && cue.end.is_none() {
            return Err(Error::NotFound(format!(
                "{}: cue has no playable segment",
                descriptor_path
            )));
        }

        if let Some(play_time) = descriptor.play_time {
            cue.requested = play_time;
            cue.initial_requested = play_time;
        }
        if let Some(gain) = descriptor.gain {
            cue.properties.gain = gain;
            cue.initial_gain = gain;
        }
        if let Some(relative) = descriptor.relative {
            cue.properties.relative = relative;
        }
        if let Some(factor) = descriptor.rolloff_factor {
            cue.properties.rolloff_factor = factor;
        }
        if let Some(distance) = descriptor.reference_distance {
            cue.properties.reference_distance = distance;
        }
        Ok(cue)
    }

    fn segment<O: AudioOutput>(engine: &mut AudioEngine<O>, path: Option<&str>) -> Option<Segment> {
        let path = path.filter(|p| !p.is_empty())?;
        let duration = engine.clip_length(path) as f64;
        if duration <= 0.0 {
            error!("Cue segment {} has no playable audio; leaving it out", path);
            return None;
        }
        Some(Segment {
            path: path.to_string(),
            duration,
        })
    }

    // ========================================
    // Playback
    // ========================================

    /// Play for `for_sec` seconds (0 = the descriptor's play time).
    ///
    /// If the cue is already playing, the request is kept and replayed once
    /// the current run finishes, and the voice is faded back to full gain.
    pub fn play<O: AudioOutput>(&mut self, engine: &mut AudioEngine<O>, for_sec: f64) {
        if self.is_playing() {
            info!("Cue already playing; reserving {:.2}s", for_sec);
            self.reserved = for_sec;
            engine.set_gain_smooth(
                self.audio_id,
                self.properties.gain,
                self.config.reserved_restore_fade_secs,
            );
            return;
        }

        if self.audio_id.is_valid() {
            engine.stop_with_fade_out(self.audio_id, self.config.stray_voice_fade_secs);
            self.audio_id = AudioId::INVALID;
        }

        self.requested = if for_sec > 0.0 {
            for_sec
        } else {
            self.initial_requested
        };
        let start_len = duration_of(&self.start);
        let end_len = duration_of(&self.end);
        if self.looped.is_none() && for_sec > start_len + end_len {
            warn!(
                "No loop segment: cue will finish after {:.2}s instead of the requested {:.2}s (start: {}, end: {})",
                start_len + end_len,
                for_sec,
                self.start.as_ref().map_or("-", |s| s.path.as_str()),
                self.end.as_ref().map_or("-", |s| s.path.as_str()),
            );
        }

        self.started_at = engine.now();
        self.elapsed = 0.0;

        if let Some(start) = &self.start {
            self.current = CuePart::Start;
            self.audio_id = engine.play_clip_with(&start.path, self.properties);
        } else if let Some(looped) = &self.looped {
            self.current = CuePart::Loop;
            let fade_in = looped.duration as f32 * self.config.loop_fade_in_ratio;
            self.audio_id = engine.play_clip_with_fade_in(&looped.path, self.properties, fade_in);
            self.loop_started = 0.0;
        } else if let Some(end) = &self.end {
            self.current = CuePart::End;
            self.audio_id = engine.play_clip_with(&end.path, self.properties);
        } else {
            self.current = CuePart::None;
        }
        debug!("Cue started in {:?} for {:.2}s", self.current, self.requested);
    }

    /// Add `for_sec` to the requested play time of a running cue.
    pub fn extend_time(&mut self, for_sec: f64) {
        if self.current != CuePart::None {
            self.requested += for_sec;
        } else {
            error!(
                "Cannot extend time of an idle cue ({}, {}, {})",
                self.start.as_ref().map_or("-", |s| s.path.as_str()),
                self.looped.as_ref().map_or("-", |s| s.path.as_str()),
                self.end.as_ref().map_or("-", |s| s.path.as_str()),
            );
        }
    }

    /// Set the requested play time without starting anything
    pub fn set_request_time(&mut self, seconds: f64) {
        self.requested = seconds;
    }

    /// Stop the cue, fading the active voice over `fade_out` seconds.
    ///
    /// With `play_end`, the End segment (if any) is played once, untracked.
    pub fn stop<O: AudioOutput>(&mut self, engine: &mut AudioEngine<O>, fade_out: f32, play_end: bool) {
        if self.audio_id.is_valid() {
            engine.stop_with_fade_out(self.audio_id, fade_out);
            self.audio_id = AudioId::INVALID;
        }
        if play_end {
            if let Some(end) = &self.end {
                engine.play_clip_with(&end.path, self.properties);
            }
        }
        self.current = CuePart::None;
        self.reserved = 0.0;
    }

    pub fn is_playing(&self) -> bool {
        self.audio_id.is_valid() && self.current != CuePart::None
    }

    pub fn current_part(&self) -> CuePart {
        self.current
    }

    /// Voice of the currently sounding segment
    pub fn audio_id(&self) -> AudioId {
        self.audio_id
    }

    pub fn requested_time(&self) -> f64 {
        self.requested
    }

    /// Seconds since the last `play`, as of the last update
    pub fn elapsed(&self) -> f64 {
        self.elapsed
    }

    /// Advance the state machine. Returns `true` once no voice is active.
    pub fn update<O: AudioOutput>(&mut self, engine: &mut AudioEngine<O>) -> bool {
        if self.audio_id.is_valid() && !engine.is_voice_active(self.audio_id) {
            self.audio_id = AudioId::INVALID;
            if self.current == CuePart::End {
                debug!("Cue end segment finished");
                self.current = CuePart::None;
            }
        }

        self.elapsed = engine.now() - self.started_at;
        let left = self.requested - self.elapsed;
        let end_len = duration_of(&self.end);

        match self.current {
            CuePart::Start => {
                if end_len >= left {
                    self.jump_to_end(engine);
                } else if duration_of(&self.start) - self.elapsed <= self.config.start_transition_tolerance_secs {
                    if let Some(looped) = &self.looped {
                        debug!("Cue Start -> Loop at {:.3}s", self.elapsed);
                        self.current = CuePart::Loop;
                        self.audio_id = engine.play_clip_with(&looped.path, self.properties);
                        self.loop_started = self.elapsed;
                    } else if let Some(end) = &self.end {
                        debug!("Cue Start -> End at {:.3}s", self.elapsed);
                        self.current = CuePart::End;
                        self.audio_id = engine.play_clip_with(&end.path, self.properties);
                    }
                }
                if self.current == CuePart::Start && !self.audio_id.is_valid() {
                    debug!("Cue start segment finished with nothing to follow at {:.3}s", self.elapsed);
                    self.current = CuePart::None;
                }
            }
            CuePart::Loop => {
                if end_len >= left {
                    self.jump_to_end(engine);
                } else {
                    self.maybe_restart_loop(engine);
                    if self.end.is_none() && left <= self.config.loop_end_fade_secs as f64 {
                        debug!("Cue loop ran out of time at {:.3}s", self.elapsed);
                        if self.audio_id.is_valid() {
                            engine.stop_with_fade_out(self.audio_id, self.config.loop_end_fade_secs);
                        }
                        self.audio_id = AudioId::INVALID;
                        self.current = CuePart::None;
                        return true;
                    }
                }
            }
            CuePart::End | CuePart::None => {}
        }

        if self.current == CuePart::None && self.reserved > 0.0 {
            let reserved = self.reserved;
            self.reserved = 0.0;
            self.play(engine, reserved);
            return false;
        }

        !self.audio_id.is_valid() && self.current == CuePart::None
    }

    /// Fade out the current segment and go to End (or finish if there is none)
    fn jump_to_end<O: AudioOutput>(&mut self, engine: &mut AudioEngine<O>) {
        if self.audio_id.is_valid() {
            engine.stop_with_fade_out(self.audio_id, self.config.segment_fade_out_secs);
        }
        match &self.end {
            Some(end) => {
                debug!("Cue {:?} -> End at {:.3}s", self.current, self.elapsed);
                self.audio_id = engine.play_clip_with(&end.path, self.properties);
                self.current = CuePart::End;
            }
            None => {
                debug!("Cue {:?} -> None at {:.3}s", self.current, self.elapsed);
                self.current = CuePart::None;
            }
        }
    }

    /// Crossfade into a fresh loop voice once the current one is nearly over
    fn maybe_restart_loop<O: AudioOutput>(&mut self, engine: &mut AudioEngine<O>) {
        let Some(looped) = &self.looped else {
            return;
        };
        let played = self.elapsed - self.loop_started;
        if played / looped.duration <= self.config.loop_restart_threshold {
            return;
        }

        let remain = (looped.duration - played).max(0.0) as f32;
        if self.audio_id.is_valid() {
            engine.stop_with_fade_out(self.audio_id, remain);
        }
        let fade_in = remain * self.config.loop_restart_fade_ratio;
        self.audio_id = engine.play_clip_with_fade_in(&looped.path, self.properties, fade_in);
        if !self.audio_id.is_valid() {
            error!("Failed to restart loop segment {}", looped.path);
        }
        debug!(
            "Cue loop restart at {:.3}s (fade out {:.3}s, fade in {:.3}s)",
            self.elapsed, remain, fade_in
        );
        self.loop_started = self.elapsed;
    }

    // ========================================
    // Properties
    // ========================================

    pub fn set_position<O: AudioOutput>(&mut self, engine: &mut AudioEngine<O>, x: f32, y: f32, z: f32) {
        self.properties.position = [x, y, z];
        if self.audio_id.is_valid() {
            engine.set_position(self.audio_id, x, y, z);
        }
    }

    pub fn set_relative<O: AudioOutput>(&mut self, engine: &mut AudioEngine<O>, relative: bool) {
        self.properties.relative = relative;
        if self.audio_id.is_valid() {
            engine.set_relative(self.audio_id, relative);
        }
    }

    pub fn set_reference_distance<O: AudioOutput>(&mut self, engine: &mut AudioEngine<O>, distance: f32) {
        self.properties.reference_distance = distance;
        if self.audio_id.is_valid() {
            engine.set_reference_distance(self.audio_id, distance);
        }
    }

    pub fn set_rolloff_factor<O: AudioOutput>(&mut self, engine: &mut AudioEngine<O>, factor: f32) {
        self.properties.rolloff_factor = factor;
        if self.audio_id.is_valid() {
            engine.set_rolloff_factor(self.audio_id, factor);
        }
    }

    /// Set gain relative to the cue's initial gain.
    ///
    /// Gain 0 fades the cue out; a positive gain restarts an idle cue that
    /// still has a requested time.
    pub fn set_gain<O: AudioOutput>(&mut self, engine: &mut AudioEngine<O>, gain: f32) {
        if self.current == CuePart::None {
            return;
        }
        let gain = gain.max(0.0) * self.initial_gain;
        self.properties.gain = gain;
        if self.audio_id.is_valid() {
            engine.set_gain(self.audio_id, gain, true);
        }

        if gain == 0.0 {
            if self.audio_id.is_valid() {
                self.stop(engine, self.config.stray_voice_fade_secs, false);
            }
        } else if !self.is_playing() && self.requested > 0.0 {
            self.play(engine, self.requested);
        }
    }

    /// Ramp gain (relative to the initial gain) over `seconds`.
    pub fn set_gain_smooth<O: AudioOutput>(&mut self, engine: &mut AudioEngine<O>, gain: f32, seconds: f32) {
        let gain = gain.max(0.0) * self.initial_gain;
        if gain > 0.0 && !self.is_playing() {
            self.properties.gain = gain;
            self.play(engine, self.requested);
        } else if self.audio_id.is_valid() {
            engine.set_gain_smooth(self.audio_id, gain, seconds);
            self.properties.gain = gain;
        }
    }

    pub fn properties(&self) -> &AudioProperties {
        &self.properties
    }
}

/// Find a segment file as given, or next to the descriptor by file name
fn resolve_segment<O: AudioOutput>(engine: &AudioEngine<O>, descriptor_path: &str, segment: &str) -> Option<String> {
    if engine.asset_exists(segment) {
        return Some(segment.to_string());
    }

    let file_name = Path::new(segment).file_name()?;
    let sibling = Path::new(descriptor_path).with_file_name(file_name);
    let sibling = sibling.to_string_lossy().into_owned();
    if engine.asset_exists(&sibling) {
        debug!("Resolved cue segment {} as {}", segment, sibling);
        return Some(sibling);
    }

    error!("Cannot find audio file ({} or {})", segment, sibling);
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_descriptor_parses_loop_keyword() {
        let descriptor = CueDescriptor::from_toml_str(
            r#"
            start = "a.ogg"
            loop = "b.ogg"
            play_time = 4.5
            gain = 0.5
            "#,
        )
        .unwrap();
        assert_eq!(descriptor.start.as_deref(), Some("a.ogg"));
        assert_eq!(descriptor.looped.as_deref(), Some("b.ogg"));
        assert_eq!(descriptor.end, None);
        assert_eq!(descriptor.play_time, Some(4.5));
        assert_eq!(descriptor.gain, Some(0.5));
    }

    #[test]
    fn test_descriptor_rejects_unknown_keys() {
        assert!(matches!(
            CueDescriptor::from_toml_str("intro = \"a.ogg\""),
            Err(Error::Format(_))
        ));
    }
}
