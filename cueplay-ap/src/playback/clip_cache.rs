//! Clip cache and voice arena
//!
//! Short clips are decoded once into a single device buffer and shared by
//! every voice that plays them. Each clip is reference counted by its live
//! voices; unreferenced clips are evicted by a periodic sweep once they have
//! not been played for the eviction timeout.
//!
//! Voices live in a generation-checked arena. The device reports the end of
//! a voice by pushing the voice's [`CompletionToken`] into the completion
//! queue; a token whose generation no longer matches its slot is stale and
//! ignored.
//!
//! When the device has no free source, a voice is still issued but waits
//! without one. A waiting voice keeps its id, counts its play time and
//! takes over the next free source at the position it would have reached;
//! a non-looping one that runs past its clip's end finishes without ever
//! sounding.
//!
//! Voice gains are kept before mixing. The device receives the voice gain
//! scaled by the master gain and, for [`AudioCategory::Sound`] voices, the
//! sound gain.
//!
//! **Update order per tick:** pump device housekeeping (on its interval),
//! drain completions, advance waiting voices, advance gain ramps, sweep (on
//! its interval).

use crate::audio::assets::AssetReader;
use crate::audio::codec::CodecFactory;
use crate::audio::output::{completion_channel, AudioOutput, CompletionQueue, CompletionToken};
use crate::audio::types::{
    AudioCategory, AudioId, AudioIdAllocator, AudioProperties, BufferHandle, SourceHandle, SourceState,
};
use crate::config::CacheConfig;
use crate::error::{Error, Result};
use crate::playback::events::AudioEvent;
use crate::playback::gain_ramp::{GainRamp, GainTarget};
use crate::playback::stream::{decode_clip, DecodedClip};
use std::collections::HashMap;
use tracing::{debug, error, info, trace, warn};

/// Case-insensitive cache key with forward slashes
pub fn normalize_path(path: &str) -> String {
    path.replace('\\', "/").to_lowercase()
}

/// Loads a clip for caching
pub trait ClipLoader {
    fn load(&self, path: &str) -> Result<DecodedClip>;
}

/// [`ClipLoader`] reading through an [`AssetReader`] and a [`CodecFactory`]
pub struct AssetLoader<'a> {
    pub reader: &'a dyn AssetReader,
    pub codecs: &'a dyn CodecFactory,
}

impl ClipLoader for AssetLoader<'_> {
    fn load(&self, path: &str) -> Result<DecodedClip> {
        decode_clip(path, self.reader, self.codecs)
    }
}

#[derive(Debug)]
struct CachedClip {
    buffer: BufferHandle,
    length: f32,
    last_access: f64,
    ref_count: u32,
}

#[derive(Debug)]
struct Voice {
    id: AudioId,
    /// `None` while the voice waits for a free device source
    source: Option<SourceHandle>,
    clip_key: String,
    properties: AudioProperties,
    /// Current gain, before mixing
    gain: f32,
    /// Seconds played while waiting
    waited: f64,
}

#[derive(Debug, Default)]
struct Slot {
    generation: u32,
    voice: Option<Voice>,
}

#[derive(Debug)]
struct ActiveRamp {
    ramp: GainRamp,
    /// Stop the voice when the ramp completes (fade-out)
    stop_when_done: bool,
}

/// Per-category gain applied on top of every voice gain
#[derive(Debug, Clone, Copy, PartialEq)]
struct Mix {
    master: f32,
    sound: f32,
}

impl Mix {
    fn scale(&self, category: AudioCategory) -> f32 {
        match category {
            AudioCategory::Sound => self.master * self.sound,
            AudioCategory::Music => self.master,
        }
    }
}

/// Snapshot of one live voice
#[derive(Debug, Clone, PartialEq)]
pub struct VoiceInfo {
    pub id: AudioId,
    pub clip: String,
    /// Voice gain before mixing
    pub gain: f32,
    pub position: [f32; 3],
    pub looping: bool,
    pub category: AudioCategory,
    /// Waiting for a device source
    pub waiting: bool,
    pub state: SourceState,
}

fn find_voice<'s>(
    slots: &'s [Slot],
    index: &HashMap<AudioId, CompletionToken>,
    id: AudioId,
) -> Option<&'s Voice> {
    let token = index.get(&id)?;
    let slot = slots.get(token.index as usize)?;
    if slot.generation != token.generation {
        return None;
    }
    slot.voice.as_ref()
}

fn find_voice_mut<'s>(
    slots: &'s mut [Slot],
    index: &HashMap<AudioId, CompletionToken>,
    id: AudioId,
) -> Option<&'s mut Voice> {
    let token = index.get(&id)?;
    let slot = slots.get_mut(token.index as usize)?;
    if slot.generation != token.generation {
        return None;
    }
    slot.voice.as_mut()
}

/// Applies ramp gains to live voices only
struct VoiceGains<'a> {
    slots: &'a mut [Slot],
    index: &'a HashMap<AudioId, CompletionToken>,
    output: &'a mut dyn AudioOutput,
    mix: Mix,
}

impl GainTarget for VoiceGains<'_> {
    fn set_gain(&mut self, id: AudioId, gain: f32) -> bool {
        match find_voice_mut(self.slots, self.index, id) {
            Some(voice) => {
                voice.gain = gain;
                if let Some(source) = voice.source {
                    self.output
                        .set_gain(source, gain * self.mix.scale(voice.properties.category));
                }
                true
            }
            None => false,
        }
    }

    fn gain(&self, id: AudioId) -> Option<f32> {
        find_voice(&*self.slots, self.index, id).map(|voice| voice.gain)
    }
}

/// Reference-counted clip cache owning every clip voice
pub struct ClipCache {
    config: CacheConfig,
    clips: HashMap<String, CachedClip>,
    slots: Vec<Slot>,
    free_slots: Vec<u32>,
    index: HashMap<AudioId, CompletionToken>,
    ramps: HashMap<AudioId, ActiveRamp>,
    completions: CompletionQueue,
    ids: AudioIdAllocator,
    events: Vec<AudioEvent>,
    mix: Mix,
    now: f64,
    pump_timer: f64,
    sweep_timer: f64,
}

impl ClipCache {
    /// Create a cache and attach its completion queue to `output`.
    pub fn new(config: CacheConfig, output: &mut dyn AudioOutput) -> Self {
        let (sink, completions) = completion_channel(config.completion_queue_capacity);
        output.attach_completion_sink(sink);
        Self {
            config,
            clips: HashMap::new(),
            slots: Vec::new(),
            free_slots: Vec::new(),
            index: HashMap::new(),
            ramps: HashMap::new(),
            completions,
            ids: AudioIdAllocator::new(),
            events: Vec::new(),
            mix: Mix {
                master: 1.0,
                sound: 1.0,
            },
            now: 0.0,
            pump_timer: 0.0,
            sweep_timer: 0.0,
        }
    }

    /// Seconds accumulated through [`ClipCache::update`]
    pub fn now(&self) -> f64 {
        self.now
    }

    /// Start a new voice playing `path`.
    ///
    /// Returns [`AudioId::INVALID`] (after logging) if the clip cannot be
    /// loaded, or if the device refuses a source and waiting voices are
    /// disabled.
    pub fn play_clip(
        &mut self,
        output: &mut dyn AudioOutput,
        loader: &dyn ClipLoader,
        path: &str,
        properties: AudioProperties,
    ) -> AudioId {
        match self.start_voice(output, loader, path, properties) {
            Ok(id) => id,
            Err(e) => {
                report(&e);
                AudioId::INVALID
            }
        }
    }

    /// Start a voice at gain 0 and ramp it to `properties.gain`.
    ///
    /// The fade never outlasts the clip.
    pub fn play_clip_with_fade_in(
        &mut self,
        output: &mut dyn AudioOutput,
        loader: &dyn ClipLoader,
        path: &str,
        properties: AudioProperties,
        seconds: f32,
    ) -> AudioId {
        let target = properties.gain;
        let id = self.play_clip(output, loader, path, properties.with_gain(0.0));
        if !id.is_valid() {
            return id;
        }

        let length = self.voice_length(id).unwrap_or(0.0);
        let seconds = seconds.min(length);
        if seconds <= 0.0 {
            self.set_gain(output, id, target, false);
            return id;
        }

        let mut gains = VoiceGains {
            slots: &mut self.slots,
            index: &self.index,
            output,
            mix: self.mix,
        };
        let ramp = GainRamp::over(id, seconds, 0.0, target, &mut gains);
        self.ramps.insert(
            id,
            ActiveRamp {
                ramp,
                stop_when_done: false,
            },
        );
        if let Some(voice) = self.voice_mut(id) {
            voice.properties.gain = target;
        }
        id
    }

    /// Stop a voice immediately.
    ///
    /// Its resources are released when the device reports completion; a
    /// waiting voice is released at once.
    pub fn stop(&mut self, output: &mut dyn AudioOutput, id: AudioId) -> bool {
        let Some(source) = self.voice_or_report(id).map(|v| v.source) else {
            return false;
        };
        self.ramps.remove(&id);
        match source {
            Some(source) => output.stop(source),
            None => self.release(output, id),
        }
        debug!("Stopped voice {}", id);
        true
    }

    /// Fade a voice to silence over `seconds`, then stop it.
    pub fn stop_with_fade_out(&mut self, output: &mut dyn AudioOutput, id: AudioId, seconds: f32) -> bool {
        if seconds <= 0.0 {
            return self.stop(output, id);
        }
        let Some(current) = self.voice_or_report(id).map(|v| v.gain) else {
            return false;
        };

        let mut gains = VoiceGains {
            slots: &mut self.slots,
            index: &self.index,
            output,
            mix: self.mix,
        };
        let ramp = GainRamp::over(id, seconds, current, 0.0, &mut gains);
        self.ramps.insert(
            id,
            ActiveRamp {
                ramp,
                stop_when_done: true,
            },
        );
        trace!("Fading out voice {} over {:.2}s", id, seconds);
        true
    }

    pub fn set_position(&mut self, output: &mut dyn AudioOutput, id: AudioId, position: [f32; 3]) -> bool {
        self.with_voice(id, |voice| {
            voice.properties.position = position;
            if let Some(source) = voice.source {
                output.set_position(source, position);
            }
        })
    }

    pub fn set_relative(&mut self, output: &mut dyn AudioOutput, id: AudioId, relative: bool) -> bool {
        self.with_voice(id, |voice| {
            voice.properties.relative = relative;
            if let Some(source) = voice.source {
                output.set_relative(source, relative);
            }
        })
    }

    pub fn set_reference_distance(&mut self, output: &mut dyn AudioOutput, id: AudioId, distance: f32) -> bool {
        self.with_voice(id, |voice| {
            voice.properties.reference_distance = distance;
            if let Some(source) = voice.source {
                output.set_reference_distance(source, distance);
            }
        })
    }

    pub fn set_max_distance(&mut self, output: &mut dyn AudioOutput, id: AudioId, distance: f32) -> bool {
        self.with_voice(id, |voice| {
            voice.properties.max_distance = distance;
            if let Some(source) = voice.source {
                output.set_max_distance(source, distance);
            }
        })
    }

    pub fn set_rolloff_factor(&mut self, output: &mut dyn AudioOutput, id: AudioId, factor: f32) -> bool {
        self.with_voice(id, |voice| {
            voice.properties.rolloff_factor = factor;
            if let Some(source) = voice.source {
                output.set_rolloff_factor(source, factor);
            }
        })
    }

    pub fn set_loop(&mut self, output: &mut dyn AudioOutput, id: AudioId, looping: bool) -> bool {
        self.with_voice(id, |voice| {
            voice.properties.looping = looping;
            if let Some(source) = voice.source {
                output.set_looping(source, looping);
            }
        })
    }

    /// Set a voice's gain.
    ///
    /// With `check_ramp`, a running ramp is retargeted to `gain` instead of
    /// being overridden.
    pub fn set_gain(&mut self, output: &mut dyn AudioOutput, id: AudioId, gain: f32, check_ramp: bool) -> bool {
        if check_ramp && self.ramps.contains_key(&id) && self.voice(id).is_some() {
            let gains = VoiceGains {
                slots: &mut self.slots,
                index: &self.index,
                output,
                mix: self.mix,
            };
            if let Some(active) = self.ramps.get_mut(&id) {
                active.ramp.retarget(gain, &gains);
                active.stop_when_done &= gain <= 0.0;
            }
            if let Some(voice) = self.voice_mut(id) {
                voice.properties.gain = gain;
            }
            return true;
        }

        let mix = self.mix;
        self.with_voice(id, |voice| {
            voice.properties.gain = gain;
            voice.gain = gain;
            if let Some(source) = voice.source {
                output.set_gain(source, gain * mix.scale(voice.properties.category));
            }
        })
    }

    /// Ramp a voice's gain to `gain` over `seconds`, replacing any running ramp.
    pub fn set_gain_smooth(&mut self, output: &mut dyn AudioOutput, id: AudioId, gain: f32, seconds: f32) -> bool {
        let Some(current) = self.voice_or_report(id).map(|v| v.gain) else {
            return false;
        };
        if seconds <= 0.0 {
            self.ramps.remove(&id);
            return self.set_gain(output, id, gain, false);
        }

        let mut gains = VoiceGains {
            slots: &mut self.slots,
            index: &self.index,
            output,
            mix: self.mix,
        };
        let ramp = GainRamp::over(id, seconds, current, gain, &mut gains);
        self.ramps.insert(
            id,
            ActiveRamp {
                ramp,
                stop_when_done: false,
            },
        );
        if let Some(voice) = self.voice_mut(id) {
            voice.properties.gain = gain;
        }
        true
    }

    /// Current gain of a voice, before mixing
    pub fn gain(&self, id: AudioId) -> Option<f32> {
        self.voice(id).map(|v| v.gain)
    }

    /// A gain ramp is running on this voice
    pub fn has_ramp(&self, id: AudioId) -> bool {
        self.ramps.contains_key(&id)
    }

    // ========================================
    // Mix
    // ========================================

    /// Gain applied to every voice
    pub fn set_master_gain(&mut self, output: &mut dyn AudioOutput, gain: f32) {
        self.mix.master = gain.max(0.0);
        info!("Master gain {:.2}", self.mix.master);
        self.remix(output);
    }

    pub fn master_gain(&self) -> f32 {
        self.mix.master
    }

    /// Gain applied to [`AudioCategory::Sound`] voices
    pub fn set_sound_gain(&mut self, output: &mut dyn AudioOutput, gain: f32) {
        self.mix.sound = gain.max(0.0);
        info!("Sound gain {:.2}", self.mix.sound);
        self.remix(output);
    }

    pub fn sound_gain(&self) -> f32 {
        self.mix.sound
    }

    /// Push every sounding voice's mixed gain to the device
    fn remix(&mut self, output: &mut dyn AudioOutput) {
        let mix = self.mix;
        for voice in self.slots.iter().filter_map(|slot| slot.voice.as_ref()) {
            if let Some(source) = voice.source {
                output.set_gain(source, voice.gain * mix.scale(voice.properties.category));
            }
        }
    }

    // ========================================
    // Play position
    // ========================================

    /// Seek a voice to `seconds` into its clip
    pub fn set_offset(&mut self, output: &mut dyn AudioOutput, id: AudioId, seconds: f32) -> bool {
        self.with_voice(id, |voice| match voice.source {
            Some(source) => output.set_offset(source, seconds),
            None => voice.waited = seconds.max(0.0) as f64,
        })
    }

    /// Seconds into its clip a voice has played
    pub fn offset(&self, output: &dyn AudioOutput, id: AudioId) -> Option<f32> {
        let voice = self.voice(id)?;
        let length = self.clips.get(&voice.clip_key)?.length;
        Some(match voice.source {
            Some(source) => output.offset(source),
            None if voice.properties.looping && length > 0.0 => (voice.waited % length as f64) as f32,
            None => voice.waited as f32,
        })
    }

    /// Seconds left before a voice reaches the end of its clip
    pub fn time_left(&self, output: &dyn AudioOutput, id: AudioId) -> Option<f32> {
        let length = self.voice_length(id)?;
        let offset = self.offset(output, id)?;
        Some((length - offset).max(0.0))
    }

    /// Length of the clip a voice plays
    pub fn voice_length(&self, id: AudioId) -> Option<f32> {
        let voice = self.voice(id)?;
        self.clips.get(&voice.clip_key).map(|c| c.length)
    }

    // ========================================
    // Tick
    // ========================================

    /// Tear down the voice a completion token refers to.
    ///
    /// Stale tokens (slot reused or already released) are ignored.
    pub fn on_voice_finished(&mut self, output: &mut dyn AudioOutput, token: CompletionToken) {
        let Some(slot) = self.slots.get_mut(token.index as usize) else {
            warn!("Completion for unknown slot {}", token.index);
            return;
        };
        if slot.generation != token.generation {
            trace!(
                "Stale completion (slot {}, gen {} != {})",
                token.index,
                token.generation,
                slot.generation
            );
            return;
        }
        let Some(voice) = slot.voice.take() else {
            return;
        };
        slot.generation = slot.generation.wrapping_add(1);
        self.free_slots.push(token.index);
        self.index.remove(&voice.id);
        self.ramps.remove(&voice.id);

        if let Some(source) = voice.source {
            output.stop(source);
            output.delete_source(source);
        }

        match self.clips.get_mut(&voice.clip_key) {
            Some(clip) if clip.ref_count > 0 => clip.ref_count -= 1,
            Some(_) => error!("Reference count underflow for clip {}", voice.clip_key),
            None => error!("Voice {} finished but clip {} is not cached", voice.id, voice.clip_key),
        }

        debug!("Voice {} finished ({})", voice.id, voice.clip_key);
        self.events.push(AudioEvent::VoiceFinished(voice.id));
    }

    /// Advance timers, process completions, waiting voices and ramps.
    pub fn update(&mut self, output: &mut dyn AudioOutput, dt: f64) {
        self.now += dt;

        self.pump_timer += dt;
        if self.pump_timer >= self.config.housekeeping_interval_secs {
            self.pump_timer = 0.0;
            output.pump();
        }

        while let Some(token) = self.completions.pop() {
            self.on_voice_finished(output, token);
        }

        self.update_waiting(output, dt);
        self.update_ramps(output, dt as f32);

        self.sweep_timer += dt;
        if self.sweep_timer >= self.config.sweep_interval_secs {
            self.sweep_timer = 0.0;
            self.sweep(output);
        }
    }

    /// Age waiting voices and hand free sources to them, oldest first.
    fn update_waiting(&mut self, output: &mut dyn AudioOutput, dt: f64) {
        let mut waiting: Vec<(AudioId, CompletionToken)> = self
            .index
            .iter()
            .filter(|(id, _)| self.voice(**id).is_some_and(|v| v.source.is_none()))
            .map(|(id, token)| (*id, *token))
            .collect();
        if waiting.is_empty() {
            return;
        }
        waiting.sort_by_key(|(id, _)| *id);

        let mix = self.mix;
        let mut expired = Vec::new();
        let mut sources_left = true;
        for (id, token) in waiting {
            let Some(voice) = find_voice_mut(&mut self.slots, &self.index, id) else {
                continue;
            };
            let Some(clip) = self.clips.get(&voice.clip_key) else {
                continue;
            };
            voice.waited += dt;
            let length = clip.length as f64;
            if !voice.properties.looping && voice.waited >= length {
                expired.push(id);
                continue;
            }
            if !sources_left {
                continue;
            }

            let source = match output.create_source() {
                Ok(source) => source,
                Err(_) => {
                    sources_left = false;
                    continue;
                }
            };
            let offset = if voice.properties.looping && length > 0.0 {
                voice.waited % length
            } else {
                voice.waited
            };
            let gain = voice.gain * mix.scale(voice.properties.category);
            match start_source(output, source, clip.buffer, &voice.properties, gain, token) {
                Ok(()) => {
                    output.set_offset(source, offset as f32);
                    voice.source = Some(source);
                    debug!("Voice {} took a source {:.2}s into {}", id, offset, voice.clip_key);
                }
                Err(e) => error!("Voice {} could not start on a free source: {}", id, e),
            }
        }

        for id in expired {
            trace!("Waiting voice {} ran past its clip", id);
            self.release(output, id);
        }
    }

    fn update_ramps(&mut self, output: &mut dyn AudioOutput, dt: f32) {
        if self.ramps.is_empty() {
            return;
        }

        let mut done = Vec::new();
        {
            let mut gains = VoiceGains {
                slots: &mut self.slots,
                index: &self.index,
                output: &mut *output,
                mix: self.mix,
            };
            for (id, active) in self.ramps.iter_mut() {
                if active.ramp.update(dt, &mut gains) {
                    done.push((*id, active.stop_when_done));
                }
            }
        }

        for (id, stop_when_done) in done {
            self.ramps.remove(&id);
            if !stop_when_done {
                continue;
            }
            match self.voice(id).map(|v| v.source) {
                Some(Some(source)) => {
                    trace!("Fade-out complete, stopping voice {}", id);
                    output.stop(source);
                }
                Some(None) => self.release(output, id),
                None => {}
            }
        }
    }

    /// Evict unreferenced clips not played within the eviction timeout.
    pub fn sweep(&mut self, output: &mut dyn AudioOutput) {
        let now = self.now;
        let timeout = self.config.eviction_timeout_secs;
        let stale: Vec<String> = self
            .clips
            .iter()
            .filter(|(_, clip)| clip.ref_count == 0 && now - clip.last_access > timeout)
            .map(|(key, _)| key.clone())
            .collect();

        for key in stale {
            if let Some(clip) = self.clips.remove(&key) {
                output.delete_buffer(clip.buffer);
                info!("Evicted clip {} (idle {:.1}s)", key, now - clip.last_access);
                self.events.push(AudioEvent::ClipEvicted(key));
            }
        }
    }

    /// Stop every voice and release all clips and sources.
    pub fn clear(&mut self, output: &mut dyn AudioOutput) {
        for slot in &mut self.slots {
            if let Some(voice) = slot.voice.take() {
                if let Some(source) = voice.source {
                    output.stop(source);
                    output.delete_source(source);
                }
                slot.generation = slot.generation.wrapping_add(1);
            }
        }
        self.free_slots = (0..self.slots.len() as u32).rev().collect();
        self.index.clear();
        self.ramps.clear();
        for (_, clip) in self.clips.drain() {
            output.delete_buffer(clip.buffer);
        }
        while self.completions.pop().is_some() {}
        info!("Clip cache cleared");
    }

    /// Events collected since the last call
    pub fn take_events(&mut self) -> Vec<AudioEvent> {
        std::mem::take(&mut self.events)
    }

    /// Live voices referencing `path`; `None` if the clip is not cached
    pub fn clip_ref_count(&self, path: &str) -> Option<u32> {
        self.clips.get(&normalize_path(path)).map(|c| c.ref_count)
    }

    pub fn cached_clip_count(&self) -> usize {
        self.clips.len()
    }

    /// Live voices, sounding or waiting
    pub fn active_voice_count(&self) -> usize {
        self.index.len()
    }

    /// Live voices without a device source
    pub fn waiting_voice_count(&self) -> usize {
        self.slots
            .iter()
            .filter_map(|slot| slot.voice.as_ref())
            .filter(|voice| voice.source.is_none())
            .count()
    }

    pub fn is_voice_active(&self, id: AudioId) -> bool {
        self.voice(id).is_some()
    }

    pub fn is_voice_waiting(&self, id: AudioId) -> bool {
        self.voice(id).is_some_and(|v| v.source.is_none())
    }

    /// Device source of a live voice
    pub fn voice_source(&self, id: AudioId) -> Option<SourceHandle> {
        self.voice(id).and_then(|v| v.source)
    }

    /// Properties last applied to a live voice
    pub fn voice_properties(&self, id: AudioId) -> Option<AudioProperties> {
        self.voice(id).map(|v| v.properties)
    }

    /// Length of a clip in seconds, loading it into the cache if needed.
    ///
    /// Returns 0.0 (after logging) if the clip cannot be loaded.
    pub fn clip_length(&mut self, output: &mut dyn AudioOutput, loader: &dyn ClipLoader, path: &str) -> f32 {
        match self.ensure_clip(output, loader, path) {
            Ok(key) => self.clips.get(&key).map_or(0.0, |c| c.length),
            Err(e) => {
                report(&e);
                0.0
            }
        }
    }

    /// Live voices, ordered by id
    pub fn voice_list(&self, output: &dyn AudioOutput) -> Vec<VoiceInfo> {
        let mut list: Vec<VoiceInfo> = self
            .slots
            .iter()
            .filter_map(|slot| slot.voice.as_ref())
            .map(|voice| VoiceInfo {
                id: voice.id,
                clip: voice.clip_key.clone(),
                gain: voice.gain,
                position: voice.properties.position,
                looping: voice.properties.looping,
                category: voice.properties.category,
                waiting: voice.source.is_none(),
                state: voice.source.map_or(SourceState::Initial, |s| output.state(s)),
            })
            .collect();
        list.sort_by_key(|info| info.id);
        list
    }

    fn start_voice(
        &mut self,
        output: &mut dyn AudioOutput,
        loader: &dyn ClipLoader,
        path: &str,
        properties: AudioProperties,
    ) -> Result<AudioId> {
        let key = self.ensure_clip(output, loader, path)?;
        let buffer = self
            .clips
            .get(&key)
            .map(|c| c.buffer)
            .ok_or_else(|| Error::NotFound(path.to_string()))?;

        let source = match output.create_source() {
            Ok(source) => Some(source),
            Err(e) if self.config.virtual_voices => {
                debug!("No free source for {} ({}); voice waits", key, e);
                None
            }
            Err(e) => return Err(e),
        };

        let token = self.allocate_slot();
        if let Some(source) = source {
            let gain = properties.gain * self.mix.scale(properties.category);
            if let Err(e) = start_source(output, source, buffer, &properties, gain, token) {
                self.free_slots.push(token.index);
                return Err(e);
            }
        }

        let id = self.ids.allocate();
        if let Some(slot) = self.slots.get_mut(token.index as usize) {
            slot.voice = Some(Voice {
                id,
                source,
                clip_key: key.clone(),
                properties,
                gain: properties.gain,
                waited: 0.0,
            });
        }
        self.index.insert(id, token);

        if let Some(clip) = self.clips.get_mut(&key) {
            clip.ref_count += 1;
            clip.last_access = self.now;
        }
        debug!("Playing {} as voice {}", key, id);
        Ok(id)
    }

    /// Load a clip into the cache if it is not there yet; returns its key.
    fn ensure_clip(&mut self, output: &mut dyn AudioOutput, loader: &dyn ClipLoader, path: &str) -> Result<String> {
        if path.is_empty() {
            return Err(Error::InvalidArgument("empty audio path".to_string()));
        }
        let key = normalize_path(path);
        if self.clips.contains_key(&key) {
            return Ok(key);
        }

        let decoded = loader.load(path)?;
        let length = decoded.duration_secs();
        let buffer = output.create_buffer(decoded.pcm())?;
        info!(
            "Cached clip {} ({:.2}s, {} ch @ {} Hz)",
            key, length, decoded.format.channels, decoded.format.sample_rate
        );
        self.clips.insert(
            key.clone(),
            CachedClip {
                buffer,
                length,
                last_access: self.now,
                ref_count: 0,
            },
        );
        Ok(key)
    }

    fn allocate_slot(&mut self) -> CompletionToken {
        let index = match self.free_slots.pop() {
            Some(index) => index,
            None => {
                self.slots.push(Slot::default());
                (self.slots.len() - 1) as u32
            }
        };
        let generation = self.slots.get(index as usize).map_or(0, |s| s.generation);
        CompletionToken { index, generation }
    }

    /// Release a voice now, without waiting for the device
    fn release(&mut self, output: &mut dyn AudioOutput, id: AudioId) {
        if let Some(token) = self.index.get(&id).copied() {
            self.on_voice_finished(output, token);
        }
    }

    fn voice(&self, id: AudioId) -> Option<&Voice> {
        find_voice(&self.slots, &self.index, id)
    }

    fn voice_mut(&mut self, id: AudioId) -> Option<&mut Voice> {
        find_voice_mut(&mut self.slots, &self.index, id)
    }

    fn voice_or_report(&self, id: AudioId) -> Option<&Voice> {
        let voice = self.voice(id);
        if voice.is_none() {
            report(&Error::UnknownVoice(id));
        }
        voice
    }

    fn with_voice(&mut self, id: AudioId, f: impl FnOnce(&mut Voice)) -> bool {
        match self.voice_mut(id) {
            Some(voice) => {
                f(voice);
                true
            }
            None => {
                report(&Error::UnknownVoice(id));
                false
            }
        }
    }
}

/// Queue `buffer` on a fresh source, apply properties and start it.
///
/// The source is deleted again if it cannot be started.
fn start_source(
    output: &mut dyn AudioOutput,
    source: SourceHandle,
    buffer: BufferHandle,
    properties: &AudioProperties,
    gain: f32,
    token: CompletionToken,
) -> Result<()> {
    if let Err(e) = output.queue_buffer(source, buffer) {
        output.delete_source(source);
        return Err(e);
    }
    output.set_position(source, properties.position);
    output.set_relative(source, properties.relative);
    output.set_reference_distance(source, properties.reference_distance);
    output.set_rolloff_factor(source, properties.rolloff_factor);
    output.set_max_distance(source, properties.max_distance);
    output.set_gain(source, gain);
    output.set_looping(source, properties.looping);
    output.watch(source, token);
    if let Err(e) = output.play(source) {
        output.delete_source(source);
        return Err(e);
    }
    Ok(())
}

/// Log an error recovered at the engine-facing boundary
fn report(err: &Error) {
    match err {
        Error::UnknownVoice(_) | Error::InvalidArgument(_) => warn!("{}", err),
        _ => error!("{}", err),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::types::FormatInfo;
    use crate::audio::SimulatedOutput;

    /// Produces one second of mono silence at 100 Hz for any path
    struct Silence;

    impl ClipLoader for Silence {
        fn load(&self, path: &str) -> Result<DecodedClip> {
            if path.contains("missing") {
                return Err(Error::NotFound(path.to_string()));
            }
            Ok(DecodedClip {
                format: FormatInfo {
                    channels: 1,
                    sample_rate: 100,
                },
                samples: vec![0; 100],
                clipped: false,
            })
        }
    }

    fn cache() -> (ClipCache, SimulatedOutput) {
        let mut output = SimulatedOutput::new();
        let cache = ClipCache::new(CacheConfig::default(), &mut output);
        (cache, output)
    }

    #[test]
    fn test_normalize_path() {
        assert_eq!(normalize_path("Sfx\\Boom.OGG"), "sfx/boom.ogg");
    }

    #[test]
    fn test_missing_clip_returns_invalid() {
        let (mut cache, mut output) = cache();
        let id = cache.play_clip(&mut output, &Silence, "missing.ogg", AudioProperties::default());
        assert!(!id.is_valid());
        assert_eq!(cache.cached_clip_count(), 0);
        assert_eq!(output.source_count(), 0);
    }

    #[test]
    fn test_empty_path_is_rejected() {
        let (mut cache, mut output) = cache();
        let id = cache.play_clip(&mut output, &Silence, "", AudioProperties::default());
        assert!(!id.is_valid());
    }

    #[test]
    fn test_stale_token_is_ignored() {
        let (mut cache, mut output) = cache();
        let first = cache.play_clip(&mut output, &Silence, "a.ogg", AudioProperties::default());
        let token = CompletionToken { index: 0, generation: 0 };
        cache.on_voice_finished(&mut output, token);
        assert!(!cache.is_voice_active(first));

        // Slot 0 is reused with a new generation
        let second = cache.play_clip(&mut output, &Silence, "a.ogg", AudioProperties::default());
        cache.on_voice_finished(&mut output, token);
        assert!(cache.is_voice_active(second));
        assert_eq!(cache.clip_ref_count("a.ogg"), Some(1));
    }

    #[test]
    fn test_device_refusal_leaves_no_voice_without_waiting() {
        let mut output = SimulatedOutput::new().with_source_limit(0);
        let config = CacheConfig {
            virtual_voices: false,
            ..CacheConfig::default()
        };
        let mut cache = ClipCache::new(config, &mut output);
        let id = cache.play_clip(&mut output, &Silence, "a.ogg", AudioProperties::default());
        assert!(!id.is_valid());
        assert_eq!(cache.active_voice_count(), 0);
        // The clip itself was cached before the source failed
        assert_eq!(cache.clip_ref_count("a.ogg"), Some(0));
    }

    #[test]
    fn test_device_refusal_issues_waiting_voice() {
        let mut output = SimulatedOutput::new().with_source_limit(0);
        let mut cache = ClipCache::new(CacheConfig::default(), &mut output);
        let id = cache.play_clip(&mut output, &Silence, "a.ogg", AudioProperties::default());
        assert!(id.is_valid());
        assert!(cache.is_voice_waiting(id));
        assert_eq!(cache.voice_source(id), None);
        assert_eq!(cache.clip_ref_count("a.ogg"), Some(1));

        // A waiting one-second clip finishes after one second of silence
        for _ in 0..3 {
            cache.update(&mut output, 0.25);
        }
        assert_eq!(cache.time_left(&output, id), Some(0.25));
        cache.update(&mut output, 0.25);
        assert!(!cache.is_voice_active(id));
        assert_eq!(cache.clip_ref_count("a.ogg"), Some(0));
        assert_eq!(cache.take_events(), vec![AudioEvent::VoiceFinished(id)]);
    }

    #[test]
    fn test_mix_scales_device_gain_only() {
        let (mut cache, mut output) = cache();
        let sound = cache.play_clip(&mut output, &Silence, "a.ogg", AudioProperties::default().with_gain(0.5));
        let music = cache.play_clip(
            &mut output,
            &Silence,
            "b.ogg",
            AudioProperties::default().with_category(AudioCategory::Music),
        );

        cache.set_sound_gain(&mut output, 0.5);
        cache.set_master_gain(&mut output, 0.5);

        assert_eq!(cache.gain(sound), Some(0.5));
        let sound_source = cache.voice_source(sound).unwrap();
        let music_source = cache.voice_source(music).unwrap();
        assert_eq!(output.gain(sound_source), 0.125);
        assert_eq!(output.gain(music_source), 0.5);

        cache.set_master_gain(&mut output, -1.0);
        assert_eq!(cache.master_gain(), 0.0);
        assert_eq!(output.gain(music_source), 0.0);
    }

    #[test]
    fn test_fade_in_never_outlasts_clip() {
        let (mut cache, mut output) = cache();
        let id = cache.play_clip_with_fade_in(
            &mut output,
            &Silence,
            "a.ogg",
            AudioProperties::default().with_gain(0.5),
            10.0,
        );
        assert_eq!(cache.gain(id), Some(0.0));
        for _ in 0..4 {
            cache.update(&mut output, 0.25);
        }
        assert_eq!(cache.gain(id), Some(0.5));
        assert!(!cache.has_ramp(id));
    }
}
