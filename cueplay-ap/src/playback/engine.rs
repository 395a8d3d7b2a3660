//! Audio engine context
//!
//! [`AudioEngine`] owns the output device, the asset reader, the codec
//! factory, the clip cache and the engine clock. Cues, streams and the music
//! player hold no reference to it; they take `&mut AudioEngine` on every call.
//!
//! ```ignore
//! let mut engine = AudioEngine::new(output, FsAssetReader::new(), SymphoniaCodecFactory, config);
//! let id = engine.play_clip("sfx/explosion.ogg");
//! loop {
//!     engine.update(dt);
//!     cue.update(&mut engine);
//!     music.update(&mut engine, dt);
//! }
//! ```

use crate::audio::assets::AssetReader;
use crate::audio::codec::CodecFactory;
use crate::audio::output::AudioOutput;
use crate::audio::types::{AudioId, AudioProperties};
use crate::config::AudioConfig;
use crate::playback::clip_cache::{AssetLoader, ClipCache, VoiceInfo};
use crate::playback::events::AudioEvent;
use crate::playback::stream::StreamDecoder;
use tracing::{error, info};

/// Explicit audio context; one per output device
pub struct AudioEngine<O: AudioOutput> {
    output: O,
    reader: Box<dyn AssetReader>,
    codecs: Box<dyn CodecFactory>,
    clips: ClipCache,
    config: AudioConfig,
}

impl<O: AudioOutput> AudioEngine<O> {
    pub fn new(
        mut output: O,
        reader: impl AssetReader + 'static,
        codecs: impl CodecFactory + 'static,
        config: AudioConfig,
    ) -> Self {
        let mut clips = ClipCache::new(config.cache.clone(), &mut output);
        clips.set_master_gain(&mut output, config.mix.master_gain);
        clips.set_sound_gain(&mut output, config.mix.sound_gain);
        info!("Audio engine initialized");
        Self {
            output,
            reader: Box::new(reader),
            codecs: Box::new(codecs),
            clips,
            config,
        }
    }

    /// Split borrows: cache, device and a loader over the asset reader/codecs
    fn parts(&mut self) -> (&mut ClipCache, &mut O, AssetLoader<'_>) {
        let loader = AssetLoader {
            reader: self.reader.as_ref(),
            codecs: self.codecs.as_ref(),
        };
        (&mut self.clips, &mut self.output, loader)
    }

    // ========================================
    // Tick
    // ========================================

    /// Advance the engine clock and process completions, ramps and eviction.
    pub fn update(&mut self, dt: f64) {
        self.clips.update(&mut self.output, dt);
    }

    /// Engine clock: seconds accumulated through [`AudioEngine::update`]
    pub fn now(&self) -> f64 {
        self.clips.now()
    }

    /// Events collected since the last call
    pub fn take_events(&mut self) -> Vec<AudioEvent> {
        self.clips.take_events()
    }

    // ========================================
    // Clips
    // ========================================

    /// Play a non-positional clip that follows the listener
    pub fn play_clip(&mut self, path: &str) -> AudioId {
        self.play_clip_with(path, AudioProperties::listener_relative())
    }

    /// Play a clip at a world position
    pub fn play_clip_at(&mut self, path: &str, x: f32, y: f32, z: f32) -> AudioId {
        self.play_clip_with(path, AudioProperties::at(x, y, z))
    }

    pub fn play_clip_with(&mut self, path: &str, properties: AudioProperties) -> AudioId {
        let (clips, output, loader) = self.parts();
        clips.play_clip(output, &loader, path, properties)
    }

    /// Start at gain 0 and ramp to `properties.gain` over `seconds`
    /// (capped at the clip length)
    pub fn play_clip_with_fade_in(&mut self, path: &str, properties: AudioProperties, seconds: f32) -> AudioId {
        let (clips, output, loader) = self.parts();
        clips.play_clip_with_fade_in(output, &loader, path, properties, seconds)
    }

    pub fn stop(&mut self, id: AudioId) -> bool {
        self.clips.stop(&mut self.output, id)
    }

    pub fn stop_with_fade_out(&mut self, id: AudioId, seconds: f32) -> bool {
        self.clips.stop_with_fade_out(&mut self.output, id, seconds)
    }

    pub fn set_position(&mut self, id: AudioId, x: f32, y: f32, z: f32) -> bool {
        self.clips.set_position(&mut self.output, id, [x, y, z])
    }

    pub fn set_relative(&mut self, id: AudioId, relative: bool) -> bool {
        self.clips.set_relative(&mut self.output, id, relative)
    }

    pub fn set_reference_distance(&mut self, id: AudioId, distance: f32) -> bool {
        self.clips.set_reference_distance(&mut self.output, id, distance)
    }

    pub fn set_max_distance(&mut self, id: AudioId, distance: f32) -> bool {
        self.clips.set_max_distance(&mut self.output, id, distance)
    }

    pub fn set_rolloff_factor(&mut self, id: AudioId, factor: f32) -> bool {
        self.clips.set_rolloff_factor(&mut self.output, id, factor)
    }

    pub fn set_loop(&mut self, id: AudioId, looping: bool) -> bool {
        self.clips.set_loop(&mut self.output, id, looping)
    }

    pub fn set_gain(&mut self, id: AudioId, gain: f32, check_ramp: bool) -> bool {
        self.clips.set_gain(&mut self.output, id, gain, check_ramp)
    }

    pub fn set_gain_smooth(&mut self, id: AudioId, gain: f32, seconds: f32) -> bool {
        self.clips.set_gain_smooth(&mut self.output, id, gain, seconds)
    }

    /// Voice gain before the master and sound gains are applied
    pub fn gain(&self, id: AudioId) -> Option<f32> {
        self.clips.gain(id)
    }

    pub fn is_voice_active(&self, id: AudioId) -> bool {
        self.clips.is_voice_active(id)
    }

    /// The voice is live but has no device source yet
    pub fn is_voice_waiting(&self, id: AudioId) -> bool {
        self.clips.is_voice_waiting(id)
    }

    pub fn set_offset(&mut self, id: AudioId, seconds: f32) -> bool {
        self.clips.set_offset(&mut self.output, id, seconds)
    }

    pub fn offset(&self, id: AudioId) -> Option<f32> {
        self.clips.offset(&self.output, id)
    }

    /// Seconds until the voice reaches the end of its clip
    pub fn time_left(&self, id: AudioId) -> Option<f32> {
        self.clips.time_left(&self.output, id)
    }

    /// Length of the clip a voice plays
    pub fn voice_length(&self, id: AudioId) -> Option<f32> {
        self.clips.voice_length(id)
    }

    // ========================================
    // Mix
    // ========================================

    pub fn set_master_gain(&mut self, gain: f32) {
        self.clips.set_master_gain(&mut self.output, gain);
    }

    pub fn master_gain(&self) -> f32 {
        self.clips.master_gain()
    }

    /// Gain of [`crate::AudioCategory::Sound`] voices
    pub fn set_sound_gain(&mut self, gain: f32) {
        self.clips.set_sound_gain(&mut self.output, gain);
    }

    pub fn sound_gain(&self) -> f32 {
        self.clips.sound_gain()
    }

    /// Clip length in seconds (loads the clip); 0.0 if it cannot be loaded
    pub fn clip_length(&mut self, path: &str) -> f32 {
        let (clips, output, loader) = self.parts();
        clips.clip_length(output, &loader, path)
    }

    pub fn clip_ref_count(&self, path: &str) -> Option<u32> {
        self.clips.clip_ref_count(path)
    }

    pub fn cached_clip_count(&self) -> usize {
        self.clips.cached_clip_count()
    }

    pub fn active_voice_count(&self) -> usize {
        self.clips.active_voice_count()
    }

    pub fn waiting_voice_count(&self) -> usize {
        self.clips.waiting_voice_count()
    }

    pub fn voice_list(&self) -> Vec<VoiceInfo> {
        self.clips.voice_list(&self.output)
    }

    /// Whether an asset exists
    pub fn asset_exists(&self, path: &str) -> bool {
        self.reader.exists(path)
    }

    /// Raw asset bytes through the engine's reader
    pub fn read_asset(&self, path: &str) -> std::io::Result<Vec<u8>> {
        self.reader.read(path)
    }

    // ========================================
    // Streams
    // ========================================

    /// Open a stream, prime its buffers and start playback.
    ///
    /// Returns `None` (after logging) if the stream cannot be opened.
    pub fn open_stream(&mut self, path: &str) -> Option<StreamDecoder> {
        match StreamDecoder::open(
            path,
            self.reader.as_ref(),
            self.codecs.as_ref(),
            &mut self.output,
            &self.config.stream,
        ) {
            Ok(mut stream) => {
                stream.fill_initial_buffers(&mut self.output);
                Some(stream)
            }
            Err(e) => {
                error!("Cannot open stream: {}", e);
                None
            }
        }
    }

    pub fn update_stream(&mut self, stream: &mut StreamDecoder, dt: f32) {
        stream.update(&mut self.output, dt);
    }

    pub fn clear_stream(&mut self, stream: &mut StreamDecoder) {
        stream.clear(&mut self.output);
    }

    // ========================================
    // Access
    // ========================================

    pub fn config(&self) -> &AudioConfig {
        &self.config
    }

    pub fn cache(&self) -> &ClipCache {
        &self.clips
    }

    pub fn output(&self) -> &O {
        &self.output
    }

    pub fn output_mut(&mut self) -> &mut O {
        &mut self.output
    }

    /// Stop every voice and release all cached clips.
    pub fn shutdown(&mut self) {
        self.clips.clear(&mut self.output);
        info!("Audio engine shut down");
    }
}
