//! Core audio data types
//!
//! Handles and plain data shared between the codec seam, the device seam and
//! the playback components.

use std::fmt;

/// Opaque handle to one playback instance (a "voice").
///
/// Allocated monotonically per engine and never reused. `0` is the invalid id.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub struct AudioId(u64);

impl AudioId {
    /// The "no voice" sentinel
    pub const INVALID: AudioId = AudioId(0);

    pub const fn from_raw(raw: u64) -> Self {
        AudioId(raw)
    }

    pub const fn raw(self) -> u64 {
        self.0
    }

    pub const fn is_valid(self) -> bool {
        self.0 != 0
    }
}

impl fmt::Display for AudioId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Monotonic [`AudioId`] allocator, one per engine instance.
#[derive(Debug)]
pub struct AudioIdAllocator {
    next: u64,
}

impl AudioIdAllocator {
    pub fn new() -> Self {
        Self { next: 1 }
    }

    pub fn allocate(&mut self) -> AudioId {
        let id = AudioId(self.next);
        self.next += 1;
        id
    }
}

impl Default for AudioIdAllocator {
    fn default() -> Self {
        Self::new()
    }
}

/// Device-side source (a mixer channel)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SourceHandle(pub u32);

/// Device-side PCM buffer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct BufferHandle(pub u32);

/// Playback state reported by the device for a source
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SourceState {
    /// Never started or rewound
    Initial,
    Playing,
    Paused,
    Stopped,
}

impl SourceState {
    /// Playing or paused: the device still owns the queue position
    pub fn is_active(self) -> bool {
        matches!(self, SourceState::Playing | SourceState::Paused)
    }
}

/// Stream format discovered from the codec header
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FormatInfo {
    pub channels: u16,
    pub sample_rate: u32,
}

/// One decoded frame of planar float PCM (`channels[c][i]`, nominal range -1.0..=1.0).
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PcmFrame {
    pub channels: Vec<Vec<f32>>,
}

impl PcmFrame {
    pub fn new(channels: Vec<Vec<f32>>) -> Self {
        Self { channels }
    }

    /// Samples per channel
    pub fn len(&self) -> usize {
        self.channels.first().map_or(0, Vec::len)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Interleaved signed 16-bit PCM handed to the device
#[derive(Debug, Clone, Copy)]
pub struct PcmData<'a> {
    pub samples: &'a [i16],
    pub channels: u16,
    pub sample_rate: u32,
}

impl<'a> PcmData<'a> {
    /// Frames (samples per channel)
    pub fn frames(&self) -> usize {
        if self.channels == 0 {
            0
        } else {
            self.samples.len() / self.channels as usize
        }
    }

    /// Duration in seconds
    pub fn duration_secs(&self) -> f32 {
        if self.sample_rate == 0 {
            0.0
        } else {
            self.frames() as f32 / self.sample_rate as f32
        }
    }
}

/// Mix category of a voice; each category is scaled by its own gain
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum AudioCategory {
    /// Effects and cues, scaled by the sound gain and the master gain
    #[default]
    Sound,
    /// Background music, scaled by the master gain only
    Music,
}

/// Per-voice playback properties.
///
/// 3D values are forwarded to the device as-is; this crate does no
/// panning or attenuation math.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AudioProperties {
    pub position: [f32; 3],
    /// Position is relative to the listener
    pub relative: bool,
    pub reference_distance: f32,
    pub rolloff_factor: f32,
    pub max_distance: f32,
    pub gain: f32,
    pub looping: bool,
    pub category: AudioCategory,
}

impl Default for AudioProperties {
    fn default() -> Self {
        Self {
            position: [0.0, 0.0, 0.0],
            relative: false,
            reference_distance: 1.0,
            rolloff_factor: 1.0,
            max_distance: f32::MAX,
            gain: 1.0,
            looping: false,
            category: AudioCategory::Sound,
        }
    }
}

impl AudioProperties {
    /// Non-positional sound that follows the listener
    pub fn listener_relative() -> Self {
        Self {
            relative: true,
            rolloff_factor: 0.0,
            ..Self::default()
        }
    }

    /// Positional sound at world coordinates
    pub fn at(x: f32, y: f32, z: f32) -> Self {
        Self {
            position: [x, y, z],
            ..Self::default()
        }
    }

    pub fn with_gain(mut self, gain: f32) -> Self {
        self.gain = gain;
        self
    }

    pub fn with_looping(mut self, looping: bool) -> Self {
        self.looping = looping;
        self
    }

    pub fn with_category(mut self, category: AudioCategory) -> Self {
        self.category = category;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_audio_id_allocator_is_monotonic() {
        let mut alloc = AudioIdAllocator::new();
        let a = alloc.allocate();
        let b = alloc.allocate();
        assert!(a.is_valid());
        assert!(b > a);
        assert!(!AudioId::INVALID.is_valid());
    }

    #[test]
    fn test_pcm_data_duration() {
        let samples = vec![0i16; 44100 * 2];
        let pcm = PcmData {
            samples: &samples,
            channels: 2,
            sample_rate: 44100,
        };
        assert_eq!(pcm.frames(), 44100);
        assert!((pcm.duration_secs() - 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_pcm_frame_len() {
        let frame = PcmFrame::new(vec![vec![0.0; 10], vec![0.0; 10]]);
        assert_eq!(frame.len(), 10);
        assert!(PcmFrame::default().is_empty());
    }
}
