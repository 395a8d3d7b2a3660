//! Framed-PCM mock codec
//!
//! Packet layout (little endian):
//! - `'H'` u16 channels, u32 sample rate, u8 extra header packets
//! - `'h'` one extra header packet
//! - `'P'` u16 frames, then `channels` planes of `frames` f32 samples
//! - `'X'` corrupt packet (decode error)
//! - `'E'` end of stream (end of data works too)

use cueplay_ap::audio::{
    ByteCursor, CodecFactory, DecodedFrame, FormatInfo, HeaderProgress, PcmFrame, StreamCodec,
};
use cueplay_ap::{Error, Result};

#[derive(Debug, Default)]
pub struct MockCodec {
    format: Option<FormatInfo>,
    extra_remaining: u8,
}

impl MockCodec {
    pub fn new() -> Self {
        Self::default()
    }
}

impl StreamCodec for MockCodec {
    fn parse_header(&mut self, cursor: &mut ByteCursor) -> Result<HeaderProgress> {
        match self.format {
            None => {
                if cursor.read_u8()? != b'H' {
                    return Err(Error::Format("not a mock stream".to_string()));
                }
                let channels = cursor.read_u16_le()?;
                let sample_rate = cursor.read_u32_le()?;
                self.extra_remaining = cursor.read_u8()?;
                let info = FormatInfo {
                    channels,
                    sample_rate,
                };
                self.format = Some(info);
                Ok(if self.extra_remaining == 0 {
                    HeaderProgress::Complete(info)
                } else {
                    HeaderProgress::NeedMore
                })
            }
            Some(info) => {
                if cursor.read_u8()? != b'h' {
                    return Err(Error::Format("bad extra header packet".to_string()));
                }
                self.extra_remaining = self.extra_remaining.saturating_sub(1);
                Ok(if self.extra_remaining == 0 {
                    HeaderProgress::Complete(info)
                } else {
                    HeaderProgress::NeedMore
                })
            }
        }
    }

    fn decode_frame(&mut self, cursor: &mut ByteCursor) -> Result<DecodedFrame> {
        let Some(info) = self.format else {
            return Err(Error::Format("header not parsed".to_string()));
        };
        if cursor.is_exhausted() {
            return Ok(DecodedFrame::EndOfStream);
        }
        match cursor.read_u8()? {
            b'P' => {
                let frames = cursor.read_u16_le()? as usize;
                let mut channels = Vec::with_capacity(info.channels as usize);
                for _ in 0..info.channels {
                    let mut plane = Vec::with_capacity(frames);
                    for _ in 0..frames {
                        plane.push(cursor.read_f32_le()?);
                    }
                    channels.push(plane);
                }
                Ok(DecodedFrame::Pcm(PcmFrame::new(channels)))
            }
            b'E' => Ok(DecodedFrame::EndOfStream),
            b'X' => Err(Error::DecodeFailed("corrupt packet".to_string())),
            other => Err(Error::Format(format!("unknown packet tag {:#04x}", other))),
        }
    }
}

/// Accepts every path
#[derive(Debug, Clone, Copy, Default)]
pub struct MockCodecFactory;

impl CodecFactory for MockCodecFactory {
    fn create(&self, _path: &str) -> Option<Box<dyn StreamCodec>> {
        Some(Box::new(MockCodec::new()))
    }
}

/// Builds mock stream bytes packet by packet
#[derive(Debug, Clone)]
pub struct StreamBuilder {
    channels: u16,
    bytes: Vec<u8>,
}

impl StreamBuilder {
    /// Standard header: 'H' plus two extra header packets
    pub fn new(channels: u16, sample_rate: u32) -> Self {
        Self::with_header(channels, sample_rate, 2, 2)
    }

    /// Header declaring `declared` extra packets, of which `present` are written
    pub fn with_header(channels: u16, sample_rate: u32, declared: u8, present: u8) -> Self {
        let mut bytes = vec![b'H'];
        bytes.extend_from_slice(&channels.to_le_bytes());
        bytes.extend_from_slice(&sample_rate.to_le_bytes());
        bytes.push(declared);
        for _ in 0..present {
            bytes.push(b'h');
        }
        Self { channels, bytes }
    }

    /// One PCM packet; `planes.len()` must equal the channel count
    pub fn packet(mut self, planes: &[Vec<f32>]) -> Self {
        assert_eq!(planes.len(), self.channels as usize);
        let frames = planes.first().map_or(0, Vec::len);
        self.bytes.push(b'P');
        self.bytes.extend_from_slice(&(frames as u16).to_le_bytes());
        for plane in planes {
            for sample in plane {
                self.bytes.extend_from_slice(&sample.to_le_bytes());
            }
        }
        self
    }

    /// Priming packet with no samples
    pub fn empty_packet(self) -> Self {
        let planes = vec![Vec::new(); self.channels as usize];
        self.packet(&planes)
    }

    pub fn corrupt_packet(mut self) -> Self {
        self.bytes.push(b'X');
        self
    }

    pub fn raw(mut self, bytes: &[u8]) -> Self {
        self.bytes.extend_from_slice(bytes);
        self
    }

    pub fn build(self) -> Vec<u8> {
        self.bytes
    }
}

/// Planar constant-ish signal: `frames` samples per channel alternating
/// between `+amplitude` and `-amplitude`
pub fn sine_frames(channels: u16, frames: usize, amplitude: f32) -> Vec<Vec<f32>> {
    (0..channels)
        .map(|_| {
            (0..frames)
                .map(|i| if i % 2 == 0 { amplitude } else { -amplitude })
                .collect()
        })
        .collect()
}

/// Encode `packets` after a standard header
pub fn encode_stream(channels: u16, sample_rate: u32, packets: &[Vec<Vec<f32>>]) -> Vec<u8> {
    packets
        .iter()
        .fold(StreamBuilder::new(channels, sample_rate), |b, p| b.packet(p))
        .build()
}

/// Mono clip of `seconds` at `sample_rate`, in packets of 250 frames
pub fn tone(seconds: f64, sample_rate: u32) -> Vec<u8> {
    let total = (seconds * sample_rate as f64).round() as usize;
    let mut builder = StreamBuilder::new(1, sample_rate);
    let mut written = 0;
    while written < total {
        let frames = (total - written).min(250);
        builder = builder.packet(&sine_frames(1, frames, 0.25));
        written += frames;
    }
    builder.build()
}
