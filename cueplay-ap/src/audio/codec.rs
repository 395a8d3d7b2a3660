//! Codec seam
//!
//! A [`StreamCodec`] turns a [`ByteCursor`] over compressed file contents into
//! planar float PCM frames. The playback core never looks inside the bitstream;
//! header handling, conversion to 16-bit and buffering happen above this trait.

use crate::audio::types::{FormatInfo, PcmFrame};
use crate::error::{Error, Result};

/// Read cursor over an in-memory compressed stream
#[derive(Debug, Clone)]
pub struct ByteCursor {
    data: Vec<u8>,
    pos: usize,
}

impl ByteCursor {
    pub fn new(data: Vec<u8>) -> Self {
        Self { data, pos: 0 }
    }

    pub fn position(&self) -> usize {
        self.pos
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn remaining(&self) -> usize {
        self.data.len() - self.pos
    }

    pub fn is_exhausted(&self) -> bool {
        self.pos >= self.data.len()
    }

    /// Look at the unread bytes without consuming them
    pub fn peek(&self) -> &[u8] {
        &self.data[self.pos..]
    }

    pub fn read_u8(&mut self) -> Result<u8> {
        let bytes = self.read_bytes(1)?;
        Ok(bytes[0])
    }

    pub fn read_u16_le(&mut self) -> Result<u16> {
        let bytes = self.read_bytes(2)?;
        Ok(u16::from_le_bytes([bytes[0], bytes[1]]))
    }

    pub fn read_u32_le(&mut self) -> Result<u32> {
        let bytes = self.read_bytes(4)?;
        Ok(u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]))
    }

    pub fn read_f32_le(&mut self) -> Result<f32> {
        self.read_u32_le().map(f32::from_bits)
    }

    /// Consume exactly `n` bytes
    pub fn read_bytes(&mut self, n: usize) -> Result<&[u8]> {
        if self.remaining() < n {
            return Err(Error::Format(format!(
                "Unexpected end of stream at byte {} (wanted {}, have {})",
                self.pos,
                n,
                self.remaining()
            )));
        }
        let start = self.pos;
        self.pos += n;
        Ok(&self.data[start..self.pos])
    }

    /// Consume everything left
    pub fn take_remaining(&mut self) -> Vec<u8> {
        let rest = self.data[self.pos..].to_vec();
        self.pos = self.data.len();
        rest
    }
}

/// Result of feeding one header packet to a codec
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HeaderProgress {
    /// Header recognised but more header packets are required
    NeedMore,
    /// Header complete; decoding can start
    Complete(FormatInfo),
}

/// Result of one decode step
#[derive(Debug, Clone, PartialEq)]
pub enum DecodedFrame {
    /// Frame of PCM; may be empty (e.g. codec priming packets)
    Pcm(PcmFrame),
    EndOfStream,
}

/// Compressed bitstream decoder.
///
/// Implementations are stateful: header packets must be fed through
/// [`StreamCodec::parse_header`] until it reports [`HeaderProgress::Complete`]
/// before the first [`StreamCodec::decode_frame`].
pub trait StreamCodec {
    /// Consume one header packet.
    ///
    /// An `Err` on the first call means the data is not this codec at all;
    /// later errors mean a corrupted header.
    fn parse_header(&mut self, cursor: &mut ByteCursor) -> Result<HeaderProgress>;

    /// Decode the next packet.
    fn decode_frame(&mut self, cursor: &mut ByteCursor) -> Result<DecodedFrame>;
}

/// Creates a codec suitable for a given asset path
pub trait CodecFactory {
    /// `None` when no codec handles this file type
    fn create(&self, path: &str) -> Option<Box<dyn StreamCodec>>;
}

impl<F> CodecFactory for F
where
    F: Fn(&str) -> Option<Box<dyn StreamCodec>>,
{
    fn create(&self, path: &str) -> Option<Box<dyn StreamCodec>> {
        self(path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cursor_reads_little_endian() {
        let mut cursor = ByteCursor::new(vec![0x01, 0x02, 0x03, 0x04, 0x05, 0x06, 0x07]);
        assert_eq!(cursor.read_u8().unwrap(), 0x01);
        assert_eq!(cursor.read_u16_le().unwrap(), 0x0302);
        assert_eq!(cursor.read_u32_le().unwrap(), 0x07060504);
        assert!(cursor.is_exhausted());
    }

    #[test]
    fn test_cursor_short_read_is_format_error() {
        let mut cursor = ByteCursor::new(vec![0x01]);
        let err = cursor.read_u32_le().unwrap_err();
        assert!(matches!(err, Error::Format(_)));
        // Failed read does not consume
        assert_eq!(cursor.position(), 0);
    }

    #[test]
    fn test_take_remaining() {
        let mut cursor = ByteCursor::new(vec![1, 2, 3, 4]);
        cursor.read_u8().unwrap();
        assert_eq!(cursor.take_remaining(), vec![2, 3, 4]);
        assert_eq!(cursor.remaining(), 0);
    }
}
