//! Symphonia-backed codec
//!
//! Adapts symphonia's probe/format/decoder pipeline to the [`StreamCodec`]
//! seam. Symphonia reads the container itself, so the whole byte cursor is
//! handed over on the first header packet and header parsing completes at once.

use crate::audio::codec::{ByteCursor, CodecFactory, DecodedFrame, HeaderProgress, StreamCodec};
use crate::audio::types::{FormatInfo, PcmFrame};
use crate::error::{Error, Result};
use std::io::Cursor;
use std::path::Path;
use symphonia::core::audio::{AudioBuffer, Signal};
use symphonia::core::codecs::{Decoder, DecoderOptions, CODEC_TYPE_NULL};
use symphonia::core::formats::{FormatOptions, FormatReader};
use symphonia::core::io::MediaSourceStream;
use symphonia::core::meta::MetadataOptions;
use symphonia::core::probe::Hint;
use tracing::{debug, warn};

/// File extensions this codec is offered for
const SUPPORTED_EXTENSIONS: &[&str] = &["ogg", "oga", "wav", "flac", "mp3", "m4a", "mp4", "aac"];

/// Decodes any format enabled in the symphonia feature set
pub struct SymphoniaCodec {
    extension: Option<String>,
    reader: Option<Box<dyn FormatReader>>,
    decoder: Option<Box<dyn Decoder>>,
    track_id: u32,
}

impl SymphoniaCodec {
    /// `extension` is used as a probe hint only
    pub fn new(extension: Option<&str>) -> Self {
        Self {
            extension: extension.map(str::to_ascii_lowercase),
            reader: None,
            decoder: None,
            track_id: 0,
        }
    }
}

impl StreamCodec for SymphoniaCodec {
    fn parse_header(&mut self, cursor: &mut ByteCursor) -> Result<HeaderProgress> {
        let bytes = cursor.take_remaining();
        let mss = MediaSourceStream::new(Box::new(Cursor::new(bytes)), Default::default());

        let mut hint = Hint::new();
        if let Some(ext) = &self.extension {
            hint.with_extension(ext);
        }

        let probed = symphonia::default::get_probe()
            .format(&hint, mss, &FormatOptions::default(), &MetadataOptions::default())
            .map_err(|e| Error::Format(format!("Failed to probe format: {}", e)))?;
        let reader = probed.format;

        let track = reader
            .tracks()
            .iter()
            .find(|t| t.codec_params.codec != CODEC_TYPE_NULL)
            .ok_or_else(|| Error::Format("No audio track found".to_string()))?;

        let sample_rate = track
            .codec_params
            .sample_rate
            .ok_or_else(|| Error::Format("Sample rate not found".to_string()))?;
        let channels = track
            .codec_params
            .channels
            .map(|c| c.count() as u16)
            .ok_or_else(|| Error::Format("Channel count not found".to_string()))?;

        let decoder = symphonia::default::get_codecs()
            .make(&track.codec_params, &DecoderOptions::default())
            .map_err(|e| Error::DecodeFailed(format!("Failed to create decoder: {}", e)))?;

        debug!(
            "Symphonia stream: sample_rate={}, channels={}",
            sample_rate, channels
        );

        self.track_id = track.id;
        self.decoder = Some(decoder);
        self.reader = Some(reader);

        Ok(HeaderProgress::Complete(FormatInfo {
            channels,
            sample_rate,
        }))
    }

    fn decode_frame(&mut self, _cursor: &mut ByteCursor) -> Result<DecodedFrame> {
        let (Some(reader), Some(decoder)) = (self.reader.as_mut(), self.decoder.as_mut()) else {
            return Err(Error::Format("Header not parsed".to_string()));
        };

        let packet = match reader.next_packet() {
            Ok(packet) => packet,
            Err(symphonia::core::errors::Error::IoError(ref e))
                if e.kind() == std::io::ErrorKind::UnexpectedEof =>
            {
                debug!("Reached end of stream");
                return Ok(DecodedFrame::EndOfStream);
            }
            Err(e) => {
                warn!("Error reading packet: {}", e);
                return Ok(DecodedFrame::EndOfStream);
            }
        };

        if packet.track_id() != self.track_id {
            return Ok(DecodedFrame::Pcm(PcmFrame::default()));
        }

        match decoder.decode(&packet) {
            Ok(decoded) => {
                let spec = *decoded.spec();
                let mut buf = AudioBuffer::<f32>::new(decoded.capacity() as u64, spec);
                decoded.convert(&mut buf);
                let channels = (0..spec.channels.count())
                    .map(|c| buf.chan(c).to_vec())
                    .collect();
                Ok(DecodedFrame::Pcm(PcmFrame::new(channels)))
            }
            Err(e) => {
                // Corrupt packet: skip it, the stream continues
                warn!("Decode error: {}", e);
                Ok(DecodedFrame::Pcm(PcmFrame::default()))
            }
        }
    }
}

/// Offers a [`SymphoniaCodec`] for known audio file extensions
#[derive(Debug, Clone, Copy, Default)]
pub struct SymphoniaCodecFactory;

impl CodecFactory for SymphoniaCodecFactory {
    fn create(&self, path: &str) -> Option<Box<dyn StreamCodec>> {
        let extension = Path::new(path)
            .extension()
            .and_then(|e| e.to_str())
            .map(str::to_ascii_lowercase)?;
        if !SUPPORTED_EXTENSIONS.contains(&extension.as_str()) {
            return None;
        }
        Some(Box::new(SymphoniaCodec::new(Some(&extension))))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_factory_matches_extension() {
        let factory = SymphoniaCodecFactory;
        assert!(factory.create("music/theme.OGG").is_some());
        assert!(factory.create("sfx/click.wav").is_some());
        assert!(factory.create("readme.txt").is_none());
        assert!(factory.create("noextension").is_none());
    }

    #[test]
    fn test_garbage_is_format_error() {
        let mut codec = SymphoniaCodec::new(Some("ogg"));
        let mut cursor = ByteCursor::new(vec![0u8; 64]);
        assert!(matches!(codec.parse_header(&mut cursor), Err(Error::Format(_))));
    }

    #[test]
    fn test_decode_before_header_is_error() {
        let mut codec = SymphoniaCodec::new(None);
        let mut cursor = ByteCursor::new(Vec::new());
        assert!(codec.decode_frame(&mut cursor).is_err());
    }
}
