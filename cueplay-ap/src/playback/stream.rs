//! Streaming decoder
//!
//! Decodes a compressed source incrementally into a small ring of device
//! buffers (4 by default). Each tick, buffers the device has finished are
//! refilled with the next chunk and requeued, so only a few hundred
//! milliseconds of PCM exist at any time.
//!
//! **Lifecycle:**
//! 1. [`StreamDecoder::open`] reads the asset and parses the codec header
//! 2. [`StreamDecoder::fill_initial_buffers`] primes every slot and starts playback
//! 3. [`StreamDecoder::update`] once per tick
//! 4. [`StreamDecoder::clear`] releases the device source and buffers
//!
//! Decode errors after open are terminal for the stream but never propagate:
//! the error flag is set, decoding stops and the stream drains.

use crate::audio::assets::AssetReader;
use crate::audio::codec::{ByteCursor, CodecFactory, DecodedFrame, HeaderProgress, StreamCodec};
use crate::audio::output::AudioOutput;
use crate::audio::pcm::interleave_i16;
use crate::audio::types::{BufferHandle, FormatInfo, PcmData, PcmFrame, SourceHandle};
use crate::config::StreamConfig;
use crate::error::{Error, Result};
use tracing::{debug, error, info, warn};

/// Header packets a codec may ask for after the first one
const MAX_EXTRA_HEADER_PACKETS: usize = 2;

/// Run the header handshake: the first packet must be recognised, and the
/// header must complete within [`MAX_EXTRA_HEADER_PACKETS`] more.
fn read_header(codec: &mut dyn StreamCodec, cursor: &mut ByteCursor, path: &str) -> Result<FormatInfo> {
    let mut progress = codec
        .parse_header(cursor)
        .map_err(|e| Error::Format(format!("{}: not a recognised stream ({})", path, e)))?;

    let mut extra = 0;
    let info = loop {
        match progress {
            HeaderProgress::Complete(info) => break info,
            HeaderProgress::NeedMore if extra < MAX_EXTRA_HEADER_PACKETS => {
                extra += 1;
                progress = codec
                    .parse_header(cursor)
                    .map_err(|e| Error::Format(format!("{}: corrupted header ({})", path, e)))?;
            }
            HeaderProgress::NeedMore => {
                return Err(Error::Format(format!(
                    "{}: header incomplete after {} packets",
                    path,
                    MAX_EXTRA_HEADER_PACKETS + 1
                )));
            }
        }
    };

    if info.channels == 0 || info.sample_rate == 0 {
        return Err(Error::Format(format!(
            "{}: invalid format ({} channels @ {} Hz)",
            path, info.channels, info.sample_rate
        )));
    }
    Ok(info)
}

fn codec_for(path: &str, codecs: &dyn CodecFactory) -> Result<Box<dyn StreamCodec>> {
    if path.is_empty() {
        return Err(Error::InvalidArgument("empty audio path".to_string()));
    }
    codecs
        .create(path)
        .ok_or_else(|| Error::Format(format!("{}: no codec for this file type", path)))
}

fn read_asset(path: &str, reader: &dyn AssetReader) -> Result<Vec<u8>> {
    reader
        .read(path)
        .map_err(|e| Error::NotFound(format!("{}: {}", path, e)))
}

/// A fully decoded clip, ready to be uploaded as one device buffer
#[derive(Debug, Clone)]
pub struct DecodedClip {
    pub format: FormatInfo,
    /// Interleaved 16-bit samples
    pub samples: Vec<i16>,
    pub clipped: bool,
}

impl DecodedClip {
    pub fn pcm(&self) -> PcmData<'_> {
        PcmData {
            samples: &self.samples,
            channels: self.format.channels,
            sample_rate: self.format.sample_rate,
        }
    }

    /// Length in seconds
    pub fn duration_secs(&self) -> f32 {
        self.pcm().duration_secs()
    }
}

/// Decode a whole asset into memory (short clips).
pub fn decode_clip(path: &str, reader: &dyn AssetReader, codecs: &dyn CodecFactory) -> Result<DecodedClip> {
    let mut codec = codec_for(path, codecs)?;
    let mut cursor = ByteCursor::new(read_asset(path, reader)?);
    let format = read_header(codec.as_mut(), &mut cursor, path)?;

    let mut samples = Vec::new();
    let mut chunk = Vec::new();
    let mut clipped = false;
    loop {
        match codec.decode_frame(&mut cursor) {
            Ok(DecodedFrame::Pcm(frame)) => {
                if frame.is_empty() {
                    continue;
                }
                check_channels(&frame, format, path)?;
                clipped |= interleave_i16(&frame, 0, frame.len(), &mut chunk);
                samples.extend_from_slice(&chunk);
            }
            Ok(DecodedFrame::EndOfStream) => break,
            Err(e) => return Err(Error::DecodeFailed(format!("{}: {}", path, e))),
        }
    }

    if samples.is_empty() {
        return Err(Error::DecodeFailed(format!("{}: no audio data", path)));
    }
    if clipped {
        warn!("Clipping while decoding {}", path);
    }
    Ok(DecodedClip {
        format,
        samples,
        clipped,
    })
}

fn check_channels(frame: &PcmFrame, format: FormatInfo, path: &str) -> Result<()> {
    if frame.channels.len() != format.channels as usize {
        return Err(Error::DecodeFailed(format!(
            "{}: frame has {} channels, stream has {}",
            path,
            frame.channels.len(),
            format.channels
        )));
    }
    Ok(())
}

/// Incremental N-buffered stream player
pub struct StreamDecoder {
    path: String,
    cursor: ByteCursor,
    codec: Box<dyn StreamCodec>,
    format: FormatInfo,
    source: Option<SourceHandle>,
    buffers: Vec<BufferHandle>,
    buffer_count: usize,
    /// Frames (samples per channel) per device buffer
    frames_per_buffer: usize,
    /// Decoded frame not yet fully handed to the device
    pending: PcmFrame,
    pending_offset: usize,
    /// Last converted chunk, interleaved
    conv: Vec<i16>,
    frames_decoded: u64,
    error: bool,
    clipped: bool,
    end_of_stream: bool,
    drained: bool,
}

impl StreamDecoder {
    /// Open `path`, parse its header and acquire a device source.
    ///
    /// # Errors
    /// - [`Error::InvalidArgument`] for an empty path
    /// - [`Error::NotFound`] if the asset cannot be read
    /// - [`Error::Format`] if no codec accepts it or the header is bad
    pub fn open(
        path: &str,
        reader: &dyn AssetReader,
        codecs: &dyn CodecFactory,
        output: &mut dyn AudioOutput,
        config: &StreamConfig,
    ) -> Result<Self> {
        let mut codec = codec_for(path, codecs)?;
        let mut cursor = ByteCursor::new(read_asset(path, reader)?);
        let format = read_header(codec.as_mut(), &mut cursor, path)?;
        let source = output.create_source()?;

        let frames_per_buffer = (config.buffer_samples / format.channels as usize).max(1);
        info!(
            "Opened stream {}: {} channels @ {} Hz, {} buffers of {} frames",
            path, format.channels, format.sample_rate, config.buffer_count, frames_per_buffer
        );

        Ok(Self {
            path: path.to_string(),
            cursor,
            codec,
            format,
            source: Some(source),
            buffers: Vec::with_capacity(config.buffer_count),
            buffer_count: config.buffer_count.max(1),
            frames_per_buffer,
            pending: PcmFrame::default(),
            pending_offset: 0,
            conv: Vec::with_capacity(frames_per_buffer * format.channels as usize),
            frames_decoded: 0,
            error: false,
            clipped: false,
            end_of_stream: false,
            drained: false,
        })
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn format(&self) -> FormatInfo {
        self.format
    }

    pub fn source(&self) -> Option<SourceHandle> {
        self.source
    }

    /// Some sample was clamped during 16-bit conversion
    pub fn clipped(&self) -> bool {
        self.clipped
    }

    pub fn has_error(&self) -> bool {
        self.error
    }

    /// Frames (per channel) decoded so far
    pub fn frames_decoded(&self) -> u64 {
        self.frames_decoded
    }

    /// Seconds of audio decoded so far
    pub fn decoded_secs(&self) -> f64 {
        self.frames_decoded as f64 / self.format.sample_rate as f64
    }

    /// Failed, or decoded to the end and fully played out
    pub fn is_finished(&self) -> bool {
        self.error || self.drained
    }

    /// Interleaved 16-bit samples produced by the last [`StreamDecoder::decode_next`]
    pub fn last_chunk(&self) -> &[i16] {
        &self.conv
    }

    /// Decode the next chunk into the conversion buffer.
    ///
    /// Returns frames (samples per channel) produced, 0 at end of stream or
    /// after an error. At most one device buffer's worth is produced; the
    /// rest of a large frame is kept for the next call.
    pub fn decode_next(&mut self) -> usize {
        if self.error {
            return 0;
        }

        if self.pending_offset >= self.pending.len() {
            if self.end_of_stream {
                return 0;
            }
            loop {
                match self.codec.decode_frame(&mut self.cursor) {
                    Ok(DecodedFrame::Pcm(frame)) => {
                        if frame.is_empty() {
                            continue;
                        }
                        if let Err(e) = check_channels(&frame, self.format, &self.path) {
                            self.fail(e);
                            return 0;
                        }
                        self.pending = frame;
                        self.pending_offset = 0;
                        break;
                    }
                    Ok(DecodedFrame::EndOfStream) => {
                        debug!("End of stream: {}", self.path);
                        self.end_of_stream = true;
                        self.conv.clear();
                        return 0;
                    }
                    Err(e) => {
                        self.fail(Error::DecodeFailed(format!("{}: {}", self.path, e)));
                        return 0;
                    }
                }
            }
        }

        let frames = (self.pending.len() - self.pending_offset).min(self.frames_per_buffer);
        let clipped = interleave_i16(&self.pending, self.pending_offset, frames, &mut self.conv);
        self.pending_offset += frames;
        self.frames_decoded += frames as u64;

        if clipped && !self.clipped {
            warn!("Clipping in {}", self.path);
        }
        self.clipped |= clipped;
        frames
    }

    /// Decode into every buffer slot, queue them and start playback.
    ///
    /// A stream shorter than all slots leaves the rest unqueued.
    pub fn fill_initial_buffers(&mut self, output: &mut dyn AudioOutput) {
        let Some(source) = self.source else {
            return;
        };

        while self.buffers.len() < self.buffer_count && !self.error {
            if self.decode_next() == 0 {
                break;
            }
            let pcm = PcmData {
                samples: &self.conv,
                channels: self.format.channels,
                sample_rate: self.format.sample_rate,
            };
            let queued = output
                .create_buffer(pcm)
                .and_then(|buffer| output.queue_buffer(source, buffer).map(|_| buffer));
            match queued {
                Ok(buffer) => self.buffers.push(buffer),
                Err(e) => self.fail(e),
            }
        }
        debug!("{}: primed {} buffers", self.path, self.buffers.len());

        if self.error {
            return;
        }
        if self.buffers.is_empty() {
            self.drained = true;
            return;
        }
        if let Err(e) = output.play(source) {
            self.fail(e);
        }
    }

    /// Refill finished buffers and keep the source playing.
    pub fn update(&mut self, output: &mut dyn AudioOutput, _dt: f32) {
        let Some(source) = self.source else {
            return;
        };
        if self.error {
            return;
        }

        let state = output.state(source);
        let mut processed = output.buffers_processed(source);

        while processed > 0 && !self.error {
            processed -= 1;
            if self.decode_next() == 0 {
                continue;
            }
            let Some(buffer) = output.unqueue_processed(source) else {
                break;
            };
            let pcm = PcmData {
                samples: &self.conv,
                channels: self.format.channels,
                sample_rate: self.format.sample_rate,
            };
            let requeued = output
                .update_buffer(buffer, pcm)
                .and_then(|_| output.queue_buffer(source, buffer));
            if let Err(e) = requeued {
                self.fail(e);
            }
        }

        if self.error || state.is_active() {
            return;
        }

        // Restarting a stopped source replays its whole queue
        while output.unqueue_processed(source).is_some() {}
        let fresh = output.buffers_queued(source);
        if fresh == 0 {
            if !self.drained {
                info!("Stream finished: {}", self.path);
            }
            self.drained = true;
            return;
        }

        debug!("{}: underrun, restarting with {} buffers", self.path, fresh);
        if let Err(e) = output.play(source) {
            self.fail(e);
        }
    }

    /// Stop playback and release the device source and buffers.
    pub fn clear(&mut self, output: &mut dyn AudioOutput) {
        if let Some(source) = self.source.take() {
            output.stop(source);
            while output.unqueue_processed(source).is_some() {}
            output.delete_source(source);
        }
        for buffer in self.buffers.drain(..) {
            output.delete_buffer(buffer);
        }
        self.pending = PcmFrame::default();
        self.pending_offset = 0;
        self.conv.clear();
        debug!("Cleared stream {}", self.path);
    }

    fn fail(&mut self, err: Error) {
        error!("Stream {} failed: {}", self.path, err);
        self.error = true;
    }
}
