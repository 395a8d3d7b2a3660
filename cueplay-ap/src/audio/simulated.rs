//! Deterministic simulated output device
//!
//! Models an OpenAL-style mixer without producing sound: each playing source
//! consumes its queued buffers in real time as [`SimulatedOutput::advance`] is
//! called. Used by the `cue-sim` binary and by the test suites, where the
//! wall clock is replaced by explicit ticks.

use crate::audio::output::{AudioOutput, CompletionSink, CompletionToken};
use crate::audio::types::{BufferHandle, PcmData, SourceHandle, SourceState};
use crate::error::{Error, Result};
use std::collections::{HashMap, VecDeque};
use tracing::{debug, trace};

#[derive(Debug)]
struct SimBuffer {
    samples: Vec<i16>,
    channels: u16,
    sample_rate: u32,
    duration: f64,
}

impl SimBuffer {
    fn from_pcm(pcm: PcmData<'_>) -> Self {
        Self {
            samples: pcm.samples.to_vec(),
            channels: pcm.channels,
            sample_rate: pcm.sample_rate,
            duration: pcm.duration_secs() as f64,
        }
    }
}

#[derive(Debug)]
struct SimSource {
    state: SourceState,
    queue: VecDeque<BufferHandle>,
    /// Buffers at the front of `queue` that have been fully played
    processed: usize,
    /// Seconds played into the current buffer
    cursor: f64,
    gain: f32,
    position: [f32; 3],
    relative: bool,
    reference_distance: f32,
    rolloff_factor: f32,
    max_distance: f32,
    looping: bool,
    watch: Option<CompletionToken>,
}

impl SimSource {
    fn new() -> Self {
        Self {
            state: SourceState::Initial,
            queue: VecDeque::new(),
            processed: 0,
            cursor: 0.0,
            gain: 1.0,
            position: [0.0; 3],
            relative: false,
            reference_distance: 1.0,
            rolloff_factor: 1.0,
            max_distance: f32::MAX,
            looping: false,
            watch: None,
        }
    }
}

/// Snapshot of a simulated source, for inspection
#[derive(Debug, Clone, PartialEq)]
pub struct SourceSnapshot {
    pub state: SourceState,
    pub gain: f32,
    pub position: [f32; 3],
    pub relative: bool,
    pub reference_distance: f32,
    pub rolloff_factor: f32,
    pub max_distance: f32,
    pub looping: bool,
    pub queued: usize,
    pub processed: usize,
}

/// In-memory device that plays buffers against a virtual clock
#[derive(Debug, Default)]
pub struct SimulatedOutput {
    sources: HashMap<u32, SimSource>,
    buffers: HashMap<u32, SimBuffer>,
    next_handle: u32,
    source_limit: Option<usize>,
    sink: Option<SinkSlot>,
    pending: Vec<CompletionToken>,
    clock: f64,
}

struct SinkSlot(CompletionSink);

impl std::fmt::Debug for SinkSlot {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "CompletionSink({} pending)", self.0.pending())
    }
}

impl SimulatedOutput {
    pub fn new() -> Self {
        Self::default()
    }

    /// Refuse to create more than `limit` live sources
    pub fn with_source_limit(mut self, limit: usize) -> Self {
        self.source_limit = Some(limit);
        self
    }

    /// Seconds of device time simulated so far
    pub fn clock(&self) -> f64 {
        self.clock
    }

    /// Play every active source forward by `dt` seconds.
    ///
    /// Sources that run out of queued data stop; if watched, their
    /// completion is held until the next [`AudioOutput::pump`].
    pub fn advance(&mut self, dt: f64) {
        if dt <= 0.0 {
            return;
        }
        self.clock += dt;

        for (handle, source) in self.sources.iter_mut() {
            if source.state != SourceState::Playing {
                continue;
            }

            let mut remaining = dt;
            loop {
                if source.processed >= source.queue.len() {
                    let total: f64 = source
                        .queue
                        .iter()
                        .filter_map(|b| self.buffers.get(&b.0))
                        .map(|b| b.duration)
                        .sum();
                    if source.looping && total > 0.0 {
                        source.processed = 0;
                        source.cursor = 0.0;
                        continue;
                    }
                    trace!("Simulated source {} drained at {:.3}s", handle, self.clock);
                    source.state = SourceState::Stopped;
                    source.cursor = 0.0;
                    if let Some(token) = source.watch.take() {
                        self.pending.push(token);
                    }
                    break;
                }

                let duration = source
                    .queue
                    .get(source.processed)
                    .and_then(|b| self.buffers.get(&b.0))
                    .map_or(0.0, |b| b.duration);
                let left = duration - source.cursor;
                if remaining < left {
                    source.cursor += remaining;
                    break;
                }
                remaining -= left;
                source.cursor = 0.0;
                source.processed += 1;
                if remaining <= 0.0 && source.processed < source.queue.len() {
                    break;
                }
            }
        }
    }

    pub fn source_snapshot(&self, source: SourceHandle) -> Option<SourceSnapshot> {
        self.sources.get(&source.0).map(|s| SourceSnapshot {
            state: s.state,
            gain: s.gain,
            position: s.position,
            relative: s.relative,
            reference_distance: s.reference_distance,
            rolloff_factor: s.rolloff_factor,
            max_distance: s.max_distance,
            looping: s.looping,
            queued: s.queue.len(),
            processed: s.processed,
        })
    }

    /// Sources currently in the `Playing` state
    pub fn playing_sources(&self) -> usize {
        self.sources
            .values()
            .filter(|s| s.state == SourceState::Playing)
            .count()
    }

    pub fn source_count(&self) -> usize {
        self.sources.len()
    }

    pub fn buffer_count(&self) -> usize {
        self.buffers.len()
    }

    /// Interleaved samples stored in a buffer
    pub fn buffer_samples(&self, buffer: BufferHandle) -> Option<&[i16]> {
        self.buffers.get(&buffer.0).map(|b| b.samples.as_slice())
    }

    pub fn buffer_format(&self, buffer: BufferHandle) -> Option<(u16, u32)> {
        self.buffers
            .get(&buffer.0)
            .map(|b| (b.channels, b.sample_rate))
    }

    /// Buffers queued on a source, oldest first
    pub fn queued_buffers(&self, source: SourceHandle) -> Vec<BufferHandle> {
        self.sources
            .get(&source.0)
            .map(|s| s.queue.iter().copied().collect())
            .unwrap_or_default()
    }

    fn allocate_handle(&mut self) -> u32 {
        self.next_handle += 1;
        self.next_handle
    }

    fn source_mut(&mut self, source: SourceHandle) -> Result<&mut SimSource> {
        self.sources
            .get_mut(&source.0)
            .ok_or_else(|| Error::AudioOutput(format!("Unknown source {}", source.0)))
    }
}

impl AudioOutput for SimulatedOutput {
    fn create_source(&mut self) -> Result<SourceHandle> {
        if let Some(limit) = self.source_limit {
            if self.sources.len() >= limit {
                return Err(Error::AudioOutput(format!(
                    "Source limit reached ({} sources)",
                    limit
                )));
            }
        }
        let handle = self.allocate_handle();
        self.sources.insert(handle, SimSource::new());
        Ok(SourceHandle(handle))
    }

    fn delete_source(&mut self, source: SourceHandle) {
        self.sources.remove(&source.0);
    }

    fn create_buffer(&mut self, pcm: PcmData<'_>) -> Result<BufferHandle> {
        if pcm.channels == 0 || pcm.sample_rate == 0 {
            return Err(Error::AudioOutput(format!(
                "Unsupported buffer format: {} channels @ {} Hz",
                pcm.channels, pcm.sample_rate
            )));
        }
        let handle = self.allocate_handle();
        self.buffers.insert(handle, SimBuffer::from_pcm(pcm));
        Ok(BufferHandle(handle))
    }

    fn update_buffer(&mut self, buffer: BufferHandle, pcm: PcmData<'_>) -> Result<()> {
        let slot = self
            .buffers
            .get_mut(&buffer.0)
            .ok_or_else(|| Error::AudioOutput(format!("Unknown buffer {}", buffer.0)))?;
        *slot = SimBuffer::from_pcm(pcm);
        Ok(())
    }

    fn delete_buffer(&mut self, buffer: BufferHandle) {
        self.buffers.remove(&buffer.0);
    }

    fn queue_buffer(&mut self, source: SourceHandle, buffer: BufferHandle) -> Result<()> {
        if !self.buffers.contains_key(&buffer.0) {
            return Err(Error::AudioOutput(format!("Unknown buffer {}", buffer.0)));
        }
        self.source_mut(source)?.queue.push_back(buffer);
        Ok(())
    }

    fn unqueue_processed(&mut self, source: SourceHandle) -> Option<BufferHandle> {
        let src = self.sources.get_mut(&source.0)?;
        if src.processed == 0 {
            return None;
        }
        src.processed -= 1;
        src.queue.pop_front()
    }

    fn buffers_processed(&self, source: SourceHandle) -> usize {
        self.sources.get(&source.0).map_or(0, |s| s.processed)
    }

    fn buffers_queued(&self, source: SourceHandle) -> usize {
        self.sources.get(&source.0).map_or(0, |s| s.queue.len())
    }

    fn state(&self, source: SourceHandle) -> SourceState {
        self.sources
            .get(&source.0)
            .map_or(SourceState::Stopped, |s| s.state)
    }

    fn play(&mut self, source: SourceHandle) -> Result<()> {
        let src = self
            .sources
            .get_mut(&source.0)
            .ok_or_else(|| Error::AudioOutput(format!("Unknown source {}", source.0)))?;
        match src.state {
            SourceState::Playing => return Ok(()),
            SourceState::Paused => {}
            SourceState::Initial | SourceState::Stopped => {
                // Rewind: everything still queued becomes pending again
                src.processed = 0;
                src.cursor = 0.0;
            }
        }
        if src.queue.is_empty() {
            src.state = SourceState::Stopped;
            if let Some(token) = src.watch.take() {
                self.pending.push(token);
            }
        } else {
            src.state = SourceState::Playing;
        }
        debug!("Simulated source {} playing", source.0);
        Ok(())
    }

    fn stop(&mut self, source: SourceHandle) {
        let Some(src) = self.sources.get_mut(&source.0) else {
            return;
        };
        src.state = SourceState::Stopped;
        src.processed = src.queue.len();
        src.cursor = 0.0;
        if let Some(token) = src.watch.take() {
            self.pending.push(token);
        }
    }

    fn set_offset(&mut self, source: SourceHandle, seconds: f32) {
        let Some(src) = self.sources.get_mut(&source.0) else {
            return;
        };
        let mut remaining = seconds.max(0.0) as f64;
        src.processed = 0;
        src.cursor = 0.0;
        for buffer in &src.queue {
            let duration = self.buffers.get(&buffer.0).map_or(0.0, |b| b.duration);
            if remaining < duration {
                src.cursor = remaining;
                return;
            }
            remaining -= duration;
            src.processed += 1;
        }
        trace!("Simulated source {} seeked past its queue", source.0);
    }

    fn offset(&self, source: SourceHandle) -> f32 {
        let Some(src) = self.sources.get(&source.0) else {
            return 0.0;
        };
        let played: f64 = src
            .queue
            .iter()
            .take(src.processed)
            .filter_map(|b| self.buffers.get(&b.0))
            .map(|b| b.duration)
            .sum();
        (played + src.cursor) as f32
    }

    fn set_gain(&mut self, source: SourceHandle, gain: f32) {
        if let Some(s) = self.sources.get_mut(&source.0) {
            s.gain = gain;
        }
    }

    fn gain(&self, source: SourceHandle) -> f32 {
        self.sources.get(&source.0).map_or(0.0, |s| s.gain)
    }

    fn set_position(&mut self, source: SourceHandle, position: [f32; 3]) {
        if let Some(s) = self.sources.get_mut(&source.0) {
            s.position = position;
        }
    }

    fn set_relative(&mut self, source: SourceHandle, relative: bool) {
        if let Some(s) = self.sources.get_mut(&source.0) {
            s.relative = relative;
        }
    }

    fn set_reference_distance(&mut self, source: SourceHandle, distance: f32) {
        if let Some(s) = self.sources.get_mut(&source.0) {
            s.reference_distance = distance;
        }
    }

    fn set_rolloff_factor(&mut self, source: SourceHandle, factor: f32) {
        if let Some(s) = self.sources.get_mut(&source.0) {
            s.rolloff_factor = factor;
        }
    }

    fn set_max_distance(&mut self, source: SourceHandle, distance: f32) {
        if let Some(s) = self.sources.get_mut(&source.0) {
            s.max_distance = distance;
        }
    }

    fn set_looping(&mut self, source: SourceHandle, looping: bool) {
        if let Some(s) = self.sources.get_mut(&source.0) {
            s.looping = looping;
        }
    }

    fn watch(&mut self, source: SourceHandle, token: CompletionToken) {
        if let Some(s) = self.sources.get_mut(&source.0) {
            s.watch = Some(token);
        }
    }

    fn attach_completion_sink(&mut self, sink: CompletionSink) {
        self.sink = Some(SinkSlot(sink));
    }

    fn pump(&mut self) {
        let Some(SinkSlot(sink)) = self.sink.as_mut() else {
            return;
        };
        let mut undelivered = Vec::new();
        for token in self.pending.drain(..) {
            if !sink.notify(token) {
                undelivered.push(token);
            }
        }
        self.pending = undelivered;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::output::completion_channel;

    fn one_second_mono(output: &mut SimulatedOutput) -> BufferHandle {
        let samples = vec![0i16; 100];
        output
            .create_buffer(PcmData {
                samples: &samples,
                channels: 1,
                sample_rate: 100,
            })
            .unwrap()
    }

    #[test]
    fn test_source_drains_and_stops() {
        let mut output = SimulatedOutput::new();
        let source = output.create_source().unwrap();
        let buffer = one_second_mono(&mut output);
        output.queue_buffer(source, buffer).unwrap();
        output.play(source).unwrap();

        output.advance(0.5);
        assert_eq!(output.state(source), SourceState::Playing);
        assert_eq!(output.buffers_processed(source), 0);

        output.advance(0.6);
        assert_eq!(output.state(source), SourceState::Stopped);
        assert_eq!(output.buffers_processed(source), 1);
    }

    #[test]
    fn test_looping_source_keeps_playing() {
        let mut output = SimulatedOutput::new();
        let source = output.create_source().unwrap();
        let buffer = one_second_mono(&mut output);
        output.queue_buffer(source, buffer).unwrap();
        output.set_looping(source, true);
        output.play(source).unwrap();

        output.advance(3.5);
        assert_eq!(output.state(source), SourceState::Playing);
    }

    #[test]
    fn test_completion_delivered_on_pump() {
        let (sink, mut queue) = completion_channel(8);
        let mut output = SimulatedOutput::new();
        output.attach_completion_sink(sink);

        let source = output.create_source().unwrap();
        let buffer = one_second_mono(&mut output);
        output.queue_buffer(source, buffer).unwrap();
        let token = CompletionToken { index: 2, generation: 5 };
        output.watch(source, token);
        output.play(source).unwrap();

        output.advance(1.5);
        assert!(queue.is_empty(), "completions wait for pump");
        output.pump();
        assert_eq!(queue.pop(), Some(token));
    }

    #[test]
    fn test_explicit_stop_fires_completion_once() {
        let (sink, mut queue) = completion_channel(8);
        let mut output = SimulatedOutput::new();
        output.attach_completion_sink(sink);

        let source = output.create_source().unwrap();
        let buffer = one_second_mono(&mut output);
        output.queue_buffer(source, buffer).unwrap();
        output.watch(source, CompletionToken { index: 0, generation: 1 });
        output.play(source).unwrap();
        output.stop(source);
        output.stop(source);
        output.pump();

        assert_eq!(queue.len(), 1);
    }

    #[test]
    fn test_seek_moves_play_cursor() {
        let mut output = SimulatedOutput::new();
        let source = output.create_source().unwrap();
        let a = one_second_mono(&mut output);
        let b = one_second_mono(&mut output);
        output.queue_buffer(source, a).unwrap();
        output.queue_buffer(source, b).unwrap();
        output.play(source).unwrap();

        output.set_offset(source, 1.25);
        assert_eq!(output.buffers_processed(source), 1);
        assert_eq!(output.offset(source), 1.25);

        output.advance(0.5);
        assert_eq!(output.offset(source), 1.75);
        output.advance(0.5);
        assert_eq!(output.state(source), SourceState::Stopped);
    }

    #[test]
    fn test_source_limit() {
        let mut output = SimulatedOutput::new().with_source_limit(1);
        output.create_source().unwrap();
        assert!(matches!(output.create_source(), Err(Error::AudioOutput(_))));
    }

    #[test]
    fn test_unqueue_only_processed() {
        let mut output = SimulatedOutput::new();
        let source = output.create_source().unwrap();
        let a = one_second_mono(&mut output);
        let b = one_second_mono(&mut output);
        output.queue_buffer(source, a).unwrap();
        output.queue_buffer(source, b).unwrap();
        output.play(source).unwrap();

        assert_eq!(output.unqueue_processed(source), None);
        output.advance(1.2);
        assert_eq!(output.unqueue_processed(source), Some(a));
        assert_eq!(output.unqueue_processed(source), None);
        assert_eq!(output.buffers_queued(source), 1);
    }
}
