//! Audio output device seam
//!
//! [`AudioOutput`] is the mixer/device the playback core drives: it owns
//! sources (mixer channels) and PCM buffers and reports per-source state.
//! The core never mixes audio itself.
//!
//! End-of-playback notification goes through a lock-free SPSC queue. The
//! device holds the [`CompletionSink`] (producer side) and pushes the
//! [`CompletionToken`] registered via [`AudioOutput::watch`] when a watched
//! source stops; the clip cache holds the [`CompletionQueue`] and drains it
//! once per update tick. Nothing is ever called back into the core from the
//! device's context.

use crate::audio::types::{BufferHandle, PcmData, SourceHandle, SourceState};
use crate::error::Result;
use ringbuf::{traits::*, HeapRb};
use tracing::warn;

/// Identifies one voice in the clip cache's arena.
///
/// The generation changes every time an arena slot is reused, so a token
/// that arrives after its voice was already torn down is recognised as stale.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CompletionToken {
    pub index: u32,
    pub generation: u32,
}

/// Create a completion queue with room for `capacity` pending tokens
pub fn completion_channel(capacity: usize) -> (CompletionSink, CompletionQueue) {
    let rb = HeapRb::<CompletionToken>::new(capacity.max(1));
    let (producer, consumer) = rb.split();
    (CompletionSink { producer }, CompletionQueue { consumer })
}

/// Producer half, owned by the device
pub struct CompletionSink {
    producer: ringbuf::HeapProd<CompletionToken>,
}

impl CompletionSink {
    /// Push a completion.
    ///
    /// Returns `false` if the queue is full; the token is dropped and the
    /// voice will linger until the next stop of that source.
    pub fn notify(&mut self, token: CompletionToken) -> bool {
        match self.producer.try_push(token) {
            Ok(()) => true,
            Err(_) => {
                warn!(
                    "Completion queue full, dropping token (slot {}, gen {})",
                    token.index, token.generation
                );
                false
            }
        }
    }

    pub fn pending(&self) -> usize {
        self.producer.occupied_len()
    }
}

/// Consumer half, drained by the clip cache
pub struct CompletionQueue {
    consumer: ringbuf::HeapCons<CompletionToken>,
}

impl CompletionQueue {
    pub fn pop(&mut self) -> Option<CompletionToken> {
        self.consumer.try_pop()
    }

    pub fn len(&self) -> usize {
        self.consumer.occupied_len()
    }

    pub fn is_empty(&self) -> bool {
        self.consumer.is_empty()
    }
}

/// Low-level audio output device.
///
/// Handles are only meaningful to the device that issued them. Operations on
/// an unknown handle are ignored by the device (setters) or return
/// [`crate::Error::AudioOutput`] (fallible operations).
pub trait AudioOutput {
    // Sources

    fn create_source(&mut self) -> Result<SourceHandle>;
    fn delete_source(&mut self, source: SourceHandle);

    // Buffers

    fn create_buffer(&mut self, pcm: PcmData<'_>) -> Result<BufferHandle>;
    /// Replace the contents of an existing (unqueued) buffer
    fn update_buffer(&mut self, buffer: BufferHandle, pcm: PcmData<'_>) -> Result<()>;
    fn delete_buffer(&mut self, buffer: BufferHandle);

    // Queueing

    fn queue_buffer(&mut self, source: SourceHandle, buffer: BufferHandle) -> Result<()>;
    /// Take the oldest fully played buffer off the queue
    fn unqueue_processed(&mut self, source: SourceHandle) -> Option<BufferHandle>;
    fn buffers_processed(&self, source: SourceHandle) -> usize;
    fn buffers_queued(&self, source: SourceHandle) -> usize;

    // Transport

    fn state(&self, source: SourceHandle) -> SourceState;
    fn play(&mut self, source: SourceHandle) -> Result<()>;
    fn stop(&mut self, source: SourceHandle);
    /// Seek a started source to `seconds` into its queued data
    fn set_offset(&mut self, source: SourceHandle, seconds: f32);
    /// Seconds played into the queued data
    fn offset(&self, source: SourceHandle) -> f32;

    // Properties

    fn set_gain(&mut self, source: SourceHandle, gain: f32);
    fn gain(&self, source: SourceHandle) -> f32;
    fn set_position(&mut self, source: SourceHandle, position: [f32; 3]);
    fn set_relative(&mut self, source: SourceHandle, relative: bool);
    fn set_reference_distance(&mut self, source: SourceHandle, distance: f32);
    fn set_rolloff_factor(&mut self, source: SourceHandle, factor: f32);
    fn set_max_distance(&mut self, source: SourceHandle, distance: f32);
    fn set_looping(&mut self, source: SourceHandle, looping: bool);

    // Completion

    /// Deliver `token` to the completion sink when `source` stops
    fn watch(&mut self, source: SourceHandle, token: CompletionToken);
    fn attach_completion_sink(&mut self, sink: CompletionSink);
    /// Device housekeeping; delivers pending completions
    fn pump(&mut self);
}
