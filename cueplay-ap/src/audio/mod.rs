//! Audio subsystem seams and data types
//!
//! - [`codec`]: the compressed-stream decoder trait and byte cursor
//! - [`output`]: the device trait and the completion queue
//! - [`decoder`]: symphonia-backed codec
//! - [`simulated`]: deterministic device model

pub mod assets;
pub mod codec;
pub mod decoder;
pub mod output;
pub mod pcm;
pub mod simulated;
pub mod types;

pub use assets::{AssetReader, FsAssetReader};
pub use codec::{ByteCursor, CodecFactory, DecodedFrame, HeaderProgress, StreamCodec};
pub use decoder::{SymphoniaCodec, SymphoniaCodecFactory};
pub use output::{completion_channel, AudioOutput, CompletionQueue, CompletionSink, CompletionToken};
pub use simulated::{SimulatedOutput, SourceSnapshot};
pub use types::{
    AudioCategory, AudioId, AudioIdAllocator, AudioProperties, BufferHandle, FormatInfo, PcmData, PcmFrame,
    SourceHandle, SourceState,
};
