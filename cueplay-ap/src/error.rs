//! Error types for cueplay-ap
//!
//! Internal helpers return [`Result`] and propagate with `?`. The
//! engine-facing API catches these at the boundary, logs them, and hands
//! the caller a sentinel (invalid [`AudioId`] or `false`).

use crate::audio::AudioId;
use thiserror::Error;

/// Main error type for cueplay-ap
#[derive(Error, Debug)]
pub enum Error {
    /// Null/empty path or other rejected argument (checked before any I/O)
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// File missing or unreadable
    #[error("Not found: {0}")]
    NotFound(String),

    /// Audio data could be parsed but not decoded
    #[error("Decode failed: {0}")]
    DecodeFailed(String),

    /// Header/stream cannot be parsed as the expected codec
    #[error("Format error: {0}")]
    Format(String),

    /// Operation referenced an AudioId with no active voice
    #[error("Unknown voice: {0}")]
    UnknownVoice(AudioId),

    /// Audio output device errors
    #[error("Audio output error: {0}")]
    AudioOutput(String),

    /// File I/O errors
    #[error("File I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Configuration file loading errors
    #[error("Configuration error: {0}")]
    Config(#[from] cueplay_common::Error),
}

/// Convenience Result type using cueplay-ap Error
pub type Result<T> = std::result::Result<T, Error>;
