//! Audio reader errors.

use thiserror::Error;

/// Errors raised by the audio frame readers.
#[derive(Error, Debug)]
pub enum AudioError {
    /// The expected syncword was not found.
    #[error("Lost audio sync: expected {expected}, found 0x{found:04X}")]
    SyncLost {
        /// Description of the expected syncword.
        expected: &'static str,
        /// The bytes actually found.
        found: u16,
    },

    /// A header field held an invalid value.
    #[error("Invalid audio frame header: {0}")]
    InvalidHeader(String),

    /// The input ended inside a frame.
    #[error("Short read inside an audio frame: wanted {wanted}, got {got}")]
    ShortFrame {
        /// Bytes wanted.
        wanted: usize,
        /// Bytes read.
        got: usize,
    },

    /// I/O error from the byte source.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type for audio operations.
pub type Result<T> = std::result::Result<T, AudioError>;
