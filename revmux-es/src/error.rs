//! Elementary stream error types.

use revmux_ts::TsError;
use thiserror::Error;

/// Errors raised by the ES byte view and unit scanner.
#[derive(Error, Debug)]
pub enum EsError {
    /// A start-code prefix was found at end of input with no unit after it.
    #[error("Start-code prefix at end of input with no unit body")]
    ShortUnit,

    /// Fewer bytes than requested were available.
    #[error("Short read: wanted {wanted} bytes, got {got}")]
    ShortRead {
        /// Bytes requested.
        wanted: usize,
        /// Bytes delivered.
        got: usize,
    },

    /// An offset did not address a readable position.
    #[error("Bad ES offset: {0}")]
    BadOffset(String),

    /// Error from the underlying transport or program stream.
    #[error(transparent)]
    Ts(#[from] TsError),

    /// I/O error from a direct file source.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// End of the elementary stream.
    #[error("End of stream")]
    EndOfStream,
}

impl EsError {
    /// Check whether this error is the normal terminal condition.
    #[must_use]
    pub fn is_eof(&self) -> bool {
        matches!(self, EsError::EndOfStream | EsError::Ts(TsError::EndOfStream))
    }
}

/// Result type for ES operations.
pub type Result<T> = std::result::Result<T, EsError>;
