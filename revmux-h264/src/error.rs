//! H.264 parsing errors.

use revmux_es::EsError;
use thiserror::Error;

/// Errors raised by NAL unit and access unit handling.
#[derive(Error, Debug)]
pub enum H264Error {
    /// Error from the ES layer.
    #[error(transparent)]
    Es(#[from] EsError),

    /// Bit-level parse failure inside a NAL unit.
    #[error("Bitstream error: {0}")]
    Bits(#[from] revmux_core::Error),

    /// A malformed NAL unit.
    #[error("Invalid NAL unit: {0}")]
    InvalidNal(String),

    /// A malformed SPS or PPS.
    #[error("Invalid parameter set: {0}")]
    InvalidParameterSet(String),

    /// A malformed slice header.
    #[error("Slice error: {0}")]
    Slice(String),
}

impl H264Error {
    /// Check whether this error is the normal terminal condition.
    #[must_use]
    pub fn is_eof(&self) -> bool {
        matches!(self, H264Error::Es(e) if e.is_eof())
    }
}

/// Result type for H.264 operations.
pub type Result<T> = std::result::Result<T, H264Error>;
