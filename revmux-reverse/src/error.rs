//! Reverse engine errors.

use thiserror::Error;

/// Errors raised by collection, filtering and reverse output.
#[derive(Error, Debug)]
pub enum ReverseError {
    /// The catalog holds no anchor frames to output.
    #[error("No reversible frames were collected")]
    NoData,

    /// Catalog entries must not move backwards in the stream.
    #[error("Catalog offset went backwards: {0} after {1}")]
    NonMonotonic(revmux_es::EsOffset, revmux_es::EsOffset),

    /// Error from the ES layer.
    #[error(transparent)]
    Es(#[from] revmux_es::EsError),

    /// Error from H.262 aggregation.
    #[error(transparent)]
    H262(#[from] revmux_h262::H262Error),

    /// Error from H.264 aggregation.
    #[error(transparent)]
    H264(#[from] revmux_h264::H264Error),

    /// Error from the transport writer.
    #[error(transparent)]
    Ts(#[from] revmux_ts::TsError),

    /// I/O error on the output sink.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type for reverse operations.
pub type Result<T> = std::result::Result<T, ReverseError>;
