//! Error types shared across the revmux workspace.

use thiserror::Error;

/// Top-level error for core operations.
#[derive(Error, Debug)]
pub enum Error {
    /// Bit-level parsing errors.
    #[error("Bitstream error: {0}")]
    Bits(#[from] BitsError),

    /// I/O errors.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Invalid parameter provided by a caller.
    #[error("Invalid parameter: {0}")]
    InvalidParameter(String),

    /// End of input reached.
    #[error("End of input")]
    EndOfInput,
}

/// Bit-level parsing errors.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum BitsError {
    /// Fewer bits remain than were requested.
    #[error("Bit reader underflow")]
    Underflow,

    /// An Exp-Golomb code had more leading zeros than any valid value.
    #[error("Exp-Golomb code too long")]
    ExpGolombOverflow,

    /// A read width outside 1..=32 was requested.
    #[error("Invalid bit count: {0}")]
    InvalidBitCount(u8),
}

impl Error {
    /// Check whether this error is the normal terminal condition.
    #[must_use]
    pub fn is_eof(&self) -> bool {
        matches!(self, Error::EndOfInput)
    }
}

/// Result type alias using the core error.
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_is_eof() {
        assert!(Error::EndOfInput.is_eof());
        assert!(!Error::Bits(BitsError::Underflow).is_eof());
    }

    #[test]
    fn test_display() {
        let err = Error::Bits(BitsError::Underflow);
        assert_eq!(err.to_string(), "Bitstream error: Bit reader underflow");
    }
}
