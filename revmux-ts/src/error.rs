//! Transport Stream error types.

use thiserror::Error;

/// Errors raised by TS and PS parsing and writing.
#[derive(Error, Debug)]
pub enum TsError {
    /// Invalid sync byte (expected 0x47).
    #[error("Invalid sync byte: expected 0x47, got 0x{0:02X}")]
    InvalidSyncByte(u8),

    /// Fewer than 188 bytes were available for a packet.
    #[error("Short read: wanted {wanted} bytes, got {got}")]
    ShortRead {
        /// Bytes requested.
        wanted: usize,
        /// Bytes actually read.
        got: usize,
    },

    /// Sync could not be regained within the resync window.
    #[error("Transport stream sync lost at offset {0}")]
    SyncLost(u64),

    /// Invalid adaptation field.
    #[error("Invalid adaptation field: {0}")]
    InvalidAdaptationField(String),

    /// Invalid PSI section.
    #[error("Invalid PSI section: {0}")]
    InvalidPsi(String),

    /// Invalid PAT.
    #[error("Invalid PAT: {0}")]
    InvalidPat(String),

    /// Invalid PMT.
    #[error("Invalid PMT: {0}")]
    InvalidPmt(String),

    /// Invalid PES packet.
    #[error("Invalid PES packet: {0}")]
    InvalidPes(String),

    /// Invalid Program Stream structure.
    #[error("Invalid program stream: {0}")]
    InvalidPs(String),

    /// CRC mismatch on a PSI section.
    #[error("CRC mismatch: stored 0x{stored:08X}, computed 0x{computed:08X}")]
    CrcMismatch {
        /// CRC stored in the section.
        stored: u32,
        /// CRC computed over the section body.
        computed: u32,
    },

    /// No video stream was found to select.
    #[error("No video stream found in program")]
    NoVideoStream,

    /// The underlying byte source does not support seeking.
    #[error("Input is not seekable")]
    NotSeekable,

    /// End of the input stream.
    #[error("End of stream")]
    EndOfStream,

    /// I/O error from the byte source or sink.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl TsError {
    /// Create an invalid PSI error.
    pub fn invalid_psi(msg: impl Into<String>) -> Self {
        TsError::InvalidPsi(msg.into())
    }

    /// Create an invalid PAT error.
    pub fn invalid_pat(msg: impl Into<String>) -> Self {
        TsError::InvalidPat(msg.into())
    }

    /// Create an invalid PMT error.
    pub fn invalid_pmt(msg: impl Into<String>) -> Self {
        TsError::InvalidPmt(msg.into())
    }

    /// Create an invalid PES error.
    pub fn invalid_pes(msg: impl Into<String>) -> Self {
        TsError::InvalidPes(msg.into())
    }

    /// Check whether this error is the normal terminal condition.
    #[must_use]
    pub fn is_eof(&self) -> bool {
        matches!(self, TsError::EndOfStream)
    }
}

/// Result type for TS operations.
pub type Result<T> = std::result::Result<T, TsError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display() {
        let err = TsError::InvalidSyncByte(0xFF);
        assert_eq!(err.to_string(), "Invalid sync byte: expected 0x47, got 0xFF");
    }

    #[test]
    fn test_is_eof() {
        assert!(TsError::EndOfStream.is_eof());
        assert!(!TsError::SyncLost(0).is_eof());
    }
}
