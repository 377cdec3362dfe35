//! H.262 aggregation errors.

use revmux_es::EsError;
use thiserror::Error;

/// Errors raised while aggregating H.262 pictures.
#[derive(Error, Debug)]
pub enum H262Error {
    /// Error from the ES layer.
    #[error(transparent)]
    Es(#[from] EsError),

    /// A structurally malformed header or item sequence.
    #[error("Malformed H.262 data: {0}")]
    Malformed(String),
}

impl H262Error {
    /// Check whether this error is the normal terminal condition.
    #[must_use]
    pub fn is_eof(&self) -> bool {
        matches!(self, H262Error::Es(e) if e.is_eof())
    }
}

/// Result type for H.262 operations.
pub type Result<T> = std::result::Result<T, H262Error>;
