//! # revmux-core
//!
//! Shared primitives for the revmux MPEG-2 Systems toolkit:
//!
//! - Error types used across the workspace
//! - Bit-aligned reading and writing over byte buffers, including the
//!   Exp-Golomb codes of ISO/IEC 14496-10 clause 9.1
//! - Start-code search and emulation-prevention handling for Annex B
//!   byte streams

pub mod bitstream;
pub mod error;

pub use bitstream::{BitReader, BitWriter};
pub use error::{BitsError, Error, Result};
