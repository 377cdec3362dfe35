//! # revmux-h264
//!
//! H.264 (MPEG-4/AVC) elementary stream handling for the revmux
//! toolkit: NAL unit classification, SPS/PPS parsing and caching,
//! slice header parsing, and access unit aggregation per ISO/IEC
//! 14496-10 clause 7.4.1.2.

pub mod access_unit;
pub mod error;
pub mod nal;
pub mod param;
pub mod pps;
pub mod slice;
pub mod sps;

pub use access_unit::{AccessUnit, AccessUnitReader};
pub use error::{H264Error, Result};
pub use nal::{NalUnit, NalUnitType};
pub use param::{ParamDictionary, ParamSetEntry};
pub use pps::PictureParameterSet;
pub use slice::{parse_slice_prefix, SliceHeader, SliceType};
pub use sps::SequenceParameterSet;
