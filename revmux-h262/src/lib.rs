//! # revmux-h262
//!
//! H.262 (MPEG-2 video, and by extension MPEG-1 video) elementary
//! stream aggregation for the revmux toolkit: classifying start-code
//! units, grouping them into pictures and sequence headers, joining
//! field pairs into frames, and tracking Active Format Descriptions.

#![warn(missing_docs)]

pub mod error;
pub mod picture;
pub mod types;

pub use error::{H262Error, Result};
pub use picture::{H262FrameReader, H262Item, H262Picture, PictureKind};
pub use types::{
    is_slice_start_code, PictureCodingType, PictureStructure, EXTENSION_START_CODE,
    GOP_START_CODE, PICTURE_START_CODE, SEQUENCE_END_CODE, SEQUENCE_HEADER_CODE,
    SLICE_START_CODE_MAX, SLICE_START_CODE_MIN, UNSET_AFD, USER_DATA_START_CODE,
};
