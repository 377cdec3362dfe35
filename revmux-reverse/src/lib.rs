//! # revmux-reverse
//!
//! The reverse-playback engine of the revmux toolkit.
//!
//! A forward scan collects decodable anchor frames (I/IDR pictures, and
//! optionally other reference pictures) into an append-only catalog
//! indexed by ES offset. The writer then walks the catalog backwards,
//! fetching each anchor's bytes through the ES view and re-emitting
//! them as a playable elementary stream or transport stream with
//! synthesised PCR/PTS/DTS and program tables. The same qualification
//! predicates drive the forward fast-forward filters.

pub mod catalog;
pub mod collect;
pub mod error;
pub mod filter;
pub mod writer;

pub use catalog::{AnchorKind, CatalogEntry, ReverseCatalog};
pub use collect::{collect_h262, collect_h264, CollectOptions, CollectStats};
pub use error::{Result, ReverseError};
pub use filter::{
    FilterDecision, FilterMode, FrameClass, H262Filter, H262FilterEvent, H264Filter,
    H264FilterEvent,
};
pub use writer::{
    write_parameter_sets, write_reverse, FrameWriter, ReverseOptions, ReverseStats,
    DEFAULT_PSI_INTERVAL,
};
