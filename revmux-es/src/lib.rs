//! # revmux-es
//!
//! The elementary stream byte view for the revmux toolkit.
//!
//! An elementary stream is seen as a uniform byte sequence whether it
//! comes from a raw ES file or from the PES payloads of a transport or
//! program stream; every byte has an [`EsOffset`] that survives the
//! TS -> PES -> ES layering and can be seeked back to. On top of the
//! byte view, [`EsUnitReader`] slices the stream at `00 00 01` start
//! codes into [`EsUnit`]s.

pub mod error;
pub mod offset;
pub mod scanner;
pub mod source;
pub mod unit;

pub use error::{EsError, Result};
pub use offset::EsOffset;
pub use scanner::EsUnitReader;
pub use source::{EsByteSource, FileEsSource, PesEsSource};
pub use unit::EsUnit;
