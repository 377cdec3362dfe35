//! # revmux-audio
//!
//! Audio frame boundary detection. The rest of the toolkit treats audio
//! as an opaque sequence of frames; these readers find the frame
//! boundaries for ADTS AAC, AC-3 and MPEG-1/2 audio elementary streams
//! and hand back whole frames.

pub mod ac3;
pub mod adts;
pub mod error;
pub mod mpa;

pub use ac3::Ac3Reader;
pub use adts::AdtsReader;
pub use error::{AudioError, Result};
pub use mpa::MpaReader;

/// One complete audio frame, headers included.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AudioFrame {
    /// The frame bytes.
    pub data: Vec<u8>,
}

impl AudioFrame {
    /// Frame length in bytes.
    pub fn len(&self) -> usize {
        self.data.len()
    }

    /// Whether the frame is empty (it never is for a valid read).
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
}

/// A source of whole audio frames.
///
/// This is the complete interface the core needs from an audio
/// collaborator: "give me the next frame's bytes".
pub trait AudioFrameReader {
    /// Read the next frame. `Ok(None)` at a clean end of input.
    fn next_frame(&mut self) -> Result<Option<AudioFrame>>;
}

pub(crate) fn read_exact_or_eof<R: std::io::Read>(
    reader: &mut R,
    buf: &mut [u8],
) -> Result<Option<usize>> {
    let mut got = 0;
    while got < buf.len() {
        match reader.read(&mut buf[got..]) {
            Ok(0) => break,
            Ok(n) => got += n,
            Err(e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e.into()),
        }
    }
    if got == 0 {
        Ok(None)
    } else {
        Ok(Some(got))
    }
}
