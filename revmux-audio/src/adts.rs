//! ADTS AAC frame reading (ISO/IEC 14496-3).

use crate::error::{AudioError, Result};
use crate::{read_exact_or_eof, AudioFrame, AudioFrameReader};
use std::io::Read;
use tracing::warn;

/// Enough header bytes to reach the frame length field.
const HEADER_LEN: usize = 6;

/// Reads ADTS frames from a synchronised stream.
///
/// The frame length is the 13-bit aac_frame_length field. Streams whose
/// headers carry the historical emphasis field shift that field by two
/// bits; `with_emphasis` selects that layout.
pub struct AdtsReader<R> {
    inner: R,
    emphasis: bool,
}

impl<R: Read> AdtsReader<R> {
    /// Create a reader using the standard header layout.
    pub fn new(inner: R) -> Self {
        Self {
            inner,
            emphasis: false,
        }
    }

    /// Create a reader for streams with the emphasis field.
    pub fn with_emphasis(inner: R) -> Self {
        Self {
            inner,
            emphasis: true,
        }
    }
}

impl<R: Read> AudioFrameReader for AdtsReader<R> {
    fn next_frame(&mut self) -> Result<Option<AudioFrame>> {
        let mut header = [0u8; HEADER_LEN];
        match read_exact_or_eof(&mut self.inner, &mut header)? {
            None => return Ok(None),
            Some(got) if got < HEADER_LEN => {
                return Err(AudioError::ShortFrame {
                    wanted: HEADER_LEN,
                    got,
                })
            }
            Some(_) => {}
        }

        if header[0] != 0xFF || header[1] & 0xF0 != 0xF0 {
            return Err(AudioError::SyncLost {
                expected: "1111 1111 1111",
                found: ((header[0] as u16) << 8) | header[1] as u16,
            });
        }

        let layer = (header[1] & 0x06) >> 1;
        if layer != 0 {
            warn!(layer, "ADTS layer field is not zero");
        }

        let frame_length = if self.emphasis {
            ((header[4] as usize) << 5) | ((header[5] as usize & 0xF8) >> 3)
        } else {
            ((header[3] as usize & 0x03) << 11)
                | ((header[4] as usize) << 3)
                | ((header[5] as usize & 0xE0) >> 5)
        };
        if frame_length < HEADER_LEN {
            return Err(AudioError::InvalidHeader(format!(
                "ADTS frame length {frame_length} shorter than its header"
            )));
        }

        let mut data = vec![0u8; frame_length];
        data[..HEADER_LEN].copy_from_slice(&header);
        match read_exact_or_eof(&mut self.inner, &mut data[HEADER_LEN..])? {
            Some(got) if got == frame_length - HEADER_LEN => Ok(Some(AudioFrame { data })),
            Some(got) => Err(AudioError::ShortFrame {
                wanted: frame_length - HEADER_LEN,
                got,
            }),
            None => Err(AudioError::ShortFrame {
                wanted: frame_length - HEADER_LEN,
                got: 0,
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    fn adts_frame(frame_length: usize) -> Vec<u8> {
        let mut frame = vec![0u8; frame_length];
        frame[0] = 0xFF;
        frame[1] = 0xF9; // MPEG-2 AAC, layer 0, no CRC
        frame[2] = 0x50;
        frame[3] = 0x40 | ((frame_length >> 11) & 0x03) as u8;
        frame[4] = ((frame_length >> 3) & 0xFF) as u8;
        frame[5] = ((frame_length & 0x07) << 5) as u8;
        frame
    }

    #[test]
    fn test_reads_consecutive_frames() {
        let mut bytes = adts_frame(100);
        bytes.extend(adts_frame(64));

        let mut reader = AdtsReader::new(Cursor::new(bytes));
        assert_eq!(reader.next_frame().unwrap().unwrap().len(), 100);
        assert_eq!(reader.next_frame().unwrap().unwrap().len(), 64);
        assert!(reader.next_frame().unwrap().is_none());
    }

    #[test]
    fn test_bad_sync_reported() {
        let mut reader = AdtsReader::new(Cursor::new(vec![0x00u8; 16]));
        assert!(matches!(
            reader.next_frame(),
            Err(AudioError::SyncLost { .. })
        ));
    }

    #[test]
    fn test_truncated_frame_reported() {
        let mut bytes = adts_frame(100);
        bytes.truncate(40);
        let mut reader = AdtsReader::new(Cursor::new(bytes));
        assert!(matches!(
            reader.next_frame(),
            Err(AudioError::ShortFrame { .. })
        ));
    }
}
