//! MPEG-1/2 audio frame reading (ISO/IEC 11172-3 layers I and II).

use crate::error::{AudioError, Result};
use crate::{read_exact_or_eof, AudioFrame, AudioFrameReader};
use std::io::Read;

/// Header bytes needed to size a frame.
const HEADER_LEN: usize = 4;

/// Bitrates in kbit/s for MPEG-1, by layer (I, II, III) and bitrate index.
const BITRATE_V1: [[u16; 15]; 3] = [
    [0, 32, 64, 96, 128, 160, 192, 224, 256, 288, 320, 352, 384, 416, 448],
    [0, 32, 48, 56, 64, 80, 96, 112, 128, 160, 192, 224, 256, 320, 384],
    [0, 32, 40, 48, 56, 64, 80, 96, 112, 128, 160, 192, 224, 256, 320],
];

/// Bitrates in kbit/s for MPEG-2, by layer and bitrate index.
const BITRATE_V2: [[u16; 15]; 3] = [
    [0, 32, 48, 56, 64, 80, 96, 112, 128, 144, 160, 176, 192, 224, 256],
    [0, 8, 16, 24, 32, 40, 48, 56, 64, 80, 96, 112, 128, 144, 160],
    [0, 8, 16, 24, 32, 40, 48, 56, 64, 80, 96, 112, 128, 144, 160],
];

/// Sampling rates in Hz for MPEG-1; halved for MPEG-2.
const SAMPLE_RATE_V1: [u32; 3] = [44_100, 48_000, 32_000];

/// Reads MPEG audio frames from a synchronised stream.
pub struct MpaReader<R> {
    inner: R,
}

impl<R: Read> MpaReader<R> {
    /// Create a reader.
    pub fn new(inner: R) -> Self {
        Self { inner }
    }
}

/// Compute a frame length in bytes from the 4-byte header.
fn frame_length(header: &[u8; 4]) -> Result<usize> {
    if header[0] != 0xFF || header[1] & 0xE0 != 0xE0 {
        return Err(AudioError::SyncLost {
            expected: "1111 1111 111",
            found: ((header[0] as u16) << 8) | header[1] as u16,
        });
    }

    let version_bits = (header[1] >> 3) & 0x03; // 3 = MPEG-1, 2 = MPEG-2
    let layer_bits = (header[1] >> 1) & 0x03; // 3 = layer I, 2 = II, 1 = III
    if version_bits == 1 || layer_bits == 0 {
        return Err(AudioError::InvalidHeader(
            "reserved MPEG audio version or layer".to_string(),
        ));
    }
    let mpeg1 = version_bits == 3;
    let layer = (4 - layer_bits) as usize; // 1-based layer number

    let bitrate_index = (header[2] >> 4) as usize;
    if bitrate_index == 0 || bitrate_index > 14 {
        return Err(AudioError::InvalidHeader(format!(
            "MPEG audio bitrate index {bitrate_index} unusable"
        )));
    }
    let sample_index = ((header[2] >> 2) & 0x03) as usize;
    if sample_index == 3 {
        return Err(AudioError::InvalidHeader(
            "reserved MPEG audio sampling rate".to_string(),
        ));
    }
    let padding = ((header[2] >> 1) & 0x01) as usize;

    let bitrate = if mpeg1 {
        BITRATE_V1[layer - 1][bitrate_index]
    } else {
        BITRATE_V2[layer - 1][bitrate_index]
    } as usize
        * 1000;
    let sample_rate = if mpeg1 {
        SAMPLE_RATE_V1[sample_index] as usize
    } else {
        SAMPLE_RATE_V1[sample_index] as usize / 2
    };

    let length = match layer {
        1 => (12 * bitrate / sample_rate + padding) * 4,
        _ => {
            let samples = if mpeg1 || layer == 2 { 144 } else { 72 };
            samples * bitrate / sample_rate + padding
        }
    };

    if length < HEADER_LEN {
        return Err(AudioError::InvalidHeader(format!(
            "MPEG audio frame length {length} shorter than its header"
        )));
    }
    Ok(length)
}

impl<R: Read> AudioFrameReader for MpaReader<R> {
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

        let length = frame_length(&header)?;
        let mut data = vec![0u8; length];
        data[..HEADER_LEN].copy_from_slice(&header);
        match read_exact_or_eof(&mut self.inner, &mut data[HEADER_LEN..])? {
            Some(got) if got == length - HEADER_LEN => Ok(Some(AudioFrame { data })),
            Some(got) => Err(AudioError::ShortFrame {
                wanted: length - HEADER_LEN,
                got,
            }),
            None => {
                if length == HEADER_LEN {
                    Ok(Some(AudioFrame { data }))
                } else {
                    Err(AudioError::ShortFrame {
                        wanted: length - HEADER_LEN,
                        got: 0,
                    })
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    /// MPEG-1 layer II, 128 kbit/s, 48 kHz, no padding.
    fn layer2_header() -> [u8; 4] {
        [0xFF, 0xFD, 0x84, 0x00]
    }

    #[test]
    fn test_layer2_frame_length() {
        // 144 * 128000 / 48000 = 384 bytes
        assert_eq!(frame_length(&layer2_header()).unwrap(), 384);
    }

    #[test]
    fn test_layer1_frame_length() {
        // Layer I, 128 kbit/s, 44.1 kHz: (12 * 128000 / 44100) * 4
        let header = [0xFF, 0xFF, 0x40, 0x00];
        assert_eq!(frame_length(&header).unwrap(), (12 * 128_000 / 44_100) * 4);
    }

    #[test]
    fn test_reads_whole_frames() {
        let mut frame = vec![0u8; 384];
        frame[..4].copy_from_slice(&layer2_header());
        let mut bytes = frame.clone();
        bytes.extend(&frame);

        let mut reader = MpaReader::new(Cursor::new(bytes));
        assert_eq!(reader.next_frame().unwrap().unwrap().len(), 384);
        assert_eq!(reader.next_frame().unwrap().unwrap().len(), 384);
        assert!(reader.next_frame().unwrap().is_none());
    }

    #[test]
    fn test_free_format_rejected() {
        let header = [0xFF, 0xFD, 0x04, 0x00];
        assert!(matches!(
            frame_length(&header),
            Err(AudioError::InvalidHeader(_))
        ));
    }
}
