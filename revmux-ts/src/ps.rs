//! Program Stream reading.
//!
//! Walks pack headers, skips system headers, and extracts PES packets so
//! the ES layer can treat PS input the same way as TS input. Both the
//! MPEG-2 (ISO/IEC 13818-1 clause 2.5) and MPEG-1 pack header forms are
//! recognised.

use crate::demux::PesSource;
use crate::error::{Result, TsError};
use crate::pes::{PesHeader, PesPacket, StreamId};
use std::io::{Read, Seek, SeekFrom};
use tracing::{debug, warn};

/// Pack header start code value.
const PACK_START: u8 = 0xBA;
/// System header start code value.
const SYSTEM_HEADER_START: u8 = 0xBB;
/// Program end code value.
const PROGRAM_END: u8 = 0xB9;

/// Program Stream reader delivering video PES packets.
pub struct PsReader<R> {
    inner: R,
    pos: u64,
    video_id: Option<u8>,
    done: bool,
}

impl<R: Read> PsReader<R> {
    /// Create a reader over a byte source.
    pub fn new(inner: R) -> Self {
        Self {
            inner,
            pos: 0,
            video_id: None,
            done: false,
        }
    }

    /// Current byte position.
    pub fn position(&self) -> u64 {
        self.pos
    }

    fn read_byte(&mut self) -> Result<Option<u8>> {
        let mut byte = [0u8; 1];
        loop {
            match self.inner.read(&mut byte) {
                Ok(0) => return Ok(None),
                Ok(_) => {
                    self.pos += 1;
                    return Ok(Some(byte[0]));
                }
                Err(e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(e.into()),
            }
        }
    }

    fn read_exact(&mut self, buf: &mut [u8]) -> Result<()> {
        let mut got = 0;
        while got < buf.len() {
            match self.inner.read(&mut buf[got..]) {
                Ok(0) => {
                    self.pos += got as u64;
                    return Err(TsError::ShortRead {
                        wanted: buf.len(),
                        got,
                    });
                }
                Ok(n) => got += n,
                Err(e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(e.into()),
            }
        }
        self.pos += got as u64;
        Ok(())
    }

    /// Scan to the next `00 00 01` prefix; returns the offset of its
    /// first zero byte, or None at end of input.
    fn find_prefix(&mut self) -> Result<Option<u64>> {
        let mut zeros = 0u32;
        loop {
            match self.read_byte()? {
                None => return Ok(None),
                Some(0x00) => zeros += 1,
                Some(0x01) if zeros >= 2 => return Ok(Some(self.pos - 3)),
                Some(_) => zeros = 0,
            }
        }
    }

    /// Skip a pack header, whose form depends on the byte after the code.
    fn skip_pack_header(&mut self) -> Result<()> {
        let Some(first) = self.read_byte()? else {
            return Err(TsError::InvalidPs("truncated pack header".into()));
        };

        if first & 0xC0 == 0x40 {
            // MPEG-2: 10 bytes of SCR/mux-rate, then stuffing
            let mut rest = [0u8; 9];
            self.read_exact(&mut rest)?;
            let stuffing = (rest[8] & 0x07) as usize;
            if stuffing > 0 {
                let mut skip = [0u8; 7];
                self.read_exact(&mut skip[..stuffing])?;
            }
            Ok(())
        } else if first & 0xF0 == 0x20 {
            // MPEG-1: 8 bytes of SCR/mux-rate in total
            let mut rest = [0u8; 7];
            self.read_exact(&mut rest)?;
            Ok(())
        } else {
            Err(TsError::InvalidPs(format!(
                "unrecognised pack header form 0x{first:02X}"
            )))
        }
    }

    /// Read the next PES packet of any stream id, returning its start
    /// position and complete bytes (prefix, id, length, payload).
    fn next_packet_any(&mut self) -> Result<Option<(u64, u8, Vec<u8>)>> {
        if self.done {
            return Ok(None);
        }

        loop {
            let Some(start) = self.find_prefix()? else {
                return Ok(None);
            };
            let Some(code) = self.read_byte()? else {
                return Ok(None);
            };

            match code {
                PACK_START => {
                    self.skip_pack_header()?;
                }
                SYSTEM_HEADER_START => {
                    let mut len = [0u8; 2];
                    self.read_exact(&mut len)?;
                    let length = u16::from_be_bytes(len) as usize;
                    let mut skip = vec![0u8; length];
                    self.read_exact(&mut skip)?;
                    debug!(length, "skipped system header");
                }
                PROGRAM_END => {
                    self.done = true;
                    return Ok(None);
                }
                id if id >= 0xBC => {
                    let mut len = [0u8; 2];
                    self.read_exact(&mut len)?;
                    let length = u16::from_be_bytes(len) as usize;
                    if length == 0 {
                        return Err(TsError::InvalidPs(
                            "zero-length PES packet in program stream".into(),
                        ));
                    }

                    let mut packet = Vec::with_capacity(6 + length);
                    packet.extend_from_slice(&[0x00, 0x00, 0x01, id]);
                    packet.extend_from_slice(&len);
                    let body_start = packet.len();
                    packet.resize(body_start + length, 0);
                    self.read_exact(&mut packet[body_start..])?;

                    return Ok(Some((start, id, packet)));
                }
                other => {
                    // Start codes below 0xBC are elementary data and should
                    // not appear at pack level; resume scanning.
                    warn!(code = other, offset = start, "unexpected start code at pack level");
                }
            }
        }
    }

    /// Turn raw PES bytes into the delivered form.
    fn to_pes_packet(&self, start: u64, bytes: &[u8]) -> Result<PesPacket> {
        let header = PesHeader::parse(bytes)?;
        Ok(PesPacket {
            stream_id: header.stream_id,
            pts: header.pts,
            dts: header.dts,
            file_pos: start,
            payload: bytes[header.header_size..].to_vec(),
        })
    }
}

impl<R: Read + Seek> PesSource for PsReader<R> {
    fn next_pes(&mut self) -> Result<Option<PesPacket>> {
        loop {
            let Some((start, id, bytes)) = self.next_packet_any()? else {
                return Ok(None);
            };
            if !StreamId::is_video(id) {
                continue;
            }
            match self.video_id {
                None => {
                    debug!(stream_id = id, "selected program stream video stream");
                    self.video_id = Some(id);
                }
                Some(selected) if selected != id => continue,
                _ => {}
            }
            return Ok(Some(self.to_pes_packet(start, &bytes)?));
        }
    }

    fn seek_pes(&mut self, file_pos: u64) -> Result<PesPacket> {
        self.inner.seek(SeekFrom::Start(file_pos))?;
        self.pos = file_pos;
        self.done = false;

        match self.next_packet_any()? {
            Some((start, id, bytes)) if StreamId::is_video(id) => {
                if start != file_pos {
                    warn!(
                        wanted = file_pos,
                        got = start,
                        "PES re-read landed on a different packet"
                    );
                }
                self.to_pes_packet(start, &bytes)
            }
            Some((_, id, _)) => Err(TsError::InvalidPs(format!(
                "expected video PES at offset {file_pos}, found stream id 0x{id:02X}"
            ))),
            None => Err(TsError::EndOfStream),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pes::{PesHeaderBuilder, PesTimestamp};
    use std::io::Cursor;

    fn mpeg2_pack_header() -> Vec<u8> {
        let mut pack = vec![0x00, 0x00, 0x01, PACK_START];
        // '01' marker form, SCR zero, mux rate zero, no stuffing
        pack.push(0x44);
        pack.extend_from_slice(&[0x00, 0x04, 0x00, 0x04, 0x01, 0x00, 0x00, 0x03, 0xF8]);
        pack
    }

    fn video_pes(pts: u64, payload: &[u8]) -> Vec<u8> {
        let mut pes = PesHeaderBuilder::new(0xE0)
            .pts(PesTimestamp::new(pts))
            .build(payload.len())
            .unwrap();
        pes.extend_from_slice(payload);
        pes
    }

    fn audio_pes(payload: &[u8]) -> Vec<u8> {
        let mut pes = PesHeaderBuilder::new(0xC0).build(payload.len()).unwrap();
        pes.extend_from_slice(payload);
        pes
    }

    #[test]
    fn test_ps_extracts_video_pes() {
        let mut ps = mpeg2_pack_header();
        let first = video_pes(90_000, &[1, 2, 3]);
        let video_pos = ps.len() as u64;
        ps.extend_from_slice(&first);
        ps.extend_from_slice(&audio_pes(&[9, 9]));
        ps.extend_from_slice(&video_pes(93_600, &[4, 5]));
        ps.extend_from_slice(&[0x00, 0x00, 0x01, PROGRAM_END]);

        let mut reader = PsReader::new(Cursor::new(ps));
        let pes = reader.next_pes().unwrap().unwrap();
        assert_eq!(pes.stream_id, 0xE0);
        assert_eq!(pes.file_pos, video_pos);
        assert_eq!(pes.payload, vec![1, 2, 3]);
        assert_eq!(pes.pts.unwrap().value, 90_000);

        // Audio is skipped, second video packet delivered, then end code
        let pes = reader.next_pes().unwrap().unwrap();
        assert_eq!(pes.payload, vec![4, 5]);
        assert!(reader.next_pes().unwrap().is_none());
    }

    #[test]
    fn test_ps_seek_pes() {
        let mut ps = mpeg2_pack_header();
        ps.extend_from_slice(&video_pes(90_000, &[1, 2, 3]));
        let second_pos = ps.len() as u64;
        ps.extend_from_slice(&video_pes(93_600, &[4, 5, 6, 7]));

        let mut reader = PsReader::new(Cursor::new(ps));
        while reader.next_pes().unwrap().is_some() {}

        let pes = reader.seek_pes(second_pos).unwrap();
        assert_eq!(pes.file_pos, second_pos);
        assert_eq!(pes.payload, vec![4, 5, 6, 7]);
    }

    #[test]
    fn test_mpeg1_pack_header() {
        let mut ps = vec![0x00, 0x00, 0x01, PACK_START];
        // '0010' form: 8 bytes in total after the code
        ps.push(0x21);
        ps.extend_from_slice(&[0x00, 0x01, 0x00, 0x01, 0x80, 0x00, 0x01]);
        ps.extend_from_slice(&video_pes(0, &[0xAA]));

        let mut reader = PsReader::new(Cursor::new(ps));
        let pes = reader.next_pes().unwrap().unwrap();
        assert_eq!(pes.payload, vec![0xAA]);
    }
}
