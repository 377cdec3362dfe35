//! Byte sources backing the elementary stream view.
//!
//! The ES view is a uniform byte sequence with two backings: a direct
//! file, and the concatenated payloads of a selected video stream's PES
//! packets. The reverse engine only ever talks to the `EsByteSource`
//! capability, never to the reader that produced the bytes.

use crate::error::{EsError, Result};
use crate::offset::EsOffset;
use revmux_ts::{PesPacket, PesSource};
use std::io::{Read, Seek, SeekFrom};

/// A seekable byte source with the ES offset model.
pub trait EsByteSource {
    /// Read the next byte, returning it with its offset. `Ok(None)` is
    /// the clean end of the stream.
    fn read_byte(&mut self) -> Result<Option<(u8, EsOffset)>>;

    /// Reposition so the next byte read is the one at `offset`.
    fn seek(&mut self, offset: EsOffset) -> Result<()>;

    /// Read exactly `len` bytes starting at `offset`.
    fn read_at(&mut self, offset: EsOffset, len: usize) -> Result<Vec<u8>> {
        self.seek(offset)?;
        let mut data = Vec::with_capacity(len);
        while data.len() < len {
            match self.read_byte()? {
                Some((byte, _)) => data.push(byte),
                None => {
                    return Err(EsError::ShortRead {
                        wanted: len,
                        got: data.len(),
                    })
                }
            }
        }
        Ok(data)
    }
}

impl<S: EsByteSource + ?Sized> EsByteSource for &mut S {
    fn read_byte(&mut self) -> Result<Option<(u8, EsOffset)>> {
        (**self).read_byte()
    }

    fn seek(&mut self, offset: EsOffset) -> Result<()> {
        (**self).seek(offset)
    }

    fn read_at(&mut self, offset: EsOffset, len: usize) -> Result<Vec<u8>> {
        (**self).read_at(offset, len)
    }
}

/// Direct-file backing: the ES offset is the file offset.
pub struct FileEsSource<R> {
    inner: R,
    pos: u64,
    buffer: Vec<u8>,
    buffer_pos: usize,
}

const FILE_CHUNK: usize = 8192;

impl<R: Read + Seek> FileEsSource<R> {
    /// Create a source over a seekable byte stream.
    pub fn new(inner: R) -> Self {
        Self {
            inner,
            pos: 0,
            buffer: Vec::with_capacity(FILE_CHUNK),
            buffer_pos: 0,
        }
    }

    fn refill(&mut self) -> Result<bool> {
        self.buffer.resize(FILE_CHUNK, 0);
        self.buffer_pos = 0;
        let mut got = 0;
        while got == 0 {
            match self.inner.read(&mut self.buffer) {
                Ok(0) => {
                    self.buffer.clear();
                    return Ok(false);
                }
                Ok(n) => got = n,
                Err(e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(e.into()),
            }
        }
        self.buffer.truncate(got);
        Ok(true)
    }
}

impl<R: Read + Seek> EsByteSource for FileEsSource<R> {
    fn read_byte(&mut self) -> Result<Option<(u8, EsOffset)>> {
        if self.buffer_pos >= self.buffer.len() && !self.refill()? {
            return Ok(None);
        }
        let byte = self.buffer[self.buffer_pos];
        let offset = EsOffset::new(self.pos, 0);
        self.buffer_pos += 1;
        self.pos += 1;
        Ok(Some((byte, offset)))
    }

    fn seek(&mut self, offset: EsOffset) -> Result<()> {
        if offset.in_packet != 0 {
            return Err(EsError::BadOffset(format!(
                "direct file offsets have no in-packet byte ({offset})"
            )));
        }
        self.inner.seek(SeekFrom::Start(offset.file_pos))?;
        self.pos = offset.file_pos;
        self.buffer.clear();
        self.buffer_pos = 0;
        Ok(())
    }
}

/// PES backing: the logical byte sequence formed by concatenating the
/// selected video stream's PES payloads.
pub struct PesEsSource<P> {
    src: P,
    current: Option<PesPacket>,
    byte: usize,
}

impl<P: PesSource> PesEsSource<P> {
    /// Create a source over a PES packet source.
    pub fn new(src: P) -> Self {
        Self {
            src,
            current: None,
            byte: 0,
        }
    }

    /// Access the underlying PES source.
    pub fn source_mut(&mut self) -> &mut P {
        &mut self.src
    }

    /// Consume the view, returning the PES source.
    pub fn into_source(self) -> P {
        self.src
    }

    /// Ensure `current` holds a packet with unread payload bytes.
    fn ensure_packet(&mut self) -> Result<bool> {
        loop {
            if let Some(current) = &self.current {
                if self.byte < current.payload.len() {
                    return Ok(true);
                }
            }
            match self.src.next_pes().map_err(EsError::from)? {
                Some(packet) => {
                    self.current = Some(packet);
                    self.byte = 0;
                }
                None => return Ok(false),
            }
        }
    }
}

impl<P: PesSource> EsByteSource for PesEsSource<P> {
    fn read_byte(&mut self) -> Result<Option<(u8, EsOffset)>> {
        if !self.ensure_packet()? {
            return Ok(None);
        }
        let current = self
            .current
            .as_ref()
            .ok_or_else(|| EsError::BadOffset("no current PES packet".into()))?;
        let byte = current.payload[self.byte];
        let offset = EsOffset::new(current.file_pos, self.byte as u32);
        self.byte += 1;
        Ok(Some((byte, offset)))
    }

    fn seek(&mut self, offset: EsOffset) -> Result<()> {
        let packet = self.src.seek_pes(offset.file_pos).map_err(EsError::from)?;
        if offset.in_packet as usize > packet.payload.len() {
            return Err(EsError::BadOffset(format!(
                "offset {} beyond PES payload of {} bytes",
                offset,
                packet.payload.len()
            )));
        }
        self.byte = offset.in_packet as usize;
        self.current = Some(packet);
        Ok(())
    }
}
