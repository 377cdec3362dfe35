//! Transport packet reading with resynchronisation.

use crate::error::{Result, TsError};
use crate::packet::{TsPacket, SYNC_BYTE, TS_PACKET_SIZE};
use std::io::{Read, Seek, SeekFrom};
use tracing::warn;

/// How many bytes beyond the first misaligned packet we will scan for a
/// sync byte before declaring sync lost.
const RESYNC_WINDOW: usize = 4 * TS_PACKET_SIZE;

/// Reads a byte source 188 bytes at a time, rescanning for the 0x47 sync
/// byte when alignment is lost.
#[derive(Debug)]
pub struct TsPacketReader<R> {
    inner: R,
    pos: u64,
    packets_read: u64,
}

impl<R: Read> TsPacketReader<R> {
    /// Create a reader over a byte source.
    pub fn new(inner: R) -> Self {
        Self {
            inner,
            pos: 0,
            packets_read: 0,
        }
    }

    /// Byte position of the next packet to be read.
    pub fn position(&self) -> u64 {
        self.pos
    }

    /// Number of packets read so far.
    pub fn packets_read(&self) -> u64 {
        self.packets_read
    }

    /// Consume the reader, returning the byte source.
    pub fn into_inner(self) -> R {
        self.inner
    }

    /// Fill `buf`, returning how many bytes were actually read (short only
    /// at end of input).
    fn fill(&mut self, buf: &mut [u8]) -> Result<usize> {
        let mut got = 0;
        while got < buf.len() {
            match self.inner.read(&mut buf[got..]) {
                Ok(0) => break,
                Ok(n) => got += n,
                Err(e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(e.into()),
            }
        }
        self.pos += got as u64;
        Ok(got)
    }

    /// Read the next packet, returning its file position alongside it.
    ///
    /// Returns `Ok(None)` at a clean end of input. A partial trailing
    /// packet is a `ShortRead`; failure to find a sync byte within the
    /// resync window is `SyncLost`.
    pub fn next_packet(&mut self) -> Result<Option<(u64, TsPacket)>> {
        let mut buf = [0u8; TS_PACKET_SIZE];
        let start = self.pos;
        let got = self.fill(&mut buf)?;
        if got == 0 {
            return Ok(None);
        }
        if got < TS_PACKET_SIZE {
            return Err(TsError::ShortRead {
                wanted: TS_PACKET_SIZE,
                got,
            });
        }

        if buf[0] == SYNC_BYTE {
            self.packets_read += 1;
            return Ok(Some((start, TsPacket::from_slice(&buf)?)));
        }

        warn!(offset = start, "TS sync mismatch, scanning for sync byte");
        self.resync(buf, start)
    }

    /// Scan forward for a sync byte, first within the misaligned packet,
    /// then up to a bounded window.
    fn resync(&mut self, mut buf: [u8; TS_PACKET_SIZE], start: u64) -> Result<Option<(u64, TsPacket)>> {
        let mut scanned = 0usize;

        loop {
            if let Some(i) = buf.iter().position(|&b| b == SYNC_BYTE) {
                if i == 0 {
                    let packet_pos = self.pos - TS_PACKET_SIZE as u64;
                    self.packets_read += 1;
                    return Ok(Some((packet_pos, TsPacket::from_slice(&buf)?)));
                }
                buf.copy_within(i.., 0);
                let tail = TS_PACKET_SIZE - i;
                let got = self.fill(&mut buf[tail..])?;
                if got < i {
                    return Err(TsError::ShortRead {
                        wanted: i,
                        got,
                    });
                }
                continue;
            }

            scanned += TS_PACKET_SIZE;
            if scanned > RESYNC_WINDOW {
                return Err(TsError::SyncLost(start));
            }
            let got = self.fill(&mut buf)?;
            if got < TS_PACKET_SIZE {
                return Err(TsError::SyncLost(start));
            }
        }
    }
}

impl<R: Read + Seek> TsPacketReader<R> {
    /// Seek to a byte offset, rounded down to a packet boundary.
    pub fn seek(&mut self, offset: u64) -> Result<()> {
        let aligned = (offset / TS_PACKET_SIZE as u64) * TS_PACKET_SIZE as u64;
        self.inner.seek(SeekFrom::Start(aligned))?;
        self.pos = aligned;
        Ok(())
    }
}
