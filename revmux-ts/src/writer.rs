//! Transport stream output: packetising PES data and PSI sections.
//!
//! Supports file, standard output and TCP sinks; TCP writes are
//! best-effort (a dead peer is logged, not fatal).

use crate::error::{Result, TsError};
use crate::packet::{
    AdaptationField, AdaptationFieldControl, Pcr, TsHeader, TsPacket, DEFAULT_PMT_PID,
    DEFAULT_PROGRAM_NUMBER, DEFAULT_TRANSPORT_STREAM_ID, DEFAULT_VIDEO_PID, PID_PAT,
    TS_PACKET_SIZE,
};
use crate::pes::{PesHeaderBuilder, PesTimestamp};
use crate::psi::{Pat, Pmt};
use std::collections::HashMap;
use std::fs::File;
use std::io::{self, BufWriter, Write};
use std::net::TcpStream;
use std::path::Path;
use tracing::{debug, warn};

/// Default TCP port for the network sink.
pub const DEFAULT_TCP_PORT: u16 = 88;

/// Where transport packets go.
pub enum TsSink {
    /// A file, truncated on open.
    File(BufWriter<File>),
    /// Standard output.
    Stdout(io::Stdout),
    /// A TCP connection; writes are fire-and-forget.
    Tcp {
        /// The connected stream.
        stream: TcpStream,
        /// Whether a send failure has already been reported.
        failed: bool,
    },
}

impl TsSink {
    /// Open a file sink.
    pub fn file(path: impl AsRef<Path>) -> Result<Self> {
        Ok(TsSink::File(BufWriter::new(File::create(path)?)))
    }

    /// Use standard output as the sink.
    pub fn stdout() -> Self {
        TsSink::Stdout(io::stdout())
    }

    /// Connect a TCP sink to `host:port`.
    pub fn connect(host: &str, port: u16) -> Result<Self> {
        let stream = TcpStream::connect((host, port))?;
        Ok(TsSink::Tcp {
            stream,
            failed: false,
        })
    }
}

impl Write for TsSink {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        match self {
            TsSink::File(f) => f.write(buf),
            TsSink::Stdout(s) => s.write(buf),
            TsSink::Tcp { stream, failed } => match stream.write(buf) {
                Ok(n) => Ok(n),
                Err(err) => {
                    if !*failed {
                        warn!(%err, "TCP sink write failed; continuing best-effort");
                        *failed = true;
                    }
                    Ok(buf.len())
                }
            },
        }
    }

    fn flush(&mut self) -> io::Result<()> {
        match self {
            TsSink::File(f) => f.flush(),
            TsSink::Stdout(s) => s.flush(),
            TsSink::Tcp { .. } => Ok(()),
        }
    }
}

/// Program configuration for synthesised PSI.
#[derive(Debug, Clone)]
pub struct ProgramConfig {
    /// Transport stream id for the PAT.
    pub transport_stream_id: u16,
    /// Program number.
    pub program_number: u16,
    /// PID carrying the PMT.
    pub pmt_pid: u16,
    /// PID carrying PCR (normally the video PID).
    pub pcr_pid: u16,
    /// Video elementary PID.
    pub video_pid: u16,
    /// Video stream type for the PMT.
    pub stream_type: u8,
}

impl ProgramConfig {
    /// The fixed defaults used when synthesising a transport stream:
    /// transport stream 1, program 1, PMT 0x66, video and PCR on 0x68.
    pub fn with_stream_type(stream_type: u8) -> Self {
        Self {
            transport_stream_id: DEFAULT_TRANSPORT_STREAM_ID,
            program_number: DEFAULT_PROGRAM_NUMBER,
            pmt_pid: DEFAULT_PMT_PID,
            pcr_pid: DEFAULT_VIDEO_PID,
            video_pid: DEFAULT_VIDEO_PID,
            stream_type,
        }
    }

    /// Build the PAT and PMT sections this configuration describes.
    pub fn tables(&self) -> (Pat, Pmt) {
        let mut pat = Pat::new(self.transport_stream_id);
        pat.add_program(self.program_number, self.pmt_pid);

        let mut pmt = Pmt::new(self.program_number, self.pcr_pid);
        pmt.add_stream(self.stream_type, self.video_pid);

        (pat, pmt)
    }
}

/// Packetises PES data and PSI sections into 188-byte packets.
///
/// Continuity counters are maintained per PID, modulo 16.
pub struct TsWriter<W: Write> {
    out: W,
    continuity: HashMap<u16, u8>,
    packets_written: u64,
}

impl<W: Write> TsWriter<W> {
    /// Create a writer over a sink.
    pub fn new(out: W) -> Self {
        Self {
            out,
            continuity: HashMap::new(),
            packets_written: 0,
        }
    }

    /// Number of packets written so far.
    pub fn packets_written(&self) -> u64 {
        self.packets_written
    }

    /// Flush and return the sink.
    pub fn finish(mut self) -> Result<W> {
        self.out.flush()?;
        Ok(self.out)
    }

    fn next_cc(&mut self, pid: u16) -> u8 {
        let cc = self.continuity.entry(pid).or_insert(0);
        let value = *cc;
        *cc = (*cc + 1) & 0x0F;
        value
    }

    fn emit(&mut self, packet: &[u8; TS_PACKET_SIZE]) -> Result<()> {
        self.out.write_all(packet)?;
        self.packets_written += 1;
        Ok(())
    }

    /// Write a PSI section on a PID, with the pointer byte and 0xFF
    /// padding in the final packet.
    pub fn write_section(&mut self, pid: u16, section: &[u8]) -> Result<()> {
        let mut remaining = section;
        let mut first = true;

        while !remaining.is_empty() || first {
            let mut packet = [0xFFu8; TS_PACKET_SIZE];

            let mut header = TsHeader::new(pid);
            header.payload_unit_start = first;
            header.continuity_counter = self.next_cc(pid);
            header.write(&mut packet[..4])?;

            let mut offset = 4;
            if first {
                packet[offset] = 0; // pointer field
                offset += 1;
            }

            let take = remaining.len().min(TS_PACKET_SIZE - offset);
            packet[offset..offset + take].copy_from_slice(&remaining[..take]);
            remaining = &remaining[take..];
            first = false;

            self.emit(&packet)?;
        }

        Ok(())
    }

    /// Write the PAT and PMT for a program configuration.
    pub fn write_program_tables(&mut self, config: &ProgramConfig) -> Result<()> {
        let (pat, pmt) = config.tables();
        self.write_tables(&pat, &pmt, config.pmt_pid)
    }

    /// Write explicit PAT and PMT sections.
    pub fn write_tables(&mut self, pat: &Pat, pmt: &Pmt, pmt_pid: u16) -> Result<()> {
        debug!(pmt_pid, "writing PAT and PMT");
        self.write_section(PID_PAT, &pat.serialize())?;
        self.write_section(pmt_pid, &pmt.serialize())
    }

    /// Write complete PES data as transport packets on a PID.
    ///
    /// The PES bytes must begin with `00 00 01`. A PCR, when given, goes
    /// into the first packet's adaptation field; the final packet is
    /// padded with adaptation-field stuffing.
    pub fn write_pes(&mut self, pid: u16, pes_data: &[u8], pcr: Option<Pcr>) -> Result<()> {
        if pes_data.len() < 3 || pes_data[..3] != [0, 0, 1] {
            return Err(TsError::invalid_pes(
                "PES data must start with 00 00 01".to_string(),
            ));
        }

        let mut remaining = pes_data;
        let mut first = true;

        while !remaining.is_empty() {
            let mut packet = [0xFFu8; TS_PACKET_SIZE];

            let mut header = TsHeader::new(pid);
            header.payload_unit_start = first;
            header.continuity_counter = self.next_cc(pid);

            // Adaptation field: PCR on the first packet, stuffing when the
            // remaining payload will not fill the packet.
            let af = if let (true, Some(pcr)) = (first, pcr) {
                let mut af = AdaptationField::with_pcr(pcr);
                let body = TS_PACKET_SIZE - 4 - af.total_size();
                if remaining.len() < body {
                    af.length += (body - remaining.len()) as u8;
                }
                Some(af)
            } else if remaining.len() < TS_PACKET_SIZE - 4 {
                Some(AdaptationField::stuffing(
                    TS_PACKET_SIZE - 4 - remaining.len(),
                ))
            } else {
                None
            };

            let payload_start = if let Some(af) = af {
                header.adaptation_field_control =
                    AdaptationFieldControl::AdaptationFieldAndPayload;
                header.write(&mut packet[..4])?;
                4 + af.write(&mut packet[4..])?
            } else {
                header.adaptation_field_control = AdaptationFieldControl::PayloadOnly;
                header.write(&mut packet[..4])?;
                4
            };

            let take = remaining.len().min(TS_PACKET_SIZE - payload_start);
            packet[payload_start..payload_start + take].copy_from_slice(&remaining[..take]);
            remaining = &remaining[take..];
            first = false;

            self.emit(&packet)?;
        }

        Ok(())
    }

    /// Build a PES packet around `payload` and write it out.
    pub fn write_pes_packet(
        &mut self,
        pid: u16,
        stream_id: u8,
        payload: &[u8],
        pts: Option<PesTimestamp>,
        dts: Option<PesTimestamp>,
        pcr: Option<Pcr>,
    ) -> Result<()> {
        let builder = match (pts, dts) {
            (Some(p), Some(d)) => PesHeaderBuilder::new(stream_id).pts_dts(p, d),
            (Some(p), None) => PesHeaderBuilder::new(stream_id).pts(p),
            _ => PesHeaderBuilder::new(stream_id),
        };

        let mut pes = builder.build(payload.len())?;
        pes.extend_from_slice(payload);
        self.write_pes(pid, &pes, pcr)
    }

    /// Write a null packet.
    pub fn write_null_packet(&mut self) -> Result<()> {
        let packet = TsPacket::null_packet();
        self.emit(packet.data())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::packet::SYNC_BYTE;
    use crate::pes::PesHeader;
    use crate::psi::StreamType;

    fn packets(buffer: &[u8]) -> Vec<TsPacket> {
        assert_eq!(buffer.len() % TS_PACKET_SIZE, 0);
        buffer
            .chunks(TS_PACKET_SIZE)
            .map(|c| TsPacket::from_slice(c).unwrap())
            .collect()
    }

    #[test]
    fn test_write_section_single_packet() {
        let mut writer = TsWriter::new(Vec::new());
        let config = ProgramConfig::with_stream_type(StreamType::Avc as u8);
        writer.write_program_tables(&config).unwrap();

        let buffer = writer.finish().unwrap();
        let packets = packets(&buffer);
        assert_eq!(packets.len(), 2);
        assert_eq!(packets[0].pid(), PID_PAT);
        assert!(packets[0].payload_unit_start());
        assert_eq!(packets[1].pid(), DEFAULT_PMT_PID);

        // Pointer byte then a parseable section
        let payload = packets[0].payload().unwrap();
        assert_eq!(payload[0], 0);
        let pat = Pat::parse(&payload[1..]).unwrap();
        assert_eq!(pat.pmt_pid(1), Some(DEFAULT_PMT_PID));
    }

    #[test]
    fn test_write_pes_packetisation_and_stuffing() {
        let mut writer = TsWriter::new(Vec::new());

        let payload = vec![0xABu8; 300];
        writer
            .write_pes_packet(
                DEFAULT_VIDEO_PID,
                0xE0,
                &payload,
                Some(PesTimestamp::new(90_000)),
                None,
                Some(Pcr::new(72_000, 0)),
            )
            .unwrap();

        let buffer = writer.finish().unwrap();
        let packets = packets(&buffer);
        assert!(packets.len() >= 2);

        // Every packet is valid and on the right PID with ascending CC
        for (i, packet) in packets.iter().enumerate() {
            assert_eq!(packet.data()[0], SYNC_BYTE);
            assert_eq!(packet.pid(), DEFAULT_VIDEO_PID);
            assert_eq!(packet.continuity_counter(), (i & 0x0F) as u8);
        }

        // First packet: PUSI, PCR, and the PES header
        assert!(packets[0].payload_unit_start());
        assert_eq!(packets[0].pcr(), Some(Pcr::new(72_000, 0)));
        let head = packets[0].payload().unwrap();
        let pes = PesHeader::parse(head).unwrap();
        assert_eq!(pes.stream_id, 0xE0);
        assert_eq!(pes.pts.unwrap().value, 90_000);

        // Later packets do not repeat the unit start
        assert!(packets[1..].iter().all(|p| !p.payload_unit_start()));

        // Reassembling the payloads yields the original PES data
        let mut reassembled = Vec::new();
        for packet in &packets {
            reassembled.extend_from_slice(packet.payload().unwrap());
        }
        assert_eq!(&reassembled[pes.header_size..], &payload[..]);
    }

    #[test]
    fn test_write_pes_rejects_garbage() {
        let mut writer = TsWriter::new(Vec::new());
        assert!(writer.write_pes(0x68, &[1, 2, 3, 4], None).is_err());
    }

    #[test]
    fn test_cc_is_per_pid() {
        let mut writer = TsWriter::new(Vec::new());
        let config = ProgramConfig::with_stream_type(StreamType::Mpeg2Video as u8);
        writer.write_program_tables(&config).unwrap();
        writer.write_program_tables(&config).unwrap();

        let buffer = writer.finish().unwrap();
        let packets = packets(&buffer);
        assert_eq!(packets.len(), 4);
        assert_eq!(packets[0].continuity_counter(), 0);
        assert_eq!(packets[2].continuity_counter(), 1); // second PAT
        assert_eq!(packets[1].continuity_counter(), 0);
        assert_eq!(packets[3].continuity_counter(), 1); // second PMT
    }
}
