//! Transport stream demultiplexing.
//!
//! Watches PAT/PMT, selects a program's video stream, reassembles PES
//! per PID, and exposes the selected video stream as a seekable sequence
//! of PES packets for the ES layer.

use crate::error::{Result, TsError};
use crate::packet::{Pcr, TsPacket, PID_NULL, PID_PAT};
use crate::pes::{PesAssembler, PesPacket};
use crate::psi::{describe_stream_type, Pat, Pmt, SectionAssembler};
use crate::reader::TsPacketReader;
use crate::writer::{ProgramConfig, TsSink, TsWriter};
use std::collections::{HashMap, HashSet};
use std::io::{Read, Seek};
use tracing::{debug, info, warn};

/// A source of PES packets for the ES layer.
///
/// `seek_pes` re-reads the PES packet that started at a given source
/// position; the position must have been reported by an earlier
/// `next_pes` (or `seek_pes`) on the same source.
pub trait PesSource {
    /// Deliver the next PES packet of the selected video stream.
    fn next_pes(&mut self) -> Result<Option<PesPacket>>;

    /// Seek to, and re-read, the PES packet starting at `file_pos`.
    fn seek_pes(&mut self, file_pos: u64) -> Result<PesPacket>;
}

/// Elementary stream entry reported from the PMT.
#[derive(Debug, Clone)]
pub struct StreamInfo {
    /// Elementary PID.
    pub pid: u16,
    /// Raw stream type.
    pub stream_type: u8,
    /// Raw ES_info descriptor bytes.
    pub descriptors: Vec<u8>,
}

impl StreamInfo {
    /// Human-readable stream description.
    pub fn describe(&self) -> &'static str {
        describe_stream_type(self.stream_type, &self.descriptors)
    }
}

/// A program: its number, PMT PID, PCR PID and streams.
#[derive(Debug, Clone)]
pub struct ProgramInfo {
    /// Program number.
    pub program_number: u16,
    /// PID carrying this program's PMT.
    pub pmt_pid: u16,
    /// PCR PID (0x1FFF when unset).
    pub pcr_pid: u16,
    /// Elementary streams in PMT order.
    pub streams: Vec<StreamInfo>,
}

/// Forward "server" output written while reading.
struct ServerOutput {
    writer: TsWriter<TsSink>,
    config: ProgramConfig,
    pes_since_tables: u32,
    interval: u32,
}

/// Transport stream demultiplexer.
pub struct TsDemuxer<R> {
    reader: TsPacketReader<R>,
    sections: HashMap<u16, SectionAssembler>,
    pes: HashMap<u16, PesAssembler>,
    last_cc: HashMap<u16, u8>,
    pat: Option<Pat>,
    pat_raw: Option<Vec<u8>>,
    pmts: HashMap<u16, Pmt>,
    pmt_raw: HashMap<u16, Vec<u8>>,
    last_pcr: HashMap<u16, Pcr>,
    pcr_warned: HashSet<u16>,
    video_pid: Option<u16>,
    video_stream_type: Option<u8>,
    table_generation: u64,
    server: Option<ServerOutput>,
    flushed: bool,
}

impl<R: Read> TsDemuxer<R> {
    /// Create a demuxer over a byte source.
    pub fn new(source: R) -> Self {
        let mut sections = HashMap::new();
        sections.insert(PID_PAT, SectionAssembler::new(PID_PAT));

        Self {
            reader: TsPacketReader::new(source),
            sections,
            pes: HashMap::new(),
            last_cc: HashMap::new(),
            pat: None,
            pat_raw: None,
            pmts: HashMap::new(),
            pmt_raw: HashMap::new(),
            last_pcr: HashMap::new(),
            pcr_warned: HashSet::new(),
            video_pid: None,
            video_stream_type: None,
            table_generation: 0,
            server: None,
            flushed: false,
        }
    }

    /// The current PAT, if one has been seen.
    pub fn pat(&self) -> Option<&Pat> {
        self.pat.as_ref()
    }

    /// The PMT for a program, if seen.
    pub fn pmt(&self, program_number: u16) -> Option<&Pmt> {
        self.pmts.get(&program_number)
    }

    /// Programs assembled from the PAT and the PMTs seen so far.
    pub fn programs(&self) -> Vec<ProgramInfo> {
        let Some(pat) = &self.pat else {
            return Vec::new();
        };

        pat.real_programs()
            .filter_map(|entry| {
                self.pmts.get(&entry.program_number).map(|pmt| ProgramInfo {
                    program_number: entry.program_number,
                    pmt_pid: entry.pid,
                    pcr_pid: pmt.pcr_pid,
                    streams: pmt
                        .streams
                        .iter()
                        .map(|s| StreamInfo {
                            pid: s.pid,
                            stream_type: s.stream_type,
                            descriptors: s.descriptors.clone(),
                        })
                        .collect(),
                })
            })
            .collect()
    }

    /// Selected video PID, once a PMT with a video stream has been seen.
    pub fn video_pid(&self) -> Option<u16> {
        self.video_pid
    }

    /// Stream type of the selected video stream.
    pub fn video_stream_type(&self) -> Option<u8> {
        self.video_stream_type
    }

    /// Bumped every time a PAT or PMT actually changes. Re-broadcast
    /// identical sections do not count.
    pub fn table_generation(&self) -> u64 {
        self.table_generation
    }

    /// Number of transport packets consumed.
    pub fn packets_read(&self) -> u64 {
        self.reader.packets_read()
    }

    /// Attach a forward output: every completed video PES packet is also
    /// written as transport packets, with the program tables re-emitted
    /// every `interval` packets.
    pub fn set_server_output(&mut self, writer: TsWriter<TsSink>, config: ProgramConfig, interval: u32) {
        self.server = Some(ServerOutput {
            writer,
            config,
            pes_since_tables: 0,
            interval,
        });
    }

    /// Detach and return the forward output writer.
    pub fn take_server_output(&mut self) -> Option<TsWriter<TsSink>> {
        self.server.take().map(|s| s.writer)
    }

    /// Process one packet. Returns a completed video PES packet when one
    /// closes on this packet.
    fn process_packet(&mut self, pos: u64, packet: &TsPacket) -> Result<Option<PesPacket>> {
        let pid = packet.pid();
        if pid == PID_NULL {
            return Ok(None);
        }
        if packet.transport_error() {
            warn!(pid, offset = pos, "skipping packet with transport error set");
            return Ok(None);
        }

        self.track_pcr(pid, packet);
        let continuity_broken = self.track_continuity(pid, packet);

        // PSI PIDs: PAT plus any PMT PID from the PAT
        if self.sections.contains_key(&pid) {
            if let Some(payload) = packet.payload() {
                if continuity_broken {
                    if let Some(asm) = self.sections.get_mut(&pid) {
                        asm.reset();
                    }
                }
                let section = {
                    let asm = self
                        .sections
                        .get_mut(&pid)
                        .ok_or_else(|| TsError::invalid_psi("missing section assembler"))?;
                    asm.push(payload, packet.payload_unit_start())?
                };
                if let Some(section) = section {
                    self.handle_section(pid, section);
                }
            }
            return Ok(None);
        }

        // Video PES extraction
        if Some(pid) == self.video_pid {
            if let Some(payload) = packet.payload() {
                if continuity_broken {
                    if let Some(asm) = self.pes.get_mut(&pid) {
                        warn!(pid, "continuity break; discarding partial PES packet");
                        asm.reset();
                    }
                }
                let assembler = self
                    .pes
                    .entry(pid)
                    .or_insert_with(|| PesAssembler::new(pid));
                let completed =
                    assembler.push(payload, packet.payload_unit_start(), pos)?;
                if let Some(pes) = completed {
                    self.forward_to_server(&pes)?;
                    return Ok(Some(pes));
                }
            }
        }

        Ok(None)
    }

    /// Note a packet's PCR, reporting backward jumps once per PID.
    fn track_pcr(&mut self, pid: u16, packet: &TsPacket) {
        let Some(pcr) = packet.pcr() else { return };
        if let Some(last) = self.last_pcr.get(&pid) {
            if pcr.to_27mhz() < last.to_27mhz() && self.pcr_warned.insert(pid) {
                warn!(
                    pid,
                    last = last.to_27mhz(),
                    new = pcr.to_27mhz(),
                    "non-monotonic PCR (reported once per PID)"
                );
            }
        }
        self.last_pcr.insert(pid, pcr);
    }

    /// Check the continuity counter for a payload-bearing packet.
    ///
    /// Returns true when continuity was broken (and no discontinuity was
    /// signalled in the adaptation field).
    fn track_continuity(&mut self, pid: u16, packet: &TsPacket) -> bool {
        if !packet.has_payload() {
            return false;
        }
        let cc = packet.continuity_counter();
        let broken = match self.last_cc.get(&pid) {
            Some(&last) => cc != (last + 1) & 0x0F,
            None => false,
        };
        self.last_cc.insert(pid, cc);

        if !broken {
            return false;
        }
        let announced = packet
            .adaptation_field()
            .ok()
            .flatten()
            .map(|af| af.discontinuity)
            .unwrap_or(false);
        if announced {
            debug!(pid, "announced discontinuity");
            return false;
        }
        warn!(pid, cc, "continuity counter jump");
        true
    }

    /// Parse a completed PSI section, updating tables and suppressing
    /// change notifications for identical re-broadcasts.
    fn handle_section(&mut self, pid: u16, section: Vec<u8>) {
        if pid == PID_PAT {
            if self.pat_raw.as_deref() == Some(section.as_slice()) {
                return;
            }
            match Pat::parse(&section) {
                Ok(pat) => {
                    info!(programs = pat.programs.len(), "PAT updated");
                    for entry in pat.real_programs() {
                        self.sections
                            .entry(entry.pid)
                            .or_insert_with(|| SectionAssembler::new(entry.pid));
                    }
                    self.pat = Some(pat);
                    self.pat_raw = Some(section);
                    self.table_generation += 1;
                }
                Err(err) => {
                    // Keep the previous good table
                    warn!(%err, "dropping bad PAT section");
                }
            }
            return;
        }

        match Pmt::parse(&section) {
            Ok(pmt) => {
                let program = pmt.program_number;
                if self.pmt_raw.get(&program).map(|raw| raw.as_slice())
                    == Some(section.as_slice())
                {
                    return;
                }
                info!(
                    program,
                    streams = pmt.streams.len(),
                    pcr_pid = pmt.pcr_pid,
                    "PMT updated"
                );
                if self.video_pid.is_none() {
                    if let Some(video) = pmt.video_stream() {
                        info!(
                            pid = video.pid,
                            kind = video.describe(),
                            "selected video stream"
                        );
                        self.video_pid = Some(video.pid);
                        self.video_stream_type = Some(video.stream_type);
                    }
                }
                self.pmts.insert(program, pmt);
                self.pmt_raw.insert(program, section);
                self.table_generation += 1;
            }
            Err(err) => {
                warn!(pid, %err, "dropping bad PMT section");
            }
        }
    }

    /// Mirror a completed video PES packet to the server output.
    fn forward_to_server(&mut self, pes: &PesPacket) -> Result<()> {
        let Some(server) = self.server.as_mut() else {
            return Ok(());
        };

        if server.pes_since_tables == 0 {
            server.writer.write_program_tables(&server.config)?;
        }
        server.pes_since_tables += 1;
        if server.pes_since_tables >= server.interval {
            server.pes_since_tables = 0;
        }

        server.writer.write_pes_packet(
            server.config.video_pid,
            pes.stream_id,
            &pes.payload,
            pes.pts,
            pes.dts,
            None,
        )
    }

    /// Read packets until the next video PES packet completes.
    ///
    /// `Ok(None)` is the clean end of input (after flushing any open
    /// packet). Recoverable packet errors are skipped with a warning.
    pub fn next_video_pes(&mut self) -> Result<Option<PesPacket>> {
        loop {
            match self.reader.next_packet() {
                Ok(Some((pos, packet))) => {
                    if let Some(pes) = self.process_packet(pos, &packet)? {
                        return Ok(Some(pes));
                    }
                }
                Ok(None) => {
                    if self.flushed {
                        return Ok(None);
                    }
                    self.flushed = true;
                    if let Some(pid) = self.video_pid {
                        if let Some(asm) = self.pes.get_mut(&pid) {
                            if let Some(pes) = asm.flush() {
                                self.forward_to_server(&pes)?;
                                return Ok(Some(pes));
                            }
                        }
                    }
                    return Ok(None);
                }
                Err(TsError::ShortRead { got, .. }) => {
                    warn!(got, "discarding short packet at end of input");
                    return Ok(None);
                }
                Err(err) => return Err(err),
            }
        }
    }

    /// Read packets until PAT and a PMT carrying a video stream have been
    /// seen, or `max_packets` have gone by.
    pub fn probe(&mut self, max_packets: u64) -> Result<()> {
        let mut scanned = 0u64;
        while self.video_pid.is_none() && scanned < max_packets {
            match self.reader.next_packet()? {
                Some((pos, packet)) => {
                    self.process_packet(pos, &packet)?;
                    scanned += 1;
                }
                None => break,
            }
        }
        if self.video_pid.is_none() {
            return Err(TsError::NoVideoStream);
        }
        Ok(())
    }
}

impl<R: Read + Seek> TsDemuxer<R> {
    /// Probe for the program tables, then rewind to the start.
    pub fn probe_and_rewind(&mut self, max_packets: u64) -> Result<()> {
        self.probe(max_packets)?;
        self.rewind()
    }

    /// Seek back to the start of the stream, keeping the learned tables.
    pub fn rewind(&mut self) -> Result<()> {
        self.reader.seek(0)?;
        self.reset_assembly();
        Ok(())
    }

    fn reset_assembly(&mut self) {
        for asm in self.sections.values_mut() {
            asm.reset();
        }
        for asm in self.pes.values_mut() {
            asm.reset();
        }
        self.last_cc.clear();
        self.flushed = false;
    }
}

impl<R: Read + Seek> PesSource for TsDemuxer<R> {
    fn next_pes(&mut self) -> Result<Option<PesPacket>> {
        self.next_video_pes()
    }

    fn seek_pes(&mut self, file_pos: u64) -> Result<PesPacket> {
        let pid = self.video_pid.ok_or(TsError::NoVideoStream)?;
        self.reader.seek(file_pos)?;
        self.reset_assembly();

        loop {
            match self.reader.next_packet()? {
                Some((pos, packet)) => {
                    if packet.pid() != pid {
                        continue;
                    }
                    if let Some(pes) = self.process_packet(pos, &packet)? {
                        if pes.file_pos != file_pos {
                            warn!(
                                wanted = file_pos,
                                got = pes.file_pos,
                                "PES re-read landed on a different packet"
                            );
                        }
                        return Ok(pes);
                    }
                }
                None => {
                    if let Some(asm) = self.pes.get_mut(&pid) {
                        if let Some(pes) = asm.flush() {
                            return Ok(pes);
                        }
                    }
                    return Err(TsError::EndOfStream);
                }
            }
        }
    }
}

/// A PES-bearing input of either container kind.
pub enum PesInput<R> {
    /// Transport stream input.
    Ts(TsDemuxer<R>),
    /// Program stream input.
    Ps(crate::ps::PsReader<R>),
}

impl<R: Read + Seek> PesSource for PesInput<R> {
    fn next_pes(&mut self) -> Result<Option<PesPacket>> {
        match self {
            PesInput::Ts(demux) => demux.next_pes(),
            PesInput::Ps(ps) => ps.next_pes(),
        }
    }

    fn seek_pes(&mut self, file_pos: u64) -> Result<PesPacket> {
        match self {
            PesInput::Ts(demux) => demux.seek_pes(file_pos),
            PesInput::Ps(ps) => ps.seek_pes(file_pos),
        }
    }
}
