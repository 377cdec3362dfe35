//! Reverse output: walk the catalog backwards and re-emit the anchors
//! as a playable ES or TS.

use crate::catalog::ReverseCatalog;
use crate::error::{Result, ReverseError};
use revmux_es::{EsByteSource, EsOffset};
use revmux_h264::{ParamDictionary, PictureParameterSet, SequenceParameterSet};
use revmux_ts::{Pcr, PesTimestamp, ProgramConfig, TsWriter, DEFAULT_VIDEO_PID,
    DEFAULT_VIDEO_STREAM_ID};
use std::io::Write;
use tracing::{debug, info, warn};

/// Output pictures between PSI re-emissions in TS mode.
pub const DEFAULT_PSI_INTERVAL: u32 = 40;

/// PCR lead ahead of the presentation time, in 90 kHz units (200 ms).
const PCR_LEAD: u64 = 18_000;

/// Options for the reverse output pass.
#[derive(Debug, Clone)]
pub struct ReverseOptions {
    /// Keep entries at least this far apart in the catalog (0 keeps
    /// every entry); approximates 1/freq density at 1x reverse speed.
    pub freq: u32,
    /// Output frame rate used to step the synthesised timestamps.
    pub frame_rate: u32,
    /// First synthesised PTS value.
    pub pts_base: u64,
    /// Output pictures between PAT/PMT re-emissions.
    pub psi_interval: u32,
    /// Program layout for TS output.
    pub program: ProgramConfig,
}

impl ReverseOptions {
    /// Defaults for a video stream type: 25 fps, PTS starting at one
    /// second, PSI every 40 pictures, the fixed program layout.
    pub fn with_stream_type(stream_type: u8) -> Self {
        Self {
            freq: 0,
            frame_rate: 25,
            pts_base: 90_000,
            psi_interval: DEFAULT_PSI_INTERVAL,
            program: ProgramConfig::with_stream_type(stream_type),
        }
    }
}

/// What the reverse pass wrote.
#[derive(Debug, Clone, Copy, Default)]
pub struct ReverseStats {
    /// Picture index of the first (highest) entry written; the number
    /// of frames the forward pass considered up to that point.
    pub first_written_index: u32,
    /// Picture entries available in the catalog.
    pub pictures_kept: u32,
    /// Pictures actually written.
    pub pictures_written: u32,
}

/// The output side of the reverse writer: a raw ES file or a transport
/// stream, chosen by tag.
pub enum FrameWriter<W: Write> {
    /// Raw elementary stream bytes.
    Es(W),
    /// Transport packets with synthesised timing and PSI.
    Ts(TsWriter<W>),
}

impl<W: Write> FrameWriter<W> {
    /// Write payload bytes with no timing (parameter sets, sequence
    /// headers).
    pub fn write_data(&mut self, data: &[u8]) -> Result<()> {
        match self {
            FrameWriter::Es(out) => {
                out.write_all(data)?;
                Ok(())
            }
            FrameWriter::Ts(writer) => {
                writer.write_pes_packet(
                    DEFAULT_VIDEO_PID,
                    DEFAULT_VIDEO_STREAM_ID,
                    data,
                    None,
                    None,
                    None,
                )?;
                Ok(())
            }
        }
    }

    /// Write one picture's bytes, timestamped in TS mode.
    fn write_picture(
        &mut self,
        data: &[u8],
        pid: u16,
        stream_id: u8,
        pts: PesTimestamp,
        pcr: Pcr,
    ) -> Result<()> {
        match self {
            FrameWriter::Es(out) => {
                out.write_all(data)?;
                Ok(())
            }
            FrameWriter::Ts(writer) => {
                writer.write_pes_packet(pid, stream_id, data, Some(pts), Some(pts), Some(pcr))?;
                Ok(())
            }
        }
    }

    /// Flush the underlying sink.
    pub fn flush(&mut self) -> Result<()> {
        match self {
            FrameWriter::Es(out) => {
                out.flush()?;
                Ok(())
            }
            FrameWriter::Ts(_) => Ok(()),
        }
    }
}

/// Re-emit every cached SPS and PPS, fetched from the ES view at their
/// recorded offsets, ahead of any reverse video.
pub fn write_parameter_sets<S: EsByteSource, W: Write>(
    es: &mut S,
    sps: &ParamDictionary<SequenceParameterSet>,
    pps: &ParamDictionary<PictureParameterSet>,
    out: &mut FrameWriter<W>,
) -> Result<()> {
    let locations: Vec<(&'static str, u8, EsOffset, u32)> = sps
        .iter()
        .map(|(id, e)| ("sequence", id, e.offset, e.data_len))
        .chain(
            pps.iter()
                .map(|(id, e)| ("picture", id, e.offset, e.data_len)),
        )
        .collect();

    for (kind, id, offset, data_len) in locations {
        debug!(kind, id, %offset, "writing out parameter set");
        let data = es.read_at(offset, data_len as usize)?;
        out.write_data(&data)?;
    }
    Ok(())
}

/// Walk the catalog backwards, writing the selected anchors.
///
/// Each written picture is preceded by the nearest earlier sequence
/// header when that differs from the one last written. Fetch failures
/// skip the frame; an empty catalog is the `NoData` error.
pub fn write_reverse<S: EsByteSource, W: Write>(
    es: &mut S,
    catalog: &ReverseCatalog,
    out: &mut FrameWriter<W>,
    opts: &ReverseOptions,
) -> Result<ReverseStats> {
    if catalog.pictures_kept() == 0 {
        return Err(ReverseError::NoData);
    }

    let mut stats = ReverseStats {
        pictures_kept: catalog.pictures_kept(),
        ..Default::default()
    };

    let pts_step = 90_000 / opts.frame_rate.max(1) as u64;
    let mut last_written_pos: Option<usize> = None;
    let mut last_seq_offset: Option<EsOffset> = None;
    let mut first = true;

    let entries = catalog.entries();
    for pos in (0..entries.len()).rev() {
        let entry = &entries[pos];
        if entry.is_seq_header() {
            continue;
        }
        if let Some(last) = last_written_pos {
            if opts.freq > 0 && (last - pos) < opts.freq as usize {
                continue;
            }
        }

        // PSI keeps decoders joining mid-stream happy
        if let FrameWriter::Ts(writer) = out {
            if stats.pictures_written % opts.psi_interval.max(1) == 0 {
                writer.write_program_tables(&opts.program)?;
            }
        }

        // The sequence header in force at this picture, if it differs
        // from the one most recently written
        if let Some(header) = catalog.seq_header_before(pos) {
            if last_seq_offset != Some(header.offset) {
                match es.read_at(header.offset, header.data_len as usize) {
                    Ok(data) => {
                        out.write_data(&data)?;
                        last_seq_offset = Some(header.offset);
                    }
                    Err(err) => {
                        warn!(%err, offset = %header.offset, "failed to re-read sequence header");
                    }
                }
            }
        }

        let data = match es.read_at(entry.offset, entry.data_len as usize) {
            Ok(data) => data,
            Err(err) => {
                warn!(
                    %err,
                    offset = %entry.offset,
                    len = entry.data_len,
                    "failed to re-read picture; skipping"
                );
                continue;
            }
        };

        let pts = PesTimestamp::new(opts.pts_base + stats.pictures_written as u64 * pts_step);
        let pcr = Pcr::new(pts.value.saturating_sub(PCR_LEAD), 0);
        out.write_picture(
            &data,
            opts.program.video_pid,
            DEFAULT_VIDEO_STREAM_ID,
            pts,
            pcr,
        )?;

        if first {
            stats.first_written_index = entry.index;
            first = false;
        }
        stats.pictures_written += 1;
        last_written_pos = Some(pos);
    }

    out.flush()?;
    info!(
        written = stats.pictures_written,
        kept = stats.pictures_kept,
        "reverse output complete"
    );
    Ok(stats)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::AnchorKind;
    use revmux_es::FileEsSource;
    use revmux_ts::{PesSource, StreamType, TsDemuxer, TS_PACKET_SIZE};
    use std::io::Cursor;

    /// A fake "ES" of tagged ranges: picture n occupies bytes of value n.
    fn fake_es(lengths: &[u32]) -> (Vec<u8>, Vec<EsOffset>) {
        let mut bytes = Vec::new();
        let mut offsets = Vec::new();
        for (value, &len) in lengths.iter().enumerate() {
            offsets.push(EsOffset::new(bytes.len() as u64, 0));
            bytes.extend(std::iter::repeat(value as u8).take(len as usize));
        }
        (bytes, offsets)
    }

    #[test]
    fn test_reverse_walk_with_freq_and_seq_headers() {
        // Catalog: seq header, then I pictures at frame indices
        // 0, 10, 20, 30, 40
        let (bytes, offsets) = fake_es(&[8, 100, 100, 100, 100, 100]);
        let mut catalog = ReverseCatalog::new();
        catalog.add_seq_header(offsets[0], 8).unwrap();
        for (n, index) in [0u32, 10, 20, 30, 40].iter().enumerate() {
            catalog
                .add_picture(AnchorKind::I, *index, offsets[n + 1], 100)
                .unwrap();
        }

        let mut es = FileEsSource::new(Cursor::new(bytes));
        let mut sink = Vec::new();
        let mut opts = ReverseOptions::with_stream_type(StreamType::Mpeg2Video as u8);
        opts.freq = 2;
        let stats = {
            let mut out = FrameWriter::Es(&mut sink);
            write_reverse(&mut es, &catalog, &mut out, &opts).unwrap()
        };

        // Frames 40, 20, 0 in that order, the sequence header once
        assert_eq!(stats.pictures_written, 3);
        assert_eq!(stats.first_written_index, 40);
        assert_eq!(stats.pictures_kept, 5);

        let mut expected = vec![0u8; 8]; // the seq header bytes
        expected.extend([5u8; 100]); // picture at index 40
        expected.extend([3u8; 100]); // picture at index 20
        expected.extend([1u8; 100]); // picture at index 0
        assert_eq!(sink, expected);
    }

    #[test]
    fn test_reverse_order_is_strictly_decreasing() {
        let (bytes, offsets) = fake_es(&[50, 50, 50, 50]);
        let mut catalog = ReverseCatalog::new();
        for (n, offset) in offsets.iter().enumerate() {
            catalog
                .add_picture(AnchorKind::Idr, n as u32, *offset, 50)
                .unwrap();
        }

        let mut es = FileEsSource::new(Cursor::new(bytes));
        let mut sink = Vec::new();
        let opts = ReverseOptions::with_stream_type(StreamType::Avc as u8);
        {
            let mut out = FrameWriter::Es(&mut sink);
            write_reverse(&mut es, &catalog, &mut out, &opts).unwrap();
        }

        // All four pictures, in reverse stream order
        let values: Vec<u8> = sink.chunks(50).map(|c| c[0]).collect();
        assert_eq!(values, vec![3, 2, 1, 0]);
    }

    #[test]
    fn test_empty_catalog_is_no_data() {
        let mut es = FileEsSource::new(Cursor::new(Vec::new()));
        let catalog = ReverseCatalog::new();
        let mut sink = Vec::new();
        let mut out = FrameWriter::Es(&mut sink);
        let opts = ReverseOptions::with_stream_type(StreamType::Avc as u8);
        assert!(matches!(
            write_reverse(&mut es, &catalog, &mut out, &opts),
            Err(ReverseError::NoData)
        ));
    }

    #[test]
    fn test_ts_output_has_psi_and_timing() {
        let (bytes, offsets) = fake_es(&[60, 60]);
        let mut catalog = ReverseCatalog::new();
        catalog.add_picture(AnchorKind::I, 0, offsets[0], 60).unwrap();
        catalog.add_picture(AnchorKind::I, 5, offsets[1], 60).unwrap();

        let mut es = FileEsSource::new(Cursor::new(bytes));
        let mut opts = ReverseOptions::with_stream_type(StreamType::Mpeg2Video as u8);
        opts.frame_rate = 25;
        opts.pts_base = 90_000;

        let mut out = FrameWriter::Ts(TsWriter::new(Vec::new()));
        let stats = write_reverse(&mut es, &catalog, &mut out, &opts).unwrap();
        assert_eq!(stats.pictures_written, 2);

        let FrameWriter::Ts(writer) = out else {
            unreachable!()
        };
        let buffer = writer.finish().unwrap();
        assert_eq!(buffer.len() % TS_PACKET_SIZE, 0);

        // The produced TS demuxes: PAT/PMT present, frames in reverse
        // order with stepped timestamps
        let mut demux = TsDemuxer::new(Cursor::new(buffer));
        let first = demux.next_pes().unwrap().unwrap();
        assert_eq!(first.payload, vec![1u8; 60]);
        assert_eq!(first.pts.unwrap().value, 90_000);
        let second = demux.next_pes().unwrap().unwrap();
        assert_eq!(second.payload, vec![0u8; 60]);
        assert_eq!(second.pts.unwrap().value, 90_000 + 3600);
        assert!(demux.next_pes().unwrap().is_none());

        let pmt = demux.pmt(1).unwrap();
        assert_eq!(pmt.pcr_pid, DEFAULT_VIDEO_PID);
        assert_eq!(
            pmt.streams[0].stream_type,
            StreamType::Mpeg2Video as u8
        );
    }
}
