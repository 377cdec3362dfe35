//! # revmux-ts
//!
//! MPEG-2 Systems (ISO/IEC 13818-1) container support for the revmux
//! toolkit: 188-byte transport packets, PSI table assembly, PES
//! extraction with source positions, Program Stream reading, and a
//! transport stream writer with file/stdout/TCP sinks.
//!
//! ## Demultiplexing
//!
//! ```no_run
//! use revmux_ts::{PesSource, TsDemuxer};
//! use std::fs::File;
//! use std::io::BufReader;
//!
//! let file = BufReader::new(File::open("input.ts").unwrap());
//! let mut demux = TsDemuxer::new(file);
//! demux.probe_and_rewind(10_000).unwrap();
//! while let Some(pes) = demux.next_pes().unwrap() {
//!     println!("video PES at {} ({} bytes)", pes.file_pos, pes.payload.len());
//! }
//! ```

pub mod demux;
pub mod error;
pub mod packet;
pub mod pes;
pub mod ps;
pub mod psi;
pub mod reader;
pub mod writer;

pub use demux::{PesInput, PesSource, ProgramInfo, StreamInfo, TsDemuxer};
pub use error::{Result, TsError};
pub use packet::{
    AdaptationField, AdaptationFieldControl, Pcr, TsHeader, TsPacket, DEFAULT_AUDIO_PID,
    DEFAULT_PMT_PID, DEFAULT_PROGRAM_NUMBER, DEFAULT_TRANSPORT_STREAM_ID, DEFAULT_VIDEO_PID,
    DEFAULT_VIDEO_STREAM_ID, PID_NULL, PID_PAT, SYNC_BYTE, TS_PACKET_SIZE,
};
pub use pes::{PesAssembler, PesHeader, PesHeaderBuilder, PesPacket, PesTimestamp, StreamId};
pub use ps::PsReader;
pub use psi::{
    calculate_crc32, describe_stream_type, Pat, PatEntry, Pmt, PmtStream, PsiHeader,
    SectionAssembler, StreamType,
};
pub use reader::TsPacketReader;
pub use writer::{ProgramConfig, TsSink, TsWriter, DEFAULT_TCP_PORT};

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[test]
    fn test_mux_demux_roundtrip() {
        let mut writer = TsWriter::new(Vec::new());
        let config = ProgramConfig::with_stream_type(StreamType::Mpeg2Video as u8);
        writer.write_program_tables(&config).unwrap();
        writer
            .write_pes_packet(
                DEFAULT_VIDEO_PID,
                DEFAULT_VIDEO_STREAM_ID,
                &[0x11; 500],
                Some(PesTimestamp::new(180_000)),
                Some(PesTimestamp::new(176_400)),
                Some(Pcr::new(162_000, 0)),
            )
            .unwrap();
        let buffer = writer.finish().unwrap();
        assert_eq!(buffer.len() % TS_PACKET_SIZE, 0);
        assert!(buffer
            .chunks(TS_PACKET_SIZE)
            .all(|p| p[0] == SYNC_BYTE));

        let mut demux = TsDemuxer::new(Cursor::new(buffer));
        let pes = demux.next_pes().unwrap().unwrap();
        assert_eq!(pes.payload, vec![0x11; 500]);
        assert_eq!(pes.pts.unwrap().value, 180_000);
        assert_eq!(pes.dts.unwrap().value, 176_400);

        let pat = demux.pat().unwrap();
        assert_eq!(pat.transport_stream_id, DEFAULT_TRANSPORT_STREAM_ID);
        let pmt = demux.pmt(DEFAULT_PROGRAM_NUMBER).unwrap();
        assert_eq!(pmt.pcr_pid, DEFAULT_VIDEO_PID);
    }
}
