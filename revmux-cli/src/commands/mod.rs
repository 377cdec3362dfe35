//! Shared plumbing for the revmux subcommands.

pub mod filter;
pub mod info;
pub mod reverse;

use anyhow::{Context, Result};
use revmux_es::{
    EsByteSource, EsOffset, EsUnitReader, FileEsSource, PesEsSource, Result as EsResult,
};
use revmux_ts::{PesInput, PsReader, StreamType, TsDemuxer, DEFAULT_TCP_PORT, SYNC_BYTE};
use std::fmt;
use std::fs::File;
use std::io::{BufReader, Read, Seek, SeekFrom};
use std::path::Path;
use tracing::{info, warn};

/// How many packets to scan for PAT/PMT before giving up.
pub const PROBE_PACKETS: u64 = 10_000;

/// The kind of video carried by the input.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VideoKind {
    /// MPEG-2 (or MPEG-1) video.
    H262,
    /// MPEG-4/AVC video.
    H264,
}

impl VideoKind {
    /// The stream type used when synthesising a PMT for this kind.
    pub fn stream_type(&self) -> u8 {
        match self {
            VideoKind::H262 => StreamType::Mpeg2Video as u8,
            VideoKind::H264 => StreamType::Avc as u8,
        }
    }
}

impl fmt::Display for VideoKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            VideoKind::H262 => write!(f, "H.262 (MPEG-2)"),
            VideoKind::H264 => write!(f, "H.264 (MPEG-4/AVC)"),
        }
    }
}

/// The elementary stream view over any supported input.
pub enum EsInput {
    /// A raw elementary stream file.
    File(FileEsSource<BufReader<File>>),
    /// The video stream extracted from a transport or program stream.
    Pes(Box<PesEsSource<PesInput<BufReader<File>>>>),
}

impl EsByteSource for EsInput {
    fn read_byte(&mut self) -> EsResult<Option<(u8, EsOffset)>> {
        match self {
            EsInput::File(source) => source.read_byte(),
            EsInput::Pes(source) => source.read_byte(),
        }
    }

    fn seek(&mut self, offset: EsOffset) -> EsResult<()> {
        match self {
            EsInput::File(source) => source.seek(offset),
            EsInput::Pes(source) => source.seek(offset),
        }
    }
}

impl EsInput {
    /// The transport demuxer behind this input, when there is one.
    pub fn ts_demuxer_mut(&mut self) -> Option<&mut TsDemuxer<BufReader<File>>> {
        match self {
            EsInput::Pes(source) => match source.source_mut() {
                PesInput::Ts(demux) => Some(demux),
                PesInput::Ps(_) => None,
            },
            EsInput::File(_) => None,
        }
    }
}

/// Open an input file as an ES view, deciding the video kind.
///
/// With `use_pes` the file is TS or PS (sniffed by its first byte) and
/// the video stream is selected through the PES layer; otherwise the
/// file is a raw elementary stream. `forced` overrides detection.
pub fn open_es_input(
    path: &Path,
    use_pes: bool,
    forced: Option<VideoKind>,
) -> Result<(EsInput, VideoKind)> {
    let mut file =
        File::open(path).with_context(|| format!("cannot open {}", path.display()))?;

    if !use_pes {
        let source = FileEsSource::new(BufReader::new(file));
        let mut input = EsInput::File(source);
        let kind = match forced {
            Some(kind) => kind,
            None => probe_es_kind(&mut input)?,
        };
        return Ok((input, kind));
    }

    let mut first = [0u8; 1];
    let sniffed = file.read(&mut first)?;
    file.seek(SeekFrom::Start(0))?;
    let reader = BufReader::new(file);

    if sniffed == 1 && first[0] == SYNC_BYTE {
        let mut demux = TsDemuxer::new(reader);
        demux
            .probe_and_rewind(PROBE_PACKETS)
            .context("no usable program in transport stream")?;
        let kind = forced.unwrap_or_else(|| kind_from_stream_type(demux.video_stream_type()));
        info!(%kind, "reading video via transport stream PES");
        let source = PesEsSource::new(PesInput::Ts(demux));
        Ok((EsInput::Pes(Box::new(source)), kind))
    } else {
        // Program streams carry MPEG video unless told otherwise
        let kind = forced.unwrap_or(VideoKind::H262);
        info!(%kind, "reading video via program stream PES");
        let source = PesEsSource::new(PesInput::Ps(PsReader::new(reader)));
        Ok((EsInput::Pes(Box::new(source)), kind))
    }
}

/// Map a PMT stream type to a video kind.
fn kind_from_stream_type(stream_type: Option<u8>) -> VideoKind {
    match stream_type.and_then(StreamType::from_u8) {
        Some(StreamType::Avc) => VideoKind::H264,
        Some(StreamType::Mpeg1Video) | Some(StreamType::Mpeg2Video) => VideoKind::H262,
        other => {
            warn!(?other, "unrecognised video stream type; assuming H.262");
            VideoKind::H262
        }
    }
}

/// Look at the first units of a raw ES file to guess its kind.
fn probe_es_kind(input: &mut EsInput) -> Result<VideoKind> {
    let mut units = EsUnitReader::new(&mut *input);
    let mut kind = VideoKind::H262;

    for _ in 0..4 {
        match units.next_unit() {
            Ok(Some(unit)) => {
                let code = unit.start_code;
                if (0xB0..=0xB8).contains(&code) || code == 0x00 {
                    kind = VideoKind::H262;
                    break;
                }
                if code & 0x80 == 0 && (1..=12).contains(&(code & 0x1F)) {
                    kind = VideoKind::H264;
                    break;
                }
            }
            Ok(None) => break,
            Err(err) => {
                warn!(%err, "probe could not scan input; assuming H.262");
                break;
            }
        }
    }

    drop(units);
    input.seek(EsOffset::START)?;
    info!(%kind, "detected stream kind");
    Ok(kind)
}

/// Split a `host` or `host:port` value, defaulting the port.
pub fn parse_host(value: &str) -> Result<(String, u16)> {
    match value.rsplit_once(':') {
        Some((host, port)) => {
            let port: u16 = port
                .parse()
                .with_context(|| format!("bad port in '{value}'"))?;
            Ok((host.to_string(), port))
        }
        None => Ok((value.to_string(), DEFAULT_TCP_PORT)),
    }
}
