//! The `revmux filter` subcommand.

use super::{open_es_input, EsInput, VideoKind};
use anyhow::{bail, Context, Result};
use clap::Args;
use revmux_es::EsUnitReader;
use revmux_h262::{H262FrameReader, H262Picture};
use revmux_h264::AccessUnitReader;
use revmux_reverse::{FrameWriter, H262Filter, H262FilterEvent, H264Filter, H264FilterEvent};
use revmux_ts::{ProgramConfig, TsSink, TsWriter};
use std::fs::File;
use std::io::BufWriter;
use std::path::PathBuf;

/// Arguments for forward filtering.
#[derive(Debug, Args)]
pub struct FilterArgs {
    /// The input stream (elementary stream, or TS/PS with --pes).
    pub input: PathBuf,

    /// The output file.
    pub output: PathBuf,

    /// The input is a transport or program stream, read via PES.
    #[arg(long, alias = "ts")]
    pub pes: bool,

    /// Write the output as an H.222 transport stream.
    #[arg(long)]
    pub tsout: bool,

    /// Keep roughly one frame in N instead of stripping.
    #[arg(long)]
    pub freq: Option<u32>,

    /// When stripping, keep P / reference frames too.
    #[arg(long)]
    pub allref: bool,

    /// Treat the input as MPEG-2 video.
    #[arg(long)]
    pub h262: bool,

    /// Treat the input as MPEG-4/AVC video.
    #[arg(long, alias = "avc")]
    pub h264: bool,
}

/// Run forward filtering.
pub fn run(args: FilterArgs, quiet: bool) -> Result<()> {
    let forced = match (args.h262, args.h264) {
        (true, true) => bail!("--h262 and --h264 are mutually exclusive"),
        (true, false) => Some(VideoKind::H262),
        (false, true) => Some(VideoKind::H264),
        (false, false) => None,
    };

    let (es, kind) = open_es_input(&args.input, args.pes, forced)?;

    let mut out = if args.tsout {
        let mut writer = TsWriter::new(TsSink::file(&args.output)?);
        writer.write_program_tables(&ProgramConfig::with_stream_type(kind.stream_type()))?;
        FrameWriter::Ts(writer)
    } else {
        FrameWriter::Es(TsSink::File(BufWriter::new(
            File::create(&args.output)
                .with_context(|| format!("cannot create {}", args.output.display()))?,
        )))
    };

    let (seen, written) = match kind {
        VideoKind::H262 => filter_h262(es, &mut out, &args)?,
        VideoKind::H264 => filter_h264(es, &mut out, &args)?,
    };
    out.flush()?;

    if !quiet {
        println!("Frames seen    {seen}");
        println!("Frames written {written}");
    }
    Ok(())
}

/// One picture's units flattened into a single buffer.
fn picture_bytes(picture: &H262Picture) -> Vec<u8> {
    picture.units.iter().flat_map(|u| u.data.clone()).collect()
}

fn filter_h262(es: EsInput, out: &mut FrameWriter<TsSink>, args: &FilterArgs) -> Result<(u32, u32)> {
    let mut reader = H262FrameReader::new(EsUnitReader::new(es));
    let mut filter = match args.freq {
        Some(freq) => H262Filter::rate(freq),
        None => H262Filter::strip(args.allref),
    };

    let mut last_frame: Option<Vec<u8>> = None;
    while let Some(event) = filter.next_frame(&mut reader)? {
        match event {
            H262FilterEvent::Frame { seq_hdr, frame } => {
                if let Some(seq_hdr) = seq_hdr {
                    out.write_data(&picture_bytes(&seq_hdr))?;
                }
                let bytes = picture_bytes(&frame);
                out.write_data(&bytes)?;
                last_frame = Some(bytes);
            }
            H262FilterEvent::RepeatLast => {
                if let Some(bytes) = &last_frame {
                    out.write_data(bytes)?;
                }
            }
        }
    }

    Ok((filter.frames_seen(), filter.frames_written()))
}

fn filter_h264(es: EsInput, out: &mut FrameWriter<TsSink>, args: &FilterArgs) -> Result<(u32, u32)> {
    let mut reader = AccessUnitReader::new(EsUnitReader::new(es));
    let mut filter = match args.freq {
        Some(freq) => H264Filter::rate(freq),
        None => H264Filter::strip(args.allref),
    };

    let mut last_frame: Option<Vec<u8>> = None;
    while let Some(event) = filter.next_frame(&mut reader)? {
        match event {
            H264FilterEvent::Frame(au) => {
                let bytes: Vec<u8> = au.units.iter().flat_map(|n| n.unit.data.clone()).collect();
                out.write_data(&bytes)?;
                last_frame = Some(bytes);
            }
            H264FilterEvent::RepeatLast => {
                if let Some(bytes) = &last_frame {
                    out.write_data(bytes)?;
                }
            }
        }
    }

    Ok((filter.frames_seen(), filter.frames_written()))
}
