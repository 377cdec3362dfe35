//! The `revmux reverse` subcommand.

use super::{open_es_input, parse_host, VideoKind};
use anyhow::{bail, Context, Result};
use clap::Args;
use revmux_es::EsUnitReader;
use revmux_h262::H262FrameReader;
use revmux_h264::AccessUnitReader;
use revmux_reverse::{
    collect_h262, collect_h264, write_parameter_sets, write_reverse, CollectOptions,
    FrameWriter, ReverseCatalog, ReverseOptions, ReverseStats,
};
use revmux_ts::{ProgramConfig, TsSink, TsWriter};
use std::fs::File;
use std::io::BufWriter;
use std::path::PathBuf;
use tracing::info;

/// Arguments for reverse output.
#[derive(Debug, Args)]
pub struct ReverseArgs {
    /// The input stream (elementary stream, or TS/PS with --pes).
    pub input: PathBuf,

    /// The output file (omit with --stdout or --host).
    pub output: Option<PathBuf>,

    /// The input is a transport or program stream, read via PES.
    #[arg(long, alias = "ts")]
    pub pes: bool,

    /// Write the output as an H.222 transport stream.
    #[arg(long)]
    pub tsout: bool,

    /// Write the output to standard output (forces quiet).
    #[arg(long)]
    pub stdout: bool,

    /// Send the output over TCP to HOST[:PORT] (default port 88;
    /// implies --tsout).
    #[arg(long, value_name = "HOST[:PORT]")]
    pub host: Option<String>,

    /// Spacing of frames to keep when reversing.
    #[arg(long, default_value_t = 8)]
    pub freq: u32,

    /// Maximum number of frames to scan forwards (0 = all).
    #[arg(short = 'm', long, default_value_t = 0)]
    pub max: u32,

    /// Also keep P / reference pictures, not just I/IDR.
    #[arg(long)]
    pub allref: bool,

    /// Treat the input as MPEG-2 video.
    #[arg(long)]
    pub h262: bool,

    /// Treat the input as MPEG-4/AVC video.
    #[arg(long, alias = "avc")]
    pub h264: bool,

    /// Also emit normal forward video while collecting (implies --pes
    /// and --tsout).
    #[arg(long)]
    pub server: bool,
}

/// Run reverse output.
pub fn run(mut args: ReverseArgs, quiet: bool) -> Result<()> {
    if args.server {
        args.pes = true;
        args.tsout = true;
    }
    let as_ts = args.tsout || args.host.is_some();

    let forced = match (args.h262, args.h264) {
        (true, true) => bail!("--h262 and --h264 are mutually exclusive"),
        (true, false) => Some(VideoKind::H262),
        (false, true) => Some(VideoKind::H264),
        (false, false) => None,
    };

    if !args.stdout && args.host.is_none() && args.output.is_none() {
        bail!("no output file specified");
    }

    let (mut es, kind) = open_es_input(&args.input, args.pes, forced)?;
    let program = ProgramConfig::with_stream_type(kind.stream_type());

    // TS output goes through one writer for the whole run so continuity
    // counters stay coherent across the forward and reverse phases
    let mut ts_writer = if as_ts {
        let sink = if args.stdout {
            TsSink::stdout()
        } else if let Some(host) = &args.host {
            let (host, port) = parse_host(host)?;
            info!(%host, port, "connecting TCP sink");
            TsSink::connect(&host, port)?
        } else {
            let path = args.output.as_ref().context("no output file specified")?;
            TsSink::file(path)?
        };
        Some(TsWriter::new(sink))
    } else {
        None
    };

    if args.server {
        let writer = ts_writer.take().context("server mode requires TS output")?;
        let demux = es
            .ts_demuxer_mut()
            .context("server mode requires transport stream input")?;
        demux.set_server_output(writer, program.clone(), 100);
    }

    if !quiet {
        println!("Reading {} as {kind}", args.input.display());
        if as_ts {
            println!("Writing as Transport Stream");
        }
        println!("Filtering frequency {}", args.freq);
    }

    let collect_opts = CollectOptions {
        max_frames: args.max,
        keep_all_ref: args.allref,
    };
    let mut rev_opts = ReverseOptions::with_stream_type(kind.stream_type());
    rev_opts.freq = args.freq;
    rev_opts.program = program.clone();

    let mut catalog = ReverseCatalog::new();

    if !quiet {
        println!("\nScanning forwards");
    }

    let stats = match kind {
        VideoKind::H262 => {
            let mut reader = H262FrameReader::new(EsUnitReader::new(es));
            collect_h262(&mut reader, &mut catalog, &collect_opts)?;
            es = reader.into_units().into_source();

            if args.server {
                ts_writer = es
                    .ts_demuxer_mut()
                    .and_then(|demux| demux.take_server_output());
            }

            let mut out = open_output(&args, ts_writer.take())?;
            if !quiet {
                println!("\nOutputting in reverse order");
            }
            write_reverse(&mut es, &catalog, &mut out, &rev_opts)?
        }
        VideoKind::H264 => {
            let mut reader = AccessUnitReader::new(EsUnitReader::new(es));
            collect_h264(&mut reader, &mut catalog, &collect_opts)?;
            let sps = reader.sps.clone();
            let pps = reader.pps.clone();
            es = reader.into_units().into_source();

            // Server mode has been writing through the TS writer; take
            // it back for the reverse phase
            if args.server {
                ts_writer = es
                    .ts_demuxer_mut()
                    .and_then(|demux| demux.take_server_output());
            }

            let mut out = open_output(&args, ts_writer.take())?;
            if let FrameWriter::Ts(writer) = &mut out {
                // Decoders need the program tables before the cached
                // parameter sets arrive
                writer.write_program_tables(&rev_opts.program)?;
            }
            if !quiet {
                println!("\nPreparing to output reverse data");
            }
            write_parameter_sets(&mut es, &sps, &pps, &mut out)?;
            if !quiet {
                println!("\nOutputting in reverse order");
            }
            write_reverse(&mut es, &catalog, &mut out, &rev_opts)?
        }
    };

    if !quiet {
        print_summary(&stats, args.freq);
    }
    Ok(())
}

/// Build the output side: the TS writer made earlier, or an ES file.
fn open_output(
    args: &ReverseArgs,
    ts_writer: Option<TsWriter<TsSink>>,
) -> Result<FrameWriter<TsSink>> {
    if let Some(writer) = ts_writer {
        return Ok(FrameWriter::Ts(writer));
    }
    if args.stdout {
        return Ok(FrameWriter::Es(TsSink::stdout()));
    }
    let path = args.output.as_ref().context("no output file specified")?;
    Ok(FrameWriter::Es(TsSink::File(BufWriter::new(
        File::create(path).with_context(|| format!("cannot create {}", path.display()))?,
    ))))
}

/// The end-of-run accounting table.
fn print_summary(stats: &ReverseStats, freq: u32) {
    let considered = stats.first_written_index.max(1);
    println!();
    println!("Summary");
    println!("=======");
    println!("              Considered       Used            Written");
    println!(
        "Pictures      {:10} {:10} ({:4.1}%) {:10} ({:4.1}%)",
        considered,
        stats.pictures_kept,
        100.0 * stats.pictures_kept as f64 / considered as f64,
        stats.pictures_written,
        100.0 * stats.pictures_written as f64 / considered as f64,
    );
    if freq != 0 {
        println!(
            "Target (pictures)      . {:10} ({:4.1}%) at requested frequency {}",
            considered / freq,
            100.0 / freq as f64,
            freq
        );
    }
}
