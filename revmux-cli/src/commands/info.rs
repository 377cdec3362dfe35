//! The `revmux info` subcommand.

use super::PROBE_PACKETS;
use anyhow::{Context, Result};
use clap::Args;
use revmux_ts::{TsDemuxer, TsError};
use std::fs::File;
use std::io::{BufReader, Read};
use std::path::PathBuf;

/// Arguments for stream inspection.
#[derive(Debug, Args)]
pub struct InfoArgs {
    /// The transport stream to inspect (omit with --stdin).
    pub input: Option<PathBuf>,

    /// Read the transport stream from standard input.
    #[arg(long)]
    pub stdin: bool,

    /// Maximum number of packets to scan.
    #[arg(short = 'm', long, default_value_t = PROBE_PACKETS)]
    pub max: u64,
}

/// Run stream inspection.
pub fn run(args: InfoArgs) -> Result<()> {
    let reader: Box<dyn Read> = if args.stdin {
        Box::new(std::io::stdin())
    } else {
        let path = args
            .input
            .as_ref()
            .context("no input file specified (or use --stdin)")?;
        Box::new(BufReader::new(
            File::open(path).with_context(|| format!("cannot open {}", path.display()))?,
        ))
    };

    let mut demux = TsDemuxer::new(reader);
    match demux.probe(args.max) {
        // A stream without video is still worth reporting on
        Ok(()) | Err(TsError::NoVideoStream) => {}
        Err(err) => return Err(err.into()),
    }

    println!("Scanned {} packets", demux.packets_read());

    let Some(pat) = demux.pat() else {
        println!("No PAT found");
        return Ok(());
    };

    println!(
        "Transport stream id {}: {} program(s)",
        pat.transport_stream_id,
        pat.real_programs().count()
    );
    for entry in pat.real_programs() {
        println!(
            "  Program {} -> PMT PID 0x{:04X}",
            entry.program_number, entry.pid
        );
    }

    for program in demux.programs() {
        println!();
        println!(
            "Program {} (PCR PID 0x{:04X}):",
            program.program_number, program.pcr_pid
        );
        for stream in &program.streams {
            println!(
                "  PID 0x{:04X}: stream type 0x{:02X} = {}",
                stream.pid,
                stream.stream_type,
                stream.describe()
            );
        }
    }

    if let Some(pid) = demux.video_pid() {
        println!();
        println!("Selected video stream: PID 0x{pid:04X}");
    }

    Ok(())
}
