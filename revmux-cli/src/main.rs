//! revmux - MPEG-2 Systems toolkit with reverse playback.

use clap::{Parser, Subcommand, ValueEnum};
use console::style;
use tracing_subscriber::EnvFilter;

mod commands;

/// Where diagnostic messages go.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum ErrTarget {
    /// Write messages to standard output.
    Stdout,
    /// Write messages to standard error.
    Stderr,
}

#[derive(Debug, Parser)]
#[command(
    name = "revmux",
    version,
    about = "Inspect, filter and reverse MPEG-2 transport, program and elementary streams"
)]
struct Cli {
    /// Output additional (debugging) messages.
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Only output error messages.
    #[arg(short, long, global = true)]
    quiet: bool,

    /// Where to send diagnostic messages.
    #[arg(long, global = true, value_enum, default_value = "stderr")]
    err: ErrTarget,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Output a reversed stream derived from H.264 or H.262 video.
    Reverse(commands::reverse::ReverseArgs),
    /// Report on the programs and streams in a transport stream.
    Info(commands::info::InfoArgs),
    /// Fast-forward a video stream by dropping undecodable frames.
    Filter(commands::filter::FilterArgs),
}

fn main() {
    let cli = Cli::parse();

    // Writing the output stream to stdout leaves no room for chatter
    let force_quiet = matches!(
        &cli.command,
        Command::Reverse(args) if args.stdout
    );
    let quiet = cli.quiet || force_quiet;

    let filter = if cli.verbose && !quiet {
        EnvFilter::new("debug")
    } else if quiet {
        EnvFilter::new("error")
    } else {
        EnvFilter::new("info")
    };

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false);
    match cli.err {
        ErrTarget::Stdout if !force_quiet => builder.with_writer(std::io::stdout).init(),
        _ => builder.with_writer(std::io::stderr).init(),
    }

    let result = match cli.command {
        Command::Reverse(args) => commands::reverse::run(args, quiet),
        Command::Info(args) => commands::info::run(args),
        Command::Filter(args) => commands::filter::run(args, quiet),
    };

    if let Err(err) = result {
        eprintln!("{} {err}", style("error:").red().bold());
        std::process::exit(1);
    }
}
