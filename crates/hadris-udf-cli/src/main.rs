use std::fs::OpenOptions;
use std::path::PathBuf;
use std::process::ExitCode;

use clap::Parser;
use hadris_udf::{
    BlockSize, Checker, DirectBlockIo, FormatOptions, MaintenanceEngine, MediaType, UdfRevision, Volume,
};

#[derive(Debug, Clone, Parser)]
pub struct Args {
    #[command(subcommand)]
    cmd: Command,
}

#[derive(Debug, Clone, clap::Subcommand)]
pub enum Command {
    /// Create a fresh UDF volume on a blank (or truncated) image file.
    Format(FormatArgs),
    /// Verify a volume's structural invariants, optionally repairing them.
    Check(CheckArgs),
    /// Run a scripted sequence of maintenance commands against a volume
    /// held in memory (one command per line: mkdir, rmdir, cp, rm, ls).
    Shell(ShellArgs),
}

impl Command {
    fn verbose(&self) -> bool {
        match self {
            Command::Format(a) => a.verbose,
            Command::Check(a) => a.verbose,
            Command::Shell(a) => a.verbose,
        }
    }
}

#[derive(Debug, Clone, Parser)]
pub struct FormatArgs {
    output: PathBuf,
    #[arg(long, value_parser = parse_media)]
    media: MediaType,
    #[arg(long, default_value_t = 2048)]
    block_size: u32,
    #[arg(long)]
    blocks: u32,
    #[arg(long, default_value = "")]
    label: String,
    #[arg(short, long)]
    verbose: bool,
}

#[derive(Debug, Clone, Parser)]
pub struct CheckArgs {
    image: PathBuf,
    /// Repair fixable problems instead of only reporting them.
    #[arg(short, long)]
    fix: bool,
    /// Media type the image was formatted for; not recoverable from the
    /// image itself, so it must be supplied again here.
    #[arg(long, value_parser = parse_media, default_value = "hd")]
    media: MediaType,
    #[arg(long, default_value_t = 2048)]
    block_size: u32,
    #[arg(short, long)]
    verbose: bool,
}

#[derive(Debug, Clone, Parser)]
pub struct ShellArgs {
    script: PathBuf,
    #[arg(short, long)]
    verbose: bool,
}

fn parse_media(s: &str) -> Result<MediaType, String> {
    match s.to_ascii_lowercase().as_str() {
        "hd" => Ok(MediaType::Hd),
        "dvd" => Ok(MediaType::Dvd),
        "dvd-ram" => Ok(MediaType::DvdRam),
        "dvd-rw" => Ok(MediaType::DvdRw),
        "dvd-r" => Ok(MediaType::DvdR),
        "worm" => Ok(MediaType::Worm),
        "mo" => Ok(MediaType::Mo),
        "cd-rw" => Ok(MediaType::CdRw),
        "cd-r" => Ok(MediaType::CdR),
        "cd" => Ok(MediaType::Cd),
        "bd-r" => Ok(MediaType::BdR),
        other => Err(format!("unrecognised media type {other:?}")),
    }
}

fn main() -> ExitCode {
    let args = Args::parse();
    tracing_log::LogTracer::init().ok();
    let filter = if args.cmd.verbose() { tracing::Level::TRACE } else { tracing::Level::WARN };
    tracing_subscriber::fmt().with_max_level(filter).init();

    match args.cmd {
        Command::Format(a) => format_volume(a),
        Command::Check(a) => check_volume(a),
        Command::Shell(a) => run_shell(a),
    }
}

fn format_volume(args: FormatArgs) -> ExitCode {
    let block_size = match BlockSize::new(args.block_size) {
        Ok(bs) => bs,
        Err(e) => {
            eprintln!("error: {e}");
            return ExitCode::from(16);
        }
    };
    let options = FormatOptions::new(args.media, args.blocks)
        .with_block_size(block_size)
        .with_udf_revision(UdfRevision::V201)
        .with_label(args.label);

    let mut volume = match Volume::format(options) {
        Ok(v) => v,
        Err(e) => {
            eprintln!("error: {e}");
            return ExitCode::from(8);
        }
    };

    let file = match OpenOptions::new().read(true).write(true).create(true).truncate(true).open(&args.output) {
        Ok(f) => f,
        Err(e) => {
            eprintln!("error: could not open {:?}: {e}", args.output);
            return ExitCode::from(8);
        }
    };
    if let Err(e) = file.set_len(args.blocks as u64 * block_size.get() as u64) {
        eprintln!("error: could not size {:?}: {e}", args.output);
        return ExitCode::from(8);
    }

    let mut io = DirectBlockIo::new(file, block_size.get());

    volume.close();
    log::info!("writing volume image to {:?}: {} blocks of {} bytes, media {:?}", args.output, args.blocks, block_size.get(), args.media);
    if let Err(e) = volume.write_to(&mut io) {
        eprintln!("error writing volume image: {e}");
        return ExitCode::from(8);
    }

    if let Err(e) = io.sync() {
        eprintln!("error syncing: {e}");
        return ExitCode::from(8);
    }

    println!("formatted {:?}: {} blocks of {} bytes, media {:?}", args.output, args.blocks, block_size.get(), args.media);
    ExitCode::SUCCESS
}

fn check_volume(args: CheckArgs) -> ExitCode {
    let block_size = match BlockSize::new(args.block_size) {
        Ok(bs) => bs,
        Err(e) => {
            eprintln!("error: {e}");
            return ExitCode::from(16);
        }
    };
    let file = match OpenOptions::new().read(true).write(args.fix).open(&args.image) {
        Ok(f) => f,
        Err(e) => {
            eprintln!("error: could not open {:?}: {e}", args.image);
            return ExitCode::from(8);
        }
    };
    let len = match file.metadata() {
        Ok(m) => m.len(),
        Err(e) => {
            eprintln!("error: {e}");
            return ExitCode::from(8);
        }
    };
    let total_blocks = (len / block_size.get() as u64) as u32;

    let mut io = DirectBlockIo::new(file, block_size.get());
    log::info!("reading volume image {:?}: {} blocks of {} bytes", args.image, total_blocks, block_size.get());
    let mut volume = match Volume::read_from(&mut io, args.media, block_size, total_blocks) {
        Ok(v) => v,
        Err(e) => {
            eprintln!("error: could not read volume image {:?}: {e}", args.image);
            return ExitCode::from(8);
        }
    };

    let mut checker = Checker::new(&mut volume, args.fix);
    let report = checker.run();
    for finding in &report.findings {
        println!("[{:?}] {:?}: {}{}", finding.severity, finding.invariant, finding.message, if finding.fixed { " (fixed)" } else { "" });
    }

    if report.any_fixed() {
        log::info!("writing back repaired volume image to {:?}", args.image);
        if let Err(e) = volume.write_to(&mut io) {
            eprintln!("error writing repaired volume image: {e}");
            return ExitCode::from(8);
        }
        if let Err(e) = io.sync() {
            eprintln!("error syncing: {e}");
            return ExitCode::from(8);
        }
    }

    if report.is_clean() {
        ExitCode::from(0)
    } else if report.any_fixed() && !report.has_unfixed_errors() {
        ExitCode::from(1)
    } else if report.has_unfixed_errors() {
        ExitCode::from(4)
    } else {
        ExitCode::from(0)
    }
}

fn run_shell(args: ShellArgs) -> ExitCode {
    let script = match std::fs::read_to_string(&args.script) {
        Ok(s) => s,
        Err(e) => {
            eprintln!("error: {e}");
            return ExitCode::from(8);
        }
    };

    let options = FormatOptions::new(MediaType::Hd, 100_000);
    let mut volume = match Volume::format(options) {
        Ok(v) => v,
        Err(e) => {
            eprintln!("error: {e}");
            return ExitCode::from(8);
        }
    };
    let mut engine = MaintenanceEngine::new(volume.root_id);

    for line in script.lines() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        let mut parts = line.split_whitespace();
        let result = match parts.next() {
            Some("mkdir") => parts.next().map(|p| engine.mkdir(&mut volume, p)),
            Some("rmdir") => parts.next().map(|p| engine.rmdir(&mut volume, p)),
            Some("rm") => parts.next().map(|p| engine.rm(&mut volume, p)),
            Some("cd") => parts.next().map(|p| engine.change_dir(&volume, p)),
            Some("cp") => parts.next().map(|p| engine.cp(&mut volume, p, b"", false)),
            Some("ls") => {
                match engine.ls(&volume, parts.next()) {
                    Ok(names) => {
                        for name in names {
                            println!("{name}");
                        }
                        None
                    }
                    Err(e) => Some(Err(e)),
                }
            }
            Some(other) => {
                eprintln!("unknown command: {other}");
                return ExitCode::from(16);
            }
            None => None,
        };
        if let Some(Err(e)) = result {
            eprintln!("error: {e}");
            return ExitCode::from(4);
        }
    }
    ExitCode::SUCCESS
}
