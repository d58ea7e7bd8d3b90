//! Check a raw NAND dump for BCH-detectable bit errors, or write out a repaired copy of it.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing::Level;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use std::ffi::OsString;
use std::fs::File;
use std::io::{self, BufReader, BufWriter, IsTerminal};
use std::path::PathBuf;

use nand_bchfix::{
    bch::{Bch, BchConfig},
    nand::PageGeometry,
    scan::{Mode, Scanner, Stats},
};

#[derive(Subcommand, Debug)]
enum Command {
    /// Count bit errors; this is a read-only operation
    Check {
        /// The dump to scan
        input: PathBuf,
    },

    /// Correct bit errors in each block's data, keeping its ECC as read
    #[clap(name = "fixdata")]
    FixData {
        /// The dump to scan
        input: PathBuf,

        /// Where to write the repaired dump
        output: PathBuf,
    },

    /// Recompute each block's ECC from its data, as read
    #[clap(name = "fixecc")]
    FixEcc {
        /// The dump to scan
        input: PathBuf,

        /// Where to write the repaired dump
        output: PathBuf,
    },
}

impl Command {
    fn mode(&self) -> Mode {
        match self {
            Self::Check { .. } => Mode::Check,
            Self::FixData { .. } => Mode::FixData,
            Self::FixEcc { .. } => Mode::FixEcc,
        }
    }

    fn input(&self) -> &PathBuf {
        match self {
            Self::Check { input } | Self::FixData { input, .. } | Self::FixEcc { input, .. } => {
                input
            }
        }
    }

    fn output(&self) -> Option<&PathBuf> {
        match self {
            Self::Check { .. } => None,
            Self::FixData { output, .. } | Self::FixEcc { output, .. } => Some(output),
        }
    }
}

#[derive(Parser, Debug)]
#[clap(author, version, about)]
struct Cli {
    /// Report every block with errors
    #[clap(short, long)]
    verbose: bool,

    /// Skip this many whole pages before scanning (they are copied unmodified to the output)
    #[clap(long, value_name = "N", default_value_t = 0)]
    skip: u64,

    /// Layout of each page, as BLOCKSxDATA+ECC+SPARE
    #[clap(long, default_value = "8x514+14+128")]
    geometry: PageGeometry,

    /// What to do with the dump
    #[clap(subcommand)]
    cmd: Command,
}

/// Accept the single-dash `-skip N` spelling by rewriting it to `--skip N`
fn normalize_args<I: IntoIterator<Item = OsString>>(args: I) -> Vec<OsString> {
    args.into_iter()
        .map(|arg| if arg == "-skip" { "--skip".into() } else { arg })
        .collect()
}

fn init_logging(verbose: bool) {
    let level = if verbose { Level::INFO } else { Level::WARN };
    let filter = EnvFilter::builder()
        .with_default_directive(level.into())
        .from_env_lossy();

    tracing_subscriber::registry()
        .with(filter)
        .with(
            fmt::layer()
                .with_writer(io::stderr)
                .without_time()
                .with_target(false)
                .with_level(false),
        )
        .init();
}

/// Open the files, run the scan, and return the totals
fn run(args: &Cli) -> Result<Stats> {
    let codec = Bch::new(BchConfig::NAND_8BIT).context("Failed to initialize BCH")?;
    let scanner = Scanner::new(codec, args.cmd.mode(), args.geometry)?.skip_pages(args.skip);

    let input_path = args.cmd.input();
    let input = File::open(input_path)
        .with_context(|| format!("Failed to open input file {}", input_path.display()))?;
    let input_len = input.metadata().map(|m| m.len()).ok();

    let output = match args.cmd.output() {
        Some(path) => Some(BufWriter::new(File::create(path).with_context(|| {
            format!("Failed to open output file {}", path.display())
        })?)),
        None => None,
    };

    let scanner = match input_len {
        Some(len) => scanner.input_len(len),
        None => scanner,
    };

    let stats = scanner.run(BufReader::new(input), output)?;
    Ok(stats)
}

fn main() -> Result<()> {
    let args = Cli::parse_from(normalize_args(std::env::args_os()));

    init_logging(args.verbose);
    if !args.verbose && io::stderr().is_terminal() {
        howudoin::init(howudoin::consumers::TermLine::default());
    }

    let stats = run(&args)?;
    println!("{stats}");
    Ok(())
}

#[cfg(test)]
fn parse(args: &[&str]) -> Result<Cli, clap::Error> {
    Cli::try_parse_from(normalize_args(
        ["bchfix"].iter().chain(args).map(OsString::from),
    ))
}

#[test]
fn test_parse_args() -> Result<()> {
    let cli = parse(&["-v", "-skip", "12", "fixecc", "in.bin", "out.bin"])?;
    assert!(cli.verbose);
    assert_eq!(cli.skip, 12);
    assert_eq!(cli.cmd.mode(), Mode::FixEcc);
    assert_eq!(cli.cmd.output(), Some(&PathBuf::from("out.bin")));
    assert_eq!(cli.geometry, PageGeometry::DEFAULT);

    let cli = parse(&["check", "in.bin"])?;
    assert!(!cli.verbose);
    assert_eq!(cli.skip, 0);
    assert_eq!(cli.cmd.output(), None);

    Ok(())
}

#[test]
fn test_usage_errors() {
    // Writing modes need an output; check doesn't take one
    assert!(parse(&["fixdata", "in.bin"]).is_err());
    assert!(parse(&["check", "in.bin", "out.bin"]).is_err());
    assert!(parse(&["repair", "in.bin"]).is_err());
    assert!(parse(&["-skip", "-1", "check", "in.bin"]).is_err());
    assert!(parse(&["-skip"]).is_err());
    assert!(parse(&["-x", "check", "in.bin"]).is_err());
}

#[test]
fn test_run_on_files() -> Result<()> {
    use nand_bchfix::nand::polarity::Inverted;
    use std::fs;

    let dir = tempfile::tempdir()?;
    let input_path = dir.path().join("dump.bin");
    let output_path = dir.path().join("fixed.bin");

    // One good page, one with a bit error, then half a page
    let geometry = PageGeometry::DEFAULT;
    let codec = Inverted::new(Bch::new(BchConfig::NAND_8BIT)?);
    let mut page = Vec::new();
    for block in 0..geometry.blocks_per_page {
        let data = vec![block as u8; geometry.data_bytes];
        page.extend_from_slice(&data);
        page.extend_from_slice(&codec.encode(&data)?);
    }
    page.resize(geometry.page_size(), 0xFF);

    let mut damaged = page.clone();
    damaged[1] ^= 0x20;
    let dump = [&page[..], &damaged, &page[..100]].concat();
    fs::write(&input_path, &dump)?;

    let args = parse(&[
        "fixdata",
        input_path.to_str().unwrap(),
        output_path.to_str().unwrap(),
    ])?;
    let stats = run(&args)?;
    assert_eq!(stats.erroneous_bits, 1);
    assert_eq!(fs::read(&output_path)?, [&page[..], &page].concat());

    let args = parse(&["-skip", "1", "check", input_path.to_str().unwrap()])?;
    let stats = run(&args)?;
    assert_eq!((stats.pages_skipped, stats.pages_scanned), (1, 1));
    assert_eq!(stats.erroneous_blocks, 1);

    Ok(())
}

#[test]
fn test_missing_input() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let missing = dir.path().join("missing.bin");

    let args = parse(&["check", missing.to_str().unwrap()])?;
    let error = run(&args).unwrap_err();
    assert!(format!("{error:#}").starts_with("Failed to open input file"));

    Ok(())
}

#[test]
fn test_bad_geometry_leaves_output_alone() -> Result<()> {
    use std::fs;

    let dir = tempfile::tempdir()?;
    let input_path = dir.path().join("dump.bin");
    let output_path = dir.path().join("out.bin");
    fs::write(&input_path, [0xFFu8; 4352])?;
    fs::write(&output_path, b"precious")?;

    for geometry in ["8x514+13+128", "1x3000+14+0"] {
        let args = parse(&[
            "--geometry",
            geometry,
            "fixdata",
            input_path.to_str().unwrap(),
            output_path.to_str().unwrap(),
        ])?;
        assert!(run(&args).is_err(), "{geometry}");
        assert_eq!(fs::read(&output_path)?, b"precious");
    }

    Ok(())
}
