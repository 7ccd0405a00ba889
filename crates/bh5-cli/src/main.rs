//! BH5 CLI — converts NEV and NSx neural recording files into the BH5
//! hierarchical container format.
//!
//! # Usage
//!
//! ```bash
//! bh5 session.nev                  # writes session.nev.bh5
//! bh5 --force session.ns5 out.bh5
//! bh5 --nocache session.ns2       # slower, smaller output
//! bh5 --info out.bh5              # inspect a converted container
//! ```

use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use clap::{CommandFactory, Parser};

use bh5_convert::{convert, ConvertError, ConvertOptions};
use bh5_format::{Bh5Reader, FormatError, GroupId};

/// Neural recording file conversion utility.
#[derive(Parser)]
#[command(
    name = "bh5",
    about = "Neural recording file conversion utility",
    version,
    long_about = "Converts an event-stream (NEV) or continuous-sampling (NSx 2.1/2.2)\n\
                  recording into a self-describing BH5 container."
)]
struct Cli {
    /// Overwrite the destination if it exists.
    #[arg(long)]
    force: bool,

    /// Disable the destination chunk cache: slower but results in a
    /// smaller file.
    #[arg(long)]
    nocache: bool,

    /// Inspect an existing .bh5 container instead of converting.
    #[arg(long)]
    info: bool,

    /// Enable verbose (debug-level) logging.
    #[arg(short, long)]
    verbose: bool,

    /// The file to convert from (nev or nsx format).
    src: Option<PathBuf>,

    /// The converted file to create; default is <srcfile>.bh5.
    dest: Option<PathBuf>,
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let filter = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    // No source file: print usage and exit cleanly.
    let Some(src) = cli.src else {
        Cli::command().print_help()?;
        println!();
        return Ok(());
    };

    if cli.info {
        return cmd_info(&src);
    }

    let dest = cli.dest.clone().unwrap_or_else(|| default_dest(&src));
    let options = ConvertOptions {
        overwrite: cli.force,
        chunk_cache: !cli.nocache,
    };

    let report = match convert(&src, &dest, &options) {
        Ok(report) => report,
        Err(ConvertError::Container(FormatError::DestinationExists(path))) => {
            bail!(
                "Destination file {} exists.\nUse --force to overwrite it.",
                path.display()
            );
        }
        Err(e) => {
            return Err(e).with_context(|| format!("Failed to convert {}", src.display()));
        }
    };

    let size = std::fs::metadata(&dest).map(|m| m.len()).unwrap_or(0);
    println!();
    println!("  BH5 Converter");
    println!("  ============================================");
    println!("  Input:    {}", src.display());
    println!("  Output:   {} ({} bytes)", dest.display(), size);
    println!("  Records:  {}", report.records);
    if report.dropped > 0 {
        println!("  Dropped:  {}", report.dropped);
    }
    if report.segments > 0 {
        println!("  Segments: {}", report.segments);
    }
    println!("  Done!");
    println!();
    Ok(())
}

/// Default destination: the source path with `.bh5` appended.
fn default_dest(src: &Path) -> PathBuf {
    let mut name = src.as_os_str().to_os_string();
    name.push(".bh5");
    PathBuf::from(name)
}

/// Display the group tree, attributes, and streams of a `.bh5` file.
fn cmd_info(path: &Path) -> Result<()> {
    let reader = Bh5Reader::open(path)
        .with_context(|| format!("Failed to open BH5 file: {}", path.display()))?;

    println!();
    println!("  BH5 File Information");
    println!("  ============================================");
    println!("  File:    {}", path.display());
    println!("  Size:    {} bytes", reader.file_size());
    println!("  Version: {}", reader.version());
    println!();
    print_group(&reader, GroupId::ROOT, "/", 1)?;
    println!();
    Ok(())
}

fn print_group(reader: &Bh5Reader, group: GroupId, name: &str, depth: usize) -> Result<()> {
    let indent = "  ".repeat(depth);
    println!("{indent}{name}");

    for attr in reader.group_attr_names(group) {
        let value: serde_json::Value = reader.group_attr(group, attr)?;
        println!("{indent}  @{attr} = {value}");
    }

    for (stream, stream_name) in reader.streams(group) {
        let count = reader.stream_record_count(stream)?;
        println!("{indent}  {stream_name} [{count} records]");
        for attr in reader.stream_attr_names(stream) {
            let value: serde_json::Value = reader.stream_attr(stream, attr)?;
            println!("{indent}    @{attr} = {value}");
        }
    }

    for (child, child_name) in reader.children(group) {
        print_group(reader, child, child_name, depth + 1)?;
    }
    Ok(())
}
