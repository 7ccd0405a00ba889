//! Top-level conversion entry point: sniff the source format, create the
//! destination container, run the matching pipeline, finalize.

use std::fs::File;
use std::io::BufReader;
use std::path::Path;

use bh5_format::{Bh5Writer, WriterOptions};

use crate::error::Result;
use crate::source::{sniff, SourceKind};
use crate::{nev, nsx21, nsx22};

/// Conversion tuning knobs, mapped straight from the CLI surface.
#[derive(Debug, Clone, Copy)]
pub struct ConvertOptions {
    /// Permit overwriting an existing destination (`--force`).
    pub overwrite: bool,
    /// Destination chunk cache; disabling trades speed for a smaller
    /// output file (`--nocache`).
    pub chunk_cache: bool,
}

impl Default for ConvertOptions {
    fn default() -> Self {
        Self {
            overwrite: false,
            chunk_cache: true,
        }
    }
}

/// What a conversion run produced. Dropped records are individually
/// reported as warnings while the run proceeds.
#[derive(Debug, Clone, Copy, Default)]
pub struct ConversionReport {
    /// Records appended across all destination streams.
    pub records: u64,
    /// Records dropped as unsupported or invalid.
    pub dropped: u64,
    /// Data segments processed (continuous 2.2 only).
    pub segments: u32,
}

/// Convert `src` into a BH5 container at `dest`.
///
/// The magic token is sniffed before the destination is created, so an
/// unrecognized source never leaves destination content behind.
pub fn convert(src: &Path, dest: &Path, options: &ConvertOptions) -> Result<ConversionReport> {
    let file = File::open(src)?;
    let mut reader = BufReader::new(file);
    let kind = sniff(&mut reader)?;
    tracing::info!(
        src = %src.display(),
        dest = %dest.display(),
        format = ?kind,
        "Starting conversion"
    );

    let mut writer = Bh5Writer::create(
        dest,
        WriterOptions {
            overwrite: options.overwrite,
            chunk_cache: options.chunk_cache,
        },
    )?;

    let report = match kind {
        SourceKind::Nev => nev::convert_nev(&mut reader, &mut writer)?,
        SourceKind::Nsx21 => nsx21::convert_nsx21(&mut reader, src, &mut writer)?,
        SourceKind::Nsx22 => nsx22::convert_nsx22(&mut reader, &mut writer)?,
    };

    writer.finalize()?;
    Ok(report)
}
