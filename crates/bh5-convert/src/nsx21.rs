//! Continuous-format revision 2.1 ("NEURALSG") decoding and conversion.
//!
//! The 2.1 revision carries no per-channel extended metadata: a 32-byte
//! header is followed by a flat list of 32-bit channel ids, then
//! interleaved 16-bit sample tuples until end of file. The format has no
//! embedded acquisition timestamp either, so it is derived from the
//! source file's modification time.

use std::io::{Cursor, Read, Seek, SeekFrom};
use std::path::Path;

use byteorder::{LittleEndian, ReadBytesExt};

use bh5_format::Bh5Writer;

use crate::convert::ConversionReport;
use crate::descriptor::{
    ChannelDescriptor, RootMetadata, CHUNK_SIZE_CONTINUOUS, MAX_ANALOG_CHANNELS,
};
use crate::error::{ConvertError, Result};
use crate::schema::build_nsx21_schema;
use crate::source::{fixed_str, read_full};

/// Size of the fixed file header in bytes (channel ids follow).
pub const NSX21_HEADER_SIZE: usize = 32;

/// Sampling clock of the acquisition hardware in Hz. The header only
/// stores the decimation period relative to this clock.
pub const NSX21_CLOCK_HZ: u32 = 30_000;

/// The fixed 2.1 file header.
#[derive(Debug, Clone)]
pub struct Nsx21Header {
    pub label: String,
    /// Decimation period: samples are taken every `period` clock ticks.
    pub period: u32,
    pub channel_count: u32,
}

impl Nsx21Header {
    pub fn parse<R: Read + Seek>(r: &mut R) -> Result<Self> {
        r.seek(SeekFrom::Start(0))?;
        let mut block = [0u8; NSX21_HEADER_SIZE];
        if read_full(r, &mut block)? != NSX21_HEADER_SIZE {
            return Err(ConvertError::TruncatedHeader);
        }
        let mut c = Cursor::new(&block[24..]); // past magic and label
        let period = c.read_u32::<LittleEndian>()?;
        let channel_count = c.read_u32::<LittleEndian>()?;
        Ok(Self {
            label: fixed_str(&block[8..24]),
            period: period.max(1),
            channel_count,
        })
    }
}

/// A decoded 2.1 session: header plus the declared channel id list, in
/// the file's interleave order.
pub struct Nsx21Session {
    pub header: Nsx21Header,
    pub root: RootMetadata,
    pub channel_ids: Vec<u32>,
}

impl Nsx21Session {
    /// Basic descriptor for one channel. Revision 2.1 fixes the clock at
    /// 30 kHz and the sample width at 16 bits.
    pub fn channel(&self, id: u32) -> ChannelDescriptor {
        ChannelDescriptor {
            id: id as u16,
            clock_hz: NSX21_CLOCK_HZ as f32,
            sample_rate_hz: NSX21_CLOCK_HZ as f32 / self.header.period as f32,
            sample_bits: 16,
        }
    }
}

/// Decode the header and channel id list.
///
/// `src_path` is consulted for the file modification time standing in
/// for the missing acquisition timestamp; failure to read it is fatal.
pub fn decode_nsx21<R: Read + Seek>(r: &mut R, src_path: &Path) -> Result<Nsx21Session> {
    let header = Nsx21Header::parse(r)?;
    if header.channel_count > u32::from(MAX_ANALOG_CHANNELS) {
        return Err(ConvertError::TooManyChannels {
            got: header.channel_count,
            max: MAX_ANALOG_CHANNELS,
        });
    }

    let mut channel_ids = Vec::with_capacity(header.channel_count as usize);
    for _ in 0..header.channel_count {
        let mut id = [0u8; 4];
        if read_full(r, &mut id)? != 4 {
            return Err(ConvertError::TruncatedHeader);
        }
        channel_ids.push(u32::from_le_bytes(id));
    }

    let modified = std::fs::metadata(src_path)
        .and_then(|m| m.modified())
        .map_err(ConvertError::SourceMetadata)?;
    let acquisition_time = chrono::DateTime::<chrono::Local>::from(modified)
        .format("%Y-%m-%d %H:%M:%S%.6f")
        .to_string();

    let root = RootMetadata {
        major_version: 1,
        application: header.label.clone(),
        comment: String::new(),
        acquisition_time,
    };

    Ok(Nsx21Session {
        header,
        root,
        channel_ids,
    })
}

/// Convert a 2.1 source into the destination container.
pub fn convert_nsx21<R: Read + Seek>(
    r: &mut R,
    src_path: &Path,
    writer: &mut Bh5Writer,
) -> Result<ConversionReport> {
    let session = decode_nsx21(r, src_path)?;
    tracing::info!(
        channels = session.channel_ids.len(),
        period = session.header.period,
        "Decoded continuous 2.1 session header"
    );

    let streams = build_nsx21_schema(writer, &session)?;

    let channels = session.channel_ids.len();
    let tuple_bytes = channels * 2;
    let mut tuple = vec![0u8; tuple_bytes];
    let mut chunks: Vec<Vec<u8>> =
        vec![Vec::with_capacity(CHUNK_SIZE_CONTINUOUS as usize * 2); channels];
    let mut buffered = 0u32;
    let mut samples = 0u64;
    let mut report = ConversionReport::default();

    loop {
        let n = read_full(r, &mut tuple)?;
        if n == 0 {
            break;
        }
        if n < tuple_bytes {
            if samples == 0 {
                return Err(ConvertError::EmptyData);
            }
            tracing::warn!(got = n, "Truncated sample tuple at end of source dropped");
            break;
        }

        for (chunk, sample) in chunks.iter_mut().zip(tuple.chunks_exact(2)) {
            chunk.extend_from_slice(sample);
        }
        buffered += 1;
        samples += 1;

        if buffered == CHUNK_SIZE_CONTINUOUS {
            for (stream, chunk) in streams.iter().zip(chunks.iter_mut()) {
                writer.append(*stream, chunk, buffered)?;
                chunk.clear();
            }
            report.records += u64::from(buffered) * channels as u64;
            buffered = 0;
        }
    }

    if samples == 0 {
        return Err(ConvertError::EmptyData);
    }

    // Flush the partial tail chunk.
    if buffered > 0 {
        for (stream, chunk) in streams.iter().zip(chunks.iter_mut()) {
            writer.append(*stream, chunk, buffered)?;
            chunk.clear();
        }
        report.records += u64::from(buffered) * channels as u64;
    }

    tracing::info!(samples, channels, "Continuous 2.1 conversion finished");
    Ok(report)
}
