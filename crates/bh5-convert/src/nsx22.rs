//! Continuous-format revision 2.2 ("NEURALCD") decoding and conversion.
//!
//! Revision 2.2 adds per-channel extended headers (label, connector,
//! ranges, filters) and organizes sample data in segments, each prefixed
//! by a data header carrying a starting timestamp and a declared sample
//! count. Multiple segments represent a paused-and-resumed recording;
//! every segment gets its own per-channel stream stamped with an
//! `Offset` attribute so consumers can reconstruct absolute time.

use std::io::{Cursor, Read, Seek, SeekFrom};

use byteorder::{LittleEndian, ReadBytesExt};

use bh5_format::Bh5Writer;

use crate::convert::ConversionReport;
use crate::descriptor::{
    acq_time_string, ChannelDescriptor, ChannelExtDescriptor, FilterSpec, RootMetadata,
    SignalRangeDescriptor, CHUNK_SIZE_CONTINUOUS, MAX_ANALOG_CHANNELS,
};
use crate::error::{ConvertError, Result};
use crate::schema::{build_nsx22_schema, continuous_layout, numbered};
use crate::source::{fixed_str, read_full};

/// Size of the fixed file header in bytes.
pub const NSX22_HEADER_SIZE: usize = 314;

/// Size of one per-channel extended header in bytes.
pub const NSX22_EXT_HEADER_SIZE: usize = 66;

/// Size of one data-segment header in bytes.
pub const NSX22_DATA_HEADER_SIZE: usize = 9;

/// Expected tag of every per-channel extended header.
const EXT_HEADER_TAG: &[u8; 2] = b"CC";

/// The fixed 2.2 file header.
#[derive(Debug, Clone)]
pub struct Nsx22Header {
    pub rev_major: u8,
    pub rev_minor: u8,
    /// File offset of the first data-segment header.
    pub bytes_in_headers: u32,
    pub label: String,
    pub comment: String,
    pub period: u32,
    pub resolution_hz: u32,
    /// {year, month, weekday, day, hour, minute, second, millisecond}
    pub acq_time: [u16; 8],
    pub channel_count: u32,
}

impl Nsx22Header {
    pub fn parse<R: Read + Seek>(r: &mut R) -> Result<Self> {
        r.seek(SeekFrom::Start(0))?;
        let mut block = [0u8; NSX22_HEADER_SIZE];
        if read_full(r, &mut block)? != NSX22_HEADER_SIZE {
            return Err(ConvertError::TruncatedHeader);
        }

        let mut c = Cursor::new(&block[8..]);
        let rev_major = c.read_u8()?;
        let rev_minor = c.read_u8()?;
        let bytes_in_headers = c.read_u32::<LittleEndian>()?;
        let label = fixed_str(&block[14..30]);
        let comment = fixed_str(&block[30..286]);
        c.seek(SeekFrom::Start(278))?; // 286 - 8, past label and comment
        let period = c.read_u32::<LittleEndian>()?;
        let resolution_hz = c.read_u32::<LittleEndian>()?;
        let mut acq_time = [0u16; 8];
        for v in &mut acq_time {
            *v = c.read_u16::<LittleEndian>()?;
        }
        let channel_count = c.read_u32::<LittleEndian>()?;

        Ok(Self {
            rev_major,
            rev_minor,
            bytes_in_headers,
            label,
            comment,
            period: period.max(1),
            resolution_hz,
            acq_time,
            channel_count,
        })
    }
}

/// One declared continuous channel.
#[derive(Debug, Clone)]
pub struct Nsx22Channel {
    pub chan: ChannelDescriptor,
    pub ext: ChannelExtDescriptor,
    pub range: SignalRangeDescriptor,
}

/// A decoded 2.2 session: header plus channels in the file's interleave
/// order.
pub struct Nsx22Session {
    pub header: Nsx22Header,
    pub root: RootMetadata,
    pub channels: Vec<Nsx22Channel>,
}

/// Multiplier turning an analog range in the declared unit into
/// nanovolts. Unrecognized units are treated as microvolts.
fn unit_multiplier(unit: &str, channel: u16) -> i64 {
    match unit {
        "uV" => 1_000,
        "mV" => 1_000_000,
        "V" => 1_000_000_000,
        other => {
            tracing::warn!(channel, unit = other, "Unknown analog unit, uV used");
            1_000
        }
    }
}

/// Decode the fixed header and the per-channel extended headers.
pub fn decode_nsx22<R: Read + Seek>(r: &mut R) -> Result<Nsx22Session> {
    let header = Nsx22Header::parse(r)?;
    if header.channel_count > u32::from(MAX_ANALOG_CHANNELS) {
        return Err(ConvertError::TooManyChannels {
            got: header.channel_count,
            max: MAX_ANALOG_CHANNELS,
        });
    }

    let mut channels = Vec::with_capacity(header.channel_count as usize);
    let mut block = [0u8; NSX22_EXT_HEADER_SIZE];
    for _ in 0..header.channel_count {
        if read_full(r, &mut block)? != NSX22_EXT_HEADER_SIZE {
            return Err(ConvertError::TruncatedHeader);
        }
        if &block[..2] != EXT_HEADER_TAG {
            return Err(ConvertError::BadExtendedHeaderTag {
                expected: fixed_str(EXT_HEADER_TAG),
                got: fixed_str(&block[..2]),
            });
        }

        let mut c = Cursor::new(&block[2..]);
        let id = c.read_u16::<LittleEndian>()?;
        if id == 0 || id > MAX_ANALOG_CHANNELS {
            return Err(ConvertError::InvalidChannelId { id });
        }
        let label = fixed_str(&block[4..20]);
        c.seek(SeekFrom::Start(18))?; // 20 - 2, past the label
        let connector = c.read_u8()?;
        let pin = c.read_u8()?;
        let dig_min = c.read_i16::<LittleEndian>()?;
        let dig_max = c.read_i16::<LittleEndian>()?;
        let ana_min = c.read_i16::<LittleEndian>()?;
        let ana_max = c.read_i16::<LittleEndian>()?;
        let unit = fixed_str(&block[30..46]);
        c.seek(SeekFrom::Start(44))?; // 46 - 2, past the unit
        let filter = FilterSpec {
            hp_freq: c.read_u32::<LittleEndian>()?,
            hp_order: c.read_u32::<LittleEndian>()?,
            hp_type: c.read_u16::<LittleEndian>()?,
            lp_freq: c.read_u32::<LittleEndian>()?,
            lp_order: c.read_u32::<LittleEndian>()?,
            lp_type: c.read_u16::<LittleEndian>()?,
        };

        let ana_range = i64::from(ana_max) - i64::from(ana_min);
        let dig_range = i64::from(dig_max) - i64::from(dig_min);
        let digital_factor = if dig_range == 0 {
            tracing::warn!(channel = id, "Zero digital range, factor unset");
            0
        } else {
            ((ana_range * unit_multiplier(&unit, id)) / dig_range) as u32
        };

        channels.push(Nsx22Channel {
            chan: ChannelDescriptor {
                id,
                clock_hz: header.resolution_hz as f32,
                sample_rate_hz: header.resolution_hz as f32 / header.period as f32,
                sample_bits: 16,
            },
            ext: ChannelExtDescriptor {
                label,
                connector,
                pin,
                digital_factor,
                filter,
            },
            range: SignalRangeDescriptor {
                dig_min,
                dig_max,
                ana_min,
                ana_max,
                unit,
            },
        });
    }

    let root = RootMetadata {
        major_version: 1,
        application: header.label.clone(),
        comment: header.comment.clone(),
        acquisition_time: acq_time_string(&header.acq_time),
    };

    Ok(Nsx22Session {
        header,
        root,
        channels,
    })
}

/// One parsed data-segment header.
#[derive(Debug, Clone, Copy)]
struct SegmentHeader {
    tag: u8,
    timestamp: u32,
    datapoints: u32,
}

fn parse_segment_header(block: &[u8; NSX22_DATA_HEADER_SIZE]) -> SegmentHeader {
    SegmentHeader {
        tag: block[0],
        timestamp: u32::from_le_bytes([block[1], block[2], block[3], block[4]]),
        datapoints: u32::from_le_bytes([block[5], block[6], block[7], block[8]]),
    }
}

/// Convert a 2.2 source into the destination container.
///
/// A malformed segment header aborts further segment processing but
/// leaves everything already written valid; a short read mid-segment
/// truncates only that segment.
pub fn convert_nsx22<R: Read + Seek>(r: &mut R, writer: &mut Bh5Writer) -> Result<ConversionReport> {
    let session = decode_nsx22(r)?;
    tracing::info!(
        channels = session.channels.len(),
        resolution_hz = session.header.resolution_hz,
        period = session.header.period,
        "Decoded continuous 2.2 session header"
    );

    let groups = build_nsx22_schema(writer, &session)?;
    let channels = session.channels.len();
    let tuple_bytes = channels * 2;

    r.seek(SeekFrom::Start(u64::from(session.header.bytes_in_headers)))?;
    let mut header_block = [0u8; NSX22_DATA_HEADER_SIZE];
    if read_full(r, &mut header_block)? != NSX22_DATA_HEADER_SIZE {
        return Err(ConvertError::MissingDataHeader);
    }

    let mut report = ConversionReport::default();
    let mut set_count = 0u32;
    loop {
        let segment = parse_segment_header(&header_block);
        if segment.tag != 1 {
            tracing::warn!(tag = segment.tag, "Invalid data header in source file");
            break;
        }

        // Open this segment's per-channel streams. The first segment
        // reuses the base stream name, later ones get a unique suffix.
        let mut streams = Vec::with_capacity(channels);
        for &group in &groups {
            let name = if set_count == 0 {
                "continuous_set".to_string()
            } else {
                numbered("continuous_set", set_count)
            };
            let stream =
                writer.create_stream(group, &name, continuous_layout(), CHUNK_SIZE_CONTINUOUS)?;
            writer.set_stream_attr(stream, "Offset", &segment.timestamp)?;
            streams.push(stream);
        }
        tracing::debug!(
            segment = set_count,
            offset = segment.timestamp,
            datapoints = segment.datapoints,
            "Started data segment"
        );

        let mut tuple = vec![0u8; tuple_bytes];
        let mut chunks: Vec<Vec<u8>> =
            vec![Vec::with_capacity(CHUNK_SIZE_CONTINUOUS as usize * 2); channels];
        let mut buffered = 0u32;
        for _ in 0..segment.datapoints {
            let n = read_full(r, &mut tuple)?;
            if n < tuple_bytes {
                tracing::warn!(
                    segment = set_count,
                    "Fewer data points than the data header declared"
                );
                break;
            }
            for (chunk, sample) in chunks.iter_mut().zip(tuple.chunks_exact(2)) {
                chunk.extend_from_slice(sample);
            }
            buffered += 1;
            if buffered == CHUNK_SIZE_CONTINUOUS {
                for (stream, chunk) in streams.iter().zip(chunks.iter_mut()) {
                    writer.append(*stream, chunk, buffered)?;
                    chunk.clear();
                }
                report.records += u64::from(buffered) * channels as u64;
                buffered = 0;
            }
        }
        if buffered > 0 {
            for (stream, chunk) in streams.iter().zip(chunks.iter_mut()) {
                writer.append(*stream, chunk, buffered)?;
                chunk.clear();
            }
            report.records += u64::from(buffered) * channels as u64;
        }

        // Close this segment's streams so the next segment starts clean.
        for stream in streams {
            writer.close_stream(stream)?;
        }
        set_count += 1;
        report.segments = set_count;

        let n = read_full(r, &mut header_block)?;
        if n == 0 {
            break;
        }
        if n < NSX22_DATA_HEADER_SIZE {
            tracing::warn!(got = n, "Truncated data header at end of source dropped");
            break;
        }
    }

    tracing::info!(
        segments = report.segments,
        records = report.records,
        "Continuous 2.2 conversion finished"
    );
    Ok(report)
}
