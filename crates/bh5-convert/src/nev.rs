//! Event-format ("NEV") decoding and conversion.
//!
//! A NEV file is a 336-byte fixed header, a run of 32-byte tagged
//! extended headers describing channels, digital lines, video tracking
//! and synchronization, followed by fixed-size data packets until end of
//! file. Each packet carries a packet id selecting its category; the
//! router classifies every packet once and appends it to the matching
//! destination stream, lazily creating streams the header never declared.

use std::collections::BTreeMap;
use std::io::{Cursor, Read, Seek, SeekFrom};

use byteorder::{LittleEndian, ReadBytesExt};

use bh5_format::{Bh5Writer, GroupId, StreamId};

use crate::convert::ConversionReport;
use crate::descriptor::{
    acq_time_string, ChannelDescriptor, ChannelExtDescriptor, DigitalLineDescriptor, FilterSpec,
    RootMetadata, SpikeSortDescriptor, SynchDescriptor, TrackingDescriptor, CHUNK_SIZE_EVENT,
    DIGITAL_INPUT_CHANNEL_ID, MAX_ANALOG_CHANNELS, MAX_TRACK_OBJECTS, SERIAL_CHANNEL_ID,
    SPIKE_CHANNEL_CEILING,
};
use crate::error::{ConvertError, Result};
use crate::schema::{
    build_nev_schema, comment_layout, default_tracking_slot, digital_layout, numbered,
    spike_layout, synch_layout, NevSchema, TrackingSlot,
};
use crate::source::{fixed_str, read_full};

/// Size of the fixed file header in bytes.
pub const NEV_HEADER_SIZE: usize = 336;

/// Size of one extended header record in bytes.
pub const NEV_EXT_HEADER_SIZE: usize = 32;

/// Offset of the waveform (or packet-specific payload) within a packet.
const PACKET_PAYLOAD_OFFSET: usize = 8;

/// The fixed NEV file header.
#[derive(Debug, Clone)]
pub struct NevHeader {
    pub rev_major: u8,
    pub rev_minor: u8,
    pub flags: u16,
    /// File offset of the first data packet.
    pub bytes_in_headers: u32,
    pub bytes_per_packet: u32,
    pub timestamp_clock_hz: u32,
    pub sample_clock_hz: u32,
    /// {year, month, weekday, day, hour, minute, second, millisecond}
    pub acq_time: [u16; 8],
    pub application: String,
    pub comment: String,
    pub ext_header_count: u32,
}

impl NevHeader {
    /// Flat file revision, e.g. 23 for 2.3.
    pub fn revision(&self) -> u32 {
        u32::from(self.rev_major) * 10 + u32::from(self.rev_minor)
    }

    /// Parse the fixed header from the start of the source.
    pub fn parse<R: Read + Seek>(r: &mut R) -> Result<Self> {
        r.seek(SeekFrom::Start(0))?;
        let mut block = [0u8; NEV_HEADER_SIZE];
        if read_full(r, &mut block)? != NEV_HEADER_SIZE {
            return Err(ConvertError::TruncatedHeader);
        }

        let mut c = Cursor::new(&block[8..]); // past the magic token
        let rev_major = c.read_u8()?;
        let rev_minor = c.read_u8()?;
        let flags = c.read_u16::<LittleEndian>()?;
        let bytes_in_headers = c.read_u32::<LittleEndian>()?;
        let bytes_per_packet = c.read_u32::<LittleEndian>()?;
        let timestamp_clock_hz = c.read_u32::<LittleEndian>()?;
        let sample_clock_hz = c.read_u32::<LittleEndian>()?;
        let mut acq_time = [0u16; 8];
        for v in &mut acq_time {
            *v = c.read_u16::<LittleEndian>()?;
        }
        let mut application = [0u8; 32];
        c.read_exact(&mut application)?;
        let mut comment = [0u8; 256];
        c.read_exact(&mut comment)?;
        let ext_header_count = c.read_u32::<LittleEndian>()?;

        if bytes_per_packet < PACKET_PAYLOAD_OFFSET as u32 {
            return Err(ConvertError::TruncatedHeader);
        }

        Ok(Self {
            rev_major,
            rev_minor,
            flags,
            bytes_in_headers,
            bytes_per_packet,
            timestamp_clock_hz,
            sample_clock_hz,
            acq_time,
            application: fixed_str(&application),
            comment: fixed_str(&comment),
            ext_header_count,
        })
    }
}

/// One decoded extended header.
#[derive(Debug, Clone)]
pub enum NevExtHeader {
    /// `NEUEVWAV` — declares a spike channel and its waveform spec.
    Waveform {
        id: u16,
        connector: u8,
        pin: u8,
        digital_factor: u16,
        energy_threshold: u16,
        high_threshold: i16,
        low_threshold: i16,
        sorted_count: u8,
        wave_bytes: u8,
        wave_samples: u16,
    },
    /// `NEUEVLBL` — channel label.
    Label { id: u16, label: String },
    /// `NEUEVFLT` — channel filter spec.
    Filter { id: u16, filter: FilterSpec },
    /// `VIDEOSYN` — video synchronization source.
    VideoSynch { id: u16, label: String, fps: f32 },
    /// `TRACKOBJ` — trackable object declaration.
    TrackableObject {
        kind: u16,
        track_id: u16,
        max_points: u16,
        label: String,
    },
    /// `DIGLABEL` — digital-input or serial line label.
    DigitalLabel { mode: u8, label: String },
    /// `MAPFILE` — electrode map file reference.
    MapFile { path: String },
    /// Anything else: reported and skipped.
    Unknown { tag: String },
}

impl NevExtHeader {
    /// Decode one 32-byte extended header block.
    pub fn parse(block: &[u8; NEV_EXT_HEADER_SIZE]) -> Result<Self> {
        let tag = &block[..8];
        let body = &block[8..];
        let mut c = Cursor::new(body);
        Ok(match tag {
            b"NEUEVWAV" => NevExtHeader::Waveform {
                id: c.read_u16::<LittleEndian>()?,
                connector: c.read_u8()?,
                pin: c.read_u8()?,
                digital_factor: c.read_u16::<LittleEndian>()?,
                energy_threshold: c.read_u16::<LittleEndian>()?,
                high_threshold: c.read_i16::<LittleEndian>()?,
                low_threshold: c.read_i16::<LittleEndian>()?,
                sorted_count: c.read_u8()?,
                wave_bytes: c.read_u8()?,
                wave_samples: c.read_u16::<LittleEndian>()?,
            },
            b"NEUEVLBL" => NevExtHeader::Label {
                id: c.read_u16::<LittleEndian>()?,
                label: fixed_str(&body[2..18]),
            },
            b"NEUEVFLT" => NevExtHeader::Filter {
                id: c.read_u16::<LittleEndian>()?,
                filter: FilterSpec {
                    hp_freq: c.read_u32::<LittleEndian>()?,
                    hp_order: c.read_u32::<LittleEndian>()?,
                    hp_type: c.read_u16::<LittleEndian>()?,
                    lp_freq: c.read_u32::<LittleEndian>()?,
                    lp_order: c.read_u32::<LittleEndian>()?,
                    lp_type: c.read_u16::<LittleEndian>()?,
                },
            },
            b"VIDEOSYN" => {
                let id = c.read_u16::<LittleEndian>()?;
                let label = fixed_str(&body[2..18]);
                c.seek(SeekFrom::Start(18))?;
                let fps = c.read_f32::<LittleEndian>()?;
                NevExtHeader::VideoSynch { id, label, fps }
            }
            b"TRACKOBJ" => NevExtHeader::TrackableObject {
                kind: c.read_u16::<LittleEndian>()?,
                track_id: c.read_u16::<LittleEndian>()?,
                max_points: c.read_u16::<LittleEndian>()?,
                label: fixed_str(&body[6..22]),
            },
            b"DIGLABEL" => NevExtHeader::DigitalLabel {
                label: fixed_str(&body[..16]),
                mode: body[16],
            },
            b"MAPFILE\0" => NevExtHeader::MapFile {
                path: fixed_str(body),
            },
            _ => NevExtHeader::Unknown {
                tag: fixed_str(tag),
            },
        })
    }
}

/// Per-channel state accumulated across extended headers. A channel is
/// only declared once its waveform spec has been seen; labels and filters
/// alone do not create one.
#[derive(Debug, Clone, Default)]
pub struct NevChannelEntry {
    pub chan: Option<ChannelDescriptor>,
    pub ext: ChannelExtDescriptor,
    pub sort: SpikeSortDescriptor,
}

/// A fully decoded event-session header.
pub struct NevSession {
    pub header: NevHeader,
    pub root: RootMetadata,
    /// Waveform samples per spike record.
    pub spike_len: u16,
    /// By 1-based channel id.
    pub channels: BTreeMap<u16, NevChannelEntry>,
    /// `[digital-input, serial]`
    pub digital_lines: [Option<DigitalLineDescriptor>; 2],
    pub synch: Option<SynchDescriptor>,
    /// By 0-based trackable node id.
    pub tracking: BTreeMap<u16, TrackingDescriptor>,
    pub map_file: Option<String>,
}

/// Decode the fixed and extended headers into the canonical descriptor
/// model.
pub fn decode_nev<R: Read + Seek>(r: &mut R) -> Result<NevSession> {
    let header = NevHeader::parse(r)?;

    // Spikes fill the packet unless a waveform spec narrows them.
    let mut spike_len = ((header.bytes_per_packet - PACKET_PAYLOAD_OFFSET as u32) / 2) as u16;

    let mut channels: BTreeMap<u16, NevChannelEntry> = BTreeMap::new();
    let mut digital_lines = [None, None];
    let mut synch = None;
    let mut tracking = BTreeMap::new();
    let mut map_file = None;

    let mut block = [0u8; NEV_EXT_HEADER_SIZE];
    for _ in 0..header.ext_header_count {
        if read_full(r, &mut block)? != NEV_EXT_HEADER_SIZE {
            return Err(ConvertError::TruncatedHeader);
        }
        match NevExtHeader::parse(&block)? {
            NevExtHeader::Waveform {
                id,
                connector,
                pin,
                digital_factor,
                energy_threshold,
                high_threshold,
                low_threshold,
                sorted_count,
                wave_bytes,
                wave_samples,
            } => {
                check_channel_id(id)?;
                if wave_samples != 0 {
                    spike_len = wave_samples;
                }
                let entry = channels.entry(id).or_default();
                entry.chan = Some(ChannelDescriptor {
                    id,
                    // Spikes are sampled at the timestamp clock rate.
                    clock_hz: header.timestamp_clock_hz as f32,
                    sample_rate_hz: header.sample_clock_hz as f32,
                    sample_bits: u16::from(wave_bytes) * 8,
                });
                entry.ext.connector = connector;
                entry.ext.pin = pin;
                entry.ext.digital_factor = u32::from(digital_factor);
                entry.sort = SpikeSortDescriptor {
                    energy_threshold,
                    high_threshold,
                    low_threshold,
                    sorted_count,
                };
            }
            NevExtHeader::Label { id, label } => {
                check_channel_id(id)?;
                channels.entry(id).or_default().ext.label = label;
            }
            NevExtHeader::Filter { id, filter } => {
                check_channel_id(id)?;
                channels.entry(id).or_default().ext.filter = filter;
            }
            NevExtHeader::VideoSynch { id, label, fps } => {
                synch = Some(SynchDescriptor { id, fps, label });
            }
            NevExtHeader::TrackableObject {
                kind,
                track_id,
                max_points,
                label,
            } => {
                if track_id == 0 || track_id > MAX_TRACK_OBJECTS {
                    return Err(ConvertError::InvalidTrackableId { id: track_id });
                }
                tracking.insert(
                    track_id - 1,
                    TrackingDescriptor {
                        kind,
                        track_id,
                        max_points,
                        label,
                    },
                );
            }
            NevExtHeader::DigitalLabel { mode, label } => match mode {
                0 => {
                    digital_lines[1] = Some(DigitalLineDescriptor {
                        id: SERIAL_CHANNEL_ID,
                        label,
                    });
                }
                1 => {
                    digital_lines[0] = Some(DigitalLineDescriptor {
                        id: DIGITAL_INPUT_CHANNEL_ID,
                        label,
                    });
                }
                _ => return Err(ConvertError::InvalidDigitalMode { mode }),
            },
            NevExtHeader::MapFile { path } => map_file = Some(path),
            NevExtHeader::Unknown { tag } => {
                tracing::warn!(tag = %tag, "Unknown extended header in the source file");
            }
        }
    }

    let root = RootMetadata {
        major_version: 1,
        application: header.application.clone(),
        comment: header.comment.clone(),
        acquisition_time: acq_time_string(&header.acq_time),
    };

    Ok(NevSession {
        header,
        root,
        spike_len,
        channels,
        digital_lines,
        synch,
        tracking,
        map_file,
    })
}

fn check_channel_id(id: u16) -> Result<()> {
    if id == 0 || id > MAX_ANALOG_CHANNELS {
        return Err(ConvertError::InvalidChannelId { id });
    }
    Ok(())
}

// ---------------------------------------------------------------
// Packet classification
// ---------------------------------------------------------------

/// One classified data packet. Payload slices borrow from the read
/// buffer; fields beyond a short packet read as zero.
#[derive(Debug)]
enum NevPacket<'a> {
    Spike { channel: u16 },
    Digital { reason: u8, value: u16 },
    Comment {
        charset: u8,
        flags: u8,
        data: u32,
        text: &'a [u8],
    },
    Synch {
        id: u16,
        split: u16,
        frame: u32,
        elapsed: u32,
    },
    Tracking {
        parent: u16,
        node: u16,
        node_count: u16,
        word_count: u16,
        words: &'a [u8],
    },
    UnexpectedSpike { id: u16 },
    Unknown { id: u16 },
}

fn le_u16(buf: &[u8], at: usize) -> u16 {
    let mut v = [0u8; 2];
    if let Some(s) = buf.get(at..at + 2) {
        v.copy_from_slice(s);
    }
    u16::from_le_bytes(v)
}

fn le_u32(buf: &[u8], at: usize) -> u32 {
    let mut v = [0u8; 4];
    if let Some(s) = buf.get(at..at + 4) {
        v.copy_from_slice(s);
    }
    u32::from_le_bytes(v)
}

fn classify(buf: &[u8]) -> (u32, NevPacket<'_>) {
    let timestamp = le_u32(buf, 0);
    let id = le_u16(buf, 4);
    let packet = match id {
        1..=MAX_ANALOG_CHANNELS => NevPacket::Spike { channel: id },
        0 => NevPacket::Digital {
            reason: buf.get(6).copied().unwrap_or(0),
            value: le_u16(buf, 8),
        },
        0xFFFF => {
            let text = buf.get(12..).unwrap_or(&[]);
            let end = text.iter().position(|&b| b == 0).unwrap_or(text.len());
            NevPacket::Comment {
                charset: buf.get(6).copied().unwrap_or(0),
                flags: buf.get(7).copied().unwrap_or(0),
                data: le_u32(buf, 8),
                text: &text[..end],
            }
        }
        0xFFFE => NevPacket::Synch {
            id: le_u16(buf, 6),
            split: le_u16(buf, 8),
            frame: le_u32(buf, 10),
            elapsed: le_u32(buf, 14),
        },
        0xFFFD => NevPacket::Tracking {
            parent: le_u16(buf, 6),
            node: le_u16(buf, 8),
            node_count: le_u16(buf, 10),
            word_count: le_u16(buf, 12),
            words: buf.get(14..).unwrap_or(&[]),
        },
        id if id <= SPIKE_CHANNEL_CEILING => NevPacket::UnexpectedSpike { id },
        id => NevPacket::Unknown { id },
    };
    (timestamp, packet)
}

// ---------------------------------------------------------------
// Record encoding
// ---------------------------------------------------------------

fn encode_spike(timestamp: u32, unit: u8, res: u8, wave: &[u8], spike_len: u16) -> Vec<u8> {
    let wave_bytes = usize::from(spike_len) * 2;
    let mut out = Vec::with_capacity(6 + wave_bytes);
    out.extend_from_slice(&timestamp.to_le_bytes());
    out.push(unit);
    out.push(res);
    let take = wave.len().min(wave_bytes);
    out.extend_from_slice(&wave[..take]);
    out.resize(6 + wave_bytes, 0);
    out
}

fn encode_digital(timestamp: u32, value: u16) -> Vec<u8> {
    let mut out = Vec::with_capacity(6);
    out.extend_from_slice(&timestamp.to_le_bytes());
    out.extend_from_slice(&value.to_le_bytes());
    out
}

fn encode_comment(timestamp: u32, charset: u8, flags: u8, data: u32, text: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(12 + text.len());
    out.extend_from_slice(&timestamp.to_le_bytes());
    out.push(charset);
    out.push(flags);
    out.extend_from_slice(&data.to_le_bytes());
    out.extend_from_slice(&(text.len() as u16).to_le_bytes());
    out.extend_from_slice(text);
    out
}

fn encode_synch(timestamp: u32, split: u16, frame: u32, elapsed: u32) -> Vec<u8> {
    let mut out = Vec::with_capacity(14);
    out.extend_from_slice(&timestamp.to_le_bytes());
    out.extend_from_slice(&split.to_le_bytes());
    out.extend_from_slice(&frame.to_le_bytes());
    out.extend_from_slice(&elapsed.to_le_bytes());
    out
}

fn encode_tracking(
    timestamp: u32,
    parent: u16,
    node_count: u16,
    word_count: u16,
    words: &[u8],
    slot: &TrackingSlot,
) -> Vec<u8> {
    let mut out = Vec::with_capacity(8 + words.len().min(512));
    out.extend_from_slice(&timestamp.to_le_bytes());
    out.extend_from_slice(&parent.to_le_bytes());
    out.extend_from_slice(&node_count.to_le_bytes());
    if slot.fixed {
        // Single coordinate tuple, zero-filled if the packet is short.
        let take = words.len().min(usize::from(slot.point_bytes));
        out.extend_from_slice(&words[..take]);
        out.resize(8 + usize::from(slot.point_bytes), 0);
    } else {
        let count = usize::from(word_count).min(words.len() / 2);
        out.extend_from_slice(&(count as u16).to_le_bytes());
        out.extend_from_slice(&words[..count * 2]);
    }
    out
}

// ---------------------------------------------------------------
// Router
// ---------------------------------------------------------------

/// Lazily resolved destination streams, keyed by logical stream key.
/// Spike entries start out pre-declared by the schema builder.
struct NevStreams {
    spikes: BTreeMap<u16, StreamId>,
    digital: Option<StreamId>,
    serial: Option<StreamId>,
    synch: Option<StreamId>,
    comments: BTreeMap<u8, StreamId>,
    tracking: BTreeMap<u16, StreamId>,
}

/// Convert a NEV source into the destination container.
pub fn convert_nev<R: Read + Seek>(r: &mut R, writer: &mut Bh5Writer) -> Result<ConversionReport> {
    let session = decode_nev(r)?;
    tracing::info!(
        revision = session.header.revision(),
        channels = session.channels.len(),
        spike_len = session.spike_len,
        tracking = session.tracking.len(),
        "Decoded event session header"
    );

    let mut schema = build_nev_schema(writer, &session)?;
    run_router(r, writer, &session, &mut schema)
}

fn run_router<R: Read + Seek>(
    r: &mut R,
    writer: &mut Bh5Writer,
    session: &NevSession,
    schema: &mut NevSchema,
) -> Result<ConversionReport> {
    let mut streams = NevStreams {
        spikes: schema.spike_streams.clone(),
        digital: None,
        serial: None,
        synch: None,
        comments: BTreeMap::new(),
        tracking: BTreeMap::new(),
    };
    let mut report = ConversionReport::default();
    let mut packets_read = 0u64;

    r.seek(SeekFrom::Start(u64::from(session.header.bytes_in_headers)))?;
    let mut buf = vec![0u8; session.header.bytes_per_packet as usize];
    loop {
        let n = read_full(r, &mut buf)?;
        if n == 0 {
            break;
        }
        if n < buf.len() {
            tracing::warn!(got = n, "Truncated packet at end of source dropped");
            break;
        }
        packets_read += 1;

        let (timestamp, packet) = classify(&buf);
        match packet {
            NevPacket::Spike { channel } => {
                let stream = match streams.spikes.get(&channel) {
                    Some(&s) => s,
                    None => {
                        let s = create_spike_stream(writer, schema, channel)?;
                        streams.spikes.insert(channel, s);
                        s
                    }
                };
                let wave = buf.get(PACKET_PAYLOAD_OFFSET..).unwrap_or(&[]);
                let record = encode_spike(timestamp, buf[6], buf[7], wave, schema.spike_len);
                writer.append(stream, &record, 1)?;
                report.records += 1;
            }
            NevPacket::Digital { reason, value } => {
                // Only edge-triggered events exist so far; anything else
                // is an event kind the acquisition system never emits.
                if reason & 1 == 0 {
                    tracing::warn!(reason, "Unknown digital event dropped");
                    report.dropped += 1;
                    continue;
                }
                let serial = reason & 0x80 != 0;
                let stream = match if serial { streams.serial } else { streams.digital } {
                    Some(s) => s,
                    None => {
                        let (group, name) = if serial {
                            (schema.serial_group, "serial_set")
                        } else {
                            (schema.digital_group, "digital_set")
                        };
                        let s = writer.create_stream(group, name, digital_layout(), CHUNK_SIZE_EVENT)?;
                        if serial {
                            streams.serial = Some(s);
                        } else {
                            streams.digital = Some(s);
                        }
                        s
                    }
                };
                writer.append(stream, &encode_digital(timestamp, value), 1)?;
                report.records += 1;
            }
            NevPacket::Comment {
                charset,
                flags,
                data,
                text,
            } => {
                let stream = match streams.comments.get(&charset) {
                    Some(&s) => s,
                    None => {
                        let s = create_comment_stream(writer, schema, charset)?;
                        streams.comments.insert(charset, s);
                        s
                    }
                };
                writer.append(stream, &encode_comment(timestamp, charset, flags, data, text), 1)?;
                report.records += 1;
            }
            NevPacket::Synch {
                id,
                split,
                frame,
                elapsed,
            } => {
                if id != 0 {
                    tracing::warn!(id, "Unsupported synchronization source dropped");
                    report.dropped += 1;
                    continue;
                }
                let stream = match streams.synch {
                    Some(s) => s,
                    None => {
                        let s = create_synch_stream(writer, schema, id)?;
                        streams.synch = Some(s);
                        s
                    }
                };
                writer.append(stream, &encode_synch(timestamp, split, frame, elapsed), 1)?;
                report.records += 1;
            }
            NevPacket::Tracking {
                parent,
                node,
                node_count,
                word_count,
                words,
            } => {
                if node >= MAX_TRACK_OBJECTS {
                    tracing::warn!(node, "Invalid tracking packet dropped");
                    report.dropped += 1;
                    continue;
                }
                let stream = match streams.tracking.get(&node) {
                    Some(&s) => s,
                    None => {
                        let s = create_tracking_stream(writer, schema, node)?;
                        streams.tracking.insert(node, s);
                        s
                    }
                };
                let slot = &schema.tracking_slots[&node];
                let record = encode_tracking(timestamp, parent, node_count, word_count, words, slot);
                writer.append(stream, &record, 1)?;
                report.records += 1;
            }
            NevPacket::UnexpectedSpike { id } => {
                tracing::warn!(id, "Unexpected spike channel dropped");
                report.dropped += 1;
            }
            NevPacket::Unknown { id } => {
                tracing::warn!(id, "Unknown packet type dropped");
                report.dropped += 1;
            }
        }
    }

    if packets_read == 0 {
        return Err(ConvertError::EmptyData);
    }
    tracing::info!(
        records = report.records,
        dropped = report.dropped,
        "Event conversion finished"
    );
    Ok(report)
}

// ---------------------------------------------------------------
// Lazy stream resolution
// ---------------------------------------------------------------

/// Spike stream for a channel the header never declared.
fn create_spike_stream(
    writer: &mut Bh5Writer,
    schema: &mut NevSchema,
    channel: u16,
) -> Result<StreamId> {
    let group = match schema.channel_groups.get(&channel) {
        Some(&g) => g,
        None => {
            let name = numbered("channel", u32::from(channel));
            tracing::warn!(name = %name, "Creating channel group without attributes");
            let g = writer.create_group(schema.channel_container, &name)?;
            schema.channel_groups.insert(channel, g);
            g
        }
    };
    Ok(writer.create_stream(group, "spike_set", spike_layout(schema.spike_len), CHUNK_SIZE_EVENT)?)
}

fn create_comment_stream(
    writer: &mut Bh5Writer,
    schema: &mut NevSchema,
    charset: u8,
) -> Result<StreamId> {
    let container = match schema.comment_container {
        Some(g) => g,
        None => {
            tracing::warn!("Creating comment container for a pre-2.3 source");
            let g = writer.create_group(GroupId::ROOT, "comment")?;
            schema.comment_container = Some(g);
            g
        }
    };
    let group = match schema.comment_groups.get(&charset) {
        Some(&g) => g,
        None => {
            let g = writer.create_group(container, &numbered("comment", u32::from(charset) + 1))?;
            writer.set_group_attr(g, "Charset", &charset)?;
            tracing::debug!(charset, "Created comment group on first use");
            schema.comment_groups.insert(charset, g);
            g
        }
    };
    Ok(writer.create_stream(group, "comment_set", comment_layout(), CHUNK_SIZE_EVENT)?)
}

fn create_synch_stream(
    writer: &mut Bh5Writer,
    schema: &mut NevSchema,
    id: u16,
) -> Result<StreamId> {
    let video = resolve_video_group(writer, schema)?;
    let group = match schema.synch_groups.get(&id) {
        Some(&g) => g,
        None => {
            let name = numbered("synch", u32::from(id) + 1);
            tracing::warn!(name = %name, "Creating synchronization group without attributes");
            let g = writer.create_group(video, &name)?;
            schema.synch_groups.insert(id, g);
            g
        }
    };
    Ok(writer.create_stream(group, "synch_set", synch_layout(), CHUNK_SIZE_EVENT)?)
}

fn create_tracking_stream(
    writer: &mut Bh5Writer,
    schema: &mut NevSchema,
    node: u16,
) -> Result<StreamId> {
    let video = resolve_video_group(writer, schema)?;
    let group = match schema.tracking_groups.get(&node) {
        Some(&g) => g,
        None => {
            let name = numbered("tracking", u32::from(node) + 1);
            tracing::warn!(name = %name, "Creating tracking group without attributes");
            let g = writer.create_group(video, &name)?;
            schema.tracking_groups.insert(node, g);
            g
        }
    };
    if !schema.tracking_slots.contains_key(&node) {
        tracing::warn!(node, "Creating tracking set with undeclared layout");
        schema.tracking_slots.insert(node, default_tracking_slot());
    }
    let layout = schema.tracking_slots[&node].layout.clone();
    Ok(writer.create_stream(group, "tracking_set", layout, CHUNK_SIZE_EVENT)?)
}

fn resolve_video_group(writer: &mut Bh5Writer, schema: &mut NevSchema) -> Result<GroupId> {
    match schema.video_group {
        Some(g) => Ok(g),
        None => {
            tracing::warn!("Creating video container for a pre-2.3 source");
            let g = writer.create_group(GroupId::ROOT, "video")?;
            schema.video_group = Some(g);
            Ok(g)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::descriptor::TrackingKind;
    use crate::schema::tracking_slot;

    /// Build a raw packet: timestamp + packet id + payload, zero-padded
    /// to `size` bytes.
    fn packet(size: usize, timestamp: u32, id: u16, payload: &[u8]) -> Vec<u8> {
        let mut buf = Vec::with_capacity(size);
        buf.extend_from_slice(&timestamp.to_le_bytes());
        buf.extend_from_slice(&id.to_le_bytes());
        buf.extend_from_slice(payload);
        buf.resize(size, 0);
        buf
    }

    #[test]
    fn classify_spike_and_thresholds() {
        let b0 = packet(104, 5, 1, &[]);
        let (ts, p) = classify(&b0);
        assert_eq!(ts, 5);
        assert!(matches!(p, NevPacket::Spike { channel: 1 }));

        let b1 = packet(104, 0, MAX_ANALOG_CHANNELS, &[]);
        let (_, p) = classify(&b1);
        assert!(matches!(p, NevPacket::Spike { .. }));

        let b2 = packet(104, 0, MAX_ANALOG_CHANNELS + 1, &[]);
        let (_, p) = classify(&b2);
        assert!(matches!(p, NevPacket::UnexpectedSpike { .. }));

        let b3 = packet(104, 0, SPIKE_CHANNEL_CEILING + 1, &[]);
        let (_, p) = classify(&b3);
        assert!(matches!(p, NevPacket::Unknown { .. }));
    }

    #[test]
    fn classify_comment_trims_text_at_nul() {
        let mut payload = Vec::new();
        payload.push(3u8); // charset
        payload.push(1u8); // flags
        payload.extend_from_slice(&9u32.to_le_bytes()); // data
        payload.extend_from_slice(b"note\0garbage");
        let buf = packet(104, 77, 0xFFFF, &payload);
        let (ts, p) = classify(&buf);
        assert_eq!(ts, 77);
        match p {
            NevPacket::Comment {
                charset,
                flags,
                data,
                text,
            } => {
                assert_eq!(charset, 3);
                assert_eq!(flags, 1);
                assert_eq!(data, 9);
                assert_eq!(text, b"note");
            }
            other => panic!("expected comment, got {other:?}"),
        }
    }

    #[test]
    fn encode_spike_truncates_and_pads() {
        let wave: Vec<u8> = (0u8..12).collect(); // six 16-bit samples
        // Narrower than the packet: truncate.
        let record = encode_spike(1, 2, 0, &wave, 4);
        assert_eq!(record.len(), 6 + 8);
        assert_eq!(&record[6..], &wave[..8]);
        // Wider than the packet: zero-fill.
        let record = encode_spike(1, 2, 0, &wave, 8);
        assert_eq!(record.len(), 6 + 16);
        assert_eq!(&record[6..18], &wave[..]);
        assert_eq!(&record[18..], &[0u8; 4]);
    }

    #[test]
    fn encode_tracking_fixed_takes_one_tuple() {
        let slot = tracking_slot(TrackingKind::Markers2D, 1);
        assert!(slot.fixed);
        let words = [1u8, 0, 2, 0, 3, 0, 4, 0]; // four coordinate words
        let record = encode_tracking(9, 0, 1, 4, &words, &slot);
        // timestamp + parent + node_count + one 2x2-byte tuple
        assert_eq!(record.len(), 8 + 4);
        assert_eq!(&record[8..], &words[..4]);
    }

    #[test]
    fn encode_tracking_variable_clamps_word_count() {
        let slot = tracking_slot(TrackingKind::Markers2D, 10);
        assert!(!slot.fixed);
        let words = [1u8, 0, 2, 0];
        // Packet promises 50 words but only holds two.
        let record = encode_tracking(9, 0, 1, 50, &words, &slot);
        assert_eq!(&record[8..10], &2u16.to_le_bytes());
        assert_eq!(&record[10..], &words[..]);
    }
}
