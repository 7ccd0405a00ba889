//! Schema construction — builds the destination hierarchy from decoded
//! descriptors before any record data is appended.
//!
//! Group topology (first-level names are contract, sub-group names are
//! discovered via attributes):
//!
//! - `/` root attributes: `MajorVersion`, `Application`, `Comment`,
//!   `AcquisitionTime`, `GroupCount`
//! - `/channel/channel#####` per analog channel, `/channel/digital1`,
//!   `/channel/serial1`
//! - `/video/synch#####`, `/video/tracking#####` (event files ≥ rev 2.3)
//! - `/comment/comment#####` keyed by charset (`##### = charset + 1`)

use std::collections::BTreeMap;

use bh5_format::{Bh5Writer, FieldDef, FieldKind, GroupId, RecordLayout, StreamId};

use crate::descriptor::{
    RootMetadata, TrackingKind, CHUNK_SIZE_CONTINUOUS, CHUNK_SIZE_EVENT,
};
use crate::error::Result;
use crate::nev::NevSession;
use crate::nsx21::Nsx21Session;
use crate::nsx22::Nsx22Session;

/// Charset reserved for video annotation comments.
pub const ANNOTATION_CHARSET: u8 = 255;

// ---------------------------------------------------------------
// Record layouts
// ---------------------------------------------------------------

/// Spike waveform record: the waveform width is fixed per session.
pub fn spike_layout(spike_len: u16) -> RecordLayout {
    RecordLayout::new(vec![
        FieldDef::scalar("timestamp", FieldKind::U32),
        FieldDef::scalar("unit", FieldKind::U8),
        FieldDef::scalar("res", FieldKind::U8),
        FieldDef::new("wave", FieldKind::I16, u32::from(spike_len)),
    ])
}

/// Digital or serial event record.
pub fn digital_layout() -> RecordLayout {
    RecordLayout::new(vec![
        FieldDef::scalar("timestamp", FieldKind::U32),
        FieldDef::scalar("value", FieldKind::U16),
    ])
}

/// Comment record with variable-length text.
pub fn comment_layout() -> RecordLayout {
    RecordLayout::new(vec![
        FieldDef::scalar("timestamp", FieldKind::U32),
        FieldDef::scalar("charset", FieldKind::U8),
        FieldDef::scalar("flags", FieldKind::U8),
        FieldDef::scalar("data", FieldKind::U32),
        FieldDef::new("text", FieldKind::VarString, 0),
    ])
}

/// Video synchronization record.
pub fn synch_layout() -> RecordLayout {
    RecordLayout::new(vec![
        FieldDef::scalar("timestamp", FieldKind::U32),
        FieldDef::scalar("split", FieldKind::U16),
        FieldDef::scalar("frame", FieldKind::U32),
        FieldDef::scalar("elapsed", FieldKind::U32),
    ])
}

/// One continuous voltage sample.
pub fn continuous_layout() -> RecordLayout {
    RecordLayout::new(vec![FieldDef::scalar("sample", FieldKind::I16)])
}

/// A tracking stream's layout plus which record shape the router must
/// encode into it.
#[derive(Debug, Clone)]
pub struct TrackingSlot {
    pub layout: RecordLayout,
    /// Fixed single-point records when true, length-prefixed coordinate
    /// lists otherwise.
    pub fixed: bool,
    /// Bytes of one coordinate tuple (dimensions × coordinate width).
    pub point_bytes: u16,
}

/// Tracking record layout: `max_points == 1` selects the fixed-length
/// single-tuple form, anything else the variable-length form.
pub fn tracking_slot(kind: TrackingKind, max_points: u16) -> TrackingSlot {
    let (dims, width) = kind.point_shape();
    let point_bytes = dims * width;
    let head = vec![
        FieldDef::scalar("timestamp", FieldKind::U32),
        FieldDef::scalar("parent", FieldKind::U16),
        FieldDef::scalar("node_count", FieldKind::U16),
    ];
    if max_points == 1 {
        let mut fields = head;
        fields.push(FieldDef::new("coords", FieldKind::Bytes, u32::from(point_bytes)));
        TrackingSlot {
            layout: RecordLayout::new(fields),
            fixed: true,
            point_bytes,
        }
    } else {
        let mut fields = head;
        fields.push(FieldDef::new("words", FieldKind::VarU16List, 0));
        TrackingSlot {
            layout: RecordLayout::new(fields),
            fixed: false,
            point_bytes,
        }
    }
}

/// Fallback layout for tracking events whose node id was never declared:
/// variable-length two-dimensional 16-bit coordinates.
pub fn default_tracking_slot() -> TrackingSlot {
    tracking_slot(TrackingKind::Undefined, 0)
}

// ---------------------------------------------------------------
// Root metadata
// ---------------------------------------------------------------

/// Write the root metadata attributes. `GroupCount` lets a consumer
/// enumerate additional merged experiments stored as sibling top-level
/// groups.
pub fn write_root(writer: &mut Bh5Writer, root: &RootMetadata) -> Result<()> {
    writer.set_group_attr(GroupId::ROOT, "MajorVersion", &root.major_version)?;
    writer.set_group_attr(GroupId::ROOT, "Application", &root.application)?;
    writer.set_group_attr(GroupId::ROOT, "Comment", &root.comment)?;
    writer.set_group_attr(GroupId::ROOT, "AcquisitionTime", &root.acquisition_time)?;
    writer.set_group_attr(GroupId::ROOT, "GroupCount", &1u32)?;
    Ok(())
}

/// 5-digit 1-based sub-group name, e.g. `channel00042`.
pub(crate) fn numbered(prefix: &str, n: u32) -> String {
    format!("{prefix}{n:05}")
}

// ---------------------------------------------------------------
// NEV schema
// ---------------------------------------------------------------

/// Everything the event router needs: pre-created groups, pre-declared
/// spike streams, and the tracking layout table.
pub struct NevSchema {
    pub channel_container: GroupId,
    /// By 1-based channel id.
    pub channel_groups: BTreeMap<u16, GroupId>,
    /// Pre-declared empty spike streams, by 1-based channel id.
    pub spike_streams: BTreeMap<u16, StreamId>,
    pub digital_group: GroupId,
    pub serial_group: GroupId,
    pub video_group: Option<GroupId>,
    pub comment_container: Option<GroupId>,
    /// Pre-created comment groups, by charset.
    pub comment_groups: BTreeMap<u8, GroupId>,
    /// By 0-based synchronization source id.
    pub synch_groups: BTreeMap<u16, GroupId>,
    /// By 0-based trackable node id.
    pub tracking_groups: BTreeMap<u16, GroupId>,
    /// Layouts declared via the header, by 0-based trackable node id.
    pub tracking_slots: BTreeMap<u16, TrackingSlot>,
    pub spike_len: u16,
}

/// Build the destination hierarchy for an event session.
pub fn build_nev_schema(writer: &mut Bh5Writer, session: &NevSession) -> Result<NevSchema> {
    write_root(writer, &session.root)?;

    let channel_container = writer.create_group(GroupId::ROOT, "channel")?;
    if let Some(map_file) = &session.map_file {
        writer.set_group_attr(channel_container, "MapFile", map_file)?;
    }

    let mut channel_groups = BTreeMap::new();
    let mut spike_streams = BTreeMap::new();
    for (&id, entry) in &session.channels {
        let Some(chan) = &entry.chan else {
            // Label or filter header without a waveform spec: metadata
            // for a channel the session never declared.
            continue;
        };
        let group = writer.create_group(channel_container, &numbered("channel", u32::from(id)))?;
        writer.set_group_attr(group, "Chan", chan)?;
        writer.set_group_attr(group, "ChanExt", &entry.ext)?;
        writer.set_group_attr(group, "SpikeSort", &entry.sort)?;
        let stream = writer.create_stream(
            group,
            "spike_set",
            spike_layout(session.spike_len),
            CHUNK_SIZE_EVENT,
        )?;
        channel_groups.insert(id, group);
        spike_streams.insert(id, stream);
    }

    let digital_group = writer.create_group(channel_container, "digital1")?;
    if let Some(line) = &session.digital_lines[0] {
        writer.set_group_attr(digital_group, "DigChan", line)?;
    }
    let serial_group = writer.create_group(channel_container, "serial1")?;
    if let Some(line) = &session.digital_lines[1] {
        writer.set_group_attr(serial_group, "DigChan", line)?;
    }

    let mut schema = NevSchema {
        channel_container,
        channel_groups,
        spike_streams,
        digital_group,
        serial_group,
        video_group: None,
        comment_container: None,
        comment_groups: BTreeMap::new(),
        synch_groups: BTreeMap::new(),
        tracking_groups: BTreeMap::new(),
        tracking_slots: BTreeMap::new(),
        spike_len: session.spike_len,
    };

    // Video and comment containers exist only from file revision 2.3 on.
    if session.header.revision() < 23 {
        return Ok(schema);
    }

    let video = writer.create_group(GroupId::ROOT, "video")?;
    schema.video_group = Some(video);

    let mut has_video = false;
    if let Some(synch) = &session.synch {
        has_video = true;
        let group = writer.create_group(video, &numbered("synch", u32::from(synch.id) + 1))?;
        writer.set_group_attr(group, "Synch", synch)?;
        schema.synch_groups.insert(synch.id, group);
    }
    for (&node, tracking) in &session.tracking {
        has_video = true;
        let group =
            writer.create_group(video, &numbered("tracking", u32::from(tracking.track_id)))?;
        writer.set_group_attr(group, "Tracking", tracking)?;
        schema.tracking_groups.insert(node, group);
        schema.tracking_slots.insert(
            node,
            tracking_slot(TrackingKind::from_raw(tracking.kind), tracking.max_points),
        );
    }

    let comments = writer.create_group(GroupId::ROOT, "comment")?;
    writer.set_group_attr(comments, "AnnotationCharset", &ANNOTATION_CHARSET)?;
    if has_video {
        let annotation = writer.create_group(
            comments,
            &numbered("comment", u32::from(ANNOTATION_CHARSET) + 1),
        )?;
        writer.set_group_attr(annotation, "Charset", &ANNOTATION_CHARSET)?;
        schema.comment_groups.insert(ANNOTATION_CHARSET, annotation);
    }
    // Plain-text comments always get their group up front.
    let plain = writer.create_group(comments, &numbered("comment", 1))?;
    writer.set_group_attr(plain, "Charset", &0u8)?;
    schema.comment_groups.insert(0, plain);
    schema.comment_container = Some(comments);

    Ok(schema)
}

// ---------------------------------------------------------------
// NSx schemas
// ---------------------------------------------------------------

/// Build the hierarchy for a revision 2.1 continuous session and
/// pre-declare every channel's sample stream. Returns the streams in the
/// file's interleave order.
pub fn build_nsx21_schema(writer: &mut Bh5Writer, session: &Nsx21Session) -> Result<Vec<StreamId>> {
    write_root(writer, &session.root)?;

    let container = writer.create_group(GroupId::ROOT, "channel")?;
    let mut streams = Vec::with_capacity(session.channel_ids.len());
    for &id in &session.channel_ids {
        let group = writer.create_group(container, &numbered("channel", id))?;
        writer.set_group_attr(group, "Chan", &session.channel(id))?;
        let stream =
            writer.create_stream(group, "continuous_set", continuous_layout(), CHUNK_SIZE_CONTINUOUS)?;
        // Revision 2.1 has no paused segments; samples start at time zero.
        writer.set_stream_attr(stream, "Offset", &0u32)?;
        streams.push(stream);
    }
    Ok(streams)
}

/// Build the hierarchy for a revision 2.2 continuous session. Streams are
/// opened per data segment by the router; this creates groups and
/// attributes only. Returns the channel groups in the file's interleave
/// order.
pub fn build_nsx22_schema(writer: &mut Bh5Writer, session: &Nsx22Session) -> Result<Vec<GroupId>> {
    write_root(writer, &session.root)?;

    let container = writer.create_group(GroupId::ROOT, "channel")?;
    let mut groups = Vec::with_capacity(session.channels.len());
    for channel in &session.channels {
        let group =
            writer.create_group(container, &numbered("channel", u32::from(channel.chan.id)))?;
        writer.set_group_attr(group, "Chan", &channel.chan)?;
        writer.set_group_attr(group, "ChanExt", &channel.ext)?;
        writer.set_group_attr(group, "SignalRange", &channel.range)?;
        groups.push(group);
    }
    Ok(groups)
}
