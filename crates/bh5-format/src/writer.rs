//! BH5 writer — builds a container incrementally.
//!
//! Groups and attributes live in memory until finalize; record data is
//! streamed straight to disk as chunk frames so an arbitrarily long
//! conversion never buffers more than one chunk per stream. The 32-byte
//! header is written as a placeholder at creation and patched with the
//! directory location when [`Bh5Writer::finalize`] runs.
//!
//! # Chunk cache
//!
//! With the chunk cache enabled (the default) appends are coalesced into
//! full-capacity frames and each stream's final frame is padded to the
//! chunk capacity, keeping chunk geometry uniform. Disabling the cache
//! writes exact-size frames on every append: more frame overhead and
//! flushing, smaller file. Padding is only applied to fixed-size layouts
//! and is invisible to readers, which trim using the frame record count.

use std::fs::OpenOptions;
use std::io::{BufWriter, Seek, SeekFrom, Write};
use std::path::Path;

use byteorder::{LittleEndian, WriteBytesExt};
use serde::Serialize;

use crate::directory::{
    AttrOwner, ChunkRef, DirAttr, DirGroup, DirStream, Directory, GroupId, StreamId,
};
use crate::error::{FormatError, Result};
use crate::header::{write_header, HEADER_SIZE};
use crate::layout::RecordLayout;

/// Bytes preceding every chunk payload:
/// stream id (u32) + record count (u32) + byte length (u32).
pub(crate) const FRAME_HEADER_SIZE: usize = 12;

/// Writer tuning knobs.
#[derive(Debug, Clone, Copy)]
pub struct WriterOptions {
    /// Permit overwriting an existing destination file.
    pub overwrite: bool,
    /// Coalesce appends into full-capacity, padded chunk frames.
    pub chunk_cache: bool,
}

impl Default for WriterOptions {
    fn default() -> Self {
        Self {
            overwrite: false,
            chunk_cache: true,
        }
    }
}

/// In-memory state of one stream while the container is being written.
struct StreamState {
    group: u32,
    name: String,
    layout: RecordLayout,
    record_size: Option<usize>,
    chunk_capacity: u32,
    chunks: Vec<ChunkRef>,
    record_count: u64,
    hasher: blake3::Hasher,
    pending: Vec<u8>,
    pending_records: u32,
    closed: bool,
}

/// Writer for `.bh5` files.
///
/// All mutating operations are cheap bookkeeping except [`append`],
/// which may flush one or more chunk frames to disk.
///
/// [`append`]: Bh5Writer::append
pub struct Bh5Writer {
    inner: BufWriter<std::fs::File>,
    /// Next write position (frames are only ever appended).
    pos: u64,
    groups: Vec<DirGroup>,
    streams: Vec<StreamState>,
    attrs: Vec<DirAttr>,
    options: WriterOptions,
}

impl Bh5Writer {
    /// Create a new container at `path` and write the placeholder header.
    ///
    /// # Errors
    ///
    /// Returns [`FormatError::DestinationExists`] if the file exists and
    /// `options.overwrite` is not set.
    pub fn create(path: &Path, options: WriterOptions) -> Result<Self> {
        let mut open = OpenOptions::new();
        open.write(true);
        if options.overwrite {
            open.create(true).truncate(true);
        } else {
            open.create_new(true);
        }
        let file = open.open(path).map_err(|e| {
            if e.kind() == std::io::ErrorKind::AlreadyExists {
                FormatError::DestinationExists(path.to_path_buf())
            } else {
                FormatError::Io(e)
            }
        })?;

        let mut inner = BufWriter::new(file);
        write_header(&mut inner, 0, 0)?;
        tracing::debug!(path = %path.display(), "Created BH5 container");

        Ok(Self {
            inner,
            pos: HEADER_SIZE as u64,
            groups: vec![DirGroup {
                id: 0,
                parent: None,
                name: String::new(),
            }],
            streams: Vec::new(),
            attrs: Vec::new(),
            options,
        })
    }

    /// Create a child group under `parent`.
    pub fn create_group(&mut self, parent: GroupId, name: &str) -> Result<GroupId> {
        self.check_group(parent)?;
        if self.find_group(parent, name).is_some() {
            return Err(FormatError::DuplicateName {
                parent: parent.0,
                name: name.to_string(),
            });
        }
        let id = self.groups.len() as u32;
        self.groups.push(DirGroup {
            id,
            parent: Some(parent.0),
            name: name.to_string(),
        });
        tracing::debug!(group = id, parent = parent.0, name, "Created group");
        Ok(GroupId(id))
    }

    /// Look up a direct child group by name.
    pub fn find_group(&self, parent: GroupId, name: &str) -> Option<GroupId> {
        self.groups
            .iter()
            .find(|g| g.parent == Some(parent.0) && g.name == name)
            .map(|g| GroupId(g.id))
    }

    /// Attach (or replace) an attribute on a group.
    pub fn set_group_attr<T: Serialize>(
        &mut self,
        group: GroupId,
        name: &str,
        value: &T,
    ) -> Result<()> {
        self.check_group(group)?;
        self.set_attr(AttrOwner::Group(group.0), name, value)
    }

    /// Attach (or replace) an attribute on a stream.
    pub fn set_stream_attr<T: Serialize>(
        &mut self,
        stream: StreamId,
        name: &str,
        value: &T,
    ) -> Result<()> {
        if stream.0 as usize >= self.streams.len() {
            return Err(FormatError::UnknownStream(stream.0));
        }
        self.set_attr(AttrOwner::Stream(stream.0), name, value)
    }

    /// Declare a new record stream under `group`.
    ///
    /// `chunk_capacity` is the number of records per chunk frame when the
    /// chunk cache is active.
    pub fn create_stream(
        &mut self,
        group: GroupId,
        name: &str,
        layout: RecordLayout,
        chunk_capacity: u32,
    ) -> Result<StreamId> {
        self.check_group(group)?;
        if self
            .streams
            .iter()
            .any(|s| s.group == group.0 && s.name == name)
        {
            return Err(FormatError::DuplicateName {
                parent: group.0,
                name: name.to_string(),
            });
        }
        let id = self.streams.len() as u32;
        let record_size = layout.record_size();
        self.streams.push(StreamState {
            group: group.0,
            name: name.to_string(),
            layout,
            record_size,
            chunk_capacity: chunk_capacity.max(1),
            chunks: Vec::new(),
            record_count: 0,
            hasher: blake3::Hasher::new(),
            pending: Vec::new(),
            pending_records: 0,
            closed: false,
        });
        tracing::debug!(stream = id, group = group.0, name, "Created stream");
        Ok(StreamId(id))
    }

    /// Append `record_count` serialized records to a stream.
    ///
    /// For fixed-size layouts the payload length must equal
    /// `record_count * record_size`.
    pub fn append(&mut self, stream: StreamId, payload: &[u8], record_count: u32) -> Result<()> {
        let state = self
            .streams
            .get_mut(stream.0 as usize)
            .ok_or(FormatError::UnknownStream(stream.0))?;
        if state.closed {
            return Err(FormatError::StreamClosed(state.name.clone()));
        }
        if let Some(rs) = state.record_size {
            if payload.len() != rs * record_count as usize {
                return Err(FormatError::PayloadSize {
                    len: payload.len(),
                    count: record_count,
                    expected: rs,
                });
            }
        }

        state.hasher.update(payload);
        state.record_count += u64::from(record_count);
        state.pending.extend_from_slice(payload);
        state.pending_records += record_count;

        if !self.options.chunk_cache {
            Self::flush_pending(&mut self.inner, &mut self.pos, stream.0, state, false)?;
        } else if let Some(rs) = state.record_size {
            // Carve full-capacity frames from the front of the buffer.
            while state.pending_records >= state.chunk_capacity {
                let bytes = rs * state.chunk_capacity as usize;
                let frame: Vec<u8> = state.pending.drain(..bytes).collect();
                Self::emit_frame(
                    &mut self.inner,
                    &mut self.pos,
                    stream.0,
                    &mut state.chunks,
                    &frame,
                    state.chunk_capacity,
                )?;
                state.pending_records -= state.chunk_capacity;
            }
        } else if state.pending_records >= state.chunk_capacity {
            Self::flush_pending(&mut self.inner, &mut self.pos, stream.0, state, false)?;
        }
        Ok(())
    }

    /// Flush and seal a stream. Further appends are rejected. Idempotent.
    pub fn close_stream(&mut self, stream: StreamId) -> Result<()> {
        let pad = self.options.chunk_cache;
        let state = self
            .streams
            .get_mut(stream.0 as usize)
            .ok_or(FormatError::UnknownStream(stream.0))?;
        if state.closed {
            return Ok(());
        }
        Self::flush_pending(&mut self.inner, &mut self.pos, stream.0, state, pad)?;
        state.closed = true;
        tracing::debug!(stream = stream.0, name = %state.name, records = state.record_count, "Closed stream");
        Ok(())
    }

    /// Seal every open stream, write the directory, and patch the header.
    pub fn finalize(mut self) -> Result<()> {
        let pad = self.options.chunk_cache;
        for (id, state) in self.streams.iter_mut().enumerate() {
            if !state.closed {
                Self::flush_pending(&mut self.inner, &mut self.pos, id as u32, state, pad)?;
                state.closed = true;
            }
        }

        let directory = Directory {
            groups: self.groups,
            streams: self
                .streams
                .iter()
                .enumerate()
                .map(|(id, s)| DirStream {
                    id: id as u32,
                    group: s.group,
                    name: s.name.clone(),
                    layout: s.layout.clone(),
                    chunk_capacity: s.chunk_capacity,
                    record_count: s.record_count,
                    digest: s.hasher.finalize().to_hex().to_string(),
                    chunks: s.chunks.clone(),
                })
                .collect(),
            attrs: self.attrs,
        };

        let bytes = serde_json::to_vec(&directory)?;
        let dir_offset = self.pos;
        self.inner.write_all(&bytes)?;

        self.inner.seek(SeekFrom::Start(0))?;
        write_header(&mut self.inner, dir_offset, bytes.len() as u64)?;
        self.inner.flush()?;

        tracing::info!(
            groups = directory.groups.len(),
            streams = directory.streams.len(),
            attrs = directory.attrs.len(),
            directory_offset = dir_offset,
            "Finalized BH5 container"
        );
        Ok(())
    }

    // ---------------------------------------------------------------
    // Private helpers
    // ---------------------------------------------------------------

    fn check_group(&self, group: GroupId) -> Result<()> {
        if group.0 as usize >= self.groups.len() {
            return Err(FormatError::UnknownGroup(group.0));
        }
        Ok(())
    }

    fn set_attr<T: Serialize>(&mut self, owner: AttrOwner, name: &str, value: &T) -> Result<()> {
        let value = serde_json::to_value(value)?;
        self.attrs.retain(|a| !(a.owner == owner && a.name == name));
        self.attrs.push(DirAttr {
            owner,
            name: name.to_string(),
            value,
        });
        Ok(())
    }

    /// Write whatever is pending as one frame, optionally padded to the
    /// full chunk capacity (fixed-size layouts only).
    fn flush_pending(
        inner: &mut BufWriter<std::fs::File>,
        pos: &mut u64,
        stream_id: u32,
        state: &mut StreamState,
        pad: bool,
    ) -> Result<()> {
        if state.pending.is_empty() {
            return Ok(());
        }
        let records = state.pending_records;
        let mut frame = std::mem::take(&mut state.pending);
        if pad {
            if let Some(rs) = state.record_size {
                frame.resize(rs * state.chunk_capacity as usize, 0);
            }
        }
        Self::emit_frame(inner, pos, stream_id, &mut state.chunks, &frame, records)?;
        state.pending_records = 0;
        Ok(())
    }

    /// Write one chunk frame and record its location.
    fn emit_frame(
        inner: &mut BufWriter<std::fs::File>,
        pos: &mut u64,
        stream_id: u32,
        chunks: &mut Vec<ChunkRef>,
        payload: &[u8],
        records: u32,
    ) -> Result<()> {
        inner.write_u32::<LittleEndian>(stream_id)?;
        inner.write_u32::<LittleEndian>(records)?;
        inner.write_u32::<LittleEndian>(payload.len() as u32)?;
        inner.write_all(payload)?;
        chunks.push(ChunkRef {
            offset: *pos + FRAME_HEADER_SIZE as u64,
            record_count: records,
            byte_len: payload.len() as u32,
        });
        *pos += (FRAME_HEADER_SIZE + payload.len()) as u64;
        Ok(())
    }
}
