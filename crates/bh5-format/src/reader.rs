//! BH5 reader — opens a container, parses the directory, and exposes the
//! group tree, attributes, and record streams.
//!
//! The reader keeps a [`BufReader`] handle to the underlying file so that
//! stream data can be read lazily on demand; only the directory is held
//! in memory.

use std::fs::File;
use std::io::{BufReader, Read, Seek, SeekFrom};
use std::path::Path;

use serde::de::DeserializeOwned;

use crate::directory::{AttrOwner, Directory, DirStream, GroupId, StreamId};
use crate::error::{FormatError, Result};
use crate::header::read_header;
use crate::layout::RecordLayout;

/// Reader for `.bh5` files.
pub struct Bh5Reader {
    inner: BufReader<File>,
    version: u16,
    directory: Directory,
    file_size: u64,
}

impl Bh5Reader {
    /// Open a container: validate the header, then read and parse the
    /// directory tail.
    pub fn open(path: &Path) -> Result<Self> {
        let file = File::open(path)?;
        let file_size = file.metadata()?.len();
        let mut inner = BufReader::new(file);

        let header = read_header(&mut inner)?;
        if header
            .directory_offset
            .checked_add(header.directory_len)
            .is_none_or(|end| end > file_size)
        {
            return Err(FormatError::InvalidDirectory {
                offset: header.directory_offset,
                len: header.directory_len,
                file_size,
            });
        }

        inner.seek(SeekFrom::Start(header.directory_offset))?;
        let mut bytes = vec![0u8; header.directory_len as usize];
        inner.read_exact(&mut bytes)?;
        let directory: Directory = serde_json::from_slice(&bytes)?;

        tracing::debug!(
            path = %path.display(),
            groups = directory.groups.len(),
            streams = directory.streams.len(),
            "Opened BH5 container"
        );

        Ok(Self {
            inner,
            version: header.version,
            directory,
            file_size,
        })
    }

    pub fn version(&self) -> u16 {
        self.version
    }

    pub fn file_size(&self) -> u64 {
        self.file_size
    }

    // ---------------------------------------------------------------
    // Groups and attributes
    // ---------------------------------------------------------------

    /// Direct child groups of `parent`, in creation order.
    pub fn children(&self, parent: GroupId) -> Vec<(GroupId, &str)> {
        self.directory
            .groups
            .iter()
            .filter(|g| g.parent == Some(parent.raw()))
            .map(|g| (GroupId(g.id), g.name.as_str()))
            .collect()
    }

    /// Look up a direct child group by name.
    pub fn find_group(&self, parent: GroupId, name: &str) -> Option<GroupId> {
        self.directory
            .groups
            .iter()
            .find(|g| g.parent == Some(parent.raw()) && g.name == name)
            .map(|g| GroupId(g.id))
    }

    /// Resolve an absolute path such as `/channel/channel00001`.
    pub fn group_by_path(&self, path: &str) -> Option<GroupId> {
        let mut at = GroupId::ROOT;
        for part in path.split('/').filter(|p| !p.is_empty()) {
            at = self.find_group(at, part)?;
        }
        Some(at)
    }

    /// Read and deserialize a group attribute.
    pub fn group_attr<T: DeserializeOwned>(&self, group: GroupId, name: &str) -> Result<T> {
        self.attr(AttrOwner::Group(group.raw()), name)
    }

    /// Read and deserialize a stream attribute.
    pub fn stream_attr<T: DeserializeOwned>(&self, stream: StreamId, name: &str) -> Result<T> {
        self.attr(AttrOwner::Stream(stream.raw()), name)
    }

    /// Attribute names present on a group.
    pub fn group_attr_names(&self, group: GroupId) -> Vec<&str> {
        self.attr_names(AttrOwner::Group(group.raw()))
    }

    /// Attribute names present on a stream.
    pub fn stream_attr_names(&self, stream: StreamId) -> Vec<&str> {
        self.attr_names(AttrOwner::Stream(stream.raw()))
    }

    // ---------------------------------------------------------------
    // Streams
    // ---------------------------------------------------------------

    /// Record streams declared under `group`, in creation order.
    pub fn streams(&self, group: GroupId) -> Vec<(StreamId, &str)> {
        self.directory
            .streams
            .iter()
            .filter(|s| s.group == group.raw())
            .map(|s| (StreamId(s.id), s.name.as_str()))
            .collect()
    }

    /// Look up a stream of `group` by name.
    pub fn find_stream(&self, group: GroupId, name: &str) -> Option<StreamId> {
        self.directory
            .streams
            .iter()
            .find(|s| s.group == group.raw() && s.name == name)
            .map(|s| StreamId(s.id))
    }

    pub fn stream_layout(&self, stream: StreamId) -> Result<&RecordLayout> {
        Ok(&self.stream_entry(stream)?.layout)
    }

    pub fn stream_record_count(&self, stream: StreamId) -> Result<u64> {
        Ok(self.stream_entry(stream)?.record_count)
    }

    /// Read the logical payload of a stream: every chunk's valid bytes
    /// concatenated in order, with tail-frame padding trimmed away.
    pub fn read_stream_bytes(&mut self, stream: StreamId) -> Result<Vec<u8>> {
        let entry = self.stream_entry(stream)?.clone();
        let record_size = entry.layout.record_size();

        let mut bytes = Vec::new();
        for chunk in &entry.chunks {
            let valid = match record_size {
                Some(rs) => rs * chunk.record_count as usize,
                None => chunk.byte_len as usize,
            };
            self.inner.seek(SeekFrom::Start(chunk.offset))?;
            let start = bytes.len();
            bytes.resize(start + valid, 0);
            self.inner.read_exact(&mut bytes[start..])?;
        }
        Ok(bytes)
    }

    /// Read a stream and split it into individual records.
    pub fn read_records(&mut self, stream: StreamId) -> Result<Vec<Vec<u8>>> {
        let entry = self.stream_entry(stream)?.clone();
        let bytes = self.read_stream_bytes(stream)?;

        let mut records = Vec::with_capacity(entry.record_count as usize);
        match entry.layout.record_size() {
            Some(rs) if rs > 0 => {
                for record in bytes.chunks_exact(rs) {
                    records.push(record.to_vec());
                }
            }
            _ => {
                let mut rest = bytes.as_slice();
                while !rest.is_empty() {
                    let len = entry
                        .layout
                        .split_first(rest)
                        .ok_or_else(|| FormatError::MalformedRecord(entry.name.clone()))?;
                    records.push(rest[..len].to_vec());
                    rest = &rest[len..];
                }
            }
        }
        if records.len() as u64 != entry.record_count {
            return Err(FormatError::MalformedRecord(entry.name.clone()));
        }
        Ok(records)
    }

    /// Recompute the BLAKE3 digest of a stream's logical payload and
    /// compare it to the directory entry.
    pub fn verify_stream(&mut self, stream: StreamId) -> Result<()> {
        let expected = self.stream_entry(stream)?.digest.clone();
        let name = self.stream_entry(stream)?.name.clone();
        let bytes = self.read_stream_bytes(stream)?;
        let actual = blake3::hash(&bytes).to_hex().to_string();
        if actual != expected {
            return Err(FormatError::DigestMismatch {
                stream: name,
                expected,
                actual,
            });
        }
        Ok(())
    }

    // ---------------------------------------------------------------
    // Private helpers
    // ---------------------------------------------------------------

    fn stream_entry(&self, stream: StreamId) -> Result<&DirStream> {
        self.directory
            .streams
            .iter()
            .find(|s| s.id == stream.raw())
            .ok_or(FormatError::UnknownStream(stream.raw()))
    }

    fn attr<T: DeserializeOwned>(&self, owner: AttrOwner, name: &str) -> Result<T> {
        let attr = self
            .directory
            .attrs
            .iter()
            .find(|a| a.owner == owner && a.name == name)
            .ok_or_else(|| FormatError::AttrNotFound(name.to_string()))?;
        Ok(serde_json::from_value(attr.value.clone())?)
    }

    fn attr_names(&self, owner: AttrOwner) -> Vec<&str> {
        self.directory
            .attrs
            .iter()
            .filter(|a| a.owner == owner)
            .map(|a| a.name.as_str())
            .collect()
    }
}
