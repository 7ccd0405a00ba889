//! On-disk directory — the JSON tail that makes a BH5 file self-describing.
//!
//! The directory is serialized once, at finalize, after all chunk frames.
//! It records the group tree, every attribute, and for each stream its
//! record layout, chunk list, total record count, and a BLAKE3 digest of
//! the logical (unpadded) payload.

use serde::{Deserialize, Serialize};

use crate::layout::RecordLayout;

/// Identifies a group in the container.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct GroupId(pub(crate) u32);

impl GroupId {
    /// The root group `/`. It always exists and cannot be created or named.
    pub const ROOT: GroupId = GroupId(0);

    pub fn raw(&self) -> u32 {
        self.0
    }
}

/// Identifies a record stream in the container.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct StreamId(pub(crate) u32);

impl StreamId {
    pub fn raw(&self) -> u32 {
        self.0
    }
}

/// What an attribute is attached to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AttrOwner {
    Group(u32),
    Stream(u32),
}

/// One group of the tree. The root has id 0, no parent, and an empty name.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DirGroup {
    pub id: u32,
    pub parent: Option<u32>,
    pub name: String,
}

/// One attribute: a named JSON value attached to a group or a stream.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DirAttr {
    pub owner: AttrOwner,
    pub name: String,
    pub value: serde_json::Value,
}

/// Location of one chunk frame's payload within the file.
///
/// `byte_len` may exceed `record_count * record_size` for the padded final
/// frame of a fixed-layout stream; readers trim using `record_count`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChunkRef {
    pub offset: u64,
    pub record_count: u32,
    pub byte_len: u32,
}

/// One record stream: layout, chunk list, and integrity digest.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DirStream {
    pub id: u32,
    pub group: u32,
    pub name: String,
    pub layout: RecordLayout,
    pub chunk_capacity: u32,
    pub record_count: u64,
    /// BLAKE3 digest (lowercase hex) of the logical payload bytes.
    pub digest: String,
    pub chunks: Vec<ChunkRef>,
}

/// The complete directory.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Directory {
    pub groups: Vec<DirGroup>,
    pub streams: Vec<DirStream>,
    pub attrs: Vec<DirAttr>,
}
