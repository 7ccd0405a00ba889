//! # bh5-format
//!
//! The BH5 container format library. A `.bh5` file is a self-describing
//! hierarchical container: nested groups carrying typed attributes, and
//! append-only record streams written in chunked frames.
//!
//! ## Format Overview
//!
//! A `.bh5` file consists of:
//! - **Header** (32 bytes): magic bytes, version, directory location
//! - **Chunk frames**: `{stream id, record count, byte length, payload}`
//!   written sequentially as streams are appended to
//! - **Directory**: a JSON tail describing groups, attributes, and streams
//!   (record layout, chunk list, BLAKE3 digest), patched into the header
//!   on finalize
//!
//! Groups form a tree rooted at `/`. Attributes are arbitrary
//! serde-serializable values attached to a group or a stream. Every stream
//! declares a [`RecordLayout`] before any data is appended, so a consumer
//! can decode records without out-of-band knowledge.
//!
//! Multiple merged experiments are stored as sibling top-level groups
//! (`group00001`, `group00002`, ...) next to the primary root-populated
//! groups; the root `GroupCount` attribute carries the total. First-level
//! group names are part of the contract, sub-group names are not: iterate
//! children and consult attributes instead of assuming names.
//!
//! ## Example
//! ```rust,no_run
//! use bh5_format::{Bh5Writer, FieldDef, FieldKind, GroupId, RecordLayout, WriterOptions};
//!
//! let mut writer = Bh5Writer::create("out.bh5".as_ref(), WriterOptions::default()).unwrap();
//! let group = writer.create_group(GroupId::ROOT, "channel").unwrap();
//! let layout = RecordLayout::new(vec![FieldDef::scalar("sample", FieldKind::I16)]);
//! let stream = writer.create_stream(group, "continuous_set", layout, 1024).unwrap();
//! writer.append(stream, &0i16.to_le_bytes(), 1).unwrap();
//! writer.finalize().unwrap();
//! ```

pub mod directory;
pub mod error;
pub mod header;
pub mod layout;
pub mod reader;
pub mod writer;

pub use directory::{AttrOwner, GroupId, StreamId};
pub use error::{FormatError, Result};
pub use header::{BH5_MAGIC, BH5_VERSION, HEADER_SIZE};
pub use layout::{FieldDef, FieldKind, RecordLayout};
pub use reader::Bh5Reader;
pub use writer::{Bh5Writer, WriterOptions};
