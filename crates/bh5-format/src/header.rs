//! BH5 file header — the first 32 bytes of every `.bh5` file.

use std::io::{Read, Write};

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};

use crate::error::{FormatError, Result};

/// Magic bytes identifying a BH5 file: `BH5F`
pub const BH5_MAGIC: [u8; 4] = *b"BH5F";

/// Current container version
pub const BH5_VERSION: u16 = 1;

/// Size of the fixed header in bytes
pub const HEADER_SIZE: usize = 32;

/// Parsed header fields.
///
/// Layout (32 bytes, little-endian):
/// - `[0..4]`   magic: `BH5F`
/// - `[4..6]`   version: u16
/// - `[6..8]`   flags: u16 (reserved, zero)
/// - `[8..16]`  directory_offset: u64
/// - `[16..24]` directory_len: u64
/// - `[24..32]` reserved: [u8; 8] (zero-filled)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct RawHeader {
    pub version: u16,
    pub directory_offset: u64,
    pub directory_len: u64,
}

/// Write the 32-byte header. Called with zeroed directory fields at file
/// creation and again with the real values when the writer finalizes.
pub(crate) fn write_header<W: Write>(w: &mut W, dir_offset: u64, dir_len: u64) -> Result<()> {
    w.write_all(&BH5_MAGIC)?;
    w.write_u16::<LittleEndian>(BH5_VERSION)?;
    w.write_u16::<LittleEndian>(0)?;
    w.write_u64::<LittleEndian>(dir_offset)?;
    w.write_u64::<LittleEndian>(dir_len)?;
    w.write_all(&[0u8; 8])?;
    Ok(())
}

/// Read and validate the 32-byte header.
pub(crate) fn read_header<R: Read>(r: &mut R) -> Result<RawHeader> {
    let mut magic = [0u8; 4];
    r.read_exact(&mut magic)?;
    if magic != BH5_MAGIC {
        return Err(FormatError::InvalidMagic);
    }

    let version = r.read_u16::<LittleEndian>()?;
    if version > BH5_VERSION {
        return Err(FormatError::UnsupportedVersion(version));
    }

    let _flags = r.read_u16::<LittleEndian>()?;
    let directory_offset = r.read_u64::<LittleEndian>()?;
    let directory_len = r.read_u64::<LittleEndian>()?;
    let mut reserved = [0u8; 8];
    r.read_exact(&mut reserved)?;

    Ok(RawHeader {
        version,
        directory_offset,
        directory_len,
    })
}
