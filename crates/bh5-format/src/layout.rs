//! Record layouts — the declared shape of every record in a BH5 stream.
//!
//! A layout is an ordered list of named fields. Layouts without
//! variable-length fields have a fixed record size, which enables padded
//! chunk frames and O(1) record slicing; layouts with variable-length
//! fields are split by walking the length prefixes.

use serde::{Deserialize, Serialize};

/// The primitive kind of a single record field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FieldKind {
    U8,
    U16,
    U32,
    I16,
    /// Raw byte run of `count` bytes.
    Bytes,
    /// Length-prefixed list of 16-bit words: u16 count, then the words.
    VarU16List,
    /// Length-prefixed UTF-8 string: u16 byte length, then the bytes.
    VarString,
}

impl FieldKind {
    /// Size of one element in bytes, or `None` for variable-length kinds.
    pub fn element_size(&self) -> Option<usize> {
        match self {
            FieldKind::U8 | FieldKind::Bytes => Some(1),
            FieldKind::U16 | FieldKind::I16 => Some(2),
            FieldKind::U32 => Some(4),
            FieldKind::VarU16List | FieldKind::VarString => None,
        }
    }

    pub fn is_variable(&self) -> bool {
        self.element_size().is_none()
    }
}

/// One field of a record layout.
///
/// `count` is the array length for fixed kinds (`1` for scalars, the byte
/// length for [`FieldKind::Bytes`]) and is ignored for variable-length
/// kinds, whose length is carried per record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldDef {
    pub name: String,
    pub kind: FieldKind,
    pub count: u32,
}

impl FieldDef {
    pub fn new(name: &str, kind: FieldKind, count: u32) -> Self {
        Self {
            name: name.to_string(),
            kind,
            count,
        }
    }

    /// A single-element field.
    pub fn scalar(name: &str, kind: FieldKind) -> Self {
        Self::new(name, kind, 1)
    }

    /// Serialized size of this field, or `None` if variable-length.
    fn size(&self) -> Option<usize> {
        self.kind
            .element_size()
            .map(|s| s * self.count as usize)
    }
}

/// The declared record shape of a stream.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecordLayout {
    pub fields: Vec<FieldDef>,
}

impl RecordLayout {
    pub fn new(fields: Vec<FieldDef>) -> Self {
        Self { fields }
    }

    /// Serialized size of one record, or `None` if any field is
    /// variable-length.
    pub fn record_size(&self) -> Option<usize> {
        self.fields.iter().map(|f| f.size()).sum()
    }

    pub fn is_fixed(&self) -> bool {
        self.record_size().is_some()
    }

    /// Byte length of the first record in `bytes`, walking length
    /// prefixes for variable fields. Returns `None` if `bytes` is too
    /// short to hold a complete record.
    pub fn split_first(&self, bytes: &[u8]) -> Option<usize> {
        let mut at = 0usize;
        for field in &self.fields {
            match field.size() {
                Some(n) => at += n,
                None => {
                    let len_bytes: [u8; 2] = bytes.get(at..at + 2)?.try_into().ok()?;
                    let len = u16::from_le_bytes(len_bytes) as usize;
                    at += 2;
                    at += match field.kind {
                        FieldKind::VarU16List => len * 2,
                        _ => len,
                    };
                }
            }
        }
        if at <= bytes.len() {
            Some(at)
        } else {
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fixed_layout_size() {
        let layout = RecordLayout::new(vec![
            FieldDef::scalar("timestamp", FieldKind::U32),
            FieldDef::scalar("unit", FieldKind::U8),
            FieldDef::scalar("res", FieldKind::U8),
            FieldDef::new("wave", FieldKind::I16, 48),
        ]);
        assert_eq!(layout.record_size(), Some(4 + 1 + 1 + 96));
        assert!(layout.is_fixed());
    }

    #[test]
    fn variable_layout_has_no_fixed_size() {
        let layout = RecordLayout::new(vec![
            FieldDef::scalar("timestamp", FieldKind::U32),
            FieldDef::new("text", FieldKind::VarString, 0),
        ]);
        assert_eq!(layout.record_size(), None);
        assert!(!layout.is_fixed());
    }

    #[test]
    fn split_var_string_record() {
        let layout = RecordLayout::new(vec![
            FieldDef::scalar("timestamp", FieldKind::U32),
            FieldDef::new("text", FieldKind::VarString, 0),
        ]);
        let mut bytes = Vec::new();
        bytes.extend_from_slice(&7u32.to_le_bytes());
        bytes.extend_from_slice(&3u16.to_le_bytes());
        bytes.extend_from_slice(b"abc");
        bytes.extend_from_slice(&[0xFF; 4]); // next record's bytes
        assert_eq!(layout.split_first(&bytes), Some(4 + 2 + 3));
    }

    #[test]
    fn split_var_word_list_record() {
        let layout = RecordLayout::new(vec![
            FieldDef::scalar("timestamp", FieldKind::U32),
            FieldDef::new("words", FieldKind::VarU16List, 0),
        ]);
        let mut bytes = Vec::new();
        bytes.extend_from_slice(&1u32.to_le_bytes());
        bytes.extend_from_slice(&2u16.to_le_bytes());
        bytes.extend_from_slice(&10u16.to_le_bytes());
        bytes.extend_from_slice(&11u16.to_le_bytes());
        assert_eq!(layout.split_first(&bytes), Some(4 + 2 + 4));
    }

    #[test]
    fn split_truncated_record_is_none() {
        let layout = RecordLayout::new(vec![
            FieldDef::scalar("timestamp", FieldKind::U32),
            FieldDef::new("text", FieldKind::VarString, 0),
        ]);
        let mut bytes = Vec::new();
        bytes.extend_from_slice(&7u32.to_le_bytes());
        bytes.extend_from_slice(&10u16.to_le_bytes());
        bytes.extend_from_slice(b"abc"); // promises 10, holds 3
        assert_eq!(layout.split_first(&bytes), None);
    }
}
