//! Fixed-layout codec for card structures
//!
//! Every structure occupies a frame of fixed length: a 29-byte record on
//! secure cards, a 16-byte span on memory cards. Only the leading
//! significant bytes carry fields; the rest of the frame is zero padding.
//! A frame whose significant bytes are all zero is a blank structure and
//! decodes to [`Content::Uninitialized`] rather than an error.

use std::fmt;

use thiserror::Error;

use crate::constants::{
    COUNTER_SIZE, MEMORY_COUNTER_OFFSET, MEMORY_STRUCTURE_SIZE, SECURE_RECORD_SIZE,
};
use crate::types::CounterValue;

/// Card structures addressed by the layout table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StructureKind {
    Environment,
    Contract,
    Event,
    Counters,
}

impl fmt::Display for StructureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            StructureKind::Environment => "environment",
            StructureKind::Contract => "contract",
            StructureKind::Event => "event",
            StructureKind::Counters => "counters",
        };
        f.write_str(name)
    }
}

/// Decoding and range errors. The first two are corrupt-record conditions.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CodecError {
    #[error("corrupt {kind} record: expected {expected} bytes, got {actual}")]
    CorruptRecord {
        kind: StructureKind,
        expected: usize,
        actual: usize,
    },

    #[error("corrupt {kind} record: invalid {field} 0x{value:02X}")]
    InvalidField {
        kind: StructureKind,
        field: &'static str,
        value: u8,
    },

    #[error("{field} value {value} out of range")]
    ValueOutOfRange { field: &'static str, value: u64 },
}

impl CodecError {
    pub fn is_corrupt_record(&self) -> bool {
        !matches!(self, CodecError::ValueOutOfRange { .. })
    }
}

/// Frame a structure is stored in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Frame {
    /// Secure-card file record
    SecureRecord,
    /// Memory-card structure, one block or several concatenated blocks
    MemoryStructure,
}

impl Frame {
    pub fn len(self) -> usize {
        match self {
            Frame::SecureRecord => SECURE_RECORD_SIZE,
            Frame::MemoryStructure => MEMORY_STRUCTURE_SIZE,
        }
    }
}

/// A decoded structure, or the blank sentinel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Content<T> {
    Uninitialized,
    Present(T),
}

impl<T> Content<T> {
    pub fn present(&self) -> Option<&T> {
        match self {
            Content::Present(value) => Some(value),
            Content::Uninitialized => None,
        }
    }

    pub fn into_present(self) -> Option<T> {
        match self {
            Content::Present(value) => Some(value),
            Content::Uninitialized => None,
        }
    }

    pub fn is_uninitialized(&self) -> bool {
        matches!(self, Content::Uninitialized)
    }
}

impl<T> From<T> for Content<T> {
    fn from(value: T) -> Self {
        Content::Present(value)
    }
}

/// A structure with a fixed field layout.
pub trait Structure: Sized {
    const KIND: StructureKind;
    /// Number of significant bytes at the start of the frame.
    const FIELDS_SIZE: usize;

    /// Write the fields into `out`, which is exactly `FIELDS_SIZE` long.
    fn write_fields(&self, out: &mut [u8]);

    /// Read the fields from a non-blank slice of `FIELDS_SIZE` bytes.
    fn read_fields(fields: &[u8]) -> Result<Self, CodecError>;
}

/// Encode a structure into a zero-padded frame.
pub fn encode<S: Structure>(content: &Content<S>, frame: Frame) -> Vec<u8> {
    let mut out = vec![0u8; frame.len()];
    if let Content::Present(value) = content {
        value.write_fields(&mut out[..S::FIELDS_SIZE]);
    }
    out
}

/// Decode a frame. The length must match exactly.
pub fn decode<S: Structure>(bytes: &[u8], frame: Frame) -> Result<Content<S>, CodecError> {
    if bytes.len() != frame.len() {
        return Err(CodecError::CorruptRecord {
            kind: S::KIND,
            expected: frame.len(),
            actual: bytes.len(),
        });
    }
    let fields = &bytes[..S::FIELDS_SIZE];
    if fields.iter().all(|&b| b == 0) {
        return Ok(Content::Uninitialized);
    }
    S::read_fields(fields).map(Content::Present)
}

/// Counter structure encodings.
pub mod counters {
    use super::*;

    /// Encode the secure-card counter file record, slot 1 first.
    pub fn encode_file(values: &[CounterValue]) -> Vec<u8> {
        values.iter().flat_map(|v| v.to_be_bytes()).collect()
    }

    /// Decode `count` counters from the secure-card counter file record.
    pub fn decode_file(bytes: &[u8], count: usize) -> Result<Vec<CounterValue>, CodecError> {
        if bytes.len() != count * COUNTER_SIZE {
            return Err(CodecError::CorruptRecord {
                kind: StructureKind::Counters,
                expected: count * COUNTER_SIZE,
                actual: bytes.len(),
            });
        }
        Ok(bytes
            .chunks_exact(COUNTER_SIZE)
            .map(|c| CounterValue::from_be_bytes([c[0], c[1], c[2]]))
            .collect())
    }

    /// Read the counter embedded in a memory-card contract frame.
    pub fn read_embedded(frame: &[u8]) -> Result<CounterValue, CodecError> {
        if frame.len() != MEMORY_STRUCTURE_SIZE {
            return Err(CodecError::CorruptRecord {
                kind: StructureKind::Counters,
                expected: MEMORY_STRUCTURE_SIZE,
                actual: frame.len(),
            });
        }
        let c = &frame[MEMORY_COUNTER_OFFSET..MEMORY_COUNTER_OFFSET + COUNTER_SIZE];
        Ok(CounterValue::from_be_bytes([c[0], c[1], c[2]]))
    }

    /// Store a counter inside a memory-card contract frame.
    pub fn write_embedded(frame: &mut [u8], value: CounterValue) {
        frame[MEMORY_COUNTER_OFFSET..MEMORY_COUNTER_OFFSET + COUNTER_SIZE]
            .copy_from_slice(&value.to_be_bytes());
    }
}

/// Big-endian field accessors over a significant-bytes slice.
pub(crate) mod field {
    pub fn u16_at(bytes: &[u8], at: usize) -> u16 {
        u16::from_be_bytes([bytes[at], bytes[at + 1]])
    }

    pub fn u32_at(bytes: &[u8], at: usize) -> u32 {
        u32::from_be_bytes([bytes[at], bytes[at + 1], bytes[at + 2], bytes[at + 3]])
    }

    pub fn put_u16(out: &mut [u8], at: usize, value: u16) {
        out[at..at + 2].copy_from_slice(&value.to_be_bytes());
    }

    pub fn put_u32(out: &mut [u8], at: usize, value: u32) {
        out[at..at + 4].copy_from_slice(&value.to_be_bytes());
    }
}
