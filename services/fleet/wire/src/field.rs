//! Tag/value field codec.
//!
//! Payloads are sequences of `(tag, value)` pairs where the tag is a varint
//! holding `field_number << 3 | wire_type`. Readers walk the whole buffer and
//! keep every field they could parse, so a corrupt stream still yields the
//! fields that preceded the damage.

use crate::WireError;
use bytes::{BufMut, Bytes, BytesMut};
use serde::ser::SerializeStruct;
use serde::{Serialize, Serializer};
use std::fmt;
use thiserror::Error;

/// Longest valid varint encoding of a u64
const MAX_VARINT_LEN: usize = 10;

/// Largest field number a tag may carry
pub const MAX_FIELD_NUMBER: u64 = (1 << 29) - 1;

/// Wire types understood by the codec
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum WireType {
    /// Base-128 varint
    Varint = 0,
    /// Little-endian 64-bit value
    Fixed64 = 1,
    /// Length-prefixed bytes, strings and nested messages
    LengthDelimited = 2,
    /// Little-endian 32-bit value
    Fixed32 = 5,
}

impl WireType {
    /// Short name used in diagnostics
    pub fn as_str(&self) -> &'static str {
        match self {
            WireType::Varint => "varint",
            WireType::Fixed64 => "fixed64",
            WireType::LengthDelimited => "bytes",
            WireType::Fixed32 => "fixed32",
        }
    }
}

impl fmt::Display for WireType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl TryFrom<u8> for WireType {
    type Error = u8;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(WireType::Varint),
            1 => Ok(WireType::Fixed64),
            2 => Ok(WireType::LengthDelimited),
            5 => Ok(WireType::Fixed32),
            other => Err(other),
        }
    }
}

/// Raw field value
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FieldValue {
    /// Varint payload
    Varint(u64),
    /// 64-bit fixed payload
    Fixed64(u64),
    /// Length-delimited payload
    Bytes(Bytes),
    /// 32-bit fixed payload
    Fixed32(u32),
}

impl FieldValue {
    /// Wire type this value travels as
    pub fn wire_type(&self) -> WireType {
        match self {
            FieldValue::Varint(_) => WireType::Varint,
            FieldValue::Fixed64(_) => WireType::Fixed64,
            FieldValue::Bytes(_) => WireType::LengthDelimited,
            FieldValue::Fixed32(_) => WireType::Fixed32,
        }
    }
}

/// One decoded field
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Field {
    /// Field number
    pub number: u32,
    /// Value as found on the wire
    pub value: FieldValue,
}

impl Serialize for Field {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut state = serializer.serialize_struct("Field", 3)?;
        state.serialize_field("field", &self.number)?;
        state.serialize_field("wireType", self.value.wire_type().as_str())?;
        match &self.value {
            FieldValue::Varint(v) | FieldValue::Fixed64(v) => state.serialize_field("value", v)?,
            FieldValue::Fixed32(v) => state.serialize_field("value", v)?,
            FieldValue::Bytes(b) => match std::str::from_utf8(b) {
                Ok(text) if !text.chars().any(char::is_control) => {
                    state.serialize_field("value", text)?
                }
                _ => state.serialize_field("value", &hex::encode(b))?,
            },
        }
        state.end()
    }
}

/// Failed decode with whatever fields were recovered
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{error} ({} fields decoded)", .fields.len())]
pub struct DecodeError {
    /// Fields decoded before the failure
    pub fields: Vec<Field>,
    /// What went wrong
    pub error: WireError,
}

impl DecodeError {
    /// Pair an error with the fields decoded so far
    pub fn new(fields: Vec<Field>, error: WireError) -> Self {
        Self { fields, error }
    }
}

/// Read a varint at `*pos`, advancing it
pub fn read_varint(buf: &[u8], pos: &mut usize) -> Result<u64, WireError> {
    let start = *pos;
    let mut value: u64 = 0;
    for i in 0..MAX_VARINT_LEN {
        let byte = *buf.get(*pos).ok_or(WireError::TruncatedVarint(start))?;
        *pos += 1;
        value |= u64::from(byte & 0x7f) << (7 * i);
        if byte & 0x80 == 0 {
            return Ok(value);
        }
    }
    Err(WireError::VarintOverflow(start))
}

/// Append a varint
pub fn put_varint(buf: &mut BytesMut, mut value: u64) {
    while value >= 0x80 {
        buf.put_u8((value as u8) | 0x80);
        value >>= 7;
    }
    buf.put_u8(value as u8);
}

/// Split a buffer into fields
pub fn read_fields(buf: &[u8]) -> Result<Vec<Field>, DecodeError> {
    let mut fields = Vec::new();
    let mut pos = 0;

    while pos < buf.len() {
        match read_field(buf, &mut pos) {
            Ok(field) => fields.push(field),
            Err(error) => return Err(DecodeError::new(fields, error)),
        }
    }

    Ok(fields)
}

fn read_field(buf: &[u8], pos: &mut usize) -> Result<Field, WireError> {
    let tag = read_varint(buf, pos)?;
    let number = match tag >> 3 {
        0 => return Err(WireError::ZeroFieldNumber),
        n if n > MAX_FIELD_NUMBER => return Err(WireError::FieldNumberOutOfRange(n)),
        n => n as u32,
    };
    let wire_type = WireType::try_from((tag & 0x7) as u8)
        .map_err(|wire_type| WireError::UnsupportedWireType { field: number, wire_type })?;

    let value = match wire_type {
        WireType::Varint => FieldValue::Varint(read_varint(buf, pos)?),
        WireType::Fixed64 => {
            let raw = take(buf, pos, 8, number)?;
            let mut le = [0u8; 8];
            le.copy_from_slice(raw);
            FieldValue::Fixed64(u64::from_le_bytes(le))
        }
        WireType::Fixed32 => {
            let raw = take(buf, pos, 4, number)?;
            let mut le = [0u8; 4];
            le.copy_from_slice(raw);
            FieldValue::Fixed32(u32::from_le_bytes(le))
        }
        WireType::LengthDelimited => {
            let len = read_varint(buf, pos)? as usize;
            FieldValue::Bytes(Bytes::copy_from_slice(take(buf, pos, len, number)?))
        }
    };

    Ok(Field { number, value })
}

fn take<'a>(buf: &'a [u8], pos: &mut usize, len: usize, field: u32) -> Result<&'a [u8], WireError> {
    let available = buf.len() - *pos;
    if len > available {
        return Err(WireError::TruncatedField {
            field,
            needed: len,
            available,
        });
    }
    let slice = &buf[*pos..*pos + len];
    *pos += len;
    Ok(slice)
}

/// Field serializer that always emits fields in ascending number order
#[derive(Debug, Default)]
pub struct FieldWriter {
    fields: Vec<(u32, BytesMut)>,
}

impl FieldWriter {
    /// Create an empty writer
    pub fn new() -> Self {
        Self::default()
    }

    fn slot(&mut self, number: u32, wire_type: WireType) -> &mut BytesMut {
        let mut buf = BytesMut::new();
        put_varint(&mut buf, (u64::from(number) << 3) | wire_type as u64);
        self.fields.push((number, buf));
        let last = self.fields.len() - 1;
        &mut self.fields[last].1
    }

    /// Write a varint field
    pub fn put_varint(&mut self, number: u32, value: u64) {
        let buf = self.slot(number, WireType::Varint);
        put_varint(buf, value);
    }

    /// Write a 32-bit fixed field
    pub fn put_fixed32(&mut self, number: u32, value: u32) {
        self.slot(number, WireType::Fixed32).put_u32_le(value);
    }

    /// Write a 64-bit fixed field
    pub fn put_fixed64(&mut self, number: u32, value: u64) {
        self.slot(number, WireType::Fixed64).put_u64_le(value);
    }

    /// Write a length-delimited field
    pub fn put_bytes(&mut self, number: u32, value: &[u8]) {
        let buf = self.slot(number, WireType::LengthDelimited);
        put_varint(buf, value.len() as u64);
        buf.put_slice(value);
    }

    /// Number of fields written so far
    pub fn len(&self) -> usize {
        self.fields.len()
    }

    /// Whether nothing has been written
    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    /// Concatenate fields in ascending field order
    pub fn finish(mut self) -> Bytes {
        // Stable sort keeps repeated numbers in write order
        self.fields.sort_by_key(|(number, _)| *number);
        let total = self.fields.iter().map(|(_, b)| b.len()).sum();
        let mut out = BytesMut::with_capacity(total);
        for (_, buf) in self.fields {
            out.put_slice(&buf);
        }
        out.freeze()
    }
}
