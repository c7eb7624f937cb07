//! Wire protocol error types.

use crate::field::WireType;
use thiserror::Error;

/// Wire protocol errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum WireError {
    /// Frame ends before the declared payload and trailer
    #[error("frame too short: need {needed} bytes, have {available}")]
    FrameTooShort {
        /// Bytes required by the declared length
        needed: usize,
        /// Bytes actually present
        available: usize,
    },

    /// Frame carries bytes beyond the declared payload and trailer
    #[error("invalid length: declared payload {declared}, frame holds {actual} bytes")]
    InvalidLength {
        /// Declared payload length
        declared: usize,
        /// Total frame length
        actual: usize,
    },

    /// Payload does not fit the u16 length prefix
    #[error("payload too large: {0} bytes")]
    PayloadTooLarge(usize),

    /// Varint ran off the end of the buffer
    #[error("truncated varint at offset {0}")]
    TruncatedVarint(usize),

    /// Varint longer than ten bytes
    #[error("varint overflow at offset {0}")]
    VarintOverflow(usize),

    /// Length-delimited or fixed field runs past the buffer
    #[error("field {field} truncated: need {needed} bytes, have {available}")]
    TruncatedField {
        /// Field number
        field: u32,
        /// Bytes required
        needed: usize,
        /// Bytes remaining
        available: usize,
    },

    /// Wire type outside 0, 1, 2, 5
    #[error("unsupported wire type {wire_type} for field {field}")]
    UnsupportedWireType {
        /// Field number
        field: u32,
        /// Raw wire type bits
        wire_type: u8,
    },

    /// Field number zero is reserved
    #[error("invalid field number 0")]
    ZeroFieldNumber,

    /// Field number above the 29-bit tag space
    #[error("field number {0} out of range")]
    FieldNumberOutOfRange(u64),

    /// Known field carried with the wrong wire type
    #[error("field {field}: expected {expected}, found {found}")]
    FieldTypeMismatch {
        /// Field number
        field: u32,
        /// Wire type the schema declares
        expected: WireType,
        /// Wire type on the wire
        found: WireType,
    },

    /// String field is not valid UTF-8
    #[error("field {0}: invalid utf-8")]
    InvalidUtf8(u32),

    /// Nested message failed to decode
    #[error("field {field}: nested message: {reason}")]
    Nested {
        /// Field number of the nested message
        field: u32,
        /// Inner failure
        reason: String,
    },

    /// No schema for the topic's message type
    #[error("unknown message type '{0}'")]
    UnknownMessageType(String),

    /// HMAC key has an unusable format
    #[error("invalid hmac key: {0}")]
    InvalidKey(String),
}
