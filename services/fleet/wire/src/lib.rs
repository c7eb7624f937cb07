//! Device wire protocol for fleet alarm controllers.
//!
//! Every payload exchanged with a controller is a tag/value field stream
//! wrapped in an authenticated envelope and published on a per-device topic.
//!
//! ## Wire Format
//!
//! ```text
//! +----------------------+-------------------------------------+
//! | u16 length (BE)      | payload length                      |
//! +----------------------+-------------------------------------+
//! | u32 sequence (BE)    | sender sequence number              |
//! +----------------------+-------------------------------------+
//! | payload              | tag/value fields (0..65535 bytes)   |
//! +----------------------+-------------------------------------+
//! | hmac (8B)            | last 8 bytes of HMAC-SHA256 over    |
//! |                      | length, sequence and payload        |
//! +----------------------+-------------------------------------+
//! ```
//!
//! The message type is not part of the frame; it is the last segment of the
//! topic the frame was published on (see [`MessageType`]).

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod envelope;
pub mod enums;
pub mod error;
pub mod field;
pub mod message;

// Re-export main types
pub use envelope::{
    Envelope, EnvelopeInfo, HmacKey, DEFAULT_KEY_HEX, HEADER_SIZE, HMAC_SIZE, MAX_PAYLOAD_SIZE,
    MIN_FRAME_SIZE,
};
pub use enums::{
    AlarmType, ConfigType, DeviceState, DiagAction, EventState, NetworkInterface, OtaAction,
    OutputType, PatternType, Priority, ReadType, SystemAction, WireEnum, deserialize_enum,
    serialize_enum,
};
pub use error::WireError;
pub use field::{read_fields, DecodeError, Field, FieldValue, FieldWriter, WireType};
pub use message::{
    decode_message, AlarmEvent, BleConfig, CommandEnvelope, CommandPayload, CommandResponse,
    ConfigCommand, ConfigReadCommand, DeviceConfig, DiagnosticCommand, Heartbeat,
    LastWillMessage, LocationConfig, Message, MessageType, MqttConfig, NtpConfig, OtaCommand,
    OutputCommand, StatusMessage, SystemCommand, WifiConfig, WireMessage,
};
