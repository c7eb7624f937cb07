//! Events fanned out to consoles and the audit sink.

use bytes::Bytes;
use chrono::{DateTime, Utc};
use fleet_wire::{EnvelopeInfo, Field, Message, MessageType};
use serde::Serialize;
use std::fmt;
use std::str::FromStr;

/// Which way a message travelled
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    /// Device to backend
    In,
    /// Backend to device
    Out,
}

impl Direction {
    /// Lower-case name
    pub fn as_str(&self) -> &'static str {
        match self {
            Direction::In => "in",
            Direction::Out => "out",
        }
    }
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Direction {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "in" => Ok(Direction::In),
            "out" => Ok(Direction::Out),
            other => Err(format!("unknown direction '{}'", other)),
        }
    }
}

/// One message seen by the router, decoded as far as possible
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DecodedEvent {
    /// Full topic
    pub topic: String,
    /// Inbound or outbound
    pub direction: Direction,
    /// Device hostname from the topic
    pub hostname: String,
    /// Message type from the topic
    pub message_type: MessageType,
    /// Database id from the device directory
    pub device_db_id: Option<u32>,
    /// Frame exactly as carried by the transport
    #[serde(skip)]
    pub raw: Bytes,
    /// Envelope details, when the frame parsed as one
    pub envelope: Option<EnvelopeInfo>,
    /// Decoded message, only for frames with a valid HMAC
    pub decoded: Option<Message>,
    /// Message decode failure
    pub decode_error: Option<String>,
    /// Fields recovered before a decode failure
    pub partial_fields: Vec<Field>,
    /// When the router saw it
    pub received_at: DateTime<Utc>,
}

impl DecodedEvent {
    /// Whether the HMAC trailer verified
    pub fn hmac_valid(&self) -> bool {
        self.envelope.as_ref().map(|e| e.valid).unwrap_or(false)
    }
}
