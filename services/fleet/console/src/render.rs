//! Server to client frames and per-session event rendering.

use crate::error::ConsoleError;
use crate::settings::{SessionSettings, Verbosity};
use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use chrono::{DateTime, Utc};
use fleet_audit::ToggleSnapshot;
use fleet_router::{CounterSnapshot, DecodedEvent, Direction, SeenDevice};
use fleet_wire::{Field, Message};
use serde::Serialize;
use std::fmt::Write as _;

const HEX_DUMP_WIDTH: usize = 16;

/// One JSON line sent to a console client
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Frame {
    /// Server notice
    System {
        /// Text
        message: String,
    },
    /// Result of AT+AUTH
    Auth {
        /// Credentials accepted
        success: bool,
        /// Text
        message: String,
    },
    /// Acknowledgement of a command
    Response {
        /// Text
        message: String,
    },
    /// Rejected command
    Error {
        /// Error kind, e.g. `AuthRequired`
        code: &'static str,
        /// Text
        message: String,
    },
    /// Reply to AT+STATUS
    Status(StatusFrame),
    /// Reply to AT+DEVICES
    Devices {
        /// Devices seen since startup
        list: Vec<SeenDevice>,
    },
    /// Reply to AT+BUFFER
    Buffer {
        /// Rendered events, oldest first
        messages: Vec<EventFrame>,
    },
    /// A live message
    MqttMessage(EventFrame),
}

impl Frame {
    /// Plain response frame
    pub fn response(message: impl Into<String>) -> Self {
        Frame::Response {
            message: message.into(),
        }
    }

    /// System notice frame
    pub fn system(message: impl Into<String>) -> Self {
        Frame::System {
            message: message.into(),
        }
    }

    /// Error frame for a rejected command
    pub fn error(error: &ConsoleError) -> Self {
        Frame::Error {
            code: error.code(),
            message: error.to_string(),
        }
    }

    /// Serialize as a single JSON line without the newline
    pub fn to_line(&self) -> String {
        serde_json::to_string(self).unwrap_or_else(|e| {
            serde_json::json!({"type": "error", "code": "Internal", "message": e.to_string()}).to_string()
        })
    }
}

/// Body of the status reply
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusFrame {
    /// Transport name
    pub transport: &'static str,
    /// Broker session up
    pub connected: bool,
    /// Router counters
    pub counters: CounterSnapshot,
    /// Connected console clients
    pub clients: usize,
    /// Events held in the replay buffer
    pub buffer_size: usize,
    /// Audit toggles
    pub logging: ToggleSnapshot,
    /// The asking session's settings
    pub config: SessionSettings,
}

/// Frame bytes as shown to a session
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RawView {
    /// Lower-case hex
    pub hex: String,
    /// Offset, hex and ASCII columns
    #[serde(skip_serializing_if = "Option::is_none")]
    pub hex_dump: Option<String>,
    /// Standard base64
    #[serde(skip_serializing_if = "Option::is_none")]
    pub base64: Option<String>,
}

/// Envelope details as shown to a session
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HmacView {
    /// Frame parsed as an envelope
    pub wrapped: bool,
    /// Trailer verified
    pub valid: bool,
    /// Envelope sequence
    pub sequence: u32,
    /// Declared payload length
    #[serde(skip_serializing_if = "Option::is_none")]
    pub payload_length: Option<u16>,
    /// Trailer hex
    #[serde(skip_serializing_if = "Option::is_none")]
    pub hmac: Option<String>,
}

/// A decoded event rendered for one session
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EventFrame {
    /// Full topic
    pub topic: String,
    /// In or out
    pub direction: Direction,
    /// Device hostname
    pub hostname: String,
    /// Topic suffix, e.g. `hb`
    pub message_type: &'static str,
    /// Frame size in bytes
    pub size: usize,
    /// Directory id, when known
    #[serde(skip_serializing_if = "Option::is_none")]
    pub device_db_id: Option<u32>,
    /// Receive time, verbose only
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<DateTime<Utc>>,
    /// Raw bytes, raw and both modes
    #[serde(skip_serializing_if = "Option::is_none")]
    pub raw: Option<RawView>,
    /// Envelope details, when enabled
    #[serde(skip_serializing_if = "Option::is_none")]
    pub hmac: Option<HmacView>,
    /// Decoded message, decoded and both modes
    #[serde(skip_serializing_if = "Option::is_none")]
    pub decoded: Option<Message>,
    /// Why there is no decoded message
    #[serde(skip_serializing_if = "Option::is_none")]
    pub decode_error: Option<String>,
    /// Fields recovered before a decode failure
    #[serde(skip_serializing_if = "Option::is_none")]
    pub partial_fields: Option<Vec<Field>>,
}

/// Classic hex dump: offset, sixteen hex bytes, ASCII column
pub fn hex_dump(bytes: &[u8]) -> String {
    let mut out = String::new();
    for (i, chunk) in bytes.chunks(HEX_DUMP_WIDTH).enumerate() {
        if i > 0 {
            out.push('\n');
        }
        let hex: Vec<String> = chunk.iter().map(|b| format!("{:02X}", b)).collect();
        let ascii: String = chunk
            .iter()
            .map(|&b| if (0x20..=0x7e).contains(&b) { b as char } else { '.' })
            .collect();
        let _ = write!(
            out,
            "{:08X}  {:<width$}  |{}|",
            i * HEX_DUMP_WIDTH,
            hex.join(" "),
            ascii,
            width = HEX_DUMP_WIDTH * 3 - 1
        );
    }
    out
}

/// Render an event according to a session's settings
///
/// Filtering is the caller's job; this only shapes the frame.
pub fn render_event(event: &DecodedEvent, settings: &SessionSettings) -> EventFrame {
    let verbosity = settings.verbosity;
    let verbose = verbosity == Verbosity::Verbose;

    let raw = settings.mode.shows_raw().then(|| RawView {
        hex: hex::encode(&event.raw),
        hex_dump: (verbosity >= Verbosity::Normal).then(|| hex_dump(&event.raw)),
        base64: verbose.then(|| STANDARD.encode(&event.raw)),
    });

    let hmac = match (&event.envelope, settings.hmac_detail) {
        (Some(info), true) => Some(HmacView {
            wrapped: info.wrapped,
            valid: info.valid,
            sequence: info.sequence,
            payload_length: verbose.then_some(info.payload_length),
            hmac: verbose.then(|| info.hmac.clone()),
        }),
        _ => None,
    };

    let (decoded, decode_error, partial_fields) = if settings.mode.shows_decoded() {
        let error = match (&event.decoded, &event.decode_error) {
            (Some(_), _) => None,
            (None, Some(e)) => Some(format!("Failed to decode {}: {}", event.message_type, e)),
            (None, None) if !event.hmac_valid() => Some("HMAC verification failed".to_string()),
            (None, None) => None,
        };
        let partial = (verbosity >= Verbosity::Normal && !event.partial_fields.is_empty())
            .then(|| event.partial_fields.clone());
        (event.decoded.clone(), error, partial)
    } else {
        (None, None, None)
    };

    EventFrame {
        topic: event.topic.clone(),
        direction: event.direction,
        hostname: event.hostname.clone(),
        message_type: event.message_type.suffix(),
        size: event.raw.len(),
        device_db_id: event.device_db_id,
        timestamp: verbose.then_some(event.received_at),
        raw,
        hmac,
        decoded,
        decode_error,
        partial_fields,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::settings::DisplayMode;
    use bytes::Bytes;
    use fleet_wire::{EnvelopeInfo, FieldValue, Heartbeat, MessageType};

    fn event(valid: bool) -> DecodedEvent {
        DecodedEvent {
            topic: "esagtech/pb/d/esg-0001/hb".to_string(),
            direction: Direction::In,
            hostname: "esg-0001".to_string(),
            message_type: MessageType::Heartbeat,
            device_db_id: Some(3),
            raw: Bytes::from_static(b"\x00\x01hello world, this is long"),
            envelope: Some(EnvelopeInfo {
                wrapped: true,
                valid,
                sequence: 9,
                payload_length: 1,
                hmac: "0011223344556677".to_string(),
            }),
            decoded: valid.then(|| {
                Message::Heartbeat(Heartbeat {
                    uptime: 5,
                    ..Default::default()
                })
            }),
            decode_error: None,
            partial_fields: Vec::new(),
            received_at: Utc::now(),
        }
    }

    #[test]
    fn test_hex_dump() {
        let dump = hex_dump(b"ABCDEFGHIJKLMNOP\x00\x7f!");
        let lines: Vec<&str> = dump.lines().collect();
        assert_eq!(lines.len(), 2);
        assert_eq!(
            lines[0],
            "00000000  41 42 43 44 45 46 47 48 49 4A 4B 4C 4D 4E 4F 50  |ABCDEFGHIJKLMNOP|"
        );
        assert!(lines[1].starts_with("00000010  00 7F 21 "));
        assert!(lines[1].ends_with("  |..!|"));
        assert_eq!(lines[0].len(), lines[1].len() + 13);
        assert_eq!(hex_dump(&[]), "");
    }

    #[test]
    fn test_default_settings_show_decoded_only() {
        let frame = render_event(&event(true), &SessionSettings::default());
        assert!(frame.raw.is_none());
        assert!(frame.hmac.is_none());
        assert!(frame.decoded.is_some());

        let json = serde_json::to_value(Frame::MqttMessage(frame)).unwrap();
        assert_eq!(json["type"], "mqtt_message");
        assert_eq!(json["messageType"], "hb");
        assert_eq!(json["direction"], "in");
        assert_eq!(json["decoded"]["uptime"], 5);
        assert!(json.get("raw").is_none());
    }

    #[test]
    fn test_verbosity_levels() {
        let mut settings = SessionSettings {
            mode: DisplayMode::Raw,
            hmac_detail: true,
            verbosity: Verbosity::Quiet,
            ..Default::default()
        };
        let quiet = render_event(&event(true), &settings);
        let raw = quiet.raw.unwrap();
        assert!(raw.hex_dump.is_none() && raw.base64.is_none());
        assert!(quiet.timestamp.is_none());
        assert!(quiet.hmac.as_ref().unwrap().hmac.is_none());
        assert!(quiet.decoded.is_none());

        settings.verbosity = Verbosity::Normal;
        let normal = render_event(&event(true), &settings);
        assert!(normal.raw.unwrap().hex_dump.is_some());

        settings.verbosity = Verbosity::Verbose;
        let verbose = render_event(&event(true), &settings);
        let raw = verbose.raw.unwrap();
        assert!(raw.base64.is_some());
        assert!(verbose.timestamp.is_some());
        let hmac = verbose.hmac.unwrap();
        assert_eq!(hmac.hmac.as_deref(), Some("0011223344556677"));
        assert_eq!(hmac.payload_length, Some(1));
    }

    #[test]
    fn test_invalid_hmac_reports_error() {
        let settings = SessionSettings {
            mode: DisplayMode::Both,
            hmac_detail: true,
            ..Default::default()
        };
        let frame = render_event(&event(false), &settings);
        assert!(frame.decoded.is_none());
        assert_eq!(frame.decode_error.as_deref(), Some("HMAC verification failed"));
        assert!(!frame.hmac.unwrap().valid);
        assert!(frame.raw.is_some());
    }

    #[test]
    fn test_partial_fields_rendered_with_error() {
        let mut e = event(true);
        e.decoded = None;
        e.decode_error = Some("truncated".to_string());
        e.partial_fields = vec![Field {
            number: 1,
            value: FieldValue::Varint(7),
        }];

        let frame = render_event(&e, &SessionSettings::default());
        assert_eq!(frame.decode_error.as_deref(), Some("Failed to decode hb: truncated"));
        assert_eq!(frame.partial_fields.unwrap().len(), 1);

        let quiet = SessionSettings {
            verbosity: Verbosity::Quiet,
            ..Default::default()
        };
        assert!(render_event(&e, &quiet).partial_fields.is_none());
    }

    #[test]
    fn test_control_frames() {
        let line = Frame::error(&ConsoleError::AuthRequired).to_line();
        let json: serde_json::Value = serde_json::from_str(&line).unwrap();
        assert_eq!(json["type"], "error");
        assert_eq!(json["code"], "AuthRequired");

        let json: serde_json::Value = serde_json::from_str(
            &Frame::Auth {
                success: true,
                message: "Authentication successful".to_string(),
            }
            .to_line(),
        )
        .unwrap();
        assert_eq!(json["type"], "auth");
        assert_eq!(json["success"], true);
    }
}
