//! Typed device messages.
//!
//! The message type is never carried inside the payload; it comes from the
//! last topic segment (`hb`, `status`, `alarm`, ...). Field numbers follow
//! declaration order in the device schema.

use crate::enums::{
    serialize_enum, AlarmType, ConfigType, DeviceState, DiagAction, EventState, NetworkInterface,
    OtaAction, OutputType, PatternType, Priority, ReadType, SystemAction,
};
use crate::field::{read_fields, DecodeError, Field, FieldValue, FieldWriter, WireType};
use crate::WireError;
use bytes::Bytes;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;

/// Conversion between a message field and its wire value
pub trait FieldType: Sized {
    /// Decode from a raw value
    fn from_value(number: u32, value: &FieldValue) -> Result<Self, WireError>;

    /// Encode, skipping default values
    fn write(&self, number: u32, writer: &mut FieldWriter);
}

/// A message that can be read from and written to field form
pub trait WireMessage: Sized + Default {
    /// Fill a record from decoded fields; unknown numbers are ignored
    fn from_fields(fields: &[Field]) -> Result<Self, WireError>;

    /// Write every non-default field
    fn write_fields(&self, writer: &mut FieldWriter);

    /// Decode a payload
    fn decode(buf: &[u8]) -> Result<Self, DecodeError> {
        let fields = read_fields(buf)?;
        Self::from_fields(&fields).map_err(|error| DecodeError::new(fields, error))
    }

    /// Encode to a payload
    fn encode(&self) -> Bytes {
        let mut writer = FieldWriter::new();
        self.write_fields(&mut writer);
        writer.finish()
    }
}

fn mismatch(number: u32, expected: WireType, value: &FieldValue) -> WireError {
    WireError::FieldTypeMismatch {
        field: number,
        expected,
        found: value.wire_type(),
    }
}

impl FieldType for u32 {
    fn from_value(number: u32, value: &FieldValue) -> Result<Self, WireError> {
        match value {
            FieldValue::Varint(v) => Ok(*v as u32),
            other => Err(mismatch(number, WireType::Varint, other)),
        }
    }

    fn write(&self, number: u32, writer: &mut FieldWriter) {
        if *self != 0 {
            writer.put_varint(number, u64::from(*self));
        }
    }
}

impl FieldType for u64 {
    fn from_value(number: u32, value: &FieldValue) -> Result<Self, WireError> {
        match value {
            FieldValue::Varint(v) => Ok(*v),
            other => Err(mismatch(number, WireType::Varint, other)),
        }
    }

    fn write(&self, number: u32, writer: &mut FieldWriter) {
        if *self != 0 {
            writer.put_varint(number, *self);
        }
    }
}

impl FieldType for i32 {
    fn from_value(number: u32, value: &FieldValue) -> Result<Self, WireError> {
        match value {
            // Negative values are sign-extended to 64 bits on the wire
            FieldValue::Varint(v) => Ok(*v as i64 as i32),
            other => Err(mismatch(number, WireType::Varint, other)),
        }
    }

    fn write(&self, number: u32, writer: &mut FieldWriter) {
        if *self != 0 {
            writer.put_varint(number, i64::from(*self) as u64);
        }
    }
}

impl FieldType for bool {
    fn from_value(number: u32, value: &FieldValue) -> Result<Self, WireError> {
        match value {
            FieldValue::Varint(v) => Ok(*v != 0),
            other => Err(mismatch(number, WireType::Varint, other)),
        }
    }

    fn write(&self, number: u32, writer: &mut FieldWriter) {
        if *self {
            writer.put_varint(number, 1);
        }
    }
}

impl FieldType for f32 {
    fn from_value(number: u32, value: &FieldValue) -> Result<Self, WireError> {
        match value {
            FieldValue::Fixed32(bits) => Ok(f32::from_bits(*bits)),
            other => Err(mismatch(number, WireType::Fixed32, other)),
        }
    }

    fn write(&self, number: u32, writer: &mut FieldWriter) {
        if *self != 0.0 {
            writer.put_fixed32(number, self.to_bits());
        }
    }
}

impl FieldType for String {
    fn from_value(number: u32, value: &FieldValue) -> Result<Self, WireError> {
        match value {
            FieldValue::Bytes(raw) => String::from_utf8(raw.to_vec()).map_err(|_| WireError::InvalidUtf8(number)),
            other => Err(mismatch(number, WireType::LengthDelimited, other)),
        }
    }

    fn write(&self, number: u32, writer: &mut FieldWriter) {
        if !self.is_empty() {
            writer.put_bytes(number, self.as_bytes());
        }
    }
}

impl FieldType for Bytes {
    fn from_value(number: u32, value: &FieldValue) -> Result<Self, WireError> {
        match value {
            FieldValue::Bytes(raw) => Ok(raw.clone()),
            other => Err(mismatch(number, WireType::LengthDelimited, other)),
        }
    }

    fn write(&self, number: u32, writer: &mut FieldWriter) {
        if !self.is_empty() {
            writer.put_bytes(number, self);
        }
    }
}

impl<M: WireMessage> FieldType for Option<M> {
    fn from_value(number: u32, value: &FieldValue) -> Result<Self, WireError> {
        match value {
            FieldValue::Bytes(raw) => M::decode(raw).map(Some).map_err(|e| WireError::Nested {
                field: number,
                reason: e.error.to_string(),
            }),
            other => Err(mismatch(number, WireType::LengthDelimited, other)),
        }
    }

    fn write(&self, number: u32, writer: &mut FieldWriter) {
        if let Some(message) = self {
            writer.put_bytes(number, &message.encode());
        }
    }
}

fn serialize_hex<S: Serializer>(value: &Bytes, serializer: S) -> Result<S::Ok, S::Error> {
    serializer.serialize_str(&hex::encode(value))
}

fn deserialize_hex<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Bytes, D::Error> {
    let text = String::deserialize(deserializer)?;
    hex::decode(text.trim()).map(Bytes::from).map_err(serde::de::Error::custom)
}

macro_rules! wire_message {
    (
        $(#[$meta:meta])*
        pub struct $name:ident {
            $(
                $(#[$fmeta:meta])*
                $number:literal => $field:ident : $ty:ty,
            )+
        }
    ) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
        #[serde(rename_all = "camelCase", default)]
        pub struct $name {
            $(
                $(#[$fmeta])*
                pub $field: $ty,
            )+
        }

        impl WireMessage for $name {
            fn from_fields(fields: &[Field]) -> Result<Self, WireError> {
                let mut message = Self::default();
                for field in fields {
                    match field.number {
                        $( $number => message.$field = <$ty as FieldType>::from_value($number, &field.value)?, )+
                        _ => {}
                    }
                }
                Ok(message)
            }

            fn write_fields(&self, writer: &mut FieldWriter) {
                $( FieldType::write(&self.$field, $number, writer); )+
            }
        }
    };
}

wire_message! {
    /// Periodic liveness report
    pub struct Heartbeat {
        /// Device clock, unix seconds
        1 => timestamp: u32,
        /// Database id the device was provisioned with
        2 => device_db_id: u32,
        /// Board temperature, °C
        3 => temperature: f32,
        /// Relative humidity, %
        4 => humidity: f32,
        /// Panic input 1 closed
        5 => panic1: bool,
        /// Panic input 2 closed
        6 => panic2: bool,
        /// Siren output on
        7 => siren: bool,
        /// Turret output on
        8 => turret: bool,
        /// Box tamper switch closed
        9 => box_sw: bool,
        /// Seconds since boot
        10 => uptime: u32,
        /// Active uplink, 1 is Ethernet and 0 is Wi-Fi
        11 => eth_interface: u32,
        /// Firmware build
        12 => firmware: String,
        /// Fan PWM duty, %
        13 => fan_pwm_duty: u32,
    }
}

wire_message! {
    /// Alarm raised, cleared or output transition
    pub struct AlarmEvent {
        /// Device event sequence
        1 => sequence: u32,
        /// Device clock, unix seconds
        2 => timestamp: u32,
        /// Database id
        3 => device_db_id: u32,
        /// Alarm source
        #[serde(rename = "type", serialize_with = "serialize_enum::<AlarmType, _>")]
        4 => alarm_type: i32,
        /// Phase
        #[serde(serialize_with = "serialize_enum::<EventState, _>")]
        5 => state: i32,
        /// Priority
        #[serde(serialize_with = "serialize_enum::<Priority, _>")]
        6 => priority: i32,
        /// Input level at the time of the event
        7 => physical_state: bool,
        /// Output involved, for output events
        #[serde(serialize_with = "serialize_enum::<OutputType, _>")]
        8 => output_type: i32,
        /// Pattern involved, for output events
        #[serde(serialize_with = "serialize_enum::<PatternType, _>")]
        9 => pattern_type: i32,
        /// Planned duration
        10 => duration_seconds: u32,
        /// Time elapsed when reported
        11 => elapsed_seconds: u32,
    }
}

wire_message! {
    /// Full device status, published on change and on login
    #[allow(missing_docs)]
    pub struct StatusMessage {
        1 => sequence: u32,
        2 => timestamp: u32,
        3 => device_db_id: u32,
        #[serde(serialize_with = "serialize_enum::<DeviceState, _>")]
        4 => state: i32,
        5 => state_duration: u32,
        6 => uptime: u32,
        7 => boot_count: u32,
        8 => free_heap: u32,
        9 => min_heap: u32,
        10 => firmware: String,
        #[serde(serialize_with = "serialize_enum::<NetworkInterface, _>")]
        11 => network: i32,
        12 => connected: bool,
        13 => has_ip: bool,
        14 => rssi: i32,
        15 => ip_address: u32,
        #[serde(serialize_with = "serialize_hex", deserialize_with = "deserialize_hex")]
        16 => mac_address: Bytes,
        17 => mqtt_connected: bool,
        18 => ntp_synced: bool,
        19 => last_ntp_sync: u64,
        20 => panic1: bool,
        21 => panic2: bool,
        22 => box_sw: bool,
        23 => siren: bool,
        24 => turret: bool,
        25 => panic1_count: u32,
        26 => panic2_count: u32,
        27 => tamper_count: u32,
        28 => wifi_disconnects: u32,
        29 => mqtt_disconnects: u32,
        30 => temperature: f32,
        31 => humidity: f32,
        32 => country: String,
        33 => zone: u32,
        34 => latitude: f32,
        35 => longitude: f32,
        36 => error_flags: u32,
        37 => error_count: u32,
        38 => partition: u32,
        39 => ota_validated: bool,
    }
}

wire_message! {
    /// Broker-delivered last will
    pub struct LastWillMessage {
        /// Device sequence at connect
        1 => sequence: u32,
        /// Connect time, unix seconds
        2 => timestamp: u32,
        /// Database id
        3 => device_db_id: u32,
        /// Uptime when the session started
        4 => uptime_at_connect: u32,
        /// Firmware build
        5 => firmware: String,
        /// IPv4 address as u32
        6 => ip_address: u32,
        /// Signal strength at connect
        7 => rssi: i32,
        /// Device hostname
        8 => hostname: String,
    }
}

wire_message! {
    /// Device reply to a command
    pub struct CommandResponse {
        /// Request id of the command being answered
        1 => request_id: String,
        /// Device clock, unix seconds
        2 => timestamp: u32,
        /// Command succeeded
        3 => success: bool,
        /// Device error code
        4 => error_code: u32,
        /// Human readable result
        5 => message: String,
        /// Command-specific data
        #[serde(serialize_with = "serialize_hex", deserialize_with = "deserialize_hex")]
        6 => payload: Bytes,
    }
}

wire_message! {
    /// Reboot, reset and clock commands
    pub struct SystemCommand {
        /// What to do
        #[serde(serialize_with = "serialize_enum::<SystemAction, _>")]
        1 => action: i32,
        /// Delay before acting
        2 => delay_seconds: u32,
        /// New clock value for SET_TIME
        3 => unix_time: u32,
    }
}

wire_message! {
    /// Output pattern control
    pub struct OutputCommand {
        /// Output channel
        #[serde(serialize_with = "serialize_enum::<OutputType, _>")]
        1 => output: i32,
        /// Drive pattern
        #[serde(serialize_with = "serialize_enum::<PatternType, _>")]
        2 => pattern: i32,
        /// On/off for constant patterns
        3 => state: bool,
        /// Total run time, seconds
        4 => total_duration: u32,
        /// Pulses per cycle
        5 => pulse_count: u32,
        /// Pulse on time
        6 => on_duration_ms: u32,
        /// Pulse off time
        7 => off_duration_ms: u32,
        /// Seconds between cycles
        8 => repeat_interval: u32,
        /// Pattern argument; PWM duty for the fan
        9 => custom_data: u32,
    }
}

wire_message! {
    /// Diagnostics request
    pub struct DiagnosticCommand {
        /// What to report
        #[serde(serialize_with = "serialize_enum::<DiagAction, _>")]
        1 => action: i32,
        /// Self-test selection bitmask
        2 => test_mask: u32,
        /// Lines for LOG_DUMP
        3 => log_lines: u32,
    }
}

wire_message! {
    /// Firmware update control
    pub struct OtaCommand {
        /// What to do
        #[serde(serialize_with = "serialize_enum::<OtaAction, _>")]
        1 => action: i32,
        /// Image location
        2 => url: String,
        /// Image MD5, hex
        3 => md5: String,
        /// Image size, bytes
        4 => size: u32,
    }
}

wire_message! {
    /// Read back a configuration section
    pub struct ConfigReadCommand {
        /// Section
        #[serde(rename = "type", serialize_with = "serialize_enum::<ReadType, _>")]
        1 => read_type: i32,
        /// Include passwords and keys
        2 => include_sensitive: bool,
    }
}

wire_message! {
    /// Wi-Fi settings
    #[allow(missing_docs)]
    pub struct WifiConfig {
        1 => ssid: String,
        2 => password: String,
        3 => dhcp: bool,
        4 => static_ip: u32,
        5 => gateway: u32,
        6 => netmask: u32,
    }
}

wire_message! {
    /// Broker settings
    #[allow(missing_docs)]
    pub struct MqttConfig {
        1 => broker_url: String,
        2 => port: u32,
        3 => username: String,
        4 => password: String,
        5 => keepalive: u32,
        6 => qos: u32,
        7 => use_tls: bool,
    }
}

wire_message! {
    /// Identity and heartbeat settings
    pub struct DeviceConfig {
        /// Hostname used in topics
        1 => hostname: String,
        /// Database id echoed in telemetry
        2 => device_id: u32,
        /// Publish heartbeats
        3 => enable_heartbeat: bool,
        /// Heartbeat period, seconds
        4 => heartbeat_interval: u32,
    }
}

wire_message! {
    /// Installation location
    #[allow(missing_docs)]
    pub struct LocationConfig {
        1 => country: String,
        2 => zone: u32,
        3 => latitude: f32,
        4 => longitude: f32,
    }
}

wire_message! {
    /// Time sync settings
    #[allow(missing_docs)]
    pub struct NtpConfig {
        1 => server1: String,
        2 => server2: String,
        3 => server3: String,
        4 => enable_sync: bool,
        5 => sync_interval: u32,
        6 => timezone_offset: i32,
        7 => timezone_name: String,
    }
}

wire_message! {
    /// Bluetooth LE settings
    #[allow(missing_docs)]
    pub struct BleConfig {
        1 => enable: bool,
        2 => device_name: String,
        3 => advertise: bool,
        4 => interval_ms: u32,
        #[serde(serialize_with = "serialize_hex", deserialize_with = "deserialize_hex")]
        5 => adv_hmac_key: Bytes,
        #[serde(serialize_with = "serialize_hex", deserialize_with = "deserialize_hex")]
        6 => spp_hmac_key: Bytes,
        7 => tx_power: i32,
    }
}

wire_message! {
    /// Configuration update; `config_type` selects the populated section
    pub struct ConfigCommand {
        /// Section being updated
        #[serde(rename = "type", serialize_with = "serialize_enum::<ConfigType, _>")]
        1 => config_type: i32,
        /// Wi-Fi section
        #[serde(skip_serializing_if = "Option::is_none")]
        2 => wifi: Option<WifiConfig>,
        /// Broker section
        #[serde(skip_serializing_if = "Option::is_none")]
        3 => mqtt: Option<MqttConfig>,
        /// Identity section
        #[serde(skip_serializing_if = "Option::is_none")]
        4 => device: Option<DeviceConfig>,
        /// Location section
        #[serde(skip_serializing_if = "Option::is_none")]
        5 => location: Option<LocationConfig>,
        /// Time sync section
        #[serde(skip_serializing_if = "Option::is_none")]
        6 => ntp: Option<NtpConfig>,
        /// Bluetooth section
        #[serde(skip_serializing_if = "Option::is_none")]
        7 => ble: Option<BleConfig>,
    }
}

/// The single command carried by an envelope
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum CommandPayload {
    /// Field 5
    System(SystemCommand),
    /// Field 6
    Config(ConfigCommand),
    /// Field 7
    Output(OutputCommand),
    /// Field 8
    Diagnostic(DiagnosticCommand),
    /// Field 9
    Ota(OtaCommand),
    /// Field 10
    ConfigRead(ConfigReadCommand),
}

impl CommandPayload {
    fn field_number(&self) -> u32 {
        match self {
            CommandPayload::System(_) => 5,
            CommandPayload::Config(_) => 6,
            CommandPayload::Output(_) => 7,
            CommandPayload::Diagnostic(_) => 8,
            CommandPayload::Ota(_) => 9,
            CommandPayload::ConfigRead(_) => 10,
        }
    }

    fn encode(&self) -> Bytes {
        match self {
            CommandPayload::System(c) => c.encode(),
            CommandPayload::Config(c) => c.encode(),
            CommandPayload::Output(c) => c.encode(),
            CommandPayload::Diagnostic(c) => c.encode(),
            CommandPayload::Ota(c) => c.encode(),
            CommandPayload::ConfigRead(c) => c.encode(),
        }
    }
}

/// Outbound command wrapper
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CommandEnvelope {
    /// Matches the HMAC envelope sequence
    pub sequence: u32,
    /// Build time, unix seconds
    pub timestamp: u32,
    /// Correlation id
    pub request_id: String,
    /// Privilege level asserted by the backend
    pub auth_level: u32,
    /// The command itself
    #[serde(flatten)]
    pub command: Option<CommandPayload>,
}

impl WireMessage for CommandEnvelope {
    fn from_fields(fields: &[Field]) -> Result<Self, WireError> {
        let mut envelope = Self::default();
        for field in fields {
            let value = &field.value;
            match field.number {
                1 => envelope.sequence = u32::from_value(1, value)?,
                2 => envelope.timestamp = u32::from_value(2, value)?,
                3 => envelope.request_id = String::from_value(3, value)?,
                4 => envelope.auth_level = u32::from_value(4, value)?,
                // oneof: the last member on the wire wins
                5 => envelope.command = Option::<SystemCommand>::from_value(5, value)?.map(CommandPayload::System),
                6 => envelope.command = Option::<ConfigCommand>::from_value(6, value)?.map(CommandPayload::Config),
                7 => envelope.command = Option::<OutputCommand>::from_value(7, value)?.map(CommandPayload::Output),
                8 => envelope.command = Option::<DiagnosticCommand>::from_value(8, value)?.map(CommandPayload::Diagnostic),
                9 => envelope.command = Option::<OtaCommand>::from_value(9, value)?.map(CommandPayload::Ota),
                10 => envelope.command = Option::<ConfigReadCommand>::from_value(10, value)?.map(CommandPayload::ConfigRead),
                _ => {}
            }
        }
        Ok(envelope)
    }

    fn write_fields(&self, writer: &mut FieldWriter) {
        self.sequence.write(1, writer);
        self.timestamp.write(2, writer);
        self.request_id.write(3, writer);
        self.auth_level.write(4, writer);
        if let Some(command) = &self.command {
            // Present even when every inner field is default
            writer.put_bytes(command.field_number(), &command.encode());
        }
    }
}

/// Message kind, derived from the last topic segment
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageType {
    /// `hb`
    Heartbeat,
    /// `status`
    Status,
    /// `login`, a status message sent once after connecting
    Login,
    /// `alarm`
    Alarm,
    /// `lw`
    LastWill,
    /// `response`
    Response,
    /// `cmd`, backend to device
    Command,
}

impl MessageType {
    /// Every inbound type the backend subscribes to
    pub const INBOUND: [MessageType; 6] = [
        MessageType::Heartbeat,
        MessageType::Status,
        MessageType::Alarm,
        MessageType::LastWill,
        MessageType::Login,
        MessageType::Response,
    ];

    /// Parse a topic suffix
    pub fn from_suffix(suffix: &str) -> Option<Self> {
        match suffix {
            "hb" => Some(MessageType::Heartbeat),
            "status" => Some(MessageType::Status),
            "login" => Some(MessageType::Login),
            "alarm" => Some(MessageType::Alarm),
            "lw" => Some(MessageType::LastWill),
            "response" | "resp" => Some(MessageType::Response),
            "cmd" => Some(MessageType::Command),
            _ => None,
        }
    }

    /// Topic suffix
    pub fn suffix(&self) -> &'static str {
        match self {
            MessageType::Heartbeat => "hb",
            MessageType::Status => "status",
            MessageType::Login => "login",
            MessageType::Alarm => "alarm",
            MessageType::LastWill => "lw",
            MessageType::Response => "response",
            MessageType::Command => "cmd",
        }
    }
}

impl fmt::Display for MessageType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.suffix())
    }
}

/// Any decoded device message
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum Message {
    /// Heartbeat
    Heartbeat(Heartbeat),
    /// Status or login
    Status(StatusMessage),
    /// Alarm event
    Alarm(AlarmEvent),
    /// Last will
    LastWill(LastWillMessage),
    /// Command response
    Response(CommandResponse),
    /// Outbound command
    Command(CommandEnvelope),
}

impl Message {
    /// Decode a payload according to its topic-derived type
    pub fn decode(message_type: MessageType, payload: &[u8]) -> Result<Self, DecodeError> {
        Ok(match message_type {
            MessageType::Heartbeat => Message::Heartbeat(Heartbeat::decode(payload)?),
            MessageType::Status | MessageType::Login => Message::Status(StatusMessage::decode(payload)?),
            MessageType::Alarm => Message::Alarm(AlarmEvent::decode(payload)?),
            MessageType::LastWill => Message::LastWill(LastWillMessage::decode(payload)?),
            MessageType::Response => Message::Response(CommandResponse::decode(payload)?),
            MessageType::Command => Message::Command(CommandEnvelope::decode(payload)?),
        })
    }

    /// Encode back to a payload
    pub fn encode(&self) -> Bytes {
        match self {
            Message::Heartbeat(m) => m.encode(),
            Message::Status(m) => m.encode(),
            Message::Alarm(m) => m.encode(),
            Message::LastWill(m) => m.encode(),
            Message::Response(m) => m.encode(),
            Message::Command(m) => m.encode(),
        }
    }

    /// JSON rendering with enum labels
    pub fn to_json(&self) -> serde_json::Value {
        serde_json::to_value(self).unwrap_or(serde_json::Value::Null)
    }
}

/// Decode a payload according to its topic-derived type
pub fn decode_message(message_type: MessageType, payload: &[u8]) -> Result<Message, DecodeError> {
    Message::decode(message_type, payload)
}
