//! Typed command requests and their validation rules.
//!
//! A request is validated as a whole before any sequence number is spent;
//! out-of-range values are rejected, never clamped.

use crate::error::CommandError;
use fleet_wire::{
    deserialize_enum, BleConfig, CommandPayload, ConfigCommand, ConfigReadCommand, ConfigType,
    DeviceConfig, DiagAction, DiagnosticCommand, LocationConfig, MqttConfig, NtpConfig, OtaAction,
    OtaCommand, OutputCommand, OutputType, PatternType, ReadType, SystemAction, SystemCommand,
    WifiConfig, WireEnum,
};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;
use std::fmt;
use std::str::FromStr;
use url::Url;

/// Largest OTA image accepted, bytes
pub const MAX_OTA_SIZE: i64 = 10 * 1024 * 1024;

/// Longest OTA URL accepted
pub const MAX_URL_LEN: usize = 256;

/// Heartbeat period pushed to devices on login
pub const SYNC_HEARTBEAT_INTERVAL: u32 = 60;

/// Command family
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CommandKind {
    /// Self tests and reports
    Diagnostic,
    /// Reboot, reset, clock
    System,
    /// Siren, turret, relays, fan
    Output,
    /// Firmware update control
    Ota,
    /// Configuration update
    Config,
    /// Configuration read-back
    ConfigRead,
}

impl CommandKind {
    /// Upper-case name
    pub fn as_str(&self) -> &'static str {
        match self {
            CommandKind::Diagnostic => "DIAGNOSTIC",
            CommandKind::System => "SYSTEM",
            CommandKind::Output => "OUTPUT",
            CommandKind::Ota => "OTA",
            CommandKind::Config => "CONFIG",
            CommandKind::ConfigRead => "CONFIG_READ",
        }
    }
}

impl fmt::Display for CommandKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for CommandKind {
    type Err = CommandError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().replace('-', "_").as_str() {
            "DIAGNOSTIC" | "DIAG" => Ok(CommandKind::Diagnostic),
            "SYSTEM" | "SYS" => Ok(CommandKind::System),
            "OUTPUT" => Ok(CommandKind::Output),
            "OTA" => Ok(CommandKind::Ota),
            "CONFIG" => Ok(CommandKind::Config),
            "CONFIG_READ" | "CONFIGREAD" => Ok(CommandKind::ConfigRead),
            _ => Err(CommandError::UnknownKind(s.to_string())),
        }
    }
}

/// Options for a system command
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct SystemOptions {
    /// Delay before acting, 0..=3600 s
    pub delay_seconds: Option<i64>,
    /// New clock value; required for SET_TIME
    pub unix_time: Option<i64>,
}

fn deserialize_pattern<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Option<PatternType>, D::Error> {
    deserialize_enum(deserializer).map(Some)
}

/// Options for an output command
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct OutputOptions {
    /// Drive pattern, by name or number
    #[serde(deserialize_with = "deserialize_pattern")]
    pub pattern: Option<PatternType>,
    /// On/off for constant patterns
    pub state: Option<bool>,
    /// 0..=86400 s
    pub total_duration: Option<i64>,
    /// 0..=1000
    pub pulse_count: Option<i64>,
    /// 10..=60000 ms
    pub on_duration_ms: Option<i64>,
    /// 10..=60000 ms
    pub off_duration_ms: Option<i64>,
    /// 0..=3600 s
    pub repeat_interval: Option<i64>,
    /// 0..=100; PWM duty for the fan
    pub custom_data: Option<i64>,
}

/// Options for a diagnostic command
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct DiagnosticOptions {
    /// Self-test selection bitmask
    pub test_mask: Option<u32>,
    /// 0..=1000
    pub log_lines: Option<i64>,
}

/// Options for an OTA command
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct OtaOptions {
    /// Image location, http or https
    pub url: Option<String>,
    /// Image MD5, 32 hex digits
    pub md5: Option<String>,
    /// Image size, 1..=10 MiB
    pub size: Option<i64>,
}

/// Options for a config read
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ConfigReadOptions {
    /// Include passwords and keys
    pub include_sensitive: bool,
}

/// A configuration section update
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum ConfigUpdate {
    /// Wi-Fi section
    Wifi(WifiConfig),
    /// Broker section
    Mqtt(MqttConfig),
    /// Identity section
    Device(DeviceConfig),
    /// Location section
    Location(LocationConfig),
    /// Time sync section
    Ntp(NtpConfig),
    /// Bluetooth section
    Ble(BleConfig),
}

impl ConfigUpdate {
    /// Section selector
    pub fn config_type(&self) -> ConfigType {
        match self {
            ConfigUpdate::Wifi(_) => ConfigType::Wifi,
            ConfigUpdate::Mqtt(_) => ConfigType::Mqtt,
            ConfigUpdate::Device(_) => ConfigType::Device,
            ConfigUpdate::Location(_) => ConfigType::Location,
            ConfigUpdate::Ntp(_) => ConfigType::Ntp,
            ConfigUpdate::Ble(_) => ConfigType::Ble,
        }
    }

    fn into_command(self) -> ConfigCommand {
        let mut command = ConfigCommand {
            config_type: self.config_type().into(),
            ..Default::default()
        };
        match self {
            ConfigUpdate::Wifi(c) => command.wifi = Some(c),
            ConfigUpdate::Mqtt(c) => command.mqtt = Some(c),
            ConfigUpdate::Device(c) => command.device = Some(c),
            ConfigUpdate::Location(c) => command.location = Some(c),
            ConfigUpdate::Ntp(c) => command.ntp = Some(c),
            ConfigUpdate::Ble(c) => command.ble = Some(c),
        }
        command
    }
}

/// A command before validation and sequencing
#[derive(Debug, Clone, PartialEq)]
pub enum CommandRequest {
    /// System action
    System {
        /// What to do
        action: SystemAction,
        /// Timing options
        options: SystemOptions,
    },
    /// Output pattern
    Output {
        /// Output channel; doubles as the action name
        output: OutputType,
        /// Pattern and timing
        options: OutputOptions,
    },
    /// Diagnostics
    Diagnostic {
        /// What to report
        action: DiagAction,
        /// Report options
        options: DiagnosticOptions,
    },
    /// Firmware update
    Ota {
        /// What to do
        action: OtaAction,
        /// Image options
        options: OtaOptions,
    },
    /// Configuration update
    Config(ConfigUpdate),
    /// Configuration read-back
    ConfigRead {
        /// Section to read
        read_type: ReadType,
        /// Read options
        options: ConfigReadOptions,
    },
}

impl CommandRequest {
    /// Command family
    pub fn kind(&self) -> CommandKind {
        match self {
            CommandRequest::System { .. } => CommandKind::System,
            CommandRequest::Output { .. } => CommandKind::Output,
            CommandRequest::Diagnostic { .. } => CommandKind::Diagnostic,
            CommandRequest::Ota { .. } => CommandKind::Ota,
            CommandRequest::Config(_) => CommandKind::Config,
            CommandRequest::ConfigRead { .. } => CommandKind::ConfigRead,
        }
    }

    /// Action name without its family prefix, e.g. `REBOOT`
    pub fn action(&self) -> &'static str {
        match self {
            CommandRequest::System { action, .. } => action.name(),
            CommandRequest::Output { output, .. } => output.name(),
            CommandRequest::Diagnostic { action, .. } => action.name(),
            CommandRequest::Ota { action, .. } => action.name(),
            CommandRequest::Config(update) => update.config_type().name(),
            CommandRequest::ConfigRead { read_type, .. } => read_type.name(),
        }
    }

    /// Push identity to a device that just logged in
    pub fn device_sync(hostname: &str, device_id: u32) -> Self {
        CommandRequest::Config(ConfigUpdate::Device(DeviceConfig {
            hostname: hostname.to_string(),
            device_id,
            enable_heartbeat: true,
            heartbeat_interval: SYNC_HEARTBEAT_INTERVAL,
        }))
    }

    /// Parse the string/JSON form: enum names for the action, camelCase option keys
    pub fn from_options(kind: CommandKind, action: &str, options: &Value) -> Result<Self, CommandError> {
        let unknown = || CommandError::UnknownAction {
            kind,
            action: action.to_string(),
        };

        Ok(match kind {
            CommandKind::System => CommandRequest::System {
                action: known(SystemAction::from_name(action)).ok_or_else(unknown)?,
                options: parse_options(options)?,
            },
            CommandKind::Output => CommandRequest::Output {
                output: known(OutputType::from_name(action)).ok_or_else(unknown)?,
                options: parse_options(options)?,
            },
            CommandKind::Diagnostic => CommandRequest::Diagnostic {
                action: known(DiagAction::from_name(action)).ok_or_else(unknown)?,
                options: parse_options(options)?,
            },
            CommandKind::Ota => CommandRequest::Ota {
                action: known(OtaAction::from_name(action)).ok_or_else(unknown)?,
                options: parse_options(options)?,
            },
            CommandKind::Config => {
                let update = match known(ConfigType::from_name(action)).ok_or_else(unknown)? {
                    ConfigType::Wifi => ConfigUpdate::Wifi(parse_options(options)?),
                    ConfigType::Mqtt => ConfigUpdate::Mqtt(parse_options(options)?),
                    ConfigType::Device => ConfigUpdate::Device(parse_options(options)?),
                    ConfigType::Location => ConfigUpdate::Location(parse_options(options)?),
                    ConfigType::Ntp => ConfigUpdate::Ntp(parse_options(options)?),
                    ConfigType::Ble => ConfigUpdate::Ble(parse_options(options)?),
                    ConfigType::Unknown => return Err(unknown()),
                };
                CommandRequest::Config(update)
            }
            CommandKind::ConfigRead => CommandRequest::ConfigRead {
                read_type: known(ReadType::from_name(action)).ok_or_else(unknown)?,
                options: parse_options(options)?,
            },
        })
    }

    /// Validate and produce the wire command
    pub fn to_payload(&self) -> Result<CommandPayload, CommandError> {
        match self {
            CommandRequest::System { action, options } => {
                let delay = check_range("delaySeconds", options.delay_seconds, 0, 3600)?;
                if *action == SystemAction::SetTime && options.unix_time.is_none() {
                    return Err(self.missing("unixTime"));
                }
                let unix_time = check_range("unixTime", options.unix_time, 0, u32::MAX as i64)?;
                Ok(CommandPayload::System(SystemCommand {
                    action: (*action).into(),
                    delay_seconds: delay,
                    unix_time,
                }))
            }
            CommandRequest::Output { output, options } => {
                let pattern = options.pattern.ok_or_else(|| self.missing("pattern"))?;
                if *output == OutputType::Fan && pattern == PatternType::Pwm {
                    match options.custom_data {
                        Some(duty) if (0..=100).contains(&duty) => {}
                        other => return Err(CommandError::InvalidDutyCycle(other)),
                    }
                }
                Ok(CommandPayload::Output(OutputCommand {
                    output: (*output).into(),
                    pattern: pattern.into(),
                    state: options.state.unwrap_or(false),
                    total_duration: check_range("totalDuration", options.total_duration, 0, 86_400)?,
                    pulse_count: check_range("pulseCount", options.pulse_count, 0, 1000)?,
                    on_duration_ms: check_range("onDurationMs", options.on_duration_ms, 10, 60_000)?,
                    off_duration_ms: check_range("offDurationMs", options.off_duration_ms, 10, 60_000)?,
                    repeat_interval: check_range("repeatInterval", options.repeat_interval, 0, 3600)?,
                    custom_data: check_range("customData", options.custom_data, 0, 100)?,
                }))
            }
            CommandRequest::Diagnostic { action, options } => Ok(CommandPayload::Diagnostic(DiagnosticCommand {
                action: (*action).into(),
                test_mask: options.test_mask.unwrap_or(0),
                log_lines: check_range("logLines", options.log_lines, 0, 1000)?,
            })),
            CommandRequest::Ota { action, options } => {
                let mut command = OtaCommand {
                    action: (*action).into(),
                    ..Default::default()
                };
                if *action == OtaAction::StartUpdate {
                    let url = options.url.as_deref().ok_or_else(|| self.missing("url"))?;
                    let md5 = options.md5.as_deref().ok_or_else(|| self.missing("md5"))?;
                    let size = options.size.ok_or_else(|| self.missing("size"))?;
                    validate_url(url)?;
                    validate_md5(md5)?;
                    command.url = url.to_string();
                    command.md5 = md5.to_ascii_lowercase();
                    command.size = check_range("size", Some(size), 1, MAX_OTA_SIZE)?;
                }
                Ok(CommandPayload::Ota(command))
            }
            CommandRequest::Config(update) => Ok(CommandPayload::Config(update.clone().into_command())),
            CommandRequest::ConfigRead { read_type, options } => Ok(CommandPayload::ConfigRead(ConfigReadCommand {
                read_type: (*read_type).into(),
                include_sensitive: options.include_sensitive,
            })),
        }
    }

    fn missing(&self, option: &'static str) -> CommandError {
        CommandError::MissingRequiredOption {
            command: format!("{} {}", self.kind(), self.action()),
            option,
        }
    }
}

// Zero values are placeholders, not selectable actions
fn known<E: WireEnum>(value: Option<E>) -> Option<E> {
    value.filter(|e| !e.name().ends_with("UNKNOWN"))
}

fn parse_options<T: DeserializeOwned + Default>(options: &Value) -> Result<T, CommandError> {
    if options.is_null() {
        return Ok(T::default());
    }
    serde_json::from_value(options.clone()).map_err(|e| CommandError::InvalidOption {
        option: "options".to_string(),
        reason: e.to_string(),
    })
}

fn check_range(option: &'static str, value: Option<i64>, min: i64, max: i64) -> Result<u32, CommandError> {
    match value {
        None => Ok(0),
        Some(v) if (min..=max).contains(&v) => Ok(v as u32),
        Some(v) => Err(CommandError::OutOfRange {
            option,
            value: v,
            min,
            max,
        }),
    }
}

fn validate_url(url: &str) -> Result<(), CommandError> {
    let invalid = |reason: String| CommandError::InvalidOption {
        option: "url".to_string(),
        reason,
    };

    if url.len() > MAX_URL_LEN {
        return Err(invalid(format!("longer than {} characters", MAX_URL_LEN)));
    }
    let parsed = Url::parse(url).map_err(|e| invalid(e.to_string()))?;
    if !matches!(parsed.scheme(), "http" | "https") {
        return Err(invalid("scheme must be http or https".to_string()));
    }
    match parsed.host_str() {
        Some(host) if !host.is_empty() => Ok(()),
        _ => Err(invalid("missing host".to_string())),
    }
}

fn validate_md5(md5: &str) -> Result<(), CommandError> {
    if md5.len() == 32 && md5.chars().all(|c| c.is_ascii_hexdigit()) {
        Ok(())
    } else {
        Err(CommandError::InvalidOption {
            option: "md5".to_string(),
            reason: "expected 32 hex digits".to_string(),
        })
    }
}
