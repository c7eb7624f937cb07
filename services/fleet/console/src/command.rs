//! AT command parsing.
//!
//! A line is `AT`, `AT+<NAME>` or `AT+<NAME>=<value>`. Names are matched
//! case-insensitively; values keep their case so credentials and hostname
//! patterns survive intact.

use crate::error::ConsoleError;
use crate::settings::{DirectionFilter, DisplayMode, Verbosity};
use fleet_audit::LogToggle;
use fleet_wire::MessageType;

/// One parsed console command
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AtCommand {
    /// Bare `AT`
    Ping,
    /// `AT+AUTH=<user>,<pass>`
    Auth {
        /// Username
        user: String,
        /// Password
        password: String,
    },
    /// `AT+HELP`
    Help,
    /// `AT+MODE=raw|decoded|both`
    Mode(DisplayMode),
    /// `AT+HMAC=0|1`
    Hmac(bool),
    /// `AT+VERBOSE=quiet|normal|verbose`
    Verbose(Verbosity),
    /// `AT+FILTER=<pattern>|clear`
    Filter(Option<String>),
    /// `AT+DIRECTION=in|out|both`
    Direction(DirectionFilter),
    /// `AT+SETMSG=<type,...>|all`
    SetMessageTypes(Option<Vec<MessageType>>),
    /// `AT+STATUS`
    Status,
    /// `AT+CMDLOG[=ON|OFF]` and `AT+ALARMLOG[=ON|OFF]`
    Toggle(LogToggle, Option<bool>),
    /// `AT+DEVICES`
    Devices,
    /// `AT+BUFFER`
    Buffer,
    /// `AT+CLEAR`
    Clear,
}

/// Help text, one line per command
pub const HELP: &[(&str, &str)] = &[
    ("AT", "Test connection"),
    ("AT+AUTH=<user>,<pass>", "Authenticate"),
    ("AT+HELP", "Show this help"),
    ("AT+STATUS", "Transport status and counters"),
    ("AT+DEVICES", "List devices seen"),
    ("AT+BUFFER", "Replay recent messages"),
    ("AT+CLEAR", "Clear the message buffer"),
    ("AT+MODE=raw|decoded|both", "Set display mode"),
    ("AT+HMAC=0|1", "Hide or show envelope details"),
    ("AT+VERBOSE=quiet|normal|verbose", "Set detail level"),
    ("AT+FILTER=<pattern>|clear", "Filter by hostname, * wildcards allowed"),
    ("AT+DIRECTION=in|out|both", "Filter by direction"),
    ("AT+SETMSG=<type,...>|all", "Filter by message type (hb,status,login,alarm,lw,response,cmd)"),
    ("AT+CMDLOG[=ON|OFF]", "Show or set command audit logging"),
    ("AT+ALARMLOG[=ON|OFF]", "Show or set alarm audit logging"),
];

/// Render the help table
pub fn help_text() -> String {
    let width = HELP.iter().map(|(c, _)| c.len()).max().unwrap_or(0);
    let mut text = String::from("Available commands:");
    for (command, description) in HELP {
        text.push_str(&format!("\n  {:<width$}  {}", command, description, width = width));
    }
    text
}

/// Split a line into an upper-cased command name and an optional value
///
/// Bare `AT` yields an empty name.
pub fn split(line: &str) -> Result<(String, Option<String>), ConsoleError> {
    let line = line.trim();
    match line.get(..2) {
        Some(prefix) if prefix.eq_ignore_ascii_case("AT") => {}
        _ => return Err(ConsoleError::InvalidFormat),
    }
    let rest = &line[2..];
    if rest.is_empty() {
        return Ok((String::new(), None));
    }
    let body = rest.strip_prefix('+').ok_or(ConsoleError::InvalidFormat)?;
    match body.split_once('=') {
        Some((name, value)) => Ok((name.trim().to_ascii_uppercase(), Some(value.trim().to_string()))),
        None => Ok((body.trim().to_ascii_uppercase(), None)),
    }
}

fn invalid(command: &str, value: &str, expected: &'static str) -> ConsoleError {
    ConsoleError::InvalidCommandValue {
        command: command.to_string(),
        value: value.to_string(),
        expected,
    }
}

fn require<'a>(command: &str, value: Option<&'a str>, expected: &'static str) -> Result<&'a str, ConsoleError> {
    match value {
        Some(v) if !v.is_empty() => Ok(v),
        _ => Err(invalid(command, value.unwrap_or(""), expected)),
    }
}

fn no_value(command: &str, value: Option<&str>, result: AtCommand) -> Result<AtCommand, ConsoleError> {
    match value {
        None => Ok(result),
        Some(v) => Err(invalid(command, v, "no value")),
    }
}

fn parse_switch(command: &str, value: &str) -> Result<bool, ConsoleError> {
    match value.to_ascii_uppercase().as_str() {
        "1" | "ON" | "TRUE" => Ok(true),
        "0" | "OFF" | "FALSE" => Ok(false),
        _ => Err(invalid(command, value, "ON|OFF")),
    }
}

impl AtCommand {
    /// Build a command from a name and value produced by [`split`]
    pub fn from_parts(name: &str, value: Option<&str>) -> Result<Self, ConsoleError> {
        match name {
            "" => no_value("AT", value, AtCommand::Ping),
            "AUTH" => {
                let value = require(name, value, "<user>,<pass>")?;
                let (user, password) = value
                    .split_once(',')
                    .ok_or_else(|| invalid(name, "<hidden>", "<user>,<pass>"))?;
                Ok(AtCommand::Auth {
                    user: user.trim().to_string(),
                    password: password.trim().to_string(),
                })
            }
            "HELP" => no_value(name, value, AtCommand::Help),
            "STATUS" => no_value(name, value, AtCommand::Status),
            "DEVICES" => no_value(name, value, AtCommand::Devices),
            "BUFFER" => no_value(name, value, AtCommand::Buffer),
            "CLEAR" => no_value(name, value, AtCommand::Clear),
            "MODE" => {
                let v = require(name, value, "raw|decoded|both")?;
                v.parse()
                    .map(AtCommand::Mode)
                    .map_err(|_| invalid(name, v, "raw|decoded|both"))
            }
            "HMAC" => {
                let v = require(name, value, "0|1")?;
                parse_switch(name, v).map(AtCommand::Hmac)
            }
            "VERBOSE" => {
                let v = require(name, value, "quiet|normal|verbose")?;
                v.parse()
                    .map(AtCommand::Verbose)
                    .map_err(|_| invalid(name, v, "quiet|normal|verbose"))
            }
            "DIRECTION" => {
                let v = require(name, value, "in|out|both")?;
                v.parse()
                    .map(AtCommand::Direction)
                    .map_err(|_| invalid(name, v, "in|out|both"))
            }
            "FILTER" => {
                let v = require(name, value, "<pattern>|clear")?;
                match v.to_ascii_lowercase().as_str() {
                    "clear" | "none" => Ok(AtCommand::Filter(None)),
                    _ => Ok(AtCommand::Filter(Some(v.to_string()))),
                }
            }
            "SETMSG" => {
                let v = require(name, value, "<type,...>|all")?;
                if v.eq_ignore_ascii_case("all") {
                    return Ok(AtCommand::SetMessageTypes(None));
                }
                let mut types = Vec::new();
                for item in v.split(',').map(str::trim).filter(|s| !s.is_empty()) {
                    let t = MessageType::from_suffix(&item.to_ascii_lowercase())
                        .ok_or_else(|| invalid(name, item, "hb,status,login,alarm,lw,response,cmd"))?;
                    if !types.contains(&t) {
                        types.push(t);
                    }
                }
                if types.is_empty() {
                    return Err(invalid(name, v, "<type,...>|all"));
                }
                Ok(AtCommand::SetMessageTypes(Some(types)))
            }
            "CMDLOG" | "ALARMLOG" => {
                let toggle = if name == "CMDLOG" {
                    LogToggle::CmdLog
                } else {
                    LogToggle::AlarmLog
                };
                let state = match value {
                    None => None,
                    Some(v) => Some(parse_switch(name, v)?),
                };
                Ok(AtCommand::Toggle(toggle, state))
            }
            other => Err(ConsoleError::UnknownCommand(format!("AT+{}", other))),
        }
    }
}

/// Parse a full line
pub fn parse(line: &str) -> Result<AtCommand, ConsoleError> {
    let (name, value) = split(line)?;
    AtCommand::from_parts(&name, value.as_deref())
}
