//! Command construction errors.

use crate::request::CommandKind;
use fleet_wire::WireError;
use thiserror::Error;

/// Errors raised while validating or building a command
#[derive(Error, Debug, Clone, PartialEq)]
pub enum CommandError {
    /// Command kind not recognised
    #[error("unknown command kind '{0}'")]
    UnknownKind(String),

    /// Action name not valid for the kind
    #[error("unknown {kind} action '{action}'")]
    UnknownAction {
        /// Command kind
        kind: CommandKind,
        /// Name as supplied
        action: String,
    },

    /// A required option was not supplied
    #[error("{command} requires option '{option}'")]
    MissingRequiredOption {
        /// Command being built, e.g. `OTA START_UPDATE`
        command: String,
        /// Missing option name
        option: &'static str,
    },

    /// Fan PWM without a usable duty cycle
    #[error("fan PWM requires customData between 0 and 100, got {0:?}")]
    InvalidDutyCycle(Option<i64>),

    /// Numeric option outside its accepted range
    #[error("option '{option}' = {value} outside {min}..={max}")]
    OutOfRange {
        /// Option name
        option: &'static str,
        /// Value supplied
        value: i64,
        /// Inclusive lower bound
        min: i64,
        /// Inclusive upper bound
        max: i64,
    },

    /// Option present but malformed
    #[error("invalid option '{option}': {reason}")]
    InvalidOption {
        /// Option name
        option: String,
        /// What is wrong with it
        reason: String,
    },

    /// Encoded command does not fit an envelope
    #[error("encode failed: {0}")]
    Encode(#[from] WireError),
}
