//! Console errors.

use thiserror::Error;

/// Console errors
///
/// Every variant except `Io` is reported to the client as an error frame and
/// leaves the connection open.
#[derive(Error, Debug)]
pub enum ConsoleError {
    /// Line does not start with `AT`
    #[error("Invalid command format: expected AT+<NAME>[=<value>]")]
    InvalidFormat,

    /// Command other than AT+AUTH before authentication
    #[error("Authentication required: use AT+AUTH=<user>,<pass>")]
    AuthRequired,

    /// Command name not recognized
    #[error("Unknown command: {0}")]
    UnknownCommand(String),

    /// Recognized command with a bad value
    #[error("Invalid value '{value}' for AT+{command}, expected {expected}")]
    InvalidCommandValue {
        /// Command name
        command: String,
        /// Value as sent
        value: String,
        /// Accepted values
        expected: &'static str,
    },

    /// Socket failure
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl ConsoleError {
    /// Short machine-readable code for error frames
    pub fn code(&self) -> &'static str {
        match self {
            ConsoleError::InvalidFormat => "InvalidFormat",
            ConsoleError::AuthRequired => "AuthRequired",
            ConsoleError::UnknownCommand(_) => "UnknownCommand",
            ConsoleError::InvalidCommandValue { .. } => "InvalidCommandValue",
            ConsoleError::Io(_) => "Io",
        }
    }
}
