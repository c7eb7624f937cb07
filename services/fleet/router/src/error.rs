//! Router and transport errors.

use fleet_command::CommandError;
use thiserror::Error;

/// Transport errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TransportError {
    /// Not connected to the broker
    #[error("transport unavailable")]
    Unavailable,
    /// Broker rejected or client failed to queue a publish
    #[error("publish to {topic} failed: {reason}")]
    Publish {
        /// Target topic
        topic: String,
        /// Client error
        reason: String,
    },
    /// Subscription request failed
    #[error("subscribe to {topic} failed: {reason}")]
    Subscribe {
        /// Topic filter
        topic: String,
        /// Client error
        reason: String,
    },
}

/// Router errors
#[derive(Error, Debug, Clone, PartialEq)]
pub enum RouterError {
    /// Transport failure
    #[error(transparent)]
    Transport(#[from] TransportError),
    /// Command could not be framed
    #[error(transparent)]
    Command(#[from] CommandError),
    /// Topic does not follow the device scheme
    #[error("invalid topic '{0}'")]
    InvalidTopic(String),
}
