//! Command construction for fleet devices.
//!
//! Requests are validated, given a per-device sequence number and a fresh
//! request id, and serialized into a `CommandEnvelope`. Nothing here sends;
//! the router owns publishing.
//!
//! ```text
//! CommandRequest --validate--> CommandPayload
//!                --sequence--> CommandEnvelope { sequence, timestamp, requestId, authLevel }
//!                --encode----> BuiltCommand { bytes } --frame(key)--> HMAC envelope
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod builder;
pub mod error;
pub mod request;
pub mod sequence;

pub use builder::{BuiltCommand, CommandBuilder, DEFAULT_AUTH_LEVEL};
pub use error::CommandError;
pub use request::{
    CommandKind, CommandRequest, ConfigReadOptions, ConfigUpdate, DiagnosticOptions, OtaOptions,
    OutputOptions, SystemOptions,
};
pub use sequence::SequenceAllocator;
