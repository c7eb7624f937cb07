//! Command construction.

use crate::error::CommandError;
use crate::request::{CommandKind, CommandRequest};
use crate::sequence::SequenceAllocator;
use bytes::Bytes;
use fleet_wire::{CommandEnvelope, Envelope, HmacKey, WireMessage};
use serde::Serialize;
use serde_json::Value;
use std::sync::Arc;
use tracing::debug;
use uuid::Uuid;

/// Privilege level stamped on commands unless configured otherwise
pub const DEFAULT_AUTH_LEVEL: u32 = 2;

/// A validated, sequenced command ready to publish
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BuiltCommand {
    /// Correlation id, unique per build
    pub request_id: Uuid,
    /// Target device
    pub hostname: String,
    /// Per-device sequence, shared by the payload and the envelope
    pub sequence: u32,
    /// Command family
    pub kind: CommandKind,
    /// Action name, e.g. `REBOOT`
    pub action: &'static str,
    /// Decoded form, for audit and echo
    pub envelope: CommandEnvelope,
    /// Encoded envelope payload, not yet HMAC-wrapped
    #[serde(skip)]
    pub bytes: Bytes,
}

impl BuiltCommand {
    /// HMAC-wrap the payload with the command's sequence
    pub fn frame(&self, key: &HmacKey) -> Result<Bytes, CommandError> {
        Ok(Envelope::encode(&self.bytes, self.sequence, key)?)
    }
}

/// Builds commands; shares one sequence allocator across callers
#[derive(Debug, Clone)]
pub struct CommandBuilder {
    sequences: Arc<SequenceAllocator>,
    auth_level: u32,
}

impl Default for CommandBuilder {
    fn default() -> Self {
        Self::new(0)
    }
}

impl CommandBuilder {
    /// Create a builder whose device counters start at `seed`
    pub fn new(seed: u32) -> Self {
        Self {
            sequences: Arc::new(SequenceAllocator::new(seed)),
            auth_level: DEFAULT_AUTH_LEVEL,
        }
    }

    /// Override the privilege level stamped on commands
    pub fn with_auth_level(mut self, auth_level: u32) -> Self {
        self.auth_level = auth_level;
        self
    }

    /// Sequence allocator
    pub fn sequences(&self) -> &SequenceAllocator {
        &self.sequences
    }

    /// Validate, sequence and serialize a request
    ///
    /// Validation happens first, so a rejected request consumes no sequence
    /// number. Every call yields a fresh request id.
    pub fn build(&self, hostname: &str, request: &CommandRequest) -> Result<BuiltCommand, CommandError> {
        let command = request.to_payload()?;

        let request_id = Uuid::new_v4();
        let sequence = self.sequences.next(hostname);
        let envelope = CommandEnvelope {
            sequence,
            timestamp: chrono::Utc::now().timestamp().max(0) as u32,
            request_id: request_id.to_string(),
            auth_level: self.auth_level,
            command: Some(command),
        };
        let bytes = envelope.encode();

        debug!(
            "Command envelope created: {} {} for {} (seq={}, id={}, {} bytes)",
            request.kind(),
            request.action(),
            hostname,
            sequence,
            request_id,
            bytes.len()
        );

        Ok(BuiltCommand {
            request_id,
            hostname: hostname.to_string(),
            sequence,
            kind: request.kind(),
            action: request.action(),
            envelope,
            bytes,
        })
    }

    /// Build from the string/JSON form
    pub fn build_from_options(
        &self,
        hostname: &str,
        kind: &str,
        action: &str,
        options: &Value,
    ) -> Result<BuiltCommand, CommandError> {
        let kind: CommandKind = kind.parse()?;
        let request = CommandRequest::from_options(kind, action, options)?;
        self.build(hostname, &request)
    }
}
