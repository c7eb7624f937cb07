//! Matching device responses to the commands that caused them.
//!
//! Only the explicit `requestId` of a `CommandResponse` is used; sequence
//! numbers and timing are never guessed at.

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use fleet_command::{BuiltCommand, CommandKind};
use fleet_wire::CommandResponse;
use serde::Serialize;
use std::time::Duration;
use tracing::{debug, info, warn};

/// How long a command waits for its response before it is considered timed out
pub const DEFAULT_RESPONSE_TIMEOUT: Duration = Duration::from_secs(30);

/// A command still waiting for its response
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PendingCommand {
    /// Correlation id
    pub request_id: String,
    /// Target device
    pub hostname: String,
    /// Command sequence
    pub sequence: u32,
    /// Command family
    pub kind: CommandKind,
    /// Action name
    pub action: &'static str,
    /// When it was published
    pub sent_at: DateTime<Utc>,
}

/// Hook invoked for every sent command and every inbound response
pub trait ResponseCorrelator: Send + Sync {
    /// A command was published
    fn on_sent(&self, command: &BuiltCommand);

    /// A response arrived; returns the matched command, if any
    fn on_response(&self, hostname: &str, response: &CommandResponse) -> Option<PendingCommand>;
}

/// Tracks outstanding request ids
#[derive(Debug)]
pub struct PendingCommands {
    pending: DashMap<String, PendingCommand>,
    timeout: Duration,
}

impl Default for PendingCommands {
    fn default() -> Self {
        Self::new(DEFAULT_RESPONSE_TIMEOUT)
    }
}

impl PendingCommands {
    /// Create with a response timeout
    pub fn new(timeout: Duration) -> Self {
        Self {
            pending: DashMap::new(),
            timeout,
        }
    }

    /// Commands still waiting
    pub fn len(&self) -> usize {
        self.pending.len()
    }

    /// Whether nothing is waiting
    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }

    /// Look up a waiting command
    pub fn get(&self, request_id: &str) -> Option<PendingCommand> {
        self.pending.get(request_id).map(|p| p.clone())
    }

    /// Drop commands older than the timeout, returning them
    pub fn expire(&self, now: DateTime<Utc>) -> Vec<PendingCommand> {
        let timeout = chrono::Duration::seconds(self.timeout.as_secs().min(i64::MAX as u64 / 1000) as i64);
        let expired: Vec<String> = self
            .pending
            .iter()
            .filter(|p| now.signed_duration_since(p.sent_at) >= timeout)
            .map(|p| p.key().clone())
            .collect();

        let removed: Vec<PendingCommand> = expired
            .iter()
            .filter_map(|id| self.pending.remove(id).map(|(_, p)| p))
            .collect();
        for command in &removed {
            warn!(
                "Command {} {} to {} timed out (id={})",
                command.kind, command.action, command.hostname, command.request_id
            );
        }
        removed
    }
}

impl ResponseCorrelator for PendingCommands {
    fn on_sent(&self, command: &BuiltCommand) {
        let request_id = command.request_id.to_string();
        debug!("Waiting for response to {}", request_id);
        self.pending.insert(
            request_id.clone(),
            PendingCommand {
                request_id,
                hostname: command.hostname.clone(),
                sequence: command.sequence,
                kind: command.kind,
                action: command.action,
                sent_at: Utc::now(),
            },
        );
    }

    fn on_response(&self, hostname: &str, response: &CommandResponse) -> Option<PendingCommand> {
        match self.pending.remove(&response.request_id) {
            Some((_, pending)) => {
                info!(
                    "Command response from {}: {} {} success={} ({})",
                    hostname, pending.kind, pending.action, response.success, response.message
                );
                Some(pending)
            }
            None => {
                warn!(
                    "Received response for unknown command from {} (id='{}')",
                    hostname, response.request_id
                );
                None
            }
        }
    }
}
