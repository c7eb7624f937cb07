//! Audit trail for fleet commands, alarms and device responses.
//!
//! Two process-wide switches decide what gets recorded: `CMDLOG` covers
//! commands sent and the responses they produce, `ALARMLOG` covers alarm
//! events. Records are append-only and go to a pluggable backend
//! (in-memory, JSON lines on disk).

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod backend;
pub mod toggles;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::Arc;
use thiserror::Error;

/// Audit errors
#[derive(Error, Debug)]
pub enum AuditError {
    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
    /// Invalid configuration or operation
    #[error("Invalid operation: {0}")]
    Invalid(String),
}

/// One audit row
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "record", rename_all = "snake_case")]
pub enum AuditRecord {
    /// A command built for a device
    Command {
        /// Correlation id
        request_id: String,
        /// Target device
        hostname: String,
        /// Database id, when the device is known
        device_db_id: Option<u32>,
        /// Command sequence
        sequence: u32,
        /// Command family, e.g. `SYSTEM`
        kind: String,
        /// Action, e.g. `REBOOT`
        action: String,
        /// Whether the transport accepted it
        delivered: bool,
        /// Decoded command envelope
        detail: serde_json::Value,
        /// When the row was written
        at: DateTime<Utc>,
    },
    /// An alarm event received from a device
    Alarm {
        /// Reporting device
        hostname: String,
        /// Database id, when the device is known
        device_db_id: Option<u32>,
        /// Decoded alarm event
        alarm: serde_json::Value,
        /// When the row was written
        at: DateTime<Utc>,
    },
    /// A device's reply to a command
    Response {
        /// Replying device
        hostname: String,
        /// Request id the device echoed
        request_id: String,
        /// Command succeeded
        success: bool,
        /// Device message
        message: String,
        /// When the row was written
        at: DateTime<Utc>,
    },
}

impl AuditRecord {
    /// Device the row is about
    pub fn hostname(&self) -> &str {
        match self {
            AuditRecord::Command { hostname, .. }
            | AuditRecord::Alarm { hostname, .. }
            | AuditRecord::Response { hostname, .. } => hostname,
        }
    }

    /// Row kind as stored in the `record` tag
    pub fn record_type(&self) -> &'static str {
        match self {
            AuditRecord::Command { .. } => "command",
            AuditRecord::Alarm { .. } => "alarm",
            AuditRecord::Response { .. } => "response",
        }
    }
}

/// Append-only audit log
#[async_trait]
pub trait AuditLog: Send + Sync {
    /// Append one row
    async fn append(&self, record: AuditRecord) -> Result<(), AuditError>;

    /// Most recent rows, oldest first, at most `limit`
    async fn recent(&self, limit: usize) -> Result<Vec<AuditRecord>, AuditError>;

    /// Number of rows stored
    async fn len(&self) -> Result<usize, AuditError>;

    /// Whether nothing has been stored
    async fn is_empty(&self) -> Result<bool, AuditError> {
        Ok(self.len().await? == 0)
    }
}

/// Audit backend configuration
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub enum AuditMode {
    /// Keep rows in memory (dev/tests only)
    #[default]
    InMemory,
    /// Append rows as JSON lines to a file
    File {
        /// Log file path
        path: PathBuf,
    },
}

pub use backend::file::FileAuditLog;
pub use backend::mem::MemoryAuditLog;
pub use toggles::{LogToggle, LogToggles, ToggleSnapshot};

/// Open the backend described by `mode`
pub async fn from_mode(mode: AuditMode) -> Result<Arc<dyn AuditLog>, AuditError> {
    match mode {
        AuditMode::InMemory => Ok(Arc::new(MemoryAuditLog::new())),
        AuditMode::File { path } => Ok(Arc::new(FileAuditLog::open(path).await?)),
    }
}
