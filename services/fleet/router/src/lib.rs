//! Transport routing for the device fleet.
//!
//! The router owns the topic scheme and the pub/sub transport. Inbound
//! publishes are envelope-decoded, message-decoded when the HMAC verifies and
//! fanned out as [`DecodedEvent`]s on a broadcast channel; outbound commands
//! are HMAC-wrapped and published to `<base>/pb/d/<hostname>/cmd`.
//!
//! ```text
//! transport ──▶ run_ingest ──▶ broadcast ──┬──▶ console sessions
//!                                          ├──▶ AuditSink
//!                                          └──▶ DeviceSync ──▶ CommandDispatcher ──▶ transport
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod correlation;
pub mod directory;
pub mod dispatch;
pub mod error;
pub mod event;
pub mod mqtt;
pub mod router;
pub mod sink;
pub mod stats;
pub mod sync;
pub mod topics;
pub mod transport;

pub use correlation::{PendingCommand, PendingCommands, ResponseCorrelator, DEFAULT_RESPONSE_TIMEOUT};
pub use directory::{DeviceDirectory, DeviceEntry, StaticDirectory};
pub use dispatch::{CommandDispatcher, DispatchResult};
pub use error::{RouterError, TransportError};
pub use event::{DecodedEvent, Direction};
pub use mqtt::{MqttSettings, MqttTransport};
pub use router::{
    CounterSnapshot, RouterConfig, RouterStatus, SeenDevice, TransportRouter, DEFAULT_EVENT_CAPACITY,
};
pub use sink::AuditSink;
pub use stats::{StatsReporter, DEFAULT_STATS_INTERVAL};
pub use sync::{DeviceSync, DEFAULT_SYNC_DEDUP_WINDOW};
pub use topics::{DeviceTopic, TopicScheme, DEFAULT_TOPIC_BASE};
pub use transport::{InboundMessage, MemoryTransport, Transport, INBOUND_CHANNEL_CAPACITY};
