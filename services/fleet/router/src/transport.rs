//! Transport abstraction.
//!
//! A transport publishes frames and delivers inbound publishes on an mpsc
//! channel handed out when it is created.

use crate::error::TransportError;
use async_trait::async_trait;
use bytes::Bytes;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;
use tokio::sync::mpsc;
use tracing::debug;

/// Capacity of the inbound channel between a transport and the router
pub const INBOUND_CHANNEL_CAPACITY: usize = 1024;

/// A publish received from the broker
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InboundMessage {
    /// Topic it arrived on
    pub topic: String,
    /// Raw payload
    pub payload: Bytes,
}

/// Publish side of a pub/sub transport
#[async_trait]
pub trait Transport: Send + Sync {
    /// Publish a frame; fails fast with `Unavailable` when disconnected
    async fn publish(&self, topic: &str, payload: Bytes) -> Result<(), TransportError>;

    /// Whether the transport currently has a broker session
    fn is_connected(&self) -> bool;

    /// Short name for status output
    fn name(&self) -> &'static str;
}

/// In-process transport for tests and offline tools
#[derive(Debug)]
pub struct MemoryTransport {
    connected: AtomicBool,
    published: Mutex<Vec<InboundMessage>>,
    inbound: Mutex<Option<mpsc::Sender<InboundMessage>>>,
}

impl MemoryTransport {
    /// Create a connected transport and the receiver for injected messages
    pub fn new() -> (Self, mpsc::Receiver<InboundMessage>) {
        let (inbound, rx) = mpsc::channel(INBOUND_CHANNEL_CAPACITY);
        (
            Self {
                connected: AtomicBool::new(true),
                published: Mutex::new(Vec::new()),
                inbound: Mutex::new(Some(inbound)),
            },
            rx,
        )
    }

    /// Simulate connection loss or recovery
    pub fn set_connected(&self, connected: bool) {
        self.connected.store(connected, Ordering::Relaxed);
    }

    /// Deliver a message as if it came from the broker
    pub async fn inject(&self, topic: &str, payload: Bytes) -> Result<(), TransportError> {
        let sender = self
            .inbound
            .lock()
            .ok()
            .and_then(|inbound| inbound.clone())
            .ok_or(TransportError::Unavailable)?;
        sender
            .send(InboundMessage {
                topic: topic.to_string(),
                payload,
            })
            .await
            .map_err(|_| TransportError::Unavailable)
    }

    /// Close the inbound channel; the receiver drains what is queued, then ends
    pub fn close(&self) {
        if let Ok(mut inbound) = self.inbound.lock() {
            inbound.take();
        }
    }

    /// Everything published so far
    pub fn published(&self) -> Vec<InboundMessage> {
        self.published.lock().map(|p| p.clone()).unwrap_or_default()
    }
}

#[async_trait]
impl Transport for MemoryTransport {
    async fn publish(&self, topic: &str, payload: Bytes) -> Result<(), TransportError> {
        if !self.is_connected() {
            return Err(TransportError::Unavailable);
        }
        debug!("Memory publish {} ({} bytes)", topic, payload.len());
        self.published
            .lock()
            .map_err(|_| TransportError::Publish {
                topic: topic.to_string(),
                reason: "lock poisoned".to_string(),
            })?
            .push(InboundMessage {
                topic: topic.to_string(),
                payload,
            });
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::Relaxed)
    }

    fn name(&self) -> &'static str {
        "memory"
    }
}
