//! Shared replay buffer of recent events.

use crate::settings::SessionSettings;
use fleet_router::DecodedEvent;
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use tokio::sync::broadcast;
use tracing::{debug, warn};

/// Events kept for AT+BUFFER
pub const DEFAULT_BUFFER_CAPACITY: usize = 100;

/// Events returned by one AT+BUFFER
pub const BUFFER_REPLAY_LIMIT: usize = 20;

/// Bounded ring of the most recent events, shared by all sessions
#[derive(Debug)]
pub struct EventBuffer {
    events: Mutex<VecDeque<Arc<DecodedEvent>>>,
    capacity: usize,
}

impl Default for EventBuffer {
    fn default() -> Self {
        Self::new(DEFAULT_BUFFER_CAPACITY)
    }
}

impl EventBuffer {
    /// Create with a capacity
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            events: Mutex::new(VecDeque::with_capacity(capacity)),
            capacity,
        }
    }

    /// Append, evicting the oldest event when full
    pub fn push(&self, event: Arc<DecodedEvent>) {
        if let Ok(mut events) = self.events.lock() {
            if events.len() == self.capacity {
                events.pop_front();
            }
            events.push_back(event);
        }
    }

    /// Most recent events passing the session's filters, oldest first
    pub fn recent(&self, settings: &SessionSettings, limit: usize) -> Vec<Arc<DecodedEvent>> {
        let Ok(events) = self.events.lock() else {
            return Vec::new();
        };
        let mut matched: Vec<Arc<DecodedEvent>> = events
            .iter()
            .rev()
            .filter(|e| settings.matches(e))
            .take(limit)
            .cloned()
            .collect();
        matched.reverse();
        matched
    }

    /// Drop everything
    pub fn clear(&self) {
        if let Ok(mut events) = self.events.lock() {
            events.clear();
        }
    }

    /// Events held
    pub fn len(&self) -> usize {
        self.events.lock().map(|e| e.len()).unwrap_or(0)
    }

    /// Whether the buffer is empty
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Fill from router events until the channel closes
    pub async fn run(self: Arc<Self>, mut events: broadcast::Receiver<Arc<DecodedEvent>>) {
        loop {
            match events.recv().await {
                Ok(event) => self.push(event),
                Err(broadcast::error::RecvError::Lagged(n)) => {
                    warn!("Console buffer lagged, {} events not buffered", n);
                }
                Err(broadcast::error::RecvError::Closed) => break,
            }
        }
        debug!("Console buffer feed stopped");
    }
}
