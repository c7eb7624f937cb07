//! Device identity sync on login.
//!
//! A device announces itself on the `login` topic with the database id it was
//! provisioned with. When that id disagrees with the directory, the device is
//! sent a CONFIG/DEVICE command carrying its hostname and the directory id.

use crate::dispatch::{CommandDispatcher, DispatchResult};
use crate::event::{DecodedEvent, Direction};
use dashmap::DashMap;
use fleet_command::CommandRequest;
use fleet_wire::{Message, MessageType};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::broadcast;
use tracing::{debug, info, warn};

/// Window in which repeated logins from one host trigger a single sync
pub const DEFAULT_SYNC_DEDUP_WINDOW: Duration = Duration::from_secs(10);

/// Pushes directory identity to devices that log in with a stale id
pub struct DeviceSync {
    dispatcher: Arc<CommandDispatcher>,
    window: Duration,
    recent: DashMap<String, Instant>,
}

impl DeviceSync {
    /// Create with the default dedup window
    pub fn new(dispatcher: Arc<CommandDispatcher>) -> Self {
        Self::with_window(dispatcher, DEFAULT_SYNC_DEDUP_WINDOW)
    }

    /// Create with a custom dedup window
    pub fn with_window(dispatcher: Arc<CommandDispatcher>, window: Duration) -> Self {
        Self {
            dispatcher,
            window,
            recent: DashMap::new(),
        }
    }

    fn claim(&self, hostname: &str) -> bool {
        let now = Instant::now();
        self.recent.retain(|_, last| now.duration_since(*last) < self.window);

        let mut claimed = false;
        self.recent
            .entry(hostname.to_string())
            .and_modify(|last| {
                if now.duration_since(*last) >= self.window {
                    *last = now;
                    claimed = true;
                }
            })
            .or_insert_with(|| {
                claimed = true;
                now
            });
        claimed
    }

    /// React to one event; returns the dispatch result when a sync was sent
    pub async fn handle(&self, event: &DecodedEvent) -> Option<DispatchResult> {
        if event.direction != Direction::In || event.message_type != MessageType::Login {
            return None;
        }
        let status = match &event.decoded {
            Some(Message::Status(status)) => status,
            _ => return None,
        };
        let db_id = match event.device_db_id {
            Some(id) => id,
            None => {
                debug!("Login from unprovisioned device {}, no sync", event.hostname);
                return None;
            }
        };
        if status.device_db_id == db_id {
            debug!("Device {} already reports id {}", event.hostname, db_id);
            return None;
        }
        if !self.claim(&event.hostname) {
            debug!("Sync for {} suppressed, sent recently", event.hostname);
            return None;
        }

        info!(
            "Device {} reports id {}, directory has {}; syncing",
            event.hostname, status.device_db_id, db_id
        );
        let request = CommandRequest::device_sync(&event.hostname, db_id);
        match self.dispatcher.dispatch(&event.hostname, &request).await {
            Ok(result) => Some(result),
            Err(e) => {
                warn!("Device sync for {} failed: {}", event.hostname, e);
                None
            }
        }
    }

    /// Consume router events until the channel closes
    pub async fn run(self: Arc<Self>, mut events: broadcast::Receiver<Arc<DecodedEvent>>) {
        info!("Device sync started");
        loop {
            match events.recv().await {
                Ok(event) => {
                    self.handle(&event).await;
                }
                Err(broadcast::error::RecvError::Lagged(n)) => {
                    warn!("Device sync lagged, skipped {} events", n);
                }
                Err(broadcast::error::RecvError::Closed) => break,
            }
        }
        info!("Device sync stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::directory::StaticDirectory;
    use crate::router::{RouterConfig, TransportRouter};
    use crate::topics::TopicScheme;
    use crate::transport::{InboundMessage, MemoryTransport, Transport};
    use fleet_audit::{LogToggles, MemoryAuditLog};
    use fleet_command::CommandBuilder;
    use fleet_wire::{CommandPayload, Envelope, HmacKey, StatusMessage, WireMessage};

    fn setup(window: Duration) -> (Arc<TransportRouter>, DeviceSync, Arc<MemoryTransport>) {
        let (transport, _rx) = MemoryTransport::new();
        let transport = Arc::new(transport);
        let directory = StaticDirectory::new();
        directory.insert("esg-0001", 42);
        let config = RouterConfig::new(TopicScheme::default(), HmacKey::factory().unwrap());
        let router = Arc::new(TransportRouter::new(
            config,
            transport.clone() as Arc<dyn Transport>,
            Arc::new(directory),
        ));
        let dispatcher = Arc::new(CommandDispatcher::new(
            router.clone(),
            CommandBuilder::new(0),
            Arc::new(MemoryAuditLog::new()),
            Arc::new(LogToggles::default()),
        ));
        (router, DeviceSync::with_window(dispatcher, window), transport)
    }

    async fn login(router: &TransportRouter, hostname: &str, reported_id: u32) -> Arc<DecodedEvent> {
        let status = StatusMessage {
            device_db_id: reported_id,
            firmware: "2.0.1".to_string(),
            ..Default::default()
        };
        let frame = Envelope::encode(&status.encode(), 1, &HmacKey::factory().unwrap()).unwrap();
        router
            .handle_inbound(InboundMessage {
                topic: format!("esagtech/pb/d/{}/login", hostname),
                payload: frame,
            })
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn test_sync_sent_on_id_mismatch() {
        let (router, sync, transport) = setup(DEFAULT_SYNC_DEDUP_WINDOW);
        let event = login(&router, "esg-0001", 0).await;

        let result = sync.handle(&event).await.unwrap();
        assert_eq!(result.action, "DEVICE");

        let published = transport.published();
        assert_eq!(published.len(), 1);
        let envelope = Envelope::decode(&published[0].payload, &HmacKey::factory().unwrap()).unwrap();
        let command = fleet_wire::CommandEnvelope::decode(&envelope.payload).unwrap();
        match command.command {
            Some(CommandPayload::Config(config)) => {
                let device = config.device.unwrap();
                assert_eq!(device.hostname, "esg-0001");
                assert_eq!(device.device_id, 42);
                assert!(device.enable_heartbeat);
                assert_eq!(device.heartbeat_interval, 60);
            }
            other => panic!("unexpected payload {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_no_sync_when_ids_match() {
        let (router, sync, transport) = setup(DEFAULT_SYNC_DEDUP_WINDOW);
        let event = login(&router, "esg-0001", 42).await;
        assert!(sync.handle(&event).await.is_none());
        assert!(transport.published().is_empty());
    }

    #[tokio::test]
    async fn test_no_sync_for_unknown_device() {
        let (router, sync, transport) = setup(DEFAULT_SYNC_DEDUP_WINDOW);
        let event = login(&router, "esg-stranger", 7).await;
        assert!(sync.handle(&event).await.is_none());
        assert!(transport.published().is_empty());
    }

    #[tokio::test]
    async fn test_repeated_logins_deduplicated() {
        let (router, sync, transport) = setup(DEFAULT_SYNC_DEDUP_WINDOW);
        let event = login(&router, "esg-0001", 0).await;
        assert!(sync.handle(&event).await.is_some());
        assert!(sync.handle(&event).await.is_none());
        assert_eq!(transport.published().len(), 1);
    }

    #[tokio::test]
    async fn test_zero_window_allows_every_login() {
        let (router, sync, transport) = setup(Duration::ZERO);
        let event = login(&router, "esg-0001", 0).await;
        assert!(sync.handle(&event).await.is_some());
        assert!(sync.handle(&event).await.is_some());
        assert_eq!(transport.published().len(), 2);
    }

    #[tokio::test]
    async fn test_expired_entries_are_pruned() {
        let (_router, sync, _transport) = setup(Duration::from_millis(20));
        for host in ["esg-a", "esg-b", "esg-c"] {
            assert!(sync.claim(host));
        }
        assert_eq!(sync.recent.len(), 3);

        tokio::time::sleep(Duration::from_millis(40)).await;
        assert!(sync.claim("esg-d"));
        assert_eq!(sync.recent.len(), 1);
        assert!(sync.recent.contains_key("esg-d"));

        // Still inside the window
        assert!(!sync.claim("esg-d"));
    }
}
