//! Inbound decode and outbound command publishing.

use crate::correlation::ResponseCorrelator;
use crate::directory::DeviceDirectory;
use crate::error::{RouterError, TransportError};
use crate::event::{DecodedEvent, Direction};
use crate::topics::TopicScheme;
use crate::transport::{InboundMessage, Transport};
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use fleet_command::BuiltCommand;
use fleet_wire::{Envelope, HmacKey, Message, MessageType};
use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::{broadcast, mpsc};
use tracing::{debug, info, warn};

/// Default broadcast ring size shared by all subscribers
pub const DEFAULT_EVENT_CAPACITY: usize = 1024;

/// Router configuration
#[derive(Debug, Clone)]
pub struct RouterConfig {
    /// Topic layout
    pub scheme: TopicScheme,
    /// Envelope key
    pub key: HmacKey,
    /// Broadcast ring size
    pub event_capacity: usize,
}

impl RouterConfig {
    /// Configuration with the default event capacity
    pub fn new(scheme: TopicScheme, key: HmacKey) -> Self {
        Self {
            scheme,
            key,
            event_capacity: DEFAULT_EVENT_CAPACITY,
        }
    }
}

/// Running totals kept by the router
#[derive(Debug, Default)]
pub struct RouterCounters {
    messages_seen: AtomicU64,
    decode_errors: AtomicU64,
    frames_dropped: AtomicU64,
    hmac_failures: AtomicU64,
    unknown_devices: AtomicU64,
    commands_sent: AtomicU64,
    commands_failed: AtomicU64,
}

/// Point-in-time copy of the counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CounterSnapshot {
    /// Inbound messages received
    pub messages_seen: u64,
    /// Payloads that failed message decode
    pub decode_errors: u64,
    /// Frames discarded for bad topics or structure
    pub frames_dropped: u64,
    /// Frames whose HMAC did not verify
    pub hmac_failures: u64,
    /// Messages from hostnames missing in the directory
    pub unknown_devices: u64,
    /// Distinct hostnames seen
    pub devices_known: u64,
    /// Commands published
    pub commands_sent: u64,
    /// Commands the transport refused
    pub commands_failed: u64,
}

fn bump(counter: &AtomicU64) -> u64 {
    counter.fetch_add(1, Ordering::Relaxed) + 1
}

/// Last activity of a device
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SeenDevice {
    /// Hostname
    pub hostname: String,
    /// Database id, when known
    pub device_db_id: Option<u32>,
    /// Time of the last message
    pub last_seen: DateTime<Utc>,
    /// Type of the last message
    pub last_message_type: MessageType,
    /// Messages received
    pub messages: u64,
}

/// Router status for consoles and logs
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RouterStatus {
    /// Transport name
    pub transport: &'static str,
    /// Broker session up
    pub connected: bool,
    /// Counter snapshot
    pub counters: CounterSnapshot,
    /// Live event subscribers
    pub subscribers: usize,
}

/// Routes frames between the transport and local consumers
pub struct TransportRouter {
    scheme: TopicScheme,
    key: HmacKey,
    transport: Arc<dyn Transport>,
    directory: Arc<dyn DeviceDirectory>,
    correlator: Option<Arc<dyn ResponseCorrelator>>,
    events: broadcast::Sender<Arc<DecodedEvent>>,
    counters: RouterCounters,
    devices: DashMap<String, SeenDevice>,
}

impl TransportRouter {
    /// Create a router
    pub fn new(config: RouterConfig, transport: Arc<dyn Transport>, directory: Arc<dyn DeviceDirectory>) -> Self {
        let (events, _) = broadcast::channel(config.event_capacity.max(1));
        Self {
            scheme: config.scheme,
            key: config.key,
            transport,
            directory,
            correlator: None,
            events,
            counters: RouterCounters::default(),
            devices: DashMap::new(),
        }
    }

    /// Attach a response correlator
    pub fn with_correlator(mut self, correlator: Arc<dyn ResponseCorrelator>) -> Self {
        self.correlator = Some(correlator);
        self
    }

    /// Topic layout
    pub fn scheme(&self) -> &TopicScheme {
        &self.scheme
    }

    /// Device directory
    pub fn directory(&self) -> &Arc<dyn DeviceDirectory> {
        &self.directory
    }

    /// New receiver for decoded events
    pub fn subscribe(&self) -> broadcast::Receiver<Arc<DecodedEvent>> {
        self.events.subscribe()
    }

    /// Counter snapshot
    pub fn counters(&self) -> CounterSnapshot {
        let c = &self.counters;
        CounterSnapshot {
            messages_seen: c.messages_seen.load(Ordering::Relaxed),
            decode_errors: c.decode_errors.load(Ordering::Relaxed),
            frames_dropped: c.frames_dropped.load(Ordering::Relaxed),
            hmac_failures: c.hmac_failures.load(Ordering::Relaxed),
            unknown_devices: c.unknown_devices.load(Ordering::Relaxed),
            devices_known: self.devices.len() as u64,
            commands_sent: c.commands_sent.load(Ordering::Relaxed),
            commands_failed: c.commands_failed.load(Ordering::Relaxed),
        }
    }

    /// Transport and counter status
    pub fn status(&self) -> RouterStatus {
        RouterStatus {
            transport: self.transport.name(),
            connected: self.transport.is_connected(),
            counters: self.counters(),
            subscribers: self.events.receiver_count(),
        }
    }

    /// Devices seen since startup, by hostname
    pub fn devices(&self) -> Vec<SeenDevice> {
        let mut devices: Vec<SeenDevice> = self.devices.iter().map(|d| d.value().clone()).collect();
        devices.sort_by(|a, b| a.hostname.cmp(&b.hostname));
        devices
    }

    fn emit(&self, event: DecodedEvent) -> Arc<DecodedEvent> {
        let event = Arc::new(event);
        // No subscribers is not an error
        let _ = self.events.send(event.clone());
        event
    }

    fn touch_device(&self, hostname: &str, device_db_id: Option<u32>, message_type: MessageType) {
        let now = Utc::now();
        self.devices
            .entry(hostname.to_string())
            .and_modify(|d| {
                d.device_db_id = device_db_id;
                d.last_seen = now;
                d.last_message_type = message_type;
                d.messages += 1;
            })
            .or_insert_with(|| {
                info!("New device seen: {}", hostname);
                SeenDevice {
                    hostname: hostname.to_string(),
                    device_db_id,
                    last_seen: now,
                    last_message_type: message_type,
                    messages: 1,
                }
            });
    }

    /// Process one inbound publish and fan it out
    ///
    /// Returns the emitted event, or `None` when the frame was dropped.
    pub async fn handle_inbound(&self, message: InboundMessage) -> Option<Arc<DecodedEvent>> {
        bump(&self.counters.messages_seen);

        let topic = match self.scheme.parse(&message.topic) {
            Ok(topic) => topic,
            Err(e) => {
                bump(&self.counters.frames_dropped);
                debug!("Dropping message: {}", e);
                return None;
            }
        };

        let device_db_id = self.directory.lookup(&topic.hostname).await;
        if device_db_id.is_none() {
            bump(&self.counters.unknown_devices);
            warn!("Message from unknown device {} on {}", topic.hostname, message.topic);
        }

        let envelope = match Envelope::decode(&message.payload, &self.key) {
            Ok(envelope) => envelope,
            Err(e) => {
                bump(&self.counters.frames_dropped);
                warn!("Dropping frame from {} ({} bytes): {}", topic.hostname, message.payload.len(), e);
                return None;
            }
        };
        self.touch_device(&topic.hostname, device_db_id, topic.message_type);

        let mut event = DecodedEvent {
            topic: message.topic,
            direction: Direction::In,
            hostname: topic.hostname,
            message_type: topic.message_type,
            device_db_id,
            raw: message.payload,
            envelope: Some(envelope.info()),
            decoded: None,
            decode_error: None,
            partial_fields: Vec::new(),
            received_at: Utc::now(),
        };

        if !envelope.valid {
            bump(&self.counters.hmac_failures);
            warn!(
                "HMAC verification failed for {} {} (seq={})",
                event.hostname, event.message_type, envelope.sequence
            );
            return Some(self.emit(event));
        }

        match Message::decode(event.message_type, &envelope.payload) {
            Ok(decoded) => {
                debug!(
                    "Decoded {} from {} (seq={}, {} bytes)",
                    event.message_type, event.hostname, envelope.sequence, envelope.length
                );
                if let (Message::Response(response), Some(correlator)) = (&decoded, &self.correlator) {
                    correlator.on_response(&event.hostname, response);
                }
                event.decoded = Some(decoded);
            }
            Err(e) => {
                bump(&self.counters.decode_errors);
                warn!("Failed to decode {} from {}: {}", event.message_type, event.hostname, e);
                event.decode_error = Some(e.error.to_string());
                event.partial_fields = e.fields;
            }
        }

        Some(self.emit(event))
    }

    /// Consume the transport's inbound stream until it closes
    pub async fn run_ingest(self: Arc<Self>, mut inbound: mpsc::Receiver<InboundMessage>) {
        info!("Router ingest started for {}", self.scheme.base());
        while let Some(message) = inbound.recv().await {
            self.handle_inbound(message).await;
        }
        info!("Router ingest stopped: inbound channel closed");
    }

    /// Wrap and publish a built command
    ///
    /// No retry happens here; a disconnected transport fails immediately with
    /// `TransportUnavailable`. Published commands are echoed as outbound events.
    pub async fn publish_command(&self, built: &BuiltCommand) -> Result<Arc<DecodedEvent>, RouterError> {
        let frame = built.frame(&self.key)?;
        let topic = self.scheme.command_topic(&built.hostname);

        if !self.transport.is_connected() {
            bump(&self.counters.commands_failed);
            warn!(
                "Cannot send {} {} to {}: transport unavailable",
                built.kind, built.action, built.hostname
            );
            return Err(TransportError::Unavailable.into());
        }

        if let Err(e) = self.transport.publish(&topic, frame.clone()).await {
            bump(&self.counters.commands_failed);
            warn!("Failed to send {} {} to {}: {}", built.kind, built.action, built.hostname, e);
            return Err(e.into());
        }

        bump(&self.counters.commands_sent);
        info!(
            "Command sent: {} {} to {} (seq={}, id={})",
            built.kind, built.action, built.hostname, built.sequence, built.request_id
        );

        if let Some(correlator) = &self.correlator {
            correlator.on_sent(built);
        }

        let info = Envelope::decode(&frame, &self.key).map(|e| e.info()).ok();
        Ok(self.emit(DecodedEvent {
            topic,
            direction: Direction::Out,
            hostname: built.hostname.clone(),
            message_type: MessageType::Command,
            device_db_id: self.directory.lookup(&built.hostname).await,
            raw: frame,
            envelope: info,
            decoded: Some(Message::Command(built.envelope.clone())),
            decode_error: None,
            partial_fields: Vec::new(),
            received_at: Utc::now(),
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::correlation::PendingCommands;
    use crate::directory::StaticDirectory;
    use crate::transport::MemoryTransport;
    use bytes::Bytes;
    use fleet_command::{CommandBuilder, CommandRequest};
    use fleet_wire::{AlarmEvent, AlarmType, CommandResponse, FieldWriter, Heartbeat, SystemAction, WireMessage};
    use std::time::Duration;

    const SAMPLE_FRAME: &str = "00190000078308eec8c7c50650b2c003620d393839663938312d6469727479a53083f3fc3182e8";

    fn setup() -> (Arc<TransportRouter>, Arc<MemoryTransport>) {
        let (transport, _rx) = MemoryTransport::new();
        let transport = Arc::new(transport);
        let directory = StaticDirectory::new();
        directory.insert("esg-0001", 1);
        let config = RouterConfig::new(TopicScheme::default(), HmacKey::factory().unwrap());
        let router = TransportRouter::new(config, transport.clone(), Arc::new(directory));
        (Arc::new(router), transport)
    }

    fn frame(payload: &[u8], sequence: u32) -> Bytes {
        Envelope::encode(payload, sequence, &HmacKey::factory().unwrap()).unwrap()
    }

    fn inbound(topic: &str, payload: Bytes) -> InboundMessage {
        InboundMessage {
            topic: topic.to_string(),
            payload,
        }
    }

    #[tokio::test]
    async fn test_valid_heartbeat_is_decoded_and_broadcast() {
        let (router, _) = setup();
        let mut rx = router.subscribe();

        let hb = Heartbeat {
            timestamp: 1_700_000_000,
            uptime: 60,
            firmware: "1.2.3".to_string(),
            ..Default::default()
        };
        let event = router
            .handle_inbound(inbound("esagtech/pb/d/esg-0001/hb", frame(&hb.encode(), 9)))
            .await
            .unwrap();

        assert!(event.hmac_valid());
        assert_eq!(event.device_db_id, Some(1));
        assert_eq!(event.decoded, Some(Message::Heartbeat(hb)));

        let received = rx.recv().await.unwrap();
        assert_eq!(received.hostname, "esg-0001");
        assert_eq!(router.counters().messages_seen, 1);
        assert_eq!(router.counters().devices_known, 1);
    }

    #[tokio::test]
    async fn test_hmac_failure_forwarded_without_decode() {
        let (router, _) = setup();
        let raw = Bytes::from(hex::decode(SAMPLE_FRAME).unwrap());
        let event = router
            .handle_inbound(inbound("esagtech/pb/d/esg-0001/hb", raw))
            .await
            .unwrap();

        assert!(!event.hmac_valid());
        assert!(event.decoded.is_none());
        assert_eq!(event.envelope.as_ref().unwrap().sequence, 1923);
        assert_eq!(router.counters().hmac_failures, 1);
    }

    #[tokio::test]
    async fn test_short_frame_dropped() {
        let (router, _) = setup();
        let mut rx = router.subscribe();
        let result = router
            .handle_inbound(inbound("esagtech/pb/d/esg-0001/hb", Bytes::from_static(&[0, 1, 2])))
            .await;
        assert!(result.is_none());
        assert_eq!(router.counters().frames_dropped, 1);
        assert!(rx.try_recv().is_err());
        assert_eq!(router.counters().devices_known, 0);
        assert!(router.devices().is_empty());

        // A well-formed frame registers the device
        router
            .handle_inbound(inbound("esagtech/pb/d/esg-0001/hb", frame(b"", 2)))
            .await
            .unwrap();
        assert_eq!(router.counters().devices_known, 1);
        assert_eq!(router.devices()[0].messages, 1);
    }

    #[tokio::test]
    async fn test_bad_topic_dropped() {
        let (router, _) = setup();
        let result = router.handle_inbound(inbound("esagtech/other/thing", frame(b"", 1))).await;
        assert!(result.is_none());
        assert_eq!(router.counters().frames_dropped, 1);
    }

    #[tokio::test]
    async fn test_unknown_device_still_forwarded() {
        let (router, _) = setup();
        let alarm = AlarmEvent {
            alarm_type: AlarmType::Tamper.into(),
            ..Default::default()
        };
        let event = router
            .handle_inbound(inbound("esagtech/pb/d/esg-stranger/alarm", frame(&alarm.encode(), 3)))
            .await
            .unwrap();
        assert_eq!(event.device_db_id, None);
        assert!(matches!(event.decoded, Some(Message::Alarm(_))));
        assert_eq!(router.counters().unknown_devices, 1);
    }

    #[tokio::test]
    async fn test_decode_error_carries_partial_fields() {
        let (router, _) = setup();
        let mut writer = FieldWriter::new();
        writer.put_varint(1, 42);
        let mut payload = writer.finish().to_vec();
        // Length-delimited field 12 claiming 9 bytes with 2 present
        payload.extend_from_slice(&[0x62, 0x09, b'a', b'b']);

        let event = router
            .handle_inbound(inbound("esagtech/pb/d/esg-0001/hb", frame(&payload, 5)))
            .await
            .unwrap();
        assert!(event.decoded.is_none());
        assert!(event.decode_error.is_some());
        assert_eq!(event.partial_fields.len(), 1);
        assert_eq!(router.counters().decode_errors, 1);
    }

    #[tokio::test]
    async fn test_publish_command_and_echo() {
        let (router, transport) = setup();
        let mut rx = router.subscribe();
        let built = CommandBuilder::new(0)
            .build(
                "esg-0001",
                &CommandRequest::System {
                    action: SystemAction::Reboot,
                    options: Default::default(),
                },
            )
            .unwrap();

        router.publish_command(&built).await.unwrap();

        let published = transport.published();
        assert_eq!(published.len(), 1);
        assert_eq!(published[0].topic, "esagtech/pb/d/esg-0001/cmd");
        let envelope = Envelope::decode(&published[0].payload, &HmacKey::factory().unwrap()).unwrap();
        assert!(envelope.valid);
        assert_eq!(envelope.sequence, built.sequence);

        let echo = rx.recv().await.unwrap();
        assert_eq!(echo.direction, Direction::Out);
        assert_eq!(echo.message_type, MessageType::Command);
        assert_eq!(router.counters().commands_sent, 1);
    }

    #[tokio::test]
    async fn test_publish_while_disconnected() {
        let (router, transport) = setup();
        transport.set_connected(false);
        let built = CommandBuilder::new(0)
            .build(
                "esg-0001",
                &CommandRequest::System {
                    action: SystemAction::Reboot,
                    options: Default::default(),
                },
            )
            .unwrap();

        let err = router.publish_command(&built).await.unwrap_err();
        assert_eq!(err, RouterError::Transport(TransportError::Unavailable));
        assert_eq!(router.counters().commands_failed, 1);
        assert!(transport.published().is_empty());
    }

    #[tokio::test]
    async fn test_responses_reach_correlator() {
        let (transport, _rx) = MemoryTransport::new();
        let pending = Arc::new(PendingCommands::default());
        let config = RouterConfig::new(TopicScheme::default(), HmacKey::factory().unwrap());
        let router = TransportRouter::new(config, Arc::new(transport), Arc::new(StaticDirectory::new()))
            .with_correlator(pending.clone());

        let built = CommandBuilder::new(0)
            .build(
                "esg-0001",
                &CommandRequest::System {
                    action: SystemAction::GetStatus,
                    options: Default::default(),
                },
            )
            .unwrap();
        router.publish_command(&built).await.unwrap();
        assert_eq!(pending.len(), 1);

        let response = CommandResponse {
            request_id: built.request_id.to_string(),
            success: true,
            ..Default::default()
        };
        router
            .handle_inbound(inbound("esagtech/pb/d/esg-0001/response", frame(&response.encode(), 77)))
            .await
            .unwrap();
        assert!(pending.is_empty());
    }

    #[tokio::test]
    async fn test_run_ingest_drains_channel() {
        let (transport, rx) = MemoryTransport::new();
        let transport = Arc::new(transport);
        let config = RouterConfig::new(TopicScheme::default(), HmacKey::factory().unwrap());
        let router = Arc::new(TransportRouter::new(config, transport.clone(), Arc::new(StaticDirectory::new())));

        let hb = Heartbeat::default().encode();
        transport.inject("esagtech/pb/d/esg-a/hb", frame(&hb, 1)).await.unwrap();
        transport.inject("esagtech/pb/d/esg-b/hb", frame(&hb, 1)).await.unwrap();
        transport.close();

        tokio::time::timeout(Duration::from_secs(5), router.clone().run_ingest(rx))
            .await
            .unwrap();
        assert_eq!(router.counters().messages_seen, 2);
        let hostnames: Vec<String> = router.devices().into_iter().map(|d| d.hostname).collect();
        assert_eq!(hostnames, vec!["esg-a".to_string(), "esg-b".to_string()]);
    }
}
