//! MQTT transport over `rumqttc`.
//!
//! The event loop runs on its own task. Every ConnAck (first connect and
//! each reconnect) re-issues the subscriptions; publishes arriving on them
//! are forwarded to the router's inbound channel. Reconnect pacing is left to
//! the client library.

use crate::error::TransportError;
use crate::transport::{InboundMessage, Transport, INBOUND_CHANNEL_CAPACITY};
use async_trait::async_trait;
use bytes::Bytes;
use rumqttc::{AsyncClient, Event, EventLoop, MqttOptions, Packet, QoS};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

/// Pause after an event loop error before polling again
const RECONNECT_DELAY: Duration = Duration::from_secs(2);

/// Broker connection settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct MqttSettings {
    /// Broker host
    pub host: String,
    /// Broker port
    pub port: u16,
    /// Client id
    pub client_id: String,
    /// Optional username
    pub username: Option<String>,
    /// Optional password
    pub password: Option<String>,
    /// Keep-alive interval, seconds
    pub keep_alive_secs: u64,
    /// Client request queue depth
    pub request_capacity: usize,
}

impl Default for MqttSettings {
    fn default() -> Self {
        Self {
            host: "localhost".to_string(),
            port: 1883,
            client_id: "esg-fleet".to_string(),
            username: None,
            password: None,
            keep_alive_secs: 30,
            request_capacity: 256,
        }
    }
}

impl MqttSettings {
    fn options(&self) -> MqttOptions {
        let mut options = MqttOptions::new(&self.client_id, &self.host, self.port);
        options.set_keep_alive(Duration::from_secs(self.keep_alive_secs.max(5)));
        options.set_clean_session(true);
        if let Some(username) = &self.username {
            options.set_credentials(username, self.password.clone().unwrap_or_default());
        }
        options
    }
}

/// MQTT transport
pub struct MqttTransport {
    client: AsyncClient,
    connected: Arc<AtomicBool>,
    event_task: JoinHandle<()>,
}

impl MqttTransport {
    /// Start the client; returns the transport and the inbound message stream
    pub fn connect(settings: &MqttSettings, subscriptions: Vec<String>) -> (Self, mpsc::Receiver<InboundMessage>) {
        let (client, eventloop) = AsyncClient::new(settings.options(), settings.request_capacity);
        let (tx, rx) = mpsc::channel(INBOUND_CHANNEL_CAPACITY);
        let connected = Arc::new(AtomicBool::new(false));

        info!(
            "Connecting to MQTT broker {}:{} as {}",
            settings.host, settings.port, settings.client_id
        );

        let event_task = tokio::spawn(run_event_loop(
            eventloop,
            client.clone(),
            subscriptions,
            connected.clone(),
            tx,
        ));

        (
            Self {
                client,
                connected,
                event_task,
            },
            rx,
        )
    }

    /// Disconnect and stop the event loop
    pub async fn shutdown(&self) {
        if let Err(e) = self.client.disconnect().await {
            debug!("MQTT disconnect: {}", e);
        }
        self.event_task.abort();
    }
}

async fn run_event_loop(
    mut eventloop: EventLoop,
    client: AsyncClient,
    subscriptions: Vec<String>,
    connected: Arc<AtomicBool>,
    inbound: mpsc::Sender<InboundMessage>,
) {
    loop {
        match eventloop.poll().await {
            Ok(Event::Incoming(Packet::ConnAck(ack))) => {
                info!("MQTT connected ({:?})", ack.code);
                connected.store(true, Ordering::Relaxed);
                for topic in &subscriptions {
                    if let Err(e) = client.try_subscribe(topic.as_str(), QoS::AtLeastOnce) {
                        warn!("MQTT subscribe {} failed: {}", topic, e);
                    } else {
                        debug!("MQTT subscribed to {}", topic);
                    }
                }
            }
            Ok(Event::Incoming(Packet::Publish(publish))) => {
                let message = InboundMessage {
                    topic: publish.topic.clone(),
                    payload: publish.payload.clone(),
                };
                if inbound.send(message).await.is_err() {
                    info!("Inbound channel closed, stopping MQTT event loop");
                    break;
                }
            }
            Ok(Event::Incoming(Packet::Disconnect)) => {
                warn!("MQTT broker sent disconnect");
                connected.store(false, Ordering::Relaxed);
            }
            Ok(_) => {}
            Err(e) => {
                if connected.swap(false, Ordering::Relaxed) {
                    warn!("MQTT connection lost: {}", e);
                } else {
                    error!("MQTT connection error: {}", e);
                }
                tokio::time::sleep(RECONNECT_DELAY).await;
            }
        }
    }
    connected.store(false, Ordering::Relaxed);
}

#[async_trait]
impl Transport for MqttTransport {
    async fn publish(&self, topic: &str, payload: Bytes) -> Result<(), TransportError> {
        if !self.is_connected() {
            return Err(TransportError::Unavailable);
        }
        // Queue without waiting on a full request buffer; publish is fire-and-forget
        self.client
            .try_publish(topic, QoS::AtLeastOnce, false, payload.to_vec())
            .map_err(|e| TransportError::Publish {
                topic: topic.to_string(),
                reason: e.to_string(),
            })
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::Relaxed)
    }

    fn name(&self) -> &'static str {
        "mqtt"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_settings_defaults() {
        let settings: MqttSettings = serde_json::from_str(r#"{"host":"broker.local"}"#).unwrap();
        assert_eq!(settings.host, "broker.local");
        assert_eq!(settings.port, 1883);
        assert_eq!(settings.client_id, "esg-fleet");
    }

    #[tokio::test]
    async fn test_publish_before_connack_is_unavailable() {
        let settings = MqttSettings {
            host: "127.0.0.1".to_string(),
            port: 1,
            ..Default::default()
        };
        let (transport, _rx) = MqttTransport::connect(&settings, vec![]);
        let err = transport.publish("x/pb/d/y/cmd", Bytes::from_static(b"f")).await.unwrap_err();
        assert_eq!(err, TransportError::Unavailable);
        assert!(!transport.is_connected());
        transport.shutdown().await;
    }
}
