//! Audit sink fed from the router broadcast.

use crate::event::{DecodedEvent, Direction};
use chrono::Utc;
use fleet_audit::{AuditLog, AuditRecord, LogToggles};
use fleet_wire::Message;
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::{debug, info, warn};

/// Writes alarm and response rows while the matching toggle is on
///
/// ALARMLOG gates alarm events, CMDLOG gates command responses.
pub struct AuditSink {
    audit: Arc<dyn AuditLog>,
    toggles: Arc<LogToggles>,
}

impl AuditSink {
    /// Create a sink
    pub fn new(audit: Arc<dyn AuditLog>, toggles: Arc<LogToggles>) -> Self {
        Self { audit, toggles }
    }

    fn record_for(&self, event: &DecodedEvent) -> Option<AuditRecord> {
        if event.direction != Direction::In {
            return None;
        }
        match event.decoded.as_ref()? {
            Message::Alarm(alarm) if self.toggles.alarmlog() => Some(AuditRecord::Alarm {
                hostname: event.hostname.clone(),
                device_db_id: event.device_db_id,
                alarm: serde_json::to_value(alarm).unwrap_or(serde_json::Value::Null),
                at: Utc::now(),
            }),
            Message::Response(response) if self.toggles.cmdlog() => Some(AuditRecord::Response {
                hostname: event.hostname.clone(),
                request_id: response.request_id.clone(),
                success: response.success,
                message: response.message.clone(),
                at: Utc::now(),
            }),
            _ => None,
        }
    }

    /// Audit one event; true when a row was written
    pub async fn handle(&self, event: &DecodedEvent) -> bool {
        let Some(record) = self.record_for(event) else {
            return false;
        };
        let kind = record.record_type();
        match self.audit.append(record).await {
            Ok(()) => {
                debug!("Audited {} from {}", kind, event.hostname);
                true
            }
            Err(e) => {
                warn!("Failed to audit {} from {}: {}", kind, event.hostname, e);
                false
            }
        }
    }

    /// Consume router events until the channel closes
    pub async fn run(self, mut events: broadcast::Receiver<Arc<DecodedEvent>>) {
        info!("Audit sink started");
        loop {
            match events.recv().await {
                Ok(event) => {
                    self.handle(&event).await;
                }
                Err(broadcast::error::RecvError::Lagged(n)) => {
                    warn!("Audit sink lagged, {} events not audited", n);
                }
                Err(broadcast::error::RecvError::Closed) => break,
            }
        }
        info!("Audit sink stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;
    use fleet_audit::{LogToggle, MemoryAuditLog};
    use fleet_wire::{AlarmEvent, AlarmType, CommandResponse, Heartbeat, MessageType};

    fn event(message_type: MessageType, decoded: Message) -> DecodedEvent {
        DecodedEvent {
            topic: format!("esagtech/pb/d/esg-0001/{}", message_type),
            direction: Direction::In,
            hostname: "esg-0001".to_string(),
            message_type,
            device_db_id: Some(1),
            raw: Bytes::new(),
            envelope: None,
            decoded: Some(decoded),
            decode_error: None,
            partial_fields: Vec::new(),
            received_at: Utc::now(),
        }
    }

    fn alarm() -> DecodedEvent {
        event(
            MessageType::Alarm,
            Message::Alarm(AlarmEvent {
                alarm_type: AlarmType::Panic1.into(),
                ..Default::default()
            }),
        )
    }

    #[tokio::test]
    async fn test_alarmlog_gates_alarm_rows() {
        let audit = Arc::new(MemoryAuditLog::new());
        let toggles = Arc::new(LogToggles::new(false, false));
        let sink = AuditSink::new(audit.clone(), toggles.clone());

        assert!(!sink.handle(&alarm()).await);
        toggles.set(LogToggle::AlarmLog, true);
        assert!(sink.handle(&alarm()).await);

        let rows = audit.recent(10).await.unwrap();
        assert_eq!(rows.len(), 1);
        match &rows[0] {
            AuditRecord::Alarm { alarm, .. } => assert_eq!(alarm["type"], "ALARM_PANIC1"),
            other => panic!("unexpected record {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_cmdlog_gates_response_rows() {
        let audit = Arc::new(MemoryAuditLog::new());
        let toggles = Arc::new(LogToggles::new(true, false));
        let sink = AuditSink::new(audit.clone(), toggles);

        let response = event(
            MessageType::Response,
            Message::Response(CommandResponse {
                request_id: "abc".to_string(),
                success: true,
                message: "ok".to_string(),
                ..Default::default()
            }),
        );
        assert!(sink.handle(&response).await);
        assert!(matches!(
            audit.recent(1).await.unwrap()[0],
            AuditRecord::Response { success: true, .. }
        ));
    }

    #[tokio::test]
    async fn test_other_messages_ignored() {
        let audit = Arc::new(MemoryAuditLog::new());
        let sink = AuditSink::new(audit.clone(), Arc::new(LogToggles::new(true, true)));
        let hb = event(MessageType::Heartbeat, Message::Heartbeat(Heartbeat::default()));
        assert!(!sink.handle(&hb).await);
        assert!(audit.is_empty().await.unwrap());
    }

    #[tokio::test]
    async fn test_run_stops_when_channel_closes() {
        let audit = Arc::new(MemoryAuditLog::new());
        let sink = AuditSink::new(audit.clone(), Arc::new(LogToggles::new(false, true)));
        let (tx, rx) = broadcast::channel(8);
        let task = tokio::spawn(sink.run(rx));

        tx.send(Arc::new(alarm())).unwrap();
        drop(tx);
        task.await.unwrap();
        assert_eq!(audit.len().await.unwrap(), 1);
    }
}
