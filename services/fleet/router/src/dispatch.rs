//! Build, publish and audit commands in one step.

use crate::error::RouterError;
use crate::router::TransportRouter;
use chrono::Utc;
use fleet_audit::{AuditLog, AuditRecord, LogToggles};
use fleet_command::{BuiltCommand, CommandBuilder, CommandRequest};
use serde::Serialize;
use serde_json::Value;
use std::sync::Arc;
use tracing::{info, warn};

/// Outcome reported to whoever asked for the command
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DispatchResult {
    /// Always true once the command was built; delivery is reported in `message`
    pub success: bool,
    /// Correlation id
    pub request_id: String,
    /// Sequence used for the command and its envelope
    pub sequence: u32,
    /// Action name, e.g. `REBOOT`
    pub action: String,
    /// Human readable outcome
    pub message: String,
    /// Whether the transport accepted the frame
    #[serde(skip)]
    pub delivered: bool,
}

/// Turns command requests into published frames and audit rows
pub struct CommandDispatcher {
    router: Arc<TransportRouter>,
    builder: CommandBuilder,
    audit: Arc<dyn AuditLog>,
    toggles: Arc<LogToggles>,
}

impl CommandDispatcher {
    /// Create a dispatcher
    pub fn new(
        router: Arc<TransportRouter>,
        builder: CommandBuilder,
        audit: Arc<dyn AuditLog>,
        toggles: Arc<LogToggles>,
    ) -> Self {
        Self {
            router,
            builder,
            audit,
            toggles,
        }
    }

    /// Router used for publishing
    pub fn router(&self) -> &Arc<TransportRouter> {
        &self.router
    }

    /// Build and send a typed request
    ///
    /// Validation failures are errors and nothing is sent or logged. An
    /// unreachable transport is not an error: the command is still audited
    /// and the result says it was not sent.
    pub async fn dispatch(&self, hostname: &str, request: &CommandRequest) -> Result<DispatchResult, RouterError> {
        let built = self.builder.build(hostname, request)?;
        self.send(built).await
    }

    /// Build and send from the string/JSON form
    pub async fn dispatch_options(
        &self,
        hostname: &str,
        kind: &str,
        action: &str,
        options: &Value,
    ) -> Result<DispatchResult, RouterError> {
        let built = self.builder.build_from_options(hostname, kind, action, options)?;
        self.send(built).await
    }

    async fn send(&self, built: BuiltCommand) -> Result<DispatchResult, RouterError> {
        let delivered = match self.router.publish_command(&built).await {
            Ok(_) => true,
            Err(RouterError::Transport(e)) => {
                warn!("Command {} to {} not delivered: {}", built.request_id, built.hostname, e);
                false
            }
            Err(e) => return Err(e),
        };

        if self.toggles.cmdlog() {
            self.record(&built, delivered).await;
        }

        let message = if delivered {
            format!("{} command sent successfully", built.action)
        } else {
            format!("{} command logged but not sent (transport unavailable)", built.action)
        };

        Ok(DispatchResult {
            success: true,
            request_id: built.request_id.to_string(),
            sequence: built.sequence,
            action: built.action.to_string(),
            message,
            delivered,
        })
    }

    async fn record(&self, built: &BuiltCommand, delivered: bool) {
        let record = AuditRecord::Command {
            request_id: built.request_id.to_string(),
            hostname: built.hostname.clone(),
            device_db_id: self.router.directory().lookup(&built.hostname).await,
            sequence: built.sequence,
            kind: built.kind.to_string(),
            action: built.action.to_string(),
            delivered,
            detail: serde_json::to_value(&built.envelope).unwrap_or(Value::Null),
            at: Utc::now(),
        };
        match self.audit.append(record).await {
            Ok(()) => info!("Command {} logged for {}", built.request_id, built.hostname),
            Err(e) => warn!("Failed to log command {}: {}", built.request_id, e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::directory::StaticDirectory;
    use crate::router::RouterConfig;
    use crate::topics::TopicScheme;
    use crate::transport::MemoryTransport;
    use fleet_audit::{LogToggle, MemoryAuditLog};
    use fleet_command::CommandError;
    use fleet_wire::{HmacKey, SystemAction};
    use serde_json::json;

    struct Fixture {
        dispatcher: CommandDispatcher,
        transport: Arc<MemoryTransport>,
        audit: Arc<MemoryAuditLog>,
        toggles: Arc<LogToggles>,
    }

    fn fixture(cmdlog: bool) -> Fixture {
        let (transport, _rx) = MemoryTransport::new();
        let transport = Arc::new(transport);
        let directory = StaticDirectory::new();
        directory.insert("esg-0001", 11);
        let config = RouterConfig::new(TopicScheme::default(), HmacKey::factory().unwrap());
        let router = Arc::new(TransportRouter::new(config, transport.clone(), Arc::new(directory)));
        let audit = Arc::new(MemoryAuditLog::new());
        let toggles = Arc::new(LogToggles::new(cmdlog, false));
        let dispatcher = CommandDispatcher::new(router, CommandBuilder::new(0), audit.clone(), toggles.clone());
        Fixture {
            dispatcher,
            transport,
            audit,
            toggles,
        }
    }

    fn reboot() -> CommandRequest {
        CommandRequest::System {
            action: SystemAction::Reboot,
            options: Default::default(),
        }
    }

    #[tokio::test]
    async fn test_dispatch_sends_and_reports() {
        let f = fixture(false);
        let result = f.dispatcher.dispatch("esg-0001", &reboot()).await.unwrap();

        assert!(result.success);
        assert!(result.delivered);
        assert_eq!(result.action, "REBOOT");
        assert_eq!(result.sequence, 1);
        assert_eq!(result.message, "REBOOT command sent successfully");
        assert_eq!(f.transport.published().len(), 1);
    }

    #[tokio::test]
    async fn test_cmdlog_toggle_controls_audit_rows() {
        let f = fixture(false);

        f.toggles.set(LogToggle::CmdLog, true);
        f.dispatcher.dispatch("esg-0001", &reboot()).await.unwrap();
        assert_eq!(f.audit.len().await.unwrap(), 1);

        f.toggles.set(LogToggle::CmdLog, false);
        f.dispatcher.dispatch("esg-0001", &reboot()).await.unwrap();
        assert_eq!(f.audit.len().await.unwrap(), 1);

        let rows = f.audit.recent(10).await.unwrap();
        match &rows[0] {
            AuditRecord::Command {
                hostname,
                device_db_id,
                action,
                delivered,
                ..
            } => {
                assert_eq!(hostname, "esg-0001");
                assert_eq!(*device_db_id, Some(11));
                assert_eq!(action, "REBOOT");
                assert!(*delivered);
            }
            other => panic!("unexpected record {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_transport_down_is_logged_not_sent() {
        let f = fixture(true);
        f.transport.set_connected(false);

        let result = f.dispatcher.dispatch("esg-0001", &reboot()).await.unwrap();
        assert!(!result.delivered);
        assert_eq!(
            result.message,
            "REBOOT command logged but not sent (transport unavailable)"
        );

        let rows = f.audit.recent(1).await.unwrap();
        assert!(matches!(rows[0], AuditRecord::Command { delivered: false, .. }));
    }

    #[tokio::test]
    async fn test_validation_failure_sends_nothing() {
        let f = fixture(true);
        let err = f
            .dispatcher
            .dispatch_options("esg-0001", "OTA", "START_UPDATE", &json!({}))
            .await
            .unwrap_err();

        assert!(matches!(
            err,
            RouterError::Command(CommandError::MissingRequiredOption { .. })
        ));
        assert!(f.transport.published().is_empty());
        assert!(f.audit.is_empty().await.unwrap());
    }

    #[tokio::test]
    async fn test_dispatch_options_output() {
        let f = fixture(false);
        let result = f
            .dispatcher
            .dispatch_options(
                "esg-0001",
                "OUTPUT",
                "SIREN",
                &json!({"pattern": "PULSE", "totalDuration": 30, "pulseCount": 5}),
            )
            .await
            .unwrap();
        assert_eq!(result.action, "SIREN");

        let json = serde_json::to_value(&result).unwrap();
        assert!(json.get("requestId").is_some());
        assert!(json.get("delivered").is_none());
    }
}
