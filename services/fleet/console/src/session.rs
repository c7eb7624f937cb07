//! Per-connection console state machine.

use crate::buffer::{EventBuffer, BUFFER_REPLAY_LIMIT};
use crate::command::{help_text, split, AtCommand};
use crate::error::ConsoleError;
use crate::render::{render_event, Frame, StatusFrame};
use crate::settings::SessionSettings;
use fleet_audit::LogToggles;
use fleet_router::{DecodedEvent, TransportRouter};
use std::fmt;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use subtle::ConstantTimeEq;
use tracing::{info, warn};

/// Operator credentials for AT+AUTH
#[derive(Clone)]
pub struct Credentials {
    user: String,
    password: String,
}

impl Credentials {
    /// Create credentials
    pub fn new(user: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            user: user.into(),
            password: password.into(),
        }
    }

    /// Constant-time check of a user and password pair
    pub fn verify(&self, user: &str, password: &str) -> bool {
        let user_ok = self.user.as_bytes().ct_eq(user.as_bytes());
        let password_ok = self.password.as_bytes().ct_eq(password.as_bytes());
        (user_ok & password_ok).into()
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("user", &self.user)
            .field("password", &"<redacted>")
            .finish()
    }
}

/// State shared by every console session
pub struct ConsoleContext {
    router: Arc<TransportRouter>,
    toggles: Arc<LogToggles>,
    buffer: Arc<EventBuffer>,
    credentials: Credentials,
    clients: AtomicUsize,
}

impl ConsoleContext {
    /// Create a context
    pub fn new(
        router: Arc<TransportRouter>,
        toggles: Arc<LogToggles>,
        buffer: Arc<EventBuffer>,
        credentials: Credentials,
    ) -> Self {
        Self {
            router,
            toggles,
            buffer,
            credentials,
            clients: AtomicUsize::new(0),
        }
    }

    /// Router whose events sessions watch
    pub fn router(&self) -> &Arc<TransportRouter> {
        &self.router
    }

    /// Replay buffer
    pub fn buffer(&self) -> &Arc<EventBuffer> {
        &self.buffer
    }

    /// Connected clients
    pub fn clients(&self) -> usize {
        self.clients.load(Ordering::Relaxed)
    }

    pub(crate) fn client_connected(&self) -> usize {
        self.clients.fetch_add(1, Ordering::Relaxed) + 1
    }

    pub(crate) fn client_disconnected(&self) {
        self.clients.fetch_sub(1, Ordering::Relaxed);
    }
}

/// What the event loop needs to know about its session
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SessionView {
    /// Operator authenticated
    pub authenticated: bool,
    /// Display settings
    pub settings: SessionSettings,
}

impl SessionView {
    /// Frame for a live event, or `None` when the session should not see it
    pub fn frame_for(&self, event: &DecodedEvent) -> Option<Frame> {
        if !self.authenticated || !self.settings.matches(event) {
            return None;
        }
        Some(Frame::MqttMessage(render_event(event, &self.settings)))
    }
}

/// One operator connection
///
/// Starts unauthenticated with default settings; nothing it does touches
/// another session except the process-wide log toggles.
pub struct Session {
    id: u64,
    authenticated: bool,
    settings: SessionSettings,
    ctx: Arc<ConsoleContext>,
}

impl Session {
    /// Create a session
    pub fn new(id: u64, ctx: Arc<ConsoleContext>) -> Self {
        Self {
            id,
            authenticated: false,
            settings: SessionSettings::default(),
            ctx,
        }
    }

    /// Connection id
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Whether AT+AUTH succeeded
    pub fn is_authenticated(&self) -> bool {
        self.authenticated
    }

    /// Current display settings
    pub fn settings(&self) -> &SessionSettings {
        &self.settings
    }

    /// Snapshot for the event loop
    pub fn view(&self) -> SessionView {
        SessionView {
            authenticated: self.authenticated,
            settings: self.settings.clone(),
        }
    }

    /// First frame sent on connect
    pub fn greeting() -> Frame {
        Frame::system("Fleet monitor connected. Please authenticate with AT+AUTH=<user>,<pass>")
    }

    /// Handle one input line and produce the reply
    pub fn handle_line(&mut self, line: &str) -> Frame {
        match self.dispatch(line) {
            Ok(frame) => frame,
            Err(e) => Frame::error(&e),
        }
    }

    fn dispatch(&mut self, line: &str) -> Result<Frame, ConsoleError> {
        let (name, value) = split(line)?;
        if !self.authenticated && name != "AUTH" {
            return Err(ConsoleError::AuthRequired);
        }
        let command = AtCommand::from_parts(&name, value.as_deref())?;
        Ok(self.execute(command))
    }

    fn execute(&mut self, command: AtCommand) -> Frame {
        match command {
            AtCommand::Auth { user, password } => {
                if self.ctx.credentials.verify(&user, &password) {
                    self.authenticated = true;
                    info!("Console session {} authenticated as {}", self.id, user);
                    Frame::Auth {
                        success: true,
                        message: "Authentication successful".to_string(),
                    }
                } else {
                    self.authenticated = false;
                    warn!("Console session {} failed authentication", self.id);
                    Frame::Auth {
                        success: false,
                        message: "Authentication failed".to_string(),
                    }
                }
            }
            AtCommand::Ping => Frame::response("OK"),
            AtCommand::Help => Frame::response(help_text()),
            AtCommand::Mode(mode) => {
                self.settings.mode = mode;
                Frame::response(format!("Mode set to {}", mode))
            }
            AtCommand::Hmac(on) => {
                self.settings.hmac_detail = on;
                Frame::response(format!("HMAC display {}", if on { "enabled" } else { "disabled" }))
            }
            AtCommand::Verbose(level) => {
                self.settings.verbosity = level;
                Frame::response(format!("Verbosity set to {}", level))
            }
            AtCommand::Filter(pattern) => {
                let message = match &pattern {
                    Some(p) => format!("Filter set to {}", p),
                    None => "Filter cleared".to_string(),
                };
                self.settings.filter = pattern;
                Frame::response(message)
            }
            AtCommand::Direction(direction) => {
                self.settings.direction = direction;
                Frame::response(format!("Direction set to {}", direction))
            }
            AtCommand::SetMessageTypes(types) => {
                let message = match &types {
                    Some(types) => format!(
                        "Message types set to: {}",
                        types.iter().map(|t| t.suffix()).collect::<Vec<_>>().join(", ")
                    ),
                    None => "Message types set to: all".to_string(),
                };
                self.settings.message_types = types;
                Frame::response(message)
            }
            AtCommand::Status => {
                let status = self.ctx.router.status();
                Frame::Status(StatusFrame {
                    transport: status.transport,
                    connected: status.connected,
                    counters: status.counters,
                    clients: self.ctx.clients(),
                    buffer_size: self.ctx.buffer.len(),
                    logging: self.ctx.toggles.snapshot(),
                    config: self.settings.clone(),
                })
            }
            AtCommand::Toggle(toggle, state) => {
                if let Some(enabled) = state {
                    let previous = self.ctx.toggles.set(toggle, enabled);
                    if previous != enabled {
                        info!(
                            "Console session {} set {}={}",
                            self.id,
                            toggle,
                            if enabled { "ON" } else { "OFF" }
                        );
                    }
                }
                Frame::response(self.ctx.toggles.describe(toggle))
            }
            AtCommand::Devices => Frame::Devices {
                list: self.ctx.router.devices(),
            },
            AtCommand::Buffer => {
                let messages = self
                    .ctx
                    .buffer
                    .recent(&self.settings, BUFFER_REPLAY_LIMIT)
                    .iter()
                    .map(|e| render_event(e, &self.settings))
                    .collect();
                Frame::Buffer { messages }
            }
            AtCommand::Clear => {
                self.ctx.buffer.clear();
                Frame::response("Buffer cleared")
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::settings::{DisplayMode, Verbosity};
    use fleet_audit::LogToggle;
    use fleet_router::{MemoryTransport, RouterConfig, StaticDirectory, TopicScheme};
    use fleet_wire::HmacKey;
    use serde_json::Value;

    fn context() -> Arc<ConsoleContext> {
        let (transport, _rx) = MemoryTransport::new();
        let config = RouterConfig::new(TopicScheme::default(), HmacKey::factory().unwrap());
        let router = Arc::new(TransportRouter::new(
            config,
            Arc::new(transport),
            Arc::new(StaticDirectory::new()),
        ));
        Arc::new(ConsoleContext::new(
            router,
            Arc::new(LogToggles::default()),
            Arc::new(EventBuffer::default()),
            Credentials::new("admin", "secret"),
        ))
    }

    fn json(frame: &Frame) -> Value {
        serde_json::from_str(&frame.to_line()).unwrap()
    }

    fn authed(ctx: Arc<ConsoleContext>) -> Session {
        let mut session = Session::new(1, ctx);
        let reply = json(&session.handle_line("AT+AUTH=admin,secret"));
        assert_eq!(reply["success"], true);
        session
    }

    #[test]
    fn test_credentials() {
        let creds = Credentials::new("admin", "secret");
        assert!(creds.verify("admin", "secret"));
        assert!(!creds.verify("admin", "Secret"));
        assert!(!creds.verify("admin", "secret2"));
        assert!(!creds.verify("", ""));
        assert!(!format!("{:?}", creds).contains("secret"));
    }

    #[test]
    fn test_commands_require_auth() {
        let mut session = Session::new(1, context());
        for line in ["AT", "AT+STATUS", "AT+HELP", "AT+MODE=raw", "AT+CMDLOG=ON", "AT+NOPE"] {
            let reply = json(&session.handle_line(line));
            assert_eq!(reply["type"], "error", "{}", line);
            assert_eq!(reply["code"], "AuthRequired", "{}", line);
        }
        let reply = json(&session.handle_line("hello"));
        assert_eq!(reply["code"], "InvalidFormat");

        let reply = json(&session.handle_line("AT+AUTH=admin,wrong"));
        assert_eq!(reply["type"], "auth");
        assert_eq!(reply["success"], false);
        assert!(!session.is_authenticated());

        let mut session = authed(context());
        for line in ["AT", "AT+STATUS", "AT+HELP", "AT+MODE=raw"] {
            let reply = json(&session.handle_line(line));
            assert_ne!(reply["type"], "error", "{}", line);
        }
    }

    #[test]
    fn test_failed_reauth_revokes_session() {
        let mut session = authed(context());
        assert!(session.is_authenticated());

        let reply = json(&session.handle_line("AT+AUTH=admin,wrong"));
        assert_eq!(reply["success"], false);
        assert!(!session.is_authenticated());

        let reply = json(&session.handle_line("AT+STATUS"));
        assert_eq!(reply["code"], "AuthRequired");

        let reply = json(&session.handle_line("AT+AUTH=admin,secret"));
        assert_eq!(reply["success"], true);
        assert!(session.is_authenticated());
    }

    #[test]
    fn test_settings_are_per_session() {
        let ctx = context();
        let mut a = authed(ctx.clone());
        let mut b = authed(ctx);

        a.handle_line("AT+MODE=both");
        a.handle_line("AT+VERBOSE=verbose");
        a.handle_line("AT+FILTER=esg-0001");
        b.handle_line("AT+HMAC=1");

        assert_eq!(a.settings().mode, DisplayMode::Both);
        assert_eq!(a.settings().verbosity, Verbosity::Verbose);
        assert_eq!(a.settings().filter.as_deref(), Some("esg-0001"));
        assert!(!a.settings().hmac_detail);

        assert_eq!(b.settings().mode, DisplayMode::Decoded);
        assert!(b.settings().filter.is_none());
        assert!(b.settings().hmac_detail);
    }

    #[test]
    fn test_toggles_are_global() {
        let ctx = context();
        let mut a = authed(ctx.clone());
        let mut b = authed(ctx.clone());

        let reply = json(&b.handle_line("AT+CMDLOG"));
        assert_eq!(reply["message"], "CMDLOG=OFF");

        let reply = json(&a.handle_line("AT+CMDLOG=ON"));
        assert_eq!(reply["message"], "CMDLOG=ON");
        assert!(ctx.toggles.get(LogToggle::CmdLog));

        let reply = json(&b.handle_line("AT+CMDLOG"));
        assert_eq!(reply["message"], "CMDLOG=ON");
        let reply = json(&b.handle_line("AT+ALARMLOG"));
        assert_eq!(reply["message"], "ALARMLOG=OFF");
    }

    #[test]
    fn test_status_reports_counters_and_config() {
        let mut session = authed(context());
        session.handle_line("AT+MODE=raw");
        let reply = json(&session.handle_line("AT+STATUS"));
        assert_eq!(reply["type"], "status");
        assert_eq!(reply["transport"], "memory");
        assert_eq!(reply["connected"], true);
        assert_eq!(reply["counters"]["messagesSeen"], 0);
        assert_eq!(reply["counters"]["devicesKnown"], 0);
        assert_eq!(reply["config"]["mode"], "raw");
        assert_eq!(reply["logging"]["cmdlog"], false);
    }

    #[test]
    fn test_errors_keep_session_usable() {
        let mut session = authed(context());
        let reply = json(&session.handle_line("AT+DANCE"));
        assert_eq!(reply["code"], "UnknownCommand");
        let reply = json(&session.handle_line("AT+MODE=sideways"));
        assert_eq!(reply["code"], "InvalidCommandValue");
        let reply = json(&session.handle_line("AT"));
        assert_eq!(reply["message"], "OK");
    }

    #[test]
    fn test_help_and_clear() {
        let mut session = authed(context());
        let reply = json(&session.handle_line("AT+HELP"));
        assert!(reply["message"].as_str().unwrap().starts_with("Available commands:"));
        let reply = json(&session.handle_line("AT+CLEAR"));
        assert_eq!(reply["message"], "Buffer cleared");
        let reply = json(&session.handle_line("AT+BUFFER"));
        assert_eq!(reply["type"], "buffer");
        assert_eq!(reply["messages"].as_array().unwrap().len(), 0);
    }
}
