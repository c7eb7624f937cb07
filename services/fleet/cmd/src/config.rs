//! Configuration handling for the fleet service.
//!
//! Settings come from a YAML file, fall back to defaults when the file is
//! missing or unreadable, and are finally overridden by `FLEET_*`
//! environment variables.

use anyhow::{Context, Result};
use fleet_audit::AuditMode;
use fleet_router::{DeviceEntry, MqttSettings, DEFAULT_TOPIC_BASE};
use fleet_wire::{HmacKey, DEFAULT_KEY_HEX};
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{info, warn};

/// Fleet service configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct FleetConfig {
    /// Broker connection
    pub mqtt: MqttSection,
    /// Envelope key
    pub security: SecuritySection,
    /// Operator console
    pub console: ConsoleSection,
    /// Audit log backend and initial toggles
    pub audit: AuditSection,
    /// Command building and follow-up tasks
    pub commands: CommandsSection,
    /// Provisioned devices
    pub devices: Vec<DeviceEntry>,
}

/// Broker settings plus the topic root
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MqttSection {
    /// Topic root, e.g. `esagtech`
    pub topic_base: String,
    /// Client connection settings
    #[serde(flatten)]
    pub settings: MqttSettings,
}

impl Default for MqttSection {
    fn default() -> Self {
        Self {
            topic_base: DEFAULT_TOPIC_BASE.to_string(),
            settings: MqttSettings::default(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SecuritySection {
    /// 32-byte key, hex encoded
    pub hmac_key: String,
}

impl Default for SecuritySection {
    fn default() -> Self {
        Self {
            hmac_key: DEFAULT_KEY_HEX.to_string(),
        }
    }
}

impl SecuritySection {
    pub fn key(&self) -> Result<HmacKey> {
        HmacKey::from_hex(&self.hmac_key).context("invalid security.hmac_key")
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ConsoleSection {
    /// Listen address
    pub listen: SocketAddr,
    pub user: String,
    pub password: String,
    /// Per-session outbound queue depth
    pub outbound_queue: usize,
    /// Events kept for AT+BUFFER
    pub buffer_capacity: usize,
}

impl Default for ConsoleSection {
    fn default() -> Self {
        Self {
            listen: SocketAddr::from(([0, 0, 0, 0], 8888)),
            user: "admin".to_string(),
            password: "admin123".to_string(),
            outbound_queue: fleet_console::DEFAULT_OUTBOUND_QUEUE,
            buffer_capacity: fleet_console::DEFAULT_BUFFER_CAPACITY,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AuditSection {
    /// JSON-lines file; rows stay in memory when unset
    pub path: Option<PathBuf>,
    /// Initial CMDLOG state
    pub cmdlog: bool,
    /// Initial ALARMLOG state
    pub alarmlog: bool,
}

impl Default for AuditSection {
    fn default() -> Self {
        Self {
            path: None,
            cmdlog: true,
            alarmlog: true,
        }
    }
}

impl AuditSection {
    pub fn mode(&self) -> AuditMode {
        match &self.path {
            Some(path) => AuditMode::File { path: path.clone() },
            None => AuditMode::InMemory,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CommandsSection {
    /// Sequence seed; derived from the clock when unset
    pub sequence_seed: Option<u32>,
    pub auth_level: u32,
    /// Push CONFIG/DEVICE to devices logging in with a stale id
    pub device_sync: bool,
    /// Suppress repeated syncs to one device within this window
    pub sync_window: String,
    /// Forget unanswered commands after this long
    pub response_timeout: String,
    /// Counter report period
    pub stats_interval: String,
}

impl Default for CommandsSection {
    fn default() -> Self {
        Self {
            sequence_seed: None,
            auth_level: fleet_command::DEFAULT_AUTH_LEVEL,
            device_sync: true,
            sync_window: "10s".to_string(),
            response_timeout: "30s".to_string(),
            stats_interval: "60s".to_string(),
        }
    }
}

fn parse_duration(name: &str, value: &str) -> Result<Duration> {
    humantime::parse_duration(value).with_context(|| format!("invalid commands.{}: {:?}", name, value))
}

impl CommandsSection {
    /// Seed for the sequence allocator, `unix_secs % 100000` unless configured
    pub fn seed(&self) -> u32 {
        self.sequence_seed.unwrap_or_else(|| {
            let secs = std::time::SystemTime::now()
                .duration_since(std::time::UNIX_EPOCH)
                .map(|d| d.as_secs())
                .unwrap_or(0);
            (secs % 100_000) as u32
        })
    }

    pub fn sync_window(&self) -> Result<Duration> {
        parse_duration("sync_window", &self.sync_window)
    }

    pub fn response_timeout(&self) -> Result<Duration> {
        parse_duration("response_timeout", &self.response_timeout)
    }

    pub fn stats_interval(&self) -> Result<Duration> {
        parse_duration("stats_interval", &self.stats_interval)
    }
}

impl FleetConfig {
    /// Load configuration from file and environment variables
    pub fn load_from_file<P: AsRef<Path>>(config_path: P) -> Result<Self> {
        let path = config_path.as_ref();
        let mut config = match std::fs::read_to_string(path) {
            Ok(content) => match serde_yaml::from_str::<FleetConfig>(&content) {
                Ok(config) => {
                    info!("Loaded configuration from {:?}", path);
                    config
                }
                Err(e) => {
                    warn!("Failed to parse config file {:?} ({}), using defaults", path, e);
                    Self::default()
                }
            },
            Err(_) => {
                warn!("Config file {:?} not found, using defaults", path);
                Self::default()
            }
        };

        config.apply_environment_overrides(|name| std::env::var(name).ok());
        config.validate()?;

        if config.security.hmac_key.eq_ignore_ascii_case(DEFAULT_KEY_HEX) {
            warn!("Using the device factory HMAC key");
        }
        if config.console.password == ConsoleSection::default().password {
            warn!("Console is using the default password");
        }

        info!(
            "Final fleet configuration: broker={}:{}, topic_base={}, console={}, devices={}",
            config.mqtt.settings.host,
            config.mqtt.settings.port,
            config.mqtt.topic_base,
            config.console.listen,
            config.devices.len()
        );

        Ok(config)
    }

    /// Apply `FLEET_*` overrides read through `lookup`
    fn apply_environment_overrides<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(host) = lookup("FLEET_MQTT_HOST") {
            info!("MQTT host overridden by environment: {}", host);
            self.mqtt.settings.host = host;
        }

        if let Some(port) = lookup("FLEET_MQTT_PORT") {
            match port.parse::<u16>() {
                Ok(port) => {
                    self.mqtt.settings.port = port;
                    info!("MQTT port overridden by environment: {}", port);
                }
                Err(_) => warn!("Ignoring invalid FLEET_MQTT_PORT: {}", port),
            }
        }

        if let Some(base) = lookup("FLEET_TOPIC_BASE") {
            info!("Topic base overridden by environment: {}", base);
            self.mqtt.topic_base = base;
        }

        if let Some(key) = lookup("FLEET_HMAC_KEY") {
            info!("HMAC key overridden by environment");
            self.security.hmac_key = key;
        }

        if let Some(listen) = lookup("FLEET_CONSOLE_LISTEN") {
            match listen.parse::<SocketAddr>() {
                Ok(addr) => {
                    self.console.listen = addr;
                    info!("Console listen address overridden by environment: {}", addr);
                }
                Err(_) => warn!("Ignoring invalid FLEET_CONSOLE_LISTEN: {}", listen),
            }
        }

        if let Some(user) = lookup("FLEET_CONSOLE_USER") {
            self.console.user = user;
        }

        if let Some(password) = lookup("FLEET_CONSOLE_PASSWORD") {
            self.console.password = password;
        }

        if let Some(path) = lookup("FLEET_AUDIT_PATH") {
            info!("Audit path overridden by environment: {}", path);
            self.audit.path = Some(PathBuf::from(path));
        }
    }

    /// Reject values that would only fail later at startup
    fn validate(&self) -> Result<()> {
        self.security.key()?;
        self.commands.sync_window()?;
        self.commands.response_timeout()?;
        self.commands.stats_interval()?;
        if self.mqtt.topic_base.is_empty() || self.mqtt.topic_base.contains(['/', '+', '#']) {
            anyhow::bail!("invalid mqtt.topic_base: {:?}", self.mqtt.topic_base);
        }
        Ok(())
    }
}
