//! Fleet service binary.
//!
//! `serve` runs the transport router, the operator console and the audit,
//! sync and stats tasks against an MQTT broker. `send` dispatches a single
//! command and `decode` inspects a captured frame offline.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use fleet_audit::LogToggles;
use fleet_command::CommandBuilder;
use fleet_console::{ConsoleContext, ConsoleServer, Credentials, EventBuffer};
use fleet_router::{
    AuditSink, CommandDispatcher, DeviceSync, MqttTransport, PendingCommands, RouterConfig,
    StaticDirectory, StatsReporter, TopicScheme, Transport, TransportRouter,
};
use fleet_wire::{Envelope, HmacKey, Message, MessageType};
use serde_json::{json, Value};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};
use tracing_subscriber::EnvFilter;

mod config;
mod logging;

use config::FleetConfig;
use logging::FleetLogFormatter;

/// Time given to the MQTT event loop to write a publish before disconnecting
const FLUSH_GRACE: Duration = Duration::from_millis(500);

/// Device wire protocol tools and live operator console
#[derive(Parser, Debug)]
#[command(name = "esg-fleet", version, about = "Alarm controller fleet service")]
struct Args {
    /// Configuration file path
    #[arg(long, default_value = "fleet.yaml")]
    config: PathBuf,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info")]
    log_level: String,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run the router, console and background tasks (default)
    Serve,

    /// Build and publish one command, then print the result
    Send {
        /// Target device hostname
        #[arg(long)]
        hostname: String,

        /// Command family: SYSTEM, OUTPUT, OTA, DIAGNOSTIC, CONFIG, CONFIG_READ
        #[arg(long)]
        kind: String,

        /// Action, e.g. REBOOT
        #[arg(long)]
        action: String,

        /// Options as a JSON object
        #[arg(long)]
        options: Option<String>,

        /// How long to wait for the broker before sending anyway
        #[arg(long, default_value = "10s")]
        connect_timeout: humantime::Duration,
    },

    /// Decode a hex frame captured from the broker
    Decode {
        /// Frame bytes as hex; whitespace is ignored
        #[arg(long)]
        hex: String,

        /// Message type suffix (hb, status, login, alarm, lw, response, cmd)
        #[arg(long = "type", default_value = "hb")]
        message_type: String,
    },
}

#[tokio::main(flavor = "multi_thread")]
async fn main() -> Result<()> {
    let args = Args::parse();

    let env_filter = EnvFilter::new("info")
        .add_directive(format!("esg_fleet={}", args.log_level).parse()?)
        .add_directive(format!("fleet_router={}", args.log_level).parse()?)
        .add_directive(format!("fleet_console={}", args.log_level).parse()?)
        .add_directive(format!("fleet_audit={}", args.log_level).parse()?)
        .add_directive("rumqttc=warn".parse()?);

    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_writer(std::io::stderr)
        .event_format(FleetLogFormatter::new("esg-fleet"))
        .init();

    let config = FleetConfig::load_from_file(&args.config)?;

    match args.command.unwrap_or(Command::Serve) {
        Command::Serve => serve(config).await,
        Command::Send {
            hostname,
            kind,
            action,
            options,
            connect_timeout,
        } => send(config, &hostname, &kind, &action, options.as_deref(), connect_timeout.into()).await,
        Command::Decode { hex, message_type } => {
            let key = config.security.key()?;
            let output = decode_frame(&key, &hex, &message_type)?;
            println!("{}", serde_json::to_string_pretty(&output)?);
            Ok(())
        }
    }
}

/// Shared pieces of a running router
struct Runtime {
    mqtt: Arc<MqttTransport>,
    router: Arc<TransportRouter>,
    pending: Arc<PendingCommands>,
    dispatcher: Arc<CommandDispatcher>,
    toggles: Arc<LogToggles>,
    audit: Arc<dyn fleet_audit::AuditLog>,
}

impl Runtime {
    /// Connect to the broker and build the router and dispatcher; ingest starts
    /// once the caller has subscribed its consumers
    async fn start(config: &FleetConfig) -> Result<(Self, tokio::sync::mpsc::Receiver<fleet_router::InboundMessage>)> {
        let key = config.security.key()?;
        let scheme = TopicScheme::new(&config.mqtt.topic_base);
        let (mqtt, inbound) = MqttTransport::connect(&config.mqtt.settings, scheme.subscriptions());
        let mqtt = Arc::new(mqtt);

        let directory = Arc::new(StaticDirectory::from_entries(&config.devices));
        let pending = Arc::new(PendingCommands::new(config.commands.response_timeout()?));
        let router = Arc::new(
            TransportRouter::new(RouterConfig::new(scheme, key), mqtt.clone(), directory)
                .with_correlator(pending.clone()),
        );

        let audit = fleet_audit::from_mode(config.audit.mode())
            .await
            .context("failed to open audit log")?;
        let toggles = Arc::new(LogToggles::new(config.audit.cmdlog, config.audit.alarmlog));

        let seed = config.commands.seed();
        debug!("Command sequence seed {}", seed);
        let builder = CommandBuilder::new(seed).with_auth_level(config.commands.auth_level);
        let dispatcher = Arc::new(CommandDispatcher::new(
            router.clone(),
            builder,
            audit.clone(),
            toggles.clone(),
        ));

        Ok((
            Self {
                mqtt,
                router,
                pending,
                dispatcher,
                toggles,
                audit,
            },
            inbound,
        ))
    }
}

async fn serve(config: FleetConfig) -> Result<()> {
    info!("Starting esg-fleet v{}", env!("CARGO_PKG_VERSION"));

    let (rt, inbound) = Runtime::start(&config).await?;

    let sink = AuditSink::new(rt.audit.clone(), rt.toggles.clone());
    tokio::spawn(sink.run(rt.router.subscribe()));

    if config.commands.device_sync {
        let sync = Arc::new(DeviceSync::with_window(
            rt.dispatcher.clone(),
            config.commands.sync_window()?,
        ));
        tokio::spawn(sync.run(rt.router.subscribe()));
        component_info!("router", "Device id sync enabled");
    }

    let buffer = Arc::new(EventBuffer::new(config.console.buffer_capacity));
    tokio::spawn(buffer.clone().run(rt.router.subscribe()));

    let stats = StatsReporter::new(rt.router.clone(), config.commands.stats_interval()?)
        .with_pending(rt.pending.clone());
    tokio::spawn(stats.run());

    tokio::spawn(rt.router.clone().run_ingest(inbound));

    let ctx = Arc::new(ConsoleContext::new(
        rt.router.clone(),
        rt.toggles.clone(),
        buffer,
        Credentials::new(config.console.user.clone(), config.console.password.clone()),
    ));
    let console = Arc::new(ConsoleServer::new(ctx, config.console.outbound_queue));
    let listener = ConsoleServer::bind(&config.console.listen.to_string()).await?;
    component_info!("console", "Operator console listening on {}", config.console.listen);
    let console_task = tokio::spawn(console.serve(listener));

    tokio::select! {
        result = tokio::signal::ctrl_c() => {
            result.context("failed to listen for shutdown signal")?;
            info!("Shutdown signal received");
        }
        _ = console_task => {
            component_error!("console", "Operator console stopped unexpectedly");
        }
    }

    rt.mqtt.shutdown().await;
    let counters = rt.router.counters();
    info!(
        "esg-fleet stopped: {} messages seen, {} commands sent",
        counters.messages_seen, counters.commands_sent
    );
    Ok(())
}

async fn send(
    config: FleetConfig,
    hostname: &str,
    kind: &str,
    action: &str,
    options: Option<&str>,
    connect_timeout: Duration,
) -> Result<()> {
    let options: Value = match options {
        Some(raw) => serde_json::from_str(raw).context("--options must be a JSON object")?,
        None => json!({}),
    };

    let (rt, inbound) = Runtime::start(&config).await?;
    tokio::spawn(rt.router.clone().run_ingest(inbound));

    let connected = tokio::time::timeout(connect_timeout, async {
        while !rt.mqtt.is_connected() {
            tokio::time::sleep(Duration::from_millis(100)).await;
        }
    })
    .await;
    if connected.is_err() {
        component_warn!("router", "Broker not reachable after {:?}, sending anyway", connect_timeout);
    }

    let result = rt
        .dispatcher
        .dispatch_options(hostname, kind, action, &options)
        .await?;
    println!("{}", serde_json::to_string_pretty(&result)?);

    if result.delivered {
        tokio::time::sleep(FLUSH_GRACE).await;
    }
    rt.mqtt.shutdown().await;
    Ok(())
}

/// Envelope summary plus the decoded message, or the decode failure
fn decode_frame(key: &HmacKey, hex_frame: &str, message_type: &str) -> Result<Value> {
    let message_type = MessageType::from_suffix(&message_type.to_ascii_lowercase())
        .with_context(|| format!("unknown message type {:?}", message_type))?;
    let cleaned: String = hex_frame.chars().filter(|c| !c.is_whitespace()).collect();
    let frame = hex::decode(&cleaned).context("--hex is not valid hex")?;

    let envelope = Envelope::decode(&frame, key)?;
    let mut output = json!({
        "messageType": message_type.suffix(),
        "envelope": envelope.info(),
    });

    if !envelope.valid {
        output["decodeError"] = json!("HMAC verification failed");
        return Ok(output);
    }

    match Message::decode(message_type, &envelope.payload) {
        Ok(message) => output["decoded"] = serde_json::to_value(&message)?,
        Err(e) => {
            output["decodeError"] = json!(e.to_string());
            output["partialFields"] = serde_json::to_value(&e.fields)?;
        }
    }
    Ok(output)
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE_FRAME: &str =
        "00190000078308eec8c7c50650b2c003620d393839663938312d6469727479a53083f3fc3182e8";

    #[test]
    fn test_args_default_to_serve() {
        let args = Args::try_parse_from(["esg-fleet"]).unwrap();
        assert!(args.command.is_none());
        assert_eq!(args.config, PathBuf::from("fleet.yaml"));

        let args = Args::try_parse_from([
            "esg-fleet",
            "send",
            "--hostname",
            "esg-0001",
            "--kind",
            "SYSTEM",
            "--action",
            "REBOOT",
        ])
        .unwrap();
        match args.command {
            Some(Command::Send {
                hostname,
                connect_timeout,
                ..
            }) => {
                assert_eq!(hostname, "esg-0001");
                assert_eq!(Duration::from(connect_timeout), Duration::from_secs(10));
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_decode_sample_heartbeat() {
        let key = HmacKey::factory().unwrap();
        let output = decode_frame(&key, SAMPLE_FRAME, "hb").unwrap();

        // The captured frame was signed with a provisioned key, not the factory one
        assert_eq!(output["envelope"]["sequence"], 1923);
        assert_eq!(output["envelope"]["payloadLength"], 25);
        assert_eq!(output["envelope"]["valid"], false);
        assert_eq!(output["decodeError"], "HMAC verification failed");
        assert!(output.get("decoded").is_none());

        let frame = hex::decode(SAMPLE_FRAME).unwrap();
        let payload = &frame[6..6 + 25];
        let resigned = Envelope::encode(payload, 1923, &key).unwrap();
        let output = decode_frame(&key, &hex::encode(&resigned), "hb").unwrap();

        assert_eq!(output["envelope"]["valid"], true);
        assert_eq!(output["envelope"]["sequence"], 1923);
        assert_eq!(output["decoded"]["timestamp"], 1756488814u64);
        assert_eq!(output["decoded"]["uptime"], 57394);
        assert_eq!(output["decoded"]["firmware"], "989f981-dirty");
        assert!(output.get("decodeError").is_none());
    }

    #[test]
    fn test_decode_with_wrong_key() {
        let key = HmacKey::from_hex(&"ab".repeat(32)).unwrap();
        let output = decode_frame(&key, SAMPLE_FRAME, "hb").unwrap();
        assert_eq!(output["envelope"]["valid"], false);
        assert_eq!(output["decodeError"], "HMAC verification failed");
        assert!(output.get("decoded").is_none());
    }

    #[test]
    fn test_decode_rejects_bad_input() {
        let key = HmacKey::factory().unwrap();
        assert!(decode_frame(&key, SAMPLE_FRAME, "bogus").is_err());
        assert!(decode_frame(&key, "zz", "hb").is_err());
        assert!(decode_frame(&key, "0001", "hb").is_err());
    }
}
