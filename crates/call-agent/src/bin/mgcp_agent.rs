//! Standalone MGCP call agent
//!
//! Serves the gateways of a TOML configuration with a static dialplan and
//! logs every call event. Legs the agent asks to hang up are released right
//! away, so lines can be taken off hook, dial, and go back on hook without a
//! switching core attached. Send SIGHUP to reload the configuration.
//!
//! ```toml
//! [general]
//! bind_addr = "0.0.0.0:2727"
//!
//! [dialplan]
//! context = "local"
//! extensions = ["100", "101", "*97"]
//! voicemail = ["100"]
//!
//! [[gateway]]
//! name = "gw1.example.net"
//! host = "192.0.2.20"
//!
//! [[gateway.endpoint]]
//! name = "aaln/1"
//! context = "local"
//! ```

use std::collections::HashSet;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU16, Ordering};
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use serde::Deserialize;
use tracing::{debug, error, info, warn};

use mgcp_call_agent::{
    log_welcome, parse_log_level, setup_logging, AgentConfig, AgentResult, CallAgent, CallEvent,
    CallLegId, Dialplan, LoggingConfig, MediaController, NegotiatedMedia,
};

#[derive(Parser, Debug)]
#[command(name = "mgcp-agent", version, about = "MGCP call agent")]
struct Args {
    /// Configuration file
    #[arg(short, long, default_value = "mgcp.toml")]
    config: PathBuf,

    /// Log level (trace, debug, info, warn, error)
    #[arg(short, long, default_value = "info")]
    log_level: String,

    /// Log as JSON
    #[arg(long)]
    json: bool,

    /// Include source file and line in log records
    #[arg(long)]
    file_info: bool,

    /// Dump every MGCP datagram
    #[arg(long)]
    trace: bool,
}

/// The agent configuration plus the static dialplan
#[derive(Debug, Deserialize)]
struct BinaryConfig {
    #[serde(flatten)]
    agent: AgentConfig,

    #[serde(default)]
    dialplan: DialplanConfig,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct DialplanConfig {
    /// Context the extensions live in; empty matches every context
    context: String,
    extensions: Vec<String>,
    /// Mailboxes with new messages
    voicemail: Vec<String>,
}

fn load_config(path: &Path) -> Result<BinaryConfig> {
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("reading {}", path.display()))?;
    let config: BinaryConfig =
        toml::from_str(&text).with_context(|| format!("parsing {}", path.display()))?;
    config.agent.validate()?;
    Ok(config)
}

/// Exact-match dialplan over a fixed extension list
struct StaticDialplan {
    context: String,
    extensions: Vec<String>,
    voicemail: HashSet<String>,
}

impl StaticDialplan {
    fn new(config: DialplanConfig) -> Self {
        Self {
            context: config.context,
            extensions: config.extensions,
            voicemail: config.voicemail.into_iter().collect(),
        }
    }

    fn serves(&self, context: &str) -> bool {
        self.context.is_empty() || self.context == context
    }
}

impl Dialplan for StaticDialplan {
    fn exists(&self, context: &str, exten: &str, _caller: &str) -> bool {
        self.serves(context) && self.extensions.iter().any(|e| e == exten)
    }

    fn can_match(&self, context: &str, exten: &str, _caller: &str) -> bool {
        self.serves(context) && self.extensions.iter().any(|e| e.starts_with(exten))
    }

    fn match_more(&self, context: &str, exten: &str, _caller: &str) -> bool {
        self.serves(context)
            && self
                .extensions
                .iter()
                .any(|e| e.len() > exten.len() && e.starts_with(exten))
    }

    fn has_voicemail(&self, mailbox: &str) -> bool {
        self.voicemail.contains(mailbox)
    }
}

/// Hands out RTP ports without opening sockets
struct PortAllocator {
    ip: IpAddr,
    next: AtomicU16,
}

impl PortAllocator {
    const FIRST_PORT: u16 = 16384;

    fn new(ip: IpAddr) -> Self {
        Self {
            ip,
            next: AtomicU16::new(Self::FIRST_PORT),
        }
    }
}

impl MediaController for PortAllocator {
    fn allocate(&self, leg: CallLegId) -> AgentResult<SocketAddr> {
        let mut port = self.next.fetch_add(2, Ordering::Relaxed);
        if port < Self::FIRST_PORT {
            self.next.store(Self::FIRST_PORT + 2, Ordering::Relaxed);
            port = Self::FIRST_PORT;
        }
        debug!("Allocated RTP port {} for leg {}", port, leg);
        Ok(SocketAddr::new(self.ip, port))
    }

    fn start(&self, leg: CallLegId, remote: SocketAddr, media: &NegotiatedMedia) -> AgentResult<()> {
        info!(
            "Media for leg {} towards {} with {:?}",
            leg, remote, media.payloads
        );
        Ok(())
    }

    fn release(&self, leg: CallLegId) {
        debug!("Released media for leg {}", leg);
    }

    fn send_dtmf(&self, leg: CallLegId, digit: char) -> AgentResult<()> {
        debug!("DTMF '{}' on leg {}", digit, leg);
        Ok(())
    }
}

fn handle_event(agent: &CallAgent, event: CallEvent) {
    match event {
        CallEvent::NewChannel { leg, endpoint, .. } => {
            info!("New channel {} on {}", leg, endpoint);
        }
        CallEvent::StartPbx {
            leg, context, exten, ..
        } => {
            info!("Leg {} dialed '{}' in context '{}'", leg, exten, context);
        }
        CallEvent::Hangup { leg, cause } => {
            info!("Hanging up leg {} ({:?})", leg, cause);
            if let Err(e) = agent.hangup(leg) {
                warn!("Failed to hang up leg {}: {}", leg, e);
            }
        }
        CallEvent::ChannelGone { leg } => info!("Leg {} released", leg),
        other => debug!("Call event: {:?}", other),
    }
}

fn log_gateways(agent: &CallAgent) {
    match serde_json::to_string(&agent.list_gateways()) {
        Ok(json) => info!("Gateways: {}", json),
        Err(e) => warn!("Unable to serialize gateway list: {}", e),
    }
}

#[cfg(unix)]
async fn reload_signal() -> Result<tokio::signal::unix::Signal> {
    use tokio::signal::unix::{signal, SignalKind};
    Ok(signal(SignalKind::hangup())?)
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let mut config = load_config(&args.config)?;
    if args.trace {
        config.agent.general.trace = true;
    }

    let mut logging = LoggingConfig::new(parse_log_level(&args.log_level)?);
    if args.json {
        logging = logging.with_json();
    }
    if args.file_info {
        logging = logging.with_file_info();
    }
    if config.agent.general.trace {
        logging = logging.with_protocol_trace();
    }
    setup_logging(logging)?;
    log_welcome(env!("CARGO_PKG_VERSION"));
    let media_ip = config
        .agent
        .general
        .external_ip
        .unwrap_or(IpAddr::V4(Ipv4Addr::LOCALHOST));

    let (agent, mut events) = CallAgent::start(
        config.agent,
        Arc::new(StaticDialplan::new(config.dialplan)),
        Arc::new(PortAllocator::new(media_ip)),
    )
    .await?;
    info!("Listening on {}", agent.local_addr()?);
    log_gateways(&agent);

    #[cfg(unix)]
    let mut hangups = reload_signal().await?;

    loop {
        #[cfg(unix)]
        let reload = hangups.recv();
        #[cfg(not(unix))]
        let reload = std::future::pending::<Option<()>>();

        tokio::select! {
            event = events.recv() => match event {
                Some(event) => handle_event(&agent, event),
                None => break,
            },
            _ = reload => {
                info!("Reloading {}", args.config.display());
                match load_config(&args.config) {
                    Ok(config) => {
                        match agent.reload(config.agent).await {
                            Ok(()) => log_gateways(&agent),
                            Err(e) => error!("Reload failed: {}", e),
                        }
                    }
                    Err(e) => error!("Reload failed: {:#}", e),
                }
            }
            _ = tokio::signal::ctrl_c() => {
                info!("Shutting down");
                break;
            }
        }
    }

    agent.shutdown();
    Ok(())
}
