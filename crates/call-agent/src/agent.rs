//! The call agent
//!
//! [`CallAgent`] owns the gateway registry, the transport and the background
//! tasks (receive loop, per-gateway retransmission timers and the digit
//! ticker). The call-processing core drives it through the methods below and
//! listens for [`CallEvent`]s on the channel returned at construction.
//!
//! # Example
//!
//! ```rust,no_run
//! use std::net::SocketAddr;
//! use std::sync::Arc;
//!
//! use mgcp_call_agent::{
//!     AgentConfig, AgentResult, CallAgent, CallLegId, Dialplan, MediaController, NegotiatedMedia,
//! };
//!
//! struct Extensions;
//!
//! impl Dialplan for Extensions {
//!     fn exists(&self, _context: &str, exten: &str, _caller: &str) -> bool {
//!         exten == "100"
//!     }
//!     fn can_match(&self, _context: &str, exten: &str, _caller: &str) -> bool {
//!         "100".starts_with(exten)
//!     }
//!     fn match_more(&self, _context: &str, exten: &str, _caller: &str) -> bool {
//!         exten.len() < 3 && "100".starts_with(exten)
//!     }
//! }
//!
//! struct NoMedia;
//!
//! impl MediaController for NoMedia {
//!     fn allocate(&self, _leg: CallLegId) -> AgentResult<SocketAddr> {
//!         Ok("127.0.0.1:16384".parse().unwrap())
//!     }
//!     fn start(&self, _leg: CallLegId, _remote: SocketAddr, _media: &NegotiatedMedia) -> AgentResult<()> {
//!         Ok(())
//!     }
//!     fn release(&self, _leg: CallLegId) {}
//!     fn send_dtmf(&self, _leg: CallLegId, _digit: char) -> AgentResult<()> {
//!         Ok(())
//!     }
//! }
//!
//! # async fn run() -> AgentResult<()> {
//! let config = AgentConfig::from_file("mgcp.toml")?;
//! let (agent, mut events) = CallAgent::start(config, Arc::new(Extensions), Arc::new(NoMedia)).await?;
//! while let Some(event) = events.recv().await {
//!     println!("{:?}", event);
//! }
//! agent.shutdown();
//! # Ok(())
//! # }
//! ```

use std::net::{IpAddr, SocketAddr};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use bytes::Bytes;
use dashmap::DashMap;
use parking_lot::{Mutex, RwLock};
use tokio::net::lookup_host;
use tokio::runtime::Handle;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, error, info, warn};

use mgcp_core::{
    CodecSet, ConnectionMode, NegotiatedMedia, ResponseBuilder, ResponseCode, TransactionId,
    TransactionIdGenerator,
};
use mgcp_transport::{Transport, TransportEvent, UdpTransport};

use crate::config::{AgentConfig, DigitTimeouts, GatewayConfig, GeneralConfig};
use crate::errors::{AgentError, AgentResult};
use crate::interface::{
    CallEvent, CallLegId, CallRequestOutcome, CallerId, Dialplan, Indication, MediaController,
};
use crate::logging::TRACE_TARGET;
use crate::registry::{
    Endpoint, EndpointHandle, Gateway, GatewaySummary, LegLocation, Registry,
};
use crate::state::EndpointSession;
use crate::transaction::{OutstandingMessage, RETRANSMIT_INTERVAL};

/// Period of the digit-collection ticker
pub const DIGIT_TICK: Duration = Duration::from_millis(100);

/// Settings that can change on reload
#[derive(Debug, Clone)]
pub(crate) struct Settings {
    pub codecs: CodecSet,
    pub dtmf_via_rtp: bool,
    pub external_ip: Option<IpAddr>,
    pub timeouts: DigitTimeouts,
}

impl Settings {
    fn from_config(general: &GeneralConfig) -> AgentResult<Self> {
        Ok(Self {
            codecs: general.codec_set()?,
            dtmf_via_rtp: general.dtmf_via_rtp,
            external_ip: general.external_ip,
            timeouts: general.digit_timeouts(),
        })
    }
}

/// State shared by the public API, the dispatcher and the background tasks
pub(crate) struct AgentCore {
    pub(crate) registry: Registry,
    pub(crate) legs: DashMap<CallLegId, LegLocation>,
    pub(crate) transport: Arc<dyn Transport>,
    pub(crate) dialplan: Arc<dyn Dialplan>,
    pub(crate) media: Arc<dyn MediaController>,
    pub(crate) settings: RwLock<Settings>,
    events: mpsc::UnboundedSender<CallEvent>,
    transaction_ids: TransactionIdGenerator,
    trace: AtomicBool,
    self_ref: Weak<AgentCore>,
}

impl AgentCore {
    pub(crate) fn emit(&self, event: CallEvent) {
        debug!("Call event: {:?}", event);
        if self.events.send(event).is_err() {
            debug!("Call event receiver dropped");
        }
    }

    pub(crate) fn next_transaction_id(&self) -> TransactionId {
        self.transaction_ids.next_id()
    }

    pub(crate) fn is_tracing(&self) -> bool {
        self.trace.load(Ordering::Relaxed)
    }

    pub(crate) fn send_raw(&self, data: &[u8], destination: SocketAddr) {
        if self.is_tracing() {
            info!(
                target: TRACE_TARGET,
                "Transmitting to {}:\n{}",
                destination,
                String::from_utf8_lossy(data)
            );
        }
        if let Err(e) = self.transport.send_datagram(data, destination) {
            error!("Failed to send to {}: {}", destination, e);
        }
    }

    /// Send a request and keep it for retransmission until answered
    pub(crate) fn transmit_tracked(
        &self,
        gateway: &Arc<Gateway>,
        endpoint: &Arc<EndpointHandle>,
        sub: Option<usize>,
        transaction_id: TransactionId,
        data: Bytes,
    ) {
        match gateway.address() {
            Some(addr) => self.send_raw(&data, addr),
            None => warn!(
                "Gateway '{}' has no address yet, transaction {} waits for retransmission",
                gateway.name(),
                transaction_id
            ),
        }

        let mut outstanding = gateway.outstanding.lock();
        outstanding.push(OutstandingMessage::new(
            endpoint.clone(),
            sub,
            transaction_id,
            data,
            Instant::now(),
        ));
        if outstanding.has_timer() {
            return;
        }

        let Ok(runtime) = Handle::try_current() else {
            warn!("No runtime for the retransmission timer of '{}'", gateway.name());
            return;
        };
        let core = self.self_ref.clone();
        let weak_gateway = Arc::downgrade(gateway);
        outstanding.set_timer(runtime.spawn(async move {
            loop {
                tokio::time::sleep(RETRANSMIT_INTERVAL).await;
                let (Some(core), Some(gateway)) = (core.upgrade(), weak_gateway.upgrade()) else {
                    break;
                };
                core.retransmit_pass(&gateway, Instant::now());

                let mut outstanding = gateway.outstanding.lock();
                if outstanding.is_empty() {
                    outstanding.release_timer();
                    break;
                }
            }
        }));
    }

    /// Resend what is due and time out what has been resent too often
    pub(crate) fn retransmit_pass(&self, gateway: &Arc<Gateway>, now: Instant) {
        let pass = gateway.outstanding.lock().due(now);

        if let Some(addr) = gateway.address() {
            for (transaction_id, data) in &pass.resend {
                debug!(
                    "Retransmitting transaction {} to gateway '{}'",
                    transaction_id,
                    gateway.name()
                );
                self.send_raw(data, addr);
            }
        }

        for message in pass.expired {
            warn!(
                "Maximum retries exceeded for transaction {} on {}",
                message.transaction_id,
                message.endpoint.full_name()
            );
            let handle = message.endpoint.clone();
            self.run_session(gateway, &handle, |session| {
                session.handle_response(
                    message.sub,
                    message.transaction_id,
                    ResponseCode::TIMEOUT,
                    None,
                )
            });
        }
    }

    /// Send a response to a gateway request and remember it
    pub(crate) fn send_response(
        &self,
        gateway: &Gateway,
        transaction_id: TransactionId,
        code: ResponseCode,
        comment: &str,
    ) {
        let data = match ResponseBuilder::new(code, transaction_id, comment).build() {
            Ok(data) => data,
            Err(e) => {
                warn!("Unable to build response {} {}: {}", code, transaction_id, e);
                return;
            }
        };
        gateway
            .responses
            .lock()
            .insert(transaction_id, data.clone(), Instant::now());
        match gateway.address() {
            Some(addr) => self.send_raw(&data, addr),
            None => warn!("No address to answer gateway '{}'", gateway.name()),
        }
    }

    /// `000` acknowledgement of a final response; never cached
    pub(crate) fn send_ack(&self, gateway: &Gateway, transaction_id: TransactionId) {
        let Some(addr) = gateway.address() else {
            return;
        };
        match ResponseBuilder::new(ResponseCode::ACK, transaction_id, "OK").build() {
            Ok(data) => self.send_raw(&data, addr),
            Err(e) => warn!("Unable to build acknowledgement {}: {}", transaction_id, e),
        }
    }

    /// Resolve a media host name away from the protocol path, then start media
    /// if the call is still the same one
    pub(crate) fn resolve_media_host(
        &self,
        handle: &Arc<EndpointHandle>,
        sub: usize,
        callid: String,
        host: String,
        port: u16,
        negotiated: NegotiatedMedia,
    ) {
        let Ok(runtime) = Handle::try_current() else {
            warn!("No runtime to resolve media host '{}'", host);
            return;
        };
        let core = self.self_ref.clone();
        let handle = handle.clone();
        runtime.spawn(async move {
            let addr = match lookup_host((host.as_str(), port)).await {
                Ok(mut addrs) => addrs.find(SocketAddr::is_ipv4),
                Err(e) => {
                    warn!("Unable to lookup media host '{}': {}", host, e);
                    return;
                }
            };
            let Some(addr) = addr else {
                warn!("No IPv4 address for media host '{}'", host);
                return;
            };
            let Some(core) = core.upgrade() else {
                return;
            };

            let mut ep = handle.lock();
            let s = &mut ep.subs[sub];
            if s.callid != callid {
                debug!("Call on {} changed while resolving '{}'", handle.full_name(), host);
                return;
            }
            let Some(leg) = s.owner else {
                return;
            };
            s.remote_media = Some(addr);
            if let Err(e) = core.media.start(leg, addr, &negotiated) {
                warn!("Unable to start media for {}: {}", leg, e);
            }
        });
    }

    /// Run `f` over one locked endpoint, then prune it if it was removed from
    /// configuration and has gone idle
    pub(crate) fn run_session<R>(
        &self,
        gateway: &Arc<Gateway>,
        handle: &Arc<EndpointHandle>,
        f: impl FnOnce(&mut EndpointSession<'_>) -> R,
    ) -> R {
        let (result, delete) = {
            let mut ep = handle.lock();
            let mut session = EndpointSession::new(self, gateway, handle, &mut ep);
            let result = f(&mut session);
            (result, ep.delete)
        };
        if delete {
            self.reap(gateway);
        }
        result
    }

    fn with_endpoint<R>(
        &self,
        name: &str,
        f: impl FnOnce(&mut EndpointSession<'_>) -> AgentResult<R>,
    ) -> AgentResult<R> {
        let (gateway, local) = self
            .registry
            .resolve(name, None)
            .ok_or_else(|| AgentError::GatewayNotFound(name.to_string()))?;
        let handle = gateway
            .endpoint(&local)
            .ok_or_else(|| AgentError::EndpointNotFound(name.to_string()))?;
        self.run_session(&gateway, &handle, f)
    }

    fn with_leg<R>(
        &self,
        leg: CallLegId,
        f: impl FnOnce(&mut EndpointSession<'_>, usize) -> AgentResult<R>,
    ) -> AgentResult<R> {
        let location = self
            .legs
            .get(&leg)
            .map(|entry| entry.value().clone())
            .ok_or(AgentError::LegNotFound(leg))?;
        self.run_session(&location.gateway, &location.endpoint, |session| {
            if session.ep.subs[location.sub].owner != Some(leg) {
                return Err(AgentError::LegNotFound(leg));
            }
            f(session, location.sub)
        })
    }

    /// Drop endpoints and gateways that left the configuration once idle
    pub(crate) fn reap(&self, gateway: &Arc<Gateway>) {
        for handle in gateway.prune_deleted() {
            gateway.outstanding.lock().remove_endpoint(&handle);
            info!("Removed endpoint {}", handle.full_name());
        }
        if gateway.is_marked_for_delete() && gateway.endpoint_count() == 0 {
            gateway.outstanding.lock().clear();
            let current = self.registry.get(gateway.name());
            if current.is_some_and(|g| Arc::ptr_eq(&g, gateway)) {
                self.registry.remove(gateway.name());
                info!("Removed gateway '{}'", gateway.name());
            }
        }
    }

    /// Create or update gateways and endpoints from configuration
    ///
    /// Returns the endpoints that did not exist before.
    async fn apply_config(
        &self,
        config: &AgentConfig,
        codecs: &CodecSet,
    ) -> Vec<(Arc<Gateway>, Arc<EndpointHandle>)> {
        let mut added = Vec::new();
        for gw_config in &config.gateways {
            let address = match resolve_gateway(gw_config).await {
                Ok(address) => address,
                Err(e) => {
                    warn!("Skipping gateway '{}': {}", gw_config.name, e);
                    continue;
                }
            };

            let gateway = match self.registry.get(&gw_config.name) {
                Some(existing) => {
                    existing.mark_delete(false);
                    if !existing.is_dynamic() {
                        existing.set_address(address);
                    }
                    existing
                }
                None => {
                    let gateway = Arc::new(Gateway::new(
                        &gw_config.name,
                        address,
                        gw_config.dynamic,
                        &gw_config.wildcard_endpoint,
                    ));
                    self.registry.insert(gateway.clone());
                    info!("Added gateway '{}' at {:?}", gw_config.name, address);
                    gateway
                }
            };

            for ep_config in &gw_config.endpoints {
                if let Some(handle) = gateway.endpoint(&ep_config.name) {
                    handle.lock().apply_config(ep_config.clone(), codecs.clone());
                    continue;
                }
                let handle = EndpointHandle::new(Endpoint::new(
                    gateway.name(),
                    ep_config.clone(),
                    codecs.clone(),
                ));
                debug!("Added endpoint {}", handle.full_name());
                gateway.add_endpoint(handle.clone());
                added.push((gateway.clone(), handle));
            }
        }
        added
    }

    fn poll_digit_timeouts(&self, now: Instant) {
        for gateway in self.registry.gateways() {
            for handle in gateway.endpoints() {
                if handle.lock().collector.is_none() {
                    continue;
                }
                self.run_session(&gateway, &handle, |session| session.poll_digit_timeout(now));
            }
        }
    }
}

async fn resolve_gateway(config: &GatewayConfig) -> AgentResult<Option<SocketAddr>> {
    if config.dynamic {
        return Ok(None);
    }
    let host = config
        .host
        .as_deref()
        .ok_or_else(|| AgentError::Config(format!("gateway '{}' has no host", config.name)))?;
    if let Ok(ip) = host.parse::<IpAddr>() {
        return Ok(Some(SocketAddr::new(ip, config.port)));
    }
    let mut addrs = lookup_host((host, config.port)).await?;
    addrs
        .find(SocketAddr::is_ipv4)
        .map(Some)
        .ok_or_else(|| AgentError::Config(format!("no IPv4 address for '{}'", host)))
}

/// MGCP call agent
pub struct CallAgent {
    core: Arc<AgentCore>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl CallAgent {
    /// Bind the configured UDP address and start serving gateways
    pub async fn start(
        config: AgentConfig,
        dialplan: Arc<dyn Dialplan>,
        media: Arc<dyn MediaController>,
    ) -> AgentResult<(Self, mpsc::UnboundedReceiver<CallEvent>)> {
        let (transport, mut transport_events) = UdpTransport::bind(config.general.bind_addr, None).await?;
        let (agent, events) =
            Self::with_transport(config, Arc::new(transport), dialplan, media).await?;

        let core = Arc::downgrade(&agent.core);
        let receiver = tokio::spawn(async move {
            while let Some(event) = transport_events.recv().await {
                match event {
                    TransportEvent::MessageReceived {
                        message,
                        raw,
                        source,
                    } => {
                        let Some(core) = core.upgrade() else {
                            break;
                        };
                        core.dispatch(&message, &raw, source);
                    }
                    TransportEvent::Error { error } => {
                        error!("Transport error: {}", error);
                    }
                    TransportEvent::Closed => {
                        info!("Transport closed");
                        break;
                    }
                }
            }
        });
        agent.tasks.lock().push(receiver);

        Ok((agent, events))
    }

    /// Build an agent over an existing transport
    ///
    /// Inbound datagrams must be fed through [`CallAgent::handle_datagram`].
    pub async fn with_transport(
        config: AgentConfig,
        transport: Arc<dyn Transport>,
        dialplan: Arc<dyn Dialplan>,
        media: Arc<dyn MediaController>,
    ) -> AgentResult<(Self, mpsc::UnboundedReceiver<CallEvent>)> {
        config.validate()?;
        let settings = Settings::from_config(&config.general)?;
        let codecs = settings.codecs.clone();
        let (events_tx, events_rx) = mpsc::unbounded_channel();

        let core = Arc::new_cyclic(|self_ref| AgentCore {
            registry: Registry::new(),
            legs: DashMap::new(),
            transport,
            dialplan,
            media,
            settings: RwLock::new(settings),
            events: events_tx,
            transaction_ids: TransactionIdGenerator::new_random(),
            trace: AtomicBool::new(config.general.trace),
            self_ref: self_ref.clone(),
        });

        let added = core.apply_config(&config, &codecs).await;
        info!(
            "MGCP call agent ready with {} gateways, {} endpoints",
            core.registry.len(),
            added.len()
        );

        let weak = Arc::downgrade(&core);
        let ticker = tokio::spawn(async move {
            let mut interval = tokio::time::interval(DIGIT_TICK);
            interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                interval.tick().await;
                let Some(core) = weak.upgrade() else {
                    break;
                };
                core.poll_digit_timeouts(Instant::now());
            }
        });

        for (gateway, handle) in &added {
            core.run_session(gateway, handle, |session| session.audit_endpoint());
        }

        Ok((
            Self {
                core,
                tasks: Mutex::new(vec![ticker]),
            },
            events_rx,
        ))
    }

    /// Feed one datagram received from `source`
    pub fn handle_datagram(&self, data: &[u8], source: SocketAddr) {
        self.core.handle_datagram(data, source);
    }

    /// Ring `endpoint` (`name@gateway`) for a call from `caller`
    pub fn request_call(&self, endpoint: &str, caller: CallerId) -> AgentResult<CallRequestOutcome> {
        self.core
            .with_endpoint(endpoint, |session| session.request_call(caller))
    }

    /// The far end answered; fails while the line is still dialing
    pub fn answer(&self, leg: CallLegId) -> AgentResult<()> {
        self.core.with_leg(leg, |session, sub| session.answer(sub))
    }

    /// Release a leg; the endpoint is told to stop and the connection deleted
    pub fn hangup(&self, leg: CallLegId) -> AgentResult<()> {
        self.core.with_leg(leg, |session, sub| {
            session.hangup_sub(sub);
            Ok(())
        })
    }

    pub fn send_digit(&self, leg: CallLegId, digit: char) -> AgentResult<()> {
        self.core
            .with_leg(leg, |session, sub| session.send_digit(sub, digit))
    }

    pub fn set_connection_mode(&self, leg: CallLegId, mode: ConnectionMode) -> AgentResult<()> {
        self.core.with_leg(leg, |session, sub| {
            session.set_connection_mode(sub, mode);
            Ok(())
        })
    }

    pub fn indicate(&self, leg: CallLegId, indication: Indication) -> AgentResult<()> {
        self.core.with_leg(leg, |session, _| {
            session.indicate(indication);
            Ok(())
        })
    }

    /// Send the gateway's media directly to `peer`
    pub fn redirect_media(&self, leg: CallLegId, peer: SocketAddr) -> AgentResult<()> {
        self.core.with_leg(leg, |session, sub| {
            session.redirect_media(sub, peer);
            Ok(())
        })
    }

    /// `name@gateway` of the endpoint a leg lives on
    pub fn leg_endpoint(&self, leg: CallLegId) -> Option<String> {
        self.core
            .legs
            .get(&leg)
            .map(|entry| entry.value().endpoint.full_name())
    }

    pub fn list_gateways(&self) -> Vec<GatewaySummary> {
        self.core
            .registry
            .gateways()
            .iter()
            .map(|gateway| gateway.summary())
            .collect()
    }

    /// Send an AUEP to one endpoint
    pub fn audit_endpoint(&self, endpoint: &str) -> AgentResult<()> {
        self.core.with_endpoint(endpoint, |session| {
            session.audit_endpoint();
            Ok(())
        })
    }

    /// Log every datagram in full under the `mgcp::trace` target
    pub fn set_trace(&self, enabled: bool) {
        self.core.trace.store(enabled, Ordering::Relaxed);
        info!("MGCP protocol trace {}", if enabled { "enabled" } else { "disabled" });
    }

    pub fn is_tracing(&self) -> bool {
        self.core.is_tracing()
    }

    /// Apply a new configuration
    ///
    /// Every gateway and endpoint is marked for deletion, then everything
    /// still configured is updated and unmarked. Marked endpoints are removed
    /// as soon as they are idle; new endpoints are audited.
    pub async fn reload(&self, config: AgentConfig) -> AgentResult<()> {
        config.validate()?;
        let settings = Settings::from_config(&config.general)?;
        let codecs = settings.codecs.clone();
        *self.core.settings.write() = settings;

        for gateway in self.core.registry.gateways() {
            gateway.mark_delete(true);
            for handle in gateway.endpoints() {
                handle.lock().delete = true;
            }
        }

        let added = self.core.apply_config(&config, &codecs).await;
        for gateway in self.core.registry.gateways() {
            self.core.reap(&gateway);
        }
        for (gateway, handle) in &added {
            self.core
                .run_session(gateway, handle, |session| session.audit_endpoint());
        }

        info!(
            "MGCP configuration reloaded: {} gateways, {} new endpoints",
            self.core.registry.len(),
            added.len()
        );
        Ok(())
    }

    /// Run one retransmission pass over every gateway
    pub fn retransmit_due(&self, now: Instant) {
        for gateway in self.core.registry.gateways() {
            self.core.retransmit_pass(&gateway, now);
        }
    }

    /// Check every digit-collection deadline
    pub fn poll_digit_timeouts(&self, now: Instant) {
        self.core.poll_digit_timeouts(now);
    }

    pub fn local_addr(&self) -> AgentResult<SocketAddr> {
        Ok(self.core.transport.local_addr()?)
    }

    /// Stop background tasks and close the transport
    pub fn shutdown(&self) {
        for task in self.tasks.lock().drain(..) {
            task.abort();
        }
        for gateway in self.core.registry.gateways() {
            gateway.outstanding.lock().cancel_timer();
        }
        self.core.transport.close();
        info!("MGCP call agent stopped");
    }
}

impl Drop for CallAgent {
    fn drop(&mut self) {
        for task in self.tasks.get_mut().drain(..) {
            task.abort();
        }
    }
}
