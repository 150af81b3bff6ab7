//! Shared fixtures for the call agent integration tests
//!
//! The agent runs over a capturing transport; tests play the gateway by
//! feeding datagrams through `CallAgent::handle_datagram` and inspecting what
//! the agent sent.

#![allow(dead_code)]

use std::collections::HashSet;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicU16, AtomicUsize, Ordering};
use std::sync::Arc;

use bytes::Bytes;
use parking_lot::Mutex;
use tokio::sync::mpsc::UnboundedReceiver;
use tokio::time::Instant;

use mgcp_call_agent::{
    AgentConfig, AgentResult, CallAgent, CallEvent, CallLegId, Dialplan, EndpointConfig,
    GatewayConfig, MediaController, NegotiatedMedia,
};
use mgcp_core::{MessageKind, MgcpMessage};
use mgcp_transport::Transport;

pub const GATEWAY: &str = "gw1";
pub const LINE: &str = "aaln/1@gw1";

pub fn gateway_addr() -> SocketAddr {
    "10.0.0.5:2427".parse().unwrap()
}

/// One datagram handed to the transport
#[derive(Debug, Clone)]
pub struct Sent {
    pub at: Instant,
    pub data: Bytes,
    pub destination: SocketAddr,
}

impl Sent {
    pub fn message(&self) -> MgcpMessage {
        MgcpMessage::parse(&self.data)
    }
}

/// Transport that records instead of sending
#[derive(Debug)]
pub struct CaptureTransport {
    local: SocketAddr,
    sent: Mutex<Vec<Sent>>,
    closed: AtomicBool,
}

impl CaptureTransport {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            local: "127.0.0.1:2727".parse().unwrap(),
            sent: Mutex::new(Vec::new()),
            closed: AtomicBool::new(false),
        })
    }

    pub fn sent(&self) -> Vec<Sent> {
        self.sent.lock().clone()
    }
}

impl Transport for CaptureTransport {
    fn local_addr(&self) -> mgcp_transport::Result<SocketAddr> {
        Ok(self.local)
    }

    fn send_datagram(&self, data: &[u8], destination: SocketAddr) -> mgcp_transport::Result<()> {
        self.sent.lock().push(Sent {
            at: Instant::now(),
            data: Bytes::copy_from_slice(data),
            destination,
        });
        Ok(())
    }

    fn close(&self) {
        self.closed.store(true, Ordering::Relaxed);
    }

    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Relaxed)
    }
}

/// Dialplan over a fixed list of extensions
pub struct ScriptedDialplan {
    extensions: Vec<String>,
    voicemail: Mutex<HashSet<String>>,
}

impl ScriptedDialplan {
    pub fn new(extensions: &[&str]) -> Arc<Self> {
        Arc::new(Self {
            extensions: extensions.iter().map(|e| e.to_string()).collect(),
            voicemail: Mutex::new(HashSet::new()),
        })
    }

    pub fn set_voicemail(&self, mailbox: &str) {
        self.voicemail.lock().insert(mailbox.to_string());
    }
}

impl Dialplan for ScriptedDialplan {
    fn exists(&self, _context: &str, exten: &str, _caller: &str) -> bool {
        self.extensions.iter().any(|e| e == exten)
    }

    fn can_match(&self, _context: &str, exten: &str, _caller: &str) -> bool {
        self.extensions.iter().any(|e| e.starts_with(exten))
    }

    fn match_more(&self, _context: &str, exten: &str, _caller: &str) -> bool {
        self.extensions
            .iter()
            .any(|e| e.len() > exten.len() && e.starts_with(exten))
    }

    fn has_voicemail(&self, mailbox: &str) -> bool {
        self.voicemail.lock().contains(mailbox)
    }
}

/// Media controller that records what the agent asked for
#[derive(Default)]
pub struct RecordingMedia {
    next_port: AtomicU16,
    pub started: Mutex<Vec<(CallLegId, SocketAddr, NegotiatedMedia)>>,
    pub released: Mutex<Vec<CallLegId>>,
    pub dtmf: Mutex<Vec<(CallLegId, char)>>,
}

impl RecordingMedia {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            next_port: AtomicU16::new(20000),
            ..Default::default()
        })
    }
}

impl MediaController for RecordingMedia {
    fn allocate(&self, _leg: CallLegId) -> AgentResult<SocketAddr> {
        let port = self.next_port.fetch_add(2, Ordering::Relaxed);
        Ok(SocketAddr::from(([10, 0, 0, 1], port)))
    }

    fn start(&self, leg: CallLegId, remote: SocketAddr, media: &NegotiatedMedia) -> AgentResult<()> {
        self.started.lock().push((leg, remote, media.clone()));
        Ok(())
    }

    fn release(&self, leg: CallLegId) {
        self.released.lock().push(leg);
    }

    fn send_dtmf(&self, leg: CallLegId, digit: char) -> AgentResult<()> {
        self.dtmf.lock().push((leg, digit));
        Ok(())
    }
}

pub fn line_config() -> EndpointConfig {
    EndpointConfig::new("aaln/1")
        .with_context("local")
        .with_caller_id("5551000", "Alice")
        .with_calling_features()
}

/// One gateway at 10.0.0.5 carrying `line`
pub fn config_with_line(line: EndpointConfig) -> AgentConfig {
    AgentConfig::default()
        .with_gateway(GatewayConfig::new(GATEWAY, "10.0.0.5").with_endpoint(line))
}

pub fn default_config() -> AgentConfig {
    config_with_line(line_config())
}

/// The agent plus the gateway side of the conversation
pub struct Harness {
    pub agent: CallAgent,
    pub events: UnboundedReceiver<CallEvent>,
    pub transport: Arc<CaptureTransport>,
    pub dialplan: Arc<ScriptedDialplan>,
    pub media: Arc<RecordingMedia>,
    /// Index of the first datagram not yet returned by `take_sent`
    cursor: usize,
    next_txid: u32,
    connections: AtomicUsize,
}

impl Harness {
    /// Start an agent over `config` and answer its startup audits
    pub async fn with_config(config: AgentConfig) -> Self {
        let transport = CaptureTransport::new();
        let dialplan = ScriptedDialplan::new(&["100", "101", "2000"]);
        let media = RecordingMedia::new();
        let (agent, events) = CallAgent::with_transport(
            config,
            transport.clone(),
            dialplan.clone(),
            media.clone(),
        )
        .await
        .unwrap();

        let mut harness = Self {
            agent,
            events,
            transport,
            dialplan,
            media,
            cursor: 0,
            next_txid: 1000,
            connections: AtomicUsize::new(0),
        };
        harness.answer_all();
        harness.drain_events();
        harness
    }

    pub async fn new() -> Self {
        Self::with_config(default_config()).await
    }

    /// Datagrams sent since the last call
    pub fn take_sent(&mut self) -> Vec<MgcpMessage> {
        let sent = self.transport.sent();
        let fresh = sent[self.cursor..].iter().map(Sent::message).collect();
        self.cursor = sent.len();
        fresh
    }

    /// Deliver raw text from the gateway
    pub fn from_gateway(&self, text: &str) {
        self.agent.handle_datagram(text.as_bytes(), gateway_addr());
    }

    /// Send a NTFY with the given observed events; returns its transaction id
    pub fn notify(&mut self, observed: &str) -> u32 {
        self.next_txid += 1;
        let txid = self.next_txid;
        self.from_gateway(&format!(
            "NTFY {} {} MGCP 1.0\r\nX: 1\r\nO: {}\r\n",
            txid, LINE, observed
        ));
        txid
    }

    /// Final response for `request`
    ///
    /// A successful CRCX carries a connection id and an SDP answer offering
    /// PCMU from the gateway.
    pub fn respond(&self, request: &MgcpMessage, code: u16) {
        let mut text = format!("{} {} OK\r\n", code, request.identifier);
        if request.verb == "CRCX" && code == 200 {
            let id = self.connections.fetch_add(1, Ordering::Relaxed) + 1;
            text.push_str(&format!(
                "I: CX{}\r\n\r\nv=0\r\nc=IN IP4 10.0.0.5\r\nm=audio 4000 RTP/AVP 0\r\n",
                id
            ));
        }
        self.from_gateway(&text);
    }

    /// Answer every request sent so far with 200, including those posted as a
    /// result, until nothing is left; returns the requests answered
    pub fn answer_all(&mut self) -> Vec<MgcpMessage> {
        let mut answered = Vec::new();
        loop {
            let requests: Vec<MgcpMessage> = self
                .take_sent()
                .into_iter()
                .filter(is_request)
                .collect();
            if requests.is_empty() {
                return answered;
            }
            for request in requests {
                self.respond(&request, 200);
                answered.push(request);
            }
        }
    }

    pub fn drain_events(&mut self) -> Vec<CallEvent> {
        let mut events = Vec::new();
        while let Ok(event) = self.events.try_recv() {
            events.push(event);
        }
        events
    }

    /// Take the line off hook and answer everything; returns the new leg
    pub fn go_off_hook(&mut self) -> CallLegId {
        self.notify("L/hd");
        self.answer_all();
        let events = self.drain_events();
        match events.first() {
            Some(CallEvent::NewChannel { leg, .. }) => *leg,
            other => panic!("expected NewChannel, got {:?}", other),
        }
    }
}

pub fn is_request(message: &MgcpMessage) -> bool {
    message.kind() == MessageKind::Request
}

pub fn verbs(messages: &[MgcpMessage]) -> Vec<String> {
    messages.iter().map(|m| m.verb.clone()).collect()
}

pub fn requests_with_verb<'a>(messages: &'a [MgcpMessage], verb: &str) -> Vec<&'a MgcpMessage> {
    messages.iter().filter(|m| m.verb == verb).collect()
}

/// Responses (code lines) among `messages`
pub fn responses(messages: &[MgcpMessage]) -> Vec<&MgcpMessage> {
    messages.iter().filter(|m| !is_request(m)).collect()
}
