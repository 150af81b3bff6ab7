//! Per-line state: an endpoint and its two subchannels

use std::net::SocketAddr;

use serde::{Deserialize, Serialize};

use mgcp_core::{CodecSet, ConnectionMode, NegotiatedMedia};

use crate::command::{CommandQueue, QueueSelector};
use crate::config::EndpointConfig;
use crate::interface::{CallLegId, CallerId};
use crate::state::digits::DigitCollector;

/// Number of subchannels on every endpoint
pub const SUBCHANNELS: usize = 2;

/// Longest digit string kept for one dialing attempt
pub const MAX_EXTENSION_LEN: usize = 79;

/// Physical hookstate of a line
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum HookState {
    OnHook,
    OffHook,
}

/// Progress of the call leg owning a subchannel
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum LegState {
    /// Created, nothing dialed yet
    Down,
    /// Dialing finished, dialplan running
    Ring,
    /// The line is being rung
    Ringing,
    Up,
}

pub(crate) fn random_hex8() -> String {
    format!("{:08x}", rand::random::<u32>())
}

/// One simultaneous call leg on an endpoint
#[derive(Debug, Clone)]
pub struct Subchannel {
    pub id: usize,
    /// Connection id assigned by the gateway, empty until CRCX succeeds
    pub cxident: String,
    /// Call id sent in `C:`, empty while idle
    pub callid: String,
    /// Random token sent in `X:` on connection commands
    pub txident: String,
    pub mode: ConnectionMode,
    pub owner: Option<CallLegId>,
    pub leg_state: LegState,
    /// The call was placed to this line by the core
    pub outgoing: bool,
    /// The line already hung up; the core only needs to clean up
    pub alreadygone: bool,
    /// Media address to advertise once the connection id is known
    pub tmpdest: Option<SocketAddr>,
    /// An MDCX was requested before the connection id was known
    pub pending_modify: bool,
    /// Local RTP address while media is allocated
    pub media: Option<SocketAddr>,
    /// Gateway's RTP address after negotiation
    pub remote_media: Option<SocketAddr>,
    pub negotiated: Option<NegotiatedMedia>,
    /// Calling party presented on this leg
    pub caller: Option<CallerId>,
    pub cx_queue: CommandQueue,
}

impl Subchannel {
    pub fn new(id: usize) -> Self {
        Self {
            id,
            cxident: String::new(),
            callid: String::new(),
            txident: random_hex8(),
            mode: ConnectionMode::Inactive,
            owner: None,
            leg_state: LegState::Down,
            outgoing: false,
            alreadygone: false,
            tmpdest: None,
            pending_modify: false,
            media: None,
            remote_media: None,
            negotiated: None,
            caller: None,
            cx_queue: CommandQueue::default(),
        }
    }

    pub fn has_media(&self) -> bool {
        self.media.is_some()
    }

    /// Forget everything about the finished call; queued commands stay
    pub(crate) fn reset_call(&mut self) {
        self.alreadygone = false;
        self.outgoing = false;
        self.mode = ConnectionMode::Inactive;
        self.callid.clear();
        self.tmpdest = None;
        self.pending_modify = false;
        self.leg_state = LegState::Down;
        self.caller = None;
        self.remote_media = None;
        self.negotiated = None;
    }
}

/// One line or trunk on a gateway
#[derive(Debug)]
pub struct Endpoint {
    pub name: String,
    pub gateway: String,
    pub config: EndpointConfig,
    pub hookstate: HookState,
    /// Codecs currently acceptable, narrowed by negotiation
    pub capability: CodecSet,
    /// Configured capability restored when the line goes idle
    pub configured_codecs: CodecSet,
    pub subs: [Subchannel; SUBCHANNELS],
    /// Index of the subchannel currently in charge
    pub master: usize,
    pub rqnt_queue: CommandQueue,
    pub cmd_queue: CommandQueue,
    /// `X:` value of notification requests
    pub rqnt_ident: String,
    /// Signal requested by the last notification request
    pub curtone: String,
    pub dtmf_buf: String,
    pub collector: Option<DigitCollector>,
    /// Call waiting enabled right now (`*70` turns it off for one call)
    pub callwaiting: bool,
    pub hidecallerid: bool,
    pub dnd: bool,
    pub call_forward: String,
    pub lastcallerid: String,
    /// Removed from configuration; dropped once idle
    pub delete: bool,
}

impl Endpoint {
    pub fn new(gateway: &str, config: EndpointConfig, codecs: CodecSet) -> Self {
        Self {
            name: config.name.clone(),
            gateway: gateway.to_string(),
            hookstate: HookState::OnHook,
            capability: codecs.clone(),
            configured_codecs: codecs,
            subs: [Subchannel::new(0), Subchannel::new(1)],
            master: 0,
            rqnt_queue: CommandQueue::default(),
            cmd_queue: CommandQueue::default(),
            rqnt_ident: random_hex8(),
            curtone: String::new(),
            dtmf_buf: String::new(),
            collector: None,
            callwaiting: config.callwaiting,
            hidecallerid: false,
            dnd: false,
            call_forward: String::new(),
            lastcallerid: String::new(),
            delete: false,
            config,
        }
    }

    /// `name@gateway`
    pub fn full_name(&self) -> String {
        format!("{}@{}", self.name, self.gateway)
    }

    pub fn sibling(index: usize) -> usize {
        (index + 1) % SUBCHANNELS
    }

    /// No subchannel is owned by a call leg
    pub fn is_idle(&self) -> bool {
        self.subs.iter().all(|s| s.owner.is_none())
    }

    /// Buffer a dialed digit; digits past the longest extension are dropped
    pub fn push_digit(&mut self, digit: char) -> bool {
        if self.dtmf_buf.len() >= MAX_EXTENSION_LEN {
            return false;
        }
        self.dtmf_buf.push(digit);
        true
    }

    /// Subchannel owned by `leg`
    pub fn find_leg(&self, leg: CallLegId) -> Option<usize> {
        self.subs.iter().position(|s| s.owner == Some(leg))
    }

    pub fn queue_mut(&mut self, selector: QueueSelector) -> &mut CommandQueue {
        match selector {
            QueueSelector::Notification => &mut self.rqnt_queue,
            QueueSelector::Command => &mut self.cmd_queue,
            QueueSelector::Connection(index) => &mut self.subs[index].cx_queue,
        }
    }

    /// Drop every queued command, in flight or not
    pub fn clear_queues(&mut self) {
        self.rqnt_queue.clear();
        self.cmd_queue.clear();
        for sub in &mut self.subs {
            sub.cx_queue.clear();
        }
    }

    /// Apply options from a reloaded configuration
    pub fn apply_config(&mut self, config: EndpointConfig, codecs: CodecSet) {
        if config.callwaiting != self.config.callwaiting {
            self.callwaiting = config.callwaiting;
        }
        if self.is_idle() {
            self.capability = codecs.clone();
        }
        self.configured_codecs = codecs;
        self.config = config;
        self.delete = false;
    }

    /// Own caller id as presented to the dialplan
    pub fn caller_id(&self) -> CallerId {
        if self.hidecallerid {
            CallerId {
                hidden: true,
                ..CallerId::default()
            }
        } else {
            CallerId::new(self.config.cid_num.clone(), self.config.cid_name.clone())
        }
    }
}
