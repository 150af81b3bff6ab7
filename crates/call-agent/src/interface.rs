//! Boundary between the call agent and the call-processing core
//!
//! The core drives the agent through [`crate::CallAgent`] methods (answer,
//! hangup, digits, mode changes, new calls) and receives [`CallEvent`]s on an
//! unbounded channel. Two synchronous collaborators are injected at
//! construction: a [`Dialplan`] answering extension queries during digit
//! collection, and a [`MediaController`] that owns RTP sessions.

use std::fmt;
use std::net::SocketAddr;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use mgcp_core::NegotiatedMedia;

use crate::errors::AgentResult;
use crate::registry::LegState;

/// Identifies one call leg owned by the core
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CallLegId(pub Uuid);

impl CallLegId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for CallLegId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for CallLegId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Calling party presented to an endpoint
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CallerId {
    pub number: String,
    pub name: String,
    /// Presentation restricted
    pub hidden: bool,
}

impl CallerId {
    pub fn new(number: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            number: number.into(),
            name: name.into(),
            hidden: false,
        }
    }
}

/// Why the agent asks the core to drop a leg
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum HangupCause {
    /// The endpoint went on hook
    OnHook,
    /// The gateway rejected a command
    GatewayFailure(u16),
    /// A command went unanswered
    Timeout,
    /// No codec in common with the gateway
    NoCompatibleCodecs,
    /// The media layer could not set up RTP
    MediaUnavailable,
    /// The gateway restarted
    Restart,
    /// The leg was handed over by a transfer
    Transferred,
}

/// Notifications from the call agent to the core
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CallEvent {
    /// The agent created a leg for a line that went off hook
    NewChannel {
        leg: CallLegId,
        endpoint: String,
        context: String,
        state: LegState,
        caller: CallerId,
    },
    /// Start dialplan execution for a locally originated leg
    StartPbx {
        leg: CallLegId,
        context: String,
        exten: String,
        caller: CallerId,
    },
    /// Remote party is being alerted
    Ringing { leg: CallLegId },
    /// An incoming call was answered at the endpoint
    Answer { leg: CallLegId },
    /// Please hang this leg up; the core answers by calling `hangup`
    Hangup { leg: CallLegId, cause: HangupCause },
    /// The agent already released this leg itself
    ChannelGone { leg: CallLegId },
    Dtmf { leg: CallLegId, digit: char },
    Hold { leg: CallLegId },
    Unhold { leg: CallLegId },
    /// Join the far ends of two legs before they are hung up
    Transfer { from: CallLegId, to: CallLegId },
}

impl CallEvent {
    /// The leg the event is about
    pub fn leg(&self) -> CallLegId {
        match self {
            CallEvent::NewChannel { leg, .. }
            | CallEvent::StartPbx { leg, .. }
            | CallEvent::Ringing { leg }
            | CallEvent::Answer { leg }
            | CallEvent::Hangup { leg, .. }
            | CallEvent::ChannelGone { leg }
            | CallEvent::Dtmf { leg, .. }
            | CallEvent::Hold { leg }
            | CallEvent::Unhold { leg } => *leg,
            CallEvent::Transfer { from, .. } => *from,
        }
    }
}

/// Call progress indications the core can ask an endpoint to play
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Indication {
    Ringing,
    Busy,
    Congestion,
    Hold,
    Unhold,
    /// Stop any tone being played
    Stop,
}

/// Outcome of asking the agent to ring an endpoint
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CallRequestOutcome {
    /// The endpoint is being rung on this leg
    Placed(CallLegId),
    /// The line forwards its calls; dial this target instead
    Forwarded(String),
}

/// Extension queries used while a line collects digits
pub trait Dialplan: Send + Sync {
    /// `exten` is a complete extension in `context`
    fn exists(&self, context: &str, exten: &str, caller: &str) -> bool;

    /// `exten` is a prefix of at least one extension
    fn can_match(&self, context: &str, exten: &str, caller: &str) -> bool;

    /// Some extension is strictly longer than `exten` and starts with it
    fn match_more(&self, context: &str, exten: &str, caller: &str) -> bool;

    /// The mailbox holds new messages
    fn has_voicemail(&self, _mailbox: &str) -> bool {
        false
    }
}

/// RTP sessions for call legs
pub trait MediaController: Send + Sync {
    /// Reserve a local RTP session and return its address
    fn allocate(&self, leg: CallLegId) -> AgentResult<SocketAddr>;

    /// Start sending to the gateway's media address with the agreed codecs
    fn start(&self, leg: CallLegId, remote: SocketAddr, media: &NegotiatedMedia) -> AgentResult<()>;

    /// Tear down the leg's RTP session
    fn release(&self, leg: CallLegId);

    /// Send an RFC 2833 digit on the leg's stream
    fn send_dtmf(&self, leg: CallLegId, digit: char) -> AgentResult<()>;
}
