//! MGCP call agent
//!
//! Controls residential and trunking media gateways over MGCP (RFC 2705,
//! optionally with the NCS profile). The agent keeps a registry of configured
//! gateways and their endpoints, sends reliable commands with retransmission,
//! sequences commands per endpoint, and runs the line state machine that turns
//! gateway notifications into call events for a call-processing core.
//!
//! # Architecture
//!
//! - [`registry`]: gateways, endpoints and their two subchannels
//! - [`transaction`]: outstanding requests and cached responses per gateway
//! - [`command`]: per-endpoint command serialization
//! - [`state`]: the endpoint call state machine
//! - [`agent`]: the [`CallAgent`] facade and its background tasks
//!
//! The wire format and SDP handling live in `mgcp-core`, the socket in
//! `mgcp-transport`.

pub mod agent;
pub mod command;
pub mod config;
mod dispatcher;
pub mod errors;
pub mod interface;
pub mod logging;
pub mod registry;
pub(crate) mod state;
pub mod transaction;

pub use agent::{CallAgent, DIGIT_TICK};
pub use config::{AgentConfig, DigitTimeouts, DtmfMode, EndpointConfig, GatewayConfig, GeneralConfig};
pub use errors::{AgentError, AgentResult};
pub use interface::{
    CallEvent, CallLegId, CallRequestOutcome, CallerId, Dialplan, HangupCause, Indication,
    MediaController,
};
pub use logging::{log_welcome, parse_log_level, setup_logging, LoggingConfig, TRACE_TARGET};
pub use registry::{EndpointSummary, GatewaySummary, HookState, LegState, SubchannelSummary};

pub use mgcp_core::{ConnectionMode, NegotiatedMedia};
