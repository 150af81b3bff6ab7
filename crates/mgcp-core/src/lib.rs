//! MGCP protocol core for the call agent
//!
//! This crate holds the parts of the Media Gateway Control Protocol (RFC 2705)
//! that need no I/O: the text message codec, the wire-level types, and the
//! SDP negotiator used when connections are created or modified.
//!
//! ## Overview
//!
//! - [`message`]: parsing of inbound datagrams into [`MgcpMessage`]
//! - [`builder`]: bounded serialization of outbound requests and responses
//! - [`types`]: verbs, response codes, transaction identifiers, connection modes
//! - [`sdp`]: codec tables, remote media ingest and local SDP generation
//!
//! ## Example
//!
//! ```rust
//! use mgcp_core::{MgcpMessage, RequestBuilder, TransactionId, Verb};
//!
//! let bytes = RequestBuilder::new(Verb::Rqnt, TransactionId::new(1001), "aaln/1", "gw1.example.net")
//!     .header("X", "0123abcd")
//!     .header("R", "L/hd(N)")
//!     .build()
//!     .unwrap();
//!
//! let parsed = MgcpMessage::parse(&bytes);
//! assert_eq!(parsed.verb, "RQNT");
//! assert_eq!(parsed.header("r"), "L/hd(N)");
//! ```

pub mod builder;
pub mod error;
pub mod message;
pub mod sdp;
pub mod types;

pub use builder::{RequestBuilder, ResponseBuilder};
pub use error::{Error, Result, SdpError};
pub use message::{Header, MessageKind, MgcpMessage, MAX_HEADERS, MAX_LINES, MAX_PACKET};
pub use sdp::{Codec, CodecSet, MediaHost, NegotiatedMedia, RemoteMedia};
pub use types::{
    ConnectionMode, ResponseClass, ResponseCode, TransactionId, TransactionIdGenerator, Verb,
};

/// Default UDP port a media gateway listens on
pub const DEFAULT_GATEWAY_PORT: u16 = 2427;

/// Default UDP port the call agent listens on
pub const DEFAULT_CALL_AGENT_PORT: u16 = 2727;

/// Protocol version carried on every request line
pub const PROTOCOL_VERSION: &str = "MGCP 1.0";
