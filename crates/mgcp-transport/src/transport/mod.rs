pub mod udp;

use std::fmt;
use std::net::SocketAddr;

use bytes::Bytes;
use mgcp_core::MgcpMessage;

use crate::error::Result;

/// Sends datagrams on behalf of the call agent
///
/// Sending never awaits: the call agent transmits while holding endpoint
/// state, so implementations must hand the bytes to the socket immediately
/// and report failure instead of blocking.
pub trait Transport: Send + Sync + fmt::Debug {
    /// Address the transport is bound to
    fn local_addr(&self) -> Result<SocketAddr>;

    /// Send one datagram
    fn send_datagram(&self, data: &[u8], destination: SocketAddr) -> Result<()>;

    /// Stop receiving and refuse further sends
    fn close(&self);

    fn is_closed(&self) -> bool;
}

/// Events delivered by a transport's receive loop
#[derive(Debug, Clone)]
pub enum TransportEvent {
    /// A datagram arrived and was parsed
    MessageReceived {
        message: MgcpMessage,
        /// The bytes as received, for protocol tracing
        raw: Bytes,
        source: SocketAddr,
    },

    /// The socket reported an error
    Error { error: String },

    /// The receive loop has stopped
    Closed,
}
