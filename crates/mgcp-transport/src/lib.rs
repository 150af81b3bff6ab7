//! UDP transport for the MGCP call agent
//!
//! Owns the call agent's socket. Inbound datagrams are parsed with
//! [`mgcp_core::MgcpMessage::parse`] and delivered as [`TransportEvent`]s on a
//! bounded channel; outbound datagrams are written without awaiting so they can
//! be sent from inside synchronous state transitions.

pub mod error;
pub mod transport;

#[cfg(test)]
mod tests;

pub use error::{Error, Result};
pub use transport::udp::UdpTransport;
pub use transport::{Transport, TransportEvent};

/// Bind a UDP transport to the specified address
pub async fn bind_udp(
    addr: std::net::SocketAddr,
) -> Result<(UdpTransport, tokio::sync::mpsc::Receiver<TransportEvent>)> {
    UdpTransport::bind(addr, None).await
}
