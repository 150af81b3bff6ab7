use std::io;
use std::net::SocketAddr;

use thiserror::Error;

/// Result type for transport operations
pub type Result<T> = std::result::Result<T, Error>;

/// Errors raised by the datagram transport
#[derive(Error, Debug)]
pub enum Error {
    /// Socket level failure
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// The transport has been closed
    #[error("transport closed")]
    TransportClosed,

    /// Could not bind the listening socket
    #[error("failed to bind {addr}: {source}")]
    BindFailed {
        addr: SocketAddr,
        #[source]
        source: io::Error,
    },
}

impl Error {
    /// True if the error came from a transport that was closed on purpose
    pub fn is_closed(&self) -> bool {
        matches!(self, Error::TransportClosed)
    }
}
