//! Error types for mgcp-core

use thiserror::Error;

/// Result type for mgcp-core operations
pub type Result<T> = std::result::Result<T, Error>;

/// Errors raised while building MGCP messages or negotiating media
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum Error {
    /// The header table of an outbound message is full
    #[error("too many headers (limit {0})")]
    TooManyHeaders(usize),

    /// The SDP line table of an outbound message is full
    #[error("too many SDP lines (limit {0})")]
    TooManyLines(usize),

    /// The encoded message would not fit in one datagram
    #[error("message does not fit in {limit} bytes (needed {needed})")]
    PacketTooLarge { needed: usize, limit: usize },

    /// A verb outside the recognized command set
    #[error("unknown verb: {0}")]
    UnknownVerb(String),

    /// A connection mode outside the recognized set
    #[error("unknown connection mode: {0}")]
    UnknownConnectionMode(String),

    /// A codec name with no entry in the codec table
    #[error("unknown codec: {0}")]
    UnknownCodec(String),

    /// Not a valid transaction identifier
    #[error("invalid transaction identifier: {0}")]
    InvalidTransactionId(String),

    /// SDP processing failed
    #[error("SDP error: {0}")]
    Sdp(#[from] SdpError),
}

/// Failures while ingesting a remote session description
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SdpError {
    /// No `m=` line in the body
    #[error("missing media line")]
    MissingMedia,

    /// No `c=` line in the body
    #[error("missing connection line")]
    MissingConnection,

    /// The `c=` line is not `IN IP4 <host>`
    #[error("invalid connection line: '{0}'")]
    InvalidConnection(String),

    /// The `m=` line is not `audio <port> RTP/AVP <payloads>`
    #[error("malformed media stream descriptor: '{0}'")]
    MalformedMedia(String),

    /// Nothing in common between the local and remote codec lists
    #[error("no compatible codecs")]
    NoCompatibleCodecs,
}
