//! SDP negotiation for gateway connections
//!
//! - [`codec`]: codec table and ordered codec sets
//! - [`negotiate`]: remote media ingest, intersection, and local SDP bodies

pub mod codec;
pub mod negotiate;

pub use codec::{Codec, CodecSet, TELEPHONE_EVENT_MIME, TELEPHONE_EVENT_PAYLOAD};
pub use negotiate::{build_sdp, negotiate, MediaHost, NegotiatedMedia, RemoteMedia};
