//! Transaction layer: retransmission of unacknowledged requests and the
//! cache of sent responses
//!
//! Transaction identifiers come from [`mgcp_core::TransactionIdGenerator`],
//! one generator per call agent.

pub mod response_cache;
pub mod retransmit;

pub use response_cache::{ResponseCache, RESPONSE_TIMEOUT};
pub use retransmit::{
    OutstandingMessage, OutstandingQueue, RetransmitPass, MAX_RETRANS, RETRANSMIT_INTERVAL,
};
