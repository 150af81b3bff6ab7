//! Wire-level MGCP types
//!
//! - [`Verb`]: the command verbs a call agent sends or receives
//! - [`ResponseCode`]: three digit return codes and their classes
//! - [`TransactionId`]: request/response correlation numbers
//! - [`ConnectionMode`]: media directionality carried in the `M:` header

pub mod connection_mode;
pub mod status;
pub mod transaction_id;
pub mod verb;

pub use connection_mode::ConnectionMode;
pub use status::{ResponseClass, ResponseCode};
pub use transaction_id::{TransactionId, TransactionIdGenerator, MAX_TRANSACTION_ID};
pub use verb::Verb;
