//! Transaction identifiers
//!
//! RFC 2705 transaction identifiers are integers between 1 and 999 999 999.
//! The generator hands out consecutive values from a random starting point
//! and wraps back to 1 instead of reaching one billion.

use std::fmt;
use std::str::FromStr;
use std::sync::atomic::{AtomicU32, Ordering};

use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::error::Error;

/// Largest transaction identifier ever issued
pub const MAX_TRANSACTION_ID: u32 = 999_999_999;

/// Correlates a request with its response
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TransactionId(u32);

impl TransactionId {
    pub const fn new(value: u32) -> Self {
        TransactionId(value)
    }

    pub fn value(&self) -> u32 {
        self.0
    }
}

impl fmt::Display for TransactionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for TransactionId {
    type Err = Error;

    /// Accepts pure decimal digits only
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.is_empty() || !s.bytes().all(|b| b.is_ascii_digit()) {
            return Err(Error::InvalidTransactionId(s.to_string()));
        }
        s.parse::<u32>()
            .map(TransactionId)
            .map_err(|_| Error::InvalidTransactionId(s.to_string()))
    }
}

/// Process-wide source of outbound transaction identifiers
#[derive(Debug)]
pub struct TransactionIdGenerator {
    last: AtomicU32,
}

impl TransactionIdGenerator {
    /// Start from a random point in the identifier space
    pub fn new_random() -> Self {
        let start = rand::thread_rng().gen_range(1..=MAX_TRANSACTION_ID);
        Self::starting_after(start)
    }

    /// The first call to [`next_id`](Self::next_id) returns `last + 1`
    pub fn starting_after(last: u32) -> Self {
        Self {
            last: AtomicU32::new(last.min(MAX_TRANSACTION_ID)),
        }
    }

    pub fn next_id(&self) -> TransactionId {
        let previous = self
            .last
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |v| Some(Self::advance(v)))
            .unwrap_or_else(|v| v);
        TransactionId(Self::advance(previous))
    }

    fn advance(v: u32) -> u32 {
        if v >= MAX_TRANSACTION_ID {
            1
        } else {
            v + 1
        }
    }
}

impl Default for TransactionIdGenerator {
    fn default() -> Self {
        Self::new_random()
    }
}
