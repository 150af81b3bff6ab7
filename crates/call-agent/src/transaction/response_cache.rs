//! Recently sent responses, kept so retransmitted requests are answered
//! without running their side effects twice

use std::collections::VecDeque;
use std::time::Duration;

use bytes::Bytes;
use tokio::time::Instant;

use mgcp_core::TransactionId;

/// How long a sent response stays answerable
pub const RESPONSE_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, Clone)]
struct CachedResponse {
    transaction_id: TransactionId,
    data: Bytes,
    sent_at: Instant,
}

/// Per-gateway cache of sent responses
#[derive(Debug, Default)]
pub struct ResponseCache {
    entries: VecDeque<CachedResponse>,
}

impl ResponseCache {
    pub fn insert(&mut self, transaction_id: TransactionId, data: Bytes, now: Instant) {
        self.entries.push_back(CachedResponse {
            transaction_id,
            data,
            sent_at: now,
        });
    }

    /// Cached response for a request, pruning stale entries on the way
    pub fn lookup(&mut self, transaction_id: TransactionId, now: Instant) -> Option<Bytes> {
        self.entries
            .retain(|e| now.saturating_duration_since(e.sent_at) <= RESPONSE_TIMEOUT);
        self.entries
            .iter()
            .rev()
            .find(|e| e.transaction_id == transaction_id)
            .map(|e| e.data.clone())
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
