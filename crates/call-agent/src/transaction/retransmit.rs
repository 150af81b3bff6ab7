//! Per-gateway outstanding-message queue
//!
//! Every tracked request sent to a gateway is kept here until its response
//! arrives. One ticker task per gateway runs at [`RETRANSMIT_INTERVAL`] while
//! the queue holds anything: each due message is resent until it has been
//! retried [`MAX_RETRANS`] times, after which it is handed back as expired so
//! the caller can synthesize a 406 timeout. The ticker is cancelled as soon as
//! the queue drains.

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use tokio::task::JoinHandle;
use tokio::time::Instant;

use mgcp_core::TransactionId;

use crate::registry::EndpointHandle;

/// Retransmission timer period
pub const RETRANSMIT_INTERVAL: Duration = Duration::from_millis(1000);

/// Retry count at which a message is given up
pub const MAX_RETRANS: u32 = 5;

/// A sent request waiting for its response
#[derive(Debug, Clone)]
pub struct OutstandingMessage {
    pub endpoint: Arc<EndpointHandle>,
    pub sub: Option<usize>,
    pub transaction_id: TransactionId,
    pub data: Bytes,
    pub retransmits: u32,
    pub expires: Instant,
}

impl OutstandingMessage {
    pub fn new(
        endpoint: Arc<EndpointHandle>,
        sub: Option<usize>,
        transaction_id: TransactionId,
        data: Bytes,
        now: Instant,
    ) -> Self {
        Self {
            endpoint,
            sub,
            transaction_id,
            data,
            retransmits: 0,
            expires: now + RETRANSMIT_INTERVAL,
        }
    }
}

/// Work produced by one timer tick
#[derive(Debug, Default)]
pub struct RetransmitPass {
    /// Messages to send again, in queue order
    pub resend: Vec<(TransactionId, Bytes)>,
    /// Messages that exhausted their retries
    pub expired: Vec<OutstandingMessage>,
}

/// Send-ordered queue of unacknowledged requests for one gateway
#[derive(Debug, Default)]
pub struct OutstandingQueue {
    messages: VecDeque<OutstandingMessage>,
    timer: Option<JoinHandle<()>>,
}

impl OutstandingQueue {
    pub fn push(&mut self, message: OutstandingMessage) {
        self.messages.push_back(message);
    }

    /// Remove the message with this transaction id
    pub fn take(&mut self, transaction_id: TransactionId) -> Option<OutstandingMessage> {
        let index = self
            .messages
            .iter()
            .position(|m| m.transaction_id == transaction_id)?;
        let message = self.messages.remove(index);
        if self.messages.is_empty() {
            self.cancel_timer();
        }
        message
    }

    /// Drop every message owned by `endpoint`
    pub fn remove_endpoint(&mut self, endpoint: &Arc<EndpointHandle>) -> usize {
        let before = self.messages.len();
        self.messages.retain(|m| !Arc::ptr_eq(&m.endpoint, endpoint));
        if self.messages.is_empty() {
            self.cancel_timer();
        }
        before - self.messages.len()
    }

    /// Drop everything
    pub fn clear(&mut self) -> usize {
        let count = self.messages.len();
        self.messages.clear();
        self.cancel_timer();
        count
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    pub fn contains(&self, transaction_id: TransactionId) -> bool {
        self.messages.iter().any(|m| m.transaction_id == transaction_id)
    }

    /// Process every message due at `now`
    pub fn due(&mut self, now: Instant) -> RetransmitPass {
        let mut pass = RetransmitPass::default();
        let mut kept = VecDeque::with_capacity(self.messages.len());

        for mut message in self.messages.drain(..) {
            if message.expires > now {
                kept.push_back(message);
                continue;
            }
            message.retransmits += 1;
            if message.retransmits < MAX_RETRANS {
                message.expires = now + RETRANSMIT_INTERVAL;
                pass.resend.push((message.transaction_id, message.data.clone()));
                kept.push_back(message);
            } else {
                pass.expired.push(message);
            }
        }

        self.messages = kept;
        pass
    }

    pub fn has_timer(&self) -> bool {
        self.timer.is_some()
    }

    pub fn set_timer(&mut self, handle: JoinHandle<()>) {
        if let Some(old) = self.timer.replace(handle) {
            old.abort();
        }
    }

    /// Forget the ticker without aborting it; used by the ticker itself
    pub fn release_timer(&mut self) {
        self.timer = None;
    }

    pub fn cancel_timer(&mut self) {
        if let Some(handle) = self.timer.take() {
            handle.abort();
        }
    }
}
