//! Per-endpoint command serialization
//!
//! A gateway may only have one command of each kind in flight for an
//! endpoint. Requests are kept in three families of queues: notification
//! requests, one queue per subchannel for connection commands, and a general
//! queue for everything else (or for every command when the endpoint is
//! configured for slow sequencing). Only the head of a queue is ever sent;
//! the next entry goes out when the head's final response arrives.

use std::collections::VecDeque;

use bytes::Bytes;

use mgcp_core::{TransactionId, Verb};

/// Which queue a command belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueueSelector {
    Notification,
    Command,
    /// Connection commands of one subchannel
    Connection(usize),
}

impl QueueSelector {
    pub fn for_command(verb: Verb, sub: Option<usize>, slowsequence: bool) -> Self {
        if slowsequence {
            return QueueSelector::Command;
        }
        match (verb, sub) {
            (Verb::Rqnt, _) => QueueSelector::Notification,
            (Verb::Crcx | Verb::Mdcx | Verb::Dlcx, Some(index)) => QueueSelector::Connection(index),
            _ => QueueSelector::Command,
        }
    }
}

/// An encoded request waiting for its turn or for its response
#[derive(Debug, Clone)]
pub struct PendingCommand {
    pub verb: Verb,
    pub transaction_id: TransactionId,
    pub data: Bytes,
    pub sub: Option<usize>,
    /// Handed to the transport at least once
    pub sent: bool,
}

impl PendingCommand {
    pub fn new(verb: Verb, transaction_id: TransactionId, data: Bytes, sub: Option<usize>) -> Self {
        Self {
            verb,
            transaction_id,
            data,
            sub,
            sent: false,
        }
    }
}

/// FIFO of commands, the head being the one in flight
#[derive(Debug, Clone, Default)]
pub struct CommandQueue {
    items: VecDeque<PendingCommand>,
}

impl CommandQueue {
    /// Queue a command; returns `true` when it went to the head and must be
    /// posted now, in which case it is already marked sent
    pub fn enqueue(&mut self, mut command: PendingCommand) -> bool {
        let post = self.items.is_empty();
        if post {
            command.sent = true;
        }
        self.items.push_back(command);
        post
    }

    /// Remove the command answered by `transaction_id`
    ///
    /// When the answered command was the head, the new head (if any) is marked
    /// sent and returned alongside so the caller can post it.
    pub fn complete(
        &mut self,
        transaction_id: TransactionId,
    ) -> Option<(PendingCommand, Option<PendingCommand>)> {
        let index = self
            .items
            .iter()
            .position(|c| c.transaction_id == transaction_id)?;
        let done = self.items.remove(index)?;

        let next = if index == 0 {
            self.items.front_mut().map(|head| {
                head.sent = true;
                head.clone()
            })
        } else {
            None
        };
        Some((done, next))
    }

    /// Drop connection commands of `sub` that were never sent
    pub fn purge_unsent_connection(&mut self, sub: usize) -> usize {
        let before = self.items.len();
        self.items.retain(|c| {
            c.sent || c.sub != Some(sub) || !c.verb.is_connection_command()
        });
        before - self.items.len()
    }

    pub fn contains(&self, verb: Verb) -> bool {
        self.items.iter().any(|c| c.verb == verb)
    }

    pub fn in_flight(&self) -> Option<&PendingCommand> {
        self.items.front().filter(|c| c.sent)
    }

    pub fn clear(&mut self) {
        self.items.clear();
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn command(verb: Verb, id: u32, sub: Option<usize>) -> PendingCommand {
        PendingCommand::new(verb, TransactionId::new(id), Bytes::new(), sub)
    }

    #[test]
    fn test_queue_selection() {
        assert_eq!(QueueSelector::for_command(Verb::Rqnt, None, false), QueueSelector::Notification);
        assert_eq!(QueueSelector::for_command(Verb::Crcx, Some(1), false), QueueSelector::Connection(1));
        assert_eq!(QueueSelector::for_command(Verb::Dlcx, None, false), QueueSelector::Command);
        assert_eq!(QueueSelector::for_command(Verb::Auep, None, false), QueueSelector::Command);
        assert_eq!(QueueSelector::for_command(Verb::Rqnt, None, true), QueueSelector::Command);
        assert_eq!(QueueSelector::for_command(Verb::Mdcx, Some(0), true), QueueSelector::Command);
    }

    #[test]
    fn test_only_head_is_posted() {
        let mut queue = CommandQueue::default();
        assert!(queue.enqueue(command(Verb::Crcx, 1, Some(0))));
        assert!(!queue.enqueue(command(Verb::Mdcx, 2, Some(0))));
        assert!(!queue.enqueue(command(Verb::Mdcx, 3, Some(0))));
        assert_eq!(queue.in_flight().unwrap().transaction_id, TransactionId::new(1));

        let (done, next) = queue.complete(TransactionId::new(1)).unwrap();
        assert_eq!(done.verb, Verb::Crcx);
        let next = next.unwrap();
        assert_eq!(next.transaction_id, TransactionId::new(2));
        assert!(next.sent);
        assert_eq!(queue.len(), 2);
    }

    #[test]
    fn test_complete_unknown_transaction() {
        let mut queue = CommandQueue::default();
        queue.enqueue(command(Verb::Rqnt, 1, None));
        assert!(queue.complete(TransactionId::new(9)).is_none());
        assert_eq!(queue.len(), 1);
    }

    #[test]
    fn test_purge_keeps_in_flight_head() {
        let mut queue = CommandQueue::default();
        queue.enqueue(command(Verb::Crcx, 1, Some(0)));
        queue.enqueue(command(Verb::Mdcx, 2, Some(0)));
        queue.enqueue(command(Verb::Mdcx, 3, Some(1)));

        assert_eq!(queue.purge_unsent_connection(0), 1);
        assert_eq!(queue.len(), 2);
        assert!(queue.in_flight().is_some());
        assert!(!queue.enqueue(command(Verb::Dlcx, 4, Some(0))));
        assert!(queue.contains(Verb::Dlcx));
    }
}
