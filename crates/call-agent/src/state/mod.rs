//! Endpoint call state machine
//!
//! Every state transition runs through an [`EndpointSession`]: a borrow of one
//! locked [`Endpoint`] together with the gateway it belongs to and the shared
//! agent core. Sessions are short lived; they are created by the dispatcher for
//! inbound requests and responses, by the retransmission timer for timeouts,
//! and by [`crate::CallAgent`] for requests from the call-processing core.
//!
//! - [`transmit`]: outbound request builders (CRCX, MDCX, DLCX, RQNT, AUEP)
//! - [`outcome`]: transaction completion and response handling
//! - [`notify`]: NTFY and RSIP handling
//! - [`digits`]: digit collection and feature codes
//! - [`call_control`]: operations requested by the call-processing core

pub mod call_control;
pub mod digits;
pub mod notify;
pub mod outcome;
pub mod transmit;

use std::sync::Arc;

use bytes::Bytes;
use mgcp_core::{RequestBuilder, ResponseCode, TransactionId, Verb};
use tracing::{debug, warn};

use crate::agent::AgentCore;
use crate::command::{PendingCommand, QueueSelector};
use crate::interface::{CallEvent, CallLegId, HangupCause};
use crate::registry::{Endpoint, EndpointHandle, Gateway, LegLocation};

/// The state machine over one locked endpoint
pub(crate) struct EndpointSession<'a> {
    pub(crate) core: &'a AgentCore,
    pub(crate) gateway: &'a Arc<Gateway>,
    pub(crate) handle: &'a Arc<EndpointHandle>,
    pub(crate) ep: &'a mut Endpoint,
}

impl<'a> EndpointSession<'a> {
    pub(crate) fn new(
        core: &'a AgentCore,
        gateway: &'a Arc<Gateway>,
        handle: &'a Arc<EndpointHandle>,
        ep: &'a mut Endpoint,
    ) -> Self {
        Self {
            core,
            gateway,
            handle,
            ep,
        }
    }

    fn ncs(&self) -> bool {
        self.ep.config.ncs
    }

    /// Pick the generic or NCS name of a signal
    fn tone(&self, generic: &'static str, ncs: &'static str) -> &'static str {
        if self.ncs() {
            ncs
        } else {
            generic
        }
    }

    fn emit(&self, event: CallEvent) {
        self.core.emit(event);
    }

    /// Ask the core to hang up whatever owns `sub`
    fn queue_hangup(&self, sub: usize, cause: HangupCause) {
        if let Some(leg) = self.ep.subs[sub].owner {
            self.emit(CallEvent::Hangup { leg, cause });
        }
    }

    /// Start a request addressed to this endpoint
    fn request(&self, verb: Verb) -> RequestBuilder {
        RequestBuilder::with_profile(
            verb,
            self.core.next_transaction_id(),
            &self.ep.name,
            self.gateway.name(),
            self.ncs(),
        )
    }

    /// Encode a request and hand it to the command serializer
    fn send_command(&mut self, builder: RequestBuilder, sub: Option<usize>) {
        let verb = builder.verb();
        let transaction_id = builder.transaction_id();
        let data: Bytes = match builder.build() {
            Ok(data) => data,
            Err(e) => {
                warn!("Unable to build {} for {}: {}", verb, self.ep.full_name(), e);
                return;
            }
        };

        let selector = QueueSelector::for_command(verb, sub, self.ep.config.slowsequence);
        if verb == Verb::Dlcx {
            if let Some(index) = sub {
                let purged = self.ep.queue_mut(selector).purge_unsent_connection(index);
                if purged > 0 {
                    debug!(
                        "Dropped {} queued connection commands for {} sub {}",
                        purged,
                        self.ep.full_name(),
                        index
                    );
                }
            }
        }

        let command = PendingCommand::new(verb, transaction_id, data, sub);
        if self.ep.queue_mut(selector).enqueue(command.clone()) {
            self.post(&command);
        } else {
            debug!(
                "Queued {} transaction {} for {}",
                verb,
                transaction_id,
                self.ep.full_name()
            );
        }
    }

    /// Transmit a command that reached the head of its queue
    fn post(&self, command: &PendingCommand) {
        debug!(
            "Posting {} transaction {} to {}",
            command.verb,
            command.transaction_id,
            self.ep.full_name()
        );
        self.core.transmit_tracked(
            self.gateway,
            self.handle,
            command.sub,
            command.transaction_id,
            command.data.clone(),
        );
    }

    /// Answer a request from the gateway
    fn respond(&self, transaction_id: TransactionId, code: ResponseCode, comment: &str) {
        self.core
            .send_response(self.gateway, transaction_id, code, comment);
    }

    fn attach_leg(&mut self, sub: usize, leg: CallLegId) {
        self.ep.subs[sub].owner = Some(leg);
        self.core.legs.insert(
            leg,
            LegLocation {
                gateway: self.gateway.clone(),
                endpoint: self.handle.clone(),
                sub,
            },
        );
    }

    fn detach_leg(&mut self, sub: usize) -> Option<CallLegId> {
        let leg = self.ep.subs[sub].owner.take()?;
        self.core.legs.remove(&leg);
        Some(leg)
    }
}
