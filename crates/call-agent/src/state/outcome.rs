//! Transaction completion
//!
//! Every final response, and every timeout synthesized by the retransmission
//! timer, is folded into a [`TransactionOutcome`] and applied to the endpoint
//! by [`EndpointSession::handle_response`].

use mgcp_core::sdp::negotiate;
use mgcp_core::{
    MediaHost, MgcpMessage, RemoteMedia, ResponseCode, SdpError, TransactionId, Verb,
};
use tracing::{debug, info, warn};

use super::EndpointSession;
use crate::command::{PendingCommand, QueueSelector};
use crate::interface::{CallEvent, HangupCause};
use crate::registry::{HookState, LegState, SUBCHANNELS};

/// What a final response means for the endpoint
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransactionOutcome {
    Success,
    /// 401/402: the gateway knows the hookstate better than we do
    HookstateCorrection(HookState),
    /// Any other 4xx/5xx
    ConnectionFailure(ResponseCode),
    /// No response after every retransmission (406)
    Timeout,
    /// 407
    Aborted,
}

impl TransactionOutcome {
    pub fn from_code(code: ResponseCode) -> Self {
        match code {
            ResponseCode::ALREADY_OFF_HOOK => Self::HookstateCorrection(HookState::OffHook),
            ResponseCode::ALREADY_ON_HOOK => Self::HookstateCorrection(HookState::OnHook),
            ResponseCode::TIMEOUT => Self::Timeout,
            ResponseCode::ABORTED => Self::Aborted,
            code if code.as_u16() >= 400 => Self::ConnectionFailure(code),
            _ => Self::Success,
        }
    }

    pub fn is_failure(&self) -> bool {
        !matches!(self, Self::Success)
    }

    fn hangup_cause(&self, code: ResponseCode) -> HangupCause {
        match self {
            Self::Timeout => HangupCause::Timeout,
            _ => HangupCause::GatewayFailure(code.as_u16()),
        }
    }
}

impl EndpointSession<'_> {
    /// Apply the final response (or timeout) of a command we sent
    pub(crate) fn handle_response(
        &mut self,
        sub: Option<usize>,
        transaction_id: TransactionId,
        code: ResponseCode,
        response: Option<&MgcpMessage>,
    ) {
        let Some(command) = self.complete_command(sub, transaction_id) else {
            info!(
                "No command found on {} for transaction {}. Ignoring...",
                self.ep.full_name(),
                transaction_id
            );
            return;
        };

        let outcome = TransactionOutcome::from_code(code);
        match outcome {
            TransactionOutcome::HookstateCorrection(state) => {
                debug!("Hookstate of {} corrected to {:?}", self.ep.full_name(), state);
                self.ep.hookstate = state;
            }
            TransactionOutcome::Timeout => {
                info!("Transaction {} timed out", transaction_id);
            }
            TransactionOutcome::Aborted => {
                info!("Transaction {} aborted", transaction_id);
            }
            _ => {}
        }

        if outcome.is_failure() {
            self.fail_command(&command, code, outcome.hangup_cause(code));
        }

        let Some(response) = response else {
            return;
        };

        if code == ResponseCode::OK && matches!(command.verb, Verb::Crcx | Verb::Mdcx) {
            if let Some(index) = command.sub {
                self.core.send_ack(self.gateway, transaction_id);
                let s = &self.ep.subs[index];
                if let (Some(leg), LegState::Ringing) = (s.owner, s.leg_state) {
                    self.emit(CallEvent::Ringing { leg });
                }
            }
        }

        if outcome != TransactionOutcome::Success {
            return;
        }

        match command.verb {
            Verb::Crcx => self.handle_create_response(command.sub, response),
            Verb::Auep => self.handle_audit_response(response),
            _ => {}
        }

        // Late responses for a leg that is already gone carry nothing useful
        if let Some(index) = command.sub {
            if self.ep.subs[index].owner.is_some() && !response.sdp_lines().is_empty() {
                if !self.ep.subs[index].has_media() && !self.allocate_media(index) {
                    return;
                }
                self.process_sdp(index, response);
            }
        }
    }

    /// Find the answered command, removing it from its queue and posting the
    /// next one
    fn complete_command(
        &mut self,
        sub: Option<usize>,
        transaction_id: TransactionId,
    ) -> Option<PendingCommand> {
        let selectors = if self.ep.config.slowsequence {
            vec![QueueSelector::Command]
        } else if let Some(index) = sub {
            vec![QueueSelector::Connection(index)]
        } else {
            vec![QueueSelector::Notification, QueueSelector::Command]
        };

        for selector in selectors {
            if let Some((done, next)) = self.ep.queue_mut(selector).complete(transaction_id) {
                if let Some(next) = next {
                    self.post(&next);
                }
                return Some(done);
            }
        }
        None
    }

    fn fail_command(&mut self, command: &PendingCommand, code: ResponseCode, cause: HangupCause) {
        match command.sub {
            Some(index) => {
                let s = &self.ep.subs[index];
                if command.verb == Verb::Crcx && s.cxident.is_empty() && !s.callid.is_empty() {
                    info!(
                        "Deleting half-created connection on {} sub {} after {}",
                        self.ep.full_name(),
                        index,
                        code
                    );
                    self.delete_connection(index);
                }
                if self.ep.subs[index].owner.is_some() {
                    warn!(
                        "Terminating on result {} from {}",
                        code,
                        self.ep.full_name()
                    );
                    self.queue_hangup(index, cause);
                }
            }
            None => {
                for index in (0..SUBCHANNELS).rev() {
                    if self.ep.subs[index].owner.is_some() {
                        warn!(
                            "Terminating on result {} from {} sub {}",
                            code,
                            self.ep.full_name(),
                            index
                        );
                        self.queue_hangup(index, cause);
                    }
                }
                self.ep.clear_queues();
            }
        }
    }

    fn handle_create_response(&mut self, sub: Option<usize>, response: &MgcpMessage) {
        let Some(index) = sub else {
            return;
        };
        let cxident = response.header("I");
        if cxident.is_empty() {
            return;
        }

        let s = &mut self.ep.subs[index];
        if s.owner.is_some() {
            if !s.cxident.is_empty() && !s.cxident.eq_ignore_ascii_case(cxident) {
                warn!(
                    "Subchannel {} already has a connection id '{}', replacing with '{}'",
                    index, s.cxident, cxident
                );
            }
            s.cxident = cxident.to_string();
            if std::mem::take(&mut s.pending_modify) {
                // One MDCX carries whatever changed while the CRCX was out
                let dest = s.tmpdest;
                match dest {
                    Some(dest) => self.modify_with_sdp(index, Some(dest)),
                    None => self.modify_connection(index),
                }
            }
        } else {
            // The call went away before the gateway answered
            s.cxident = cxident.to_string();
            s.pending_modify = false;
            let selector = QueueSelector::for_command(Verb::Dlcx, sub, self.ep.config.slowsequence);
            if !self.ep.queue_mut(selector).contains(Verb::Dlcx) {
                self.delete_connection(index);
            }
            self.ep.subs[index].cxident.clear();
        }
    }

    fn handle_audit_response(&mut self, response: &MgcpMessage) {
        let connections = response.header("I");
        if !connections.is_empty() {
            for cxident in connections.split(',').map(str::trim).filter(|c| !c.is_empty()) {
                let known = self.ep.subs.iter().any(|s| s.cxident.eq_ignore_ascii_case(cxident));
                if !known {
                    info!(
                        "Non existing connection id {} on {}, deleting it",
                        cxident,
                        self.ep.full_name()
                    );
                    self.delete_stale_connection("", cxident);
                }
            }
        }

        let events = response.header("ES");
        if events.contains("hu") {
            if self.ep.hookstate != HookState::OnHook {
                if self.ep.hookstate == HookState::OffHook {
                    for index in 0..SUBCHANNELS {
                        self.queue_hangup(index, HangupCause::OnHook);
                    }
                }
                self.ep.hookstate = HookState::OnHook;
                self.notify_request("");
                debug!("Audit: {} is on hook", self.ep.full_name());
            }
        } else if events.contains("hd") && self.ep.hookstate != HookState::OffHook {
            self.ep.hookstate = HookState::OffHook;
            self.notify_request("");
            debug!("Audit: {} is off hook", self.ep.full_name());
        }
    }

    /// Take the gateway's media description and start RTP towards it
    pub(crate) fn process_sdp(&mut self, sub: usize, response: &MgcpMessage) {
        let remote = match RemoteMedia::from_message(response) {
            Ok(remote) => remote,
            Err(e) => {
                warn!("Unable to process SDP from {}: {}", self.ep.full_name(), e);
                return;
            }
        };

        let dtmf_via_rtp = self.core.settings.read().dtmf_via_rtp
            && self.ep.config.dtmf_mode.uses_rfc2833();
        let negotiated = match negotiate(&self.ep.capability, dtmf_via_rtp, &remote) {
            Ok(negotiated) => negotiated,
            Err(SdpError::NoCompatibleCodecs) => {
                warn!(
                    "No compatible codecs with {} (offered {})",
                    self.ep.full_name(),
                    remote.codecs()
                );
                self.queue_hangup(sub, HangupCause::NoCompatibleCodecs);
                return;
            }
            Err(e) => {
                warn!("Negotiation with {} failed: {}", self.ep.full_name(), e);
                return;
            }
        };

        self.ep.capability = negotiated.codecs();
        self.ep.subs[sub].negotiated = Some(negotiated.clone());

        let Some(leg) = self.ep.subs[sub].owner else {
            return;
        };
        match (&remote.host, remote.socket_addr()) {
            (_, Some(addr)) => {
                self.ep.subs[sub].remote_media = Some(addr);
                if let Err(e) = self.core.media.start(leg, addr, &negotiated) {
                    warn!("Unable to start media for {}: {}", leg, e);
                }
            }
            (MediaHost::Name(host), None) => {
                let callid = self.ep.subs[sub].callid.clone();
                self.core.resolve_media_host(
                    self.handle,
                    sub,
                    callid,
                    host.clone(),
                    remote.port,
                    negotiated,
                );
            }
            (MediaHost::Ip(_), None) => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_outcome_classification() {
        assert_eq!(TransactionOutcome::from_code(ResponseCode::OK), TransactionOutcome::Success);
        assert_eq!(TransactionOutcome::from_code(ResponseCode::new(250)), TransactionOutcome::Success);
        assert_eq!(
            TransactionOutcome::from_code(ResponseCode::new(401)),
            TransactionOutcome::HookstateCorrection(HookState::OffHook)
        );
        assert_eq!(
            TransactionOutcome::from_code(ResponseCode::new(402)),
            TransactionOutcome::HookstateCorrection(HookState::OnHook)
        );
        assert_eq!(TransactionOutcome::from_code(ResponseCode::TIMEOUT), TransactionOutcome::Timeout);
        assert_eq!(TransactionOutcome::from_code(ResponseCode::ABORTED), TransactionOutcome::Aborted);
        assert_eq!(
            TransactionOutcome::from_code(ResponseCode::new(510)),
            TransactionOutcome::ConnectionFailure(ResponseCode::new(510))
        );
    }

    #[test]
    fn test_timeout_maps_to_timeout_cause() {
        assert_eq!(
            TransactionOutcome::Timeout.hangup_cause(ResponseCode::TIMEOUT),
            HangupCause::Timeout
        );
        assert_eq!(
            TransactionOutcome::ConnectionFailure(ResponseCode::new(500)).hangup_cause(ResponseCode::new(500)),
            HangupCause::GatewayFailure(500)
        );
    }
}
