//! Operations requested by the call-processing core

use std::net::SocketAddr;

use mgcp_core::ConnectionMode;
use tracing::{debug, info, warn};

use super::EndpointSession;
use crate::errors::{AgentError, AgentResult};
use crate::interface::{CallLegId, CallRequestOutcome, CallerId, HangupCause, Indication};
use crate::registry::{Endpoint, HookState, LegState};

impl EndpointSession<'_> {
    /// Reserve local RTP for the owner of `sub`
    pub(crate) fn allocate_media(&mut self, sub: usize) -> bool {
        let Some(leg) = self.ep.subs[sub].owner else {
            return false;
        };
        match self.core.media.allocate(leg) {
            Ok(addr) => {
                self.ep.subs[sub].media = Some(addr);
                true
            }
            Err(e) => {
                warn!("Unable to allocate media for {}: {}", self.ep.full_name(), e);
                self.queue_hangup(sub, HangupCause::MediaUnavailable);
                false
            }
        }
    }

    /// Allocate media and create the gateway connection
    pub(crate) fn start_media(&mut self, sub: usize) {
        if !self.allocate_media(sub) {
            return;
        }
        self.new_callid(sub);
        self.create_connection(sub);
    }

    /// Create the connection, or push the new mode if it already exists
    pub(crate) fn start_or_modify(&mut self, sub: usize) {
        if self.ep.subs[sub].has_media() {
            self.modify_connection(sub);
        } else {
            self.start_media(sub);
        }
    }

    /// Release `sub` and leave the line in a sensible state
    pub(crate) fn hangup_sub(&mut self, sub: usize) {
        let leg = self.detach_leg(sub);
        debug!(
            "Hanging up {} sub {} (leg {:?})",
            self.ep.full_name(),
            sub,
            leg
        );

        if !self.ep.subs[sub].cxident.is_empty() {
            self.delete_connection(sub);
        }
        self.ep.subs[sub].cxident.clear();

        let sibling = Endpoint::sibling(sub);
        let offhook = self.ep.hookstate == HookState::OffHook;
        if sub == self.ep.master && self.ep.subs[sibling].owner.is_some() {
            let caller = self.ep.subs[sibling].caller.clone();
            if offhook {
                self.notify_request_with_callerid(self.tone("L/wt", "L/wt1"), caller.as_ref());
            } else {
                // Switch over to the waiting call and ring for it
                self.ep.master = sibling;
                self.ep.subs[sibling].mode = ConnectionMode::RecvOnly;
                self.modify_connection(sibling);
                self.notify_request_with_callerid("L/rg", caller.as_ref());
            }
        } else if sub != self.ep.master && offhook {
            self.notify_request(self.tone("L/v", ""));
        } else if offhook {
            self.notify_request("L/ro");
        } else {
            self.notify_request("");
        }

        self.ep.subs[sub].reset_call();
        self.ep.dtmf_buf.clear();
        if self.ep.collector.as_ref().is_some_and(|c| c.sub == sub) {
            self.ep.collector = None;
        }
        if self.ep.subs[sub].media.take().is_some() {
            if let Some(leg) = leg {
                self.core.media.release(leg);
            }
        }

        if !offhook && !self.ep.subs[sibling].has_media() {
            self.restore_idle_features();
            self.ep.capability = self.ep.configured_codecs.clone();
            self.update_message_waiting();
        }
    }

    /// Ring this endpoint for a call from `caller`
    pub(crate) fn request_call(&mut self, caller: CallerId) -> AgentResult<CallRequestOutcome> {
        if !self.ep.call_forward.is_empty() {
            info!(
                "Forwarding call for {} to '{}'",
                self.ep.full_name(),
                self.ep.call_forward
            );
            return Ok(CallRequestOutcome::Forwarded(self.ep.call_forward.clone()));
        }
        if self.ep.dnd {
            return Err(AgentError::Busy(self.ep.full_name()));
        }

        let master = self.ep.master;
        let sibling = Endpoint::sibling(master);
        let master_owned = self.ep.subs[master].owner.is_some();
        let both_owned = master_owned && self.ep.subs[sibling].owner.is_some();
        if (self.ep.callwaiting && both_owned) || (!self.ep.callwaiting && master_owned) {
            return Err(AgentError::Busy(self.ep.full_name()));
        }

        let target = if master_owned { sibling } else { master };
        let other = Endpoint::sibling(target);
        let tone = match self.ep.hookstate {
            HookState::OffHook => self.tone("L/wt", "L/wt1"),
            HookState::OnHook => "L/rg",
        };

        let leg = CallLegId::new();
        self.attach_leg(target, leg);
        {
            let s = &mut self.ep.subs[target];
            s.outgoing = true;
            s.mode = ConnectionMode::RecvOnly;
            s.leg_state = LegState::Ringing;
            s.caller = Some(caller.clone());
        }
        self.start_or_modify(target);

        let protect_other = {
            let o = &self.ep.subs[other];
            o.owner.is_some() && !o.cxident.is_empty() && !o.callid.is_empty()
        };
        if protect_other {
            // Keep the call-waiting tone out of the active call
            self.ep.subs[other].mode = ConnectionMode::RecvOnly;
            self.modify_connection(other);
        }
        self.notify_request_with_callerid(tone, Some(&caller));
        if protect_other {
            self.ep.subs[other].mode = ConnectionMode::SendRecv;
            self.modify_connection(other);
        }

        Ok(CallRequestOutcome::Placed(leg))
    }

    pub(crate) fn answer(&mut self, sub: usize) -> AgentResult<()> {
        if self.ep.collector.as_ref().is_some_and(|c| c.sub == sub) {
            return Err(AgentError::InvalidState(format!(
                "{} sub {} is still collecting digits",
                self.ep.full_name(),
                sub
            )));
        }
        self.ep.subs[sub].mode = ConnectionMode::SendRecv;
        self.start_or_modify(sub);
        info!("Answering {} sub {}", self.ep.full_name(), sub);
        if self.ep.subs[sub].leg_state != LegState::Up {
            self.ep.subs[sub].leg_state = LegState::Up;
            self.notify_request("");
            self.modify_connection(sub);
        }
        Ok(())
    }

    pub(crate) fn indicate(&mut self, indication: Indication) {
        match indication {
            Indication::Ringing => self.notify_request(self.tone("G/rt", "L/rt")),
            Indication::Busy => self.notify_request("L/bz"),
            Indication::Congestion => self.notify_request(self.tone("G/cg", "L/cg")),
            Indication::Stop => self.notify_request(""),
            Indication::Hold | Indication::Unhold => {
                debug!("{:?} on {} is handled by the core", indication, self.ep.full_name());
            }
        }
    }

    pub(crate) fn send_digit(&mut self, sub: usize, digit: char) -> AgentResult<()> {
        if self.ep.config.dtmf_mode.uses_rfc2833() {
            if let Some(leg) = self.ep.subs[sub].owner {
                self.core.media.send_dtmf(leg, digit)?;
            }
        }
        self.notify_request(&format!("D/{}", digit));
        Ok(())
    }

    pub(crate) fn set_connection_mode(&mut self, sub: usize, mode: ConnectionMode) {
        self.ep.subs[sub].mode = mode;
        self.modify_connection(sub);
    }

    /// Point the gateway's media straight at `peer`
    pub(crate) fn redirect_media(&mut self, sub: usize, peer: SocketAddr) {
        self.ep.subs[sub].tmpdest = Some(peer);
        self.modify_with_sdp(sub, Some(peer));
    }
}
