//! Requests from the gateway: NTFY events and RSIP

use std::sync::Arc;

use mgcp_core::{ConnectionMode, MgcpMessage, ResponseCode, TransactionId};
use tracing::{debug, info, warn};

use super::EndpointSession;
use crate::agent::AgentCore;
use crate::interface::{CallEvent, CallLegId, HangupCause};
use crate::registry::{Endpoint, Gateway, HookState, LegState, SUBCHANNELS};

fn is_keepalive(request: &MgcpMessage) -> bool {
    request.header("RM").eq_ignore_ascii_case("X-keepalive")
}

/// Event names carried in an `O:` header, package prefixes removed
fn observed_events(request: &MgcpMessage) -> Vec<String> {
    request
        .header("O")
        .split(',')
        .map(str::trim)
        .filter(|e| !e.is_empty())
        .map(|e| e.rsplit('/').next().unwrap_or(e).to_string())
        .collect()
}

impl EndpointSession<'_> {
    /// NTFY: acknowledge, re-arm event reporting and act on every event
    pub(crate) fn handle_notify(&mut self, transaction_id: TransactionId, request: &MgcpMessage) {
        self.respond(transaction_id, ResponseCode::OK, "OK");

        let events = observed_events(request);
        if events.is_empty() {
            return;
        }
        debug!("Endpoint {} notified: {}", self.ep.full_name(), events.join(","));

        let rearm = !events.iter().any(|e| {
            e.eq_ignore_ascii_case("hu") || e.eq_ignore_ascii_case("hd") || e.eq_ignore_ascii_case("ping")
        });
        if rearm {
            let tone = self.ep.curtone.clone();
            self.notify_request(&tone);
        }

        for event in &events {
            self.handle_event(self.ep.master, event);
        }
    }

    fn handle_event(&mut self, sub: usize, event: &str) {
        if event.eq_ignore_ascii_case("hd") {
            self.ep.hookstate = HookState::OffHook;
            self.ep.dtmf_buf.clear();
            let s = &mut self.ep.subs[sub];
            s.mode = if s.owner.is_none() && !s.outgoing {
                ConnectionMode::RecvOnly
            } else {
                ConnectionMode::SendRecv
            };
            self.handle_hd_hf(sub);
        } else if event.eq_ignore_ascii_case("hf") {
            self.handle_flash(sub);
        } else if event.eq_ignore_ascii_case("hu") {
            self.handle_onhook(sub);
        } else if is_digit_event(event) {
            self.handle_digit(sub, event);
        } else if event.eq_ignore_ascii_case("T") || event.eq_ignore_ascii_case("ping") {
            // Timer and keepalive events need nothing
        } else {
            info!("Received unknown event '{}' from {}", event, self.ep.full_name());
        }
    }

    /// Off hook or flash onto an idle subchannel
    pub(crate) fn handle_hd_hf(&mut self, sub: usize) {
        let (owner, outgoing) = {
            let s = &self.ep.subs[sub];
            (s.owner, s.outgoing)
        };

        match (outgoing, owner) {
            (true, Some(leg)) => {
                // Answering a call we are ringing
                self.emit(CallEvent::Unhold { leg });
                self.ep.subs[sub].mode = ConnectionMode::SendRecv;
                self.start_or_modify(sub);
                self.notify_request("");
                self.ep.subs[sub].leg_state = LegState::Up;
                self.emit(CallEvent::Answer { leg });
            }
            (false, None) => {
                let leg = CallLegId::new();
                self.attach_leg(sub, leg);
                self.start_or_modify(sub);

                let context = self.ep.config.context.clone();
                let caller = self.ep.caller_id();
                let endpoint = self.ep.full_name();
                if self.ep.config.immediate {
                    self.notify_request(self.tone("G/rt", "L/rt"));
                    self.ep.subs[sub].leg_state = LegState::Ring;
                    self.emit(CallEvent::NewChannel {
                        leg,
                        endpoint,
                        context: context.clone(),
                        state: LegState::Ring,
                        caller: caller.clone(),
                    });
                    self.emit(CallEvent::StartPbx {
                        leg,
                        context,
                        exten: "s".to_string(),
                        caller,
                    });
                } else {
                    let tone = if self.core.dialplan.has_voicemail(&self.ep.config.mailbox) {
                        "L/sl"
                    } else {
                        "L/dl"
                    };
                    self.notify_request(tone);
                    self.ep.subs[sub].leg_state = LegState::Down;
                    self.emit(CallEvent::NewChannel {
                        leg,
                        endpoint,
                        context,
                        state: LegState::Down,
                        caller,
                    });
                    self.start_collection(sub, leg);
                }
            }
            (false, Some(leg)) => {
                warn!(
                    "Off hook on {} sub {} which already has a call",
                    self.ep.full_name(),
                    sub
                );
                self.emit(CallEvent::Unhold { leg });
                self.ep.subs[sub].mode = ConnectionMode::SendRecv;
                self.start_or_modify(sub);
                self.notify_request("");
            }
            (true, None) => {
                debug!("Outgoing subchannel {} on {} lost its owner", sub, self.ep.full_name());
            }
        }
    }

    /// Hookflash: call waiting, three-way calling and transfer
    fn handle_flash(&mut self, sub: usize) {
        let sibling = Endpoint::sibling(sub);
        if self.ep.hookstate != HookState::OffHook {
            // A flash while on hook means we missed the off-hook
            warn!("Hook flash on {} while on hook, ignoring", self.ep.full_name());
            return;
        }
        let s = &self.ep.subs[sub];
        if s.owner.is_some() && s.leg_state == LegState::Down && self.ep.subs[sibling].owner.is_none() {
            // Still dialing the first call
            debug!("Ignoring flash on {} while collecting digits", self.ep.full_name());
            return;
        }

        let config = &self.ep.config;
        if !(config.callwaiting || config.transfer || config.threewaycalling) {
            warn!(
                "Call waiting, call transfer or three-way calling not enabled on {}",
                self.ep.full_name()
            );
            return;
        }

        // Whoever is not the current master becomes it
        self.ep.master = sibling;

        let sub_owner = self.ep.subs[sub].owner;
        let sib_owner = self.ep.subs[sibling].owner;
        match (sub_owner, sib_owner) {
            (_, None) => {
                // Put the current call on hold and start a new one
                self.ep.subs[sub].mode = ConnectionMode::Inactive;
                self.modify_connection(sub);
                if let Some(leg) = sub_owner {
                    self.emit(CallEvent::Hold { leg });
                }
                self.ep.subs[sibling].mode = ConnectionMode::RecvOnly;
                self.handle_hd_hf(sibling);
            }
            (Some(_), Some(sib_leg)) => {
                if !self.ep.subs[sub].outgoing && !self.ep.subs[sibling].outgoing {
                    debug!("Conferencing both calls on {}", self.ep.full_name());
                    self.ep.subs[sub].mode = ConnectionMode::Conference;
                    self.ep.subs[sibling].mode = ConnectionMode::Conference;
                    self.emit(CallEvent::Unhold { leg: sib_leg });
                    self.modify_connection(sub);
                    self.modify_connection(sibling);
                } else {
                    // Flip-flop between the two calls
                    debug!("Flipping to the other call on {}", self.ep.full_name());
                    self.ep.subs[sub].mode = ConnectionMode::Inactive;
                    self.modify_connection(sub);
                    for index in [sub, sibling] {
                        if let Some(leg) = self.ep.subs[index].owner {
                            self.emit(CallEvent::Hold { leg });
                        }
                    }
                    self.handle_hd_hf(sibling);
                }
            }
            (None, Some(_)) => {
                // Back to the only remaining call
                let owned = sibling;
                self.ep.master = owned;
                if let Some(leg) = self.ep.subs[owned].owner {
                    self.emit(CallEvent::Unhold { leg });
                }
                self.ep.subs[owned].mode = ConnectionMode::SendRecv;
                self.modify_connection(owned);
            }
        }
    }

    fn handle_onhook(&mut self, sub: usize) {
        self.ep.hookstate = HookState::OnHook;
        self.ep.subs[sub].mode = ConnectionMode::RecvOnly;

        let sibling = Endpoint::sibling(sub);
        let owners = (self.ep.subs[sub].owner, self.ep.subs[sibling].owner);
        let either_incoming = !self.ep.subs[sub].outgoing || !self.ep.subs[sibling].outgoing;

        match owners {
            (Some(from), Some(to)) if self.ep.config.transfer && either_incoming => {
                info!("Transferring {} to {} on {}", from, to, self.ep.full_name());
                self.emit(CallEvent::Transfer { from, to });
                for index in [sub, sibling] {
                    self.ep.subs[index].alreadygone = true;
                    self.queue_hangup(index, HangupCause::Transferred);
                }
            }
            (Some(_), _) => {
                self.ep.subs[sub].alreadygone = true;
                self.queue_hangup(sub, HangupCause::OnHook);
            }
            (None, _) => {
                // The gateway may still think a connection is up
                info!(
                    "No call on {} sub {}, sending DLCX",
                    self.ep.full_name(),
                    sub
                );
                self.delete_connection(sub);
            }
        }

        if self.ep.hookstate == HookState::OnHook
            && self.ep.subs.iter().all(|s| !s.has_media())
        {
            self.restore_idle_features();
            self.update_message_waiting();
        }
    }

    fn handle_digit(&mut self, sub: usize, digit: &str) {
        let Some(ch) = digit.chars().next() else {
            return;
        };
        let s = &self.ep.subs[sub];
        match (s.owner, s.leg_state) {
            (Some(leg), LegState::Up) => {
                self.emit(CallEvent::Dtmf { leg, digit: ch });
                // Three-way calls hear the digit on both legs
                if let Some(other) = self.ep.subs[Endpoint::sibling(sub)].owner {
                    self.emit(CallEvent::Dtmf { leg: other, digit: ch });
                }
                if self.ep.curtone.contains("wt") && ch == 'A' {
                    self.ep.curtone.clear();
                }
            }
            _ => {
                if !self.ep.push_digit(ch) {
                    debug!("Digit buffer full on {}, dropping '{}'", self.ep.full_name(), ch);
                    return;
                }
                if self.ep.collector.is_some() {
                    self.evaluate_digits(false);
                }
            }
        }
    }

    /// Call-waiting and caller-id toggles only last for one call
    pub(crate) fn restore_idle_features(&mut self) {
        self.ep.hidecallerid = false;
        if self.ep.config.callwaiting && !self.ep.callwaiting {
            info!("Enabling call waiting on {}", self.ep.full_name());
            self.ep.callwaiting = true;
        }
    }

    /// Light or clear the message-waiting lamp
    pub(crate) fn update_message_waiting(&mut self) {
        if self.core.dialplan.has_voicemail(&self.ep.config.mailbox) {
            self.notify_request("L/vmwi(+)");
        } else {
            self.notify_request("L/vmwi(-)");
        }
    }

    /// RSIP for one endpoint
    pub(crate) fn handle_restart(&mut self, transaction_id: TransactionId, request: &MgcpMessage) {
        if is_keepalive(request) {
            self.respond(transaction_id, ResponseCode::OK, "OK");
            return;
        }

        info!("Resetting interface {}", self.ep.full_name());
        let dropped = self.gateway.outstanding.lock().remove_endpoint(self.handle);
        if dropped > 0 {
            debug!("Dropped {} outstanding messages for {}", dropped, self.ep.full_name());
        }
        self.ep.clear_queues();
        self.queue_hangup(self.ep.master, HangupCause::Restart);

        self.respond(transaction_id, ResponseCode::OK, "OK");
        self.notify_request("");
        self.audit_endpoint();
    }
}

fn is_digit_event(event: &str) -> bool {
    let mut chars = event.chars();
    match (chars.next(), chars.next()) {
        (Some(c), None) => c.is_ascii_digit() || matches!(c, '*' | '#' | 'A'..='D'),
        _ => false,
    }
}

/// RSIP addressed to every endpoint of a gateway
pub(crate) fn restart_gateway(
    core: &AgentCore,
    gateway: &Arc<Gateway>,
    transaction_id: TransactionId,
    request: &MgcpMessage,
) {
    if !is_keepalive(request) {
        info!("Resetting all endpoints of gateway '{}'", gateway.name());
        gateway.outstanding.lock().clear();

        for handle in gateway.endpoints() {
            let mut ep = handle.lock();
            ep.clear_queues();
            for index in 0..SUBCHANNELS {
                if let Some(leg) = ep.subs[index].owner {
                    core.emit(CallEvent::Hangup {
                        leg,
                        cause: HangupCause::Restart,
                    });
                }
            }
        }
    }
    core.send_response(gateway, transaction_id, ResponseCode::OK, "OK");
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_observed_events_strip_packages() {
        let message = MgcpMessage::parse(b"NTFY 10 aaln/1@gw MGCP 1.0\r\nX: 1\r\nO: L/hd, D/5 ,l/hf\r\n");
        assert_eq!(observed_events(&message), vec!["hd", "5", "hf"]);
    }

    #[test]
    fn test_keepalive_detection() {
        let keepalive = MgcpMessage::parse(b"RSIP 1 aaln/1@gw MGCP 1.0\r\nRM: x-KeepAlive\r\n");
        assert!(is_keepalive(&keepalive));
        let restart = MgcpMessage::parse(b"RSIP 1 aaln/1@gw MGCP 1.0\r\nRM: restart\r\n");
        assert!(!is_keepalive(&restart));
    }

    #[test]
    fn test_digit_events() {
        assert!(is_digit_event("5"));
        assert!(is_digit_event("#"));
        assert!(is_digit_event("A"));
        assert!(!is_digit_event("hd"));
        assert!(!is_digit_event("T"));
        assert!(!is_digit_event(""));
    }
}
