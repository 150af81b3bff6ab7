//! Digit collection for locally originated calls
//!
//! After a line goes off hook the endpoint collects dialed digits until the
//! dialplan reports a complete extension, the line dials a feature code, or a
//! timeout expires. Nothing blocks: digits arrive through NTFY and the
//! deadline is checked by the agent's digit ticker.

use tokio::time::Instant;
use tracing::{debug, info};

use super::EndpointSession;
use crate::interface::{CallEvent, CallLegId};
use crate::registry::LegState;

/// Collection state for the leg waiting on digits
#[derive(Debug, Clone)]
pub struct DigitCollector {
    pub leg: CallLegId,
    pub sub: usize,
    pub deadline: Instant,
    /// The next complete extension is the call-forward target
    pub forwarding: bool,
}

impl EndpointSession<'_> {
    /// Arm collection for `leg`, waiting for the first digit
    pub(crate) fn start_collection(&mut self, sub: usize, leg: CallLegId) {
        let first = self.core.settings.read().timeouts.first;
        self.ep.collector = Some(DigitCollector {
            leg,
            sub,
            deadline: Instant::now() + first,
            forwarding: false,
        });
    }

    /// Run the collection step, either because a digit arrived or because
    /// the deadline passed
    pub(crate) fn evaluate_digits(&mut self, timed_out: bool) {
        let Some(collector) = self.ep.collector.clone() else {
            return;
        };
        let timeouts = self.core.settings.read().timeouts;
        let now = Instant::now();

        if !timed_out && !self.ep.curtone.is_empty() {
            self.notify_request("");
        }

        let exten = self.ep.dtmf_buf.clone();
        let context = self.ep.config.context.clone();
        let cid = self.ep.config.cid_num.clone();
        let dialplan = self.core.dialplan.clone();

        let mut deadline = now + timeouts.inter;
        let mut forwarding = collector.forwarding;

        if !exten.is_empty() && dialplan.exists(&context, &exten, &cid) {
            if timed_out || !dialplan.match_more(&context, &exten, &cid) {
                if !forwarding {
                    self.dial(collector.leg, collector.sub, exten);
                    return;
                }
                self.ep.call_forward = exten;
                info!(
                    "Setting call forward to '{}' on {}",
                    self.ep.call_forward,
                    self.ep.full_name()
                );
                self.notify_request("L/sl");
                if !timed_out {
                    self.abandon_collection();
                    return;
                }
                self.ep.dtmf_buf.clear();
                self.notify_request("L/dl");
                forwarding = false;
                deadline = now + timeouts.first;
            } else {
                // Ambiguous: wait a little longer for more digits
                deadline = now + timeouts.matching;
            }
        } else if timed_out {
            debug!("Not enough digits (and no ambiguous match) on {}", self.ep.full_name());
            self.notify_request(self.tone("G/cg", "L/cg"));
            self.abandon_collection();
            return;
        } else if exten == "*70" && self.ep.config.callwaiting && self.ep.callwaiting {
            info!("Disabling call waiting on {}", self.ep.full_name());
            self.ep.callwaiting = false;
            self.feature_accepted();
            deadline = now + timeouts.first;
        } else if exten == "*67" && !self.ep.hidecallerid {
            info!("Disabling caller id on {}", self.ep.full_name());
            self.ep.hidecallerid = true;
            self.feature_accepted();
            deadline = now + timeouts.first;
        } else if exten == "*69" && self.ep.config.callreturn {
            if self.ep.lastcallerid.is_empty() {
                self.notify_request("L/sl");
                self.abandon_collection();
            } else {
                let target = self.ep.lastcallerid.clone();
                self.dial(collector.leg, collector.sub, target);
            }
            return;
        } else if exten == "*78" {
            info!("Enabled DND on {}", self.ep.full_name());
            self.ep.dnd = true;
            forwarding = false;
            self.feature_accepted();
        } else if exten == "*79" {
            info!("Disabled DND on {}", self.ep.full_name());
            self.ep.dnd = false;
            forwarding = false;
            self.feature_accepted();
        } else if exten == "*72" && self.ep.config.cancallforward {
            forwarding = true;
            self.feature_accepted();
        } else if exten == "*73" && self.ep.config.cancallforward {
            info!("Cancelling call forwarding on {}", self.ep.full_name());
            self.ep.call_forward.clear();
            forwarding = false;
            self.feature_accepted();
        } else if exten == "*82" && self.ep.hidecallerid {
            info!("Enabling caller id on {}", self.ep.full_name());
            self.ep.hidecallerid = false;
            self.feature_accepted();
            deadline = now + timeouts.first;
        } else if !dialplan.can_match(&context, &exten, &cid)
            && (!exten.starts_with('*') || exten.len() > 2)
        {
            debug!(
                "Can't match '{}' from '{}' in context {}",
                exten,
                self.ep.config.cid_num,
                context
            );
            self.abandon_collection();
            return;
        }

        if let Some(active) = self.ep.collector.as_mut() {
            active.deadline = deadline;
            active.forwarding = forwarding;
        }
    }

    /// Check the collection deadline
    pub(crate) fn poll_digit_timeout(&mut self, now: Instant) {
        let expired = self
            .ep
            .collector
            .as_ref()
            .is_some_and(|c| c.deadline <= now);
        if expired {
            self.evaluate_digits(true);
        }
    }

    /// Stutter dialtone and start over
    fn feature_accepted(&mut self) {
        self.notify_request("L/sl");
        self.ep.dtmf_buf.clear();
    }

    /// Hand the collected extension to the dialplan
    fn dial(&mut self, leg: CallLegId, sub: usize, exten: String) {
        self.ep.collector = None;
        self.ep.dtmf_buf.clear();
        self.ep.subs[sub].leg_state = LegState::Ring;
        self.emit(CallEvent::StartPbx {
            leg,
            context: self.ep.config.context.clone(),
            exten,
            caller: self.ep.caller_id(),
        });
    }

    /// Give up on the collecting leg and release it
    pub(crate) fn abandon_collection(&mut self) {
        let Some(collector) = self.ep.collector.take() else {
            return;
        };
        self.ep.dtmf_buf.clear();
        self.hangup_sub(collector.sub);
        self.emit(CallEvent::ChannelGone { leg: collector.leg });
    }
}
