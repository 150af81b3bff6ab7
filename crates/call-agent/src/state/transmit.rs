//! Outbound request builders

use std::net::SocketAddr;

use chrono::{Datelike, Local, Timelike};
use mgcp_core::sdp::build_sdp;
use mgcp_core::{NegotiatedMedia, Verb};
use tracing::debug;

use super::EndpointSession;
use crate::interface::CallerId;
use crate::registry::endpoint::random_hex8;
use crate::registry::{HookState, LegState};

impl EndpointSession<'_> {
    /// `L:` local connection options advertising the current capability
    fn local_options(&self, prefix: &str) -> String {
        let mut options = prefix.to_string();
        for codec in self.ep.capability.iter() {
            options.push_str(&format!(", a:{}", codec.mime_subtype()));
        }
        options
    }

    /// SDP body for `sub`, pointing at `dest` or at our own media address
    fn local_sdp(&self, sub: usize, dest: Option<SocketAddr>) -> Option<Vec<String>> {
        let settings = self.core.settings.read();
        let s = &self.ep.subs[sub];
        let mut addr = dest.or(s.tmpdest).or(s.media)?;
        if dest.is_none() && s.tmpdest.is_none() {
            if let Some(ip) = settings.external_ip {
                addr.set_ip(ip);
            }
        }
        let telephone_event = settings.dtmf_via_rtp && self.ep.config.dtmf_mode.uses_rfc2833();
        let offer = NegotiatedMedia::local_offer(&self.ep.capability, telephone_event);
        Some(build_sdp(addr, &offer, std::process::id()))
    }

    /// Requested events while off hook
    fn offhook_events(&self, tone: &str) -> &'static str {
        let ends_call = tone.eq_ignore_ascii_case("L/ro")
            || tone.eq_ignore_ascii_case(self.tone("G/cg", "L/cg"));
        let master = &self.ep.subs[self.ep.master];
        let inband = self.ep.config.dtmf_mode.uses_inband();

        if master.owner.is_some() && master.leg_state >= LegState::Ringing && inband {
            "L/hu(N),L/hf(N)"
        } else if !ends_call {
            self.tone("L/hu(N),L/hf(N),D/[0-9#*](N)", "L/hu(N),L/hf(N),L/[0-9#*T](N)")
        } else {
            debug!("No digit events requested while ending the call");
            "L/hu(N),L/hf(N)"
        }
    }

    fn requested_events(&self, tone: &str) -> &'static str {
        match self.ep.hookstate {
            HookState::OnHook => "L/hd(N)",
            HookState::OffHook => self.offhook_events(tone),
        }
    }

    /// CRCX for `sub`, offering our media address
    pub(crate) fn create_connection(&mut self, sub: usize) {
        let sdp = self.local_sdp(sub, None);
        let s = &self.ep.subs[sub];
        let mut request = self
            .request(Verb::Crcx)
            .header("C", &s.callid)
            .header("L", self.local_options("p:20"))
            .header("M", s.mode.as_str())
            .header("X", &s.txident);
        if let Some(lines) = sdp {
            request = request.sdp(lines);
        }
        self.send_command(request, Some(sub));
    }

    /// MDCX carrying an SDP body; deferred until the connection id is known
    pub(crate) fn modify_with_sdp(&mut self, sub: usize, dest: Option<SocketAddr>) {
        if self.ep.subs[sub].cxident.is_empty() {
            let s = &mut self.ep.subs[sub];
            if dest.is_some() {
                s.tmpdest = dest;
            }
            s.pending_modify = true;
            debug!(
                "No connection id yet on {} sub {}, deferring MDCX",
                self.ep.full_name(),
                sub
            );
            return;
        }
        let sdp = self.local_sdp(sub, dest);
        let s = &self.ep.subs[sub];
        let mut request = self
            .request(Verb::Mdcx)
            .header("C", &s.callid)
            .header("L", self.local_options("e:on, s:off, p:20"))
            .header("M", s.mode.as_str())
            .header("X", &s.txident)
            .header("I", &s.cxident);
        if let Some(lines) = sdp {
            request = request.sdp(lines);
        }
        self.send_command(request, Some(sub));
    }

    /// MDCX pushing the current connection mode; deferred until the
    /// connection id is known
    pub(crate) fn modify_connection(&mut self, sub: usize) {
        if self.ep.subs[sub].cxident.is_empty() {
            // Nothing to modify on an idle subchannel
            if !self.ep.subs[sub].callid.is_empty() {
                debug!(
                    "No connection id yet on {} sub {}, deferring MDCX",
                    self.ep.full_name(),
                    sub
                );
                self.ep.subs[sub].pending_modify = true;
            }
            return;
        }
        let s = &self.ep.subs[sub];
        let request = self
            .request(Verb::Mdcx)
            .header("C", &s.callid)
            .header("M", s.mode.as_str())
            .header("X", &s.txident)
            .header("I", &s.cxident)
            .header("R", self.requested_events(""));
        self.send_command(request, Some(sub));
    }

    /// RQNT playing `tone` (empty stops any signal)
    pub(crate) fn notify_request(&mut self, tone: &str) {
        let request = self
            .request(Verb::Rqnt)
            .header("X", &self.ep.rqnt_ident)
            .header("R", self.requested_events(tone))
            .header_if("S", tone);
        self.ep.curtone = tone.to_string();
        self.send_command(request, None);
    }

    /// RQNT playing `tone` with a caller-id display
    pub(crate) fn notify_request_with_callerid(&mut self, tone: &str, caller: Option<&CallerId>) {
        let (number, name) = match caller {
            Some(c) if !c.hidden => (c.number.as_str(), c.name.as_str()),
            _ => ("", ""),
        };
        let now = Local::now();
        let signal = format!(
            "{},L/ci({:02}/{:02}/{:02}/{:02},{},{})",
            tone,
            now.month(),
            now.day(),
            now.hour(),
            now.minute(),
            number,
            name
        );
        self.ep.lastcallerid = number.to_string();

        let request = self
            .request(Verb::Rqnt)
            .header("X", &self.ep.rqnt_ident)
            .header("R", self.requested_events(tone))
            .header("S", signal);
        self.ep.curtone = tone.to_string();
        self.send_command(request, None);
    }

    /// DLCX for `sub`
    pub(crate) fn delete_connection(&mut self, sub: usize) {
        let s = &self.ep.subs[sub];
        debug!(
            "Delete connection {} (callid '{}') on {} sub {}",
            s.cxident,
            s.callid,
            self.ep.full_name(),
            sub
        );
        let request = self
            .request(Verb::Dlcx)
            .header_if("C", &s.callid)
            .header("X", &s.txident)
            .header_if("I", &s.cxident);
        self.send_command(request, Some(sub));
    }

    /// DLCX for a connection no subchannel knows about
    pub(crate) fn delete_stale_connection(&mut self, callid: &str, cxident: &str) {
        debug!(
            "Delete stale connection {} (callid '{}') on {}",
            cxident,
            callid,
            self.ep.full_name()
        );
        let request = self
            .request(Verb::Dlcx)
            .header_if("C", callid)
            .header("I", cxident);
        self.send_command(request, None);
    }

    /// AUEP requesting every auditable parameter
    pub(crate) fn audit_endpoint(&mut self) {
        let request = self.request(Verb::Auep).header("F", "A");
        self.send_command(request, None);
    }

    /// Fresh call id for a new connection on `sub`
    pub(crate) fn new_callid(&mut self, sub: usize) {
        let s = &mut self.ep.subs[sub];
        s.callid = format!("{}{}", random_hex8(), s.txident);
    }
}
