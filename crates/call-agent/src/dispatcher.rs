//! Datagram classification and routing
//!
//! A message whose verb and identifier are both numeric is a response and is
//! matched against the outstanding queue of the gateway it came from, or of
//! a gateway at the same IP when the port differs. Everything else is
//! a request: it is first checked against the response cache, then routed to
//! the addressed endpoint (or to the whole gateway for a wildcard RSIP).

use std::net::SocketAddr;
use std::str::FromStr;
use std::sync::Arc;

use mgcp_core::{MessageKind, MgcpMessage, ResponseCode, TransactionId, Verb};
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::agent::AgentCore;
use crate::logging::TRACE_TARGET;
use crate::registry::Gateway;
use crate::state::notify::restart_gateway;
use crate::state::EndpointSession;
use crate::transaction::OutstandingMessage;

impl AgentCore {
    /// Parse and dispatch one datagram
    pub(crate) fn handle_datagram(&self, data: &[u8], source: SocketAddr) {
        let message = MgcpMessage::parse(data);
        self.dispatch(&message, data, source);
    }

    /// Dispatch an already parsed datagram
    pub(crate) fn dispatch(&self, message: &MgcpMessage, raw: &[u8], source: SocketAddr) {
        if self.is_tracing() {
            info!(
                target: TRACE_TARGET,
                "MGCP packet received from {}:\n{}",
                source,
                String::from_utf8_lossy(raw)
            );
        }

        if message.header_count() == 0 {
            warn!("Dropping malformed message from {}", source);
            return;
        }

        match message.kind() {
            MessageKind::Response {
                code,
                transaction_id,
            } => self.dispatch_response(message, code, transaction_id, source),
            MessageKind::Request => self.dispatch_request(message, source),
        }
    }

    fn dispatch_response(
        &self,
        message: &MgcpMessage,
        code: ResponseCode,
        transaction_id: TransactionId,
        source: SocketAddr,
    ) {
        if code.is_provisional() {
            debug!("Provisional response {} for transaction {}", code, transaction_id);
            return;
        }

        let Some((gateway, outstanding)) = self.take_outstanding(source, transaction_id) else {
            info!(
                "Got response back from {} for transaction {} we aren't sending?",
                source, transaction_id
            );
            return;
        };

        let handle = outstanding.endpoint;
        let delete = {
            let mut ep = handle.lock();
            EndpointSession::new(self, &gateway, &handle, &mut ep).handle_response(
                outstanding.sub,
                transaction_id,
                code,
                Some(message),
            );
            ep.delete
        };
        if delete {
            self.reap(&gateway);
        }
    }

    /// Find the request a response answers: first on the gateway at
    /// `source`, then on any gateway at the same IP answering from another
    /// port
    fn take_outstanding(
        &self,
        source: SocketAddr,
        transaction_id: TransactionId,
    ) -> Option<(Arc<Gateway>, OutstandingMessage)> {
        let exact = self.registry.by_address(source);
        if let Some(gateway) = &exact {
            if let Some(outstanding) = gateway.outstanding.lock().take(transaction_id) {
                return Some((gateway.clone(), outstanding));
            }
        }

        self.registry
            .gateways()
            .into_iter()
            .filter(|g| g.address().is_some_and(|a| a.ip() == source.ip()))
            .filter(|g| !exact.as_ref().is_some_and(|e| Arc::ptr_eq(e, g)))
            .find_map(|gateway| {
                let outstanding = gateway.outstanding.lock().take(transaction_id)?;
                debug!(
                    "Gateway '{}' answered transaction {} from {}",
                    gateway.name(),
                    transaction_id,
                    source
                );
                Some((gateway, outstanding))
            })
    }

    fn dispatch_request(&self, message: &MgcpMessage, source: SocketAddr) {
        let Some(transaction_id) = message.transaction_id() else {
            warn!(
                "Dropping request with invalid transaction id '{}' from {}",
                message.identifier, source
            );
            return;
        };

        let Some((gateway, local)) = self.registry.resolve(&message.endpoint, Some(source)) else {
            info!("Unknown endpoint '{}' from {}, dropping", message.endpoint, source);
            return;
        };
        gateway.learn_address(source);

        let cached = gateway
            .responses
            .lock()
            .lookup(transaction_id, Instant::now());
        if let Some(response) = cached {
            debug!(
                "Resending cached response for transaction {} to {}",
                transaction_id, source
            );
            self.send_raw(&response, source);
            return;
        }

        let verb = Verb::from_str(&message.verb).ok();
        if gateway.is_wildcard(&local) {
            if verb == Some(Verb::Rsip) {
                restart_gateway(self, &gateway, transaction_id, message);
            } else {
                debug!("Ignoring {} on wildcard endpoint {}", message.verb, message.endpoint);
            }
            return;
        }

        let Some(handle) = gateway.endpoint(&local) else {
            info!("Unknown endpoint '{}' on gateway '{}', dropping", local, gateway.name());
            return;
        };

        let delete = {
            let mut ep = handle.lock();
            let mut session = EndpointSession::new(self, &gateway, &handle, &mut ep);
            match verb {
                Some(Verb::Ntfy) => session.handle_notify(transaction_id, message),
                Some(Verb::Rsip) => session.handle_restart(transaction_id, message),
                _ => {
                    warn!("Unknown verb '{}' received from {}", message.verb, source);
                    self.send_response(
                        &gateway,
                        transaction_id,
                        ResponseCode::UNKNOWN_VERB,
                        "Unknown verb",
                    );
                }
            }
            ep.delete
        };
        if delete {
            self.reap(&gateway);
        }
    }
}
