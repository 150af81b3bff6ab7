//! Gateway, endpoint and subchannel directory
//!
//! The registry maps gateway names to [`Gateway`]s. Each gateway owns its
//! endpoints, one outstanding-message queue and one response cache. Endpoint
//! state lives behind its own mutex inside an [`EndpointHandle`].
//!
//! ## Lock order
//!
//! registry map → gateway endpoint list → endpoint state → gateway
//! outstanding queue / response cache / address. Code holding an endpoint
//! lock never touches a gateway's endpoint list or the registry map, and the
//! retransmission path releases the outstanding queue before locking an
//! endpoint.

pub mod endpoint;

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use parking_lot::{Mutex, MutexGuard, RwLock};
use serde::Serialize;
use tracing::info;

use mgcp_core::ConnectionMode;

pub use endpoint::{Endpoint, HookState, LegState, Subchannel, MAX_EXTENSION_LEN, SUBCHANNELS};

use crate::interface::CallLegId;
use crate::transaction::{OutstandingQueue, ResponseCache};

/// Shared handle to one endpoint's state
#[derive(Debug)]
pub struct EndpointHandle {
    name: String,
    gateway: String,
    state: Mutex<Endpoint>,
}

impl EndpointHandle {
    pub fn new(endpoint: Endpoint) -> Arc<Self> {
        Arc::new(Self {
            name: endpoint.name.clone(),
            gateway: endpoint.gateway.clone(),
            state: Mutex::new(endpoint),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn full_name(&self) -> String {
        format!("{}@{}", self.name, self.gateway)
    }

    pub fn lock(&self) -> MutexGuard<'_, Endpoint> {
        self.state.lock()
    }
}

/// A media gateway peer
#[derive(Debug)]
pub struct Gateway {
    name: String,
    dynamic: bool,
    wildcard: String,
    address: RwLock<Option<SocketAddr>>,
    endpoints: RwLock<Vec<Arc<EndpointHandle>>>,
    pub(crate) outstanding: Mutex<OutstandingQueue>,
    pub(crate) responses: Mutex<ResponseCache>,
    delete: AtomicBool,
}

impl Gateway {
    pub fn new(
        name: impl Into<String>,
        address: Option<SocketAddr>,
        dynamic: bool,
        wildcard: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            dynamic,
            wildcard: wildcard.into(),
            address: RwLock::new(address),
            endpoints: RwLock::new(Vec::new()),
            outstanding: Mutex::new(OutstandingQueue::default()),
            responses: Mutex::new(ResponseCache::default()),
            delete: AtomicBool::new(false),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn is_dynamic(&self) -> bool {
        self.dynamic
    }

    pub fn address(&self) -> Option<SocketAddr> {
        *self.address.read()
    }

    pub fn set_address(&self, addr: Option<SocketAddr>) {
        *self.address.write() = addr;
    }

    /// Record where a dynamic gateway is talking from
    pub fn learn_address(&self, source: SocketAddr) {
        if !self.dynamic {
            return;
        }
        let mut address = self.address.write();
        if *address != Some(source) {
            info!("Registered MGCP gateway '{}' at {}", self.name, source);
            *address = Some(source);
        }
    }

    /// The local part addresses every endpoint of the gateway
    pub fn is_wildcard(&self, local: &str) -> bool {
        local == self.wildcard || local.ends_with('*')
    }

    pub fn endpoints(&self) -> Vec<Arc<EndpointHandle>> {
        self.endpoints.read().clone()
    }

    /// Case-insensitive lookup by local name
    pub fn endpoint(&self, name: &str) -> Option<Arc<EndpointHandle>> {
        self.endpoints
            .read()
            .iter()
            .find(|e| e.name.eq_ignore_ascii_case(name))
            .cloned()
    }

    pub fn add_endpoint(&self, endpoint: Arc<EndpointHandle>) {
        self.endpoints.write().push(endpoint);
    }

    /// Drop endpoints that were removed from configuration and have gone idle
    ///
    /// Returns the handles removed.
    pub fn prune_deleted(&self) -> Vec<Arc<EndpointHandle>> {
        let mut endpoints = self.endpoints.write();
        let mut removed = Vec::new();
        endpoints.retain(|handle| {
            let ep = handle.lock();
            let gone = ep.delete && ep.is_idle();
            if gone {
                removed.push(handle.clone());
            }
            !gone
        });
        removed
    }

    pub fn endpoint_count(&self) -> usize {
        self.endpoints.read().len()
    }

    pub fn mark_delete(&self, delete: bool) {
        self.delete.store(delete, Ordering::Relaxed);
    }

    pub fn is_marked_for_delete(&self) -> bool {
        self.delete.load(Ordering::Relaxed)
    }

    /// Snapshot for the operational surface
    pub fn summary(&self) -> GatewaySummary {
        let endpoints = self
            .endpoints()
            .iter()
            .map(|handle| {
                let ep = handle.lock();
                EndpointSummary {
                    name: ep.name.clone(),
                    context: ep.config.context.clone(),
                    hookstate: ep.hookstate,
                    master: ep.master,
                    digits: ep.dtmf_buf.clone(),
                    subchannels: ep
                        .subs
                        .iter()
                        .map(|s| SubchannelSummary {
                            id: s.id,
                            cxident: s.cxident.clone(),
                            callid: s.callid.clone(),
                            mode: s.mode,
                            owner: s.owner,
                            outgoing: s.outgoing,
                            queued: s.cx_queue.len(),
                        })
                        .collect(),
                    delete: ep.delete,
                }
            })
            .collect();

        GatewaySummary {
            name: self.name.clone(),
            address: self.address(),
            dynamic: self.dynamic,
            outstanding: self.outstanding.lock().len(),
            endpoints,
        }
    }
}

/// Serializable view of a gateway
#[derive(Debug, Clone, Serialize)]
pub struct GatewaySummary {
    pub name: String,
    pub address: Option<SocketAddr>,
    pub dynamic: bool,
    /// Unacknowledged commands
    pub outstanding: usize,
    pub endpoints: Vec<EndpointSummary>,
}

#[derive(Debug, Clone, Serialize)]
pub struct EndpointSummary {
    pub name: String,
    pub context: String,
    pub hookstate: HookState,
    pub master: usize,
    /// Digits collected towards the next extension
    pub digits: String,
    pub subchannels: Vec<SubchannelSummary>,
    pub delete: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct SubchannelSummary {
    pub id: usize,
    pub cxident: String,
    pub callid: String,
    pub mode: ConnectionMode,
    pub owner: Option<CallLegId>,
    pub outgoing: bool,
    pub queued: usize,
}

/// Where a call leg lives
#[derive(Debug, Clone)]
pub struct LegLocation {
    pub gateway: Arc<Gateway>,
    pub endpoint: Arc<EndpointHandle>,
    pub sub: usize,
}

/// Process-wide gateway directory
#[derive(Debug, Default)]
pub struct Registry {
    gateways: RwLock<HashMap<String, Arc<Gateway>>>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, gateway: Arc<Gateway>) {
        self.gateways
            .write()
            .insert(gateway.name.to_ascii_lowercase(), gateway);
    }

    pub fn remove(&self, name: &str) -> Option<Arc<Gateway>> {
        self.gateways.write().remove(&name.to_ascii_lowercase())
    }

    pub fn get(&self, name: &str) -> Option<Arc<Gateway>> {
        self.gateways.read().get(&name.to_ascii_lowercase()).cloned()
    }

    pub fn by_address(&self, addr: SocketAddr) -> Option<Arc<Gateway>> {
        self.gateways
            .read()
            .values()
            .find(|g| g.address() == Some(addr))
            .cloned()
    }

    pub fn gateways(&self) -> Vec<Arc<Gateway>> {
        let mut gateways: Vec<_> = self.gateways.read().values().cloned().collect();
        gateways.sort_by(|a, b| a.name.cmp(&b.name));
        gateways
    }

    pub fn len(&self) -> usize {
        self.gateways.read().len()
    }

    /// Resolve `endpoint@gateway`, falling back to the source address when
    /// the domain is unknown
    pub fn resolve(
        &self,
        full_name: &str,
        source: Option<SocketAddr>,
    ) -> Option<(Arc<Gateway>, String)> {
        let (local, domain) = split_endpoint_name(full_name)?;
        let gateway = self
            .get(domain)
            .or_else(|| source.and_then(|addr| self.by_address(addr)))?;
        Some((gateway, local.to_string()))
    }
}

/// Split `local@domain`, removing brackets around a dotted-IP domain
pub fn split_endpoint_name(full_name: &str) -> Option<(&str, &str)> {
    let (local, domain) = full_name.split_once('@')?;
    let domain = domain.trim_start_matches('[').trim_end_matches(']');
    if local.is_empty() || domain.is_empty() {
        return None;
    }
    Some((local, domain))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::EndpointConfig;
    use mgcp_core::{Codec, CodecSet};

    fn gateway_with_line(name: &str, addr: &str) -> Arc<Gateway> {
        let gw = Arc::new(Gateway::new(name, Some(addr.parse().unwrap()), false, "*"));
        let codecs: CodecSet = [Codec::Pcmu].into_iter().collect();
        gw.add_endpoint(EndpointHandle::new(Endpoint::new(
            name,
            EndpointConfig::new("aaln/1"),
            codecs,
        )));
        gw
    }

    #[test]
    fn test_lookup_by_name_is_case_insensitive() {
        let registry = Registry::new();
        registry.insert(gateway_with_line("GW1.example.net", "10.0.0.5:2427"));

        let (gw, local) = registry.resolve("aaln/1@gw1.EXAMPLE.net", None).unwrap();
        assert_eq!(gw.name(), "GW1.example.net");
        assert!(gw.endpoint(&local).is_some());
        assert!(gw.endpoint("AALN/1").is_some());
    }

    #[test]
    fn test_lookup_falls_back_to_source_address() {
        let registry = Registry::new();
        registry.insert(gateway_with_line("gw1", "10.0.0.5:2427"));
        let source: SocketAddr = "10.0.0.5:2427".parse().unwrap();

        let (gw, _) = registry.resolve("aaln/1@[10.0.0.5]", Some(source)).unwrap();
        assert_eq!(gw.name(), "gw1");
        assert!(registry.resolve("aaln/1@other", None).is_none());
    }

    #[test]
    fn test_dynamic_gateway_learns_address() {
        let gw = Gateway::new("dyn", None, true, "*");
        let source: SocketAddr = "192.0.2.7:2427".parse().unwrap();
        gw.learn_address(source);
        assert_eq!(gw.address(), Some(source));

        let fixed = Gateway::new("fixed", None, false, "*");
        fixed.learn_address(source);
        assert_eq!(fixed.address(), None);
    }

    #[test]
    fn test_wildcard_names() {
        let gw = Gateway::new("gw", None, false, "*");
        assert!(gw.is_wildcard("*"));
        assert!(gw.is_wildcard("aaln/*"));
        assert!(!gw.is_wildcard("aaln/1"));
    }

    #[test]
    fn test_prune_only_idle_deleted_endpoints() {
        let gw = gateway_with_line("gw", "10.0.0.5:2427");
        let handle = gw.endpoint("aaln/1").unwrap();
        handle.lock().delete = true;
        handle.lock().subs[0].owner = Some(CallLegId::new());
        assert!(gw.prune_deleted().is_empty());

        handle.lock().subs[0].owner = None;
        assert_eq!(gw.prune_deleted().len(), 1);
        assert_eq!(gw.endpoint_count(), 0);
    }
}
