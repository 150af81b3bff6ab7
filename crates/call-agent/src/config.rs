//! Call agent configuration
//!
//! Configuration is read from TOML:
//!
//! ```toml
//! [general]
//! bind_addr = "0.0.0.0:2727"
//! external_ip = "192.0.2.1"
//! codecs = ["PCMU", "PCMA"]
//!
//! [[gateway]]
//! name = "gw1.example.net"
//! host = "192.0.2.20"
//!
//! [[gateway.endpoint]]
//! name = "aaln/1"
//! context = "local"
//! callwaiting = true
//! transfer = true
//! ```
//!
//! Every field has a default, so a gateway entry only needs a name, a host
//! (or `dynamic = true`) and its endpoints.

use std::net::{IpAddr, SocketAddr};
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use mgcp_core::{CodecSet, DEFAULT_CALL_AGENT_PORT, DEFAULT_GATEWAY_PORT};

use crate::errors::{AgentError, AgentResult};

/// Top-level call agent configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AgentConfig {
    #[serde(default)]
    pub general: GeneralConfig,

    #[serde(default, rename = "gateway")]
    pub gateways: Vec<GatewayConfig>,
}

/// Process-wide settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GeneralConfig {
    /// Address the call agent socket binds to
    pub bind_addr: SocketAddr,
    /// Address advertised in SDP instead of the media layer's own address
    pub external_ip: Option<IpAddr>,
    /// Local codec capability, most preferred first
    pub codecs: Vec<String>,
    /// Offer RFC 2833 telephone events to endpoints that use them
    pub dtmf_via_rtp: bool,
    /// Log every datagram from startup
    pub trace: bool,
    pub first_digit_timeout_ms: u64,
    pub inter_digit_timeout_ms: u64,
    pub match_digit_timeout_ms: u64,
}

impl Default for GeneralConfig {
    fn default() -> Self {
        Self {
            bind_addr: SocketAddr::from(([0, 0, 0, 0], DEFAULT_CALL_AGENT_PORT)),
            external_ip: None,
            codecs: vec!["PCMU".to_string(), "PCMA".to_string()],
            dtmf_via_rtp: true,
            trace: false,
            first_digit_timeout_ms: 16_000,
            inter_digit_timeout_ms: 8_000,
            match_digit_timeout_ms: 3_000,
        }
    }
}

impl GeneralConfig {
    /// The configured codec list as a codec set
    pub fn codec_set(&self) -> AgentResult<CodecSet> {
        let set = CodecSet::from_names(&self.codecs)?;
        if set.is_empty() {
            return Err(AgentError::Config("at least one codec must be enabled".to_string()));
        }
        Ok(set)
    }

    pub fn digit_timeouts(&self) -> DigitTimeouts {
        DigitTimeouts {
            first: Duration::from_millis(self.first_digit_timeout_ms),
            inter: Duration::from_millis(self.inter_digit_timeout_ms),
            matching: Duration::from_millis(self.match_digit_timeout_ms),
        }
    }
}

/// Timeouts used while collecting dialed digits
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DigitTimeouts {
    /// Before the first digit
    pub first: Duration,
    /// Between digits
    pub inter: Duration,
    /// After an exact match that could still grow
    pub matching: Duration,
}

/// One media gateway
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GatewayConfig {
    /// Domain part of the endpoint names, e.g. `gw1.example.net`
    pub name: String,
    /// Address or host name of the gateway; absent for dynamic gateways
    #[serde(default)]
    pub host: Option<String>,
    /// Learn the gateway address from the requests it sends
    #[serde(default)]
    pub dynamic: bool,
    #[serde(default = "default_gateway_port")]
    pub port: u16,
    /// Local name that addresses every endpoint on the gateway
    #[serde(default = "default_wildcard")]
    pub wildcard_endpoint: String,
    #[serde(default, rename = "endpoint")]
    pub endpoints: Vec<EndpointConfig>,
}

fn default_gateway_port() -> u16 {
    DEFAULT_GATEWAY_PORT
}

fn default_wildcard() -> String {
    "*".to_string()
}

impl GatewayConfig {
    /// A gateway reachable at a fixed host
    pub fn new(name: impl Into<String>, host: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            host: Some(host.into()),
            dynamic: false,
            port: DEFAULT_GATEWAY_PORT,
            wildcard_endpoint: default_wildcard(),
            endpoints: Vec::new(),
        }
    }

    /// A gateway whose address is learned from its first request
    pub fn dynamic(name: impl Into<String>) -> Self {
        Self {
            host: None,
            dynamic: true,
            ..Self::new(name, "")
        }
    }

    pub fn with_port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    pub fn with_endpoint(mut self, endpoint: EndpointConfig) -> Self {
        self.endpoints.push(endpoint);
        self
    }
}

/// How DTMF digits travel for an endpoint
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DtmfMode {
    #[default]
    Rfc2833,
    Inband,
    Hybrid,
    None,
}

impl DtmfMode {
    /// Telephone events are negotiated in SDP
    pub fn uses_rfc2833(&self) -> bool {
        matches!(self, DtmfMode::Rfc2833 | DtmfMode::Hybrid)
    }

    /// Digits are carried in the audio stream
    pub fn uses_inband(&self) -> bool {
        matches!(self, DtmfMode::Inband | DtmfMode::Hybrid)
    }
}

/// One line on a gateway
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EndpointConfig {
    /// Local endpoint name, e.g. `aaln/1`
    pub name: String,
    /// Dialplan context for calls placed from this line
    pub context: String,
    pub dtmf_mode: DtmfMode,
    pub callwaiting: bool,
    pub threewaycalling: bool,
    pub transfer: bool,
    pub cancallforward: bool,
    pub callreturn: bool,
    /// Send every command through one queue
    pub slowsequence: bool,
    /// Start the dialplan at `s` on off-hook instead of collecting digits
    pub immediate: bool,
    /// PacketCable NCS profile
    pub ncs: bool,
    pub cid_num: String,
    pub cid_name: String,
    pub mailbox: String,
}

impl Default for EndpointConfig {
    fn default() -> Self {
        Self {
            name: String::new(),
            context: "default".to_string(),
            dtmf_mode: DtmfMode::default(),
            callwaiting: false,
            threewaycalling: false,
            transfer: false,
            cancallforward: false,
            callreturn: false,
            slowsequence: false,
            immediate: false,
            ncs: false,
            cid_num: String::new(),
            cid_name: String::new(),
            mailbox: String::new(),
        }
    }
}

impl EndpointConfig {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Default::default()
        }
    }

    pub fn with_context(mut self, context: impl Into<String>) -> Self {
        self.context = context.into();
        self
    }

    /// Enable call waiting, transfer and three-way calling together
    pub fn with_calling_features(mut self) -> Self {
        self.callwaiting = true;
        self.transfer = true;
        self.threewaycalling = true;
        self
    }

    pub fn with_caller_id(mut self, number: impl Into<String>, name: impl Into<String>) -> Self {
        self.cid_num = number.into();
        self.cid_name = name.into();
        self
    }
}

impl AgentConfig {
    /// Load and validate a TOML file
    pub fn from_file(path: impl AsRef<Path>) -> AgentResult<Self> {
        let text = std::fs::read_to_string(path.as_ref())?;
        Self::from_toml_str(&text)
    }

    /// Parse and validate TOML text
    pub fn from_toml_str(text: &str) -> AgentResult<Self> {
        let config: AgentConfig =
            toml::from_str(text).map_err(|e| AgentError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn with_bind_addr(mut self, addr: SocketAddr) -> Self {
        self.general.bind_addr = addr;
        self
    }

    pub fn with_external_ip(mut self, ip: IpAddr) -> Self {
        self.general.external_ip = Some(ip);
        self
    }

    pub fn with_codecs<I, S>(mut self, codecs: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.general.codecs = codecs.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_gateway(mut self, gateway: GatewayConfig) -> Self {
        self.gateways.push(gateway);
        self
    }

    /// Reject configurations the registry cannot represent
    pub fn validate(&self) -> AgentResult<()> {
        self.general.codec_set()?;

        let mut seen = std::collections::HashSet::new();
        for gateway in &self.gateways {
            if gateway.name.is_empty() {
                return Err(AgentError::Config("gateway without a name".to_string()));
            }
            if !seen.insert(gateway.name.to_ascii_lowercase()) {
                return Err(AgentError::Config(format!("duplicate gateway '{}'", gateway.name)));
            }
            let has_host = gateway.host.as_deref().map_or(false, |h| !h.is_empty());
            if !gateway.dynamic && !has_host {
                return Err(AgentError::Config(format!(
                    "gateway '{}' needs a host or dynamic = true",
                    gateway.name
                )));
            }

            let mut names = std::collections::HashSet::new();
            for endpoint in &gateway.endpoints {
                if endpoint.name.is_empty() {
                    return Err(AgentError::Config(format!(
                        "endpoint without a name on gateway '{}'",
                        gateway.name
                    )));
                }
                if endpoint.name == gateway.wildcard_endpoint {
                    return Err(AgentError::Config(format!(
                        "endpoint '{}' on '{}' collides with the wildcard name",
                        endpoint.name, gateway.name
                    )));
                }
                if !names.insert(endpoint.name.to_ascii_lowercase()) {
                    return Err(AgentError::Config(format!(
                        "duplicate endpoint '{}' on gateway '{}'",
                        endpoint.name, gateway.name
                    )));
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"
        [general]
        bind_addr = "127.0.0.1:2727"
        codecs = ["PCMA", "PCMU"]

        [[gateway]]
        name = "gw1.example.net"
        host = "10.0.0.5"

        [[gateway.endpoint]]
        name = "aaln/1"
        callwaiting = true
        dtmf_mode = "inband"

        [[gateway.endpoint]]
        name = "aaln/2"
        ncs = true

        [[gateway]]
        name = "dyn"
        dynamic = true
    "#;

    #[test]
    fn test_parse_sample() {
        let config = AgentConfig::from_toml_str(SAMPLE).unwrap();
        assert_eq!(config.gateways.len(), 2);
        let gw = &config.gateways[0];
        assert_eq!(gw.port, DEFAULT_GATEWAY_PORT);
        assert_eq!(gw.wildcard_endpoint, "*");
        assert_eq!(gw.endpoints[0].dtmf_mode, DtmfMode::Inband);
        assert!(gw.endpoints[0].callwaiting);
        assert_eq!(gw.endpoints[1].context, "default");
        assert!(gw.endpoints[1].ncs);
        assert!(config.gateways[1].dynamic);
        assert_eq!(config.general.first_digit_timeout_ms, 16_000);
        assert_eq!(
            config.general.codec_set().unwrap().iter().collect::<Vec<_>>(),
            vec![mgcp_core::Codec::Pcma, mgcp_core::Codec::Pcmu]
        );
    }

    #[test]
    fn test_rejects_gateway_without_host() {
        let err = AgentConfig::from_toml_str("[[gateway]]\nname = \"gw\"\n").unwrap_err();
        assert!(matches!(err, AgentError::Config(_)));
    }

    #[test]
    fn test_rejects_unknown_codec() {
        let config = AgentConfig::default().with_codecs(["opus"]);
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_rejects_duplicate_endpoints() {
        let config = AgentConfig::default().with_gateway(
            GatewayConfig::new("gw", "10.0.0.1")
                .with_endpoint(EndpointConfig::new("aaln/1"))
                .with_endpoint(EndpointConfig::new("AALN/1")),
        );
        assert!(config.validate().is_err());
    }
}
