use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::Error;

/// MGCP command verbs
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Verb {
    /// CreateConnection
    Crcx,
    /// ModifyConnection
    Mdcx,
    /// DeleteConnection
    Dlcx,
    /// NotificationRequest
    Rqnt,
    /// Notify
    Ntfy,
    /// AuditEndpoint
    Auep,
    /// AuditConnection
    Aucx,
    /// RestartInProgress
    Rsip,
    /// EndpointConfiguration
    Epcf,
}

impl Verb {
    /// The four-letter token used on the wire
    pub fn as_str(&self) -> &'static str {
        match self {
            Verb::Crcx => "CRCX",
            Verb::Mdcx => "MDCX",
            Verb::Dlcx => "DLCX",
            Verb::Rqnt => "RQNT",
            Verb::Ntfy => "NTFY",
            Verb::Auep => "AUEP",
            Verb::Aucx => "AUCX",
            Verb::Rsip => "RSIP",
            Verb::Epcf => "EPCF",
        }
    }

    /// Whether the verb creates, modifies or deletes a connection
    pub fn is_connection_command(&self) -> bool {
        matches!(self, Verb::Crcx | Verb::Mdcx | Verb::Dlcx)
    }
}

impl fmt::Display for Verb {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Verb {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let verb = match s.to_ascii_uppercase().as_str() {
            "CRCX" => Verb::Crcx,
            "MDCX" => Verb::Mdcx,
            "DLCX" => Verb::Dlcx,
            "RQNT" => Verb::Rqnt,
            "NTFY" => Verb::Ntfy,
            "AUEP" => Verb::Auep,
            "AUCX" => Verb::Aucx,
            "RSIP" => Verb::Rsip,
            "EPCF" => Verb::Epcf,
            _ => return Err(Error::UnknownVerb(s.to_string())),
        };
        Ok(verb)
    }
}
