use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::Error;

/// Directionality of a gateway connection, sent in the `M:` header
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionMode {
    SendOnly,
    RecvOnly,
    SendRecv,
    Conference,
    Inactive,
}

impl ConnectionMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            ConnectionMode::SendOnly => "sendonly",
            ConnectionMode::RecvOnly => "recvonly",
            ConnectionMode::SendRecv => "sendrecv",
            ConnectionMode::Conference => "confrnce",
            ConnectionMode::Inactive => "inactive",
        }
    }
}

impl Default for ConnectionMode {
    fn default() -> Self {
        ConnectionMode::Inactive
    }
}

impl fmt::Display for ConnectionMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ConnectionMode {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "sendonly" => Ok(ConnectionMode::SendOnly),
            "recvonly" => Ok(ConnectionMode::RecvOnly),
            "sendrecv" => Ok(ConnectionMode::SendRecv),
            "confrnce" | "conference" => Ok(ConnectionMode::Conference),
            "inactive" => Ok(ConnectionMode::Inactive),
            _ => Err(Error::UnknownConnectionMode(s.to_string())),
        }
    }
}
