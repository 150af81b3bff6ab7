//! Error types for the call agent
//!
//! Failures inside the protocol engine are local and recoverable: they are
//! logged and the affected call leg is failed. [`AgentError`] covers what the
//! public API can report back to a caller.

use thiserror::Error;

use crate::interface::CallLegId;

/// Result type for call agent operations
pub type AgentResult<T> = Result<T, AgentError>;

/// Errors reported by the call agent API
#[derive(Error, Debug)]
pub enum AgentError {
    /// No gateway with this name is configured
    #[error("gateway not found: {0}")]
    GatewayNotFound(String),

    /// No endpoint with this name exists on the gateway
    #[error("endpoint not found: {0}")]
    EndpointNotFound(String),

    /// The call leg is unknown or has already been released
    #[error("call leg not found: {0}")]
    LegNotFound(CallLegId),

    /// The endpoint cannot take another call
    #[error("endpoint busy: {0}")]
    Busy(String),

    /// The requested operation does not apply in the current state
    #[error("invalid state: {0}")]
    InvalidState(String),

    /// Configuration could not be loaded or is inconsistent
    #[error("configuration error: {0}")]
    Config(String),

    /// Protocol codec failure
    #[error("protocol error: {0}")]
    Core(#[from] mgcp_core::Error),

    /// Socket failure
    #[error("transport error: {0}")]
    Transport(#[from] mgcp_transport::Error),

    /// Filesystem failure
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl AgentError {
    /// Whether the error means the request named something that does not exist
    pub fn is_not_found(&self) -> bool {
        matches!(
            self,
            AgentError::GatewayNotFound(_) | AgentError::EndpointNotFound(_) | AgentError::LegNotFound(_)
        )
    }
}

impl From<mgcp_core::SdpError> for AgentError {
    fn from(e: mgcp_core::SdpError) -> Self {
        AgentError::Core(e.into())
    }
}
