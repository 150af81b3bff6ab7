//! MGCP return codes
//!
//! Responses carry a three digit code. The call agent only cares about the
//! class of most codes, with a handful of failure codes carrying extra meaning:
//!
//! - **000**: response acknowledgement
//! - **1xx**: provisional, ignored
//! - **2xx**: success
//! - **401 / 402**: the phone is already off hook / on hook
//! - **406**: transaction timed out (also synthesized locally)
//! - **407**: transaction aborted

use std::fmt;

use serde::{Deserialize, Serialize};

/// Class of a response code
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ResponseClass {
    /// `000`
    Acknowledgement,
    /// `1xx`
    Provisional,
    /// `2xx`
    Success,
    /// `4xx`, `5xx` and anything else above 299
    Failure,
}

/// A three digit MGCP response code
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ResponseCode(u16);

impl ResponseCode {
    pub const ACK: ResponseCode = ResponseCode(0);
    pub const OK: ResponseCode = ResponseCode(200);
    pub const ALREADY_OFF_HOOK: ResponseCode = ResponseCode(401);
    pub const ALREADY_ON_HOOK: ResponseCode = ResponseCode(402);
    pub const TIMEOUT: ResponseCode = ResponseCode(406);
    pub const ABORTED: ResponseCode = ResponseCode(407);
    pub const ENDPOINT_UNKNOWN: ResponseCode = ResponseCode(500);
    pub const UNKNOWN_VERB: ResponseCode = ResponseCode(510);

    /// Wrap a numeric code
    pub const fn new(code: u16) -> Self {
        ResponseCode(code)
    }

    /// The numeric value
    pub fn as_u16(&self) -> u16 {
        self.0
    }

    pub fn class(&self) -> ResponseClass {
        match self.0 {
            0 => ResponseClass::Acknowledgement,
            1..=199 => ResponseClass::Provisional,
            200..=299 => ResponseClass::Success,
            _ => ResponseClass::Failure,
        }
    }

    pub fn is_provisional(&self) -> bool {
        self.0 < 200
    }

    pub fn is_success(&self) -> bool {
        self.class() == ResponseClass::Success
    }

    pub fn is_failure(&self) -> bool {
        (400..=599).contains(&self.0)
    }
}

impl From<u16> for ResponseCode {
    fn from(code: u16) -> Self {
        ResponseCode(code)
    }
}

impl fmt::Display for ResponseCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:03}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classes() {
        assert_eq!(ResponseCode::ACK.class(), ResponseClass::Acknowledgement);
        assert_eq!(ResponseCode::new(100).class(), ResponseClass::Provisional);
        assert_eq!(ResponseCode::OK.class(), ResponseClass::Success);
        assert_eq!(ResponseCode::TIMEOUT.class(), ResponseClass::Failure);
        assert!(ResponseCode::ALREADY_ON_HOOK.is_failure());
        assert!(!ResponseCode::new(250).is_failure());
    }

    #[test]
    fn test_display_is_zero_padded() {
        assert_eq!(ResponseCode::ACK.to_string(), "000");
        assert_eq!(ResponseCode::UNKNOWN_VERB.to_string(), "510");
    }
}
