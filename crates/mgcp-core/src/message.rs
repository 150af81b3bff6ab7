//! Inbound MGCP message parsing
//!
//! An MGCP datagram is a start line, a block of `Name: value` header lines, an
//! optional blank line, and then SDP lines:
//!
//! ```text
//! NTFY 3002 aaln/1@gw1.example.net MGCP 1.0
//! X: 0123abcd
//! O: L/hd
//!
//! v=0
//! ...
//! ```
//!
//! Parsing never fails. Malformed input yields a message with no headers, and
//! the caller must check [`MgcpMessage::header_count`] before using it. Header
//! and SDP lookups return an empty string when nothing matches.

use tracing::{debug, warn};

use crate::types::{ResponseCode, TransactionId};

/// Maximum number of header lines kept, including the start line
pub const MAX_HEADERS: usize = 128;

/// Maximum number of SDP lines kept
pub const MAX_LINES: usize = 128;

/// Largest datagram the codec will produce
pub const MAX_PACKET: usize = 1500;

/// One `Name: value` header line
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Header {
    pub name: String,
    pub value: String,
}

impl Header {
    pub fn new(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            value: value.into(),
        }
    }
}

/// How the dispatcher should treat a parsed message
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MessageKind {
    /// Numeric verb and numeric identifier
    Response {
        code: ResponseCode,
        transaction_id: TransactionId,
    },
    /// Anything else
    Request,
}

/// A parsed MGCP request or response
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MgcpMessage {
    /// Command verb, or the response code for responses
    pub verb: String,
    /// Raw transaction identifier token
    pub identifier: String,
    /// `endpoint@gateway` for requests, first comment word for responses
    pub endpoint: String,
    /// Protocol version (`MGCP 1.0`), empty for responses
    pub version: String,
    start_line: String,
    headers: Vec<Header>,
    lines: Vec<String>,
}

impl MgcpMessage {
    /// Parse a raw datagram
    pub fn parse(data: &[u8]) -> Self {
        let text = String::from_utf8_lossy(data);
        let mut message = MgcpMessage::default();
        let mut raw_lines = text.split('\n').map(|l| l.trim_end_matches('\r'));

        match raw_lines.next() {
            Some(first) if !first.trim().is_empty() => message.start_line = first.to_string(),
            _ => {
                debug!("Discarding message with empty start line");
                return message;
            }
        }

        // Header block runs until the first blank line
        for line in raw_lines.by_ref() {
            if line.is_empty() {
                break;
            }
            if message.headers.len() + 1 >= MAX_HEADERS {
                warn!("Too many MGCP headers, dropping '{}'", line);
                continue;
            }
            let header = match line.split_once(':') {
                Some((name, value)) => Header::new(name.trim(), value.trim()),
                None => Header::new(line.trim(), ""),
            };
            message.headers.push(header);
        }

        for line in raw_lines {
            if line.is_empty() {
                continue;
            }
            if message.lines.len() >= MAX_LINES {
                warn!("Too many SDP lines, dropping '{}'", line);
                continue;
            }
            message.lines.push(line.to_string());
        }

        message.split_start_line();
        debug!(
            verb = %message.verb,
            identifier = %message.identifier,
            endpoint = %message.endpoint,
            version = %message.version,
            "{} headers, {} lines",
            message.header_count(),
            message.lines.len()
        );
        message
    }

    fn split_start_line(&mut self) {
        let mut tokens = self.start_line.split_whitespace();
        self.verb = tokens.next().unwrap_or_default().to_string();
        self.identifier = tokens.next().unwrap_or_default().to_string();
        self.endpoint = tokens.next().unwrap_or_default().to_string();
        self.version = match (tokens.next(), tokens.next()) {
            (Some(name), Some(number)) => format!("{} {}", name, number),
            (Some(name), None) => name.to_string(),
            _ => String::new(),
        };
        let leftover: Vec<&str> = tokens.collect();
        if !leftover.is_empty() {
            debug!("Extra start line content ignored: '{}'", leftover.join(" "));
        }
    }

    /// Number of header lines including the start line; zero means malformed
    pub fn header_count(&self) -> usize {
        if self.start_line.is_empty() {
            0
        } else {
            self.headers.len() + 1
        }
    }

    /// The start line as received
    pub fn start_line(&self) -> &str {
        &self.start_line
    }

    /// Header lines after the start line, in wire order
    pub fn headers(&self) -> &[Header] {
        &self.headers
    }

    /// SDP lines, in wire order
    pub fn sdp_lines(&self) -> &[String] {
        &self.lines
    }

    /// First header with a matching name (case-insensitive), or `""`
    pub fn header(&self, name: &str) -> &str {
        self.headers
            .iter()
            .find(|h| h.name.eq_ignore_ascii_case(name))
            .map(|h| h.value.as_str())
            .unwrap_or("")
    }

    /// Value of the first `<key>=` SDP line, or `""`
    pub fn sdp(&self, key: char) -> &str {
        self.sdp_all(key).next().unwrap_or("")
    }

    /// Values of every `<key>=` SDP line, in order
    pub fn sdp_all(&self, key: char) -> impl Iterator<Item = &str> + '_ {
        self.lines.iter().filter_map(move |line| {
            let mut chars = line.chars();
            match (chars.next(), chars.next()) {
                (Some(k), Some('=')) if k == key => Some(line[2..].trim()),
                _ => None,
            }
        })
    }

    /// Comment text following the identifier on a response line
    pub fn comment(&self) -> &str {
        let mut rest = self.start_line.trim_start();
        for _ in 0..2 {
            rest = match rest.find(char::is_whitespace) {
                Some(idx) => rest[idx..].trim_start(),
                None => "",
            };
        }
        rest
    }

    /// Responses have a numeric verb and a numeric identifier
    pub fn kind(&self) -> MessageKind {
        let code = self
            .verb
            .parse::<u16>()
            .ok()
            .filter(|_| self.verb.bytes().all(|b| b.is_ascii_digit()));
        match (code, self.identifier.parse::<TransactionId>()) {
            (Some(code), Ok(transaction_id)) => MessageKind::Response {
                code: ResponseCode::new(code),
                transaction_id,
            },
            _ => MessageKind::Request,
        }
    }

    /// The identifier as a transaction id, when it is numeric
    pub fn transaction_id(&self) -> Option<TransactionId> {
        self.identifier.parse().ok()
    }

    /// Split `endpoint@gateway`; brackets around a dotted-IP gateway are removed
    pub fn endpoint_parts(&self) -> Option<(&str, &str)> {
        let (local, domain) = self.endpoint.split_once('@')?;
        let domain = domain.trim_start_matches('[').trim_end_matches(']');
        Some((local, domain))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const NTFY: &str = "NTFY 3002 aaln/1@[10.0.0.5] MGCP 1.0\r\nX: 0123abcd\r\nO: L/hd\r\n\r\n";

    #[test]
    fn test_parse_request_start_line() {
        let msg = MgcpMessage::parse(NTFY.as_bytes());
        assert_eq!(msg.verb, "NTFY");
        assert_eq!(msg.identifier, "3002");
        assert_eq!(msg.endpoint, "aaln/1@[10.0.0.5]");
        assert_eq!(msg.version, "MGCP 1.0");
        assert_eq!(msg.header_count(), 3);
        assert_eq!(msg.endpoint_parts(), Some(("aaln/1", "10.0.0.5")));
        assert_eq!(msg.kind(), MessageKind::Request);
    }

    #[test]
    fn test_header_lookup_first_match_and_missing() {
        let raw = "RSIP 1 *@gw MGCP 1.0\nRM: restart\nrm: graceful\n";
        let msg = MgcpMessage::parse(raw.as_bytes());
        assert_eq!(msg.header("RM"), "restart");
        assert_eq!(msg.header("X"), "");
    }

    #[test]
    fn test_parse_response_with_sdp() {
        let raw = "200 77 OK\r\nI: 4F2A\r\n\r\nv=0\r\nc=IN IP4 10.0.0.9\r\nm=audio 4000 RTP/AVP 0\r\n";
        let msg = MgcpMessage::parse(raw.as_bytes());
        assert_eq!(
            msg.kind(),
            MessageKind::Response {
                code: ResponseCode::OK,
                transaction_id: TransactionId::new(77)
            }
        );
        assert_eq!(msg.comment(), "OK");
        assert_eq!(msg.header("i"), "4F2A");
        assert_eq!(msg.sdp('c'), "IN IP4 10.0.0.9");
        assert_eq!(msg.sdp_lines().len(), 3);
    }

    #[test]
    fn test_malformed_input_has_no_headers() {
        assert_eq!(MgcpMessage::parse(b"").header_count(), 0);
        assert_eq!(MgcpMessage::parse(b"\r\n\r\nv=0").header_count(), 0);
    }

    #[test]
    fn test_mixed_verb_is_a_request() {
        let msg = MgcpMessage::parse(b"2x0 15 OK\r\n");
        assert_eq!(msg.kind(), MessageKind::Request);
    }
}
