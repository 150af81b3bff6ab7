//! Outbound message serialization
//!
//! Both builders write straight into a single datagram-sized buffer. A header
//! or SDP line that would overflow the header table, the line table or the
//! [`MAX_PACKET`] byte budget poisons the builder, and [`RequestBuilder::build`]
//! reports the first such error instead of emitting a truncated message.
//!
//! ```rust
//! use mgcp_core::{ResponseBuilder, ResponseCode};
//!
//! let bytes = ResponseBuilder::new(ResponseCode::OK, "3002", "OK").build().unwrap();
//! assert_eq!(&bytes[..], b"200 3002 OK\r\n");
//! ```

use std::fmt::Display;
use std::net::Ipv4Addr;

use bytes::Bytes;
use tracing::warn;

use crate::error::{Error, Result};
use crate::message::{MAX_HEADERS, MAX_LINES, MAX_PACKET};
use crate::types::{ResponseCode, TransactionId, Verb};
use crate::PROTOCOL_VERSION;

/// Shared bounded buffer behind both builders
#[derive(Debug, Clone)]
struct MessageBuffer {
    data: String,
    headers: usize,
    lines: usize,
    error: Option<Error>,
}

impl MessageBuffer {
    fn new(start_line: String) -> Self {
        let mut buffer = Self {
            data: String::with_capacity(256),
            headers: 0,
            lines: 0,
            error: None,
        };
        buffer.append(start_line);
        buffer.headers = 1;
        buffer
    }

    fn append(&mut self, text: String) {
        if self.error.is_some() {
            return;
        }
        let needed = self.data.len() + text.len();
        if needed > MAX_PACKET {
            warn!("Out of space in MGCP message buffer ({} > {})", needed, MAX_PACKET);
            self.error = Some(Error::PacketTooLarge {
                needed,
                limit: MAX_PACKET,
            });
            return;
        }
        self.data.push_str(&text);
    }

    fn header(&mut self, name: &str, value: &str) {
        if self.error.is_some() {
            return;
        }
        if self.lines > 0 {
            warn!("Can't add header '{}' after SDP lines", name);
            self.error = Some(Error::TooManyHeaders(self.headers));
            return;
        }
        if self.headers >= MAX_HEADERS {
            warn!("Out of header space, can't add '{}'", name);
            self.error = Some(Error::TooManyHeaders(MAX_HEADERS));
            return;
        }
        self.append(format!("{}: {}\r\n", name, value));
        self.headers += 1;
    }

    fn line(&mut self, line: &str) {
        if self.error.is_some() {
            return;
        }
        if self.lines >= MAX_LINES {
            warn!("Out of line space, can't add '{}'", line);
            self.error = Some(Error::TooManyLines(MAX_LINES));
            return;
        }
        if self.lines == 0 {
            // Blank line separates headers from the body
            self.append("\r\n".to_string());
        }
        self.append(format!("{}\r\n", line));
        self.lines += 1;
    }

    fn finish(self) -> Result<Bytes> {
        match self.error {
            Some(e) => Err(e),
            None => Ok(Bytes::from(self.data)),
        }
    }
}

/// Builder for call-agent originated requests
#[derive(Debug, Clone)]
pub struct RequestBuilder {
    verb: Verb,
    transaction_id: TransactionId,
    buffer: MessageBuffer,
}

impl RequestBuilder {
    /// Start a request addressed to `endpoint@gateway`
    ///
    /// Gateways named by a dotted IPv4 address are written in brackets.
    pub fn new(verb: Verb, transaction_id: TransactionId, endpoint: &str, gateway: &str) -> Self {
        Self::with_profile(verb, transaction_id, endpoint, gateway, false)
    }

    /// Start a request, appending ` NCS 1.0` for NCS-profile endpoints
    pub fn with_profile(
        verb: Verb,
        transaction_id: TransactionId,
        endpoint: &str,
        gateway: &str,
        ncs: bool,
    ) -> Self {
        let domain = if gateway.parse::<Ipv4Addr>().is_ok() {
            format!("[{}]", gateway)
        } else {
            gateway.to_string()
        };
        let start_line = format!(
            "{} {} {}@{} {}{}\r\n",
            verb,
            transaction_id,
            endpoint,
            domain,
            PROTOCOL_VERSION,
            if ncs { " NCS 1.0" } else { "" }
        );
        Self {
            verb,
            transaction_id,
            buffer: MessageBuffer::new(start_line),
        }
    }

    pub fn verb(&self) -> Verb {
        self.verb
    }

    pub fn transaction_id(&self) -> TransactionId {
        self.transaction_id
    }

    /// Append a `Name: value` header
    pub fn header(mut self, name: &str, value: impl AsRef<str>) -> Self {
        self.buffer.header(name, value.as_ref());
        self
    }

    /// Append a header only when the value is non-empty
    pub fn header_if(self, name: &str, value: impl AsRef<str>) -> Self {
        if value.as_ref().is_empty() {
            self
        } else {
            self.header(name, value)
        }
    }

    /// Append one SDP line
    pub fn sdp_line(mut self, line: impl AsRef<str>) -> Self {
        self.buffer.line(line.as_ref());
        self
    }

    /// Append a list of SDP lines
    pub fn sdp<I, S>(mut self, lines: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        for line in lines {
            self.buffer.line(line.as_ref());
        }
        self
    }

    /// Encode the request, or report why it could not be built
    pub fn build(self) -> Result<Bytes> {
        self.buffer.finish()
    }
}

/// Builder for responses to gateway requests and response acknowledgements
#[derive(Debug, Clone)]
pub struct ResponseBuilder {
    buffer: MessageBuffer,
}

impl ResponseBuilder {
    /// Start `CODE IDENTIFIER COMMENT`
    pub fn new(code: ResponseCode, identifier: impl Display, comment: &str) -> Self {
        Self {
            buffer: MessageBuffer::new(format!("{} {} {}\r\n", code, identifier, comment)),
        }
    }

    pub fn header(mut self, name: &str, value: impl AsRef<str>) -> Self {
        self.buffer.header(name, value.as_ref());
        self
    }

    pub fn sdp_line(mut self, line: impl AsRef<str>) -> Self {
        self.buffer.line(line.as_ref());
        self
    }

    pub fn build(self) -> Result<Bytes> {
        self.buffer.finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_line_layout() {
        let bytes = RequestBuilder::new(Verb::Crcx, TransactionId::new(42), "aaln/1", "gw.example.net")
            .header("C", "abc")
            .header("M", "recvonly")
            .build()
            .unwrap();
        assert_eq!(
            &bytes[..],
            b"CRCX 42 aaln/1@gw.example.net MGCP 1.0\r\nC: abc\r\nM: recvonly\r\n"
        );
    }

    #[test]
    fn test_dotted_ip_gateway_gets_brackets_and_ncs_suffix() {
        let bytes = RequestBuilder::with_profile(Verb::Auep, TransactionId::new(7), "aaln/2", "10.1.1.1", true)
            .build()
            .unwrap();
        assert_eq!(&bytes[..], b"AUEP 7 aaln/2@[10.1.1.1] MGCP 1.0 NCS 1.0\r\n");
    }

    #[test]
    fn test_sdp_lines_follow_blank_line() {
        let bytes = RequestBuilder::new(Verb::Mdcx, TransactionId::new(9), "aaln/1", "gw")
            .header("I", "1")
            .sdp(["v=0", "s=session"])
            .build()
            .unwrap();
        assert!(bytes.ends_with(b"I: 1\r\n\r\nv=0\r\ns=session\r\n"));
    }

    #[test]
    fn test_oversized_message_is_rejected_not_truncated() {
        let big = "x".repeat(MAX_PACKET);
        let result = RequestBuilder::new(Verb::Rqnt, TransactionId::new(1), "aaln/1", "gw")
            .header("S", &big)
            .build();
        assert!(matches!(result, Err(Error::PacketTooLarge { .. })));
    }

    #[test]
    fn test_header_table_limit() {
        let mut builder = RequestBuilder::new(Verb::Rqnt, TransactionId::new(1), "a", "g");
        for i in 0..MAX_HEADERS {
            builder = builder.header("Z", i.to_string());
        }
        assert_eq!(builder.build(), Err(Error::TooManyHeaders(MAX_HEADERS)));
    }
}
