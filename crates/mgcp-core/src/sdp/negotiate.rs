//! Remote media ingest and local SDP generation
//!
//! Ingest needs both a `c=IN IP4 <host>` line and an
//! `m=audio <port> RTP/AVP <payload...>` line. Payload numbers from the media
//! line are mapped to codecs through the static RFC 3551 table and then through
//! any `a=rtpmap:` lines. The negotiated set is the intersection with the
//! local capability, and an empty intersection is an error: media must not be
//! started in that case.
//!
//! Host names in the connection line are returned unresolved as
//! [`MediaHost::Name`]; resolving them is left to the caller so lookups can run
//! away from the protocol worker.

use std::net::{IpAddr, SocketAddr};

use tracing::debug;

use super::codec::{Codec, CodecSet, TELEPHONE_EVENT_MIME, TELEPHONE_EVENT_PAYLOAD};
use crate::error::SdpError;
use crate::message::MgcpMessage;

/// Host part of a remote connection line
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MediaHost {
    Ip(IpAddr),
    Name(String),
}

/// Media parameters offered by the far end
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteMedia {
    pub host: MediaHost,
    pub port: u16,
    /// Codecs in the order the far end listed them, with their payload numbers
    pub payloads: Vec<(Codec, u8)>,
    /// Payload number of telephone-event, when offered
    pub telephone_event: Option<u8>,
}

impl RemoteMedia {
    /// Extract remote media from the SDP lines of a message
    pub fn from_message(message: &MgcpMessage) -> Result<Self, SdpError> {
        let media = message.sdp('m');
        let connection = message.sdp('c');
        if media.is_empty() {
            return Err(SdpError::MissingMedia);
        }
        if connection.is_empty() {
            return Err(SdpError::MissingConnection);
        }

        let host = parse_connection(connection)?;
        let (port, numbers) = parse_media(media)?;

        // Static assignments first, rtpmap lines override
        let mut mapping: Vec<(u8, Option<Codec>, bool)> = numbers
            .iter()
            .map(|pt| (*pt, Codec::from_static_payload(*pt), false))
            .collect();

        for attribute in message.sdp_all('a') {
            let Some((pt, mime)) = parse_rtpmap(attribute) else {
                continue;
            };
            if let Some(entry) = mapping.iter_mut().find(|(n, _, _)| *n == pt) {
                if mime.eq_ignore_ascii_case(TELEPHONE_EVENT_MIME) {
                    entry.1 = None;
                    entry.2 = true;
                } else {
                    entry.1 = Codec::from_mime(mime);
                }
            }
        }

        let mut payloads = Vec::new();
        let mut telephone_event = None;
        for (pt, codec, is_event) in mapping {
            if is_event {
                telephone_event.get_or_insert(pt);
            } else if let Some(codec) = codec {
                if !payloads.iter().any(|(c, _)| *c == codec) {
                    payloads.push((codec, pt));
                }
            }
        }

        debug!(?host, port, ?payloads, ?telephone_event, "Parsed remote media");
        Ok(RemoteMedia {
            host,
            port,
            payloads,
            telephone_event,
        })
    }

    /// Remote codecs as a set
    pub fn codecs(&self) -> CodecSet {
        self.payloads.iter().map(|(c, _)| *c).collect()
    }

    /// Socket address when the host is already a literal address
    pub fn socket_addr(&self) -> Option<SocketAddr> {
        match &self.host {
            MediaHost::Ip(ip) => Some(SocketAddr::new(*ip, self.port)),
            MediaHost::Name(_) => None,
        }
    }
}

fn parse_connection(line: &str) -> Result<MediaHost, SdpError> {
    let mut tokens = line.split_whitespace();
    match (tokens.next(), tokens.next(), tokens.next()) {
        (Some("IN"), Some("IP4"), Some(host)) => Ok(match host.parse::<IpAddr>() {
            Ok(ip) => MediaHost::Ip(ip),
            Err(_) => MediaHost::Name(host.to_string()),
        }),
        _ => Err(SdpError::InvalidConnection(line.to_string())),
    }
}

fn parse_media(line: &str) -> Result<(u16, Vec<u8>), SdpError> {
    let malformed = || SdpError::MalformedMedia(line.to_string());
    let mut tokens = line.split_whitespace();
    if tokens.next() != Some("audio") {
        return Err(malformed());
    }
    let port = tokens
        .next()
        .and_then(|p| p.parse::<u16>().ok())
        .ok_or_else(malformed)?;
    if tokens.next() != Some("RTP/AVP") {
        return Err(malformed());
    }

    let mut payloads = Vec::new();
    for token in tokens {
        match token.parse::<u8>() {
            Ok(pt) => payloads.push(pt),
            Err(_) if !payloads.is_empty() => break,
            Err(_) => return Err(malformed()),
        }
    }
    if payloads.is_empty() {
        return Err(malformed());
    }
    Ok((port, payloads))
}

/// `rtpmap:<pt> <mime>/<rate>[/<channels>]`
fn parse_rtpmap(attribute: &str) -> Option<(u8, &str)> {
    let rest = attribute.strip_prefix("rtpmap:")?.trim_start();
    let mut tokens = rest.split_whitespace();
    let pt = tokens.next()?.parse::<u8>().ok()?;
    let mime = tokens.next()?.split('/').next()?;
    Some((pt, mime))
}

/// Outcome of a successful negotiation
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NegotiatedMedia {
    /// Agreed codecs with the payload numbers to advertise, in local preference order
    pub payloads: Vec<(Codec, u8)>,
    /// Telephone-event payload number, when both sides want RFC 2833
    pub telephone_event: Option<u8>,
}

impl NegotiatedMedia {
    /// Everything the call agent supports, for offers made before any answer
    pub fn local_offer(local: &CodecSet, dtmf_via_rtp: bool) -> Self {
        Self {
            payloads: local.iter().map(|c| (c, c.payload_type())).collect(),
            telephone_event: dtmf_via_rtp.then_some(TELEPHONE_EVENT_PAYLOAD),
        }
    }

    pub fn codecs(&self) -> CodecSet {
        self.payloads.iter().map(|(c, _)| *c).collect()
    }
}

/// Intersect the remote offer with the local capability
pub fn negotiate(
    local: &CodecSet,
    dtmf_via_rtp: bool,
    remote: &RemoteMedia,
) -> Result<NegotiatedMedia, SdpError> {
    let payloads: Vec<(Codec, u8)> = local
        .iter()
        .filter_map(|codec| {
            remote
                .payloads
                .iter()
                .find(|(c, _)| *c == codec)
                .map(|(c, pt)| (*c, *pt))
        })
        .collect();

    debug!(
        "Capabilities: us - {}, them - {}, combined - {}",
        local,
        remote.codecs(),
        payloads.iter().map(|(c, _)| *c).collect::<CodecSet>()
    );

    if payloads.is_empty() {
        return Err(SdpError::NoCompatibleCodecs);
    }

    Ok(NegotiatedMedia {
        payloads,
        telephone_event: if dtmf_via_rtp { remote.telephone_event } else { None },
    })
}

/// Build the SDP body advertising `local` as the media address
pub fn build_sdp(local: SocketAddr, media: &NegotiatedMedia, session_id: u32) -> Vec<String> {
    let ip = local.ip();
    let mut numbers = String::new();
    let mut attributes = Vec::new();

    for (codec, pt) in &media.payloads {
        numbers.push_str(&format!(" {}", pt));
        attributes.push(format!("a=rtpmap:{} {}/8000", pt, codec.mime_subtype()));
    }
    if let Some(pt) = media.telephone_event {
        numbers.push_str(&format!(" {}", pt));
        attributes.push(format!("a=rtpmap:{} {}/8000", pt, TELEPHONE_EVENT_MIME));
        attributes.push(format!("a=fmtp:{} 0-16", pt));
    }

    let mut lines = vec![
        "v=0".to_string(),
        format!("o=root {} {} IN IP4 {}", session_id, session_id, ip),
        "s=session".to_string(),
        format!("c=IN IP4 {}", ip),
        "t=0 0".to_string(),
        format!("m=audio {} RTP/AVP{}", local.port(), numbers),
    ];
    lines.extend(attributes);
    lines
}
