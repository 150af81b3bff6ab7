//! Codec table
//!
//! Maps audio codecs to their RTP MIME subtype and payload type. Static payload
//! types follow RFC 3551; codecs without one get the conventional dynamic
//! assignment used when the call agent builds its own offers.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::Error;

/// Payload type offered for RFC 2833 telephone events
pub const TELEPHONE_EVENT_PAYLOAD: u8 = 101;

/// MIME subtype of RFC 2833 telephone events
pub const TELEPHONE_EVENT_MIME: &str = "telephone-event";

/// Audio codecs the call agent can negotiate
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Codec {
    /// G.711 mu-law
    Pcmu,
    /// GSM full rate
    Gsm,
    /// G.723.1
    G723,
    /// G.711 A-law
    Pcma,
    /// G.722
    G722,
    /// G.729
    G729,
    /// G.726 at 32 kbit/s
    G726,
    /// iLBC
    Ilbc,
}

const ALL_CODECS: [Codec; 8] = [
    Codec::Pcmu,
    Codec::Gsm,
    Codec::G723,
    Codec::Pcma,
    Codec::G722,
    Codec::G729,
    Codec::G726,
    Codec::Ilbc,
];

impl Codec {
    /// RTP MIME subtype
    pub fn mime_subtype(&self) -> &'static str {
        match self {
            Codec::Pcmu => "PCMU",
            Codec::Gsm => "GSM",
            Codec::G723 => "G723",
            Codec::Pcma => "PCMA",
            Codec::G722 => "G722",
            Codec::G729 => "G729",
            Codec::G726 => "G726-32",
            Codec::Ilbc => "iLBC",
        }
    }

    /// RFC 3551 static payload type, if the codec has one
    pub fn static_payload(&self) -> Option<u8> {
        match self {
            Codec::Pcmu => Some(0),
            Codec::Gsm => Some(3),
            Codec::G723 => Some(4),
            Codec::Pcma => Some(8),
            Codec::G722 => Some(9),
            Codec::G729 => Some(18),
            Codec::G726 => None,
            Codec::Ilbc => None,
        }
    }

    /// Payload type used in locally built offers
    pub fn payload_type(&self) -> u8 {
        match self {
            Codec::G726 => 2,
            Codec::Ilbc => 97,
            other => other.static_payload().unwrap_or(0),
        }
    }

    pub fn from_static_payload(payload: u8) -> Option<Codec> {
        ALL_CODECS
            .iter()
            .copied()
            .find(|c| c.static_payload() == Some(payload))
    }

    /// Case-insensitive MIME lookup, also accepting common aliases
    pub fn from_mime(name: &str) -> Option<Codec> {
        let lower = name.to_ascii_lowercase();
        let alias = match lower.as_str() {
            "ulaw" | "g711u" => Some(Codec::Pcmu),
            "alaw" | "g711a" => Some(Codec::Pcma),
            "g726" => Some(Codec::G726),
            "g729a" => Some(Codec::G729),
            "g723.1" => Some(Codec::G723),
            _ => None,
        };
        alias.or_else(|| {
            ALL_CODECS
                .iter()
                .copied()
                .find(|c| c.mime_subtype().eq_ignore_ascii_case(name))
        })
    }
}

impl fmt::Display for Codec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.mime_subtype())
    }
}

impl FromStr for Codec {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Codec::from_mime(s).ok_or_else(|| Error::UnknownCodec(s.to_string()))
    }
}

/// Ordered set of codecs, most preferred first
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CodecSet {
    codecs: Vec<Codec>,
}

impl CodecSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build from names, rejecting unknown codecs
    pub fn from_names<I, S>(names: I) -> Result<Self, Error>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut set = CodecSet::new();
        for name in names {
            set.insert(name.as_ref().parse()?);
        }
        Ok(set)
    }

    /// Add a codec unless already present
    pub fn insert(&mut self, codec: Codec) {
        if !self.codecs.contains(&codec) {
            self.codecs.push(codec);
        }
    }

    pub fn contains(&self, codec: Codec) -> bool {
        self.codecs.contains(&codec)
    }

    pub fn is_empty(&self) -> bool {
        self.codecs.is_empty()
    }

    pub fn len(&self) -> usize {
        self.codecs.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = Codec> + '_ {
        self.codecs.iter().copied()
    }

    /// Codecs present in both sets, keeping this set's preference order
    pub fn intersect(&self, other: &CodecSet) -> CodecSet {
        CodecSet {
            codecs: self
                .codecs
                .iter()
                .copied()
                .filter(|c| other.contains(*c))
                .collect(),
        }
    }
}

impl FromIterator<Codec> for CodecSet {
    fn from_iter<T: IntoIterator<Item = Codec>>(iter: T) -> Self {
        let mut set = CodecSet::new();
        for codec in iter {
            set.insert(codec);
        }
        set
    }
}

impl fmt::Display for CodecSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let names: Vec<&str> = self.codecs.iter().map(|c| c.mime_subtype()).collect();
        write!(f, "{{{}}}", names.join(","))
    }
}
