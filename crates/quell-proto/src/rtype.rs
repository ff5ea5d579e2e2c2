//! DNS record types.

use num_enum::{IntoPrimitive, TryFromPrimitive};
use serde::{Deserialize, Serialize};
use std::fmt;

/// A standard DNS record type.
///
/// Only the types an authoritative responder commonly serves are enumerated;
/// everything else travels as [`Type::Unknown`].
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, IntoPrimitive, TryFromPrimitive, Serialize, Deserialize,
)]
#[repr(u16)]
pub enum RecordType {
    /// IPv4 host address.
    A = 1,
    /// Authoritative name server.
    NS = 2,
    /// Canonical name.
    CNAME = 5,
    /// Start of authority.
    SOA = 6,
    /// Domain name pointer.
    PTR = 12,
    /// Mail exchange.
    MX = 15,
    /// Text strings.
    TXT = 16,
    /// IPv6 host address.
    AAAA = 28,
    /// Service locator.
    SRV = 33,
    /// Delegation signer.
    DS = 43,
    /// DNSSEC signature.
    RRSIG = 46,
    /// DNSSEC key.
    DNSKEY = 48,
    /// Any type (query meta-type).
    ANY = 255,
}

impl RecordType {
    /// Returns the numeric value.
    #[inline]
    pub const fn to_u16(self) -> u16 {
        self as u16
    }

    /// Creates a type from its numeric value.
    #[inline]
    pub fn from_u16(value: u16) -> Option<Self> {
        Self::try_from(value).ok()
    }

    /// Returns the presentation name.
    #[inline]
    pub const fn name(self) -> &'static str {
        match self {
            Self::A => "A",
            Self::NS => "NS",
            Self::CNAME => "CNAME",
            Self::SOA => "SOA",
            Self::PTR => "PTR",
            Self::MX => "MX",
            Self::TXT => "TXT",
            Self::AAAA => "AAAA",
            Self::SRV => "SRV",
            Self::DS => "DS",
            Self::RRSIG => "RRSIG",
            Self::DNSKEY => "DNSKEY",
            Self::ANY => "ANY",
        }
    }
}

impl fmt::Display for RecordType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// A type value that may fall outside the enumerated registry subset.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Type {
    /// A registered type.
    Known(RecordType),
    /// Anything else, in RFC 3597 `TYPEnnn` spirit.
    Unknown(u16),
}

impl Type {
    /// Creates a type from a u16 value.
    #[inline]
    pub fn from_u16(value: u16) -> Self {
        RecordType::from_u16(value)
            .map(Self::Known)
            .unwrap_or(Self::Unknown(value))
    }

    /// Returns the numeric value.
    #[inline]
    pub const fn to_u16(self) -> u16 {
        match self {
            Self::Known(t) => t.to_u16(),
            Self::Unknown(v) => v,
        }
    }
}

impl From<RecordType> for Type {
    fn from(t: RecordType) -> Self {
        Self::Known(t)
    }
}

impl fmt::Display for Type {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Known(t) => write!(f, "{t}"),
            Self::Unknown(v) => write!(f, "TYPE{v}"),
        }
    }
}
