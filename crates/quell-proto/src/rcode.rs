//! DNS response codes.

use num_enum::{IntoPrimitive, TryFromPrimitive};
use serde::{Deserialize, Serialize};
use std::fmt;

/// A DNS header response code (RFC 1035).
///
/// Only the 4-bit header codes are represented; extended (EDNS) codes never
/// reach the response classifier.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, IntoPrimitive, TryFromPrimitive, Serialize, Deserialize,
)]
#[repr(u8)]
pub enum ResponseCode {
    /// No error.
    NoError = 0,

    /// The server could not interpret the query.
    FormErr = 1,

    /// The server failed to process the query.
    ServFail = 2,

    /// The queried name does not exist.
    NXDomain = 3,

    /// The query kind is not supported.
    NotImp = 4,

    /// The query was refused by policy.
    Refused = 5,
}

impl ResponseCode {
    /// Returns the numeric value.
    #[inline]
    pub const fn to_u8(self) -> u8 {
        self as u8
    }

    /// Creates a response code from its 4-bit header value.
    #[inline]
    pub fn from_u8(value: u8) -> Option<Self> {
        Self::try_from(value).ok()
    }

    /// Returns true for NOERROR.
    #[inline]
    pub const fn is_success(self) -> bool {
        matches!(self, Self::NoError)
    }

    /// Returns true for NXDOMAIN.
    #[inline]
    pub const fn is_nxdomain(self) -> bool {
        matches!(self, Self::NXDomain)
    }

    /// Returns the presentation name.
    #[inline]
    pub const fn name(self) -> &'static str {
        match self {
            Self::NoError => "NOERROR",
            Self::FormErr => "FORMERR",
            Self::ServFail => "SERVFAIL",
            Self::NXDomain => "NXDOMAIN",
            Self::NotImp => "NOTIMP",
            Self::Refused => "REFUSED",
        }
    }
}

impl Default for ResponseCode {
    fn default() -> Self {
        Self::NoError
    }
}

impl fmt::Display for ResponseCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}
