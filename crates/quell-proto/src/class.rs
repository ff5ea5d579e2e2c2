//! DNS record classes.

use num_enum::{IntoPrimitive, TryFromPrimitive};
use serde::{Deserialize, Serialize};
use std::fmt;

/// A standard DNS record class (RFC 1035, RFC 6895).
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, IntoPrimitive, TryFromPrimitive, Serialize, Deserialize,
)]
#[repr(u16)]
pub enum RecordClass {
    /// Internet.
    IN = 1,

    /// CHAOS. Still seen in `version.bind`-style diagnostics.
    CH = 3,

    /// Hesiod.
    HS = 4,

    /// Query class NONE (RFC 2136).
    NONE = 254,

    /// Query class ANY.
    ANY = 255,
}

impl RecordClass {
    /// Returns the numeric value.
    #[inline]
    pub const fn to_u16(self) -> u16 {
        self as u16
    }

    /// Creates a class from its numeric value.
    #[inline]
    pub fn from_u16(value: u16) -> Option<Self> {
        Self::try_from(value).ok()
    }

    /// Returns the presentation name.
    #[inline]
    pub const fn name(self) -> &'static str {
        match self {
            Self::IN => "IN",
            Self::CH => "CH",
            Self::HS => "HS",
            Self::NONE => "NONE",
            Self::ANY => "ANY",
        }
    }
}

impl fmt::Display for RecordClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// A class value that may fall outside the standard registry.
///
/// Rate limiting keys on the class a response actually carried, known or
/// not, so the open representation is the one used at the API surface.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Class {
    /// A registered class.
    Known(RecordClass),
    /// Anything else.
    Unknown(u16),
}

impl Class {
    /// Creates a class from a u16 value.
    #[inline]
    pub fn from_u16(value: u16) -> Self {
        RecordClass::from_u16(value)
            .map(Self::Known)
            .unwrap_or(Self::Unknown(value))
    }

    /// Returns the numeric value.
    #[inline]
    pub const fn to_u16(self) -> u16 {
        match self {
            Self::Known(c) => c.to_u16(),
            Self::Unknown(v) => v,
        }
    }
}

impl From<RecordClass> for Class {
    fn from(c: RecordClass) -> Self {
        Self::Known(c)
    }
}

impl Default for Class {
    fn default() -> Self {
        Self::Known(RecordClass::IN)
    }
}

impl fmt::Display for Class {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Known(c) => write!(f, "{c}"),
            Self::Unknown(v) => write!(f, "CLASS{v}"),
        }
    }
}
