//! Response classification and bucket keys.
//!
//! Every outgoing response collapses to a fixed-width [`Key`]: the masked
//! client prefix, the response kind, the class, and — for ordinary answers —
//! the qtype and a hash of the lowercase qname. Responses with equal keys
//! share one token bucket.
//!
//! The qname enters the key as a seeded 32-bit hash rather than as the name
//! itself, keeping keys (and therefore table entries) small and `Copy`. Two
//! names colliding into one bucket is accepted; the seed is per-limiter, so
//! collisions cannot be precomputed off-process.

use ahash::RandomState;
use quell_proto::{Class, Name, ResponseCode, Type};
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};

/// Budget class of a response.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ResponseKind {
    /// An ordinary answer (NOERROR).
    Query,
    /// A name-does-not-exist answer.
    Nxdomain,
    /// Everything else (SERVFAIL, REFUSED, FORMERR, ...).
    Error,
}

impl ResponseKind {
    /// Classifies a response by its rcode.
    #[inline]
    pub fn from_rcode(rcode: ResponseCode) -> Self {
        if rcode.is_success() {
            Self::Query
        } else if rcode.is_nxdomain() {
            Self::Nxdomain
        } else {
            Self::Error
        }
    }

    /// Returns the token used in log lines.
    #[inline]
    pub const fn name(self) -> &'static str {
        match self {
            Self::Query => "query",
            Self::Nxdomain => "NXDOMAIN",
            Self::Error => "error",
        }
    }
}

impl std::fmt::Display for ResponseKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// A client address AND-ed with the configured prefix mask.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub(crate) enum MaskedPrefix {
    V4([u8; 4]),
    V6([u8; 16]),
}

impl MaskedPrefix {
    /// Returns the masked address for display.
    pub(crate) fn addr(&self) -> IpAddr {
        match *self {
            Self::V4(bytes) => IpAddr::V4(Ipv4Addr::from(bytes)),
            Self::V6(bytes) => IpAddr::V6(Ipv6Addr::from(bytes)),
        }
    }

    pub(crate) fn is_v6(&self) -> bool {
        matches!(self, Self::V6(_))
    }
}

/// Returns the IPv4 network mask for a prefix length (0..=32).
#[inline]
pub(crate) fn ipv4_mask(prefix_len: u8) -> u32 {
    if prefix_len == 0 {
        0
    } else {
        u32::MAX << (32 - u32::from(prefix_len))
    }
}

/// Returns the IPv6 network mask for a prefix length (0..=128).
#[inline]
pub(crate) fn ipv6_mask(prefix_len: u8) -> u128 {
    if prefix_len == 0 {
        0
    } else {
        u128::MAX << (128 - u32::from(prefix_len))
    }
}

/// The identity of one rate-limit bucket.
///
/// Keys compare bitwise; equal keys mean the same bucket.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub(crate) struct Key {
    prefix: MaskedPrefix,
    kind: ResponseKind,
    qclass: u16,
    /// Zero for NXDOMAIN and error kinds, which ignore the query type.
    qtype: u16,
    /// Seeded hash of the lowercase wire-form qname; zero when the kind
    /// carries no name.
    name_hash: u32,
}

impl Key {
    /// Builds the bucket key for one response.
    ///
    /// `qname` is the query name for ordinary answers and the closest
    /// enclosing existing ancestor for NXDOMAIN answers (deriving the
    /// ancestor is the caller's job). Error responses ignore both the name
    /// and the qtype, so all errors to one prefix and class share a bucket.
    pub(crate) fn new(
        client: IpAddr,
        qclass: Class,
        qtype: Type,
        qname: Option<&Name>,
        kind: ResponseKind,
        v4_mask: u32,
        v6_mask: u128,
        hasher: &KeyHasher,
    ) -> Self {
        let prefix = match client {
            IpAddr::V4(a) => MaskedPrefix::V4((u32::from(a) & v4_mask).to_be_bytes()),
            IpAddr::V6(a) => MaskedPrefix::V6((u128::from(a) & v6_mask).to_be_bytes()),
        };
        let (qtype, name_hash) = match kind {
            ResponseKind::Query => (
                qtype.to_u16(),
                qname.map_or(0, |n| hasher.name_hash(n)),
            ),
            ResponseKind::Nxdomain => (0, qname.map_or(0, |n| hasher.name_hash(n))),
            ResponseKind::Error => (0, 0),
        };
        Self {
            prefix,
            kind,
            qclass: qclass.to_u16(),
            qtype,
            name_hash,
        }
    }

    #[inline]
    pub(crate) fn kind(&self) -> ResponseKind {
        self.kind
    }

    #[inline]
    pub(crate) fn prefix(&self) -> &MaskedPrefix {
        &self.prefix
    }

    #[inline]
    pub(crate) fn qclass(&self) -> u16 {
        self.qclass
    }

    #[inline]
    pub(crate) fn qtype(&self) -> u16 {
        self.qtype
    }

    /// A placeholder key for vacant arena slots.
    pub(crate) fn vacant() -> Self {
        Self {
            prefix: MaskedPrefix::V4([0; 4]),
            kind: ResponseKind::Query,
            qclass: 0,
            qtype: 0,
            name_hash: 0,
        }
    }
}

/// Per-limiter seeded hasher for names and keys.
///
/// The seed mixes the construction clock with a caller-supplied salt, so two
/// limiter instances built with the same `(now, salt)` pair hash — and
/// therefore bucket — identically. Tests pin both.
pub(crate) struct KeyHasher {
    state: RandomState,
}

impl KeyHasher {
    pub(crate) fn new(now: u64, salt: u64) -> Self {
        Self {
            state: RandomState::with_seeds(
                now,
                salt,
                now.rotate_left(32) ^ 0x9e37_79b9_7f4a_7c15,
                salt.wrapping_mul(0x517c_c1b7_2722_0a95),
            ),
        }
    }

    /// Hashes a qname, case-folded, to its 32-bit key identity.
    pub(crate) fn name_hash(&self, name: &Name) -> u32 {
        let h = self.state.hash_one(name.lowercased().as_wire());
        (h >> 32) as u32 ^ h as u32
    }

    /// Hashes a whole key to its 32-bit table hash.
    pub(crate) fn key_hash(&self, key: &Key) -> u32 {
        let h = self.state.hash_one(key);
        (h >> 32) as u32 ^ h as u32
    }
}
