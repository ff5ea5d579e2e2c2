//! DNS domain name representation.
//!
//! Names are stored in uncompressed wire format: a sequence of
//! length-prefixed labels ending with the zero-length root label. The type
//! supports the operations a response classifier needs — ancestor walking,
//! case folding, case-insensitive comparison — without carrying the full
//! weight of a message codec.
//!
//! Comparison and hashing are case-insensitive per RFC 1035; two names that
//! differ only in ASCII case are the same name.

use crate::error::{Error, Result};
use crate::{MAX_LABEL_LENGTH, MAX_NAME_LENGTH};
use bytes::Bytes;
use smallvec::SmallVec;
use std::cmp::Ordering;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::str::FromStr;

/// A DNS domain name in uncompressed wire format.
///
/// The stored bytes always include the terminating root label, so the root
/// name is the single byte `00` and `www.example.com.` is
///
/// ```text
/// 03 'w' 'w' 'w' 07 'e' 'x' 'a' 'm' 'p' 'l' 'e' 03 'c' 'o' 'm' 00
/// ```
///
/// Typical names fit in the inline storage; parsing from a shared buffer can
/// keep a zero-copy reference instead.
#[derive(Clone)]
pub struct Name {
    wire: Storage,
    /// Label count including the root label.
    labels: u8,
}

#[derive(Clone)]
enum Storage {
    Inline(SmallVec<[u8; 32]>),
    Shared(Bytes),
}

impl Name {
    /// Returns the root name.
    #[inline]
    pub fn root() -> Self {
        Self {
            wire: Storage::Inline(SmallVec::from_slice(&[0])),
            labels: 1,
        }
    }

    /// Creates a name from uncompressed wire format, sharing the buffer.
    pub fn from_wire(wire: impl Into<Bytes>) -> Result<Self> {
        let bytes = wire.into();
        let labels = validate_wire(&bytes)?;
        Ok(Self {
            wire: Storage::Shared(bytes),
            labels,
        })
    }

    /// Creates a name from uncompressed wire format, copying the bytes.
    pub fn from_slice(slice: &[u8]) -> Result<Self> {
        let labels = validate_wire(slice)?;
        Ok(Self {
            wire: Storage::Inline(SmallVec::from_slice(slice)),
            labels,
        })
    }

    /// Returns the wire-format bytes, including the terminating root label.
    #[inline]
    pub fn as_wire(&self) -> &[u8] {
        match &self.wire {
            Storage::Inline(v) => v.as_slice(),
            Storage::Shared(b) => b.as_ref(),
        }
    }

    /// Returns the wire-format length in bytes.
    #[inline]
    pub fn wire_len(&self) -> usize {
        self.as_wire().len()
    }

    /// Returns the number of labels, including the root label.
    #[inline]
    pub fn label_count(&self) -> usize {
        self.labels as usize
    }

    /// Returns true if this is the root name.
    #[inline]
    pub fn is_root(&self) -> bool {
        self.labels == 1
    }

    /// Returns an iterator over the labels, leftmost first, excluding the
    /// empty root label.
    pub fn labels(&self) -> LabelIter<'_> {
        LabelIter {
            wire: self.as_wire(),
            pos: 0,
        }
    }

    /// Returns the name with its leftmost label removed.
    ///
    /// Returns `None` for the root name.
    pub fn parent(&self) -> Option<Self> {
        if self.is_root() {
            return None;
        }
        let wire = self.as_wire();
        let skip = 1 + wire[0] as usize;
        match &self.wire {
            Storage::Inline(v) => Some(Self {
                wire: Storage::Inline(SmallVec::from_slice(&v[skip..])),
                labels: self.labels - 1,
            }),
            Storage::Shared(b) => Some(Self {
                wire: Storage::Shared(b.slice(skip..)),
                labels: self.labels - 1,
            }),
        }
    }

    /// Returns a copy of this name with all label bytes folded to ASCII
    /// lowercase.
    ///
    /// Length bytes are below `b'A'` so folding the whole wire image is
    /// safe.
    pub fn lowercased(&self) -> Self {
        let mut bytes: SmallVec<[u8; 32]> = SmallVec::from_slice(self.as_wire());
        for b in bytes.iter_mut() {
            *b = b.to_ascii_lowercase();
        }
        Self {
            wire: Storage::Inline(bytes),
            labels: self.labels,
        }
    }

    /// Returns true if `self` equals `ancestor` or lies beneath it.
    pub fn is_subdomain_of(&self, ancestor: &Self) -> bool {
        let mine = self.as_wire();
        let theirs = ancestor.as_wire();
        if theirs.len() > mine.len() {
            return false;
        }
        let tail = &mine[mine.len() - theirs.len()..];
        tail.eq_ignore_ascii_case(theirs)
    }
}

/// Validates wire format and returns the label count (including root).
fn validate_wire(bytes: &[u8]) -> Result<u8> {
    if bytes.is_empty() {
        return Err(Error::TruncatedName { offset: 0 });
    }
    if bytes.len() > MAX_NAME_LENGTH {
        return Err(Error::name_too_long(bytes.len()));
    }

    let mut pos = 0;
    let mut labels = 0u8;
    loop {
        let len = *bytes.get(pos).ok_or(Error::TruncatedName { offset: pos })? as usize;
        labels += 1;
        if len == 0 {
            // Root label must be the final byte.
            if pos + 1 != bytes.len() {
                return Err(Error::EmptyLabel {
                    position: labels as usize - 1,
                });
            }
            return Ok(labels);
        }
        if len >= 0xC0 {
            return Err(Error::CompressionPointer { offset: pos });
        }
        if len > MAX_LABEL_LENGTH {
            return Err(Error::label_too_long(len));
        }
        pos += 1 + len;
        if pos >= bytes.len() {
            return Err(Error::TruncatedName { offset: pos });
        }
    }
}

/// Iterator over a name's labels, excluding the root label.
pub struct LabelIter<'a> {
    wire: &'a [u8],
    pos: usize,
}

impl<'a> Iterator for LabelIter<'a> {
    type Item = &'a [u8];

    fn next(&mut self) -> Option<&'a [u8]> {
        let len = *self.wire.get(self.pos)? as usize;
        if len == 0 {
            return None;
        }
        let start = self.pos + 1;
        self.pos = start + len;
        Some(&self.wire[start..start + len])
    }
}

impl FromStr for Name {
    type Err = Error;

    /// Parses a presentation-format name.
    ///
    /// The trailing dot is optional; `""` and `"."` both denote the root.
    fn from_str(s: &str) -> Result<Self> {
        if s.is_empty() || s == "." {
            return Ok(Self::root());
        }
        let s = s.strip_suffix('.').unwrap_or(s);

        let mut wire: SmallVec<[u8; 32]> = SmallVec::new();
        let mut labels = 1u8; // root
        for label in s.split('.') {
            let bytes = label.as_bytes();
            if bytes.is_empty() {
                return Err(Error::EmptyLabel {
                    position: labels as usize - 1,
                });
            }
            if bytes.len() > MAX_LABEL_LENGTH {
                return Err(Error::label_too_long(bytes.len()));
            }
            for &b in bytes {
                // Graphic ASCII only; escapes are not supported here.
                if !(0x21..=0x7E).contains(&b) {
                    return Err(Error::InvalidPresentationChar { byte: b });
                }
            }
            wire.push(bytes.len() as u8);
            wire.extend_from_slice(bytes);
            labels += 1;
        }
        wire.push(0);
        if wire.len() > MAX_NAME_LENGTH {
            return Err(Error::name_too_long(wire.len()));
        }
        Ok(Self {
            wire: Storage::Inline(wire),
            labels,
        })
    }
}

impl PartialEq for Name {
    fn eq(&self, other: &Self) -> bool {
        self.as_wire().eq_ignore_ascii_case(other.as_wire())
    }
}

impl Eq for Name {}

impl PartialOrd for Name {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Name {
    /// Case-insensitive wire-byte order, consistent with `Eq`. This is not
    /// DNSSEC canonical order; it exists for sorted containers.
    fn cmp(&self, other: &Self) -> Ordering {
        let lhs = self.as_wire().iter().map(u8::to_ascii_lowercase);
        let rhs = other.as_wire().iter().map(u8::to_ascii_lowercase);
        lhs.cmp(rhs)
    }
}

impl Hash for Name {
    fn hash<H: Hasher>(&self, state: &mut H) {
        for &b in self.as_wire() {
            state.write_u8(b.to_ascii_lowercase());
        }
    }
}

impl fmt::Display for Name {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_root() {
            return f.write_str(".");
        }
        for label in self.labels() {
            for &b in label {
                match b {
                    b'.' | b'\\' => write!(f, "\\{}", b as char)?,
                    0x21..=0x7E => write!(f, "{}", b as char)?,
                    _ => write!(f, "\\{b:03}")?,
                }
            }
            f.write_str(".")?;
        }
        Ok(())
    }
}

impl fmt::Debug for Name {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Name({self})")
    }
}
