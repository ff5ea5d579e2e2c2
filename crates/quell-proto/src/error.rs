//! Error types for DNS value parsing and validation.

use thiserror::Error;

/// Result type alias for protocol value operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors produced while validating or converting DNS values.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum Error {
    /// Label exceeds the 63-byte limit of RFC 1035.
    #[error("label too long: {length} bytes exceeds maximum of 63")]
    LabelTooLong {
        /// Actual label length.
        length: usize,
    },

    /// Name exceeds the 255-byte wire-format limit.
    #[error("name too long: {length} bytes exceeds maximum of 255")]
    NameTooLong {
        /// Actual wire-format length.
        length: usize,
    },

    /// Empty label somewhere other than the root position.
    #[error("empty label at position {position}")]
    EmptyLabel {
        /// Label index within the name.
        position: usize,
    },

    /// A compression pointer inside a stored (uncompressed) name.
    #[error("compression pointer at offset {offset} in stored name")]
    CompressionPointer {
        /// Byte offset of the pointer.
        offset: usize,
    },

    /// Wire data ended before the name was terminated.
    #[error("truncated name: label at offset {offset} overruns the buffer")]
    TruncatedName {
        /// Byte offset of the offending label.
        offset: usize,
    },

    /// Invalid character in a presentation-format name.
    #[error("invalid character {byte:#04x} in presentation name")]
    InvalidPresentationChar {
        /// The offending byte.
        byte: u8,
    },
}

impl Error {
    /// Creates a new `LabelTooLong` error.
    #[inline]
    pub fn label_too_long(length: usize) -> Self {
        Self::LabelTooLong { length }
    }

    /// Creates a new `NameTooLong` error.
    #[inline]
    pub fn name_too_long(length: usize) -> Self {
        Self::NameTooLong { length }
    }
}
