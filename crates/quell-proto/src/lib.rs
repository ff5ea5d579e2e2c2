//! # quell-proto
//!
//! Minimal DNS value types shared by the quell response rate limiter and
//! its embedding server: domain names, record classes and types, and
//! response codes. This crate deliberately stops short of a message codec —
//! parsing and response synthesis live with the server, not the limiter.

pub mod class;
pub mod error;
pub mod name;
pub mod rcode;
pub mod rtype;

pub use class::{Class, RecordClass};
pub use error::{Error, Result};
pub use name::Name;
pub use rcode::ResponseCode;
pub use rtype::{RecordType, Type};

/// Maximum length of a single label in bytes.
pub const MAX_LABEL_LENGTH: usize = 63;

/// Maximum length of a name in wire format, including the root label.
pub const MAX_NAME_LENGTH: usize = 255;
