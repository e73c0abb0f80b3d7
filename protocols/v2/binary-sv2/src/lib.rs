//! # Binary Sv2 codec
//!
//! Serialization and deserialization of the Sv2 binary format: all integers
//! are little endian, variable length fields carry a length prefix sized to
//! their maximum (`u8` for 255-byte fields, `u16` for 64 KiB fields, `u24`
//! for 16 MiB fields).
//!
//! The [`Encodable`] and [`Decodable`] traits are implemented by every
//! primitive and by every message struct in the subprotocol crates. Decoding
//! is strict: a message whose fields overrun the payload, or that leaves
//! trailing bytes behind, is rejected.

mod codec;
mod datatypes;

pub use codec::{to_bytes, Decodable, Encodable, Reader};
pub use datatypes::{Seq0255, Seq064K, Str0255, B016M, B0255, B064K, U24, U256};

use core::fmt;

/// Decoding and bound-check failures.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Error {
    /// A read would go past the end of the buffer.
    OutOfBound,
    /// A boolean field held a value other than 0 or 1.
    NotABool(u8),
    /// A variable-length value exceeds the maximum its prefix can express.
    ValueExceedsMaxSize { max: usize, actual: usize },
    /// A complete value was decoded but bytes remain in the buffer.
    LeftoverBytes(usize),
    /// An enum field held a discriminant with no defined meaning.
    InvalidDiscriminant(u8),
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::OutOfBound => write!(f, "attempt to read beyond the end of the buffer"),
            Error::NotABool(b) => write!(f, "invalid boolean encoding: {}", b),
            Error::ValueExceedsMaxSize { max, actual } => {
                write!(f, "value of {} bytes exceeds the maximum of {}", actual, max)
            }
            Error::LeftoverBytes(n) => write!(f, "{} bytes left over after decoding", n),
            Error::InvalidDiscriminant(d) => write!(f, "invalid discriminant: {}", d),
        }
    }
}

impl std::error::Error for Error {}
