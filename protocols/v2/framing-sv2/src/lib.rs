//! # Sv2 framing
//!
//! The two headers that delimit Sv2 traffic on the wire:
//!
//! - [`Header`]: the 6-byte plaintext header of a logical Sv2 message
//!   (`extension_type:u16 | msg_type:u8 | msg_length:u24`, all little
//!   endian). One message may span several noise frames.
//! - [`NoiseHeader`]: the 3-byte `u24` little-endian length prefix of an
//!   encrypted noise frame. The length counts ciphertext bytes, MAC
//!   included.

pub mod header;

pub use header::{Header, NoiseHeader};

use core::fmt;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Error {
    /// The buffer is too short to contain a header; holds how many bytes
    /// are missing.
    MissingBytes(usize),
    /// A declared message length exceeds what a `u24` can express.
    BinarySv2(binary_sv2::Error),
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::MissingBytes(n) => write!(f, "missing {} bytes", n),
            Error::BinarySv2(e) => write!(f, "binary codec error: {}", e),
        }
    }
}

impl std::error::Error for Error {}

impl From<binary_sv2::Error> for Error {
    fn from(e: binary_sv2::Error) -> Self {
        Error::BinarySv2(e)
    }
}
