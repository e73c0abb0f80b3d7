use crate::{codec::Reader, Decodable, Encodable, Error};
use core::convert::TryFrom;
use core::fmt;

/// Unsigned 24-bit integer, encoded as 3 little-endian bytes.
///
/// Used for Sv2 message lengths and noise frame lengths.
#[derive(Debug, Default, Copy, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub struct U24(u32);

impl U24 {
    pub const MAX: u32 = 0x00ff_ffff;
}

impl TryFrom<u32> for U24 {
    type Error = Error;

    fn try_from(value: u32) -> Result<Self, Self::Error> {
        if value > Self::MAX {
            return Err(Error::ValueExceedsMaxSize {
                max: Self::MAX as usize,
                actual: value as usize,
            });
        }
        Ok(U24(value))
    }
}

impl From<U24> for u32 {
    fn from(value: U24) -> Self {
        value.0
    }
}

impl Encodable for U24 {
    fn encoded_size(&self) -> usize {
        3
    }
    fn encode(&self, dst: &mut Vec<u8>) {
        dst.extend_from_slice(&self.0.to_le_bytes()[..3]);
    }
}

impl Decodable for U24 {
    fn decode(reader: &mut Reader<'_>) -> Result<Self, Error> {
        Ok(U24(reader.read_u24()?))
    }
}

/// 32-byte value, encoded verbatim. Used for hashes and targets.
#[derive(Debug, Default, Copy, Clone, PartialEq, Eq, Hash)]
pub struct U256([u8; 32]);

impl U256 {
    pub fn to_bytes(self) -> [u8; 32] {
        self.0
    }
}

impl From<[u8; 32]> for U256 {
    fn from(value: [u8; 32]) -> Self {
        U256(value)
    }
}

impl From<U256> for [u8; 32] {
    fn from(value: U256) -> Self {
        value.0
    }
}

impl AsRef<[u8]> for U256 {
    fn as_ref(&self) -> &[u8] {
        &self.0
    }
}

impl fmt::Display for U256 {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for b in self.0.iter().rev() {
            write!(f, "{:02x}", b)?;
        }
        Ok(())
    }
}

impl Encodable for U256 {
    fn encoded_size(&self) -> usize {
        32
    }
    fn encode(&self, dst: &mut Vec<u8>) {
        dst.extend_from_slice(&self.0);
    }
}

impl Decodable for U256 {
    fn decode(reader: &mut Reader<'_>) -> Result<Self, Error> {
        let bytes = reader.read_bytes(32)?;
        let mut inner = [0u8; 32];
        inner.copy_from_slice(bytes);
        Ok(U256(inner))
    }
}
