use crate::{codec::Reader, Decodable, Encodable, Error};
use core::convert::TryFrom;
use core::fmt;

// The four byte-array flavours only differ in the width of their length
// prefix; the macro keeps the bound checks in one place.
macro_rules! byte_array {
    ($name:ident, $max:expr, $read_len:ident, $write_len:expr, $doc:expr) => {
        #[doc = $doc]
        #[derive(Debug, Default, Clone, PartialEq, Eq)]
        pub struct $name(Vec<u8>);

        impl $name {
            pub const MAX_SIZE: usize = $max;

            pub fn len(&self) -> usize {
                self.0.len()
            }

            pub fn is_empty(&self) -> bool {
                self.0.is_empty()
            }

            pub fn into_vec(self) -> Vec<u8> {
                self.0
            }
        }

        impl TryFrom<Vec<u8>> for $name {
            type Error = Error;

            fn try_from(value: Vec<u8>) -> Result<Self, Self::Error> {
                if value.len() > Self::MAX_SIZE {
                    return Err(Error::ValueExceedsMaxSize {
                        max: Self::MAX_SIZE,
                        actual: value.len(),
                    });
                }
                Ok($name(value))
            }
        }

        impl TryFrom<&[u8]> for $name {
            type Error = Error;

            fn try_from(value: &[u8]) -> Result<Self, Self::Error> {
                value.to_vec().try_into()
            }
        }

        impl AsRef<[u8]> for $name {
            fn as_ref(&self) -> &[u8] {
                &self.0
            }
        }

        impl Encodable for $name {
            fn encoded_size(&self) -> usize {
                $write_len + self.0.len()
            }

            fn encode(&self, dst: &mut Vec<u8>) {
                let len = self.0.len() as u32;
                dst.extend_from_slice(&len.to_le_bytes()[..$write_len]);
                dst.extend_from_slice(&self.0);
            }
        }

        impl Decodable for $name {
            fn decode(reader: &mut Reader<'_>) -> Result<Self, Error> {
                let len = reader.$read_len()? as usize;
                Ok($name(reader.read_bytes(len)?.to_vec()))
            }
        }
    };
}

byte_array!(B0255, 255, read_u8, 1, "Byte array of at most 255 bytes, `u8` length prefix.");
byte_array!(B064K, 65535, read_u16, 2, "Byte array of at most 64 KiB − 1 bytes, `u16` length prefix.");
byte_array!(B016M, 0x00ff_ffff, read_u24, 3, "Byte array of at most 16 MiB − 1 bytes, `u24` length prefix.");

/// String of at most 255 bytes, `u8` length prefix.
///
/// The protocol does not require the content to be UTF-8; [`Str0255::as_utf8_or_hex`]
/// renders it for logs either way.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct Str0255(Vec<u8>);

impl Str0255 {
    pub const MAX_SIZE: usize = 255;

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn as_utf8_or_hex(&self) -> String {
        match core::str::from_utf8(&self.0) {
            Ok(s) => s.to_string(),
            Err(_) => self.0.iter().map(|b| format!("{:02x}", b)).collect(),
        }
    }
}

impl TryFrom<Vec<u8>> for Str0255 {
    type Error = Error;

    fn try_from(value: Vec<u8>) -> Result<Self, Self::Error> {
        if value.len() > Self::MAX_SIZE {
            return Err(Error::ValueExceedsMaxSize {
                max: Self::MAX_SIZE,
                actual: value.len(),
            });
        }
        Ok(Str0255(value))
    }
}

impl TryFrom<&str> for Str0255 {
    type Error = Error;

    fn try_from(value: &str) -> Result<Self, Self::Error> {
        value.as_bytes().to_vec().try_into()
    }
}

impl TryFrom<String> for Str0255 {
    type Error = Error;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.into_bytes().try_into()
    }
}

impl AsRef<[u8]> for Str0255 {
    fn as_ref(&self) -> &[u8] {
        &self.0
    }
}

impl fmt::Display for Str0255 {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_utf8_or_hex())
    }
}

impl Encodable for Str0255 {
    fn encoded_size(&self) -> usize {
        1 + self.0.len()
    }

    fn encode(&self, dst: &mut Vec<u8>) {
        dst.push(self.0.len() as u8);
        dst.extend_from_slice(&self.0);
    }
}

impl Decodable for Str0255 {
    fn decode(reader: &mut Reader<'_>) -> Result<Self, Error> {
        let len = reader.read_u8()? as usize;
        Ok(Str0255(reader.read_bytes(len)?.to_vec()))
    }
}

macro_rules! sequence {
    ($name:ident, $max:expr, $read_len:ident, $write_len:expr, $doc:expr) => {
        #[doc = $doc]
        #[derive(Debug, Default, Clone, PartialEq, Eq)]
        pub struct $name<T>(Vec<T>);

        impl<T> $name<T> {
            pub const MAX_SIZE: usize = $max;

            pub fn new(inner: Vec<T>) -> Result<Self, Error> {
                if inner.len() > Self::MAX_SIZE {
                    return Err(Error::ValueExceedsMaxSize {
                        max: Self::MAX_SIZE,
                        actual: inner.len(),
                    });
                }
                Ok($name(inner))
            }

            pub fn len(&self) -> usize {
                self.0.len()
            }

            pub fn is_empty(&self) -> bool {
                self.0.is_empty()
            }

            pub fn into_inner(self) -> Vec<T> {
                self.0
            }

            pub fn iter(&self) -> core::slice::Iter<'_, T> {
                self.0.iter()
            }
        }

        impl<T> TryFrom<Vec<T>> for $name<T> {
            type Error = Error;

            fn try_from(value: Vec<T>) -> Result<Self, Self::Error> {
                Self::new(value)
            }
        }

        impl<T> AsRef<[T]> for $name<T> {
            fn as_ref(&self) -> &[T] {
                &self.0
            }
        }

        impl<T: Encodable> Encodable for $name<T> {
            fn encoded_size(&self) -> usize {
                $write_len + self.0.iter().map(Encodable::encoded_size).sum::<usize>()
            }

            fn encode(&self, dst: &mut Vec<u8>) {
                let len = self.0.len() as u32;
                dst.extend_from_slice(&len.to_le_bytes()[..$write_len]);
                for item in &self.0 {
                    item.encode(dst);
                }
            }
        }

        impl<T: Decodable> Decodable for $name<T> {
            fn decode(reader: &mut Reader<'_>) -> Result<Self, Error> {
                let len = reader.$read_len()? as usize;
                let mut inner = Vec::with_capacity(len.min(1024));
                for _ in 0..len {
                    inner.push(T::decode(reader)?);
                }
                Ok($name(inner))
            }
        }
    };
}

sequence!(Seq0255, 255, read_u8, 1, "Sequence of at most 255 elements, `u8` count prefix.");
sequence!(Seq064K, 65535, read_u16, 2, "Sequence of at most 64 KiB − 1 elements, `u16` count prefix.");
