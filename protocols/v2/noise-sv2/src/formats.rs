//! Operator-facing key encodings.
//!
//! Keys appear in config files and logs as base58-check strings with a
//! 2-byte version prefix (`[1, 0]`), the same encoding the wider Sv2 role
//! ecosystem uses in its configuration files.

use core::{convert::TryFrom, fmt, str::FromStr};

use secp256k1::{Keypair, Secp256k1, SecretKey, XOnlyPublicKey};

#[derive(Debug)]
pub enum KeyError {
    Bs58(bs58::decode::Error),
    Secp256k1(secp256k1::Error),
    /// The version prefix was not `[1, 0]`.
    KeyVersion(u16),
    KeyLength,
}

impl fmt::Display for KeyError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            KeyError::Bs58(e) => write!(f, "base58 decode error: {}", e),
            KeyError::Secp256k1(e) => write!(f, "secp256k1 error: {}", e),
            KeyError::KeyVersion(v) => write!(f, "unknown key version: {}", v),
            KeyError::KeyLength => write!(f, "bad key length"),
        }
    }
}

impl std::error::Error for KeyError {}

impl From<bs58::decode::Error> for KeyError {
    fn from(e: bs58::decode::Error) -> Self {
        KeyError::Bs58(e)
    }
}

impl From<secp256k1::Error> for KeyError {
    fn from(e: secp256k1::Error) -> Self {
        KeyError::Secp256k1(e)
    }
}

/// An x-only public key in its base58-check operator encoding.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct EncodedPublicKey(pub XOnlyPublicKey);

impl FromStr for EncodedPublicKey {
    type Err = KeyError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let decoded = bs58::decode(value).with_check(None).into_vec()?;
        if decoded.len() < 34 {
            return Err(KeyError::KeyLength);
        }
        let version = u16::from_le_bytes([decoded[0], decoded[1]]);
        if version != 1 {
            return Err(KeyError::KeyVersion(version));
        }
        Ok(EncodedPublicKey(XOnlyPublicKey::from_slice(&decoded[2..])?))
    }
}

impl fmt::Display for EncodedPublicKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut raw = [0u8; 34];
        raw[0] = 1;
        raw[2..].copy_from_slice(&self.0.serialize());
        f.write_str(&bs58::encode(&raw).with_check().into_string())
    }
}

impl From<XOnlyPublicKey> for EncodedPublicKey {
    fn from(pk: XOnlyPublicKey) -> Self {
        EncodedPublicKey(pk)
    }
}

impl EncodedPublicKey {
    pub fn into_bytes(self) -> [u8; 32] {
        self.0.serialize()
    }
}

/// A secret key in its base58-check operator encoding (no version prefix,
/// matching the wider ecosystem's secret-key files).
#[derive(Debug, Copy, Clone)]
pub struct EncodedSecretKey(pub SecretKey);

impl FromStr for EncodedSecretKey {
    type Err = KeyError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let decoded = bs58::decode(value).with_check(None).into_vec()?;
        Ok(EncodedSecretKey(SecretKey::from_slice(&decoded)?))
    }
}

impl fmt::Display for EncodedSecretKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(
            &bs58::encode(self.0.secret_bytes())
                .with_check()
                .into_string(),
        )
    }
}

impl EncodedSecretKey {
    pub fn keypair(&self) -> Keypair {
        Keypair::from_secret_key(&Secp256k1::new(), &self.0)
    }
}

impl TryFrom<[u8; 32]> for EncodedSecretKey {
    type Error = KeyError;

    fn try_from(raw: [u8; 32]) -> Result<Self, Self::Error> {
        Ok(EncodedSecretKey(SecretKey::from_slice(&raw)?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::handshake::generate_key;

    #[test]
    fn public_key_round_trip() {
        let pk = generate_key().x_only_public_key().0;
        let encoded = EncodedPublicKey(pk).to_string();
        let decoded: EncodedPublicKey = encoded.parse().unwrap();
        assert_eq!(decoded.0, pk);
    }

    #[test]
    fn secret_key_round_trip() {
        let kp = generate_key();
        let encoded = EncodedSecretKey(kp.secret_key()).to_string();
        let decoded: EncodedSecretKey = encoded.parse().unwrap();
        assert_eq!(decoded.0, kp.secret_key());
    }

    #[test]
    fn wrong_version_prefix_is_rejected() {
        let pk = generate_key().x_only_public_key().0;
        let mut raw = [0u8; 34];
        raw[0] = 2;
        raw[2..].copy_from_slice(&pk.serialize());
        let bogus = bs58::encode(&raw).with_check().into_string();
        assert!(matches!(
            bogus.parse::<EncodedPublicKey>(),
            Err(KeyError::KeyVersion(2))
        ));
    }
}
