// Certificate-based attestation of the responder's static key.
//
// The authority vouches for a static noise key by Schnorr-signing
// `SHA-256(version ‖ valid_from ‖ valid_to ‖ static_pubkey)` with its
// BIP-340 key. The 74-byte blob sent during the handshake carries only the
// header fields and the signature; the static key it binds to is the one
// transmitted (encrypted) in the same handshake message, so the initiator
// always verifies the certificate against the key it actually received.

use core::convert::TryInto;

use secp256k1::{
    hashes::{sha256, Hash},
    schnorr::Signature,
    Keypair, Message, Secp256k1, XOnlyPublicKey,
};

use const_sv2::SIGNATURE_NOISE_MESSAGE_SIZE;

/// A signed validity window for a static noise key.
///
/// Wire layout (74 bytes, little endian):
/// `version:u16 | valid_from:u32 | valid_to:u32 | sig:[64]`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Certificate {
    /// Version of the certificate format. Currently 0.
    pub version: u16,
    /// Start of the validity window, Unix seconds.
    pub valid_from: u32,
    /// End of the validity window, Unix seconds.
    pub valid_to: u32,
    /// BIP-340 signature by the authority key.
    pub signature: [u8; 64],
}

impl From<[u8; SIGNATURE_NOISE_MESSAGE_SIZE]> for Certificate {
    fn from(value: [u8; SIGNATURE_NOISE_MESSAGE_SIZE]) -> Self {
        let version = u16::from_le_bytes(value[0..2].try_into().expect("fixed slice"));
        let valid_from = u32::from_le_bytes(value[2..6].try_into().expect("fixed slice"));
        let valid_to = u32::from_le_bytes(value[6..10].try_into().expect("fixed slice"));
        let signature = value[10..74].try_into().expect("fixed slice");
        Self {
            version,
            valid_from,
            valid_to,
            signature,
        }
    }
}

impl Certificate {
    /// Issues a certificate for `static_pk`, signed with the authority
    /// keypair.
    pub fn sign(
        version: u16,
        valid_from: u32,
        valid_to: u32,
        static_pk: &XOnlyPublicKey,
        authority: &Keypair,
    ) -> Self {
        Self::sign_with_rng(
            version,
            valid_from,
            valid_to,
            static_pk,
            authority,
            &mut rand::thread_rng(),
        )
    }

    pub fn sign_with_rng<R: rand::Rng + rand::CryptoRng>(
        version: u16,
        valid_from: u32,
        valid_to: u32,
        static_pk: &XOnlyPublicKey,
        authority: &Keypair,
        rng: &mut R,
    ) -> Self {
        let secp = Secp256k1::signing_only();
        let msg = Self::signed_digest(version, valid_from, valid_to, static_pk);
        let signature = secp.sign_schnorr_with_rng(&msg, authority, rng);
        Self {
            version,
            valid_from,
            valid_to,
            signature: *signature.as_ref(),
        }
    }

    /// Verifies signature and validity window against the static key
    /// received in the handshake. With no authority key configured the
    /// certificate is accepted as-is.
    pub fn verify(&self, static_pk: &XOnlyPublicKey, authority_pk: &Option<XOnlyPublicKey>) -> bool {
        let now = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .map(|d| d.as_secs())
            .unwrap_or(0) as u32;
        self.verify_with_now(static_pk, authority_pk, now)
    }

    /// Like [`Certificate::verify`] with an explicit clock, so expiry can
    /// be tested without mocking time globally.
    pub fn verify_with_now(
        &self,
        static_pk: &XOnlyPublicKey,
        authority_pk: &Option<XOnlyPublicKey>,
        now: u32,
    ) -> bool {
        let authority_pk = match authority_pk {
            Some(pk) => pk,
            None => return true,
        };
        if now < self.valid_from || now > self.valid_to {
            return false;
        }
        let secp = Secp256k1::verification_only();
        let msg = Self::signed_digest(self.version, self.valid_from, self.valid_to, static_pk);
        let signature = match Signature::from_slice(&self.signature) {
            Ok(s) => s,
            Err(_) => return false,
        };
        secp.verify_schnorr(&signature, &msg, authority_pk).is_ok()
    }

    /// Serializes the 74-byte wire blob.
    pub fn to_bytes(&self) -> [u8; SIGNATURE_NOISE_MESSAGE_SIZE] {
        let mut out = [0u8; SIGNATURE_NOISE_MESSAGE_SIZE];
        out[0..2].copy_from_slice(&self.version.to_le_bytes());
        out[2..6].copy_from_slice(&self.valid_from.to_le_bytes());
        out[6..10].copy_from_slice(&self.valid_to.to_le_bytes());
        out[10..74].copy_from_slice(&self.signature);
        out
    }

    fn signed_digest(
        version: u16,
        valid_from: u32,
        valid_to: u32,
        static_pk: &XOnlyPublicKey,
    ) -> Message {
        let mut to_hash = Vec::with_capacity(10 + 32);
        to_hash.extend_from_slice(&version.to_le_bytes());
        to_hash.extend_from_slice(&valid_from.to_le_bytes());
        to_hash.extend_from_slice(&valid_to.to_le_bytes());
        to_hash.extend_from_slice(&static_pk.serialize());
        Message::from_digest(sha256::Hash::hash(&to_hash).to_byte_array())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::handshake::generate_key;

    fn setup() -> (Keypair, XOnlyPublicKey, XOnlyPublicKey) {
        let authority = generate_key();
        let static_kp = generate_key();
        (
            authority,
            authority.x_only_public_key().0,
            static_kp.x_only_public_key().0,
        )
    }

    #[test]
    fn valid_inside_window() {
        let (authority, authority_pk, static_pk) = setup();
        let cert = Certificate::sign(0, 100, 200, &static_pk, &authority);
        assert!(cert.verify_with_now(&static_pk, &Some(authority_pk), 100));
        assert!(cert.verify_with_now(&static_pk, &Some(authority_pk), 150));
        assert!(cert.verify_with_now(&static_pk, &Some(authority_pk), 200));
    }

    #[test]
    fn rejected_outside_window() {
        let (authority, authority_pk, static_pk) = setup();
        let cert = Certificate::sign(0, 100, 200, &static_pk, &authority);
        assert!(!cert.verify_with_now(&static_pk, &Some(authority_pk), 99));
        assert!(!cert.verify_with_now(&static_pk, &Some(authority_pk), 201));
    }

    #[test]
    fn rejected_for_wrong_static_key() {
        let (authority, authority_pk, static_pk) = setup();
        let cert = Certificate::sign(0, 100, 200, &static_pk, &authority);
        let other = generate_key().x_only_public_key().0;
        assert!(!cert.verify_with_now(&other, &Some(authority_pk), 150));
    }

    #[test]
    fn rejected_for_wrong_authority() {
        let (authority, _, static_pk) = setup();
        let cert = Certificate::sign(0, 100, 200, &static_pk, &authority);
        let other_authority = generate_key().x_only_public_key().0;
        assert!(!cert.verify_with_now(&static_pk, &Some(other_authority), 150));
    }

    #[test]
    fn accepted_without_authority_key() {
        let (authority, _, static_pk) = setup();
        let cert = Certificate::sign(0, 100, 200, &static_pk, &authority);
        assert!(cert.verify_with_now(&static_pk, &None, 1000));
    }

    #[test]
    fn wire_round_trip() {
        let (authority, authority_pk, static_pk) = setup();
        let cert = Certificate::sign(0, 100, 200, &static_pk, &authority);
        let restored = Certificate::from(cert.to_bytes());
        assert_eq!(restored, cert);
        assert!(restored.verify_with_now(&static_pk, &Some(authority_pk), 150));
    }
}
