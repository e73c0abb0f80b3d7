//! # Noise-SV2: handshake and transport encryption
//!
//! Implements the encrypted channel between a Template Provider and its
//! mining peers: a three-message Noise handshake over secp256k1
//! (`Noise_XK_secp256k1+X25519_ChaChaPoly_SHA256` variant), certificate
//! based attestation of the responder's static key, and the pair of
//! directional ChaCha20-Poly1305 cipher states every byte after the
//! handshake runs through.
//!
//! The handshake exchanges exactly three messages with fixed sizes:
//!
//! 1. initiator → responder: the initiator's ephemeral public key
//!    (32 bytes, plaintext);
//! 2. responder → initiator: the responder's ephemeral key, its encrypted
//!    static key and its encrypted [`Certificate`] (170 bytes);
//! 3. initiator → responder: the initiator's encrypted static key
//!    (48 bytes).
//!
//! Afterwards both sides HKDF-split the chaining key into two cipher
//! states, one per direction, wrapped in a [`NoiseCodec`].
//!
//! Diffie-Hellman runs on secp256k1 with 32-byte x-only public keys of even
//! parity, the curve used by the rest of the Bitcoin stack. The responder's
//! static key is vouched for by an authority Schnorr key (BIP-340) through
//! the [`Certificate`] exchanged in message 2; an initiator configured with
//! the authority key rejects the handshake if the signature or the validity
//! window does not check out.

mod aed_cipher;
mod cipher_state;
mod error;
pub mod formats;
mod handshake;

mod certificate;
mod initiator;
mod responder;

use cipher_state::Cipher;

pub use certificate::Certificate;
pub use chacha20poly1305::aead::Error as AeadError;
pub use error::Error;
pub use handshake::generate_key;
pub use initiator::Initiator;
pub use responder::Responder;

use chacha20poly1305::ChaCha20Poly1305;

// The parity every public key in the handshake is required to have, so that
// 32-byte x-only encodings round-trip to full points unambiguously.
const PARITY: secp256k1::Parity = secp256k1::Parity::Even;

/// The pair of directional cipher states produced by a completed handshake.
///
/// `encrypt` seals with the sending direction's key, `decrypt` opens with
/// the receiving direction's key. Nonces start at 0 and increase by exactly
/// one per operation; the nonce value `2^64 - 1` is never used, reaching
/// it aborts the session instead.
pub struct NoiseCodec {
    encryptor: Cipher<ChaCha20Poly1305>,
    decryptor: Cipher<ChaCha20Poly1305>,
}

impl core::fmt::Debug for NoiseCodec {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("NoiseCodec").finish()
    }
}

impl NoiseCodec {
    /// Encrypts `msg` in place, appending the 16-byte MAC.
    pub fn encrypt(&mut self, msg: &mut Vec<u8>) -> Result<(), Error> {
        self.encryptor.seal(msg)
    }

    /// Decrypts `msg` in place, stripping the 16-byte MAC.
    pub fn decrypt(&mut self, msg: &mut Vec<u8>) -> Result<(), Error> {
        self.decryptor.open(msg)
    }

    /// Nonce of the next outbound AEAD operation. Test hook for the nonce
    /// monotonicity property.
    pub fn send_nonce(&self) -> u64 {
        self.encryptor.nonce()
    }
}
