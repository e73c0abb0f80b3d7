// AEAD seam of the handshake and transport layers.
//
// The protocol pins ChaCha20-Poly1305, but the handshake and cipher-state
// code only ever talks to this trait, so swapping or adding an AEAD stays a
// local change.

use chacha20poly1305::{aead::Buffer, AeadInPlace, ChaCha20Poly1305, KeyInit};

pub trait AeadCipher {
    fn from_key(k: [u8; 32]) -> Self;

    /// Encrypts `data` in place with the 12-byte `nonce` and the associated
    /// data `ad`, appending the MAC.
    fn encrypt<T: Buffer>(
        &mut self,
        nonce: &[u8; 12],
        ad: &[u8],
        data: &mut T,
    ) -> Result<(), chacha20poly1305::aead::Error>;

    /// Decrypts `data` in place, verifying and stripping the MAC.
    fn decrypt<T: Buffer>(
        &mut self,
        nonce: &[u8; 12],
        ad: &[u8],
        data: &mut T,
    ) -> Result<(), chacha20poly1305::aead::Error>;
}

impl AeadCipher for ChaCha20Poly1305 {
    fn from_key(k: [u8; 32]) -> Self {
        ChaCha20Poly1305::new(&k.into())
    }

    fn encrypt<T: Buffer>(
        &mut self,
        nonce: &[u8; 12],
        ad: &[u8],
        data: &mut T,
    ) -> Result<(), chacha20poly1305::aead::Error> {
        self.encrypt_in_place(nonce.into(), ad, data)
    }

    fn decrypt<T: Buffer>(
        &mut self,
        nonce: &[u8; 12],
        ad: &[u8],
        data: &mut T,
    ) -> Result<(), chacha20poly1305::aead::Error> {
        self.decrypt_in_place(nonce.into(), ad, data)
    }
}
