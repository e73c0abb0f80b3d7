use std::ptr;

use crate::{aed_cipher::AeadCipher, error::Error};
use chacha20poly1305::aead::Buffer;

/// State shared by the handshake and transport ciphers: an optional key
/// `k`, a 64-bit nonce counter `n` and the cipher instance itself.
///
/// Nonces start at 0 and are consumed in order; the counter is only
/// advanced after a successful AEAD operation, so a failed decrypt does not
/// burn a nonce. The value `u64::MAX` is reserved: an operation that would
/// use it fails with [`Error::NonceExhaustion`] and the session has to be
/// torn down.
pub trait CipherState<Cipher_: AeadCipher>
where
    Self: Sized,
{
    fn get_k(&mut self) -> &mut Option<[u8; 32]>;
    fn set_k(&mut self, k: Option<[u8; 32]>);
    fn get_n(&self) -> u64;
    fn set_n(&mut self, n: u64);
    fn get_cipher(&mut self) -> &mut Option<Cipher_>;

    /// The 12-byte ChaCha20 nonce: 4 zero bytes followed by the counter in
    /// little endian.
    fn nonce_to_bytes(&self) -> [u8; 12] {
        let mut res = [0u8; 12];
        res[4..].copy_from_slice(&self.get_n().to_le_bytes());
        res
    }

    fn encrypt_with_ad<T: Buffer>(&mut self, ad: &[u8], data: &mut T) -> Result<(), Error> {
        let n = self.get_n();
        if n == u64::MAX {
            return Err(Error::NonceExhaustion);
        }
        let nonce = self.nonce_to_bytes();
        match self.get_cipher() {
            Some(c) => {
                c.encrypt(&nonce, ad, data)?;
                self.set_n(n + 1);
                Ok(())
            }
            None => Ok(()),
        }
    }

    fn decrypt_with_ad<T: Buffer>(&mut self, ad: &[u8], data: &mut T) -> Result<(), Error> {
        let n = self.get_n();
        if n == u64::MAX {
            return Err(Error::NonceExhaustion);
        }
        let nonce = self.nonce_to_bytes();
        match self.get_cipher() {
            Some(c) => {
                c.decrypt(&nonce, ad, data)?;
                self.set_n(n + 1);
                Ok(())
            }
            None => Ok(()),
        }
    }
}

/// A transport-phase cipher: key, nonce counter and cipher instance.
///
/// The key copy is kept only so it can be zeroized; it is erased on drop.
pub struct Cipher<C: AeadCipher> {
    k: Option<[u8; 32]>,
    n: u64,
    cipher: Option<C>,
}

impl<C: AeadCipher> Cipher<C> {
    pub fn from_key(k: [u8; 32]) -> Self {
        let cipher = C::from_key(k);
        Self {
            k: Some(k),
            n: 0,
            cipher: Some(cipher),
        }
    }

    pub fn nonce(&self) -> u64 {
        self.n
    }

    /// Seals `data` in place with no associated data.
    pub fn seal<T: Buffer>(&mut self, data: &mut T) -> Result<(), Error> {
        self.encrypt_with_ad(&[], data)
    }

    /// Opens `data` in place with no associated data.
    pub fn open<T: Buffer>(&mut self, data: &mut T) -> Result<(), Error> {
        self.decrypt_with_ad(&[], data)
    }

    fn erase_k(&mut self) {
        if let Some(k) = self.k.as_mut() {
            for b in k {
                unsafe { ptr::write_volatile(b, 0) };
            }
            self.k = None;
        }
    }
}

impl<C: AeadCipher> CipherState<C> for Cipher<C> {
    fn get_k(&mut self) -> &mut Option<[u8; 32]> {
        &mut self.k
    }
    fn set_k(&mut self, k: Option<[u8; 32]>) {
        self.k = k;
    }
    fn get_n(&self) -> u64 {
        self.n
    }
    fn set_n(&mut self, n: u64) {
        self.n = n;
    }
    fn get_cipher(&mut self) -> &mut Option<C> {
        &mut self.cipher
    }
}

impl<C: AeadCipher> Drop for Cipher<C> {
    fn drop(&mut self) {
        self.erase_k();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chacha20poly1305::ChaCha20Poly1305;

    #[test]
    fn seal_open_round_trip() {
        let mut tx: Cipher<ChaCha20Poly1305> = Cipher::from_key([7; 32]);
        let mut rx: Cipher<ChaCha20Poly1305> = Cipher::from_key([7; 32]);

        let plain = b"template".to_vec();
        let mut buf = plain.clone();
        tx.seal(&mut buf).unwrap();
        assert_ne!(buf, plain);
        assert_eq!(buf.len(), plain.len() + 16);
        rx.open(&mut buf).unwrap();
        assert_eq!(buf, plain);
    }

    #[test]
    fn nonces_start_at_zero_and_increment() {
        let mut tx: Cipher<ChaCha20Poly1305> = Cipher::from_key([1; 32]);
        assert_eq!(tx.nonce(), 0);
        let mut buf = vec![0u8; 4];
        tx.seal(&mut buf).unwrap();
        assert_eq!(tx.nonce(), 1);
        tx.seal(&mut buf).unwrap();
        assert_eq!(tx.nonce(), 2);
    }

    #[test]
    fn replayed_frame_fails_to_open() {
        let mut tx: Cipher<ChaCha20Poly1305> = Cipher::from_key([2; 32]);
        let mut rx: Cipher<ChaCha20Poly1305> = Cipher::from_key([2; 32]);

        let mut first = b"one".to_vec();
        tx.seal(&mut first).unwrap();
        let replay = first.clone();
        rx.open(&mut first).unwrap();

        // The receiver is now at nonce 1; the frame sealed at nonce 0 must
        // not open again.
        let mut replayed = replay;
        assert_eq!(rx.open(&mut replayed), Err(Error::Aead));
    }

    #[test]
    fn failed_open_does_not_advance_nonce() {
        let mut rx: Cipher<ChaCha20Poly1305> = Cipher::from_key([3; 32]);
        let mut garbage = vec![0u8; 20];
        assert_eq!(rx.open(&mut garbage), Err(Error::Aead));
        assert_eq!(rx.nonce(), 0);
    }

    #[test]
    fn nonce_exhaustion_is_fatal() {
        let mut tx: Cipher<ChaCha20Poly1305> = Cipher::from_key([4; 32]);
        tx.set_n(u64::MAX);
        let mut buf = vec![0u8; 4];
        assert_eq!(tx.seal(&mut buf), Err(Error::NonceExhaustion));
    }
}
