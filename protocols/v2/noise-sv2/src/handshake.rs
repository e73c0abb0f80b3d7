// Handshake operations shared by the initiator and responder roles.
//
// Implements the symmetric-state primitives of the Noise protocol over the
// [`CipherState`] trait: transcript hashing (`mix_hash`), HKDF-based key
// ratcheting (`mix_key`), AEAD steps bound to the transcript
// (`encrypt_and_hash` / `decrypt_and_hash`) and Diffie-Hellman on secp256k1
// with x-only public keys.

use crate::{aed_cipher::AeadCipher, cipher_state::CipherState, error::Error};
use chacha20poly1305::ChaCha20Poly1305;
use const_sv2::NOISE_HASHED_PROTOCOL_NAME_CHACHA;
use secp256k1::{
    ecdh::SharedSecret,
    hashes::{sha256::Hash as Sha256Hash, Hash},
    rand, Keypair, Secp256k1, SecretKey, XOnlyPublicKey,
};

/// Generates a secp256k1 keypair whose public key has even parity, so its
/// 32-byte x-only encoding round-trips to the full point.
pub fn generate_key() -> Keypair {
    generate_key_with_rng(&mut rand::thread_rng())
}

pub fn generate_key_with_rng<R: rand::Rng + ?Sized>(rng: &mut R) -> Keypair {
    let secp = Secp256k1::new();
    loop {
        let (secret_key, _) = secp.generate_keypair(rng);
        let kp = Keypair::from_secret_key(&secp, &secret_key);
        if kp.x_only_public_key().1 == crate::PARITY {
            return kp;
        }
    }
}

pub trait HandshakeOp<Cipher: AeadCipher>: CipherState<Cipher> {
    fn get_h(&mut self) -> &mut [u8; 32];
    fn get_ck(&mut self) -> &mut [u8; 32];
    fn set_h(&mut self, data: [u8; 32]);
    fn set_ck(&mut self, data: [u8; 32]);
    fn set_handshake_cipher(&mut self, cipher: ChaCha20Poly1305);

    /// Absorbs `data` into the handshake hash:
    /// `h = SHA-256(h ‖ data)`.
    fn mix_hash(&mut self, data: &[u8]) {
        let h = self.get_h();
        let mut to_hash = Vec::with_capacity(32 + data.len());
        to_hash.extend_from_slice(h);
        to_hash.extend_from_slice(data);
        *h = Sha256Hash::hash(&to_hash).to_byte_array();
    }

    /// HMAC-SHA256 built from the raw hash, as the Noise spec defines it.
    fn hmac_hash(key: &[u8; 32], data: &[u8]) -> [u8; 32] {
        let mut ipad = [0x36u8; 64];
        let mut opad = [0x5cu8; 64];
        for i in 0..32 {
            ipad[i] = key[i] ^ 0x36;
            opad[i] = key[i] ^ 0x5c;
        }

        let mut to_hash = Vec::with_capacity(64 + data.len());
        to_hash.extend_from_slice(&ipad);
        to_hash.extend_from_slice(data);
        let inner = Sha256Hash::hash(&to_hash).to_byte_array();

        to_hash.clear();
        to_hash.extend_from_slice(&opad);
        to_hash.extend_from_slice(&inner);
        Sha256Hash::hash(&to_hash).to_byte_array()
    }

    /// Two-output HKDF over the chaining key.
    fn hkdf_2(chaining_key: &[u8; 32], input_key_material: &[u8]) -> ([u8; 32], [u8; 32]) {
        let temp_key = Self::hmac_hash(chaining_key, input_key_material);
        let out_1 = Self::hmac_hash(&temp_key, &[0x1]);
        let out_2 = Self::hmac_hash(&temp_key, &[&out_1[..], &[0x2][..]].concat());
        (out_1, out_2)
    }

    /// Ratchets the chaining key with fresh key material (typically a DH
    /// output) and installs the derived key as the handshake cipher key.
    fn mix_key(&mut self, input_key_material: &[u8]) {
        let ck = self.get_ck();
        let (ck, temp_k) = Self::hkdf_2(ck, input_key_material);
        self.set_ck(ck);
        self.initialize_key(temp_k);
    }

    /// Encrypts `plaintext` (if a key is installed) with the transcript
    /// hash as associated data, then absorbs the ciphertext into the
    /// transcript.
    fn encrypt_and_hash(&mut self, plaintext: &mut Vec<u8>) -> Result<(), Error> {
        if self.get_k().is_some() {
            let h = *self.get_h();
            self.encrypt_with_ad(&h, plaintext)?;
        }
        self.mix_hash(plaintext);
        Ok(())
    }

    /// Counterpart of [`HandshakeOp::encrypt_and_hash`]: absorbs the
    /// ciphertext into the transcript and decrypts it in place.
    fn decrypt_and_hash(&mut self, ciphertext: &mut Vec<u8>) -> Result<(), Error> {
        let encrypted = ciphertext.clone();
        if self.get_k().is_some() {
            let h = *self.get_h();
            self.decrypt_with_ad(&h, ciphertext)?;
        }
        self.mix_hash(&encrypted);
        Ok(())
    }

    /// Diffie-Hellman between a secret key and an x-only public key, the
    /// latter lifted to the even-parity point.
    fn ecdh(private: &SecretKey, public: &XOnlyPublicKey) -> [u8; 32] {
        SharedSecret::new(&public.public_key(crate::PARITY), private).secret_bytes()
    }

    /// Resets the symmetric state to the hashed protocol name.
    fn initialize_self(&mut self) {
        let ck = NOISE_HASHED_PROTOCOL_NAME_CHACHA;
        let h = Sha256Hash::hash(&ck[..]);
        self.set_h(h.to_byte_array());
        self.set_ck(ck);
        self.set_k(None);
    }

    /// Installs `key` as the handshake cipher key and resets the nonce.
    fn initialize_key(&mut self, key: [u8; 32]) {
        self.set_n(0);
        let cipher = ChaCha20Poly1305::from_key(key);
        self.set_handshake_cipher(cipher);
        self.set_k(Some(key));
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use quickcheck::{Arbitrary, TestResult};

    struct TestHandShake {
        k: Option<[u8; 32]>,
        n: u64,
        cipher: Option<ChaCha20Poly1305>,
        h: [u8; 32],
        ck: [u8; 32],
    }

    impl TestHandShake {
        fn new() -> Self {
            let mut self_ = TestHandShake {
                k: None,
                n: 0,
                cipher: None,
                h: [0; 32],
                ck: [0; 32],
            };
            self_.initialize_self();
            self_
        }
    }

    impl CipherState<ChaCha20Poly1305> for TestHandShake {
        fn get_k(&mut self) -> &mut Option<[u8; 32]> {
            &mut self.k
        }
        fn set_k(&mut self, k: Option<[u8; 32]>) {
            self.k = k
        }
        fn get_n(&self) -> u64 {
            self.n
        }
        fn set_n(&mut self, n: u64) {
            self.n = n
        }
        fn get_cipher(&mut self) -> &mut Option<ChaCha20Poly1305> {
            &mut self.cipher
        }
    }

    impl HandshakeOp<ChaCha20Poly1305> for TestHandShake {
        fn get_h(&mut self) -> &mut [u8; 32] {
            &mut self.h
        }
        fn get_ck(&mut self) -> &mut [u8; 32] {
            &mut self.ck
        }
        fn set_h(&mut self, data: [u8; 32]) {
            self.h = data
        }
        fn set_ck(&mut self, data: [u8; 32]) {
            self.ck = data
        }
        fn set_handshake_cipher(&mut self, cipher: ChaCha20Poly1305) {
            self.cipher = Some(cipher)
        }
    }

    #[test]
    fn encrypt_decrypt_with_transcript() {
        let mut a = TestHandShake::new();
        let mut b = TestHandShake::new();
        a.initialize_key([0; 32]);
        b.initialize_key([0; 32]);

        let data = vec![1, 7, 92, 3, 4, 5];
        let mut buf = data.clone();
        a.encrypt_and_hash(&mut buf).unwrap();
        assert_ne!(buf, data);
        b.decrypt_and_hash(&mut buf).unwrap();
        assert_eq!(buf, data);
        assert_eq!(a.get_h(), b.get_h());
    }

    #[test]
    fn hmac_matches_manual_construction() {
        let k = [0u8; 32];
        let data = [0u8; 90];
        let value = TestHandShake::hmac_hash(&k, &data);

        let mut to_hash = vec![0x36u8; 64];
        to_hash.extend_from_slice(&data);
        let inner = Sha256Hash::hash(&to_hash).to_byte_array();
        let mut to_hash = vec![0x5cu8; 64];
        to_hash.extend_from_slice(&inner);
        let expected = Sha256Hash::hash(&to_hash).to_byte_array();

        assert_eq!(value, expected);
    }

    #[test]
    fn mix_key_ratchets_ck_and_k() {
        let ikm = [0u8; 32];
        let mut tester = TestHandShake::new();
        tester.set_ck([0; 32]);

        let (ck, temp_k) = TestHandShake::hkdf_2(&[0; 32], &ikm);
        tester.mix_key(&ikm);

        assert_eq!(*tester.get_ck(), ck);
        assert_eq!(tester.get_k().unwrap(), temp_k);
        assert_eq!(tester.get_n(), 0);
    }

    #[test]
    fn mix_hash_absorbs_data() {
        let mut tester = TestHandShake::new();
        tester.set_h([0; 32]);
        let data = [0u8; 32];

        let mut to_hash = vec![0u8; 32];
        to_hash.extend_from_slice(&data);
        let expected = Sha256Hash::hash(&to_hash).to_byte_array();

        tester.mix_hash(&data);
        assert_eq!(*tester.get_h(), expected);
    }

    #[derive(Clone, Debug)]
    struct KeypairWrapper(Option<Keypair>);

    impl Arbitrary for KeypairWrapper {
        fn arbitrary(g: &mut quickcheck::Gen) -> Self {
            let secp = Secp256k1::new();
            let mut secret = Vec::<u8>::arbitrary(g);
            secret.resize(32, 0);
            secret.truncate(32);
            let secret: [u8; 32] = secret.try_into().unwrap();
            match SecretKey::from_slice(&secret) {
                Ok(secret) => KeypairWrapper(Some(Keypair::from_secret_key(&secp, &secret))),
                Err(_) => KeypairWrapper(None),
            }
        }
    }

    #[quickcheck_macros::quickcheck]
    fn ecdh_is_symmetric(kp1: KeypairWrapper, kp2: KeypairWrapper) -> TestResult {
        let (kp1, kp2) = match (kp1.0, kp2.0) {
            (Some(kp1), Some(kp2)) => (kp1, kp2),
            _ => return TestResult::discard(),
        };
        if kp1.x_only_public_key().1 != crate::PARITY || kp2.x_only_public_key().1 != crate::PARITY
        {
            return TestResult::discard();
        }
        let ecdh_1 = TestHandShake::ecdh(&kp1.secret_key(), &kp2.x_only_public_key().0);
        let ecdh_2 = TestHandShake::ecdh(&kp2.secret_key(), &kp1.x_only_public_key().0);
        TestResult::from_bool(ecdh_1 == ecdh_2)
    }

    #[test]
    fn generated_keys_have_even_parity() {
        for _ in 0..8 {
            let kp = generate_key();
            assert_eq!(kp.x_only_public_key().1, crate::PARITY);
        }
    }
}
