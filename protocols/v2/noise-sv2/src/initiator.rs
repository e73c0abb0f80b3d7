use std::{convert::TryInto, ptr};

use crate::{
    certificate::Certificate,
    cipher_state::{Cipher, CipherState},
    error::Error,
    handshake::{generate_key, HandshakeOp},
    NoiseCodec,
};
use chacha20poly1305::ChaCha20Poly1305;
use const_sv2::{
    ENCRYPTED_PUBKEY_SIZE, HANDSHAKE_STEP1_SIZE, HANDSHAKE_STEP2_SIZE, HANDSHAKE_STEP3_SIZE,
    PUBKEY_SIZE, SIGNATURE_NOISE_MESSAGE_SIZE,
};
use secp256k1::{Keypair, XOnlyPublicKey};

/// Client side of the handshake.
///
/// Configured with the long-lived static keypair identifying this peer and,
/// normally, the authority key the responder's certificate must verify
/// against. An initiator built without an authority key accepts any
/// certificate; that mode exists for loopback tooling only.
pub struct Initiator {
    handshake_cipher: Option<ChaCha20Poly1305>,
    k: Option<[u8; 32]>,
    n: u64,
    // Chaining key
    ck: [u8; 32],
    // Handshake hash
    h: [u8; 32],
    // Ephemeral keypair, fresh per connection
    e: Keypair,
    // Static keypair sent (encrypted) in message 3
    s: Keypair,
    // Authority key the responder's certificate must be signed with
    responder_authority_pk: Option<XOnlyPublicKey>,
    // Responder static key learned in message 2
    responder_static_pk: Option<XOnlyPublicKey>,
}

impl std::fmt::Debug for Initiator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Initiator").finish()
    }
}

impl CipherState<ChaCha20Poly1305> for Initiator {
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
    fn get_cipher(&mut self) -> &mut Option<ChaCha20Poly1305> {
        &mut self.handshake_cipher
    }
}

impl HandshakeOp<ChaCha20Poly1305> for Initiator {
    fn get_h(&mut self) -> &mut [u8; 32] {
        &mut self.h
    }
    fn get_ck(&mut self) -> &mut [u8; 32] {
        &mut self.ck
    }
    fn set_h(&mut self, data: [u8; 32]) {
        self.h = data;
    }
    fn set_ck(&mut self, data: [u8; 32]) {
        self.ck = data;
    }
    fn set_handshake_cipher(&mut self, cipher: ChaCha20Poly1305) {
        self.handshake_cipher = Some(cipher);
    }
}

impl Initiator {
    pub fn new(static_key: Keypair, responder_authority_pk: Option<XOnlyPublicKey>) -> Box<Self> {
        let mut self_ = Self {
            handshake_cipher: None,
            k: None,
            n: 0,
            ck: [0; 32],
            h: [0; 32],
            e: generate_key(),
            s: static_key,
            responder_authority_pk,
            responder_static_pk: None,
        };
        self_.initialize_self();
        Box::new(self_)
    }

    /// Builds an initiator with a fresh static key, verifying against the
    /// raw 32-byte authority key.
    pub fn from_raw_k(authority_key: [u8; 32]) -> Result<Box<Self>, Error> {
        let pk = XOnlyPublicKey::from_slice(&authority_key)
            .map_err(|_| Error::InvalidRawPublicKey)?;
        Ok(Self::new(generate_key(), Some(pk)))
    }

    /// Builds an initiator that skips certificate verification.
    pub fn without_pk() -> Box<Self> {
        Self::new(generate_key(), None)
    }

    /// Responder static key received in message 2. `None` before
    /// [`Initiator::step_2`] succeeds.
    pub fn responder_static_pk(&self) -> Option<XOnlyPublicKey> {
        self.responder_static_pk
    }

    /// This peer's own static public key, as sent in message 3.
    pub fn static_pub_key(&self) -> XOnlyPublicKey {
        self.s.x_only_public_key().0
    }

    /// Produces handshake message 1: the 32-byte ephemeral public key.
    pub fn step_0(&mut self) -> Result<[u8; HANDSHAKE_STEP1_SIZE], Error> {
        let e_pub = self.e.x_only_public_key().0.serialize();
        self.mix_hash(&e_pub);
        self.encrypt_and_hash(&mut vec![])?;

        Ok(e_pub)
    }

    /// Processes handshake message 2 and produces message 3:
    ///
    /// 1. `mix_hash(re)`, `mix_key(ECDH(e, re))`, the `ee` token;
    /// 2. `decrypt_and_hash` of the responder's static key (`s`), then
    ///    `mix_key(ECDH(e, rs))`, the `es` token;
    /// 3. `decrypt_and_hash` of the certificate, verified against the
    ///    authority key and the static key just received;
    /// 4. appends `encrypt_and_hash(s)` (48 bytes), its own static key;
    /// 5. `mix_key(ECDH(s, re))`, the `se` token;
    /// 6. HKDF-splits `ck` into the two directional cipher states.
    pub fn step_2(
        &mut self,
        message: [u8; HANDSHAKE_STEP2_SIZE],
    ) -> Result<([u8; HANDSHAKE_STEP3_SIZE], NoiseCodec), Error> {
        // e
        let re_bytes: [u8; PUBKEY_SIZE] = message[..PUBKEY_SIZE].try_into().expect("fixed slice");
        let re_pub =
            XOnlyPublicKey::from_slice(&re_bytes).map_err(|_| Error::InvalidRawPublicKey)?;
        self.mix_hash(&re_bytes);

        // ee
        let ecdh_ephemeral = Self::ecdh(&self.e.secret_key(), &re_pub);
        self.mix_key(&ecdh_ephemeral);

        // s
        let mut to_decrypt = message[PUBKEY_SIZE..PUBKEY_SIZE + ENCRYPTED_PUBKEY_SIZE].to_vec();
        self.decrypt_and_hash(&mut to_decrypt)?;
        let rs_pub =
            XOnlyPublicKey::from_slice(&to_decrypt).map_err(|_| Error::InvalidRawPublicKey)?;

        // es
        let ecdh_static = Self::ecdh(&self.e.secret_key(), &rs_pub);
        self.mix_key(&ecdh_static);

        // certificate
        let mut to_decrypt = message[PUBKEY_SIZE + ENCRYPTED_PUBKEY_SIZE..].to_vec();
        self.decrypt_and_hash(&mut to_decrypt)?;
        let cert_bytes: [u8; SIGNATURE_NOISE_MESSAGE_SIZE] = to_decrypt
            .try_into()
            .map_err(|_| Error::InvalidMessageLength {
                expected: SIGNATURE_NOISE_MESSAGE_SIZE,
                got: 0,
            })?;
        let certificate = Certificate::from(cert_bytes);
        if !certificate.verify(&rs_pub, &self.responder_authority_pk) {
            return Err(Error::InvalidCertificate(cert_bytes));
        }
        self.responder_static_pk = Some(rs_pub);

        // s (ours)
        let mut out = [0u8; HANDSHAKE_STEP3_SIZE];
        let mut encrypted_static = self.s.x_only_public_key().0.serialize().to_vec();
        self.encrypt_and_hash(&mut encrypted_static)?;
        out.copy_from_slice(&encrypted_static[..HANDSHAKE_STEP3_SIZE]);

        // se
        let ecdh_static_ours = Self::ecdh(&self.s.secret_key(), &re_pub);
        self.mix_key(&ecdh_static_ours);

        let (temp_k1, temp_k2) = Self::hkdf_2(self.get_ck(), &[]);
        let codec = NoiseCodec {
            // k1 protects initiator -> responder, k2 the other direction.
            encryptor: Cipher::from_key(temp_k1),
            decryptor: Cipher::from_key(temp_k2),
        };
        Ok((out, codec))
    }

    fn erase(&mut self) {
        if let Some(k) = self.k.as_mut() {
            for b in k {
                unsafe { ptr::write_volatile(b, 0) };
            }
        }
        for b in self.ck.iter_mut() {
            unsafe { ptr::write_volatile(b, 0) };
        }
        for b in self.h.iter_mut() {
            unsafe { ptr::write_volatile(b, 0) };
        }
        self.e.non_secure_erase();
        self.s.non_secure_erase();
    }
}

impl Drop for Initiator {
    fn drop(&mut self) {
        self.erase();
    }
}
