use std::ptr;

use crate::{
    certificate::Certificate,
    cipher_state::{Cipher, CipherState},
    error::Error,
    handshake::{generate_key, HandshakeOp},
    NoiseCodec,
};
use chacha20poly1305::ChaCha20Poly1305;
use const_sv2::{
    ENCRYPTED_PUBKEY_SIZE, ENCRYPTED_SIGNATURE_NOISE_MESSAGE_SIZE, HANDSHAKE_STEP1_SIZE,
    HANDSHAKE_STEP2_SIZE, HANDSHAKE_STEP3_SIZE, PUBKEY_SIZE,
};
use secp256k1::{Keypair, XOnlyPublicKey};

/// Server side of the handshake.
///
/// Owns the long-lived static keypair and the authority-signed
/// [`Certificate`] covering it. A fresh `Responder` (with a fresh ephemeral
/// key) is created for every inbound connection:
///
/// 1. [`Responder::step_1`] consumes the initiator's 32-byte ephemeral key
///    and produces the 170-byte reply;
/// 2. [`Responder::step_3`] consumes the initiator's 48-byte final message
///    and yields the transport [`NoiseCodec`] plus the initiator's static
///    key.
pub struct Responder {
    handshake_cipher: Option<ChaCha20Poly1305>,
    k: Option<[u8; 32]>,
    n: u64,
    // Chaining key
    ck: [u8; 32],
    // Handshake hash
    h: [u8; 32],
    // Ephemeral keypair, fresh per connection
    e: Keypair,
    // Static keypair, shared by all connections of this process
    s: Keypair,
    cert: Certificate,
}

impl std::fmt::Debug for Responder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Responder").finish()
    }
}

impl CipherState<ChaCha20Poly1305> for Responder {
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

impl HandshakeOp<ChaCha20Poly1305> for Responder {
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

impl Responder {
    pub fn new(static_key: Keypair, cert: Certificate) -> Box<Self> {
        let mut self_ = Self {
            handshake_cipher: None,
            k: None,
            n: 0,
            ck: [0; 32],
            h: [0; 32],
            e: generate_key(),
            s: static_key,
            cert,
        };
        self_.initialize_self();
        Box::new(self_)
    }

    /// Convenience constructor for tests and simple servers: generates a
    /// static key and signs a certificate valid for `cert_validity`
    /// seconds, starting now.
    pub fn from_authority_kp(authority: &Keypair, cert_validity: u32) -> Box<Self> {
        let static_key = generate_key();
        let now = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .map(|d| d.as_secs())
            .unwrap_or(0) as u32;
        let cert = Certificate::sign(
            0,
            now,
            now.saturating_add(cert_validity),
            &static_key.x_only_public_key().0,
            authority,
        );
        Self::new(static_key, cert)
    }

    pub fn static_pub_key(&self) -> XOnlyPublicKey {
        self.s.x_only_public_key().0
    }

    /// Processes handshake message 1 and produces message 2:
    ///
    /// 1. `mix_hash(re)`, then `decrypt_and_hash` of the (empty) remainder;
    /// 2. appends own ephemeral `e` (32 bytes plaintext), `mix_hash(e)`;
    /// 3. `mix_key(ECDH(e, re))`, the `ee` token;
    /// 4. appends `encrypt_and_hash(s)` (48 bytes);
    /// 5. `mix_key(ECDH(s, re))`, the `es` token;
    /// 6. appends `encrypt_and_hash(certificate)` (90 bytes).
    pub fn step_1(
        &mut self,
        re_message: [u8; HANDSHAKE_STEP1_SIZE],
    ) -> Result<[u8; HANDSHAKE_STEP2_SIZE], Error> {
        let re_pub = XOnlyPublicKey::from_slice(&re_message)
            .map_err(|_| Error::InvalidRawPublicKey)?;
        self.mix_hash(&re_message);
        self.decrypt_and_hash(&mut vec![])?;

        let mut out = [0u8; HANDSHAKE_STEP2_SIZE];

        // e
        let e_pub = self.e.x_only_public_key().0.serialize();
        out[..PUBKEY_SIZE].copy_from_slice(&e_pub);
        self.mix_hash(&e_pub);

        // ee
        let ecdh_ephemeral = Self::ecdh(&self.e.secret_key(), &re_pub);
        self.mix_key(&ecdh_ephemeral);

        // s
        let mut encrypted_static = self.s.x_only_public_key().0.serialize().to_vec();
        self.encrypt_and_hash(&mut encrypted_static)?;
        out[PUBKEY_SIZE..PUBKEY_SIZE + ENCRYPTED_PUBKEY_SIZE]
            .copy_from_slice(&encrypted_static[..ENCRYPTED_PUBKEY_SIZE]);

        // es
        let ecdh_static = Self::ecdh(&self.s.secret_key(), &re_pub);
        self.mix_key(&ecdh_static);

        // certificate
        let mut encrypted_cert = self.cert.to_bytes().to_vec();
        self.encrypt_and_hash(&mut encrypted_cert)?;
        out[PUBKEY_SIZE + ENCRYPTED_PUBKEY_SIZE..]
            .copy_from_slice(&encrypted_cert[..ENCRYPTED_SIGNATURE_NOISE_MESSAGE_SIZE]);

        Ok(out)
    }

    /// Processes handshake message 3, returning the transport codec and
    /// the initiator's static key:
    ///
    /// 1. `decrypt_and_hash` of the encrypted initiator static key;
    /// 2. `mix_key(ECDH(e, rs))`, the `se` token;
    /// 3. HKDF-splits `ck` into the two directional cipher states.
    pub fn step_3(
        &mut self,
        message: [u8; HANDSHAKE_STEP3_SIZE],
    ) -> Result<(NoiseCodec, XOnlyPublicKey), Error> {
        let mut to_decrypt = message.to_vec();
        self.decrypt_and_hash(&mut to_decrypt)?;
        if to_decrypt.len() != PUBKEY_SIZE {
            return Err(Error::InvalidMessageLength {
                expected: PUBKEY_SIZE,
                got: to_decrypt.len(),
            });
        }
        let rs_pub = XOnlyPublicKey::from_slice(&to_decrypt)
            .map_err(|_| Error::InvalidRawPublicKey)?;

        // se
        let ecdh_static = Self::ecdh(&self.e.secret_key(), &rs_pub);
        self.mix_key(&ecdh_static);

        let (temp_k1, temp_k2) = Self::hkdf_2(self.get_ck(), &[]);
        let codec = NoiseCodec {
            // k1 protects initiator -> responder, k2 the other direction.
            encryptor: Cipher::from_key(temp_k2),
            decryptor: Cipher::from_key(temp_k1),
        };
        Ok((codec, rs_pub))
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

impl Drop for Responder {
    fn drop(&mut self) {
        self.erase();
    }
}
