//! Constants used across the Sv2 Template Provider stack: framing sizes,
//! handshake message sizes, protocol discriminants and message type
//! identifiers for the common and Template Distribution (sub)protocols.
//!
//! Keeping these in one crate ensures the framing, noise and codec layers
//! never disagree about on-wire sizes.

/// `extension_type` value for messages that carry no extension.
pub const EXTENSION_TYPE_NO_EXTENSION: u16 = 0;

/// Size of the plaintext Sv2 message header in bytes
/// (`extension_type:u16 | msg_type:u8 | msg_length:u24`).
pub const SV2_FRAME_HEADER_SIZE: usize = 6;

/// Size of the noise frame length prefix in bytes (`u24` little endian).
pub const NOISE_FRAME_HEADER_SIZE: usize = 3;

/// Maximum ciphertext (including MAC) carried by a single noise frame.
pub const NOISE_FRAME_MAX_SIZE: usize = u16::MAX as usize;

/// Size of the MAC appended by the ChaCha20-Poly1305 AEAD.
pub const AEAD_MAC_LEN: usize = 16;

/// Maximum plaintext a single noise frame can carry. Sv2 messages larger
/// than this are split across frames by the sender and reassembled by the
/// receiver.
pub const SV2_FRAME_CHUNK_SIZE: usize = NOISE_FRAME_MAX_SIZE - AEAD_MAC_LEN;

/// Size of a serialized x-only secp256k1 public key.
pub const PUBKEY_SIZE: usize = 32;

/// Size of an encrypted public key: the 32-byte key plus the AEAD MAC.
pub const ENCRYPTED_PUBKEY_SIZE: usize = PUBKEY_SIZE + AEAD_MAC_LEN;

/// Size of the certificate blob exchanged during the handshake
/// (`version:u16 | valid_from:u32 | valid_to:u32 | sig:[64]`).
pub const SIGNATURE_NOISE_MESSAGE_SIZE: usize = 74;

/// Size of the encrypted certificate blob, including the AEAD MAC.
pub const ENCRYPTED_SIGNATURE_NOISE_MESSAGE_SIZE: usize =
    SIGNATURE_NOISE_MESSAGE_SIZE + AEAD_MAC_LEN;

/// Size of handshake message 1 (initiator ephemeral key, plaintext).
pub const HANDSHAKE_STEP1_SIZE: usize = PUBKEY_SIZE;

/// Size of handshake message 2: responder ephemeral key (plaintext),
/// encrypted responder static key, encrypted certificate.
pub const HANDSHAKE_STEP2_SIZE: usize =
    PUBKEY_SIZE + ENCRYPTED_PUBKEY_SIZE + ENCRYPTED_SIGNATURE_NOISE_MESSAGE_SIZE;

/// Size of handshake message 3 (encrypted initiator static key).
pub const HANDSHAKE_STEP3_SIZE: usize = ENCRYPTED_PUBKEY_SIZE;

/// If the protocol name is longer than 32 bytes the chaining key is
/// initialized with its SHA-256 hash. This is the precomputed hash of
/// `Noise_XK_secp256k1+X25519_ChaChaPoly_SHA256`.
pub const NOISE_HASHED_PROTOCOL_NAME_CHACHA: [u8; 32] = [
    69, 136, 62, 176, 37, 58, 164, 199, 30, 117, 201, 114, 182, 137, 28, 254, 127, 92, 21, 223,
    224, 56, 231, 130, 216, 205, 82, 117, 31, 190, 159, 254,
];

/// Discriminant of the Template Distribution (sub)protocol in
/// `SetupConnection.protocol`.
pub const SV2_TEMPLATE_DISTRIBUTION_PROTOCOL_DISCRIMINANT: u8 = 2;

/// Protocol version implemented by this stack, used during
/// `SetupConnection` version negotiation.
pub const SV2_PROTOCOL_VERSION: u16 = 2;

// Common (sub)protocol messages.
pub const MESSAGE_TYPE_SETUP_CONNECTION: u8 = 0x00;
pub const MESSAGE_TYPE_SETUP_CONNECTION_SUCCESS: u8 = 0x01;
pub const MESSAGE_TYPE_SETUP_CONNECTION_ERROR: u8 = 0x02;

// Template Distribution (sub)protocol messages.
pub const MESSAGE_TYPE_COINBASE_OUTPUT_CONSTRAINTS: u8 = 0x70;
pub const MESSAGE_TYPE_NEW_TEMPLATE: u8 = 0x71;
pub const MESSAGE_TYPE_SET_NEW_PREV_HASH: u8 = 0x72;
pub const MESSAGE_TYPE_REQUEST_TRANSACTION_DATA: u8 = 0x73;
pub const MESSAGE_TYPE_REQUEST_TRANSACTION_DATA_SUCCESS: u8 = 0x74;
pub const MESSAGE_TYPE_REQUEST_TRANSACTION_DATA_ERROR: u8 = 0x75;
pub const MESSAGE_TYPE_SUBMIT_SOLUTION: u8 = 0x76;
