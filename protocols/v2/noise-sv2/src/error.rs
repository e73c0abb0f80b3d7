use core::fmt;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Error {
    /// A 32-byte slice is not a valid x-only public key.
    InvalidRawPublicKey,
    /// A 32-byte slice is not a valid secret key.
    InvalidRawPrivateKey,
    /// A handshake message had the wrong size.
    InvalidMessageLength { expected: usize, got: usize },
    /// The responder's certificate failed signature or validity-window
    /// checks; carries the raw blob for diagnostics.
    InvalidCertificate([u8; 74]),
    /// AEAD sealing or opening failed (tag mismatch on open).
    Aead,
    /// The nonce counter would reach `2^64 - 1`; the session must end.
    NonceExhaustion,
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::InvalidRawPublicKey => write!(f, "invalid x-only public key"),
            Error::InvalidRawPrivateKey => write!(f, "invalid secret key"),
            Error::InvalidMessageLength { expected, got } => {
                write!(f, "invalid handshake message length: expected {}, got {}", expected, got)
            }
            Error::InvalidCertificate(_) => write!(f, "certificate verification failed"),
            Error::Aead => write!(f, "AEAD operation failed"),
            Error::NonceExhaustion => write!(f, "AEAD nonce space exhausted"),
        }
    }
}

impl std::error::Error for Error {}

impl From<chacha20poly1305::aead::Error> for Error {
    fn from(_: chacha20poly1305::aead::Error) -> Self {
        Error::Aead
    }
}
