use core::fmt;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Error {
    /// Handshake or AEAD failure from the noise layer.
    Noise(noise_sv2::Error),
    /// A frame length prefix outside `[MAC, 65535]`.
    MalformedFrameLength(usize),
    /// A declared message length that cannot be honored.
    Framing(framing_sv2::Error),
    /// Bytes arrived for a transport that already failed.
    Poisoned,
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::Noise(e) => write!(f, "noise error: {}", e),
            Error::MalformedFrameLength(n) => write!(f, "malformed frame length: {}", n),
            Error::Framing(e) => write!(f, "framing error: {}", e),
            Error::Poisoned => write!(f, "transport already failed"),
        }
    }
}

impl std::error::Error for Error {}

impl From<noise_sv2::Error> for Error {
    fn from(e: noise_sv2::Error) -> Self {
        Error::Noise(e)
    }
}

impl From<framing_sv2::Error> for Error {
    fn from(e: framing_sv2::Error) -> Self {
        Error::Framing(e)
    }
}
