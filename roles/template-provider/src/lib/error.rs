use core::fmt;

/// Daemon-level errors.
///
/// Transport and handshake failures stay inside the connection manager and
/// only ever cost the offending peer its connection; the variants here are
/// the ones that surface to the operator.
#[derive(Debug)]
pub enum Error {
    /// CLI arguments or configuration file could not be processed.
    BadCliArgs(String),
    Io(std::io::Error),
    /// The authority key file exists but cannot be parsed.
    BadAuthorityKey(noise_sv2::formats::KeyError),
    /// The listener could not be bound or the network threads not started.
    Bind(String),
    /// The `Mining` capability failed or the IPC link dropped.
    Upstream(String),
    BinarySv2(binary_sv2::Error),
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::BadCliArgs(e) => write!(f, "bad CLI arguments: {}", e),
            Error::Io(e) => write!(f, "I/O error: {}", e),
            Error::BadAuthorityKey(e) => write!(f, "corrupt authority key: {}", e),
            Error::Bind(e) => write!(f, "cannot start listener: {}", e),
            Error::Upstream(e) => write!(f, "mining interface error: {}", e),
            Error::BinarySv2(e) => write!(f, "binary codec error: {}", e),
        }
    }
}

impl std::error::Error for Error {}

impl From<std::io::Error> for Error {
    fn from(e: std::io::Error) -> Self {
        Error::Io(e)
    }
}

impl From<noise_sv2::formats::KeyError> for Error {
    fn from(e: noise_sv2::formats::KeyError) -> Self {
        Error::BadAuthorityKey(e)
    }
}

impl From<binary_sv2::Error> for Error {
    fn from(e: binary_sv2::Error) -> Self {
        Error::BinarySv2(e)
    }
}
