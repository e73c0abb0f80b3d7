//! # Codec-SV2: the encrypted Sv2 transport
//!
//! [`Sv2Transport`] owns everything between the raw socket bytes and whole
//! Sv2 messages on an encrypted connection:
//!
//! - it drives the noise handshake (either role), queueing handshake
//!   replies on the send side automatically;
//! - after the handshake it frames outgoing messages (`length:u24-LE ‖
//!   ciphertext`), splitting messages larger than one frame and sealing
//!   every frame independently;
//! - on the receive side it reassembles frames, decrypts them and
//!   reconstitutes logical messages, however the byte stream was
//!   fragmented in transit.
//!
//! The transport is a pure state machine: the caller shovels bytes between
//! it and the socket with [`Sv2Transport::received_bytes`],
//! [`Sv2Transport::get_bytes_to_send`] and
//! [`Sv2Transport::mark_bytes_sent`], which keeps it usable from both the
//! async connection manager and plain blocking test harnesses.

mod error;
mod transport;

pub use error::Error;
pub use transport::{Sv2NetMsg, Sv2Transport};

pub use noise_sv2::{Certificate, Initiator, Responder};
