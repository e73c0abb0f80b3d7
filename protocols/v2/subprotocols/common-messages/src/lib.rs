//! # Common Sv2 messages
//!
//! The connection-setup messages every Sv2 (sub)protocol starts with:
//! [`SetupConnection`], answered by either [`SetupConnectionSuccess`] or
//! [`SetupConnectionError`].

mod setup_connection;

pub use setup_connection::{
    Protocol, SetupConnection, SetupConnectionError, SetupConnectionSuccess,
};
