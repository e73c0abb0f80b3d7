use binary_sv2::{Decodable, Encodable, Error, Reader};
use core::fmt;

/// ## CoinbaseOutputConstraints (Client -> Server)
///
/// Ultimately, the pool is able to add coinbase transaction outputs for
/// payouts and other uses. The client advertises how much additional
/// serialized size and how many sigops its own outputs may consume, so the
/// server can reserve room for them when assembling templates.
///
/// A server must receive this message before it sends the first
/// [`crate::NewTemplate`] on a connection.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct CoinbaseOutputConstraints {
    /// Additional serialized bytes needed in coinbase transaction outputs.
    pub coinbase_output_max_additional_size: u32,
    /// Additional sigops needed in coinbase transaction outputs.
    pub coinbase_output_max_additional_sigops: u16,
}

impl fmt::Display for CoinbaseOutputConstraints {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "CoinbaseOutputConstraints(max_additional_size: {}, max_additional_sigops: {})",
            self.coinbase_output_max_additional_size, self.coinbase_output_max_additional_sigops
        )
    }
}

impl Encodable for CoinbaseOutputConstraints {
    fn encoded_size(&self) -> usize {
        6
    }

    fn encode(&self, dst: &mut Vec<u8>) {
        self.coinbase_output_max_additional_size.encode(dst);
        self.coinbase_output_max_additional_sigops.encode(dst);
    }
}

impl Decodable for CoinbaseOutputConstraints {
    fn decode(reader: &mut Reader<'_>) -> Result<Self, Error> {
        Ok(Self {
            coinbase_output_max_additional_size: u32::decode(reader)?,
            coinbase_output_max_additional_sigops: u16::decode(reader)?,
        })
    }
}
