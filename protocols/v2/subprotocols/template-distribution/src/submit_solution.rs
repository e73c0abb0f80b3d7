use binary_sv2::{Decodable, Encodable, Error, Reader, B064K};
use core::fmt;

/// ## SubmitSolution (Client -> Server)
///
/// Upon finding a valid proof-of-work the client sends the header fields it
/// chose together with the full serialized coinbase transaction. The server
/// reconstructs the block from the referenced template and submits it to
/// the node. No reply is sent; block acceptance is monitored out of band.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubmitSolution {
    pub template_id: u64,
    /// The version field in the block header.
    pub version: u32,
    /// The nTime field in the block header.
    pub header_timestamp: u32,
    /// The nonce field in the block header.
    pub header_nonce: u32,
    /// The full serialized coinbase transaction, ready for block inclusion.
    pub coinbase_tx: B064K,
}

impl fmt::Display for SubmitSolution {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "SubmitSolution(template_id: {}, version: 0x{:08x}, header_timestamp: {}, header_nonce: {})",
            self.template_id, self.version, self.header_timestamp, self.header_nonce
        )
    }
}

impl Encodable for SubmitSolution {
    fn encoded_size(&self) -> usize {
        8 + 4 + 4 + 4 + self.coinbase_tx.encoded_size()
    }

    fn encode(&self, dst: &mut Vec<u8>) {
        self.template_id.encode(dst);
        self.version.encode(dst);
        self.header_timestamp.encode(dst);
        self.header_nonce.encode(dst);
        self.coinbase_tx.encode(dst);
    }
}

impl Decodable for SubmitSolution {
    fn decode(reader: &mut Reader<'_>) -> Result<Self, Error> {
        Ok(Self {
            template_id: u64::decode(reader)?,
            version: u32::decode(reader)?,
            header_timestamp: u32::decode(reader)?,
            header_nonce: u32::decode(reader)?,
            coinbase_tx: B064K::decode(reader)?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use binary_sv2::to_bytes;
    use core::convert::TryInto;

    #[test]
    fn round_trip() {
        let msg = SubmitSolution {
            template_id: 4,
            version: 0x2000_0000,
            header_timestamp: 1231006505,
            header_nonce: 0,
            coinbase_tx: vec![1u8; 90].try_into().unwrap(),
        };
        let bytes = to_bytes(&msg);
        assert_eq!(bytes.len(), 8 + 4 + 4 + 4 + 2 + 90);
        assert_eq!(SubmitSolution::from_bytes(&bytes).unwrap(), msg);
    }
}
