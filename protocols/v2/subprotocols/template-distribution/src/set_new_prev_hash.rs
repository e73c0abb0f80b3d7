use binary_sv2::{Decodable, Encodable, Error, Reader, U256};
use core::fmt;

/// ## SetNewPrevHash (Server -> Client)
///
/// Sent upon a chain tip change. Client work relating to a
/// [`crate::NewTemplate`] with the same `template_id` becomes immediately
/// valid; work for other templates is stale.
///
/// The server must have sent the referenced `NewTemplate` (with
/// `future_template = true`) on the same connection beforehand.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SetNewPrevHash {
    /// Template the new prev hash applies to.
    pub template_id: u64,
    /// Hash of the new chain tip, as it appears in the block header.
    pub prev_hash: U256,
    /// nTime the client may use in its block header.
    pub header_timestamp: u32,
    /// Compact difficulty target for the new block.
    pub n_bits: u32,
    /// Expanded difficulty target; redundant with `n_bits` but saves the
    /// client the expansion.
    pub target: U256,
}

impl fmt::Display for SetNewPrevHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "SetNewPrevHash(template_id: {}, prev_hash: {}, header_timestamp: {}, n_bits: 0x{:08x})",
            self.template_id, self.prev_hash, self.header_timestamp, self.n_bits
        )
    }
}

impl Encodable for SetNewPrevHash {
    fn encoded_size(&self) -> usize {
        8 + 32 + 4 + 4 + 32
    }

    fn encode(&self, dst: &mut Vec<u8>) {
        self.template_id.encode(dst);
        self.prev_hash.encode(dst);
        self.header_timestamp.encode(dst);
        self.n_bits.encode(dst);
        self.target.encode(dst);
    }
}

impl Decodable for SetNewPrevHash {
    fn decode(reader: &mut Reader<'_>) -> Result<Self, Error> {
        Ok(Self {
            template_id: u64::decode(reader)?,
            prev_hash: U256::decode(reader)?,
            header_timestamp: u32::decode(reader)?,
            n_bits: u32::decode(reader)?,
            target: U256::decode(reader)?,
        })
    }
}
