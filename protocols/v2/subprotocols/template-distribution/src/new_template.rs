use binary_sv2::{Decodable, Encodable, Error, Reader, Seq0255, B0255, B064K, U256};
use core::fmt;

/// ## NewTemplate (Server -> Client)
///
/// The primary template-providing message. The `coinbase_tx_outputs` bytes
/// appear as-is at the end of the coinbase transaction the client builds.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewTemplate {
    /// Server's identification of the template; strictly increasing.
    pub template_id: u64,
    /// True if the template is intended for a future
    /// [`crate::SetNewPrevHash`] sent on the channel. If false, the job
    /// relates to the last sent prev hash and mining may start immediately.
    pub future_template: bool,
    /// Valid block header version reflecting current network consensus.
    pub version: u32,
    /// The coinbase transaction nVersion field.
    pub coinbase_tx_version: u32,
    /// Up to 8 bytes (not counting the length byte) placed at the start of
    /// the coinbase scriptSig, leaving the client at least 92 bytes of its
    /// own scriptSig space.
    pub coinbase_prefix: B0255,
    /// The coinbase transaction input's nSequence field.
    pub coinbase_tx_input_sequence: u32,
    /// Satoshis available for spending in client-added coinbase outputs;
    /// includes fees and block subsidy.
    pub coinbase_tx_value_remaining: u64,
    /// Number of outputs serialized in `coinbase_tx_outputs`.
    pub coinbase_tx_outputs_count: u32,
    /// Outputs that must be included as the last outputs of the coinbase.
    pub coinbase_tx_outputs: B064K,
    /// The locktime field of the coinbase transaction.
    pub coinbase_tx_locktime: u32,
    /// Merkle path hashes ordered from deepest.
    pub merkle_path: Seq0255<U256>,
}

impl fmt::Display for NewTemplate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "NewTemplate(template_id: {}, future: {}, value_remaining: {}, merkle_path_len: {})",
            self.template_id,
            self.future_template,
            self.coinbase_tx_value_remaining,
            self.merkle_path.len()
        )
    }
}

impl Encodable for NewTemplate {
    fn encoded_size(&self) -> usize {
        8 + 1
            + 4
            + 4
            + self.coinbase_prefix.encoded_size()
            + 4
            + 8
            + 4
            + self.coinbase_tx_outputs.encoded_size()
            + 4
            + self.merkle_path.encoded_size()
    }

    fn encode(&self, dst: &mut Vec<u8>) {
        self.template_id.encode(dst);
        self.future_template.encode(dst);
        self.version.encode(dst);
        self.coinbase_tx_version.encode(dst);
        self.coinbase_prefix.encode(dst);
        self.coinbase_tx_input_sequence.encode(dst);
        self.coinbase_tx_value_remaining.encode(dst);
        self.coinbase_tx_outputs_count.encode(dst);
        self.coinbase_tx_outputs.encode(dst);
        self.coinbase_tx_locktime.encode(dst);
        self.merkle_path.encode(dst);
    }
}

impl Decodable for NewTemplate {
    fn decode(reader: &mut Reader<'_>) -> Result<Self, Error> {
        Ok(Self {
            template_id: u64::decode(reader)?,
            future_template: bool::decode(reader)?,
            version: u32::decode(reader)?,
            coinbase_tx_version: u32::decode(reader)?,
            coinbase_prefix: B0255::decode(reader)?,
            coinbase_tx_input_sequence: u32::decode(reader)?,
            coinbase_tx_value_remaining: u64::decode(reader)?,
            coinbase_tx_outputs_count: u32::decode(reader)?,
            coinbase_tx_outputs: B064K::decode(reader)?,
            coinbase_tx_locktime: u32::decode(reader)?,
            merkle_path: Seq0255::decode(reader)?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use binary_sv2::to_bytes;
    use core::convert::TryInto;

    fn sample() -> NewTemplate {
        NewTemplate {
            template_id: 7,
            future_template: true,
            version: 0x2000_0000,
            coinbase_tx_version: 2,
            coinbase_prefix: vec![0x03, 0x12, 0x34, 0x56].try_into().unwrap(),
            coinbase_tx_input_sequence: 0xffff_ffff,
            coinbase_tx_value_remaining: 625_000_000,
            coinbase_tx_outputs_count: 1,
            coinbase_tx_outputs: vec![0u8; 44].try_into().unwrap(),
            coinbase_tx_locktime: 0,
            merkle_path: vec![U256::from([9u8; 32])].try_into().unwrap(),
        }
    }

    #[test]
    fn round_trip() {
        let msg = sample();
        let bytes = to_bytes(&msg);
        assert_eq!(bytes.len(), msg.encoded_size());
        assert_eq!(NewTemplate::from_bytes(&bytes).unwrap(), msg);
    }

    #[test]
    fn truncated_merkle_path_is_rejected() {
        let msg = sample();
        let mut bytes = to_bytes(&msg);
        bytes.truncate(bytes.len() - 1);
        assert_eq!(NewTemplate::from_bytes(&bytes), Err(Error::OutOfBound));
    }
}
