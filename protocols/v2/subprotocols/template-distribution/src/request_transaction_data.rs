use binary_sv2::{Decodable, Encodable, Error, Reader, Seq064K, Str0255, B016M, B064K};
use core::fmt;

/// ## RequestTransactionData (Client -> Server)
///
/// Asks for the full transaction set (and any excess data the client needs
/// to reconstruct the block) of a previously pushed template.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct RequestTransactionData {
    pub template_id: u64,
}

impl fmt::Display for RequestTransactionData {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "RequestTransactionData(template_id: {})", self.template_id)
    }
}

impl Encodable for RequestTransactionData {
    fn encoded_size(&self) -> usize {
        8
    }

    fn encode(&self, dst: &mut Vec<u8>) {
        self.template_id.encode(dst);
    }
}

impl Decodable for RequestTransactionData {
    fn decode(reader: &mut Reader<'_>) -> Result<Self, Error> {
        Ok(Self {
            template_id: u64::decode(reader)?,
        })
    }
}

/// ## RequestTransactionData.Success (Server -> Client)
///
/// Transactions are serialized with witness data, in template order,
/// coinbase excluded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestTransactionDataSuccess {
    pub template_id: u64,
    /// Extra data the coinbase has to commit to; carries the witness
    /// reserved value for templates with a witness commitment.
    pub excess_data: B064K,
    pub transaction_list: Seq064K<B016M>,
}

impl fmt::Display for RequestTransactionDataSuccess {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "RequestTransactionDataSuccess(template_id: {}, transactions: {})",
            self.template_id,
            self.transaction_list.len()
        )
    }
}

impl Encodable for RequestTransactionDataSuccess {
    fn encoded_size(&self) -> usize {
        8 + self.excess_data.encoded_size() + self.transaction_list.encoded_size()
    }

    fn encode(&self, dst: &mut Vec<u8>) {
        self.template_id.encode(dst);
        self.excess_data.encode(dst);
        self.transaction_list.encode(dst);
    }
}

impl Decodable for RequestTransactionDataSuccess {
    fn decode(reader: &mut Reader<'_>) -> Result<Self, Error> {
        Ok(Self {
            template_id: u64::decode(reader)?,
            excess_data: B064K::decode(reader)?,
            transaction_list: Seq064K::decode(reader)?,
        })
    }
}

/// ## RequestTransactionData.Error (Server -> Client)
///
/// Error codes:
/// - `template-id-not-found`
/// - `stale-template-id`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestTransactionDataError {
    pub template_id: u64,
    pub error_code: Str0255,
}

impl fmt::Display for RequestTransactionDataError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "RequestTransactionDataError(template_id: {}, error_code: {})",
            self.template_id,
            self.error_code.as_utf8_or_hex()
        )
    }
}

impl Encodable for RequestTransactionDataError {
    fn encoded_size(&self) -> usize {
        8 + self.error_code.encoded_size()
    }

    fn encode(&self, dst: &mut Vec<u8>) {
        self.template_id.encode(dst);
        self.error_code.encode(dst);
    }
}

impl Decodable for RequestTransactionDataError {
    fn decode(reader: &mut Reader<'_>) -> Result<Self, Error> {
        Ok(Self {
            template_id: u64::decode(reader)?,
            error_code: Str0255::decode(reader)?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use binary_sv2::to_bytes;
    use core::convert::TryInto;

    #[test]
    fn success_round_trip() {
        let tx = vec![0x02u8; 120];
        let msg = RequestTransactionDataSuccess {
            template_id: 3,
            excess_data: vec![0xaa; 32].try_into().unwrap(),
            transaction_list: vec![B016M::try_from(tx).unwrap()].try_into().unwrap(),
        };
        let bytes = to_bytes(&msg);
        // 8 id + (2 + 32) excess + 2 count + (3 + 120) tx
        assert_eq!(bytes.len(), 8 + 34 + 2 + 123);
        assert_eq!(RequestTransactionDataSuccess::from_bytes(&bytes).unwrap(), msg);
    }

    #[test]
    fn error_round_trip() {
        let msg = RequestTransactionDataError {
            template_id: 9,
            error_code: "stale-template-id".try_into().unwrap(),
        };
        let bytes = to_bytes(&msg);
        assert_eq!(RequestTransactionDataError::from_bytes(&bytes).unwrap(), msg);
    }
}
