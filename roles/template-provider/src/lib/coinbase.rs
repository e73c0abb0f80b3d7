//! Coinbase handling: splitting a node-assembled block into the pieces a
//! Template Distribution client rebuilds the coinbase from, and the
//! reverse operation when a solution comes back.

use crate::error::Error;
use bitcoin::{
    block::Header,
    consensus::{deserialize, serialize},
    hashes::{sha256d, Hash, HashEngine},
    Block, Transaction, TxOut,
};
use binary_sv2::{Seq064K, B016M, U256};
use template_distribution_sv2::{
    NewTemplate, RequestTransactionDataSuccess, SetNewPrevHash,
};

/// Longest scriptSig prefix the provider will put in a template. With the
/// consensus limit of 100 bytes this leaves clients at least 92 bytes of
/// their own scriptSig space (one length byte is spent on the prefix).
pub const MAX_SCRIPT_SIG_PREFIX: usize = 8;

/// The coinbase-relevant split of a node-assembled block.
#[derive(Debug, Clone)]
pub struct CoinbaseTemplate {
    /// Coinbase transaction nVersion.
    pub version: u32,
    /// nSequence of the only coinbase input.
    pub sequence: u32,
    /// Bytes placed at the beginning of the scriptSig, at most
    /// [`MAX_SCRIPT_SIG_PREFIX`].
    pub script_sig_prefix: Vec<u8>,
    /// First witness stack element of the coinbase input (the BIP 141
    /// witness reserved value); absent for templates without witness data.
    pub witness: Option<[u8; 32]>,
    /// Block subsidy plus fees, spendable by client-added outputs.
    pub value_remaining: u64,
    /// Outputs that must appear as the last outputs of the coinbase
    /// (currently the witness commitment).
    pub required_outputs: Vec<TxOut>,
    pub lock_time: u32,
}

impl CoinbaseTemplate {
    pub fn from_block(block: &Block) -> Result<Self, Error> {
        let coinbase = block
            .txdata
            .first()
            .ok_or_else(|| Error::Upstream("template block has no coinbase".into()))?;
        let input = coinbase
            .input
            .first()
            .ok_or_else(|| Error::Upstream("coinbase has no input".into()))?;

        let script_sig_prefix = input.script_sig.to_bytes();
        if script_sig_prefix.len() > MAX_SCRIPT_SIG_PREFIX {
            return Err(Error::Upstream(format!(
                "coinbase scriptSig prefix of {} bytes leaves too little client space",
                script_sig_prefix.len()
            )));
        }

        let witness = match input.witness.nth(0) {
            Some(reserved) if reserved.len() == 32 => {
                let mut value = [0u8; 32];
                value.copy_from_slice(reserved);
                Some(value)
            }
            _ => None,
        };

        // The dummy output spending the full reward is the client's to
        // replace; zero-valued outputs (the witness commitment) must be
        // carried verbatim.
        let required_outputs: Vec<TxOut> = coinbase
            .output
            .iter()
            .filter(|output| output.value.to_sat() == 0)
            .cloned()
            .collect();
        let value_remaining: u64 = coinbase.output.iter().map(|o| o.value.to_sat()).sum();

        Ok(Self {
            version: coinbase.version.0 as u32,
            sequence: input.sequence.to_consensus_u32(),
            script_sig_prefix,
            witness,
            value_remaining,
            required_outputs,
            lock_time: coinbase.lock_time.to_consensus_u32(),
        })
    }

    fn serialized_outputs(&self) -> Vec<u8> {
        let mut out = Vec::new();
        for output in &self.required_outputs {
            out.extend_from_slice(&serialize(output));
        }
        out
    }
}

/// Merkle path from the coinbase (position 0) to the root, deepest first.
pub fn coinbase_merkle_path(block: &Block) -> Vec<[u8; 32]> {
    let mut level: Vec<sha256d::Hash> = block
        .txdata
        .iter()
        .map(|tx| tx.compute_txid().to_raw_hash())
        .collect();
    let mut path = Vec::new();

    while level.len() > 1 {
        // The coinbase stays at index 0 on every level, so its sibling is
        // always index 1.
        path.push(level[1].to_byte_array());

        let mut next = Vec::with_capacity(level.len().div_ceil(2));
        for pair in level.chunks(2) {
            let left = pair[0];
            let right = *pair.last().expect("chunks are non-empty");
            let mut engine = sha256d::Hash::engine();
            engine.input(left.as_byte_array());
            engine.input(right.as_byte_array());
            next.push(sha256d::Hash::from_engine(engine));
        }
        level = next;
    }
    path
}

/// Builds the `NewTemplate` announcement for a block template.
pub fn new_template_message(
    block: &Block,
    template_id: u64,
    future_template: bool,
    merkle_path: &[[u8; 32]],
) -> Result<NewTemplate, Error> {
    let coinbase = CoinbaseTemplate::from_block(block)?;
    let path: Vec<U256> = merkle_path.iter().map(|h| U256::from(*h)).collect();

    Ok(NewTemplate {
        template_id,
        future_template,
        version: block.header.version.to_consensus() as u32,
        coinbase_tx_version: coinbase.version,
        coinbase_prefix: coinbase.script_sig_prefix.clone().try_into()?,
        coinbase_tx_input_sequence: coinbase.sequence,
        coinbase_tx_value_remaining: coinbase.value_remaining,
        coinbase_tx_outputs_count: coinbase.required_outputs.len() as u32,
        coinbase_tx_outputs: coinbase.serialized_outputs().try_into()?,
        coinbase_tx_locktime: coinbase.lock_time,
        merkle_path: path.try_into()?,
    })
}

/// Builds the `SetNewPrevHash` companion of a future template.
pub fn set_new_prev_hash_message(block: &Block, template_id: u64) -> SetNewPrevHash {
    let header = &block.header;
    SetNewPrevHash {
        template_id,
        prev_hash: U256::from(header.prev_blockhash.to_byte_array()),
        header_timestamp: header.time,
        n_bits: header.bits.to_consensus(),
        target: U256::from(header.target().to_le_bytes()),
    }
}

/// Builds the transaction-data reply for a cached template: all
/// non-coinbase transactions, witness included, plus the witness reserved
/// value as excess data.
pub fn request_transaction_data_success(
    block: &Block,
    template_id: u64,
) -> Result<RequestTransactionDataSuccess, Error> {
    let coinbase = CoinbaseTemplate::from_block(block)?;
    let excess_data: Vec<u8> = coinbase.witness.map(|w| w.to_vec()).unwrap_or_default();

    let mut transaction_list: Vec<B016M> = Vec::with_capacity(block.txdata.len().saturating_sub(1));
    for tx in block.txdata.iter().skip(1) {
        transaction_list.push(serialize(tx).try_into()?);
    }

    Ok(RequestTransactionDataSuccess {
        template_id,
        excess_data: excess_data.try_into()?,
        transaction_list: Seq064K::new(transaction_list)?,
    })
}

/// Reassembles the solved block from a template and the solution fields a
/// client submitted.
pub fn solved_block(
    template: &Block,
    version: u32,
    header_timestamp: u32,
    header_nonce: u32,
    coinbase_tx: &[u8],
) -> Result<Block, Error> {
    let coinbase: Transaction = deserialize(coinbase_tx)
        .map_err(|e| Error::Upstream(format!("solution coinbase does not deserialize: {}", e)))?;

    let mut block = template.clone();
    block.txdata[0] = coinbase;
    let merkle_root = block
        .compute_merkle_root()
        .ok_or_else(|| Error::Upstream("solved block has no merkle root".into()))?;

    block.header = Header {
        version: bitcoin::block::Version::from_consensus(version as i32),
        prev_blockhash: template.header.prev_blockhash,
        merkle_root,
        time: header_timestamp,
        bits: template.header.bits,
        nonce: header_nonce,
    };
    Ok(block)
}
