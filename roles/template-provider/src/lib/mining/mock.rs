//! Deterministic in-process implementation of the [`Mining`] capability.
//!
//! Drives the test suite: tests flip the tip or bump mempool fees through
//! the control methods and observe what the Template Provider pushes to
//! its peers. Submitted solutions are recorded verbatim.

use super::{BlockCreateOptions, BlockRef, BlockTemplate, BlockWaitOptions, Mining, MiningError};
use crate::coinbase;
use bitcoin::{
    absolute::LockTime,
    block::{Header, Version as BlockVersion},
    hashes::Hash,
    transaction::Version as TxVersion,
    Amount, Block, BlockHash, CompactTarget, OutPoint, ScriptBuf, Sequence, Transaction, TxIn,
    TxMerkleNode, TxOut, Txid, Witness,
};
use std::{
    sync::{Arc, Condvar, Mutex},
    time::{Duration, Instant},
};

const SUBSIDY: i64 = 625_000_000;
const BLOCK_TIME: u32 = 1_231_006_505;
const BITS: u32 = 0x1d00_ffff;

/// A `SubmitSolution` the mock received, field for field.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordedSolution {
    pub version: u32,
    pub header_timestamp: u32,
    pub header_nonce: u32,
    pub coinbase_tx: Vec<u8>,
}

struct MockChain {
    tip: BlockRef,
    extra_txs: Vec<Transaction>,
    tx_fees: Vec<i64>,
    solutions: Vec<RecordedSolution>,
    initial_block_download: bool,
    shutdown: bool,
    templates_created: u64,
    tx_counter: u64,
}

impl MockChain {
    fn total_fees(&self) -> i64 {
        self.tx_fees.iter().sum()
    }

    fn build_block(&self) -> Block {
        let height = self.tip.height + 1;
        let coinbase = coinbase_tx(height, SUBSIDY + self.total_fees());
        let mut txdata = vec![coinbase];
        txdata.extend(self.extra_txs.iter().cloned());

        let mut block = Block {
            header: Header {
                version: BlockVersion::from_consensus(0x2000_0000),
                prev_blockhash: self.tip.hash,
                merkle_root: TxMerkleNode::all_zeros(),
                time: BLOCK_TIME + height as u32,
                bits: CompactTarget::from_consensus(BITS),
                nonce: 0,
            },
            txdata,
        };
        block.header.merkle_root = block.compute_merkle_root().expect("txdata is non-empty");
        block
    }
}

struct Shared {
    chain: Mutex<MockChain>,
    cond: Condvar,
}

/// Controllable mock of the node's mining interface.
#[derive(Clone)]
pub struct MockMining(Arc<Shared>);

impl Default for MockMining {
    fn default() -> Self {
        Self::new()
    }
}

impl MockMining {
    pub fn new() -> Self {
        MockMining(Arc::new(Shared {
            chain: Mutex::new(MockChain {
                tip: BlockRef {
                    hash: block_hash(0x11, 0),
                    height: 0,
                },
                extra_txs: Vec::new(),
                tx_fees: Vec::new(),
                solutions: Vec::new(),
                initial_block_download: false,
                shutdown: false,
                templates_created: 0,
                tx_counter: 0,
            }),
            cond: Condvar::new(),
        }))
    }

    /// Advances the chain tip to a new deterministic hash, emptying the
    /// mock mempool (the previous transactions were "mined").
    pub fn trigger_new_tip(&self) -> BlockRef {
        let mut chain = self.0.chain.lock().expect("mock lock");
        let height = chain.tip.height + 1;
        chain.tip = BlockRef {
            hash: block_hash(0x22, height as u64),
            height,
        };
        chain.extra_txs.clear();
        chain.tx_fees.clear();
        let tip = chain.tip;
        drop(chain);
        self.0.cond.notify_all();
        tip
    }

    /// Adds `n_txs` transactions paying `fee_per_tx` each to the mock
    /// mempool.
    pub fn trigger_fee_increase(&self, n_txs: usize, fee_per_tx: i64) {
        let mut chain = self.0.chain.lock().expect("mock lock");
        for _ in 0..n_txs {
            chain.tx_counter += 1;
            let tx = dummy_tx(chain.tx_counter);
            chain.extra_txs.push(tx);
            chain.tx_fees.push(fee_per_tx);
        }
        drop(chain);
        self.0.cond.notify_all();
    }

    pub fn set_initial_block_download(&self, ibd: bool) {
        self.0.chain.lock().expect("mock lock").initial_block_download = ibd;
        self.0.cond.notify_all();
    }

    /// Unblocks every pending wait and makes further waits return
    /// immediately.
    pub fn shutdown(&self) {
        self.0.chain.lock().expect("mock lock").shutdown = true;
        self.0.cond.notify_all();
    }

    pub fn solutions(&self) -> Vec<RecordedSolution> {
        self.0.chain.lock().expect("mock lock").solutions.clone()
    }

    pub fn templates_created(&self) -> u64 {
        self.0.chain.lock().expect("mock lock").templates_created
    }
}

impl Mining for MockMining {
    fn is_initial_block_download(&self) -> bool {
        self.0.chain.lock().expect("mock lock").initial_block_download
    }

    fn get_tip(&self) -> Option<BlockRef> {
        Some(self.0.chain.lock().expect("mock lock").tip)
    }

    fn wait_tip_changed(&self, current: BlockHash, timeout: Duration) -> Option<BlockRef> {
        let deadline = Instant::now() + timeout;
        let mut chain = self.0.chain.lock().expect("mock lock");
        loop {
            if chain.shutdown {
                return None;
            }
            if chain.tip.hash != current {
                return Some(chain.tip);
            }
            let remaining = deadline.checked_duration_since(Instant::now())?;
            let (guard, result) = self
                .0
                .cond
                .wait_timeout(chain, remaining)
                .expect("mock lock");
            chain = guard;
            if result.timed_out() && chain.tip.hash == current {
                return None;
            }
        }
    }

    fn create_new_block(
        &self,
        _options: BlockCreateOptions,
    ) -> Result<Arc<dyn BlockTemplate>, MiningError> {
        let mut chain = self.0.chain.lock().expect("mock lock");
        if chain.shutdown {
            return Err(MiningError::Unavailable("mock is shut down".into()));
        }
        chain.templates_created += 1;
        let block = chain.build_block();
        let fees = chain.tx_fees.clone();
        let base_total_fees = chain.total_fees();
        Ok(Arc::new(MockTemplate {
            block,
            fees,
            base_total_fees,
            shared: self.0.clone(),
        }))
    }
}

struct MockTemplate {
    block: Block,
    fees: Vec<i64>,
    base_total_fees: i64,
    shared: Arc<Shared>,
}

impl BlockTemplate for MockTemplate {
    fn get_block(&self) -> Block {
        self.block.clone()
    }

    fn get_tx_fees(&self) -> Vec<i64> {
        self.fees.clone()
    }

    fn get_coinbase_merkle_path(&self) -> Vec<[u8; 32]> {
        coinbase::coinbase_merkle_path(&self.block)
    }

    fn wait_next(&self, options: BlockWaitOptions) -> Option<Arc<dyn BlockTemplate>> {
        let deadline = Instant::now().checked_add(options.timeout);
        let mut chain = self.shared.chain.lock().expect("mock lock");
        loop {
            if chain.shutdown {
                return None;
            }
            let tip_changed = chain.tip.hash != self.block.header.prev_blockhash;
            let fees_improved =
                chain.total_fees() - self.base_total_fees >= options.fee_threshold;
            if tip_changed || fees_improved {
                chain.templates_created += 1;
                let block = chain.build_block();
                let fees = chain.tx_fees.clone();
                let base_total_fees = chain.total_fees();
                return Some(Arc::new(MockTemplate {
                    block,
                    fees,
                    base_total_fees,
                    shared: self.shared.clone(),
                }));
            }
            // A deadline past the representable range means "wait forever".
            let remaining = match deadline {
                Some(deadline) => deadline.checked_duration_since(Instant::now())?,
                None => Duration::from_secs(3600),
            };
            let (guard, _) = self
                .shared
                .cond
                .wait_timeout(chain, remaining)
                .expect("mock lock");
            chain = guard;
        }
    }

    fn submit_solution(
        &self,
        version: u32,
        header_timestamp: u32,
        header_nonce: u32,
        coinbase_tx: Vec<u8>,
    ) -> bool {
        let mut chain = self.shared.chain.lock().expect("mock lock");
        chain.solutions.push(RecordedSolution {
            version,
            header_timestamp,
            header_nonce,
            coinbase_tx,
        });
        true
    }
}

fn block_hash(tag: u8, n: u64) -> BlockHash {
    let mut raw = [tag; 32];
    raw[..8].copy_from_slice(&n.to_le_bytes());
    BlockHash::from_byte_array(raw)
}

fn coinbase_tx(height: i32, value: i64) -> Transaction {
    let height_bytes = height.to_le_bytes();
    // Minimal BIP 34 style prefix: push of the 3-byte height.
    let script_sig = ScriptBuf::from_bytes(vec![
        0x03,
        height_bytes[0],
        height_bytes[1],
        height_bytes[2],
    ]);
    // OP_RETURN witness commitment placeholder.
    let mut commitment = vec![0x6a, 0x24, 0xaa, 0x21, 0xa9, 0xed];
    commitment.extend_from_slice(&[0u8; 32]);

    Transaction {
        version: TxVersion(2),
        lock_time: LockTime::ZERO,
        input: vec![TxIn {
            previous_output: OutPoint::null(),
            script_sig,
            sequence: Sequence::MAX,
            witness: Witness::from_slice(&[[0u8; 32]]),
        }],
        output: vec![
            TxOut {
                value: Amount::from_sat(value as u64),
                script_pubkey: ScriptBuf::new(),
            },
            TxOut {
                value: Amount::from_sat(0),
                script_pubkey: ScriptBuf::from_bytes(commitment),
            },
        ],
    }
}

fn dummy_tx(n: u64) -> Transaction {
    let mut txid = [0xabu8; 32];
    txid[..8].copy_from_slice(&n.to_le_bytes());
    Transaction {
        version: TxVersion(2),
        lock_time: LockTime::ZERO,
        input: vec![TxIn {
            previous_output: OutPoint {
                txid: Txid::from_byte_array(txid),
                vout: 0,
            },
            script_sig: ScriptBuf::new(),
            sequence: Sequence::MAX,
            witness: Witness::new(),
        }],
        output: vec![TxOut {
            value: Amount::from_sat(900),
            script_pubkey: ScriptBuf::new(),
        }],
    }
}

/// Deterministic block for unit tests: `seed` picks the prev hash,
/// `n_txs` the number of non-coinbase transactions.
pub fn test_block(seed: u8, n_txs: usize) -> Block {
    let chain = MockChain {
        tip: BlockRef {
            hash: block_hash(seed, seed as u64),
            height: seed as i32,
        },
        extra_txs: (1..=n_txs as u64).map(dummy_tx).collect(),
        tx_fees: vec![1_000; n_txs],
        solutions: Vec::new(),
        initial_block_download: false,
        shutdown: false,
        templates_created: 0,
        tx_counter: n_txs as u64,
    };
    chain.build_block()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wait_tip_changed_times_out_on_stable_tip() {
        let mock = MockMining::new();
        let tip = mock.get_tip().unwrap();
        assert!(mock
            .wait_tip_changed(tip.hash, Duration::from_millis(20))
            .is_none());
    }

    #[test]
    fn wait_tip_changed_sees_new_tip() {
        let mock = MockMining::new();
        let tip = mock.get_tip().unwrap();
        let waiter = {
            let mock = mock.clone();
            std::thread::spawn(move || mock.wait_tip_changed(tip.hash, Duration::from_secs(5)))
        };
        std::thread::sleep(Duration::from_millis(20));
        let new_tip = mock.trigger_new_tip();
        assert_eq!(waiter.join().unwrap(), Some(new_tip));
    }

    #[test]
    fn wait_next_returns_on_fee_increase() {
        let mock = MockMining::new();
        let template = mock
            .create_new_block(BlockCreateOptions::default())
            .unwrap();

        // No improvement yet.
        assert!(template
            .wait_next(BlockWaitOptions {
                timeout: Duration::from_millis(20),
                fee_threshold: 1_000,
            })
            .is_none());

        mock.trigger_fee_increase(2, 600);
        let better = template
            .wait_next(BlockWaitOptions {
                timeout: Duration::from_secs(5),
                fee_threshold: 1_000,
            })
            .expect("fees rose above the threshold");
        assert_eq!(better.get_tx_fees(), vec![600, 600]);
        assert_eq!(better.get_block().txdata.len(), 3);
    }

    #[test]
    fn wait_next_returns_on_tip_change_regardless_of_fees() {
        let mock = MockMining::new();
        let template = mock
            .create_new_block(BlockCreateOptions::default())
            .unwrap();
        mock.trigger_new_tip();
        let next = template
            .wait_next(BlockWaitOptions {
                timeout: Duration::from_secs(5),
                fee_threshold: i64::MAX,
            })
            .expect("tip changed");
        assert_ne!(
            next.get_block().header.prev_blockhash,
            template.get_block().header.prev_blockhash
        );
    }

    #[test]
    fn solutions_are_recorded_verbatim() {
        let mock = MockMining::new();
        let template = mock
            .create_new_block(BlockCreateOptions::default())
            .unwrap();
        assert!(template.submit_solution(0x2000_0000, 1_231_006_505, 7, vec![0xde, 0xad]));
        assert_eq!(
            mock.solutions(),
            vec![RecordedSolution {
                version: 0x2000_0000,
                header_timestamp: 1_231_006_505,
                header_nonce: 7,
                coinbase_tx: vec![0xde, 0xad],
            }]
        );
    }
}
