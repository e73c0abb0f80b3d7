//! The node-side capability the Template Provider is built on.
//!
//! The daemon never talks to a bitcoin node directly; it consumes a
//! [`Mining`] handle passed in at construction and everything it knows
//! about the chain flows through these two traits. The node process and
//! its IPC encoding live outside this repository; tests use
//! [`mock::MockMining`], the shipped binary uses [`crate::node_ipc`].

pub mod mock;

use bitcoin::{Block, BlockHash};
use std::{sync::Arc, time::Duration};

/// A block the node considers part of its active chain.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct BlockRef {
    pub hash: BlockHash,
    pub height: i32,
}

/// Options for template assembly.
#[derive(Debug, Copy, Clone)]
pub struct BlockCreateOptions {
    /// Set false to omit mempool transactions from the template.
    pub use_mempool: bool,
    /// Reserved weight for the fixed block header plus coinbase
    /// scaffolding.
    pub block_reserved_weight: usize,
    /// Maximum additional sigops allowed in downstream coinbase outputs.
    pub coinbase_output_max_additional_sigops: usize,
}

impl Default for BlockCreateOptions {
    fn default() -> Self {
        Self {
            use_mempool: true,
            block_reserved_weight: 8000,
            coinbase_output_max_additional_sigops: 400,
        }
    }
}

/// Options for [`BlockTemplate::wait_next`].
#[derive(Debug, Copy, Clone)]
pub struct BlockWaitOptions {
    /// Give up and return `None` after this long.
    pub timeout: Duration,
    /// Required fee improvement (satoshis) over the template this is
    /// called on before a new template is returned. A tip change always
    /// returns a new template regardless of fees.
    pub fee_threshold: i64,
}

impl Default for BlockWaitOptions {
    fn default() -> Self {
        Self {
            timeout: Duration::MAX,
            fee_threshold: i64::MAX,
        }
    }
}

#[derive(Debug)]
pub enum MiningError {
    /// The capability is unavailable (node shutting down, IPC dropped).
    Unavailable(String),
}

impl core::fmt::Display for MiningError {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            MiningError::Unavailable(e) => write!(f, "mining interface unavailable: {}", e),
        }
    }
}

impl std::error::Error for MiningError {}

/// Chain and template assembly capability of the node.
pub trait Mining: Send + Sync {
    /// True while the node is still catching up with the network.
    fn is_initial_block_download(&self) -> bool;

    /// The node's current tip, `None` before the chain is loaded.
    fn get_tip(&self) -> Option<BlockRef>;

    /// Blocks until the node's tip differs from `current` or `timeout`
    /// elapses; returns the new tip in the former case.
    fn wait_tip_changed(&self, current: BlockHash, timeout: Duration) -> Option<BlockRef>;

    /// Assembles a fresh block template on the current tip.
    fn create_new_block(
        &self,
        options: BlockCreateOptions,
    ) -> Result<Arc<dyn BlockTemplate>, MiningError>;
}

/// A handle to one assembled template, alive as long as solutions for it
/// may still arrive.
pub trait BlockTemplate: Send + Sync {
    /// The full block this template was assembled as, dummy coinbase
    /// included.
    fn get_block(&self) -> Block;

    /// Fee of each non-coinbase transaction, in template order.
    fn get_tx_fees(&self) -> Vec<i64>;

    /// Merkle path from the coinbase position to the root.
    fn get_coinbase_merkle_path(&self) -> Vec<[u8; 32]>;

    /// Blocks until the tip changes, fees improve by at least
    /// `options.fee_threshold`, or `options.timeout` elapses; `None` on
    /// timeout or shutdown.
    fn wait_next(&self, options: BlockWaitOptions) -> Option<Arc<dyn BlockTemplate>>;

    /// Submits a solved header (plus the client-built coinbase) for this
    /// template. Returns whether the node accepted the block.
    fn submit_solution(
        &self,
        version: u32,
        header_timestamp: u32,
        header_nonce: u32,
        coinbase_tx: Vec<u8>,
    ) -> bool;
}
