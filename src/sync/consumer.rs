use std::collections::HashSet;

use crate::types::{BlockHeight, BlockTemplate, Hash, SyncStart, Transaction};

/// Contiguous run of block hashes learned in one fetch cycle.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct BlockchainInterval {
    pub start_height: BlockHeight,
    pub blocks: Vec<Hash>,
}

/// Block as handed to consumers.
///
/// When the node delivered a body, `transactions` starts with the reward
/// transaction, then the static reward transaction when the block version
/// enables it, then every other transaction of the block.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompleteBlock {
    pub timestamp: u64,
    pub block_hash: Hash,
    pub block: Option<BlockTemplate>,
    pub transactions: Vec<Transaction>,
}

/// Why a pool transaction disappeared.
///
/// Only `IncludedInBlock` is reported: the real reason is not observable
/// from a pool difference.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[non_exhaustive]
pub enum DeletionReason {
    IncludedInBlock,
}

/// Something that interprets blocks and pool transactions, e.g. a wallet.
///
/// Consumers are called from the synchronizer worker thread only, one call
/// at a time, and are never owned by the synchronizer.
pub trait BlockchainConsumer: Send + Sync {
    fn sync_start(&self) -> SyncStart;

    fn known_pool_tx_ids(&self) -> HashSet<Hash>;

    /// Every block at `height` and above is no longer on the main chain.
    fn on_blockchain_detach(&self, height: BlockHeight);

    /// Returns how many of `blocks` were accepted, starting from the first.
    fn on_new_blocks(&self, blocks: &[CompleteBlock], start_height: BlockHeight) -> usize;

    fn on_pool_updated(
        &self,
        added: &[Transaction],
        deleted: &[(Hash, DeletionReason)],
    ) -> anyhow::Result<()>;

    fn add_unconfirmed_transaction(&self, transaction: &Transaction) -> anyhow::Result<()>;

    fn remove_unconfirmed_transaction(&self, transaction_hash: &Hash);
}
