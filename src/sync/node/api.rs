use std::sync::Arc;

use crate::error::NodeError;
use crate::types::{BlockHeight, BlockShortEntry, Hash, Transaction};

/// Push notifications from the node.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeEvent {
    LocalBlockchainUpdated(BlockHeight),
    LastKnownBlockHeightUpdated(BlockHeight),
    PoolChanged,
}

pub type NodeListener = Arc<dyn Fn(NodeEvent) + Send + Sync>;

/// Completion callback of an asynchronous node request. Invoked at most once.
pub type Callback<T> = Box<dyn FnOnce(Result<T, NodeError>) + Send>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ListenerId(pub u64);

#[derive(Debug, Clone, Default)]
pub struct QueryBlocksResponse {
    pub start_height: BlockHeight,
    pub new_blocks: Vec<BlockShortEntry>,
}

#[derive(Debug, Clone, Default)]
pub struct PoolDifference {
    /// Whether the reference block is still the node's chain tail.
    pub is_last_known_block_actual: bool,
    pub new_txs: Vec<Transaction>,
    pub deleted_tx_ids: Vec<Hash>,
}

/// Node interface consumed by the synchronizer.
///
/// Requests are callback based. Implementations may invoke the callback
/// from any thread, including synchronously from within the call.
pub trait NodeApi: Send + Sync {
    fn add_observer(&self, listener: NodeListener) -> ListenerId;

    fn remove_observer(&self, id: ListenerId) -> bool;

    /// Number of blocks in the node's local chain.
    fn local_block_count(&self) -> u32;

    /// Number of blocks the node believes the network has.
    fn known_block_count(&self) -> u32;

    /// Fetches blocks following the newest block of `known_block_ids` that is
    /// on the main chain. Bodies are omitted for blocks older than `timestamp`.
    fn query_blocks(
        &self,
        known_block_ids: Vec<Hash>,
        timestamp: u64,
        callback: Callback<QueryBlocksResponse>,
    );

    fn get_pool_symmetric_difference(
        &self,
        known_pool_tx_ids: Vec<Hash>,
        known_block_id: Hash,
        callback: Callback<PoolDifference>,
    );
}
