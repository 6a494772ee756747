use std::collections::{BTreeMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;

use anyhow::anyhow;

use crate::error::NodeError;
use crate::sync::currency::Currency;
use crate::sync::lock;
use crate::sync::node::api::{
    Callback, ListenerId, NodeApi, NodeEvent, NodeListener, PoolDifference, QueryBlocksResponse,
};
use crate::types::{
    BlockHeight, BlockShortEntry, BlockTemplate, Hash, Transaction, TransactionInput,
    TransactionOutput, TransactionPrefix, TransactionShortInfo,
};

const GENESIS_TIMESTAMP: u64 = 1_500_000_000;
const BLOCK_TARGET_SECONDS: u64 = 120;
const DEFAULT_MAX_BLOCKS_PER_QUERY: usize = 100;
const BLOCK_REWARD: u64 = 1_000;

/// Deterministic hash for test fixtures: `tag` separates forks and kinds.
pub fn mock_hash(tag: u32, n: u32) -> Hash {
    let mut bytes = [0u8; 32];
    bytes[..4].copy_from_slice(&n.to_le_bytes());
    bytes[4..8].copy_from_slice(&tag.to_le_bytes());
    bytes[31] = 0xc0;
    Hash(bytes)
}

/// Pool transaction fixture with id `mock_hash(TX_TAG, n)`.
pub fn mock_transaction(n: u32) -> Transaction {
    Transaction {
        hash: mock_hash(TX_TAG, n),
        prefix: TransactionPrefix {
            version: 1,
            unlock_time: 0,
            inputs: vec![TransactionInput::Key {
                amount: 10,
                output_indexes: vec![n],
                key_image: mock_hash(KEY_IMAGE_TAG, n),
            }],
            outputs: vec![TransactionOutput {
                amount: 9,
                key: mock_hash(KEY_TAG, n),
            }],
            extra: Vec::new(),
        },
    }
}

const TX_TAG: u32 = 0xffff_0001;
const KEY_IMAGE_TAG: u32 = 0xffff_0002;
const KEY_TAG: u32 = 0xffff_0003;
const COINBASE_TAG: u32 = 0xffff_0004;
const STATIC_REWARD_TAG: u32 = 0xffff_0005;

struct MockState {
    chain: Vec<BlockShortEntry>,
    pool: Vec<Transaction>,
    fork_tag: u32,
    block_version: u8,
    max_blocks_per_query: usize,
    known_block_count: Option<u32>,
    failing_block_queries: usize,
    failing_pool_queries: usize,
    dropping_requests: bool,
    block_queries: Vec<Vec<Hash>>,
    pool_queries: Vec<(Vec<Hash>, Hash)>,
    listeners: BTreeMap<ListenerId, NodeListener>,
    next_listener_id: u64,
    observers_added: usize,
    observers_removed: usize,
}

/// In-memory node: one main chain, one pool, answers synchronously.
pub struct MockNode {
    state: Mutex<MockState>,
}

impl Default for MockNode {
    fn default() -> Self {
        Self::new()
    }
}

impl MockNode {
    /// Chain containing only the genesis block.
    pub fn new() -> Self {
        let genesis = build_block(0, 0, 1, Hash::NULL, Vec::new());
        Self {
            state: Mutex::new(MockState {
                chain: vec![genesis],
                pool: Vec::new(),
                fork_tag: 0,
                block_version: 1,
                max_blocks_per_query: DEFAULT_MAX_BLOCKS_PER_QUERY,
                known_block_count: None,
                failing_block_queries: 0,
                failing_pool_queries: 0,
                dropping_requests: false,
                block_queries: Vec::new(),
                pool_queries: Vec::new(),
                listeners: BTreeMap::new(),
                next_listener_id: 1,
                observers_added: 0,
                observers_removed: 0,
            }),
        }
    }

    pub fn genesis_hash() -> Hash {
        mock_hash(0, 0)
    }

    pub fn with_blocks(count: u32) -> Self {
        let node = Self::new();
        node.append_blocks(count, Vec::new());
        node
    }

    /// Appends `count` blocks without notifying listeners.
    fn append_blocks(&self, count: u32, mut txs: Vec<Transaction>) {
        let mut state = lock(&self.state);
        for _ in 0..count {
            let height = state.chain.len() as BlockHeight;
            let prev = state.chain[height as usize - 1].block_hash;
            let block_txs = std::mem::take(&mut txs);
            let mined: HashSet<Hash> = block_txs.iter().map(|tx| tx.hash).collect();
            state.pool.retain(|tx| !mined.contains(&tx.hash));
            let block = build_block(state.fork_tag, height, state.block_version, prev, block_txs);
            state.chain.push(block);
        }
    }

    /// Mines `count` blocks and notifies listeners.
    pub fn push_blocks(&self, count: u32) {
        self.append_blocks(count, Vec::new());
        self.notify(NodeEvent::LocalBlockchainUpdated(self.height()));
    }

    /// Mines one block containing every current pool transaction.
    pub fn mine_pool(&self) {
        let txs = lock(&self.state).pool.clone();
        self.append_blocks(1, txs);
        self.notify(NodeEvent::LocalBlockchainUpdated(self.height()));
        self.notify(NodeEvent::PoolChanged);
    }

    /// Replaces the top `depth` blocks with `count` blocks of a new fork.
    pub fn reorganize(&self, depth: u32, count: u32) {
        {
            let mut state = lock(&self.state);
            let keep = state.chain.len().saturating_sub(depth as usize).max(1);
            state.chain.truncate(keep);
            state.fork_tag += 1;
        }
        self.append_blocks(count, Vec::new());
        log::debug!("[NODE] reorganized: depth {}, new height {}", depth, self.height());
        self.notify(NodeEvent::LocalBlockchainUpdated(self.height()));
    }

    pub fn add_pool_transaction(&self, tx: Transaction) {
        lock(&self.state).pool.push(tx);
        self.notify(NodeEvent::PoolChanged);
    }

    pub fn remove_pool_transaction(&self, hash: &Hash) -> bool {
        let removed = {
            let mut state = lock(&self.state);
            let before = state.pool.len();
            state.pool.retain(|tx| tx.hash != *hash);
            state.pool.len() != before
        };
        if removed {
            self.notify(NodeEvent::PoolChanged);
        }
        removed
    }

    /// Height of the chain tip.
    pub fn height(&self) -> BlockHeight {
        lock(&self.state).chain.len() as BlockHeight - 1
    }

    pub fn block_hash(&self, height: BlockHeight) -> Option<Hash> {
        lock(&self.state)
            .chain
            .get(height as usize)
            .map(|b| b.block_hash)
    }

    pub fn tip_hash(&self) -> Hash {
        let state = lock(&self.state);
        state.chain[state.chain.len() - 1].block_hash
    }

    pub fn main_chain(&self) -> Vec<Hash> {
        lock(&self.state).chain.iter().map(|b| b.block_hash).collect()
    }

    pub fn pool_ids(&self) -> Vec<Hash> {
        lock(&self.state).pool.iter().map(|tx| tx.hash).collect()
    }

    pub fn set_block_version(&self, version: u8) {
        lock(&self.state).block_version = version;
    }

    pub fn set_max_blocks_per_query(&self, max: usize) {
        lock(&self.state).max_blocks_per_query = max.max(1);
    }

    /// Pretends the network knows `count` blocks (`None` = same as local).
    pub fn set_known_block_count(&self, count: Option<u32>) {
        lock(&self.state).known_block_count = count;
    }

    pub fn fail_next_block_queries(&self, count: usize) {
        lock(&self.state).failing_block_queries = count;
    }

    pub fn fail_next_pool_queries(&self, count: usize) {
        lock(&self.state).failing_pool_queries = count;
    }

    /// Drops request callbacks without invoking them.
    pub fn set_dropping_requests(&self, dropping: bool) {
        lock(&self.state).dropping_requests = dropping;
    }

    /// Sparse histories received by `query_blocks`, in call order.
    pub fn block_queries(&self) -> Vec<Vec<Hash>> {
        lock(&self.state).block_queries.clone()
    }

    /// `(known ids, reference block)` received by pool queries, in call order.
    pub fn pool_queries(&self) -> Vec<(Vec<Hash>, Hash)> {
        lock(&self.state).pool_queries.clone()
    }

    pub fn observer_count(&self) -> usize {
        lock(&self.state).listeners.len()
    }

    /// `(added, removed)` observer registrations over the node lifetime.
    pub fn observer_registrations(&self) -> (usize, usize) {
        let state = lock(&self.state);
        (state.observers_added, state.observers_removed)
    }

    pub fn notify(&self, event: NodeEvent) {
        let listeners: Vec<NodeListener> = lock(&self.state).listeners.values().cloned().collect();
        for listener in listeners {
            listener(event);
        }
    }
}

impl NodeApi for MockNode {
    fn add_observer(&self, listener: NodeListener) -> ListenerId {
        let mut state = lock(&self.state);
        let id = ListenerId(state.next_listener_id);
        state.next_listener_id += 1;
        state.listeners.insert(id, listener);
        state.observers_added += 1;
        id
    }

    fn remove_observer(&self, id: ListenerId) -> bool {
        let mut state = lock(&self.state);
        let removed = state.listeners.remove(&id).is_some();
        if removed {
            state.observers_removed += 1;
        }
        removed
    }

    fn local_block_count(&self) -> u32 {
        lock(&self.state).chain.len() as u32
    }

    fn known_block_count(&self) -> u32 {
        let state = lock(&self.state);
        state.known_block_count.unwrap_or(state.chain.len() as u32)
    }

    fn query_blocks(
        &self,
        known_block_ids: Vec<Hash>,
        timestamp: u64,
        callback: Callback<QueryBlocksResponse>,
    ) {
        let result = {
            let mut state = lock(&self.state);
            state.block_queries.push(known_block_ids.clone());

            if state.dropping_requests {
                return;
            }

            if state.failing_block_queries > 0 {
                state.failing_block_queries -= 1;
                Err(NodeError::Unreachable("injected block query failure".into()))
            } else {
                let start = known_block_ids
                    .iter()
                    .find_map(|id| state.chain.iter().position(|b| b.block_hash == *id));

                match start {
                    Some(start) => {
                        let end = (start + state.max_blocks_per_query).min(state.chain.len());
                        let new_blocks = state.chain[start..end]
                            .iter()
                            .map(|b| {
                                let mut entry = b.clone();
                                if entry.timestamp < timestamp {
                                    entry.block = None;
                                    entry.txs_short_info.clear();
                                }
                                entry
                            })
                            .collect();
                        Ok(QueryBlocksResponse {
                            start_height: start as BlockHeight,
                            new_blocks,
                        })
                    }
                    None => Err(NodeError::RequestFailed("no common block".into())),
                }
            }
        };

        callback(result);
    }

    fn get_pool_symmetric_difference(
        &self,
        known_pool_tx_ids: Vec<Hash>,
        known_block_id: Hash,
        callback: Callback<PoolDifference>,
    ) {
        let result = {
            let mut state = lock(&self.state);
            state
                .pool_queries
                .push((known_pool_tx_ids.clone(), known_block_id));

            if state.dropping_requests {
                return;
            }

            if state.failing_pool_queries > 0 {
                state.failing_pool_queries -= 1;
                Err(NodeError::Unreachable("injected pool query failure".into()))
            } else {
                let tip = state.chain[state.chain.len() - 1].block_hash;
                let known: HashSet<Hash> = known_pool_tx_ids.iter().copied().collect();
                let in_pool: HashSet<Hash> = state.pool.iter().map(|tx| tx.hash).collect();

                Ok(PoolDifference {
                    is_last_known_block_actual: known_block_id == tip,
                    new_txs: state
                        .pool
                        .iter()
                        .filter(|tx| !known.contains(&tx.hash))
                        .cloned()
                        .collect(),
                    deleted_tx_ids: known_pool_tx_ids
                        .into_iter()
                        .filter(|id| !in_pool.contains(id))
                        .collect(),
                })
            }
        };

        callback(result);
    }
}

fn build_block(
    fork_tag: u32,
    height: BlockHeight,
    version: u8,
    previous_block_hash: Hash,
    txs: Vec<Transaction>,
) -> BlockShortEntry {
    // Genesis is shared by every fork.
    let tag = if height == 0 { 0 } else { fork_tag };
    let timestamp = GENESIS_TIMESTAMP + height as u64 * BLOCK_TARGET_SECONDS;

    let base_transaction = Transaction {
        hash: mock_hash(COINBASE_TAG ^ tag, height),
        prefix: TransactionPrefix {
            version: 1,
            unlock_time: height as u64 + 10,
            inputs: vec![TransactionInput::Base { height }],
            outputs: vec![TransactionOutput {
                amount: BLOCK_REWARD,
                key: mock_hash(KEY_TAG ^ tag, height),
            }],
            extra: Vec::new(),
        },
    };

    BlockShortEntry {
        block_hash: mock_hash(tag, height),
        timestamp,
        block: Some(BlockTemplate {
            major_version: version,
            minor_version: 0,
            timestamp,
            previous_block_hash,
            nonce: height,
            base_transaction,
            transaction_hashes: txs.iter().map(|tx| tx.hash).collect(),
        }),
        txs_short_info: txs
            .into_iter()
            .map(|tx| TransactionShortInfo {
                tx_id: tx.hash,
                prefix: tx.prefix,
            })
            .collect(),
    }
}

/// Currency whose static reward activates at a configurable block version.
pub struct MockCurrency {
    genesis: Hash,
    static_reward_from_version: Option<u8>,
    failing_static_reward: AtomicBool,
    missing_static_reward: AtomicBool,
}

impl MockCurrency {
    pub fn new(genesis: Hash) -> Self {
        Self {
            genesis,
            static_reward_from_version: None,
            failing_static_reward: AtomicBool::new(false),
            missing_static_reward: AtomicBool::new(false),
        }
    }

    pub fn with_static_reward_from(mut self, version: u8) -> Self {
        self.static_reward_from_version = Some(version);
        self
    }

    pub fn set_failing_static_reward(&self, failing: bool) {
        self.failing_static_reward.store(failing, Ordering::SeqCst);
    }

    pub fn set_missing_static_reward(&self, missing: bool) {
        self.missing_static_reward.store(missing, Ordering::SeqCst);
    }

    pub fn static_reward_hash(block: &BlockTemplate) -> Hash {
        let height = block
            .base_transaction
            .prefix
            .inputs
            .iter()
            .find_map(|input| match input {
                TransactionInput::Base { height } => Some(*height),
                _ => None,
            })
            .unwrap_or_default();
        mock_hash(STATIC_REWARD_TAG, height)
    }
}

impl Currency for MockCurrency {
    fn genesis_block_hash(&self) -> Hash {
        self.genesis
    }

    fn is_static_reward_enabled(&self, block_major_version: u8) -> bool {
        self.static_reward_from_version
            .map(|from| block_major_version >= from)
            .unwrap_or(false)
    }

    fn construct_static_reward_tx(&self, block: &BlockTemplate) -> anyhow::Result<Option<Transaction>> {
        if self.failing_static_reward.load(Ordering::SeqCst) {
            return Err(anyhow!("static reward address cannot be parsed"));
        }
        if self.missing_static_reward.load(Ordering::SeqCst) {
            return Ok(None);
        }

        Ok(Some(Transaction {
            hash: Self::static_reward_hash(block),
            prefix: TransactionPrefix {
                version: 1,
                unlock_time: block.base_transaction.prefix.unlock_time,
                inputs: block.base_transaction.prefix.inputs.clone(),
                outputs: vec![TransactionOutput {
                    amount: BLOCK_REWARD / 10,
                    key: block.previous_block_hash,
                }],
                extra: Vec::new(),
            },
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::mpsc;

    fn query(node: &MockNode, known: Vec<Hash>, timestamp: u64) -> Result<QueryBlocksResponse, NodeError> {
        let (tx, rx) = mpsc::channel();
        node.query_blocks(known, timestamp, Box::new(move |r| tx.send(r).unwrap()));
        rx.recv().unwrap()
    }

    #[test]
    fn query_starts_at_newest_common_block() {
        let node = MockNode::with_blocks(10);
        let known = vec![node.block_hash(4).unwrap(), MockNode::genesis_hash()];

        let response = query(&node, known, 0).unwrap();
        assert_eq!(response.start_height, 4);
        assert_eq!(response.new_blocks.len(), 7);
        assert_eq!(response.new_blocks[0].block_hash, node.block_hash(4).unwrap());
    }

    #[test]
    fn query_omits_bodies_before_timestamp() {
        let node = MockNode::with_blocks(5);
        let floor = GENESIS_TIMESTAMP + 3 * BLOCK_TARGET_SECONDS;

        let response = query(&node, vec![MockNode::genesis_hash()], floor).unwrap();
        assert!(response.new_blocks[2].block.is_none());
        assert!(response.new_blocks[3].block.is_some());
    }

    #[test]
    fn reorganize_keeps_genesis_and_changes_tail() {
        let node = MockNode::with_blocks(5);
        let old_tip = node.tip_hash();
        let kept = node.block_hash(3).unwrap();
        let replaced = node.block_hash(4).unwrap();
        node.reorganize(2, 3);

        // Heights 0..=3 survive, three new blocks follow.
        assert_eq!(node.height(), 6);
        assert_ne!(node.tip_hash(), old_tip);
        assert_eq!(node.block_hash(0).unwrap(), MockNode::genesis_hash());
        assert_eq!(node.block_hash(3).unwrap(), kept);
        assert_ne!(node.block_hash(4).unwrap(), replaced);
    }

    #[test]
    fn mined_pool_transactions_leave_the_pool() {
        let node = MockNode::with_blocks(1);
        node.add_pool_transaction(mock_transaction(1));
        node.mine_pool();
        assert!(node.pool_ids().is_empty());
    }
}
