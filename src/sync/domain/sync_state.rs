// Per-consumer chain progress tracker

use std::io::{Read, Write};

use serde::{Deserialize, Serialize};

use crate::error::{Result, SyncError};
use crate::persistence::{load_json, save_json};
use crate::sync::consumer::BlockchainInterval;
use crate::types::{BlockHeight, Hash};

/// Number of most recent blocks listed one by one in a short history.
const DENSE_HISTORY_LEN: u32 = 10;

/// Outcome of matching a fetched interval against a consumer's history.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct CheckResult {
    pub detach_required: bool,
    pub detach_height: BlockHeight,
    pub has_new_blocks: bool,
    pub new_block_height: BlockHeight,
}

/// Tracks which blocks one consumer has already applied.
///
/// The full list of block hashes is kept, index = height. It always starts
/// with the genesis block, so `height()` is never zero for a fresh tracker.
///
/// The tracker is owned by the registry entry of its consumer and is never
/// shared between consumers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SynchronizationState {
    blockchain: Vec<Hash>,
}

impl SynchronizationState {
    pub fn new(genesis_block_hash: Hash) -> Self {
        Self {
            blockchain: vec![genesis_block_hash],
        }
    }

    /// Builds the sparse block locator sent to the node.
    ///
    /// The last `DENSE_HISTORY_LEN` blocks (bounded by what the node has) are
    /// listed one by one, then the step doubles on every entry. Genesis is
    /// always the last element so the node can find a common point.
    pub fn short_history(&self, local_block_count: u32) -> Vec<Hash> {
        let mut history = Vec::new();
        let size = (self.blockchain.len() as u64).min(local_block_count as u64) as usize;

        if size == 0 {
            return history;
        }

        let mut i = 0u32;
        let mut multiplier = 1usize;
        let mut back_offset = 1usize;
        let mut genesis_included = false;

        while back_offset < size {
            let index = size - back_offset;
            history.push(self.blockchain[index]);
            if index == 0 {
                genesis_included = true;
            }

            if i < DENSE_HISTORY_LEN {
                back_offset += 1;
            } else {
                multiplier *= 2;
                back_offset += multiplier;
            }
            i += 1;
        }

        if !genesis_included {
            history.push(self.blockchain[0]);
        }

        history
    }

    /// Matches `interval` against recorded history.
    ///
    /// A hash mismatch inside the overlapping range means the consumer saw
    /// a block that is no longer on the main chain: it must be detached at
    /// that height and resumed from there.
    pub fn check_interval(&self, interval: &BlockchainInterval) -> Result<CheckResult> {
        let known = self.blockchain.len();
        let start = interval.start_height as usize;

        if start > known {
            return Err(SyncError::IntervalGap {
                start: interval.start_height,
                known,
            });
        }

        let mut result = CheckResult::default();
        let interval_end = start + interval.blocks.len();
        let iteration_end = known.min(interval_end);

        for height in start..iteration_end {
            if self.blockchain[height] != interval.blocks[height - start] {
                result.detach_required = true;
                result.detach_height = height as BlockHeight;
                break;
            }
        }

        if result.detach_required {
            result.has_new_blocks = true;
            result.new_block_height = result.detach_height;
            return Ok(result);
        }

        if interval_end > known {
            result.has_new_blocks = true;
            result.new_block_height = known as BlockHeight;
        }

        Ok(result)
    }

    /// Drops every recorded block at `height` and above.
    pub fn detach(&mut self, height: BlockHeight) {
        debug_assert!((height as usize) < self.blockchain.len());
        log::debug!(
            "[TRACKER] detach at height {} (known {})",
            height,
            self.blockchain.len()
        );
        self.blockchain.truncate(height as usize);
    }

    /// Appends `hashes` which must start right after the recorded tip.
    pub fn add_blocks(&mut self, hashes: &[Hash], height: BlockHeight) {
        debug_assert_eq!(self.blockchain.len(), height as usize);
        self.blockchain.extend_from_slice(hashes);
    }

    pub fn height(&self) -> BlockHeight {
        self.blockchain.len() as BlockHeight
    }

    pub fn known_block_hashes(&self) -> &[Hash] {
        &self.blockchain
    }

    pub fn save<W: Write>(&self, writer: &mut W) -> Result<()> {
        save_json(writer, self)
    }

    /// Replaces the recorded history, only after the whole document parsed
    /// and its first block is `genesis_block_hash`.
    pub fn load<R: Read>(&mut self, reader: &mut R, genesis_block_hash: &Hash) -> Result<()> {
        let loaded: SynchronizationState = load_json(reader)?;
        match loaded.blockchain.first() {
            None => return Err(SyncError::EmptyHistory),
            Some(first) if first != genesis_block_hash => {
                return Err(SyncError::GenesisMismatch {
                    expected: *genesis_block_hash,
                    found: *first,
                })
            }
            Some(_) => {}
        }

        *self = loaded;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    fn h(n: u32) -> Hash {
        let mut bytes = [0u8; 32];
        bytes[..4].copy_from_slice(&n.to_le_bytes());
        bytes[31] = 0xee;
        Hash(bytes)
    }

    fn chain(len: u32) -> SynchronizationState {
        let mut state = SynchronizationState::new(h(0));
        let hashes: Vec<Hash> = (1..len).map(h).collect();
        state.add_blocks(&hashes, 1);
        state
    }

    fn interval(start: BlockHeight, blocks: Vec<Hash>) -> BlockchainInterval {
        BlockchainInterval {
            start_height: start,
            blocks,
        }
    }

    #[test]
    fn fresh_state_knows_only_genesis() {
        let state = SynchronizationState::new(h(0));
        assert_eq!(state.height(), 1);
        assert_eq!(state.known_block_hashes(), &[h(0)]);
    }

    #[test]
    fn short_history_is_empty_when_node_has_nothing() {
        let state = chain(5);
        assert!(state.short_history(0).is_empty());
    }

    #[test]
    fn short_history_of_genesis_only() {
        let state = SynchronizationState::new(h(0));
        assert_eq!(state.short_history(100), vec![h(0)]);
    }

    #[test]
    fn short_history_lists_recent_blocks_densely_then_sparsely() {
        let state = chain(100);
        let history = state.short_history(100);

        // Top 11 blocks one by one: 99, 98, ..., 89
        let dense: Vec<Hash> = (89..=99).rev().map(h).collect();
        assert_eq!(&history[..11], dense.as_slice());

        // Then back offsets 11+2, 13+4, 17+8, 25+16, 41+32 → 87, 83, 75, 59, 27
        assert_eq!(&history[11..16], &[h(87), h(83), h(75), h(59), h(27)]);

        assert_eq!(*history.last().unwrap(), h(0));
        assert!(history.len() < 20);
    }

    #[test]
    fn short_history_is_bounded_by_node_height() {
        let state = chain(50);
        let history = state.short_history(20);
        assert_eq!(history[0], h(19));
        assert_eq!(*history.last().unwrap(), h(0));
    }

    #[test]
    fn interval_extending_tip_has_new_blocks() {
        let state = chain(5);
        let result = state
            .check_interval(&interval(4, vec![h(4), h(5), h(6)]))
            .unwrap();

        assert!(!result.detach_required);
        assert!(result.has_new_blocks);
        assert_eq!(result.new_block_height, 5);
    }

    #[test]
    fn interval_inside_history_is_nothing_new() {
        let state = chain(5);
        let result = state.check_interval(&interval(2, vec![h(2), h(3)])).unwrap();
        assert_eq!(result, CheckResult::default());
    }

    #[test]
    fn mismatch_requires_detach_at_fork_point() {
        let state = chain(10);
        let forked = vec![h(6), h(7), h(1007), h(1008), h(1009), h(1010)];
        let result = state.check_interval(&interval(6, forked)).unwrap();

        assert!(result.detach_required);
        assert_eq!(result.detach_height, 8);
        assert!(result.has_new_blocks);
        assert_eq!(result.new_block_height, 8);
    }

    #[test]
    fn interval_past_tip_is_a_gap() {
        let state = chain(3);
        let err = state.check_interval(&interval(7, vec![h(7)])).unwrap_err();
        assert!(matches!(err, SyncError::IntervalGap { start: 7, known: 3 }));
    }

    #[test]
    fn detach_then_add_replaces_tail() {
        let mut state = chain(10);
        state.detach(8);
        assert_eq!(state.height(), 8);

        state.add_blocks(&[h(1008), h(1009)], 8);
        assert_eq!(state.height(), 10);
        assert_eq!(state.known_block_hashes()[8], h(1008));
    }

    #[test]
    fn save_load_restores_history() {
        let state = chain(7);
        let mut buf = Vec::new();
        state.save(&mut buf).unwrap();

        let mut restored = SynchronizationState::new(h(0));
        restored.load(&mut Cursor::new(buf), &h(0)).unwrap();
        assert_eq!(restored, state);
    }

    #[test]
    fn failed_load_keeps_previous_history() {
        let mut state = chain(4);
        let before = state.clone();

        assert!(state
            .load(&mut Cursor::new(b"{\"blockchain\": [".to_vec()), &h(0))
            .is_err());
        assert_eq!(state, before);
    }

    #[test]
    fn empty_history_is_rejected() {
        let mut state = chain(4);
        let before = state.clone();

        let err = state
            .load(&mut Cursor::new(b"{\"blockchain\": []}".to_vec()), &h(0))
            .unwrap_err();
        assert!(matches!(err, SyncError::EmptyHistory));
        assert_eq!(state, before);
    }

    #[test]
    fn history_of_another_chain_is_rejected() {
        let mut foreign = SynchronizationState::new(h(500));
        foreign.add_blocks(&[h(501), h(502)], 1);
        let mut buf = Vec::new();
        foreign.save(&mut buf).unwrap();

        let mut state = chain(4);
        let before = state.clone();

        let err = state.load(&mut Cursor::new(buf), &h(0)).unwrap_err();
        assert!(matches!(
            err,
            SyncError::GenesisMismatch { expected, found } if expected == h(0) && found == h(500)
        ));
        assert_eq!(state, before);
    }
}
