use crate::error::{Result, SyncError};
use crate::sync::consumer::{BlockchainInterval, CompleteBlock};
use crate::sync::engine::logic::{classify_update, consumer_block_range, select_common_history};
use crate::sync::engine::{State, UpdateConsumersResult};
use crate::sync::lock;
use crate::sync::node::api::QueryBlocksResponse;
use crate::sync::runtime::registry::ConsumerRegistry;
use crate::sync::runtime::scheduler::round_trip;
use crate::sync::runtime::synchronizer::SynchronizerInner;
use crate::types::{BlockShortEntry, Hash, SyncStart, Transaction};

/// Block locator of the least synced consumer plus the earliest sync start.
struct CommonHistory {
    known_blocks: Vec<Hash>,
    sync_start: SyncStart,
}

impl SynchronizerInner {
    pub(super) fn start_blockchain_sync(&self) {
        log::debug!("[BLOCKS] Starting blockchain synchronization...");

        let Some(history) = self.common_history() else {
            return;
        };

        if history.known_blocks.is_empty() {
            log::debug!("[BLOCKS] Node has no blocks yet, nothing to query");
            return;
        }

        log::debug!(
            "[BLOCKS] Querying blocks: {} known ids, timestamp {}",
            history.known_blocks.len(),
            history.sync_start.timestamp
        );

        let CommonHistory {
            known_blocks,
            sync_start,
        } = history;
        let response = round_trip(
            || self.should_stop(),
            |callback| {
                self.node
                    .query_blocks(known_blocks, sync_start.timestamp, callback)
            },
        );

        match response {
            Ok(response) => self.process_blocks(response),
            Err(e) => self.fail_cycle(e, "Failed to query blocks"),
        }
    }

    fn common_history(&self) -> Option<CommonHistory> {
        let local_block_count = self.node.local_block_count();
        let consumers = lock(&self.consumers);

        let heights: Vec<(SyncStart, u32)> = consumers
            .iter()
            .map(|(_, entry)| (entry.consumer.sync_start(), entry.state.height()))
            .collect();

        let (shortest, sync_start) = select_common_history(&heights)?;
        let (id, entry) = consumers.iter().nth(shortest)?;
        log::debug!(
            "[BLOCKS] Shortest chain: {} with {} blocks",
            id,
            entry.state.height()
        );

        Some(CommonHistory {
            known_blocks: entry.state.short_history(local_block_count),
            sync_start,
        })
    }

    fn process_blocks(&self, response: QueryBlocksResponse) {
        let start_height = response.start_height;
        let processed = start_height + response.new_blocks.len() as u32;
        log::debug!(
            "[BLOCKS] Processing {} blocks from height {}",
            response.new_blocks.len(),
            start_height
        );

        let mut interval = BlockchainInterval {
            start_height,
            blocks: Vec::with_capacity(response.new_blocks.len()),
        };
        let mut blocks = Vec::with_capacity(response.new_blocks.len());

        for entry in response.new_blocks {
            if self.should_stop() {
                break;
            }

            match self.complete_block(entry) {
                Ok(block) => {
                    interval.blocks.push(block.block_hash);
                    blocks.push(block);
                }
                Err(e) => {
                    // Nothing of this interval reaches any consumer.
                    self.fail_cycle(e, "Failed to process blocks");
                    return;
                }
            }
        }

        if !self.should_stop() {
            let (result, error) = {
                let mut consumers = lock(&self.consumers);
                self.update_consumers(&mut consumers, &interval, &blocks)
            };

            match result {
                UpdateConsumersResult::ErrorOccurred => {
                    if self.return_to_idle() {
                        let error = error.unwrap_or(SyncError::BlocksRejected {
                            offered: blocks.len(),
                            accepted: 0,
                        });
                        log::error!("[BLOCKS] Consumers failed to process blocks: {}", error);
                        self.notify_completed(Err(error));
                    }
                }
                UpdateConsumersResult::NothingChanged => {
                    let known = self.node.known_block_count();
                    let local = self.node.local_block_count();
                    if known != local {
                        log::debug!(
                            "[BLOCKS] Node still syncing ({} of {}), retrying",
                            local,
                            known
                        );
                        if !self.pause(self.config.resync_pause()) {
                            self.request_state(State::BlockchainSync);
                            self.notify_progress(processed, known.max(local));
                        }
                    } else {
                        log::debug!("[BLOCKS] Blockchain is up to date");
                    }
                }
                UpdateConsumersResult::AddedNewBlocks => {
                    self.request_state(State::BlockchainSync);
                    let total = self
                        .node
                        .known_block_count()
                        .max(self.node.local_block_count());
                    log::debug!("[BLOCKS] Progress {} of {}", processed, total);
                    self.notify_progress(processed, total);
                }
            }
        }

        if self.should_stop() {
            log::debug!("[BLOCKS] Block processing interrupted");
            self.notify_completed(Err(SyncError::Interrupted));
        }
    }

    /// Reward transaction first, then the static reward when the block
    /// version enables it, then the short-info transactions.
    fn complete_block(&self, entry: BlockShortEntry) -> Result<CompleteBlock> {
        let mut transactions = Vec::new();

        if let Some(block) = &entry.block {
            transactions.reserve(entry.txs_short_info.len() + 2);
            transactions.push(block.base_transaction.clone());

            if self.currency.is_static_reward_enabled(block.major_version) {
                let static_reward = self
                    .currency
                    .construct_static_reward_tx(block)
                    .map_err(|e| SyncError::StaticReward(format!("{:#}", e)))?
                    .ok_or_else(|| {
                        SyncError::StaticReward(format!(
                            "no static reward transaction for block {}",
                            entry.block_hash
                        ))
                    })?;
                transactions.push(static_reward);
            }

            transactions.extend(entry.txs_short_info.into_iter().map(|info| Transaction {
                hash: info.tx_id,
                prefix: info.prefix,
            }));
        }

        Ok(CompleteBlock {
            timestamp: entry.timestamp,
            block_hash: entry.block_hash,
            block: entry.block,
            transactions,
        })
    }

    /// Feeds each consumer the part of `interval` it has not seen.
    ///
    /// Returns the classification plus the first consumer error. A consumer
    /// that accepted only some blocks keeps them in its tracker. When every
    /// consumer already holds the whole interval, its last block becomes the
    /// last known block.
    fn update_consumers(
        &self,
        consumers: &mut ConsumerRegistry,
        interval: &BlockchainInterval,
        blocks: &[CompleteBlock],
    ) -> (UpdateConsumersResult, Option<SyncError>) {
        let mut changed = false;
        let mut first_error: Option<SyncError> = None;
        let mut last_accepted = 0usize;
        let mut all_matched = true;

        for (id, entry) in consumers.iter_mut() {
            if self.should_stop() {
                all_matched = false;
                break;
            }

            let check = match entry.state.check_interval(interval) {
                Ok(check) => check,
                Err(e) => {
                    log::error!("[BLOCKS] {} cannot take interval: {}", id, e);
                    first_error.get_or_insert(e);
                    all_matched = false;
                    continue;
                }
            };

            if check.detach_required || check.has_new_blocks {
                all_matched = false;
            }

            if check.detach_required {
                log::debug!("[BLOCKS] {} detach at height {}", id, check.detach_height);
                entry.consumer.on_blockchain_detach(check.detach_height);
                entry.state.detach(check.detach_height);
            }

            if !check.has_new_blocks {
                continue;
            }

            let (offset, count) =
                consumer_block_range(interval.start_height, check.new_block_height, blocks.len());
            if count == 0 {
                continue;
            }

            let accepted = entry
                .consumer
                .on_new_blocks(&blocks[offset..offset + count], check.new_block_height)
                .min(count);

            if accepted < count {
                log::error!("[BLOCKS] {} accepted {} of {} blocks", id, accepted, count);
                first_error.get_or_insert(SyncError::BlocksRejected {
                    offered: count,
                    accepted,
                });
            }

            if accepted > 0 {
                entry.state.add_blocks(
                    &interval.blocks[offset..offset + accepted],
                    check.new_block_height,
                );
                changed = true;
                last_accepted = last_accepted.max(offset + accepted);
            }
        }

        if last_accepted > 0 {
            *lock(&self.last_block_id) = blocks[last_accepted - 1].block_hash;
        } else if all_matched {
            if let Some(tip) = interval.blocks.last() {
                log::debug!("[BLOCKS] Every consumer already holds block {}", tip);
                *lock(&self.last_block_id) = *tip;
            }
        }

        (classify_update(first_error.is_some(), changed), first_error)
    }
}
