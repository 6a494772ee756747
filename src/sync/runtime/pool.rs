use std::collections::HashSet;

use crate::error::{Result, SyncError};
use crate::sync::consumer::DeletionReason;
use crate::sync::engine::logic::{needs_intersection_query, pool_union_and_intersection};
use crate::sync::engine::State;
use crate::sync::lock;
use crate::sync::node::api::PoolDifference;
use crate::sync::runtime::scheduler::round_trip;
use crate::sync::runtime::synchronizer::SynchronizerInner;
use crate::types::{Hash, Transaction};

impl SynchronizerInner {
    /// First start only: tells every consumer which of the pool
    /// transactions it remembers are gone. Retried until it succeeds or the
    /// synchronizer stops.
    pub(super) fn remove_outdated_transactions(&self) {
        log::info!("[POOL] Removing outdated pool transactions...");

        let (union, _) = self.known_pool_union_and_intersection();
        let result = self
            .pool_difference(&union)
            .and_then(|difference| {
                log::debug!(
                    "[POOL] {} outdated transactions",
                    difference.deleted_tx_ids.len()
                );
                self.process_pool_txs(&[], &difference.deleted_tx_ids)
            });

        match result {
            Ok(()) => log::info!("[POOL] Outdated pool transactions processed"),
            Err(e) if e.is_interrupted() => {
                log::debug!("[POOL] Outdated transaction removal interrupted");
                self.notify_completed(Err(e));
            }
            Err(e) => {
                log::error!("[POOL] Failed to remove outdated transactions: {}", e);
                self.notify_completed(Err(e));

                let retry_delay = self.config.retry_delay();
                log::info!("[POOL] Retrying in {:?}", retry_delay);
                if !self.pause(retry_delay) {
                    self.request_state_unless_stopping(State::DeleteOldTxs);
                }
            }
        }
    }

    pub(super) fn start_pool_sync(&self) {
        log::debug!("[POOL] Starting pool synchronization...");

        let (union, intersection) = self.known_pool_union_and_intersection();

        let union_difference = match self.pool_difference(&union) {
            Ok(difference) => difference,
            Err(e) => return self.fail_cycle(e, "Failed to query pool changes"),
        };

        if !union_difference.is_last_known_block_actual {
            log::debug!("[POOL] Last known block is outdated, syncing blockchain first");
            self.request_state(State::BlockchainSync);
            return;
        }

        log::debug!(
            "[POOL] Union query: {} added, {} deleted",
            union_difference.new_txs.len(),
            union_difference.deleted_tx_ids.len()
        );

        let shortcut = self.config.pool_intersection_shortcut;
        let difference = if needs_intersection_query(&union, &intersection, shortcut) {
            let mut intersection_difference = match self.pool_difference(&intersection) {
                Ok(difference) => difference,
                Err(e) => return self.fail_cycle(e, "Failed to query pool changes (stage 2)"),
            };

            if !intersection_difference.is_last_known_block_actual {
                log::debug!("[POOL] Last known block is outdated, syncing blockchain first");
                self.request_state(State::BlockchainSync);
                return;
            }

            log::debug!(
                "[POOL] Intersection query: {} added",
                intersection_difference.new_txs.len()
            );
            intersection_difference.deleted_tx_ids = union_difference.deleted_tx_ids;
            intersection_difference
        } else {
            union_difference
        };

        let result = self.process_pool_txs(&difference.new_txs, &difference.deleted_tx_ids);
        if let Err(e) = &result {
            log::error!("[POOL] Pool synchronization failed: {}", e);
        }
        self.notify_completed(result);
    }

    fn known_pool_union_and_intersection(&self) -> (HashSet<Hash>, HashSet<Hash>) {
        let known: Vec<HashSet<Hash>> = lock(&self.consumers)
            .iter()
            .map(|(_, entry)| entry.consumer.known_pool_tx_ids())
            .collect();
        pool_union_and_intersection(known)
    }

    fn pool_difference(&self, known: &HashSet<Hash>) -> Result<PoolDifference> {
        let known_block_id = *lock(&self.last_block_id);
        let known: Vec<Hash> = known.iter().copied().collect();

        round_trip(
            || self.should_stop(),
            |callback| {
                self.node
                    .get_pool_symmetric_difference(known, known_block_id, callback)
            },
        )
    }

    /// Sends the same pool change to every consumer, stopping at the first
    /// failure.
    fn process_pool_txs(&self, added: &[Transaction], deleted: &[Hash]) -> Result<()> {
        let deleted: Vec<(Hash, DeletionReason)> = deleted
            .iter()
            .map(|id| (*id, DeletionReason::IncludedInBlock))
            .collect();

        let consumers = lock(&self.consumers);
        for (id, entry) in consumers.iter() {
            if self.should_stop() {
                log::warn!("[POOL] Pool processing interrupted before {}", id);
                return Err(SyncError::Interrupted);
            }

            entry
                .consumer
                .on_pool_updated(added, &deleted)
                .map_err(|e| {
                    log::error!("[POOL] {} failed to process pool changes: {:#}", id, e);
                    SyncError::Consumer(e)
                })?;
        }

        log::debug!("[POOL] Pool changes processed");
        Ok(())
    }
}
