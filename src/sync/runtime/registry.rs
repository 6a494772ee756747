use std::collections::BTreeMap;
use std::fmt;
use std::sync::{Arc, MutexGuard};

use crate::error::{Result, SyncError};
use crate::sync::consumer::BlockchainConsumer;
use crate::sync::domain::sync_state::SynchronizationState;
use crate::types::Hash;

/// Stable handle of a registered consumer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ConsumerId(u64);

impl fmt::Display for ConsumerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "consumer#{}", self.0)
    }
}

pub(crate) struct ConsumerEntry {
    pub consumer: Arc<dyn BlockchainConsumer>,
    pub state: SynchronizationState,
}

/// Consumers in registration order, each with its own tracker.
///
/// The worker only iterates. Membership changes go through
/// [`StoppedRegistry`].
#[derive(Default)]
pub(crate) struct ConsumerRegistry {
    entries: BTreeMap<ConsumerId, ConsumerEntry>,
    next_id: u64,
}

impl ConsumerRegistry {
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&ConsumerId, &ConsumerEntry)> {
        self.entries.iter()
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = (&ConsumerId, &mut ConsumerEntry)> {
        self.entries.iter_mut()
    }
}

/// Registry access that only exists while the synchronizer is fully stopped.
pub(crate) struct StoppedRegistry<'a> {
    guard: MutexGuard<'a, ConsumerRegistry>,
}

impl<'a> StoppedRegistry<'a> {
    /// Caller must have checked the lifecycle while holding `guard`.
    pub fn new(guard: MutexGuard<'a, ConsumerRegistry>) -> Self {
        Self { guard }
    }

    pub fn insert(
        &mut self,
        consumer: Arc<dyn BlockchainConsumer>,
        genesis_block_hash: Hash,
    ) -> Result<ConsumerId> {
        let registered = self
            .guard
            .entries
            .values()
            .any(|entry| same_consumer(&entry.consumer, &consumer));
        if registered {
            return Err(SyncError::ConsumerAlreadyAdded);
        }

        let id = ConsumerId(self.guard.next_id);
        self.guard.next_id += 1;
        self.guard.entries.insert(
            id,
            ConsumerEntry {
                consumer,
                state: SynchronizationState::new(genesis_block_hash),
            },
        );
        Ok(id)
    }

    pub fn remove(&mut self, id: ConsumerId) -> bool {
        self.guard.entries.remove(&id).is_some()
    }

    pub fn state(&self, id: ConsumerId) -> Option<&SynchronizationState> {
        self.guard.entries.get(&id).map(|entry| &entry.state)
    }

    pub fn state_mut(&mut self, id: ConsumerId) -> Option<&mut SynchronizationState> {
        self.guard.entries.get_mut(&id).map(|entry| &mut entry.state)
    }
}

fn same_consumer(a: &Arc<dyn BlockchainConsumer>, b: &Arc<dyn BlockchainConsumer>) -> bool {
    Arc::as_ptr(a) as *const () == Arc::as_ptr(b) as *const ()
}
