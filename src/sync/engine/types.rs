/// Lifecycle states of the synchronizer.
///
/// Declaration order is priority order: a future-state request only takes
/// effect when it is greater than the pending one, so `Stopped` always wins.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum State {
    Idle,
    PoolSync,
    BlockchainSync,
    DeleteOldTxs,
    Stopped,
}

/// Side effect to run after entering a state, outside the state lock.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    Nothing,
    RemoveOutdatedTransactions,
    SyncBlockchain,
    SyncPool,
    WaitForWork,
}

/// Node observer bookkeeping implied by a transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ObserverChange {
    Keep,
    Attach,
    Detach,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Transition {
    pub entered: State,
    pub action: Action,
    pub observer: ObserverChange,
}

/// Aggregate outcome of handing one interval to every consumer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpdateConsumersResult {
    NothingChanged,
    AddedNewBlocks,
    ErrorOccurred,
}
