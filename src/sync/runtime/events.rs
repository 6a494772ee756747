use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use crate::error::SyncError;
use crate::sync::lock;

/// Events produced by the synchronizer.
#[derive(Debug)]
pub enum SyncEvent {
    /// `processed` blocks of `total` known to the node have been handled.
    ProgressUpdated { processed: u32, total: u32 },
    /// One blockchain or pool cycle ended.
    Completed(Result<(), SyncError>),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ObserverId(u64);

type SyncListener = Arc<dyn Fn(&SyncEvent) + Send + Sync>;

/// Registered listeners, notified in registration order.
#[derive(Default)]
pub(crate) struct ObserverRegistry {
    listeners: Mutex<BTreeMap<ObserverId, SyncListener>>,
    next_id: AtomicU64,
}

impl ObserverRegistry {
    pub fn add(&self, listener: SyncListener) -> ObserverId {
        let id = ObserverId(self.next_id.fetch_add(1, Ordering::Relaxed));
        lock(&self.listeners).insert(id, listener);
        id
    }

    pub fn remove(&self, id: ObserverId) -> bool {
        lock(&self.listeners).remove(&id).is_some()
    }

    /// Listeners run outside the registry lock so they may add or remove
    /// observers themselves.
    pub fn notify(&self, event: SyncEvent) {
        let listeners: Vec<SyncListener> = lock(&self.listeners).values().cloned().collect();
        log::trace!("[SYNC] notify {} observers: {:?}", listeners.len(), event);
        for listener in listeners {
            listener(&event);
        }
    }
}
