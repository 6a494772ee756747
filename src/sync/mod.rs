//! Blockchain synchronization: decision core, per-consumer trackers, node
//! interface and the worker runtime.

pub mod consumer;
pub mod currency;
pub mod domain;
pub mod engine;
pub mod node;
pub mod runtime;

use std::sync::{Mutex, MutexGuard, PoisonError};

/// Locks `mutex`, taking over the data if a previous holder panicked.
pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}
