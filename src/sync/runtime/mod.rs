//! Imperative shell: the worker thread and everything it talks to.

mod blocks;
pub mod events;
mod pool;
pub mod registry;
pub mod scheduler;
pub mod synchronizer;


pub use events::{ObserverId, SyncEvent};
pub use registry::ConsumerId;
pub use scheduler::TaskHandle;
pub use synchronizer::BlockchainSynchronizer;
