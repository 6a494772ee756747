//! Synchronizes CryptoNote consumers (wallets, indexers) with a node: one
//! worker thread fetches blocks and pool changes once and fans them out to
//! every registered consumer.

pub mod config;
pub mod error;
pub mod persistence;
pub mod sync;
pub mod types;

pub use config::SyncConfig;
pub use error::{NodeError, Result, SyncError};
pub use sync::consumer::{BlockchainConsumer, BlockchainInterval, CompleteBlock, DeletionReason};
pub use sync::currency::Currency;
pub use sync::domain::SynchronizationState;
pub use sync::node::NodeApi;
pub use sync::runtime::{BlockchainSynchronizer, ConsumerId, ObserverId, SyncEvent, TaskHandle};
