//! Error taxonomy of the synchronizer.

use thiserror::Error;

use crate::types::{BlockHeight, Hash};

pub type Result<T> = std::result::Result<T, SyncError>;

/// Failure reported by a node request.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum NodeError {
    #[error("node unreachable: {0}")]
    Unreachable(String),

    #[error("node request failed: {0}")]
    RequestFailed(String),

    /// The node dropped the callback without ever invoking it.
    #[error("node dropped the request without answering")]
    RequestDropped,
}

#[derive(Debug, Error)]
pub enum SyncError {
    // === Usage errors ===
    #[error("{0}: not stopped")]
    NotStopped(&'static str),

    #[error("failed to start: no consumers")]
    NoConsumers,

    #[error("failed to start: already started")]
    AlreadyStarted,

    #[error("consumer not found")]
    ConsumerNotFound,

    #[error("consumer already added")]
    ConsumerAlreadyAdded,

    #[error("{0}: synchronizer is not running")]
    NotRunning(&'static str),

    // === Cycle errors ===
    #[error(transparent)]
    Node(#[from] NodeError),

    #[error("consumer error: {0:#}")]
    Consumer(anyhow::Error),

    #[error("consumer accepted {accepted} of {offered} blocks")]
    BlocksRejected { offered: usize, accepted: usize },

    #[error("interval starts at {start} but consumer only knows {known} blocks")]
    IntervalGap { start: BlockHeight, known: usize },

    #[error("static reward: {0}")]
    StaticReward(String),

    #[error("synchronization interrupted")]
    Interrupted,

    #[error("transaction task panicked: {0}")]
    TaskPanicked(String),

    // === Persistence errors ===
    #[error("genesis block hash does not match stored state: read {found}, expected {expected}")]
    GenesisMismatch { expected: Hash, found: Hash },

    #[error("stored block history is empty")]
    EmptyHistory,

    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),

    #[error("state codec error: {0}")]
    Codec(#[from] serde_json::Error),
}

impl SyncError {
    pub fn is_interrupted(&self) -> bool {
        matches!(self, SyncError::Interrupted)
    }

    /// Programming errors: surfaced synchronously, never retried.
    pub fn is_usage(&self) -> bool {
        matches!(
            self,
            SyncError::NotStopped(_)
                | SyncError::NoConsumers
                | SyncError::AlreadyStarted
                | SyncError::ConsumerNotFound
                | SyncError::ConsumerAlreadyAdded
                | SyncError::NotRunning(_)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn usage_errors_are_classified() {
        assert!(SyncError::NoConsumers.is_usage());
        assert!(SyncError::NotStopped("add consumer").is_usage());
        assert!(!SyncError::Interrupted.is_usage());
        assert!(!SyncError::from(NodeError::RequestDropped).is_usage());
    }

    #[test]
    fn node_error_message_is_transparent() {
        let err = SyncError::from(NodeError::Unreachable("connection refused".into()));
        assert_eq!(err.to_string(), "node unreachable: connection refused");
    }
}
