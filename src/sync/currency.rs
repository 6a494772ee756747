use crate::types::{BlockTemplate, Hash, Transaction};

/// Consensus parameters the synchronizer needs from the currency.
pub trait Currency: Send + Sync {
    fn genesis_block_hash(&self) -> Hash;

    fn is_static_reward_enabled(&self, block_major_version: u8) -> bool;

    /// Rebuilds the static reward transaction implied by `block`.
    ///
    /// `Ok(None)` means the currency has no static reward configured for
    /// this block even though the version enables it.
    fn construct_static_reward_tx(&self, block: &BlockTemplate) -> anyhow::Result<Option<Transaction>>;
}
