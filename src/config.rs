use std::fs;
use std::path::Path;
use std::time::Duration;

use serde::Deserialize;

use crate::error::Result;

const DEFAULT_RETRY_DELAY_MS: u64 = 5_000;
const DEFAULT_RESYNC_PAUSE_MS: u64 = 50;

/// Tunables of the synchronizer control loop.
///
/// Every field may be omitted from the JSON file; missing ones take the
/// defaults below.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
    /// Back-off before retrying the startup outdated-pool cleanup.
    pub retry_delay_ms: u64,

    /// Pause before re-syncing when the node is still catching up.
    pub resync_pause_ms: u64,

    /// Apply the union diff directly when every consumer knows the same pool.
    pub pool_intersection_shortcut: bool,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            retry_delay_ms: DEFAULT_RETRY_DELAY_MS,
            resync_pause_ms: DEFAULT_RESYNC_PAUSE_MS,
            pool_intersection_shortcut: true,
        }
    }
}

impl SyncConfig {
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let data = fs::read(path)?;
        let config: SyncConfig = serde_json::from_slice(&data)?;
        log::info!("[CONFIG] Loaded sync config from {:?}: {:?}", path, config);
        Ok(config)
    }

    pub fn retry_delay(&self) -> Duration {
        Duration::from_millis(self.retry_delay_ms)
    }

    pub fn resync_pause(&self) -> Duration {
        Duration::from_millis(self.resync_pause_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_documented_policy() {
        let config = SyncConfig::default();
        assert_eq!(config.retry_delay(), Duration::from_secs(5));
        assert_eq!(config.resync_pause(), Duration::from_millis(50));
        assert!(config.pool_intersection_shortcut);
    }

    #[test]
    fn partial_json_keeps_defaults() {
        let config: SyncConfig = serde_json::from_str(r#"{ "retry_delay_ms": 10 }"#).unwrap();
        assert_eq!(config.retry_delay_ms, 10);
        assert_eq!(config.resync_pause_ms, DEFAULT_RESYNC_PAUSE_MS);
        assert!(config.pool_intersection_shortcut);
    }

    #[test]
    fn from_file_reads_json() {
        let mut path = std::env::temp_dir();
        path.push(format!("cn_sync_config_{}.json", std::process::id()));
        fs::write(&path, br#"{ "pool_intersection_shortcut": false }"#).unwrap();

        let config = SyncConfig::from_file(&path).unwrap();
        let _ = fs::remove_file(&path);

        assert!(!config.pool_intersection_shortcut);
        assert_eq!(config.retry_delay_ms, DEFAULT_RETRY_DELAY_MS);
    }
}
