use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Deserializer, Serialize, Serializer};

/// Size in bytes of every hash, key and key image on the wire.
pub const HASH_SIZE: usize = 32;

/// 0-based block index. Genesis is height 0.
pub type BlockHeight = u32;

/// Fixed-width 32 byte hash (block ids, transaction ids, keys).
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub struct Hash(pub [u8; HASH_SIZE]);

impl Hash {
    pub const NULL: Hash = Hash([0u8; HASH_SIZE]);

    pub fn from_bytes(bytes: [u8; HASH_SIZE]) -> Self {
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; HASH_SIZE] {
        &self.0
    }

    pub fn is_null(&self) -> bool {
        self.0 == [0u8; HASH_SIZE]
    }

    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }
}

impl fmt::Display for Hash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

impl fmt::Debug for Hash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Hash({})", self.to_hex())
    }
}

impl FromStr for Hash {
    type Err = hex::FromHexError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut bytes = [0u8; HASH_SIZE];
        hex::decode_to_slice(s, &mut bytes)?;
        Ok(Self(bytes))
    }
}

impl Serialize for Hash {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_hex())
    }
}

impl<'de> Deserialize<'de> for Hash {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

/// Point from which a consumer is interested in the chain.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct SyncStart {
    pub timestamp: u64,
    pub height: BlockHeight,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum TransactionInput {
    /// Coinbase input, carries the height of the block it rewards.
    Base { height: BlockHeight },
    Key {
        amount: u64,
        output_indexes: Vec<u32>,
        key_image: Hash,
    },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransactionOutput {
    pub amount: u64,
    pub key: Hash,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct TransactionPrefix {
    pub version: u8,
    pub unlock_time: u64,
    pub inputs: Vec<TransactionInput>,
    pub outputs: Vec<TransactionOutput>,
    pub extra: Vec<u8>,
}

/// A transaction prefix together with the id the node reported for it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Transaction {
    pub hash: Hash,
    pub prefix: TransactionPrefix,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockTemplate {
    pub major_version: u8,
    pub minor_version: u8,
    pub timestamp: u64,
    pub previous_block_hash: Hash,
    pub nonce: u32,
    pub base_transaction: Transaction,
    pub transaction_hashes: Vec<Hash>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransactionShortInfo {
    pub tx_id: Hash,
    pub prefix: TransactionPrefix,
}

/// One entry of a `query_blocks` response.
///
/// `block` is `None` for blocks older than the requested timestamp floor:
/// only the hash is delivered so trackers can still link the chain.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlockShortEntry {
    pub block_hash: Hash,
    pub timestamp: u64,
    pub block: Option<BlockTemplate>,
    pub txs_short_info: Vec<TransactionShortInfo>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hash_hex_text_form() {
        let mut bytes = [0u8; HASH_SIZE];
        bytes[0] = 0xab;
        bytes[31] = 0x01;
        let hash = Hash(bytes);

        let text = hash.to_string();
        assert_eq!(text.len(), 64);
        assert!(text.starts_with("ab"));
        assert_eq!(text.parse::<Hash>().unwrap(), hash);
    }

    #[test]
    fn hash_rejects_short_hex() {
        assert!("abcd".parse::<Hash>().is_err());
    }

    #[test]
    fn hash_serializes_as_string() {
        let hash = Hash([7u8; HASH_SIZE]);
        let json = serde_json::to_string(&hash).unwrap();
        assert_eq!(json, format!("\"{}\"", "07".repeat(HASH_SIZE)));
    }
}
