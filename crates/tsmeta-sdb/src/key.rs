//! Row keys and bucket selection

use serde::{Deserialize, Serialize};
use std::fmt;
use tsmeta_common::NodeId;
use xxhash_rust::xxh64::xxh64;

/// Seed for bucket hashing
const BUCKET_HASH_SEED: u64 = 0x5344_425F_4B45_5931; // "SDB_KEY1"

/// Kind of key a table is indexed by
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum KeyType {
    /// 32-bit integer keys
    Int,
    /// UTF-8 string keys
    Str,
}

/// Key of a single row
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RowKey {
    Int(i32),
    Str(String),
}

impl RowKey {
    /// Key type of this key
    #[must_use]
    pub const fn key_type(&self) -> KeyType {
        match self {
            Self::Int(_) => KeyType::Int,
            Self::Str(_) => KeyType::Str,
        }
    }

    /// Bucket index for a table with `buckets` hash buckets
    #[must_use]
    pub fn bucket(&self, buckets: usize) -> usize {
        let hash = match self {
            Self::Int(v) => xxh64(&v.to_le_bytes(), BUCKET_HASH_SEED),
            Self::Str(s) => xxh64(s.as_bytes(), BUCKET_HASH_SEED),
        };
        // buckets > 0 is checked when the table is opened
        (hash % buckets.max(1) as u64) as usize
    }
}

impl fmt::Display for RowKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Int(v) => write!(f, "{v}"),
            Self::Str(s) => f.write_str(s),
        }
    }
}

impl From<i32> for RowKey {
    fn from(v: i32) -> Self {
        Self::Int(v)
    }
}

impl From<NodeId> for RowKey {
    fn from(id: NodeId) -> Self {
        Self::Int(id.get())
    }
}

impl From<&str> for RowKey {
    fn from(s: &str) -> Self {
        Self::Str(s.to_string())
    }
}

impl From<String> for RowKey {
    fn from(s: String) -> Self {
        Self::Str(s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_key_type() {
        assert_eq!(RowKey::from(4).key_type(), KeyType::Int);
        assert_eq!(RowKey::from("db1").key_type(), KeyType::Str);
    }

    #[test]
    fn test_bucket_stable_and_bounded() {
        for v in -50..50 {
            let key = RowKey::Int(v);
            let b = key.bucket(7);
            assert!(b < 7);
            assert_eq!(b, key.bucket(7));
        }
        assert_eq!(RowKey::from("a").bucket(1), 0);
    }

    #[test]
    fn test_display() {
        assert_eq!(RowKey::from(NodeId::new(9)).to_string(), "9");
        assert_eq!(RowKey::from("vg.1").to_string(), "vg.1");
    }
}
