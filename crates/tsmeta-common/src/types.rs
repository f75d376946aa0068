//! Core type definitions for tsmeta
//!
//! Identifiers and role states shared between the row storage core, the node
//! directory and the operator binary.

use derive_more::{Display, From, Into};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::str::FromStr;

/// Identifier of a cluster node.
///
/// A management-node entry carries the same identifier as the physical host
/// record it runs on, and keeps it for the lifetime of the node.
#[derive(
    Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, From, Into, Display,
)]
#[display("{_0}")]
pub struct NodeId(i32);

impl NodeId {
    /// Create a node ID from its raw value
    #[must_use]
    pub const fn new(raw: i32) -> Self {
        Self(raw)
    }

    /// Get the raw value
    #[must_use]
    pub const fn get(self) -> i32 {
        self.0
    }
}

impl fmt::Debug for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "NodeId({})", self.0)
    }
}

/// Synchronization role of a management node relative to cluster consensus.
///
/// Encoded on the wire and in row images as its raw `i8` value. Raw values
/// outside the known set decode to [`SyncRole::Undefined`].
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
#[repr(i8)]
pub enum SyncRole {
    /// Not reachable by the replication layer
    #[default]
    Offline = 0,
    /// Reachable but still catching up
    Unsynced = 1,
    /// In sync, following the master
    Slave = 2,
    /// Accepting writes for the cluster
    Master = 3,
    /// Unrecognized raw role
    Undefined = -1,
}

impl SyncRole {
    /// Map a raw role value, falling back to `Undefined`
    #[must_use]
    pub const fn from_raw(raw: i8) -> Self {
        match raw {
            0 => Self::Offline,
            1 => Self::Unsynced,
            2 => Self::Slave,
            3 => Self::Master,
            _ => Self::Undefined,
        }
    }

    /// Raw value used in row images
    #[must_use]
    pub const fn as_raw(self) -> i8 {
        self as i8
    }

    /// Display label used by listings and logs
    #[must_use]
    pub const fn label(self) -> &'static str {
        match self {
            Self::Offline => "offline",
            Self::Unsynced => "unsynced",
            Self::Slave => "slave",
            Self::Master => "master",
            Self::Undefined => "undefined",
        }
    }

    /// Check if this role accepts writes
    #[must_use]
    pub const fn is_master(self) -> bool {
        matches!(self, Self::Master)
    }
}

/// Label for a raw role value; never fails
#[must_use]
pub const fn role_label(raw: i8) -> &'static str {
    SyncRole::from_raw(raw).label()
}

impl fmt::Display for SyncRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

impl FromStr for SyncRole {
    type Err = crate::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "offline" => Ok(Self::Offline),
            "unsynced" => Ok(Self::Unsynced),
            "slave" => Ok(Self::Slave),
            "master" => Ok(Self::Master),
            other => Err(crate::Error::invalid_argument(format!(
                "unknown role '{other}'"
            ))),
        }
    }
}

impl Serialize for SyncRole {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_i8(self.as_raw())
    }
}

impl<'de> Deserialize<'de> for SyncRole {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        i8::deserialize(deserializer).map(Self::from_raw)
    }
}

/// Current wall-clock time in milliseconds since the Unix epoch
#[must_use]
pub fn now_millis() -> i64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| i64::try_from(d.as_millis()).unwrap_or(i64::MAX))
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_node_id() {
        let id = NodeId::new(3);
        assert_eq!(id.get(), 3);
        assert_eq!(id.to_string(), "3");
        assert_eq!(i32::from(id), 3);
    }

    #[test]
    fn test_role_labels() {
        assert_eq!(SyncRole::Offline.label(), "offline");
        assert_eq!(SyncRole::Unsynced.label(), "unsynced");
        assert_eq!(SyncRole::Slave.label(), "slave");
        assert_eq!(SyncRole::Master.label(), "master");
    }

    #[test]
    fn test_role_label_fallback() {
        assert_eq!(role_label(3), "master");
        assert_eq!(role_label(42), "undefined");
        assert_eq!(role_label(-7), "undefined");
    }

    #[test]
    fn test_role_from_str() {
        assert_eq!("Master".parse::<SyncRole>().unwrap(), SyncRole::Master);
        assert!("leader".parse::<SyncRole>().is_err());
    }

    #[test]
    fn test_now_millis_monotonic_enough() {
        let a = now_millis();
        let b = now_millis();
        assert!(a > 1_500_000_000_000);
        assert!(b >= a);
    }
}
