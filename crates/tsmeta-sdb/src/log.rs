//! Replication log interface
//!
//! The log is owned by the replication layer. The row storage core only
//! appends encoded mutations to it and reads them back, in append order, when
//! a node starts or catches up.

use crate::key::RowKey;
use crate::oper::OperKind;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, Ordering};
use tsmeta_common::{Error, Result};

/// One replicated mutation
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogEntry {
    /// Table the mutation belongs to
    pub table_id: u32,
    /// Recorded operation kind
    pub kind: OperKind,
    /// Key of the mutated row
    pub key: RowKey,
    /// Owner-encoded row image
    pub data: Vec<u8>,
}

impl LogEntry {
    /// Serialize the entry for storage or transport
    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        bincode::serialize(self).map_err(|e| Error::Serialization(e.to_string()))
    }

    /// Parse an entry produced by [`LogEntry::to_bytes`]
    pub fn from_bytes(data: &[u8]) -> Result<Self> {
        bincode::deserialize(data).map_err(|e| Error::Deserialization(e.to_string()))
    }
}

/// Append-only replicated log consumed by the row storage core
pub trait ReplicationLog: Send + Sync {
    /// Append an entry, returning its sequence number.
    ///
    /// Failures are reported to the caller and never retried here.
    fn append(&self, entry: &LogEntry) -> Result<u64>;

    /// Deliver every entry in append order. Returns the last sequence number.
    fn replay(&self, visit: &mut dyn FnMut(u64, LogEntry) -> Result<()>) -> Result<u64>;

    /// Sequence number of the last appended entry (0 when empty)
    fn last_seq(&self) -> u64;
}

/// In-memory log for single-process use and tests
#[derive(Default)]
pub struct MemoryLog {
    entries: Mutex<Vec<LogEntry>>,
    offline: AtomicBool,
}

impl MemoryLog {
    /// Create an empty log
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Reject appends, as when quorum is lost
    pub fn set_offline(&self, offline: bool) {
        self.offline.store(offline, Ordering::Release);
    }

    /// Number of stored entries
    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    /// Check if no entry has been appended
    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }

    /// Copy of every stored entry
    pub fn entries(&self) -> Vec<LogEntry> {
        self.entries.lock().clone()
    }
}

impl ReplicationLog for MemoryLog {
    fn append(&self, entry: &LogEntry) -> Result<u64> {
        if self.offline.load(Ordering::Acquire) {
            return Err(Error::replication("log is offline"));
        }
        let mut entries = self.entries.lock();
        entries.push(entry.clone());
        Ok(entries.len() as u64)
    }

    fn replay(&self, visit: &mut dyn FnMut(u64, LogEntry) -> Result<()>) -> Result<u64> {
        // Snapshot so visitors may append without deadlocking
        let entries = self.entries();
        let mut last = 0;
        for (idx, entry) in entries.into_iter().enumerate() {
            last = idx as u64 + 1;
            visit(last, entry)?;
        }
        Ok(last)
    }

    fn last_seq(&self) -> u64 {
        self.entries.lock().len() as u64
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(id: i32) -> LogEntry {
        LogEntry {
            table_id: 1,
            kind: OperKind::Insert,
            key: RowKey::Int(id),
            data: vec![id as u8; 4],
        }
    }

    #[test]
    fn test_memory_log_order() {
        let log = MemoryLog::new();
        assert_eq!(log.append(&entry(1)).unwrap(), 1);
        assert_eq!(log.append(&entry(2)).unwrap(), 2);
        assert_eq!(log.last_seq(), 2);

        let mut seen = vec![];
        let last = log
            .replay(&mut |seq, e| {
                seen.push((seq, e.key));
                Ok(())
            })
            .unwrap();

        assert_eq!(last, 2);
        assert_eq!(seen, vec![(1, RowKey::Int(1)), (2, RowKey::Int(2))]);
    }

    #[test]
    fn test_memory_log_offline() {
        let log = MemoryLog::new();
        log.set_offline(true);
        let err = log.append(&entry(1)).unwrap_err();
        assert!(matches!(err, Error::ReplicationFailure(_)));
        assert!(log.is_empty());

        log.set_offline(false);
        log.append(&entry(1)).unwrap();
        assert_eq!(log.len(), 1);
    }

    #[test]
    fn test_replay_stops_on_visitor_error() {
        let log = MemoryLog::new();
        log.append(&entry(1)).unwrap();
        log.append(&entry(2)).unwrap();

        let mut visited = 0;
        let result = log.replay(&mut |_, _| {
            visited += 1;
            Err(Error::Deserialization("bad image".into()))
        });

        assert!(result.is_err());
        assert_eq!(visited, 1);
    }

    #[test]
    fn test_entry_bytes() {
        let e = entry(5);
        let parsed = LogEntry::from_bytes(&e.to_bytes().unwrap()).unwrap();
        assert_eq!(parsed, e);
        assert!(LogEntry::from_bytes(&[0xff]).is_err());
    }
}
