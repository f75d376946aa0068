//! Table registry and log replay
//!
//! An [`Sdb`] owns the replication log handle and every open table. Tables are
//! registered by id so replayed entries can be routed back to their owner.

use crate::actions::{TableActions, TableDesc};
use crate::log::{LogEntry, MemoryLog, ReplicationLog};
use crate::table::SdbTable;
use parking_lot::RwLock;
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{debug, error, info, warn};
use tsmeta_common::{Error, Result};

/// Type-erased view of a table used while replaying the log
pub trait ReplayTarget: Send + Sync {
    /// Table id entries are routed by
    fn table_id(&self) -> u32;

    /// Table name for diagnostics
    fn name(&self) -> &str;

    /// Apply one replayed entry
    fn apply_replicated(&self, entry: LogEntry) -> Result<()>;

    /// Run post-replay fix-ups
    fn on_replay_complete(&self) -> Result<()>;
}

impl<A: TableActions> ReplayTarget for SdbTable<A> {
    fn table_id(&self) -> u32 {
        Self::table_id(self)
    }

    fn name(&self) -> &str {
        Self::name(self)
    }

    fn apply_replicated(&self, entry: LogEntry) -> Result<()> {
        Self::apply_replicated(self, entry)
    }

    fn on_replay_complete(&self) -> Result<()> {
        Self::on_replay_complete(self)
    }
}

/// Counters reported by [`Sdb::replay`]
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct ReplayStats {
    /// Entries routed to an open table
    pub applied: u64,
    /// Entries for tables that are not open
    pub skipped: u64,
    /// Sequence number of the last entry read
    pub last_seq: u64,
}

/// Row storage context: one replication log, many tables
pub struct Sdb {
    log: Arc<dyn ReplicationLog>,
    tables: RwLock<BTreeMap<u32, Arc<dyn ReplayTarget>>>,
}

impl Sdb {
    /// Create a context writing to `log`
    pub fn new(log: Arc<dyn ReplicationLog>) -> Self {
        Self {
            log,
            tables: RwLock::new(BTreeMap::new()),
        }
    }

    /// Create a context backed by a fresh in-memory log
    #[must_use]
    pub fn in_memory() -> Self {
        Self::new(Arc::new(MemoryLog::new()))
    }

    /// Replication log shared by every table
    pub fn log(&self) -> &Arc<dyn ReplicationLog> {
        &self.log
    }

    /// Open a table and register it for replay
    pub fn open_table<A: TableActions>(&self, desc: TableDesc, actions: A) -> Result<SdbTable<A>> {
        let mut tables = self.tables.write();
        if let Some(existing) = tables.get(&desc.table_id) {
            return Err(Error::TableAlreadyOpen {
                table_id: desc.table_id,
                name: existing.name().to_string(),
            });
        }

        let table_id = desc.table_id;
        let table = SdbTable::new(desc, actions, Arc::clone(&self.log))?;
        tables.insert(table_id, Arc::new(table.clone()));

        info!(
            "Opened table {} (id {}, {} slots, {} buckets)",
            table.name(),
            table_id,
            table.desc().max_rows,
            table.desc().hash_sessions
        );
        Ok(table)
    }

    /// Unregister a table. Handles already given out stay usable.
    pub fn close_table(&self, table_id: u32) -> bool {
        let removed = self.tables.write().remove(&table_id);
        if let Some(table) = &removed {
            info!("Closed table {} (id {})", table.name(), table_id);
        }
        removed.is_some()
    }

    /// Check if a table id is registered
    pub fn is_open(&self, table_id: u32) -> bool {
        self.tables.read().contains_key(&table_id)
    }

    /// Replay the whole log into the open tables, then run every table's
    /// restored callback.
    ///
    /// Entries for unknown tables are skipped. Any other failure aborts the
    /// replay and is returned.
    pub fn replay(&self) -> Result<ReplayStats> {
        let targets: BTreeMap<u32, Arc<dyn ReplayTarget>> = self.tables.read().clone();
        let mut stats = ReplayStats::default();

        let last_seq = self.log.replay(&mut |seq, entry| {
            let Some(target) = targets.get(&entry.table_id) else {
                warn!(
                    "Skipping log entry {} for unknown table {}",
                    seq, entry.table_id
                );
                stats.skipped += 1;
                return Ok(());
            };

            target.apply_replicated(entry).map_err(|e| {
                error!("Replay of entry {} into {} failed: {}", seq, target.name(), e);
                e
            })?;
            stats.applied += 1;
            Ok(())
        })?;
        stats.last_seq = last_seq;

        debug!(
            "Replayed {} entries ({} skipped) up to seq {}",
            stats.applied, stats.skipped, stats.last_seq
        );

        for target in targets.values() {
            target.on_replay_complete()?;
        }

        info!(
            "Replay complete: {} applied, {} skipped, last seq {}",
            stats.applied, stats.skipped, stats.last_seq
        );
        Ok(stats)
    }
}

impl std::fmt::Debug for Sdb {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Sdb")
            .field("tables", &self.tables.read().keys().collect::<Vec<_>>())
            .field("last_seq", &self.log.last_seq())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::key::{KeyType, RowKey};
    use crate::oper::SdbOper;
    use crate::test_support::{Widget, WidgetActions};
    use crate::wal::FileLog;
    use tempfile::tempdir;

    fn widgets(table_id: u32) -> TableDesc {
        TableDesc::new(table_id, format!("widgets-{table_id}"), KeyType::Int, 8)
            .with_max_row_size(256)
    }

    #[test]
    fn test_open_table_twice() {
        let sdb = Sdb::in_memory();
        sdb.open_table(widgets(1), WidgetActions::default()).unwrap();

        let err = sdb
            .open_table(widgets(1), WidgetActions::default())
            .unwrap_err();
        assert!(matches!(err, Error::TableAlreadyOpen { table_id: 1, .. }));

        assert!(sdb.close_table(1));
        assert!(!sdb.close_table(1));
        sdb.open_table(widgets(1), WidgetActions::default()).unwrap();
    }

    #[test]
    fn test_invalid_desc_rejected() {
        let sdb = Sdb::in_memory();
        let desc = TableDesc::new(1, "empty", KeyType::Int, 0);
        let err = sdb.open_table(desc, WidgetActions::default()).unwrap_err();
        assert!(matches!(err, Error::InvalidArgument(_)));
        assert!(!sdb.is_open(1));
    }

    #[test]
    fn test_replay_rebuilds_tables() {
        let log: Arc<dyn ReplicationLog> = Arc::new(MemoryLog::new());

        let primary = Sdb::new(Arc::clone(&log));
        let a = primary.open_table(widgets(1), WidgetActions::default()).unwrap();
        let b = primary.open_table(widgets(2), WidgetActions::default()).unwrap();
        a.insert_row(SdbOper::insert(Widget::new(1, "a1"))).unwrap();
        a.insert_row(SdbOper::insert(Widget::new(2, "a2"))).unwrap();
        b.insert_row(SdbOper::insert(Widget::new(1, "b1"))).unwrap();
        a.delete_row(SdbOper::delete(Widget::new(2, ""))).unwrap();

        let replica = Sdb::new(Arc::clone(&log));
        let ra = replica.open_table(widgets(1), WidgetActions::default()).unwrap();
        let rb = replica.open_table(widgets(2), WidgetActions::default()).unwrap();

        let stats = replica.replay().unwrap();
        assert_eq!(stats.applied, 4);
        assert_eq!(stats.skipped, 0);
        assert_eq!(stats.last_seq, 4);

        assert_eq!(ra.num_rows(), 1);
        assert_eq!(rb.num_rows(), 1);
        assert_eq!(ra.get_row(&RowKey::Int(1)).unwrap().read().name, "a1");
        assert!(ra.is_restored());
        assert!(rb.is_restored());
        assert_eq!(ra.actions().restore_calls(), 1);

        // Replay itself never writes to the log
        assert_eq!(log.last_seq(), 4);
    }

    #[test]
    fn test_replay_skips_unknown_tables() {
        let log: Arc<dyn ReplicationLog> = Arc::new(MemoryLog::new());
        let primary = Sdb::new(Arc::clone(&log));
        let a = primary.open_table(widgets(1), WidgetActions::default()).unwrap();
        let b = primary.open_table(widgets(2), WidgetActions::default()).unwrap();
        a.insert_row(SdbOper::insert(Widget::new(1, "a"))).unwrap();
        b.insert_row(SdbOper::insert(Widget::new(1, "b"))).unwrap();

        let replica = Sdb::new(log);
        let ra = replica.open_table(widgets(1), WidgetActions::default()).unwrap();
        let stats = replica.replay().unwrap();

        assert_eq!(stats.applied, 1);
        assert_eq!(stats.skipped, 1);
        assert_eq!(ra.num_rows(), 1);
    }

    #[test]
    fn test_replay_aborts_on_corrupt_image() {
        let log = Arc::new(MemoryLog::new());
        log.append(&LogEntry {
            table_id: 1,
            kind: crate::OperKind::Insert,
            key: RowKey::Int(1),
            data: vec![1, 2, 3],
        })
        .unwrap();

        let sdb = Sdb::new(log);
        let table = sdb.open_table(widgets(1), WidgetActions::default()).unwrap();
        assert!(sdb.replay().is_err());
        assert!(!table.is_restored());
    }

    #[test]
    fn test_replay_from_file_log() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("sdb.wal");

        {
            let log = Arc::new(FileLog::open(&path, true).unwrap());
            let sdb = Sdb::new(log);
            let table = sdb.open_table(widgets(7), WidgetActions::default()).unwrap();
            for id in 0..5 {
                table
                    .insert_row(SdbOper::insert(Widget::new(id, "persisted")))
                    .unwrap();
            }
            table
                .update_row(SdbOper::update(Widget::new(3, "changed")))
                .unwrap();
        }

        let log = Arc::new(FileLog::open(&path, true).unwrap());
        let sdb = Sdb::new(log);
        let table = sdb.open_table(widgets(7), WidgetActions::default()).unwrap();
        let stats = sdb.replay().unwrap();

        assert_eq!(stats.applied, 6);
        assert_eq!(table.num_rows(), 5);
        assert_eq!(table.get_row(&RowKey::Int(3)).unwrap().read().name, "changed");
    }
}
