//! tsmeta SDB - replicated, reference-counted row storage
//!
//! Generic tables of metadata rows shared by every management-node component:
//! - Hash-indexed lookup by integer or string key
//! - Reference-counted row handles that outlive a concurrent delete
//! - Mutations appended to a [`ReplicationLog`] before they are applied
//! - Replay of the log into registered tables on startup
//!
//! Table owners plug in through [`TableActions`]; the core never looks inside
//! a row.

pub mod actions;
pub mod key;
pub mod log;
pub mod oper;
pub mod sdb;
pub mod table;
pub mod wal;

// Re-exports
pub use actions::{TableActions, TableDesc};
pub use key::{KeyType, RowKey};
pub use log::{LogEntry, MemoryLog, ReplicationLog};
pub use oper::{OperKind, OperScope, SdbOper};
pub use sdb::{ReplayStats, ReplayTarget, Sdb};
pub use table::{Cursor, RowHandle, Rows, SdbTable};
pub use wal::FileLog;

#[cfg(test)]
pub(crate) mod test_support {
    use super::*;
    use parking_lot::Mutex;
    use serde::{Deserialize, Serialize};
    use std::collections::HashSet;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tsmeta_common::{Error, Result};

    #[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
    pub struct Widget {
        pub id: i32,
        pub name: String,
        pub weight: u32,
    }

    impl Widget {
        pub fn new(id: i32, name: &str) -> Self {
            Self {
                id,
                name: name.to_string(),
                weight: 0,
            }
        }
    }

    /// Actions that count every callback
    #[derive(Default)]
    pub struct WidgetActions {
        inserted: AtomicUsize,
        deleted: AtomicUsize,
        updated: AtomicUsize,
        destroyed: AtomicUsize,
        restores: AtomicUsize,
        rejected: Mutex<HashSet<i32>>,
    }

    impl WidgetActions {
        pub fn reject(&self, id: i32) {
            self.rejected.lock().insert(id);
        }

        pub fn inserted(&self) -> usize {
            self.inserted.load(Ordering::SeqCst)
        }

        pub fn deleted(&self) -> usize {
            self.deleted.load(Ordering::SeqCst)
        }

        pub fn updated(&self) -> usize {
            self.updated.load(Ordering::SeqCst)
        }

        pub fn destroyed(&self) -> usize {
            self.destroyed.load(Ordering::SeqCst)
        }

        pub fn restore_calls(&self) -> usize {
            self.restores.load(Ordering::SeqCst)
        }
    }

    impl TableActions for WidgetActions {
        type Row = Widget;

        fn key(&self, row: &Widget) -> RowKey {
            RowKey::Int(row.id)
        }

        fn insert(&self, row: &mut Widget) -> Result<()> {
            if self.rejected.lock().contains(&row.id) {
                return Err(Error::DependencyMissing(format!("widget {}", row.id)));
            }
            self.inserted.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }

        fn delete(&self, _row: &Widget) {
            self.deleted.fetch_add(1, Ordering::SeqCst);
        }

        fn update(&self, canonical: &mut Widget, incoming: Widget) -> Result<()> {
            canonical.name = incoming.name;
            canonical.weight = incoming.weight;
            self.updated.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }

        fn encode(&self, row: &Widget) -> Result<Vec<u8>> {
            bincode::serialize(row).map_err(|e| Error::Serialization(e.to_string()))
        }

        fn decode(&self, data: &[u8]) -> Result<Widget> {
            bincode::deserialize(data).map_err(|e| Error::Deserialization(e.to_string()))
        }

        fn destroy(&self, row: Widget) {
            self.destroyed.fetch_add(1, Ordering::SeqCst);
            drop(row);
        }

        fn restored(&self, _table: &SdbTable<Self>) -> Result<()> {
            self.restores.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    /// Integer-keyed widget table over a fresh in-memory log
    pub fn widget_table(capacity: usize) -> (SdbTable<WidgetActions>, Arc<MemoryLog>) {
        let log = Arc::new(MemoryLog::new());
        let desc = TableDesc::new(1, "widgets", KeyType::Int, capacity).with_max_row_size(256);
        let table = SdbTable::new(desc, WidgetActions::default(), log.clone()).unwrap();
        (table, log)
    }
}
