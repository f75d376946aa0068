//! Table descriptors and the owner callback contract

use crate::key::{KeyType, RowKey};
use crate::table::SdbTable;
use tsmeta_common::Result;

/// Static description of a table, fixed at open time
#[derive(Clone, Debug)]
pub struct TableDesc {
    /// Numeric table id, unique per `Sdb` context
    pub table_id: u32,
    /// Human-readable name used in logs and errors
    pub name: String,
    /// Key type every row must use
    pub key_type: KeyType,
    /// Number of hash buckets in the index
    pub hash_sessions: usize,
    /// Maximum number of live rows (slot arena capacity)
    pub max_rows: usize,
    /// Maximum encoded row image size in bytes
    pub max_row_size: usize,
}

impl TableDesc {
    /// Describe a table with one bucket and one slot per expected row
    pub fn new(table_id: u32, name: impl Into<String>, key_type: KeyType, max_rows: usize) -> Self {
        Self {
            table_id,
            name: name.into(),
            key_type,
            hash_sessions: max_rows,
            max_rows,
            max_row_size: 1024,
        }
    }

    /// Override the number of hash buckets
    #[must_use]
    pub const fn with_hash_sessions(mut self, hash_sessions: usize) -> Self {
        self.hash_sessions = hash_sessions;
        self
    }

    /// Override the maximum encoded row size
    #[must_use]
    pub const fn with_max_row_size(mut self, max_row_size: usize) -> Self {
        self.max_row_size = max_row_size;
        self
    }
}

/// Callbacks a table owner supplies so the core stays agnostic to row layout.
///
/// `insert`, `delete`, `update` and `encode` run with the table's writer lock
/// held. `destroy` runs on whichever thread drops the last reference to a
/// deleted row, and `restored` runs once after log replay.
pub trait TableActions: Send + Sync + Sized + 'static {
    /// Row type stored in the table
    type Row: Send + Sync + 'static;

    /// Key of a row image
    fn key(&self, row: &Self::Row) -> RowKey;

    /// Admit a row. Failing here keeps the row out of the table.
    fn insert(&self, row: &mut Self::Row) -> Result<()>;

    /// Observe a logical delete; the row stays readable through open handles.
    fn delete(&self, row: &Self::Row);

    /// Copy `incoming` onto the canonical row in place.
    fn update(&self, canonical: &mut Self::Row, incoming: Self::Row) -> Result<()>;

    /// Serialize the replicated part of a row.
    fn encode(&self, row: &Self::Row) -> Result<Vec<u8>>;

    /// Build a fresh row from a replicated image.
    fn decode(&self, data: &[u8]) -> Result<Self::Row>;

    /// Reclaim a deleted row once its last handle is released.
    fn destroy(&self, row: Self::Row) {
        drop(row);
    }

    /// Fix up cross-row invariants once the log has been fully replayed.
    fn restored(&self, table: &SdbTable<Self>) -> Result<()>;
}
