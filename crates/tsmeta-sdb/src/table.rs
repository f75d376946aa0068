//! Reference-counted, hash-indexed row table
//!
//! Rows live in a fixed arena of slots. A parallel array of atomic reference
//! counts tracks how many holders each slot has; the table itself holds one
//! reference on every live row and drops it when the row is deleted. Storage
//! is reclaimed by whichever release brings the count to zero.
//!
//! ```text
//!  buckets[hash(key) % n] ──► [(key, slot), ...]
//!                                      │
//!  slots[slot]  ──► RwLock<Option<Row>> + deleted flag
//!  refs[slot]   ──► AtomicU32
//! ```
//!
//! Mutations are serialized by a per-table writer lock. Lookups and scans only
//! hold a bucket read lock long enough to bump a reference count, so a slow
//! reader never blocks a writer.

use crate::actions::{TableActions, TableDesc};
use crate::key::RowKey;
use crate::log::{LogEntry, ReplicationLog};
use crate::oper::{OperKind, OperScope, SdbOper};
use parking_lot::{
    MappedRwLockReadGuard, MappedRwLockWriteGuard, Mutex, RwLock, RwLockReadGuard,
    RwLockWriteGuard,
};
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicUsize, Ordering};
use tracing::{debug, info, warn};
use tsmeta_common::{Error, Result};

struct Slot<R> {
    row: RwLock<Option<R>>,
    deleted: AtomicBool,
}

struct TableCore<A: TableActions> {
    desc: TableDesc,
    actions: A,
    log: Arc<dyn ReplicationLog>,
    slots: Box<[Slot<A::Row>]>,
    refs: Box<[AtomicU32]>,
    buckets: Box<[RwLock<Vec<(RowKey, usize)>>]>,
    free: Mutex<Vec<usize>>,
    writer: Mutex<()>,
    num_rows: AtomicUsize,
    restored: AtomicBool,
}

/// Position in a table scan. `Cursor::default()` starts from the beginning.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Cursor {
    bucket: usize,
    pos: usize,
}

/// A table of rows owned by a [`TableActions`] implementation.
///
/// Cloning is cheap and yields another handle to the same table.
pub struct SdbTable<A: TableActions> {
    core: Arc<TableCore<A>>,
}

impl<A: TableActions> Clone for SdbTable<A> {
    fn clone(&self) -> Self {
        Self {
            core: Arc::clone(&self.core),
        }
    }
}

impl<A: TableActions> fmt::Debug for SdbTable<A> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SdbTable")
            .field("table_id", &self.core.desc.table_id)
            .field("name", &self.core.desc.name)
            .field("rows", &self.num_rows())
            .finish()
    }
}

impl<A: TableActions> SdbTable<A> {
    pub(crate) fn new(desc: TableDesc, actions: A, log: Arc<dyn ReplicationLog>) -> Result<Self> {
        if desc.hash_sessions == 0 || desc.max_rows == 0 {
            return Err(Error::invalid_argument(format!(
                "table '{}' needs at least one bucket and one slot",
                desc.name
            )));
        }

        let slots = (0..desc.max_rows)
            .map(|_| Slot {
                row: RwLock::new(None),
                deleted: AtomicBool::new(false),
            })
            .collect();
        let refs = (0..desc.max_rows).map(|_| AtomicU32::new(0)).collect();
        let buckets = (0..desc.hash_sessions)
            .map(|_| RwLock::new(Vec::new()))
            .collect();
        // Pop order hands out slot 0 first
        let free = (0..desc.max_rows).rev().collect();

        Ok(Self {
            core: Arc::new(TableCore {
                desc,
                actions,
                log,
                slots,
                refs,
                buckets,
                free: Mutex::new(free),
                writer: Mutex::new(()),
                num_rows: AtomicUsize::new(0),
                restored: AtomicBool::new(false),
            }),
        })
    }

    /// Table description
    pub fn desc(&self) -> &TableDesc {
        &self.core.desc
    }

    /// Table id
    pub fn table_id(&self) -> u32 {
        self.core.desc.table_id
    }

    /// Table name
    pub fn name(&self) -> &str {
        &self.core.desc.name
    }

    /// Owner callbacks
    pub fn actions(&self) -> &A {
        &self.core.actions
    }

    /// Number of live (not deleted) rows
    pub fn num_rows(&self) -> usize {
        self.core.num_rows.load(Ordering::Acquire)
    }

    /// Check if the restored callback has run
    pub fn is_restored(&self) -> bool {
        self.core.restored.load(Ordering::Acquire)
    }

    /// Submit an operation, dispatching on its kind
    pub fn submit(&self, oper: SdbOper<A::Row>) -> Result<()> {
        match oper.kind {
            OperKind::Insert => self.insert_row(oper),
            OperKind::Delete => self.delete_row(oper),
            OperKind::Update => self.update_row(oper),
        }
    }

    /// Insert a new row.
    ///
    /// The row becomes visible to lookups and scans only after the owner's
    /// insert callback accepts it.
    pub fn insert_row(&self, mut oper: SdbOper<A::Row>) -> Result<()> {
        self.core.expect_kind(&oper, OperKind::Insert)?;
        let key = self.core.checked_key(&oper.row)?;

        let _writer = self.core.writer.lock();
        if self.core.find(&key).is_some() {
            return Err(Error::already_exists(self.name(), &key));
        }

        let slot = self.core.reserve_slot()?;
        if oper.scope == OperScope::Global
            && let Err(e) = self.core.persist(OperKind::Insert, &key, &mut oper)
        {
            self.core.free.lock().push(slot);
            return Err(e);
        }

        if let Err(e) = self.core.actions.insert(&mut oper.row) {
            self.core.free.lock().push(slot);
            return Err(e);
        }

        self.core.publish(slot, key, oper.row);
        Ok(())
    }

    /// Delete a row.
    ///
    /// The row disappears from lookups and scans immediately; its storage is
    /// reclaimed once every outstanding handle has been released.
    pub fn delete_row(&self, mut oper: SdbOper<A::Row>) -> Result<()> {
        self.core.expect_kind(&oper, OperKind::Delete)?;
        let key = self.core.checked_key(&oper.row)?;

        let _writer = self.core.writer.lock();
        let Some(slot) = self.core.find(&key) else {
            return Err(Error::not_found(self.name(), &key));
        };

        if oper.scope == OperScope::Global {
            self.core.persist(OperKind::Delete, &key, &mut oper)?;
        }

        self.core.unlink(slot, &key);
        Ok(())
    }

    /// Update a row in place.
    ///
    /// The canonical row keeps its slot; the owner copies the incoming image
    /// onto it and the incoming image is dropped.
    pub fn update_row(&self, mut oper: SdbOper<A::Row>) -> Result<()> {
        self.core.expect_kind(&oper, OperKind::Update)?;
        let key = self.core.checked_key(&oper.row)?;

        let _writer = self.core.writer.lock();
        let Some(slot) = self.core.find(&key) else {
            return Err(Error::not_found(self.name(), &key));
        };

        if oper.scope == OperScope::Global {
            self.core.persist(OperKind::Update, &key, &mut oper)?;
        }

        self.core.merge(slot, oper.row)
    }

    /// Look up a row by key, taking a reference on it
    pub fn get_row(&self, key: &RowKey) -> Option<RowHandle<A>> {
        let bucket = self.core.bucket(key).read();
        let slot = bucket.iter().find(|(k, _)| k == key).map(|&(_, slot)| slot)?;
        self.core.refs[slot].fetch_add(1, Ordering::AcqRel);
        drop(bucket);

        Some(self.handle(slot))
    }

    /// Release a handle obtained from [`get_row`](Self::get_row) or a scan.
    ///
    /// Equivalent to dropping it.
    pub fn release_row(&self, handle: RowHandle<A>) {
        drop(handle);
    }

    /// Advance `cursor` to the next live row, taking a reference on it.
    ///
    /// Rows come back in bucket order. Rows inserted or deleted while a scan
    /// is in progress may or may not be observed.
    pub fn next_row(&self, cursor: &mut Cursor) -> Option<RowHandle<A>> {
        while cursor.bucket < self.core.buckets.len() {
            let bucket = self.core.buckets[cursor.bucket].read();
            if let Some(&(_, slot)) = bucket.get(cursor.pos) {
                self.core.refs[slot].fetch_add(1, Ordering::AcqRel);
                drop(bucket);
                cursor.pos += 1;
                return Some(self.handle(slot));
            }
            drop(bucket);
            cursor.bucket += 1;
            cursor.pos = 0;
        }
        None
    }

    /// Scan every live row
    pub fn iter(&self) -> Rows<A> {
        Rows {
            table: self.clone(),
            cursor: Cursor::default(),
        }
    }

    /// Apply a replicated entry received from the log.
    ///
    /// An insert for a key that is already present is merged into the
    /// canonical row. Entries the owner rejects, and deletes or updates of
    /// rows that are not present, are skipped with a warning. Decode failures
    /// are returned.
    pub fn apply_replicated(&self, entry: LogEntry) -> Result<()> {
        if entry.table_id != self.table_id() {
            return Err(Error::invalid_argument(format!(
                "entry for table {} applied to table {}",
                entry.table_id,
                self.table_id()
            )));
        }

        if entry.kind == OperKind::Delete {
            let _writer = self.core.writer.lock();
            match self.core.find(&entry.key) {
                Some(slot) => self.core.unlink(slot, &entry.key),
                None => warn!(
                    "Replayed delete for missing row {} in {}",
                    entry.key,
                    self.name()
                ),
            }
            return Ok(());
        }

        let row = self.core.actions.decode(&entry.data)?;
        let key = self.core.checked_key(&row)?;
        if key != entry.key {
            return Err(Error::DataCorruption(format!(
                "entry key {} does not match row key {} in {}",
                entry.key,
                key,
                self.name()
            )));
        }

        let _writer = self.core.writer.lock();
        if let Some(slot) = self.core.find(&key) {
            debug!("Merging replayed {} for row {} in {}", entry.kind, key, self.name());
            return self.core.merge(slot, row);
        }

        if entry.kind == OperKind::Update {
            warn!("Replayed update for missing row {} in {}", key, self.name());
            return Ok(());
        }

        let slot = self.core.reserve_slot()?;
        let mut row = row;
        match self.core.actions.insert(&mut row) {
            Ok(()) => {
                self.core.publish(slot, key, row);
                Ok(())
            }
            Err(e) => {
                self.core.free.lock().push(slot);
                warn!("Skipping replayed row {} in {}: {}", key, self.name(), e);
                Ok(())
            }
        }
    }

    /// Run the owner's restored callback. Only the first call has an effect.
    pub fn on_replay_complete(&self) -> Result<()> {
        if self.core.restored.swap(true, Ordering::AcqRel) {
            debug!("Table {} already restored", self.name());
            return Ok(());
        }
        info!(
            "Table {} restored with {} rows",
            self.name(),
            self.num_rows()
        );
        self.core.actions.restored(self)
    }

    fn handle(&self, slot: usize) -> RowHandle<A> {
        RowHandle {
            core: Arc::clone(&self.core),
            slot,
        }
    }
}

impl<A: TableActions> TableCore<A> {
    fn bucket(&self, key: &RowKey) -> &RwLock<Vec<(RowKey, usize)>> {
        &self.buckets[key.bucket(self.buckets.len())]
    }

    fn find(&self, key: &RowKey) -> Option<usize> {
        self.bucket(key)
            .read()
            .iter()
            .find(|(k, _)| k == key)
            .map(|&(_, slot)| slot)
    }

    fn expect_kind(&self, oper: &SdbOper<A::Row>, kind: OperKind) -> Result<()> {
        if oper.kind == kind {
            Ok(())
        } else {
            Err(Error::invalid_argument(format!(
                "{} operation submitted as {} on {}",
                oper.kind, kind, self.desc.name
            )))
        }
    }

    fn checked_key(&self, row: &A::Row) -> Result<RowKey> {
        let key = self.actions.key(row);
        if key.key_type() != self.desc.key_type {
            return Err(Error::KeyTypeMismatch {
                table: self.desc.name.clone(),
            });
        }
        Ok(key)
    }

    fn reserve_slot(&self) -> Result<usize> {
        self.free.lock().pop().ok_or_else(|| Error::OutOfMemory {
            table: self.desc.name.clone(),
            capacity: self.desc.max_rows,
        })
    }

    /// Encode the row and append it to the replication log
    fn persist(&self, kind: OperKind, key: &RowKey, oper: &mut SdbOper<A::Row>) -> Result<()> {
        let data = self.actions.encode(&oper.row)?;
        if data.len() > self.desc.max_row_size {
            return Err(Error::RowTooLarge {
                table: self.desc.name.clone(),
                size: data.len(),
                max: self.desc.max_row_size,
            });
        }
        oper.row_size = data.len();

        let entry = LogEntry {
            table_id: self.desc.table_id,
            kind,
            key: key.clone(),
            data,
        };
        let seq = self.log.append(&entry).map_err(|e| match e {
            Error::ReplicationFailure(_) => e,
            other => Error::replication(other.to_string()),
        })?;

        debug!(
            "Logged {} of row {} in {} at seq {} ({} bytes)",
            kind, key, self.desc.name, seq, oper.row_size
        );
        Ok(())
    }

    fn publish(&self, slot: usize, key: RowKey, row: A::Row) {
        *self.slots[slot].row.write() = Some(row);
        self.slots[slot].deleted.store(false, Ordering::Release);
        // The table's own reference
        self.refs[slot].store(1, Ordering::Release);
        self.bucket(&key).write().push((key, slot));
        self.num_rows.fetch_add(1, Ordering::AcqRel);
    }

    fn unlink(&self, slot: usize, key: &RowKey) {
        self.bucket(key).write().retain(|(k, _)| k != key);
        self.slots[slot].deleted.store(true, Ordering::Release);
        self.num_rows.fetch_sub(1, Ordering::AcqRel);

        if let Some(row) = self.slots[slot].row.read().as_ref() {
            self.actions.delete(row);
        }
        self.release(slot);
    }

    fn merge(&self, slot: usize, incoming: A::Row) -> Result<()> {
        let mut guard = self.slots[slot].row.write();
        match guard.as_mut() {
            Some(canonical) => self.actions.update(canonical, incoming),
            None => Err(Error::internal(format!(
                "slot {slot} of {} is empty",
                self.desc.name
            ))),
        }
    }

    fn release(&self, slot: usize) {
        let prev = self.refs[slot].fetch_sub(1, Ordering::AcqRel);
        debug_assert!(prev > 0, "reference count underflow");
        if prev == 1 {
            self.reclaim(slot);
        }
    }

    fn reclaim(&self, slot: usize) {
        debug_assert!(self.slots[slot].deleted.load(Ordering::Acquire));
        let row = self.slots[slot].row.write().take();
        if let Some(row) = row {
            self.actions.destroy(row);
        }
        self.free.lock().push(slot);
    }
}

/// Counted reference to a row.
///
/// The row's storage stays valid for as long as the handle lives, even if the
/// row is deleted from the table in the meantime. Dropping the handle releases
/// the reference.
pub struct RowHandle<A: TableActions> {
    core: Arc<TableCore<A>>,
    slot: usize,
}

impl<A: TableActions> RowHandle<A> {
    /// Read the row
    pub fn read(&self) -> MappedRwLockReadGuard<'_, A::Row> {
        RwLockReadGuard::map(self.core.slots[self.slot].row.read(), |row| {
            row.as_ref().expect("referenced slot holds a row")
        })
    }

    /// Modify the row in place without going through the log
    pub fn write(&self) -> MappedRwLockWriteGuard<'_, A::Row> {
        RwLockWriteGuard::map(self.core.slots[self.slot].row.write(), |row| {
            row.as_mut().expect("referenced slot holds a row")
        })
    }

    /// Check if the row has been deleted from the table since it was obtained
    pub fn is_deleted(&self) -> bool {
        self.core.slots[self.slot].deleted.load(Ordering::Acquire)
    }

    /// Current number of references to the row, including this one
    pub fn ref_count(&self) -> u32 {
        self.core.refs[self.slot].load(Ordering::Acquire)
    }
}

impl<A: TableActions> Drop for RowHandle<A> {
    fn drop(&mut self) {
        self.core.release(self.slot);
    }
}

impl<A: TableActions> fmt::Debug for RowHandle<A> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RowHandle")
            .field("table", &self.core.desc.name)
            .field("slot", &self.slot)
            .finish()
    }
}

/// Iterator over every live row of a table
pub struct Rows<A: TableActions> {
    table: SdbTable<A>,
    cursor: Cursor,
}

impl<A: TableActions> Iterator for Rows<A> {
    type Item = RowHandle<A>;

    fn next(&mut self) -> Option<Self::Item> {
        self.table.next_row(&mut self.cursor)
    }
}
