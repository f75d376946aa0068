//! Management-node directory
//!
//! One replicated row per management node, keyed by node id. The directory
//! owns an `mnodes` table in an [`Sdb`] context and keeps each entry linked to
//! the physical host it runs on.

use crate::hosts::{HostRecord, HostRegistry};
use crate::node::{HostLink, NodeEntry};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tracing::{debug, info, warn};
use tsmeta_common::config::MnodeConfig;
use tsmeta_common::{Error, NodeId, Result, SyncRole, now_millis};
use tsmeta_sdb::{
    KeyType, RowHandle, RowKey, Rows, Sdb, SdbOper, SdbTable, TableActions, TableDesc,
};

/// Table id of the management-node table
pub const MNODE_TABLE_ID: u32 = 1;

/// Table name of the management-node table
pub const MNODE_TABLE_NAME: &str = "mnodes";

/// Row callbacks for the management-node table
pub struct MnodeActions {
    hosts: Arc<dyn HostRegistry>,
}

impl MnodeActions {
    /// Create callbacks resolving hosts through `hosts`
    pub fn new(hosts: Arc<dyn HostRegistry>) -> Self {
        Self { hosts }
    }

    /// Point `entry` at its host record
    pub fn resolve_host_link(&self, entry: &mut NodeEntry) -> Result<Arc<HostRecord>> {
        let host = self.hosts.lookup_host(entry.node_id).ok_or_else(|| {
            Error::DependencyMissing(format!("no host registered for node {}", entry.node_id))
        })?;
        entry.host = HostLink::to(&host);
        Ok(host)
    }
}

impl TableActions for MnodeActions {
    type Row = NodeEntry;

    fn key(&self, row: &NodeEntry) -> RowKey {
        RowKey::from(row.node_id)
    }

    fn insert(&self, row: &mut NodeEntry) -> Result<()> {
        let host = self.resolve_host_link(row)?;
        host.set_mgmt(true);
        debug!("Node {} attached to host {}", row.node_id, host.name);
        Ok(())
    }

    fn delete(&self, row: &NodeEntry) {
        debug!("Node {} dropped from {}", row.node_id, MNODE_TABLE_NAME);
    }

    fn update(&self, canonical: &mut NodeEntry, incoming: NodeEntry) -> Result<()> {
        canonical.created_time = incoming.created_time;
        canonical.role = incoming.role;
        Ok(())
    }

    fn encode(&self, row: &NodeEntry) -> Result<Vec<u8>> {
        bincode::serialize(row).map_err(|e| Error::Serialization(e.to_string()))
    }

    fn decode(&self, data: &[u8]) -> Result<NodeEntry> {
        bincode::deserialize(data).map_err(|e| Error::Deserialization(e.to_string()))
    }

    fn restored(&self, table: &SdbTable<Self>) -> Result<()> {
        enforce_single_master(table);
        Ok(())
    }
}

/// Make a lone surviving entry the master.
///
/// With several entries the layout is left as replayed; an empty directory or
/// more than one master is only reported.
pub fn enforce_single_master(table: &SdbTable<MnodeActions>) {
    let entries: Vec<RowHandle<MnodeActions>> = table.iter().collect();
    let masters = entries
        .iter()
        .filter(|h| h.read().role.is_master())
        .count();

    match entries.as_slice() {
        [] => warn!("No management node left after replay"),
        [only] => {
            let mut entry = only.write();
            if !entry.role.is_master() {
                info!("Node {} is the only management node, promoting to master", entry.node_id);
                entry.role = SyncRole::Master;
            }
        }
        _ if masters == 0 => warn!(
            "{} management nodes restored without a master",
            entries.len()
        ),
        _ if masters > 1 => warn!(
            "{} management nodes restored with {} masters",
            entries.len(),
            masters
        ),
        _ => debug!("{} management nodes restored", entries.len()),
    }
}

/// Registry of management nodes backed by a replicated table
pub struct NodeDirectory {
    table: SdbTable<MnodeActions>,
    hosts: Arc<dyn HostRegistry>,
    config: MnodeConfig,
    is_master: AtomicBool,
}

impl NodeDirectory {
    /// Open the management-node table in `sdb`.
    ///
    /// Call [`Sdb::replay`] afterwards to rebuild existing entries.
    pub fn open(sdb: &Sdb, hosts: Arc<dyn HostRegistry>, config: &MnodeConfig) -> Result<Self> {
        let desc = TableDesc::new(
            MNODE_TABLE_ID,
            MNODE_TABLE_NAME,
            KeyType::Int,
            config.max_mnodes,
        )
        .with_max_row_size(config.max_row_size);
        let table = sdb.open_table(desc, MnodeActions::new(Arc::clone(&hosts)))?;

        Ok(Self {
            table,
            hosts,
            config: config.clone(),
            is_master: AtomicBool::new(true),
        })
    }

    /// Admit the host `node_id` as a management node
    pub fn admit(&self, node_id: NodeId) -> Result<()> {
        if self.hosts.lookup_host(node_id).is_none() {
            return Err(Error::DependencyMissing(format!(
                "no host registered for node {node_id}"
            )));
        }

        let entry = NodeEntry::new(node_id, now_millis());
        self.table.insert_row(SdbOper::insert(entry))?;
        info!("Admitted management node {}", node_id);
        Ok(())
    }

    /// Remove the management node `node_id`
    pub fn remove(&self, node_id: NodeId) -> Result<()> {
        self.table
            .delete_row(SdbOper::delete(NodeEntry::key_only(node_id)))?;
        info!("Removed management node {}", node_id);
        Ok(())
    }

    /// Change the role of `node_id` through a replicated update
    pub fn set_role(&self, node_id: NodeId, role: SyncRole) -> Result<()> {
        let created_time = self
            .get(node_id)
            .map(|h| h.read().created_time)
            .ok_or_else(|| Error::not_found(MNODE_TABLE_NAME, node_id))?;

        let mut image = NodeEntry::new(node_id, created_time);
        image.role = role;
        self.table.update_row(SdbOper::update(image))?;
        info!("Management node {} is now {}", node_id, role);
        Ok(())
    }

    /// Look up an entry
    pub fn get(&self, node_id: NodeId) -> Option<RowHandle<MnodeActions>> {
        self.table.get_row(&RowKey::from(node_id))
    }

    /// Number of management nodes
    pub fn count(&self) -> usize {
        self.table.num_rows()
    }

    /// Scan every entry
    pub fn iter(&self) -> Rows<MnodeActions> {
        self.table.iter()
    }

    /// Id of the entry currently holding the master role
    pub fn master(&self) -> Option<NodeId> {
        self.iter().find_map(|h| {
            let entry = h.read();
            entry.role.is_master().then_some(entry.node_id)
        })
    }

    /// Check if the local management node accepts writes
    pub fn is_master(&self) -> bool {
        self.is_master.load(Ordering::Acquire)
    }

    /// Record whether the local management node accepts writes
    pub fn set_master(&self, is_master: bool) {
        self.is_master.store(is_master, Ordering::Release);
    }

    /// Underlying table
    pub fn table(&self) -> &SdbTable<MnodeActions> {
        &self.table
    }

    /// Directory configuration
    pub fn config(&self) -> &MnodeConfig {
        &self.config
    }
}

impl std::fmt::Debug for NodeDirectory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NodeDirectory")
            .field("count", &self.count())
            .field("is_master", &self.is_master())
            .finish()
    }
}
