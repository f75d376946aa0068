//! tsmeta mnode - management-node directory
//!
//! Keeps the set of management nodes in a replicated [`tsmeta_sdb`] table and
//! derives from it:
//! - Client failover address sets and peer node lists
//! - The administrative `show mnodes` listing
//!
//! After log replay a directory holding a single entry always makes it the
//! master.

pub mod directory;
pub mod endpoints;
pub mod hosts;
pub mod node;
pub mod show;

// Re-exports
pub use directory::{MNODE_TABLE_ID, MNODE_TABLE_NAME, MnodeActions, NodeDirectory};
pub use endpoints::{Endpoint, EndpointSet, NodeInfo, NodeInfos};
pub use hosts::{HostRecord, HostRegistry, MemoryHosts};
pub use node::{HostLink, NodeEntry};
pub use show::{Connection, MemoryUsers, ShowObj, User, UserLookup};

#[cfg(test)]
pub(crate) mod test_support {
    use super::*;
    use std::net::Ipv4Addr;
    use std::sync::Arc;
    use tsmeta_common::NodeId;
    use tsmeta_common::config::MnodeConfig;
    use tsmeta_sdb::Sdb;

    /// Registry with hosts `node-<id>` at 10.0.0.<id> / 192.0.2.<id>
    pub fn hosts_with(ids: &[i32]) -> Arc<MemoryHosts> {
        let hosts = Arc::new(MemoryHosts::new());
        for &id in ids {
            let octet = u8::try_from(id).unwrap();
            hosts.add(HostRecord::new(
                NodeId::new(id),
                format!("node-{id}"),
                Ipv4Addr::new(10, 0, 0, octet),
                Ipv4Addr::new(192, 0, 2, octet),
                6030,
                6035,
            ));
        }
        hosts
    }

    /// Directory with default configuration over `sdb`
    pub fn directory(sdb: &Sdb, hosts: &Arc<MemoryHosts>) -> NodeDirectory {
        let hosts: Arc<dyn HostRegistry> = hosts.clone();
        NodeDirectory::open(sdb, hosts, &MnodeConfig::default()).unwrap()
    }
}
