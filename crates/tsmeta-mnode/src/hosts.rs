//! Physical host registry
//!
//! Hosts are owned by the node-lifecycle manager. The management-node
//! directory only looks them up by id and keeps weak back-references to them.

use parking_lot::RwLock;
use std::collections::HashMap;
use std::net::Ipv4Addr;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tsmeta_common::NodeId;
use tsmeta_common::config::HostConfig;

/// A physical host that may run a management node
#[derive(Debug)]
pub struct HostRecord {
    /// Host id, shared with its management-node entry
    pub node_id: NodeId,
    /// Display name
    pub name: String,
    /// Address inside the cluster network
    pub private_ip: Ipv4Addr,
    /// Address reachable by external clients
    pub public_ip: Ipv4Addr,
    /// Management shell port
    pub shell_port: u16,
    /// Management peer port
    pub peer_port: u16,
    is_mgmt: AtomicBool,
}

impl HostRecord {
    /// Create a host that is not yet running a management node
    pub fn new(
        node_id: NodeId,
        name: impl Into<String>,
        private_ip: Ipv4Addr,
        public_ip: Ipv4Addr,
        shell_port: u16,
        peer_port: u16,
    ) -> Self {
        Self {
            node_id,
            name: name.into(),
            private_ip,
            public_ip,
            shell_port,
            peer_port,
            is_mgmt: AtomicBool::new(false),
        }
    }

    /// Check if a management node is attached to this host
    pub fn is_mgmt(&self) -> bool {
        self.is_mgmt.load(Ordering::Acquire)
    }

    /// Mark whether a management node is attached to this host
    pub fn set_mgmt(&self, is_mgmt: bool) {
        self.is_mgmt.store(is_mgmt, Ordering::Release);
    }

    /// Address handed out to clients
    pub const fn address(&self, use_public: bool) -> Ipv4Addr {
        if use_public {
            self.public_ip
        } else {
            self.private_ip
        }
    }
}

impl From<&HostConfig> for HostRecord {
    fn from(config: &HostConfig) -> Self {
        Self::new(
            NodeId::new(config.id),
            config.name.clone(),
            config.private_ip,
            config.public_ip,
            config.shell_port,
            config.peer_port,
        )
    }
}

/// Lookup interface onto the host registry
pub trait HostRegistry: Send + Sync {
    /// Find a host by id
    fn lookup_host(&self, node_id: NodeId) -> Option<Arc<HostRecord>>;
}

/// In-process host registry
#[derive(Debug, Default)]
pub struct MemoryHosts {
    hosts: RwLock<HashMap<NodeId, Arc<HostRecord>>>,
}

impl MemoryHosts {
    /// Create an empty registry
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a registry from statically configured hosts
    pub fn from_config(hosts: &[HostConfig]) -> Self {
        let registry = Self::new();
        for host in hosts {
            registry.add(HostRecord::from(host));
        }
        registry
    }

    /// Register a host, replacing any previous record with the same id
    pub fn add(&self, host: HostRecord) -> Arc<HostRecord> {
        let host = Arc::new(host);
        self.hosts.write().insert(host.node_id, Arc::clone(&host));
        host
    }

    /// Forget a host. Directory entries pointing at it become dangling.
    pub fn remove(&self, node_id: NodeId) -> Option<Arc<HostRecord>> {
        self.hosts.write().remove(&node_id)
    }

    /// Number of registered hosts
    pub fn len(&self) -> usize {
        self.hosts.read().len()
    }

    /// Check if no host is registered
    pub fn is_empty(&self) -> bool {
        self.hosts.read().is_empty()
    }
}

impl HostRegistry for MemoryHosts {
    fn lookup_host(&self, node_id: NodeId) -> Option<Arc<HostRecord>> {
        self.hosts.read().get(&node_id).cloned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lookup_and_remove() {
        let hosts = MemoryHosts::new();
        hosts.add(HostRecord::new(
            NodeId::new(1),
            "node-1",
            Ipv4Addr::new(10, 0, 0, 1),
            Ipv4Addr::new(192, 0, 2, 1),
            6030,
            6035,
        ));

        let host = hosts.lookup_host(NodeId::new(1)).unwrap();
        assert_eq!(host.name, "node-1");
        assert!(!host.is_mgmt());
        assert!(hosts.lookup_host(NodeId::new(2)).is_none());

        hosts.remove(NodeId::new(1));
        assert!(hosts.is_empty());
    }

    #[test]
    fn test_from_config() {
        let config: tsmeta_common::Config = toml::from_str(
            r#"
            [[hosts]]
            id = 4
            name = "node-4"
            private_ip = "10.0.0.4"
            public_ip = "203.0.113.4"
            shell_port = 7030
        "#,
        )
        .unwrap();

        let hosts = MemoryHosts::from_config(&config.hosts);
        let host = hosts.lookup_host(NodeId::new(4)).unwrap();
        assert_eq!(host.shell_port, 7030);
        assert_eq!(host.peer_port, 6035);
        assert_eq!(host.address(true), Ipv4Addr::new(203, 0, 113, 4));
        assert_eq!(host.address(false), Ipv4Addr::new(10, 0, 0, 4));
    }
}
