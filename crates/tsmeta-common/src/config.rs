//! Configuration types for tsmeta
//!
//! This module defines configuration structures used across components.
//! Every section has defaults so a partial TOML file is enough.

use serde::{Deserialize, Serialize};
use std::net::Ipv4Addr;
use std::path::PathBuf;

/// Root configuration for a management node
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Node configuration
    pub node: NodeConfig,
    /// Row storage configuration
    pub sdb: SdbConfig,
    /// Management-node directory configuration
    pub mnode: MnodeConfig,
    /// Logging configuration
    pub logging: LoggingConfig,
    /// Statically known hosts
    pub hosts: Vec<HostConfig>,
}

/// Node identity configuration
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct NodeConfig {
    /// Local node identifier
    pub id: i32,
    /// Node name (human-readable identifier)
    pub name: String,
    /// Data directory for the replication log
    pub data_dir: PathBuf,
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            id: 1,
            name: "tsmeta-node".to_string(),
            data_dir: PathBuf::from("/var/lib/tsmeta"),
        }
    }
}

/// Row storage and replication log configuration
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct SdbConfig {
    /// Log file name, relative to the data directory
    pub wal_file: String,
    /// Sync after every append
    pub sync_on_write: bool,
}

impl Default for SdbConfig {
    fn default() -> Self {
        Self {
            wal_file: "sdb.wal".to_string(),
            sync_on_write: true,
        }
    }
}

/// Management-node directory configuration
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct MnodeConfig {
    /// Maximum number of management nodes (hash buckets and row slots)
    pub max_mnodes: usize,
    /// Maximum encoded row size in bytes
    pub max_row_size: usize,
    /// Account allowed to list the directory
    pub admin_user: String,
    /// Hand out public addresses in failover sets
    pub use_public_ip: bool,
}

impl Default for MnodeConfig {
    fn default() -> Self {
        Self {
            max_mnodes: 5,
            max_row_size: 64,
            admin_user: "root".to_string(),
            use_public_ip: false,
        }
    }
}

/// Logging configuration
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Default filter when `RUST_LOG` is unset
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
        }
    }
}

/// Physical host known to the node-lifecycle manager
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct HostConfig {
    /// Host identifier (shared with its management-node entry)
    pub id: i32,
    /// Display name
    pub name: String,
    /// Address inside the cluster network
    pub private_ip: Ipv4Addr,
    /// Address reachable by external clients
    pub public_ip: Ipv4Addr,
    /// Port serving client shell requests
    #[serde(default = "default_shell_port")]
    pub shell_port: u16,
    /// Port serving management peer traffic
    #[serde(default = "default_peer_port")]
    pub peer_port: u16,
}

const fn default_shell_port() -> u16 {
    6030
}

const fn default_peer_port() -> u16 {
    6035
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.node.id, 1);
        assert_eq!(config.mnode.max_mnodes, 5);
        assert_eq!(config.mnode.admin_user, "root");
        assert!(config.sdb.sync_on_write);
        assert!(config.hosts.is_empty());
    }

    #[test]
    fn test_partial_toml() {
        let text = r#"
            [node]
            id = 3
            name = "mgmt-3"

            [mnode]
            admin_user = "ops"
            use_public_ip = true

            [[hosts]]
            id = 2
            name = "node-2"
            private_ip = "10.0.0.2"
            public_ip = "192.0.2.2"
        "#;

        let config: Config = toml::from_str(text).unwrap();
        assert_eq!(config.node.id, 3);
        assert_eq!(config.node.name, "mgmt-3");
        assert_eq!(config.node.data_dir, PathBuf::from("/var/lib/tsmeta"));
        assert_eq!(config.mnode.admin_user, "ops");
        assert!(config.mnode.use_public_ip);
        assert_eq!(config.mnode.max_mnodes, 5);
        assert_eq!(config.logging.level, "info");
        assert_eq!(config.hosts.len(), 1);
        assert_eq!(config.hosts[0].private_ip, Ipv4Addr::new(10, 0, 0, 2));
        assert_eq!(config.hosts[0].shell_port, 6030);
    }
}
