//! Failover address lists handed to clients and peers
//!
//! Addresses and ports are stored in network byte order so the lists can be
//! copied onto the wire as they are.
//!
//! Wire layout of an [`EndpointSet`]:
//! ```text
//! +--------+-------+------------------------+
//! | in_use | count | count x (ip 4B, port 2B) |
//! | 1B     | 1B    |                        |
//! +--------+-------+------------------------+
//! ```
//!
//! [`NodeInfos`] uses the same header followed by `count` records of
//! node id (4B), ip (4B), port (2B) and a NUL padded name (64B).

use crate::directory::NodeDirectory;
use bytes::{BufMut, Bytes, BytesMut};
use std::net::Ipv4Addr;
use tracing::{debug, warn};
use tsmeta_common::{Error, Result};

/// Fixed width of a node name on the wire, including the terminating NUL
pub const NODE_NAME_LEN: usize = 64;

/// One address/port pair in network byte order
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Endpoint {
    pub ip: [u8; 4],
    pub port: [u8; 2],
}

impl Endpoint {
    /// Convert from host order
    pub const fn new(ip: Ipv4Addr, port: u16) -> Self {
        Self {
            ip: ip.octets(),
            port: port.to_be_bytes(),
        }
    }

    /// Address in host order
    pub const fn addr(&self) -> Ipv4Addr {
        let [a, b, c, d] = self.ip;
        Ipv4Addr::new(a, b, c, d)
    }

    /// Port in host order
    pub const fn port(&self) -> u16 {
        u16::from_be_bytes(self.port)
    }
}

/// Ordered list of client-facing management addresses
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct EndpointSet {
    /// Index of the master's endpoint
    pub in_use: usize,
    pub endpoints: Vec<Endpoint>,
}

impl EndpointSet {
    /// Number of endpoints
    pub fn len(&self) -> usize {
        self.endpoints.len()
    }

    /// Check if the set is empty
    pub fn is_empty(&self) -> bool {
        self.endpoints.is_empty()
    }

    /// Serialize for transmission
    pub fn encode(&self) -> Result<Bytes> {
        let mut buf = BytesMut::with_capacity(2 + self.endpoints.len() * 6);
        put_header(&mut buf, self.in_use, self.endpoints.len())?;
        for endpoint in &self.endpoints {
            buf.put_slice(&endpoint.ip);
            buf.put_slice(&endpoint.port);
        }
        Ok(buf.freeze())
    }
}

/// Peer-facing description of one management node
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct NodeInfo {
    /// Node id in network byte order
    pub node_id: [u8; 4],
    /// Private address and peer port
    pub endpoint: Endpoint,
    /// Host display name
    pub name: String,
}

impl NodeInfo {
    /// Node id in host order
    pub const fn id(&self) -> i32 {
        i32::from_be_bytes(self.node_id)
    }
}

/// Ordered list of management nodes for peer synchronization
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct NodeInfos {
    /// Index of the master's record
    pub in_use: usize,
    pub nodes: Vec<NodeInfo>,
}

impl NodeInfos {
    /// Serialize for transmission. Names longer than the fixed width are cut.
    pub fn encode(&self) -> Result<Bytes> {
        let mut buf = BytesMut::with_capacity(2 + self.nodes.len() * (10 + NODE_NAME_LEN));
        put_header(&mut buf, self.in_use, self.nodes.len())?;
        for node in &self.nodes {
            buf.put_slice(&node.node_id);
            buf.put_slice(&node.endpoint.ip);
            buf.put_slice(&node.endpoint.port);

            let name = node.name.as_bytes();
            let len = name.len().min(NODE_NAME_LEN - 1);
            buf.put_slice(&name[..len]);
            buf.put_bytes(0, NODE_NAME_LEN - len);
        }
        Ok(buf.freeze())
    }
}

fn put_header(buf: &mut BytesMut, in_use: usize, count: usize) -> Result<()> {
    let count = u8::try_from(count)
        .map_err(|_| Error::invalid_argument(format!("{count} endpoints do not fit a list")))?;
    let in_use = u8::try_from(in_use)
        .map_err(|_| Error::invalid_argument(format!("in-use index {in_use} out of range")))?;
    buf.put_u8(in_use);
    buf.put_u8(count);
    Ok(())
}

impl NodeDirectory {
    /// Build the client failover list.
    ///
    /// Uses each host's public or private address with its management shell
    /// port, in directory iteration order. Entries whose host is gone are left
    /// out, so the set can be shorter than [`NodeDirectory::count`].
    pub fn build_failover_set(&self, use_public_address: bool) -> EndpointSet {
        let mut set = EndpointSet::default();
        for handle in self.iter() {
            let entry = handle.read();
            let Some(host) = entry.host.upgrade() else {
                warn!("Node {} has no host, left out of failover set", entry.node_id);
                continue;
            };

            if entry.role.is_master() {
                set.in_use = set.endpoints.len();
            }
            set.endpoints.push(Endpoint::new(
                host.address(use_public_address),
                host.shell_port,
            ));
        }
        debug!(
            "Failover set has {} endpoints, in use {}",
            set.len(),
            set.in_use
        );
        set
    }

    /// Build the client failover list, using public addresses when asked to
    /// or when the directory is configured with `use_public_ip`
    pub fn client_failover_set(&self, public: bool) -> EndpointSet {
        self.build_failover_set(public || self.config().use_public_ip)
    }

    /// Build the peer list with private addresses, peer ports and names
    pub fn build_named_list(&self) -> NodeInfos {
        let mut infos = NodeInfos::default();
        for handle in self.iter() {
            let entry = handle.read();
            let Some(host) = entry.host.upgrade() else {
                warn!("Node {} has no host, left out of node list", entry.node_id);
                continue;
            };

            if entry.role.is_master() {
                infos.in_use = infos.nodes.len();
                debug!("Node {} in use at {}", entry.node_id, infos.in_use);
            }
            infos.nodes.push(NodeInfo {
                node_id: entry.node_id.get().to_be_bytes(),
                endpoint: Endpoint::new(host.private_ip, host.peer_port),
                name: host.name.clone(),
            });
        }
        infos
    }
}
