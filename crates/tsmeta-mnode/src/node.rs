//! Management-node directory entries

use crate::hosts::HostRecord;
use serde::{Deserialize, Serialize};
use std::sync::{Arc, Weak};
use tsmeta_common::{NodeId, SyncRole};

/// Back-reference from a directory entry to the host it runs on.
///
/// Never replicated; resolved again whenever an entry is admitted locally.
#[derive(Clone, Debug, Default)]
pub enum HostLink {
    /// Not yet looked up in the host registry
    #[default]
    Unresolved,
    /// Points at a host owned by the registry
    Resolved(Weak<HostRecord>),
}

impl HostLink {
    /// Link to `host` without keeping it alive
    pub fn to(host: &Arc<HostRecord>) -> Self {
        Self::Resolved(Arc::downgrade(host))
    }

    /// Host record, if resolved and still registered
    pub fn upgrade(&self) -> Option<Arc<HostRecord>> {
        match self {
            Self::Unresolved => None,
            Self::Resolved(host) => host.upgrade(),
        }
    }

    /// Check if the link has been resolved
    pub const fn is_resolved(&self) -> bool {
        matches!(self, Self::Resolved(_))
    }
}

/// One management node.
///
/// Only `node_id`, `created_time` and `role` are part of the replicated image.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct NodeEntry {
    /// Node id, equal to the host id
    pub node_id: NodeId,
    /// Admission time in milliseconds since the Unix epoch
    pub created_time: i64,
    /// Synchronization role
    pub role: SyncRole,
    /// Host the node runs on
    #[serde(skip)]
    pub host: HostLink,
}

impl NodeEntry {
    /// Fresh entry for `node_id`, offline and unresolved
    pub fn new(node_id: NodeId, created_time: i64) -> Self {
        Self {
            node_id,
            created_time,
            role: SyncRole::Offline,
            host: HostLink::Unresolved,
        }
    }

    /// Entry image carrying only the key, for delete operations
    pub fn key_only(node_id: NodeId) -> Self {
        Self::new(node_id, 0)
    }
}
