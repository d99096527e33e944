//! Graph store: which node publishes and subscribes to what.
//!
//! One [`GraphStore`] exists per process and is owned by the bridge event
//! loop; nothing here is synchronized.

use std::collections::BTreeMap;
use std::fmt;
use std::net::SocketAddr;

use mesh_core::TopicInfo;
use serde::{Deserialize, Serialize};

/// Address under which a peer's connection is registered ("host:port").
///
/// Comparison is exact string equality; `10.0.0.1:5000` and
/// `10.0.0.12:5000` are different nodes.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct NodeAddress(String);

impl NodeAddress {
    pub fn new(addr: impl Into<String>) -> Self {
        Self(addr.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for NodeAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<SocketAddr> for NodeAddress {
    fn from(addr: SocketAddr) -> Self {
        Self(addr.to_string())
    }
}

impl From<&str> for NodeAddress {
    fn from(addr: &str) -> Self {
        Self(addr.to_string())
    }
}

/// One node's topic registrations, as last reported by that node.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeInfo {
    /// Topic → type name for every local publisher.
    #[serde(default)]
    pub pubs: BTreeMap<String, String>,
    /// Topic → type name for every local subscriber.
    #[serde(default)]
    pub subs: BTreeMap<String, String>,
    /// Advisory node name; never used for routing.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
}

impl NodeInfo {
    /// Build a report from the local publisher and subscriber lists.
    pub fn from_topics(
        publishers: impl IntoIterator<Item = TopicInfo>,
        subscribers: impl IntoIterator<Item = TopicInfo>,
        name: Option<String>,
    ) -> Self {
        Self {
            pubs: publishers
                .into_iter()
                .map(|t| (t.topic, t.type_name))
                .collect(),
            subs: subscribers
                .into_iter()
                .map(|t| (t.topic, t.type_name))
                .collect(),
            name,
        }
    }

    pub fn publishes(&self, topic: &str) -> bool {
        self.pubs.contains_key(topic)
    }

    pub fn subscribes(&self, topic: &str) -> bool {
        self.subs.contains_key(topic)
    }
}

/// Full topology view: node address → node info.
pub type Graph = BTreeMap<NodeAddress, NodeInfo>;

/// The process's single copy of the [`Graph`].
#[derive(Debug, Default)]
pub struct GraphStore {
    graph: Graph,
}

impl GraphStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or wholly replace one node's entry.
    pub fn upsert(&mut self, addr: NodeAddress, info: NodeInfo) {
        self.graph.insert(addr, info);
    }

    pub fn remove(&mut self, addr: &NodeAddress) -> Option<NodeInfo> {
        self.graph.remove(addr)
    }

    /// Discard the current view and adopt `graph` as-is.
    pub fn replace(&mut self, graph: Graph) {
        self.graph = graph;
    }

    /// An owned copy, suitable for a GRAPH envelope.
    pub fn snapshot(&self) -> Graph {
        self.graph.clone()
    }

    pub fn get(&self, addr: &NodeAddress) -> Option<&NodeInfo> {
        self.graph.get(addr)
    }

    pub fn contains(&self, addr: &NodeAddress) -> bool {
        self.graph.contains_key(addr)
    }

    pub fn addresses(&self) -> impl Iterator<Item = &NodeAddress> {
        self.graph.keys()
    }

    pub fn len(&self) -> usize {
        self.graph.len()
    }

    pub fn is_empty(&self) -> bool {
        self.graph.is_empty()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
