//! Discovery nodes and node-set deltas.
//!
//! A [`DiscoveryNodes`] value is an ordered set of peers with a designated
//! local node and an optional master node. Deltas between two sets drive the
//! transport connect/disconnect phases of the apply pipeline.

use rand::distributions::Alphanumeric;
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::net::SocketAddr;

/// Length of generated node and state identifiers.
const ID_LEN: usize = 22;

/// Generate a fresh random identifier.
///
/// Node ids are intentionally not reused across restarts so peer fault
/// detectors treat a restarted process as a new node.
pub(crate) fn random_id() -> String {
    rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(ID_LEN)
        .map(|b| (b as char).to_ascii_lowercase())
        .collect()
}

/// Generate a fresh node id for this process start.
pub fn generate_node_id() -> String {
    random_id()
}

/// A node participating in the cluster.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiscoveryNode {
    /// Unique node id (fresh per process start).
    pub id: String,

    /// Human-readable node name.
    pub name: String,

    /// Publish address for point-to-point transport.
    pub address: SocketAddr,

    /// Free-form node attributes.
    pub attributes: BTreeMap<String, String>,

    /// Software version tag advertised by the node.
    pub version_tag: String,
}

impl DiscoveryNode {
    /// Create a new node descriptor.
    pub fn new(
        id: impl Into<String>,
        name: impl Into<String>,
        address: SocketAddr,
        attributes: BTreeMap<String, String>,
        version_tag: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            address,
            attributes,
            version_tag: version_tag.into(),
        }
    }

    /// Local connection policy: connect to every peer but never to self.
    pub fn should_connect_to(&self, other: &DiscoveryNode) -> bool {
        self.id != other.id
    }
}

impl fmt::Display for DiscoveryNode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{{{}}}{{{}}}{{{}}}", self.name, self.id, self.address)
    }
}

/// Ordered set of cluster nodes with local/master designation.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiscoveryNodes {
    nodes: BTreeMap<String, DiscoveryNode>,
    local_node_id: Option<String>,
    master_node_id: Option<String>,
}

impl DiscoveryNodes {
    /// Start building a node set.
    pub fn builder() -> DiscoveryNodesBuilder {
        DiscoveryNodesBuilder::default()
    }

    /// Seed a builder from this set.
    pub fn builder_from(&self) -> DiscoveryNodesBuilder {
        DiscoveryNodesBuilder {
            nodes: self.nodes.clone(),
            local_node_id: self.local_node_id.clone(),
            master_node_id: self.master_node_id.clone(),
        }
    }

    /// Look up a node by id.
    pub fn get(&self, id: &str) -> Option<&DiscoveryNode> {
        self.nodes.get(id)
    }

    /// Whether a node with the given id is present.
    pub fn node_exists(&self, id: &str) -> bool {
        self.nodes.contains_key(id)
    }

    /// The designated local node, if installed.
    pub fn local_node(&self) -> Option<&DiscoveryNode> {
        self.local_node_id.as_deref().and_then(|id| self.nodes.get(id))
    }

    /// The master node, if one is designated.
    pub fn master_node(&self) -> Option<&DiscoveryNode> {
        self.master_node_id.as_deref().and_then(|id| self.nodes.get(id))
    }

    /// True when the local node is the designated master.
    pub fn local_node_master(&self) -> bool {
        match (&self.local_node_id, &self.master_node_id) {
            (Some(local), Some(master)) => local == master,
            _ => false,
        }
    }

    /// Number of nodes in the set.
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    /// Whether the set is empty.
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Iterate nodes in id order.
    pub fn iter(&self) -> impl Iterator<Item = &DiscoveryNode> {
        self.nodes.values()
    }

    /// Compute the delta from `previous` to this set.
    pub fn delta(&self, previous: &DiscoveryNodes) -> NodesDelta {
        let added = self
            .nodes
            .values()
            .filter(|n| !previous.node_exists(&n.id))
            .cloned()
            .collect();
        let removed = previous
            .nodes
            .values()
            .filter(|n| !self.node_exists(&n.id))
            .cloned()
            .collect();
        NodesDelta { added, removed }
    }
}

/// Builder for [`DiscoveryNodes`].
#[derive(Debug, Clone, Default)]
pub struct DiscoveryNodesBuilder {
    nodes: BTreeMap<String, DiscoveryNode>,
    local_node_id: Option<String>,
    master_node_id: Option<String>,
}

impl DiscoveryNodesBuilder {
    /// Insert or replace a node.
    pub fn put(mut self, node: DiscoveryNode) -> Self {
        self.nodes.insert(node.id.clone(), node);
        self
    }

    /// Remove a node by id.
    pub fn remove(mut self, id: &str) -> Self {
        self.nodes.remove(id);
        self
    }

    /// Designate the local node.
    pub fn local_node_id(mut self, id: impl Into<String>) -> Self {
        self.local_node_id = Some(id.into());
        self
    }

    /// Designate the master node.
    pub fn master_node_id(mut self, id: impl Into<String>) -> Self {
        self.master_node_id = Some(id.into());
        self
    }

    /// Clear the master designation.
    pub fn clear_master(mut self) -> Self {
        self.master_node_id = None;
        self
    }

    /// Build the node set.
    pub fn build(self) -> DiscoveryNodes {
        DiscoveryNodes {
            nodes: self.nodes,
            local_node_id: self.local_node_id,
            master_node_id: self.master_node_id,
        }
    }
}

/// Difference between two node sets.
#[derive(Debug, Clone, Default)]
pub struct NodesDelta {
    /// Nodes present in the new set but not the previous one.
    pub added: Vec<DiscoveryNode>,

    /// Nodes present in the previous set but not the new one.
    pub removed: Vec<DiscoveryNode>,
}

impl NodesDelta {
    /// Whether any node joined or left.
    pub fn has_changes(&self) -> bool {
        !self.added.is_empty() || !self.removed.is_empty()
    }

    /// Human-readable one-line summary, empty when nothing changed.
    pub fn short_summary(&self) -> String {
        let mut parts = Vec::new();
        if !self.added.is_empty() {
            let names: Vec<String> = self.added.iter().map(|n| n.to_string()).collect();
            parts.push(format!("added {}", names.join(", ")));
        }
        if !self.removed.is_empty() {
            let names: Vec<String> = self.removed.iter().map(|n| n.to_string()).collect();
            parts.push(format!("removed {}", names.join(", ")));
        }
        parts.join(", ")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_node(id: &str, port: u16) -> DiscoveryNode {
        DiscoveryNode::new(
            id,
            format!("name-{}", id),
            format!("127.0.0.1:{}", port).parse().unwrap(),
            BTreeMap::new(),
            "0.1.0",
        )
    }

    #[test]
    fn test_generated_ids_are_fresh() {
        let a = generate_node_id();
        let b = generate_node_id();
        assert_eq!(a.len(), ID_LEN);
        assert_ne!(a, b);
        assert!(a.chars().all(|c| c.is_ascii_lowercase() || c.is_ascii_digit()));
    }

    #[test]
    fn test_local_and_master_designation() {
        let nodes = DiscoveryNodes::builder()
            .put(test_node("a", 9301))
            .put(test_node("b", 9302))
            .local_node_id("a")
            .master_node_id("a")
            .build();

        assert_eq!(nodes.len(), 2);
        assert_eq!(nodes.local_node().unwrap().id, "a");
        assert_eq!(nodes.master_node().unwrap().id, "a");
        assert!(nodes.local_node_master());

        let nodes = nodes.builder_from().master_node_id("b").build();
        assert!(!nodes.local_node_master());
    }

    #[test]
    fn test_delta_added_and_removed() {
        let prev = DiscoveryNodes::builder()
            .put(test_node("a", 9301))
            .put(test_node("b", 9302))
            .build();
        let next = prev
            .builder_from()
            .remove("b")
            .put(test_node("c", 9303))
            .build();

        let delta = next.delta(&prev);
        assert!(delta.has_changes());
        assert_eq!(delta.added.len(), 1);
        assert_eq!(delta.added[0].id, "c");
        assert_eq!(delta.removed.len(), 1);
        assert_eq!(delta.removed[0].id, "b");

        let summary = delta.short_summary();
        assert!(summary.contains("added"));
        assert!(summary.contains("removed"));
    }

    #[test]
    fn test_delta_no_changes() {
        let nodes = DiscoveryNodes::builder().put(test_node("a", 9301)).build();
        let delta = nodes.delta(&nodes);
        assert!(!delta.has_changes());
        assert!(delta.short_summary().is_empty());
    }

    #[test]
    fn test_should_connect_to_skips_self() {
        let a = test_node("a", 9301);
        let b = test_node("b", 9302);
        assert!(a.should_connect_to(&b));
        assert!(!a.should_connect_to(&a));
    }

    #[test]
    fn test_iteration_is_id_ordered() {
        let nodes = DiscoveryNodes::builder()
            .put(test_node("c", 9303))
            .put(test_node("a", 9301))
            .put(test_node("b", 9302))
            .build();
        let ids: Vec<&str> = nodes.iter().map(|n| n.id.as_str()).collect();
        assert_eq!(ids, vec!["a", "b", "c"]);
    }
}
