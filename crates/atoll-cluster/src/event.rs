//! Cluster-change events delivered to listeners.

use crate::node::NodesDelta;
use crate::state::ClusterState;
use std::sync::Arc;

/// A single cluster-state transition as seen by listeners.
///
/// The event captures both snapshots and the node delta computed at the
/// event boundary, so every listener of one event observes the same delta.
pub struct ClusterChangedEvent {
    source: String,
    previous_state: Arc<ClusterState>,
    state: Arc<ClusterState>,
    nodes_delta: NodesDelta,
}

impl ClusterChangedEvent {
    /// Create an event for the transition `previous_state -> state`.
    pub fn new(
        source: impl Into<String>,
        state: Arc<ClusterState>,
        previous_state: Arc<ClusterState>,
    ) -> Self {
        let nodes_delta = state.nodes().delta(previous_state.nodes());
        Self {
            source: source.into(),
            previous_state,
            state,
            nodes_delta,
        }
    }

    /// The submitting task's source description.
    pub fn source(&self) -> &str {
        &self.source
    }

    /// The newly installed state.
    pub fn state(&self) -> &Arc<ClusterState> {
        &self.state
    }

    /// The state that was replaced.
    pub fn previous_state(&self) -> &Arc<ClusterState> {
        &self.previous_state
    }

    /// Nodes that joined or left in this transition.
    pub fn nodes_delta(&self) -> &NodesDelta {
        &self.nodes_delta
    }

    /// Whether metadata content changed in this transition.
    pub fn metadata_changed(&self) -> bool {
        self.state.metadata() != self.previous_state.metadata()
    }

    /// Whether the block set changed in this transition.
    pub fn blocks_changed(&self) -> bool {
        self.state.blocks() != self.previous_state.blocks()
    }

    /// Whether the routing table changed in this transition.
    pub fn routing_table_changed(&self) -> bool {
        self.state.routing_table() != self.previous_state.routing_table()
    }

    /// Whether the local node is master in the new state.
    pub fn local_node_master(&self) -> bool {
        self.state.nodes().local_node_master()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metadata::IndexMetaData;
    use crate::node::{DiscoveryNode, DiscoveryNodes};
    use std::collections::BTreeMap;

    fn test_node(id: &str, port: u16) -> DiscoveryNode {
        DiscoveryNode::new(
            id,
            id,
            format!("127.0.0.1:{}", port).parse().unwrap(),
            BTreeMap::new(),
            "0.1.0",
        )
    }

    #[test]
    fn test_metadata_changed() {
        let prev = ClusterState::new("c");
        let next = ClusterState::builder(&prev)
            .metadata(
                prev.metadata()
                    .builder_from()
                    .put_index(IndexMetaData::new("logs"))
                    .build(),
            )
            .build();

        let event = ClusterChangedEvent::new("test", next, prev.clone());
        assert!(event.metadata_changed());
        assert!(!event.blocks_changed());
        assert!(!event.nodes_delta().has_changes());
    }

    #[test]
    fn test_nodes_delta_and_master_flag() {
        let prev = ClusterState::new("c");
        let nodes = DiscoveryNodes::builder()
            .put(test_node("a", 9301))
            .local_node_id("a")
            .master_node_id("a")
            .build();
        let next = ClusterState::builder(&prev).nodes(nodes).build();

        let event = ClusterChangedEvent::new("join", next, prev);
        assert!(event.nodes_delta().has_changes());
        assert_eq!(event.nodes_delta().added.len(), 1);
        assert!(event.local_node_master());
        assert!(!event.metadata_changed());
    }
}
