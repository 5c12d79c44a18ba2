//! In-memory transport fake tracking connections.

use async_trait::async_trait;
use atoll_cluster::{ClusterError, DiscoveryNode, Result, Transport};
use parking_lot::Mutex;
use std::collections::HashSet;

/// Transport fake: tracks open connections and connect/disconnect attempts
/// without any network I/O. Individual nodes can be made to always fail
/// connection attempts.
#[derive(Default)]
pub struct InMemoryTransport {
    connected: Mutex<HashSet<String>>,
    connect_attempts: Mutex<Vec<String>>,
    disconnects: Mutex<Vec<String>>,
    failing: Mutex<HashSet<String>>,
    local: Mutex<Option<DiscoveryNode>>,
}

impl InMemoryTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make connection attempts to the given node always fail.
    pub fn fail_connects_to(&self, node_id: &str) {
        self.failing.lock().insert(node_id.to_string());
    }

    /// Let connection attempts to the given node succeed again.
    pub fn allow_connects_to(&self, node_id: &str) {
        self.failing.lock().remove(node_id);
    }

    /// Ids of currently connected nodes.
    pub fn connected_nodes(&self) -> Vec<String> {
        let mut nodes: Vec<String> = self.connected.lock().iter().cloned().collect();
        nodes.sort();
        nodes
    }

    /// Connection attempts against one node.
    pub fn connect_attempts_to(&self, node_id: &str) -> usize {
        self.connect_attempts
            .lock()
            .iter()
            .filter(|id| id.as_str() == node_id)
            .count()
    }

    /// All connection attempts, in order.
    pub fn connect_attempts(&self) -> Vec<String> {
        self.connect_attempts.lock().clone()
    }

    /// All disconnects, in order.
    pub fn disconnects(&self) -> Vec<String> {
        self.disconnects.lock().clone()
    }

    /// The local node handed over at service start.
    pub fn local_node(&self) -> Option<DiscoveryNode> {
        self.local.lock().clone()
    }
}

#[async_trait]
impl Transport for InMemoryTransport {
    fn set_local_node(&self, node: &DiscoveryNode) {
        *self.local.lock() = Some(node.clone());
    }

    async fn connect_to_node(&self, node: &DiscoveryNode) -> Result<()> {
        self.connect_attempts.lock().push(node.id.clone());
        if self.failing.lock().contains(&node.id) {
            return Err(ClusterError::Transport(format!(
                "connection refused: {}",
                node.id
            )));
        }
        self.connected.lock().insert(node.id.clone());
        Ok(())
    }

    async fn disconnect_from_node(&self, node: &DiscoveryNode) -> Result<()> {
        self.disconnects.lock().push(node.id.clone());
        self.connected.lock().remove(&node.id);
        Ok(())
    }

    fn node_connected(&self, node: &DiscoveryNode) -> bool {
        self.connected.lock().contains(&node.id)
    }
}
