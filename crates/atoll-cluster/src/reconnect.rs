//! Periodic reconciliation of transport connections against membership.
//!
//! Each tick walks a snapshot of the membership and re-opens missing
//! connections to peers the local node should be connected to. Repeated
//! failures against the same node are throttled to one warning per six
//! consecutive failures; counters are dropped once the node leaves the
//! snapshot.

use crate::adapter::Transport;
use crate::state::ClusterState;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::warn;

/// Failures per sixth-failure warning.
const FAILURES_PER_WARNING: u32 = 6;

/// Per-node consecutive-failure counter owned by the reconnect task.
#[derive(Default)]
pub(crate) struct FailureCounter {
    counts: HashMap<String, u32>,
}

impl FailureCounter {
    /// Record one failure; true when this is the sixth consecutive failure
    /// and a warning should be logged. The counter resets after logging.
    pub(crate) fn record_failure(&mut self, node_id: &str) -> bool {
        let count = self.counts.entry(node_id.to_string()).or_insert(0);
        *count += 1;
        if *count % FAILURES_PER_WARNING == 0 {
            *count = 0;
            true
        } else {
            false
        }
    }

    /// Drop counters for nodes no longer present in the snapshot.
    pub(crate) fn purge_departed(&mut self, state: &ClusterState) {
        self.counts.retain(|id, _| state.nodes().node_exists(id));
    }

    #[cfg(test)]
    fn contains(&self, node_id: &str) -> bool {
        self.counts.contains_key(node_id)
    }
}

/// One reconnect tick.
///
/// Iterates a snapshot taken at tick start; the per-node existence checks
/// re-read `current` because connecting takes time and a concurrent update
/// may remove the node mid-tick.
pub(crate) async fn reconnect_tick(
    current: &RwLock<Arc<ClusterState>>,
    transport: &Arc<dyn Transport>,
    failures: &mut FailureCounter,
) {
    let state = current.read().clone();
    let Some(local) = state.nodes().local_node().cloned() else {
        return;
    };
    for node in state.nodes().iter() {
        if !local.should_connect_to(node) {
            continue;
        }
        if transport.node_connected(node) {
            continue;
        }
        if !current.read().nodes().node_exists(&node.id) {
            continue;
        }
        if let Err(err) = transport.connect_to_node(node).await {
            // Double check against the live state, maybe the node is gone
            if current.read().nodes().node_exists(&node.id) && failures.record_failure(&node.id) {
                warn!(node = %node, error = %err, "failed to reconnect to node");
            }
        }
    }
    let latest = current.read().clone();
    failures.purge_departed(&latest);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::node::{DiscoveryNode, DiscoveryNodes};
    use crate::{ClusterError, Result};
    use async_trait::async_trait;
    use parking_lot::Mutex;
    use std::collections::{BTreeMap, HashSet};

    fn test_node(id: &str, port: u16) -> DiscoveryNode {
        DiscoveryNode::new(
            id,
            id,
            format!("127.0.0.1:{}", port).parse().unwrap(),
            BTreeMap::new(),
            "0.1.0",
        )
    }

    #[derive(Default)]
    struct FakeTransport {
        connected: Mutex<HashSet<String>>,
        attempts: Mutex<Vec<String>>,
        failing: Mutex<HashSet<String>>,
    }

    impl FakeTransport {
        fn attempts_to(&self, node_id: &str) -> usize {
            self.attempts
                .lock()
                .iter()
                .filter(|id| id.as_str() == node_id)
                .count()
        }
    }

    #[async_trait]
    impl Transport for FakeTransport {
        fn set_local_node(&self, _node: &DiscoveryNode) {}

        async fn connect_to_node(&self, node: &DiscoveryNode) -> Result<()> {
            self.attempts.lock().push(node.id.clone());
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
            self.connected.lock().remove(&node.id);
            Ok(())
        }

        fn node_connected(&self, node: &DiscoveryNode) -> bool {
            self.connected.lock().contains(&node.id)
        }
    }

    fn state_with_nodes(ids: &[&str]) -> Arc<ClusterState> {
        let mut builder = DiscoveryNodes::builder().local_node_id("local");
        builder = builder.put(test_node("local", 9301));
        for (i, id) in ids.iter().enumerate() {
            builder = builder.put(test_node(id, 9302 + i as u16));
        }
        ClusterState::builder(&ClusterState::new("c"))
            .nodes(builder.build())
            .build()
    }

    #[test]
    fn test_warning_every_sixth_failure() {
        let mut failures = FailureCounter::default();
        for i in 1..=12 {
            let warned = failures.record_failure("p");
            assert_eq!(warned, i % 6 == 0, "failure #{}", i);
        }
    }

    #[test]
    fn test_counters_are_per_node() {
        let mut failures = FailureCounter::default();
        for _ in 0..5 {
            assert!(!failures.record_failure("a"));
        }
        // A different node's failures never advance a's counter
        for _ in 0..5 {
            assert!(!failures.record_failure("b"));
        }
        assert!(failures.record_failure("a"));
    }

    #[test]
    fn test_purge_departed_nodes() {
        let mut failures = FailureCounter::default();
        failures.record_failure("gone");
        failures.record_failure("stays");

        let state = state_with_nodes(&["stays"]);
        failures.purge_departed(&state);

        assert!(!failures.contains("gone"));
        assert!(failures.contains("stays"));
    }

    #[tokio::test]
    async fn test_tick_connects_missing_peers() {
        let current = RwLock::new(state_with_nodes(&["peer"]));
        let transport = Arc::new(FakeTransport::default());
        let handle: Arc<dyn Transport> = transport.clone();
        let mut failures = FailureCounter::default();

        reconnect_tick(&current, &handle, &mut failures).await;
        assert_eq!(transport.attempts_to("peer"), 1);
        assert!(transport.connected.lock().contains("peer"));

        // Already connected: the next tick does not reconnect
        reconnect_tick(&current, &handle, &mut failures).await;
        assert_eq!(transport.attempts_to("peer"), 1);
    }

    #[tokio::test]
    async fn test_tick_counts_failures_and_purges_on_departure() {
        let current = RwLock::new(state_with_nodes(&["peer"]));
        let transport = Arc::new(FakeTransport::default());
        transport.failing.lock().insert("peer".to_string());
        let handle: Arc<dyn Transport> = transport.clone();
        let mut failures = FailureCounter::default();

        reconnect_tick(&current, &handle, &mut failures).await;
        assert_eq!(transport.attempts_to("peer"), 1);
        assert!(failures.contains("peer"));

        // The peer leaves between ticks: no further attempts, counter gone
        *current.write() = state_with_nodes(&[]);
        reconnect_tick(&current, &handle, &mut failures).await;
        assert_eq!(transport.attempts_to("peer"), 1);
        assert!(!failures.contains("peer"));
    }
}
