//! In-memory collaborator fakes for atoll tests.
//!
//! Provides deterministic, network-free stand-ins for the coordination
//! service's collaborators:
//!
//! - [`InMemoryRingStore`]: CAS metadata store with failure injection
//! - [`RecordingDiscovery`]: records publishes, simulates peer observation
//! - [`InMemoryTransport`]: tracks connections with failure injection
//! - Recording listeners and tasks for asserting notification behaviour

pub mod discovery;
pub mod listeners;
pub mod ring_store;
pub mod tasks;
pub mod transport;

pub use discovery::RecordingDiscovery;
pub use listeners::{RecordingListener, RecordingMasterListener, RecordingTimeoutListener};
pub use ring_store::InMemoryRingStore;
pub use tasks::{RecordingAckedTask, RecordingTask};
pub use transport::InMemoryTransport;

use atoll_cluster::DiscoveryNode;
use std::collections::BTreeMap;
use std::time::Duration;
use tokio::time::sleep;

/// Build a node descriptor for tests.
pub fn test_node(id: &str, port: u16) -> DiscoveryNode {
    DiscoveryNode::new(
        id,
        format!("name-{}", id),
        format!("127.0.0.1:{}", port).parse().unwrap(),
        BTreeMap::new(),
        "0.1.0",
    )
}

/// Poll `condition` until it holds or `timeout` elapses.
pub async fn wait_until<F: Fn() -> bool>(condition: F, timeout: Duration) -> bool {
    let deadline = tokio::time::Instant::now() + timeout;
    loop {
        if condition() {
            return true;
        }
        if tokio::time::Instant::now() >= deadline {
            return false;
        }
        sleep(Duration::from_millis(5)).await;
    }
}
