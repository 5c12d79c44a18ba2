//! Collaborator interfaces consumed by the coordination core.
//!
//! The core never implements these: the ring store persists metadata with
//! optimistic concurrency, the discovery layer publishes states through
//! gossip and observes metadata versions on peers, and the transport keeps
//! point-to-point connections to cluster nodes.

use crate::metadata::MetaData;
use crate::node::DiscoveryNode;
use crate::state::ClusterState;
use crate::Result;
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;

/// Errors surfaced by the ring store.
#[derive(Debug, Clone, thiserror::Error)]
pub enum RingStoreError {
    /// The stored metadata no longer matches the expected previous value.
    #[error("concurrent metadata update: {0}")]
    ConcurrentMetadataUpdate(String),

    /// Storage-side configuration problem.
    #[error("configuration error: {0}")]
    Configuration(String),

    /// Underlying I/O failure.
    #[error("I/O error: {0}")]
    Io(String),

    /// The request was malformed.
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    /// The request failed during execution.
    #[error("request execution failed: {0}")]
    RequestExecution(String),

    /// The request failed validation.
    #[error("request validation failed: {0}")]
    RequestValidation(String),
}

/// Metadata persistence through the ring storage layer.
pub trait RingStore: Send + Sync {
    /// Best-effort initialisation of the admin keyspace backing metadata.
    fn create_admin_keyspace(&self) -> std::result::Result<(), RingStoreError>;

    /// Compare-and-swap persist: writes `next` iff the currently stored
    /// metadata matches `prev` (version and cluster UUID). A mismatch fails
    /// with [`RingStoreError::ConcurrentMetadataUpdate`].
    fn persist_metadata(
        &self,
        prev: &MetaData,
        next: &MetaData,
        source: &str,
    ) -> std::result::Result<(), RingStoreError>;
}

/// Gossip-side publication and acknowledgement observation.
#[async_trait]
pub trait Discovery: Send + Sync {
    /// Fire-and-forget publication of a newly installed state.
    fn publish(&self, state: &Arc<ClusterState>);

    /// Wait until gossip observes metadata `version` on all reachable
    /// peers, up to `timeout`. `Ok(false)` means the deadline expired.
    async fn await_metadata_version(&self, version: u64, timeout: Duration) -> Result<bool>;
}

/// Point-to-point connections to cluster nodes.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Install the local node descriptor built at service start.
    fn set_local_node(&self, node: &DiscoveryNode);

    /// Open a connection to a node.
    async fn connect_to_node(&self, node: &DiscoveryNode) -> Result<()>;

    /// Close the connection to a node.
    async fn disconnect_from_node(&self, node: &DiscoveryNode) -> Result<()>;

    /// Whether a connection to the node is currently open.
    fn node_connected(&self, node: &DiscoveryNode) -> bool;
}
