//! Cluster-state coordination for a search node co-located with a
//! ring-structured storage layer.
//!
//! A node keeps a single immutable, versioned snapshot of cluster state
//! (nodes, routing, blocks, metadata) and serialises every mutation through
//! a priority-ordered update channel:
//!
//! - Each update task runs against the latest snapshot on a dedicated worker
//! - Metadata changes are persisted through the ring store with optimistic
//!   concurrency (CAS against the previously persisted metadata)
//! - New snapshots are published via gossip and acknowledged per node
//! - Listeners fire in ordered bands before and after the apply phase
//! - A periodic reconnect loop keeps transport connections alive
//!
//! # Modules
//!
//! - [`state`]: Immutable cluster-state snapshot and builder
//! - [`node`]: Discovery nodes and node-set deltas
//! - [`metadata`]: Cluster metadata and its persisted rendering
//! - [`block`]: Cluster-wide blocks gating operations
//! - [`task`]: Update task traits and priorities
//! - [`listener`]: Listener bands and timeout-aware registrations
//! - [`ack`]: Per-update acknowledgement countdown
//! - [`executor`]: Priority task queue feeding the update worker
//! - [`adapter`]: Collaborator interfaces (ring store, discovery, transport)
//! - [`service`]: The coordination service itself

pub mod ack;
pub mod adapter;
pub mod block;
pub mod event;
pub mod executor;
pub mod listener;
pub mod master;
pub mod metadata;
pub mod node;
pub(crate) mod reconnect;
pub mod routing;
pub mod service;
pub mod settings;
pub mod state;
pub mod task;

pub use ack::{AckCountDownListener, AckListener, CountDown, NoopAckListener};
pub use adapter::{Discovery, RingStore, RingStoreError, Transport};
pub use block::{ClusterBlock, ClusterBlocks, NO_RING_BLOCK};
pub use event::ClusterChangedEvent;
pub use executor::PendingClusterTask;
pub use listener::{ClusterStateListener, TimeoutClusterStateListener};
pub use master::{LocalNodeMasterListener, NotifyExecutor};
pub use metadata::{IndexMetaData, MetaData};
pub use node::{DiscoveryNode, DiscoveryNodes, NodesDelta};
pub use routing::RoutingTable;
pub use service::{
    assert_cluster_state_thread, ClusterService, ClusterServiceBuilder, Lifecycle,
};
pub use settings::{ConfigError, Settings};
pub use state::{ClusterState, ClusterStateStatus};
pub use task::{AckedTask, ClusterStateUpdateTask, Priority, ProcessedTask};

use std::time::Duration;

/// Errors surfaced by the coordination service.
#[derive(Debug, Clone, thiserror::Error)]
pub enum ClusterError {
    /// A queued task timed out before it began executing.
    #[error("task [{source_name}] timed out after {timeout:?} while queued")]
    ProcessTimeout {
        source_name: String,
        timeout: Duration,
    },

    /// Ring store failure (CAS conflict or persistence error).
    #[error("ring store error: {0}")]
    RingStore(#[from] adapter::RingStoreError),

    /// Point-to-point transport failure.
    #[error("transport error: {0}")]
    Transport(String),

    /// Gossip/discovery failure.
    #[error("discovery error: {0}")]
    Discovery(String),

    /// Serialisation of a state value failed.
    #[error("serialization error: {0}")]
    Serialization(String),

    /// An ack wait was interrupted before its deadline.
    #[error("interrupted: {0}")]
    Interrupted(String),

    /// Operation attempted in an incompatible lifecycle state.
    #[error("illegal state: {0}")]
    IllegalState(String),

    /// Task execution failed with a caller-supplied reason.
    #[error("task failed: {0}")]
    TaskFailed(String),
}

/// Result alias used throughout the crate.
pub type Result<T> = std::result::Result<T, ClusterError>;
