//! Immutable cluster-state snapshot and builder.
//!
//! A `ClusterState` is built once, shared as `Arc<ClusterState>`, and never
//! mutated; the apply pipeline replaces the whole snapshot. The only
//! interior-mutable cell is the application status, which the update worker
//! advances while applying a state it already owns.

use crate::block::ClusterBlocks;
use crate::metadata::MetaData;
use crate::node::{random_id, DiscoveryNodes};
use crate::routing::RoutingTable;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;

/// Application status of a snapshot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ClusterStateStatus {
    /// Built or received, not yet applied.
    Received = 0,

    /// The update worker is applying this state.
    BeingApplied = 1,

    /// Fully applied; all bands notified.
    Applied = 2,
}

/// An immutable cluster-state snapshot.
#[derive(Debug)]
pub struct ClusterState {
    version: u64,
    state_uuid: String,
    cluster_name: String,
    nodes: DiscoveryNodes,
    routing_table: RoutingTable,
    blocks: ClusterBlocks,
    metadata: MetaData,
    status: AtomicU8,
}

impl ClusterState {
    /// Create the initial empty state for a cluster.
    pub fn new(cluster_name: impl Into<String>) -> Arc<Self> {
        Arc::new(Self {
            version: 0,
            state_uuid: random_id(),
            cluster_name: cluster_name.into(),
            nodes: DiscoveryNodes::default(),
            routing_table: RoutingTable::default(),
            blocks: ClusterBlocks::default(),
            metadata: MetaData::default(),
            status: AtomicU8::new(ClusterStateStatus::Received as u8),
        })
    }

    /// Start building a successor of `previous`.
    ///
    /// The successor starts with all of the previous state's content and the
    /// same version; a fresh `state_uuid` is assigned at build.
    pub fn builder(previous: &ClusterState) -> ClusterStateBuilder {
        ClusterStateBuilder {
            version: previous.version,
            cluster_name: previous.cluster_name.clone(),
            nodes: previous.nodes.clone(),
            routing_table: previous.routing_table.clone(),
            blocks: previous.blocks.clone(),
            metadata: previous.metadata.clone(),
        }
    }

    /// Snapshot version; non-decreasing across installations.
    pub fn version(&self) -> u64 {
        self.version
    }

    /// Identifies this concrete snapshot instance.
    pub fn state_uuid(&self) -> &str {
        &self.state_uuid
    }

    /// Name of the cluster this state belongs to.
    pub fn cluster_name(&self) -> &str {
        &self.cluster_name
    }

    /// Cluster membership.
    pub fn nodes(&self) -> &DiscoveryNodes {
        &self.nodes
    }

    /// Routing table.
    pub fn routing_table(&self) -> &RoutingTable {
        &self.routing_table
    }

    /// Global blocks.
    pub fn blocks(&self) -> &ClusterBlocks {
        &self.blocks
    }

    /// Cluster metadata.
    pub fn metadata(&self) -> &MetaData {
        &self.metadata
    }

    /// Current application status.
    pub fn status(&self) -> ClusterStateStatus {
        match self.status.load(Ordering::Acquire) {
            0 => ClusterStateStatus::Received,
            1 => ClusterStateStatus::BeingApplied,
            _ => ClusterStateStatus::Applied,
        }
    }

    /// Advance the application status; only the update worker calls this.
    pub fn set_status(&self, status: ClusterStateStatus) {
        self.status.store(status as u8, Ordering::Release);
    }
}

/// Builder for successor snapshots.
#[derive(Debug, Clone)]
pub struct ClusterStateBuilder {
    version: u64,
    cluster_name: String,
    nodes: DiscoveryNodes,
    routing_table: RoutingTable,
    blocks: ClusterBlocks,
    metadata: MetaData,
}

impl ClusterStateBuilder {
    /// Replace the node set.
    pub fn nodes(mut self, nodes: DiscoveryNodes) -> Self {
        self.nodes = nodes;
        self
    }

    /// Replace the routing table.
    pub fn routing_table(mut self, routing_table: RoutingTable) -> Self {
        self.routing_table = routing_table;
        self
    }

    /// Replace the block set.
    pub fn blocks(mut self, blocks: ClusterBlocks) -> Self {
        self.blocks = blocks;
        self
    }

    /// Replace the metadata.
    pub fn metadata(mut self, metadata: MetaData) -> Self {
        self.metadata = metadata;
        self
    }

    /// Bump the snapshot version by one.
    pub fn increment_version(mut self) -> Self {
        self.version += 1;
        self
    }

    /// Build the snapshot with a fresh `state_uuid`.
    pub fn build(self) -> Arc<ClusterState> {
        Arc::new(ClusterState {
            version: self.version,
            state_uuid: random_id(),
            cluster_name: self.cluster_name,
            nodes: self.nodes,
            routing_table: self.routing_table,
            blocks: self.blocks,
            metadata: self.metadata,
            status: AtomicU8::new(ClusterStateStatus::Received as u8),
        })
    }
}
