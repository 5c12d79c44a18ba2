#![allow(dead_code)]

//! Shared harness wiring a service to in-memory collaborators.

use atoll_cluster::{ClusterService, ClusterState, IndexMetaData, Settings, NO_RING_BLOCK};
use atoll_testkit::{test_node, InMemoryRingStore, InMemoryTransport, RecordingDiscovery, RecordingTask};
use std::sync::Arc;
use std::time::Duration;

pub struct Harness {
    pub service: ClusterService,
    pub ring_store: Arc<InMemoryRingStore>,
    pub discovery: Arc<RecordingDiscovery>,
    pub transport: Arc<InMemoryTransport>,
}

pub fn default_settings() -> Settings {
    Settings::new()
        .with_cluster_name("test-cluster")
        .with_node_name("local")
        .with_reconnect_interval(Duration::from_millis(50))
}

/// Build an unstarted service against fresh fakes.
pub fn build(settings: Settings) -> Harness {
    let _ = tracing_subscriber::fmt()
        .with_test_writer()
        .with_max_level(tracing::Level::DEBUG)
        .try_init();
    let ring_store = Arc::new(InMemoryRingStore::new());
    let discovery = Arc::new(RecordingDiscovery::new());
    let transport = Arc::new(InMemoryTransport::new());
    let service = ClusterService::builder(
        settings,
        ring_store.clone(),
        discovery.clone(),
        transport.clone(),
    )
    .build();
    Harness {
        service,
        ring_store,
        discovery,
        transport,
    }
}

/// Start a service with the ring-readiness block lifted, so metadata
/// persistence is enabled.
pub async fn started_with(settings: Settings) -> Harness {
    let harness = build(settings);
    harness
        .service
        .remove_initial_block(NO_RING_BLOCK.id)
        .unwrap();
    harness.service.start().await.unwrap();
    harness
}

pub async fn started() -> Harness {
    started_with(default_settings()).await
}

/// Start a service that still carries the ring-readiness block.
pub async fn started_keeping_ring_block() -> Harness {
    let harness = build(default_settings());
    harness.service.start().await.unwrap();
    harness
}

/// Task adding an empty index to metadata.
pub fn add_index_task(name: &'static str) -> Arc<RecordingTask> {
    RecordingTask::new(move |prev| {
        Ok(ClusterState::builder(prev)
            .metadata(
                prev.metadata()
                    .builder_from()
                    .put_index(IndexMetaData::new(name))
                    .build(),
            )
            .build())
    })
}

/// Task adding a peer node to the membership.
pub fn add_peer_task(id: &'static str, port: u16) -> Arc<RecordingTask> {
    RecordingTask::new(move |prev| {
        Ok(ClusterState::builder(prev)
            .nodes(prev.nodes().builder_from().put(test_node(id, port)).build())
            .build())
    })
}

/// Task removing a peer node from the membership.
pub fn remove_peer_task(id: &'static str) -> Arc<RecordingTask> {
    RecordingTask::new(move |prev| {
        Ok(ClusterState::builder(prev)
            .nodes(prev.nodes().builder_from().remove(id).build())
            .build())
    })
}
