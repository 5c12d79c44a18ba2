//! Recording gossip/discovery fake.

use async_trait::async_trait;
use atoll_cluster::{ClusterState, Discovery, Result};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;

/// Discovery fake: records every published state and simulates gossip
/// observation of metadata versions.
///
/// By default every publish immediately marks its metadata version as
/// observed on all peers, so ack waits complete at once. Disable auto-ack to
/// exercise ack timeouts, then drive observation explicitly with
/// [`RecordingDiscovery::observe_metadata_version`].
pub struct RecordingDiscovery {
    published: Mutex<Vec<Arc<ClusterState>>>,
    observed: watch::Sender<u64>,
    auto_ack: AtomicBool,
}

impl Default for RecordingDiscovery {
    fn default() -> Self {
        let (observed, _) = watch::channel(0);
        Self {
            published: Mutex::new(Vec::new()),
            observed,
            auto_ack: AtomicBool::new(true),
        }
    }
}

impl RecordingDiscovery {
    pub fn new() -> Self {
        Self::default()
    }

    /// Control whether publishes auto-observe their metadata version.
    pub fn set_auto_ack(&self, auto_ack: bool) {
        self.auto_ack.store(auto_ack, Ordering::SeqCst);
    }

    /// Simulate all peers observing the given metadata version.
    pub fn observe_metadata_version(&self, version: u64) {
        self.observed.send_replace(version);
    }

    /// All published states, in publish order.
    pub fn published(&self) -> Vec<Arc<ClusterState>> {
        self.published.lock().clone()
    }

    /// Number of publishes.
    pub fn publish_count(&self) -> usize {
        self.published.lock().len()
    }

    /// Versions of published states, in publish order.
    pub fn published_versions(&self) -> Vec<u64> {
        self.published.lock().iter().map(|s| s.version()).collect()
    }
}

#[async_trait]
impl Discovery for RecordingDiscovery {
    fn publish(&self, state: &Arc<ClusterState>) {
        self.published.lock().push(state.clone());
        if self.auto_ack.load(Ordering::SeqCst) {
            self.observed.send_replace(state.metadata().version());
        }
    }

    async fn await_metadata_version(&self, version: u64, timeout: Duration) -> Result<bool> {
        let mut rx = self.observed.subscribe();
        let observed = async {
            loop {
                if *rx.borrow() >= version {
                    return true;
                }
                if rx.changed().await.is_err() {
                    return false;
                }
            }
        };
        match tokio::time::timeout(timeout, observed).await {
            Ok(reached) => Ok(reached),
            Err(_) => Ok(false),
        }
    }
}
