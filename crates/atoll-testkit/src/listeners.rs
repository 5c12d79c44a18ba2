//! Recording listeners for notification-order assertions.

use atoll_cluster::{
    ClusterChangedEvent, ClusterStateListener, LocalNodeMasterListener, NotifyExecutor,
    TimeoutClusterStateListener,
};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// Listener that appends its name to a shared log on every event.
pub struct RecordingListener {
    name: String,
    log: Arc<Mutex<Vec<String>>>,
    events: AtomicUsize,
    versions: Mutex<Vec<u64>>,
}

impl RecordingListener {
    /// Create a listener writing to the shared `log`.
    pub fn new(name: impl Into<String>, log: &Arc<Mutex<Vec<String>>>) -> Arc<Self> {
        Arc::new(Self {
            name: name.into(),
            log: log.clone(),
            events: AtomicUsize::new(0),
            versions: Mutex::new(Vec::new()),
        })
    }

    /// Create a shared notification-order log.
    pub fn shared_log() -> Arc<Mutex<Vec<String>>> {
        Arc::new(Mutex::new(Vec::new()))
    }

    /// Number of events observed.
    pub fn event_count(&self) -> usize {
        self.events.load(Ordering::SeqCst)
    }

    /// Versions of observed states, in notification order.
    pub fn observed_versions(&self) -> Vec<u64> {
        self.versions.lock().clone()
    }
}

impl ClusterStateListener for RecordingListener {
    fn cluster_changed(&self, event: &ClusterChangedEvent) {
        self.events.fetch_add(1, Ordering::SeqCst);
        self.versions.lock().push(event.state().version());
        self.log.lock().push(self.name.clone());
    }
}

/// Timeout-aware listener recording every callback it receives.
#[derive(Default)]
pub struct RecordingTimeoutListener {
    name: Option<String>,
    log: Option<Arc<Mutex<Vec<String>>>>,
    events: AtomicUsize,
    timeouts: Mutex<Vec<Duration>>,
    closes: AtomicUsize,
    post_added: AtomicUsize,
}

impl RecordingTimeoutListener {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Create a listener that also appends `name` to the shared log on
    /// every event, for notification-order assertions across bands.
    pub fn with_log(name: impl Into<String>, log: &Arc<Mutex<Vec<String>>>) -> Arc<Self> {
        Arc::new(Self {
            name: Some(name.into()),
            log: Some(log.clone()),
            ..Self::default()
        })
    }

    /// Number of cluster-change events observed.
    pub fn event_count(&self) -> usize {
        self.events.load(Ordering::SeqCst)
    }

    /// Timeouts delivered via `on_timeout`.
    pub fn timeouts(&self) -> Vec<Duration> {
        self.timeouts.lock().clone()
    }

    /// Number of `on_close` deliveries.
    pub fn close_count(&self) -> usize {
        self.closes.load(Ordering::SeqCst)
    }

    /// Number of `post_added` deliveries.
    pub fn post_added_count(&self) -> usize {
        self.post_added.load(Ordering::SeqCst)
    }
}

impl ClusterStateListener for RecordingTimeoutListener {
    fn cluster_changed(&self, _event: &ClusterChangedEvent) {
        self.events.fetch_add(1, Ordering::SeqCst);
        if let (Some(name), Some(log)) = (&self.name, &self.log) {
            log.lock().push(name.clone());
        }
    }
}

impl TimeoutClusterStateListener for RecordingTimeoutListener {
    fn post_added(&self) {
        self.post_added.fetch_add(1, Ordering::SeqCst);
    }

    fn on_close(&self) {
        self.closes.fetch_add(1, Ordering::SeqCst);
    }

    fn on_timeout(&self, timeout: Duration) {
        self.timeouts.lock().push(timeout);
    }
}

/// Master-role listener recording transitions; runs inline on the update
/// worker so tests observe transitions deterministically.
#[derive(Default)]
pub struct RecordingMasterListener {
    on_master: AtomicUsize,
    off_master: AtomicUsize,
}

impl RecordingMasterListener {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Number of `on_master` notifications.
    pub fn on_master_count(&self) -> usize {
        self.on_master.load(Ordering::SeqCst)
    }

    /// Number of `off_master` notifications.
    pub fn off_master_count(&self) -> usize {
        self.off_master.load(Ordering::SeqCst)
    }
}

impl LocalNodeMasterListener for RecordingMasterListener {
    fn on_master(&self) {
        self.on_master.fetch_add(1, Ordering::SeqCst);
    }

    fn off_master(&self) {
        self.off_master.fetch_add(1, Ordering::SeqCst);
    }

    fn executor_name(&self) -> NotifyExecutor {
        NotifyExecutor::Same
    }
}
