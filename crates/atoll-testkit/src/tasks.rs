//! Recording update tasks.

use atoll_cluster::{
    AckedTask, ClusterError, ClusterState, ClusterStateUpdateTask, DiscoveryNode, ProcessedTask,
    Result,
};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

type ExecuteFn = Box<dyn Fn(&Arc<ClusterState>) -> Result<Arc<ClusterState>> + Send + Sync>;

/// Update task driven by a closure, recording every callback.
///
/// Implements the processed surface so tests can wait for completion.
pub struct RecordingTask {
    execute_fn: ExecuteFn,
    timeout: Option<Duration>,
    persist: bool,
    executions: AtomicUsize,
    failures: Mutex<Vec<ClusterError>>,
    processed: AtomicUsize,
}

impl RecordingTask {
    fn build<F>(execute_fn: F, timeout: Option<Duration>, persist: bool) -> Arc<Self>
    where
        F: Fn(&Arc<ClusterState>) -> Result<Arc<ClusterState>> + Send + Sync + 'static,
    {
        Arc::new(Self {
            execute_fn: Box::new(execute_fn),
            timeout,
            persist,
            executions: AtomicUsize::new(0),
            failures: Mutex::new(Vec::new()),
            processed: AtomicUsize::new(0),
        })
    }

    /// Create a task computing its successor state with `execute_fn`.
    pub fn new<F>(execute_fn: F) -> Arc<Self>
    where
        F: Fn(&Arc<ClusterState>) -> Result<Arc<ClusterState>> + Send + Sync + 'static,
    {
        Self::build(execute_fn, None, true)
    }

    /// Create a task with a per-task queue timeout.
    pub fn with_timeout<F>(timeout: Duration, execute_fn: F) -> Arc<Self>
    where
        F: Fn(&Arc<ClusterState>) -> Result<Arc<ClusterState>> + Send + Sync + 'static,
    {
        Self::build(execute_fn, Some(timeout), true)
    }

    /// Create a task that opts out of metadata persistence.
    pub fn without_persist<F>(execute_fn: F) -> Arc<Self>
    where
        F: Fn(&Arc<ClusterState>) -> Result<Arc<ClusterState>> + Send + Sync + 'static,
    {
        Self::build(execute_fn, None, false)
    }

    /// Number of `execute` calls.
    pub fn executions(&self) -> usize {
        self.executions.load(Ordering::SeqCst)
    }

    /// Recorded failures.
    pub fn failures(&self) -> Vec<ClusterError> {
        self.failures.lock().clone()
    }

    /// Number of `cluster_state_processed` calls.
    pub fn processed_count(&self) -> usize {
        self.processed.load(Ordering::SeqCst)
    }

    /// Whether the task reached a terminal callback.
    pub fn completed(&self) -> bool {
        self.processed_count() > 0 || !self.failures.lock().is_empty()
    }
}

impl ClusterStateUpdateTask for RecordingTask {
    fn execute(&self, previous: &Arc<ClusterState>) -> Result<Arc<ClusterState>> {
        self.executions.fetch_add(1, Ordering::SeqCst);
        (self.execute_fn)(previous)
    }

    fn on_failure(&self, _source: &str, err: &ClusterError) {
        self.failures.lock().push(err.clone());
    }

    fn do_persist_metadata(&self) -> bool {
        self.persist
    }

    fn timeout(&self) -> Option<Duration> {
        self.timeout
    }

    fn processed(&self) -> Option<&dyn ProcessedTask> {
        Some(self)
    }
}

impl ProcessedTask for RecordingTask {
    fn cluster_state_processed(
        &self,
        _source: &str,
        _previous: &Arc<ClusterState>,
        _state: &Arc<ClusterState>,
    ) {
        self.processed.fetch_add(1, Ordering::SeqCst);
    }
}

/// Acked update task driven by a closure, recording ack callbacks.
///
/// Requires an ack from every node.
pub struct RecordingAckedTask {
    execute_fn: ExecuteFn,
    must_apply_metadata: bool,
    ack_timeout: Duration,
    executions: AtomicUsize,
    failures: Mutex<Vec<ClusterError>>,
    acked: Mutex<Vec<Option<ClusterError>>>,
    ack_timeouts: AtomicUsize,
}

impl RecordingAckedTask {
    pub fn new<F>(must_apply_metadata: bool, ack_timeout: Duration, execute_fn: F) -> Arc<Self>
    where
        F: Fn(&Arc<ClusterState>) -> Result<Arc<ClusterState>> + Send + Sync + 'static,
    {
        Arc::new(Self {
            execute_fn: Box::new(execute_fn),
            must_apply_metadata,
            ack_timeout,
            executions: AtomicUsize::new(0),
            failures: Mutex::new(Vec::new()),
            acked: Mutex::new(Vec::new()),
            ack_timeouts: AtomicUsize::new(0),
        })
    }

    /// Number of `execute` calls.
    pub fn executions(&self) -> usize {
        self.executions.load(Ordering::SeqCst)
    }

    /// `on_all_nodes_acked` payloads, in call order.
    pub fn acked_calls(&self) -> Vec<Option<ClusterError>> {
        self.acked.lock().clone()
    }

    /// Number of `on_ack_timeout` calls.
    pub fn ack_timeout_count(&self) -> usize {
        self.ack_timeouts.load(Ordering::SeqCst)
    }

    /// Recorded failures.
    pub fn failures(&self) -> Vec<ClusterError> {
        self.failures.lock().clone()
    }
}

impl ClusterStateUpdateTask for RecordingAckedTask {
    fn execute(&self, previous: &Arc<ClusterState>) -> Result<Arc<ClusterState>> {
        self.executions.fetch_add(1, Ordering::SeqCst);
        (self.execute_fn)(previous)
    }

    fn on_failure(&self, _source: &str, err: &ClusterError) {
        self.failures.lock().push(err.clone());
    }

    fn acked(&self) -> Option<&dyn AckedTask> {
        Some(self)
    }
}

impl AckedTask for RecordingAckedTask {
    fn must_ack(&self, _node: &DiscoveryNode) -> bool {
        true
    }

    fn must_apply_metadata(&self) -> bool {
        self.must_apply_metadata
    }

    fn ack_timeout(&self) -> Duration {
        self.ack_timeout
    }

    fn on_all_nodes_acked(&self, err: Option<&ClusterError>) {
        self.acked.lock().push(err.cloned());
    }

    fn on_ack_timeout(&self) {
        self.ack_timeouts.fetch_add(1, Ordering::SeqCst);
    }
}
