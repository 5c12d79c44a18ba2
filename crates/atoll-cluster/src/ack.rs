//! Per-update acknowledgement countdown.
//!
//! When an acked task is applied, the discovery layer may deliver per-node
//! acknowledgements; the countdown fires the task's terminal callback when
//! the last required ack arrives or the ack deadline expires, whichever is
//! first. Simultaneous completion and expiry resolve to exactly one terminal
//! callback through the fast-forward flag.

use crate::node::{DiscoveryNode, DiscoveryNodes};
use crate::task::ClusterStateUpdateTask;
use crate::ClusterError;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use tokio::sync::Notify;
use tokio::time::sleep;
use tracing::{debug, trace};

/// Atomic countdown with single-winner semantics.
///
/// `count_down` and `fast_forward` race to zero; exactly one caller observes
/// the transition.
pub struct CountDown {
    count: AtomicU32,
}

impl CountDown {
    /// Create a countdown starting at `count`.
    pub fn new(count: u32) -> Self {
        Self {
            count: AtomicU32::new(count),
        }
    }

    /// Decrement by one; true iff this call reached zero.
    ///
    /// Calls after the countdown completed are no-ops.
    pub fn count_down(&self) -> bool {
        self.count
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |c| {
                if c == 0 {
                    None
                } else {
                    Some(c - 1)
                }
            })
            .map(|previous| previous == 1)
            .unwrap_or(false)
    }

    /// Force the countdown to zero; true iff it had not completed yet.
    pub fn fast_forward(&self) -> bool {
        self.count.swap(0, Ordering::AcqRel) > 0
    }

    /// Whether the countdown reached zero.
    pub fn is_counted_down(&self) -> bool {
        self.count.load(Ordering::Acquire) == 0
    }
}

/// Sink for per-node acknowledgements of one published state.
pub trait AckListener: Send + Sync {
    /// A node acknowledged (or failed to apply) the published state.
    fn on_node_ack(&self, node: &DiscoveryNode, err: Option<&ClusterError>);

    /// The ack deadline expired.
    fn on_timeout(&self);
}

/// Ack listener for publishes that await nothing.
pub struct NoopAckListener;

impl AckListener for NoopAckListener {
    fn on_node_ack(&self, _node: &DiscoveryNode, _err: Option<&ClusterError>) {}
    fn on_timeout(&self) {}
}

/// Counts required node acks for one acked task.
///
/// `remaining` counts the nodes the task selects via `must_ack`, clamped to
/// at least one: the master ack is always awaited even when not selected.
pub struct AckCountDownListener {
    task: Arc<dyn ClusterStateUpdateTask>,
    countdown: CountDown,
    nodes: DiscoveryNodes,
    state_version: u64,
    last_error: Mutex<Option<ClusterError>>,
    timeout_cancel: Arc<Notify>,
}

impl AckCountDownListener {
    /// Build a countdown for `task` against the node set of the published
    /// state. Returns `None` when the task has no ack surface.
    pub fn new(
        task: Arc<dyn ClusterStateUpdateTask>,
        state_version: u64,
        nodes: DiscoveryNodes,
    ) -> Option<Arc<Self>> {
        let acked = task.acked()?;
        let mut required = 0u32;
        for node in nodes.iter() {
            if acked.must_ack(node) {
                required += 1;
            }
        }
        // We always wait for at least one node (the master)
        let required = required.max(1);
        trace!(
            required,
            version = state_version,
            "expecting acknowledgements for cluster state update"
        );
        Some(Arc::new(Self {
            task,
            countdown: CountDown::new(required),
            nodes,
            state_version,
            last_error: Mutex::new(None),
            timeout_cancel: Arc::new(Notify::new()),
        }))
    }

    /// Arm the ack deadline; fires `on_timeout` unless completion cancels it
    /// first. Must run inside a tokio runtime.
    pub fn arm(self: &Arc<Self>) {
        let listener = self.clone();
        let cancel = self.timeout_cancel.clone();
        let Some(acked) = self.task.acked() else {
            return;
        };
        let timeout = acked.ack_timeout();
        tokio::spawn(async move {
            tokio::select! {
                _ = sleep(timeout) => listener.on_timeout(),
                _ = cancel.notified() => {}
            }
        });
    }

    /// Number of acks still outstanding is zero.
    pub fn is_complete(&self) -> bool {
        self.countdown.is_counted_down()
    }
}

impl AckListener for AckCountDownListener {
    fn on_node_ack(&self, node: &DiscoveryNode, err: Option<&ClusterError>) {
        let Some(acked) = self.task.acked() else {
            return;
        };
        if !acked.must_ack(node) {
            // We always wait for the master ack anyway
            let is_master = self
                .nodes
                .master_node()
                .map(|m| m.id == node.id)
                .unwrap_or(false);
            if !is_master {
                return;
            }
        }
        match err {
            None => trace!(
                node = %node,
                version = self.state_version,
                "ack received for cluster state update"
            ),
            Some(e) => {
                debug!(
                    node = %node,
                    version = self.state_version,
                    error = %e,
                    "failed ack received for cluster state update"
                );
                *self.last_error.lock() = Some(e.clone());
            }
        }

        if self.countdown.count_down() {
            trace!(
                version = self.state_version,
                "all expected nodes acknowledged cluster state update"
            );
            self.timeout_cancel.notify_one();
            let last_error = self.last_error.lock().clone();
            acked.on_all_nodes_acked(last_error.as_ref());
        }
    }

    fn on_timeout(&self) {
        if self.countdown.fast_forward() {
            trace!(
                version = self.state_version,
                "timeout waiting for acknowledgement of cluster state update"
            );
            if let Some(acked) = self.task.acked() {
                acked.on_ack_timeout();
            }
        }
    }
}
