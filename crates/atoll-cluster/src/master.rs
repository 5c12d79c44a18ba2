//! Master-role watcher.
//!
//! A singleton listener installed at service start. It tracks whether the
//! local node currently holds the master role and dispatches `on_master` /
//! `off_master` transitions to registered role listeners, each on the
//! executor the listener names.

use crate::event::ClusterChangedEvent;
use crate::listener::{notify_isolated, ClusterStateListener};
use parking_lot::RwLock;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Where a role notification runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NotifyExecutor {
    /// Inline on the update worker.
    Same,

    /// On a spawned worker task.
    Generic,
}

/// Observer of local master-role transitions.
pub trait LocalNodeMasterListener: Send + Sync + 'static {
    /// The local node gained the master role.
    fn on_master(&self);

    /// The local node lost the master role.
    fn off_master(&self);

    /// Executor the notifications run on.
    fn executor_name(&self) -> NotifyExecutor {
        NotifyExecutor::Generic
    }
}

/// Tracks the local master role and fans transitions out to role listeners.
#[derive(Default)]
pub(crate) struct MasterRoleListeners {
    listeners: RwLock<Vec<Arc<dyn LocalNodeMasterListener>>>,
    master: AtomicBool,
}

impl MasterRoleListeners {
    pub(crate) fn add(&self, listener: Arc<dyn LocalNodeMasterListener>) {
        self.listeners.write().push(listener);
    }

    pub(crate) fn remove(&self, listener: &Arc<dyn LocalNodeMasterListener>) {
        let addr = Arc::as_ptr(listener) as *const () as usize;
        self.listeners
            .write()
            .retain(|l| Arc::as_ptr(l) as *const () as usize != addr);
    }

    /// Whether the local node currently holds the master role.
    pub(crate) fn is_master(&self) -> bool {
        self.master.load(Ordering::Acquire)
    }

    fn dispatch<F>(&self, notify: F)
    where
        F: Fn(&Arc<dyn LocalNodeMasterListener>) + Send + Sync + Copy + 'static,
    {
        for listener in self.listeners.read().iter() {
            match listener.executor_name() {
                NotifyExecutor::Same => {
                    let listener = listener.clone();
                    notify_isolated("master role listener", || notify(&listener));
                }
                NotifyExecutor::Generic => {
                    let listener = listener.clone();
                    tokio::spawn(async move { notify(&listener) });
                }
            }
        }
    }
}

impl ClusterStateListener for MasterRoleListeners {
    fn cluster_changed(&self, event: &ClusterChangedEvent) {
        let is_master = event.local_node_master();
        if is_master && !self.master.load(Ordering::Acquire) {
            self.master.store(true, Ordering::Release);
            self.dispatch(|l| l.on_master());
        } else if !is_master && self.master.load(Ordering::Acquire) {
            self.master.store(false, Ordering::Release);
            self.dispatch(|l| l.off_master());
        }
    }
}
