//! Listener bands and timeout-aware registrations.
//!
//! Listeners are grouped into four ordered bands: priority, normal and last
//! (notified before the transport-disconnect phase, in that order) and
//! post-applied (notified after it). Bands are copy-on-write: notification
//! iterates a snapshot taken at the event boundary, so a concurrent remove
//! never skips an in-flight notification and a listener registered during
//! notification only observes subsequent events.

use crate::event::ClusterChangedEvent;
use parking_lot::{Mutex, RwLock};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Notify;

/// Observer of cluster-state transitions.
pub trait ClusterStateListener: Send + Sync {
    /// Called once per installed state, on the update worker.
    fn cluster_changed(&self, event: &ClusterChangedEvent);
}

/// A listener registered with a notification deadline.
///
/// Exactly one of `on_timeout` (deadline expired before removal) or
/// `on_close` (service shut down or rejected the registration) is delivered
/// per registration.
pub trait TimeoutClusterStateListener: ClusterStateListener {
    /// Called once on the update worker right after insertion.
    fn post_added(&self) {}

    /// Called when the service shuts down or rejects the registration.
    fn on_close(&self) {}

    /// Called when the deadline expired before the listener was removed.
    fn on_timeout(&self, timeout: Duration);
}

pub(crate) type ListenerHandle = Arc<dyn ClusterStateListener>;

/// Identity of a listener: the address of its data allocation.
pub(crate) fn handle_addr(listener: &ListenerHandle) -> usize {
    Arc::as_ptr(listener) as *const () as usize
}

/// Run one notification, isolating a panicking listener from the rest of the
/// band and from the update worker.
pub(crate) fn notify_isolated<F: FnOnce()>(context: &str, f: F) {
    if std::panic::catch_unwind(std::panic::AssertUnwindSafe(f)).is_err() {
        tracing::warn!(context, "listener notification panicked");
    }
}

/// Tracks one timeout-listener registration.
pub(crate) struct NotifyTimeout {
    listener: Arc<dyn TimeoutClusterStateListener>,
    listener_addr: usize,
    timeout: Duration,
    cancel: Notify,
    terminal: AtomicBool,
}

impl NotifyTimeout {
    pub(crate) fn new(
        listener: Arc<dyn TimeoutClusterStateListener>,
        listener_addr: usize,
        timeout: Duration,
    ) -> Self {
        Self {
            listener,
            listener_addr,
            timeout,
            cancel: Notify::new(),
            terminal: AtomicBool::new(false),
        }
    }

    pub(crate) fn listener_addr(&self) -> usize {
        self.listener_addr
    }

    pub(crate) fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Stop the armed timer; idempotent.
    pub(crate) fn cancel(&self) {
        self.cancel.notify_one();
    }

    /// Wait until the timer is cancelled.
    pub(crate) async fn cancelled(&self) {
        self.cancel.notified().await;
    }

    /// Deliver `on_timeout` unless a terminal callback already fired.
    pub(crate) fn deliver_timeout(&self) {
        if !self.terminal.swap(true, Ordering::AcqRel) {
            self.listener.on_timeout(self.timeout);
        }
    }

    /// Deliver `on_close` unless a terminal callback already fired.
    pub(crate) fn deliver_close(&self) {
        if !self.terminal.swap(true, Ordering::AcqRel) {
            self.listener.on_close();
        }
    }
}

/// The four listener bands plus outstanding timeout registrations.
#[derive(Default)]
pub(crate) struct ListenerRegistry {
    priority: RwLock<Vec<ListenerHandle>>,
    normal: RwLock<Vec<ListenerHandle>>,
    last: RwLock<Vec<ListenerHandle>>,
    post_applied: RwLock<Vec<ListenerHandle>>,
    ongoing_timeouts: Mutex<Vec<Arc<NotifyTimeout>>>,
}

impl ListenerRegistry {
    /// Add to the priority band (notified first).
    pub(crate) fn add_first(&self, listener: ListenerHandle) {
        self.priority.write().push(listener);
    }

    /// Add to the normal band.
    pub(crate) fn add(&self, listener: ListenerHandle) {
        self.normal.write().push(listener);
    }

    /// Add to the last band (pre-applied tail).
    pub(crate) fn add_last(&self, listener: ListenerHandle) {
        self.last.write().push(listener);
    }

    /// Add to the post-applied band.
    pub(crate) fn add_post_applied(&self, listener: ListenerHandle) {
        self.post_applied.write().push(listener);
    }

    /// Remove a listener from every band and cancel any timeout it owns.
    pub(crate) fn remove(&self, listener: &ListenerHandle) {
        self.remove_addr(handle_addr(listener));
    }

    /// Remove by listener identity.
    pub(crate) fn remove_addr(&self, addr: usize) {
        for band in [&self.priority, &self.normal, &self.last, &self.post_applied] {
            band.write().retain(|l| handle_addr(l) != addr);
        }
        let mut timeouts = self.ongoing_timeouts.lock();
        timeouts.retain(|t| {
            if t.listener_addr() == addr {
                t.cancel();
                false
            } else {
                true
            }
        });
    }

    /// Track a timeout registration until it is removed or shut down.
    pub(crate) fn register_timeout(&self, timeout: Arc<NotifyTimeout>) {
        self.ongoing_timeouts.lock().push(timeout);
    }

    /// Drain all outstanding timeout registrations (shutdown path).
    pub(crate) fn drain_timeouts(&self) -> Vec<Arc<NotifyTimeout>> {
        std::mem::take(&mut *self.ongoing_timeouts.lock())
    }

    /// Snapshot of the pre-applied bands in notification order.
    pub(crate) fn pre_applied(&self) -> Vec<ListenerHandle> {
        let mut listeners = Vec::new();
        listeners.extend(self.priority.read().iter().cloned());
        listeners.extend(self.normal.read().iter().cloned());
        listeners.extend(self.last.read().iter().cloned());
        listeners
    }

    /// Snapshot of the post-applied band.
    pub(crate) fn post_applied(&self) -> Vec<ListenerHandle> {
        self.post_applied.read().clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::ClusterState;

    struct NamedListener {
        name: &'static str,
        log: Arc<Mutex<Vec<&'static str>>>,
    }

    impl ClusterStateListener for NamedListener {
        fn cluster_changed(&self, _event: &ClusterChangedEvent) {
            self.log.lock().push(self.name);
        }
    }

    fn named(name: &'static str, log: &Arc<Mutex<Vec<&'static str>>>) -> ListenerHandle {
        Arc::new(NamedListener {
            name,
            log: log.clone(),
        })
    }

    fn test_event() -> ClusterChangedEvent {
        let prev = ClusterState::new("c");
        let next = ClusterState::builder(&prev).build();
        ClusterChangedEvent::new("test", next, prev)
    }

    #[test]
    fn test_band_order_and_insertion_order() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let registry = ListenerRegistry::default();

        registry.add(named("normal-1", &log));
        registry.add_last(named("last-1", &log));
        registry.add_first(named("first-1", &log));
        registry.add(named("normal-2", &log));
        registry.add_post_applied(named("post-1", &log));

        let event = test_event();
        for l in registry.pre_applied() {
            l.cluster_changed(&event);
        }
        for l in registry.post_applied() {
            l.cluster_changed(&event);
        }

        assert_eq!(
            *log.lock(),
            vec!["first-1", "normal-1", "normal-2", "last-1", "post-1"]
        );
    }

    #[test]
    fn test_remove_uses_identity() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let registry = ListenerRegistry::default();

        let keep = named("keep", &log);
        let drop = named("drop", &log);
        registry.add(keep.clone());
        registry.add(drop.clone());

        registry.remove(&drop);
        let event = test_event();
        for l in registry.pre_applied() {
            l.cluster_changed(&event);
        }
        assert_eq!(*log.lock(), vec!["keep"]);
    }

    #[test]
    fn test_notification_iterates_snapshot() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let registry = ListenerRegistry::default();
        registry.add(named("a", &log));

        // A snapshot taken before a later registration does not see it
        let snapshot = registry.pre_applied();
        registry.add(named("b", &log));
        let event = test_event();
        for l in snapshot {
            l.cluster_changed(&event);
        }
        assert_eq!(*log.lock(), vec!["a"]);
    }

    struct CountingTimeoutListener {
        timeouts: Mutex<Vec<Duration>>,
        closes: Mutex<u32>,
    }

    impl ClusterStateListener for CountingTimeoutListener {
        fn cluster_changed(&self, _event: &ClusterChangedEvent) {}
    }

    impl TimeoutClusterStateListener for CountingTimeoutListener {
        fn on_close(&self) {
            *self.closes.lock() += 1;
        }
        fn on_timeout(&self, timeout: Duration) {
            self.timeouts.lock().push(timeout);
        }
    }

    #[test]
    fn test_notify_timeout_terminal_once() {
        let listener = Arc::new(CountingTimeoutListener {
            timeouts: Mutex::new(Vec::new()),
            closes: Mutex::new(0),
        });
        let nt = NotifyTimeout::new(listener.clone(), 1, Duration::from_millis(5));

        nt.deliver_timeout();
        nt.deliver_timeout();
        nt.deliver_close();

        assert_eq!(listener.timeouts.lock().len(), 1);
        assert_eq!(*listener.closes.lock(), 0);
    }

    #[test]
    fn test_notify_timeout_close_then_timeout() {
        let listener = Arc::new(CountingTimeoutListener {
            timeouts: Mutex::new(Vec::new()),
            closes: Mutex::new(0),
        });
        let nt = NotifyTimeout::new(listener.clone(), 1, Duration::from_millis(5));

        nt.deliver_close();
        nt.deliver_timeout();

        assert!(listener.timeouts.lock().is_empty());
        assert_eq!(*listener.closes.lock(), 1);
    }
}
