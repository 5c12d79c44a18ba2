//! The cluster-state coordination service.
//!
//! All state mutations flow through a single update worker consuming a
//! priority queue. Per task the worker: executes the mutation against the
//! latest snapshot, persists changed metadata through the ring store (CAS),
//! installs and publishes the new snapshot, waits for acknowledgements,
//! notifies the listener bands in order, and reconciles transport
//! connections against the node delta.

use crate::adapter::{Discovery, RingStore, RingStoreError, Transport};
use crate::block::{ClusterBlock, ClusterBlocks, ClusterBlocksBuilder, NO_RING_BLOCK};
use crate::event::ClusterChangedEvent;
use crate::executor::{PendingClusterTask, QueuedEntry, TaskPayload, TaskQueue};
use crate::listener::{
    handle_addr, notify_isolated, ClusterStateListener, ListenerHandle, ListenerRegistry,
    NotifyTimeout, TimeoutClusterStateListener,
};
use crate::master::{LocalNodeMasterListener, MasterRoleListeners};
use crate::node::{generate_node_id, DiscoveryNode};
use crate::reconnect::{reconnect_tick, FailureCounter};
use crate::settings::{Settings, SETTING_SLOW_TASK_LOGGING_THRESHOLD};
use crate::state::{ClusterState, ClusterStateStatus};
use crate::task::{ClusterStateUpdateTask, Priority};
use crate::{ClusterError, Result};
use parking_lot::{Mutex, RwLock};
use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use std::sync::{Arc, Weak};
use std::time::{Duration, Instant};
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tokio::time::sleep;
use tracing::{debug, info, trace, warn};

/// Grace period for the update worker to finish its current task on stop.
const EXECUTOR_SHUTDOWN_GRACE: Duration = Duration::from_secs(10);

/// Source description of internal listener-registration entries.
const ADD_LISTENER_SOURCE: &str = "_add_listener_";

/// Service lifecycle states.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum Lifecycle {
    Initialized = 0,
    Started = 1,
    Stopped = 2,
    Closed = 3,
}

struct LifecycleCell(AtomicU8);

impl LifecycleCell {
    fn new() -> Self {
        Self(AtomicU8::new(Lifecycle::Initialized as u8))
    }

    fn load(&self) -> Lifecycle {
        match self.0.load(Ordering::Acquire) {
            0 => Lifecycle::Initialized,
            1 => Lifecycle::Started,
            2 => Lifecycle::Stopped,
            _ => Lifecycle::Closed,
        }
    }

    fn started(&self) -> bool {
        self.load() == Lifecycle::Started
    }

    fn stopped_or_closed(&self) -> bool {
        matches!(self.load(), Lifecycle::Stopped | Lifecycle::Closed)
    }

    fn transition(&self, from: Lifecycle, to: Lifecycle) -> bool {
        self.0
            .compare_exchange(from as u8, to as u8, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }
}

tokio::task_local! {
    static UPDATE_WORKER: ();
}

pub(crate) fn is_update_worker() -> bool {
    UPDATE_WORKER.try_with(|_| ()).is_ok()
}

/// Diagnostic predicate: the caller runs on the update worker.
///
/// Panics in debug builds when called from anywhere else; intended for
/// `debug_assert!(assert_cluster_state_thread())` call sites.
pub fn assert_cluster_state_thread() -> bool {
    debug_assert!(
        is_update_worker(),
        "not called from the cluster state update worker"
    );
    true
}

/// The cluster-state coordination service.
pub struct ClusterService {
    inner: Arc<ServiceInner>,
}

pub(crate) struct ServiceInner {
    settings: Settings,
    slow_task_threshold: RwLock<Duration>,
    lifecycle: LifecycleCell,
    ring_store: Arc<dyn RingStore>,
    discovery: Arc<dyn Discovery>,
    transport: Arc<dyn Transport>,
    registry: ListenerRegistry,
    master_listeners: Arc<MasterRoleListeners>,
    master_handle: ListenerHandle,
    queue: TaskQueue,
    current_state: RwLock<Arc<ClusterState>>,
    initial_blocks: Mutex<ClusterBlocksBuilder>,
    secondary_index_listener: Mutex<Option<ListenerHandle>>,
    reconnect_shutdown: Notify,
    worker: Mutex<Option<JoinHandle<()>>>,
    reconnect_task: Mutex<Option<JoinHandle<()>>>,
}

/// Builder wiring the service to its collaborators.
pub struct ClusterServiceBuilder {
    settings: Settings,
    ring_store: Arc<dyn RingStore>,
    discovery: Arc<dyn Discovery>,
    transport: Arc<dyn Transport>,
    secondary_index_listener: Option<ListenerHandle>,
}

impl ClusterServiceBuilder {
    /// Hook notified in the last pre-applied band, registered at start.
    pub fn secondary_index_listener(mut self, listener: Arc<dyn ClusterStateListener>) -> Self {
        self.secondary_index_listener = Some(listener);
        self
    }

    /// Build the service; the initial state carries [`NO_RING_BLOCK`].
    pub fn build(self) -> ClusterService {
        let master_listeners = Arc::new(MasterRoleListeners::default());
        let master_handle: ListenerHandle = master_listeners.clone();
        let mut initial_blocks = ClusterBlocksBuilder::default();
        // Gate metadata persistence until the storage ring is ready
        initial_blocks.add_global_block(NO_RING_BLOCK);
        let slow_task_threshold = self.settings.slow_task_logging_threshold();
        let current_state = ClusterState::new(self.settings.cluster_name.clone());
        ClusterService {
            inner: Arc::new(ServiceInner {
                settings: self.settings,
                slow_task_threshold: RwLock::new(slow_task_threshold),
                lifecycle: LifecycleCell::new(),
                ring_store: self.ring_store,
                discovery: self.discovery,
                transport: self.transport,
                registry: ListenerRegistry::default(),
                master_listeners,
                master_handle,
                queue: TaskQueue::new(),
                current_state: RwLock::new(current_state),
                initial_blocks: Mutex::new(initial_blocks),
                secondary_index_listener: Mutex::new(self.secondary_index_listener),
                reconnect_shutdown: Notify::new(),
                worker: Mutex::new(None),
                reconnect_task: Mutex::new(None),
            }),
        }
    }
}

impl ClusterService {
    /// Start building a service.
    pub fn builder(
        settings: Settings,
        ring_store: Arc<dyn RingStore>,
        discovery: Arc<dyn Discovery>,
        transport: Arc<dyn Transport>,
    ) -> ClusterServiceBuilder {
        ClusterServiceBuilder {
            settings,
            ring_store,
            discovery,
            transport,
            secondary_index_listener: None,
        }
    }

    /// Current lifecycle state.
    pub fn lifecycle(&self) -> Lifecycle {
        self.inner.lifecycle.load()
    }

    /// The current snapshot.
    pub fn state(&self) -> Arc<ClusterState> {
        self.inner.current_state.read().clone()
    }

    /// The local node descriptor, once the service started.
    pub fn local_node(&self) -> Option<DiscoveryNode> {
        self.state().nodes().local_node().cloned()
    }

    /// The settings the service was built with.
    pub fn settings(&self) -> &Settings {
        &self.inner.settings
    }

    /// The slow-task warning threshold currently in effect.
    pub fn slow_task_logging_threshold(&self) -> Duration {
        *self.inner.slow_task_threshold.read()
    }

    /// Rebind refreshable settings; takes effect for the next task.
    pub fn apply_settings(&self, settings: &Settings) {
        if let Some(threshold) = settings.get_as_duration(SETTING_SLOW_TASK_LOGGING_THRESHOLD) {
            debug!(
                key = SETTING_SLOW_TASK_LOGGING_THRESHOLD,
                ?threshold,
                "rebinding slow task logging threshold"
            );
            *self.inner.slow_task_threshold.write() = threshold;
        }
    }

    /// Add a block installed into the initial state; rejected once started.
    pub fn add_initial_block(&self, block: ClusterBlock) -> Result<()> {
        if self.inner.lifecycle.started() {
            return Err(ClusterError::IllegalState(
                "cannot change initial blocks when started".to_string(),
            ));
        }
        self.inner.initial_blocks.lock().add_global_block(block);
        Ok(())
    }

    /// Remove a block from the initial state; rejected once started.
    pub fn remove_initial_block(&self, id: u32) -> Result<()> {
        if self.inner.lifecycle.started() {
            return Err(ClusterError::IllegalState(
                "cannot change initial blocks when started".to_string(),
            ));
        }
        self.inner.initial_blocks.lock().remove_global_block(id);
        Ok(())
    }

    /// Register a listener in the priority band (notified first).
    pub fn add_first(&self, listener: Arc<dyn ClusterStateListener>) {
        self.inner.registry.add_first(listener);
    }

    /// Register a listener in the normal band.
    pub fn add(&self, listener: Arc<dyn ClusterStateListener>) {
        self.inner.registry.add(listener);
    }

    /// Register a listener in the last pre-applied band.
    pub fn add_last(&self, listener: Arc<dyn ClusterStateListener>) {
        self.inner.registry.add_last(listener);
    }

    /// Remove a listener from every band and cancel any timeout it owns.
    pub fn remove(&self, listener: &Arc<dyn ClusterStateListener>) {
        self.inner.registry.remove(listener);
    }

    /// Register a master-role listener.
    pub fn add_master_listener(&self, listener: Arc<dyn LocalNodeMasterListener>) {
        self.inner.master_listeners.add(listener);
    }

    /// Remove a master-role listener.
    pub fn remove_master_listener(&self, listener: &Arc<dyn LocalNodeMasterListener>) {
        self.inner.master_listeners.remove(listener);
    }

    /// Register a timeout-aware listener into the post-applied band.
    ///
    /// The insertion happens on the update worker at HIGH priority;
    /// `post_added` fires there. With a timeout, `on_timeout` fires once the
    /// deadline expires unless the listener was removed; on shutdown or
    /// rejection the listener receives `on_close` instead.
    pub fn add_timeout_listener<L>(&self, timeout: Option<Duration>, listener: Arc<L>)
    where
        L: TimeoutClusterStateListener + 'static,
    {
        if self.inner.lifecycle.stopped_or_closed() {
            listener.on_close();
            return;
        }
        let inner = self.inner.clone();
        let band: ListenerHandle = listener.clone();
        let timeout_listener: Arc<dyn TimeoutClusterStateListener> = listener;
        let run = Box::new(move || {
            if inner.lifecycle.stopped_or_closed() {
                timeout_listener.on_close();
                return;
            }
            let addr = handle_addr(&band);
            if let Some(timeout) = timeout {
                let nt = Arc::new(NotifyTimeout::new(timeout_listener.clone(), addr, timeout));
                inner.registry.register_timeout(nt.clone());
                arm_notify_timeout(&inner, nt);
            }
            inner.registry.add_post_applied(band.clone());
            timeout_listener.post_added();
        });
        self.inner.queue.push(
            Priority::High,
            ADD_LISTENER_SOURCE.to_string(),
            TaskPayload::Internal { run },
            None,
        );
    }

    /// Submit an update task at NORMAL priority.
    pub fn submit_task(&self, source: impl Into<String>, task: Arc<dyn ClusterStateUpdateTask>) {
        self.submit_task_with_priority(source, Priority::Normal, task);
    }

    /// Submit an update task.
    ///
    /// Submissions before start or after stop are silently dropped.
    pub fn submit_task_with_priority(
        &self,
        source: impl Into<String>,
        priority: Priority,
        task: Arc<dyn ClusterStateUpdateTask>,
    ) {
        submit_update_task(&self.inner, source.into(), priority, task);
    }

    /// Pending entries: the executing one first, then queue order.
    pub fn pending_tasks(&self) -> Vec<PendingClusterTask> {
        self.inner.queue.pending()
    }

    /// Number of queued (not yet executing) entries.
    pub fn number_of_pending_tasks(&self) -> usize {
        self.inner.queue.len()
    }

    /// Age of the longest-queued entry.
    pub fn max_task_wait_time(&self) -> Duration {
        self.inner.queue.max_wait_time()
    }

    /// Start the service.
    ///
    /// Initialises the admin keyspace (best effort), installs the initial
    /// blocks and the master-role watcher, spawns the update worker and the
    /// reconnect loop, and installs a freshly identified local node.
    pub async fn start(&self) -> Result<()> {
        let inner = &self.inner;
        if !inner
            .lifecycle
            .transition(Lifecycle::Initialized, Lifecycle::Started)
        {
            return Err(ClusterError::IllegalState(format!(
                "cannot start cluster service from {:?}",
                inner.lifecycle.load()
            )));
        }

        if let Err(err) = inner.ring_store.create_admin_keyspace() {
            warn!(error = %err, "cannot create admin keyspace");
        }

        inner.registry.add(inner.master_handle.clone());

        let blocks = inner.initial_blocks.lock().build();
        {
            let mut current = inner.current_state.write();
            let previous = current.clone();
            *current = ClusterState::builder(&previous).blocks(blocks.clone()).build();
        }

        let worker_inner = self.inner.clone();
        *inner.worker.lock() = Some(tokio::spawn(run_worker(worker_inner)));

        let reconnect_inner = self.inner.clone();
        *inner.reconnect_task.lock() = Some(tokio::spawn(run_reconnect_loop(reconnect_inner)));

        // A new node id each start so peer fault detectors treat restarts
        // as new nodes
        let node_id = generate_node_id();
        let local = DiscoveryNode::new(
            node_id.clone(),
            inner.settings.node.name.clone(),
            inner.settings.node.publish_address,
            inner.settings.node.attributes.clone(),
            env!("CARGO_PKG_VERSION"),
        );
        {
            let mut current = inner.current_state.write();
            let previous = current.clone();
            let nodes = previous
                .nodes()
                .builder_from()
                .put(local.clone())
                .local_node_id(node_id)
                .build();
            *current = ClusterState::builder(&previous)
                .nodes(nodes)
                .blocks(blocks)
                .build();
        }
        inner.transport.set_local_node(&local);

        if let Some(listener) = inner.secondary_index_listener.lock().take() {
            inner.registry.add_last(listener);
        }

        info!(node = %local, cluster = %inner.settings.cluster_name, "cluster service started");
        Ok(())
    }

    /// Stop the service.
    ///
    /// Cancels the reconnect loop, delivers `on_close` to every outstanding
    /// timeout listener, and shuts the update worker down with a bounded
    /// grace period.
    pub async fn stop(&self) {
        let inner = &self.inner;
        if !inner.lifecycle.transition(Lifecycle::Started, Lifecycle::Stopped) {
            return;
        }

        inner.reconnect_shutdown.notify_one();
        if let Some(handle) = inner.reconnect_task.lock().take() {
            handle.abort();
        }

        for nt in inner.registry.drain_timeouts() {
            nt.cancel();
            nt.deliver_close();
        }

        inner.queue.work.notify_one();
        let handle = inner.worker.lock().take();
        if let Some(mut handle) = handle {
            if tokio::time::timeout(EXECUTOR_SHUTDOWN_GRACE, &mut handle)
                .await
                .is_err()
            {
                warn!("update worker did not stop within the grace period, aborting");
                handle.abort();
            }
        }

        // Drain leftovers: pending listener registrations deliver on_close,
        // pending update tasks are swallowed
        while let Some(entry) = inner.queue.pop() {
            if let TaskPayload::Internal { run } = entry.payload {
                run();
            }
        }
        inner.queue.clear_executing();

        inner.registry.remove(&inner.master_handle);
        info!("cluster service stopped");
    }

    /// Mark the service closed; only valid after `stop`.
    pub fn close(&self) {
        let _ = self
            .inner
            .lifecycle
            .transition(Lifecycle::Stopped, Lifecycle::Closed);
    }

    /// The blocks carried by the current snapshot.
    pub fn blocks(&self) -> ClusterBlocks {
        self.state().blocks().clone()
    }
}

/// Submit a user task, arming its per-task timeout when present.
fn submit_update_task(
    inner: &Arc<ServiceInner>,
    source: String,
    priority: Priority,
    task: Arc<dyn ClusterStateUpdateTask>,
) {
    if !inner.lifecycle.started() {
        debug!("submitting [{}]: ignored, cluster service not started", source);
        return;
    }
    let timeout = task.timeout();
    let cancel = timeout.map(|_| Arc::new(Notify::new()));
    let insertion_order = inner.queue.push(
        priority,
        source,
        TaskPayload::User { task },
        cancel.clone(),
    );
    if let (Some(timeout), Some(cancel)) = (timeout, cancel) {
        let inner = inner.clone();
        tokio::spawn(async move {
            tokio::select! {
                _ = sleep(timeout) => {
                    if let Some(entry) = inner.queue.remove_if_not_started(insertion_order) {
                        let QueuedEntry { source, payload, .. } = entry;
                        if let TaskPayload::User { task } = payload {
                            // Fail on a generic worker, off the timer task
                            tokio::spawn(async move {
                                let err = ClusterError::ProcessTimeout {
                                    source_name: source.clone(),
                                    timeout,
                                };
                                task.on_failure(&source, &err);
                            });
                        }
                    }
                }
                _ = cancel.notified() => {}
            }
        });
    }
}

/// Arm the deadline of a timeout-listener registration.
fn arm_notify_timeout(inner: &Arc<ServiceInner>, nt: Arc<NotifyTimeout>) {
    let inner = inner.clone();
    let timer = nt.clone();
    let timeout = nt.timeout();
    tokio::spawn(async move {
        let cancelled = nt.cancelled();
        tokio::select! {
            _ = sleep(timeout) => {
                if inner.lifecycle.stopped_or_closed() {
                    timer.deliver_close();
                } else {
                    timer.deliver_timeout();
                }
            }
            _ = cancelled => {}
        }
    });
}

/// The single update worker.
async fn run_worker(inner: Arc<ServiceInner>) {
    UPDATE_WORKER
        .scope((), async move {
            loop {
                if !inner.lifecycle.started() {
                    break;
                }
                if let Some(entry) = inner.queue.pop() {
                    run_entry(&inner, entry).await;
                    inner.queue.clear_executing();
                    continue;
                }
                inner.queue.work.notified().await;
            }
        })
        .await;
}

async fn run_entry(inner: &Arc<ServiceInner>, entry: QueuedEntry) {
    let QueuedEntry { source, payload, .. } = entry;
    match payload {
        TaskPayload::Internal { run } => run(),
        TaskPayload::User { task } => run_update_task(inner, &source, task).await,
    }
}

/// The per-task apply pipeline.
async fn run_update_task(
    inner: &Arc<ServiceInner>,
    source: &str,
    task: Arc<dyn ClusterStateUpdateTask>,
) {
    if !inner.lifecycle.started() {
        debug!("processing [{}]: ignoring, cluster service not started", source);
        return;
    }
    debug!("processing [{}]: execute", source);
    let previous = inner.current_state.read().clone();
    let start = Instant::now();

    let mut new_state = match task.execute(&previous) {
        Ok(state) => state,
        Err(err) => {
            fail_task(inner, source, task.as_ref(), &previous, start, err);
            return;
        }
    };

    // Persist changed metadata, bumping metadata and state versions first.
    // Persistence is gated by blocks and by the task itself.
    let persisted = {
        let compare = || -> Result<bool> {
            let new_rendering = new_state.metadata().to_persisted_string()?;
            let previous_rendering = previous.metadata().to_persisted_string()?;
            Ok(new_rendering != previous_rendering)
        };
        match compare() {
            Ok(changed) => {
                if changed
                    && !new_state.blocks().disable_state_persistence()
                    && task.do_persist_metadata()
                {
                    let bumped = ClusterState::builder(&new_state)
                        .metadata(
                            new_state
                                .metadata()
                                .builder_from()
                                .increment_version()
                                .build(),
                        )
                        .increment_version()
                        .build();
                    Some(
                        inner
                            .ring_store
                            .persist_metadata(previous.metadata(), bumped.metadata(), source)
                            .map(|_| bumped),
                    )
                } else {
                    None
                }
            }
            Err(err) => {
                fail_task(inner, source, task.as_ref(), &previous, start, err);
                return;
            }
        }
    };
    match persisted {
        None => {}
        Some(Ok(bumped)) => new_state = bumped,
        Some(Err(RingStoreError::ConcurrentMetadataUpdate(reason))) => {
            // Replay once the locally observed metadata catches up
            debug!(
                reason = %reason,
                "processing [{}]: cannot overwrite persisted metadata, will resubmit after next metadata update",
                source
            );
            register_metadata_replay(inner, source, task);
            return;
        }
        Some(Err(err)) => {
            fail_task(
                inner,
                source,
                task.as_ref(),
                &previous,
                start,
                ClusterError::RingStore(err),
            );
            return;
        }
    }

    if Arc::ptr_eq(&previous, &new_state) {
        // No need to wait for acks when nothing changed
        if let Some(acked) = task.acked() {
            notify_isolated("acked task callback", || acked.on_all_nodes_acked(None));
        }
        if let Some(processed) = task.processed() {
            notify_isolated("processed task callback", || {
                processed.cluster_state_processed(source, &previous, &new_state)
            });
        }
        let elapsed = start.elapsed();
        debug!(
            "processing [{}]: took {:?}, no change in cluster state",
            source, elapsed
        );
        inner.warn_slow_if_needed(elapsed, source);
        return;
    }

    new_state.set_status(ClusterStateStatus::BeingApplied);
    debug!(
        "cluster state updated, version [{}], source [{}]",
        new_state.version(),
        source
    );

    let event = ClusterChangedEvent::new(source, new_state.clone(), previous.clone());
    if event.nodes_delta().has_changes() {
        let summary = event.nodes_delta().short_summary();
        if !summary.is_empty() {
            info!("{}, reason: {}", summary, source);
        }
    }

    let local = new_state.nodes().local_node().cloned();
    for node in &event.nodes_delta().added {
        let requires_connection = local
            .as_ref()
            .map(|l| l.should_connect_to(node))
            .unwrap_or(false);
        if !requires_connection {
            continue;
        }
        if let Err(err) = inner.transport.connect_to_node(node).await {
            // The fault detector will observe the node as failed
            warn!(node = %node, error = %err, "failed to connect to node");
        }
    }

    *inner.current_state.write() = new_state.clone();
    debug!(
        "set local cluster state version={} metadata.version={}",
        new_state.version(),
        new_state.metadata().version()
    );

    // Publish the applied metadata version through gossip
    inner.discovery.publish(&new_state);

    if let Some(acked) = task.acked() {
        if acked.must_apply_metadata() && new_state.nodes().len() > 1 {
            let version = new_state.metadata().version();
            info!(
                "waiting for metadata version {} on all other alive nodes",
                version
            );
            match inner
                .discovery
                .await_metadata_version(version, acked.ack_timeout())
                .await
            {
                Ok(true) => {
                    notify_isolated("acked task callback", || acked.on_all_nodes_acked(None));
                }
                Ok(false) => {
                    warn!("timeout waiting for metadata version {}", version);
                    notify_isolated("acked task callback", || acked.on_all_nodes_acked(None));
                }
                Err(err) => {
                    warn!(error = %err, "interrupted while waiting for metadata version {}", version);
                    notify_isolated("acked task callback", || {
                        acked.on_all_nodes_acked(Some(&err))
                    });
                }
            }
        } else {
            notify_isolated("acked task callback", || acked.on_all_nodes_acked(None));
        }
    }

    for listener in inner.registry.pre_applied() {
        notify_isolated("cluster state listener", || listener.cluster_changed(&event));
    }

    for node in &event.nodes_delta().removed {
        if let Err(err) = inner.transport.disconnect_from_node(node).await {
            warn!(node = %node, error = %err, "failed to disconnect from node");
        }
    }

    new_state.set_status(ClusterStateStatus::Applied);

    for listener in inner.registry.post_applied() {
        notify_isolated("cluster state listener", || listener.cluster_changed(&event));
    }

    if let Some(processed) = task.processed() {
        notify_isolated("processed task callback", || {
            processed.cluster_state_processed(source, &previous, &new_state)
        });
    }

    let elapsed = start.elapsed();
    debug!(
        "processing [{}]: took {:?}, done applying updated cluster state (version: {}, uuid: {})",
        source,
        elapsed,
        new_state.version(),
        new_state.state_uuid()
    );
    inner.warn_slow_if_needed(elapsed, source);
}

fn fail_task(
    inner: &Arc<ServiceInner>,
    source: &str,
    task: &dyn ClusterStateUpdateTask,
    previous: &Arc<ClusterState>,
    start: Instant,
    err: ClusterError,
) {
    let elapsed = start.elapsed();
    trace!(
        version = previous.version(),
        nodes = previous.nodes().len(),
        error = %err,
        "failed to execute cluster state update in {:?}, source [{}]",
        elapsed,
        source
    );
    inner.warn_slow_if_needed(elapsed, source);
    task.on_failure(source, &err);
}

/// One-shot priority-band subscriber replaying a task rejected by a
/// concurrent metadata update.
struct MetadataReplaySubscriber {
    inner: Weak<ServiceInner>,
    source: String,
    task: Arc<dyn ClusterStateUpdateTask>,
    fired: AtomicBool,
}

impl ClusterStateListener for MetadataReplaySubscriber {
    fn cluster_changed(&self, event: &ClusterChangedEvent) {
        if !event.metadata_changed() {
            return;
        }
        if self.fired.swap(true, Ordering::AcqRel) {
            return;
        }
        if let Some(inner) = self.inner.upgrade() {
            debug!("resubmitting task [{}] after metadata update", self.source);
            submit_update_task(&inner, self.source.clone(), Priority::Urgent, self.task.clone());
            // Replay only once
            inner
                .registry
                .remove_addr(self as *const Self as *const () as usize);
        }
    }
}

fn register_metadata_replay(
    inner: &Arc<ServiceInner>,
    source: &str,
    task: Arc<dyn ClusterStateUpdateTask>,
) {
    inner.registry.add_first(Arc::new(MetadataReplaySubscriber {
        inner: Arc::downgrade(inner),
        source: source.to_string(),
        task,
        fired: AtomicBool::new(false),
    }));
}

async fn run_reconnect_loop(inner: Arc<ServiceInner>) {
    let interval = inner.settings.reconnect_interval();
    let mut failures = FailureCounter::default();
    loop {
        tokio::select! {
            _ = sleep(interval) => {
                if !inner.lifecycle.started() {
                    break;
                }
                reconnect_tick(&inner.current_state, &inner.transport, &mut failures).await;
            }
            _ = inner.reconnect_shutdown.notified() => break,
        }
    }
}

impl ServiceInner {
    fn warn_slow_if_needed(&self, elapsed: Duration, source: &str) {
        let threshold = *self.slow_task_threshold.read();
        if elapsed > threshold {
            warn!(
                "cluster state update task [{}] took {:?}, above the warn threshold of {:?}",
                source, elapsed, threshold
            );
        }
    }
}
