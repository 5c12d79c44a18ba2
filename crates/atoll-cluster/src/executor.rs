//! Priority task queue feeding the single update worker.
//!
//! Entries are ordered by `(priority, insertion order)` with FIFO tie-break
//! within a priority. The queue itself is passive; the service owns the
//! single consumer task that pops entries and drives the apply pipeline.
//!
//! Payloads are a sum type so the pending-task surface never needs
//! structural downcasts: user-submitted update tasks and internal
//! coordination steps (listener registration) travel through the same queue.

use crate::task::{ClusterStateUpdateTask, Priority};
use parking_lot::Mutex;
use std::cmp::Ordering as CmpOrdering;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Notify;

/// What a queue entry runs.
pub(crate) enum TaskPayload {
    /// A caller-submitted update task.
    User {
        task: Arc<dyn ClusterStateUpdateTask>,
    },

    /// An internal coordination step run on the update worker.
    Internal { run: Box<dyn FnOnce() + Send> },
}

impl TaskPayload {
    fn kind(&self) -> &'static str {
        match self {
            TaskPayload::User { .. } => "update task",
            TaskPayload::Internal { .. } => "internal",
        }
    }
}

/// Queue ordering key: higher priority first, then insertion order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct QueueKey {
    priority: Priority,
    insertion_order: u64,
}

impl Ord for QueueKey {
    fn cmp(&self, other: &Self) -> CmpOrdering {
        other
            .priority
            .cmp(&self.priority)
            .then(self.insertion_order.cmp(&other.insertion_order))
    }
}

impl PartialOrd for QueueKey {
    fn partial_cmp(&self, other: &Self) -> Option<CmpOrdering> {
        Some(self.cmp(other))
    }
}

/// A queued entry.
///
/// The pop and the per-task timeout race under the queue lock: whichever
/// removes the entry first wins, so a task can never both time out and
/// execute.
pub(crate) struct QueuedEntry {
    pub insertion_order: u64,
    pub priority: Priority,
    pub source: String,
    pub inserted_at: Instant,
    /// Wakes the per-task timer early once execution begins.
    pub timeout_cancel: Option<Arc<Notify>>,
    pub payload: TaskPayload,
}

/// A pending task as reported by the introspection surface.
#[derive(Debug, Clone)]
pub struct PendingClusterTask {
    /// Queue insertion order (also a unique id while queued).
    pub insertion_order: u64,

    /// Queue priority.
    pub priority: Priority,

    /// Source description of the submitting caller.
    pub source: String,

    /// How long the entry has been in the queue.
    pub time_in_queue: Duration,

    /// Whether the entry is currently executing.
    pub executing: bool,
}

struct ExecutingInfo {
    insertion_order: u64,
    priority: Priority,
    source: String,
    inserted_at: Instant,
}

/// The priority queue plus the currently-executing entry.
pub(crate) struct TaskQueue {
    queue: Mutex<BTreeMap<QueueKey, QueuedEntry>>,
    executing: Mutex<Option<ExecutingInfo>>,
    insertion_counter: AtomicU64,
    /// One permit per push; the consumer drains until empty after each wake.
    pub(crate) work: Notify,
}

impl TaskQueue {
    pub(crate) fn new() -> Self {
        Self {
            queue: Mutex::new(BTreeMap::new()),
            executing: Mutex::new(None),
            insertion_counter: AtomicU64::new(0),
            work: Notify::new(),
        }
    }

    /// Enqueue an entry; returns its insertion order.
    pub(crate) fn push(
        &self,
        priority: Priority,
        source: String,
        payload: TaskPayload,
        timeout_cancel: Option<Arc<Notify>>,
    ) -> u64 {
        let insertion_order = self.insertion_counter.fetch_add(1, Ordering::AcqRel);
        let entry = QueuedEntry {
            insertion_order,
            priority,
            source,
            inserted_at: Instant::now(),
            timeout_cancel,
            payload,
        };
        self.queue.lock().insert(
            QueueKey {
                priority,
                insertion_order,
            },
            entry,
        );
        self.work.notify_one();
        insertion_order
    }

    /// Pop the highest-priority entry, marking it executing.
    pub(crate) fn pop(&self) -> Option<QueuedEntry> {
        let mut queue = self.queue.lock();
        let (_, entry) = queue.pop_first()?;
        if let Some(cancel) = &entry.timeout_cancel {
            cancel.notify_one();
        }
        *self.executing.lock() = Some(ExecutingInfo {
            insertion_order: entry.insertion_order,
            priority: entry.priority,
            source: entry.source.clone(),
            inserted_at: entry.inserted_at,
        });
        Some(entry)
    }

    /// Clear the executing marker once an entry ran to completion.
    pub(crate) fn clear_executing(&self) {
        *self.executing.lock() = None;
    }

    /// Remove a queued entry that has not started executing.
    ///
    /// Used by per-task timeouts; returns the entry when the timeout won the
    /// race against the worker.
    pub(crate) fn remove_if_not_started(&self, insertion_order: u64) -> Option<QueuedEntry> {
        let mut queue = self.queue.lock();
        let key = queue
            .keys()
            .find(|k| k.insertion_order == insertion_order)
            .copied()?;
        queue.remove(&key)
    }

    /// Number of queued entries (excluding the executing one).
    pub(crate) fn len(&self) -> usize {
        self.queue.lock().len()
    }

    /// Age of the longest-queued entry.
    pub(crate) fn max_wait_time(&self) -> Duration {
        let queue = self.queue.lock();
        queue
            .values()
            .map(|e| e.inserted_at.elapsed())
            .max()
            .unwrap_or(Duration::ZERO)
    }

    /// Snapshot of the executing entry followed by queued entries in
    /// dispatch order.
    pub(crate) fn pending(&self) -> Vec<PendingClusterTask> {
        let mut pending = Vec::new();
        if let Some(executing) = self.executing.lock().as_ref() {
            pending.push(PendingClusterTask {
                insertion_order: executing.insertion_order,
                priority: executing.priority,
                source: executing.source.clone(),
                time_in_queue: executing.inserted_at.elapsed(),
                executing: true,
            });
        }
        let queue = self.queue.lock();
        for entry in queue.values() {
            pending.push(PendingClusterTask {
                insertion_order: entry.insertion_order,
                priority: entry.priority,
                source: render_source(&entry.source, &entry.payload),
                time_in_queue: entry.inserted_at.elapsed(),
                executing: false,
            });
        }
        pending
    }
}

/// Render a pending entry's source, falling back to a typed placeholder for
/// entries submitted without one.
fn render_source(source: &str, payload: &TaskPayload) -> String {
    if source.is_empty() {
        format!("unknown [{}]", payload.kind())
    } else {
        source.to_string()
    }
}
