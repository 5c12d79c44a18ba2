//! Update task traits and priorities.
//!
//! A task is a one-shot value submitted to the coordination service. It is
//! held as `Arc<dyn ClusterStateUpdateTask>` because a task rejected by a
//! concurrent metadata update is resubmitted once after the next metadata
//! change.

use crate::node::DiscoveryNode;
use crate::state::ClusterState;
use crate::{ClusterError, Result};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

/// Queue priority of an update task.
///
/// Higher priorities are dequeued first; within one priority, submission
/// order is preserved.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Priority {
    Languid,
    Low,
    Normal,
    High,
    Urgent,
    Immediate,
}

impl fmt::Display for Priority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Priority::Languid => "LANGUID",
            Priority::Low => "LOW",
            Priority::Normal => "NORMAL",
            Priority::High => "HIGH",
            Priority::Urgent => "URGENT",
            Priority::Immediate => "IMMEDIATE",
        };
        f.write_str(name)
    }
}

/// A cluster-state mutation.
///
/// `execute` computes the successor of the snapshot it is given; returning
/// the input `Arc` unchanged (by identity) signals "no change" and skips
/// persistence, publication and listener notification.
pub trait ClusterStateUpdateTask: Send + Sync + 'static {
    /// Compute the successor state.
    fn execute(&self, previous: &Arc<ClusterState>) -> Result<Arc<ClusterState>>;

    /// Called when the task failed: execute threw, persistence failed, or
    /// the task timed out while queued.
    fn on_failure(&self, source: &str, err: &ClusterError);

    /// Whether a metadata change computed by this task should be persisted
    /// through the ring store. Persistence is additionally gated by blocks.
    fn do_persist_metadata(&self) -> bool {
        true
    }

    /// Timeout before the task starts executing; `None` waits indefinitely.
    fn timeout(&self) -> Option<Duration> {
        None
    }

    /// Acknowledgement surface; `None` for tasks that do not await acks.
    fn acked(&self) -> Option<&dyn AckedTask> {
        None
    }

    /// Completion-callback surface; `None` for fire-and-forget tasks.
    fn processed(&self) -> Option<&dyn ProcessedTask> {
        None
    }
}

/// Acknowledgement surface of an update task.
pub trait AckedTask: Send + Sync {
    /// Whether an ack from this node is required.
    fn must_ack(&self, node: &DiscoveryNode) -> bool;

    /// Whether the change must be applied (metadata observed) on all nodes
    /// before the task is acknowledged.
    fn must_apply_metadata(&self) -> bool;

    /// How long to wait for acknowledgements.
    fn ack_timeout(&self) -> Duration;

    /// Terminal callback: all required nodes acknowledged. `err` carries the
    /// last per-node failure, if any.
    fn on_all_nodes_acked(&self, err: Option<&ClusterError>);

    /// Terminal callback: the ack deadline expired first.
    fn on_ack_timeout(&self);
}

/// Completion-callback surface of an update task.
pub trait ProcessedTask: Send + Sync {
    /// Called on the update worker once the task fully completed.
    fn cluster_state_processed(
        &self,
        source: &str,
        previous: &Arc<ClusterState>,
        state: &Arc<ClusterState>,
    );
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_priority_ordering() {
        assert!(Priority::Immediate > Priority::Urgent);
        assert!(Priority::Urgent > Priority::High);
        assert!(Priority::High > Priority::Normal);
        assert!(Priority::Normal > Priority::Low);
        assert!(Priority::Low > Priority::Languid);
    }

    #[test]
    fn test_priority_display() {
        assert_eq!(Priority::Urgent.to_string(), "URGENT");
        assert_eq!(Priority::Normal.to_string(), "NORMAL");
    }

    #[test]
    fn test_default_task_surfaces() {
        struct Noop;
        impl ClusterStateUpdateTask for Noop {
            fn execute(&self, previous: &Arc<ClusterState>) -> Result<Arc<ClusterState>> {
                Ok(previous.clone())
            }
            fn on_failure(&self, _source: &str, _err: &ClusterError) {}
        }

        let task = Noop;
        assert!(task.do_persist_metadata());
        assert!(task.timeout().is_none());
        assert!(task.acked().is_none());
        assert!(task.processed().is_none());
    }
}
