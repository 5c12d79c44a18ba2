//! Integration tests for listener bands, timeout listeners, master-role
//! transitions and the reconnect loop.

mod common;

use atoll_cluster::{ClusterChangedEvent, ClusterState, ClusterStateListener, Transport};
use atoll_testkit::{
    wait_until, RecordingListener, RecordingMasterListener, RecordingTask,
    RecordingTimeoutListener,
};
use common::{
    add_index_task, add_peer_task, default_settings, remove_peer_task, started, started_with,
};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::sleep;

const WAIT: Duration = Duration::from_secs(2);

#[tokio::test]
async fn test_listener_bands_fire_in_order() {
    let h = started().await;
    let log = RecordingListener::shared_log();

    let first = RecordingListener::new("first", &log);
    let normal = RecordingListener::new("normal", &log);
    let last = RecordingListener::new("last", &log);
    let post = RecordingTimeoutListener::with_log("post", &log);

    h.service.add_first(first.clone());
    h.service.add(normal.clone());
    h.service.add_last(last.clone());
    h.service.add_timeout_listener(None, post.clone());
    assert!(wait_until(|| post.post_added_count() == 1, WAIT).await);

    let task = add_index_task("logs");
    h.service.submit_task("create-logs", task.clone());
    assert!(wait_until(|| task.processed_count() == 1, WAIT).await);

    assert_eq!(
        *log.lock(),
        vec![
            "first".to_string(),
            "normal".to_string(),
            "last".to_string(),
            "post".to_string()
        ]
    );
    assert_eq!(first.event_count(), 1);
    assert_eq!(post.event_count(), 1);
    assert_eq!(first.observed_versions(), vec![1]);
}

#[tokio::test]
async fn test_insertion_order_within_band() {
    let h = started().await;
    let log = RecordingListener::shared_log();

    let a = RecordingListener::new("a", &log);
    let b = RecordingListener::new("b", &log);
    h.service.add(a.clone());
    h.service.add(b.clone());

    let task = add_index_task("logs");
    h.service.submit_task("create-logs", task.clone());
    assert!(wait_until(|| task.processed_count() == 1, WAIT).await);

    assert_eq!(*log.lock(), vec!["a".to_string(), "b".to_string()]);
}

#[tokio::test]
async fn test_removed_listener_not_notified() {
    let h = started().await;
    let log = RecordingListener::shared_log();

    let listener = RecordingListener::new("l", &log);
    h.service.add(listener.clone());
    let handle: Arc<dyn ClusterStateListener> = listener.clone();
    h.service.remove(&handle);

    let task = add_index_task("logs");
    h.service.submit_task("create-logs", task.clone());
    assert!(wait_until(|| task.processed_count() == 1, WAIT).await);
    assert_eq!(listener.event_count(), 0);
}

#[tokio::test]
async fn test_panicking_listener_does_not_stop_the_band() {
    struct PanickingListener;
    impl ClusterStateListener for PanickingListener {
        fn cluster_changed(&self, _event: &ClusterChangedEvent) {
            panic!("listener bug");
        }
    }

    let h = started().await;
    let log = RecordingListener::shared_log();

    h.service.add(Arc::new(PanickingListener));
    let survivor = RecordingListener::new("survivor", &log);
    h.service.add(survivor.clone());

    let task = add_index_task("logs");
    h.service.submit_task("create-logs", task.clone());
    assert!(wait_until(|| task.processed_count() == 1, WAIT).await);
    assert_eq!(survivor.event_count(), 1);

    // The worker survived and keeps processing
    let next = add_index_task("docs");
    h.service.submit_task("create-docs", next.clone());
    assert!(wait_until(|| next.processed_count() == 1, WAIT).await);
}

#[tokio::test]
async fn test_timeout_listener_fires_on_deadline_and_stays_registered() {
    let h = started().await;

    let listener = RecordingTimeoutListener::new();
    h.service
        .add_timeout_listener(Some(Duration::from_millis(50)), listener.clone());
    assert!(wait_until(|| listener.post_added_count() == 1, WAIT).await);

    sleep(Duration::from_millis(150)).await;
    assert_eq!(listener.timeouts(), vec![Duration::from_millis(50)]);
    assert_eq!(listener.close_count(), 0);

    // Still registered in the post-applied band unless it removes itself
    let task = add_index_task("logs");
    h.service.submit_task("create-logs", task.clone());
    assert!(wait_until(|| task.processed_count() == 1, WAIT).await);
    assert_eq!(listener.event_count(), 1);
}

#[tokio::test]
async fn test_timeout_listener_receives_close_on_shutdown() {
    let h = started().await;

    let listener = RecordingTimeoutListener::new();
    h.service
        .add_timeout_listener(Some(Duration::from_secs(10)), listener.clone());
    assert!(wait_until(|| listener.post_added_count() == 1, WAIT).await);

    h.service.stop().await;
    assert_eq!(listener.close_count(), 1);
    assert!(listener.timeouts().is_empty());

    // Registrations after shutdown are rejected with on_close
    let late = RecordingTimeoutListener::new();
    h.service
        .add_timeout_listener(Some(Duration::from_secs(1)), late.clone());
    assert_eq!(late.close_count(), 1);
    assert_eq!(late.post_added_count(), 0);
}

#[tokio::test]
async fn test_remove_cancels_pending_timeout() {
    let h = started().await;

    let listener = RecordingTimeoutListener::new();
    h.service
        .add_timeout_listener(Some(Duration::from_millis(50)), listener.clone());
    assert!(wait_until(|| listener.post_added_count() == 1, WAIT).await);

    let handle: Arc<dyn ClusterStateListener> = listener.clone();
    h.service.remove(&handle);

    sleep(Duration::from_millis(150)).await;
    assert!(listener.timeouts().is_empty());
    assert_eq!(listener.close_count(), 0);

    let task = add_index_task("logs");
    h.service.submit_task("create-logs", task.clone());
    assert!(wait_until(|| task.processed_count() == 1, WAIT).await);
    assert_eq!(listener.event_count(), 0);
}

#[tokio::test]
async fn test_master_role_transitions() {
    let h = started().await;
    let role = RecordingMasterListener::new();
    h.service.add_master_listener(role.clone());

    let local_id = h.service.local_node().unwrap().id;
    let promote_id = local_id.clone();
    let promote = RecordingTask::new(move |prev: &Arc<ClusterState>| {
        Ok(ClusterState::builder(prev)
            .nodes(
                prev.nodes()
                    .builder_from()
                    .master_node_id(promote_id.clone())
                    .build(),
            )
            .build())
    });
    h.service.submit_task("promote", promote.clone());
    assert!(wait_until(|| promote.processed_count() == 1, WAIT).await);
    assert_eq!(role.on_master_count(), 1);
    assert_eq!(role.off_master_count(), 0);

    // A further event without a role change stays quiet
    let noop = add_index_task("logs");
    h.service.submit_task("create-logs", noop.clone());
    assert!(wait_until(|| noop.processed_count() == 1, WAIT).await);
    assert_eq!(role.on_master_count(), 1);

    let demote = RecordingTask::new(|prev: &Arc<ClusterState>| {
        Ok(ClusterState::builder(prev)
            .nodes(prev.nodes().builder_from().clear_master().build())
            .build())
    });
    h.service.submit_task("demote", demote.clone());
    assert!(wait_until(|| demote.processed_count() == 1, WAIT).await);
    assert_eq!(role.off_master_count(), 1);
}

#[tokio::test]
async fn test_secondary_index_hook_runs_in_last_band() {
    let log = RecordingListener::shared_log();
    let hook = RecordingListener::new("secondary-indices", &log);

    let service = atoll_cluster::ClusterService::builder(
        default_settings(),
        Arc::new(atoll_testkit::InMemoryRingStore::new()),
        Arc::new(atoll_testkit::RecordingDiscovery::new()),
        Arc::new(atoll_testkit::InMemoryTransport::new()),
    )
    .secondary_index_listener(hook.clone())
    .build();
    service
        .remove_initial_block(atoll_cluster::NO_RING_BLOCK.id)
        .unwrap();
    service.start().await.unwrap();

    let normal = RecordingListener::new("normal", &log);
    service.add(normal.clone());

    let task = add_index_task("logs");
    service.submit_task("create-logs", task.clone());
    assert!(wait_until(|| task.processed_count() == 1, WAIT).await);

    // The hook fires after the normal band
    assert_eq!(
        *log.lock(),
        vec!["normal".to_string(), "secondary-indices".to_string()]
    );
}

#[tokio::test]
async fn test_reconnect_loop_retries_failed_peers_and_purges_departed() {
    let h = started_with(default_settings().with_reconnect_interval(Duration::from_millis(25))).await;
    h.transport.fail_connects_to("peer");

    let add = add_peer_task("peer", 9402);
    h.service.submit_task("add-peer", add.clone());
    assert!(wait_until(|| add.processed_count() == 1, WAIT).await);

    // The apply-phase connect failed; the reconnect loop keeps retrying
    assert!(
        wait_until(
            || h.transport.connect_attempts_to("peer") >= 7,
            Duration::from_secs(3)
        )
        .await
    );

    let remove = remove_peer_task("peer");
    h.service.submit_task("remove-peer", remove.clone());
    assert!(wait_until(|| remove.processed_count() == 1, WAIT).await);

    // Once the node left the snapshot, retries stop
    sleep(Duration::from_millis(100)).await;
    let attempts_after_removal = h.transport.connect_attempts_to("peer");
    sleep(Duration::from_millis(200)).await;
    assert!(h.transport.connect_attempts_to("peer") <= attempts_after_removal + 1);
}

#[tokio::test]
async fn test_reconnect_loop_reopens_dropped_connections() {
    let h = started_with(default_settings().with_reconnect_interval(Duration::from_millis(25))).await;

    let add = add_peer_task("peer", 9402);
    h.service.submit_task("add-peer", add.clone());
    assert!(wait_until(|| add.processed_count() == 1, WAIT).await);
    assert_eq!(h.transport.connected_nodes(), vec!["peer".to_string()]);

    // Simulate a dropped connection: the loop reconnects on its next tick
    let peer = atoll_testkit::test_node("peer", 9402);
    h.transport.disconnect_from_node(&peer).await.unwrap();
    assert!(
        wait_until(
            || h.transport.connected_nodes() == vec!["peer".to_string()],
            WAIT
        )
        .await
    );
}
