//! Listener behavior over a fake subscription.

mod common;

use std::sync::Arc;
use std::time::Duration;

use common::{
    payload, test_config, FakeSubscription, Harness, MemoryStore, PanicTranscoder,
    RecordingRecorder, StuckTranscoder,
};
use tokio::sync::watch;
use vproc_media::PlaceholderTranscoder;
use vproc_queue::ReceivedMessage;
use vproc_worker::{MessageDisposition, QueueListener, WorkerConfig, WorkerError};

fn listener(harness: &Harness, subscription: Arc<FakeSubscription>) -> QueueListener {
    QueueListener::new(
        subscription,
        harness.pipeline.clone(),
        &test_config(harness.work_root.path()),
    )
}

async fn wait_until(condition: impl Fn() -> bool) {
    tokio::time::timeout(Duration::from_secs(5), async {
        while !condition() {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("condition not reached in time");
}

#[tokio::test]
async fn test_push_subscription_is_refused() {
    let harness = Harness::placeholder();
    let subscription = Arc::new(FakeSubscription::push("https://example.test/push"));
    let listener = listener(&harness, subscription.clone());

    let (_shutdown_tx, shutdown_rx) = watch::channel(false);
    let err = listener.run(shutdown_rx).await.unwrap_err();

    assert!(matches!(err, WorkerError::Config(ref msg) if msg.contains("push")));
    assert!(harness.recorder.updates().is_empty());
    assert_eq!(subscription.settled(), 0);
}

#[tokio::test]
async fn test_run_acks_good_and_nacks_malformed() {
    let harness = Harness::placeholder();
    let subscription = Arc::new(FakeSubscription::with_messages(vec![
        ReceivedMessage::new("ack-bad", "m-bad", b"{\"videoId\": 42"),
        ReceivedMessage::new("ack-good", "m-good", &payload()),
    ]));
    let listener = Arc::new(listener(&harness, subscription.clone()));

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let running = {
        let listener = listener.clone();
        tokio::spawn(async move { listener.run(shutdown_rx).await })
    };

    let watched = subscription.clone();
    wait_until(move || watched.settled() == 2).await;
    shutdown_tx.send(true).unwrap();
    running.await.unwrap().unwrap();

    assert_eq!(subscription.acks(), vec!["ack-good"]);
    assert_eq!(subscription.nacks(), vec!["ack-bad"]);

    // Only the good message produced status writes.
    let updates = harness.recorder.updates();
    assert_eq!(updates.len(), 5);
    assert!(updates.iter().all(|u| u.processing_id == "p1"));
    assert!(harness.store.object("videos/v1/hls/playlist.m3u8").is_some());
}

#[tokio::test]
async fn test_malformed_payload_is_nacked_without_status_writes() {
    let harness = Harness::placeholder();
    let subscription = Arc::new(FakeSubscription::default());
    let listener = listener(&harness, subscription.clone());
    let (_shutdown_tx, mut shutdown_rx) = watch::channel(false);

    let bodies: [&[u8]; 3] = [
        b"not json",
        br#"{"videoId":"v1","videoKey":"uploads/v1.mp4","processingId":"","uploaderId":"u1"}"#,
        br#"{"videoId":"../v1","videoKey":"uploads/v1.mp4","processingId":"p1","uploaderId":"u1"}"#,
    ];

    for body in bodies {
        let message = ReceivedMessage::new("ack-1", "m-1", body);
        let disposition = listener.handle_message(&message, &mut shutdown_rx).await;
        assert_eq!(disposition, MessageDisposition::Nack { reason: "invalid" });
    }

    assert!(harness.recorder.updates().is_empty());
    assert!(harness.work_root_entries().is_empty());
}

#[tokio::test]
async fn test_fatal_failure_is_nacked() {
    let harness = Harness::new(
        MemoryStore::default(),
        Arc::new(PlaceholderTranscoder::new()),
        RecordingRecorder::default(),
    );
    let subscription = Arc::new(FakeSubscription::default());
    let listener = listener(&harness, subscription.clone());
    let (_shutdown_tx, mut shutdown_rx) = watch::channel(false);

    let message = ReceivedMessage::new("ack-1", "m-1", &payload());
    let disposition = listener.handle_message(&message, &mut shutdown_rx).await;
    assert_eq!(disposition, MessageDisposition::Nack { reason: "failed" });

    listener.settle(&message, disposition).await;
    assert_eq!(subscription.nacks(), vec!["ack-1"]);
    assert!(subscription.acks().is_empty());
}

#[tokio::test]
async fn test_pipeline_panic_is_nacked() {
    let harness = Harness::new(
        MemoryStore::with_source(),
        Arc::new(PanicTranscoder),
        RecordingRecorder::default(),
    );
    let listener = listener(&harness, Arc::new(FakeSubscription::default()));
    let (_shutdown_tx, mut shutdown_rx) = watch::channel(false);

    let message = ReceivedMessage::new("ack-1", "m-1", &payload());
    let disposition = listener.handle_message(&message, &mut shutdown_rx).await;

    assert_eq!(disposition, MessageDisposition::Nack { reason: "panic" });
    assert!(harness.work_root_entries().is_empty());
}

#[tokio::test]
async fn test_shutdown_aborts_job_and_extends_lease_meanwhile() {
    let harness = Harness::new(
        MemoryStore::with_source(),
        Arc::new(StuckTranscoder),
        RecordingRecorder::default(),
    );
    let subscription = Arc::new(FakeSubscription::default());
    let listener = listener(&harness, subscription.clone());
    let (shutdown_tx, mut shutdown_rx) = watch::channel(false);

    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(150)).await;
        let _ = shutdown_tx.send(true);
    });

    let message = ReceivedMessage::new("ack-1", "m-1", &payload());
    let disposition = listener.handle_message(&message, &mut shutdown_rx).await;

    assert_eq!(disposition, MessageDisposition::Nack { reason: "shutdown" });
    assert!(harness.work_root_entries().is_empty());

    let extensions = subscription.extensions();
    assert!(!extensions.is_empty());
    assert!(extensions.iter().all(|(ack_id, secs)| ack_id == "ack-1" && *secs == 60));
}

#[tokio::test]
async fn test_lease_is_not_extended_past_maximum() {
    let harness = Harness::new(
        MemoryStore::with_source(),
        Arc::new(StuckTranscoder),
        RecordingRecorder::default(),
    );
    let subscription = Arc::new(FakeSubscription::default());
    let mut config = test_config(harness.work_root.path());
    config.max_lease = Duration::ZERO;
    let listener = QueueListener::new(subscription.clone(), harness.pipeline.clone(), &config);
    let (shutdown_tx, mut shutdown_rx) = watch::channel(false);

    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(100)).await;
        let _ = shutdown_tx.send(true);
    });

    let message = ReceivedMessage::new("ack-1", "m-1", &payload());
    listener.handle_message(&message, &mut shutdown_rx).await;

    assert!(subscription.extensions().is_empty());
}

fn stuck_listener(harness: &Harness, subscription: Arc<FakeSubscription>) -> QueueListener {
    let config = WorkerConfig {
        lease_heartbeat: WorkerConfig::default().lease_heartbeat,
        ..test_config(harness.work_root.path())
    };
    QueueListener::new(subscription, harness.pipeline.clone(), &config)
}

fn stuck_harness() -> Harness {
    Harness::new(
        MemoryStore::with_source(),
        Arc::new(StuckTranscoder),
        RecordingRecorder::default(),
    )
}

fn shutdown_after(delay: Duration) -> watch::Receiver<bool> {
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    tokio::spawn(async move {
        tokio::time::sleep(delay).await;
        let _ = shutdown_tx.send(true);
    });
    shutdown_rx
}

#[tokio::test]
async fn test_lease_extended_on_receipt_with_default_ack_deadline() {
    let harness = stuck_harness();
    let subscription = Arc::new(FakeSubscription::with_ack_deadline(10));
    let listener = stuck_listener(&harness, subscription.clone());
    listener.ensure_pull_subscription().await.unwrap();

    assert_eq!(listener.heartbeat_period(), Duration::from_secs(5));

    let mut shutdown_rx = shutdown_after(Duration::from_millis(100));
    let message = ReceivedMessage::new("ack-1", "m-1", &payload());
    listener.handle_message(&message, &mut shutdown_rx).await;

    assert_eq!(subscription.extensions(), vec![("ack-1".to_string(), 60)]);
}

#[tokio::test]
async fn test_heartbeat_keeps_up_with_short_ack_deadline() {
    let harness = stuck_harness();
    let subscription = Arc::new(FakeSubscription::with_ack_deadline(1));
    let listener = stuck_listener(&harness, subscription.clone());
    listener.ensure_pull_subscription().await.unwrap();

    assert_eq!(listener.heartbeat_period(), Duration::from_millis(500));

    let mut shutdown_rx = shutdown_after(Duration::from_millis(1200));
    let message = ReceivedMessage::new("ack-1", "m-1", &payload());
    listener.handle_message(&message, &mut shutdown_rx).await;

    // Receipt, then every half deadline: never a full second without one.
    assert!(subscription.extensions().len() >= 3);
    assert!(harness.work_root_entries().is_empty());
}
